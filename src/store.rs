//! Gallery photo store: an append-only directory of image files plus a
//! `likes.json` sidecar keyed by filename.
//!
//! Readers go straight to the filesystem; metadata mutations serialize on a
//! narrow mutex and land via temp-write + rename so the sidecar is never
//! half-written. Delete drops the metadata entry before the file, so a
//! metadata entry can never outlive its photo.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Local, TimeZone};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::Error;

/// A persisted photo as exposed to the gallery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Photo {
    pub filename: String,
    /// Capture time, seconds since the epoch.
    pub timestamp: i64,
    pub liked: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PhotoMeta {
    liked: bool,
}

#[derive(Clone)]
pub struct PhotoStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    photos_dir: PathBuf,
    /// Guards read-modify-write cycles on the likes sidecar.
    meta_lock: Mutex<()>,
}

impl PhotoStore {
    pub fn open(photos_dir: &Path) -> Result<Self, Error> {
        fs::create_dir_all(photos_dir)
            .map_err(|err| Error::StorageFailure(format!("create {}: {err}", photos_dir.display())))?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                photos_dir: photos_dir.to_path_buf(),
                meta_lock: Mutex::new(()),
            }),
        })
    }

    pub fn photos_dir(&self) -> &Path {
        &self.inner.photos_dir
    }

    /// Persist a composed photo as JPEG, named by capture time. Returns the
    /// new gallery entry (never liked at creation).
    pub fn save(&self, img: &RgbImage, prefix: &str, taken: DateTime<Local>) -> Result<Photo, Error> {
        let mut filename = format!("{prefix}_{}.jpg", taken.format("%Y%m%d_%H%M%S_%3f"));
        let mut serial = 1u32;
        while self.inner.photos_dir.join(&filename).exists() {
            filename = format!("{prefix}_{}-{serial}.jpg", taken.format("%Y%m%d_%H%M%S_%3f"));
            serial += 1;
        }
        let path = self.inner.photos_dir.join(&filename);
        img.save(&path)
            .map_err(|err| Error::StorageFailure(format!("write {}: {err}", path.display())))?;
        info!(path = %path.display(), "photo saved");
        Ok(Photo {
            filename,
            timestamp: taken.timestamp(),
            liked: false,
        })
    }

    /// List stored photos, newest first.
    pub fn list(&self) -> Result<Vec<Photo>, Error> {
        let likes = self.read_likes()?;
        let mut photos = Vec::new();
        for entry in fs::read_dir(&self.inner.photos_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let Some(filename) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_image_filename(&filename) {
                continue;
            }
            let timestamp = timestamp_from_filename(&filename)
                .or_else(|| mtime_seconds(&entry.path()))
                .unwrap_or(0);
            let liked = likes.get(&filename).map(|m| m.liked).unwrap_or(false);
            photos.push(Photo {
                filename,
                timestamp,
                liked,
            });
        }
        photos.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(b.filename.cmp(&a.filename)));
        Ok(photos)
    }

    /// Flip the liked flag; returns the new value.
    pub fn toggle_like(&self, filename: &str) -> Result<bool, Error> {
        let path = self.photo_path(filename)?;
        let _guard = self.lock_meta();
        // Existence must be checked under the lock, or a racing delete could
        // remove the file between the check and the sidecar write.
        if !path.exists() {
            return Err(Error::NotFound(filename.to_string()));
        }
        let mut likes = self.read_likes()?;
        let entry = likes.entry(filename.to_string()).or_default();
        entry.liked = !entry.liked;
        let liked = entry.liked;
        self.write_likes(&likes)?;
        debug!(filename, liked, "like toggled");
        Ok(liked)
    }

    /// Remove a photo and its metadata entry. The metadata entry goes first
    /// so it can never outlive the file.
    pub fn delete(&self, filename: &str) -> Result<(), Error> {
        let path = self.photo_path(filename)?;
        let _guard = self.lock_meta();
        if !path.exists() {
            return Err(Error::NotFound(filename.to_string()));
        }
        let mut likes = self.read_likes()?;
        if likes.remove(filename).is_some() {
            self.write_likes(&likes)?;
        }
        fs::remove_file(&path)
            .map_err(|err| Error::StorageFailure(format!("remove {}: {err}", path.display())))?;
        info!(filename, "photo deleted");
        Ok(())
    }

    /// Raw file bytes, for serving over HTTP.
    pub fn load_bytes(&self, filename: &str) -> Result<Vec<u8>, Error> {
        let path = self.photo_path(filename)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(filename.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Decoded image, for reprinting.
    pub fn load_image(&self, filename: &str) -> Result<RgbImage, Error> {
        let path = self.photo_path(filename)?;
        if !path.exists() {
            return Err(Error::NotFound(filename.to_string()));
        }
        let img = image::open(&path)
            .map_err(|err| Error::StorageFailure(format!("decode {}: {err}", path.display())))?;
        Ok(img.to_rgb8())
    }

    fn photo_path(&self, filename: &str) -> Result<PathBuf, Error> {
        if !is_safe_filename(filename) {
            return Err(Error::NotFound(filename.to_string()));
        }
        Ok(self.inner.photos_dir.join(filename))
    }

    fn likes_path(&self) -> PathBuf {
        self.inner.photos_dir.join("likes.json")
    }

    fn lock_meta(&self) -> MutexGuard<'_, ()> {
        self.inner
            .meta_lock
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn read_likes(&self) -> Result<BTreeMap<String, PhotoMeta>, Error> {
        let data = match fs::read(self.likes_path()) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&data)
            .map_err(|err| Error::StorageFailure(format!("parse likes.json: {err}")))
    }

    fn write_likes(&self, likes: &BTreeMap<String, PhotoMeta>) -> Result<(), Error> {
        let path = self.likes_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(likes)
            .map_err(|err| Error::StorageFailure(format!("encode likes.json: {err}")))?;
        fs::write(&tmp, json)
            .map_err(|err| Error::StorageFailure(format!("write {}: {err}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|err| Error::StorageFailure(format!("rename {}: {err}", path.display())))?;
        Ok(())
    }
}

/// Reject anything that could escape the photos directory.
pub fn is_safe_filename(filename: &str) -> bool {
    !filename.is_empty()
        && filename != "likes.json"
        && !filename.contains('/')
        && !filename.contains('\\')
        && !filename.contains("..")
}

fn is_image_filename(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    lower.ends_with(".jpg") || lower.ends_with(".jpeg") || lower.ends_with(".png")
}

/// File modification time in epoch seconds, for photos dropped into the
/// directory by hand without a parseable name.
fn mtime_seconds(path: &Path) -> Option<i64> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    let elapsed = modified.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(elapsed.as_secs() as i64)
}

/// Parse `prefix_YYYYmmdd_HHMMSS_mmm[.ext]` back into epoch seconds.
fn timestamp_from_filename(filename: &str) -> Option<i64> {
    let stem = filename.rsplit_once('.').map(|(s, _)| s).unwrap_or(filename);
    let mut parts = stem.splitn(2, '_');
    let _prefix = parts.next()?;
    let rest = parts.next()?;
    let date_time = rest.get(0..15)?; // YYYYmmdd_HHMMSS
    let parsed = chrono::NaiveDateTime::parse_from_str(date_time, "%Y%m%d_%H%M%S").ok()?;
    Local
        .from_local_datetime(&parsed)
        .single()
        .map(|dt| dt.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_filename_rejects_traversal() {
        assert!(is_safe_filename("photo_20260829_120000_000.jpg"));
        assert!(!is_safe_filename("../etc/passwd"));
        assert!(!is_safe_filename("a/b.jpg"));
        assert!(!is_safe_filename("likes.json"));
        assert!(!is_safe_filename(""));
    }

    #[test]
    fn filename_timestamps_round_trip() {
        let taken = Local.with_ymd_and_hms(2026, 8, 29, 15, 4, 5).single().expect("valid");
        let filename = format!("photo_{}.jpg", taken.format("%Y%m%d_%H%M%S_%3f"));
        assert_eq!(timestamp_from_filename(&filename), Some(taken.timestamp()));
        assert_eq!(timestamp_from_filename("garbage"), None);
    }
}
