//! Gallery store behavior against a real temporary directory.

use chrono::Local;
use image::{Rgb, RgbImage};

use photobooth::error::Error;
use photobooth::store::PhotoStore;

fn sample_image() -> RgbImage {
    RgbImage::from_pixel(32, 24, Rgb([200, 150, 100]))
}

fn store() -> (PhotoStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PhotoStore::open(dir.path()).expect("open store");
    (store, dir)
}

#[test]
fn save_then_list_round_trips() {
    let (store, _dir) = store();
    let taken = Local::now();

    let photo = store.save(&sample_image(), "photo", taken).expect("save");
    assert!(photo.filename.starts_with("photo_"));
    assert!(photo.filename.ends_with(".jpg"));
    assert!(!photo.liked);

    let photos = store.list().expect("list");
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].filename, photo.filename);
    assert_eq!(photos[0].timestamp, taken.timestamp());
    assert!(!photos[0].liked);
}

#[test]
fn same_instant_saves_get_distinct_names() {
    let (store, _dir) = store();
    let taken = Local::now();

    let first = store.save(&sample_image(), "photo", taken).expect("first");
    let second = store.save(&sample_image(), "photo", taken).expect("second");
    assert_ne!(first.filename, second.filename);
    assert_eq!(store.list().expect("list").len(), 2);
}

#[test]
fn list_is_newest_first() {
    let (store, _dir) = store();
    let older = Local::now() - chrono::Duration::seconds(90);
    let newer = Local::now();

    let old_photo = store.save(&sample_image(), "photo", older).expect("old");
    let new_photo = store.save(&sample_image(), "strip", newer).expect("new");

    let photos = store.list().expect("list");
    assert_eq!(photos[0].filename, new_photo.filename);
    assert_eq!(photos[1].filename, old_photo.filename);
}

#[test]
fn toggle_like_flips_and_persists() {
    let (store, dir) = store();
    let photo = store.save(&sample_image(), "photo", Local::now()).expect("save");

    assert!(store.toggle_like(&photo.filename).expect("first toggle"));
    assert!(store.list().expect("list")[0].liked);

    // A second store over the same directory sees the persisted flag.
    let reopened = PhotoStore::open(dir.path()).expect("reopen");
    assert!(reopened.list().expect("list")[0].liked);

    assert!(!store.toggle_like(&photo.filename).expect("second toggle"));
    assert!(!store.list().expect("list")[0].liked);
}

#[test]
fn toggle_like_on_unknown_photo_fails() {
    let (store, _dir) = store();
    assert!(matches!(
        store.toggle_like("missing.jpg"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn delete_removes_photo_and_metadata() {
    let (store, dir) = store();
    let keep = store.save(&sample_image(), "photo", Local::now()).expect("keep");
    let gone = store.save(&sample_image(), "photo", Local::now()).expect("gone");
    store.toggle_like(&gone.filename).expect("like");

    store.delete(&gone.filename).expect("delete");
    assert!(!dir.path().join(&gone.filename).exists());

    let photos = store.list().expect("list");
    assert_eq!(photos.len(), 1);
    assert_eq!(photos[0].filename, keep.filename);

    // The like entry went with the file; re-saving the same name starts fresh.
    assert!(matches!(
        store.delete(&gone.filename),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn load_bytes_and_image_round_trip() {
    let (store, _dir) = store();
    let photo = store.save(&sample_image(), "photo", Local::now()).expect("save");

    let bytes = store.load_bytes(&photo.filename).expect("bytes");
    assert!(!bytes.is_empty());
    // JPEG magic.
    assert_eq!(&bytes[0..2], &[0xff, 0xd8]);

    let img = store.load_image(&photo.filename).expect("image");
    assert_eq!(img.dimensions(), (32, 24));

    assert!(matches!(
        store.load_bytes("missing.jpg"),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn traversal_names_are_rejected_everywhere() {
    let (store, _dir) = store();
    for name in ["../escape.jpg", "a/b.jpg", "likes.json", ""] {
        assert!(matches!(store.load_bytes(name), Err(Error::NotFound(_))), "{name:?}");
        assert!(matches!(store.toggle_like(name), Err(Error::NotFound(_))), "{name:?}");
        assert!(matches!(store.delete(name), Err(Error::NotFound(_))), "{name:?}");
    }
}

#[test]
fn concurrent_like_and_delete_never_leave_orphaned_metadata() {
    let (store, dir) = store();

    for _ in 0..200 {
        let filename = store
            .save(&sample_image(), "photo", Local::now())
            .expect("save")
            .filename;

        let liker = {
            let store = store.clone();
            let filename = filename.clone();
            std::thread::spawn(move || {
                let _ = store.toggle_like(&filename);
            })
        };
        let deleter = {
            let store = store.clone();
            let filename = filename.clone();
            std::thread::spawn(move || {
                let _ = store.delete(&filename);
            })
        };
        liker.join().expect("liker thread");
        deleter.join().expect("deleter thread");

        // Whatever the interleaving, a metadata entry must not outlive its
        // file.
        if !dir.path().join(&filename).exists() {
            let likes: serde_json::Value = match std::fs::read(dir.path().join("likes.json")) {
                Ok(raw) => serde_json::from_slice(&raw).expect("parse likes.json"),
                Err(_) => continue,
            };
            assert!(
                likes.get(&filename).is_none(),
                "metadata entry outlives deleted {filename}"
            );
        }
    }
}

#[test]
fn sidecar_file_never_appears_in_listings() {
    let (store, _dir) = store();
    let photo = store.save(&sample_image(), "photo", Local::now()).expect("save");
    store.toggle_like(&photo.filename).expect("like creates sidecar");

    let photos = store.list().expect("list");
    assert_eq!(photos.len(), 1);
    assert!(photos.iter().all(|p| p.filename != "likes.json"));
}
