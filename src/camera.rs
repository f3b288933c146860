//! Camera device adapter.
//!
//! Holds the exclusive webcam handle. Only the session worker ever calls
//! into it, so access is already serialized by construction and no locking
//! is needed around the device itself.

use std::time::{Duration, Instant};

use image::RgbImage;
use nokhwa::Camera;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use tracing::{info, warn};

use crate::config::CameraConfig;
use crate::error::Error;

/// Delay between retries after a failed frame read.
const RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Source of captured frames. The production implementation wraps the
/// webcam; tests substitute deterministic fakes.
pub trait FrameSource: Send {
    /// Grab one frame, retrying transient read failures internally up to a
    /// bounded count within `timeout`. A device that cannot be read at all
    /// surfaces as [`Error::DeviceUnavailable`].
    fn capture_frame(&mut self, timeout: Duration) -> Result<RgbImage, Error>;
}

/// nokhwa-backed webcam source. The stream is opened once and reused for
/// every capture so exposure settles between sessions.
pub struct WebcamSource {
    camera: Camera,
    frame_retries: u32,
}

impl WebcamSource {
    /// Open the configured capture device. Fails fast when the device is
    /// missing; opening is never retried here.
    pub fn open(cfg: &CameraConfig) -> Result<Self, Error> {
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
            CameraFormat::new(Resolution::new(cfg.width, cfg.height), FrameFormat::MJPEG, 30),
        ));
        let mut camera = Camera::new(CameraIndex::Index(cfg.index), requested)
            .map_err(|err| Error::DeviceUnavailable(format!("open camera {}: {err}", cfg.index)))?;
        camera
            .open_stream()
            .map_err(|err| Error::DeviceUnavailable(format!("open stream: {err}")))?;
        info!(
            index = cfg.index,
            resolution = %camera.resolution(),
            "camera stream opened"
        );
        Ok(Self {
            camera,
            frame_retries: cfg.frame_retries,
        })
    }
}

/// Defers opening the webcam until the first capture so the booth can boot
/// (and serve the gallery) with no camera attached. A failed capture drops
/// the cached handle; the next session starts from a fresh open.
pub struct LazyWebcam {
    cfg: CameraConfig,
    source: Option<WebcamSource>,
}

impl LazyWebcam {
    pub fn new(cfg: CameraConfig) -> Self {
        Self { cfg, source: None }
    }
}

impl FrameSource for LazyWebcam {
    fn capture_frame(&mut self, timeout: Duration) -> Result<RgbImage, Error> {
        if self.source.is_none() {
            self.source = Some(WebcamSource::open(&self.cfg)?);
        }
        let Some(source) = self.source.as_mut() else {
            return Err(Error::DeviceUnavailable("camera not open".to_string()));
        };
        let result = source.capture_frame(timeout);
        if result.is_err() {
            self.source = None;
        }
        result
    }
}

impl FrameSource for WebcamSource {
    fn capture_frame(&mut self, timeout: Duration) -> Result<RgbImage, Error> {
        let start = Instant::now();
        let mut last_err = None;
        for attempt in 0..=self.frame_retries {
            if attempt > 0 && start.elapsed() >= timeout {
                break;
            }
            match self.camera.frame() {
                Ok(buffer) => match buffer.decode_image::<RgbFormat>() {
                    Ok(frame) => return Ok(frame),
                    Err(err) => {
                        warn!(attempt, error = %err, "frame decode failed");
                        last_err = Some(err.to_string());
                    }
                },
                Err(err) => {
                    warn!(attempt, error = %err, "frame read failed");
                    last_err = Some(err.to_string());
                }
            }
            std::thread::sleep(RETRY_PAUSE);
        }
        Err(Error::DeviceUnavailable(
            last_err.unwrap_or_else(|| "frame read timed out".to_string()),
        ))
    }
}
