use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

/// Top-level booth configuration, loaded from YAML.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub printer: PrinterConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub joystick: JoystickConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_bind_address")]
    pub bind_address: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
}

impl ServerConfig {
    fn default_bind_address() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8080
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: Self::default_bind_address(),
            port: Self::default_port(),
        }
    }
}

/// Shared-password gate for the web API. Leaving `password` unset disables
/// the gate entirely (kiosk on a trusted hotspot).
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CameraConfig {
    /// Video capture device index (0 for the default webcam).
    #[serde(default)]
    pub index: u32,
    #[serde(default = "CameraConfig::default_width")]
    pub width: u32,
    #[serde(default = "CameraConfig::default_height")]
    pub height: u32,
    /// How long to wait for a single frame before counting a read as failed.
    #[serde(default = "CameraConfig::default_frame_timeout", with = "humantime_serde")]
    pub frame_timeout: Duration,
    /// Bounded retries for a timed-out frame read before surfacing
    /// `DeviceUnavailable`. A missing device is never retried.
    #[serde(default = "CameraConfig::default_frame_retries")]
    pub frame_retries: u32,
}

impl CameraConfig {
    fn default_width() -> u32 {
        1280
    }

    fn default_height() -> u32 {
        720
    }

    fn default_frame_timeout() -> Duration {
        Duration::from_secs(2)
    }

    fn default_frame_retries() -> u32 {
        3
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: Self::default_width(),
            height: Self::default_height(),
            frame_timeout: Self::default_frame_timeout(),
            frame_retries: Self::default_frame_retries(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PrinterConfig {
    /// USB vendor id of the thermal printer (RONGTA ships as 0x0fe6).
    #[serde(default = "PrinterConfig::default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "PrinterConfig::default_product_id")]
    pub product_id: u16,
    /// Printable dots per raster line: 576 for 80mm paper, 384 for 58mm.
    #[serde(default = "PrinterConfig::default_dots_per_line")]
    pub dots_per_line: u32,
    /// Header printed above every photo.
    #[serde(default = "PrinterConfig::default_title")]
    pub title: String,
    #[serde(default = "PrinterConfig::default_footer")]
    pub footer: String,
}

impl PrinterConfig {
    fn default_vendor_id() -> u16 {
        0x0fe6
    }

    fn default_product_id() -> u16 {
        0x811e
    }

    fn default_dots_per_line() -> u32 {
        576
    }

    fn default_title() -> String {
        "PHOTOBOOTH".to_string()
    }

    fn default_footer() -> String {
        "Thanks for visiting!".to_string()
    }
}

impl Default for PrinterConfig {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            dots_per_line: Self::default_dots_per_line(),
            title: Self::default_title(),
            footer: Self::default_footer(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SessionConfig {
    /// Countdown before the first shot.
    #[serde(default = "SessionConfig::default_countdown", with = "humantime_serde")]
    pub countdown: Duration,
    /// Pause between shots of a strip. Subsequent shots skip the countdown.
    #[serde(default = "SessionConfig::default_strip_gap", with = "humantime_serde")]
    pub strip_gap: Duration,
    #[serde(default = "SessionConfig::default_strip_shots")]
    pub strip_shots: u32,
    /// How long a Success/Error result stays on screen before the booth
    /// returns to Idle on its own.
    #[serde(default = "SessionConfig::default_result_display", with = "humantime_serde")]
    pub result_display: Duration,
}

impl SessionConfig {
    fn default_countdown() -> Duration {
        Duration::from_secs(3)
    }

    fn default_strip_gap() -> Duration {
        Duration::from_secs(2)
    }

    fn default_strip_shots() -> u32 {
        3
    }

    fn default_result_display() -> Duration {
        Duration::from_secs(4)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            countdown: Self::default_countdown(),
            strip_gap: Self::default_strip_gap(),
            strip_shots: Self::default_strip_shots(),
            result_display: Self::default_result_display(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct StorageConfig {
    #[serde(default = "StorageConfig::default_photos_dir")]
    pub photos_dir: PathBuf,
}

impl StorageConfig {
    fn default_photos_dir() -> PathBuf {
        PathBuf::from("photos")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            photos_dir: Self::default_photos_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct JoystickConfig {
    #[serde(default = "JoystickConfig::default_enabled")]
    pub enabled: bool,
    /// Explicit input device path; when unset the watcher scans evdev
    /// devices for a joystick-looking name.
    #[serde(default)]
    pub device_path: Option<PathBuf>,
    /// Presses closer together than this are ignored.
    #[serde(default = "JoystickConfig::default_debounce", with = "humantime_serde")]
    pub debounce: Duration,
}

impl JoystickConfig {
    fn default_enabled() -> bool {
        true
    }

    fn default_debounce() -> Duration {
        Duration::from_secs(2)
    }
}

impl Default for JoystickConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            device_path: None,
            debounce: Self::default_debounce(),
        }
    }
}

/// Load and parse a YAML configuration file.
pub fn from_yaml_file(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))?;
    Ok(cfg)
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.session.strip_shots >= 2, "strip-shots must be at least 2");
        ensure!(
            self.printer.dots_per_line % 8 == 0 && self.printer.dots_per_line > 0,
            "dots-per-line must be a positive multiple of 8"
        );
        ensure!(self.camera.frame_timeout > Duration::ZERO, "frame-timeout must be non-zero");
        if let Some(password) = &self.auth.password {
            ensure!(!password.is_empty(), "auth password must not be empty when set");
        }
        Ok(())
    }
}
