//! Physical trigger: an arcade joystick's K1/K2 buttons, read via evdev.
//!
//! The watcher is just another caller of the session controller's `start`
//! entry point, so the at-most-one-session rule holds no matter whether a
//! press races an HTTP trigger. Device loss is survivable: the task keeps
//! retrying with capped backoff and the booth stays usable from the web.

use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use evdev::{Device, EventStream, EventSummary, KeyCode};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::JoystickConfig;
use crate::error::Error;
use crate::session::SessionController;

const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// DragonRise-style sticks expose K1/K2 as the first two gamepad buttons.
const SINGLE_KEY: KeyCode = KeyCode::BTN_TRIGGER;
const STRIP_KEY: KeyCode = KeyCode::BTN_THUMB;

pub async fn run(
    cfg: JoystickConfig,
    controller: SessionController,
    cancel: CancellationToken,
) -> Result<()> {
    if !cfg.enabled {
        info!("joystick watcher disabled via configuration");
        return Ok(());
    }

    loop {
        let open_fut = open_joystick(&cfg);
        tokio::pin!(open_fut);
        let device = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            device = &mut open_fut => device.context("open joystick input device")?,
        };

        let stream = device
            .into_event_stream()
            .context("joystick event stream")?;
        match watch_buttons(stream, &cfg, &controller, &cancel).await {
            Ok(()) => return Ok(()), // cancelled
            Err(err) => {
                warn!(error = ?err, "joystick stream failed; reconnecting");
                time::sleep(INITIAL_RETRY_DELAY).await;
            }
        }
    }
}

async fn watch_buttons(
    mut stream: EventStream,
    cfg: &JoystickConfig,
    controller: &SessionController,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut last_press: Option<Instant> = None;

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => {
                info!("joystick watcher shutting down");
                return Ok(());
            }
            event = stream.next_event() => event.context("read joystick event")?,
        };

        let (key, value) = match event.destructure() {
            EventSummary::Key(_, code, value) => (code, value),
            _ => continue,
        };
        if value != 1 || (key != SINGLE_KEY && key != STRIP_KEY) {
            continue;
        }

        let now = Instant::now();
        if let Some(last) = last_press {
            if now.duration_since(last) < cfg.debounce {
                debug!(?key, "press ignored inside debounce window");
                continue;
            }
        }
        last_press = Some(now);

        let result = if key == SINGLE_KEY {
            info!("K1 pressed: single photo");
            controller.start_single()
        } else {
            info!("K2 pressed: photo strip");
            controller.start_strip()
        };
        match result {
            Ok(generation) => debug!(generation, "joystick started session"),
            Err(Error::Busy) => debug!("joystick press rejected: session in progress"),
            Err(err) => warn!(error = %err, "joystick failed to start session"),
        }
    }
}

async fn open_joystick(cfg: &JoystickConfig) -> Result<Device> {
    let mut delay = INITIAL_RETRY_DELAY;
    loop {
        match try_open_device(cfg) {
            Ok(device) => return Ok(device),
            Err(err) => {
                warn!(
                    "joystick unavailable: {err:?}; retrying in {}s",
                    delay.as_secs()
                );
                time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RETRY_DELAY);
            }
        }
    }
}

fn try_open_device(cfg: &JoystickConfig) -> Result<Device> {
    if let Some(path) = cfg.device_path.as_ref() {
        return Device::open(path).with_context(|| format!("open {}", path.display()));
    }

    for (path, device) in evdev::enumerate() {
        if device_matches(&device) {
            info!("using joystick device {}", path.display());
            return Device::open(&path).with_context(|| format!("open {}", path.display()));
        }
    }

    Err(anyhow!("no compatible joystick input device found"))
}

fn device_matches(device: &Device) -> bool {
    let name = device.name().unwrap_or("").to_ascii_lowercase();
    if !name_matches(&name) {
        return false;
    }
    device
        .supported_keys()
        .map(|keys| keys.contains(SINGLE_KEY))
        .unwrap_or(false)
}

fn name_matches(name: &str) -> bool {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return false;
    }
    trimmed.contains("joystick") || trimmed.contains("gamepad") || trimmed.contains("dragonrise")
}

#[cfg(test)]
mod tests {
    use super::name_matches;

    #[test]
    fn device_name_matching() {
        assert!(name_matches("DragonRise Inc. Generic USB Joystick"
            .to_ascii_lowercase()
            .as_str()));
        assert!(name_matches("usb gamepad"));
        assert!(!name_matches("AT Translated Set 2 keyboard"));
        assert!(!name_matches("   "));
    }
}
