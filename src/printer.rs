//! Thermal printer adapter.
//!
//! Encodes ESC/POS jobs and ships them over a USB bulk-OUT endpoint. The
//! device handle is opened lazily and cached; when a cached handle errors
//! the next job attempts exactly one reconnect before failing. Retrying a
//! whole print job is the caller's decision, never the adapter's.

use std::time::Duration;

use chrono::Local;
use image::GrayImage;
use rusb::{DeviceHandle, GlobalContext, TransferType};
use tracing::{info, warn};

use crate::config::PrinterConfig;
use crate::error::Error;

const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;

/// Rows per GS v 0 raster band; bounds the size of a single USB transfer.
const RASTER_BAND_ROWS: u32 = 256;

const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Print sink for composed rasters and receipt text. The production
/// implementation drives the USB printer; tests substitute fakes.
pub trait PrintDevice: Send {
    fn print_image(&mut self, raster: &GrayImage) -> Result<(), Error>;
    fn print_text(&mut self, lines: &[String]) -> Result<(), Error>;
}

/// ESC/POS printer over USB.
pub struct ThermalPrinter {
    cfg: PrinterConfig,
    transport: Option<UsbTransport>,
}

impl ThermalPrinter {
    pub fn new(cfg: PrinterConfig) -> Self {
        Self {
            cfg,
            transport: None,
        }
    }

    /// Send one job, reconnecting once if the cached handle has gone stale.
    fn send(&mut self, job: &[u8]) -> Result<(), Error> {
        if let Some(transport) = self.transport.as_mut() {
            match transport.write_all(job) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    warn!(error = %err, "cached printer handle failed; reconnecting");
                    self.transport = None;
                }
            }
        }

        let mut transport = UsbTransport::open(&self.cfg)?;
        transport.write_all(job)?;
        self.transport = Some(transport);
        Ok(())
    }

    fn header(&self, job: &mut Vec<u8>) {
        job.extend_from_slice(&[ESC, b'@']); // initialize
        job.extend_from_slice(&[ESC, b'a', 1]); // center
        job.extend_from_slice(&[GS, b'!', 0x11]); // double width + height
        job.push(b'\n');
        job.extend_from_slice(self.cfg.title.as_bytes());
        job.push(b'\n');
        job.extend_from_slice(&[GS, b'!', 0x00]);
        job.extend_from_slice(Local::now().format("%Y-%m-%d %H:%M:%S").to_string().as_bytes());
        job.push(b'\n');
        job.extend_from_slice("=".repeat(24).as_bytes());
        job.extend_from_slice(b"\n\n");
    }

    fn footer(&self, job: &mut Vec<u8>) {
        job.push(b'\n');
        job.extend_from_slice("-".repeat(24).as_bytes());
        job.push(b'\n');
        job.extend_from_slice(&[ESC, b'a', 1]);
        job.extend_from_slice(self.cfg.footer.as_bytes());
        job.extend_from_slice(b"\n\n\n");
        job.extend_from_slice(&[GS, b'V', 66, 0]); // feed and partial cut
    }
}

impl PrintDevice for ThermalPrinter {
    fn print_image(&mut self, raster: &GrayImage) -> Result<(), Error> {
        let mut job = Vec::with_capacity(raster.as_raw().len() / 8 + 256);
        self.header(&mut job);
        job.extend_from_slice(&[ESC, b'a', 1]);
        encode_raster(raster, &mut job);
        self.footer(&mut job);
        info!(
            width = raster.width(),
            height = raster.height(),
            bytes = job.len(),
            "printing raster"
        );
        self.send(&job)
    }

    fn print_text(&mut self, lines: &[String]) -> Result<(), Error> {
        let mut job = Vec::new();
        self.header(&mut job);
        job.extend_from_slice(&[ESC, b'a', 0]); // left align body
        for line in lines {
            job.extend_from_slice(line.as_bytes());
            job.push(b'\n');
        }
        self.footer(&mut job);
        self.send(&job)
    }
}

/// Append GS v 0 raster commands for a bi-level image, split into bands.
/// 1-bits print black; rows are packed MSB-first and padded with white.
pub(crate) fn encode_raster(raster: &GrayImage, out: &mut Vec<u8>) {
    let width = raster.width();
    let bytes_per_row = width.div_ceil(8);

    let mut row = 0u32;
    while row < raster.height() {
        let band_rows = RASTER_BAND_ROWS.min(raster.height() - row);
        out.extend_from_slice(&[
            GS,
            b'v',
            b'0',
            0x00,
            (bytes_per_row & 0xff) as u8,
            (bytes_per_row >> 8) as u8,
            (band_rows & 0xff) as u8,
            (band_rows >> 8) as u8,
        ]);
        for y in row..row + band_rows {
            for byte_idx in 0..bytes_per_row {
                let mut packed = 0u8;
                for bit in 0..8 {
                    let x = byte_idx * 8 + bit;
                    if x < width && raster.get_pixel(x, y).0[0] < 128 {
                        packed |= 0x80 >> bit;
                    }
                }
                out.push(packed);
            }
        }
        row += band_rows;
    }
}

/// Claimed USB handle plus the bulk-OUT endpoint jobs are written to.
struct UsbTransport {
    handle: DeviceHandle<GlobalContext>,
    endpoint: u8,
    interface: u8,
}

impl UsbTransport {
    fn open(cfg: &PrinterConfig) -> Result<Self, Error> {
        let handle = rusb::open_device_with_vid_pid(cfg.vendor_id, cfg.product_id).ok_or_else(
            || {
                Error::PrinterUnavailable(format!(
                    "no USB device {:04x}:{:04x}",
                    cfg.vendor_id, cfg.product_id
                ))
            },
        )?;

        let (interface, endpoint) = find_bulk_out(&handle).ok_or_else(|| {
            Error::PrinterUnavailable("printer has no bulk-OUT endpoint".to_string())
        })?;

        // Linux attaches usblp to ESC/POS printers; detach it for raw access.
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle
            .claim_interface(interface)
            .map_err(|err| map_usb_error("claim interface", err))?;
        info!(
            vendor = format_args!("{:04x}", cfg.vendor_id),
            product = format_args!("{:04x}", cfg.product_id),
            endpoint,
            "printer connected"
        );
        Ok(Self {
            handle,
            endpoint,
            interface,
        })
    }

    fn write_all(&mut self, mut data: &[u8]) -> Result<(), Error> {
        while !data.is_empty() {
            let written = self
                .handle
                .write_bulk(self.endpoint, data, WRITE_TIMEOUT)
                .map_err(|err| map_usb_error("bulk write", err))?;
            if written == 0 {
                return Err(Error::PrinterUnavailable("bulk write stalled".to_string()));
            }
            data = &data[written..];
        }
        Ok(())
    }
}

impl Drop for UsbTransport {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(self.interface);
    }
}

fn find_bulk_out(handle: &DeviceHandle<GlobalContext>) -> Option<(u8, u8)> {
    let config = handle.device().active_config_descriptor().ok()?;
    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.transfer_type() == TransferType::Bulk
                    && endpoint.direction() == rusb::Direction::Out
                {
                    return Some((descriptor.interface_number(), endpoint.address()));
                }
            }
        }
    }
    None
}

/// A write timeout means the head has stalled (usually out of paper or a
/// jam); everything else reads as the printer being gone.
fn map_usb_error(action: &str, err: rusb::Error) -> Error {
    match err {
        rusb::Error::Timeout => Error::PrinterJammed(format!("{action}: {err}")),
        _ => Error::PrinterUnavailable(format!("{action}: {err}")),
    }
}
