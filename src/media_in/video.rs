//! Screen snapshots for the visual analyzer

use crate::analyzer::FrameSource;
use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tracing::{debug, info};
use xcap::Monitor;

const JPEG_QUALITY: u8 = 75;

/// Captures the primary monitor on demand
pub struct ScreenSnapshots {
    monitor_name: String,
}

impl ScreenSnapshots {
    /// Pick the primary monitor (or the first one).
    pub fn new() -> Result<Self> {
        let monitor = primary_monitor()?;
        let monitor_name = monitor.name().unwrap_or_else(|_| "Unknown".to_string());
        info!(
            "Screen snapshots from {} ({}x{})",
            monitor_name,
            monitor.width().unwrap_or(0),
            monitor.height().unwrap_or(0)
        );
        Ok(Self { monitor_name })
    }

    fn monitor(&self) -> Result<Monitor> {
        let monitors = Monitor::all().context("Failed to list monitors")?;
        monitors
            .iter()
            .find(|m| m.name().map(|n| n == self.monitor_name).unwrap_or(false))
            .cloned()
            .map_or_else(primary_monitor, Ok)
    }
}

impl FrameSource for ScreenSnapshots {
    fn snapshot(&mut self) -> Result<Vec<u8>> {
        let image = self
            .monitor()?
            .capture_image()
            .context("Screen capture failed")?;
        let (width, height) = (image.width(), image.height());

        // JPEG has no alpha channel
        let rgb = DynamicImage::ImageRgba8(image).into_rgb8();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
            .encode_image(&rgb)
            .context("JPEG encoding failed")?;

        debug!("Snapshot {}x{}: {} KB", width, height, jpeg.len() / 1024);
        Ok(jpeg)
    }
}

fn primary_monitor() -> Result<Monitor> {
    let monitors = Monitor::all().context("Failed to list monitors")?;
    monitors
        .iter()
        .find(|m| m.is_primary().unwrap_or(false))
        .or_else(|| monitors.first())
        .cloned()
        .ok_or_else(|| anyhow!("No monitors found"))
}
