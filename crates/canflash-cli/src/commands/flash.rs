//! Upload and start commands

use std::path::Path;

use anyhow::{Context, Result};
use canflash::{ProgressSink, ProgressUpdate, T8Client};
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use crate::output::OutputContext;

/// Drives an indicatif bar from upload progress
struct BarSink {
    bar: ProgressBar,
}

impl ProgressSink for BarSink {
    fn update(&mut self, update: ProgressUpdate) {
        match update {
            ProgressUpdate::Total(chunks) => self.bar.set_length(chunks as u64),
            ProgressUpdate::Chunk(done) => self.bar.set_position(done as u64),
            ProgressUpdate::Message(msg) => self.bar.set_message(msg),
        }
    }
}

/// Upload a bootloader image, optionally starting it
pub async fn upload(
    t8: &T8Client,
    cancel: &CancellationToken,
    file_path: &Path,
    start: bool,
    ctx: &OutputContext,
) -> Result<()> {
    ctx.info(&format!("Reading image from {}...", file_path.display()));
    let image = std::fs::read(file_path)
        .with_context(|| format!("Failed to read image file: {}", file_path.display()))?;
    ctx.info(&format!("Image size: {} bytes", image.len()));

    let bar = if ctx.quiet {
        ProgressBar::hidden()
    } else {
        ProgressBar::new(0)
    };
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} chunks {msg}")?
            .progress_chars("=>-"),
    );
    let mut sink = BarSink { bar: bar.clone() };

    let result = if start {
        t8.upload_and_start(cancel, &image, &mut sink).await
    } else {
        t8.upload_bootloader(cancel, &image, &mut sink).await
    };

    let report = match result {
        Ok(report) => {
            bar.finish();
            report
        }
        Err(e) => {
            bar.abandon();
            return Err(e).context("Bootloader upload failed");
        }
    };

    ctx.success(&format!(
        "Uploaded {} chunks ({} bytes) in {:.2?}, end address 0x{:06X}",
        report.chunks, report.bytes_sent, report.elapsed, report.end_address
    ));
    if start {
        ctx.success("Bootloader started");
    }
    Ok(())
}

/// Jump into an uploaded bootloader
pub async fn start(
    t8: &T8Client,
    cancel: &CancellationToken,
    address: Option<u32>,
    ctx: &OutputContext,
) -> Result<()> {
    let address = address.unwrap_or(t8.config().start_address);
    t8.start_bootloader(cancel, address)
        .await
        .context("Failed to start bootloader")?;
    ctx.success(&format!("Bootloader started at 0x{:06X}", address));
    Ok(())
}
