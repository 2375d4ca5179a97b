//! Optional plant camera: periodic stills inside a daily time window, plus an
//! animated timelapse rebuilt from every capture.
//!
//! The camera never influences watering. Every failure is logged and the
//! scheduler carries on.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};
use time::format_description::FormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, Time, UtcOffset};
use tokio::process::Command;
use tracing::{debug, error, info};

use crate::config::{CameraSection, CaptureWindow, CropRect};

const FILE_STAMP: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day]_[hour]-[minute]-[second]");

/// Per-frame delay in the timelapse.
const FRAME_DELAY_MS: u32 = 100;

pub struct Camera {
    folder: PathBuf,
    command: String,
    crop: Option<CropRect>,
    window: Option<CaptureWindow>,
    timelapse: Option<PathBuf>,
    offset: UtcOffset,
}

impl Camera {
    /// Build the camera from its config section, creating the capture folder.
    /// `offset` is the local UTC offset used for the window and file names.
    pub fn from_config(section: &CameraSection, offset: UtcOffset) -> Result<Self> {
        std::fs::create_dir_all(&section.folder).with_context(|| {
            format!("failed to create capture folder: {}", section.folder.display())
        })?;
        Ok(Self {
            folder: section.folder.clone(),
            command: section.command.clone(),
            crop: section.crop,
            window: section.window,
            timelapse: section
                .timelapse
                .then(|| section.folder.join(&section.timelapse_file)),
            offset,
        })
    }

    /// One camera job tick.
    pub async fn tick(&self) {
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        if let Some(window) = &self.window {
            if !in_window(now.time(), window) {
                debug!(
                    time = %now.time(),
                    start = %window.start,
                    end = %window.end,
                    "outside capture window, skipping"
                );
                return;
            }
        }

        match self.capture(now).await {
            Ok(path) => info!(path = %path.display(), "captured image"),
            Err(e) => {
                error!("camera capture failed: {e:#}");
                return;
            }
        }

        if let Some(out) = &self.timelapse {
            let folder = self.folder.clone();
            let out = out.clone();
            match tokio::task::spawn_blocking(move || build_timelapse(&folder, &out)).await {
                Ok(Ok(frames)) => info!(frames, "timelapse updated"),
                Ok(Err(e)) => error!("timelapse build failed: {e:#}"),
                Err(e) => error!("timelapse task panicked: {e}"),
            }
        }
    }

    async fn capture(&self, now: OffsetDateTime) -> Result<PathBuf> {
        let stamp = now.format(FILE_STAMP).context("failed to format capture time")?;
        let path = self.folder.join(format!("{stamp}.png"));

        let status = Command::new(&self.command)
            .args(capture_args(&path, self.crop))
            .status()
            .await
            .with_context(|| format!("failed to run {}", self.command))?;
        if !status.success() {
            bail!("{} exited with {status}", self.command);
        }
        Ok(path)
    }
}

/// Inclusive on both ends.
pub fn in_window(now: Time, window: &CaptureWindow) -> bool {
    window.start <= now && now <= window.end
}

/// Command-line arguments for a single PNG still written to `path`.
pub fn capture_args(path: &Path, crop: Option<CropRect>) -> Vec<String> {
    let mut args = vec![
        "-n".to_string(),
        "-e".to_string(),
        "png".to_string(),
        "-o".to_string(),
        path.display().to_string(),
    ];
    if let Some(c) = crop {
        args.push("--roi".to_string());
        args.push(format!("{},{},{},{}", c.x, c.y, c.width, c.height));
    }
    args
}

/// Encode every PNG in `folder`, in file-name order, into a looping GIF at
/// `out`. Returns the number of frames; with no captures nothing is written.
pub fn build_timelapse(folder: &Path, out: &Path) -> Result<usize> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(folder)
        .with_context(|| format!("failed to list {}", folder.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
        .collect();
    frames.sort();

    if frames.is_empty() {
        return Ok(0);
    }

    let file = File::create(out).with_context(|| format!("failed to create {}", out.display()))?;
    let mut encoder = GifEncoder::new(BufWriter::new(file));
    encoder.set_repeat(Repeat::Infinite)?;
    for path in &frames {
        let image = image::open(path)
            .with_context(|| format!("failed to read frame {}", path.display()))?
            .to_rgba8();
        encoder.encode_frame(Frame::from_parts(
            image,
            0,
            0,
            Delay::from_numer_denom_ms(FRAME_DELAY_MS, 1),
        ))?;
    }
    Ok(frames.len())
}
