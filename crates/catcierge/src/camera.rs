//! Frame acquisition.
//!
//! The camera driver is deliberately thin: a source produces one
//! greyscale frame at a time at a fixed resolution. Two variants exist,
//! a still-image directory (replay and testing) and, behind the `v4l`
//! feature, a live V4L2 capture device.

use anyhow::{bail, Context, Result};
use image::GrayImage;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::info;

pub const DEFAULT_FRAME_WIDTH: u32 = 320;
pub const DEFAULT_FRAME_HEIGHT: u32 = 240;

pub enum FrameSource {
    Stills(StillsSource),
    #[cfg(feature = "v4l")]
    Camera(V4lSource),
}

impl FrameSource {
    /// Open a source. A directory becomes a stills replay source, any
    /// other path a capture device.
    pub fn open(spec: &Path, width: u32, height: u32) -> Result<Self> {
        if spec.is_dir() {
            return Ok(FrameSource::Stills(StillsSource::open(
                spec, width, height,
            )?));
        }

        #[cfg(feature = "v4l")]
        {
            return Ok(FrameSource::Camera(V4lSource::open(spec, width, height)?));
        }

        #[cfg(not(feature = "v4l"))]
        bail!(
            "{} is not a directory of still frames; live capture requires the v4l feature",
            spec.display()
        );
    }

    /// Blocking: returns the next frame.
    pub fn acquire(&mut self) -> Result<GrayImage> {
        match self {
            FrameSource::Stills(s) => s.acquire(),
            #[cfg(feature = "v4l")]
            FrameSource::Camera(c) => c.acquire(),
        }
    }
}

/// Replays the images of a directory in name order, looping, at roughly
/// camera rate.
pub struct StillsSource {
    files: Vec<PathBuf>,
    next: usize,
    width: u32,
    height: u32,
    frame_interval: Duration,
    last_frame: Option<Instant>,
}

impl StillsSource {
    pub fn open(dir: &Path, width: u32, height: u32) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read frame directory {}", dir.display()))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("png") | Some("jpg") | Some("jpeg") | Some("bmp")
                )
            })
            .collect();
        files.sort();

        if files.is_empty() {
            bail!("no frames found in {}", dir.display());
        }

        info!(count = files.len(), dir = %dir.display(), "opened stills frame source");

        Ok(Self {
            files,
            next: 0,
            width,
            height,
            frame_interval: Duration::from_millis(33),
            last_frame: None,
        })
    }

    /// Replay as fast as the caller asks, for tests.
    pub fn set_frame_interval(&mut self, interval: Duration) {
        self.frame_interval = interval;
    }

    fn acquire(&mut self) -> Result<GrayImage> {
        // Pace the replay like a camera would.
        if let Some(last) = self.last_frame {
            let elapsed = last.elapsed();
            if elapsed < self.frame_interval {
                std::thread::sleep(self.frame_interval - elapsed);
            }
        }
        self.last_frame = Some(Instant::now());

        let path = &self.files[self.next];
        self.next = (self.next + 1) % self.files.len();

        let img = image::open(path)
            .with_context(|| format!("failed to load frame {}", path.display()))?
            .into_luma8();

        if img.width() != self.width || img.height() != self.height {
            return Ok(image::imageops::resize(
                &img,
                self.width,
                self.height,
                image::imageops::FilterType::Triangle,
            ));
        }

        Ok(img)
    }
}

/// Live V4L2 capture, greyscale via the luma plane.
#[cfg(feature = "v4l")]
pub struct V4lSource {
    stream: v4l::prelude::MmapStream<'static>,
    width: u32,
    height: u32,
}

#[cfg(feature = "v4l")]
impl V4lSource {
    pub fn open(device: &Path, width: u32, height: u32) -> Result<Self> {
        use v4l::video::Capture;

        let dev = v4l::Device::with_path(device)
            .with_context(|| format!("failed to open camera {}", device.display()))?;

        let mut fmt = dev.format().context("failed to read camera format")?;
        fmt.width = width;
        fmt.height = height;
        fmt.fourcc = v4l::FourCC::new(b"YUYV");
        let fmt = dev.set_format(&fmt).context("failed to set camera format")?;

        let stream = v4l::prelude::MmapStream::with_buffers(&dev, v4l::buffer::Type::VideoCapture, 4)
            .context("failed to start camera stream")?;

        info!(device = %device.display(), width = fmt.width, height = fmt.height, "opened camera");

        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
        })
    }

    fn acquire(&mut self) -> Result<GrayImage> {
        use v4l::io::traits::CaptureStream;

        let (buf, _meta) = self.stream.next().context("failed to capture frame")?;

        // YUYV: every other byte is luma.
        let luma: Vec<u8> = buf.iter().step_by(2).copied().collect();

        GrayImage::from_raw(self.width, self.height, luma)
            .context("camera returned a short frame")
    }
}
