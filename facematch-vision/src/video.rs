use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

const RGB3: &[u8; 4] = b"RGB3";
const YUYV: &[u8; 4] = b"YUYV";
const GREY: &[u8; 4] = b"GREY";
const MJPG: &[u8; 4] = b"MJPG";

/// A V4L2 capture device streaming through mmap buffers.
pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str) -> Result<Self> {
        let dev = Device::with_path(device).with_context(|| format!("open camera {}", device))?;
        let current = dev.format().context("get format")?;

        // RGB3 needs no conversion; otherwise settle for the first format the driver takes
        let mut fmt = current.clone();
        for wanted in [RGB3, YUYV, MJPG] {
            let desired = Format::new(current.width, current.height, FourCC::new(wanted));
            if let Ok(set) = dev.set_format(&desired) {
                if set.fourcc == FourCC::new(wanted) {
                    fmt = set;
                    break;
                }
            }
        }
        log::debug!(
            "camera {}: {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );

        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Keep pulling frames until `delay` has passed. A frame arriving proves
    /// the device is streaming; the sensor's auto exposure settles meanwhile.
    /// Returns the number of frames discarded.
    pub fn warm_up(&mut self, delay: Duration) -> Result<usize> {
        let start = Instant::now();
        let mut discarded = 0;
        while start.elapsed() < delay {
            self.stream.next().context("warm-up frame")?;
            discarded += 1;
        }
        log::debug!(
            "camera warm-up: {} frame(s) in {:.2}s",
            discarded,
            start.elapsed().as_secs_f32()
        );
        Ok(discarded)
    }

    pub fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::debug!(
            "captured frame: seq={} len={} fourcc={:?}",
            meta.sequence,
            data.len(),
            self.fourcc
        );
        let rgb = to_rgb(self.fourcc, self.width, self.height, data)?;
        if rgb.dimensions() != (self.width, self.height) {
            log::warn!(
                "frame is {:?}, device reported {}x{}",
                rgb.dimensions(),
                self.width,
                self.height
            );
        }
        Ok(rgb)
    }
}

/// Convert one raw frame into packed RGB.
pub fn to_rgb(fourcc: FourCC, width: u32, height: u32, data: &[u8]) -> Result<RgbImage> {
    let pixels = (width * height) as usize;
    let buf = if fourcc == FourCC::new(RGB3) {
        if data.len() < pixels * 3 {
            bail!("short RGB3 buffer: {} < {}", data.len(), pixels * 3);
        }
        data[..pixels * 3].to_vec()
    } else if fourcc == FourCC::new(YUYV) {
        yuyv_to_rgb(pixels, data)?
    } else if fourcc == FourCC::new(GREY) {
        if data.len() < pixels {
            bail!("short GREY buffer: {} < {}", data.len(), pixels);
        }
        data[..pixels].iter().flat_map(|&y| [y, y, y]).collect()
    } else if fourcc == FourCC::new(MJPG) {
        return image::load_from_memory_with_format(data, image::ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
            .context("decode MJPG frame");
    } else {
        bail!("unsupported pixel format {:?}", fourcc);
    };
    RgbImage::from_raw(width, height, buf).ok_or_else(|| anyhow!("failed to build image buffer"))
}

fn yuyv_to_rgb(pixels: usize, data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < pixels * 2 {
        bail!("short YUYV buffer: {} < {}", data.len(), pixels * 2);
    }
    let mut out = Vec::with_capacity(pixels * 3);
    for quad in data[..pixels * 2].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0] as f32, quad[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}
