use crate::yunet;
use anyhow::{bail, Result};
use image::{imageops::FilterType, DynamicImage, GenericImageView, Rgb, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::Value};

/// YuNet input side, in pixels.
pub const DETECTOR_INPUT: u32 = 640;
/// SFace input side, in pixels.
pub const ENCODER_INPUT: u32 = 112;

/// ArcFace reference eye positions in a 112x112 crop.
const REF_LEFT_EYE: (f32, f32) = (38.3, 51.7);
const REF_RIGHT_EYE: (f32, f32) = (73.5, 51.5);

/// Detection result from YuNet, in source image pixels.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // right eye, left eye, nose, mouth corners
}

/// L2-normalized face embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
}

impl Embedding {
    pub fn dim(&self) -> usize {
        self.vector.len()
    }
}

/// Aspect-preserving fit of an image into a square canvas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, side: u32) -> Self {
        let scale = side as f32 / width.max(height) as f32;
        let fitted_w = (width as f32 * scale) as u32;
        let fitted_h = (height as f32 * scale) as u32;
        Self {
            scale,
            offset_x: ((side - fitted_w) / 2) as f32,
            offset_y: ((side - fitted_h) / 2) as f32,
        }
    }

    /// Paint `img` centered on a black `side`x`side` canvas.
    pub fn apply(&self, img: &DynamicImage, side: u32) -> RgbImage {
        let (w, h) = img.dimensions();
        let fitted = img
            .resize_exact(
                (w as f32 * self.scale) as u32,
                (h as f32 * self.scale) as u32,
                FilterType::Triangle,
            )
            .to_rgb8();
        let mut canvas = RgbImage::new(side, side);
        image::imageops::overlay(
            &mut canvas,
            &fitted,
            self.offset_x as i64,
            self.offset_y as i64,
        );
        canvas
    }

    /// Map a canvas pixel coordinate back into the source image.
    pub fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.offset_x) / self.scale,
            (y - self.offset_y) / self.scale,
        )
    }
}

/// Pack an RGB image as a `[1, 3, H, W]` BGR tensor with values in [0, 255].
pub fn bgr_planar(img: &RgbImage) -> Array4<f32> {
    let (w, h) = img.dimensions();
    Array4::from_shape_fn((1, 3, h as usize, w as usize), |(_, c, y, x)| {
        img.get_pixel(x as u32, y as u32)[2 - c] as f32
    })
}

/// Detect faces with YuNet. With `nms_threshold < 1.0` overlapping boxes are
/// suppressed and the result comes back highest score first.
pub fn detect_faces(
    session: &mut Session,
    img: &DynamicImage,
    score_threshold: f32,
    nms_threshold: f32,
) -> Result<Vec<Detection>> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        bail!("empty image");
    }
    let side = DETECTOR_INPUT;
    let letterbox = Letterbox::new(width, height, side);
    let canvas = letterbox.apply(img, side);

    let input_tensor = Value::from_array(bgr_planar(&canvas))?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let mut owned: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        owned.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let borrowed: Vec<(&[i64], &[f32])> = owned
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let heads = yunet::split_outputs(&borrowed, side as usize)?;
    let raw = yunet::decode(&heads, score_threshold, side as usize);
    log::debug!("yunet: {} candidate(s) above {}", raw.len(), score_threshold);

    let px = side as f32;
    let mut detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let (x, y) = letterbox.unmap(d.bbox[0] * px, d.bbox[1] * px);
            let mut landmarks = [0.0f32; 10];
            for (dst, src) in landmarks
                .chunks_exact_mut(2)
                .zip(d.landmarks.chunks_exact(2))
            {
                let (lx, ly) = letterbox.unmap(src[0] * px, src[1] * px);
                dst[0] = lx;
                dst[1] = ly;
            }
            Detection {
                bbox: [
                    x,
                    y,
                    d.bbox[2] * px / letterbox.scale,
                    d.bbox[3] * px / letterbox.scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if nms_threshold < 1.0 {
        detections = nms(&detections, nms_threshold);
    }

    Ok(detections)
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|kept| compute_iou(&kept.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Similarity transform `out = [a b; -b a] * in + t`.
#[derive(Debug, Clone, Copy)]
struct Similarity {
    a: f32,
    b: f32,
    tx: f32,
    ty: f32,
}

impl Similarity {
    /// Rotation and scale that bring the detected eyes onto the reference
    /// eye line of a `size`x`size` crop.
    fn from_eyes(left: (f32, f32), right: (f32, f32), size: u32) -> Self {
        let k = size as f32 / ENCODER_INPUT as f32;
        let (dx, dy) = (right.0 - left.0, right.1 - left.1);
        let ref_dist =
            ((REF_RIGHT_EYE.0 - REF_LEFT_EYE.0).powi(2) + (REF_RIGHT_EYE.1 - REF_LEFT_EYE.1).powi(2))
                .sqrt();
        let scale = k * ref_dist / (dx * dx + dy * dy).sqrt().max(f32::EPSILON);
        let angle = dy.atan2(dx);
        let a = scale * angle.cos();
        let b = scale * angle.sin();

        let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
        let target = (
            k * (REF_LEFT_EYE.0 + REF_RIGHT_EYE.0) / 2.0,
            k * (REF_LEFT_EYE.1 + REF_RIGHT_EYE.1) / 2.0,
        );
        Self {
            a,
            b,
            tx: target.0 - (a * center.0 + b * center.1),
            ty: target.1 - (-b * center.0 + a * center.1),
        }
    }

    fn invert(&self, x: f32, y: f32) -> (f32, f32) {
        let (u, v) = (x - self.tx, y - self.ty);
        let det = self.a * self.a + self.b * self.b;
        ((self.a * u - self.b * v) / det, (self.b * u + self.a * v) / det)
    }
}

fn bilinear(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if x < 0.0 || y < 0.0 || x >= w as f32 || y >= h as f32 {
        return None;
    }
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (fx, fy) = (x - x0 as f32, y - y0 as f32);

    let taps = [
        (img.get_pixel(x0, y0), (1.0 - fx) * (1.0 - fy)),
        (img.get_pixel(x1, y0), fx * (1.0 - fy)),
        (img.get_pixel(x0, y1), (1.0 - fx) * fy),
        (img.get_pixel(x1, y1), fx * fy),
    ];
    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let v: f32 = taps.iter().map(|(p, w)| p[c] as f32 * w).sum();
        *slot = v.round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Warp the face so its eyes land on the reference positions of a square
/// `size` crop. Pixels outside the source stay black.
pub fn align_face(img: &DynamicImage, detection: &Detection, size: u32) -> Result<DynamicImage> {
    let lm = &detection.landmarks;
    // YuNet reports the subject's right eye first, which is the left one in the image
    let (first, second) = ((lm[0], lm[1]), (lm[2], lm[3]));
    let (left, right) = if first.0 <= second.0 {
        (first, second)
    } else {
        (second, first)
    };
    let transform = Similarity::from_eyes(left, right, size);

    let src = img.to_rgb8();
    let mut output = RgbImage::new(size, size);
    for (x, y, pixel) in output.enumerate_pixels_mut() {
        let (sx, sy) = transform.invert(x as f32, y as f32);
        if let Some(p) = bilinear(&src, sx, sy) {
            *pixel = p;
        }
    }

    Ok(DynamicImage::ImageRgb8(output))
}

/// Run SFace on a face crop and L2-normalize the result.
pub fn encode_face(session: &mut Session, face_img: &DynamicImage) -> Result<Embedding> {
    let face = face_img
        .resize_exact(ENCODER_INPUT, ENCODER_INPUT, FilterType::Triangle)
        .to_rgb8();

    let input_tensor = Value::from_array(bgr_planar(&face))?;
    let outputs = session.run(ort::inputs![input_tensor])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let dim = match shape.len() {
        2 => shape[1] as usize,
        _ => data.len(),
    };
    if dim == 0 || dim > data.len() {
        bail!("encoder produced an empty embedding (shape {:?})", shape);
    }

    Ok(Embedding {
        vector: l2_normalize(&data[..dim]),
    })
}

pub fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
