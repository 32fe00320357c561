//! YuNet detector post-processing.
//!
//! The 2023mar export produces twelve tensors, four heads for each of the
//! strides 8, 16 and 32, in this order:
//!
//! `cls_8, cls_16, cls_32, obj_8, obj_16, obj_32, bbox_8, bbox_16, bbox_32, kps_8, kps_16, kps_32`
//!
//! Every head is laid out as `[1, H*W, C]` over a square grid of
//! `input_size / stride` cells. Decoding is anchor free:
//!
//! ```text
//! score = sqrt(clamp(cls) * clamp(obj))
//! cx    = (col + dx) * stride        w = exp(dw) * stride
//! cy    = (row + dy) * stride        h = exp(dh) * stride
//! kp_n  = ((col + kx_n) * stride, (row + ky_n) * stride)
//! ```
//!
//! Coordinates returned here are normalized to `[0, 1]` of the square input.

use anyhow::{bail, Result};

pub const STRIDES: [usize; 3] = [8, 16, 32];

const OUTPUT_COUNT: usize = STRIDES.len() * 4;

#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h (normalized [0,1])
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,...,x5,y5 (normalized [0,1])
}

/// The four heads of a single stride, borrowed from the session outputs.
#[derive(Debug, Clone, Copy)]
pub struct StrideHeads<'a> {
    pub stride: usize,
    pub cls: &'a [f32],
    pub obj: &'a [f32],
    pub bbox: &'a [f32],
    pub kps: &'a [f32],
}

impl StrideHeads<'_> {
    fn cells(&self) -> usize {
        self.cls.len()
    }
}

fn head<'a>(
    outputs: &[(&'a [i64], &'a [f32])],
    index: usize,
    cells: usize,
    channels: usize,
) -> Result<&'a [f32]> {
    let Some(&(shape, data)) = outputs.get(index) else {
        bail!("missing YuNet output {}", index);
    };
    let expected = [1, cells as i64, channels as i64];
    if shape != expected {
        bail!(
            "YuNet output {} has shape {:?}, expected {:?}",
            index,
            shape,
            expected
        );
    }
    if data.len() != cells * channels {
        bail!(
            "YuNet output {} holds {} values, expected {}",
            index,
            data.len(),
            cells * channels
        );
    }
    Ok(data)
}

/// Group raw `(shape, data)` outputs by stride, validating every shape
/// against the grid implied by `input_size`.
pub fn split_outputs<'a>(
    outputs: &[(&'a [i64], &'a [f32])],
    input_size: usize,
) -> Result<Vec<StrideHeads<'a>>> {
    if outputs.len() != OUTPUT_COUNT {
        bail!(
            "YuNet produced {} outputs, expected {}",
            outputs.len(),
            OUTPUT_COUNT
        );
    }

    STRIDES
        .iter()
        .enumerate()
        .map(|(k, &stride)| {
            let side = input_size / stride;
            let cells = side * side;
            Ok(StrideHeads {
                stride,
                cls: head(outputs, k, cells, 1)?,
                obj: head(outputs, k + 3, cells, 1)?,
                bbox: head(outputs, k + 6, cells, 4)?,
                kps: head(outputs, k + 9, cells, 10)?,
            })
        })
        .collect()
}

/// Combined face score for one grid cell.
pub fn cell_score(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

/// Decode every cell scoring at least `score_threshold`.
pub fn decode(
    heads: &[StrideHeads<'_>],
    score_threshold: f32,
    input_size: usize,
) -> Vec<RawDetection> {
    let norm = input_size as f32;
    let mut detections = Vec::new();

    for heads in heads {
        let side = input_size / heads.stride;
        let stride = heads.stride as f32;

        for idx in 0..heads.cells() {
            let score = cell_score(heads.cls[idx], heads.obj[idx]);
            if score < score_threshold {
                continue;
            }

            let row = (idx / side) as f32;
            let col = (idx % side) as f32;
            let b = &heads.bbox[idx * 4..idx * 4 + 4];

            let cx = (col + b[0]) * stride;
            let cy = (row + b[1]) * stride;
            let w = b[2].exp() * stride;
            let h = b[3].exp() * stride;

            let k = &heads.kps[idx * 10..idx * 10 + 10];
            let mut landmarks = [0.0f32; 10];
            for (n, point) in landmarks.chunks_exact_mut(2).enumerate() {
                point[0] = (col + k[n * 2]) * stride / norm;
                point[1] = (row + k[n * 2 + 1]) * stride / norm;
            }

            detections.push(RawDetection {
                bbox: [
                    (cx - w / 2.0) / norm,
                    (cy - h / 2.0) / norm,
                    w / norm,
                    h / norm,
                ],
                score,
                landmarks,
            });
        }
    }

    detections
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: usize = 640;

    struct Grid {
        shapes: Vec<Vec<i64>>,
        data: Vec<Vec<f32>>,
    }

    impl Grid {
        fn empty() -> Self {
            let mut shapes = Vec::new();
            let mut data = Vec::new();
            for channels in [1usize, 1, 4, 10] {
                for stride in STRIDES {
                    let cells = (INPUT / stride) * (INPUT / stride);
                    shapes.push(vec![1, cells as i64, channels as i64]);
                    data.push(vec![0.0; cells * channels]);
                }
            }
            Self { shapes, data }
        }

        fn outputs(&self) -> Vec<(&[i64], &[f32])> {
            self.shapes
                .iter()
                .zip(self.data.iter())
                .map(|(s, d)| (s.as_slice(), d.as_slice()))
                .collect()
        }
    }

    #[test]
    fn test_cell_score() {
        assert!((cell_score(0.81, 1.0) - 0.9).abs() < 1e-6);
        assert_eq!(cell_score(-0.5, 1.0), 0.0);
        assert!((cell_score(2.0, 0.25) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_decode_single_cell_on_coarse_grid() {
        let mut grid = Grid::empty();
        // stride 32 heads are outputs 2, 5, 8, 11
        let side = INPUT / 32;
        let idx = 10 * side + 10;
        grid.data[2][idx] = 0.81;
        grid.data[5][idx] = 1.0;
        grid.data[8][idx * 4..idx * 4 + 4].copy_from_slice(&[0.5, 0.3, 4f32.ln(), 4f32.ln()]);

        let outputs = grid.outputs();
        let heads = split_outputs(&outputs, INPUT).unwrap();
        let detections = decode(&heads, 0.5, INPUT);

        assert_eq!(detections.len(), 1);
        let det = &detections[0];

        // cx = (10 + 0.5) * 32 = 336, w = 4 * 32 = 128 -> x = (336 - 64) / 640
        assert!((det.bbox[0] - 0.425).abs() < 1e-5);
        // cy = (10 + 0.3) * 32 = 329.6 -> y = (329.6 - 64) / 640
        assert!((det.bbox[1] - 0.415).abs() < 1e-5);
        assert!((det.bbox[2] - 0.2).abs() < 1e-5);
        assert!((det.bbox[3] - 0.2).abs() < 1e-5);
        assert!((det.score - 0.9).abs() < 1e-5);

        // zero landmark offsets sit on the cell corner: 10 * 32 / 640
        assert!((det.landmarks[0] - 0.5).abs() < 1e-5);
        assert!((det.landmarks[1] - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_decode_respects_threshold() {
        let mut grid = Grid::empty();
        grid.data[0][3] = 0.1;
        grid.data[3][3] = 0.1;
        let outputs = grid.outputs();
        let heads = split_outputs(&outputs, INPUT).unwrap();
        assert!(decode(&heads, 0.5, INPUT).is_empty());
    }

    #[test]
    fn test_split_rejects_bad_shapes() {
        let mut grid = Grid::empty();
        grid.shapes[7] = vec![1, 1600, 5];
        let outputs = grid.outputs();
        assert!(split_outputs(&outputs, INPUT).is_err());

        let grid = Grid::empty();
        let outputs = grid.outputs();
        assert!(split_outputs(&outputs[..11], INPUT).is_err());
    }
}
