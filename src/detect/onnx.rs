//! ONNX Runtime detector backend.
//!
//! The model contract matches the core's raw-output convention: one output
//! tensor of rows `[class_id, confidence, x1, y1, x2, y2]`, coordinates
//! normalized to the unpadded input.

use image::{imageops, RgbImage};
use ndarray::{Array2, Array4, Axis};
use ort::session::Session;
use ort::value::TensorRef;
use tracing::{debug, info};

use crate::capture::Frame;
use crate::detect::{Detector, DetectorError};

/// Square model input edge; the letterboxed frame is padded up to a
/// multiple of 32 on each side
const TARGET_SIZE: u32 = 416;
const PAD_VALUE: f32 = 114.0 / 255.0;

pub struct OnnxDetector {
    session: Session,
    input_name: String,
    output_name: String,
}

impl OnnxDetector {
    pub fn load(model_path: &str, use_gpu: bool) -> Result<Self, DetectorError> {
        let err = |reason: String| DetectorError::ModelLoad {
            path: model_path.to_string(),
            reason,
        };

        #[allow(unused_mut)]
        let mut builder = Session::builder().map_err(|e| err(e.to_string()))?;

        #[cfg(feature = "cuda")]
        if use_gpu {
            use ort::execution_providers::CUDAExecutionProvider;
            builder = builder
                .with_execution_providers([CUDAExecutionProvider::default().build()])
                .map_err(|e| err(e.to_string()))?;
        }
        #[cfg(not(feature = "cuda"))]
        if use_gpu {
            info!("use_gpu requested but this build has no CUDA support, using CPU");
        }

        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| err(e.to_string()))?;

        let input_name = session
            .inputs()
            .first()
            .map(|i| i.name().to_string())
            .ok_or_else(|| err("model declares no inputs".into()))?;
        let output_name = session
            .outputs()
            .first()
            .map(|o| o.name().to_string())
            .ok_or_else(|| err("model declares no outputs".into()))?;

        info!(
            "Model loaded from {} (input '{}', output '{}')",
            model_path, input_name, output_name
        );

        Ok(Self {
            session,
            input_name,
            output_name,
        })
    }

    /// Aspect-preserving resize to the square target, padded to a multiple
    /// of 32 with neutral gray, normalized to [0,1] NCHW
    fn preprocess(frame: &Frame) -> Result<Array4<f32>, DetectorError> {
        let rgb = frame.to_rgb24();
        let img = RgbImage::from_raw(frame.width(), frame.height(), rgb)
            .ok_or_else(|| DetectorError::Inference("frame buffer size mismatch".into()))?;

        let (src_w, src_h) = (frame.width(), frame.height());
        let (mut w, mut h) = (src_w, src_h);
        if w > h {
            h = (h as f32 * TARGET_SIZE as f32 / w as f32) as u32;
            w = TARGET_SIZE;
        } else {
            w = (w as f32 * TARGET_SIZE as f32 / h as f32) as u32;
            h = TARGET_SIZE;
        }
        let resized = imageops::resize(&img, w, h, imageops::FilterType::Triangle);

        let padded_w = (w + 31) / 32 * 32;
        let padded_h = (h + 31) / 32 * 32;
        let wpad = padded_w - w;
        let hpad = padded_h - h;

        let mut input = Array4::<f32>::from_elem(
            (1, 3, padded_h as usize, padded_w as usize),
            PAD_VALUE,
        );
        let (x_off, y_off) = ((wpad / 2) as usize, (hpad / 2) as usize);
        for (x, y, px) in resized.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize + y_off, x as usize + x_off]] =
                    px.0[c] as f32 / 255.0;
            }
        }

        Ok(input)
    }
}

impl Detector for OnnxDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Array2<f32>, DetectorError> {
        let input = Self::preprocess(frame)?;

        let tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Inference(e.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let raw = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| DetectorError::BadOutput(e.to_string()))?;

        // Accept [n, 6] or batched [1, n, 6]
        let raw = if raw.ndim() == 3 && raw.shape()[0] == 1 {
            raw.index_axis(Axis(0), 0).to_owned()
        } else {
            raw.to_owned()
        };
        let rows = raw
            .into_dimensionality::<ndarray::Ix2>()
            .map_err(|e| DetectorError::BadOutput(e.to_string()))?;

        if rows.ncols() < 6 && rows.nrows() > 0 {
            return Err(DetectorError::BadOutput(format!(
                "expected rows of 6 values, got {}",
                rows.ncols()
            )));
        }

        debug!("inference produced {} raw rows", rows.nrows());
        Ok(rows)
    }
}
