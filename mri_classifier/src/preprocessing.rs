use crate::{
    config::{PreprocessingConfig, TensorLayout},
    error::ClassifierError,
};
use image::{imageops::FilterType, DynamicImage, ImageReader};
use ndarray::{Array, Ix4};
use std::io::Cursor;

#[derive(Debug, Clone)]
pub struct Preprocessor {
    config: PreprocessingConfig,
}

impl Preprocessor {
    pub fn new(config: PreprocessingConfig) -> Self {
        Self { config }
    }

    pub fn input_shape(&self) -> [usize; 4] {
        let (w, h) = (self.config.width as usize, self.config.height as usize);
        match self.config.layout {
            TensorLayout::Nchw => [1, 3, h, w],
            TensorLayout::Nhwc => [1, h, w, 3],
        }
    }

    /// Decodes uploaded bytes and lays them out as a single-image batch.
    pub fn preprocess(&self, image_data: &[u8]) -> Result<Array<f32, Ix4>, ClassifierError> {
        let image = decode_image(image_data)?;
        let resized = image
            .resize_exact(self.config.width, self.config.height, FilterType::CatmullRom)
            .to_rgb8();

        let mut input = Array::zeros(self.input_shape());
        for (x, y, pixel) in resized.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            for (c, value) in pixel.0.iter().enumerate() {
                let scaled = (*value as f32) / 255.;
                let normalized = (scaled - self.config.mean[c]) / self.config.std[c];
                match self.config.layout {
                    TensorLayout::Nchw => input[[0, c, y, x]] = normalized,
                    TensorLayout::Nhwc => input[[0, y, x, c]] = normalized,
                }
            }
        }

        Ok(input)
    }
}

fn decode_image(image_data: &[u8]) -> Result<DynamicImage, ClassifierError> {
    if image_data.is_empty() {
        return Err(ClassifierError::InvalidImage(
            "uploaded file is empty".to_string(),
        ));
    }

    let image_reader = ImageReader::new(Cursor::new(image_data))
        .with_guessed_format()
        .map_err(|e| ClassifierError::InvalidImage(format!("Error reading image: {}", e)))?;

    if image_reader.format().is_none() {
        return Err(ClassifierError::InvalidImage(
            "unrecognized image format".to_string(),
        ));
    }

    image_reader
        .decode()
        .map_err(|e| ClassifierError::InvalidImage(format!("Error decoding image: {}", e)))
}
