use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::errors::ServerError;

/// Resolution the classifier was trained at. Not configurable.
pub const INPUT_SIZE: u32 = 224;

/// A single preprocessed image, shaped `[1, 224, 224, 3]`.
pub type ImageBatch = tract_ndarray::Array4<f32>;

/// Decodes an uploaded file, resizes it to 224x224 RGB, scales pixel values
/// into `[0.0, 1.0]` and adds the batch dimension.
pub fn preprocess(bytes: &[u8]) -> Result<ImageBatch, ServerError> {
    let decoded =
        image::load_from_memory(bytes).map_err(|e| ServerError::InvalidImage(e.to_string()))?;
    let resized = decoded
        .resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::Triangle)
        .to_rgb8();

    let batch = tract_ndarray::Array4::from_shape_fn(
        (1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3),
        |(_, y, x, c)| f32::from(resized[(x as u32, y as u32)][c]) / 255.0,
    );
    Ok(batch)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

    use super::{preprocess, INPUT_SIZE};
    use crate::errors::ServerError;

    fn png_bytes(width: u32, height: u32, fill: [u8; 3]) -> Vec<u8> {
        let mut img = RgbImage::new(width, height);
        for pixel in img.pixels_mut() {
            *pixel = Rgb(fill);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn produces_a_normalized_batch_of_one() {
        let batch = preprocess(&png_bytes(30, 17, [255, 0, 128])).unwrap();
        assert_eq!(
            batch.shape(),
            &[1, INPUT_SIZE as usize, INPUT_SIZE as usize, 3]
        );
        assert!(batch.iter().all(|v| (0.0..=1.0).contains(v)));

        // A uniform image stays uniform after resizing.
        assert_eq!(batch[(0, 0, 0, 0)], 1.0);
        assert_eq!(batch[(0, 100, 100, 1)], 0.0);
    }

    #[test]
    fn rejects_bytes_that_are_not_an_image() {
        let err = preprocess(b"definitely not a png").unwrap_err();
        assert!(matches!(err, ServerError::InvalidImage(_)));
    }
}
