use std::path::Path;

use image::RgbaImage;

use crate::error::{FishreelError, FishreelResult};

/// Decode image bytes of any supported format into straight-alpha RGBA8.
pub fn decode_image(bytes: &[u8]) -> FishreelResult<RgbaImage> {
    let dyn_img = image::load_from_memory(bytes)
        .map_err(|e| FishreelError::decode(format!("decode image from memory: {e}")))?;
    Ok(dyn_img.to_rgba8())
}

/// Load and decode an image file into straight-alpha RGBA8.
pub fn load_image(path: &Path) -> FishreelResult<RgbaImage> {
    let bytes = std::fs::read(path)
        .map_err(|e| FishreelError::decode(format!("read image '{}': {e}", path.display())))?;
    decode_image(&bytes)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn png_bytes(img: image::RgbaImage) -> Vec<u8> {
        let mut buf = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        buf
    }

    #[test]
    fn decode_image_preserves_dimensions_and_pixels() {
        let src = image::RgbaImage::from_raw(1, 1, vec![100u8, 50, 200, 128]).unwrap();
        let decoded = decode_image(&png_bytes(src)).unwrap();
        assert_eq!(decoded.dimensions(), (1, 1));
        assert_eq!(decoded.get_pixel(0, 0).0, [100, 50, 200, 128]);
    }

    #[test]
    fn decode_image_rejects_garbage() {
        let err = decode_image(b"not an image").unwrap_err();
        assert!(err.to_string().contains("decode error:"));
    }

    #[test]
    fn load_image_reports_missing_file() {
        let err = load_image(Path::new("definitely/missing.png")).unwrap_err();
        assert!(matches!(err, FishreelError::Decode(_)));
    }
}
