//! Image loading utilities for texture data
//!
//! Everything is converted to tightly packed RGBA8 for GPU upload.

use std::path::Path;

use super::AssetError;

/// Loaded image data ready for GPU upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Raw RGBA pixel data
    pub data: Vec<u8>,
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
}

impl ImageData {
    /// Load an image from a file path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AssetError::NotFound(path.display().to_string()));
        }

        log::debug!("Loading image from: {:?}", path);
        let img = image::open(path).map_err(|e| AssetError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        log::info!("Loaded image {}x{} from {:?}", width, height, path);
        Ok(Self {
            data: rgba.into_raw(),
            width,
            height,
        })
    }

    /// Decode an image held in memory
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AssetError> {
        let img = image::load_from_memory(bytes)
            .map_err(|e| AssetError::LoadFailed(format!("Failed to decode image from bytes: {}", e)))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();

        Ok(Self {
            data: rgba.into_raw(),
            width,
            height,
        })
    }

    /// Create a solid color image
    pub fn solid_color(width: u32, height: u32, color: [u8; 4]) -> Self {
        let pixel_count = width as usize * height as usize;
        Self {
            data: color.repeat(pixel_count),
            width,
            height,
        }
    }

    /// Square checkerboard alternating `a` and `b` every `cell` pixels
    pub fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = cell.max(1);
        let mut data = Vec::with_capacity(size as usize * size as usize * 4);
        for y in 0..size {
            for x in 0..size {
                let even = (x / cell + y / cell) % 2 == 0;
                data.extend_from_slice(if even { &a } else { &b });
            }
        }
        Self {
            data,
            width: size,
            height: size,
        }
    }

    /// Size of the pixel data in bytes
    pub fn size_bytes(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_image() {
        let img = ImageData::solid_color(4, 4, [255, 0, 0, 255]);
        assert_eq!(img.width, 4);
        assert_eq!(img.size_bytes(), 4 * 4 * 4);
        assert_eq!(&img.data[0..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_checkerboard() {
        let white = [255; 4];
        let black = [0, 0, 0, 255];
        let img = ImageData::checkerboard(4, 2, white, black);
        let pixel = |x: usize, y: usize| &img.data[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];

        assert_eq!(img.size_bytes(), 64);
        assert_eq!(pixel(0, 0), &white);
        assert_eq!(pixel(1, 1), &white);
        assert_eq!(pixel(2, 0), &black);
        assert_eq!(pixel(0, 2), &black);
        assert_eq!(pixel(3, 3), &white);
    }

    #[test]
    fn test_from_bytes_png() {
        let source = image::RgbaImage::from_pixel(2, 3, image::Rgba([10, 20, 30, 255]));
        let mut encoded = std::io::Cursor::new(Vec::new());
        source.write_to(&mut encoded, image::ImageFormat::Png).unwrap();

        let img = ImageData::from_bytes(encoded.get_ref()).unwrap();
        assert_eq!((img.width, img.height), (2, 3));
        assert_eq!(&img.data[0..4], &[10, 20, 30, 255]);
    }

    #[test]
    fn test_invalid_bytes() {
        assert!(matches!(ImageData::from_bytes(b"not an image"), Err(AssetError::LoadFailed(_))));
    }
}
