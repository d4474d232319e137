use std::path::Path;

use mlua::prelude::*;

/// Decoded image in the framebuffer's ARGB packing.
#[derive(Debug, Clone)]
pub struct ImageData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u32>,
}

impl ImageData {
    pub fn from_rgba8(width: u32, height: u32, rgba: &[u8]) -> Self {
        let pixels = rgba
            .chunks_exact(4)
            .map(|px| u32::from_be_bytes([px[3], px[0], px[1], px[2]]))
            .collect();
        Self {
            width,
            height,
            pixels,
        }
    }
}

pub fn load_image_from_path(path: &Path) -> Result<ImageData, String> {
    let decoded = image::open(path)
        .map_err(|e| format!("Failed to load image {}: {e}", path.display()))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    Ok(ImageData::from_rgba8(width, height, decoded.as_raw()))
}

impl LuaUserData for ImageData {
    fn add_fields<F: LuaUserDataFields<Self>>(fields: &mut F) {
        fields.add_field_method_get("width", |_, this| Ok(this.width));
        fields.add_field_method_get("height", |_, this| Ok(this.height));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::files::tests::temp_path;

    #[test]
    fn rgba_bytes_pack_as_argb() {
        let image = ImageData::from_rgba8(2, 1, &[0xBB, 0xCC, 0xDD, 0xAA, 1, 2, 3, 4]);
        assert_eq!(image.pixels, vec![0xAABB_CCDD, 0x0401_0203]);
    }

    #[test]
    fn loads_png_from_disk() {
        let path = temp_path("image.png");
        let mut img = image::RgbaImage::new(3, 2);
        img.put_pixel(2, 1, image::Rgba([255, 0, 0, 255]));
        img.save(&path).expect("failed to write test png");

        let loaded = load_image_from_path(&path).expect("png should load");
        assert_eq!((loaded.width, loaded.height), (3, 2));
        assert_eq!(loaded.pixels[5], 0xFFFF_0000);
        assert_eq!(loaded.pixels[0], 0x0000_0000);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_image_is_an_error() {
        let err = load_image_from_path(Path::new("__pxe_missing_image__.png")).unwrap_err();
        assert!(err.contains("__pxe_missing_image__"));
    }
}
