//! QR rasterization for the burned-in provenance code.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{ImageFormat, Rgba, RgbaImage};
use qrcode::types::Color;
use qrcode::{EcLevel, QrCode};

use crate::error::ProvenanceError;

/// Light modules around the symbol, per side.
pub const QUIET_ZONE_MODULES: u32 = 4;

/// Smallest module size the compositor will draw.
pub const MIN_MODULE_PX: u32 = 3;

const DARK: Rgba<u8> = Rgba([0, 0, 0, 255]);
const LIGHT: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Rasterize `text` at one pixel per module, quiet zone included.
pub fn rasterize(text: &str) -> Result<RgbaImage, ProvenanceError> {
    let code = QrCode::with_error_correction_level(text.as_bytes(), EcLevel::L).map_err(|e| {
        ProvenanceError::QrEncode {
            message: e.to_string(),
        }
    })?;

    let width = code.width() as u32;
    let side = width + 2 * QUIET_ZONE_MODULES;
    let mut raster = RgbaImage::from_pixel(side, side, LIGHT);

    for (index, color) in code.to_colors().iter().enumerate() {
        if *color == Color::Dark {
            let index = index as u32;
            raster.put_pixel(
                index % width + QUIET_ZONE_MODULES,
                index / width + QUIET_ZONE_MODULES,
                DARK,
            );
        }
    }

    Ok(raster)
}

/// Largest whole-module scale of `raster` that fits `target_side`, never
/// below [`MIN_MODULE_PX`].
pub fn module_scale(raster: &RgbaImage, target_side: u32) -> u32 {
    (target_side / raster.width().max(1)).max(MIN_MODULE_PX)
}

/// Upscale a one-pixel-per-module raster with nearest-neighbour sampling so
/// module edges stay sharp.
pub fn scale_crisp(raster: &RgbaImage, module_px: u32) -> RgbaImage {
    let module_px = module_px.max(1);
    image::imageops::resize(
        raster,
        raster.width() * module_px,
        raster.height() * module_px,
        FilterType::Nearest,
    )
}

/// PNG bytes of the raster scaled to `module_px`, for display next to a
/// pending recording.
pub fn to_png(raster: &RgbaImage, module_px: u32) -> Result<Vec<u8>, ProvenanceError> {
    let scaled = scale_crisp(raster, module_px);
    let mut bytes = Vec::new();
    scaled
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ProvenanceError::QrEncode {
            message: format!("PNG encoding failed: {e}"),
        })?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raster_has_quiet_zone_and_dark_modules() {
        let raster = rasterize("gw-quiet-zone").unwrap();
        assert_eq!(raster.width(), raster.height());
        for i in 0..raster.width() {
            assert_eq!(*raster.get_pixel(i, 0), LIGHT);
            assert_eq!(*raster.get_pixel(0, i), LIGHT);
        }
        // Finder pattern corner sits right inside the quiet zone.
        assert_eq!(
            *raster.get_pixel(QUIET_ZONE_MODULES, QUIET_ZONE_MODULES),
            DARK
        );
    }

    #[test]
    fn module_scale_never_drops_below_minimum() {
        let raster = rasterize("gw-scale").unwrap();
        assert_eq!(module_scale(&raster, 10), MIN_MODULE_PX);
        assert_eq!(module_scale(&raster, raster.width() * 5 + 1), 5);
    }

    #[test]
    fn crisp_scaling_keeps_binary_pixels() {
        let raster = rasterize("gw-crisp").unwrap();
        let scaled = scale_crisp(&raster, 4);
        assert_eq!(scaled.width(), raster.width() * 4);
        assert!(scaled.pixels().all(|p| *p == DARK || *p == LIGHT));
    }

    #[test]
    fn png_copy_decodes() {
        let raster = rasterize("gw-png").unwrap();
        let png = to_png(&raster, 2).unwrap();
        let decoded = image::load_from_memory(&png).unwrap();
        assert_eq!(decoded.width(), raster.width() * 2);
    }
}
