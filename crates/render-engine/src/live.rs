//! Live compositor: draws one frame per display refresh while recording.

use std::path::Path;

use ab_glyph::FontVec;
use gluewave_common::config::OverlayConfig;
use gluewave_common::error::{GluewaveError, GluewaveResult};
use gluewave_mixer::track::MediaTrack;
use gluewave_provenance::qr;
use image::imageops::{self, FilterType};
use image::{GenericImage, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, Blend};
use imageproc::rect::Rect;

use crate::compositor::{compute_layout, FrameLayout, Placement};

const QR_BOX_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const SHADOW_COLOR: Rgba<u8> = Rgba([0, 0, 0, 110]);
const EMPTY_COLOR: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// DejaVu Sans Mono, used when no watermark font is configured.
const BUNDLED_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

/// The QR image for the current take, scaled for the current surface.
#[derive(Debug, Clone)]
struct PreparedQr {
    raster: RgbaImage,
    scaled: RgbaImage,
    module_px: u32,
}

/// Counters for one recording's render loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub frames: u64,
    /// Layer draws that failed and were skipped.
    pub skipped_layers: u64,
}

/// Owns the off-screen surface and draws composited frames onto it.
pub struct LiveCompositor {
    overlay: OverlayConfig,
    font: Option<FontVec>,
    surface: Option<RgbaImage>,
    qr: Option<PreparedQr>,
    stats: RenderStats,
}

impl LiveCompositor {
    /// Create a compositor, loading the configured watermark font. A font
    /// that is unset or fails to load is replaced by the bundled one.
    pub fn new(overlay: OverlayConfig) -> Self {
        let configured = overlay
            .font_path
            .as_deref()
            .and_then(|path| match load_font(path) {
                Ok(font) => Some(font),
                Err(e) => {
                    tracing::warn!(error = %e, "Falling back to bundled watermark font");
                    None
                }
            });
        let font = configured.or_else(bundled_font);

        Self {
            overlay,
            font,
            surface: None,
            qr: None,
            stats: RenderStats::default(),
        }
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    pub fn overlay(&self) -> &OverlayConfig {
        &self.overlay
    }

    /// Size the surface, reusing the existing one when the size matches.
    pub fn prepare_surface(&mut self, width: u32, height: u32) {
        let width = width.max(1);
        let height = height.max(1);
        let reuse = self
            .surface
            .as_ref()
            .is_some_and(|s| s.dimensions() == (width, height));
        if !reuse {
            tracing::debug!(width, height, "Allocating compositor surface");
            self.surface = Some(RgbaImage::from_pixel(width, height, EMPTY_COLOR));
            if let Some(raster) = self.qr.take().map(|q| q.raster) {
                self.set_qr(raster);
            }
        }
        self.stats = RenderStats::default();
    }

    /// Install the take's QR raster (one pixel per module). It is scaled once
    /// here, not per frame.
    pub fn set_qr(&mut self, raster: RgbaImage) {
        let width = self.surface.as_ref().map_or(0, |s| s.width());
        let target = (width as f64 * self.overlay.qr_size_ratio as f64).round() as u32;
        let module_px = qr::module_scale(&raster, target);
        let scaled = qr::scale_crisp(&raster, module_px);
        tracing::debug!(module_px, side = scaled.width(), "Prepared QR overlay");
        self.qr = Some(PreparedQr {
            raster,
            scaled,
            module_px,
        });
    }

    pub fn clear_qr(&mut self) {
        self.qr = None;
    }

    pub fn surface(&self) -> Option<&RgbaImage> {
        self.surface.as_ref()
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Layout for the current surface, or `None` before it exists.
    pub fn layout(&self, with_pip: bool) -> Option<FrameLayout> {
        let surface = self.surface.as_ref()?;
        let (qr_side, padding) = self
            .qr
            .as_ref()
            .map_or((None, 0), |q| (Some(q.scaled.width()), q.module_px));
        Some(compute_layout(
            surface.width(),
            surface.height(),
            qr_side,
            padding,
            with_pip,
            &self.overlay,
        ))
    }

    /// Draw one frame: BIG, watermark, QR, then SMALL picture-in-picture.
    ///
    /// A layer that fails to draw is skipped; the frame is still produced.
    pub fn render_frame(
        &mut self,
        big: Option<&dyn MediaTrack>,
        small: Option<&dyn MediaTrack>,
    ) -> Option<&RgbaImage> {
        let small = small.filter(|s| s.video_dimensions().is_some());
        let layout = self.layout(small.is_some())?;
        let mut surface = self.surface.take()?;

        let results = [
            ("big", draw_background(&mut surface, big)),
            (
                "watermark",
                draw_watermark(&mut surface, &layout, &self.overlay, self.font.as_ref()),
            ),
            ("qr", draw_qr(&mut surface, &layout, self.qr.as_ref())),
            ("pip", draw_pip(&mut surface, &layout, small)),
        ];
        for (layer, result) in results {
            if let Err(e) = result {
                self.stats.skipped_layers += 1;
                tracing::debug!(layer, error = %e, "Skipped layer");
            }
        }

        self.stats.frames += 1;
        self.surface = Some(surface);
        self.surface.as_ref()
    }
}

impl std::fmt::Debug for LiveCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCompositor")
            .field("surface", &self.surface.as_ref().map(|s| s.dimensions()))
            .field("font", &self.font.is_some())
            .field("qr", &self.qr.as_ref().map(|q| q.module_px))
            .field("stats", &self.stats)
            .finish()
    }
}

/// Load a TrueType/OpenType font for the watermark.
pub fn load_font(path: &Path) -> GluewaveResult<FontVec> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => GluewaveError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => GluewaveError::Io(e),
    })?;
    FontVec::try_from_vec(bytes)
        .map_err(|e| GluewaveError::render(format!("Invalid font {}: {e}", path.display())))
}

/// The font compiled into the binary.
pub fn bundled_font() -> Option<FontVec> {
    match FontVec::try_from_vec(BUNDLED_FONT.to_vec()) {
        Ok(font) => Some(font),
        Err(e) => {
            tracing::warn!(error = %e, "Bundled font unreadable; watermark disabled");
            None
        }
    }
}

fn draw_background(surface: &mut RgbaImage, big: Option<&dyn MediaTrack>) -> GluewaveResult<()> {
    let frame = big
        .and_then(|t| t.current_frame())
        .ok_or_else(|| GluewaveError::render("BIG has no frame"))?;

    if frame.dimensions() == surface.dimensions() {
        surface
            .copy_from(frame, 0, 0)
            .map_err(|e| GluewaveError::render(e.to_string()))
    } else {
        let (w, h) = surface.dimensions();
        let filled = fit_cover(frame, w, h);
        imageops::replace(surface, &filled, 0, 0);
        Ok(())
    }
}

fn draw_watermark(
    surface: &mut RgbaImage,
    layout: &FrameLayout,
    overlay: &OverlayConfig,
    font: Option<&FontVec>,
) -> GluewaveResult<()> {
    if overlay.watermark_text.is_empty() {
        return Ok(());
    }
    let font = font.ok_or_else(|| GluewaveError::render("no watermark font loaded"))?;

    // Text is rendered opaque onto its own layer, then faded as a whole.
    let mut layer = RgbaImage::new(surface.width(), surface.height());
    let (x, y) = layout.watermark_origin;
    draw_text_mut(
        &mut layer,
        Rgba([255, 255, 255, 255]),
        x as i32,
        y as i32,
        layout.font_px,
        font,
        &overlay.watermark_text,
    );

    let opacity = overlay.watermark_opacity.clamp(0.0, 1.0);
    for pixel in layer.pixels_mut() {
        let coverage = pixel[3];
        *pixel = Rgba([255, 255, 255, (coverage as f32 * opacity).round() as u8]);
    }
    imageops::overlay(surface, &layer, 0, 0);
    Ok(())
}

fn draw_qr(
    surface: &mut RgbaImage,
    layout: &FrameLayout,
    prepared: Option<&PreparedQr>,
) -> GluewaveResult<()> {
    let (Some(prepared), Some(qr_box), Some(qr)) = (prepared, layout.qr_box, layout.qr) else {
        return Err(GluewaveError::render("no QR prepared"));
    };
    draw_filled_rect_mut(surface, to_rect(qr_box), QR_BOX_COLOR);
    imageops::replace(surface, &prepared.scaled, qr.x as i64, qr.y as i64);
    Ok(())
}

fn draw_pip(
    surface: &mut RgbaImage,
    layout: &FrameLayout,
    small: Option<&dyn MediaTrack>,
) -> GluewaveResult<()> {
    let (Some(small), Some(pip)) = (small, layout.pip) else {
        return Ok(());
    };
    let frame = small
        .current_frame()
        .ok_or_else(|| GluewaveError::render("SMALL has no frame"))?;

    if let Some(shadow) = layout.pip_shadow {
        let mut canvas = Blend(std::mem::take(surface));
        draw_filled_rect_mut(&mut canvas, to_rect(shadow), SHADOW_COLOR);
        *surface = canvas.0;
    }

    let scaled = fit_cover(frame, pip.width, pip.height);
    imageops::replace(surface, &scaled, pip.x as i64, pip.y as i64);
    Ok(())
}

/// Scale `frame` to exactly `width` x `height`, cropping the overflow
/// around the centre so the aspect ratio is kept.
fn fit_cover(frame: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let (fw, fh) = frame.dimensions();
    if fw == 0 || fh == 0 || width == 0 || height == 0 {
        return RgbaImage::from_pixel(width.max(1), height.max(1), EMPTY_COLOR);
    }

    let target_aspect = width as f64 / height as f64;
    let frame_aspect = fw as f64 / fh as f64;
    let (cw, ch) = if frame_aspect > target_aspect {
        (((fh as f64) * target_aspect).round().max(1.0) as u32, fh)
    } else {
        (fw, ((fw as f64) / target_aspect).round().max(1.0) as u32)
    };
    let cw = cw.min(fw);
    let ch = ch.min(fh);
    let view = imageops::crop_imm(frame, (fw - cw) / 2, (fh - ch) / 2, cw, ch);
    imageops::resize(&*view, width, height, FilterType::Triangle)
}

fn to_rect(placement: Placement) -> Rect {
    Rect::at(placement.x as i32, placement.y as i32).of_size(placement.width, placement.height)
}
