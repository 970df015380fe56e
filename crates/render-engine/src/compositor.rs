//! Frame layout: where each layer of a composited frame goes.
//!
//! Layout is a pure function of the surface size, the prepared QR size, and
//! the overlay configuration. The drawing itself lives in [`crate::live`].

use gluewave_common::config::OverlayConfig;

/// Edge margin as a fraction of surface width.
pub const MARGIN_RATIO: f64 = 0.0125;

/// Smallest margin in pixels.
pub const MIN_MARGIN_PX: u32 = 8;

/// Smallest watermark font size in pixels.
pub const MIN_FONT_PX: f32 = 10.0;

/// Picture-in-picture aspect ratio (width / height).
pub const PIP_ASPECT: f64 = 16.0 / 9.0;

/// An axis-aligned rectangle in surface pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Per-frame layout instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameLayout {
    pub width: u32,
    pub height: u32,

    /// Top-left corner of the watermark text.
    pub watermark_origin: (u32, u32),

    /// Watermark font size in pixels.
    pub font_px: f32,

    /// Opaque box behind the QR code.
    pub qr_box: Option<Placement>,

    /// Where the QR image itself goes, inside `qr_box`.
    pub qr: Option<Placement>,

    /// Picture-in-picture slot for SMALL.
    pub pip: Option<Placement>,

    /// Drop shadow under the picture-in-picture.
    pub pip_shadow: Option<Placement>,
}

/// Compute the layout for a `width` x `height` surface.
///
/// `qr_side` is the side of the already-scaled QR image and `qr_padding` the
/// padding of its opaque box, both in pixels. `with_pip` reserves the
/// picture-in-picture slot.
pub fn compute_layout(
    width: u32,
    height: u32,
    qr_side: Option<u32>,
    qr_padding: u32,
    with_pip: bool,
    overlay: &OverlayConfig,
) -> FrameLayout {
    let margin = ((width as f64 * MARGIN_RATIO).round() as u32).max(MIN_MARGIN_PX);
    let font_px = (width as f32 * overlay.font_scale).max(MIN_FONT_PX);

    let watermark_origin = (margin, margin);
    let qr_top = margin + font_px.ceil() as u32 + margin / 2;

    let (qr_box, qr) = match qr_side {
        Some(side) if side > 0 => {
            let qr_box = Placement {
                x: margin,
                y: qr_top,
                width: side + 2 * qr_padding,
                height: side + 2 * qr_padding,
            };
            let qr = Placement {
                x: margin + qr_padding,
                y: qr_top + qr_padding,
                width: side,
                height: side,
            };
            (Some(qr_box), Some(qr))
        }
        _ => (None, None),
    };

    let (pip, pip_shadow) = if with_pip {
        pip_placement(width, height, margin, overlay.pip_width_ratio)
    } else {
        (None, None)
    };

    FrameLayout {
        width,
        height,
        watermark_origin,
        font_px,
        qr_box,
        qr,
        pip,
        pip_shadow,
    }
}

fn pip_placement(
    width: u32,
    height: u32,
    margin: u32,
    width_ratio: f32,
) -> (Option<Placement>, Option<Placement>) {
    let pip_w = (width as f64 * width_ratio as f64).round() as u32;
    let pip_h = (pip_w as f64 / PIP_ASPECT).round() as u32;
    if pip_w == 0 || pip_h == 0 || pip_w + margin > width || pip_h + margin > height {
        return (None, None);
    }

    let pip = Placement {
        x: width - pip_w - margin,
        y: height - pip_h - margin,
        width: pip_w,
        height: pip_h,
    };

    let offset = (pip_w / 48).max(4);
    let shadow = Placement {
        x: pip.x + offset,
        y: pip.y + offset,
        width: pip_w.min(width.saturating_sub(pip.x + offset)),
        height: pip_h.min(height.saturating_sub(pip.y + offset)),
    };

    (Some(pip), Some(shadow))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hd_layout_keeps_qr_in_top_left_third() {
        let overlay = OverlayConfig::default();
        let layout = compute_layout(1280, 720, Some(147), 3, true, &overlay);

        assert_eq!(layout.watermark_origin, (16, 16));
        assert!((layout.font_px - 23.04).abs() < 0.01);

        let qr_box = layout.qr_box.unwrap();
        assert_eq!(qr_box.x, 16);
        assert!(qr_box.y > layout.watermark_origin.1 + layout.font_px as u32);
        assert!(qr_box.right() as f64 <= 1280.0 * 0.32);
        assert!(qr_box.bottom() as f64 <= 720.0 * 0.32);

        let qr = layout.qr.unwrap();
        assert_eq!((qr.x - qr_box.x, qr.y - qr_box.y), (3, 3));
    }

    #[test]
    fn pip_is_bottom_right_at_sixteen_by_nine() {
        let overlay = OverlayConfig::default();
        let layout = compute_layout(1280, 720, None, 0, true, &overlay);

        let pip = layout.pip.unwrap();
        assert_eq!(pip.width, 410);
        assert_eq!(pip.height, 231);
        assert_eq!(pip.right(), 1280 - 16);
        assert_eq!(pip.bottom(), 720 - 16);

        let shadow = layout.pip_shadow.unwrap();
        assert!(shadow.x > pip.x && shadow.y > pip.y);
        assert!(shadow.right() <= 1280 && shadow.bottom() <= 720);
        assert!(layout.qr_box.is_none());
    }

    #[test]
    fn pip_is_omitted_without_small_or_space() {
        let overlay = OverlayConfig::default();
        assert!(compute_layout(1280, 720, None, 0, false, &overlay).pip.is_none());
        assert!(compute_layout(1280, 20, None, 0, true, &overlay).pip.is_none());
    }

    #[test]
    fn tiny_surfaces_use_minimums() {
        let overlay = OverlayConfig::default();
        let layout = compute_layout(160, 90, None, 0, false, &overlay);
        assert_eq!(layout.watermark_origin, (MIN_MARGIN_PX, MIN_MARGIN_PX));
        assert_eq!(layout.font_px, MIN_FONT_PX);
    }
}
