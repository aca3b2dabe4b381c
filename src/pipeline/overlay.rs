//! Overlay geometry for renderers.
//!
//! Boxes arrive in the 0..=1000 normalized space and are mapped onto the rendered
//! video element's pixel size.

use serde::Serialize;

use crate::detect::{BoundingBox, Detection, Priority, BOX_SPACE};

/// Vertical offset of a label above its box, in pixels.
pub const LABEL_OFFSET_PX: f32 = 30.0;

const DEFAULT_COLOR: &str = "#3b82f6";

/// Label keyword to overlay colour; first match wins.
const LABEL_COLORS: &[(&str, &str)] = &[
    ("person", "#ef4444"),
    ("helmet", "#22c55e"),
    ("hard hat", "#22c55e"),
    ("vehicle", "#f59e0b"),
    ("truck", "#f59e0b"),
    ("machine", "#f59e0b"),
    ("fire", "#dc2626"),
    ("smoke", "#dc2626"),
    ("danger", "#dc2626"),
];

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PixelRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl PixelRect {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Map a normalized box onto a `video_width` x `video_height` element.
///
/// Missing, zero, or non-finite dimensions give a zero-area rectangle.
pub fn to_pixel_rect(bbox: &BoundingBox, video_width: f32, video_height: f32) -> PixelRect {
    let usable = |v: f32| v.is_finite() && v > 0.0;
    if !usable(video_width) || !usable(video_height) {
        return PixelRect::default();
    }
    let rect = PixelRect {
        left: bbox.xmin / BOX_SPACE * video_width,
        top: bbox.ymin / BOX_SPACE * video_height,
        width: bbox.width() / BOX_SPACE * video_width,
        height: bbox.height() / BOX_SPACE * video_height,
    };
    let values = [rect.left, rect.top, rect.width, rect.height];
    if values.iter().all(|v| v.is_finite()) {
        rect
    } else {
        PixelRect::default()
    }
}

/// Overlay colour for a label.
pub fn overlay_color(label: &str) -> &'static str {
    let lower = label.to_lowercase();
    LABEL_COLORS
        .iter()
        .find(|(key, _)| lower.contains(key))
        .map(|(_, color)| *color)
        .unwrap_or(DEFAULT_COLOR)
}

/// Top-left corner for a box's label, kept inside the element.
pub fn label_anchor(rect: &PixelRect) -> (f32, f32) {
    (rect.left, (rect.top - LABEL_OFFSET_PX).max(0.0))
}

/// Counts for the overlay summary badge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct OverlaySummary {
    pub objects: usize,
    pub safety_alerts: usize,
}

impl OverlaySummary {
    pub fn from_batch(batch: &[Detection]) -> Self {
        Self {
            objects: batch.len(),
            safety_alerts: batch
                .iter()
                .filter(|d| d.priority == Priority::High)
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_box_covers_the_video() {
        let rect = to_pixel_rect(&BoundingBox::new(0.0, 0.0, 1000.0, 1000.0), 640.0, 480.0);
        assert_eq!(
            rect,
            PixelRect {
                left: 0.0,
                top: 0.0,
                width: 640.0,
                height: 480.0
            }
        );
    }

    #[test]
    fn partial_box_scales_each_axis() {
        let rect = to_pixel_rect(&BoundingBox::new(250.0, 500.0, 750.0, 1000.0), 800.0, 600.0);
        assert_eq!(rect.left, 200.0);
        assert_eq!(rect.top, 300.0);
        assert_eq!(rect.width, 400.0);
        assert_eq!(rect.height, 300.0);
    }

    #[test]
    fn zero_or_bad_dimensions_give_zero_area() {
        let bbox = BoundingBox::new(100.0, 100.0, 200.0, 200.0);
        for (w, h) in [(0.0, 480.0), (640.0, 0.0), (f32::NAN, 480.0), (640.0, f32::INFINITY)] {
            let rect = to_pixel_rect(&bbox, w, h);
            assert_eq!(rect.area(), 0.0);
            assert!(rect.left.is_finite() && rect.top.is_finite());
        }
    }

    #[test]
    fn colors_follow_keyword_order() {
        assert_eq!(overlay_color("Person"), "#ef4444");
        assert_eq!(overlay_color("hard hat"), "#22c55e");
        assert_eq!(overlay_color("forklift truck"), "#f59e0b");
        assert_eq!(overlay_color("smoke"), "#dc2626");
        assert_eq!(overlay_color("chair"), "#3b82f6");
    }

    #[test]
    fn label_anchor_clamps_at_top() {
        let rect = PixelRect {
            left: 12.0,
            top: 10.0,
            width: 5.0,
            height: 5.0,
        };
        assert_eq!(label_anchor(&rect), (12.0, 0.0));
    }
}
