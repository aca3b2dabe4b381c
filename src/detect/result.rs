use serde::{Deserialize, Serialize};

/// Upper bound of the normalized coordinate space on each axis.
pub const BOX_SPACE: f32 = 1000.0;

/// Axis-aligned box in the normalized 0..=1000 space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
}

impl BoundingBox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    /// Clamp into the normalized space. Returns `None` for degenerate or non-finite boxes.
    pub fn normalized(self) -> Option<Self> {
        let coords = [self.xmin, self.ymin, self.xmax, self.ymax];
        if coords.iter().any(|c| !c.is_finite()) {
            return None;
        }
        let clamped = Self {
            xmin: self.xmin.clamp(0.0, BOX_SPACE),
            ymin: self.ymin.clamp(0.0, BOX_SPACE),
            xmax: self.xmax.clamp(0.0, BOX_SPACE),
            ymax: self.ymax.clamp(0.0, BOX_SPACE),
        };
        if clamped.xmin < clamped.xmax && clamped.ymin < clamped.ymax {
            Some(clamped)
        } else {
            None
        }
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }
}

/// Safety priority tier. Ordering is `Low < Medium < High`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// Detection as reported by a backend, before classification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub score: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

impl RawDetection {
    pub fn new(label: impl Into<String>, score: f32, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            score,
            bbox,
        }
    }

    /// Enforce the data-model bounds: score in [0,1], box inside the normalized space.
    ///
    /// Backends are untrusted here; anything that cannot be repaired is dropped.
    pub fn sanitized(self) -> Option<Self> {
        if self.score.is_nan() {
            return None;
        }
        let bbox = self.bbox.normalized()?;
        Some(Self {
            label: self.label,
            score: self.score.clamp(0.0, 1.0),
            bbox,
        })
    }
}

/// One classified object in one frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub score: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub priority: Priority,
    /// Capture time in epoch milliseconds, shared by the whole batch.
    pub timestamp: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_orders_high_above_low() {
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn sanitize_clamps_score_and_box() {
        let raw = RawDetection::new("person", 1.4, BoundingBox::new(-10.0, 5.0, 1200.0, 900.0));
        let clean = raw.sanitized().expect("repairable");
        assert_eq!(clean.score, 1.0);
        assert_eq!(clean.bbox, BoundingBox::new(0.0, 5.0, 1000.0, 900.0));
    }

    #[test]
    fn sanitize_drops_degenerate_boxes_and_nan_scores() {
        let flat = RawDetection::new("truck", 0.5, BoundingBox::new(100.0, 100.0, 100.0, 300.0));
        assert!(flat.sanitized().is_none());

        let nan = RawDetection::new("truck", f32::NAN, BoundingBox::new(0.0, 0.0, 10.0, 10.0));
        assert!(nan.sanitized().is_none());

        let off_screen =
            RawDetection::new("truck", 0.5, BoundingBox::new(1100.0, 0.0, 1200.0, 10.0));
        assert!(off_screen.sanitized().is_none());
    }

    #[test]
    fn priority_serializes_uppercase() {
        let json = serde_json::to_string(&Priority::Medium).unwrap();
        assert_eq!(json, "\"MEDIUM\"");
    }
}
