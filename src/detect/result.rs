use serde::{Deserialize, Serialize};

/// Which cascade tier produced a person count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    PrimaryDetector,
    ContourFallback,
    PixelFallback,
}

impl DetectionMethod {
    /// Highest confidence an estimate from this tier can reach.
    pub fn confidence_cap(self) -> f32 {
        match self {
            DetectionMethod::PrimaryDetector => 0.95,
            DetectionMethod::ContourFallback => 0.85,
            DetectionMethod::PixelFallback => 0.35,
        }
    }
}

/// Authoritative answer from one tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierEstimate {
    pub persons: u32,
    pub method: DetectionMethod,
}

/// Axis-aligned box in analysis-frame pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.w).min(other.x + other.w);
        let y2 = (self.y + self.h).min(other.y + other.h);

        let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }
}

/// Greedy non-maximum suppression over weighted boxes, strongest first.
pub fn non_max_suppression(
    mut boxes: Vec<(BoundingBox, f32)>,
    iou_threshold: f32,
) -> Vec<(BoundingBox, f32)> {
    boxes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let mut keep: Vec<(BoundingBox, f32)> = Vec::new();
    for candidate in boxes {
        if keep
            .iter()
            .all(|(kept, _)| kept.iou(&candidate.0) < iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, w, h }
    }

    #[test]
    fn iou_of_disjoint_and_identical_boxes() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&bbox(20.0, 20.0, 5.0, 5.0)), 0.0);
    }

    #[test]
    fn nms_keeps_strongest_of_overlapping_boxes() {
        let kept = non_max_suppression(
            vec![
                (bbox(0.0, 0.0, 10.0, 20.0), 0.6),
                (bbox(1.0, 0.0, 10.0, 20.0), 0.9),
                (bbox(50.0, 0.0, 10.0, 20.0), 0.7),
            ],
            0.45,
        );
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].1, 0.9);
        assert_eq!(kept[1].1, 0.7);
    }

    #[test]
    fn cruder_tiers_have_lower_caps() {
        assert!(
            DetectionMethod::PrimaryDetector.confidence_cap()
                > DetectionMethod::ContourFallback.confidence_cap()
        );
        assert!(
            DetectionMethod::ContourFallback.confidence_cap()
                > DetectionMethod::PixelFallback.confidence_cap()
        );
    }
}
