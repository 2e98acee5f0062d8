//! Normalized bounding boxes in fractional image coordinates.

use serde::{Deserialize, Serialize};

/// Rectangle in fractional image coordinates: each field in [0,1],
/// `x + width <= 1`, `y + height <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedBox {
    /// Build a box, clamping coordinates into the unit square. Returns None
    /// for boxes with no area after clamping.
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Option<Self> {
        let x = x.clamp(0.0, 1.0);
        let y = y.clamp(0.0, 1.0);
        let width = width.clamp(0.0, 1.0 - x);
        let height = height.clamp(0.0, 1.0 - y);
        if width <= 0.0 || height <= 0.0 {
            return None;
        }
        Some(Self { x, y, width, height })
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection area with another box.
    pub fn intersection(&self, other: &Self) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);
        (x2 - x1).max(0.0) * (y2 - y1).max(0.0)
    }

    /// Intersection over Union, used to spot duplicate detections of the
    /// same physical object.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection = self.intersection(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Fraction of this box covered by another box.
    pub fn overlap_fraction(&self, other: &Self) -> f32 {
        let area = self.area();
        if area > 0.0 {
            self.intersection(other) / area
        } else {
            0.0
        }
    }

    /// True when any edge of the box lies within `margin` of the frame edge,
    /// suggesting the object continues outside the photo.
    pub fn near_frame_edge(&self, margin: f32) -> bool {
        self.x <= margin
            || self.y <= margin
            || self.x + self.width >= 1.0 - margin
            || self.y + self.height >= 1.0 - margin
    }

    /// Convert to pixel coordinates for a given image size.
    pub fn to_pixels(&self, img_width: u32, img_height: u32) -> (u32, u32, u32, u32) {
        let x = (self.x * img_width as f32) as u32;
        let y = (self.y * img_height as f32) as u32;
        let w = ((self.width * img_width as f32) as u32).max(1);
        let h = ((self.height * img_height as f32) as u32).max(1);
        (x.min(img_width - 1), y.min(img_height - 1), w, h)
    }
}
