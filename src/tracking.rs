use serde::{Deserialize, Serialize};

use crate::{geometry_utils::centroid, Point2D};

/// An axis-aligned box in pixel coordinates, serialised as `[x1, y1, x2, y2]`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        let [x1, y1, x2, y2] = v;
        BoundingBox { x1, y1, x2, y2 }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        BoundingBox { x1, y1, x2, y2 }
    }

    pub fn centroid(&self) -> Point2D {
        centroid(&[(self.x1, self.y1), (self.x2, self.y2)]).unwrap_or((self.x1, self.y1))
    }

    /// Non-finite coordinates or inverted corners
    pub fn is_degenerate(&self) -> bool {
        let coords = [self.x1, self.y1, self.x2, self.y2];
        coords.iter().any(|c| !c.is_finite()) || self.x2 < self.x1 || self.y2 < self.y1
    }
}

/// One detection as supplied per frame by the tracker. The identity is
/// absent while the tracker has not (yet) assigned a track.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackedDetection {
    #[serde(rename = "id", default)]
    pub identity: Option<u64>,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub confidence: f32,
}

impl TrackedDetection {
    pub fn new(identity: Option<u64>, bbox: BoundingBox, confidence: f32) -> Self {
        TrackedDetection {
            identity,
            bbox,
            confidence,
        }
    }

    pub fn identity(&self) -> Option<u64> {
        self.identity
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TrackedFrame {
    pub frame: u64,
    #[serde(default)]
    pub detections: Vec<TrackedDetection>,
}
