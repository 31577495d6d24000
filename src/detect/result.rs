use serde::Serialize;

/// Class id the SSD label map assigns to people.
pub const PERSON_CLASS_ID: u32 = 0;

/// Raw detector output, laid out the way SSD-style models emit it.
#[derive(Clone, Debug, Default)]
pub struct RawDetections {
    /// Normalized `[ymin, xmin, ymax, xmax]` boxes.
    pub boxes: Vec<[f32; 4]>,
    /// Class ids as emitted by the model (floats in most exports).
    pub classes: Vec<f32>,
    /// Confidence scores in `0..=1`.
    pub scores: Vec<f32>,
    /// Number of valid leading entries reported by the model.
    pub num_detections: usize,
}

/// One entry of `RawDetections`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RawDetection {
    pub bbox: [f32; 4],
    pub class: f32,
    pub score: f32,
}

impl RawDetections {
    /// Valid entry count: `num_detections` clamped to the shortest array.
    pub fn len(&self) -> usize {
        self.num_detections
            .min(self.boxes.len())
            .min(self.classes.len())
            .min(self.scores.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = RawDetection> + '_ {
        (0..self.len()).map(move |i| RawDetection {
            bbox: self.boxes[i],
            class: self.classes[i],
            score: self.scores[i],
        })
    }

    pub fn push(&mut self, bbox: [f32; 4], class: f32, score: f32) {
        self.boxes.push(bbox);
        self.classes.push(class);
        self.scores.push(score);
        self.num_detections = self.boxes.len();
    }
}

impl RawDetection {
    /// Exact class match. Fractional ids never match.
    pub fn is_class(&self, class_id: u32) -> bool {
        self.class == class_id as f32
    }

    /// Convert the normalized box to pixel coordinates of a `width`x`height`
    /// frame. Coordinates truncate toward zero.
    pub fn to_pixels(&self, width: u32, height: u32, confidence: f32) -> Detection {
        let [ymin, xmin, ymax, xmax] = self.bbox;
        let w = width as f32;
        let h = height as f32;
        Detection {
            x1: (xmin * w) as i32,
            y1: (ymin * h) as i32,
            x2: (xmax * w) as i32,
            y2: (ymax * h) as i32,
            confidence,
        }
    }
}

/// A person box in pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
}

impl Detection {
    pub fn corners(&self) -> [i32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn len_clamps_to_shortest_array() {
        let raw = RawDetections {
            boxes: vec![[0.0; 4]; 3],
            classes: vec![0.0; 2],
            scores: vec![0.9; 3],
            num_detections: 10,
        };
        assert_eq!(raw.len(), 2);
        assert_eq!(raw.iter().count(), 2);
    }

    #[test]
    fn pixel_conversion_uses_yx_order() {
        let det = RawDetection {
            bbox: [0.1, 0.25, 0.5, 0.75],
            class: 0.0,
            score: 0.9,
        };
        let px = det.to_pixels(640, 480, det.score);
        assert_eq!(px.corners(), [160, 48, 480, 240]);
    }

    #[test]
    fn class_match_ignores_garbage() {
        let mut det = RawDetection {
            bbox: [0.0; 4],
            class: f32::NAN,
            score: 0.9,
        };
        assert!(!det.is_class(PERSON_CLASS_ID));
        det.class = 0.0;
        assert!(det.is_class(PERSON_CLASS_ID));
        det.class = 1.0;
        assert!(!det.is_class(PERSON_CLASS_ID));
        det.class = 0.7;
        assert!(!det.is_class(PERSON_CLASS_ID));
        det.class = 0.99;
        assert!(!det.is_class(PERSON_CLASS_ID));
        det.class = -0.0;
        assert!(det.is_class(PERSON_CLASS_ID));
    }
}
