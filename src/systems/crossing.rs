use std::collections::HashMap;

use indexmap::IndexSet;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    geometry_utils::{axis_value, fraction_to_pixel},
    tracking::TrackedDetection,
    Point2D,
};

pub const DEFAULT_LINE_FRACTION: f32 = 0.5;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LineOrientation {
    /// Objects moving left-to-right (or back), compared on x
    Vertical,
    /// Objects moving top-to-bottom (or back), compared on y
    Horizontal,
}

impl LineOrientation {
    pub fn name(&self) -> &'static str {
        match self {
            LineOrientation::Vertical => "vertical",
            LineOrientation::Horizontal => "horizontal",
        }
    }
}

/// The virtual line that objects are counted against; fixed for one run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct CountingLine {
    pub orientation: LineOrientation,
    /// Absolute pixel coordinate (x for vertical, y for horizontal)
    pub position: f32,
    /// The frame fraction this line was placed at, if any
    pub fraction: Option<f32>,
}

impl CountingLine {
    pub fn vertical(x: f32) -> Self {
        CountingLine {
            orientation: LineOrientation::Vertical,
            position: x,
            fraction: None,
        }
    }

    pub fn horizontal(y: f32) -> Self {
        CountingLine {
            orientation: LineOrientation::Horizontal,
            position: y,
            fraction: None,
        }
    }

    /// Place the line from optional fractions of the frame. With neither
    /// given, falls back to a vertical line through the middle of the frame;
    /// with both, the vertical line wins.
    pub fn from_fractions(
        vline: Option<f32>,
        hline: Option<f32>,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let (orientation, fraction) = match (vline, hline) {
            (Some(v), Some(_)) => {
                warn!("Both vertical and horizontal lines given; using vertical at {v}");
                (LineOrientation::Vertical, v)
            }
            (Some(v), None) => (LineOrientation::Vertical, v),
            (None, Some(h)) => (LineOrientation::Horizontal, h),
            (None, None) => (LineOrientation::Vertical, DEFAULT_LINE_FRACTION),
        };
        let position = match orientation {
            LineOrientation::Vertical => fraction_to_pixel(fraction, frame_width),
            LineOrientation::Horizontal => fraction_to_pixel(fraction, frame_height),
        };
        CountingLine {
            orientation,
            position,
            fraction: Some(fraction),
        }
    }

    /// Coordinate of a point along the axis perpendicular to the line
    pub fn project(&self, p: &Point2D) -> f32 {
        axis_value(p, self.orientation == LineOrientation::Vertical)
    }

    /// True if moving from `previous` to `current` reaches or passes the
    /// line; landing exactly on the line counts as crossed.
    pub fn is_crossed(&self, previous: f32, current: f32) -> bool {
        let l = self.position;
        (previous < l && l <= current) || (previous > l && l >= current)
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct DetectionMark {
    pub identity: Option<u64>,
    pub centroid: Point2D,
    pub confidence: f32,
    /// Identity has been counted at some point (this frame or earlier)
    pub counted: bool,
    /// Identity crossed on this frame
    pub crossed_now: bool,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct FrameOutcome {
    /// New crossings on this frame, at most one per identity
    pub increment: usize,
    /// Running total after this frame
    pub total: usize,
    pub marks: Vec<DetectionMark>,
}

impl FrameOutcome {
    pub fn crossing_fired(&self) -> bool {
        self.increment > 0
    }
}

/// Counts tracked identities crossing a [`CountingLine`]. Frames must be fed
/// in order; each identity contributes at most one count per run.
pub struct CrossingCounter {
    line: CountingLine,
    counted_identities: IndexSet<u64>,
    previous_position: HashMap<u64, f32>,
    total: usize,
    frames_processed: u64,
}

impl CrossingCounter {
    pub fn new(line: CountingLine) -> Self {
        CrossingCounter {
            line,
            counted_identities: IndexSet::new(),
            previous_position: HashMap::new(),
            total: 0,
            frames_processed: 0,
        }
    }

    pub fn process_frame(&mut self, detections: &[TrackedDetection]) -> FrameOutcome {
        self.frames_processed += 1;
        let mut increment = 0;
        let mut marks = Vec::with_capacity(detections.len());

        for detection in detections {
            let centroid = detection.bbox.centroid();
            let mut crossed_now = false;

            let identity = match detection.identity() {
                Some(id) if !detection.bbox.is_degenerate() => Some(id),
                Some(id) => {
                    debug!("Degenerate box for identity {id}; display only");
                    None
                }
                None => None,
            };

            if let Some(id) = identity {
                let current = self.line.project(&centroid);
                if let Some(&previous) = self.previous_position.get(&id) {
                    if self.line.is_crossed(previous, current)
                        && !self.counted_identities.contains(&id)
                    {
                        self.counted_identities.insert(id);
                        self.total += 1;
                        increment += 1;
                        crossed_now = true;
                        info!(
                            "Frame {}: identity {} crossed line - count: {}",
                            self.frames_processed, id, self.total
                        );
                    }
                }
                self.previous_position.insert(id, current);
            }

            marks.push(DetectionMark {
                identity: detection.identity(),
                centroid,
                confidence: detection.confidence,
                counted: identity.is_some_and(|id| self.counted_identities.contains(&id)),
                crossed_now,
            });
        }

        FrameOutcome {
            increment,
            total: self.total,
            marks,
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn line(&self) -> &CountingLine {
        &self.line
    }

    pub fn is_counted(&self, identity: u64) -> bool {
        self.counted_identities.contains(&identity)
    }

    /// Identities in the order they were counted
    pub fn counted_identities(&self) -> impl Iterator<Item = &u64> {
        self.counted_identities.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::BoundingBox;

    /// A 10x10 box centred on (cx, cy)
    fn at(identity: Option<u64>, cx: f32, cy: f32) -> TrackedDetection {
        TrackedDetection::new(
            identity,
            BoundingBox::new(cx - 5., cy - 5., cx + 5., cy + 5.),
            0.9,
        )
    }

    fn run(counter: &mut CrossingCounter, id: u64, xs: &[f32]) -> usize {
        xs.iter()
            .map(|x| counter.process_frame(&[at(Some(id), *x, 100.)]).increment)
            .sum()
    }

    #[test]
    fn test_crossing_either_direction_counts_once() {
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        assert_eq!(run(&mut counter, 1, &[40., 60.]), 1);
        assert_eq!(counter.total(), 1);

        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        assert_eq!(run(&mut counter, 1, &[60., 40.]), 1);
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn test_approach_without_crossing_never_counts() {
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        assert_eq!(run(&mut counter, 3, &[40., 45., 49.]), 0);
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_landing_on_line_counts_but_leaving_it_does_not() {
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        assert_eq!(run(&mut counter, 1, &[40., 50.]), 1);

        // Starting exactly on the line and moving away is not a crossing
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        assert_eq!(run(&mut counter, 2, &[50., 60.]), 0);
    }

    #[test]
    fn test_single_frame_appearance_never_counts() {
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        let outcome = counter.process_frame(&[at(Some(9), 60., 0.)]);
        assert_eq!(outcome.increment, 0);
        assert!(!outcome.crossing_fired());
        assert_eq!(counter.total(), 0);
    }

    #[test]
    fn test_identity_counts_at_most_once() {
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        assert_eq!(run(&mut counter, 4, &[40., 60., 40., 60., 40.]), 1);
        assert_eq!(counter.total(), 1);
        assert!(counter.is_counted(4));
    }

    #[test]
    fn test_replaying_crossing_frame_is_idempotent() {
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        let before = [at(Some(1), 40., 0.)];
        let after = [at(Some(1), 60., 0.)];

        counter.process_frame(&before);
        counter.process_frame(&after);
        let once = counter.total();

        counter.process_frame(&after);
        counter.process_frame(&before);
        counter.process_frame(&after);
        assert_eq!(counter.total(), once);
        assert_eq!(once, 1);
    }

    #[test]
    fn test_detections_without_identity_are_display_only() {
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        counter.process_frame(&[at(None, 40., 0.)]);
        let outcome = counter.process_frame(&[at(None, 60., 0.)]);
        assert_eq!(outcome.total, 0);
        assert_eq!(outcome.marks.len(), 1);
        assert_eq!(outcome.marks[0].identity, None);
        assert!(!outcome.marks[0].counted);
    }

    #[test]
    fn test_degenerate_box_does_not_update_history() {
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        counter.process_frame(&[at(Some(1), 40., 0.)]);
        let broken = TrackedDetection::new(Some(1), BoundingBox::new(70., 0., 60., 10.), 0.9);
        assert_eq!(counter.process_frame(&[broken]).increment, 0);
        assert_eq!(counter.process_frame(&[at(Some(1), 45., 0.)]).increment, 0);
        assert_eq!(counter.process_frame(&[at(Some(1), 55., 0.)]).increment, 1);
    }

    #[test]
    fn test_horizontal_line_uses_y() {
        let mut counter = CrossingCounter::new(CountingLine::horizontal(100.));
        counter.process_frame(&[at(Some(1), 500., 80.)]);
        assert_eq!(counter.process_frame(&[at(Some(1), 10., 90.)]).increment, 0);
        let outcome = counter.process_frame(&[at(Some(1), 900., 120.)]);
        assert_eq!(outcome.increment, 1);
        assert!(outcome.marks[0].crossed_now);
        assert!(outcome.marks[0].counted);
    }

    #[test]
    fn test_multiple_identities_in_one_frame() {
        let mut counter = CrossingCounter::new(CountingLine::vertical(50.));
        counter.process_frame(&[at(Some(1), 40., 0.), at(Some(2), 70., 0.), at(Some(3), 10., 0.)]);
        let outcome =
            counter.process_frame(&[at(Some(1), 60., 0.), at(Some(2), 30., 0.), at(Some(3), 20., 0.)]);
        assert_eq!(outcome.increment, 2);
        assert_eq!(outcome.total, 2);
        assert_eq!(counter.counted_identities().copied().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_line_from_fractions() {
        let line = CountingLine::from_fractions(None, None, 1920, 1080);
        assert_eq!(line.orientation, LineOrientation::Vertical);
        assert_eq!(line.position, 960.);

        let line = CountingLine::from_fractions(None, Some(0.25), 1920, 1080);
        assert_eq!(line.orientation, LineOrientation::Horizontal);
        assert_eq!(line.position, 270.);
        assert_eq!(line.fraction, Some(0.25));

        let line = CountingLine::from_fractions(Some(0.75), Some(0.25), 1920, 1080);
        assert_eq!(line.orientation, LineOrientation::Vertical);
        assert_eq!(line.position, 1440.);
    }
}
