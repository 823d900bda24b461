//! Loop frames
//!
//! A frame is created the first time control reaches a loop start and
//! destroyed when the loop exits. Frames are keyed by the loop-start index,
//! so two loops that reuse the same `loop_id` (nested or not) never share a
//! counter.

use std::collections::BTreeMap;
use tracing::debug;

use crate::program::LoopBounds;

/// Progress of one active loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopKind {
    Count { current: i64, total: i64 },
    While,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopFrame {
    pub loop_id: String,
    pub kind: LoopKind,
    pub start_index: usize,
    pub end_index: usize,
}

/// What the interpreter does after visiting a loop step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTransition {
    /// Continue with the next step (into the body, or past the loop end)
    FallThrough,
    /// Leave the loop: continue after `end_index`
    Exit { end_index: usize },
    /// Go back and execute the loop start again
    Repeat { start_index: usize },
}

/// Active loop frames for one run
#[derive(Debug, Default)]
pub struct LoopController {
    frames: BTreeMap<usize, LoopFrame>,
}

impl LoopController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit a count loop start
    ///
    /// `total` is only consulted when the frame is created; negative totals
    /// run the body zero times.
    pub fn visit_count(&mut self, bounds: &LoopBounds, total: impl FnOnce() -> i64) -> LoopTransition {
        let frame = self.frames.entry(bounds.start_index).or_insert_with(|| LoopFrame {
            loop_id: bounds.label.clone(),
            kind: LoopKind::Count {
                current: 0,
                total: total().max(0),
            },
            start_index: bounds.start_index,
            end_index: bounds.end_index,
        });

        let advanced = match &mut frame.kind {
            LoopKind::Count { current, total } if *current < *total => {
                *current += 1;
                debug!("Loop {}: iteration {}/{}", frame.loop_id, current, total);
                true
            }
            _ => false,
        };

        if advanced {
            LoopTransition::FallThrough
        } else {
            self.exit(bounds)
        }
    }

    /// Visit a while loop start with the freshly evaluated predicate
    pub fn visit_while(&mut self, bounds: &LoopBounds, holds: bool) -> LoopTransition {
        self.frames.entry(bounds.start_index).or_insert_with(|| LoopFrame {
            loop_id: bounds.label.clone(),
            kind: LoopKind::While,
            start_index: bounds.start_index,
            end_index: bounds.end_index,
        });

        if holds {
            debug!("Loop {}: condition holds", bounds.label);
            LoopTransition::FallThrough
        } else {
            self.exit(bounds)
        }
    }

    /// Visit the end of the loop that starts at `start_index`
    pub fn visit_end(&mut self, start_index: usize) -> LoopTransition {
        let Some(frame) = self.frames.get(&start_index) else {
            return LoopTransition::FallThrough;
        };

        match frame.kind {
            LoopKind::Count { current, total } if current >= total => {
                debug!("Loop {} finished after {} iterations", frame.loop_id, total);
                self.frames.remove(&start_index);
                LoopTransition::FallThrough
            }
            _ => LoopTransition::Repeat { start_index },
        }
    }

    /// Leave a loop whose count could not be determined
    pub fn abandon(&mut self, bounds: &LoopBounds) -> LoopTransition {
        self.exit(bounds)
    }

    fn exit(&mut self, bounds: &LoopBounds) -> LoopTransition {
        self.frames.remove(&bounds.start_index);
        debug!("Loop {} exited", bounds.label);
        LoopTransition::Exit {
            end_index: bounds.end_index,
        }
    }

    /// Frame of the loop starting at `start_index`, if active
    pub fn frame(&self, start_index: usize) -> Option<&LoopFrame> {
        self.frames.get(&start_index)
    }

    /// Active frames, outermost first
    pub fn active_frames(&self) -> impl Iterator<Item = &LoopFrame> {
        self.frames.values()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(start: usize, end: usize) -> LoopBounds {
        LoopBounds {
            label: format!("loop_{}", start),
            start_index: start,
            end_index: end,
        }
    }

    #[test]
    fn test_count_loop_runs_body_n_times() {
        let mut loops = LoopController::new();
        let b = bounds(0, 2);
        let mut bodies = 0;

        loop {
            match loops.visit_count(&b, || 3) {
                LoopTransition::FallThrough => bodies += 1,
                LoopTransition::Exit { end_index } => {
                    assert_eq!(end_index, 2);
                    break;
                }
                other => panic!("unexpected {:?}", other),
            }
            match loops.visit_end(0) {
                LoopTransition::Repeat { start_index } => assert_eq!(start_index, 0),
                LoopTransition::FallThrough => break,
                other => panic!("unexpected {:?}", other),
            }
        }

        assert_eq!(bodies, 3);
        assert!(loops.frame(0).is_none());
    }

    #[test]
    fn test_zero_and_negative_counts_skip_body() {
        let mut loops = LoopController::new();
        assert_eq!(
            loops.visit_count(&bounds(1, 4), || 0),
            LoopTransition::Exit { end_index: 4 }
        );
        assert_eq!(
            loops.visit_count(&bounds(1, 4), || -5),
            LoopTransition::Exit { end_index: 4 }
        );
        assert_eq!(loops.active_frames().count(), 0);
    }

    #[test]
    fn test_total_read_once() {
        let mut loops = LoopController::new();
        let b = bounds(0, 1);
        loops.visit_count(&b, || 2);
        loops.visit_count(&b, || panic!("total re-read"));
        assert_eq!(
            loops.frame(0).unwrap().kind,
            LoopKind::Count {
                current: 2,
                total: 2
            }
        );
    }

    #[test]
    fn test_while_loop() {
        let mut loops = LoopController::new();
        let b = bounds(2, 5);

        assert_eq!(loops.visit_while(&b, true), LoopTransition::FallThrough);
        assert_eq!(loops.visit_end(2), LoopTransition::Repeat { start_index: 2 });
        assert_eq!(loops.visit_while(&b, false), LoopTransition::Exit { end_index: 5 });
        assert_eq!(loops.visit_end(2), LoopTransition::FallThrough);
    }

    #[test]
    fn test_frames_keyed_by_start_index() {
        let mut loops = LoopController::new();
        let outer = LoopBounds {
            label: "l".to_string(),
            start_index: 0,
            end_index: 4,
        };
        let inner = LoopBounds {
            label: "l".to_string(),
            start_index: 1,
            end_index: 3,
        };

        loops.visit_count(&outer, || 2);
        loops.visit_count(&inner, || 5);
        assert_eq!(loops.active_frames().count(), 2);
        assert_eq!(
            loops.frame(0).unwrap().kind,
            LoopKind::Count {
                current: 1,
                total: 2
            }
        );
    }
}
