//! Persistent contact identities across frames and trajectory accumulation.

pub mod assignment;

use std::fmt;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::model::{Frame, MAX_BLOBS, Point, Sample, Touch, TrackedGesture, Trajectories};

pub use assignment::AssignmentStrategy;

/// Receives synchronous notifications on the thread that calls [`BlobTracker::add_frame`].
pub trait TrackerObserver: Send {
    fn on_trajectories_changed(&mut self, _trajectories: &Trajectories) {}
    fn on_frame_tracked(&mut self, _previous: Option<&Frame>, _current: &Frame) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub strategy: AssignmentStrategy,
    pub max_blobs: usize,
    /// Largest jump accepted when bridging a one-frame dropout; unbounded if `None`.
    pub bridge_radius: Option<f32>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            strategy: AssignmentStrategy::Optimal,
            max_blobs: MAX_BLOBS,
            bridge_radius: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Tracking,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Tracked {
        /// Persistent id of every touch, in the frame's touch order.
        ids: Vec<u32>,
        new_ids: Vec<u32>,
        bridged_ids: Vec<u32>,
    },
    /// Frame carried more touches than the contact cap and was dropped.
    CapacityExceeded { touches: usize },
}

impl FrameOutcome {
    pub fn is_tracked(&self) -> bool {
        matches!(self, Self::Tracked { .. })
    }
}

struct Splice {
    id: u32,
    before: Touch,
    after: Touch,
}

pub struct BlobTracker {
    config: TrackerConfig,
    frames: Vec<Frame>,
    trajectories: Trajectories,
    next_id: u32,
    observers: Vec<Box<dyn TrackerObserver>>,
}

impl fmt::Debug for BlobTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobTracker")
            .field("config", &self.config)
            .field("frames", &self.frames.len())
            .field("trajectories", &self.trajectories.len())
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

impl Default for BlobTracker {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl BlobTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            frames: Vec::new(),
            trajectories: Trajectories::new(),
            next_id: 0,
            observers: Vec::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Applies a new configuration and starts over; observers are kept.
    pub fn reconfigure(&mut self, config: TrackerConfig) {
        self.config = config;
        self.initiate_tracking();
    }

    pub fn subscribe(&mut self, observer: Box<dyn TrackerObserver>) {
        self.observers.push(observer);
    }

    pub fn state(&self) -> TrackerState {
        if self.frames.is_empty() {
            TrackerState::Idle
        } else {
            TrackerState::Tracking
        }
    }

    pub fn initiate_tracking(&mut self) {
        self.frames.clear();
        self.trajectories.clear();
        self.next_id = 0;
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn trajectories(&self) -> &Trajectories {
        &self.trajectories
    }

    pub fn tracked_blobs(&self) -> TrackedGesture {
        TrackedGesture::from_parts(&self.trajectories, &self.frames)
    }

    pub fn add_frame(&mut self, frame: Frame) -> FrameOutcome {
        if frame.touches.len() > self.config.max_blobs {
            warn!(
                "dropping frame at {} ms: {} touches exceeds cap of {}",
                frame.timestamp_ms,
                frame.touches.len(),
                self.config.max_blobs
            );
            return FrameOutcome::CapacityExceeded {
                touches: frame.touches.len(),
            };
        }

        let mut incoming = frame;
        let received = incoming.touches.len();
        incoming
            .touches
            .retain(|t| t.x.is_finite() && t.y.is_finite());
        if incoming.touches.len() < received {
            warn!(
                "frame at {} ms: ignored {} touches with non-finite coordinates",
                incoming.timestamp_ms,
                received - incoming.touches.len()
            );
        }
        for (i, t) in incoming.touches.iter_mut().enumerate() {
            t.id = i as u32;
        }
        let positions: Vec<Point> = incoming.touches.iter().map(Touch::position).collect();
        let mut assigned: Vec<Option<u32>> = vec![None; incoming.len()];

        if let Some(prev) = self.frames.last().filter(|f| !f.is_empty()) {
            let prev_positions: Vec<Point> = prev.touches.iter().map(Touch::position).collect();
            for (i, j) in self.config.strategy.solve(&prev_positions, &positions, None) {
                assigned[j] = Some(prev.touches[i].id);
            }
        }

        let splices = self.bridge_occlusions(&incoming, &mut assigned);
        let bridged_ids: Vec<u32> = splices.iter().map(|s| s.id).collect();
        self.apply_splices(splices);

        let mut new_ids = Vec::new();
        for (touch, slot) in incoming.touches.iter_mut().zip(assigned) {
            touch.id = match slot {
                Some(id) => id,
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    new_ids.push(id);
                    id
                }
            };
        }

        for t in &incoming.touches {
            self.trajectories.entry(t.id).or_default().push(Sample {
                timestamp_ms: incoming.timestamp_ms,
                x: t.x,
                y: t.y,
                num: t.id,
            });
        }

        let ids: Vec<u32> = incoming.touches.iter().map(|t| t.id).collect();
        debug!(
            "tracked frame at {} ms: ids={ids:?} new={new_ids:?} bridged={bridged_ids:?}",
            incoming.timestamp_ms
        );
        self.frames.push(incoming);
        self.notify();

        FrameOutcome::Tracked {
            ids,
            new_ids,
            bridged_ids,
        }
    }

    /// Matches still unassigned touches against contacts that were present two
    /// frames ago but missing from the last frame.
    fn bridge_occlusions(&self, incoming: &Frame, assigned: &mut [Option<u32>]) -> Vec<Splice> {
        let n = self.frames.len();
        if n < 2 {
            return Vec::new();
        }
        let (before, gap) = (&self.frames[n - 2], &self.frames[n - 1]);

        let vanished: Vec<&Touch> = before
            .touches
            .iter()
            .filter(|t| !gap.contains(t.id) && !assigned.contains(&Some(t.id)))
            .collect();
        let open: Vec<usize> = (0..assigned.len()).filter(|&j| assigned[j].is_none()).collect();
        if vanished.is_empty() || open.is_empty() {
            return Vec::new();
        }

        let from: Vec<Point> = vanished.iter().map(|t| t.position()).collect();
        let to: Vec<Point> = open.iter().map(|&j| incoming.touches[j].position()).collect();
        self.config
            .strategy
            .solve(&from, &to, self.config.bridge_radius)
            .into_iter()
            .map(|(i, k)| {
                let j = open[k];
                let id = vanished[i].id;
                assigned[j] = Some(id);
                Splice {
                    id,
                    before: *vanished[i],
                    after: incoming.touches[j],
                }
            })
            .collect()
    }

    fn apply_splices(&mut self, splices: Vec<Splice>) {
        let Some(gap) = self.frames.last_mut() else {
            return;
        };
        for s in splices {
            let mid = s.before.position().midpoint(&s.after.position());
            gap.touches.push(Touch {
                id: s.id,
                x: mid.x,
                y: mid.y,
                dim_x: (s.before.dim_x + s.after.dim_x) * 0.5,
                dim_y: (s.before.dim_y + s.after.dim_y) * 0.5,
                intensity: (s.before.intensity + s.after.intensity) * 0.5,
            });
            self.trajectories.entry(s.id).or_default().push(Sample {
                timestamp_ms: gap.timestamp_ms,
                x: mid.x,
                y: mid.y,
                num: s.id,
            });
            debug!("bridged one-frame dropout of contact {}", s.id);
        }
    }

    fn notify(&mut self) {
        if self.observers.is_empty() {
            return;
        }
        let n = self.frames.len();
        let current = &self.frames[n - 1];
        let previous = n.checked_sub(2).map(|i| &self.frames[i]);
        for obs in self.observers.iter_mut() {
            obs.on_trajectories_changed(&self.trajectories);
            obs.on_frame_tracked(previous, current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn frame(ts: u64, pts: &[(f32, f32)]) -> Frame {
        Frame::new(
            ts,
            pts.iter()
                .enumerate()
                .map(|(i, &(x, y))| Touch::at(i as u32, x, y))
                .collect(),
        )
    }

    fn tracked_ids(outcome: FrameOutcome) -> Vec<u32> {
        match outcome {
            FrameOutcome::Tracked { ids, .. } => ids,
            other => panic!("expected tracked frame, got {other:?}"),
        }
    }

    #[test]
    fn first_frame_assigns_fresh_ids() {
        let mut t = BlobTracker::default();
        assert_eq!(t.state(), TrackerState::Idle);
        let ids = tracked_ids(t.add_frame(frame(0, &[(1.0, 1.0), (9.0, 9.0)])));
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(t.state(), TrackerState::Tracking);
    }

    #[test]
    fn far_jump_is_tracked_with_optimal_strategy() {
        let mut t = BlobTracker::default();
        t.add_frame(frame(0, &[(0.0, 0.0)]));
        let ids = tracked_ids(t.add_frame(frame(10, &[(3.0e19, 0.0)])));
        assert_eq!(ids, vec![0]);
        assert_eq!(t.trajectories()[&0].len(), 2);
    }

    #[test]
    fn non_finite_touches_are_ignored() {
        for strategy in [AssignmentStrategy::Optimal, AssignmentStrategy::Greedy] {
            let mut t = BlobTracker::new(TrackerConfig {
                strategy,
                ..TrackerConfig::default()
            });
            t.add_frame(frame(0, &[(10.0, 10.0)]));
            let ids = tracked_ids(t.add_frame(frame(10, &[(f32::NAN, 0.0), (11.0, 10.0), (f32::INFINITY, 1.0)])));
            assert_eq!(ids, vec![0], "{strategy:?}");
            assert_eq!(t.frames()[1].len(), 1);
        }
    }

    #[test]
    fn small_motion_keeps_identity() {
        let mut t = BlobTracker::default();
        t.add_frame(frame(0, &[(10.0, 10.0), (60.0, 10.0)]));
        // reversed order in the incoming frame must not swap identities
        let ids = tracked_ids(t.add_frame(frame(10, &[(62.0, 11.0), (12.0, 9.0)])));
        assert_eq!(ids, vec![1, 0]);
        assert_eq!(t.trajectories()[&0].len(), 2);
        assert_eq!(t.trajectories()[&0][1].position(), Point::new(12.0, 9.0));
    }

    #[test]
    fn incoming_ids_are_ignored() {
        let mut t = BlobTracker::default();
        let mut f = frame(0, &[(0.0, 0.0), (5.0, 5.0)]);
        f.touches[0].id = 40;
        f.touches[1].id = 40;
        assert_eq!(tracked_ids(t.add_frame(f)), vec![0, 1]);
    }

    #[test]
    fn new_contact_gets_next_id() {
        let mut t = BlobTracker::default();
        t.add_frame(frame(0, &[(0.0, 0.0)]));
        match t.add_frame(frame(10, &[(1.0, 0.0), (40.0, 40.0)])) {
            FrameOutcome::Tracked { ids, new_ids, .. } => {
                assert_eq!(ids, vec![0, 1]);
                assert_eq!(new_ids, vec![1]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn frame_over_cap_leaves_state_untouched() {
        let mut t = BlobTracker::default();
        t.add_frame(frame(0, &[(0.0, 0.0)]));
        let before = t.tracked_blobs();

        let crowd: Vec<(f32, f32)> = (0..=MAX_BLOBS).map(|i| (i as f32 * 5.0, 0.0)).collect();
        let outcome = t.add_frame(frame(10, &crowd));
        assert_eq!(
            outcome,
            FrameOutcome::CapacityExceeded {
                touches: MAX_BLOBS + 1
            }
        );
        assert_eq!(t.tracked_blobs(), before);

        // the counter did not move either
        let ids = tracked_ids(t.add_frame(frame(20, &[(0.0, 0.0), (90.0, 90.0)])));
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn frame_at_cap_is_tracked() {
        let mut t = BlobTracker::default();
        let crowd: Vec<(f32, f32)> = (0..MAX_BLOBS).map(|i| (i as f32 * 5.0, 0.0)).collect();
        assert!(t.add_frame(frame(0, &crowd)).is_tracked());
        assert_eq!(t.trajectories().len(), MAX_BLOBS);
    }

    #[test]
    fn single_frame_dropout_is_bridged() {
        let mut t = BlobTracker::default();
        t.add_frame(frame(0, &[(10.0, 10.0), (50.0, 50.0)]));
        t.add_frame(frame(10, &[(51.0, 50.0)]));
        match t.add_frame(frame(20, &[(14.0, 12.0), (52.0, 50.0)])) {
            FrameOutcome::Tracked {
                ids,
                new_ids,
                bridged_ids,
            } => {
                assert_eq!(ids, vec![0, 1]);
                assert!(new_ids.is_empty());
                assert_eq!(bridged_ids, vec![0]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let token = &t.trajectories()[&0];
        let stamps: Vec<u64> = token.iter().map(|s| s.timestamp_ms).collect();
        assert_eq!(stamps, vec![0, 10, 20]);
        assert_eq!(token[1].position(), Point::new(12.0, 11.0));

        let gap = &t.frames()[1];
        assert_eq!(gap.touch(0).map(|t| t.position()), Some(Point::new(12.0, 11.0)));
        assert_eq!(t.trajectories().len(), 2);
    }

    #[test]
    fn dropout_through_empty_frame_is_bridged() {
        let mut t = BlobTracker::default();
        t.add_frame(frame(0, &[(10.0, 10.0)]));
        t.add_frame(frame(10, &[]));
        let ids = tracked_ids(t.add_frame(frame(20, &[(11.0, 10.0)])));
        assert_eq!(ids, vec![0]);
        assert_eq!(t.trajectories().len(), 1);
        assert_eq!(t.trajectories()[&0].len(), 3);
    }

    #[test]
    fn two_frame_dropout_starts_new_trajectory() {
        let mut t = BlobTracker::default();
        t.add_frame(frame(0, &[(10.0, 10.0)]));
        t.add_frame(frame(10, &[]));
        t.add_frame(frame(20, &[]));
        assert_eq!(tracked_ids(t.add_frame(frame(30, &[(10.0, 10.0)]))), vec![1]);
    }

    #[test]
    fn bridge_radius_gates_far_reappearance() {
        let mut t = BlobTracker::new(TrackerConfig {
            bridge_radius: Some(5.0),
            ..TrackerConfig::default()
        });
        t.add_frame(frame(0, &[(10.0, 10.0)]));
        t.add_frame(frame(10, &[]));
        assert_eq!(tracked_ids(t.add_frame(frame(20, &[(80.0, 80.0)]))), vec![1]);
    }

    #[test]
    fn crossing_fingers_keep_their_identity() {
        for strategy in [AssignmentStrategy::Optimal, AssignmentStrategy::Greedy] {
            let mut t = BlobTracker::new(TrackerConfig {
                strategy,
                ..TrackerConfig::default()
            });
            for step in 0..5u32 {
                let k = step as f32 / 4.0;
                let a = (10.0 + 5.0 * k, 10.0 + 30.0 * k);
                let b = (50.0 - 5.0 * k, 50.0 - 30.0 * k);
                let pts = if step % 2 == 0 { [a, b] } else { [b, a] };
                t.add_frame(frame(u64::from(step) * 10, &pts));
            }
            let gesture = t.tracked_blobs();
            assert_eq!(gesture.tokens.len(), 2, "{strategy:?}");
            let end = |id: usize| gesture.tokens[id].samples.last().unwrap().position();
            assert_eq!(end(0), Point::new(15.0, 40.0), "{strategy:?}");
            assert_eq!(end(1), Point::new(45.0, 20.0), "{strategy:?}");
        }
    }

    #[test]
    fn initiate_tracking_resets_counter_and_history() {
        let mut t = BlobTracker::default();
        t.add_frame(frame(0, &[(0.0, 0.0), (30.0, 0.0)]));
        t.initiate_tracking();
        assert_eq!(t.state(), TrackerState::Idle);
        assert!(t.tracked_blobs().tokens.is_empty());
        assert_eq!(tracked_ids(t.add_frame(frame(0, &[(5.0, 5.0)]))), vec![0]);
    }

    #[test]
    fn tracked_blobs_does_not_clear() {
        let mut t = BlobTracker::default();
        t.add_frame(frame(0, &[(0.0, 0.0)]));
        let first = t.tracked_blobs();
        assert_eq!(first, t.tracked_blobs());
        assert_eq!(first.frames.len(), 1);
    }

    struct Counter(Arc<AtomicUsize>, Arc<AtomicUsize>);

    impl TrackerObserver for Counter {
        fn on_trajectories_changed(&mut self, _trajectories: &Trajectories) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn on_frame_tracked(&mut self, previous: Option<&Frame>, _current: &Frame) {
            if previous.is_some() {
                self.1.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn observers_are_notified_per_tracked_frame() {
        let changed = Arc::new(AtomicUsize::new(0));
        let with_prev = Arc::new(AtomicUsize::new(0));
        let mut t = BlobTracker::default();
        t.subscribe(Box::new(Counter(changed.clone(), with_prev.clone())));

        t.add_frame(frame(0, &[(0.0, 0.0)]));
        t.add_frame(frame(10, &[(1.0, 0.0)]));
        let crowd: Vec<(f32, f32)> = (0..=MAX_BLOBS).map(|i| (i as f32, 0.0)).collect();
        t.add_frame(frame(20, &crowd));

        assert_eq!(changed.load(Ordering::SeqCst), 2);
        assert_eq!(with_prev.load(Ordering::SeqCst), 1);
    }
}
