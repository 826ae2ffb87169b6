//! Taps, swipes and pinches from finger count, centroid motion and spread.

use serde::{Deserialize, Serialize};

use crate::classifier::Classifier;
use crate::model::{ClassificationResult, Point, Sample, TrackedGesture, Trajectories};

/// Extent of the sensor surface; thresholds are fractions of it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Surface {
    pub width: f32,
    pub height: f32,
}

impl Default for Surface {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeThresholds {
    pub tap_ms: u64,
    pub move_tol: f32,
    pub swipe_min_dist: f32,
    pub swipe_max_ms: u64,
    pub pinch_step: f32,
}

impl Default for StrokeThresholds {
    fn default() -> Self {
        Self {
            tap_ms: 220,
            move_tol: 0.03,
            swipe_min_dist: 0.12,
            swipe_max_ms: 600,
            pinch_step: 0.06,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Stroke {
    Tap,
    Swipe(&'static str),
    Pinch(&'static str),
}

#[derive(Debug, Clone)]
struct Motion {
    fingers: usize,
    start_centroid: Point,
    end_centroid: Point,
    start_span: f32,
    end_span: f32,
    max_travel: f32,
    duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct StrokeClassifier {
    th: StrokeThresholds,
    surface: Surface,
}

impl StrokeClassifier {
    pub fn new(th: StrokeThresholds, surface: Surface) -> Self {
        Self { th, surface }
    }

    fn normalize(&self, s: &Sample) -> Point {
        Point::new(
            s.x / self.surface.width.max(f32::EPSILON),
            s.y / self.surface.height.max(f32::EPSILON),
        )
    }

    fn motion(&self, tokens: &[&[Sample]], fingers: usize) -> Option<Motion> {
        let tokens: Vec<&[Sample]> = tokens.iter().copied().filter(|t| !t.is_empty()).collect();
        if tokens.is_empty() {
            return None;
        }
        let starts: Vec<Point> = tokens.iter().map(|t| self.normalize(&t[0])).collect();
        let ends: Vec<Point> = tokens
            .iter()
            .map(|t| self.normalize(&t[t.len() - 1]))
            .collect();
        let (start_centroid, end_centroid) = (centroid(&starts), centroid(&ends));

        let max_travel = tokens
            .iter()
            .map(|t| {
                t.windows(2)
                    .map(|w| self.normalize(&w[0]).distance(&self.normalize(&w[1])))
                    .sum::<f32>()
            })
            .fold(0.0, f32::max);

        let first = tokens.iter().map(|t| t[0].timestamp_ms).min().unwrap_or(0);
        let last = tokens
            .iter()
            .map(|t| t[t.len() - 1].timestamp_ms)
            .max()
            .unwrap_or(0);

        Some(Motion {
            fingers,
            start_span: span(&starts, start_centroid),
            end_span: span(&ends, end_centroid),
            start_centroid,
            end_centroid,
            max_travel,
            duration_ms: last.saturating_sub(first),
        })
    }

    /// Swipe before pinch before tap, the same precedence a live detector uses.
    fn stroke(&self, m: &Motion, allow_tap: bool) -> Option<(Stroke, f32)> {
        let dx = m.end_centroid.x - m.start_centroid.x;
        let dy = m.end_centroid.y - m.start_centroid.y;
        let (ax, ay) = (dx.abs(), dy.abs());

        if m.duration_ms <= self.th.swipe_max_ms {
            let dist = ax.max(ay);
            if dist >= self.th.swipe_min_dist {
                let dir = if ax >= ay {
                    if dx > 0.0 { "swipe_right" } else { "swipe_left" }
                } else if dy > 0.0 {
                    "swipe_down"
                } else {
                    "swipe_up"
                };
                return Some((Stroke::Swipe(dir), confidence(dist, self.th.swipe_min_dist)));
            }
        }

        if m.fingers >= 2 {
            let dspan = m.end_span - m.start_span;
            if dspan.abs() >= self.th.pinch_step {
                let dir = if dspan < 0.0 { "scale_in" } else { "scale_out" };
                return Some((Stroke::Pinch(dir), confidence(dspan.abs(), self.th.pinch_step)));
            }
        }

        if allow_tap && m.duration_ms <= self.th.tap_ms && m.max_travel <= self.th.move_tol {
            let slack = if self.th.move_tol > 0.0 {
                m.max_travel / self.th.move_tol
            } else {
                0.0
            };
            return Some((Stroke::Tap, 1.0 - 0.5 * slack));
        }
        None
    }

    fn label(stroke: Stroke, fingers: usize) -> Option<String> {
        match stroke {
            Stroke::Pinch(dir) => Some(format!("pinch.{dir}")),
            Stroke::Tap => finger_prefix(fingers).map(|p| format!("{p}.tap")),
            Stroke::Swipe(dir) => finger_prefix(fingers).map(|p| format!("{p}.{dir}")),
        }
    }
}

impl Classifier for StrokeClassifier {
    fn name(&self) -> &str {
        "strokes"
    }

    fn classify(&self, gesture: &TrackedGesture) -> Option<ClassificationResult> {
        let tokens: Vec<&[Sample]> = gesture.tokens.iter().map(|t| t.samples.as_slice()).collect();
        let fingers = gesture
            .frames
            .iter()
            .map(|f| f.len())
            .max()
            .unwrap_or(tokens.len());
        let m = self.motion(&tokens, fingers)?;
        let (stroke, probability) = self.stroke(&m, true)?;
        let name = Self::label(stroke, m.fingers)?;
        Some(
            ClassificationResult::new(name, probability)
                .with_nodes(vec![m.start_centroid, m.end_centroid])
                .with_parameter(serde_json::json!({
                    "fingers": m.fingers,
                    "duration_ms": m.duration_ms,
                })),
        )
    }

    fn notify_on_input(&mut self, trajectories: &Trajectories) -> String {
        let tokens: Vec<&[Sample]> = trajectories.values().map(Vec::as_slice).collect();
        let Some(m) = self.motion(&tokens, tokens.len()) else {
            return String::new();
        };
        self.stroke(&m, false)
            .and_then(|(stroke, _)| Self::label(stroke, m.fingers))
            .or_else(|| finger_prefix(m.fingers).map(str::to_string))
            .unwrap_or_default()
    }
}

fn finger_prefix(fingers: usize) -> Option<&'static str> {
    match fingers {
        1 => Some("one_finger"),
        2 => Some("two_finger"),
        3 => Some("three_finger"),
        _ => None,
    }
}

fn confidence(value: f32, threshold: f32) -> f32 {
    if threshold <= 0.0 {
        return 1.0;
    }
    (value / threshold).min(2.0) / 2.0
}

fn centroid(points: &[Point]) -> Point {
    let n = points.len().max(1) as f32;
    let (sx, sy) = points.iter().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

/// Mean distance from the centroid.
fn span(points: &[Point], c: Point) -> f32 {
    let n = points.len().max(1) as f32;
    points.iter().map(|p| p.distance(&c)).sum::<f32>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Frame, GestureToken, Touch};

    /// Linear strokes: each finger goes from `from` to `to` over `steps` frames.
    fn strokes(fingers: &[((f32, f32), (f32, f32))], steps: u32, dt_ms: u64) -> TrackedGesture {
        let mut tokens: Vec<GestureToken> = (0..fingers.len())
            .map(|i| GestureToken {
                id: i as u32,
                samples: Vec::new(),
            })
            .collect();
        let mut frames = Vec::new();
        for s in 0..steps {
            let k = if steps > 1 { s as f32 / (steps - 1) as f32 } else { 0.0 };
            let ts = u64::from(s) * dt_ms;
            let mut touches = Vec::new();
            for (i, &((x0, y0), (x1, y1))) in fingers.iter().enumerate() {
                let (x, y) = (x0 + (x1 - x0) * k, y0 + (y1 - y0) * k);
                tokens[i].samples.push(Sample {
                    timestamp_ms: ts,
                    x,
                    y,
                    num: i as u32,
                });
                touches.push(Touch::at(i as u32, x, y));
            }
            frames.push(Frame::new(ts, touches));
        }
        TrackedGesture { tokens, frames }
    }

    fn classifier() -> StrokeClassifier {
        StrokeClassifier::new(StrokeThresholds::default(), Surface { width: 100.0, height: 100.0 })
    }

    #[test]
    fn two_finger_swipe_right() {
        let g = strokes(&[((10.0, 40.0), (50.0, 40.0)), ((10.0, 60.0), (50.0, 60.0))], 6, 20);
        let r = classifier().classify(&g).unwrap();
        assert_eq!(r.name, "two_finger.swipe_right");
        assert!(r.probability > 0.5 && r.probability <= 1.0);
        assert_eq!(r.node_parameters.len(), 2);
    }

    #[test]
    fn one_finger_swipe_up() {
        let g = strokes(&[((50.0, 80.0), (52.0, 20.0))], 5, 20);
        assert_eq!(classifier().classify(&g).unwrap().name, "one_finger.swipe_up");
    }

    #[test]
    fn pinch_in_and_out() {
        let inward = strokes(&[((20.0, 50.0), (40.0, 50.0)), ((80.0, 50.0), (60.0, 50.0))], 5, 20);
        assert_eq!(classifier().classify(&inward).unwrap().name, "pinch.scale_in");

        let outward = strokes(&[((40.0, 50.0), (20.0, 50.0)), ((60.0, 50.0), (80.0, 50.0))], 5, 20);
        assert_eq!(classifier().classify(&outward).unwrap().name, "pinch.scale_out");
    }

    #[test]
    fn quick_still_contacts_are_taps() {
        let g = strokes(&[((30.0, 30.0), (30.5, 30.0)), ((40.0, 30.0), (40.0, 30.5)), ((50.0, 30.0), (50.0, 30.0))], 4, 30);
        assert_eq!(classifier().classify(&g).unwrap().name, "three_finger.tap");
    }

    #[test]
    fn slow_small_motion_is_unrecognized() {
        let g = strokes(&[((30.0, 30.0), (35.0, 30.0))], 10, 200);
        assert!(classifier().classify(&g).is_none());
    }

    #[test]
    fn empty_gesture_is_unrecognized() {
        assert!(classifier().classify(&TrackedGesture::default()).is_none());
    }

    #[test]
    fn live_hint_reports_finger_count_then_swipe() {
        let mut c = classifier();
        let mut traj = Trajectories::new();
        traj.insert(0, vec![Sample { timestamp_ms: 0, x: 10.0, y: 50.0, num: 0 }]);
        traj.insert(1, vec![Sample { timestamp_ms: 0, x: 10.0, y: 70.0, num: 1 }]);
        assert_eq!(c.notify_on_input(&traj), "two_finger");

        traj.get_mut(&0).unwrap().push(Sample { timestamp_ms: 40, x: 40.0, y: 50.0, num: 0 });
        traj.get_mut(&1).unwrap().push(Sample { timestamp_ms: 40, x: 40.0, y: 70.0, num: 1 });
        assert_eq!(c.notify_on_input(&traj), "two_finger.swipe_right");
    }
}
