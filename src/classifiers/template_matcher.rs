//! Nearest-template matching over resampled, normalized trajectories.

use log::debug;

use crate::classifier::{Capabilities, Classifier};
use crate::model::{
    ClassificationResult, GestureClass, GestureTemplate, Point, TrackedGesture, Trajectories,
};
use crate::tracker::assignment::optimal_assignment;

const RESAMPLE_POINTS: usize = 32;
/// Mean normalized point distance at which probability reaches zero.
const MATCH_SCALE: f32 = 0.5;

#[derive(Debug, Clone)]
struct Prepared {
    class_name: String,
    template_number: Option<u32>,
    tokens: Vec<Vec<Point>>,
}

#[derive(Debug, Clone)]
pub struct TemplateMatcher {
    min_probability: f32,
    templates: Vec<Prepared>,
}

impl TemplateMatcher {
    pub fn new(min_probability: f32) -> Self {
        Self {
            min_probability: min_probability.clamp(0.0, 1.0),
            templates: Vec::new(),
        }
    }

    pub fn template_count(&self) -> usize {
        self.templates.len()
    }

    fn prepare(template: &GestureTemplate) -> Prepared {
        let tokens: Vec<Vec<Point>> = template
            .gesture
            .tokens
            .iter()
            .map(|t| t.samples.iter().map(|s| s.position()).collect())
            .collect();
        Prepared {
            class_name: template.class_name.clone(),
            template_number: template.template_number,
            tokens: shape(tokens),
        }
    }

    /// Best template for `candidate` as `(template, mean distance)`.
    fn best_match(&self, candidate: &[Vec<Point>]) -> Option<(&Prepared, f32)> {
        if candidate.is_empty() {
            return None;
        }
        self.templates
            .iter()
            .filter(|t| t.tokens.len() == candidate.len())
            .map(|t| (t, gesture_distance(candidate, &t.tokens)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }
}

impl Classifier for TemplateMatcher {
    fn name(&self) -> &str {
        "templates"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::CLASSIFY_AND_MANAGE_TEMPLATES
    }

    fn classify(&self, gesture: &TrackedGesture) -> Option<ClassificationResult> {
        let candidate = shape(
            gesture
                .tokens
                .iter()
                .map(|t| t.samples.iter().map(|s| s.position()).collect())
                .collect(),
        );
        let (best, distance) = self.best_match(&candidate)?;
        let probability = 1.0 - distance / MATCH_SCALE;
        debug!(
            "best template '{}' #{:?}: distance {distance:.3}",
            best.class_name, best.template_number
        );
        if probability < self.min_probability {
            return None;
        }
        Some(
            ClassificationResult::new(best.class_name.clone(), probability).with_parameter(
                serde_json::json!({
                    "template_number": best.template_number,
                    "distance": distance,
                }),
            ),
        )
    }

    fn notify_on_input(&mut self, trajectories: &Trajectories) -> String {
        let candidate = shape(
            trajectories
                .values()
                .map(|samples| samples.iter().map(|s| s.position()).collect())
                .collect(),
        );
        self.best_match(&candidate)
            .map(|(t, _)| t.class_name.clone())
            .unwrap_or_default()
    }

    fn load_templates(&mut self, classes: &[GestureClass]) {
        self.templates = classes
            .iter()
            .flat_map(|c| c.templates.iter())
            .map(Self::prepare)
            .collect();
    }

    fn add_template(&mut self, template: &GestureTemplate) {
        self.templates.push(Self::prepare(template));
    }

    fn remove_class(&mut self, class_name: &str) {
        self.templates.retain(|t| t.class_name != class_name);
    }
}

/// Drops empty tokens, resamples the rest and normalizes them jointly so
/// that relative finger placement survives.
fn shape(tokens: Vec<Vec<Point>>) -> Vec<Vec<Point>> {
    let resampled: Vec<Vec<Point>> = tokens
        .iter()
        .filter(|t| !t.is_empty())
        .map(|t| resample(t, RESAMPLE_POINTS))
        .collect();
    normalize(resampled)
}

fn path_length(points: &[Point]) -> f32 {
    points.windows(2).map(|w| w[0].distance(&w[1])).sum()
}

/// `n` points equally spaced along the path.
fn resample(points: &[Point], n: usize) -> Vec<Point> {
    let Some(&first) = points.first() else {
        return Vec::new();
    };
    let last = points[points.len() - 1];
    let total = path_length(points);
    if n < 2 || total <= f32::EPSILON {
        return vec![first; n.max(1)];
    }

    let interval = total / (n - 1) as f32;
    let mut out = Vec::with_capacity(n);
    out.push(first);
    let mut acc = 0.0f32;
    let mut prev = first;
    let mut i = 1;
    while i < points.len() && out.len() < n {
        let cur = points[i];
        let d = prev.distance(&cur);
        if d > 0.0 && acc + d >= interval {
            let t = (interval - acc) / d;
            let q = Point::new(prev.x + t * (cur.x - prev.x), prev.y + t * (cur.y - prev.y));
            out.push(q);
            prev = q;
            acc = 0.0;
        } else {
            acc += d;
            prev = cur;
            i += 1;
        }
    }
    while out.len() < n {
        out.push(last);
    }
    out
}

/// Translates to the common centroid and scales by the larger bounding box side.
fn normalize(tokens: Vec<Vec<Point>>) -> Vec<Vec<Point>> {
    let all = tokens.iter().flatten();
    let count = all.clone().count();
    if count == 0 {
        return tokens;
    }
    let (sx, sy) = all.clone().fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    let c = Point::new(sx / count as f32, sy / count as f32);

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (f32::MAX, f32::MAX, f32::MIN, f32::MIN);
    for p in all {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    let scale = (max_x - min_x).max(max_y - min_y);
    let scale = if scale > f32::EPSILON { scale } else { 1.0 };

    tokens
        .into_iter()
        .map(|t| {
            t.into_iter()
                .map(|p| Point::new((p.x - c.x) / scale, (p.y - c.y) / scale))
                .collect()
        })
        .collect()
}

fn token_distance(a: &[Point], b: &[Point]) -> f32 {
    let n = a.len().min(b.len()).max(1) as f32;
    a.iter().zip(b).map(|(p, q)| p.distance(q)).sum::<f32>() / n
}

/// Mean token distance under the best pairing of candidate and template tokens.
fn gesture_distance(candidate: &[Vec<Point>], template: &[Vec<Point>]) -> f32 {
    let cost: Vec<Vec<f32>> = candidate
        .iter()
        .map(|c| template.iter().map(|t| token_distance(c, t)).collect())
        .collect();
    let pairs = optimal_assignment(&cost);
    let total: f32 = pairs.iter().map(|&(i, j)| cost[i][j]).sum();
    total / pairs.len().max(1) as f32
}
