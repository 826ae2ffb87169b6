//! Value types shared by the tracker, the classifiers and the template store.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Upper bound on concurrent contacts. Frames carrying more touches are dropped.
pub const MAX_BLOBS: usize = 20;

/// Live trajectory store: persistent id -> samples in arrival order.
pub type Trajectories = BTreeMap<u32, Vec<Sample>>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn midpoint(&self, other: &Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }
}

/// A single contact within one frame.
///
/// Before tracking `id` is only unique inside its frame; after tracking it
/// is the persistent trajectory id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Touch {
    pub id: u32,
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub dim_x: f32,
    #[serde(default)]
    pub dim_y: f32,
    #[serde(default)]
    pub intensity: f32,
}

impl Touch {
    pub fn at(id: u32, x: f32, y: f32) -> Self {
        Self {
            id,
            x,
            y,
            ..Self::default()
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp_ms: u64,
    #[serde(default)]
    pub touches: Vec<Touch>,
}

impl Frame {
    pub fn new(timestamp_ms: u64, touches: Vec<Touch>) -> Self {
        Self {
            timestamp_ms,
            touches,
        }
    }

    pub fn touch(&self, id: u32) -> Option<&Touch> {
        self.touches.iter().find(|t| t.id == id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.touch(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.touches.is_empty()
    }

    pub fn len(&self) -> usize {
        self.touches.len()
    }
}

/// Output of blob segmentation: one connected region above threshold.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cluster {
    pub id: u32,
    /// Row-major cell indices.
    pub members: BTreeSet<usize>,
    /// `x` is the mean column, `y` the mean row.
    pub mean: Point,
    pub weight: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp_ms: u64,
    pub x: f32,
    pub y: f32,
    pub num: u32,
}

impl Sample {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// One finger's trajectory within one session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GestureToken {
    pub id: u32,
    pub samples: Vec<Sample>,
}

/// Immutable snapshot of a finished tracking session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackedGesture {
    pub tokens: Vec<GestureToken>,
    pub frames: Vec<Frame>,
}

impl TrackedGesture {
    pub fn from_parts(trajectories: &Trajectories, frames: &[Frame]) -> Self {
        let tokens = trajectories
            .iter()
            .map(|(id, samples)| GestureToken {
                id: *id,
                samples: samples.clone(),
            })
            .collect();
        Self {
            tokens,
            frames: frames.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.iter().all(|t| t.samples.is_empty())
    }

    /// Milliseconds between the first and the last sample of any token.
    pub fn duration_ms(&self) -> u64 {
        let mut first = u64::MAX;
        let mut last = 0;
        for s in self.tokens.iter().flat_map(|t| t.samples.iter()) {
            first = first.min(s.timestamp_ms);
            last = last.max(s.timestamp_ms);
        }
        last.saturating_sub(first)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureTemplate {
    pub class_name: String,
    #[serde(default)]
    pub template_number: Option<u32>,
    pub gesture: TrackedGesture,
}

impl GestureTemplate {
    pub fn new(class_name: impl Into<String>, gesture: TrackedGesture) -> Self {
        Self {
            class_name: class_name.into(),
            template_number: None,
            gesture,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GestureClass {
    pub class_name: String,
    pub templates: Vec<GestureTemplate>,
}

impl GestureClass {
    pub fn new(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            templates: Vec::new(),
        }
    }

    pub fn next_template_number(&self) -> u32 {
        self.templates
            .iter()
            .filter_map(|t| t.template_number)
            .max()
            .map_or(0, |n| n + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub name: String,
    pub probability: f32,
    #[serde(default)]
    pub node_parameters: Vec<Point>,
    #[serde(default)]
    pub additional_parameters: Vec<serde_json::Value>,
}

impl ClassificationResult {
    pub fn new(name: impl Into<String>, probability: f32) -> Self {
        Self {
            name: name.into(),
            probability: probability.clamp(0.0, 1.0),
            node_parameters: Vec::new(),
            additional_parameters: Vec::new(),
        }
    }

    pub fn with_nodes(mut self, nodes: Vec<Point>) -> Self {
        self.node_parameters = nodes;
        self
    }

    pub fn with_parameter(mut self, value: serde_json::Value) -> Self {
        self.additional_parameters.push(value);
        self
    }
}
