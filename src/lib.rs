//! Multi-touch gesture tracking and recognition.
//!
//! Raw intensity fields are segmented into blobs, contacts are tracked across
//! frames into per-finger trajectories, and finished sessions are handed to
//! pluggable classifiers or stored as named templates.

pub mod blob;
pub mod classifier;
pub mod classifiers;
pub mod error;
pub mod model;
pub mod replay;
pub mod session;
pub mod spatial;
pub mod template;
pub mod tracker;

pub use classifier::{Capabilities, Classifier, Recognition, ResultPolicy};
pub use error::{Error, Result};
pub use model::{
    ClassificationResult, Cluster, Frame, GestureClass, GestureTemplate, GestureToken, MAX_BLOBS,
    Point, Sample, Touch, TrackedGesture, Trajectories,
};
pub use session::{GestureSession, SessionState};
pub use template::{JsonPersistence, StoredTemplate, TemplatePersistence, TemplateStore};
pub use tracker::{AssignmentStrategy, BlobTracker, FrameOutcome, TrackerConfig, TrackerObserver};
