//! Record/recognize lifecycle around one tracker and the registered classifiers.

use std::{
    fmt,
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
};

use log::{debug, info, warn};
use serde::Serialize;

use crate::classifier::{Capabilities, Classifier, ClassifierOutcome, Recognition, ResultPolicy};
use crate::error::{Error, Result};
use crate::model::{Frame, GestureClass, GestureTemplate, TrackedGesture};
use crate::template::{StoredTemplate, TemplateStore};
use crate::tracker::{BlobTracker, FrameOutcome, TrackerConfig, TrackerObserver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Recording,
    Recognizing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Recognizing => "recognizing",
        })
    }
}

struct Registered {
    classifier: Box<dyn Classifier>,
    caps: Capabilities,
}

struct SessionInner {
    state: SessionState,
    tracker: BlobTracker,
    classifiers: Vec<Registered>,
    store: TemplateStore,
}

impl SessionInner {
    fn require(&self, state: SessionState, requested: &'static str) -> Result<()> {
        if self.state != state {
            return Err(Error::InvalidTransition {
                from: self.state,
                requested,
            });
        }
        Ok(())
    }

    fn template_managers(&mut self) -> impl Iterator<Item = &mut Box<dyn Classifier>> {
        self.classifiers
            .iter_mut()
            .filter(|r| r.caps.manage_templates)
            .map(|r| &mut r.classifier)
    }

    fn classify_all(&self, gesture: &TrackedGesture, policy: ResultPolicy) -> Recognition {
        let outcomes = self
            .classifiers
            .iter()
            .filter(|r| r.caps.classify)
            .map(|r| ClassifierOutcome {
                classifier: r.classifier.name().to_string(),
                result: r.classifier.classify(gesture),
            })
            .collect();
        Recognition::collect(policy, outcomes)
    }
}

/// A gesture session shared between the device thread and the application.
///
/// Every operation goes through one mutex, so frames pushed from a sampling
/// thread interleave safely with start/finish calls from elsewhere.
pub struct GestureSession {
    inner: Mutex<SessionInner>,
}

impl fmt::Debug for GestureSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("GestureSession")
            .field("state", &inner.state)
            .field("tracker", &inner.tracker)
            .field("classifiers", &inner.classifiers.len())
            .field("store", &inner.store)
            .finish()
    }
}

impl Default for GestureSession {
    fn default() -> Self {
        Self::new(TrackerConfig::default())
    }
}

impl GestureSession {
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_store(config, TemplateStore::default())
    }

    pub fn with_store(config: TrackerConfig, store: TemplateStore) -> Self {
        Self {
            inner: Mutex::new(SessionInner {
                state: SessionState::Idle,
                tracker: BlobTracker::new(config),
                classifiers: Vec::new(),
                store,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a classifier; its capabilities are fixed from here on.
    pub fn register(&self, mut classifier: Box<dyn Classifier>) -> Capabilities {
        let mut inner = self.lock();
        let caps = classifier.capabilities();
        if caps.manage_templates {
            classifier.load_templates(inner.store.classes());
        }
        info!("registered classifier '{}' ({caps:?})", classifier.name());
        inner.classifiers.push(Registered { classifier, caps });
        caps
    }

    /// Swaps tracker settings and the classifier set. Only allowed while idle.
    pub fn reconfigure(
        &self,
        config: TrackerConfig,
        classifiers: Vec<Box<dyn Classifier>>,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner.require(SessionState::Idle, "reconfigure")?;
        inner.tracker.reconfigure(config);
        inner.classifiers.clear();
        for mut classifier in classifiers {
            let caps = classifier.capabilities();
            if caps.manage_templates {
                classifier.load_templates(inner.store.classes());
            }
            inner.classifiers.push(Registered { classifier, caps });
        }
        info!("session: reconfigured with {} classifiers", inner.classifiers.len());
        Ok(())
    }

    pub fn classifier_names(&self) -> Vec<String> {
        self.lock()
            .classifiers
            .iter()
            .map(|r| r.classifier.name().to_string())
            .collect()
    }

    pub fn subscribe(&self, observer: Box<dyn TrackerObserver>) {
        self.lock().tracker.subscribe(observer);
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Current trajectories and frames of the running session.
    pub fn snapshot(&self) -> TrackedGesture {
        self.lock().tracker.tracked_blobs()
    }

    pub fn start_evaluation(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.require(SessionState::Idle, "start evaluation")?;
        inner.tracker.initiate_tracking();
        inner.state = SessionState::Recognizing;
        info!("session: recognizing");
        Ok(())
    }

    /// Tracks `frame` and returns the live hint of the last classifier.
    ///
    /// Frames are ignored while idle. While recording they are tracked but no
    /// classifier is consulted.
    pub fn add_frame(&self, frame: Frame) -> String {
        let mut inner = self.lock();
        if inner.state == SessionState::Idle {
            return String::new();
        }
        if let FrameOutcome::CapacityExceeded { .. } = inner.tracker.add_frame(frame) {
            return String::new();
        }
        if inner.state != SessionState::Recognizing {
            return String::new();
        }

        let SessionInner {
            tracker,
            classifiers,
            ..
        } = &mut *inner;
        let mut hint = String::new();
        for r in classifiers.iter_mut().filter(|r| r.caps.classify) {
            hint = r.classifier.notify_on_input(tracker.trajectories());
        }
        hint
    }

    /// Ends recognition. The selected result follows [`ResultPolicy::LastNonEmpty`].
    pub fn finish_evaluation(&self) -> Result<Recognition> {
        let mut inner = self.lock();
        inner.require(SessionState::Recognizing, "finish evaluation")?;
        let gesture = inner.tracker.tracked_blobs();
        let recognition = inner.classify_all(&gesture, ResultPolicy::LastNonEmpty);
        inner.tracker.initiate_tracking();
        inner.state = SessionState::Idle;
        info!("session: finished evaluation -> {:?}", recognition.name());
        Ok(recognition)
    }

    pub fn start_template_recording(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.require(SessionState::Idle, "start template recording")?;
        inner.tracker.initiate_tracking();
        inner.state = SessionState::Recording;
        info!("session: recording");
        Ok(())
    }

    /// Stores the recorded gesture as a template of `class_name` under `dir`.
    ///
    /// On failure the session stays in `Recording` with the tracked data
    /// intact, so the caller may retry or [`cancel`](Self::cancel).
    pub fn finish_template_recording(&self, dir: &Path, class_name: &str) -> Result<StoredTemplate> {
        let mut inner = self.lock();
        inner.require(SessionState::Recording, "finish template recording")?;
        let gesture = inner.tracker.tracked_blobs();
        if gesture.is_empty() {
            return Err(Error::InvalidTemplate("recording captured no contacts".into()));
        }

        let stored = inner.store.store(dir, class_name, gesture)?;
        for classifier in inner.template_managers() {
            classifier.add_template(&stored.template);
        }
        inner.tracker.initiate_tracking();
        inner.state = SessionState::Idle;
        Ok(stored)
    }

    /// Classifies an already recorded template. The selected result follows
    /// [`ResultPolicy::FirstNonEmpty`].
    pub fn recognize_template(&self, template: &GestureTemplate) -> Recognition {
        let inner = self.lock();
        let recognition = inner.classify_all(&template.gesture, ResultPolicy::FirstNonEmpty);
        debug!(
            "template '{}' recognized as {:?}",
            template.class_name,
            recognition.name()
        );
        recognition
    }

    /// Abandons any running session.
    pub fn cancel(&self) -> SessionState {
        let mut inner = self.lock();
        let previous = inner.state;
        inner.tracker.initiate_tracking();
        inner.state = SessionState::Idle;
        if previous != SessionState::Idle {
            warn!("session: cancelled while {previous}");
        }
        previous
    }

    pub fn load_templates(&self, dir: &Path) -> Result<usize> {
        let mut inner = self.lock();
        let n = inner.store.load_all(dir)?;
        let SessionInner {
            classifiers, store, ..
        } = &mut *inner;
        for r in classifiers.iter_mut().filter(|r| r.caps.manage_templates) {
            r.classifier.load_templates(store.classes());
        }
        Ok(n)
    }

    /// Adds a template to the catalog without persisting it.
    pub fn add_template(&self, template: GestureTemplate) -> Result<u32> {
        let mut inner = self.lock();
        let number = inner.store.add(template.clone())?;
        let numbered = GestureTemplate {
            template_number: Some(number),
            ..template
        };
        for classifier in inner.template_managers() {
            classifier.add_template(&numbered);
        }
        Ok(number)
    }

    pub fn remove_class(&self, class_name: &str) -> Option<GestureClass> {
        let mut inner = self.lock();
        let removed = inner.store.remove(class_name)?;
        for classifier in inner.template_managers() {
            classifier.remove_class(class_name);
        }
        Some(removed)
    }

    pub fn classes(&self) -> Vec<GestureClass> {
        self.lock().store.classes().to_vec()
    }
}
