//! Contract every recognition algorithm plugs into.

use serde::Serialize;

use crate::model::{
    ClassificationResult, GestureClass, GestureTemplate, TrackedGesture, Trajectories,
};

/// What a classifier can do, read once when it is registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub classify: bool,
    pub manage_templates: bool,
}

impl Capabilities {
    pub const CLASSIFY: Self = Self {
        classify: true,
        manage_templates: false,
    };

    pub const CLASSIFY_AND_MANAGE_TEMPLATES: Self = Self {
        classify: true,
        manage_templates: true,
    };
}

pub trait Classifier: Send {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::CLASSIFY
    }

    /// Final classification of a finished session. `None` means "not recognized".
    fn classify(&self, gesture: &TrackedGesture) -> Option<ClassificationResult>;

    /// Best-effort hint while a session is still running.
    fn notify_on_input(&mut self, _trajectories: &Trajectories) -> String {
        String::new()
    }

    /// Replaces the known templates. Only called when `manage_templates` is set.
    fn load_templates(&mut self, _classes: &[GestureClass]) {}

    /// Only called when `manage_templates` is set.
    fn add_template(&mut self, _template: &GestureTemplate) {}

    /// Only called when `manage_templates` is set.
    fn remove_class(&mut self, _class_name: &str) {}
}

/// How per-classifier results collapse into one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultPolicy {
    /// The first classifier (in registration order) with a result wins.
    FirstNonEmpty,
    /// Each later non-empty result overwrites the earlier ones.
    LastNonEmpty,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifierOutcome {
    pub classifier: String,
    pub result: Option<ClassificationResult>,
}

/// Every classifier's answer plus the one picked under `policy`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recognition {
    pub policy: ResultPolicy,
    pub outcomes: Vec<ClassifierOutcome>,
    pub selected: Option<ClassificationResult>,
}

impl Recognition {
    pub fn collect(policy: ResultPolicy, outcomes: Vec<ClassifierOutcome>) -> Self {
        let mut answered = outcomes.iter().filter_map(|o| o.result.as_ref());
        let selected = match policy {
            ResultPolicy::FirstNonEmpty => answered.next(),
            ResultPolicy::LastNonEmpty => answered.last(),
        }
        .cloned();
        Self {
            policy,
            outcomes,
            selected,
        }
    }

    pub fn is_recognized(&self) -> bool {
        self.selected.is_some()
    }

    pub fn name(&self) -> Option<&str> {
        self.selected.as_ref().map(|r| r.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(classifier: &str, name: Option<&str>) -> ClassifierOutcome {
        ClassifierOutcome {
            classifier: classifier.to_string(),
            result: name.map(|n| ClassificationResult::new(n, 0.9)),
        }
    }

    fn outcomes() -> Vec<ClassifierOutcome> {
        vec![
            outcome("a", None),
            outcome("b", Some("circle")),
            outcome("c", Some("swipe")),
            outcome("d", None),
        ]
    }

    #[test]
    fn first_non_empty_picks_earliest_answer() {
        let r = Recognition::collect(ResultPolicy::FirstNonEmpty, outcomes());
        assert_eq!(r.name(), Some("circle"));
        assert_eq!(r.outcomes.len(), 4);
    }

    #[test]
    fn last_non_empty_picks_latest_answer() {
        let r = Recognition::collect(ResultPolicy::LastNonEmpty, outcomes());
        assert_eq!(r.name(), Some("swipe"));
    }

    #[test]
    fn no_answers_is_not_recognized() {
        let r = Recognition::collect(ResultPolicy::LastNonEmpty, vec![outcome("a", None)]);
        assert!(!r.is_recognized());
    }
}
