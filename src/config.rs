use anyhow::{Context, Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::Deserialize;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use touchrec::classifiers::{StrokeClassifier, StrokeThresholds, Surface, TemplateMatcher};
use touchrec::{AssignmentStrategy, Classifier, GestureSession, MAX_BLOBS, TrackerConfig};

use crate::input;

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerSection {
    pub strategy: AssignmentStrategy,
    pub max_blobs: usize,
    pub bridge_radius: Option<f32>,
    pub segment_threshold: f32,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self {
            strategy: AssignmentStrategy::Optimal,
            max_blobs: MAX_BLOBS,
            bridge_radius: None,
            segment_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Thresholds {
    pub tap_ms: u64,
    pub move_tol: f32,
    pub swipe_min_dist: f32,
    pub swipe_max_ms: u64,
    pub pinch_step: f32,
    pub min_probability: f32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplatesSection {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub surface: Surface,
    pub thresholds: Thresholds,
    #[serde(default)]
    pub templates: TemplatesSection,
}

impl Profile {
    pub fn tracker_config(&self) -> TrackerConfig {
        TrackerConfig {
            strategy: self.tracker.strategy,
            max_blobs: self.tracker.max_blobs,
            bridge_radius: self.tracker.bridge_radius,
        }
    }

    pub fn stroke_thresholds(&self) -> StrokeThresholds {
        StrokeThresholds {
            tap_ms: self.thresholds.tap_ms,
            move_tol: self.thresholds.move_tol,
            swipe_min_dist: self.thresholds.swipe_min_dist,
            swipe_max_ms: self.thresholds.swipe_max_ms,
            pinch_step: self.thresholds.pinch_step,
        }
    }

    /// Built-in classifiers in registration order.
    pub fn classifiers(&self) -> Vec<Box<dyn Classifier>> {
        vec![
            Box::new(StrokeClassifier::new(self.stroke_thresholds(), self.surface)),
            Box::new(TemplateMatcher::new(self.thresholds.min_probability)),
        ]
    }
}

/// Session with the profile's tracker settings, built-in classifiers and
/// the templates found in `templates_dir`.
pub fn build_session(profile: &Profile, templates_dir: &Path) -> Result<GestureSession> {
    let session = GestureSession::new(profile.tracker_config());
    for c in profile.classifiers() {
        session.register(c);
    }
    session
        .load_templates(templates_dir)
        .with_context(|| format!("loading templates from {}", templates_dir.display()))?;
    Ok(session)
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
    pub detected_devices: Vec<String>,
}

fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("cannot determine home directory"))?;
    Ok(dirs.home_dir().join(".config").join("touchrec"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_or_install_in(config_dir()?)
    }

    pub fn load_or_install_in(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;
        let detected_devices = input::discover_multitouch()
            .into_iter()
            .map(|d| format!("{} ({})", d.name, d.path))
            .collect();

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
            detected_devices,
        })
    }

    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                let path = e.path();
                if path.extension().is_some_and(|ext| ext == "toml") {
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        v.push(stem.to_string());
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.profile
            .templates
            .dir
            .clone()
            .unwrap_or_else(|| self.config_dir.join("templates"))
    }

    pub fn doctor_report(&self) -> serde_json::Value {
        let input_dir_readable = fs::read_dir("/dev/input").is_ok();
        serde_json::json!({
            "input_dir_readable": input_dir_readable,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "templates_dir": self.templates_dir(),
            "devices": self.detected_devices,
            "hints": {
                "no_devices": "multitouch devices need read access to /dev/input/event*",
                "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
            }
        })
    }
}

fn load_profile(profiles_dir: &Path, name: &str) -> Result<Profile> {
    let path = profiles_dir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    let profile: Profile =
        toml::from_str(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))?;
    validate_profile(&profile)?;
    Ok(profile)
}

fn validate_profile(p: &Profile) -> Result<()> {
    if p.thresholds.tap_ms == 0 || p.thresholds.swipe_max_ms == 0 {
        return Err(anyhow!("thresholds must be positive durations"));
    }
    if !(0.0..1.0).contains(&p.thresholds.move_tol) {
        return Err(anyhow!(
            "thresholds.move_tol must be in (0,1) normalized units"
        ));
    }
    if p.thresholds.swipe_min_dist <= 0.0 || p.thresholds.pinch_step <= 0.0 {
        return Err(anyhow!("thresholds.swipe_min_dist and pinch_step must be positive"));
    }
    if !(0.0..=1.0).contains(&p.thresholds.min_probability) {
        return Err(anyhow!("thresholds.min_probability must be in [0,1]"));
    }
    if p.tracker.max_blobs == 0 || p.tracker.max_blobs > MAX_BLOBS {
        return Err(anyhow!("tracker.max_blobs must be in 1..={MAX_BLOBS}"));
    }
    if p.tracker.bridge_radius.is_some_and(|r| r < 0.0) {
        return Err(anyhow!("tracker.bridge_radius must not be negative"));
    }
    if p.surface.width <= 0.0 || p.surface.height <= 0.0 {
        return Err(anyhow!("surface width and height must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(txt: &str) -> Result<Profile> {
        let p: Profile = toml::from_str(txt)?;
        validate_profile(&p)?;
        Ok(p)
    }

    #[test]
    fn bundled_default_profile_is_valid() {
        let p = parse(default_profile_text()).unwrap();
        assert_eq!(p.meta.name.as_deref(), Some("default"));
        assert_eq!(p.tracker.strategy, AssignmentStrategy::Optimal);
        assert_eq!(p.tracker_config().max_blobs, MAX_BLOBS);
        assert_eq!(p.surface.width, 4096.0);
        assert_eq!(p.classifiers().len(), 2);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let p = parse(
            r#"
            [meta]
            [thresholds]
            tap_ms = 200
            move_tol = 0.05
            swipe_min_dist = 0.1
            swipe_max_ms = 500
            pinch_step = 0.05
            min_probability = 0.5
            "#,
        )
        .unwrap();
        assert!(p.tracker.bridge_radius.is_none());
        assert_eq!(p.surface, Surface::default());
        assert!(p.templates.dir.is_none());
    }

    #[test]
    fn greedy_strategy_and_bridge_radius_parse() {
        let txt = default_profile_text()
            .replace("strategy = \"optimal\"", "strategy = \"greedy\"")
            .replace("# bridge_radius = 400.0", "bridge_radius = 400.0");
        let p = parse(&txt).unwrap();
        assert_eq!(p.tracker_config().strategy, AssignmentStrategy::Greedy);
        assert_eq!(p.tracker_config().bridge_radius, Some(400.0));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let too_many = default_profile_text().replace("max_blobs = 20", "max_blobs = 64");
        assert!(parse(&too_many).is_err());

        let bad_prob = default_profile_text().replace("min_probability = 0.6", "min_probability = 1.5");
        assert!(parse(&bad_prob).is_err());

        let bad_strategy = default_profile_text().replace("\"optimal\"", "\"psychic\"");
        assert!(parse(&bad_strategy).is_err());
    }

    #[test]
    fn installs_default_and_switches_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let mut st = DaemonConfigState::load_or_install_in(dir.path().to_path_buf()).unwrap();
        assert_eq!(st.active_name, "default");
        assert_eq!(st.list_profiles(), vec!["default"]);
        assert_eq!(st.templates_dir(), dir.path().join("templates"));

        let custom = default_profile_text().replace("# dir = \"/home/me/gesture-templates\"", "dir = \"/tmp/tpl\"");
        fs::write(st.profiles_dir.join("work.toml"), custom).unwrap();
        st.set_active("work").unwrap();
        assert_eq!(st.templates_dir(), PathBuf::from("/tmp/tpl"));
        assert_eq!(fs::read_to_string(&st.active_ptr).unwrap(), "work");

        assert!(st.set_active("missing").is_err());
        assert_eq!(st.active_name, "work");
    }

    #[test]
    fn session_from_profile_loads_templates() {
        let dir = tempfile::tempdir().unwrap();
        let p = parse(default_profile_text()).unwrap();
        let session = build_session(&p, dir.path()).unwrap();
        assert_eq!(session.classifier_names(), vec!["strokes", "templates"]);
        assert!(session.classes().is_empty());
    }
}
