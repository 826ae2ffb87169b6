//! In-memory catalog of gesture classes mirrored to a persistence backend.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{GestureClass, GestureTemplate, TrackedGesture};

/// A persisted template record as listed by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub path: PathBuf,
    pub created: SystemTime,
}

/// Storage backend consumed by [`TemplateStore`].
///
/// `deserialize(serialize(t))` must reproduce `t`.
pub trait TemplatePersistence: Send {
    fn list_records(&self, dir: &Path) -> Result<Vec<StoredRecord>>;
    fn load_text(&self, path: &Path) -> Result<String>;
    fn store_text(&self, text: &str, path: &Path) -> Result<()>;
    fn serialize(&self, template: &GestureTemplate) -> Result<String>;
    fn deserialize(&self, text: &str) -> Result<GestureTemplate>;
}

/// One pretty-printed JSON document per template, `*.json` in a flat directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPersistence;

impl TemplatePersistence for JsonPersistence {
    fn list_records(&self, dir: &Path) -> Result<Vec<StoredRecord>> {
        let rd = match fs::read_dir(dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::persistence(dir, e)),
        };
        let mut out = Vec::new();
        for entry in rd {
            let entry = entry.map_err(|e| Error::persistence(dir, e))?;
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let meta = entry.metadata().map_err(|e| Error::persistence(&path, e))?;
            if !meta.is_file() {
                continue;
            }
            let created = meta
                .created()
                .or_else(|_| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            out.push(StoredRecord { path, created });
        }
        Ok(out)
    }

    fn load_text(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|e| Error::persistence(path, e))
    }

    /// Never replaces an existing record.
    fn store_text(&self, text: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
        }
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| Error::persistence(path, e))?;
        file.write_all(text.as_bytes())
            .map_err(|e| Error::persistence(path, e))
    }

    fn serialize(&self, template: &GestureTemplate) -> Result<String> {
        Ok(serde_json::to_string_pretty(template)?)
    }

    fn deserialize(&self, text: &str) -> Result<GestureTemplate> {
        Ok(serde_json::from_str(text)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredTemplate {
    pub template: GestureTemplate,
    pub path: PathBuf,
}

impl StoredTemplate {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

pub struct TemplateStore {
    classes: Vec<GestureClass>,
    persistence: Box<dyn TemplatePersistence>,
}

impl std::fmt::Debug for TemplateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateStore")
            .field("classes", &self.classes.len())
            .field("templates", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::new(Box::new(JsonPersistence))
    }
}

impl TemplateStore {
    pub fn new(persistence: Box<dyn TemplatePersistence>) -> Self {
        Self {
            classes: Vec::new(),
            persistence,
        }
    }

    pub fn classes(&self) -> &[GestureClass] {
        &self.classes
    }

    pub fn class(&self, class_name: &str) -> Option<&GestureClass> {
        self.classes.iter().find(|c| c.class_name == class_name)
    }

    /// Total number of templates across all classes.
    pub fn len(&self) -> usize {
        self.classes.iter().map(|c| c.templates.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the catalog with every record found in `dir`.
    ///
    /// Records are inserted oldest first so that unnumbered ones are numbered
    /// in recording order. On any failure the current catalog is kept.
    pub fn load_all(&mut self, dir: &Path) -> Result<usize> {
        let mut records = self.persistence.list_records(dir)?;
        records.sort_by(|a, b| a.created.cmp(&b.created).then_with(|| a.path.cmp(&b.path)));

        let mut fresh = Vec::new();
        for record in &records {
            let text = self.persistence.load_text(&record.path)?;
            let template = self.persistence.deserialize(&text).inspect_err(|e| {
                warn!("unreadable template {}: {e}", record.path.display());
            })?;
            insert(&mut fresh, template)?;
        }

        self.classes = fresh;
        info!(
            "loaded {} templates in {} classes from {}",
            records.len(),
            self.classes.len(),
            dir.display()
        );
        Ok(records.len())
    }

    /// Persists a new template for `class_name` under `dir`, then adds it to the catalog.
    ///
    /// The file name is `<class>_<n>.json`. The class name is escaped so that
    /// distinct classes never share a file, and `n` is past every number
    /// already used for the class in memory or in `dir`, including records of
    /// a class that was removed from the catalog.
    pub fn store(
        &mut self,
        dir: &Path,
        class_name: &str,
        gesture: TrackedGesture,
    ) -> Result<StoredTemplate> {
        let class_name = class_name.trim();
        validate_class_name(class_name)?;
        let stem = file_stem(class_name);
        let on_disk = self
            .persistence
            .list_records(dir)?
            .iter()
            .filter_map(|r| record_number(&r.path, &stem))
            .max()
            .map_or(0, |n| n + 1);
        let number = self
            .class(class_name)
            .map_or(0, GestureClass::next_template_number)
            .max(on_disk);

        let template = GestureTemplate {
            class_name: class_name.to_string(),
            template_number: Some(number),
            gesture,
        };
        let path = dir.join(format!("{stem}_{number}.json"));
        let text = self.persistence.serialize(&template)?;
        self.persistence.store_text(&text, &path)?;
        insert(&mut self.classes, template.clone())?;

        info!("stored template '{class_name}' #{number} at {}", path.display());
        Ok(StoredTemplate { template, path })
    }

    /// Appends to the template's class, creating it if needed. Returns the
    /// template number.
    pub fn add(&mut self, template: GestureTemplate) -> Result<u32> {
        insert(&mut self.classes, template)
    }

    pub fn remove(&mut self, class_name: &str) -> Option<GestureClass> {
        let pos = self.classes.iter().position(|c| c.class_name == class_name)?;
        debug!("removed class '{class_name}'");
        Some(self.classes.remove(pos))
    }

    pub fn serialize(&self, template: &GestureTemplate) -> Result<String> {
        self.persistence.serialize(template)
    }

    pub fn deserialize(&self, text: &str) -> Result<GestureTemplate> {
        self.persistence.deserialize(text)
    }
}

fn validate_class_name(class_name: &str) -> Result<()> {
    if class_name.trim().is_empty() {
        return Err(Error::InvalidTemplate("template has no class name".into()));
    }
    Ok(())
}

fn insert(classes: &mut Vec<GestureClass>, mut template: GestureTemplate) -> Result<u32> {
    validate_class_name(&template.class_name)?;
    let idx = match classes
        .iter()
        .position(|c| c.class_name == template.class_name)
    {
        Some(i) => i,
        None => {
            classes.push(GestureClass::new(template.class_name.clone()));
            classes.len() - 1
        }
    };
    let class = &mut classes[idx];
    let number = match template.template_number {
        Some(n) => n,
        None => class.next_template_number(),
    };
    template.template_number = Some(number);
    let at = class
        .templates
        .partition_point(|t| t.template_number.is_some_and(|n| n <= number));
    class.templates.insert(at, template);
    Ok(number)
}

/// ASCII letters, digits and `-` pass through; every other byte becomes
/// `_XX`. Since `_` itself is escaped the mapping is injective.
fn file_stem(class_name: &str) -> String {
    let mut stem = String::with_capacity(class_name.len());
    for b in class_name.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' {
            stem.push(char::from(b));
        } else {
            stem.push_str(&format!("_{b:02X}"));
        }
    }
    stem
}

/// Template number of a `<stem>_<n>.json` record.
fn record_number(path: &Path, stem: &str) -> Option<u32> {
    let name = path.file_name()?.to_str()?.strip_suffix(".json")?;
    let (record_stem, number) = name.rsplit_once('_')?;
    if record_stem != stem {
        return None;
    }
    number.parse().ok()
}
