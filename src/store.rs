//! Template persistence.

use crate::dsp::{SignalTemplate, TemplateData, TemplateSet};
use crate::error::{EngineError, EngineResult};
use crate::lock_or_recover;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

const TEMPLATE_EXT: &str = "json";

/// Named template storage. Saving an existing name replaces it.
pub trait TemplateStore: Send + Sync {
    fn save(&self, name: &str, data: &TemplateData) -> EngineResult<()>;
    /// Every stored template, sorted by name.
    fn load(&self) -> EngineResult<Vec<(String, TemplateData)>>;
    /// Returns whether anything was removed.
    fn delete(&self, name: &str) -> EngineResult<bool>;
}

/// Build a validated set from a store. Entries that fail validation are
/// logged and left out.
pub fn load_template_set(store: &dyn TemplateStore) -> EngineResult<TemplateSet> {
    let mut set = TemplateSet::new();
    for (name, data) in store.load()? {
        match SignalTemplate::new(name.as_str(), data) {
            Ok(template) => set.insert(template),
            Err(err) => warn!(template = %name, "skipping template: {err}"),
        }
    }
    Ok(set)
}

#[derive(Debug, Default)]
pub struct MemoryTemplateStore {
    templates: Mutex<BTreeMap<String, TemplateData>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn save(&self, name: &str, data: &TemplateData) -> EngineResult<()> {
        validate_name(name)?;
        lock_or_recover(&self.templates, "memory template store")
            .insert(name.to_string(), data.clone());
        Ok(())
    }

    fn load(&self) -> EngineResult<Vec<(String, TemplateData)>> {
        Ok(lock_or_recover(&self.templates, "memory template store")
            .iter()
            .map(|(name, data)| (name.clone(), data.clone()))
            .collect())
    }

    fn delete(&self, name: &str) -> EngineResult<bool> {
        Ok(lock_or_recover(&self.templates, "memory template store")
            .remove(name)
            .is_some())
    }
}

/// One `<name>.json` file per template inside a directory.
#[derive(Debug, Clone)]
pub struct JsonTemplateStore {
    dir: PathBuf,
}

impl JsonTemplateStore {
    /// Open `dir`, creating it if needed.
    pub fn open(dir: impl Into<PathBuf>) -> EngineResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| store_error(&dir, err))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> EngineResult<PathBuf> {
        validate_name(name)?;
        Ok(self.dir.join(format!("{name}.{TEMPLATE_EXT}")))
    }
}

impl TemplateStore for JsonTemplateStore {
    fn save(&self, name: &str, data: &TemplateData) -> EngineResult<()> {
        let path = self.path_for(name)?;
        let body = serde_json::to_vec(data)
            .map_err(|err| EngineError::Store(format!("encode '{name}': {err}")))?;
        // Write then rename so readers never see a partial file.
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, body).map_err(|err| store_error(&staging, err))?;
        fs::rename(&staging, &path).map_err(|err| store_error(&path, err))?;
        debug!(template = name, path = %path.display(), "template saved");
        Ok(())
    }

    fn load(&self) -> EngineResult<Vec<(String, TemplateData)>> {
        let entries = fs::read_dir(&self.dir).map_err(|err| store_error(&self.dir, err))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(TEMPLATE_EXT)
            })
            .collect();
        paths.sort();

        let mut templates = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let parsed = fs::read(&path)
                .map_err(|err| err.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<TemplateData>(&bytes).map_err(|err| err.to_string())
                });
            match parsed {
                Ok(data) => templates.push((name.to_string(), data)),
                Err(err) => warn!(path = %path.display(), "unreadable template: {err}"),
            }
        }
        Ok(templates)
    }

    fn delete(&self, name: &str) -> EngineResult<bool> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(store_error(&path, err)),
        }
    }
}

/// Names become file stems, so they cannot carry separators or be made of
/// dots only.
fn validate_name(name: &str) -> EngineResult<()> {
    let trimmed = name.trim();
    if trimmed.is_empty()
        || trimmed != name
        || name.chars().all(|ch| ch == '.')
        || name.contains(['/', '\\', '\0'])
    {
        return Err(EngineError::Store(format!("invalid template name '{name}'")));
    }
    Ok(())
}

fn store_error(path: &Path, err: std::io::Error) -> EngineError {
    EngineError::Store(format!("{}: {err}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn spectrum(values: &[f32]) -> TemplateData {
        TemplateData::Spectrum {
            bins: values.to_vec(),
        }
    }

    #[test]
    fn rejects_path_like_names() {
        for bad in ["", "..", ".", "a/b", "a\\b", " padded "] {
            assert!(validate_name(bad).is_err(), "{bad:?}");
        }
        assert!(validate_name("Thargoid Probe").is_ok());
        assert!(validate_name("beacon.v2").is_ok());
    }

    #[test]
    fn json_store_round_trips_sorted() {
        let dir = tempdir().expect("tempdir");
        let store = JsonTemplateStore::open(dir.path().join("templates")).expect("open");
        let tile = TemplateData::Tile {
            rows: 2,
            cols: 2,
            data: vec![1.0, 2.0, 3.0, 4.0],
        };
        store.save("zeta", &spectrum(&[1.0, 0.0])).expect("save");
        store.save("alpha", &tile).expect("save");

        let loaded = store.load().expect("load");
        let names: Vec<&str> = loaded.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, ["alpha", "zeta"]);
        assert_eq!(loaded[0].1, tile);
    }

    #[test]
    fn json_store_save_replaces_and_delete_reports() {
        let dir = tempdir().expect("tempdir");
        let store = JsonTemplateStore::open(dir.path()).expect("open");
        store.save("beacon", &spectrum(&[1.0])).expect("save");
        store.save("beacon", &spectrum(&[2.0, 3.0])).expect("replace");

        let loaded = store.load().expect("load");
        assert_eq!(loaded, vec![("beacon".to_string(), spectrum(&[2.0, 3.0]))]);

        assert!(store.delete("beacon").expect("delete"));
        assert!(!store.delete("beacon").expect("delete again"));
        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn json_store_skips_unreadable_files() {
        let dir = tempdir().expect("tempdir");
        let store = JsonTemplateStore::open(dir.path()).expect("open");
        fs::write(dir.path().join("broken.json"), b"{not json").expect("write");
        fs::write(dir.path().join("notes.txt"), b"ignored").expect("write");
        store.save("ok", &spectrum(&[1.0])).expect("save");

        let loaded = store.load().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "ok");
    }

    #[test]
    fn template_set_drops_invalid_entries() {
        let store = MemoryTemplateStore::new();
        store.save("silent", &spectrum(&[0.0, 0.0])).expect("save");
        store.save("tone", &spectrum(&[3.0, 4.0])).expect("save");

        let set = load_template_set(&store).expect("load");
        assert_eq!(set.names(), ["tone"]);
        match set.get("tone").map(SignalTemplate::data) {
            Some(TemplateData::Spectrum { bins }) => {
                assert!((bins[0] - 0.6).abs() < 1e-6);
                assert!((bins[1] - 0.8).abs() < 1e-6);
            }
            other => panic!("unexpected template: {other:?}"),
        }
    }
}
