//! Saved projects
//!
//! The history is a single JSON array, most recent first, with the same
//! camelCase layout the web version kept under `mentorStemHistory`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::form::ProjectForm;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("No saved project with id {0}")]
    NotFound(i64),
}

/// One saved plan with the form it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedProject {
    /// Creation time in milliseconds since the epoch
    pub id: i64,
    #[serde(flatten)]
    pub form: ProjectForm,
    pub proposal_name: String,
    pub plan_markdown: String,
}

/// Persistence for the project history
pub trait ProjectStore: Send + Sync {
    /// Every saved project, most recent first
    fn list(&self) -> Result<Vec<SavedProject>, StoreError>;

    fn get(&self, id: i64) -> Result<SavedProject, StoreError> {
        self.list()?
            .into_iter()
            .find(|p| p.id == id)
            .ok_or(StoreError::NotFound(id))
    }

    /// Save a new project under a fresh id
    fn create(&self, form: ProjectForm, proposal_name: &str, plan_markdown: &str) -> Result<SavedProject, StoreError>;

    /// Replace the plan text of an existing project
    fn update_plan(&self, id: i64, plan_markdown: &str) -> Result<SavedProject, StoreError>;

    /// Remove a project; returns whether it existed
    fn delete(&self, id: i64) -> Result<bool, StoreError>;
}

/// `ProjectStore` backed by one JSON file
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        debug!(?path, "JsonFileStore::new: called");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the array; missing, blank or corrupt content reads as empty
    fn load(&self) -> Vec<SavedProject> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read project history");
                return Vec::new();
            }
        };
        if content.trim().is_empty() {
            return Vec::new();
        }
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "Failed to parse project history");
            Vec::new()
        })
    }

    /// Write via a temp file and rename so readers never see half a file
    fn save(&self, projects: &[SavedProject]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(projects)?;
        let tmp_path = self.sibling("tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(json.as_bytes())?;
        tmp.sync_all()?;
        drop(tmp);
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    /// Read-modify-write under an exclusive lock
    fn update<T>(&self, f: impl FnOnce(&mut Vec<SavedProject>) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let _lock = self.lock()?;
        let mut projects = self.load();
        let result = f(&mut projects)?;
        self.save(&projects)?;
        Ok(result)
    }

    fn lock(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.sibling("lock"))?;
        // Released when the handle drops
        file.lock_exclusive()?;
        Ok(file)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!(".{}.{}", name, suffix))
    }
}

/// Current time in ms, bumped past every id already taken
fn next_id(projects: &[SavedProject]) -> i64 {
    let now = Utc::now().timestamp_millis();
    match projects.iter().map(|p| p.id).max() {
        Some(max) if max >= now => max + 1,
        _ => now,
    }
}

impl ProjectStore for JsonFileStore {
    fn list(&self) -> Result<Vec<SavedProject>, StoreError> {
        Ok(self.load())
    }

    fn create(&self, form: ProjectForm, proposal_name: &str, plan_markdown: &str) -> Result<SavedProject, StoreError> {
        debug!(%proposal_name, "JsonFileStore::create: called");
        let project = self.update(|projects| {
            let project = SavedProject {
                id: next_id(projects),
                form,
                proposal_name: proposal_name.to_string(),
                plan_markdown: plan_markdown.to_string(),
            };
            projects.insert(0, project.clone());
            Ok(project)
        })?;
        info!(id = %project.id, "Saved project to history");
        Ok(project)
    }

    fn update_plan(&self, id: i64, plan_markdown: &str) -> Result<SavedProject, StoreError> {
        debug!(%id, "JsonFileStore::update_plan: called");
        self.update(|projects| {
            let project = projects
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or(StoreError::NotFound(id))?;
            project.plan_markdown = plan_markdown.to_string();
            Ok(project.clone())
        })
    }

    fn delete(&self, id: i64) -> Result<bool, StoreError> {
        debug!(%id, "JsonFileStore::delete: called");
        self.update(|projects| {
            let before = projects.len();
            projects.retain(|p| p.id != id);
            Ok(projects.len() != before)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn form() -> ProjectForm {
        ProjectForm::new("5to Grado", "Agua", "A", "4 semanas").unwrap()
    }

    fn store(dir: &TempDir) -> JsonFileStore {
        JsonFileStore::new(dir.path().join("mentorStemHistory.json"))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).list().unwrap().is_empty());
    }

    #[test]
    fn test_create_prepends_with_unique_ids() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = store.create(form(), "Uno", "1. A\nx").unwrap();
        let second = store.create(form(), "Dos", "1. B\ny").unwrap();
        assert!(second.id > first.id);

        let names: Vec<String> = store.list().unwrap().into_iter().map(|p| p.proposal_name).collect();
        assert_eq!(names, vec!["Dos", "Uno"]);
    }

    #[test]
    fn test_file_layout_is_camel_case_and_flat() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.create(form(), "Huerta", "1. A").unwrap();
        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        let entry = &raw[0];
        assert_eq!(entry["proposalName"], "Huerta");
        assert_eq!(entry["planMarkdown"], "1. A");
        assert_eq!(entry["grade"], "5to Grado");
        assert_eq!(entry["resources"], "A");
        assert!(entry["id"].is_i64());
    }

    #[test]
    fn test_reads_history_written_by_web_version() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(
            store.path(),
            r#"[{"id":1717000000000,"grade":"3ro","topic":"Luz","resources":"B","time":"2 semanas","proposalName":"Sombras","planMarkdown":"1. A\nfoo"}]"#,
        )
        .unwrap();
        let project = store.get(1717000000000).unwrap();
        assert_eq!(project.form.topic, "Luz");
        assert_eq!(project.proposal_name, "Sombras");
    }

    #[test]
    fn test_update_plan() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let saved = store.create(form(), "Uno", "viejo").unwrap();
        let updated = store.update_plan(saved.id, "nuevo").unwrap();
        assert_eq!(updated.plan_markdown, "nuevo");
        assert_eq!(store.get(saved.id).unwrap().plan_markdown, "nuevo");
        assert!(matches!(store.update_plan(42, "x"), Err(StoreError::NotFound(42))));
    }

    #[test]
    fn test_update_plan_keeps_position() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let a = store.create(form(), "A", "a").unwrap();
        store.create(form(), "B", "b").unwrap();
        store.update_plan(a.id, "a2").unwrap();
        let list = store.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id, a.id);
        assert_eq!(list[1].proposal_name, "A");
        assert_eq!(list[1].plan_markdown, "a2");
    }

    #[test]
    fn test_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let saved = store.create(form(), "Uno", "x").unwrap();
        assert!(store.delete(saved.id).unwrap());
        assert!(!store.delete(saved.id).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        fs::write(store.path(), "{not json").unwrap();
        assert!(store.list().unwrap().is_empty());
        // The next write replaces the corrupt content
        store.create(form(), "Uno", "x").unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn test_next_id_bumps_past_future_ids() {
        let far = Utc::now().timestamp_millis() + 1_000_000;
        let existing = SavedProject {
            id: far,
            form: form(),
            proposal_name: String::new(),
            plan_markdown: String::new(),
        };
        assert_eq!(next_id(&[existing]), far + 1);
    }
}
