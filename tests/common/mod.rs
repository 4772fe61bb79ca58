#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch pipeline layout: a configuration directory whose default
/// `blob_store/` and `warehouse/` live next to the JSON files.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dir");
        }
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    pub fn config_dir(&self) -> PathBuf {
        self.path().join("config_files")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.config_dir().join("blob_store")
    }

    pub fn warehouse_dir(&self) -> PathBuf {
        self.config_dir().join("warehouse")
    }

    /// Writes `settings.json` and `table_mapping.json`.
    pub fn configure(&self, settings: &str, mappings: &str) {
        self.write("config_files/settings.json", settings);
        self.write("config_files/table_mapping.json", mappings);
    }

    /// Places an object in the blob store.
    pub fn blob(&self, name: &str, contents: &str) -> PathBuf {
        self.write(&format!("config_files/blob_store/{name}"), contents)
    }

    pub fn config_arg(&self) -> String {
        self.config_dir().to_string_lossy().into_owned()
    }
}
