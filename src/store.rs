//! Object store holding raw and cleaned source files.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};

pub trait ObjectStore: Send + Sync {
    /// Object names, sorted.
    fn list(&self) -> Result<Vec<String>>;

    fn get(&self, name: &str) -> Result<Vec<u8>>;

    /// Writes `bytes` under `name`, replacing any existing object.
    fn put(&self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// Object store backed by a flat local directory.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            bail!("Invalid object name '{name}'");
        }
        Ok(self.root.join(name))
    }
}

impl ObjectStore for DirectoryStore {
    fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("Listing object store {:?}", self.root))?;
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.with_context(|| format!("Listing object store {:?}", self.root))?;
            if entry.file_type()?.is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.object_path(name)?;
        fs::read(&path).with_context(|| format!("Reading object {path:?}"))
    }

    fn put(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.object_path(name)?;
        fs::create_dir_all(&self.root)
            .with_context(|| format!("Creating object store {:?}", self.root))?;
        fs::write(&path, bytes).with_context(|| format!("Writing object {path:?}"))
    }
}
