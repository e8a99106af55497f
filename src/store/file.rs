// ABOUTME: YAML persistence helpers shared by the file-backed stores.
// ABOUTME: Writes go through a temp file and a rename so readers never see half a file.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::ContainerId;

pub(crate) fn meta_dir(root: &Path, id: &ContainerId) -> PathBuf {
    root.join(id.as_str()).join(".meta")
}

pub(crate) async fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let yaml = serde_yaml::to_string(value)?;
    let tmp = path.with_extension("yml.tmp");
    tokio::fs::write(&tmp, yaml).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// `None` when the file does not exist.
pub(crate) async fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(serde_yaml::from_str(&content)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) async fn remove_file(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Every `<root>/<id>` directory whose name is a usable container id.
pub(crate) async fn container_dirs(root: &Path) -> Result<Vec<ContainerId>> {
    let mut entries = match tokio::fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let id = ContainerId::new(entry.file_name().to_string_lossy().into_owned());
        if id.is_path_safe() {
            ids.push(id);
        } else {
            tracing::debug!(entry = %entry.path().display(), "Skipping non-container directory");
        }
    }
    ids.sort();
    Ok(ids)
}
