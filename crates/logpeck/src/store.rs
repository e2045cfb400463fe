// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable task configuration and stat storage.
//!
//! The registry persists every accepted lifecycle transition through [`TaskStore`] and restores
//! itself from it on startup. [`SledStore`] keeps configs and stats in two sled trees keyed by
//! task name, with JSON-encoded values.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::{Config as SledConfig, Db, Tree};
use thiserror::Error;

use crate::task::{TaskConfig, TaskStat};

/// Tree holding [`TaskConfig`] records.
pub const TREE_CONFIG: &str = "config";
/// Tree holding [`TaskStat`] records.
pub const TREE_STAT: &str = "stat";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub trait TaskStore: Send + Sync {
    fn get_all_configs(&self) -> Result<Vec<TaskConfig>, StoreError>;

    fn get_all_stats(&self) -> Result<Vec<TaskStat>, StoreError>;

    fn get_stat(&self, name: &str) -> Result<Option<TaskStat>, StoreError>;

    fn save_config(&self, config: &TaskConfig) -> Result<(), StoreError>;

    fn save_stat(&self, stat: &TaskStat) -> Result<(), StoreError>;

    fn remove_config(&self, name: &str) -> Result<(), StoreError>;

    fn remove_stat(&self, name: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    path: PathBuf,
}

impl SledStore {
    /// Opens (or creates) a store at the provided path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                // sled does not create intermediate directories.
                fs::create_dir_all(parent)?;
            }
        }
        let db = SledConfig::new().path(&path).open()?;
        Ok(SledStore { db, path })
    }

    /// Builds a temporary store that is discarded on drop.
    pub fn open_ephemeral() -> Result<Self, StoreError> {
        let db = SledConfig::new().temporary(true).open()?;
        Ok(SledStore {
            db,
            path: PathBuf::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn tree(&self, name: &str) -> Result<Tree, StoreError> {
        Ok(self.db.open_tree(name)?)
    }

    fn put<T: Serialize>(&self, tree: &str, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        let tree = self.tree(tree)?;
        tree.insert(key.as_bytes(), bytes)?;
        tree.flush()?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, tree: &str, key: &str) -> Result<Option<T>, StoreError> {
        match self.tree(tree)?.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn all<T: DeserializeOwned>(&self, tree: &str) -> Result<Vec<T>, StoreError> {
        self.tree(tree)?
            .iter()
            .map(|entry| {
                let (_, bytes) = entry?;
                Ok(serde_json::from_slice(&bytes)?)
            })
            .collect()
    }

    fn delete(&self, tree: &str, key: &str) -> Result<(), StoreError> {
        let tree = self.tree(tree)?;
        tree.remove(key.as_bytes())?;
        tree.flush()?;
        Ok(())
    }
}

impl TaskStore for SledStore {
    fn get_all_configs(&self) -> Result<Vec<TaskConfig>, StoreError> {
        self.all(TREE_CONFIG)
    }

    fn get_all_stats(&self) -> Result<Vec<TaskStat>, StoreError> {
        self.all(TREE_STAT)
    }

    fn get_stat(&self, name: &str) -> Result<Option<TaskStat>, StoreError> {
        self.get(TREE_STAT, name)
    }

    fn save_config(&self, config: &TaskConfig) -> Result<(), StoreError> {
        self.put(TREE_CONFIG, &config.name, config)
    }

    fn save_stat(&self, stat: &TaskStat) -> Result<(), StoreError> {
        self.put(TREE_STAT, &stat.name, stat)
    }

    fn remove_config(&self, name: &str) -> Result<(), StoreError> {
        self.delete(TREE_CONFIG, name)
    }

    fn remove_stat(&self, name: &str) -> Result<(), StoreError> {
        self.delete(TREE_STAT, name)
    }
}
