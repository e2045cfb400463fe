// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Task registry and lifecycle.
//!
//! The [`Pecker`] maps task names to paths and paths to [`LogTask`]s. Every operation runs under
//! one registry lock and persists its outcome through the [`TaskStore`] before the in-memory
//! registry is changed, so a restart restores exactly the accepted state.
//!
//! Invariants held between operations:
//!
//! - `name_to_path[name]` exists iff a [`PeckTask`] with that name is subscribed to a log task.
//! - `log_tasks[path]` exists iff at least one name maps to `path`.
//! - The persisted stat `Stop` flag matches the in-memory task state.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::errors::PeckError;
use crate::extractor::RAW_LOG_FIELD;
use crate::hostname::get_hostname;
use crate::log_task::LogTask;
use crate::peck_task::{PeckTask, ProbeError};
use crate::store::TaskStore;
use crate::tail::{StartAt, Tailer};
use crate::task::{LogStat, PeckerStat, TaskConfig, TaskStat};
use crate::Fields;

const TEST_ERROR_FIELD: &str = "_Error";
const TEST_FIELDS_FIELD: &str = "_Fields";

#[derive(Default)]
struct Registry {
    name_to_path: BTreeMap<String, String>,
    log_tasks: BTreeMap<String, LogTask>,
    started: bool,
    released: bool,
}

impl Registry {
    fn log_task(&self, name: &str) -> Result<&LogTask, PeckError> {
        let path = self
            .name_to_path
            .get(name)
            .ok_or_else(|| PeckError::NotFound(name.to_string()))?;
        self.log_tasks.get(path).ok_or_else(|| {
            PeckError::Unrecoverable(format!("task {name} maps to {path} with no log task"))
        })
    }
}

pub struct Pecker {
    store: Arc<dyn TaskStore>,
    send_timeout: Duration,
    registry: Mutex<Registry>,
}

impl Pecker {
    /// Builds the registry and restores every persisted task. Any restore failure is returned.
    pub async fn new(store: Arc<dyn TaskStore>, send_timeout: Duration) -> Result<Self, PeckError> {
        let pecker = Pecker {
            store,
            send_timeout,
            registry: Mutex::new(Registry::default()),
        };
        pecker.restore().await?;
        Ok(pecker)
    }

    async fn restore(&self) -> Result<(), PeckError> {
        let configs = self.store.get_all_configs()?;
        for config in configs {
            let stat = match self.store.get_stat(&config.name) {
                Ok(stat) => stat,
                Err(e) => {
                    warn!("PECKER | No usable stat for {}: {e}", config.name);
                    None
                }
            };
            let name = config.name.clone();
            self.add_peck_task(config, stat).await?;
            info!("PECKER | Restored peck task {name}");
        }
        Ok(())
    }

    /// Registers a new task. A supplied stat with `Stop` unset starts the task right away.
    pub async fn add_peck_task(
        &self,
        config: TaskConfig,
        stat: Option<TaskStat>,
    ) -> Result<(), PeckError> {
        config.validate_for_registry()?;
        let mut registry = self.registry.lock().await;
        if registry.name_to_path.contains_key(&config.name) {
            return Err(PeckError::AlreadyExists(config.name));
        }

        let run = stat.as_ref().is_some_and(|s| !s.stop);
        let task = PeckTask::new(config.clone(), stat, self.send_timeout)?;
        if run {
            task.start().await?;
        }
        self.persist(&config, &task.stat(), None)?;

        let path = config.log_path.clone();
        let log_task = registry
            .log_tasks
            .entry(path.clone())
            .or_insert_with(|| LogTask::new(path.clone()));
        log_task.add_peck_task(task).await?;
        if registry.started {
            if let Some(log_task) = registry.log_tasks.get_mut(&path) {
                log_task.start();
            }
        }
        registry.name_to_path.insert(config.name.clone(), path);
        info!("PECKER | Added peck task {} on {}", config.name, config.log_path);
        Ok(())
    }

    /// Replaces a task with one rebuilt from `config`, keeping its persisted stat.
    ///
    /// The log path cannot change. An empty `LogPath` keeps the current one.
    pub async fn update_peck_task(&self, mut config: TaskConfig) -> Result<(), PeckError> {
        let registry = self.registry.lock().await;
        let Some(path) = registry.name_to_path.get(&config.name) else {
            return Err(PeckError::NotFound(config.name));
        };
        if config.log_path.is_empty() {
            config.log_path.clone_from(path);
        } else if config.log_path != *path {
            return Err(PeckError::config(format!(
                "LogPath of {} cannot change from {} to {}",
                config.name, path, config.log_path
            )));
        }
        config.validate_for_registry()?;
        let log_task = registry.log_task(&config.name)?;

        let stat = self.store.get_stat(&config.name)?;
        let run = stat.as_ref().is_some_and(|s| !s.stop);
        let task = PeckTask::new(config.clone(), stat, self.send_timeout)?;
        if run {
            task.start().await?;
        }

        let previous = self
            .store
            .get_all_configs()?
            .into_iter()
            .find(|c| c.name == config.name);
        self.persist(&config, &task.stat(), previous.as_ref())?;
        log_task.update_peck_task(task).await?;
        info!("PECKER | Updated peck task {}", config.name);
        Ok(())
    }

    /// Removes a task, closing its log task when it was the last subscriber.
    ///
    /// When neither the config nor the stat can be deleted the store and the registry can no
    /// longer be reconciled and [`PeckError::Unrecoverable`] is returned.
    pub async fn remove_peck_task(&self, name: &str) -> Result<(), PeckError> {
        let mut registry = self.registry.lock().await;
        let path = match registry.name_to_path.get(name) {
            Some(path) => path.clone(),
            None => return Err(PeckError::NotFound(name.to_string())),
        };
        registry.log_task(name)?;

        match (self.store.remove_config(name), self.store.remove_stat(name)) {
            (Err(config_err), Err(stat_err)) => {
                error!("PECKER | Failed to delete {name}: {config_err}; {stat_err}");
                return Err(PeckError::Unrecoverable(format!(
                    "failed to delete config ({config_err}) and stat ({stat_err}) of {name}"
                )));
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => {
                warn!("PECKER | Partial delete of {name}: {e}");
            }
            (Ok(()), Ok(())) => {}
        }

        let now_empty = match registry.log_tasks.get(&path) {
            Some(log_task) => {
                log_task.remove_peck_task(name).await?;
                log_task.empty().await
            }
            None => false,
        };
        registry.name_to_path.remove(name);
        let emptied = if now_empty {
            registry.log_tasks.remove(&path)
        } else {
            None
        };
        drop(registry);

        // Closing waits for the line in flight, so it happens outside the registry lock.
        if let Some(mut log_task) = emptied {
            log_task.close().await;
            debug!("PECKER | Dropped log task for {path}");
        }
        info!("PECKER | Removed peck task {name}");
        Ok(())
    }

    pub async fn start_peck_task(&self, name: &str) -> Result<(), PeckError> {
        let mut registry = self.registry.lock().await;
        let log_task = registry.log_task(name)?;
        let stat = log_task.start_peck_task(name).await?;
        if let Err(e) = self.store.save_stat(&stat) {
            if let Err(revert) = log_task.stop_peck_task(name).await {
                warn!("PECKER | Failed to revert start of {name}: {revert}");
            }
            return Err(e.into());
        }

        if registry.started {
            if let Some(path) = registry.name_to_path.get(name).cloned() {
                if let Some(log_task) = registry.log_tasks.get_mut(&path) {
                    log_task.start();
                }
            }
        }
        info!("PECKER | Started peck task {name}");
        Ok(())
    }

    pub async fn stop_peck_task(&self, name: &str) -> Result<(), PeckError> {
        let registry = self.registry.lock().await;
        let log_task = registry.log_task(name)?;
        let stat = log_task.stop_peck_task(name).await?;
        if let Err(e) = self.store.save_stat(&stat) {
            if let Err(revert) = log_task.start_peck_task(name).await {
                warn!("PECKER | Failed to revert stop of {name}: {revert}");
            }
            return Err(e.into());
        }
        info!("PECKER | Stopped peck task {name}");
        Ok(())
    }

    /// Persisted configs, the source of truth for listing.
    pub async fn list_peck_task(&self) -> Result<Vec<TaskConfig>, PeckError> {
        let _registry = self.registry.lock().await;
        Ok(self.store.get_all_configs()?)
    }

    /// Persisted stats, as of each task's last lifecycle transition.
    pub async fn list_task_stats(&self) -> Result<Vec<TaskStat>, PeckError> {
        let _registry = self.registry.lock().await;
        Ok(self.store.get_all_stats()?)
    }

    /// Starts every log task. Fails when called twice.
    pub async fn start(&self) -> Result<(), PeckError> {
        let mut registry = self.registry.lock().await;
        if registry.started {
            return Err(PeckError::AlreadyStarted);
        }
        let resume = registry.released;
        for (path, log_task) in &mut registry.log_tasks {
            if resume {
                log_task.resume_senders().await;
            }
            info!("PECKER | Starting log task {path}");
            log_task.start();
        }
        registry.started = true;
        registry.released = false;
        Ok(())
    }

    /// Closes every log task and stops the senders of running tasks. Registered tasks and
    /// persisted state are kept, and a later [`Pecker::start`] restarts the senders.
    pub async fn shutdown(&self) {
        let mut registry = self.registry.lock().await;
        let release = !registry.released;
        for (path, log_task) in &mut registry.log_tasks {
            debug!("PECKER | Closing log task {path}");
            log_task.close().await;
            if release {
                log_task.release_senders().await;
            }
        }
        registry.started = false;
        registry.released = true;
        info!("PECKER | Shut down");
    }

    /// Live counters of every running task, grouped by path.
    pub async fn get_stat(&self) -> PeckerStat {
        let registry = self.registry.lock().await;
        let mut log_stats = Vec::with_capacity(registry.log_tasks.len());
        for (path, log_task) in &registry.log_tasks {
            log_stats.push(LogStat {
                log_path: path.clone(),
                running: !log_task.is_stop(),
                peck_task_stats: log_task.stats().await,
            });
        }
        PeckerStat {
            name: get_hostname(),
            started: registry.started,
            log_stats,
        }
    }

    /// Dry-runs `config` against lines appended to its file from now on.
    ///
    /// Collects up to `Test.TestNum` results or whatever arrived within `Test.Timeout` seconds.
    /// Discarded lines are skipped. Nothing is sent and the registry is untouched.
    pub async fn test_peck_task(&self, config: &TaskConfig) -> Result<Vec<Fields>, PeckError> {
        config.validate_for_registry()?;
        let task = PeckTask::new(config.clone(), None, self.send_timeout)?;
        tokio::fs::metadata(&config.log_path).await?;

        let cancel = CancellationToken::new();
        let mut tailer = Tailer::new(&config.log_path, StartAt::End);
        let mut results = Vec::new();
        let collect = async {
            while results.len() < config.test.test_num {
                let Some(line) = tailer.next_line(&cancel).await else {
                    break;
                };
                match probe(&task, &line) {
                    Some(result) => results.push(result),
                    None => continue,
                }
            }
        };
        let timeout = Duration::from_secs(config.test.timeout);
        if tokio::time::timeout(timeout, collect).await.is_err() {
            debug!("PECKER | Dry run of {} timed out", config.name);
        }
        Ok(results)
    }

    /// Saves config then stat. When the stat cannot be saved, the config write is undone.
    fn persist(
        &self,
        config: &TaskConfig,
        stat: &TaskStat,
        previous: Option<&TaskConfig>,
    ) -> Result<(), PeckError> {
        self.store.save_config(config)?;
        if let Err(e) = self.store.save_stat(stat) {
            let undo = match previous {
                Some(previous) => self.store.save_config(previous),
                None => self.store.remove_config(&config.name),
            };
            if let Err(undo) = undo {
                warn!("PECKER | Failed to undo config write of {}: {undo}", config.name);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

fn probe(task: &PeckTask, line: &str) -> Option<Fields> {
    let mut result = Fields::new();
    match task.process_test(line) {
        Err(ProbeError::Discarded) => return None,
        Err(e) => {
            result.insert(TEST_ERROR_FIELD.to_string(), Value::String(e.to_string()));
            result.insert(RAW_LOG_FIELD.to_string(), Value::String(line.to_string()));
        }
        Ok(fields) if fields.contains_key(RAW_LOG_FIELD) => return Some(fields),
        Ok(fields) => {
            result.insert(RAW_LOG_FIELD.to_string(), Value::String(line.to_string()));
            result.insert(TEST_FIELDS_FIELD.to_string(), Value::Object(fields));
        }
    }
    Some(result)
}
