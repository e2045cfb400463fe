// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One tailed file shared by every task that watches it.
//!
//! A [`LogTask`] owns the only read cursor on its path. Its loop reads a line, snapshots the
//! subscribed tasks and runs the line through each of them in turn before reading the next one.
//! A slow sender therefore throttles every task on the same path; there is no internal queue.
//! Subscriber management and task lifecycle never wait on the line in flight.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::PeckError;
use crate::peck_task::PeckTask;
use crate::tail::{StartAt, Tailer, DEFAULT_POLL_INTERVAL};
use crate::task::TaskStat;

type Subscribers = Arc<Mutex<BTreeMap<String, Arc<PeckTask>>>>;

pub struct LogTask {
    log_path: String,
    tasks: Subscribers,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
    poll_interval: Duration,
}

impl LogTask {
    #[must_use]
    pub fn new(log_path: impl Into<String>) -> Self {
        LogTask {
            log_path: log_path.into(),
            tasks: Arc::new(Mutex::new(BTreeMap::new())),
            cancel: None,
            handle: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn log_path(&self) -> &str {
        &self.log_path
    }

    pub async fn add_peck_task(&self, task: PeckTask) -> Result<(), PeckError> {
        let mut tasks = self.tasks.lock().await;
        let name = task.name().to_string();
        if tasks.contains_key(&name) {
            return Err(PeckError::AlreadyExists(name));
        }
        debug!("LOG_TASK | {} subscribed to {}", name, self.log_path);
        tasks.insert(name, Arc::new(task));
        Ok(())
    }

    /// Swaps in a rebuilt task. The replaced task is stopped.
    pub async fn update_peck_task(&self, task: PeckTask) -> Result<(), PeckError> {
        let mut tasks = self.tasks.lock().await;
        let name = task.name().to_string();
        let Some(slot) = tasks.get_mut(&name) else {
            return Err(PeckError::NotFound(name));
        };
        let old = std::mem::replace(slot, Arc::new(task));
        drop(tasks);
        stop_quietly(&old).await;
        Ok(())
    }

    pub async fn remove_peck_task(&self, name: &str) -> Result<(), PeckError> {
        let removed = self.tasks.lock().await.remove(name);
        let Some(task) = removed else {
            return Err(PeckError::NotFound(name.to_string()));
        };
        stop_quietly(&task).await;
        debug!("LOG_TASK | {} unsubscribed from {}", name, self.log_path);
        Ok(())
    }

    pub async fn empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Starts the tail loop. Starting a running task is a no-op.
    pub fn start(&mut self) {
        if self.cancel.is_some() {
            return;
        }
        let cancel = CancellationToken::new();
        let tailer =
            Tailer::new(&self.log_path, StartAt::End).with_poll_interval(self.poll_interval);
        self.handle = Some(tokio::spawn(run(tailer, self.tasks.clone(), cancel.clone())));
        self.cancel = Some(cancel);
        info!("LOG_TASK | Started {}", self.log_path);
    }

    /// Stops the tail loop and waits for the line in flight to finish.
    pub async fn close(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("LOG_TASK | Loop for {} ended abnormally: {e}", self.log_path);
            }
            info!("LOG_TASK | Closed {}", self.log_path);
        }
    }

    #[must_use]
    pub fn is_stop(&self) -> bool {
        self.cancel.is_none()
    }

    /// Starts a subscribed task and returns its updated stat.
    pub async fn start_peck_task(&self, name: &str) -> Result<TaskStat, PeckError> {
        let task = self.get(name).await?;
        if !task.is_stop() {
            return Err(PeckError::AlreadyInState {
                name: name.to_string(),
                state: "started",
            });
        }
        task.start().await?;
        Ok(task.stat())
    }

    /// Stops a subscribed task and returns its updated stat.
    pub async fn stop_peck_task(&self, name: &str) -> Result<TaskStat, PeckError> {
        let task = self.get(name).await?;
        if task.is_stop() {
            return Err(PeckError::AlreadyInState {
                name: name.to_string(),
                state: "stopped",
            });
        }
        task.stop().await?;
        Ok(task.stat())
    }

    pub async fn stats(&self) -> Vec<TaskStat> {
        self.tasks.lock().await.values().map(|task| task.stat()).collect()
    }

    /// Stops the senders of running subscribers, leaving them marked as running.
    pub async fn release_senders(&self) {
        for task in self.snapshot().await {
            task.release().await;
        }
    }

    /// Restarts the senders stopped by [`LogTask::release_senders`].
    pub async fn resume_senders(&self) {
        for task in self.snapshot().await {
            task.resume().await;
        }
    }

    async fn snapshot(&self) -> Vec<Arc<PeckTask>> {
        self.tasks.lock().await.values().cloned().collect()
    }

    async fn get(&self, name: &str) -> Result<Arc<PeckTask>, PeckError> {
        self.tasks
            .lock()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| PeckError::NotFound(name.to_string()))
    }
}

async fn stop_quietly(task: &PeckTask) {
    if !task.is_stop() {
        if let Err(e) = task.stop().await {
            warn!("LOG_TASK | Failed to stop {}: {e}", task.name());
        }
    }
}

async fn run(mut tailer: Tailer, tasks: Subscribers, cancel: CancellationToken) {
    while let Some(line) = tailer.next_line(&cancel).await {
        let subscribers: Vec<_> = tasks.lock().await.values().cloned().collect();
        for task in subscribers {
            task.process(&line).await;
        }
    }
    debug!("LOG_TASK | Loop for {} exited", tailer.path().display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::RAW_LOG_FIELD;
    use crate::sender::testing::{GatedSender, RecordingSender};
    use crate::task::TaskConfig;
    use std::io::Write;
    use tempfile::TempDir;

    fn peck_task(name: &str, path: &str, filter: &str) -> (PeckTask, RecordingSender) {
        let sender = RecordingSender::default();
        let config = TaskConfig {
            name: name.to_string(),
            log_path: path.to_string(),
            filter_expr: filter.to_string(),
            ..Default::default()
        };
        let task = PeckTask::with_sender(config, None, Box::new(sender.clone())).unwrap();
        (task, sender)
    }

    fn append(path: &std::path::Path, text: &str) {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        file.write_all(text.as_bytes()).unwrap();
    }

    async fn wait_for(sender: &RecordingSender, n: usize) {
        for _ in 0..500 {
            if sender.sent().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} records, got {}", sender.sent().len());
    }

    #[tokio::test]
    async fn test_subscriber_management() {
        let log_task = LogTask::new("/var/log/app.log");
        let (a, _) = peck_task("a", "/var/log/app.log", "");
        let (a2, _) = peck_task("a", "/var/log/app.log", "");
        let (b, _) = peck_task("b", "/var/log/app.log", "");

        assert!(log_task.empty().await);
        log_task.add_peck_task(a).await.unwrap();
        assert!(matches!(
            log_task.add_peck_task(a2).await,
            Err(PeckError::AlreadyExists(_))
        ));
        assert!(matches!(
            log_task.update_peck_task(b).await,
            Err(PeckError::NotFound(_))
        ));
        assert!(matches!(
            log_task.remove_peck_task("b").await,
            Err(PeckError::NotFound(_))
        ));
        log_task.remove_peck_task("a").await.unwrap();
        assert!(log_task.empty().await);
    }

    #[tokio::test]
    async fn test_start_and_stop_report_no_op_transitions() {
        let log_task = LogTask::new("/var/log/app.log");
        let (a, _) = peck_task("a", "/var/log/app.log", "");
        log_task.add_peck_task(a).await.unwrap();

        assert!(matches!(
            log_task.stop_peck_task("a").await,
            Err(PeckError::AlreadyInState { state: "stopped", .. })
        ));
        let stat = log_task.start_peck_task("a").await.unwrap();
        assert!(!stat.stop);
        assert!(matches!(
            log_task.start_peck_task("a").await,
            Err(PeckError::AlreadyInState { state: "started", .. })
        ));
        assert!(log_task.stop_peck_task("a").await.unwrap().stop);
        assert!(matches!(
            log_task.start_peck_task("missing").await,
            Err(PeckError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_lines_fan_out_to_running_subscribers_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "before start\n");
        let path_str = path.to_str().unwrap();

        let mut log_task = LogTask::new(path_str).with_poll_interval(Duration::from_millis(10));
        let (all, all_sent) = peck_task("all", path_str, "");
        let (errors, errors_sent) = peck_task("errors", path_str, "ERROR");
        let (idle, idle_sent) = peck_task("idle", path_str, "");
        log_task.add_peck_task(all).await.unwrap();
        log_task.add_peck_task(errors).await.unwrap();
        log_task.add_peck_task(idle).await.unwrap();
        log_task.start_peck_task("all").await.unwrap();
        log_task.start_peck_task("errors").await.unwrap();

        log_task.start();
        assert!(!log_task.is_stop());
        tokio::time::sleep(Duration::from_millis(100)).await;
        append(&path, "INFO one\nERROR two\nINFO three\n");

        wait_for(&all_sent, 3).await;
        wait_for(&errors_sent, 1).await;
        let lines: Vec<_> = all_sent
            .sent()
            .iter()
            .map(|f| f[RAW_LOG_FIELD].as_str().unwrap().to_string())
            .collect();
        assert_eq!(lines, vec!["INFO one", "ERROR two", "INFO three"]);
        assert_eq!(errors_sent.sent().len(), 1);
        assert!(idle_sent.sent().is_empty());

        let stats = log_task.stats().await;
        assert_eq!(stats.len(), 3);

        log_task.close().await;
        assert!(log_task.is_stop());
    }

    #[tokio::test]
    async fn test_lifecycle_does_not_wait_for_send_in_flight() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.log");
        append(&path, "");
        let path_str = path.to_str().unwrap();

        let sender = GatedSender::default();
        let config = TaskConfig {
            name: "a".to_string(),
            log_path: path_str.to_string(),
            ..Default::default()
        };
        let task = PeckTask::with_sender(config, None, Box::new(sender.clone())).unwrap();
        let mut log_task = LogTask::new(path_str).with_poll_interval(Duration::from_millis(10));
        log_task.add_peck_task(task).await.unwrap();
        log_task.start_peck_task("a").await.unwrap();
        log_task.start();
        tokio::time::sleep(Duration::from_millis(100)).await;

        append(&path, "first\n");
        for _ in 0..500 {
            if sender.sends() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(sender.sends(), 1);

        let quick = Duration::from_millis(200);
        let stats = tokio::time::timeout(quick, log_task.stats()).await.unwrap();
        assert_eq!(stats[0].lines_total, 1);
        let stat = tokio::time::timeout(quick, log_task.stop_peck_task("a"))
            .await
            .unwrap()
            .unwrap();
        assert!(stat.stop);

        // Lines observed after the stop are dropped once the send in flight completes.
        append(&path, "second\n");
        sender.open();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sender.sends(), 1);
        assert_eq!(log_task.stats().await[0].lines_total, 1);

        tokio::time::timeout(quick, log_task.remove_peck_task("a"))
            .await
            .unwrap()
            .unwrap();
        log_task.close().await;
    }

    #[tokio::test]
    async fn test_release_stops_only_running_senders() {
        let log_task = LogTask::new("/var/log/app.log");
        let (running, running_sender) = peck_task("running", "/var/log/app.log", "");
        let (idle, idle_sender) = peck_task("idle", "/var/log/app.log", "");
        log_task.add_peck_task(running).await.unwrap();
        log_task.add_peck_task(idle).await.unwrap();
        log_task.start_peck_task("running").await.unwrap();

        log_task.release_senders().await;
        assert_eq!(running_sender.stops(), 1);
        assert_eq!(idle_sender.stops(), 0);

        let stats = log_task.stats().await;
        let running = stats.iter().find(|s| s.name == "running").unwrap();
        assert!(!running.stop);
        log_task.resume_senders().await;
    }
}
