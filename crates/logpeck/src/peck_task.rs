// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The per-task pipeline: filter, extract, optionally aggregate, send.
//!
//! Lifecycle and counters live beside the pipeline, not inside it. Starting, stopping or reading
//! the stat of a task never waits for a line that is being sent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::errors::PeckError;
use crate::extractor::{new_extractor, ExtractError, Extractor};
use crate::filter::PeckFilter;
use crate::sender::{new_sender, Sender};
use crate::task::{TaskConfig, TaskStat};
use crate::Fields;

const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Outcome of a dry-run line that produced no fields.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Discarded")]
    Discarded,

    #[error(transparent)]
    Extract(#[from] ExtractError),
}

/// Line and byte counts over the current rate window.
#[derive(Debug)]
struct RateWindow {
    started: Instant,
    lines: i64,
    bytes: i64,
}

impl RateWindow {
    fn new() -> Self {
        RateWindow {
            started: Instant::now(),
            lines: 0,
            bytes: 0,
        }
    }
}

#[derive(Debug)]
struct Counters {
    stat: TaskStat,
    rate: RateWindow,
}

/// Critical sections here never span an await, so a poisoned lock still holds usable data.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct PeckTask {
    config: TaskConfig,
    filter: PeckFilter,
    extractor: Box<dyn Extractor>,
    aggregator: Option<Mutex<Aggregator>>,
    sender: Box<dyn Sender>,
    stop: AtomicBool,
    counters: Mutex<Counters>,
}

impl PeckTask {
    /// Builds a stopped task. Counters of a supplied stat are carried over.
    pub fn new(
        config: TaskConfig,
        stat: Option<TaskStat>,
        send_timeout: Duration,
    ) -> Result<Self, PeckError> {
        let sender = new_sender(&config, send_timeout)?;
        Self::with_sender(config, stat, sender)
    }

    pub fn with_sender(
        config: TaskConfig,
        stat: Option<TaskStat>,
        sender: Box<dyn Sender>,
    ) -> Result<Self, PeckError> {
        let extractor = new_extractor(&config)?;
        let aggregator = if config.aggregator.enable {
            Some(Mutex::new(Aggregator::new(&config.aggregator)?))
        } else {
            None
        };

        let mut stat = stat.unwrap_or_else(|| TaskStat::stopped(&config));
        stat.name.clone_from(&config.name);
        stat.log_path.clone_from(&config.log_path);
        stat.stop = true;

        debug!(
            "PECK_TASK | New peck task {} on {} (aggregation: {})",
            config.name,
            config.log_path,
            aggregator.is_some()
        );
        Ok(PeckTask {
            filter: PeckFilter::new(&config.filter_expr),
            config,
            extractor,
            aggregator,
            sender,
            stop: AtomicBool::new(true),
            counters: Mutex::new(Counters {
                stat,
                rate: RateWindow::new(),
            }),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    #[must_use]
    pub fn is_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stat(&self) -> TaskStat {
        let mut stat = lock(&self.counters).stat.clone();
        stat.stop = self.is_stop();
        stat
    }

    /// Starts the sender, then lets lines through. A sender failure leaves the task stopped.
    pub async fn start(&self) -> Result<(), PeckError> {
        self.sender.start().await?;
        lock(&self.counters).rate = RateWindow::new();
        self.stop.store(false, Ordering::Release);
        info!("PECK_TASK | Started {}", self.config.name);
        Ok(())
    }

    /// Drops lines from now on, then stops the sender. A line already being sent completes.
    pub async fn stop(&self) -> Result<(), PeckError> {
        self.stop.store(true, Ordering::Release);
        {
            let mut counters = lock(&self.counters);
            counters.stat.lines_per_sec = 0;
            counters.stat.bytes_per_sec = 0;
        }
        self.sender.stop().await?;
        info!("PECK_TASK | Stopped {}", self.config.name);
        Ok(())
    }

    /// Stops the sender of a running task without changing its state.
    pub async fn release(&self) {
        if self.is_stop() {
            return;
        }
        if let Err(e) = self.sender.stop().await {
            warn!("PECK_TASK | Failed to release sender of {}: {e}", self.config.name);
        }
    }

    /// Restarts the sender of a running task after [`PeckTask::release`].
    pub async fn resume(&self) {
        if self.is_stop() {
            return;
        }
        if let Err(e) = self.sender.start().await {
            warn!("PECK_TASK | Failed to resume sender of {}: {e}", self.config.name);
        }
    }

    /// Runs one line through the pipeline. Send failures are logged and the record is dropped.
    pub async fn process(&self, line: &str) {
        if self.is_stop() || self.filter.drop(line) {
            return;
        }
        self.count(line.len());

        let fields = match self.extractor.extract(line) {
            Ok(fields) => fields,
            Err(e) => {
                debug!("PECK_TASK | {}: {e}", self.config.name);
                Fields::new()
            }
        };

        let outgoing = match &self.aggregator {
            Some(aggregator) => {
                let dump = {
                    let mut aggregator = lock(aggregator);
                    let timestamp = aggregator.record(&fields);
                    if !aggregator.is_deadline(timestamp) {
                        return;
                    }
                    aggregator.dump(timestamp)
                };
                if dump.is_empty() {
                    return;
                }
                dump.into_fields()
            }
            None => fields,
        };

        if let Err(e) = self.sender.send(&outgoing).await {
            warn!("PECK_TASK | {} failed to send: {e}", self.config.name);
        }
    }

    /// Filters and extracts a line without sending anything.
    pub fn process_test(&self, line: &str) -> Result<Fields, ProbeError> {
        if self.filter.drop(line) {
            return Err(ProbeError::Discarded);
        }
        Ok(self.extractor.extract(line)?)
    }

    fn count(&self, bytes: usize) {
        let bytes = i64::try_from(bytes).unwrap_or(i64::MAX);
        let mut counters = lock(&self.counters);
        let Counters { stat, rate } = &mut *counters;
        stat.lines_total += 1;
        stat.bytes_total = stat.bytes_total.saturating_add(bytes);
        rate.lines += 1;
        rate.bytes = rate.bytes.saturating_add(bytes);

        let elapsed = rate.started.elapsed();
        if elapsed >= RATE_WINDOW {
            let secs = elapsed.as_secs_f64();
            stat.lines_per_sec = (rate.lines as f64 / secs) as i64;
            stat.bytes_per_sec = (rate.bytes as f64 / secs) as i64;
            *rate = RateWindow::new();
        }
    }
}
