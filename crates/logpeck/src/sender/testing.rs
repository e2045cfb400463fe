// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::sender::{SendError, Sender};
use crate::Fields;

/// Sender that keeps everything it is handed.
#[derive(Clone, Default)]
pub(crate) struct RecordingSender {
    pub sent: Arc<Mutex<Vec<Fields>>>,
    pub stops: Arc<AtomicUsize>,
    pub fail_start: bool,
}

impl RecordingSender {
    pub fn sent(&self) -> Vec<Fields> {
        self.sent.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sender for RecordingSender {
    async fn start(&self) -> Result<(), SendError> {
        if self.fail_start {
            return Err(SendError::Destination(None, "unreachable".to_string()));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SendError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, fields: &Fields) -> Result<(), SendError> {
        self.sent.lock().unwrap().push(fields.clone());
        Ok(())
    }
}

/// Sender whose every send hangs until the gate is opened once.
#[derive(Clone, Default)]
pub(crate) struct GatedSender {
    pub sends: Arc<AtomicUsize>,
    pub gate: Arc<Notify>,
}

impl GatedSender {
    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn open(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Sender for GatedSender {
    async fn start(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn send(&self, _fields: &Fields) -> Result<(), SendError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        self.gate.notified().await;
        Ok(())
    }
}
