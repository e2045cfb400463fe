// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::sender::SendError;
use crate::store::StoreError;

/// Errors returned by registry and task construction operations.
#[derive(Debug, thiserror::Error)]
pub enum PeckError {
    #[error("Invalid task configuration: {0}")]
    Config(String),

    #[error("Peck task already exists: {0}")]
    AlreadyExists(String),

    #[error("Peck task not found: {0}")]
    NotFound(String),

    #[error("Peck task {name} already {state}")]
    AlreadyInState { name: String, state: &'static str },

    #[error("Pecker already started")]
    AlreadyStarted,

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("Sender error: {0}")]
    Sender(#[from] SendError),

    /// The registry can no longer reflect durable state. Callers are expected to shut down.
    #[error("Unrecoverable error: {0}")]
    Unrecoverable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PeckError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        PeckError::Config(msg.into())
    }

    #[must_use]
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, PeckError::Unrecoverable(_))
    }
}
