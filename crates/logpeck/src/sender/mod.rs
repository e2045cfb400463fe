// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Output backends.
//!
//! Delivery is best-effort and at-most-once: a failed [`Sender::send`] is reported to the caller,
//! which logs it, and the record is dropped. Nothing is retried or queued.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::errors::PeckError;
use crate::task::TaskConfig;
use crate::Fields;

pub mod elasticsearch;
pub mod influxdb;
#[cfg(test)]
pub(crate) mod testing;

pub use elasticsearch::ElasticSearchSender;
pub use influxdb::InfluxDbSender;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Failed to prepare payload: {0}")]
    Payload(String),

    #[error("Destination rejected payload: {0:?} {1}")]
    Destination(Option<StatusCode>, String),
}

#[async_trait]
pub trait Sender: Send + Sync {
    async fn start(&self) -> Result<(), SendError>;

    async fn stop(&self) -> Result<(), SendError>;

    async fn send(&self, fields: &Fields) -> Result<(), SendError>;
}

/// Builds the sender configured for a task. `ESConfig` takes precedence over `InfluxDbConfig`.
pub fn new_sender(config: &TaskConfig, timeout: Duration) -> Result<Box<dyn Sender>, PeckError> {
    if let Some(es) = &config.es_config {
        return Ok(Box::new(ElasticSearchSender::new(es.clone(), timeout)?));
    }
    if let Some(influx) = &config.influx_db_config {
        return Ok(Box::new(InfluxDbSender::new(influx.clone(), timeout)?));
    }
    Err(PeckError::config(format!(
        "no sender configured for task {}",
        config.name
    )))
}

pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, PeckError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| PeckError::config(format!("unable to build HTTP client: {e}")))
}

/// Configured hosts may omit the scheme, in which case plain HTTP is assumed.
pub(crate) fn base_url(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{host}")
    }
}

pub(crate) async fn check_response(resp: reqwest::Response) -> Result<(), SendError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    Err(SendError::Destination(Some(status), body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{ElasticSearchConfig, InfluxDbConfig};

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("127.0.0.1:9200"), "http://127.0.0.1:9200");
        assert_eq!(base_url("https://es.local/"), "https://es.local");
        assert_eq!(base_url("http://es.local:9200"), "http://es.local:9200");
    }

    #[test]
    fn test_new_sender_requires_a_backend() {
        let config = TaskConfig {
            name: "n".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            new_sender(&config, DEFAULT_SEND_TIMEOUT),
            Err(PeckError::Config(_))
        ));
    }

    #[test]
    fn test_new_sender_builds_either_backend() {
        let es = TaskConfig {
            name: "n".to_string(),
            es_config: Some(ElasticSearchConfig {
                hosts: vec!["127.0.0.1:9200".to_string()],
                index: "logs".to_string(),
                doc_type: "log".to_string(),
                mapping: None,
            }),
            ..Default::default()
        };
        assert!(new_sender(&es, DEFAULT_SEND_TIMEOUT).is_ok());

        let influx = TaskConfig {
            name: "n".to_string(),
            influx_db_config: Some(InfluxDbConfig {
                hosts: "127.0.0.1:8086".to_string(),
                database: "metrics".to_string(),
            }),
            ..Default::default()
        };
        assert!(new_sender(&influx, DEFAULT_SEND_TIMEOUT).is_ok());
    }
}
