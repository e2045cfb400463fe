// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::aggregator::TIMESTAMP_FIELD;
use crate::errors::PeckError;
use crate::hostname::get_hostname;
use crate::sender::{base_url, build_client, check_response, SendError, Sender};
use crate::task::InfluxDbConfig;
use crate::Fields;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// Writes aggregated windows to InfluxDB as line protocol.
///
/// Only meaningful downstream of the aggregator: every non-timestamp field must be an object of
/// `{aggregation: number}` and the `timestamp` field (seconds) must be present.
pub struct InfluxDbSender {
    config: InfluxDbConfig,
    client: reqwest::Client,
    host: String,
}

impl InfluxDbSender {
    pub fn new(config: InfluxDbConfig, timeout: Duration) -> Result<Self, PeckError> {
        Ok(InfluxDbSender {
            config,
            client: build_client(timeout)?,
            host: get_hostname(),
        })
    }

    fn write_url(&self) -> String {
        format!("{}/write?db={}", base_url(&self.config.hosts), self.config.database)
    }

    fn to_lines(&self, fields: &Fields) -> Result<String, SendError> {
        let timestamp = fields
            .get(TIMESTAMP_FIELD)
            .and_then(Value::as_i64)
            .ok_or_else(|| SendError::Payload(format!("missing integer {TIMESTAMP_FIELD} field")))?;

        let mut lines = String::new();
        for (key, value) in fields {
            if key == TIMESTAMP_FIELD {
                continue;
            }
            let Value::Object(results) = value else {
                return Err(SendError::Payload(format!(
                    "field {key} is not an aggregation result"
                )));
            };
            if results.is_empty() {
                continue;
            }

            let mut line = format!("{key},host={} ", self.host);
            for (i, (aggregation, result)) in results.iter().enumerate() {
                let result = result.as_f64().ok_or_else(|| {
                    SendError::Payload(format!("{key}.{aggregation} is not numeric"))
                })?;
                if i > 0 {
                    line.push(',');
                }
                line.push_str(&format!("{aggregation}={result:.3}"));
            }
            line.push_str(&format!(" {}\n", timestamp.saturating_mul(NANOS_PER_SECOND)));
            lines.push_str(&line);
        }
        Ok(lines)
    }
}

#[async_trait]
impl Sender for InfluxDbSender {
    async fn start(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn send(&self, fields: &Fields) -> Result<(), SendError> {
        let lines = self.to_lines(fields)?;
        if lines.is_empty() {
            return Ok(());
        }
        debug!("INFLUXDB_SENDER | Writing {} lines", lines.lines().count());
        let resp = self
            .client
            .post(self.write_url())
            .header("Content-Type", "text/plain")
            .body(lines)
            .send()
            .await?;
        check_response(resp).await
    }
}
