// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Elasticsearch document sender.
//!
//! Every record is posted to `/<index>/<type>` on a randomly chosen configured host, stamped
//! with `Host` and a millisecond `Timestamp`. The index may be a rotation template: the first
//! `%{+<layout>}` placeholder is replaced with the current local time formatted with a Go style
//! reference layout (`2006.01.02` renders as `2024.01.15`).
//!
//! Whenever the resolved index name changes, the index mapping is (re)initialized before the
//! first document is written to it:
//!
//! ```text
//! PUT /<index>                   {"mappings": <Mapping or {}>}
//! PUT /<index>/_mappings/<type>  {"properties":{"Timestamp":{"type":"date","format":"epoch_millis"}}}
//! ```
//!
//! The check-and-update is atomic per sender. Two senders rolling over the same index at once
//! may both initialize it, which Elasticsearch tolerates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::errors::PeckError;
use crate::hostname::get_hostname;
use crate::sender::{base_url, build_client, check_response, SendError, Sender};
use crate::task::ElasticSearchConfig;
use crate::Fields;

const TEMPLATE_OPEN: &str = "%{+";
const TEMPLATE_CLOSE: char = '}';
const TIMESTAMP_MAPPING: &str =
    r#"{"properties":{"Timestamp":{"type":"date","format":"epoch_millis"}}}"#;

/// Source of the current time, used for index rotation and record timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

pub struct ElasticSearchSender {
    config: ElasticSearchConfig,
    client: reqwest::Client,
    host: String,
    clock: Arc<dyn Clock>,
    last_index_name: Mutex<String>,
}

impl ElasticSearchSender {
    pub fn new(config: ElasticSearchConfig, timeout: Duration) -> Result<Self, PeckError> {
        Self::with_clock(config, timeout, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: ElasticSearchConfig,
        timeout: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PeckError> {
        if config.hosts.is_empty() {
            return Err(PeckError::config("ESConfig.Hosts must not be empty"));
        }
        Ok(ElasticSearchSender {
            config,
            client: build_client(timeout)?,
            host: get_hostname(),
            clock,
            last_index_name: Mutex::new(String::new()),
        })
    }

    fn select_host(&self) -> &str {
        let i = fastrand::usize(..self.config.hosts.len());
        &self.config.hosts[i]
    }

    /// Resolves the index for the current time, initializing its mapping on rollover.
    async fn index_name(&self) -> String {
        let index_name = resolve_index_name(&self.config.index, &self.clock.now());

        let mut last = self.last_index_name.lock().await;
        if *last != index_name {
            info!("ES_SENDER | Index rolled over from {:?} to {}", *last, index_name);
            self.init_mapping(&index_name).await;
            last.clone_from(&index_name);
        }
        index_name
    }

    async fn init_mapping(&self, index_name: &str) {
        let uri = format!("{}/{}", base_url(self.select_host()), index_name);
        let mappings = self.config.mapping.clone().unwrap_or_else(|| json!({}));
        let body = json!({ "mappings": mappings }).to_string();
        info!("ES_SENDER | Init index mapping {uri} {body}");
        self.put(&uri, body).await;

        let type_uri = format!("{uri}/_mappings/{}", self.config.doc_type);
        info!("ES_SENDER | Init timestamp mapping {type_uri} {TIMESTAMP_MAPPING}");
        self.put(&type_uri, TIMESTAMP_MAPPING.to_string()).await;
    }

    async fn put(&self, uri: &str, body: String) {
        let resp = self
            .client
            .put(uri)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await;
        match resp {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                debug!("ES_SENDER | PUT {uri} responded {status}: {text}");
            }
            Err(e) => warn!("ES_SENDER | PUT {uri} failed: {e}"),
        }
    }
}

#[async_trait]
impl Sender for ElasticSearchSender {
    async fn start(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), SendError> {
        Ok(())
    }

    async fn send(&self, fields: &Fields) -> Result<(), SendError> {
        let index_name = self.index_name().await;

        let mut data = Fields::new();
        data.insert("Host".to_string(), Value::String(self.host.clone()));
        data.insert(
            "Timestamp".to_string(),
            Value::from(self.clock.now().timestamp_millis()),
        );
        for (k, v) in fields {
            data.insert(k.clone(), v.clone());
        }

        let uri = format!(
            "{}/{}/{}",
            base_url(self.select_host()),
            index_name,
            self.config.doc_type
        );
        debug!("ES_SENDER | Post {uri} with {} fields", data.len());
        let resp = self.client.post(&uri).json(&data).send().await?;
        check_response(resp).await
    }
}

/// Applies the `%{+<layout>}` rotation template of `template`, if any, at time `now`.
#[must_use]
pub fn resolve_index_name(template: &str, now: &DateTime<Local>) -> String {
    let Some(open) = template.find(TEMPLATE_OPEN) else {
        return template.to_string();
    };
    let layout_start = open + TEMPLATE_OPEN.len();
    let Some(close) = template[layout_start..].find(TEMPLATE_CLOSE) else {
        return template.to_string();
    };
    let layout = &template[layout_start..layout_start + close];
    let formatted = now.format(&go_layout_to_strftime(layout)).to_string();
    format!(
        "{}{}{}",
        &template[..open],
        formatted,
        &template[layout_start + close + 1..]
    )
}

/// Go reference-time tokens, longest match first.
const GO_LAYOUT_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Jan", "%b"),
    ("Monday", "%A"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("2006", "%Y"),
    ("-07:00", "%:z"),
    ("-0700", "%z"),
    (".000000000", "%.9f"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    ("01", "%m"),
    ("02", "%d"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("15", "%H"),
    ("_2", "%e"),
    ("PM", "%p"),
    ("pm", "%P"),
    ("1", "%-m"),
    ("2", "%-d"),
    ("3", "%-I"),
    ("4", "%-M"),
    ("5", "%-S"),
];

/// Translates a Go reference layout (`Mon Jan 2 15:04:05 MST 2006`) into a strftime string.
fn go_layout_to_strftime(layout: &str) -> String {
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'outer: while let Some(c) = rest.chars().next() {
        for (token, strftime) in GO_LAYOUT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(strftime);
                rest = tail;
                continue 'outer;
            }
        }
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}
