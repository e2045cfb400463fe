// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Task configuration and runtime statistics.
//!
//! A task is declared as a JSON document with PascalCase keys:
//!
//! ```json
//! {
//!   "Name": "nginx-status",
//!   "LogPath": "/var/log/nginx/access.log",
//!   "LogFormat": "text",
//!   "FilterExpr": "GET -healthz",
//!   "Delimiters": " ",
//!   "Fields": [{"Name": "status", "Value": "$9"}],
//!   "ESConfig": {"Hosts": ["127.0.0.1:9200"], "Index": "nginx-%{+2006.01.02}", "Type": "log"}
//! }
//! ```
//!
//! The configuration is immutable once applied to a running task: an update rebuilds the task.

use serde::{Deserialize, Serialize};

use crate::errors::PeckError;

const DEFAULT_TEST_NUM: usize = 3;
const DEFAULT_TEST_TIMEOUT_SECS: u64 = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeckField {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ElasticSearchConfig {
    pub hosts: Vec<String>,
    /// Static index name, or a rotation template such as `logs-%{+2006.01.02}`.
    pub index: String,
    #[serde(rename = "Type")]
    pub doc_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapping: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct InfluxDbConfig {
    pub hosts: String,
    pub database: String,
}

/// Window aggregation settings. Disabled unless `Enable` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct AggregatorConfig {
    pub enable: bool,
    /// Window width in seconds.
    pub interval: i64,
    pub measurement: String,
    pub tags: Vec<String>,
    pub target: String,
    pub timestamp: String,
    pub aggregations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TestConfig {
    pub test_num: usize,
    /// Seconds.
    pub timeout: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            test_num: DEFAULT_TEST_NUM,
            timeout: DEFAULT_TEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TaskConfig {
    pub name: String,
    pub log_path: String,
    #[serde(rename = "ESConfig", skip_serializing_if = "Option::is_none")]
    pub es_config: Option<ElasticSearchConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub influx_db_config: Option<InfluxDbConfig>,
    pub log_format: String,
    pub filter_expr: String,
    pub delimiters: String,
    pub fields: Vec<PeckField>,
    pub aggregator: AggregatorConfig,
    pub test: TestConfig,
}

impl TaskConfig {
    /// Parses and validates a task definition.
    pub fn from_json(raw: &[u8]) -> Result<Self, PeckError> {
        let config: TaskConfig = serde_json::from_slice(raw)
            .map_err(|e| PeckError::config(format!("Parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the fields every task needs regardless of where it runs.
    pub fn validate(&self) -> Result<(), PeckError> {
        if self.name.trim().is_empty() {
            return Err(PeckError::config("Parse error: need field Name"));
        }

        if let Some(es) = &self.es_config {
            if es.hosts.is_empty() {
                return Err(PeckError::config("Parse error: need field ESConfig.Hosts"));
            }
            if es.index.is_empty() {
                return Err(PeckError::config("Parse error: need field ESConfig.Index"));
            }
            if es.doc_type.is_empty() {
                return Err(PeckError::config("Parse error: need field ESConfig.Type"));
            }
        }

        if let Some(influx) = &self.influx_db_config {
            if influx.hosts.is_empty() {
                return Err(PeckError::config(
                    "Parse error: need field InfluxDbConfig.Hosts",
                ));
            }
            if influx.database.is_empty() {
                return Err(PeckError::config(
                    "Parse error: need field InfluxDbConfig.Database",
                ));
            }
        }

        if self.es_config.is_none() && self.influx_db_config.is_none() {
            return Err(PeckError::config(
                "no sender configured: need ESConfig or InfluxDbConfig",
            ));
        }

        if self.aggregator.enable && self.aggregator.interval <= 0 {
            return Err(PeckError::config(format!(
                "Aggregator.Interval must be positive, got {}",
                self.aggregator.interval
            )));
        }

        Ok(())
    }

    /// Validation for tasks that are registered and tailed, which need a file to read.
    pub(crate) fn validate_for_registry(&self) -> Result<(), PeckError> {
        self.validate()?;
        if self.log_path.is_empty() {
            return Err(PeckError::config("Parse error: need field LogPath"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TaskStat {
    pub name: String,
    pub log_path: String,
    pub lines_per_sec: i64,
    pub bytes_per_sec: i64,
    pub lines_total: i64,
    pub bytes_total: i64,
    pub stop: bool,
}

impl TaskStat {
    /// Default stat for a task that was never started.
    #[must_use]
    pub fn stopped(config: &TaskConfig) -> Self {
        TaskStat {
            name: config.name.clone(),
            log_path: config.log_path.clone(),
            stop: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogStat {
    pub log_path: String,
    pub running: bool,
    pub peck_task_stats: Vec<TaskStat>,
}

/// Live view of the registry, as opposed to the persisted stats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeckerStat {
    pub name: String,
    pub started: bool,
    pub log_stats: Vec<LogStat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let raw = br#"{
            "Name": "nginx",
            "LogPath": "/var/log/nginx/access.log",
            "ESConfig": {
                "Hosts": ["127.0.0.1:9200"],
                "Index": "nginx-%{+2006.01.02}",
                "Type": "log",
                "Mapping": {"log": {"properties": {"status": {"type": "long"}}}}
            },
            "LogFormat": "text",
            "FilterExpr": "GET",
            "Delimiters": " ",
            "Fields": [{"Name": "status", "Value": "$9"}],
            "Aggregator": {
                "Enable": true,
                "Interval": 60,
                "Measurement": "host",
                "Tags": ["method"],
                "Target": "cost",
                "Timestamp": "ts",
                "Aggregations": ["cnt", "p99"]
            },
            "Test": {"TestNum": 10, "Timeout": 5}
        }"#;

        let config = TaskConfig::from_json(raw).expect("config should parse");
        assert_eq!(config.name, "nginx");
        let es = config.es_config.as_ref().expect("ESConfig present");
        assert_eq!(es.doc_type, "log");
        assert!(es.mapping.is_some());
        assert_eq!(config.fields[0].value, "$9");
        assert!(config.aggregator.enable);
        assert_eq!(config.aggregator.aggregations, vec!["cnt", "p99"]);
        assert_eq!(config.test.test_num, 10);
    }

    #[test]
    fn test_defaults_for_optional_blocks() {
        let raw = br#"{"Name": "n", "InfluxDbConfig": {"Hosts": "h:8086", "Database": "db"}}"#;
        let config = TaskConfig::from_json(raw).expect("config should parse");
        assert!(config.log_path.is_empty());
        assert!(config.es_config.is_none());
        assert!(!config.aggregator.enable);
        assert_eq!(config.test, TestConfig::default());
    }

    #[test]
    fn test_missing_name_rejected() {
        let raw = br#"{"LogPath": "/tmp/x", "InfluxDbConfig": {"Hosts": "h", "Database": "d"}}"#;
        let err = TaskConfig::from_json(raw).expect_err("name is required");
        assert!(matches!(err, PeckError::Config(_)));
        assert!(err.to_string().contains("Name"));
    }

    #[test]
    fn test_incomplete_es_config_rejected() {
        let raw = br#"{"Name": "n", "ESConfig": {"Hosts": ["h"], "Type": "log"}}"#;
        let err = TaskConfig::from_json(raw).expect_err("index is required");
        assert!(err.to_string().contains("ESConfig.Index"));
    }

    #[test]
    fn test_sender_required() {
        let raw = br#"{"Name": "n", "LogPath": "/tmp/x"}"#;
        assert!(TaskConfig::from_json(raw).is_err());
    }

    #[test]
    fn test_non_positive_interval_rejected() {
        let raw = br#"{
            "Name": "n",
            "InfluxDbConfig": {"Hosts": "h", "Database": "d"},
            "Aggregator": {"Enable": true, "Interval": 0}
        }"#;
        assert!(TaskConfig::from_json(raw).is_err());
    }

    #[test]
    fn test_registry_requires_log_path() {
        let raw = br#"{"Name": "n", "InfluxDbConfig": {"Hosts": "h", "Database": "d"}}"#;
        let config = TaskConfig::from_json(raw).expect("config should parse");
        assert!(config.validate_for_registry().is_err());
    }

    #[test]
    fn test_stat_round_trips_with_pascal_case_keys() {
        let stat = TaskStat {
            name: "n".to_string(),
            stop: true,
            lines_total: 3,
            ..Default::default()
        };
        let json = serde_json::to_value(&stat).expect("serialize");
        assert_eq!(json["Stop"], true);
        assert_eq!(json["LinesTotal"], 3);
    }
}
