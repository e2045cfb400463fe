// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time-bucketed statistics over extracted fields.
//!
//! Every recorded sample lands in window `floor(timestamp / interval)` under the key
//! `measurement + tag signature`, where the tag signature is `,tag=value` for every configured
//! tag present on the sample. Rollover is driven by the samples themselves: when a sample's
//! window differs from the last dumped window, [`Aggregator::is_deadline`] reports it and
//! [`Aggregator::dump`] summarizes every window older than that sample's window.
//!
//! # Aggregations
//!
//! | name   | value                                                    |
//! |--------|----------------------------------------------------------|
//! | `cnt`  | number of samples                                        |
//! | `sum`  | sum of samples                                           |
//! | `avg`  | `sum / cnt`, truncating integer division                 |
//! | `min`  | smallest sample                                          |
//! | `max`  | largest sample                                           |
//! | `p<N>` | nearest-rank percentile, index `max(0, cnt * N / 100 - 1)` |
//!
//! Other names are ignored. A `p` name with a non-numeric suffix is rejected at construction.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;
use tracing::{debug, info};

use crate::errors::PeckError;
use crate::task::AggregatorConfig;
use crate::Fields;

/// Key under which a dump carries the timestamp that closed the window.
pub const TIMESTAMP_FIELD: &str = "timestamp";

/// Sample value recorded when the target field is not an integer.
const NON_NUMERIC_SAMPLE: i64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    /// Percentile with its configured name, e.g. `p99`.
    Percentile { name: String, rank: u64 },
}

impl Aggregation {
    /// Parses an aggregation name. `Ok(None)` means the name is unknown and ignored.
    pub fn parse(name: &str) -> Result<Option<Self>, PeckError> {
        let aggregation = match name {
            "cnt" => Aggregation::Count,
            "sum" => Aggregation::Sum,
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            _ => match name.strip_prefix('p') {
                Some(rank) => {
                    let rank = rank.parse::<u64>().map_err(|_| {
                        PeckError::config(format!("malformed percentile aggregation: {name}"))
                    })?;
                    Aggregation::Percentile {
                        name: name.to_string(),
                        rank,
                    }
                }
                None => return Ok(None),
            },
        };
        Ok(Some(aggregation))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Aggregation::Count => "cnt",
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Percentile { name, .. } => name,
        }
    }
}

/// Summary of the windows closed by one rollover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowDump {
    pub timestamp: i64,
    /// `measurement + tag signature` to `aggregation name -> value`.
    pub series: BTreeMap<String, BTreeMap<String, i64>>,
}

impl WindowDump {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Flattens the dump into the field shape senders consume.
    #[must_use]
    pub fn into_fields(self) -> Fields {
        let mut fields = Fields::new();
        for (key, results) in self.series {
            let results = results
                .into_iter()
                .map(|(name, value)| (name, Value::from(value)))
                .collect::<Fields>();
            fields.insert(key, Value::Object(results));
        }
        fields.insert(TIMESTAMP_FIELD.to_string(), Value::from(self.timestamp));
        fields
    }
}

type Buckets = HashMap<String, HashMap<String, Vec<i64>>>;

#[derive(Debug)]
pub struct Aggregator {
    interval: i64,
    config: AggregatorConfig,
    aggregations: Vec<Aggregation>,
    /// Window index -> measurement -> tag signature -> samples.
    windows: BTreeMap<i64, Buckets>,
    post_time: i64,
}

impl Aggregator {
    pub fn new(config: &AggregatorConfig) -> Result<Self, PeckError> {
        if config.interval <= 0 {
            return Err(PeckError::config(format!(
                "Aggregator.Interval must be positive, got {}",
                config.interval
            )));
        }

        let mut aggregations = Vec::with_capacity(config.aggregations.len());
        for name in &config.aggregations {
            match Aggregation::parse(name)? {
                Some(aggregation) => aggregations.push(aggregation),
                None => debug!("AGGREGATOR | Ignoring unknown aggregation {name}"),
            }
        }

        Ok(Aggregator {
            interval: config.interval,
            config: config.clone(),
            aggregations,
            windows: BTreeMap::new(),
            post_time: 0,
        })
    }

    #[must_use]
    pub fn interval(&self) -> i64 {
        self.interval
    }

    /// Index of the last dumped window.
    #[must_use]
    pub fn post_time(&self) -> i64 {
        self.post_time
    }

    fn window_of(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.interval)
    }

    /// Records one sample and returns the timestamp it was attributed to.
    ///
    /// Missing or non-string measurement, tags and target are logged and skipped. A timestamp
    /// that cannot be parsed falls back to the wall clock. A target that is not an integer is
    /// recorded as `1` so that non-numeric streams still produce occurrence counts.
    pub fn record(&mut self, fields: &Fields) -> i64 {
        let timestamp = self.resolve_timestamp(fields);

        let Some(measurement) = fields
            .get(&self.config.measurement)
            .and_then(Value::as_str)
        else {
            info!(
                "AGGREGATOR | Field {} must be a string, sample skipped",
                self.config.measurement
            );
            return timestamp;
        };

        if self.config.target.is_empty() {
            return timestamp;
        }

        let mut signature = String::new();
        for tag in &self.config.tags {
            match fields.get(tag).and_then(Value::as_str) {
                Some(value) => {
                    signature.push(',');
                    signature.push_str(tag);
                    signature.push('=');
                    signature.push_str(value);
                }
                None => info!("AGGREGATOR | Tag field {tag} must be a string, tag skipped"),
            }
        }

        let value = match fields.get(&self.config.target) {
            Some(Value::String(raw)) => raw.parse::<i64>().unwrap_or_else(|_| {
                debug!("AGGREGATOR | Target {raw:?} is not an integer, counting it as 1");
                NON_NUMERIC_SAMPLE
            }),
            Some(Value::Number(n)) => n.as_i64().unwrap_or(NON_NUMERIC_SAMPLE),
            Some(_) => NON_NUMERIC_SAMPLE,
            None => {
                info!(
                    "AGGREGATOR | Target field {} missing, sample skipped",
                    self.config.target
                );
                return timestamp;
            }
        };

        let window = self.window_of(timestamp);
        self.windows
            .entry(window)
            .or_default()
            .entry(measurement.to_string())
            .or_default()
            .entry(signature)
            .or_default()
            .push(value);
        timestamp
    }

    fn resolve_timestamp(&self, fields: &Fields) -> i64 {
        let parsed = match fields.get(&self.config.timestamp) {
            Some(Value::String(raw)) => raw.trim().parse::<i64>().ok(),
            Some(Value::Number(n)) => n.as_i64(),
            _ => None,
        };
        parsed.unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    /// True when `timestamp` falls outside the last dumped window.
    #[must_use]
    pub fn is_deadline(&self, timestamp: i64) -> bool {
        self.window_of(timestamp) != self.post_time
    }

    /// Summarizes and clears every window older than the one `timestamp` falls in.
    pub fn dump(&mut self, timestamp: i64) -> WindowDump {
        let window = self.window_of(timestamp);
        let current = self.windows.split_off(&window);
        let closed = std::mem::replace(&mut self.windows, current);

        let mut merged: Buckets = HashMap::new();
        for (_, buckets) in closed {
            for (measurement, signatures) in buckets {
                let entry = merged.entry(measurement).or_default();
                for (signature, samples) in signatures {
                    entry.entry(signature).or_default().extend(samples);
                }
            }
        }

        let mut series = BTreeMap::new();
        for (measurement, signatures) in merged {
            for (signature, mut samples) in signatures {
                series.insert(
                    format!("{measurement}{signature}"),
                    aggregate(&mut samples, &self.aggregations),
                );
            }
        }

        self.post_time = window;
        debug!(
            "AGGREGATOR | Dumped {} series, window is now {}",
            series.len(),
            window
        );
        WindowDump { timestamp, series }
    }
}

/// Computes the requested aggregations over one bucket, sorting it in place.
fn aggregate(samples: &mut [i64], aggregations: &[Aggregation]) -> BTreeMap<String, i64> {
    samples.sort_unstable();

    let cnt = samples.len() as i64;
    let wide_sum: i128 = samples.iter().map(|&v| i128::from(v)).sum();
    let avg = if cnt > 0 {
        saturate(wide_sum / i128::from(cnt))
    } else {
        0
    };
    let sum = saturate(wide_sum);
    let min = samples.first().copied().unwrap_or(0);
    let max = samples.last().copied().unwrap_or(0);

    let mut results = BTreeMap::new();
    for aggregation in aggregations {
        let value = match aggregation {
            Aggregation::Count => cnt,
            Aggregation::Sum => sum,
            Aggregation::Avg => avg,
            Aggregation::Min => min,
            Aggregation::Max => max,
            Aggregation::Percentile { rank, .. } => percentile(samples, *rank),
        };
        results.insert(aggregation.name().to_string(), value);
    }
    results
}

fn saturate(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[i64], rank: u64) -> i64 {
    if sorted.is_empty() {
        return 0;
    }
    let cnt = sorted.len() as u64;
    let index = (cnt.saturating_mul(rank) / 100).saturating_sub(1);
    let index = usize::try_from(index).unwrap_or(usize::MAX).min(sorted.len() - 1);
    sorted[index]
}
