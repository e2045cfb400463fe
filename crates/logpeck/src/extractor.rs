// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line to field-set extraction.
//!
//! Two formats are supported, selected by `LogFormat`:
//!
//! - **text** (default): the line is split on any character of `Delimiters` and each configured
//!   field picks a 1-based column with a `$N` value.
//! - **json**: the line is parsed as a JSON object and each configured field picks a dotted path.
//!
//! Without configured fields, `text` yields `{"_Log": line}` and `json` yields the whole object.

use serde_json::Value;

use crate::errors::PeckError;
use crate::task::TaskConfig;
use crate::Fields;

pub const RAW_LOG_FIELD: &str = "_Log";
const DEFAULT_DELIMITERS: &str = " ";

/// Per-line extraction failure. Never fatal to the pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("line has {found} columns, field {field} needs column {column}")]
    MissingColumn {
        field: String,
        column: usize,
        found: usize,
    },

    #[error("line is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("line is not a JSON object")]
    NotAnObject,
}

pub trait Extractor: Send + Sync {
    fn extract(&self, line: &str) -> Result<Fields, ExtractError>;
}

/// Builds the extractor named by the task's `LogFormat`.
pub fn new_extractor(config: &TaskConfig) -> Result<Box<dyn Extractor>, PeckError> {
    match config.log_format.as_str() {
        "" | "text" => Ok(Box::new(TextExtractor::new(
            &config.delimiters,
            &config.fields,
        )?)),
        "json" => Ok(Box::new(JsonExtractor::new(&config.fields))),
        other => Err(PeckError::config(format!("unknown LogFormat: {other}"))),
    }
}

#[derive(Debug, Clone)]
pub struct TextExtractor {
    delimiters: Vec<char>,
    columns: Vec<(String, usize)>,
}

impl TextExtractor {
    pub fn new(delimiters: &str, fields: &[crate::task::PeckField]) -> Result<Self, PeckError> {
        let delimiters = if delimiters.is_empty() {
            DEFAULT_DELIMITERS
        } else {
            delimiters
        };
        let columns = fields
            .iter()
            .map(|field| {
                let column = field
                    .value
                    .strip_prefix('$')
                    .and_then(|n| n.parse::<usize>().ok())
                    .filter(|n| *n > 0)
                    .ok_or_else(|| {
                        PeckError::config(format!(
                            "field {} must reference a column as $N, got {:?}",
                            field.name, field.value
                        ))
                    })?;
                Ok((field.name.clone(), column))
            })
            .collect::<Result<Vec<_>, PeckError>>()?;

        Ok(TextExtractor {
            delimiters: delimiters.chars().collect(),
            columns,
        })
    }
}

impl Extractor for TextExtractor {
    fn extract(&self, line: &str) -> Result<Fields, ExtractError> {
        let mut fields = Fields::new();
        if self.columns.is_empty() {
            fields.insert(RAW_LOG_FIELD.to_string(), Value::String(line.to_string()));
            return Ok(fields);
        }

        let tokens: Vec<&str> = line
            .split(|c: char| self.delimiters.contains(&c))
            .filter(|t| !t.is_empty())
            .collect();

        for (name, column) in &self.columns {
            let Some(token) = tokens.get(column - 1) else {
                return Err(ExtractError::MissingColumn {
                    field: name.clone(),
                    column: *column,
                    found: tokens.len(),
                });
            };
            fields.insert(name.clone(), Value::String((*token).to_string()));
        }
        Ok(fields)
    }
}

#[derive(Debug, Clone)]
pub struct JsonExtractor {
    paths: Vec<(String, Vec<String>)>,
}

impl JsonExtractor {
    #[must_use]
    pub fn new(fields: &[crate::task::PeckField]) -> Self {
        let paths = fields
            .iter()
            .map(|f| {
                let path = if f.value.is_empty() { &f.name } else { &f.value };
                (f.name.clone(), path.split('.').map(str::to_string).collect())
            })
            .collect();
        JsonExtractor { paths }
    }
}

impl Extractor for JsonExtractor {
    fn extract(&self, line: &str) -> Result<Fields, ExtractError> {
        let Value::Object(object) = serde_json::from_str::<Value>(line)? else {
            return Err(ExtractError::NotAnObject);
        };
        if self.paths.is_empty() {
            return Ok(object);
        }

        let mut fields = Fields::new();
        for (name, path) in &self.paths {
            let mut current = object.get(path[0].as_str());
            for key in &path[1..] {
                current = current.and_then(|v| v.get(key.as_str()));
            }
            if let Some(value) = current {
                fields.insert(name.clone(), value.clone());
            }
        }
        Ok(fields)
    }
}
