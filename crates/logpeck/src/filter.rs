// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Keyword line filter built from a task's `FilterExpr`.
//!
//! The expression is a whitespace separated list of keywords:
//!
//! - `-keyword` excludes: a line containing it is dropped.
//! - `keyword` includes: when any include keyword is configured, a line is dropped unless it
//!   contains at least one of them.
//!
//! Exclusions are evaluated first. An empty expression keeps every line.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeckFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl PeckFilter {
    #[must_use]
    pub fn new(expr: &str) -> Self {
        let mut filter = PeckFilter::default();
        for keyword in expr.split_whitespace() {
            match keyword.strip_prefix('-') {
                Some("") => {}
                Some(excluded) => filter.exclude.push(excluded.to_string()),
                None => filter.include.push(keyword.to_string()),
            }
        }
        filter
    }

    /// Returns true when the line must be discarded.
    #[must_use]
    pub fn drop(&self, line: &str) -> bool {
        if self.exclude.iter().any(|k| line.contains(k.as_str())) {
            return true;
        }
        !self.include.is_empty() && !self.include.iter().any(|k| line.contains(k.as_str()))
    }
}
