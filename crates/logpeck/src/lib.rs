// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Task orchestration and windowed aggregation for a tailing log shipper.
//!
//! A [`pecker::Pecker`] owns every configured task. Tasks watching the same file share one
//! [`log_task::LogTask`], which tails the file and hands each line to every subscribed
//! [`peck_task::PeckTask`]. A peck task runs its line through a filter and an extractor,
//! optionally folds the extracted fields into a time-bucketed [`aggregator::Aggregator`],
//! and ships the result through a [`sender::Sender`].
//!
//! ```text
//!   file ──> LogTask ──> PeckTask ──> filter ──> extractor ──> [aggregator] ──> sender
//!                   └──> PeckTask ──> ...
//! ```
//!
//! Control flows top-down through the pecker; data flows bottom-up from the tailed file.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod aggregator;
pub mod errors;
pub mod extractor;
pub mod filter;
pub mod hostname;
pub mod log_task;
pub mod peck_task;
pub mod pecker;
pub mod sender;
pub mod store;
pub mod tail;
pub mod task;

/// Structured field set produced by an extractor or an aggregation window.
pub type Fields = serde_json::Map<String, serde_json::Value>;
