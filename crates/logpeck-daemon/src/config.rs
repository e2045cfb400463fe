// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use anyhow::Context;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 7117;
const DEFAULT_DB_PATH: &str = "logpeck.db";
const DEFAULT_SEND_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_level: String,
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub send_timeout: Duration,
}

impl Config {
    /// Reads `LOGPECK_*` variables. A set but unparseable number is an error.
    pub fn from_env() -> anyhow::Result<Self> {
        let log_level = env::var("LOGPECK_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());
        let host = env::var("LOGPECK_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string());
        let port = match env::var("LOGPECK_PORT") {
            Ok(port) => port
                .parse::<u16>()
                .with_context(|| format!("invalid LOGPECK_PORT {port:?}"))?,
            Err(_) => DEFAULT_PORT,
        };
        let db_path = env::var("LOGPECK_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH));
        let send_timeout_ms = match env::var("LOGPECK_SEND_TIMEOUT_MS") {
            Ok(ms) => ms
                .parse::<u64>()
                .with_context(|| format!("invalid LOGPECK_SEND_TIMEOUT_MS {ms:?}"))?,
            Err(_) => DEFAULT_SEND_TIMEOUT_MS,
        };

        Ok(Config {
            log_level,
            host,
            port,
            db_path,
            send_timeout: Duration::from_millis(send_timeout_ms),
        })
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
