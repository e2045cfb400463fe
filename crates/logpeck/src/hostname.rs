// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host identification stamped on shipped records.

use std::env;
use tracing::warn;

/// Get the host identifier
///
/// Resolution order:
/// 1. LOGPECK_HOSTNAME environment variable
/// 2. HOSTNAME environment variable
/// 3. System hostname via nix::unistd::gethostname()
/// 4. "unknown"
#[must_use]
pub fn get_hostname() -> String {
    for var in ["LOGPECK_HOSTNAME", "HOSTNAME"] {
        if let Ok(hostname) = env::var(var) {
            if !hostname.is_empty() {
                return hostname;
            }
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str() {
                if !hostname.is_empty() {
                    return hostname.to_string();
                }
            }
        }
        Err(e) => warn!("HOSTNAME | Failed to get system hostname: {}", e),
    }

    warn!("HOSTNAME | Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}
