// Copyright 2024 chonkfs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use snafu::{ResultExt, Whatever};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{
    filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

/// The environment variable overriding every default filter directive.
pub const CHONKFS_LOG: &str = "CHONKFS_LOG";

/// Installs a fmt subscriber writing to the test writer, filtered by
/// `CHONKFS_LOG` and `debug` otherwise. Later calls are no-ops, so every
/// test may call it.
pub fn install_fmt_log() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(create_env_filter("debug"))
        .with_test_writer()
        .try_init();
}

/// Configuration for chonkfs logging in a host process.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Whether to write logs to stdout, otherwise they go to stderr.
    pub log_to_stdout:  bool,
    /// The default filter directive (in the sense of [EnvFilter]) to use for
    /// logs. Will be overridden by the `CHONKFS_LOG` environment variable if
    /// set.
    pub default_filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_to_stdout:  false,
            default_filter: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn init_tracing_subscriber(self) -> Result<(), Whatever> {
        let env_filter = create_env_filter(&self.default_filter);
        // Don't create the subscriber if we'll never emit any logs
        if env_filter.max_level_hint() == Some(LevelFilter::OFF) {
            return Ok(());
        }

        let (stdout_layer, stderr_layer) = if self.log_to_stdout {
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(supports_color::on(supports_color::Stream::Stdout).is_some())
                .with_filter(env_filter);
            (Some(layer), None)
        } else {
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(supports_color::on(supports_color::Stream::Stderr).is_some())
                .with_writer(std::io::stderr)
                .with_filter(env_filter);
            (None, Some(layer))
        };

        tracing_subscriber::registry()
            .with(stdout_layer)
            .with(stderr_layer)
            .try_init()
            .whatever_context("a global tracing subscriber is already installed")
    }
}

/// Create the logging config from the CHONKFS_LOG environment variable or
/// the default config if that variable is unset.
fn create_env_filter(filter: &str) -> EnvFilter {
    EnvFilter::try_from_env(CHONKFS_LOG).unwrap_or_else(|_| EnvFilter::new(filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_twice() {
        install_fmt_log();
        install_fmt_log();
        tracing::debug!("still logging");
    }

    #[test]
    fn off_filter_installs_nothing() {
        if std::env::var_os(CHONKFS_LOG).is_some() {
            return;
        }
        let config = LoggingConfig {
            default_filter: "off".to_string(),
            ..Default::default()
        };
        assert!(config.init_tracing_subscriber().is_ok());
    }
}
