// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::path::Path;

use tracing_subscriber::{EnvFilter, Registry, prelude::*};

use crate::config::LogConfig;

/// Installs the global subscriber: a console layer and, when `log_dir` is
/// given, an hourly rolling log file.
pub fn setup_logger(config: &LogConfig, log_dir: Option<&Path>) {
    let mut layers: Vec<Box<dyn tracing_subscriber::layer::Layer<Registry> + Send + Sync>> =
        // console logger
        vec![Box::new(
            tracing_subscriber::fmt::Layer::new()
                .with_filter(get_env_filter(default_env_filter(config))),
        )];

    // file logger
    if let Some(log_dir) = log_dir {
        let file_appender = tracing_appender::rolling::hourly(log_dir, "sealer.log");
        layers.push(Box::new(
            tracing_subscriber::fmt::Layer::new()
                .with_ansi(false)
                .with_writer(file_appender)
                .with_filter(get_env_filter(default_env_filter(config))),
        ));
    }

    tracing_subscriber::registry().with(layers).init();
}

/// Returns an [`EnvFilter`] according to the `RUST_LOG` environment variable, or the given
/// default.
fn get_env_filter(def: EnvFilter) -> EnvFilter {
    use std::env::{
        self,
        VarError::{NotPresent, NotUnicode},
    };
    match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(s) => EnvFilter::new(s),
        Err(NotPresent) => def,
        Err(NotUnicode(_)) => EnvFilter::default(),
    }
}

fn default_env_filter(config: &LogConfig) -> EnvFilter {
    let custom = config.to_filter_string();
    match custom.is_empty() {
        true => EnvFilter::new("info"),
        false => EnvFilter::new(format!("info,{custom}")),
    }
}

#[test]
fn test_default_env_filter() {
    let _did_not_panic = default_env_filter(&LogConfig::default());
    let _did_not_panic = default_env_filter(&LogConfig { filters: vec![] });
}
