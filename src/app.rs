use crate::config::PipelineConfig;
use crate::ddl::bootstrap_statements;
use crate::logging::{JsonLineLogger, LogRotationPolicy};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::env;

const CONFIG_ENV: &str = "COLSTREAM_CONFIG";

/// Application entrypoint: load and validate configuration, then either
/// print the storage bootstrap DDL or report the effective settings. Broker
/// and store wiring belong to the deployment layer; this binary is the
/// operator surface for config validation and schema emission.
pub fn run() -> Result<()> {
    let mut print_schema = false;
    let mut config_path: Option<String> = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--print-schema" => print_schema = true,
            "--help" | "-h" => {
                eprintln!("usage: colstream [--print-schema] [config.json]");
                return Ok(());
            }
            other if other.starts_with('-') => {
                return Err(anyhow!("unknown argument: {other}"));
            }
            path => config_path = Some(path.to_string()),
        }
    }

    let config_path = config_path.or_else(|| env::var(CONFIG_ENV).ok());
    let config = match &config_path {
        Some(path) => PipelineConfig::load_from_file(path)
            .with_context(|| format!("loading pipeline config from {path}"))?,
        None => PipelineConfig::default(),
    };

    let mut logger = JsonLineLogger::new(LogRotationPolicy::default());
    logger.log(
        Utc::now(),
        crate::logging::LogLevel::Info,
        "colstream::app",
        "configuration validated",
        &[
            ("cluster", config.cluster.as_str()),
            ("database", config.database.as_str()),
            ("topic", config.topic.as_str()),
        ],
    )?;

    if print_schema {
        for statement in bootstrap_statements(&config) {
            println!("{statement};");
            println!();
        }
        return Ok(());
    }

    let effective = serde_json::to_string_pretty(&config)?;
    println!("{effective}");
    Ok(())
}
