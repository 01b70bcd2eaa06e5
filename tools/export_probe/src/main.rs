use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use colstream::{EventLog, EventRecord, ExportAssembler, ExportQuery, PipelineConfig};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
struct Fixture {
    #[serde(default)]
    events: Vec<EventRecord>,
    window: FixtureWindow,
    mode: String,
}

#[derive(Debug, Deserialize)]
struct FixtureWindow {
    team_id: i64,
    interval_start: DateTime<Utc>,
    interval_end: DateTime<Utc>,
    #[serde(default)]
    include_events: Vec<String>,
    #[serde(default)]
    exclude_events: Vec<String>,
    #[serde(default)]
    lookback_days: Option<i32>,
}

fn main() -> Result<()> {
    let mut fixture_path: Option<PathBuf> = None;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--fixture" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow!("--fixture requires a path"))?;
                fixture_path = Some(PathBuf::from(path));
            }
            "--help" | "-h" => {
                eprintln!("usage: export_probe --fixture <path>");
                return Ok(());
            }
            other => return Err(anyhow!("unknown argument: {other}")),
        }
    }
    let fixture_path = fixture_path.ok_or_else(|| anyhow!("provide a --fixture path"))?;

    let payload = fs::read_to_string(&fixture_path)
        .with_context(|| format!("reading fixture {}", fixture_path.display()))?;
    let fixture: Fixture = serde_json::from_str(&payload)
        .with_context(|| format!("parsing fixture {}", fixture_path.display()))?;

    let mut log = EventLog::new();
    for event in fixture.events {
        log.append(event);
    }

    let config = PipelineConfig::default();
    let mut assembler = ExportAssembler::new(&config);
    let query: ExportQuery = assembler.assemble(
        fixture.window.team_id,
        fixture.window.interval_start,
        fixture.window.interval_end,
        &fixture.window.include_events,
        &fixture.window.exclude_events,
        fixture.window.lookback_days,
        &fixture.mode,
    )?;

    let rows = assembler.events(&log, &query)?;
    eprintln!("{} rows exported", rows.len());
    for row in rows {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(())
}
