use chrono::{DateTime, TimeZone, Utc};
use colstream::{
    EntityKeyLog, EntityKeyRecord, EntityPayloadLog, EventLog, EventRecord, ExportAssembler,
    ExportQuery, ExportWindow, PipelineConfig, QueryError, WindowError, WindowMode,
};
use std::time::Duration;
use uuid::Uuid;

fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, day, hour, 0, 0).unwrap()
}

fn event(id: u128, at: DateTime<Utc>) -> EventRecord {
    EventRecord {
        team_id: 1,
        event_type: "$pageview".to_string(),
        subject_id: "alice".to_string(),
        uuid: Uuid::from_u128(id),
        timestamp: at,
        inserted_at: Some(at),
        written_at: at,
        created_at: at,
        elements_chain: String::new(),
        properties: None,
        person_id: None,
        person_properties: None,
    }
}

fn assembler() -> ExportAssembler {
    ExportAssembler::new(&PipelineConfig::default())
}

#[test]
fn rejects_inverted_intervals_and_unknown_modes() {
    let asm = assembler();
    let err = asm
        .assemble(1, ts(2, 0), ts(1, 0), &[], &[], None, "incremental")
        .unwrap_err();
    assert!(matches!(
        err,
        QueryError::Window(WindowError::EmptyInterval { .. })
    ));

    let err = asm
        .assemble(1, ts(1, 0), ts(2, 0), &[], &[], None, "weekly")
        .unwrap_err();
    assert_eq!(
        err,
        QueryError::Window(WindowError::UnknownMode("weekly".to_string()))
    );
}

#[test]
fn default_lookback_comes_from_the_config() {
    let mut config = PipelineConfig::default();
    config.lookback_days = 3;
    let asm = ExportAssembler::new(&config);
    let query = asm
        .assemble(1, ts(1, 0), ts(2, 0), &[], &[], None, "incremental")
        .unwrap();
    assert_eq!(query.window().lookback_days(), 3);

    let query = asm
        .assemble(1, ts(1, 0), ts(2, 0), &[], &[], Some(5), "incremental")
        .unwrap();
    assert_eq!(query.window().lookback_days(), 5);
}

#[test]
fn zero_budget_times_out_with_no_rows_and_is_retryable() {
    let mut log = EventLog::new();
    log.append(event(1, ts(1, 6)));
    let mut asm = assembler();
    let query = asm
        .assemble(1, ts(1, 0), ts(2, 0), &[], &[], None, "incremental")
        .unwrap()
        .with_timeout(Duration::ZERO);

    let err = asm.events(&log, &query).unwrap_err();
    assert!(matches!(err, QueryError::Timeout { .. }));
    assert!(err.is_retryable());
    assert_eq!(asm.telemetry().queries_timed_out_total.get(), 1);

    // Identical retry without the exhausted budget succeeds.
    let retry = asm
        .assemble(1, ts(1, 0), ts(2, 0), &[], &[], None, "incremental")
        .unwrap();
    assert_eq!(asm.events(&log, &retry).unwrap().len(), 1);
}

#[test]
fn timed_out_scans_record_no_collapse_telemetry() {
    let mut log = EventLog::new();
    log.append(event(1, ts(1, 6)));
    log.append(event(1, ts(1, 7)));

    let mut asm = assembler();
    let query = asm
        .assemble(1, ts(1, 0), ts(2, 0), &[], &[], None, "incremental")
        .unwrap()
        .with_timeout(Duration::ZERO);
    let err = asm.events(&log, &query).unwrap_err();
    assert!(matches!(err, QueryError::Timeout { .. }));
    // The discarded scan leaves no trace beyond the timeout itself.
    assert_eq!(asm.telemetry().duplicates_collapsed_total.get(), 0);
    assert_eq!(asm.telemetry().queries_timed_out_total.get(), 1);
}

#[test]
fn integrity_errors_are_not_retryable() {
    let mut keys = EntityKeyLog::new();
    keys.append(EntityKeyRecord {
        team_id: 1,
        entity_key: "alice".to_string(),
        entity_id: Uuid::from_u128(9),
        version: 1,
        watermark: ts(1, 6),
    })
    .unwrap();
    let payloads = EntityPayloadLog::new();

    let mut asm = assembler();
    let query = asm
        .assemble(1, ts(1, 0), ts(2, 0), &[], &[], None, "incremental")
        .unwrap();
    let err = asm.persons(&keys, &payloads, &query).unwrap_err();
    assert!(matches!(err, QueryError::Integrity(_)));
    assert!(!err.is_retryable());
    assert_eq!(asm.telemetry().dangling_entities_total.get(), 1);
}

#[test]
fn duplicate_collapse_is_counted() {
    let mut log = EventLog::new();
    log.append(event(1, ts(1, 6)));
    log.append(event(1, ts(1, 7)));
    log.append(event(1, ts(1, 8)));

    let mut asm = assembler();
    let query = asm
        .assemble(1, ts(1, 0), ts(2, 0), &[], &[], None, "incremental")
        .unwrap();
    let rows = asm.events(&log, &query).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(asm.telemetry().duplicates_collapsed_total.get(), 2);
}

#[test]
fn backfill_equals_contiguous_incremental_sub_windows() {
    let mut log = EventLog::new();
    // Spread events across three days, including boundary instants.
    let mut id = 0u128;
    for day in 1..=3u32 {
        for hour in [0u32, 6, 12, 23] {
            id += 1;
            log.append(event(id, ts(day, hour)));
        }
    }
    // Redeliver a few of them with later watermarks.
    for (id, day, hour) in [(1u128, 1u32, 0u32), (6, 2, 6), (12, 3, 23)] {
        let mut dup = event(id, ts(day, hour));
        dup.inserted_at = Some(ts(day, hour) + chrono::Duration::minutes(5));
        log.append(dup);
    }

    let mut asm = assembler();
    let backfill = asm
        .assemble(1, ts(1, 0), ts(4, 0), &[], &[], None, "backfill")
        .unwrap();
    let whole = asm.events(&log, &backfill).unwrap();

    let mut stitched = Vec::new();
    for day in 1..=3u32 {
        let sub = asm
            .assemble(1, ts(day, 0), ts(day + 1, 0), &[], &[], None, "incremental")
            .unwrap();
        stitched.extend(asm.events(&log, &sub).unwrap());
    }

    assert_eq!(whole.len(), 12);
    assert_eq!(whole, stitched);
}

#[test]
fn queries_leave_the_logs_untouched() {
    let mut log = EventLog::new();
    log.append(event(1, ts(1, 6)));
    let before = log.len();

    let mut asm = assembler();
    let query = asm
        .assemble(1, ts(1, 0), ts(2, 0), &[], &[], None, "incremental")
        .unwrap();
    let first = asm.events(&log, &query).unwrap();
    let second = asm.events(&log, &query).unwrap();
    assert_eq!(first, second);
    assert_eq!(log.len(), before);
}

#[test]
fn export_query_exposes_mode_and_window() {
    let window = ExportWindow::new(7, ts(1, 0), ts(2, 0)).unwrap();
    let query = ExportQuery::new(window.clone(), WindowMode::Unbounded);
    assert_eq!(query.mode(), WindowMode::Unbounded);
    assert_eq!(query.window(), &window);
}
