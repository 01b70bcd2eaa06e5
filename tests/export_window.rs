use chrono::{DateTime, Duration, TimeZone, Utc};
use colstream::{ExportWindow, WindowError, WindowMode, DEFAULT_LOOKBACK_DAYS};
use std::str::FromStr;

fn ts(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 6, 1, hour, 0, 0).unwrap()
}

#[test]
fn rejects_inverted_and_empty_intervals() {
    let err = ExportWindow::new(1, ts(12), ts(10)).unwrap_err();
    assert!(matches!(err, WindowError::EmptyInterval { .. }));
    let err = ExportWindow::new(1, ts(12), ts(12)).unwrap_err();
    assert!(matches!(err, WindowError::EmptyInterval { .. }));
}

#[test]
fn interval_is_half_open() {
    let window = ExportWindow::new(1, ts(10), ts(12)).unwrap();
    assert!(window.contains(ts(10)));
    assert!(window.contains(ts(11)));
    assert!(!window.contains(ts(12)));
    assert!(!window.contains(ts(9)));
}

#[test]
fn lookback_defaults_to_one_day() {
    let window = ExportWindow::new(1, ts(10), ts(12)).unwrap();
    assert_eq!(window.lookback_days(), DEFAULT_LOOKBACK_DAYS);
    assert_eq!(window.lagged_start(), ts(10) - Duration::days(1));
    assert_eq!(window.extended_end(), ts(12) + Duration::days(1));
}

#[test]
fn lookback_override_extends_the_lag() {
    let window = ExportWindow::new(1, ts(10), ts(12))
        .unwrap()
        .with_lookback_days(7)
        .unwrap();
    assert_eq!(window.lagged_start(), ts(10) - Duration::days(7));
}

#[test]
fn negative_lookback_is_rejected() {
    let err = ExportWindow::new(1, ts(10), ts(12))
        .unwrap()
        .with_lookback_days(-1)
        .unwrap_err();
    assert_eq!(err, WindowError::NegativeLookback(-1));
}

#[test]
fn empty_filters_admit_everything() {
    let window = ExportWindow::new(1, ts(10), ts(12)).unwrap();
    assert!(window.admits_event_type("$pageview"));
    assert!(window.admits_event_type("anything"));
}

#[test]
fn exclude_wins_over_include() {
    let window = ExportWindow::new(1, ts(10), ts(12))
        .unwrap()
        .with_include_event_types(["$pageview"])
        .with_exclude_event_types(["$pageview"]);
    assert!(!window.admits_event_type("$pageview"));
}

#[test]
fn mode_parsing_accepts_known_names_only() {
    assert_eq!(
        WindowMode::from_str("incremental").unwrap(),
        WindowMode::Incremental
    );
    assert_eq!(
        WindowMode::from_str("unbounded").unwrap(),
        WindowMode::Unbounded
    );
    assert_eq!(
        WindowMode::from_str("backfill").unwrap(),
        WindowMode::Backfill
    );
    let err = WindowMode::from_str("Incremental").unwrap_err();
    assert_eq!(err, WindowError::UnknownMode("Incremental".to_string()));
}

#[test]
fn mode_round_trips_through_display() {
    for mode in [
        WindowMode::Incremental,
        WindowMode::Unbounded,
        WindowMode::Backfill,
    ] {
        assert_eq!(WindowMode::from_str(&mode.to_string()).unwrap(), mode);
    }
}
