//! In-process runs of every scenario that returns normally.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use oslayer_harness::structured_log::validate_log_file;
use oslayer_harness::{LogEmitter, Outcome, Scenario, ScenarioOptions, scenarios};

fn unique_tmp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time should be after UNIX_EPOCH")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn small_options() -> ScenarioOptions {
    ScenarioOptions {
        seed: 7,
        iterations: 16,
        capacity: 32,
    }
}

fn run_logged(scenario: Scenario) -> oslayer_harness::ScenarioReport {
    let dir = unique_tmp_dir(scenario.name());
    let log_path = dir.join("scenario.log.jsonl");
    let mut log = LogEmitter::to_file(&log_path, "scenario_test", "run1").expect("open log");
    let report = scenarios::run(scenario, &small_options(), &mut log)
        .unwrap_or_else(|err| panic!("{scenario} failed: {err}"));
    drop(log);

    let (lines, errors) = validate_log_file(&log_path).expect("read log");
    assert!(lines >= 2, "expected start and end entries, got {lines}");
    assert!(errors.is_empty(), "log violations: {errors:?}");
    report
}

#[test]
fn thread_release_race_passes_and_returns_every_entity() {
    let report = run_logged(Scenario::ThreadReleaseRace);
    assert_eq!(report.outcome, Outcome::Pass);
    assert_eq!(report.in_use_after, 0);
    assert_eq!(report.allocations, report.releases);
}

#[test]
fn delayed_handle_release_passes() {
    let report = run_logged(Scenario::DelayedHandleRelease);
    assert_eq!(report.outcome, Outcome::Pass);
    assert_eq!(report.allocations, 1);
    assert_eq!(report.releases, 1);
}

#[test]
fn mutex_exclusion_passes() {
    let report = run_logged(Scenario::MutexExclusion);
    assert_eq!(report.outcome, Outcome::Pass);
    let sections = report.details.as_ref().and_then(|d| d["critical_sections"].as_u64());
    assert_eq!(sections, Some(2 * 16));
}

#[test]
fn pool_conservation_passes() {
    let report = run_logged(Scenario::PoolConservation);
    assert_eq!(report.outcome, Outcome::Pass);
    assert_eq!(report.in_use_after, 0);
    assert!(report.allocations > 0);
}

#[test]
fn safe_call_restoration_passes() {
    let report = run_logged(Scenario::SafeCallRestoration);
    assert_eq!(report.outcome, Outcome::Pass);
}

#[test]
fn same_seed_gives_same_pool_counters() {
    let mut log = LogEmitter::sink("scenario_test", "det");
    let first = scenarios::run(Scenario::PoolConservation, &small_options(), &mut log).unwrap();
    let second = scenarios::run(Scenario::PoolConservation, &small_options(), &mut log).unwrap();
    assert_eq!(first.allocations, second.allocations);
    assert_eq!(first.releases, second.releases);
}

#[test]
fn report_serializes_with_snake_case_scenario() {
    let mut log = LogEmitter::sink("scenario_test", "json");
    let report =
        scenarios::run(Scenario::SafeCallRestoration, &small_options(), &mut log).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["scenario"], "safe_call_restoration");
    assert_eq!(json["outcome"], "pass");
}

#[test]
fn scenario_names_are_unique_and_terminating_set_is_exact() {
    let mut names: Vec<_> = Scenario::ALL.iter().map(|s| s.name()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), Scenario::ALL.len());

    let terminating: Vec<_> = Scenario::ALL
        .into_iter()
        .filter(|s| s.terminates_process())
        .collect();
    assert_eq!(
        terminating,
        [
            Scenario::ExhaustPool,
            Scenario::NestedFault,
            Scenario::GuardedStackOverflow
        ]
    );
}
