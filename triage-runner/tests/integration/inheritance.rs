// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{Harness, Outcome};
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use triage_runner::{
    config::TestcasePairing,
    run::{CaseStatus, TestCaseRecord, TriageSummary},
};

const BGP_LOG: &str = "bgp_test.go:42: BGP session to neighbor 192.0.2.1 went down";
const ISIS_LOG: &str = "isis_test.go:88: ISIS adjacency never came up";

fn label_view(records: &[TestCaseRecord]) -> Vec<(&str, CaseStatus, Option<&str>, &str, bool)> {
    records
        .iter()
        .map(|record| {
            (
                record.name.as_str(),
                record.status,
                record.triage_status.as_deref(),
                record.label.as_str(),
                record.inherited_label,
            )
        })
        .collect()
}

#[test]
fn identical_statuses_copy_labels() -> Result<()> {
    let mut harness = Harness::new();
    let base = harness.run(
        "run-1",
        &[("TestBGP", Outcome::Fail(BGP_LOG)), ("TestISIS", Outcome::Fail(ISIS_LOG))],
    )?;
    harness.store_labeled(base, &[("TestBGP", "L1"), ("TestISIS", "L2")])?;

    let next = harness.run(
        "run-2",
        &[("TestBGP", Outcome::Fail(BGP_LOG)), ("TestISIS", Outcome::Fail(ISIS_LOG))],
    )?;
    assert_eq!(
        label_view(&next.testcases),
        vec![
            ("TestBGP", CaseStatus::Failed, Some("New"), "L1", true),
            ("TestISIS", CaseStatus::Failed, Some("New"), "L2", true),
        ]
    );
    for record in &next.testcases {
        assert_eq!(record.inheritance_source_run_id.as_deref(), Some("run-1"));
        assert!(record.generated_labels.is_empty());
        assert!(!record.regression);
    }
    assert_eq!(
        next.triage_summary,
        TriageSummary {
            inherited_labels: 2,
            ..TriageSummary::default()
        }
    );
    Ok(())
}

#[test]
fn triage_status_is_copied_verbatim() -> Result<()> {
    let mut harness = Harness::new();
    let mut base = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    base.testcases[0].triage_status = Some(TestCaseRecord::RESOLVED.to_owned());
    harness.store_labeled(base, &[("TestBGP", "L1")])?;

    let next = harness.run("run-2", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    assert_eq!(
        next.testcases[0].triage_status.as_deref(),
        Some(TestCaseRecord::RESOLVED)
    );
    // Failing again after being resolved counts as a regression.
    assert!(next.testcases[0].regression);
    assert_eq!(next.triage_summary.regressions, 1);
    Ok(())
}

#[test]
fn unresolved_failure_is_not_a_regression() -> Result<()> {
    let mut harness = Harness::new();
    let mut base = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    base.testcases[0].triage_status = Some("Investigating".to_owned());
    harness.store_labeled(base, &[("TestBGP", "L1")])?;

    let next = harness.run("run-2", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    assert!(!next.testcases[0].regression);
    assert_eq!(next.triage_summary.regressions, 0);
    Ok(())
}

#[test]
fn flip_to_pass_resets_label() -> Result<()> {
    let mut harness = Harness::new();
    let base = harness.run(
        "run-1",
        &[("TestBGP", Outcome::Fail(BGP_LOG)), ("TestISIS", Outcome::Pass)],
    )?;
    harness.store_labeled(base, &[("TestBGP", "L1")])?;

    let next = harness.run(
        "run-2",
        &[("TestBGP", Outcome::Pass), ("TestISIS", Outcome::Skip)],
    )?;
    assert_eq!(
        label_view(&next.testcases),
        vec![
            (
                "TestBGP",
                CaseStatus::Passed,
                None,
                "Test Passed. No Label Required.",
                false
            ),
            (
                "TestISIS",
                CaseStatus::Skipped,
                None,
                "Test Skipped. No Label Required.",
                false
            ),
        ]
    );
    assert!(next.testcases[0].inheritance_source_run_id.is_none());
    Ok(())
}

#[test]
fn flip_to_fail_is_new_regression() -> Result<()> {
    let mut harness = Harness::new();
    harness.run("run-1", &[("TestBGP", Outcome::Pass)])?;

    let next = harness.run("run-2", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    let record = &next.testcases[0];
    assert_eq!(record.triage_status.as_deref(), Some("New"));
    assert_eq!(record.label, "");
    assert!(record.regression);
    assert_eq!(record.logs.as_deref(), Some(BGP_LOG));
    assert_eq!(record.failed_code_path.len(), 1);
    assert_eq!(record.failed_code_path[0].file_name, "bgp_test.go:42");
    Ok(())
}

#[test]
fn extra_testcases_get_no_inheritance() -> Result<()> {
    let mut harness = Harness::new();
    let base = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    harness.store_labeled(base, &[("TestBGP", "L1")])?;

    let next = harness.run(
        "run-2",
        &[("TestBGP", Outcome::Fail(BGP_LOG)), ("TestISIS", Outcome::Fail(ISIS_LOG))],
    )?;
    assert_eq!(
        label_view(&next.testcases),
        vec![
            ("TestBGP", CaseStatus::Failed, Some("New"), "L1", true),
            ("TestISIS", CaseStatus::Failed, Some("New"), "", false),
        ]
    );
    Ok(())
}

#[test]
fn fewer_testcases_than_history() -> Result<()> {
    let mut harness = Harness::new();
    let base = harness.run(
        "run-1",
        &[("TestBGP", Outcome::Fail(BGP_LOG)), ("TestISIS", Outcome::Fail(ISIS_LOG))],
    )?;
    harness.store_labeled(base, &[("TestBGP", "L1"), ("TestISIS", "L2")])?;

    let next = harness.run("run-2", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    assert_eq!(next.testcases.len(), 1);
    assert_eq!(next.testcases[0].label, "L1");
    Ok(())
}

#[test]
fn pairing_is_positional_by_default() -> Result<()> {
    let mut harness = Harness::new();
    let base = harness.run(
        "run-1",
        &[("TestBGP", Outcome::Fail(BGP_LOG)), ("TestISIS", Outcome::Pass)],
    )?;
    harness.store_labeled(base, &[("TestBGP", "L1")])?;

    // Reordered testcases pair with whatever was at the same index.
    let next = harness.run(
        "run-2",
        &[("TestISIS", Outcome::Fail(ISIS_LOG)), ("TestBGP", Outcome::Pass)],
    )?;
    assert_eq!(
        label_view(&next.testcases),
        vec![
            ("TestISIS", CaseStatus::Failed, Some("New"), "L1", true),
            (
                "TestBGP",
                CaseStatus::Passed,
                None,
                "Test Passed. No Label Required.",
                true
            ),
        ]
    );
    Ok(())
}

#[test]
fn pairing_by_name() -> Result<()> {
    let mut harness = Harness::with_pairing(TestcasePairing::ByName);
    let base = harness.run(
        "run-1",
        &[("TestBGP", Outcome::Fail(BGP_LOG)), ("TestISIS", Outcome::Pass)],
    )?;
    harness.store_labeled(base, &[("TestBGP", "L1")])?;

    let next = harness.run(
        "run-2",
        &[("TestISIS", Outcome::Fail(ISIS_LOG)), ("TestBGP", Outcome::Fail(BGP_LOG))],
    )?;
    assert_eq!(
        label_view(&next.testcases),
        vec![
            ("TestISIS", CaseStatus::Failed, Some("New"), "", false),
            ("TestBGP", CaseStatus::Failed, Some("New"), "L1", true),
        ]
    );
    assert!(next.testcases[0].regression);
    assert!(!next.testcases[1].regression);
    Ok(())
}

#[test]
fn malformed_testsuite_is_skipped() -> Result<()> {
    use triage_runner::run::RunInfo;
    use triage_xunit::Report;

    let xml = r#"<testsuites>
        <testsuite name="broken" tests="many">
            <properties><property name="test.plan_id" value="RT-0"/></properties>
        </testsuite>
        <testsuite name="RT-1.1" tests="1" failures="0" errors="0">
            <properties><property name="test.plan_id" value="RT-1.1"/></properties>
            <testcase name="TestBGP"/>
        </testsuite>
    </testsuites>"#;

    let harness = Harness::new();
    let mut engine = harness.engine(triage_runner::bugs::BugRegistry::offline(Vec::new()))?;
    let report = Report::deserialize_lenient(xml)?;
    assert_eq!(report.testsuites.len(), 2);
    let documents = engine.process_report(&harness.store, &RunInfo::default(), report);
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].plan_id.as_deref(), Some("RT-1.1"));
    assert_eq!(documents[0].timestamp, "N/A");
    Ok(())
}
