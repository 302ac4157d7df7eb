// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{Harness, Outcome, timestamp};
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use triage_runner::{config::TestcasePairing, run::TestCaseRecord};

const BGP_LOG: &str = "bgp_test.go:42: BGP session to neighbor 192.0.2.1 went down";
const HOLD_TIMER_LOG: &str = "bgp_test.go:57: BGP hold timer expired";

fn origin_view(record: &TestCaseRecord) -> (Option<&str>, Option<&str>, Option<&str>) {
    (
        record.verified_by.as_deref(),
        record.original_verification_run_id.as_deref(),
        record.inheritance_date.as_deref(),
    )
}

#[test]
fn origin_is_oldest_verification() -> Result<()> {
    let mut harness = Harness::new();
    let first = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    harness.store_verified(first, &[("TestBGP", "L1")], "alice")?;
    let second = harness.run("run-2", &[("TestBGP", Outcome::Fail(HOLD_TIMER_LOG))])?;
    harness.store_verified(second, &[("TestBGP", "L1")], "bob")?;

    let next = harness.run("run-3", &[("TestBGP", Outcome::Fail(HOLD_TIMER_LOG))])?;
    let record = &next.testcases[0];
    assert_eq!(record.label, "L1");
    assert_eq!(
        origin_view(record),
        (Some("alice"), Some("run-1"), Some(timestamp(1).as_str()))
    );
    assert_eq!(
        record.inheritance_reason.as_deref(),
        Some(
            "Inherited label 'L1' (verified by alice in run [run-1] on 2024-06-01T00:00:01) \
             via predecessor [run-2]."
        )
    );

    // Scored against the log the label was verified with, not the predecessor's.
    let score = record.log_similarity_score.expect("both logs have terms");
    assert!(score > 0.0 && score < 1.0, "partial overlap, got {score}");
    Ok(())
}

#[test]
fn verifier_is_copied_forward() -> Result<()> {
    let mut harness = Harness::new();
    let first = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    harness.store_verified(first, &[("TestBGP", "L1")], "alice")?;

    let second = harness.run("run-2", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    assert_eq!(
        origin_view(&second.testcases[0]),
        (Some("alice"), Some("run-1"), Some(timestamp(1).as_str()))
    );
    let third = harness.run("run-3", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    assert_eq!(
        origin_view(&third.testcases[0]),
        (Some("alice"), Some("run-1"), Some(timestamp(1).as_str()))
    );
    Ok(())
}

#[test]
fn unverified_origin_is_oldest_run() -> Result<()> {
    let mut harness = Harness::new();
    let first = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    harness.store_labeled(first, &[("TestBGP", "L1")])?;
    harness.run("run-2", &[("TestBGP", Outcome::Fail(HOLD_TIMER_LOG))])?;

    let next = harness.run("run-3", &[("TestBGP", Outcome::Fail(HOLD_TIMER_LOG))])?;
    let record = &next.testcases[0];
    assert_eq!(
        origin_view(record),
        (None, Some("run-1"), Some(timestamp(1).as_str()))
    );
    assert_eq!(
        record.inheritance_reason.as_deref(),
        Some(
            "Inherited label 'L1' (origin run [run-1] on 2024-06-01T00:00:01, verified_by \
             Unknown) via predecessor [run-2]."
        )
    );

    // Without a verified origin, scored against the predecessor's log.
    let score = record.log_similarity_score.expect("both logs have terms");
    assert!((score - 1.0).abs() < 1e-9, "identical logs, got {score}");
    Ok(())
}

#[test]
fn relabel_stops_lookback() -> Result<()> {
    let mut harness = Harness::new();
    let first = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    harness.store_verified(first, &[("TestBGP", "L0")], "alice")?;
    let second = harness.run("run-2", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    harness.store_verified(second, &[("TestBGP", "L1")], "bob")?;

    let next = harness.run("run-3", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    let record = &next.testcases[0];
    assert_eq!(record.label, "L1");
    assert_eq!(
        origin_view(record),
        (Some("bob"), Some("run-2"), Some(timestamp(2).as_str()))
    );
    Ok(())
}

#[test]
fn missing_testcase_stops_lookback() -> Result<()> {
    let mut harness = Harness::with_pairing(TestcasePairing::ByName);
    let first = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    harness.store_verified(first, &[("TestBGP", "L1")], "alice")?;
    harness.run("run-2", &[("TestISIS", Outcome::Pass)])?;
    let third = harness.run("run-3", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    assert!(!third.testcases[0].inherited_label);
    harness.store_labeled(third, &[("TestBGP", "L1")])?;

    let next = harness.run("run-4", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    assert_eq!(
        origin_view(&next.testcases[0]),
        (None, Some("run-3"), Some(timestamp(3).as_str()))
    );
    Ok(())
}

#[test]
fn lookback_depth_is_bounded() -> Result<()> {
    let mut harness = Harness::with_lookback(1);
    let first = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    harness.store_verified(first, &[("TestBGP", "L1")], "alice")?;
    for run_id in ["run-2", "run-3"] {
        harness.run(run_id, &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    }

    let next = harness.run("run-4", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    assert_eq!(
        origin_view(&next.testcases[0]),
        (Some("alice"), Some("run-2"), Some(timestamp(2).as_str()))
    );
    Ok(())
}

#[test]
fn zero_lookback_keeps_predecessor_verifier() -> Result<()> {
    let mut harness = Harness::with_lookback(0);
    let first = harness.run("run-1", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    harness.store_verified(first, &[("TestBGP", "L1")], "alice")?;

    let next = harness.run("run-2", &[("TestBGP", Outcome::Fail(BGP_LOG))])?;
    let record = &next.testcases[0];
    assert_eq!(origin_view(record), (Some("alice"), None, None));
    assert_eq!(
        record.inheritance_reason.as_deref(),
        Some(
            "Inherited label 'L1' from predecessor [run-1] on 2024-06-01T00:00:01, origin \
             details not found."
        )
    );
    Ok(())
}

#[test]
fn passing_testcases_are_not_traced() -> Result<()> {
    let mut harness = Harness::new();
    harness.run("run-1", &[("TestBGP", Outcome::Pass)])?;
    harness.run("run-2", &[("TestBGP", Outcome::Pass)])?;

    let next = harness.run("run-3", &[("TestBGP", Outcome::Pass)])?;
    let record = &next.testcases[0];
    assert!(record.inherited_label);
    assert_eq!(origin_view(record), (None, None, None));
    assert_eq!(record.inheritance_reason, None);
    assert_eq!(record.log_similarity_score, None);
    Ok(())
}
