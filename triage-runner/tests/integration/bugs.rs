// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{Harness, Outcome};
use color_eyre::eyre::Result;
use maplit::hashmap;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use triage_runner::{
    bugs::{
        Bug, BugBackend, BugKind, BugRegistry, DdtsBackend, DdtsRecord, DdtsRecordsFile,
        GithubBackend, GithubClient, GithubItemState, GithubRef, GithubUser, TechZoneBackend,
    },
    errors::TrackerError,
    run::Health,
};

const OPEN_DDTS: &str = "CSCwk00001";
const CLOSED_DDTS: &str = "CSCwk00002";
const RESOLVED_DDTS: &str = "CSCwk00003";
const OPEN_ISSUE: &str = "https://github.com/openconfig/featureprofiles/issues/1";
const MERGED_PULL: &str = "https://github.com/openconfig/featureprofiles/pull/2";
const PLACEHOLDER: &str = "New Failure. TODO";

struct FakeGithub {
    issues: HashMap<u64, GithubItemState>,
    pulls: HashMap<u64, GithubItemState>,
}

impl GithubClient for FakeGithub {
    fn issue(&self, _reference: &GithubRef, number: u64) -> Result<GithubItemState, TrackerError> {
        self.issues
            .get(&number)
            .cloned()
            .ok_or_else(|| TrackerError::RecordNotFound {
                id: number.to_string(),
            })
    }

    fn pull(&self, _reference: &GithubRef, number: u64) -> Result<GithubItemState, TrackerError> {
        self.pulls
            .get(&number)
            .cloned()
            .ok_or_else(|| TrackerError::RecordNotFound {
                id: number.to_string(),
            })
    }
}

fn registry(placeholders: Vec<String>) -> BugRegistry {
    let mut closed = DdtsRecord::new(CLOSED_DDTS, "J");
    closed.closed = Some("240530".to_owned());
    let mut resolved = DdtsRecord::new(RESOLVED_DDTS, "R");
    resolved.closed = Some("240530".to_owned());
    let ddts = DdtsRecordsFile::from_records([DdtsRecord::new(OPEN_DDTS, "A"), closed, resolved]);

    let github = FakeGithub {
        issues: hashmap! {
            1 => GithubItemState {
                state: "open".to_owned(),
                user: Some(GithubUser { login: "octocat".to_owned() }),
                ..GithubItemState::default()
            },
        },
        pulls: hashmap! {
            2 => GithubItemState {
                state: "closed".to_owned(),
                merged: true,
                ..GithubItemState::default()
            },
        },
    };

    BugRegistry::new(
        DdtsBackend::new(Box::new(ddts)),
        GithubBackend::new(Box::new(github), placeholders),
        TechZoneBackend,
    )
}

fn history_bugs() -> Vec<Bug> {
    vec![
        Bug::new(OPEN_DDTS, BugKind::Ddts),
        Bug::new(CLOSED_DDTS, BugKind::Ddts),
        Bug::new(RESOLVED_DDTS, BugKind::Ddts),
        Bug::new(OPEN_ISSUE, BugKind::Github),
        Bug::new(MERGED_PULL, BugKind::Github),
        Bug::new(PLACEHOLDER, BugKind::Github),
        Bug::new("TZ-1234", BugKind::TechZone),
    ]
}

fn harness_with_bugs() -> Result<Harness> {
    let mut harness = Harness::new();
    let mut base = harness.run("run-1", &[("TestBGP", Outcome::Pass)])?;
    base.bugs = history_bugs();
    harness.store_labeled(base, &[])?;
    Ok(harness)
}

#[test]
fn carry_forward() -> Result<()> {
    let mut harness = harness_with_bugs()?;
    let placeholders = harness.config.github.placeholders.clone();
    let next = harness.run_with("run-2", &[("TestBGP", Outcome::Pass)], registry(placeholders))?;

    let carried: Vec<_> = next
        .bugs
        .iter()
        .map(|bug| (bug.name.as_str(), bug.kind, bug.resolved()))
        .collect();
    assert_eq!(
        carried,
        vec![
            (OPEN_DDTS, BugKind::Ddts, false),
            (OPEN_ISSUE, BugKind::Github, false),
            (MERGED_PULL, BugKind::Github, true),
            ("TZ-1234", BugKind::TechZone, false),
        ]
    );

    let issue = &next.bugs[1];
    assert_eq!(issue.username, "octocat");
    assert_eq!(issue.status.as_deref(), Some("open"));
    assert_eq!(next.bugs[2].status.as_deref(), Some("merged"));
    Ok(())
}

#[test]
fn failure_with_resolved_bug_is_regression() -> Result<()> {
    let mut harness = Harness::new();
    let resolved = registry(Vec::new())
        .backend(BugKind::Github)
        .inherit(MERGED_PULL)
        .expect("merged pull requests are carried forward");
    assert!(resolved.resolved());

    let mut base = harness.run("run-1", &[("TestBGP", Outcome::Fail("bgp_test.go:42: down"))])?;
    base.testcases[0].bugs = vec![resolved];
    harness.store_labeled(base, &[("TestBGP", "L1")])?;

    let next = harness.run("run-2", &[("TestBGP", Outcome::Fail("bgp_test.go:42: down"))])?;
    let record = &next.testcases[0];
    assert_eq!(record.label, "L1");
    assert!(record.regression);
    assert_eq!(next.triage_summary.regressions, 1);
    Ok(())
}

#[test]
fn passing_suite_with_open_ddts_is_unstable() -> Result<()> {
    let mut harness = harness_with_bugs()?;
    let next = harness.run_with(
        "run-2",
        &[("TestBGP", Outcome::Pass)],
        registry(Vec::new()),
    )?;
    assert_eq!(next.health, Health::Unstable);
    Ok(())
}

#[test]
fn failing_suite_is_never_unstable() -> Result<()> {
    let mut harness = harness_with_bugs()?;
    let next = harness.run_with(
        "run-2",
        &[("TestBGP", Outcome::Fail("bgp_test.go:42: down"))],
        registry(Vec::new()),
    )?;
    assert_eq!(next.health, Health::Ok);
    assert!(next.bugs.iter().any(|bug| bug.name == OPEN_DDTS));
    Ok(())
}

#[test]
fn offline_trackers() -> Result<()> {
    let mut harness = harness_with_bugs()?;
    let next = harness.run("run-2", &[("TestBGP", Outcome::Pass)])?;

    // DDTS lookups fail closed, GitHub lookups fail open.
    let carried: Vec<_> = next.bugs.iter().map(|bug| bug.name.as_str()).collect();
    assert_eq!(carried, vec![OPEN_ISSUE, MERGED_PULL, "TZ-1234"]);
    assert_eq!(next.health, Health::Ok);
    Ok(())
}

#[test]
fn no_history_no_bugs() -> Result<()> {
    let mut harness = Harness::new();
    let document = harness.run_with("run-1", &[("TestBGP", Outcome::Pass)], registry(Vec::new()))?;
    assert!(document.bugs.is_empty());
    assert_eq!(document.health, Health::Ok);
    Ok(())
}
