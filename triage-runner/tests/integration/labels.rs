// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{Harness, Outcome, PLAN_ID, run_info, xunit};
use camino_tempfile::Utf8TempDir;
use color_eyre::eyre::Result;
use pretty_assertions::assert_eq;
use triage_runner::{
    bugs::BugRegistry,
    failure_location::FailureLocationExtractor,
    inherit::TriageEngine,
    run::CaseStatus,
    similarity::{SimilarityLabeler, TermVectorIndex},
    store::{DocumentStore, JsonLinesStore, LabelStatusCount},
};
use triage_xunit::Report;

#[test]
fn new_failures_get_proposed_labels() -> Result<()> {
    let mut harness = Harness::new();
    let base = harness.run(
        "run-1",
        &[
            ("TestBGP", Outcome::Fail("bgp_test.go:42: BGP session went down")),
            ("TestISIS", Outcome::Fail("isis_test.go:88: ISIS adjacency never came up")),
        ],
    )?;
    harness.store_labeled(base, &[("TestBGP", "bgp flap"), ("TestISIS", "isis adjacency")])?;

    // A different lineup has no history, so every failure is new.
    let report = Report::deserialize_lenient(&xunit(&[(
        "TestLLDP",
        Outcome::Fail("lldp_test.go:10: BGP session went down after LLDP restart"),
    )]))?;
    let mut info = run_info("run-2");
    info.lineup = "other-lineup".to_owned();
    let mut engine = harness.engine(BugRegistry::offline(Vec::new()))?;
    let documents = engine.process_run(&mut harness.store, &info, report)?;

    let record = &documents[0].testcases[0];
    assert_eq!(record.status, CaseStatus::Failed);
    assert_eq!(record.label, "");
    assert_eq!(record.generated_labels, vec!["bgp flap", "isis adjacency"]);
    assert_eq!(documents[0].triage_summary.proposed_labels, 1);
    Ok(())
}

#[test]
fn json_lines_store_end_to_end() -> Result<()> {
    let dir = Utf8TempDir::new()?;
    let path = dir.path().join("runs.jsonl");
    let harness = Harness::new();
    let config = &harness.config;

    let run = |run_id: &str, testcases: &[(&str, Outcome)]| -> Result<()> {
        let mut store = JsonLinesStore::open(&path)?;
        let index = TermVectorIndex::from_documents(&store.documents()?);
        let mut engine = TriageEngine::new(
            config,
            BugRegistry::offline(Vec::new()),
            SimilarityLabeler::new(Box::new(index), &config.similarity),
            FailureLocationExtractor::new(&config.failure_locations),
        );
        let report = Report::deserialize_lenient(&xunit(testcases))?;
        engine.process_run(&mut store, &run_info(run_id), report)?;
        Ok(())
    };

    run("run-1", &[("TestBGP", Outcome::Fail("bgp_test.go:42: down")), ("TestISIS", Outcome::Pass)])?;
    run("run-2", &[("TestBGP", Outcome::Fail("bgp_test.go:42: down")), ("TestISIS", Outcome::Pass)])?;

    let store = JsonLinesStore::open(&path)?;
    let latest = store
        .latest_matching("b4-featureprofiles", PLAN_ID, "dut-lineup")?
        .expect("run-2 is stored");
    assert_eq!(latest.run_id, "run-2");
    assert!(latest.testcases.iter().all(|record| record.inherited_label));

    assert_eq!(
        store.aggregate_by_label_and_status()?,
        vec![
            LabelStatusCount {
                label: String::new(),
                status: CaseStatus::Failed,
                count: 2,
            },
            LabelStatusCount {
                label: "Test Passed. No Label Required.".to_owned(),
                status: CaseStatus::Passed,
                count: 2,
            },
        ]
    );
    Ok(())
}
