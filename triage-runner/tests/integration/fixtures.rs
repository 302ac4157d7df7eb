// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use color_eyre::eyre::{Result, WrapErr};
use std::fmt::Write;
use triage_runner::{
    bugs::BugRegistry,
    config::{TestcasePairing, TriageConfig},
    failure_location::FailureLocationExtractor,
    inherit::TriageEngine,
    run::{RunDocument, RunInfo},
    similarity::{SimilarityLabeler, TermVectorIndex},
    store::{DocumentStore, InMemoryStore},
};
use triage_xunit::Report;

pub(crate) const PLAN_ID: &str = "RT-1.1";

#[derive(Copy, Clone, Debug)]
pub(crate) enum Outcome {
    Pass,
    Fail(&'static str),
    Skip,
}

pub(crate) fn run_info(run_id: &str) -> RunInfo {
    RunInfo {
        firex_id: run_id.to_owned(),
        group: "b4-featureprofiles".to_owned(),
        lineup: "dut-lineup".to_owned(),
        tag: "25.1.1".to_owned(),
        ..RunInfo::default()
    }
}

/// Renders a single-suite xUnit report for [`PLAN_ID`].
pub(crate) fn xunit(testcases: &[(&str, Outcome)]) -> String {
    xunit_at(&timestamp(0), testcases)
}

/// The timestamp of the `n`th run a [`Harness`] processes, in seconds after a fixed start.
pub(crate) fn timestamp(n: usize) -> String {
    format!("2024-06-01T00:{:02}:{:02}", n / 60, n % 60)
}

pub(crate) fn xunit_at(timestamp: &str, testcases: &[(&str, Outcome)]) -> String {
    let failures = testcases
        .iter()
        .filter(|(_, outcome)| matches!(outcome, Outcome::Fail(_)))
        .count();
    let skipped = testcases
        .iter()
        .filter(|(_, outcome)| matches!(outcome, Outcome::Skip))
        .count();

    let mut out = String::new();
    writeln!(
        out,
        r#"<testsuites><testsuite name="{PLAN_ID}" tests="{}" failures="{failures}" errors="0" skipped="{skipped}" disabled="0" timestamp="{timestamp}">"#,
        testcases.len(),
    )
    .expect("writing to a string succeeds");
    writeln!(
        out,
        r#"<properties><property name="test.plan_id" value="{PLAN_ID}"/></properties>"#
    )
    .expect("writing to a string succeeds");
    for (name, outcome) in testcases {
        match outcome {
            Outcome::Pass => writeln!(out, r#"<testcase name="{name}" time="1.5"/>"#),
            Outcome::Skip => writeln!(
                out,
                r#"<testcase name="{name}" time="0"><skipped/></testcase>"#
            ),
            Outcome::Fail(log) => writeln!(
                out,
                r#"<testcase name="{name}" time="2"><failure message="Failed">{log}</failure></testcase>"#
            ),
        }
        .expect("writing to a string succeeds");
    }
    out.push_str("</testsuite></testsuites>\n");
    out
}

pub(crate) struct Harness {
    pub(crate) config: TriageConfig,
    pub(crate) store: InMemoryStore,
    runs: usize,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self {
            config: TriageConfig::default(),
            store: InMemoryStore::new(),
            runs: 0,
        }
    }

    pub(crate) fn with_pairing(pairing: TestcasePairing) -> Self {
        let mut harness = Self::new();
        harness.config.inheritance.pairing = pairing;
        harness
    }

    pub(crate) fn engine(&self, registry: BugRegistry) -> Result<TriageEngine> {
        let index = TermVectorIndex::from_documents(&self.store.documents()?);
        Ok(TriageEngine::new(
            &self.config,
            registry,
            SimilarityLabeler::new(Box::new(index), &self.config.similarity),
            FailureLocationExtractor::new(&self.config.failure_locations),
        ))
    }

    pub(crate) fn with_lookback(verification_lookback: usize) -> Self {
        let mut harness = Self::new();
        harness.config.inheritance.verification_lookback = verification_lookback;
        harness
    }

    /// Processes and stores a run with trackers offline.
    ///
    /// Each run is one second after the previous one, see [`timestamp`].
    pub(crate) fn run(
        &mut self,
        run_id: &str,
        testcases: &[(&str, Outcome)],
    ) -> Result<RunDocument> {
        let registry = BugRegistry::offline(self.config.github.placeholders.clone());
        self.run_with(run_id, testcases, registry)
    }

    pub(crate) fn run_with(
        &mut self,
        run_id: &str,
        testcases: &[(&str, Outcome)],
        registry: BugRegistry,
    ) -> Result<RunDocument> {
        self.runs += 1;
        let report = Report::deserialize_lenient(&xunit_at(&timestamp(self.runs), testcases))
            .wrap_err("fixture report is well-formed")?;
        let mut engine = self.engine(registry)?;
        let mut documents = engine.process_run(&mut self.store, &run_info(run_id), report)?;
        assert_eq!(documents.len(), 1, "one document per fixture report");
        Ok(documents.remove(0))
    }

    /// Stores a triaged version of `document`, as if someone labeled it and confirmed the label.
    pub(crate) fn store_verified(
        &mut self,
        mut document: RunDocument,
        labels: &[(&str, &str)],
        verified_by: &str,
    ) -> Result<()> {
        for (name, _) in labels {
            if let Some(record) = document
                .testcases
                .iter_mut()
                .find(|record| record.name == *name)
            {
                record.verified_by = Some(verified_by.to_owned());
            }
        }
        self.store_labeled(document, labels)
    }

    /// Stores a triaged version of `document`, as if someone labeled it.
    pub(crate) fn store_labeled(
        &mut self,
        mut document: RunDocument,
        labels: &[(&str, &str)],
    ) -> Result<()> {
        for (name, label) in labels {
            let record = document
                .testcases
                .iter_mut()
                .find(|record| record.name == *name)
                .unwrap_or_else(|| panic!("testcase {name} exists"));
            record.label = (*label).to_owned();
        }
        self.store.insert_one(document)?;
        Ok(())
    }
}
