// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Carry triage information from the previous run of a test plan into a new run.
//!
//! For every testsuite of an xUnit report, the [`TriageEngine`] looks up the most recent stored
//! run of the same plan on the same lineup. Testcases whose status did not change keep their
//! label, new failures are marked `New` and get proposed labels, and the previous run's bugs are
//! carried forward through the [`BugRegistry`].
//!
//! Inherited failures are traced further back to the run where their label was verified, see
//! [`VerificationOrigin`].

use crate::{
    bugs::{BugKind, BugRegistry},
    config::{LabelConfig, TestcasePairing, TriageConfig},
    errors::{DisplayErrorChain, ProcessRunError},
    failure_location::FailureLocationExtractor,
    run::{
        CaseStatus, Health, RunDocument, RunInfo, SuiteProperties, TestCaseRecord, TriageSummary,
        UNKNOWN, VerificationOrigin,
    },
    similarity::{SimilarityLabeler, log_similarity},
    store::DocumentStore,
};
use tracing::{debug, info, warn};
use triage_xunit::{DeserializedReport, Testsuite};

/// Produces triaged run documents from xUnit testsuites.
pub struct TriageEngine {
    labels: LabelConfig,
    pairing: TestcasePairing,
    verification_lookback: usize,
    registry: BugRegistry,
    labeler: SimilarityLabeler,
    extractor: FailureLocationExtractor,
}

impl TriageEngine {
    /// Creates a new engine.
    pub fn new(
        config: &TriageConfig,
        registry: BugRegistry,
        labeler: SimilarityLabeler,
        extractor: FailureLocationExtractor,
    ) -> Self {
        Self {
            labels: config.labels.clone(),
            pairing: config.inheritance.pairing,
            verification_lookback: config.inheritance.verification_lookback,
            registry,
            labeler,
            extractor,
        }
    }

    /// Triages every testsuite of `report` and stores the resulting documents together.
    ///
    /// History lookups only see documents stored before this call.
    pub fn process_run<S>(
        &mut self,
        store: &mut S,
        run_info: &RunInfo,
        report: DeserializedReport,
    ) -> Result<Vec<RunDocument>, ProcessRunError>
    where
        S: DocumentStore + ?Sized,
    {
        let documents = self.process_report(&*store, run_info, report);
        info!(
            "run {}: storing {} testsuite documents",
            run_info.firex_id,
            documents.len()
        );
        store
            .insert_many(documents.clone())
            .map_err(|err| ProcessRunError::Store {
                run_id: run_info.firex_id.clone(),
                err,
            })?;
        Ok(documents)
    }

    /// Triages every testsuite of `report` without storing anything.
    ///
    /// Testsuites that failed to parse or that have no properties are skipped.
    pub fn process_report<S>(
        &mut self,
        store: &S,
        run_info: &RunInfo,
        report: DeserializedReport,
    ) -> Vec<RunDocument>
    where
        S: DocumentStore + ?Sized,
    {
        let mut documents = Vec::new();
        for (idx, suite) in report.testsuites.into_iter().enumerate() {
            match suite {
                Ok(suite) => documents.extend(self.process_testsuite(store, run_info, &suite)),
                Err(err) => warn!(
                    "skipping testsuite {idx}: {}",
                    DisplayErrorChain::new(err)
                ),
            }
        }
        documents
    }

    /// Triages a single testsuite against the history in `store`.
    ///
    /// Returns `None` if the testsuite has no `<properties>` element.
    pub fn process_testsuite<S>(
        &mut self,
        store: &S,
        run_info: &RunInfo,
        suite: &Testsuite,
    ) -> Option<RunDocument>
    where
        S: DocumentStore + ?Sized,
    {
        let Some(properties) = SuiteProperties::from_testsuite(suite) else {
            warn!(
                "skipping testsuite {} without properties (tests={}, failures={}, errors={})",
                suite.name.as_deref().unwrap_or("<unnamed>"),
                suite.tests,
                suite.failures,
                suite.errors,
            );
            return None;
        };

        let mut document = RunDocument::new(run_info, properties, suite);
        let history = lookup_history(store, &document);
        let mut summary = TriageSummary::default();

        for (idx, testcase) in suite.testcases.iter().enumerate() {
            let mut record = TestCaseRecord::from_testcase(suite.errors, testcase);
            let previous = history.as_ref().and_then(|history| {
                self.paired(history, idx, &record.name)
                    .map(|previous| (previous, history.run_id.as_str()))
            });
            self.triage_testcase(&mut record, previous, &mut summary);
            if let (Some(history), Some((previous, _))) = (&history, previous)
                && record.inherited_label
                && record.status.needs_triage()
            {
                self.trace_verification(store, history, previous, &mut record);
            }

            if let Some(logs) = record.logs.as_deref() {
                record.failed_code_path = self.extractor.process_log(logs);
            }
            document.testcases.push(record);
        }
        document.script_path = self.extractor.script_path(&document.testcases);

        if let Some(history) = &history {
            self.carry_bugs_forward(&mut document, history);
        }
        document.triage_summary = summary;
        info!(
            "testsuite {}: {summary}",
            document.plan_id.as_deref().unwrap_or(UNKNOWN)
        );
        Some(document)
    }

    fn paired<'h>(
        &self,
        history: &'h RunDocument,
        idx: usize,
        name: &str,
    ) -> Option<&'h TestCaseRecord> {
        match self.pairing {
            TestcasePairing::Positional => history.testcases.get(idx),
            TestcasePairing::ByName => history
                .testcases
                .iter()
                .find(|previous| previous.name == name),
        }
    }

    fn triage_testcase(
        &self,
        record: &mut TestCaseRecord,
        previous: Option<(&TestCaseRecord, &str)>,
        summary: &mut TriageSummary,
    ) {
        match previous {
            Some((previous, run_id)) if previous.status == record.status => {
                debug!("{}: inheriting label from run {run_id}", record.name);
                record.inherit_from(previous, run_id);
                summary.inherited_labels += 1;
            }
            _ => self.label_fresh(record, summary),
        }

        if record.status == CaseStatus::Failed
            && previous.is_some_and(|(previous, _)| previous.is_passing_or_resolved())
        {
            record.regression = true;
            summary.regressions += 1;
        }
    }

    fn trace_verification<S>(
        &self,
        store: &S,
        history: &RunDocument,
        previous: &TestCaseRecord,
        record: &mut TestCaseRecord,
    ) where
        S: DocumentStore + ?Sized,
    {
        let origin = self.find_origin(store, history, previous);
        record.set_origin(origin.as_ref(), &history.run_id, &history.timestamp);

        if record.status == CaseStatus::Failed {
            let reference = origin
                .as_ref()
                .and_then(|origin| origin.logs.as_deref())
                .or(previous.logs.as_deref());
            record.log_similarity_score = record
                .logs
                .as_deref()
                .zip(reference)
                .and_then(|(current, reference)| log_similarity(current, reference));
        }
    }

    /// Walks back from `history` to the oldest run where `previous` was verified with the same
    /// label.
    fn find_origin<S>(
        &self,
        store: &S,
        history: &RunDocument,
        previous: &TestCaseRecord,
    ) -> Option<VerificationOrigin>
    where
        S: DocumentStore + ?Sized,
    {
        if self.verification_lookback == 0
            || history.timestamp.is_empty()
            || history.timestamp == RunDocument::NO_TIMESTAMP
        {
            debug!(
                "{}: no verification lookback from run {}",
                previous.name, history.run_id
            );
            return None;
        }
        let plan_id = history.plan_id.as_deref()?;

        let mut oldest = VerificationOrigin::from_record(history, previous);
        let mut verified = oldest.verified_by.is_some().then(|| oldest.clone());
        for _ in 0..self.verification_lookback {
            let earlier = match store.latest_matching_before(
                &history.group,
                plan_id,
                &history.lineup,
                &oldest.timestamp,
            ) {
                Ok(Some(earlier)) => earlier,
                Ok(None) => break,
                Err(err) => {
                    warn!(
                        "verification lookback before run {} failed: {}",
                        oldest.run_id,
                        DisplayErrorChain::new(err)
                    );
                    break;
                }
            };
            let Some(record) = earlier
                .testcases
                .iter()
                .find(|record| record.name == previous.name)
            else {
                break;
            };
            if record.label != previous.label {
                break;
            }

            oldest = VerificationOrigin::from_record(&earlier, record);
            if oldest.verified_by.is_some() {
                verified = Some(oldest.clone());
            }
        }

        debug!(
            "{}: label '{}' traced back to run {}",
            previous.name, previous.label, oldest.run_id
        );
        Some(verified.unwrap_or(oldest))
    }

    fn label_fresh(&self, record: &mut TestCaseRecord, summary: &mut TriageSummary) {
        match record.status {
            CaseStatus::Passed => record.label = self.labels.passed.clone(),
            CaseStatus::Skipped => record.label = self.labels.skipped.clone(),
            CaseStatus::Failed => {
                record.mark_new();
                record.generated_labels = self.labeler.propose(record.logs.as_deref());
                summary.new_failures += 1;
                if !record.generated_labels.is_empty() {
                    summary.proposed_labels += 1;
                }
            }
            CaseStatus::Aborted => {
                record.mark_new();
                summary.new_failures += 1;
            }
        }
    }

    fn carry_bugs_forward(&self, document: &mut RunDocument, history: &RunDocument) {
        for bug in &history.bugs {
            if let Some(bug) = self.registry.carry_forward(bug) {
                document.bugs.push(bug);
            }
        }

        if document.is_passing()
            && history
                .bugs
                .iter()
                .any(|bug| bug.kind == BugKind::Ddts && self.registry.is_open(bug.kind, &bug.name))
        {
            info!(
                "run {}: suite passed with an open DDTS bug, marking unstable",
                document.run_id
            );
            document.health = Health::Unstable;
        }
    }
}

fn lookup_history<S>(store: &S, document: &RunDocument) -> Option<RunDocument>
where
    S: DocumentStore + ?Sized,
{
    let plan_id = match document.plan_id.as_deref() {
        Some(plan_id) if document.group != UNKNOWN && document.lineup != UNKNOWN => plan_id,
        plan_id => {
            warn!(
                "skipping history lookup: plan_id={}, group={}, lineup={}",
                plan_id.unwrap_or("<none>"),
                document.group,
                document.lineup,
            );
            return None;
        }
    };

    match store.latest_matching(&document.group, plan_id, &document.lineup) {
        Ok(Some(history)) => {
            info!(
                "found previous run {} ({}) for {}/{plan_id}/{}",
                history.run_id, history.timestamp, document.group, document.lineup
            );
            Some(history)
        }
        Ok(None) => {
            info!(
                "no previous run for {}/{plan_id}/{}",
                document.group, document.lineup
            );
            None
        }
        Err(err) => {
            warn!(
                "history lookup for {}/{plan_id}/{} failed: {}",
                document.group,
                document.lineup,
                DisplayErrorChain::new(err)
            );
            None
        }
    }
}
