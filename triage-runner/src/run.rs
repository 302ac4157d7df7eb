// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted run documents and the metadata they are built from.

use crate::{bugs::Bug, errors::RunInfoError, failure_location::FailedCodePath};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};
use triage_xunit::{Testcase, TestcaseStatus, Testsuite};
use walkdir::WalkDir;

/// Value used for metadata that could not be determined.
pub const UNKNOWN: &str = "Unknown";

/// The outcome of a testcase, as recorded on a run document.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseStatus {
    /// The testcase passed.
    Passed,
    /// The testcase failed.
    Failed,
    /// The testcase was skipped.
    Skipped,
    /// The testsuite errored out.
    Aborted,
}

impl CaseStatus {
    /// Derives the status of a testcase within a suite that reported `suite_errors` errors.
    ///
    /// Every testcase of an errored suite counts as aborted.
    pub fn from_testcase(suite_errors: usize, testcase: &Testcase) -> Self {
        if suite_errors > 0 {
            return CaseStatus::Aborted;
        }
        match testcase.status {
            TestcaseStatus::NonSuccess { .. } => CaseStatus::Failed,
            TestcaseStatus::Skipped { .. } => CaseStatus::Skipped,
            TestcaseStatus::Success => CaseStatus::Passed,
        }
    }

    /// Returns true for statuses that need triage.
    pub fn needs_triage(self) -> bool {
        matches!(self, CaseStatus::Failed | CaseStatus::Aborted)
    }

    /// Returns the status as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            CaseStatus::Passed => "passed",
            CaseStatus::Failed => "failed",
            CaseStatus::Skipped => "skipped",
            CaseStatus::Aborted => "aborted",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A testcase as stored on a [`RunDocument`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestCaseRecord {
    /// The testcase name.
    pub name: String,

    /// Elapsed time in seconds.
    #[serde(default)]
    pub time: f64,

    /// The outcome.
    pub status: CaseStatus,

    /// Workflow state, e.g. `New` or `Resolved`. Absent for passed and skipped testcases.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triage_status: Option<String>,

    /// The triage label. Possibly empty.
    #[serde(default)]
    pub label: String,

    /// Labels proposed from similar historical failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generated_labels: Vec<String>,

    /// A short failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// The failure log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<String>,

    /// Whether `triage_status` and `label` were copied from the previous run.
    #[serde(default)]
    pub inherited_label: bool,

    /// The run the label was copied from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inheritance_source_run_id: Option<String>,

    /// Who confirmed the label. Set while triaging, and copied forward with inherited labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<String>,

    /// The run where the inherited label was verified, or the oldest run searched if no
    /// verification was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_verification_run_id: Option<String>,

    /// The timestamp of `original_verification_run_id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inheritance_date: Option<String>,

    /// Where the inherited label came from, for people reading the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inheritance_reason: Option<String>,

    /// Similarity between this failure's log and the log the label was verified against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_similarity_score: Option<f64>,

    /// Whether this testcase failed after passing, or after being resolved, in the previous run.
    #[serde(default)]
    pub regression: bool,

    /// Bugs attached to this testcase.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bugs: Vec<Bug>,

    /// Failure locations extracted from `logs`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_code_path: Vec<FailedCodePath>,
}

impl TestCaseRecord {
    /// The triage status of a failure nobody has looked at yet.
    pub const NEW: &'static str = "New";

    /// The triage status of a failure that has been dealt with.
    pub const RESOLVED: &'static str = "Resolved";

    /// Creates a record with no triage information.
    pub fn new(name: impl Into<String>, status: CaseStatus) -> Self {
        Self {
            name: name.into(),
            time: 0.0,
            status,
            triage_status: None,
            label: String::new(),
            generated_labels: Vec::new(),
            message: None,
            logs: None,
            inherited_label: false,
            inheritance_source_run_id: None,
            verified_by: None,
            original_verification_run_id: None,
            inheritance_date: None,
            inheritance_reason: None,
            log_similarity_score: None,
            regression: false,
            bugs: Vec::new(),
            failed_code_path: Vec::new(),
        }
    }

    /// Creates a record for `testcase` in a suite that reported `suite_errors` errors.
    pub fn from_testcase(suite_errors: usize, testcase: &Testcase) -> Self {
        let status = CaseStatus::from_testcase(suite_errors, testcase);
        let mut record = Self::new(testcase.name.clone(), status);
        record.time = testcase.time.map_or(0.0, |time| time.as_secs_f64());
        if status == CaseStatus::Failed {
            record.message = Some("Failed".to_owned());
            record.logs = Some(
                testcase
                    .failure_log()
                    .map(|log| log.trim().to_owned())
                    .unwrap_or_default(),
            );
        }
        record
    }

    /// Marks the record as a new failure.
    pub fn mark_new(&mut self) {
        self.triage_status = Some(Self::NEW.to_owned());
        self.label.clear();
        self.inherited_label = false;
        self.inheritance_source_run_id = None;
        self.clear_origin();
        self.bugs.clear();
    }

    fn clear_origin(&mut self) {
        self.verified_by = None;
        self.original_verification_run_id = None;
        self.inheritance_date = None;
        self.inheritance_reason = None;
        self.log_similarity_score = None;
    }

    /// Returns true if this record counts as passing or resolved for regression tracking.
    ///
    /// That is the case if the testcase passed, was triaged as resolved, or has a bug its
    /// tracker considers resolved.
    pub fn is_passing_or_resolved(&self) -> bool {
        self.status == CaseStatus::Passed
            || self
                .triage_status
                .as_deref()
                .is_some_and(|status| status.eq_ignore_ascii_case(Self::RESOLVED))
            || self.bugs.iter().any(Bug::resolved)
    }

    /// Copies triage information from `previous`, recorded in run `run_id`.
    ///
    /// A failure whose predecessor has no triage status becomes `New`.
    pub fn inherit_from(&mut self, previous: &TestCaseRecord, run_id: &str) {
        self.triage_status = previous
            .triage_status
            .clone()
            .or_else(|| self.status.needs_triage().then(|| Self::NEW.to_owned()));
        self.label = previous.label.clone();
        self.bugs = previous.bugs.clone();
        self.inherited_label = true;
        self.inheritance_source_run_id = Some(run_id.to_owned());
        self.clear_origin();
        self.verified_by = previous.verified_by.clone();
    }

    /// Records where an inherited label was verified, found by looking back from the run
    /// `predecessor` at `predecessor_timestamp`.
    pub fn set_origin(
        &mut self,
        origin: Option<&VerificationOrigin>,
        predecessor: &str,
        predecessor_timestamp: &str,
    ) {
        let label = &self.label;
        self.inheritance_reason = Some(match origin {
            Some(VerificationOrigin {
                run_id,
                timestamp,
                verified_by: Some(verified_by),
                ..
            }) => format!(
                "Inherited label '{label}' (verified by {verified_by} in run [{run_id}] on \
                 {timestamp}) via predecessor [{predecessor}]."
            ),
            Some(VerificationOrigin {
                run_id, timestamp, ..
            }) => format!(
                "Inherited label '{label}' (origin run [{run_id}] on {timestamp}, verified_by \
                 Unknown) via predecessor [{predecessor}]."
            ),
            None => format!(
                "Inherited label '{label}' from predecessor [{predecessor}] on \
                 {predecessor_timestamp}, origin details not found."
            ),
        });
        if let Some(origin) = origin {
            self.verified_by = origin.verified_by.clone();
            self.original_verification_run_id = Some(origin.run_id.clone());
            self.inheritance_date = Some(origin.timestamp.clone());
        }
    }
}

/// The earlier run an inherited label is traced back to.
#[derive(Clone, Debug, PartialEq)]
pub struct VerificationOrigin {
    /// The run.
    pub run_id: String,

    /// The run's timestamp.
    pub timestamp: String,

    /// Who verified the label in that run, if anyone did.
    pub verified_by: Option<String>,

    /// The testcase's log in that run, if it was verified.
    pub logs: Option<String>,
}

impl VerificationOrigin {
    /// Describes `record` as it was stored in `document`.
    pub fn from_record(document: &RunDocument, record: &TestCaseRecord) -> Self {
        let verified_by = record
            .verified_by
            .clone()
            .filter(|verified_by| !verified_by.trim().is_empty());
        Self {
            run_id: document.run_id.clone(),
            timestamp: document.timestamp.clone(),
            logs: verified_by.as_ref().and(record.logs.clone()),
            verified_by,
        }
    }
}

/// Overall health of a testsuite run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    /// Nothing to report.
    #[default]
    Ok,
    /// The suite passed while a tracked bug is still open.
    Unstable,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Ok => f.write_str("ok"),
            Health::Unstable => f.write_str("unstable"),
        }
    }
}

/// Counts of what triage did to a run.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriageSummary {
    /// Failures that need a new label.
    pub new_failures: usize,
    /// Testcases that inherited a label.
    pub inherited_labels: usize,
    /// Testcases that failed after passing in the previous run.
    pub regressions: usize,
    /// New failures that got at least one proposed label.
    pub proposed_labels: usize,
}

impl fmt::Display for TriageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new failures ({} with proposed labels), {} inherited labels, {} regressions",
            self.new_failures, self.proposed_labels, self.inherited_labels, self.regressions
        )
    }
}

/// One processed testsuite of a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunDocument {
    /// The team the run belongs to.
    pub group: String,
    /// The image tag under test.
    pub efr: String,
    /// The run identifier.
    pub run_id: String,
    /// The testbed lineup.
    pub lineup: String,
    /// The test plan, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testsuite_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testsuite_root: Option<String>,
    /// `Hardware` or `Simulation`.
    #[serde(default)]
    pub testbed: String,
    #[serde(default)]
    pub chain: String,
    #[serde(default)]
    pub workspace: String,
    pub tests: usize,
    pub failures: usize,
    pub errors: usize,
    pub disabled: usize,
    pub skipped: usize,
    pub timestamp: String,
    #[serde(default)]
    pub health: Health,
    pub testcases: Vec<TestCaseRecord>,
    #[serde(default)]
    pub bugs: Vec<Bug>,
    #[serde(default)]
    pub triage_summary: TriageSummary,
    /// The test script, relative to the source root's parent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_path: Option<Utf8PathBuf>,
}

impl RunDocument {
    /// The timestamp of a testsuite that did not record one.
    pub const NO_TIMESTAMP: &'static str = "N/A";

    /// Creates a document with the run metadata and the suite's counts, with no testcases.
    pub fn new(run_info: &RunInfo, properties: SuiteProperties, suite: &Testsuite) -> Self {
        Self {
            group: run_info.group.clone(),
            efr: run_info.tag.clone(),
            run_id: run_info.firex_id.clone(),
            lineup: run_info.lineup.clone(),
            plan_id: properties.plan_id,
            description: properties.description,
            uuid: properties.uuid,
            testsuite_hash: properties.testsuite_hash,
            testsuite_root: properties.testsuite_root,
            testbed: run_info.testbed.clone(),
            chain: run_info.chain.clone(),
            workspace: run_info.workspace.clone(),
            tests: suite.tests,
            failures: suite.failures,
            errors: suite.errors,
            disabled: suite.disabled,
            skipped: suite.skipped,
            timestamp: suite
                .timestamp
                .clone()
                .unwrap_or_else(|| Self::NO_TIMESTAMP.to_owned()),
            health: Health::Ok,
            testcases: Vec::new(),
            bugs: Vec::new(),
            triage_summary: TriageSummary::default(),
            script_path: None,
        }
    }

    /// Returns true if the suite reported no failures or errors.
    pub fn is_passing(&self) -> bool {
        self.failures + self.errors == 0
    }
}

/// Per-suite metadata read from `<properties>`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SuiteProperties {
    pub plan_id: Option<String>,
    pub description: Option<String>,
    pub uuid: Option<String>,
    pub testsuite_hash: Option<String>,
    pub testsuite_root: Option<String>,
}

impl SuiteProperties {
    /// Reads the properties of `suite`, or returns `None` if it has no `<properties>` element.
    ///
    /// `cafy2` suites name the plan `testsuite_name`. Other frameworks use `test.`-prefixed
    /// names.
    pub fn from_testsuite(suite: &Testsuite) -> Option<Self> {
        if !suite.has_properties {
            return None;
        }

        let mut out = Self::default();
        let cafy = suite.property("framework") == Some("cafy2");
        for property in &suite.properties {
            let slot = match (cafy, property.name.as_str()) {
                (true, "testsuite_name") | (false, "test.plan_id") => &mut out.plan_id,
                (false, "test.description") => &mut out.description,
                (false, "test.uuid") => &mut out.uuid,
                (_, "testsuite_hash") => &mut out.testsuite_hash,
                (_, "testsuite_root") => &mut out.testsuite_root,
                _ => continue,
            };
            *slot = Some(property.value.clone());
        }
        Some(out)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunJson {
    firex_id: Option<String>,
    group: Option<String>,
    inputs: RunInputs,
    submission_cmd: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RunInputs {
    lineup: Option<String>,
}

/// Metadata describing a whole run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunInfo {
    /// The run identifier.
    pub firex_id: String,
    /// The team the run belongs to.
    pub group: String,
    /// The testbed lineup.
    pub lineup: String,
    /// `Hardware` or `Simulation`.
    pub testbed: String,
    /// The chain the run was submitted with.
    pub chain: String,
    /// The image workspace.
    pub workspace: String,
    /// The image version.
    pub tag: String,
}

impl Default for RunInfo {
    fn default() -> Self {
        Self {
            firex_id: UNKNOWN.to_owned(),
            group: UNKNOWN.to_owned(),
            lineup: UNKNOWN.to_owned(),
            testbed: "Hardware".to_owned(),
            chain: UNKNOWN.to_owned(),
            workspace: String::new(),
            tag: String::new(),
        }
    }
}

impl RunInfo {
    /// The file holding run metadata, relative to the testsuite root.
    pub const RUN_JSON: &'static str = "run.json";

    /// Loads run metadata from `testsuite_root`.
    ///
    /// If both `version` and `workspace` are empty they are read from the first device's
    /// `show version` output in the test logs.
    pub fn load(
        testsuite_root: &Utf8Path,
        version: &str,
        workspace: &str,
    ) -> Result<Self, RunInfoError> {
        let path = testsuite_root.join(Self::RUN_JSON);
        let contents = std::fs::read_to_string(&path).map_err(|err| RunInfoError::Read {
            path: path.clone(),
            err,
        })?;
        let run_json: RunJson = serde_json::from_str(&contents)
            .map_err(|err| RunInfoError::Parse { path, err })?;

        let (version, workspace) = if version.is_empty() && workspace.is_empty() {
            match find_show_version(testsuite_root) {
                Some(show_version) => read_show_version(&show_version),
                None => {
                    warn!("show_version file not found under {testsuite_root}");
                    (String::new(), String::new())
                }
            }
        } else {
            (version.to_owned(), workspace.to_owned())
        };

        let testbed = if has_sim_config(testsuite_root) {
            "Simulation"
        } else {
            "Hardware"
        };

        let chain = run_json
            .submission_cmd
            .iter()
            .position(|arg| arg == "--chain")
            .and_then(|idx| run_json.submission_cmd.get(idx + 1))
            .cloned()
            .unwrap_or_else(|| UNKNOWN.to_owned());

        let unknown = || UNKNOWN.to_owned();
        Ok(Self {
            firex_id: run_json.firex_id.unwrap_or_else(unknown),
            group: run_json.group.unwrap_or_else(unknown),
            lineup: run_json.inputs.lineup.unwrap_or_else(unknown),
            testbed: testbed.to_owned(),
            chain,
            workspace,
            tag: version,
        })
    }
}

/// Parses `show version` output into `(version, workspace)`.
///
/// The version is the third space-separated token of the second comma-separated field of the
/// first line. The workspace is the value of the first `Workspace:` line.
pub fn parse_show_version(contents: &str) -> (String, String) {
    let mut lines = contents.lines();
    let version = lines
        .next()
        .and_then(|header| header.split(',').nth(1))
        .and_then(|field| field.split(' ').nth(2))
        .map(|version| version.trim().to_owned())
        .unwrap_or_default();
    let workspace = contents
        .lines()
        .find(|line| line.trim().starts_with("Workspace"))
        .and_then(|line| line.split(':').nth(1))
        .map(|workspace| workspace.trim().to_owned())
        .unwrap_or_default();
    (version, workspace)
}

fn read_show_version(path: &Utf8Path) -> (String, String) {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_show_version(&contents),
        Err(err) => {
            warn!("could not read {path}: {err}");
            (String::new(), String::new())
        }
    }
}

/// Files exactly `depth` levels below `base` whose path components below `base` satisfy
/// `matches`, in file name order.
fn files_matching<'a>(
    base: &'a Utf8Path,
    depth: usize,
    matches: impl Fn(&[&str]) -> bool + 'a,
) -> impl Iterator<Item = Utf8PathBuf> + 'a {
    WalkDir::new(base)
        .follow_links(true)
        .min_depth(depth)
        .max_depth(depth)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| Utf8PathBuf::from_path_buf(entry.into_path()).ok())
        .filter(move |path| {
            path.strip_prefix(base)
                .is_ok_and(|rel| matches(&rel.iter().collect::<Vec<_>>()))
        })
}

/// `tests_logs/*/debug_files/dut*/show_version`
fn find_show_version(testsuite_root: &Utf8Path) -> Option<Utf8PathBuf> {
    let base = testsuite_root.join("tests_logs");
    let found = files_matching(&base, 4, |parts| {
        matches!(parts, [_, "debug_files", dut, "show_version"] if dut.starts_with("dut"))
    })
    .next();
    if let Some(path) = &found {
        debug!("reading version from {path}");
    }
    found
}

/// `testbed_logs/*/bringup_success/sim-config.yaml`
fn has_sim_config(testsuite_root: &Utf8Path) -> bool {
    let base = testsuite_root.join("testbed_logs");
    files_matching(&base, 3, |parts| {
        matches!(parts, [_, "bringup_success", "sim-config.yaml"])
    })
    .next()
    .is_some()
}
