// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Storage for processed run documents.
//!
//! A [`DocumentStore`] holds every [`RunDocument`] produced so far. Triage reads it back to find
//! the previous run of the same plan on the same lineup, and to seed the similarity index.

use crate::{
    errors::StoreError,
    run::{CaseStatus, RunDocument},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    collections::BTreeMap,
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
};
use tracing::debug;

/// The number of testcases with a given label and status, across all stored documents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelStatusCount {
    /// The label. Possibly empty.
    pub label: String,
    /// The testcase status.
    pub status: CaseStatus,
    /// The number of testcases.
    pub count: usize,
}

/// A store of run documents.
pub trait DocumentStore {
    /// Stores a single document.
    fn insert_one(&mut self, document: RunDocument) -> Result<(), StoreError>;

    /// Stores several documents together.
    fn insert_many(&mut self, documents: Vec<RunDocument>) -> Result<(), StoreError>;

    /// Counts testcases by label and status, ordered by label then status.
    fn aggregate_by_label_and_status(&self) -> Result<Vec<LabelStatusCount>, StoreError>;

    /// Returns the most recently stored document matching `group`, `plan_id` and `lineup`.
    fn latest_matching(
        &self,
        group: &str,
        plan_id: &str,
        lineup: &str,
    ) -> Result<Option<RunDocument>, StoreError>;

    /// Returns the document matching `group`, `plan_id` and `lineup` with the greatest timestamp
    /// strictly before `before`.
    ///
    /// Timestamps are ISO 8601 strings and compare lexicographically. Among documents with the
    /// same timestamp, the most recently stored one wins.
    fn latest_matching_before(
        &self,
        group: &str,
        plan_id: &str,
        lineup: &str,
        before: &str,
    ) -> Result<Option<RunDocument>, StoreError>;

    /// Returns all stored documents, oldest first.
    fn documents(&self) -> Result<Vec<RunDocument>, StoreError>;
}

fn is_match(document: &RunDocument, group: &str, plan_id: &str, lineup: &str) -> bool {
    document.group == group
        && document.plan_id.as_deref() == Some(plan_id)
        && document.lineup == lineup
}

fn latest_matching_in(
    documents: &[RunDocument],
    group: &str,
    plan_id: &str,
    lineup: &str,
) -> Option<RunDocument> {
    documents
        .iter()
        .rev()
        .find(|document| is_match(document, group, plan_id, lineup))
        .cloned()
}

fn latest_matching_before_in(
    documents: &[RunDocument],
    group: &str,
    plan_id: &str,
    lineup: &str,
    before: &str,
) -> Option<RunDocument> {
    // max_by_key returns the last of equal maxima.
    documents
        .iter()
        .filter(|document| {
            is_match(document, group, plan_id, lineup) && document.timestamp.as_str() < before
        })
        .max_by_key(|document| document.timestamp.as_str())
        .cloned()
}

fn aggregate_in(documents: &[RunDocument]) -> Vec<LabelStatusCount> {
    let mut counts: BTreeMap<(&str, CaseStatus), usize> = BTreeMap::new();
    for testcase in documents.iter().flat_map(|document| &document.testcases) {
        *counts
            .entry((testcase.label.as_str(), testcase.status))
            .or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((label, status), count)| LabelStatusCount {
            label: label.to_owned(),
            status,
            count,
        })
        .collect()
}

/// A store that keeps documents in memory.
#[derive(Clone, Debug, Default)]
pub struct InMemoryStore {
    documents: Vec<RunDocument>,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// The number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl DocumentStore for InMemoryStore {
    fn insert_one(&mut self, document: RunDocument) -> Result<(), StoreError> {
        self.documents.push(document);
        Ok(())
    }

    fn insert_many(&mut self, documents: Vec<RunDocument>) -> Result<(), StoreError> {
        self.documents.extend(documents);
        Ok(())
    }

    fn aggregate_by_label_and_status(&self) -> Result<Vec<LabelStatusCount>, StoreError> {
        Ok(aggregate_in(&self.documents))
    }

    fn latest_matching(
        &self,
        group: &str,
        plan_id: &str,
        lineup: &str,
    ) -> Result<Option<RunDocument>, StoreError> {
        Ok(latest_matching_in(&self.documents, group, plan_id, lineup))
    }

    fn latest_matching_before(
        &self,
        group: &str,
        plan_id: &str,
        lineup: &str,
        before: &str,
    ) -> Result<Option<RunDocument>, StoreError> {
        Ok(latest_matching_before_in(
            &self.documents,
            group,
            plan_id,
            lineup,
            before,
        ))
    }

    fn documents(&self) -> Result<Vec<RunDocument>, StoreError> {
        Ok(self.documents.clone())
    }
}

/// A store backed by a file with one JSON document per line.
///
/// The file is read once on open. Inserts are appended to the file and to the in-memory copy.
#[derive(Debug)]
pub struct JsonLinesStore {
    path: Utf8PathBuf,
    documents: Vec<RunDocument>,
}

impl JsonLinesStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl Into<Utf8PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let documents = match File::open(&path) {
            Ok(file) => read_documents(&path, BufReader::new(file))?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(StoreError::Io { path, err }),
        };
        debug!("opened document store at {path} with {} documents", documents.len());
        Ok(Self { path, documents })
    }

    /// The backing file.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn append(&mut self, documents: Vec<RunDocument>) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        for document in &documents {
            serde_json::to_writer(&mut buf, document).map_err(|err| StoreError::Serialize {
                run_id: document.run_id.clone(),
                err,
            })?;
            buf.push(b'\n');
        }

        let io_err = |err| StoreError::Io {
            path: self.path.clone(),
            err,
        };
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(&buf).map_err(io_err)?;
        writer.flush().map_err(io_err)?;

        debug!("appended {} documents to {}", documents.len(), self.path);
        self.documents.extend(documents);
        Ok(())
    }
}

fn read_documents(path: &Utf8Path, reader: impl BufRead) -> Result<Vec<RunDocument>, StoreError> {
    let mut documents = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(|err| StoreError::Io {
            path: path.to_owned(),
            err,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let document = serde_json::from_str(&line).map_err(|err| StoreError::InvalidDocument {
            path: path.to_owned(),
            line: idx + 1,
            err,
        })?;
        documents.push(document);
    }
    Ok(documents)
}

impl DocumentStore for JsonLinesStore {
    fn insert_one(&mut self, document: RunDocument) -> Result<(), StoreError> {
        self.append(vec![document])
    }

    fn insert_many(&mut self, documents: Vec<RunDocument>) -> Result<(), StoreError> {
        if documents.is_empty() {
            return Ok(());
        }
        self.append(documents)
    }

    fn aggregate_by_label_and_status(&self) -> Result<Vec<LabelStatusCount>, StoreError> {
        Ok(aggregate_in(&self.documents))
    }

    fn latest_matching(
        &self,
        group: &str,
        plan_id: &str,
        lineup: &str,
    ) -> Result<Option<RunDocument>, StoreError> {
        Ok(latest_matching_in(&self.documents, group, plan_id, lineup))
    }

    fn latest_matching_before(
        &self,
        group: &str,
        plan_id: &str,
        lineup: &str,
        before: &str,
    ) -> Result<Option<RunDocument>, StoreError> {
        Ok(latest_matching_before_in(
            &self.documents,
            group,
            plan_id,
            lineup,
            before,
        ))
    }

    fn documents(&self) -> Result<Vec<RunDocument>, StoreError> {
        Ok(self.documents.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run::{RunInfo, SuiteProperties, TestCaseRecord};
    use camino_tempfile::Utf8TempDir;
    use pretty_assertions::assert_eq;
    use triage_xunit::Testsuite;

    fn document_at(run_id: &str, timestamp: &str) -> RunDocument {
        let mut document = document(run_id, Some("RT-1.1"), "dut");
        document.timestamp = timestamp.to_owned();
        document
    }

    fn document(run_id: &str, plan_id: Option<&str>, lineup: &str) -> RunDocument {
        let run_info = RunInfo {
            firex_id: run_id.to_owned(),
            group: "b4-featureprofiles".to_owned(),
            lineup: lineup.to_owned(),
            ..RunInfo::default()
        };
        let properties = SuiteProperties {
            plan_id: plan_id.map(str::to_owned),
            ..SuiteProperties::default()
        };
        RunDocument::new(&run_info, properties, &Testsuite::new("suite"))
    }

    fn labeled(name: &str, status: CaseStatus, label: &str) -> TestCaseRecord {
        let mut record = TestCaseRecord::new(name, status);
        record.label = label.to_owned();
        record
    }

    #[test]
    fn latest_matching_is_last_inserted() {
        let mut store = InMemoryStore::new();
        store
            .insert_many(vec![
                document("run-1", Some("RT-1.1"), "dut"),
                document("run-2", Some("RT-1.1"), "other"),
                document("run-3", None, "dut"),
            ])
            .expect("insert succeeds");
        store
            .insert_one(document("run-4", Some("RT-1.1"), "dut"))
            .expect("insert succeeds");

        let latest = store
            .latest_matching("b4-featureprofiles", "RT-1.1", "dut")
            .expect("lookup succeeds")
            .expect("document found");
        assert_eq!(latest.run_id, "run-4");
        assert_eq!(
            store
                .latest_matching("b4-featureprofiles", "RT-1.1", "other")
                .expect("lookup succeeds")
                .map(|document| document.run_id),
            Some("run-2".to_owned())
        );
        assert_eq!(
            store
                .latest_matching("other-group", "RT-1.1", "dut")
                .expect("lookup succeeds"),
            None
        );
    }

    #[test]
    fn latest_matching_before_orders_by_timestamp() {
        let mut store = InMemoryStore::new();
        store
            .insert_many(vec![
                document_at("run-3", "2024-06-03T00:00:00"),
                document_at("run-1", "2024-06-01T00:00:00"),
                document_at("run-2a", "2024-06-02T00:00:00"),
                document_at("run-2b", "2024-06-02T00:00:00"),
                document_at("run-4", "2024-06-04T00:00:00"),
            ])
            .expect("insert succeeds");

        let before = |timestamp: &str| {
            store
                .latest_matching_before("b4-featureprofiles", "RT-1.1", "dut", timestamp)
                .expect("lookup succeeds")
                .map(|document| document.run_id)
        };
        assert_eq!(before("2024-06-04T00:00:00"), Some("run-3".to_owned()));
        assert_eq!(before("2024-06-03T00:00:00"), Some("run-2b".to_owned()));
        assert_eq!(before("2024-06-02T12:00:00"), Some("run-2b".to_owned()));
        assert_eq!(before("2024-06-01T00:00:00"), None);
        assert_eq!(
            store
                .latest_matching_before("b4-featureprofiles", "RT-1.1", "other", "2025")
                .expect("lookup succeeds"),
            None
        );
    }

    #[test]
    fn aggregate() {
        let mut first = document("run-1", Some("RT-1.1"), "dut");
        first.testcases = vec![
            labeled("a", CaseStatus::Failed, "bgp flap"),
            labeled("b", CaseStatus::Passed, "Test Passed. No Label Required."),
        ];
        let mut second = document("run-2", Some("RT-1.1"), "dut");
        second.testcases = vec![
            labeled("a", CaseStatus::Failed, "bgp flap"),
            labeled("b", CaseStatus::Failed, ""),
        ];
        let mut store = InMemoryStore::new();
        store
            .insert_many(vec![first, second])
            .expect("insert succeeds");

        let counts = store
            .aggregate_by_label_and_status()
            .expect("aggregate succeeds");
        assert_eq!(
            counts,
            vec![
                LabelStatusCount {
                    label: String::new(),
                    status: CaseStatus::Failed,
                    count: 1,
                },
                LabelStatusCount {
                    label: "Test Passed. No Label Required.".to_owned(),
                    status: CaseStatus::Passed,
                    count: 1,
                },
                LabelStatusCount {
                    label: "bgp flap".to_owned(),
                    status: CaseStatus::Failed,
                    count: 2,
                },
            ]
        );
    }

    #[test]
    fn json_lines_round_trip() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let path = dir.path().join("runs.jsonl");

        let mut store = JsonLinesStore::open(&path).expect("missing file is empty");
        assert!(store.documents().expect("documents read").is_empty());

        let mut first = document("run-1", Some("RT-1.1"), "dut");
        first.testcases = vec![labeled("a", CaseStatus::Failed, "bgp flap")];
        store.insert_one(first.clone()).expect("insert succeeds");
        store
            .insert_many(vec![document("run-2", Some("RT-1.1"), "dut")])
            .expect("insert succeeds");

        let reopened = JsonLinesStore::open(&path).expect("store reopens");
        let documents = reopened.documents().expect("documents read");
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0], first);
        assert_eq!(
            reopened
                .latest_matching("b4-featureprofiles", "RT-1.1", "dut")
                .expect("lookup succeeds")
                .map(|document| document.run_id),
            Some("run-2".to_owned())
        );
    }

    #[test]
    fn json_lines_invalid_document() {
        let dir = Utf8TempDir::new().expect("temp dir created");
        let path = dir.path().join("runs.jsonl");
        let valid = serde_json::to_string(&document("run-1", Some("RT-1.1"), "dut"))
            .expect("document serializes");
        std::fs::write(&path, format!("{valid}\n\n{{\"group\": 1}}\n")).expect("file written");

        let err = JsonLinesStore::open(&path).expect_err("third line is invalid");
        assert!(
            matches!(err, StoreError::InvalidDocument { line: 3, .. }),
            "unexpected error: {err:?}"
        );
    }
}
