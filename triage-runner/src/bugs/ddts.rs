// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Bug, BugBackend, BugKind};
use crate::errors::TrackerError;
use camino::Utf8Path;
use chrono::{DateTime, FixedOffset, Utc};
use regex::Regex;
use serde::Deserialize;
use std::{collections::HashMap, sync::LazyLock};
use tracing::{debug, warn};

static DDTS_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"CSC[a-zA-Z]{2}\d{5}").expect("DDTS id regex is valid"));

/// Status codes whose bugs are no longer tracked: resolved, verified, unreproducible and closed.
pub const DDTS_DISCARD_STATUSES: &[&str] = &["R", "V", "U", "C"];

/// Status codes that count as resolved.
const DDTS_RESOLVED_STATUSES: &[&str] = &["R", "V"];

/// Extracts the canonical `CSC…` identifier from a bug name, which may be a URL.
///
/// Names without an identifier are returned trimmed.
pub fn canonical_ddts_id(name: &str) -> &str {
    DDTS_ID_REGEX
        .find(name)
        .map_or_else(|| name.trim(), |m| m.as_str())
}

/// A DDTS record.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DdtsRecord {
    /// The `CSC…` identifier.
    pub identifier: String,

    /// The single-letter status code.
    pub status: String,

    /// Present once the bug is closed.
    #[serde(default, rename = "CLOSED")]
    pub closed: Option<String>,

    #[serde(default)]
    pub severity: Option<String>,

    /// The engineer the bug is assigned to.
    #[serde(default, rename = "DE-manager")]
    pub engineer: Option<String>,

    #[serde(default, rename = "Submitted-on")]
    pub submitted_on: Option<DateTime<FixedOffset>>,

    #[serde(default, rename = "Last-mod-on")]
    pub last_modified: Option<String>,
}

impl DdtsRecord {
    /// Creates an open record with the given status.
    pub fn new(identifier: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            status: status.into(),
            closed: None,
            severity: None,
            engineer: None,
            submitted_on: None,
            last_modified: None,
        }
    }
}

/// Looks up DDTS records by canonical identifier.
pub trait DdtsClient {
    /// Returns the record for `id`.
    fn lookup(&self, id: &str) -> Result<DdtsRecord, TrackerError>;
}

/// DDTS records read from a JSON file holding an array of records.
#[derive(Clone, Debug, Default)]
pub struct DdtsRecordsFile {
    records: HashMap<String, DdtsRecord>,
}

impl DdtsRecordsFile {
    /// Reads records from `path`.
    pub fn load(path: &Utf8Path) -> Result<Self, TrackerError> {
        let contents = std::fs::read_to_string(path).map_err(|err| TrackerError::ReadRecords {
            path: path.to_owned(),
            err,
        })?;
        Self::from_json(&contents, path)
    }

    fn from_json(contents: &str, path: &Utf8Path) -> Result<Self, TrackerError> {
        let records: Vec<DdtsRecord> =
            serde_json::from_str(contents).map_err(|err| TrackerError::Decode {
                what: format!("DDTS records in `{path}`"),
                err,
            })?;
        debug!("loaded {} DDTS records from {path}", records.len());
        Ok(Self::from_records(records))
    }

    /// Creates a records file from in-memory records.
    pub fn from_records(records: impl IntoIterator<Item = DdtsRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.identifier.clone(), record))
                .collect(),
        }
    }
}

impl DdtsClient for DdtsRecordsFile {
    fn lookup(&self, id: &str) -> Result<DdtsRecord, TrackerError> {
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| TrackerError::RecordNotFound { id: id.to_owned() })
    }
}

/// A DDTS client for when no tracker is reachable.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableDdts;

impl DdtsClient for UnavailableDdts {
    fn lookup(&self, _id: &str) -> Result<DdtsRecord, TrackerError> {
        Err(TrackerError::Unavailable { tracker: "DDTS" })
    }
}

/// The DDTS backend.
///
/// Lookup failures count as closed: the bug is not open and is not inherited.
pub struct DdtsBackend {
    client: Box<dyn DdtsClient>,
    now: DateTime<Utc>,
}

impl DdtsBackend {
    /// Creates a backend that computes bug ages relative to the current time.
    pub fn new(client: Box<dyn DdtsClient>) -> Self {
        Self::with_now(client, Utc::now())
    }

    /// Creates a backend that computes bug ages relative to `now`.
    pub fn with_now(client: Box<dyn DdtsClient>, now: DateTime<Utc>) -> Self {
        Self { client, now }
    }

    fn lookup(&self, name: &str) -> Option<DdtsRecord> {
        let id = canonical_ddts_id(name);
        match self.client.lookup(id) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!("DDTS lookup for {id} failed: {err}");
                None
            }
        }
    }
}

impl BugBackend for DdtsBackend {
    fn is_open(&self, id: &str) -> bool {
        self.lookup(id).is_some_and(|record| record.closed.is_none())
    }

    fn inherit(&self, id: &str) -> Option<Bug> {
        let record = self.lookup(id)?;
        let status = record.status.trim();
        if DDTS_DISCARD_STATUSES.contains(&status) {
            debug!("dropping DDTS bug {id} with status {status}");
            return None;
        }

        let resolved = record.closed.is_some() || DDTS_RESOLVED_STATUSES.contains(&status);
        let mut bug = Bug::new(id, BugKind::Ddts).with_resolved(resolved);
        if let Some(engineer) = record.engineer {
            bug.username = engineer;
        }
        bug.status = Some(status.to_owned());
        bug.severity = record.severity;
        bug.updated = record.last_modified;
        bug.age_days = record
            .submitted_on
            .map(|submitted| (self.now - submitted.with_timezone(&Utc)).num_days());
        Some(bug)
    }
}
