// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bugs tracked against test runs, and the trackers they live in.
//!
//! Each tracker has its own notion of whether a bug is still open, and its own policy for what
//! to do when the tracker cannot be reached. These policies are encoded per backend and are not
//! meant to agree with each other.

mod ddts;
mod github;
mod techzone;

pub use ddts::*;
pub use github::*;
pub use techzone::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// The tracker a bug lives in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BugKind {
    /// Cisco's defect tracker.
    #[serde(rename = "DDTS")]
    Ddts,
    /// GitHub issues, pull requests and tree references.
    Github,
    /// TechZone cases.
    TechZone,
}

impl BugKind {
    /// Returns the kind as stored.
    pub fn as_str(self) -> &'static str {
        match self {
            BugKind::Ddts => "DDTS",
            BugKind::Github => "Github",
            BugKind::TechZone => "TechZone",
        }
    }
}

impl fmt::Display for BugKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A bug attached to a run.
///
/// Whether a bug is resolved is decided by its backend when it is inherited.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bug {
    /// The tracker identifier, often a URL.
    pub name: String,

    /// The tracker.
    #[serde(rename = "type")]
    pub kind: BugKind,

    /// Who owns the bug.
    #[serde(default = "unknown_username")]
    pub username: String,

    /// When the bug was last updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,

    #[serde(default)]
    resolved: bool,

    /// Tracker-specific status, e.g. a DDTS status code or a GitHub state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Tracker-specific severity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,

    /// Days since the bug was filed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age_days: Option<i64>,
}

fn unknown_username() -> String {
    "Unknown".to_owned()
}

impl Bug {
    /// Creates an unresolved bug with no tracker data.
    pub fn new(name: impl Into<String>, kind: BugKind) -> Self {
        Self {
            name: name.into(),
            kind,
            username: unknown_username(),
            updated: None,
            resolved: false,
            status: None,
            severity: None,
            age_days: None,
        }
    }

    pub(crate) fn with_resolved(mut self, resolved: bool) -> Self {
        self.resolved = resolved;
        self
    }

    /// Whether the tracker considers this bug resolved.
    pub fn resolved(&self) -> bool {
        self.resolved
    }
}

/// The capabilities shared by all trackers.
pub trait BugBackend {
    /// Returns true if the bug should still be considered open.
    fn is_open(&self, id: &str) -> bool;

    /// Returns the bug to carry into the next run, or `None` to stop tracking it.
    fn inherit(&self, id: &str) -> Option<Bug>;
}

/// Dispatches bug operations to the backend for each tracker.
pub struct BugRegistry {
    ddts: DdtsBackend,
    github: GithubBackend,
    techzone: TechZoneBackend,
}

impl BugRegistry {
    /// Creates a new registry.
    pub fn new(ddts: DdtsBackend, github: GithubBackend, techzone: TechZoneBackend) -> Self {
        Self {
            ddts,
            github,
            techzone,
        }
    }

    /// Creates a registry whose trackers are all unreachable.
    pub fn offline(placeholders: Vec<String>) -> Self {
        Self::new(
            DdtsBackend::new(Box::new(UnavailableDdts)),
            GithubBackend::new(Box::new(UnavailableGithub), placeholders),
            TechZoneBackend,
        )
    }

    /// Returns the backend for `kind`.
    pub fn backend(&self, kind: BugKind) -> &dyn BugBackend {
        match kind {
            BugKind::Ddts => &self.ddts,
            BugKind::Github => &self.github,
            BugKind::TechZone => &self.techzone,
        }
    }

    /// See [`BugBackend::is_open`].
    pub fn is_open(&self, kind: BugKind, id: &str) -> bool {
        self.backend(kind).is_open(id)
    }

    /// See [`BugBackend::inherit`].
    pub fn inherit(&self, kind: BugKind, id: &str) -> Option<Bug> {
        self.backend(kind).inherit(id)
    }

    /// Decides whether a bug from the previous run is carried into the next one.
    ///
    /// DDTS bugs must still be open to be inherited. GitHub and TechZone bugs are inherited
    /// whether or not they are open.
    pub fn carry_forward(&self, bug: &Bug) -> Option<Bug> {
        if bug.kind == BugKind::Ddts && !self.ddts.is_open(&bug.name) {
            debug!("not carrying forward closed DDTS bug {}", bug.name);
            return None;
        }
        self.inherit(bug.kind, &bug.name)
    }
}

impl fmt::Debug for BugRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BugRegistry").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::TrackerError;
    use pretty_assertions::assert_eq;

    struct OneRecord(DdtsRecord);

    impl DdtsClient for OneRecord {
        fn lookup(&self, id: &str) -> Result<DdtsRecord, TrackerError> {
            if id == self.0.identifier {
                Ok(self.0.clone())
            } else {
                Err(TrackerError::RecordNotFound { id: id.to_owned() })
            }
        }
    }

    fn registry(record: DdtsRecord) -> BugRegistry {
        BugRegistry::new(
            DdtsBackend::new(Box::new(OneRecord(record))),
            GithubBackend::new(Box::new(UnavailableGithub), vec!["new failure. todo".to_owned()]),
            TechZoneBackend,
        )
    }

    #[test]
    fn bug_json_shape() {
        let bug = Bug::new("CSCwk12345", BugKind::Ddts);
        let json = serde_json::to_value(&bug).expect("serializes");
        assert_eq!(
            json,
            serde_json::json!({
                "name": "CSCwk12345",
                "type": "DDTS",
                "username": "Unknown",
                "resolved": false,
            })
        );
        let read: Bug = serde_json::from_value(serde_json::json!({
            "name": "https://github.com/o/r/issues/1",
            "type": "Github",
        }))
        .expect("deserializes");
        assert_eq!(read, Bug::new("https://github.com/o/r/issues/1", BugKind::Github));
    }

    #[test]
    fn ddts_carry_forward_is_gated_on_open() {
        let open = registry(DdtsRecord::new("CSCwk00001", "A"));
        let carried = open
            .carry_forward(&Bug::new("CSCwk00001", BugKind::Ddts))
            .expect("open bug is carried");
        assert!(!carried.resolved());

        // A closed bug with a status that would otherwise be inherited is still dropped.
        let mut closed = DdtsRecord::new("CSCwk00002", "J");
        closed.closed = Some("240501".to_owned());
        let closed = registry(closed);
        assert!(closed.inherit(BugKind::Ddts, "CSCwk00002").is_some());
        assert_eq!(
            closed.carry_forward(&Bug::new("CSCwk00002", BugKind::Ddts)),
            None
        );
    }

    #[test]
    fn github_and_techzone_carry_forward_unconditionally() {
        let registry = registry(DdtsRecord::new("CSCwk00001", "A"));

        // The GitHub tracker is unreachable, but the bug is still carried.
        let url = "https://github.com/openconfig/featureprofiles/issues/42";
        let carried = registry
            .carry_forward(&Bug::new(url, BugKind::Github))
            .expect("github bug is carried");
        assert_eq!(carried.name, url);
        assert!(!carried.resolved());

        let carried = registry
            .carry_forward(&Bug::new("TZ-1", BugKind::TechZone))
            .expect("techzone bug is carried");
        assert!(!carried.resolved());

        assert_eq!(
            registry.carry_forward(&Bug::new("New failure. TODO", BugKind::Github)),
            None
        );
    }
}
