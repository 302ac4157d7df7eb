// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconstruct hierarchical test results from a `go test -json` event stream.
//!
//! `go test -json` emits a flat stream of events. Subtests are only related to their parents
//! through their names (`TestParent/child`), so the tree is rebuilt by matching name prefixes
//! within a package.

mod parser;
mod tree;

pub use parser::*;
pub use tree::*;

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single event emitted by `go test -json`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct GoTestEvent {
    /// When the event happened.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<FixedOffset>>,

    /// What happened.
    pub action: Action,

    /// The package being tested.
    #[serde(default)]
    pub package: String,

    /// The fully qualified test name. Absent for package-level events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,

    /// Output text, for `output` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Elapsed seconds, for `pass`, `fail` and `skip` events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,
}

impl GoTestEvent {
    /// Creates a test-level event.
    pub fn test(action: Action, package: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            time: None,
            action,
            package: package.into(),
            test: Some(test.into()),
            output: None,
            elapsed: None,
        }
    }

    /// Creates a package-level event.
    pub fn package(action: Action, package: impl Into<String>) -> Self {
        Self {
            time: None,
            action,
            package: package.into(),
            test: None,
            output: None,
            elapsed: None,
        }
    }

    /// Sets the output text.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Sets the elapsed time in seconds.
    pub fn with_elapsed(mut self, elapsed: f64) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

/// The action of a [`GoTestEvent`].
#[derive(Copy, Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// The test binary is about to be executed.
    Start,
    /// The test has started running.
    Run,
    /// The test has been paused.
    Pause,
    /// The test has continued running.
    Cont,
    /// The test printed output.
    Output,
    /// The test passed.
    Pass,
    /// The test or benchmark failed.
    Fail,
    /// The test was skipped or the package contained no tests.
    Skip,
    /// The benchmark printed log output.
    Bench,
    /// An action this version does not know about.
    #[serde(other)]
    Unknown,
}

impl Action {
    /// Returns the action as it appears in the event stream.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Run => "run",
            Action::Pause => "pause",
            Action::Cont => "cont",
            Action::Output => "output",
            Action::Pass => "pass",
            Action::Fail => "fail",
            Action::Skip => "skip",
            Action::Bench => "bench",
            Action::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The recorded status of a test node.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// No terminal event has been seen.
    #[default]
    Unset,
    /// The test passed.
    Pass,
    /// The test failed.
    Fail,
    /// The test was skipped.
    Skip,
}

impl TestStatus {
    /// Returns true for `Pass` and `Skip`.
    pub fn is_success(self) -> bool {
        matches!(self, TestStatus::Pass | TestStatus::Skip)
    }

    /// Returns a short uppercase label.
    pub fn label(self) -> &'static str {
        match self {
            TestStatus::Unset => "UNSET",
            TestStatus::Pass => "PASS",
            TestStatus::Fail => "FAIL",
            TestStatus::Skip => "SKIP",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
