// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Triage test results from the command line.
//!
//! `autotriage` rebuilds hierarchical results from `go test -json` event streams, extracts
//! failure locations from logs, and triages xUnit reports against the history of previous runs.
//! The exit codes it uses are documented in [`AutotriageExitCode`].

mod dispatch;
mod errors;
mod exit_codes;
mod output;

#[doc(hidden)]
pub use dispatch::*;
#[doc(hidden)]
pub use errors::*;
pub use exit_codes::AutotriageExitCode;
#[doc(hidden)]
pub use output::{OutputContext, OutputWriter, StderrStyles};
