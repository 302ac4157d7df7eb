// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core functionality for autotriage.
//!
//! autotriage reads the results of test runs and produces triaged run documents:
//!
//! * [`events`] rebuilds hierarchical results from `go test -json` event streams.
//! * [`failure_location`] finds the source locations a failure log points at.
//! * [`inherit`] carries labels and bugs over from the previous run of the same test plan,
//!   using [`bugs`] to decide which bugs are still worth tracking and [`similarity`] to propose
//!   labels for new failures.
//! * [`store`] holds the run documents that later runs are compared against.

pub mod bugs;
pub mod config;
pub mod errors;
pub mod events;
pub mod failure_location;
pub mod inherit;
pub mod run;
pub mod similarity;
pub mod store;
