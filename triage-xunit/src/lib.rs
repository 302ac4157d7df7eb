// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Read and generate xUnit (JUnit-style) XML reports.
//!
//! The reader is tolerant at the testsuite level: a testsuite with malformed attributes is
//! reported as an error for that testsuite alone, and its siblings are still returned. Only
//! XML that is not well-formed fails the whole document.

mod deserialize;
mod errors;
mod report;
mod serialize;

pub use deserialize::DeserializedReport;
pub use errors::*;
pub use report::*;
