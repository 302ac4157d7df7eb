// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

/// Documented exit codes for `autotriage` failures.
///
/// `autotriage` may fail for a variety of reasons. This structure documents the exit codes that
/// may occur in case of expected failures.
///
/// Unknown/unexpected failures will always result in exit code 1.
pub enum AutotriageExitCode {}

impl AutotriageExitCode {
    /// No errors occurred and autotriage exited normally.
    pub const OK: i32 = 0;

    /// One or more input artifacts could not be processed, but the others were.
    pub const ARTIFACTS_FAILED: i32 = 100;

    /// A single required input could not be read or parsed.
    pub const INPUT_FAILED: i32 = 101;

    /// The document store could not be read or written.
    pub const STORE_FAILED: i32 = 102;

    /// A user issue happened while setting up an autotriage invocation.
    pub const SETUP_ERROR: i32 = 96;

    /// Writing data to stdout, stderr or an output file produced an error.
    pub const WRITE_OUTPUT_ERROR: i32 = 110;
}
