// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{AutotriageExitCode, StderrStyles, output::NO_HEADING_TARGET};
use camino::Utf8PathBuf;
use owo_colors::OwoColorize;
use std::error::Error;
use thiserror::Error;
use tracing::error;
use triage_runner::errors::{
    ConfigParseError, EventStreamError, ProcessRunError, RunInfoError, StoreError, TrackerError,
};
use triage_xunit::{DeserializeError, SerializeError};

pub(crate) type Result<T, E = ExpectedError> = std::result::Result<T, E>;

// Note that the #[error()] strings are mostly placeholder messages -- the expected way to print out
// errors is with the display_to_stderr method, which colorizes errors.

/// An expected error that stops an autotriage invocation.
#[derive(Debug, Error)]
#[doc(hidden)]
pub enum ExpectedError {
    #[error("could not determine current directory")]
    CurrentDirFailed {
        #[source]
        err: std::io::Error,
    },
    #[error("config parse error")]
    ConfigParseError {
        #[from]
        err: ConfigParseError,
    },
    #[error("error reading input")]
    InputReadError {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
    #[error("error parsing event stream")]
    EventStreamError {
        path: Utf8PathBuf,
        #[source]
        err: EventStreamError,
    },
    #[error("error parsing xUnit report")]
    XunitParseError {
        path: Utf8PathBuf,
        #[source]
        err: DeserializeError,
    },
    #[error("error writing xUnit report")]
    XunitWriteError {
        path: Utf8PathBuf,
        #[source]
        err: SerializeError,
    },
    #[error("error loading run metadata")]
    RunInfoError {
        #[from]
        err: RunInfoError,
    },
    #[error("error loading tracker records")]
    TrackerSetupError {
        #[from]
        err: TrackerError,
    },
    #[error("error opening document store")]
    StoreError {
        #[from]
        err: StoreError,
    },
    #[error("error processing run")]
    ProcessRunError {
        path: Utf8PathBuf,
        #[source]
        err: ProcessRunError,
    },
    #[error("error writing output")]
    WriteOutputError {
        #[source]
        err: std::io::Error,
    },
    #[error("error writing JSON output")]
    WriteJsonError {
        #[source]
        err: serde_json::Error,
    },
}

impl ExpectedError {
    pub(crate) fn input_read_error(path: impl Into<Utf8PathBuf>, err: std::io::Error) -> Self {
        Self::InputReadError {
            path: path.into(),
            err,
        }
    }

    /// Returns the exit code for the process.
    pub fn process_exit_code(&self) -> i32 {
        match self {
            Self::CurrentDirFailed { .. }
            | Self::ConfigParseError { .. }
            | Self::RunInfoError { .. }
            | Self::TrackerSetupError { .. } => AutotriageExitCode::SETUP_ERROR,
            Self::InputReadError { .. }
            | Self::EventStreamError { .. }
            | Self::XunitParseError { .. } => AutotriageExitCode::INPUT_FAILED,
            Self::StoreError { .. } | Self::ProcessRunError { .. } => {
                AutotriageExitCode::STORE_FAILED
            }
            Self::XunitWriteError { .. }
            | Self::WriteOutputError { .. }
            | Self::WriteJsonError { .. } => AutotriageExitCode::WRITE_OUTPUT_ERROR,
        }
    }

    /// Displays this error to stderr.
    pub fn display_to_stderr(&self, styles: &StderrStyles) {
        let mut next_error = match &self {
            Self::CurrentDirFailed { err } => {
                error!("could not determine current directory");
                Some(err as &dyn Error)
            }
            Self::ConfigParseError { err } => {
                error!(
                    "failed to parse autotriage config at `{}`",
                    err.config_file().style(styles.bold)
                );
                Some(err.kind() as &dyn Error)
            }
            Self::InputReadError { path, err } => {
                error!("failed to read `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::EventStreamError { path, err } => {
                error!(
                    "failed to parse event stream `{}`",
                    path.style(styles.bold)
                );
                Some(err as &dyn Error)
            }
            Self::XunitParseError { path, err } => {
                error!("failed to parse xUnit report `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::XunitWriteError { path, err } => {
                error!("failed to write xUnit report `{}`", path.style(styles.bold));
                Some(err as &dyn Error)
            }
            Self::RunInfoError { err } => {
                error!("{err}");
                err.source()
            }
            Self::TrackerSetupError { err } => {
                error!("{err}");
                err.source()
            }
            Self::StoreError { err } => {
                error!("{err}");
                err.source()
            }
            Self::ProcessRunError { path, err } => {
                error!(
                    "failed to process `{}`: {}",
                    path.style(styles.bold),
                    err.style(styles.warning_text)
                );
                err.source()
            }
            Self::WriteOutputError { err } => {
                error!("failed to write output");
                Some(err as &dyn Error)
            }
            Self::WriteJsonError { err } => {
                error!("failed to write JSON output");
                Some(err as &dyn Error)
            }
        };

        while let Some(err) = next_error {
            error!(target: NO_HEADING_TARGET, "\nCaused by:\n  {}", err);
            next_error = err.source();
        }
    }
}
