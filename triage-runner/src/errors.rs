// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by autotriage.

use crate::events::Action;
use camino::Utf8PathBuf;
use config::ConfigError;
use std::{error::Error, fmt};
use thiserror::Error;

/// An error that occurred while parsing the config.
#[derive(Debug, Error)]
#[error("failed to parse autotriage config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error this is.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of error that occurred while parsing a config.
///
/// Returned by [`ConfigParseError::kind`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// An error occurred while building the config.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// An error occurred while deserializing the config.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),

    /// A failure template has an invalid regex.
    #[error("failure template `{name}` has an invalid pattern")]
    InvalidFailureTemplate {
        /// The name of the template.
        name: String,

        /// The regex error.
        #[source]
        err: regex::Error,
    },
}

/// A non-`run` event referred to a test that had not been started.
#[derive(Clone, Debug, Error)]
#[error("`{action}` event for unknown test `{test}` in package `{package}`")]
pub struct UnknownTestError {
    /// The event action.
    pub action: Action,

    /// The package of the event.
    pub package: String,

    /// The test name of the event.
    pub test: String,
}

/// An error that aborts the parsing of one `go test -json` event stream.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EventStreamError {
    /// A line was not a valid test event.
    #[error("line {line}: invalid test event")]
    Json {
        /// The 1-based line number.
        line: usize,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// An event referred to a test that had not been started.
    #[error("line {line}: test event out of order")]
    UnknownTest {
        /// The 1-based line number.
        line: usize,

        /// The underlying error.
        #[source]
        err: UnknownTestError,
    },

    /// Reading the stream failed.
    #[error("error reading test events")]
    Read(#[source] std::io::Error),
}

/// An error returned by a [`DocumentStore`](crate::store::DocumentStore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// An I/O error occurred on the store's backing file.
    #[error("error accessing document store at `{path}`")]
    Io {
        /// The backing file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// A stored document could not be read.
    #[error("invalid document at `{path}` line {line}")]
    InvalidDocument {
        /// The backing file.
        path: Utf8PathBuf,

        /// The 1-based line number.
        line: usize,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// A document could not be serialized.
    #[error("error serializing document for run `{run_id}`")]
    Serialize {
        /// The run the document belongs to.
        run_id: String,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },
}

/// An error returned by a bug tracker client.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    /// No record exists for the identifier.
    #[error("no record found for `{id}`")]
    RecordNotFound {
        /// The identifier that was looked up.
        id: String,
    },

    /// The client is not configured.
    #[error("{tracker} client is unavailable")]
    Unavailable {
        /// The name of the tracker.
        tracker: &'static str,
    },

    /// An HTTP request failed.
    #[error("request to `{url}` failed")]
    Request {
        /// The URL requested.
        url: String,

        /// The underlying error.
        #[source]
        err: Box<ureq::Error>,
    },

    /// A response or records file could not be decoded.
    #[error("error decoding {what}")]
    Decode {
        /// What was being decoded.
        what: String,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },

    /// A records file could not be read.
    #[error("error reading records file `{path}`")]
    ReadRecords {
        /// The records file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },
}

/// An error returned by a [`VectorIndex`](crate::similarity::VectorIndex).
#[derive(Clone, Debug, Error)]
#[error("similarity search failed: {message}")]
pub struct IndexError {
    message: String,
}

impl IndexError {
    /// Creates a new `IndexError`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An error that occurred while loading run metadata.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunInfoError {
    /// `run.json` could not be read.
    #[error("error reading `{path}`")]
    Read {
        /// The file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: std::io::Error,
    },

    /// `run.json` is not valid JSON.
    #[error("error parsing `{path}`")]
    Parse {
        /// The file.
        path: Utf8PathBuf,

        /// The underlying error.
        #[source]
        err: serde_json::Error,
    },
}

/// An error that aborted the processing of a run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessRunError {
    /// The processed documents could not be stored.
    #[error("error storing documents for run `{run_id}`")]
    Store {
        /// The run being processed.
        run_id: String,

        /// The underlying error.
        #[source]
        err: StoreError,
    },
}

/// Displays an error along with its chain of sources.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E> fmt::Display for DisplayErrorChain<E>
where
    E: Error,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        if source.is_some() {
            write!(f, "\ncaused by:")?;
        }
        while let Some(err) = source {
            write!(f, "\n  - {err}")?;
            source = err.source();
        }
        Ok(())
    }
}
