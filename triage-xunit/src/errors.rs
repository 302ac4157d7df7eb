// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error as StdError;
use thiserror::Error;

/// An error that occurs while serializing a [`Report`](crate::Report).
///
/// Returned by [`Report::serialize`](crate::Report::serialize) and
/// [`Report::to_string`](crate::Report::to_string).
#[derive(Debug, Error)]
#[error("error serializing xUnit report")]
pub struct SerializeError {
    #[from]
    inner: std::io::Error,
}

/// An error that occurs while reading an xUnit report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DeserializeError {
    /// The document is not well-formed XML.
    ///
    /// This is fatal for the whole document.
    #[error("malformed XML at byte {position}")]
    Xml {
        /// The byte offset at which reading failed.
        position: u64,

        /// The underlying error.
        #[source]
        err: quick_xml::Error,
    },

    /// An attribute had a value that could not be interpreted.
    ///
    /// This is fatal only for the testsuite containing the element.
    #[error("invalid value `{value}` for attribute `{attribute}` on <{element}>")]
    InvalidAttribute {
        /// The element the attribute was found on.
        element: &'static str,

        /// The attribute name.
        attribute: String,

        /// The raw attribute value.
        value: String,

        /// The parse error.
        #[source]
        err: Box<dyn StdError + Send + Sync>,
    },

    /// The document ended before an element was closed.
    #[error("document ended inside <{element}>")]
    UnexpectedEof {
        /// The innermost element that was still open.
        element: &'static str,
    },

    /// The document did not contain any `<testsuites>` or `<testsuite>` element.
    #[error("document contains no <testsuites> or <testsuite> element")]
    NoTestsuites,

    /// The document was valid, but is not UTF-8.
    #[error("xUnit report is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),
}

impl DeserializeError {
    /// Returns true if this error prevents the rest of the document from being read.
    pub fn is_fatal(&self) -> bool {
        match self {
            DeserializeError::Xml { .. }
            | DeserializeError::UnexpectedEof { .. }
            | DeserializeError::NoTestsuites
            | DeserializeError::InvalidUtf8(_) => true,
            DeserializeError::InvalidAttribute { .. } => false,
        }
    }
}
