// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{GoTestEvent, ResultTree};
use crate::errors::{DisplayErrorChain, EventStreamError};
use std::io::BufRead;
use tracing::{debug, warn};

/// Incrementally builds a [`ResultTree`] from `go test -json` lines.
#[derive(Debug)]
pub struct EventStreamParser {
    tree: ResultTree,
    line: usize,
}

impl EventStreamParser {
    /// Creates a parser for the artifact called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tree: ResultTree::new(name),
            line: 0,
        }
    }

    /// Parses and applies one line. Blank lines are skipped.
    pub fn feed_line(&mut self, line: &str) -> Result<(), EventStreamError> {
        self.line += 1;
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let event: GoTestEvent = serde_json::from_str(line).map_err(|err| EventStreamError::Json {
            line: self.line,
            err,
        })?;
        self.feed(&event)
    }

    /// Applies an already-decoded event.
    pub fn feed(&mut self, event: &GoTestEvent) -> Result<(), EventStreamError> {
        self.tree
            .apply(event)
            .map_err(|err| EventStreamError::UnknownTest {
                line: self.line,
                err,
            })
    }

    /// Returns the tree built so far.
    pub fn finish(self) -> ResultTree {
        self.tree
    }

    /// Parses a complete stream held in memory.
    pub fn parse_str(name: impl Into<String>, input: &str) -> Result<ResultTree, EventStreamError> {
        let mut parser = Self::new(name);
        for line in input.lines() {
            parser.feed_line(line)?;
        }
        Ok(parser.finish())
    }

    /// Parses a complete stream from a reader.
    pub fn parse_reader(
        name: impl Into<String>,
        reader: impl BufRead,
    ) -> Result<ResultTree, EventStreamError> {
        let mut parser = Self::new(name);
        for line in reader.lines() {
            let line = line.map_err(EventStreamError::Read)?;
            parser.feed_line(&line)?;
        }
        Ok(parser.finish())
    }
}

/// The outcome of parsing one artifact in a batch.
#[derive(Debug)]
pub struct ParsedArtifact {
    /// The artifact name.
    pub name: String,

    /// The tree, or the error that stopped parsing this artifact.
    pub result: Result<ResultTree, EventStreamError>,
}

/// Parses several artifacts. A failure in one artifact does not stop the others.
pub fn parse_batch<I, R>(artifacts: I) -> Vec<ParsedArtifact>
where
    I: IntoIterator<Item = (String, R)>,
    R: BufRead,
{
    artifacts
        .into_iter()
        .map(|(name, reader)| {
            let result = EventStreamParser::parse_reader(name.clone(), reader);
            match &result {
                Ok(tree) => debug!("parsed {} tests from `{name}`", tree.len()),
                Err(err) => warn!(
                    "skipping artifact `{name}`: {}",
                    DisplayErrorChain::new(err)
                ),
            }
            ParsedArtifact { name, result }
        })
        .collect()
}
