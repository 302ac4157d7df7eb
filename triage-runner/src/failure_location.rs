// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recover the source locations behind a test failure from its log output.
//!
//! Go and Python test logs mention `file.go:123:` for every assertion, log call and stack
//! frame. Most of these are noise: a single failing assertion is typically surrounded by
//! several nearby frames from the same file. [`FailureLocationExtractor`] reduces the raw
//! matches to one location per cluster, attaches the surrounding log lines, and optionally the
//! surrounding source lines when the source tree is available.

use crate::{config::FailureLocationConfig, run::TestCaseRecord};
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    fmt,
    sync::LazyLock,
};
use swrite::{SWrite, swrite};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

static LOCATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:[/\w.-]+/)*([\w.-]+\.(?:py|go)):(\d+):").expect("location regex is valid")
});

/// A `(basename, line)` pair found in a log.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FailureLocation {
    /// The file's basename, e.g. `bgp_test.go`.
    pub file_name: String,

    /// The 1-based line number.
    pub line: u32,
}

impl FailureLocation {
    /// Creates a new location.
    pub fn new(file_name: impl Into<String>, line: u32) -> Self {
        Self {
            file_name: file_name.into(),
            line,
        }
    }
}

impl fmt::Display for FailureLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file_name, self.line)
    }
}

/// A location together with the log it was found in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFailure {
    /// The location.
    pub location: FailureLocation,

    /// The log the location was extracted from.
    pub snippet: String,
}

/// A processed failure location, as stored on a testcase record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedCodePath {
    /// `file:line`.
    pub file_name: String,

    /// Log lines around the location.
    pub extracted_code: String,

    /// Source lines around the location, when the source file was found.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_code_from_file: Option<String>,
}

impl FailedCodePath {
    /// Returns the basename part of [`Self::file_name`].
    pub fn basename(&self) -> &str {
        self.file_name
            .rsplit_once(':')
            .map_or(self.file_name.as_str(), |(name, _)| name)
    }
}

/// Scans `text` line by line for `name.go:NN:` or `name.py:NN:` locations.
///
/// Only the basename of each path is kept.
pub fn extract_raw_locations(text: &str) -> BTreeSet<FailureLocation> {
    text.lines().filter_map(match_location).collect()
}

fn match_location(line: &str) -> Option<FailureLocation> {
    let captures = LOCATION_REGEX.captures(line.trim())?;
    let line_number = &captures[2];
    match line_number.parse() {
        Ok(line) => Some(FailureLocation::new(&captures[1], line)),
        Err(_) => {
            warn!(
                "ignoring out-of-range line number `{line_number}` for `{}`",
                &captures[1]
            );
            None
        }
    }
}

/// Builds raw failures for every location in `log`.
pub fn raw_failures(log: &str) -> Vec<RawFailure> {
    extract_raw_locations(log)
        .into_iter()
        .map(|location| RawFailure {
            location,
            snippet: log.to_owned(),
        })
        .collect()
}

/// Collapses clusters of nearby locations within each file.
///
/// Within a file, locations are walked in line order and a location is kept only if it is more
/// than `buffer` lines away from the last kept one. The result is ordered by file, then line.
pub fn filter_nearby(items: Vec<RawFailure>, buffer: u32) -> Vec<RawFailure> {
    let mut by_file: BTreeMap<String, Vec<RawFailure>> = BTreeMap::new();
    for item in items {
        by_file
            .entry(item.location.file_name.clone())
            .or_default()
            .push(item);
    }

    let mut kept = Vec::new();
    for (_, mut group) in by_file {
        group.sort_by_key(|item| item.location.line);
        let mut last_kept: Option<u32> = None;
        for item in group {
            if last_kept.is_none_or(|last| item.location.line.abs_diff(last) > buffer) {
                last_kept = Some(item.location.line);
                kept.push(item);
            }
        }
    }
    kept
}

/// Returns the log lines within `window` lines of `location` in `snippet`.
///
/// If the location cannot be found again, the tail of the snippet is returned with a warning
/// line appended.
pub fn extract_context(snippet: &str, location: &FailureLocation, window: usize) -> String {
    if snippet.is_empty() {
        return "(Log snippet was empty)".to_owned();
    }

    let lines: Vec<&str> = snippet.lines().collect();
    let Some(idx) = lines
        .iter()
        .position(|line| match_location(line).as_ref() == Some(location))
    else {
        warn!("location {location} not found again in its own log, using the end of the log");
        let tail_len = window.saturating_mul(2).saturating_add(1);
        if lines.len() > tail_len {
            let mut out = lines[lines.len() - tail_len..].join("\n");
            swrite!(
                out,
                "\n(Context Warning: Target {location} not pinpointed in snippet)"
            );
            return out;
        }
        return snippet.to_owned();
    };

    let start = idx.saturating_sub(window);
    let end = idx.saturating_add(window).saturating_add(1).min(lines.len());
    lines[start..end].join("\n")
}

/// A source file found under the source root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    /// The path relative to the repository, starting with the source root, e.g.
    /// `feature/bgp/bgp_test.go`.
    pub relative_path: Utf8PathBuf,

    /// The path on disk.
    pub path: Utf8PathBuf,
}

/// Finds test sources by basename under a source root in an ancestor directory.
///
/// Results, including misses, are cached for the lifetime of the locator.
#[derive(Debug)]
pub struct SourceLocator {
    start_dir: Utf8PathBuf,
    source_root: String,
    max_ancestor_depth: usize,
    cache: HashMap<String, Option<SourceFile>>,
}

impl SourceLocator {
    /// Creates a locator that searches from `start_dir` upwards.
    pub fn new(start_dir: impl Into<Utf8PathBuf>, config: &FailureLocationConfig) -> Self {
        Self {
            start_dir: start_dir.into(),
            source_root: config.source_root.clone(),
            max_ancestor_depth: config.max_ancestor_depth,
            cache: HashMap::new(),
        }
    }

    /// Looks up a file by basename.
    pub fn find(&mut self, basename: &str) -> Option<&SourceFile> {
        if basename.is_empty() {
            return None;
        }
        if !self.cache.contains_key(basename) {
            let found = self.search(basename);
            match &found {
                Some(file) => info!("found source for {basename} at {}", file.relative_path),
                None => warn!("could not find source for {basename}"),
            }
            self.cache.insert(basename.to_owned(), found);
        }
        self.cache.get(basename).and_then(Option::as_ref)
    }

    fn search(&self, basename: &str) -> Option<SourceFile> {
        for dir in self.start_dir.ancestors().take(self.max_ancestor_depth.saturating_add(1)) {
            let root = dir.join(&self.source_root);
            if !root.is_dir() {
                continue;
            }

            let found = WalkDir::new(&root)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .find(|entry| entry.file_type().is_file() && entry.file_name() == basename);
            let Some(entry) = found else {
                continue;
            };
            let Ok(path) = Utf8PathBuf::from_path_buf(entry.into_path()) else {
                continue;
            };
            let Ok(suffix) = path.strip_prefix(&root) else {
                continue;
            };
            return Some(SourceFile {
                relative_path: Utf8Path::new(&self.source_root).join(suffix),
                path,
            });
        }
        None
    }
}

/// Renders lines `line - window ..= line + window` of a source file.
///
/// The target line is marked with `>>> `. Returns `None` if the file cannot be read or the
/// range is empty.
pub fn source_context(path: &Utf8Path, line: u32, window: usize) -> Option<String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            debug!("error reading source file {path}: {err}");
            return None;
        }
    };
    let lines: Vec<&str> = contents.lines().collect();
    let line = line as usize;
    let start = line.saturating_sub(window).max(1);
    let end = line.saturating_add(window).min(lines.len());
    if start > end {
        return None;
    }

    let mut out = String::new();
    for num in start..=end {
        let prefix = if num == line { ">>> " } else { "    " };
        if num > start {
            out.push('\n');
        }
        swrite!(out, "{prefix}{num:4}: {}", lines[num - 1].trim_end());
    }
    Some(out)
}

/// Extracts, deduplicates and contextualizes failure locations.
#[derive(Debug)]
pub struct FailureLocationExtractor {
    nearby_line_buffer: u32,
    log_context_lines: usize,
    locator: Option<SourceLocator>,
}

impl FailureLocationExtractor {
    /// Creates an extractor that never looks at source files.
    pub fn new(config: &FailureLocationConfig) -> Self {
        Self {
            nearby_line_buffer: config.nearby_line_buffer,
            log_context_lines: config.log_context_lines,
            locator: None,
        }
    }

    /// Creates an extractor that looks for source files above `start_dir`, if enabled in
    /// `config`.
    pub fn with_source_lookup(
        config: &FailureLocationConfig,
        start_dir: impl Into<Utf8PathBuf>,
    ) -> Self {
        let mut extractor = Self::new(config);
        if config.source_lookup {
            extractor.locator = Some(SourceLocator::new(start_dir, config));
        }
        extractor
    }

    /// See [`filter_nearby`].
    pub fn filter_nearby(&self, items: Vec<RawFailure>) -> Vec<RawFailure> {
        let count = items.len();
        let kept = filter_nearby(items, self.nearby_line_buffer);
        debug!("filtered {count} locations down to {}", kept.len());
        kept
    }

    /// See [`extract_context`].
    pub fn extract_context(&self, snippet: &str, location: &FailureLocation) -> String {
        extract_context(snippet, location, self.log_context_lines)
    }

    /// Filters, contextualizes, deduplicates and sorts raw failures.
    pub fn process_testsuite_failures(&mut self, raw: Vec<RawFailure>) -> Vec<FailedCodePath> {
        if raw.is_empty() {
            return Vec::new();
        }

        let filtered = self.filter_nearby(raw);
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(filtered.len());
        for item in filtered {
            if !seen.insert(item.location.clone()) {
                continue;
            }

            let extracted_code = self.extract_context(&item.snippet, &item.location);
            let window = self.log_context_lines;
            let context_code_from_file = self
                .locator
                .as_mut()
                .and_then(|locator| locator.find(&item.location.file_name))
                .and_then(|file| source_context(&file.path, item.location.line, window));

            out.push((
                item.location.clone(),
                FailedCodePath {
                    file_name: item.location.to_string(),
                    extracted_code,
                    context_code_from_file,
                },
            ));
        }

        out.sort_by(|(a, _), (b, _)| a.cmp(b));
        out.into_iter().map(|(_, path)| path).collect()
    }

    /// Processes all locations found in a single log.
    pub fn process_log(&mut self, log: &str) -> Vec<FailedCodePath> {
        if log.is_empty() {
            return Vec::new();
        }
        self.process_testsuite_failures(raw_failures(log))
    }

    /// Returns the source-relative path of the first failure location that resolves to a file.
    pub fn script_path(&mut self, records: &[TestCaseRecord]) -> Option<Utf8PathBuf> {
        let locator = self.locator.as_mut()?;
        for record in records {
            let Some(first) = record.failed_code_path.first() else {
                continue;
            };
            if let Some(file) = locator.find(first.basename()) {
                return Some(file.relative_path.clone());
            }
        }
        debug!("could not determine script path from testcases");
        None
    }
}
