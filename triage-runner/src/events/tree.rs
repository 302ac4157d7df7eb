// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Action, GoTestEvent, TestStatus};
use crate::{
    config::FailureTemplate,
    errors::UnknownTestError,
    failure_location::{FailedCodePath, FailureLocationExtractor},
};
use owo_colors::{OwoColorize, Style};
use smol_str::SmolStr;
use std::{collections::HashMap, fmt, time::Duration};
use tracing::debug;
use triage_xunit::{NonSuccessKind, Testcase, TestcaseStatus, Testsuite};

/// Identifies a node within a [`ResultTree`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// The synthetic root node that stands for the whole artifact.
    pub const ROOT: NodeId = NodeId(0);
}

/// A single test or subtest.
#[derive(Clone, Debug)]
pub struct TestNode {
    qualified_name: String,
    short_name: String,
    package: SmolStr,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    output: Vec<String>,
    status: TestStatus,
    elapsed: Option<Duration>,
    matched_templates: Vec<String>,
    failure_locations: Vec<FailedCodePath>,
}

impl TestNode {
    fn new(
        qualified_name: String,
        short_name: String,
        package: SmolStr,
        parent: Option<NodeId>,
    ) -> Self {
        Self {
            qualified_name,
            short_name,
            package,
            parent,
            children: Vec::new(),
            output: Vec::new(),
            status: TestStatus::Unset,
            elapsed: None,
            matched_templates: Vec::new(),
            failure_locations: Vec::new(),
        }
    }

    /// The full slash-delimited name, e.g. `TestBGP/session/ipv4`. Empty for the root.
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// The name relative to the parent, e.g. `session/ipv4` under `TestBGP`.
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    /// The package this node was reported in.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// The parent of this node, or `None` for the root.
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Children in discovery order.
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Output chunks in the order they were reported.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// All output chunks joined together.
    pub fn output_text(&self) -> String {
        self.output.concat()
    }

    /// The last recorded status.
    pub fn status(&self) -> TestStatus {
        self.status
    }

    /// Elapsed time from the terminal event, if reported.
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// Names of failure templates that matched this node's output.
    pub fn matched_templates(&self) -> &[String] {
        &self.matched_templates
    }

    /// Failure locations extracted from this node's output.
    pub fn failure_locations(&self) -> &[FailedCodePath] {
        &self.failure_locations
    }

    /// Returns true if this node failed or never completed.
    pub fn is_failed(&self) -> bool {
        matches!(self.status, TestStatus::Fail | TestStatus::Unset)
    }
}

/// Rolled-up counts over a node's descendants.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeStats {
    /// Number of nodes counted.
    pub total: usize,
    /// Nodes that passed.
    pub passed: usize,
    /// Nodes that failed or did not complete.
    pub failed: usize,
    /// Nodes that were skipped.
    pub skipped: usize,
}

impl fmt::Display for NodeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tests: {} passed, {} failed, {} skipped",
            self.total, self.passed, self.failed, self.skipped
        )
    }
}

/// The test hierarchy of one `go test -json` artifact.
///
/// Nodes live in an arena indexed by [`NodeId`]. Lookups go through a per-package index of
/// qualified names, which is also how parents are resolved: a new test's parent is the
/// same-package node with the longest qualified name that is a `/`-bounded prefix of the new
/// name.
#[derive(Clone, Debug)]
pub struct ResultTree {
    name: String,
    nodes: Vec<TestNode>,
    by_package: HashMap<SmolStr, HashMap<String, NodeId>>,
    package_elapsed: Option<Duration>,
}

impl ResultTree {
    /// Creates an empty tree whose root is called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: vec![TestNode::new(
                String::new(),
                String::new(),
                SmolStr::default(),
                None,
            )],
            by_package: HashMap::new(),
            package_elapsed: None,
        }
    }

    /// The name of the artifact.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The synthetic root node.
    pub fn root(&self) -> &TestNode {
        &self.nodes[NodeId::ROOT.0]
    }

    /// Returns the node for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not produced by this tree.
    pub fn node(&self, id: NodeId) -> &TestNode {
        &self.nodes[id.0]
    }

    /// Looks up a test by package and qualified name.
    pub fn find(&self, package: &str, qualified_name: &str) -> Option<NodeId> {
        self.by_package.get(package)?.get(qualified_name).copied()
    }

    /// Number of test nodes, not counting the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Returns true if no tests have been seen.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over all test nodes, not including the root, in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TestNode)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .skip(1)
            .map(|(idx, node)| (NodeId(idx), node))
    }

    /// Returns the descendants of `id` in pre-order, not including `id` itself.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).children.iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.node(next).children.iter().rev().copied());
        }
        out
    }

    /// Applies one event to the tree.
    pub fn apply(&mut self, event: &GoTestEvent) -> Result<(), UnknownTestError> {
        let Some(test) = event.test.as_deref() else {
            self.apply_package_event(event);
            return Ok(());
        };

        match event.action {
            Action::Run => {
                self.add_test(&event.package, test);
                Ok(())
            }
            Action::Output => {
                let id = self.lookup(event.action, &event.package, test)?;
                if let Some(output) = &event.output {
                    self.nodes[id.0].output.push(output.clone());
                }
                Ok(())
            }
            Action::Pass | Action::Fail | Action::Skip => {
                let id = self.lookup(event.action, &event.package, test)?;
                let node = &mut self.nodes[id.0];
                node.status = match event.action {
                    Action::Pass => TestStatus::Pass,
                    Action::Fail => TestStatus::Fail,
                    _ => TestStatus::Skip,
                };
                if let Some(elapsed) = event.elapsed.and_then(duration_from_secs) {
                    node.elapsed = Some(elapsed);
                }
                Ok(())
            }
            Action::Start | Action::Pause | Action::Cont | Action::Bench | Action::Unknown => {
                Ok(())
            }
        }
    }

    fn apply_package_event(&mut self, event: &GoTestEvent) {
        if !matches!(event.action, Action::Pass | Action::Fail) {
            return;
        }
        if let Some(elapsed) = event.elapsed.and_then(duration_from_secs) {
            *self.package_elapsed.get_or_insert(Duration::ZERO) += elapsed;
        }
        if event.action != Action::Fail {
            return;
        }

        // A package failure with tests still running means the test binary died, typically from a
        // panic. Those tests will never report on their own.
        let Some(index) = self.by_package.get(event.package.as_str()) else {
            return;
        };
        let mut forced = 0;
        for id in index.values() {
            let node = &mut self.nodes[id.0];
            if node.status == TestStatus::Unset {
                node.status = TestStatus::Fail;
                forced += 1;
            }
        }
        if forced > 0 {
            debug!(
                package = %event.package,
                "package failed with {forced} tests still running, marking them failed"
            );
        }
    }

    fn add_test(&mut self, package: &str, qualified_name: &str) -> NodeId {
        if let Some(id) = self.find(package, qualified_name) {
            return id;
        }

        let (parent, short_name) = match self.resolve_parent(package, qualified_name) {
            Some((parent, prefix_len)) => (parent, &qualified_name[prefix_len + 1..]),
            None => (NodeId::ROOT, qualified_name),
        };

        let id = NodeId(self.nodes.len());
        let package = SmolStr::new(package);
        self.nodes.push(TestNode::new(
            qualified_name.to_owned(),
            short_name.to_owned(),
            package.clone(),
            Some(parent),
        ));
        self.nodes[parent.0].children.push(id);
        self.by_package
            .entry(package)
            .or_default()
            .insert(qualified_name.to_owned(), id);
        id
    }

    /// Looks up every `/` boundary of `qualified_name`, longest prefix first.
    fn resolve_parent(&self, package: &str, qualified_name: &str) -> Option<(NodeId, usize)> {
        let index = self.by_package.get(package)?;
        qualified_name
            .rmatch_indices('/')
            .find_map(|(idx, _)| index.get(&qualified_name[..idx]).map(|&id| (id, idx)))
    }

    fn lookup(
        &self,
        action: Action,
        package: &str,
        test: &str,
    ) -> Result<NodeId, UnknownTestError> {
        self.find(package, test).ok_or_else(|| UnknownTestError {
            action,
            package: package.to_owned(),
            test: test.to_owned(),
        })
    }

    /// Computes statistics over the descendants of `id`, or over `id` itself for a leaf.
    ///
    /// The root always counts its descendants, so an empty tree reports zero tests.
    pub fn stats(&self, id: NodeId) -> NodeStats {
        let node = self.node(id);
        let statuses: Vec<TestStatus> = if node.children.is_empty() && id != NodeId::ROOT {
            vec![node.status]
        } else {
            self.descendants(id)
                .into_iter()
                .map(|id| self.node(id).status)
                .collect()
        };

        let total = statuses.len();
        let skipped = statuses.iter().filter(|s| **s == TestStatus::Skip).count();
        let passed = statuses.iter().filter(|s| s.is_success()).count() - skipped;
        NodeStats {
            total,
            passed,
            failed: total - passed - skipped,
            skipped,
        }
    }

    /// The status shown for a node.
    ///
    /// The root passes iff every descendant passed or was skipped. Other nodes show their own
    /// recorded status.
    pub fn display_status(&self, id: NodeId) -> TestStatus {
        if id != NodeId::ROOT {
            return self.node(id).status;
        }
        if self
            .descendants(id)
            .into_iter()
            .all(|id| self.node(id).status.is_success())
        {
            TestStatus::Pass
        } else {
            TestStatus::Fail
        }
    }

    /// Tests that failed or never completed, in discovery order.
    pub fn failed_nodes(&self) -> Vec<NodeId> {
        self.iter()
            .filter(|(_, node)| node.is_failed())
            .map(|(id, _)| id)
            .collect()
    }

    /// Records, on every failed node, the names of the templates matching its output.
    pub fn match_failure_templates(&mut self, templates: &[FailureTemplate]) {
        for id in self.failed_nodes() {
            let output = self.node(id).output_text();
            let matched: Vec<String> = templates
                .iter()
                .filter(|template| template.is_match(&output))
                .map(|template| template.name.clone())
                .collect();
            self.nodes[id.0].matched_templates = matched;
        }
    }

    /// Runs the extractor over the output of every failed node.
    pub fn attach_failure_locations(&mut self, extractor: &mut FailureLocationExtractor) {
        for id in self.failed_nodes() {
            let output = self.node(id).output_text();
            let locations = extractor.process_log(&output);
            self.nodes[id.0].failure_locations = locations;
        }
    }

    /// Renders the tree as an xUnit testsuite with one testcase per test node.
    pub fn to_testsuite(&self) -> Testsuite {
        let mut testsuite = Testsuite::new(self.name.clone());
        if let Some(elapsed) = self.package_elapsed {
            testsuite.set_time(elapsed);
        }

        for id in self.descendants(NodeId::ROOT) {
            let node = self.node(id);
            let output = node.output_text();
            let status = match node.status {
                TestStatus::Pass => TestcaseStatus::success(),
                TestStatus::Skip => TestcaseStatus::skipped(),
                TestStatus::Fail => {
                    let mut status = TestcaseStatus::non_success(NonSuccessKind::Failure);
                    status.set_message("Failed").set_description(output.clone());
                    status
                }
                TestStatus::Unset => {
                    let mut status = TestcaseStatus::non_success(NonSuccessKind::Error);
                    status
                        .set_message("did not complete")
                        .set_description(output.clone());
                    status
                }
            };

            let mut testcase = Testcase::new(node.qualified_name.clone(), status);
            testcase.set_classname(node.package.as_str());
            if let Some(elapsed) = node.elapsed {
                testcase.set_time(elapsed);
            }
            if node.status.is_success() && !output.is_empty() {
                testcase.set_system_out(&output);
            }
            testsuite.add_testcase(testcase);
        }

        testsuite
    }

    /// Returns a displayer for the tree.
    pub fn display(&self) -> DisplayResultTree<'_> {
        DisplayResultTree {
            tree: self,
            styles: Styles::default(),
        }
    }
}

fn duration_from_secs(secs: f64) -> Option<Duration> {
    Duration::try_from_secs_f64(secs).ok()
}

/// Displays a [`ResultTree`] with one line per node.
#[derive(Clone, Debug)]
pub struct DisplayResultTree<'a> {
    tree: &'a ResultTree,
    styles: Styles,
}

impl DisplayResultTree<'_> {
    /// Colorizes the output.
    pub fn colorize(&mut self) {
        self.styles.colorize();
    }

    fn write_status(&self, status: TestStatus, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let style = match status {
            TestStatus::Pass => self.styles.pass,
            TestStatus::Fail => self.styles.fail,
            TestStatus::Skip => self.styles.skip,
            TestStatus::Unset => self.styles.unset,
        };
        write!(f, "{}", status.style(style))
    }

    fn write_node(&self, id: NodeId, depth: usize, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let node = self.tree.node(id);
        write!(
            f,
            "\n{:indent$}{}: ",
            "",
            node.short_name.style(self.styles.name),
            indent = depth * 2
        )?;
        self.write_status(node.status, f)?;
        if let Some(elapsed) = node.elapsed {
            write!(f, " [{:.3}s]", elapsed.as_secs_f64())?;
        }
        if !node.children.is_empty() {
            write!(f, " ({})", self.tree.stats(id))?;
        }
        if !node.matched_templates.is_empty() {
            write!(f, " <{}>", node.matched_templates.join(", "))?;
        }

        for &child in &node.children {
            self.write_node(child, depth + 1, f)?;
        }
        Ok(())
    }
}

impl fmt::Display for DisplayResultTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.tree.name.style(self.styles.name))?;
        self.write_status(self.tree.display_status(NodeId::ROOT), f)?;
        write!(f, " ({})", self.tree.stats(NodeId::ROOT))?;
        for &child in &self.tree.root().children {
            self.write_node(child, 1, f)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct Styles {
    name: Style,
    pass: Style,
    fail: Style,
    skip: Style,
    unset: Style,
}

impl Styles {
    fn colorize(&mut self) {
        self.name = Style::new().bold();
        self.pass = Style::new().green().bold();
        self.fail = Style::new().red().bold();
        self.skip = Style::new().yellow().bold();
        self.unset = Style::new().dimmed();
    }
}
