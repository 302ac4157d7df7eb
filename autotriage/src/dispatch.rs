// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    AutotriageExitCode, ExpectedError,
    errors::Result,
    output::{OutputContext, OutputOpts, OutputWriter, clap_styles},
};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use owo_colors::{OwoColorize, Style};
use std::{
    fs::File,
    io::{BufReader, Write},
};
use tracing::{error, info, warn};
use triage_runner::{
    bugs::{
        BugRegistry, DdtsBackend, DdtsClient, DdtsRecordsFile, GithubBackend, GithubClient,
        GithubRestClient, TechZoneBackend, UnavailableDdts, UnavailableGithub,
    },
    config::TriageConfig,
    errors::DisplayErrorChain,
    events::{EventStreamParser, parse_batch},
    failure_location::FailureLocationExtractor,
    inherit::TriageEngine,
    run::{RunDocument, RunInfo},
    similarity::{SimilarityLabeler, TermVectorIndex},
    store::{DocumentStore, JsonLinesStore},
};
use triage_xunit::Report;

/// Triage test results.
///
/// Rebuilds result trees from `go test -json` output, locates failures in logs, and triages xUnit
/// reports against previous runs of the same test plan.
#[derive(Debug, Parser)]
#[command(version, name = "autotriage", styles = clap_styles::style())]
pub struct AutotriageApp {
    #[clap(flatten)]
    output: OutputOpts,

    #[clap(flatten)]
    config_opts: ConfigOpts,

    #[clap(subcommand)]
    command: Command,
}

impl AutotriageApp {
    /// Initializes the output context.
    pub fn init_output(&self) -> OutputContext {
        self.output.init()
    }

    /// Executes the app, returning the process exit code.
    pub fn exec(self, output: OutputContext, output_writer: &mut OutputWriter) -> Result<i32> {
        let workspace_root = current_dir()?;
        let config = self.config_opts.make_config(&workspace_root)?;
        let ctx = ExecContext {
            output,
            config,
            workspace_root,
        };

        match self.command {
            Command::Tree { events } => ctx.exec_tree(&events, output_writer),
            Command::Convert { events, output } => ctx.exec_convert(&events, &output),
            Command::Locations { log } => ctx.exec_locations(&log, output_writer),
            Command::Process { xunit, opts } => ctx.exec_process(&xunit, opts, output_writer),
        }
    }
}

#[derive(Debug, Args)]
struct ConfigOpts {
    /// Config file [default: current-dir/.config/autotriage.toml]
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<Utf8PathBuf>,
}

impl ConfigOpts {
    fn make_config(&self, workspace_root: &Utf8Path) -> Result<TriageConfig> {
        Ok(TriageConfig::from_sources(
            workspace_root,
            self.config.as_deref(),
        )?)
    }
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the result tree of `go test -json` event streams
    ///
    /// Each file is parsed independently: a file that fails to parse is reported and the others
    /// are still printed.
    Tree {
        /// Event stream files
        #[arg(required = true, value_name = "EVENTS")]
        events: Vec<Utf8PathBuf>,
    },

    /// Convert a `go test -json` event stream to an xUnit report
    Convert {
        /// Event stream file
        #[arg(value_name = "EVENTS")]
        events: Utf8PathBuf,

        /// Output xUnit file
        #[arg(long, short, value_name = "XML")]
        output: Utf8PathBuf,
    },

    /// Print the failure locations found in a log as JSON
    Locations {
        /// Log file
        #[arg(value_name = "LOG")]
        log: Utf8PathBuf,
    },

    /// Triage xUnit reports against a document store
    ///
    /// Every testsuite is compared to the most recent stored run of the same test plan on the
    /// same lineup. The triaged documents are appended to the store.
    Process {
        /// xUnit report files
        #[arg(required = true, value_name = "XUNIT")]
        xunit: Vec<Utf8PathBuf>,

        #[clap(flatten)]
        opts: ProcessOpts,
    },
}

#[derive(Debug, Args)]
struct ProcessOpts {
    /// JSON-lines document store, created if missing
    #[arg(long, value_name = "JSONL")]
    store: Utf8PathBuf,

    /// JSON file with DDTS records [default: DDTS lookups fail]
    #[arg(long, value_name = "PATH")]
    ddts_records: Option<Utf8PathBuf>,

    /// Testsuite root containing `run.json`
    #[arg(long, value_name = "DIR")]
    run_info: Option<Utf8PathBuf>,

    /// Image version under test [default: read from `show version` logs]
    #[arg(long, default_value = "")]
    version: String,

    /// Image workspace [default: read from `show version` logs]
    #[arg(long, default_value = "")]
    workspace: String,

    /// Do not contact GitHub
    #[arg(long)]
    offline: bool,
}

struct ExecContext {
    output: OutputContext,
    config: TriageConfig,
    workspace_root: Utf8PathBuf,
}

impl ExecContext {
    fn extractor(&self) -> FailureLocationExtractor {
        FailureLocationExtractor::with_source_lookup(
            &self.config.failure_locations,
            self.workspace_root.clone(),
        )
    }

    fn exec_tree(&self, events: &[Utf8PathBuf], output_writer: &mut OutputWriter) -> Result<i32> {
        let mut failed = 0;
        let mut artifacts = Vec::with_capacity(events.len());
        for path in events {
            match File::open(path) {
                Ok(file) => artifacts.push((path.to_string(), BufReader::new(file))),
                Err(err) => {
                    error!("failed to open `{path}`: {err}");
                    failed += 1;
                }
            }
        }

        let mut extractor = self.extractor();
        let mut writer = output_writer.stdout_writer();
        for artifact in parse_batch(artifacts) {
            let mut tree = match artifact.result {
                Ok(tree) => tree,
                Err(_) => {
                    // Already logged by parse_batch.
                    failed += 1;
                    continue;
                }
            };
            tree.match_failure_templates(&self.config.failure_templates);
            tree.attach_failure_locations(&mut extractor);

            let mut display = tree.display();
            let mut location_style = Style::new();
            if self.output.colorize_stdout() {
                display.colorize();
                location_style = location_style.bold();
            }
            writeln!(writer, "{display}").map_err(write_err)?;

            if self.output.verbose {
                for id in tree.failed_nodes() {
                    let node = tree.node(id);
                    for location in node.failure_locations() {
                        writeln!(
                            writer,
                            "  {}: {}",
                            node.qualified_name(),
                            location.file_name.style(location_style)
                        )
                        .map_err(write_err)?;
                    }
                }
            }
        }
        writer.flush().map_err(write_err)?;

        if failed > 0 {
            warn!("{failed} of {} event streams could not be read", events.len());
            Ok(AutotriageExitCode::ARTIFACTS_FAILED)
        } else {
            Ok(AutotriageExitCode::OK)
        }
    }

    fn exec_convert(&self, events: &Utf8Path, output: &Utf8Path) -> Result<i32> {
        let file = File::open(events).map_err(|err| ExpectedError::input_read_error(events, err))?;
        let tree = EventStreamParser::parse_reader(events.as_str(), BufReader::new(file)).map_err(
            |err| ExpectedError::EventStreamError {
                path: events.to_owned(),
                err,
            },
        )?;

        let mut report = Report::new();
        report
            .set_name(events.file_stem().unwrap_or(events.as_str()))
            .add_testsuite(tree.to_testsuite());

        let xunit_err = |err| ExpectedError::XunitWriteError {
            path: output.to_owned(),
            err,
        };
        let file = File::create(output)
            .map_err(|err| xunit_err(triage_xunit::SerializeError::from(err)))?;
        report.serialize(file).map_err(xunit_err)?;
        info!("wrote {} tests to {output}", tree.len());
        Ok(AutotriageExitCode::OK)
    }

    fn exec_locations(&self, log: &Utf8Path, output_writer: &mut OutputWriter) -> Result<i32> {
        let contents =
            std::fs::read_to_string(log).map_err(|err| ExpectedError::input_read_error(log, err))?;
        let locations = self.extractor().process_log(&contents);

        let mut writer = output_writer.stdout_writer();
        serde_json::to_writer_pretty(&mut writer, &locations)
            .map_err(|err| ExpectedError::WriteJsonError { err })?;
        writeln!(writer).map_err(write_err)?;
        writer.flush().map_err(write_err)?;
        Ok(AutotriageExitCode::OK)
    }

    fn exec_process(
        &self,
        xunit: &[Utf8PathBuf],
        opts: ProcessOpts,
        output_writer: &mut OutputWriter,
    ) -> Result<i32> {
        let run_info = match &opts.run_info {
            Some(dir) => RunInfo::load(dir, &opts.version, &opts.workspace)?,
            None => RunInfo {
                tag: opts.version.clone(),
                workspace: opts.workspace.clone(),
                ..RunInfo::default()
            },
        };
        let ddts: Box<dyn DdtsClient> = match &opts.ddts_records {
            Some(path) => Box::new(DdtsRecordsFile::load(path)?),
            None => Box::new(UnavailableDdts),
        };
        let github: Box<dyn GithubClient> = if opts.offline {
            Box::new(UnavailableGithub)
        } else {
            let mut client = GithubRestClient::new(self.config.github.token());
            if let Some(api_base) = &self.config.github.api_base {
                client = client.with_api_base(api_base.clone());
            }
            Box::new(client)
        };
        let registry = BugRegistry::new(
            DdtsBackend::new(ddts),
            GithubBackend::new(github, self.config.github.placeholders.clone()),
            TechZoneBackend,
        );

        let mut store = JsonLinesStore::open(opts.store.clone())?;
        let index = TermVectorIndex::from_documents(&store.documents()?);
        let mut engine = TriageEngine::new(
            &self.config,
            registry,
            SimilarityLabeler::new(Box::new(index), &self.config.similarity),
            self.extractor(),
        );

        let mut failed = 0;
        let mut writer = output_writer.stdout_writer();
        for path in xunit {
            let report = match std::fs::read_to_string(path) {
                Ok(xml) => Report::deserialize_lenient(&xml),
                Err(err) => {
                    error!(
                        "skipping `{path}`: {}",
                        DisplayErrorChain::new(ExpectedError::input_read_error(path, err))
                    );
                    failed += 1;
                    continue;
                }
            };
            let report = match report {
                Ok(report) => report,
                Err(err) => {
                    let err = ExpectedError::XunitParseError {
                        path: path.clone(),
                        err,
                    };
                    error!("skipping `{path}`: {}", DisplayErrorChain::new(err));
                    failed += 1;
                    continue;
                }
            };

            let documents = engine
                .process_run(&mut store, &run_info, report)
                .map_err(|err| ExpectedError::ProcessRunError {
                    path: path.clone(),
                    err,
                })?;
            for document in &documents {
                writeln!(writer, "{}", DisplayDocument(document)).map_err(write_err)?;
            }
        }
        writer.flush().map_err(write_err)?;

        if failed > 0 {
            warn!("{failed} of {} xUnit reports could not be read", xunit.len());
            Ok(AutotriageExitCode::ARTIFACTS_FAILED)
        } else {
            Ok(AutotriageExitCode::OK)
        }
    }
}

struct DisplayDocument<'a>(&'a RunDocument);

impl std::fmt::Display for DisplayDocument<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let document = self.0;
        write!(
            f,
            "{} [{}]: {} tests, {} failures, {} errors, health {}: {}",
            document.plan_id.as_deref().unwrap_or("<no plan>"),
            document.run_id,
            document.tests,
            document.failures,
            document.errors,
            document.health,
            document.triage_summary,
        )
    }
}

fn current_dir() -> Result<Utf8PathBuf> {
    let dir = std::env::current_dir().map_err(|err| ExpectedError::CurrentDirFailed { err })?;
    Utf8PathBuf::try_from(dir).map_err(|err| ExpectedError::CurrentDirFailed {
        err: err.into_io_error(),
    })
}

fn write_err(err: std::io::Error) -> ExpectedError {
    ExpectedError::WriteOutputError { err }
}
