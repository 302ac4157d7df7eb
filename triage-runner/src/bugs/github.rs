// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Bug, BugBackend, BugKind};
use crate::errors::TrackerError;
use regex::Regex;
use serde::{Deserialize, de::DeserializeOwned};
use std::{fmt, sync::LazyLock, time::Duration};
use tracing::{debug, warn};

static GITHUB_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://([^/\s]+)/([^/\s]+)/([^/\s]+)/(issues|pull|tree)/([^/?#\s]+)")
        .expect("GitHub URL regex is valid")
});

/// What a GitHub URL points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GithubItem {
    /// An issue.
    Issue(u64),
    /// A pull request.
    Pull(u64),
    /// A branch or commit.
    Tree(String),
}

/// A parsed GitHub URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GithubRef {
    /// `github.com`, or a GitHub Enterprise host.
    pub host: String,
    pub owner: String,
    pub repo: String,
    pub item: GithubItem,
}

impl GithubRef {
    /// Parses `https://host/owner/repo/{issues,pull,tree}/…`.
    pub fn parse(url: &str) -> Option<Self> {
        let captures = GITHUB_URL_REGEX.captures(url.trim())?;
        let item = match &captures[4] {
            "issues" => GithubItem::Issue(captures[5].parse().ok()?),
            "pull" => GithubItem::Pull(captures[5].parse().ok()?),
            _ => GithubItem::Tree(captures[5].to_owned()),
        };
        Some(Self {
            host: captures[1].to_owned(),
            owner: captures[2].to_owned(),
            repo: captures[3].to_owned(),
            item,
        })
    }
}

impl fmt::Display for GithubRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)?;
        match &self.item {
            GithubItem::Issue(number) | GithubItem::Pull(number) => write!(f, "#{number}"),
            GithubItem::Tree(tree) => write!(f, "@{tree}"),
        }
    }
}

/// The author of an issue or pull request.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct GithubUser {
    pub login: String,
}

/// The fields of an issue or pull request that triage cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct GithubItemState {
    /// `open` or `closed`.
    pub state: String,

    /// Only set for pull requests.
    #[serde(default)]
    pub merged: bool,

    #[serde(default)]
    pub user: Option<GithubUser>,

    #[serde(default)]
    pub updated_at: Option<String>,
}

/// Fetches issues and pull requests.
pub trait GithubClient {
    /// Fetches the issue `number` of the repository named by `reference`.
    fn issue(&self, reference: &GithubRef, number: u64) -> Result<GithubItemState, TrackerError>;

    /// Fetches the pull request `number` of the repository named by `reference`.
    fn pull(&self, reference: &GithubRef, number: u64) -> Result<GithubItemState, TrackerError>;
}

/// A client for the GitHub REST API.
pub struct GithubRestClient {
    agent: ureq::Agent,
    token: Option<String>,
    api_base: Option<String>,
}

impl GithubRestClient {
    /// Creates a client, authenticating with `token` if provided.
    pub fn new(token: Option<String>) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(30)))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
            token,
            api_base: None,
        }
    }

    /// Sends all requests to `api_base` instead of the API of each URL's host.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = Some(api_base.into());
        self
    }

    fn api_base(&self, host: &str) -> String {
        match &self.api_base {
            Some(base) => base.trim_end_matches('/').to_owned(),
            None if host == "github.com" => "https://api.github.com".to_owned(),
            None => format!("https://{host}/api/v3"),
        }
    }

    fn get<T: DeserializeOwned>(&self, url: String) -> Result<T, TrackerError> {
        debug!("GET {url}");
        let mut request = self
            .agent
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "autotriage");
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let request_error = |err| TrackerError::Request {
            url: url.clone(),
            err: Box::new(err),
        };
        let mut response = request.call().map_err(request_error)?;
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(request_error)?;
        serde_json::from_str(&body).map_err(|err| TrackerError::Decode {
            what: format!("response from `{url}`"),
            err,
        })
    }
}

impl GithubClient for GithubRestClient {
    fn issue(&self, reference: &GithubRef, number: u64) -> Result<GithubItemState, TrackerError> {
        self.get(format!(
            "{}/repos/{}/{}/issues/{number}",
            self.api_base(&reference.host),
            reference.owner,
            reference.repo
        ))
    }

    fn pull(&self, reference: &GithubRef, number: u64) -> Result<GithubItemState, TrackerError> {
        self.get(format!(
            "{}/repos/{}/{}/pulls/{number}",
            self.api_base(&reference.host),
            reference.owner,
            reference.repo
        ))
    }
}

/// A GitHub client for when GitHub is not reachable.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableGithub;

impl GithubClient for UnavailableGithub {
    fn issue(&self, _: &GithubRef, _: u64) -> Result<GithubItemState, TrackerError> {
        Err(TrackerError::Unavailable { tracker: "GitHub" })
    }

    fn pull(&self, _: &GithubRef, _: u64) -> Result<GithubItemState, TrackerError> {
        Err(TrackerError::Unavailable { tracker: "GitHub" })
    }
}

/// The GitHub backend.
///
/// Lookup failures count as open, so bugs keep being tracked while GitHub is unreachable.
pub struct GithubBackend {
    client: Box<dyn GithubClient>,
    placeholders: Vec<String>,
}

impl GithubBackend {
    /// Creates a backend. Bug names equal to one of `placeholders`, ignoring case, are not
    /// real references.
    pub fn new(client: Box<dyn GithubClient>, placeholders: Vec<String>) -> Self {
        Self {
            client,
            placeholders,
        }
    }

    fn is_placeholder(&self, id: &str) -> bool {
        let id = id.trim();
        self.placeholders
            .iter()
            .any(|placeholder| placeholder.eq_ignore_ascii_case(id))
    }

    /// Fetches the state of an issue or pull request. Tree references have no state.
    fn fetch(&self, reference: &GithubRef) -> Option<Result<GithubItemState, TrackerError>> {
        match reference.item {
            GithubItem::Issue(number) => Some(self.client.issue(reference, number)),
            GithubItem::Pull(number) => Some(self.client.pull(reference, number)),
            GithubItem::Tree(_) => None,
        }
    }
}

fn is_item_open(item: &GithubItem, state: &GithubItemState) -> bool {
    match item {
        GithubItem::Pull(_) => !state.merged && state.state != "closed",
        GithubItem::Issue(_) => state.state == "open",
        GithubItem::Tree(_) => true,
    }
}

impl BugBackend for GithubBackend {
    fn is_open(&self, id: &str) -> bool {
        let Some(reference) = GithubRef::parse(id) else {
            debug!("cannot parse GitHub reference {id}, treating it as open");
            return true;
        };
        match self.fetch(&reference) {
            Some(Ok(state)) => is_item_open(&reference.item, &state),
            Some(Err(err)) => {
                warn!("GitHub lookup for {reference} failed, treating it as open: {err}");
                true
            }
            None => true,
        }
    }

    fn inherit(&self, id: &str) -> Option<Bug> {
        if self.is_placeholder(id) {
            return None;
        }
        let Some(reference) = GithubRef::parse(id) else {
            warn!("not inheriting unrecognized GitHub reference {id}");
            return None;
        };

        let bug = Bug::new(id, BugKind::Github);
        let bug = match self.fetch(&reference) {
            Some(Ok(state)) => {
                let mut bug = bug.with_resolved(!is_item_open(&reference.item, &state));
                if let Some(user) = &state.user {
                    bug.username = user.login.clone();
                }
                bug.updated = state.updated_at.clone();
                bug.status = Some(if state.merged {
                    "merged".to_owned()
                } else {
                    state.state
                });
                bug
            }
            Some(Err(err)) => {
                warn!("GitHub lookup for {reference} failed, using defaults: {err}");
                bug
            }
            None => bug,
        };
        Some(bug)
    }
}
