// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{Bug, BugBackend, BugKind};

/// The TechZone backend.
///
/// TechZone has no API access, so every case is open and never resolved.
#[derive(Clone, Copy, Debug, Default)]
pub struct TechZoneBackend;

impl BugBackend for TechZoneBackend {
    fn is_open(&self, _id: &str) -> bool {
        true
    }

    fn inherit(&self, id: &str) -> Option<Bug> {
        Some(Bug::new(id, BugKind::TechZone).with_resolved(!self.is_open(id)))
    }
}
