// Copyright (c) The autotriage Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod bugs;
mod fixtures;
mod inheritance;
mod labels;
mod verification;
