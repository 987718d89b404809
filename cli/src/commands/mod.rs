// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the vigil CLI

pub mod replay;
pub mod resolve;
pub mod run;

pub use self::replay::ReplayCommand;
pub use self::resolve::ResolveCommand;
pub use self::run::RunCommand;

use anyhow::{Context, Result};
use vigil_core::domain::activation::RulesetSource;

/// Parse `--source` JSON values of the shape
/// `{"type": "websocket", "config": {"port": 10000}}`.
pub fn parse_sources(raw: &[String]) -> Result<Vec<RulesetSource>> {
    raw.iter()
        .map(|s| {
            serde_json::from_str(s).with_context(|| format!("invalid ruleset source: {s}"))
        })
        .collect()
}
