// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Activation orchestration engine.
//!
//! Launches rule-evaluating activation instances as local processes or
//! containers, supervises their output, persists and re-broadcasts it, and
//! tears instances down on request.
//!
//! # Architecture
//!
//! - **domain**: entities, backend/repository traits, strategy resolution
//! - **application**: registry, drain supervision, the orchestrator itself
//! - **infrastructure**: process/container backends, broadcast hub,
//!   repositories, settings

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
