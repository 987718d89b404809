// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod orchestrator;
pub mod registry;
pub mod supervisor;

pub use orchestrator::{ActivationError, ActivationOrchestrator};
pub use registry::{ActivationRegistry, RegistryEntry, RegistryError};
