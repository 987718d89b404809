// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod broadcast;
pub mod container;
pub mod process;
pub mod repositories;
pub mod settings;

pub use broadcast::{BroadcastError, BroadcastHub, OutputFrame, OutputReceiver};
pub use container::ContainerBackend;
pub use process::ProcessBackend;
pub use settings::EngineSettings;
