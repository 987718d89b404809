// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod activation;
pub mod backend;
pub mod codec;
pub mod repository;
pub mod resolver;

pub use activation::{
    ActivationInstance, ActivationStatus, DeploymentMode, InstanceId, LaunchRequest, LogId,
    RestartPolicy, RulesetSource,
};
pub use backend::{ActivationBackend, ExecutionHandle, LaunchError, OutputStream, StartedActivation};
pub use repository::{ActivationInstanceRepository, ActivationLogRepository, PersistenceError};
pub use resolver::{resolve, LaunchStrategy};
