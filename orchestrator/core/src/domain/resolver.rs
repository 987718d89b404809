// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::activation::{DeploymentMode, RulesetSource};

/// Source types that do not need a live inbound event channel. Anything
/// else, including a missing type, resolves to the event-channel strategy.
const PLAIN_SOURCE_TYPES: &[&str] = &["file", "url"];

/// How an activation instance gets launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchStrategy {
    /// Evaluator runs as a local operating-system process.
    LocalProcess,
    /// Plain container launch; rulesets/inventory/extra-vars are supplied
    /// at launch time, no inbound event channel.
    Container,
    /// Container that dials back to the caller-supplied host:port over
    /// which external events are injected.
    ContainerEventChannel,
}

impl std::fmt::Display for LaunchStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LaunchStrategy::LocalProcess => write!(f, "local-process"),
            LaunchStrategy::Container => write!(f, "container"),
            LaunchStrategy::ContainerEventChannel => write!(f, "container-event-channel"),
        }
    }
}

/// Select the launch strategy for a deployment mode and the ruleset's
/// declared event sources.
///
/// Source declarations, not deployment mode alone, determine whether the
/// activation needs a live inbound channel; callers never branch on source
/// shape themselves.
pub fn resolve(mode: DeploymentMode, sources: &[RulesetSource]) -> LaunchStrategy {
    match mode {
        DeploymentMode::Local => LaunchStrategy::LocalProcess,
        DeploymentMode::Container => {
            if sources.iter().any(needs_event_channel) {
                LaunchStrategy::ContainerEventChannel
            } else {
                LaunchStrategy::Container
            }
        }
    }
}

fn needs_event_channel(source: &RulesetSource) -> bool {
    match source.source_type.as_deref() {
        // A missing or unrecognized type is treated like "websocket".
        Some(ty) => !PLAIN_SOURCE_TYPES.contains(&ty),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(ty: Option<&str>) -> RulesetSource {
        RulesetSource {
            source_type: ty.map(str::to_string),
            config: serde_json::json!({}),
        }
    }

    #[test]
    fn local_mode_always_resolves_local() {
        assert_eq!(
            resolve(DeploymentMode::Local, &[]),
            LaunchStrategy::LocalProcess
        );
        assert_eq!(
            resolve(DeploymentMode::Local, &[source(Some("websocket"))]),
            LaunchStrategy::LocalProcess
        );
    }

    #[test]
    fn container_without_sources_is_plain() {
        assert_eq!(
            resolve(DeploymentMode::Container, &[]),
            LaunchStrategy::Container
        );
    }

    #[test]
    fn websocket_source_selects_event_channel() {
        let sources = vec![source(Some("websocket"))];
        assert_eq!(
            resolve(DeploymentMode::Container, &sources),
            LaunchStrategy::ContainerEventChannel
        );
    }

    #[test]
    fn missing_source_type_selects_event_channel() {
        let sources = vec![source(None)];
        assert_eq!(
            resolve(DeploymentMode::Container, &sources),
            LaunchStrategy::ContainerEventChannel
        );
    }

    #[test]
    fn unrecognized_source_type_selects_event_channel() {
        let sources = vec![source(Some("kafka"))];
        assert_eq!(
            resolve(DeploymentMode::Container, &sources),
            LaunchStrategy::ContainerEventChannel
        );
    }

    #[test]
    fn recognized_plain_sources_stay_plain() {
        let sources = vec![source(Some("file")), source(Some("url"))];
        assert_eq!(
            resolve(DeploymentMode::Container, &sources),
            LaunchStrategy::Container
        );
    }

    #[test]
    fn one_websocket_among_plain_sources_wins() {
        let sources = vec![source(Some("file")), source(Some("websocket"))];
        assert_eq!(
            resolve(DeploymentMode::Container, &sources),
            LaunchStrategy::ContainerEventChannel
        );
    }
}
