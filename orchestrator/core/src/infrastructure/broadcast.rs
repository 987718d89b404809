// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Broadcast Hub - Topic-Keyed Fan-Out of Live Activation Output
//
// Provides in-memory fan-out of output frames using tokio broadcast
// channels, one channel per topic. Delivery is fire-and-forget: output is
// published whether or not any observer is currently watching, and a topic
// with no subscribers silently discards the frame.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// One frame of live activation output.
///
/// Serializes to the wire shape observers expect:
/// `["Stdout", {"stdout": <text>}]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFrame {
    Stdout { stdout: String },
}

impl OutputFrame {
    pub fn stdout(text: impl Into<String>) -> Self {
        OutputFrame::Stdout {
            stdout: text.into(),
        }
    }

    pub fn text(&self) -> &str {
        match self {
            OutputFrame::Stdout { stdout } => stdout,
        }
    }
}

impl Serialize for OutputFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(serde::Serialize)]
        struct Body<'a> {
            stdout: &'a str,
        }
        match self {
            OutputFrame::Stdout { stdout } => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element("Stdout")?;
                seq.serialize_element(&Body { stdout })?;
                seq.end()
            }
        }
    }
}

/// Topic-keyed fan-out of output frames to live observers.
pub struct BroadcastHub {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<OutputFrame>>>,
}

impl BroadcastHub {
    /// Capacity bounds how many frames a slow subscriber may lag before
    /// dropping old ones.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Default capacity (1000).
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Deliver `frame` to every current subscriber of `topic`. A topic
    /// nobody subscribed to discards the frame; this is the common case.
    pub fn publish(&self, topic: &str, frame: OutputFrame) {
        let delivered = {
            let topics = self.topics.read();
            topics.get(topic).map(|sender| sender.send(frame).unwrap_or(0))
        };
        match delivered {
            None | Some(0) => debug!(topic, "no subscribers; frame discarded"),
            Some(receivers) => debug!(topic, receivers, "published output frame"),
        }
        if delivered == Some(0) {
            self.prune(topic);
        }
    }

    /// Subscribe to a topic. Dropping the returned receiver unsubscribes.
    pub fn subscribe(&self, topic: &str) -> OutputReceiver {
        let mut topics = self.topics.write();
        let sender = topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        OutputReceiver {
            receiver: sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .read()
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drop a topic whose last subscriber is gone, so the map does not
    /// grow with one dead channel per finished instance.
    fn prune(&self, topic: &str) {
        let mut topics = self.topics.write();
        if let Some(sender) = topics.get(topic) {
            if sender.receiver_count() == 0 {
                topics.remove(topic);
            }
        }
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("topic channel is closed")]
    Closed,
    #[error("no frames available")]
    Empty,
    #[error("receiver lagged by {0} frames (frames were dropped)")]
    Lagged(u64),
}

/// Receiver side of one subscription.
pub struct OutputReceiver {
    receiver: broadcast::Receiver<OutputFrame>,
}

impl OutputReceiver {
    /// Receive the next frame, waiting until one is published.
    pub async fn recv(&mut self) -> Result<OutputFrame, BroadcastError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => BroadcastError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("output receiver lagged by {} frames", n);
                BroadcastError::Lagged(n)
            }
        })
    }

    /// Receive without blocking.
    pub fn try_recv(&mut self) -> Result<OutputFrame, BroadcastError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => BroadcastError::Empty,
            broadcast::error::TryRecvError::Closed => BroadcastError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("output receiver lagged by {} frames", n);
                BroadcastError::Lagged(n)
            }
        })
    }
}
