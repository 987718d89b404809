// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Output drain loops: one long-lived task per activation instance.
//!
//! Drain-time failures have no caller to report to once `activate` has
//! returned, so they are logged and absorbed: a persistence failure never
//! skips the broadcast, and a broadcast with no subscribers is the normal
//! case, not an error.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, warn};

use crate::domain::activation::{InstanceId, LogId};
use crate::domain::backend::OutputStream;
use crate::domain::codec::{decode_chunk, LineAssembler};
use crate::domain::repository::ActivationLogRepository;
use crate::infrastructure::broadcast::{BroadcastHub, OutputFrame};

/// Row-log policy, used for process-backed instances: assemble lines from
/// the byte stream, broadcast each one, persist each one as a numbered row.
///
/// `line_number` advances only on a successful append so stored rows stay
/// gap-free; a line whose append failed survives in the live broadcast.
pub async fn drain_row_log(
    instance_id: InstanceId,
    mut output: OutputStream,
    logs: Arc<dyn ActivationLogRepository>,
    hub: Arc<BroadcastHub>,
) {
    let topic = instance_id.topic();
    let mut assembler = LineAssembler::new();
    let mut line_number: i32 = 0;

    while let Some(next) = output.next().await {
        match next {
            Ok(chunk) => {
                for line in assembler.push(&chunk) {
                    emit_line(instance_id, &topic, &line, &mut line_number, &logs, &hub).await;
                }
            }
            Err(err) => {
                warn!(%instance_id, "output stream error: {err}");
                break;
            }
        }
    }

    if let Some(tail) = assembler.finish() {
        emit_line(instance_id, &topic, &tail, &mut line_number, &logs, &hub).await;
    }
    debug!(%instance_id, lines = line_number, "row-log drain finished");
}

async fn emit_line(
    instance_id: InstanceId,
    topic: &str,
    line: &str,
    line_number: &mut i32,
    logs: &Arc<dyn ActivationLogRepository>,
    hub: &Arc<BroadcastHub>,
) {
    hub.publish(topic, OutputFrame::stdout(line));
    match logs.append_line(instance_id, *line_number, line).await {
        Ok(()) => *line_number += 1,
        Err(err) => warn!(%instance_id, line_number, "failed to persist output line: {err}"),
    }
}

/// Object-log policy, used for container-backed instances: append each raw
/// chunk to the growing byte object, and broadcast the chunk's decodable
/// text with leftover bytes carried across chunk boundaries.
pub async fn drain_object_log(
    instance_id: InstanceId,
    log_id: LogId,
    mut output: OutputStream,
    logs: Arc<dyn ActivationLogRepository>,
    hub: Arc<BroadcastHub>,
) {
    let topic = instance_id.topic();
    let mut leftover = Vec::new();

    while let Some(next) = output.next().await {
        match next {
            Ok(chunk) => {
                if let Err(err) = logs.append_chunk(log_id, &chunk).await {
                    warn!(%instance_id, %log_id, "failed to persist output chunk: {err}");
                }
                let text = decode_chunk(&mut leftover, &chunk);
                if !text.is_empty() {
                    hub.publish(&topic, OutputFrame::stdout(text));
                }
            }
            Err(err) => {
                warn!(%instance_id, "output stream error: {err}");
                break;
            }
        }
    }

    if !leftover.is_empty() {
        // Stream ended inside a multi-byte sequence; flush what we can.
        hub.publish(
            &topic,
            OutputFrame::stdout(String::from_utf8_lossy(&leftover).into_owned()),
        );
    }
    debug!(%instance_id, %log_id, "object-log drain finished");
}
