// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! One load, from URL to `complete` or `error`.
//!
//! The task's token is checked after download, after parse and before
//! assembly, and every outgoing message goes through [`Emitter`], which
//! sends under the registry lock and drops the message once the token is
//! signalled. A cancelled load therefore ends without a terminal message,
//! and nothing is queued after the host's cancel returns.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc::UnboundedSender;

use super::WorkerContext;
use crate::assembler::{self, AssemblyInput, ParsedModel};
use crate::config::CodecConfig;
use crate::container;
use crate::download::{resolve_uri, DownloadProgress};
use crate::error::LoadError;
use crate::protocol::{ProgressTracker, Response, Stage};
use crate::task::{TaskState, TaskTicket};

/// Step label recorded when the model came from the cache.
const CACHE_HIT_STEP: &str = "cache-hit";

/// Sends one task's messages, silenced by its cancellation token.
struct Emitter {
    context: Arc<WorkerContext>,
    ticket: TaskTicket,
    responses: UnboundedSender<Response>,
    tracker: ProgressTracker,
    steps: Vec<String>,
}

impl Emitter {
    fn new(context: Arc<WorkerContext>, ticket: TaskTicket, responses: UnboundedSender<Response>) -> Self {
        Self {
            context,
            tracker: ProgressTracker::new(ticket.id.clone()),
            ticket,
            responses,
            steps: Vec::new(),
        }
    }

    fn send(&self, response: Response) {
        let sent = self
            .context
            .tasks
            .while_live(&self.ticket, || self.responses.send(response));
        if let Some(Err(_)) = sent {
            tracing::debug!(task_id = %self.ticket.id, "Host stopped listening");
        }
    }

    fn stage(&mut self, stage: Stage, step: &str) {
        tracing::debug!(task_id = %self.ticket.id, stage = stage.as_str(), "{}", step);
        self.steps.push(step.to_string());
        if let Some(event) = self.tracker.stage(stage, step) {
            self.send(Response::progress(event));
        }
    }

    fn download(&mut self, progress: &DownloadProgress) {
        if let Some(event) = self.tracker.download(progress) {
            self.send(Response::progress(event));
        }
    }
}

/// Run one load to its end and release its registry entry.
pub(super) async fn run_load(
    context: Arc<WorkerContext>,
    ticket: TaskTicket,
    url: String,
    codecs: CodecConfig,
    responses: UnboundedSender<Response>,
) {
    let mut emitter = Emitter::new(context.clone(), ticket.clone(), responses);
    let result = load(&context, &ticket, &url, &codecs, &mut emitter).await;

    let final_state = match result {
        Ok(model) if context.tasks.transition(&ticket, TaskState::Completed) => {
            tracing::info!(
                task_id = %ticket.id,
                load_time_ms = model.metadata.load_time_ms,
                "Load completed"
            );
            emitter.stage(Stage::Completed, "Completed");
            emitter.send(Response::model(&ticket.id, model));
            TaskState::Completed
        }
        Ok(_) | Err(LoadError::Cancelled) => {
            tracing::debug!(task_id = %ticket.id, "Load cancelled");
            TaskState::Cancelled
        }
        Err(e) if ticket.is_cancelled() => {
            tracing::debug!(task_id = %ticket.id, "Load cancelled while failing: {}", e);
            TaskState::Cancelled
        }
        Err(e) => {
            tracing::warn!(task_id = %ticket.id, code = e.code(), "Load failed: {}", e);
            context.tasks.transition(&ticket, TaskState::Failed);
            emitter.send(Response::task_error(&ticket.id, &e));
            TaskState::Failed
        }
    };

    context.tasks.finish(&ticket, final_state);
}

/// Bail out if the task was cancelled.
fn checkpoint(ticket: &TaskTicket) -> Result<(), LoadError> {
    if ticket.is_cancelled() {
        Err(LoadError::Cancelled)
    } else {
        Ok(())
    }
}

/// Move the task to `state`. A refused transition on a cancelled task ends
/// the load.
fn enter(context: &WorkerContext, ticket: &TaskTicket, state: TaskState) -> Result<(), LoadError> {
    if !context.tasks.transition(ticket, state) {
        checkpoint(ticket)?;
    }
    Ok(())
}

async fn load(
    context: &WorkerContext,
    ticket: &TaskTicket,
    url: &str,
    codec_config: &CodecConfig,
    emitter: &mut Emitter,
) -> Result<ParsedModel, LoadError> {
    let started = Instant::now();
    emitter.stage(Stage::Starting, "Starting");
    let codecs = context.codecs.get_or_init(codec_config);

    let cache = context.active_cache();
    let (bytes, from_cache) = match cache.and_then(|c| c.get(url)) {
        Some(bytes) => {
            tracing::debug!(task_id = %ticket.id, url, bytes = bytes.len(), "Serving model from cache");
            emitter.stage(Stage::Downloading, CACHE_HIT_STEP);
            (bytes, true)
        }
        None => {
            enter(context, ticket, TaskState::Downloading)?;
            emitter.stage(Stage::Downloading, "Downloading model");
            let buffer = context
                .downloader
                .download(url, &ticket.token, |p| emitter.download(p))
                .await?;
            (Arc::new(buffer.into_bytes()), false)
        }
    };
    checkpoint(ticket)?;

    enter(context, ticket, TaskState::Parsing)?;
    emitter.stage(Stage::Parsing, "Parsing container");
    let parsed = container::parse(&bytes)?;
    tracing::debug!(
        task_id = %ticket.id,
        format = parsed.format.as_str(),
        buffers = parsed.document.buffers.len(),
        binary = ?parsed.binary.as_ref().map(Vec::len),
        "Container parsed"
    );
    checkpoint(ticket)?;

    if let (Some(cache), false) = (cache, from_cache) {
        cache.put(url, bytes.clone());
    }

    emitter.stage(Stage::Loading, "Loading buffers");
    let mut external_buffers = HashMap::new();
    for (index, uri) in assembler::external_buffer_uris(&parsed.document) {
        let resolved = resolve_uri(url, uri)?;
        tracing::debug!(task_id = %ticket.id, buffer = index, url = %resolved, "Fetching external buffer");
        let buffer = context
            .downloader
            .download(&resolved, &ticket.token, |_| {})
            .await?;
        external_buffers.insert(index, buffer.into_bytes());
    }

    let compressed = assembler::compression_kinds(&parsed.document);
    if compressed.is_empty() {
        emitter.stage(Stage::Processing, "Processing resources");
    } else {
        enter(context, ticket, TaskState::Decoding)?;
        emitter.stage(Stage::Processing, "Decoding compressed resources");
    }
    checkpoint(ticket)?;

    enter(context, ticket, TaskState::Assembling)?;
    emitter.stage(Stage::Finalizing, "Assembling scene");

    let input = AssemblyInput {
        document: parsed.document,
        binary: parsed.binary,
        external_buffers,
        url: url.to_string(),
        format: parsed.format,
        started,
        steps: emitter.steps.clone(),
    };
    assembler::assemble(input, &codecs)
}
