// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Loader worker
//!
//! The worker owns its own OS thread running a single-threaded tokio
//! runtime. The host talks to it only through [`Request`]s and
//! [`Response`]s, so loads never block the caller's thread.
//!
//! Every `load` runs as its own task on that runtime. A task that panics is
//! reported twice: as a global `error` response (no id) carrying the panic
//! message as `stack`, and, unless the host cancelled it, as an
//! `internal-error` for its own id so the host does not wait forever. Its
//! registry entry is released either way.
//!
//! A `load` whose id is still active is refused with an id-less
//! `duplicate-task` error; the running task is left alone.
//!
//! # Example
//!
//! ```no_run
//! use glbpipe::config::WorkerConfig;
//! use glbpipe::protocol::{Request, ResponseKind};
//! use glbpipe::worker::Worker;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let (handle, mut responses) = Worker::new(WorkerConfig::default()).spawn()?;
//! handle.send(Request::load("t1", "https://example.com/city.glb", None))?;
//! while let Some(response) = responses.recv().await {
//!     if response.kind != ResponseKind::Progress {
//!         break;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod pipeline;

use std::any::Any;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::cache::ModelCache;
use crate::codec::{BuiltinCodecFactory, CodecFactory, CodecRegistry};
use crate::config::{CodecConfig, WorkerConfig};
use crate::download::Downloader;
use crate::error::LoadError;
use crate::protocol::{LoadRequest, Request, Response};
use crate::sync::{resilient_read, resilient_write};
use crate::task::{Registration, TaskRegistry, TaskState};

/// Message reported for panicked tasks.
const UNCAUGHT_MESSAGE: &str = "Uncaught error in loader worker";

/// State shared by every task of one worker.
pub struct WorkerContext {
    pub codecs: CodecRegistry,
    pub tasks: TaskRegistry,
    pub downloader: Downloader,
    pub cache: Option<Arc<dyn ModelCache>>,
    pub config: WorkerConfig,
    default_codecs: RwLock<CodecConfig>,
}

impl WorkerContext {
    pub fn new(
        config: WorkerConfig,
        factory: Arc<dyn CodecFactory>,
        cache: Option<Arc<dyn ModelCache>>,
    ) -> Result<Self> {
        let downloader = Downloader::new(&config.user_agent).context("Failed to build HTTP client")?;
        Ok(Self {
            codecs: CodecRegistry::new(factory),
            tasks: TaskRegistry::new(),
            downloader,
            cache,
            default_codecs: RwLock::new(config.codecs.clone()),
            config,
        })
    }

    /// Codec config for loads that do not carry their own.
    pub fn default_codecs(&self) -> CodecConfig {
        resilient_read(&self.default_codecs).clone()
    }

    fn set_default_codecs(&self, config: CodecConfig) {
        *resilient_write(&self.default_codecs) = config;
    }

    /// The cache, when one is installed and enabled.
    fn active_cache(&self) -> Option<&Arc<dyn ModelCache>> {
        self.cache.as_ref().filter(|_| self.config.cache_enabled)
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("codecs", &self.codecs)
            .field("tasks", &self.tasks.len())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

/// Builder for a worker thread.
pub struct Worker {
    config: WorkerConfig,
    factory: Arc<dyn CodecFactory>,
    cache: Option<Arc<dyn ModelCache>>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            factory: Arc::new(BuiltinCodecFactory),
            cache: None,
        }
    }

    /// Use `factory` instead of the built-in decoders.
    pub fn with_codec_factory(mut self, factory: Arc<dyn CodecFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ModelCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Start the worker thread. Returns the handle and the response stream.
    pub fn spawn(self) -> Result<(WorkerHandle, UnboundedReceiver<Response>)> {
        let context = Arc::new(WorkerContext::new(self.config, self.factory, self.cache)?);
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();

        let thread_context = context.clone();
        let thread = std::thread::Builder::new()
            .name("glbpipe-worker".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!("Failed to start worker runtime: {}", e);
                        let _ = response_tx.send(Response::global_error(
                            format!("failed to start worker runtime: {}", e),
                            None,
                        ));
                        return;
                    }
                };
                runtime.block_on(run(thread_context, request_rx, response_tx));
            })
            .context("Failed to spawn worker thread")?;

        Ok((
            WorkerHandle {
                requests: Some(request_tx),
                context,
                thread: Some(thread),
            },
            response_rx,
        ))
    }
}

/// Host side of a running worker. Dropping it stops the worker.
pub struct WorkerHandle {
    requests: Option<UnboundedSender<Request>>,
    context: Arc<WorkerContext>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn send(&self, request: Request) -> Result<()> {
        self.requests
            .as_ref()
            .context("Worker is shut down")?
            .send(request)
            .map_err(|_| anyhow::anyhow!("Worker thread has exited"))
    }

    /// Cancel a task from the host thread. Takes effect immediately: once
    /// this returns, the task emits nothing further.
    pub fn cancel(&self, id: &str) -> bool {
        self.context.tasks.cancel(id)
    }

    pub fn context(&self) -> &Arc<WorkerContext> {
        &self.context
    }

    /// Stop the worker and wait for its thread. Active tasks are cancelled.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.requests.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("Worker thread panicked");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("context", &self.context)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

async fn run(
    context: Arc<WorkerContext>,
    mut requests: UnboundedReceiver<Request>,
    responses: UnboundedSender<Response>,
) {
    tracing::debug!("Worker started");

    while let Some(request) = requests.recv().await {
        match request {
            Request::Init { data } => {
                let set = context.codecs.get_or_init(&data);
                let available: Vec<&str> = set.available().iter().map(|k| k.as_str()).collect();
                tracing::info!(codecs = ?available, "Worker initialized");
                context.set_default_codecs(data);
                let _ = responses.send(Response::ack(format!(
                    "initialized; codecs available: {}",
                    if available.is_empty() { "none".to_string() } else { available.join(", ") }
                )));
            }
            Request::Load { id, data } => spawn_load(&context, id, data, &responses),
            Request::Cancel { id } => {
                context.tasks.cancel(&id);
            }
            Request::Dispose => {
                let cancelled = context.tasks.cancel_all();
                context.codecs.clear();
                tracing::info!(cancelled, "Worker disposed");
                let _ = responses.send(Response::ack("disposed"));
            }
        }
    }

    let cancelled = context.tasks.cancel_all();
    tracing::debug!(cancelled, "Worker stopped");
}

fn spawn_load(
    context: &Arc<WorkerContext>,
    id: String,
    request: LoadRequest,
    responses: &UnboundedSender<Response>,
) {
    let codecs = request.config.unwrap_or_else(|| context.default_codecs());
    let ticket = match context.tasks.register(&id, &request.url, codecs.clone()) {
        Registration::New(ticket) => ticket,
        Registration::AlreadyActive => {
            tracing::warn!(task_id = %id, "Load refused: id already active");
            let _ = responses.send(Response::duplicate_task(&id));
            return;
        }
    };
    tracing::info!(task_id = %id, url = %request.url, "Load started");

    let load = tokio::spawn(pipeline::run_load(
        context.clone(),
        ticket.clone(),
        request.url,
        codecs,
        responses.clone(),
    ));

    let context = context.clone();
    let responses = responses.clone();
    tokio::spawn(async move {
        if let Err(e) = load.await {
            if e.is_panic() {
                let stack = panic_message(e.into_panic());
                tracing::error!(task_id = %ticket.id, "Load task panicked: {}", stack);
                let _ = responses.send(Response::global_error(UNCAUGHT_MESSAGE, Some(stack.clone())));
                let err = LoadError::Internal(stack);
                context
                    .tasks
                    .while_live(&ticket, || responses.send(Response::task_error(&ticket.id, &err)));
            }
            context.tasks.finish(&ticket, TaskState::Failed);
        }
    });
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_extraction() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "panic with non-string payload");
    }

    #[test]
    fn test_context_default_codecs_follow_init() {
        let context = WorkerContext::new(WorkerConfig::default(), Arc::new(BuiltinCodecFactory), None).unwrap();
        assert!(context.default_codecs().geometry_codec.enabled);
        let disabled = CodecConfig::default().without(crate::codec::CodecKind::Geometry);
        context.set_default_codecs(disabled.clone());
        assert_eq!(context.default_codecs(), disabled);
        assert!(context.active_cache().is_none());
    }
}
