// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! glbpipe - asynchronous binary 3D-model loading worker
//!
//! Turns a URL into a parsed, decoded scene fragment off the caller's
//! thread. A load flows through the pipeline as:
//!
//! **Download** -> **Parse container** -> **Decode (codecs)** -> **Assemble** -> `complete`
//!
//! and any stage can stop early through the task's cancellation token.
//!
//! # Core Modules
//!
//! - [`download`] - Streaming downloader with byte-exact progress
//! - [`container`] - GLB/glTF container parser and writer
//! - [`codec`] - Pluggable decompression codecs and their registry
//! - [`assembler`] - Resolves a document into a renderer-ready model
//! - [`task`] - Task registry, lifecycle states and cancellation
//! - [`protocol`] - Host/worker request and response messages
//! - [`worker`] - The worker thread that drives everything above
//! - [`cache`] - Optional raw-model cache
//! - [`config`] - Codec and worker configuration

pub mod assembler;
pub mod cache;
pub mod codec;
pub mod config;
pub mod container;
pub mod download;
pub mod error;
pub mod protocol;
pub mod sync;
pub mod task;
pub mod worker;

// Re-export the types most hosts need
pub use assembler::{ModelMetadata, ParsedModel, SceneFragment};
pub use cache::{MemoryModelCache, ModelCache};
pub use codec::{Codec, CodecFactory, CodecKind, CodecRegistry, CodecSet};
pub use config::{CodecConfig, CodecOptions, WorkerConfig};
pub use container::{parse, write_glb, ContainerDocument, ContainerFormat, ParsedContainer, WriteError};
pub use download::{ByteBuffer, DownloadProgress, Downloader};
pub use error::{LoadError, ParseError, ParseReason};
pub use protocol::{ProgressEvent, Request, Response, ResponseKind, Stage};
pub use task::{TaskRegistry, TaskState};
pub use worker::{Worker, WorkerContext, WorkerHandle};
