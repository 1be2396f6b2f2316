// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming Downloader
//!
//! Fetches a model's raw bytes incrementally so the worker can report
//! byte-exact progress, and stops reading as soon as the owning task is
//! cancelled.
//!
//! ```rust,no_run
//! use glbpipe::download::Downloader;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let downloader = Downloader::new("glbpipe")?;
//! let token = CancellationToken::new();
//! let buffer = downloader
//!     .download("https://example.com/city.glb", &token, |p| {
//!         println!("{}", p.size_string());
//!     })
//!     .await?;
//! println!("{} bytes", buffer.loaded());
//! # Ok(())
//! # }
//! ```

pub mod fetcher;
pub mod types;

pub use fetcher::{resolve_uri, Downloader};
pub use types::{ByteBuffer, DownloadProgress};
