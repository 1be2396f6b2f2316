// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error taxonomy for the loading pipeline.
//!
//! Pipeline-stage failures (network, container parsing, assembly) are fatal
//! for the task that hit them and travel to the host as an `error` response
//! tagged with the task id. Codec initialization failures are not part of
//! [`LoadError`]: the registry absorbs them and leaves the slot empty, see
//! [`crate::codec::CodecInitError`].

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::codec::CodecKind;

/// Why a container was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParseReason {
    /// First four bytes are not the `glTF` tag.
    BadMagic,
    /// Header version other than 2.
    UnsupportedVersion,
    /// Header is valid but no chunk follows it.
    MissingJsonChunk,
    /// First chunk is not tagged `JSON`.
    WrongFirstChunkType,
    /// A header or chunk header is truncated or internally inconsistent.
    MalformedLength,
    /// A declared length runs past the end of the available bytes.
    LengthExceedsBuffer,
    /// A chunk after the first has a tag other than `BIN`.
    UnexpectedChunkType,
    /// The JSON chunk or text document is not valid UTF-8.
    InvalidUtf8,
    /// The JSON chunk or text document does not parse as a glTF document.
    InvalidJson,
}

impl ParseReason {
    /// Stable kebab-case code, also used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BadMagic => "bad-magic",
            Self::UnsupportedVersion => "unsupported-version",
            Self::MissingJsonChunk => "missing-json-chunk",
            Self::WrongFirstChunkType => "wrong-first-chunk-type",
            Self::MalformedLength => "malformed-length",
            Self::LengthExceedsBuffer => "length-exceeds-buffer",
            Self::UnexpectedChunkType => "unexpected-chunk-type",
            Self::InvalidUtf8 => "invalid-utf8",
            Self::InvalidJson => "invalid-json",
        }
    }
}

impl fmt::Display for ParseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal, non-retryable container error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}: {detail}")]
pub struct ParseError {
    pub reason: ParseReason,
    pub detail: String,
}

impl ParseError {
    pub fn new(reason: ParseReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Errors that terminate a single load task.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Connection failure, non-success status or a broken body stream.
    #[error("network error fetching {url}: {message}")]
    Network {
        url: String,
        status: Option<u16>,
        message: String,
    },

    #[error("parse error ({})", .0)]
    Parse(#[from] ParseError),

    /// The document marks a resource as compressed but the codec slot is empty.
    #[error("{kind} codec is not available but {resource} requires it")]
    MissingCodec { kind: CodecKind, resource: String },

    /// A codec was present but rejected the payload.
    #[error("{kind} codec failed to decode {resource}: {message}")]
    Decode {
        kind: CodecKind,
        resource: String,
        message: String,
    },

    /// The document references data that does not exist or is out of range.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// The task's cancellation token was signalled.
    #[error("load cancelled")]
    Cancelled,

    /// The task panicked; carries the panic message.
    #[error("load task panicked: {0}")]
    Internal(String),
}

impl LoadError {
    pub(crate) fn network(url: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Network {
            url: url.to_string(),
            status,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidModel(message.into())
    }

    /// Short machine-readable code reported next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Network { .. } => "network-error",
            Self::Parse(e) => e.reason.as_str(),
            Self::MissingCodec { .. } => "missing-codec",
            Self::Decode { .. } => "decode-error",
            Self::InvalidModel(_) => "invalid-model",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal-error",
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
