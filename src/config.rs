// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker and codec configuration.
//!
//! Codec options are resolved to concrete values at deserialization time: an
//! omitted codec key means "enabled, default resource path", and only an
//! explicit `"enabled": false` turns a slot off.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::codec::CodecKind;

/// Resource path used when a codec entry does not name one.
pub const DEFAULT_CODEC_PATH: &str = "builtin:lz4";

/// Default `User-Agent` sent by the downloader.
pub const DEFAULT_USER_AGENT: &str = concat!("glbpipe/", env!("CARGO_PKG_VERSION"));

fn default_enabled() -> bool {
    true
}

fn default_resource_path() -> String {
    DEFAULT_CODEC_PATH.to_string()
}

/// Settings for one codec slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodecOptions {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_resource_path")]
    pub resource_path: String,
}

impl CodecOptions {
    pub fn enabled_at(resource_path: impl Into<String>) -> Self {
        Self {
            enabled: true,
            resource_path: resource_path.into(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            resource_path: default_resource_path(),
        }
    }
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self::enabled_at(DEFAULT_CODEC_PATH)
    }
}

/// Per-kind codec settings carried by `init` and `load` requests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CodecConfig {
    pub geometry_codec: CodecOptions,
    pub texture_codec: CodecOptions,
    pub mesh_opt_codec: CodecOptions,
}

impl CodecConfig {
    pub fn options(&self, kind: CodecKind) -> &CodecOptions {
        match kind {
            CodecKind::Geometry => &self.geometry_codec,
            CodecKind::Texture => &self.texture_codec,
            CodecKind::MeshOpt => &self.mesh_opt_codec,
        }
    }

    pub fn options_mut(&mut self, kind: CodecKind) -> &mut CodecOptions {
        match kind {
            CodecKind::Geometry => &mut self.geometry_codec,
            CodecKind::Texture => &mut self.texture_codec,
            CodecKind::MeshOpt => &mut self.mesh_opt_codec,
        }
    }

    /// Builder-style helper that turns one slot off.
    pub fn without(mut self, kind: CodecKind) -> Self {
        self.options_mut(kind).enabled = false;
        self
    }
}

/// Top-level configuration for a worker and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkerConfig {
    /// Codec defaults used by `init` and by loads that omit a config.
    pub codecs: CodecConfig,
    pub user_agent: String,
    /// Consult the model cache (if one is installed) before downloading.
    pub cache_enabled: bool,
    /// `error`, `warn`, `info`, `debug` or `trace`.
    pub log_level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            codecs: CodecConfig::default(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            cache_enabled: true,
            log_level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Default config file location (`~/.glbpipe/config.json`).
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .map(|h| h.join(".glbpipe").join("config.json"))
            .unwrap_or_else(|| PathBuf::from(".glbpipe/config.json"))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// A missing file yields the defaults; a malformed file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path.map(Path::to_path_buf).unwrap_or_else(Self::default_path);
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }
}
