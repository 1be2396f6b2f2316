// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Message Protocol
//!
//! Typed requests from the host and responses from the worker. On the wire
//! both are JSON objects tagged by `type`:
//!
//! ```text
//! Request:  { type: init|load|cancel|dispose, id?, data? }
//! Response: { type: progress|complete|error, id?, data: { progress?, loaded?,
//!             total?, stage?, step?, scene?, animations?, metadata?,
//!             message?, error?, stack? } }
//! ```
//!
//! Progress for one task is produced by a [`ProgressTracker`], which keeps
//! the percent non-decreasing and emits 100 only once, on completion.

use serde::{Deserialize, Serialize};

use crate::assembler::{AnimationClip, ModelMetadata, ParsedModel, SceneFragment};
use crate::config::CodecConfig;
use crate::download::DownloadProgress;
use crate::error::LoadError;

/// Stage labels carried by progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Starting,
    Downloading,
    Parsing,
    Loading,
    Processing,
    Finalizing,
    Completed,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Downloading => "downloading",
            Self::Parsing => "parsing",
            Self::Loading => "loading",
            Self::Processing => "processing",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
        }
    }

    /// Percent reported when the stage begins.
    fn base_percent(&self) -> f64 {
        match self {
            Self::Starting => 0.0,
            Self::Downloading => DOWNLOAD_START,
            Self::Parsing => 65.0,
            Self::Loading => 75.0,
            Self::Processing => 85.0,
            Self::Finalizing => 95.0,
            Self::Completed => 100.0,
        }
    }
}

/// The download occupies 5..60 of the overall percent.
const DOWNLOAD_START: f64 = 5.0;
const DOWNLOAD_SPAN: f64 = 55.0;
/// Highest percent before the completion event.
const PRE_COMPLETE_CAP: f64 = 99.0;

/// One progress report for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub task_id: String,
    pub stage: Stage,
    pub percent: f64,
    pub loaded: Option<u64>,
    pub total: Option<u64>,
    pub step: Option<String>,
}

/// Produces the progress sequence of one task.
#[derive(Debug)]
pub struct ProgressTracker {
    task_id: String,
    last: f64,
    completed: bool,
}

impl ProgressTracker {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            last: 0.0,
            completed: false,
        }
    }

    pub fn percent(&self) -> f64 {
        self.last
    }

    fn advance(&mut self, target: f64) -> f64 {
        let capped = target.clamp(0.0, PRE_COMPLETE_CAP);
        if capped > self.last {
            self.last = capped;
        }
        self.last
    }

    /// Event marking the start of `stage`. Returns `None` once the task has
    /// already reported completion.
    pub fn stage(&mut self, stage: Stage, step: &str) -> Option<ProgressEvent> {
        if self.completed {
            return None;
        }
        let percent = if stage == Stage::Completed {
            self.completed = true;
            self.last = 100.0;
            100.0
        } else {
            self.advance(stage.base_percent())
        };
        Some(ProgressEvent {
            task_id: self.task_id.clone(),
            stage,
            percent,
            loaded: None,
            total: None,
            step: Some(step.to_string()),
        })
    }

    /// Event for a received download segment. Without a known total the
    /// percent holds and only byte counts move.
    pub fn download(&mut self, progress: &DownloadProgress) -> Option<ProgressEvent> {
        if self.completed {
            return None;
        }
        let percent = match progress.fraction() {
            Some(fraction) => self.advance(DOWNLOAD_START + fraction * DOWNLOAD_SPAN),
            None => self.last,
        };
        Some(ProgressEvent {
            task_id: self.task_id.clone(),
            stage: Stage::Downloading,
            percent,
            loaded: Some(progress.loaded),
            total: progress.total,
            step: None,
        })
    }
}

/// Body of a `load` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadRequest {
    pub url: String,
    /// Per-load codec settings; the worker's `init` config when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<CodecConfig>,
}

/// Host to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Request {
    /// Warm up the codec registry.
    Init {
        #[serde(default)]
        data: CodecConfig,
    },
    Load {
        id: String,
        data: LoadRequest,
    },
    /// Cancel a task. Never answered.
    Cancel {
        id: String,
    },
    /// Cancel everything and release codecs.
    Dispose,
}

impl Request {
    pub fn load(id: impl Into<String>, url: impl Into<String>, config: Option<CodecConfig>) -> Self {
        Self::Load {
            id: id.into(),
            data: LoadRequest {
                url: url.into(),
                config,
            },
        }
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Progress,
    Complete,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResponseData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene: Option<SceneFragment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub animations: Option<Vec<AnimationClip>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ModelMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Machine-readable error code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

/// Worker to host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: ResponseKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub data: ResponseData,
}

impl Response {
    pub fn progress(event: ProgressEvent) -> Self {
        Self {
            kind: ResponseKind::Progress,
            id: Some(event.task_id),
            data: ResponseData {
                progress: Some(event.percent),
                loaded: event.loaded,
                total: event.total,
                stage: Some(event.stage),
                step: event.step,
                ..Default::default()
            },
        }
    }

    /// Completion of a load, carrying the model.
    pub fn model(id: &str, model: ParsedModel) -> Self {
        Self {
            kind: ResponseKind::Complete,
            id: Some(id.to_string()),
            data: ResponseData {
                scene: Some(model.scene),
                animations: Some(model.animations),
                metadata: Some(model.metadata),
                ..Default::default()
            },
        }
    }

    /// Completion of a request that carries no payload (`init`, `dispose`).
    pub fn ack(message: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Complete,
            id: None,
            data: ResponseData {
                message: Some(message.into()),
                ..Default::default()
            },
        }
    }

    /// A task failed.
    pub fn task_error(id: &str, err: &LoadError) -> Self {
        Self {
            kind: ResponseKind::Error,
            id: Some(id.to_string()),
            data: ResponseData {
                message: Some(err.to_string()),
                error: Some(err.code().to_string()),
                ..Default::default()
            },
        }
    }

    /// A `load` reused the id of a task that is still running. Carries no
    /// id so it cannot be mistaken for the running task's outcome.
    pub fn duplicate_task(id: &str) -> Self {
        Self {
            kind: ResponseKind::Error,
            id: None,
            data: ResponseData {
                message: Some(format!("task {} is already active", id)),
                error: Some("duplicate-task".to_string()),
                ..Default::default()
            },
        }
    }

    /// A failure not tied to any task.
    pub fn global_error(message: impl Into<String>, stack: Option<String>) -> Self {
        Self {
            kind: ResponseKind::Error,
            id: None,
            data: ResponseData {
                message: Some(message.into()),
                error: Some("internal-error".to_string()),
                stack,
                ..Default::default()
            },
        }
    }

    /// `complete` and `error` end a task; `progress` does not.
    pub fn is_terminal(&self) -> bool {
        self.kind != ResponseKind::Progress
    }

    /// Rebuild the model from a load completion.
    pub fn into_model(self) -> Option<ParsedModel> {
        let ResponseData {
            scene,
            animations,
            metadata,
            ..
        } = self.data;
        Some(ParsedModel {
            scene: scene?,
            animations: animations.unwrap_or_default(),
            metadata: metadata?,
        })
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
