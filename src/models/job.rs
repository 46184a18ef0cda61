use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

/// Lifecycle position of a restyle job.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    #[default]
    Idle,
    Uploading,
    FirstStagePolling,
    AwaitingStyleSelection,
    SecondStagePolling,
    Complete,
    Failed,
}

impl Stage {
    /// Whether the stage belongs to the upload / room-emptying half of the pipeline.
    pub fn is_pipeline_wide(self) -> bool {
        matches!(self, Stage::Uploading | Stage::FirstStagePolling)
    }

    /// Whether the stage belongs to the style-application half of the pipeline.
    pub fn is_style_stage(self) -> bool {
        matches!(self, Stage::AwaitingStyleSelection | Stage::SecondStagePolling)
    }
}

/// Checks a stage change against the lifecycle graph.
///
/// `failed_at` is the stage recorded on the failure when leaving `Failed`; it
/// decides which retry edge is available.
pub fn is_valid_transition(from: Stage, to: Stage, failed_at: Option<Stage>) -> bool {
    use Stage::*;

    match (from, to) {
        (Idle, Uploading) => true,
        (Uploading, FirstStagePolling) | (Uploading, Failed) => true,
        (FirstStagePolling, AwaitingStyleSelection) | (FirstStagePolling, Failed) => true,
        (AwaitingStyleSelection, SecondStagePolling) | (AwaitingStyleSelection, Failed) => true,
        (SecondStagePolling, Complete) | (SecondStagePolling, Failed) => true,
        (Failed, Uploading) => failed_at.is_some_and(Stage::is_pipeline_wide),
        (Failed, SecondStagePolling) => failed_at.is_some_and(Stage::is_style_stage),
        _ => false,
    }
}

/// Failure taxonomy surfaced to callers through [`ErrorRecord`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NetworkError,
    RemoteError,
    TimeoutError,
    ValidationError,
}

impl ErrorKind {
    /// Validation failures repeat identically, everything else may succeed on retry.
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::ValidationError)
    }
}

/// Which caller action can recover from a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Re-upload and restart from the first stage.
    Pipeline,
    /// Re-trigger the second stage, keeping the first-stage artifact.
    StyleOnly,
}

/// Most recent failure of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub stage: Stage,
    pub retryable: bool,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, message: impl Into<String>, stage: Stage) -> Self {
        Self {
            kind,
            message: message.into(),
            stage,
            retryable: kind.is_retryable(),
        }
    }

    /// The recovery action this failure permits, if any.
    pub fn retry_action(&self) -> Option<RetryAction> {
        if !self.retryable {
            return None;
        }
        if self.stage.is_pipeline_wide() {
            Some(RetryAction::Pipeline)
        } else if self.stage.is_style_stage() {
            Some(RetryAction::StyleOnly)
        } else {
            None
        }
    }
}

/// Identifier of a design style applied in the second stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Validate)]
#[serde(transparent)]
pub struct StyleId(#[garde(length(min = 1, max = 64), custom(is_style_slug))] String);

fn is_style_slug(value: &str, _ctx: &()) -> garde::Result {
    if value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
    {
        Ok(())
    } else {
        Err(garde::Error::new(
            "style ids may only contain lowercase letters, digits, '-' and '_'",
        ))
    }
}

impl StyleId {
    pub fn parse(value: impl Into<String>) -> Result<Self, garde::Report> {
        let style = Self(value.into());
        style.validate()?;
        Ok(style)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StyleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Observable state of one remote restyle run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Assigned by the remote service at upload time.
    pub job_id: Option<String>,
    pub stage: Stage,
    /// Synthetic completion estimate of the current stage, for display only.
    pub progress: f32,
    /// Latest remote status text, for display only.
    pub status_message: Option<String>,
    pub original_url: Option<String>,
    /// Emptied-room artifact.
    pub first_stage_result_url: Option<String>,
    /// Styled artifact. Only set once the job is complete.
    pub second_stage_result_url: Option<String>,
    pub last_error: Option<ErrorRecord>,
    pub selected_style: Option<StyleId>,
}

impl Job {
    /// Complete and non-retryable failures accept no further actions.
    pub fn is_terminal(&self) -> bool {
        match self.stage {
            Stage::Complete => true,
            Stage::Failed => self
                .last_error
                .as_ref()
                .map_or(true, |e| e.retry_action().is_none()),
            _ => false,
        }
    }

    pub fn failed_at(&self) -> Option<Stage> {
        match self.stage {
            Stage::Failed => self.last_error.as_ref().map(|e| e.stage),
            _ => None,
        }
    }

    /// The retry action currently available to the caller.
    pub fn available_retry(&self) -> Option<RetryAction> {
        match self.stage {
            Stage::Failed => self.last_error.as_ref().and_then(ErrorRecord::retry_action),
            _ => None,
        }
    }

    pub fn can_enter(&self, to: Stage) -> bool {
        is_valid_transition(self.stage, to, self.failed_at())
    }
}
