use std::fmt;
use thiserror::Error;

/// Pipeline stage an error is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Config,
    Resolve,
    Transform,
    Sfx,
    Concat,
    Overlay,
    AudioMix,
    Mux,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Config => "config",
            Stage::Resolve => "resolve",
            Stage::Transform => "transform",
            Stage::Sfx => "sfx",
            Stage::Concat => "concat",
            Stage::Overlay => "overlay",
            Stage::AudioMix => "audio-mix",
            Stage::Mux => "mux",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum VideoError {
    #[error("{source_name} exhausted: {reason}")]
    SourceExhausted {
        source_name: &'static str,
        reason: String,
    },

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("{stage} failed{}: {detail}", .scene.map(|i| format!(" for scene {i}")).unwrap_or_default())]
    TransformFailure {
        stage: Stage,
        scene: Option<usize>,
        detail: String,
    },

    #[error("no scene has a visual file; resolution contract violated upstream")]
    NoVisuals,

    #[error("run cancelled")]
    Cancelled,

    #[error("{stage} timed out after {secs}s")]
    Timeout { stage: Stage, secs: u64 },

    #[error("API error: {0}")]
    ApiError(String),

    #[error("stage {stage}: {source}")]
    AtStage {
        stage: Stage,
        #[source]
        source: Box<VideoError>,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("image error: {0}")]
    ImageError(#[from] image::ImageError),
}

impl VideoError {
    pub fn exhausted(source_name: &'static str, reason: impl Into<String>) -> Self {
        VideoError::SourceExhausted {
            source_name,
            reason: reason.into(),
        }
    }

    pub fn transform(stage: Stage, scene: Option<usize>, detail: impl Into<String>) -> Self {
        VideoError::TransformFailure {
            stage,
            scene,
            detail: detail.into(),
        }
    }

    /// Attributes a fatal error to `stage`, unless it already carries one.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            e @ VideoError::AtStage { .. } => e,
            other => VideoError::AtStage {
                stage,
                source: Box::new(other),
            },
        }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            VideoError::AtStage { stage, .. }
            | VideoError::TransformFailure { stage, .. }
            | VideoError::Timeout { stage, .. } => Some(*stage),
            VideoError::ConfigurationMissing(_) => Some(Stage::Config),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            VideoError::Cancelled => true,
            VideoError::AtStage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, VideoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_attribution_is_kept_once() {
        let err = VideoError::NoVisuals.at(Stage::Concat).at(Stage::Mux);
        assert_eq!(err.stage(), Some(Stage::Concat));
        assert!(err.to_string().starts_with("stage concat:"));
    }

    #[test]
    fn transform_failure_names_scene() {
        let err = VideoError::transform(Stage::Transform, Some(4), "ffmpeg exited 1");
        assert_eq!(err.to_string(), "transform failed for scene 4: ffmpeg exited 1");
        let err = VideoError::transform(Stage::Mux, None, "boom");
        assert_eq!(err.to_string(), "mux failed: boom");
    }

    #[test]
    fn cancellation_survives_wrapping() {
        assert!(VideoError::Cancelled.at(Stage::Overlay).is_cancelled());
        assert!(!VideoError::NoVisuals.is_cancelled());
    }
}
