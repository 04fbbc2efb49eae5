use crate::error::{Result, VideoError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Runtime configuration, loaded from a TOML file.
///
/// Every section has defaults, so an empty file (or no file) is a valid
/// configuration. Secrets are read from the environment, never from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub visuals: VisualsConfig,
    pub assets: AssetsConfig,
    pub sources: SourcesConfig,
    pub ffmpeg: FfmpegConfig,
    pub sfx: SfxConfig,
    pub paths: PathsConfig,
    #[serde(skip)]
    pub secrets: Secrets,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VideoError::ConfigurationMissing(format!(
                "cannot read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config: Config = toml::from_str(&content)?;
        config.visuals.validate()?;
        config.secrets = Secrets::from_env();
        Ok(config)
    }

    /// Defaults plus secrets from the environment.
    pub fn from_env() -> Self {
        Config {
            secrets: Secrets::from_env(),
            ..Config::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualsConfig {
    /// Canonical output frame size, `WIDTHxHEIGHT`.
    pub resolution: String,
    pub fps: u32,
    /// Final scale reached by the still-image zoom.
    pub zoom_factor: f64,
    pub evidence_width: u32,
    pub evidence_height: u32,
    /// Slide-in and slide-out duration of the evidence overlay.
    pub evidence_animation_sec: f64,
    pub evidence_hold_sec_default: f64,
    /// Brightness factor applied to the background while evidence is shown.
    pub background_dim: f64,
    /// Used when a scene reports a non-positive narration duration.
    pub default_scene_sec: f64,
}

impl Default for VisualsConfig {
    fn default() -> Self {
        Self {
            resolution: "1920x1080".to_string(),
            fps: 30,
            zoom_factor: 1.08,
            evidence_width: 960,
            evidence_height: 640,
            evidence_animation_sec: 0.5,
            evidence_hold_sec_default: 4.0,
            background_dim: 0.6,
            default_scene_sec: 5.0,
        }
    }
}

impl VisualsConfig {
    /// Parses `resolution` into `(width, height)`.
    pub fn frame_size(&self) -> Result<(u32, u32)> {
        let invalid = || {
            VideoError::ConfigurationMissing(format!(
                "visuals.resolution must look like 1920x1080, got {:?}",
                self.resolution
            ))
        };
        let (w, h) = self.resolution.split_once('x').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 || width % 2 != 0 || height % 2 != 0 {
            return Err(invalid());
        }
        Ok((width, height))
    }

    pub fn validate(&self) -> Result<()> {
        self.frame_size()?;
        if self.fps == 0 {
            return Err(VideoError::ConfigurationMissing(
                "visuals.fps must be non-zero".to_string(),
            ));
        }
        if self.zoom_factor < 1.0 {
            return Err(VideoError::ConfigurationMissing(
                "visuals.zoom_factor must be at least 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.background_dim) {
            return Err(VideoError::ConfigurationMissing(
                "visuals.background_dim must be within 0.0..=1.0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetsConfig {
    /// Seeds the clip picker; unset means a fresh random seed per run.
    pub clip_seed: Option<u64>,
    /// Size of the best-scored pool a clip is drawn from.
    pub top_n: usize,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            clip_seed: None,
            top_n: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub generation_retries: u32,
    pub retry_backoff_sec: u64,
    pub generation_timeout_sec: u64,
    pub evidence_timeout_sec: u64,
    pub generation_min_bytes: usize,
    pub evidence_min_bytes: usize,
    pub max_download_bytes: usize,
    pub knowledge_base_enabled: bool,
    pub image_search_enabled: bool,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            generation_retries: 3,
            retry_backoff_sec: 3,
            generation_timeout_sec: 60,
            evidence_timeout_sec: 20,
            generation_min_bytes: 100,
            evidence_min_bytes: 1000,
            max_download_bytes: 10 * 1024 * 1024,
            knowledge_base_enabled: true,
            image_search_enabled: true,
        }
    }
}

impl SourcesConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_sec)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FfmpegConfig {
    pub binary: String,
    pub probe_binary: String,
    pub timeout_sec: u64,
    pub preset: String,
    pub crf: u32,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            probe_binary: "ffprobe".to_string(),
            timeout_sec: 900,
            preset: "fast".to_string(),
            crf: 23,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SfxConfig {
    pub enabled: bool,
    pub volume: f64,
    pub fade_in_sec: f64,
    pub fade_out_sec: f64,
    /// Mood name to sound-effect file name.
    pub mood_map: BTreeMap<String, String>,
}

impl Default for SfxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            volume: 0.3,
            fade_in_sec: 0.5,
            fade_out_sec: 0.5,
            mood_map: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub clips_dir: PathBuf,
    pub clip_tags: PathBuf,
    pub usage_ledger: PathBuf,
    pub sfx_dir: PathBuf,
    pub sfx_tags: PathBuf,
    pub output: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            clips_dir: PathBuf::from("assets/video"),
            clip_tags: PathBuf::from("assets/video/tags.json"),
            usage_ledger: PathBuf::from("logs/clip_usage.json"),
            sfx_dir: PathBuf::from("assets/sfx"),
            sfx_tags: PathBuf::from("assets/sfx/tags.json"),
            output: PathBuf::from("output"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    pub serpapi_key: Option<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self {
            serpapi_key: std::env::var("SERPAPI_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.visuals.fps, 30);
        assert_eq!(config.assets.top_n, 3);
        assert_eq!(config.sources.generation_retries, 3);
        assert_eq!(config.visuals.frame_size().unwrap(), (1920, 1080));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [visuals]
            fps = 25
            zoom_factor = 1.15

            [assets]
            clip_seed = 7

            [sfx.mood_map]
            tense = "heartbeat.mp3"
            "#,
        )
        .unwrap();
        assert_eq!(config.visuals.fps, 25);
        assert_eq!(config.visuals.zoom_factor, 1.15);
        assert_eq!(config.visuals.evidence_animation_sec, 0.5);
        assert_eq!(config.assets.clip_seed, Some(7));
        assert_eq!(config.sfx.mood_map["tense"], "heartbeat.mp3");
    }

    #[test]
    fn bad_resolution_is_rejected() {
        let visuals = VisualsConfig {
            resolution: "1920-1080".to_string(),
            ..VisualsConfig::default()
        };
        assert!(visuals.validate().is_err());
        let visuals = VisualsConfig {
            resolution: "1921x1080".to_string(),
            ..VisualsConfig::default()
        };
        assert!(visuals.frame_size().is_err());
    }

    #[test]
    fn example_config_matches_defaults() {
        let config: Config = toml::from_str(include_str!("../config.example.toml")).unwrap();
        let defaults = Config::default();
        assert_eq!(config.visuals.resolution, defaults.visuals.resolution);
        assert_eq!(config.sources.max_download_bytes, defaults.sources.max_download_bytes);
        assert_eq!(config.paths.usage_ledger, defaults.paths.usage_ledger);
        assert!(config.sfx.mood_map.is_empty());
    }

    #[test]
    fn missing_file_is_configuration_missing() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, VideoError::ConfigurationMissing(_)));
    }
}
