use crate::error::{Result, VideoError};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Declared visual strategy of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SceneType {
    /// Reuse a tagged clip from the library.
    #[serde(alias = "cinematic")]
    Clip,
    /// Generate a still from the scene's image prompt.
    #[serde(alias = "dramatic")]
    Generated,
    /// Show a real photograph with a source credit.
    #[serde(alias = "proof")]
    Evidence,
}

impl fmt::Display for SceneType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SceneType::Clip => "clip",
            SceneType::Generated => "generated",
            SceneType::Evidence => "evidence",
        })
    }
}

/// Emotional tag of a scene. Unknown values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Mood {
    Tense,
    Reveal,
    Eerie,
    Action,
    Sad,
    Hook,
    Other(String),
}

impl Mood {
    pub fn as_str(&self) -> &str {
        match self {
            Mood::Tense => "tense",
            Mood::Reveal => "reveal",
            Mood::Eerie => "eerie",
            Mood::Action => "action",
            Mood::Sad => "sad",
            Mood::Hook => "hook",
            Mood::Other(s) => s,
        }
    }
}

impl From<String> for Mood {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "tense" => Mood::Tense,
            "reveal" => Mood::Reveal,
            "eerie" => Mood::Eerie,
            "action" => Mood::Action,
            "sad" => Mood::Sad,
            "hook" => Mood::Hook,
            _ => Mood::Other(s),
        }
    }
}

impl From<Mood> for String {
    fn from(mood: Mood) -> Self {
        mood.as_str().to_string()
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One timed unit of the script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub index: usize,
    #[serde(default)]
    pub timestamp_start: f64,
    #[serde(default)]
    pub timestamp_end: f64,
    pub narration: String,
    pub scene_type: SceneType,
    pub mood: Mood,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub asset_tags: Vec<String>,
    #[serde(default, alias = "proof_image_url", deserialize_with = "empty_as_none")]
    pub evidence_image_url: Option<String>,
    /// Credited still used by the timeline overlay.
    #[serde(default, alias = "proof_image_local", deserialize_with = "empty_as_none")]
    pub evidence_image_local: Option<PathBuf>,
    #[serde(default, alias = "proof_duration_sec")]
    pub evidence_hold_sec: f64,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub audio_file: Option<PathBuf>,
    /// Measured narration length, set upstream.
    #[serde(default)]
    pub audio_duration_sec: f64,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub visual_file: Option<PathBuf>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub sfx_file: Option<PathBuf>,
}

impl Scene {
    pub fn new(index: usize, scene_type: SceneType, mood: Mood, duration: f64) -> Self {
        Self {
            index,
            timestamp_start: 0.0,
            timestamp_end: 0.0,
            narration: String::new(),
            scene_type,
            mood,
            image_prompt: String::new(),
            asset_tags: Vec::new(),
            evidence_image_url: None,
            evidence_image_local: None,
            evidence_hold_sec: 0.0,
            audio_file: None,
            audio_duration_sec: duration,
            visual_file: None,
            sfx_file: None,
        }
    }

    /// Narration length, or `default` when upstream reported none.
    pub fn duration(&self, default: f64) -> f64 {
        if self.audio_duration_sec > 0.0 {
            self.audio_duration_sec
        } else {
            default
        }
    }

    pub fn hold_duration(&self, default: f64) -> f64 {
        if self.evidence_hold_sec > 0.0 {
            self.evidence_hold_sec
        } else {
            default
        }
    }
}

fn empty_as_none<'de, D, T>(deserializer: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|s| !s.trim().is_empty()).map(T::from))
}

/// Ordered scene list for one video.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub story_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub total_sec: f64,
    pub scenes: Vec<Scene>,
}

impl Script {
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            VideoError::ConfigurationMissing(format!("script {}: {}", path.display(), e))
        })?;
        let mut script: Script = serde_json::from_slice(&data)?;
        script.scenes.sort_by_key(|s| s.index);
        Ok(script)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(path, data).await?;
        Ok(())
    }

    /// Fills scene start/end times cumulatively when the script carries none.
    pub fn fill_timestamps(&mut self, default_scene_sec: f64) {
        if self.scenes.iter().any(|s| s.timestamp_start > 0.0) {
            return;
        }
        let mut cursor = 0.0;
        for scene in &mut self.scenes {
            scene.timestamp_start = cursor;
            cursor += scene.duration(default_scene_sec);
            scene.timestamp_end = cursor;
        }
        self.total_sec = cursor;
    }
}

static YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\D)(\d{4})(?:\D|$)").expect("static regex"));

/// Researched story the script was written from. Read-only here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub body: String,
    pub source: String,
    pub source_url: String,
    pub published_at: String,
    pub image_urls: Vec<String>,
    pub keywords: Vec<String>,
}

impl Story {
    pub async fn load(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await.map_err(|e| {
            VideoError::ConfigurationMissing(format!("story {}: {}", path.display(), e))
        })?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn publication_year(&self) -> Option<&str> {
        YEAR.captures(&self.published_at)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }

    /// Credit caption burned onto evidence stills.
    pub fn credit(&self) -> String {
        let mut credit = format!("Source: {}", self.source);
        if let Some(year) = self.publication_year() {
            credit.push_str(", ");
            credit.push_str(year);
        }
        credit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_scene_types_and_empty_strings() {
        let scene: Scene = serde_json::from_str(
            r#"{
                "index": 2,
                "narration": "The car was found abandoned.",
                "scene_type": "proof",
                "mood": "Eerie",
                "proof_image_url": "",
                "proof_duration_sec": 3.5,
                "audio_duration_sec": 6.2,
                "visual_file": ""
            }"#,
        )
        .unwrap();
        assert_eq!(scene.scene_type, SceneType::Evidence);
        assert_eq!(scene.mood, Mood::Eerie);
        assert!(scene.evidence_image_url.is_none());
        assert!(scene.visual_file.is_none());
        assert_eq!(scene.hold_duration(4.0), 3.5);
    }

    #[test]
    fn unknown_mood_is_preserved() {
        let mood = Mood::from("wistful".to_string());
        assert_eq!(mood, Mood::Other("wistful".to_string()));
        assert_eq!(mood.as_str(), "wistful");
    }

    #[test]
    fn duration_falls_back_when_unmeasured() {
        let scene = Scene::new(0, SceneType::Clip, Mood::Tense, 0.0);
        assert_eq!(scene.duration(5.0), 5.0);
        let scene = Scene::new(0, SceneType::Clip, Mood::Tense, 7.25);
        assert_eq!(scene.duration(5.0), 7.25);
    }

    #[test]
    fn timestamps_are_cumulative() {
        let mut script = Script {
            scenes: vec![
                Scene::new(0, SceneType::Clip, Mood::Hook, 2.0),
                Scene::new(1, SceneType::Generated, Mood::Sad, 0.0),
                Scene::new(2, SceneType::Evidence, Mood::Reveal, 3.5),
            ],
            ..Script::default()
        };
        script.fill_timestamps(5.0);
        let starts: Vec<f64> = script.scenes.iter().map(|s| s.timestamp_start).collect();
        assert_eq!(starts, vec![0.0, 2.0, 7.0]);
        assert_eq!(script.total_sec, 10.5);
    }

    #[test]
    fn existing_timestamps_are_kept() {
        let mut script = Script {
            scenes: vec![
                Scene::new(0, SceneType::Clip, Mood::Hook, 2.0),
                Scene::new(1, SceneType::Clip, Mood::Hook, 2.0),
            ],
            ..Script::default()
        };
        script.scenes[1].timestamp_start = 2.4;
        script.fill_timestamps(5.0);
        assert_eq!(script.scenes[1].timestamp_start, 2.4);
    }

    #[test]
    fn credit_includes_year_when_present() {
        let story = Story {
            source: "Daily Ledger".to_string(),
            published_at: "2019-03-04T10:00:00Z".to_string(),
            ..Story::default()
        };
        assert_eq!(story.credit(), "Source: Daily Ledger, 2019");

        let story = Story {
            source: "Reddit".to_string(),
            published_at: "last week".to_string(),
            ..Story::default()
        };
        assert_eq!(story.credit(), "Source: Reddit");
    }
}
