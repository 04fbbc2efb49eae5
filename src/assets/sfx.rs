use super::clip_library::{load_tags, ClipEntry};
use crate::config::SfxConfig;
use crate::error::{Result, Stage};
use crate::scene::{Mood, Scene};
use crate::video::ffmpeg::{FfmpegJob, MediaEngine};
use crate::video::filters::{loop_count, sfx_filter};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Assigns a mood-matched sound effect to each scene.
pub struct SfxMatcher {
    config: SfxConfig,
    sfx_dir: PathBuf,
    tagged: Vec<ClipEntry>,
    engine: Arc<dyn MediaEngine>,
    default_scene_sec: f64,
}

impl SfxMatcher {
    pub fn new(
        config: &SfxConfig,
        sfx_dir: impl Into<PathBuf>,
        tags_file: &Path,
        engine: Arc<dyn MediaEngine>,
        default_scene_sec: f64,
    ) -> Self {
        let tagged = load_tags(tags_file).unwrap_or_else(|e| {
            warn!("Unreadable sound effect tags {}: {}", tags_file.display(), e);
            Vec::new()
        });
        Self {
            config: config.clone(),
            sfx_dir: sfx_dir.into(),
            tagged,
            engine,
            default_scene_sec,
        }
    }

    /// Config map, then tags, then the `eerie` mapping, then anything tagged.
    pub fn pick(&self, mood: &Mood) -> Option<&str> {
        if let Some(file) = self.config.mood_map.get(mood.as_str()) {
            return Some(file.as_str());
        }
        let wanted = mood.as_str().to_lowercase();
        if let Some(entry) = self.tagged.iter().find(|e| e.tags.contains(&wanted)) {
            return Some(entry.filename.as_str());
        }
        if let Some(file) = self.config.mood_map.get("eerie") {
            return Some(file.as_str());
        }
        self.tagged.first().map(|e| e.filename.as_str())
    }

    pub fn prepare_job(&self, source: &Path, source_sec: f64, target_sec: f64, out: &Path, index: usize) -> FfmpegJob {
        let mut job = FfmpegJob::new(Stage::Sfx, out).scene(index);
        if source_sec < target_sec {
            job = job.args(["-stream_loop".to_string(), loop_count(target_sec, source_sec).to_string()]);
        }
        job.input(source)
            .args(["-t".to_string(), format!("{:.3}", target_sec)])
            .args([
                "-af".to_string(),
                sfx_filter(self.config.volume, self.config.fade_in_sec, self.config.fade_out_sec, target_sec),
            ])
    }

    /// Fills `sfx_file` on scenes that have none. Every failure is per-scene.
    pub async fn run(&self, scenes: &mut [Scene], out_dir: &Path, cancel: &CancellationToken) -> Result<()> {
        let sfx_out = out_dir.join("sfx");
        tokio::fs::create_dir_all(&sfx_out).await?;

        for scene in scenes.iter_mut() {
            if scene.sfx_file.is_some() {
                continue;
            }
            let Some(file) = self.pick(&scene.mood) else {
                debug!(scene = scene.index, "No sound effect for mood {}", scene.mood);
                continue;
            };
            let source = self.sfx_dir.join(file);
            if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
                warn!(scene = scene.index, "Sound effect not found: {}", source.display());
                continue;
            }

            let target = scene.duration(self.default_scene_sec);
            let source_sec = match self.engine.probe_duration(&source, cancel).await {
                Ok(d) => d,
                Err(e) if e.is_cancelled() => return Err(e),
                Err(_) => target,
            };
            let out = sfx_out.join(format!("sfx_{:03}.mp3", scene.index));
            match self
                .engine
                .run(&self.prepare_job(&source, source_sec, target, &out, scene.index), cancel)
                .await
            {
                Ok(()) => {
                    info!(scene = scene.index, "Sound effect {} (mood: {})", file, scene.mood);
                    scene.sfx_file = Some(out);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => warn!(scene = scene.index, "Sound effect prep failed: {}", e),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneType;
    use crate::video::ffmpeg::testing::FakeEngine;

    fn matcher(dir: &Path, map: &[(&str, &str)], tags: &str, engine: Arc<FakeEngine>) -> SfxMatcher {
        let tags_file = dir.join("tags.json");
        std::fs::write(&tags_file, tags).unwrap();
        let config = SfxConfig {
            enabled: true,
            mood_map: map.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            ..SfxConfig::default()
        };
        SfxMatcher::new(&config, dir, &tags_file, engine, 5.0)
    }

    #[test]
    fn pick_order() {
        let dir = tempfile::tempdir().unwrap();
        let tags = r#"{"_note": ["ignored"], "drone.mp3": ["eerie", "low"], "hit.mp3": ["reveal"]}"#;
        let m = matcher(dir.path(), &[("tense", "pulse.mp3"), ("eerie", "wind.mp3")], tags, Arc::default());
        assert_eq!(m.pick(&Mood::Tense), Some("pulse.mp3"));
        assert_eq!(m.pick(&Mood::Reveal), Some("hit.mp3"));
        assert_eq!(m.pick(&Mood::Sad), Some("wind.mp3"));

        let m = matcher(dir.path(), &[], tags, Arc::default());
        assert_eq!(m.pick(&Mood::Sad), Some("drone.mp3"));

        let m = matcher(dir.path(), &[], "{}", Arc::default());
        assert_eq!(m.pick(&Mood::Sad), None);
    }

    #[test]
    fn short_effect_is_looped() {
        let dir = tempfile::tempdir().unwrap();
        let m = matcher(dir.path(), &[], "{}", Arc::default());
        let job = m.prepare_job(Path::new("s.mp3"), 1.5, 6.0, Path::new("o.mp3"), 0);
        assert_eq!(job.value_of("-stream_loop"), Some("6"));
        assert_eq!(job.value_of("-t"), Some("6.000"));
        assert!(job.value_of("-af").unwrap().contains("afade=t=out:st=5.500"));
    }

    #[tokio::test]
    async fn missing_and_failed_effects_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pulse.mp3"), b"x").unwrap();
        let engine = Arc::new(FakeEngine::default());
        let m = matcher(dir.path(), &[("tense", "pulse.mp3"), ("sad", "gone.mp3")], "{}", engine.clone());

        let mut scenes = vec![
            Scene::new(0, SceneType::Clip, Mood::Tense, 3.0),
            Scene::new(1, SceneType::Clip, Mood::Sad, 3.0),
            Scene::new(2, SceneType::Clip, Mood::Tense, 3.0),
        ];
        scenes[2].sfx_file = Some(PathBuf::from("supplied.mp3"));

        m.run(&mut scenes, dir.path(), &CancellationToken::new()).await.unwrap();
        assert_eq!(scenes[0].sfx_file, Some(dir.path().join("sfx").join("sfx_000.mp3")));
        assert!(scenes[1].sfx_file.is_none());
        assert_eq!(scenes[2].sfx_file, Some(PathBuf::from("supplied.mp3")));
        assert_eq!(engine.jobs().len(), 1);
    }
}
