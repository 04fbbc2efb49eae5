use super::ffmpeg::{FfmpegJob, MediaEngine};
use super::filters::{clip_filter, sfx_mix_filter, OverlayWindow};
use crate::config::{FfmpegConfig, VisualsConfig};
use crate::error::{Result, Stage, VideoError};
use crate::scene::{Scene, SceneType};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// What the renderer actually did, for the run record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderReport {
    pub output: PathBuf,
    pub segments: usize,
    pub overlays_applied: Vec<usize>,
    pub overlays_skipped: Vec<usize>,
    pub sfx_mixed: bool,
}

/// Joins transformed scene clips, evidence overlays and audio into the final video.
pub struct TimelineRenderer {
    engine: Arc<dyn MediaEngine>,
    visuals: VisualsConfig,
    width: u32,
    height: u32,
    preset: String,
    crf: u32,
}

impl TimelineRenderer {
    pub fn new(engine: Arc<dyn MediaEngine>, visuals: &VisualsConfig, ffmpeg: &FfmpegConfig) -> Result<Self> {
        let (width, height) = visuals.frame_size()?;
        Ok(Self {
            engine,
            visuals: visuals.clone(),
            width,
            height,
            preset: ffmpeg.preset.clone(),
            crf: ffmpeg.crf,
        })
    }

    /// Renders `scenes` (already in index order) over `narration` into `output`.
    #[instrument(skip_all, fields(scenes = scenes.len()))]
    pub async fn render(
        &self,
        scenes: &[Scene],
        narration: &Path,
        work_dir: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<RenderReport> {
        info!("Step 1/4: Concatenating scene clips...");
        let (mut video, segments) = self.concat(scenes, work_dir, cancel).await?;

        info!("Step 2/4: Applying evidence overlays...");
        let mut report = RenderReport {
            segments,
            ..RenderReport::default()
        };
        for scene in scenes {
            let Some(still) = overlay_still(scene) else {
                continue;
            };
            let out = work_dir.join(format!("visuals_overlay_{:03}.mp4", scene.index));
            match self.engine.run(&self.overlay_job(scene, &video, still, &out), cancel).await {
                Ok(()) => {
                    report.overlays_applied.push(scene.index);
                    video = out;
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!(scene = scene.index, "Evidence overlay skipped: {}", e);
                    report.overlays_skipped.push(scene.index);
                }
            }
        }

        info!("Step 3/4: Mixing audio...");
        let audio = match self.mix_job(scenes, narration, work_dir) {
            None => narration.to_path_buf(),
            Some(job) => match self.engine.run(&job, cancel).await {
                Ok(()) => {
                    report.sfx_mixed = true;
                    job.output
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("Sound effect mix failed, using narration only: {}", e);
                    narration.to_path_buf()
                }
            },
        };

        info!("Step 4/4: Muxing final video...");
        self.engine.run(&self.mux_job(&video, &audio, output), cancel).await?;
        report.output = output.to_path_buf();
        info!("Final video: {}", output.display());
        Ok(report)
    }

    async fn concat(
        &self,
        scenes: &[Scene],
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<(PathBuf, usize)> {
        let mut list = String::new();
        let mut segments = 0;
        for scene in scenes {
            let Some(visual) = &scene.visual_file else {
                warn!(scene = scene.index, "No visual file, leaving scene out of the timeline");
                continue;
            };
            let visual = tokio::fs::canonicalize(visual).await.unwrap_or_else(|_| visual.clone());
            list.push_str(&concat_entry(&visual));
            segments += 1;
        }
        if segments == 0 {
            return Err(VideoError::NoVisuals);
        }

        let list_path = work_dir.join("concat_list.txt");
        tokio::fs::write(&list_path, list).await?;

        let out = work_dir.join("visuals_raw.mp4");
        self.engine.run(&self.concat_job(&list_path, &out), cancel).await?;
        info!("Concatenated {} segments", segments);
        Ok((out, segments))
    }

    pub fn concat_job(&self, list: &Path, out: &Path) -> FfmpegJob {
        FfmpegJob::new(Stage::Concat, out)
            .args(["-f", "concat", "-safe", "0"])
            .input(list)
            .args(["-vf".to_string(), clip_filter(self.width, self.height, self.visuals.fps)])
            .silent_h264(&self.preset, self.crf)
    }

    pub fn overlay_window(&self, scene: &Scene) -> OverlayWindow {
        OverlayWindow {
            start: scene.timestamp_start,
            hold: scene.hold_duration(self.visuals.evidence_hold_sec_default),
            anim: self.visuals.evidence_animation_sec,
            canvas_width: self.width,
            canvas_height: self.height,
            box_width: self.visuals.evidence_width,
            box_height: self.visuals.evidence_height,
        }
    }

    pub fn overlay_job(&self, scene: &Scene, video: &Path, still: &Path, out: &Path) -> FfmpegJob {
        let graph = self.overlay_window(scene).filter_complex(self.visuals.background_dim);
        FfmpegJob::new(Stage::Overlay, out)
            .scene(scene.index)
            .input(video)
            .input(still)
            .args(["-filter_complex".to_string(), graph])
            .args(["-map", "[out]"])
            .silent_h264(&self.preset, self.crf)
    }

    /// `None` when no scene carries a sound effect.
    pub fn mix_job(&self, scenes: &[Scene], narration: &Path, work_dir: &Path) -> Option<FfmpegJob> {
        let effects: Vec<(&Path, u64)> = scenes
            .iter()
            .filter_map(|s| {
                let sfx = s.sfx_file.as_deref()?;
                Some((sfx, (s.timestamp_start.max(0.0) * 1000.0).round() as u64))
            })
            .collect();
        let delays: Vec<u64> = effects.iter().map(|(_, ms)| *ms).collect();
        let graph = sfx_mix_filter(&delays)?;

        let mut job = FfmpegJob::new(Stage::AudioMix, work_dir.join("audio_mixed.mp3")).input(narration);
        for (sfx, _) in &effects {
            job = job.input(sfx);
        }
        Some(
            job.args(["-filter_complex".to_string(), graph])
                .args(["-map", "[aout]", "-c:a", "libmp3lame", "-q:a", "2"]),
        )
    }

    pub fn mux_job(&self, video: &Path, audio: &Path, out: &Path) -> FfmpegJob {
        FfmpegJob::new(Stage::Mux, out)
            .input(video)
            .input(audio)
            .args([
                "-map", "0:v:0", "-map", "1:a:0", "-c:v", "copy", "-c:a", "aac", "-b:a", "192k", "-shortest",
                "-movflags", "+faststart",
            ])
    }
}

/// The credited still of a scene that is still an evidence scene after resolution.
fn overlay_still(scene: &Scene) -> Option<&Path> {
    match scene.scene_type {
        SceneType::Evidence => scene.evidence_image_local.as_deref(),
        _ => None,
    }
}

fn concat_entry(path: &Path) -> String {
    format!("file '{}'\n", path.to_string_lossy().replace('\'', "'\\''"))
}
