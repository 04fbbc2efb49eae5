use super::ffmpeg::{FfmpegJob, MediaEngine};
use super::filters::{clip_filter, credit_filter, loop_count, ZoomPan};
use crate::config::{FfmpegConfig, VisualsConfig};
use crate::error::{Result, Stage, VideoError};
use crate::resolver::ResolvedVisual;
use crate::scene::{Scene, Story};
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Turns a resolved asset into a silent clip exactly as long as the scene.
pub struct SceneTransform {
    engine: Arc<dyn MediaEngine>,
    visuals: VisualsConfig,
    width: u32,
    height: u32,
    preset: String,
    crf: u32,
}

impl SceneTransform {
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

    /// Trim a long clip, or loop a short one then trim, to `target_sec`.
    pub fn clip_job(&self, index: usize, source: &Path, source_sec: f64, target_sec: f64, out: &Path) -> FfmpegJob {
        let mut job = FfmpegJob::new(Stage::Transform, out).scene(index);
        if source_sec < target_sec {
            job = job.args(["-stream_loop".to_string(), loop_count(target_sec, source_sec).to_string()]);
        }
        job.input(source)
            .args(["-t".to_string(), format!("{:.3}", target_sec)])
            .args(["-vf".to_string(), clip_filter(self.width, self.height, self.visuals.fps)])
            .silent_h264(&self.preset, self.crf)
    }

    pub fn zoom(&self, target_sec: f64) -> ZoomPan {
        ZoomPan {
            zoom_factor: self.visuals.zoom_factor,
            fps: self.visuals.fps,
            duration_sec: target_sec,
            width: self.width,
            height: self.height,
        }
    }

    /// Zoom a still from 1.0 to the configured factor over `target_sec`.
    pub fn still_job(&self, index: usize, image: &Path, target_sec: f64, out: &Path) -> FfmpegJob {
        FfmpegJob::new(Stage::Transform, out)
            .scene(index)
            .input(image)
            .args(["-vf".to_string(), self.zoom(target_sec).filter()])
            .args(["-t".to_string(), format!("{:.3}", target_sec)])
            .silent_h264(&self.preset, self.crf)
    }

    pub fn credit_job(&self, index: usize, image: &Path, credit: &str, out: &Path) -> FfmpegJob {
        FfmpegJob::new(Stage::Transform, out)
            .scene(index)
            .input(image)
            .args([
                "-vf".to_string(),
                credit_filter(credit, self.visuals.evidence_width, self.visuals.evidence_height),
            ])
            .args(["-q:v", "2"])
    }

    pub async fn prepare_clip(
        &self,
        index: usize,
        clip: &Path,
        target_sec: f64,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let out = out_dir.join(format!("clip_{:03}.mp4", index));
        let source_sec = match self.engine.probe_duration(clip, cancel).await {
            Ok(d) => d,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                warn!("Scene {}: cannot measure {} ({}); assuming it fits", index, clip.display(), e);
                target_sec
            }
        };
        self.engine
            .run(&self.clip_job(index, clip, source_sec, target_sec, &out), cancel)
            .await?;
        Ok(out)
    }

    pub async fn prepare_still(
        &self,
        index: usize,
        image: &Path,
        target_sec: f64,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let out = out_dir.join(format!("still_{:03}.mp4", index));
        self.engine
            .run(&self.still_job(index, image, target_sec, &out), cancel)
            .await?;
        Ok(out)
    }

    pub async fn add_source_credit(
        &self,
        index: usize,
        image: &Path,
        story: &Story,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let out = out_dir.join(format!("evidence_credited_{:03}.jpg", index));
        self.engine
            .run(&self.credit_job(index, image, &story.credit(), &out), cancel)
            .await?;
        Ok(out)
    }

    /// Writes the scene's clip and records it on the scene.
    ///
    /// Evidence stills are credited first; the credited still is kept on the
    /// scene for the timeline overlay and also drives the scene's own clip.
    pub async fn apply(
        &self,
        scene: &mut Scene,
        visual: &ResolvedVisual,
        story: &Story,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let target = scene.duration(self.visuals.default_scene_sec);
        let clip = match visual {
            ResolvedVisual::Clip(path) => self.prepare_clip(scene.index, path, target, out_dir, cancel).await?,
            ResolvedVisual::Still(path) | ResolvedVisual::Fallback(path) => {
                self.prepare_still(scene.index, path, target, out_dir, cancel).await?
            }
            ResolvedVisual::Evidence(path) => {
                let credited = match self.add_source_credit(scene.index, path, story, out_dir, cancel).await {
                    Ok(credited) => credited,
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(e) => {
                        warn!("Scene {}: source credit failed ({}); using uncredited still", scene.index, e);
                        path.clone()
                    }
                };
                let clip = self.prepare_still(scene.index, &credited, target, out_dir, cancel).await?;
                scene.evidence_image_local = Some(credited);
                clip
            }
        };

        info!("Scene {} visual ready: {}", scene.index, clip.display());
        scene.visual_file = Some(clip);
        Ok(())
    }
}

/// Writes a flat black frame of `width`x`height`.
pub async fn write_fallback_frame(out: PathBuf, width: u32, height: u32) -> Result<PathBuf> {
    tokio::task::spawn_blocking(move || -> Result<PathBuf> {
        RgbImage::from_pixel(width, height, Rgb([0, 0, 0])).save(&out)?;
        Ok(out)
    })
    .await
    .map_err(|e| VideoError::transform(Stage::Resolve, None, format!("fallback frame task failed: {}", e)))?
}
