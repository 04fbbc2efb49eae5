use crate::api::{EvidenceImageSource, GeneratedImageSource};
use crate::assets::clip_library::ClipLibrary;
use crate::error::{Result, Stage};
use crate::scene::{Scene, SceneType, Story};
use crate::video::transform::write_fallback_frame;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const EVIDENCE_FALLBACK_PROMPT: &str = "evidence document crime scene investigation cinematic";

/// How a scene is currently being resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    Clip,
    Generated { prompt: String },
    Evidence,
}

impl Strategy {
    pub fn for_scene(scene: &Scene) -> Self {
        match scene.scene_type {
            SceneType::Clip => Strategy::Clip,
            SceneType::Generated => Strategy::Generated {
                prompt: scene.image_prompt.clone(),
            },
            SceneType::Evidence => Strategy::Evidence,
        }
    }
}

/// A raw asset ready for [`crate::video::SceneTransform`].
#[derive(Debug, Clone, PartialEq)]
pub enum ResolvedVisual {
    /// A library clip, trimmed or looped later.
    Clip(PathBuf),
    /// A generated still, animated later.
    Still(PathBuf),
    /// A downloaded evidence photo, credited and overlaid later.
    Evidence(PathBuf),
    /// A solid frame standing in for a still that could not be produced.
    Fallback(PathBuf),
}

impl ResolvedVisual {
    /// Scene type recorded once the scene settles on this visual.
    pub fn scene_type(&self) -> SceneType {
        match self {
            ResolvedVisual::Clip(_) => SceneType::Clip,
            ResolvedVisual::Evidence(_) => SceneType::Evidence,
            ResolvedVisual::Still(_) | ResolvedVisual::Fallback(_) => SceneType::Generated,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ResolvedVisual::Clip(p)
            | ResolvedVisual::Still(p)
            | ResolvedVisual::Evidence(p)
            | ResolvedVisual::Fallback(p) => p,
        }
    }
}

/// Outcome of trying one strategy.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Resolved(ResolvedVisual),
    Downgrade(Strategy),
}

/// Picks a visual for each scene, downgrading clip and evidence scenes to a
/// generated still and a generated still to a solid frame. Only
/// cancellation or a failure to write the solid frame escapes.
pub struct AssetResolver {
    clips: Arc<ClipLibrary>,
    generator: GeneratedImageSource,
    evidence: EvidenceImageSource,
    frame_size: (u32, u32),
}

impl AssetResolver {
    pub fn new(
        clips: Arc<ClipLibrary>,
        generator: GeneratedImageSource,
        evidence: EvidenceImageSource,
        frame_size: (u32, u32),
    ) -> Self {
        Self {
            clips,
            generator,
            evidence,
            frame_size,
        }
    }

    /// Runs one strategy to completion.
    pub async fn step(
        &self,
        strategy: &Strategy,
        scene: &Scene,
        story: &Story,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        match strategy {
            Strategy::Clip => match self.clips.select(scene) {
                Ok(path) => Ok(Step::Resolved(ResolvedVisual::Clip(path))),
                Err(e) => {
                    warn!(scene = scene.index, "Clip unavailable ({}), generating a still instead", e);
                    Ok(Step::Downgrade(Strategy::Generated {
                        prompt: clip_fallback_prompt(scene),
                    }))
                }
            },
            Strategy::Evidence => match self.evidence.fetch(scene, story, out_dir, cancel).await {
                Ok(path) => Ok(Step::Resolved(ResolvedVisual::Evidence(path))),
                Err(e) if e.is_cancelled() => Err(e),
                Err(e) => {
                    warn!(scene = scene.index, "Evidence unavailable ({}), generating a still instead", e);
                    Ok(Step::Downgrade(Strategy::Generated {
                        prompt: EVIDENCE_FALLBACK_PROMPT.to_string(),
                    }))
                }
            },
            Strategy::Generated { prompt } => {
                match self.generator.fetch(scene.index, prompt, &scene.mood, out_dir, cancel).await {
                    Ok(path) => Ok(Step::Resolved(ResolvedVisual::Still(path))),
                    Err(e) if e.is_cancelled() => Err(e),
                    Err(e) => {
                        warn!(scene = scene.index, "Image generation failed ({}), using a solid frame", e);
                        let (w, h) = self.frame_size;
                        let out = out_dir.join(format!("fallback_{:03}.jpg", scene.index));
                        let path = write_fallback_frame(out, w, h).await.map_err(|e| e.at(Stage::Resolve))?;
                        Ok(Step::Resolved(ResolvedVisual::Fallback(path)))
                    }
                }
            }
        }
    }

    /// Resolves `scene` and rewrites its type to match what was found.
    #[instrument(skip_all, fields(scene = scene.index, declared = %scene.scene_type))]
    pub async fn resolve(
        &self,
        scene: &mut Scene,
        story: &Story,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<ResolvedVisual> {
        let mut strategy = Strategy::for_scene(scene);
        let visual = loop {
            match self.step(&strategy, scene, story, out_dir, cancel).await? {
                Step::Resolved(visual) => break visual,
                Step::Downgrade(next) => strategy = next,
            }
        };

        let resolved_type = visual.scene_type();
        if resolved_type != scene.scene_type {
            warn!(
                scene = scene.index,
                "Scene downgraded from {} to {}", scene.scene_type, resolved_type
            );
            scene.scene_type = resolved_type;
        }
        info!(scene = scene.index, "Resolved visual: {}", visual.path().display());
        Ok(visual)
    }
}

/// Prompt for a clip scene that has to fall back to generation.
pub fn clip_fallback_prompt(scene: &Scene) -> String {
    if scene.image_prompt.trim().is_empty() {
        format!("dark crime scene {} atmosphere cinematic", scene.mood)
    } else {
        scene.image_prompt.clone()
    }
}
