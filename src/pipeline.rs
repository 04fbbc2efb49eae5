use crate::api::{EvidenceImageSource, GeneratedImageSource, HttpFetch};
use crate::assets::clip_library::{load_tags, ClipLibrary, UsageLedger};
use crate::assets::SfxMatcher;
use crate::config::Config;
use crate::error::{Result, Stage, VideoError};
use crate::resolver::AssetResolver;
use crate::scene::{Script, Story};
use crate::video::{MediaEngine, RenderReport, SceneTransform, TimelineRenderer};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// External collaborators of a run.
#[derive(Clone)]
pub struct Services {
    pub engine: Arc<dyn MediaEngine>,
    pub generation_http: Arc<dyn HttpFetch>,
    pub evidence_http: Arc<dyn HttpFetch>,
}

/// A run input given in memory or as a JSON file read during preflight.
#[derive(Debug, Clone)]
pub enum Document<T> {
    Inline(T),
    File(PathBuf),
}

impl<T> From<T> for Document<T> {
    fn from(value: T) -> Self {
        Document::Inline(value)
    }
}

/// Everything one run consumes.
#[derive(Debug, Clone)]
pub struct RunInputs {
    pub run_id: String,
    pub script: Document<Script>,
    pub story: Document<Story>,
    pub narration: PathBuf,
    pub work_dir: PathBuf,
    pub output: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub script: Script,
    pub report: RenderReport,
    pub clips_used: Vec<String>,
}

/// Written to `pipeline_state.json` whether the run succeeds or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub scenes: usize,
    pub output: Option<PathBuf>,
    pub failed_stage: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub clips_used: Vec<String>,
    #[serde(default)]
    pub overlays_skipped: Vec<usize>,
}

/// Resolves, transforms and renders one script.
pub struct Pipeline {
    config: Config,
    services: Services,
}

impl Pipeline {
    pub fn new(config: Config, services: Services) -> Self {
        Self { config, services }
    }

    #[instrument(skip_all, fields(run_id = %inputs.run_id))]
    pub async fn run(&self, inputs: RunInputs, cancel: &CancellationToken) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let run_id = inputs.run_id.clone();
        let work_dir = inputs.work_dir.clone();
        let mut scenes = 0;

        let result = self.execute(inputs, &mut scenes, cancel).await;

        let record = RunRecord {
            run_id,
            started_at,
            finished_at: Utc::now(),
            scenes,
            output: result.as_ref().ok().map(|o| o.report.output.clone()),
            failed_stage: result.as_ref().err().and_then(|e| e.stage()).map(|s| s.to_string()),
            error: result.as_ref().err().map(|e| e.to_string()),
            clips_used: result.as_ref().map(|o| o.clips_used.clone()).unwrap_or_default(),
            overlays_skipped: result
                .as_ref()
                .map(|o| o.report.overlays_skipped.clone())
                .unwrap_or_default(),
        };
        if let Err(e) = write_record(&work_dir, &record).await {
            warn!("Could not write run record: {}", e);
        }

        match &result {
            Ok(outcome) => info!("Run complete: {}", outcome.report.output.display()),
            Err(e) => error!("Run failed: {}", e),
        }
        result
    }

    async fn execute(&self, inputs: RunInputs, scenes: &mut usize, cancel: &CancellationToken) -> Result<RunOutcome> {
        let RunInputs {
            run_id,
            script,
            story,
            narration,
            work_dir,
            output,
        } = inputs;
        let config = &self.config;
        let services = &self.services;

        let (mut script, story) = self
            .preflight(script, story, &narration, cancel)
            .await
            .map_err(|e| e.at(Stage::Config))?;
        *scenes = script.scenes.len();
        info!("{} scenes, story {:?}", script.scenes.len(), story.title);

        let scene_dir = work_dir.join("scenes");
        tokio::fs::create_dir_all(&scene_dir).await?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        script.fill_timestamps(config.visuals.default_scene_sec);

        let entries = load_tags(&config.paths.clip_tags).unwrap_or_else(|e| {
            warn!("Unreadable clip tags {}: {}", config.paths.clip_tags.display(), e);
            Vec::new()
        });
        let ledger = UsageLedger::load(&config.paths.usage_ledger, run_id.as_str());
        let clips = Arc::new(ClipLibrary::new(
            &config.paths.clips_dir,
            entries,
            ledger,
            config.assets.top_n,
            config.assets.clip_seed,
        ));
        info!("Clip library: {} clips", clips.len());

        let resolver = AssetResolver::new(
            clips.clone(),
            GeneratedImageSource::new(services.generation_http.clone(), &config.sources),
            EvidenceImageSource::new(services.evidence_http.clone(), &config.sources, &config.secrets),
            config.visuals.frame_size()?,
        );
        let transform = SceneTransform::new(services.engine.clone(), &config.visuals, &config.ffmpeg)?;

        let total = script.scenes.len();
        for (n, scene) in script.scenes.iter_mut().enumerate() {
            info!("Scene {}/{} ({}, mood {})", n + 1, total, scene.scene_type, scene.mood);
            let visual = resolver
                .resolve(scene, &story, &scene_dir, cancel)
                .await
                .map_err(|e| e.at(Stage::Resolve))?;
            transform
                .apply(scene, &visual, &story, &scene_dir, cancel)
                .await
                .map_err(|e| e.at(Stage::Transform))?;
        }

        if config.sfx.enabled {
            SfxMatcher::new(
                &config.sfx,
                &config.paths.sfx_dir,
                &config.paths.sfx_tags,
                services.engine.clone(),
                config.visuals.default_scene_sec,
            )
            .run(&mut script.scenes, &work_dir, cancel)
            .await
            .map_err(|e| e.at(Stage::Sfx))?;
        }

        script.save(&work_dir.join("script.resolved.json")).await?;

        let report = TimelineRenderer::new(services.engine.clone(), &config.visuals, &config.ffmpeg)?
            .render(&script.scenes, &narration, &work_dir, &output, cancel)
            .await
            .map_err(|e| {
                let stage = e.stage().unwrap_or(Stage::Concat);
                e.at(stage)
            })?;

        Ok(RunOutcome {
            script,
            report,
            clips_used: clips.used_in_run(),
        })
    }

    /// Loads the documents and fails before any transform work when an
    /// input or the engine is missing.
    async fn preflight(
        &self,
        script: Document<Script>,
        story: Document<Story>,
        narration: &Path,
        cancel: &CancellationToken,
    ) -> Result<(Script, Story)> {
        let script = match script {
            Document::Inline(script) => script,
            Document::File(path) => Script::load(&path).await?,
        };
        let story = match story {
            Document::Inline(story) => story,
            Document::File(path) => Story::load(&path).await?,
        };
        if script.scenes.is_empty() {
            return Err(VideoError::ConfigurationMissing("script has no scenes".to_string()));
        }
        if !tokio::fs::try_exists(narration).await.unwrap_or(false) {
            return Err(VideoError::ConfigurationMissing(format!(
                "narration audio not found: {}",
                narration.display()
            )));
        }
        self.services.engine.ensure_available(cancel).await?;
        Ok((script, story))
    }
}

async fn write_record(work_dir: &Path, record: &RunRecord) -> Result<()> {
    tokio::fs::create_dir_all(work_dir).await?;
    let data = serde_json::to_vec_pretty(record)?;
    tokio::fs::write(work_dir.join("pipeline_state.json"), data).await?;
    Ok(())
}
