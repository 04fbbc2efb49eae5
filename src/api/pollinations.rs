use super::{download_image, truncate, HttpFetch};
use crate::config::SourcesConfig;
use crate::error::{Result, VideoError};
use crate::scene::Mood;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const POLLINATIONS_API: &str = "https://image.pollinations.ai/prompt";

/// Appended to every prompt.
const SAFETY_MODIFIERS: &str = "no text, no watermark, no people's faces, environmental scene only";

const DEFAULT_STYLE: &str = "cinematic, dramatic lighting, photorealistic, 4K, dark atmosphere";

/// Generates stills from text prompts through the Pollinations endpoint.
pub struct GeneratedImageSource {
    http: Arc<dyn HttpFetch>,
    retries: u32,
    backoff: Duration,
    min_bytes: usize,
}

impl GeneratedImageSource {
    pub fn new(http: Arc<dyn HttpFetch>, config: &SourcesConfig) -> Self {
        Self {
            http,
            retries: config.generation_retries.max(1),
            backoff: config.retry_backoff(),
            min_bytes: config.generation_min_bytes,
        }
    }

    /// Generates the scene still, retrying with a linearly growing pause between attempts.
    #[instrument(skip(self, prompt, mood, out_dir, cancel), fields(mood = %mood))]
    pub async fn fetch(
        &self,
        scene_index: usize,
        prompt: &str,
        mood: &Mood,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if prompt.trim().is_empty() {
            return Err(VideoError::exhausted(
                "image generation",
                format!("scene {} has no image prompt", scene_index),
            ));
        }

        let enhanced = enhance_prompt(prompt, mood);
        let url = image_url(&enhanced, scene_seed(scene_index));
        let out = out_dir.join(format!("generated_{:03}.jpg", scene_index));

        info!("Generating image for scene {}: {:?}", scene_index, truncate(&enhanced, 60));

        let mut last_error = None;
        for attempt in 1..=self.retries {
            match download_image(self.http.as_ref(), &url, &out, self.min_bytes, cancel).await {
                Ok(()) => {
                    info!("Scene {} image saved: {}", scene_index, out.display());
                    return Ok(out);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    warn!("Attempt {}/{} failed for scene {}: {}", attempt, self.retries, scene_index, e);
                    last_error = Some(e);
                }
            }
            if attempt < self.retries {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(VideoError::Cancelled),
                    _ = tokio::time::sleep(self.backoff * attempt) => {}
                }
            }
        }

        Err(VideoError::exhausted(
            "image generation",
            format!(
                "{} attempts failed, last error: {}",
                self.retries,
                last_error.map(|e| e.to_string()).unwrap_or_default()
            ),
        ))
    }
}

/// Deterministic per-scene seed so re-runs render the same image.
fn scene_seed(scene_index: usize) -> usize {
    scene_index * 42 + 7
}

fn image_url(prompt: &str, seed: usize) -> String {
    format!(
        "{}/{}?width=1920&height=1080&nologo=true&model=flux&seed={}",
        POLLINATIONS_API,
        urlencoding::encode(prompt),
        seed
    )
}

fn mood_style(mood: &Mood) -> &'static str {
    match mood {
        Mood::Tense => "cinematic noir lighting, dark shadows, dramatic contrast, 4K photorealistic",
        Mood::Reveal => "dramatic spotlight, high contrast, moody atmosphere, cinematic close-up",
        Mood::Eerie => "dark foggy atmosphere, eerie lighting, desaturated colors, photorealistic",
        Mood::Action => "dynamic composition, dramatic lighting, motion blur, cinematic",
        Mood::Sad => "melancholic lighting, soft shadows, muted tones, emotionally heavy",
        Mood::Hook => "extreme dramatic lighting, high contrast black and white, cinematic masterpiece",
        Mood::Other(_) => DEFAULT_STYLE,
    }
}

pub fn enhance_prompt(base: &str, mood: &Mood) -> String {
    format!("{}, {}, {}", base.trim(), mood_style(mood), SAFETY_MODIFIERS)
}
