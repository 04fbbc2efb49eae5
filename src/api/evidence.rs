use super::{download_image, truncate, with_cancel, HttpFetch};
use crate::config::{Secrets, SourcesConfig};
use crate::error::{Result, VideoError};
use crate::scene::{Scene, Story};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

const WIKIPEDIA_SUMMARY_API: &str = "https://en.wikipedia.org/api/rest_v1/page/summary";
const SERPAPI_SEARCH: &str = "https://serpapi.com/search.json";

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "was", "were", "had", "have", "has", "her", "his", "their", "they", "she",
    "he", "it", "this", "that", "and", "or", "but", "for", "from", "with", "into", "nobody",
    "somebody", "everyone", "anyone", "three", "two",
];

/// Finds a real photograph for an evidence scene.
///
/// Lookups run in a fixed order and stop at the first image that downloads:
/// the scene's own URL, a Wikipedia summary image, the story's bundled
/// images, then a SerpAPI image search when a key is configured.
pub struct EvidenceImageSource {
    http: Arc<dyn HttpFetch>,
    serpapi_key: Option<String>,
    knowledge_base_enabled: bool,
    image_search_enabled: bool,
    min_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct WikiSummary {
    #[serde(default)]
    thumbnail: Option<WikiImage>,
    #[serde(default)]
    originalimage: Option<WikiImage>,
}

#[derive(Debug, Deserialize)]
struct WikiImage {
    source: String,
}

#[derive(Debug, Deserialize)]
struct SerpResponse {
    #[serde(default)]
    images_results: Vec<SerpImage>,
}

#[derive(Debug, Deserialize)]
struct SerpImage {
    original: String,
    #[serde(default)]
    source: String,
}

impl EvidenceImageSource {
    pub fn new(http: Arc<dyn HttpFetch>, config: &SourcesConfig, secrets: &Secrets) -> Self {
        Self {
            http,
            serpapi_key: secrets.serpapi_key.clone(),
            knowledge_base_enabled: config.knowledge_base_enabled,
            image_search_enabled: config.image_search_enabled,
            min_bytes: config.evidence_min_bytes,
        }
    }

    #[instrument(skip_all, fields(scene = scene.index))]
    pub async fn fetch(
        &self,
        scene: &Scene,
        story: &Story,
        out_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let out = out_dir.join(format!("evidence_{:03}.jpg", scene.index));

        if let Some(url) = &scene.evidence_image_url {
            info!("Scene {}: downloading evidence from {}", scene.index, truncate(url, 60));
            match self.download(url, &out, cancel).await {
                Ok(()) => return Ok(out),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => debug!("Scene {}: declared URL failed: {}", scene.index, e),
            }
        }

        if self.knowledge_base_enabled {
            match self.search_wikipedia(&scene.narration, out_dir, scene.index, cancel).await {
                Ok(path) => return Ok(path),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => debug!("Scene {}: knowledge base lookup failed: {}", scene.index, e),
            }
        }

        for url in &story.image_urls {
            match self.download(url, &out, cancel).await {
                Ok(()) => {
                    info!("Scene {}: using story image {}", scene.index, truncate(url, 60));
                    return Ok(out);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => debug!("Scene {}: story image failed: {}", scene.index, e),
            }
        }

        if let (true, Some(key)) = (self.image_search_enabled, &self.serpapi_key) {
            match self
                .search_images(key, &scene.narration, &story.title, out_dir, scene.index, cancel)
                .await
            {
                Ok(path) => return Ok(path),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => debug!("Scene {}: image search failed: {}", scene.index, e),
            }
        }

        Err(VideoError::exhausted(
            "evidence image",
            format!("no evidence image found for scene {}", scene.index),
        ))
    }

    async fn download(&self, url: &str, out: &Path, cancel: &CancellationToken) -> Result<()> {
        download_image(self.http.as_ref(), url, out, self.min_bytes, cancel).await
    }

    async fn search_wikipedia(
        &self,
        narration: &str,
        out_dir: &Path,
        scene_index: usize,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let query = extract_search_query(narration);
        if query.is_empty() {
            return Err(VideoError::ApiError("no query terms in narration".to_string()));
        }

        let url = format!("{}/{}", WIKIPEDIA_SUMMARY_API, urlencoding::encode(&query));
        let body = with_cancel(cancel, self.http.get(&url)).await?;
        let summary: WikiSummary = serde_json::from_slice(&body)?;

        let image_url = summary
            .originalimage
            .or(summary.thumbnail)
            .map(|img| img.source)
            .filter(|src| !src.is_empty())
            .ok_or_else(|| VideoError::ApiError(format!("no image in Wikipedia result for {:?}", query)))?;

        let out = out_dir.join(format!("evidence_{:03}_wiki.jpg", scene_index));
        self.download(&image_url, &out, cancel).await?;
        info!("Scene {}: Wikipedia image found for {:?}", scene_index, query);
        Ok(out)
    }

    async fn search_images(
        &self,
        api_key: &str,
        narration: &str,
        story_title: &str,
        out_dir: &Path,
        scene_index: usize,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let query = format!("{} {}", story_title, extract_search_query(narration));
        let url = format!(
            "{}?engine=google_images&q={}&num=3&api_key={}",
            SERPAPI_SEARCH,
            urlencoding::encode(query.trim()),
            urlencoding::encode(api_key)
        );
        let body = with_cancel(cancel, self.http.get(&url)).await?;
        let results: SerpResponse = serde_json::from_slice(&body)?;

        let out = out_dir.join(format!("evidence_{:03}_search.jpg", scene_index));
        for image in &results.images_results {
            match self.download(&image.original, &out, cancel).await {
                Ok(()) => {
                    info!("Scene {}: search image found from {}", scene_index, image.source);
                    return Ok(out);
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(_) => continue,
            }
        }

        Err(VideoError::ApiError(format!(
            "none of {} search results downloaded",
            results.images_results.len()
        )))
    }
}

/// First four content words of `text`, lowercased and stopword-filtered.
pub fn extract_search_query(text: &str) -> String {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| matches!(c, '.' | ',' | '!' | '?' | '"' | '\''))
                .to_lowercase()
        })
        .filter(|w| w.chars().count() > 3 && !STOPWORDS.contains(&w.as_str()))
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::FakeHttp;
    use crate::scene::{Mood, SceneType};

    const IMAGE: [u8; 2048] = [1u8; 2048];

    fn evidence_scene(url: Option<&str>) -> Scene {
        let mut scene = Scene::new(3, SceneType::Evidence, Mood::Reveal, 4.0);
        scene.narration = "Detectives recovered the Holloway diary from the river.".to_string();
        scene.evidence_image_url = url.map(str::to_string);
        scene
    }

    fn source(http: Arc<FakeHttp>, key: Option<&str>) -> EvidenceImageSource {
        let secrets = Secrets {
            serpapi_key: key.map(str::to_string),
        };
        EvidenceImageSource::new(http, &SourcesConfig::default(), &secrets)
    }

    #[test]
    fn query_keeps_first_four_content_words() {
        assert_eq!(
            extract_search_query("Detectives recovered the Holloway diary from the river."),
            "detectives recovered holloway diary"
        );
        assert_eq!(extract_search_query("It was the end."), "");
    }

    #[tokio::test]
    async fn declared_url_wins() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(FakeHttp::default().with("https://evidence.example/", IMAGE.to_vec()));

        let path = source(http.clone(), None)
            .fetch(
                &evidence_scene(Some("https://evidence.example/diary.jpg")),
                &Story::default(),
                dir.path(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("evidence_003.jpg"));
        assert_eq!(http.requested(), vec!["https://evidence.example/diary.jpg"]);
    }

    #[tokio::test]
    async fn wikipedia_image_is_used_after_url_failure() {
        let dir = tempfile::tempdir().unwrap();
        let summary = r#"{"title":"x","thumbnail":{"source":"https://upload.example/thumb.jpg"}}"#;
        let http = Arc::new(
            FakeHttp::default()
                .with(WIKIPEDIA_SUMMARY_API, summary)
                .with("https://upload.example/", IMAGE.to_vec()),
        );

        let path = source(http.clone(), None)
            .fetch(
                &evidence_scene(Some("https://dead.example/x.jpg")),
                &Story::default(),
                dir.path(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("evidence_003_wiki.jpg"));
        let requested = http.requested();
        assert_eq!(
            requested[1],
            format!("{}/detectives%20recovered%20holloway%20diary", WIKIPEDIA_SUMMARY_API)
        );
    }

    #[tokio::test]
    async fn story_images_are_tried_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(FakeHttp::default().with("https://news.example/ok", IMAGE.to_vec()));
        let story = Story {
            image_urls: vec![
                "https://news.example/missing.jpg".to_string(),
                "https://news.example/ok.jpg".to_string(),
                "https://news.example/ok-too.jpg".to_string(),
            ],
            ..Story::default()
        };

        source(http.clone(), None)
            .fetch(&evidence_scene(None), &story, dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        let requested = http.requested();
        assert_eq!(requested.last().unwrap(), "https://news.example/ok.jpg");
        assert!(!requested.iter().any(|u| u.ends_with("ok-too.jpg")));
    }

    #[tokio::test]
    async fn search_needs_a_key() {
        let dir = tempfile::tempdir().unwrap();
        let results = r#"{"images_results":[{"original":"https://a.example/1.jpg","source":"a"},{"original":"https://b.example/2.jpg","source":"b"}]}"#;
        let http = Arc::new(
            FakeHttp::default()
                .with(SERPAPI_SEARCH, results)
                .with("https://b.example/", IMAGE.to_vec()),
        );

        let err = source(http.clone(), None)
            .fetch(&evidence_scene(None), &Story::default(), dir.path(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::SourceExhausted { .. }));
        assert!(!http.requested().iter().any(|u| u.starts_with(SERPAPI_SEARCH)));

        let path = source(http, Some("k"))
            .fetch(&evidence_scene(None), &Story::default(), dir.path(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("evidence_003_search.jpg"));
    }

    #[tokio::test]
    async fn exhausted_chain_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let http = Arc::new(FakeHttp::default());
        let err = source(http, Some("k"))
            .fetch(
                &evidence_scene(Some("https://dead.example/x.jpg")),
                &Story {
                    image_urls: vec!["https://dead.example/y.jpg".to_string()],
                    ..Story::default()
                },
                dir.path(),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, VideoError::SourceExhausted { source_name: "evidence image", .. }));
    }
}
