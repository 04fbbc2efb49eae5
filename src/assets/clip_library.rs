use crate::error::{Result, VideoError};
use crate::scene::{Mood, Scene};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::{info, warn};

const TAG_WEIGHT: u32 = 10;
const MOOD_WEIGHT: u32 = 15;

/// A reusable clip and its lowercase tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipEntry {
    pub filename: String,
    pub tags: Vec<String>,
}

impl ClipEntry {
    pub fn new(filename: impl Into<String>, tags: &[&str]) -> Self {
        Self {
            filename: filename.into(),
            tags: tags.iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

/// Reads the tag file: clip filename to an array of tags.
///
/// Keys starting with `_` are documentation rows and are skipped, as are
/// values that are not string arrays. A missing file means an empty pool.
pub fn load_tags(path: &Path) -> Result<Vec<ClipEntry>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Tag file not found at {}; no library clips will be used", path.display());
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&data)?;
    let entries = raw
        .into_iter()
        .filter(|(name, _)| !name.starts_with('_'))
        .filter_map(|(name, value)| {
            let tags: Vec<String> = serde_json::from_value(value).ok()?;
            Some(ClipEntry {
                filename: name,
                tags: tags.iter().map(|t| t.to_lowercase()).collect(),
            })
        })
        .collect();
    Ok(entries)
}

/// Clips consumed per run, persisted in full after every pick.
#[derive(Debug)]
pub struct UsageLedger {
    path: PathBuf,
    run_id: String,
    runs: BTreeMap<String, Vec<String>>,
    used: HashSet<String>,
}

impl UsageLedger {
    /// Loads the ledger file. A missing or unreadable file starts empty.
    ///
    /// Clips already recorded under `run_id` count as used, so a resumed run
    /// keeps its no-repeat guarantee.
    pub fn load(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        let path = path.into();
        let run_id = run_id.into();
        let runs: BTreeMap<String, Vec<String>> = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data).unwrap_or_else(|e| {
                warn!("Usage ledger {} is corrupt ({}); starting empty", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        let used = runs
            .get(&run_id)
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default();
        Self {
            path,
            run_id,
            runs,
            used,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn is_used(&self, filename: &str) -> bool {
        self.used.contains(filename)
    }

    pub fn used_in_run(&self) -> &[String] {
        self.runs.get(&self.run_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn mark_used(&mut self, filename: &str) {
        self.used.insert(filename.to_string());
        self.runs
            .entry(self.run_id.clone())
            .or_default()
            .push(filename.to_string());
    }

    /// Rewrites the whole ledger through a temp file and rename.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&self.runs)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

struct Picker {
    ledger: UsageLedger,
    rng: StdRng,
}

/// Tag-indexed clip pool that never hands out the same clip twice in a run.
pub struct ClipLibrary {
    clips_dir: PathBuf,
    entries: Vec<ClipEntry>,
    top_n: usize,
    picker: Mutex<Picker>,
}

impl ClipLibrary {
    pub fn new(
        clips_dir: impl Into<PathBuf>,
        entries: Vec<ClipEntry>,
        ledger: UsageLedger,
        top_n: usize,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            clips_dir: clips_dir.into(),
            entries,
            top_n: top_n.max(1),
            picker: Mutex::new(Picker { ledger, rng }),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Filenames handed out so far in this run, in pick order.
    pub fn used_in_run(&self) -> Vec<String> {
        let picker = self.picker.lock().unwrap_or_else(PoisonError::into_inner);
        picker.ledger.used_in_run().to_vec()
    }

    /// Picks a clip for `scene` and records it as used.
    ///
    /// Unused clips are ranked by tag and mood relevance, and one of the
    /// best `top_n` is drawn at random. Scoring, picking, marking and
    /// persisting all happen under one lock.
    pub fn select(&self, scene: &Scene) -> Result<PathBuf> {
        if self.entries.is_empty() {
            return Err(VideoError::exhausted(
                "clip library",
                format!("no clips found in {}", self.clips_dir.display()),
            ));
        }

        let mut picker = self.picker.lock().unwrap_or_else(PoisonError::into_inner);

        let mut candidates: Vec<(&ClipEntry, u32)> = self
            .entries
            .iter()
            .filter(|clip| !picker.ledger.is_used(&clip.filename))
            .map(|clip| (clip, match_score(&scene.asset_tags, &clip.tags, &scene.mood)))
            .collect();

        if candidates.is_empty() {
            return Err(VideoError::exhausted(
                "clip library",
                format!("all {} clips have been used in run {}", self.entries.len(), picker.ledger.run_id()),
            ));
        }

        candidates.sort_by(|a, b| b.1.cmp(&a.1));
        let top = candidates.len().min(self.top_n);
        let (clip, score) = candidates[picker.rng.gen_range(0..top)];

        picker.ledger.mark_used(&clip.filename);
        if let Err(e) = picker.ledger.persist() {
            warn!("Scene {}: could not persist usage ledger: {}", scene.index, e);
        }

        info!("Scene {}: picked clip {:?} (score: {})", scene.index, clip.filename, score);
        Ok(self.clips_dir.join(&clip.filename))
    }
}

/// Relevance of a clip: 10 per matching required tag, 15 for the mood.
pub fn match_score(required: &[String], clip_tags: &[String], mood: &Mood) -> u32 {
    let has = |tag: &str| {
        let tag = tag.to_lowercase();
        clip_tags.iter().any(|t| *t == tag)
    };
    let tag_hits = required.iter().filter(|req| has(req.as_str())).count() as u32;
    let mood_hit = if has(mood.as_str()) { MOOD_WEIGHT } else { 0 };
    tag_hits * TAG_WEIGHT + mood_hit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::SceneType;
    use std::collections::HashSet;

    fn scene(index: usize, tags: &[&str], mood: Mood) -> Scene {
        let mut scene = Scene::new(index, SceneType::Clip, mood, 4.0);
        scene.asset_tags = tags.iter().map(|t| t.to_string()).collect();
        scene
    }

    fn library(dir: &Path, entries: Vec<ClipEntry>, seed: u64) -> ClipLibrary {
        let ledger = UsageLedger::load(dir.join("usage.json"), "run-1");
        ClipLibrary::new(dir.join("clips"), entries, ledger, 3, Some(seed))
    }

    #[test]
    fn score_counts_tags_and_mood_case_insensitively() {
        let clip = ClipEntry::new("rain.mp4", &["Rain", "night", "tense"]);
        let required = vec!["RAIN".to_string(), "night".to_string(), "car".to_string()];
        assert_eq!(match_score(&required, &clip.tags, &Mood::Tense), 35);
        assert_eq!(match_score(&required, &clip.tags, &Mood::Sad), 20);
        assert_eq!(match_score(&[], &clip.tags, &Mood::Sad), 0);
    }

    #[test]
    fn tag_file_skips_reserved_and_malformed_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tags.json");
        std::fs::write(
            &path,
            r#"{
                "_instructions": "tag every clip",
                "_tag_options": ["night", "rain"],
                "alley.mp4": ["Night", "Rain"],
                "broken.mp4": "not-a-list"
            }"#,
        )
        .unwrap();
        let entries = load_tags(&path).unwrap();
        assert_eq!(entries, vec![ClipEntry::new("alley.mp4", &["night", "rain"])]);
        assert!(load_tags(&dir.path().join("missing.json")).unwrap().is_empty());
    }

    #[test]
    fn never_repeats_within_a_run() {
        let dir = tempfile::tempdir().unwrap();
        let entries = (0..6)
            .map(|i| ClipEntry::new(format!("clip{i}.mp4"), &["night"]))
            .collect();
        let lib = library(dir.path(), entries, 11);

        let picks: Vec<PathBuf> = (0..6)
            .map(|i| lib.select(&scene(i, &["night"], Mood::Eerie)).unwrap())
            .collect();
        let unique: HashSet<_> = picks.iter().collect();
        assert_eq!(unique.len(), 6);
        assert!(picks.iter().all(|p| p.starts_with(dir.path().join("clips"))));
    }

    #[test]
    fn exhausted_pool_is_not_found_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(dir.path(), vec![ClipEntry::new("only.mp4", &[])], 1);
        lib.select(&scene(0, &[], Mood::Hook)).unwrap();
        for i in 1..4 {
            let err = lib.select(&scene(i, &[], Mood::Hook)).unwrap_err();
            assert!(matches!(err, VideoError::SourceExhausted { source_name: "clip library", .. }));
        }
    }

    #[test]
    fn empty_pool_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let lib = library(dir.path(), Vec::new(), 1);
        assert!(lib.select(&scene(0, &["night"], Mood::Tense)).is_err());
    }

    #[test]
    fn pick_comes_from_the_top_three() {
        let entries = vec![
            ClipEntry::new("a.mp4", &["rain", "night", "tense"]),
            ClipEntry::new("b.mp4", &["rain", "tense"]),
            ClipEntry::new("c.mp4", &["tense"]),
            ClipEntry::new("d.mp4", &["forest"]),
            ClipEntry::new("e.mp4", &["beach"]),
        ];
        for seed in 0..20 {
            let dir = tempfile::tempdir().unwrap();
            let lib = library(dir.path(), entries.clone(), seed);
            let pick = lib.select(&scene(0, &["rain", "night"], Mood::Tense)).unwrap();
            let name = pick.file_name().unwrap().to_str().unwrap().to_string();
            assert!(["a.mp4", "b.mp4", "c.mp4"].contains(&name.as_str()), "{name}");
        }
    }

    #[test]
    fn ledger_is_persisted_after_each_pick() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![ClipEntry::new("a.mp4", &[]), ClipEntry::new("b.mp4", &[])];
        let lib = library(dir.path(), entries, 5);

        let first = lib.select(&scene(0, &[], Mood::Sad)).unwrap();
        let on_disk: BTreeMap<String, Vec<String>> =
            serde_json::from_slice(&std::fs::read(dir.path().join("usage.json")).unwrap()).unwrap();
        assert_eq!(on_disk["run-1"].len(), 1);
        assert_eq!(first.file_name().unwrap().to_str().unwrap(), on_disk["run-1"][0]);

        lib.select(&scene(1, &[], Mood::Sad)).unwrap();
        assert_eq!(lib.used_in_run().len(), 2);

        // A resumed run sees both clips as used; another run starts fresh.
        let resumed = UsageLedger::load(dir.path().join("usage.json"), "run-1");
        assert!(resumed.is_used("a.mp4") && resumed.is_used("b.mp4"));
        let other = UsageLedger::load(dir.path().join("usage.json"), "run-2");
        assert!(!other.is_used("a.mp4"));
    }

    #[test]
    fn seeded_library_is_reproducible() {
        let entries: Vec<ClipEntry> = (0..8)
            .map(|i| ClipEntry::new(format!("clip{i}.mp4"), &["night"]))
            .collect();
        let run = |dir: &Path| {
            let lib = library(dir, entries.clone(), 42);
            (0..4)
                .map(|i| lib.select(&scene(i, &["night"], Mood::Eerie)).unwrap())
                .map(|p| p.file_name().unwrap().to_owned())
                .collect::<Vec<_>>()
        };
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        assert_eq!(run(a.path()), run(b.path()));
    }

    #[test]
    fn concurrent_selection_never_double_picks() {
        let dir = tempfile::tempdir().unwrap();
        let entries = (0..16)
            .map(|i| ClipEntry::new(format!("clip{i}.mp4"), &["night"]))
            .collect();
        let lib = std::sync::Arc::new(library(dir.path(), entries, 3));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let lib = lib.clone();
                std::thread::spawn(move || lib.select(&scene(i, &["night"], Mood::Tense)).unwrap())
            })
            .collect();
        let picks: HashSet<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(picks.len(), 16);
    }
}
