//! Media listing and shuffled draw queues.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::effects::MediaCategory;
use crate::services::MediaLibrary;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif"];
const SOUND_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "mkv", "avi"];

impl MediaCategory {
    pub fn dir_name(self) -> &'static str {
        match self {
            MediaCategory::FlashImage => "images",
            MediaCategory::FlashSound => "sounds",
            MediaCategory::StartleVideo => "startle_videos",
            MediaCategory::SubliminalAudio => "sub_audio",
        }
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            MediaCategory::FlashImage => IMAGE_EXTENSIONS,
            MediaCategory::FlashSound | MediaCategory::SubliminalAudio => SOUND_EXTENSIONS,
            MediaCategory::StartleVideo => VIDEO_EXTENSIONS,
        }
    }
}

/// Assets laid out as `<root>/images`, `<root>/sounds`,
/// `<root>/startle_videos` and `<root>/sub_audio`.
#[derive(Debug, Clone)]
pub struct DirectoryLibrary {
    root: PathBuf,
}

impl DirectoryLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn has_extension(path: &Path, allowed: &[&str]) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
    }
}

impl MediaLibrary for DirectoryLibrary {
    fn list(&self, category: MediaCategory) -> Vec<PathBuf> {
        let dir = self.root.join(category.dir_name());
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %dir.display(), %err, "media directory unreadable");
                return Vec::new();
            }
        };
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file() && Self::has_extension(p, category.extensions()))
            .collect();
        files.sort();
        files
    }

    fn linked_audio(&self, text: &str) -> Option<PathBuf> {
        let clean = text.trim();
        if clean.is_empty() {
            return None;
        }
        let dir = self.root.join(MediaCategory::SubliminalAudio.dir_name());
        let lower = clean.to_lowercase();
        SOUND_EXTENSIONS.iter().find_map(|ext| {
            [clean, lower.as_str()]
                .into_iter()
                .map(|stem| dir.join(format!("{stem}.{ext}")))
                .find(|p| p.exists())
        })
    }
}

/// Fixed in-memory listing, for simulations and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticLibrary {
    files: HashMap<MediaCategory, Vec<PathBuf>>,
    linked: HashMap<String, PathBuf>,
}

impl StaticLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, category: MediaCategory, paths: &[&str]) -> Self {
        self.files
            .entry(category)
            .or_default()
            .extend(paths.iter().map(PathBuf::from));
        self
    }

    pub fn with_linked(mut self, text: &str, path: &str) -> Self {
        self.linked.insert(text.to_string(), PathBuf::from(path));
        self
    }

    /// A small synthetic set covering every category.
    pub fn sample() -> Self {
        Self::new()
            .with(
                MediaCategory::FlashImage,
                &["img/01.png", "img/02.png", "img/03.jpg", "img/04.gif", "img/05.png"],
            )
            .with(MediaCategory::FlashSound, &["snd/chime.wav"])
            .with(MediaCategory::StartleVideo, &["vid/intro.mp4", "vid/loop.mp4"])
    }
}

impl MediaLibrary for StaticLibrary {
    fn list(&self, category: MediaCategory) -> Vec<PathBuf> {
        self.files.get(&category).cloned().unwrap_or_default()
    }

    fn linked_audio(&self, text: &str) -> Option<PathBuf> {
        self.linked.get(text.trim()).cloned()
    }
}

/// Per-category shuffled queue. Each asset is drawn once per cycle before
/// the queue refills from the library.
#[derive(Debug, Clone, Default)]
pub struct MediaQueue {
    queues: HashMap<MediaCategory, Vec<PathBuf>>,
}

impl MediaQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next<R: Rng + ?Sized>(
        &mut self,
        library: &dyn MediaLibrary,
        category: MediaCategory,
        rng: &mut R,
    ) -> Option<PathBuf> {
        let queue = self.queues.entry(category).or_default();
        if queue.is_empty() {
            let mut files = library.list(category);
            files.shuffle(rng);
            *queue = files;
        }
        queue.pop()
    }

    /// Uniform pick without touching the queue.
    pub fn pick<R: Rng + ?Sized>(
        library: &dyn MediaLibrary,
        category: MediaCategory,
        rng: &mut R,
    ) -> Option<PathBuf> {
        library.list(category).choose(rng).cloned()
    }

    pub fn clear(&mut self) {
        self.queues.clear();
    }
}
