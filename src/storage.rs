//! On-disk archive: one folder per novel holding chapter files, debug artifacts, and a
//! `metadata.json` record of saved chapters.
//!
//! Metadata updates are read-modify-write and are serialized per folder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

pub const METADATA_FILE: &str = "metadata.json";
const MAX_NAME_CHARS: usize = 200;
/// Byte cap for a name; leaves room for an extension under the usual 255-byte file name limit.
const MAX_NAME_BYTES: usize = 240;
const UNSAFE_NAME_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metadata at {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
    move |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// How chapter text is written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChapterFormat {
    /// `.txt`, the extracted text as-is.
    #[default]
    Text,
    /// `.md`, a `# title` heading followed by the text.
    Markdown,
}

impl ChapterFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ChapterFormat::Text => "txt",
            ChapterFormat::Markdown => "md",
        }
    }

    fn render(self, title: &str, text: &str) -> String {
        match self {
            ChapterFormat::Text => text.to_string(),
            ChapterFormat::Markdown => format!("# {}\n\n{}\n", title, text.trim_end()),
        }
    }
}

/// When two chapter titles count as the same metadata entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TitleMatch {
    /// Byte-for-byte equal.
    #[default]
    Exact,
    /// Equal after lowercasing and collapsing whitespace.
    Normalized,
}

impl TitleMatch {
    fn same(self, a: &str, b: &str) -> bool {
        match self {
            TitleMatch::Exact => a == b,
            TitleMatch::Normalized => normalize_title(a) == normalize_title(b),
        }
    }
}

fn normalize_title(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Per-novel record stored beside the chapter files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NovelMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub chapters: Vec<ChapterEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChapterEntry {
    pub title: String,
    /// File name relative to the novel folder.
    pub file: String,
    pub added: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

/// Handle to a novel folder returned by [NovelStorage::make_novel_folder].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NovelFolder {
    path: PathBuf,
}

impl NovelFolder {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE)
    }
}

/// What the download pipeline needs from persistence.
pub trait NovelStorage {
    /// Create (or reuse) the folder for a novel. Idempotent.
    fn make_novel_folder(
        &self,
        title: &str,
        source_url: Option<&str>,
    ) -> Result<NovelFolder, StorageError>;

    /// Write a chapter file (overwriting) and record it unless the title is already recorded.
    fn save_chapter(
        &self,
        folder: &NovelFolder,
        title: &str,
        text: &str,
        source_url: Option<&str>,
        format: ChapterFormat,
    ) -> Result<PathBuf, StorageError>;

    /// Keep raw markup of a chapter that could not be processed.
    fn save_debug_artifact(
        &self,
        folder: &NovelFolder,
        index: u32,
        markup: &str,
    ) -> Result<PathBuf, StorageError>;
}

/// Filesystem-safe, length-capped name. Never empty and never a bare `.`/`..`.
pub fn safe_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if UNSAFE_NAME_CHARS.contains(&c) || c.is_control() {
            if !in_run {
                out.push('_');
            }
            in_run = true;
        } else {
            out.push(c);
            in_run = false;
        }
    }
    let mut capped = String::new();
    for c in out.trim().chars().take(MAX_NAME_CHARS) {
        if capped.len() + c.len_utf8() > MAX_NAME_BYTES {
            break;
        }
        capped.push(c);
    }
    let capped = capped.trim_end().to_string();
    if capped.is_empty() || capped.chars().all(|c| c == '.') {
        "untitled".to_string()
    } else {
        capped
    }
}

/// Filesystem store rooted at `base_dir` (one sub-folder per novel).
#[derive(Debug)]
pub struct NovelStore {
    base_dir: PathBuf,
    title_match: TitleMatch,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl NovelStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            title_match: TitleMatch::default(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_title_match(mut self, title_match: TitleMatch) -> Self {
        self.title_match = title_match;
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn folder_lock(&self, folder: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(folder.to_path_buf()).or_default())
    }

    /// Read a folder's metadata. A missing file is Ok(None).
    pub fn load_metadata(&self, folder: &Path) -> Result<Option<NovelMetadata>, StorageError> {
        let path = folder.join(METADATA_FILE);
        let raw = match fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path)(e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StorageError::Metadata { path, source })
    }

    fn write_metadata(&self, folder: &Path, metadata: &NovelMetadata) -> Result<(), StorageError> {
        let path = folder.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(metadata).map_err(|source| {
            StorageError::Metadata {
                path: path.clone(),
                source,
            }
        })?;
        fs::write(&path, json).map_err(io_err(&path))
    }

    /// Every stored chapter file: novels by folder name, chapters in metadata order, then
    /// any unrecorded chapter files by name.
    pub fn list_chapters(&self) -> Result<Vec<PathBuf>, StorageError> {
        if !self.base_dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut novels: Vec<PathBuf> = fs::read_dir(&self.base_dir)
            .map_err(io_err(&self.base_dir))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        novels.sort();

        let mut chapters = Vec::new();
        for novel in novels {
            let mut listed = HashSet::new();
            if let Some(metadata) = self.load_metadata(&novel)? {
                for entry in metadata.chapters {
                    let path = novel.join(&entry.file);
                    if path.is_file() && listed.insert(path.clone()) {
                        chapters.push(path);
                    }
                }
            }
            let mut rest: Vec<PathBuf> = fs::read_dir(&novel)
                .map_err(io_err(&novel))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_chapter_file(p) && !listed.contains(p))
                .collect();
            rest.sort();
            chapters.extend(rest);
        }
        Ok(chapters)
    }
}

fn is_chapter_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            e == ChapterFormat::Text.extension() || e == ChapterFormat::Markdown.extension()
        })
        .unwrap_or(false)
}

impl NovelStorage for NovelStore {
    fn make_novel_folder(
        &self,
        title: &str,
        source_url: Option<&str>,
    ) -> Result<NovelFolder, StorageError> {
        let path = self.base_dir.join(safe_name(title));
        fs::create_dir_all(&path).map_err(io_err(&path))?;

        let lock = self.folder_lock(&path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.load_metadata(&path)? {
            None => self.write_metadata(
                &path,
                &NovelMetadata {
                    title: title.to_string(),
                    source_url: source_url.map(String::from),
                    chapters: Vec::new(),
                },
            )?,
            Some(mut metadata) if metadata.source_url.is_none() && source_url.is_some() => {
                metadata.source_url = source_url.map(String::from);
                self.write_metadata(&path, &metadata)?;
            }
            Some(_) => {}
        }
        Ok(NovelFolder { path })
    }

    fn save_chapter(
        &self,
        folder: &NovelFolder,
        title: &str,
        text: &str,
        source_url: Option<&str>,
        format: ChapterFormat,
    ) -> Result<PathBuf, StorageError> {
        fs::create_dir_all(&folder.path).map_err(io_err(&folder.path))?;
        let file = format!("{}.{}", safe_name(title), format.extension());
        let path = folder.path.join(&file);
        fs::write(&path, format.render(title, text)).map_err(io_err(&path))?;

        let lock = self.folder_lock(&folder.path);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut metadata = self.load_metadata(&folder.path)?.unwrap_or_else(|| NovelMetadata {
            title: folder
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            source_url: None,
            chapters: Vec::new(),
        });
        if metadata
            .chapters
            .iter()
            .any(|c| self.title_match.same(&c.title, title))
        {
            tracing::debug!(title, "chapter already recorded; metadata unchanged");
        } else {
            metadata.chapters.push(ChapterEntry {
                title: title.to_string(),
                file,
                added: Utc::now(),
                source_url: source_url.map(String::from),
            });
            self.write_metadata(&folder.path, &metadata)?;
        }
        Ok(path)
    }

    fn save_debug_artifact(
        &self,
        folder: &NovelFolder,
        index: u32,
        markup: &str,
    ) -> Result<PathBuf, StorageError> {
        let path = folder.path.join(format!("raw_chapter_{}.html", index));
        fs::write(&path, markup).map_err(io_err(&path))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn safe_name_replaces_runs_and_caps_length() {
        assert_eq!(safe_name("Vol. 1: Dawn/Dusk?"), "Vol. 1_ Dawn_Dusk_");
        assert_eq!(safe_name("a<>|b"), "a_b");
        assert_eq!(safe_name("   "), "untitled");
        assert_eq!(safe_name(".."), "untitled");
        assert_eq!(safe_name(&"x".repeat(500)).chars().count(), 200);
    }

    #[test]
    fn long_multibyte_titles_fit_the_file_name_limit() -> Result<(), Box<dyn Error>> {
        let title = "転".repeat(120);
        let name = safe_name(&title);
        assert!(name.len() <= MAX_NAME_BYTES);
        assert!(name.chars().all(|c| c == '転'));

        let dir = tempfile::tempdir()?;
        let store = NovelStore::new(dir.path());
        let folder = store.make_novel_folder(&title, None)?;
        let path = store.save_chapter(&folder, &title, "text", None, ChapterFormat::Markdown)?;
        assert!(path.is_file());
        let file_name = path.file_name().ok_or("no file name")?;
        assert!(file_name.len() <= 255);
        Ok(())
    }

    #[test]
    fn make_novel_folder_is_idempotent() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = NovelStore::new(dir.path());
        let a = store.make_novel_folder("My: Novel", None)?;
        let b = store.make_novel_folder("My: Novel", Some("https://example.com/n"))?;
        assert_eq!(a, b);
        assert_eq!(a.path(), dir.path().join("My_ Novel"));
        let metadata = store.load_metadata(a.path())?.ok_or("metadata missing")?;
        assert_eq!(metadata.title, "My: Novel");
        assert_eq!(metadata.source_url.as_deref(), Some("https://example.com/n"));
        Ok(())
    }

    #[test]
    fn duplicate_title_keeps_first_entry_but_overwrites_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = NovelStore::new(dir.path());
        let folder = store.make_novel_folder("Novel", None)?;
        let text = ChapterFormat::Text;
        let first = store.save_chapter(&folder, "Chapter 1", "first text", None, text)?;
        let second = store.save_chapter(&folder, "Chapter 1", "second text", None, text)?;
        assert_eq!(first, second);
        assert_eq!(fs::read_to_string(&second)?, "second text");
        let metadata = store.load_metadata(folder.path())?.ok_or("metadata missing")?;
        assert_eq!(metadata.chapters.len(), 1);
        assert_eq!(metadata.chapters[0].file, "Chapter 1.txt");
        Ok(())
    }

    #[test]
    fn normalized_match_treats_case_and_spacing_as_equal() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = NovelStore::new(dir.path()).with_title_match(TitleMatch::Normalized);
        let folder = store.make_novel_folder("Novel", None)?;
        store.save_chapter(&folder, "Chapter 1", "a", None, ChapterFormat::Text)?;
        store.save_chapter(&folder, "chapter   1", "b", None, ChapterFormat::Text)?;
        let metadata = store.load_metadata(folder.path())?.ok_or("metadata missing")?;
        assert_eq!(metadata.chapters.len(), 1);

        let exact = NovelStore::new(dir.path());
        exact.save_chapter(&folder, "CHAPTER 1", "c", None, ChapterFormat::Text)?;
        let metadata = exact.load_metadata(folder.path())?.ok_or("metadata missing")?;
        assert_eq!(metadata.chapters.len(), 2);
        Ok(())
    }

    #[test]
    fn markdown_format_adds_heading() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = NovelStore::new(dir.path());
        let folder = store.make_novel_folder("Novel", None)?;
        let path = store.save_chapter(
            &folder,
            "Prologue",
            "It began.\n",
            Some("https://example.com/p"),
            ChapterFormat::Markdown,
        )?;
        assert!(path.ends_with("Prologue.md"));
        assert_eq!(fs::read_to_string(&path)?, "# Prologue\n\nIt began.\n");
        let metadata = store.load_metadata(folder.path())?.ok_or("metadata missing")?;
        assert_eq!(
            metadata.chapters[0].source_url.as_deref(),
            Some("https://example.com/p")
        );
        Ok(())
    }

    #[test]
    fn metadata_json_has_expected_shape() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = NovelStore::new(dir.path());
        let folder = store.make_novel_folder("Shape", Some("https://example.com/s"))?;
        store.save_chapter(&folder, "One", "text", None, ChapterFormat::Text)?;
        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(folder.metadata_path())?)?;
        assert_eq!(value["title"], "Shape");
        assert_eq!(value["source_url"], "https://example.com/s");
        let chapter = &value["chapters"][0];
        assert_eq!(chapter["title"], "One");
        assert_eq!(chapter["file"], "One.txt");
        assert!(chapter["added"].is_string());
        assert!(chapter.get("source_url").is_none());
        Ok(())
    }

    #[test]
    fn list_chapters_follows_metadata_then_names() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = NovelStore::new(dir.path());
        let b = store.make_novel_folder("B novel", None)?;
        let a = store.make_novel_folder("A novel", None)?;
        store.save_chapter(&a, "Zeta", "z", None, ChapterFormat::Text)?;
        store.save_chapter(&a, "Alpha", "a", None, ChapterFormat::Text)?;
        fs::write(a.path().join("extra.txt"), "x")?;
        store.save_debug_artifact(&a, 3, "<html></html>")?;
        store.save_chapter(&b, "Only", "o", None, ChapterFormat::Markdown)?;

        let names: Vec<String> = store
            .list_chapters()?
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();
        assert_eq!(names, vec!["Zeta.txt", "Alpha.txt", "extra.txt", "Only.md"]);
        Ok(())
    }

    #[test]
    fn list_chapters_on_missing_base_is_empty() -> Result<(), StorageError> {
        let store = NovelStore::new("/nonexistent/novelfetch/base");
        assert!(store.list_chapters()?.is_empty());
        Ok(())
    }

    #[test]
    fn debug_artifact_is_named_by_index() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let store = NovelStore::new(dir.path());
        let folder = store.make_novel_folder("Novel", None)?;
        let path = store.save_debug_artifact(&folder, 7, "")?;
        assert!(path.ends_with("raw_chapter_7.html"));
        assert!(path.is_file());
        Ok(())
    }
}
