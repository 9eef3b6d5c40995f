//! Terminal pager for saved chapters, with per-file bookmarks.
//!
//! The pager is generic over its input and output so it can be driven by scripted input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_LINES_PER_PAGE: usize = 20;
pub const BOOKMARKS_FILE: &str = "bookmarks.json";
const PROMPT: &str = "[Enter] next page, (q)uit: ";

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Chapter file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid bookmarks file {}: {source}", path.display())]
    Bookmarks {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Terminal I/O failed: {0}")]
    Terminal(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bookmark {
    /// Zero-based line where reading resumes.
    pub line: usize,
    pub updated: DateTime<Utc>,
}

/// Reading positions keyed by chapter path, persisted as JSON.
#[derive(Debug)]
pub struct BookmarkStore {
    path: PathBuf,
    marks: BTreeMap<String, Bookmark>,
}

impl BookmarkStore {
    /// Load from `path`; a missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, ReaderError> {
        let path = path.into();
        let marks = match fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|source| ReaderError::Bookmarks {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(source) => return Err(ReaderError::Io { path, source }),
        };
        Ok(Self { path, marks })
    }

    /// The store kept in `output_dir`.
    pub fn in_dir(output_dir: &Path) -> Result<Self, ReaderError> {
        Self::load(output_dir.join(BOOKMARKS_FILE))
    }

    fn key(chapter: &Path) -> String {
        chapter.to_string_lossy().into_owned()
    }

    pub fn get(&self, chapter: &Path) -> Option<usize> {
        self.marks.get(&Self::key(chapter)).map(|b| b.line)
    }

    pub fn set(&mut self, chapter: &Path, line: usize) {
        self.marks.insert(
            Self::key(chapter),
            Bookmark {
                line,
                updated: Utc::now(),
            },
        );
    }

    pub fn clear(&mut self, chapter: &Path) {
        self.marks.remove(&Self::key(chapter));
    }

    pub fn save(&self) -> Result<(), ReaderError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| ReaderError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }
        let json = serde_json::to_string_pretty(&self.marks).map_err(|source| {
            ReaderError::Bookmarks {
                path: self.path.clone(),
                source,
            }
        })?;
        fs::write(&self.path, json).map_err(|source| ReaderError::Io {
            path: self.path.clone(),
            source,
        })
    }
}

/// How a reading session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Finished,
    /// Quit before the end; `line` is where the next session resumes.
    Quit { line: usize },
}

/// Page through `chapter`, `lines_per_page` lines at a time.
///
/// Starts at the bookmarked line when there is one. Quitting (or end of input) records the
/// position; reading to the end clears it. The caller saves the store.
pub fn read_chapter<R: BufRead, W: Write>(
    chapter: &Path,
    lines_per_page: usize,
    bookmarks: &mut BookmarkStore,
    input: &mut R,
    output: &mut W,
) -> Result<ReadOutcome, ReaderError> {
    if !chapter.is_file() {
        return Err(ReaderError::NotFound {
            path: chapter.to_path_buf(),
        });
    }
    let text = fs::read_to_string(chapter).map_err(|source| ReaderError::Io {
        path: chapter.to_path_buf(),
        source,
    })?;
    let lines: Vec<&str> = text.lines().collect();
    let per_page = lines_per_page.max(1);

    let mut pos = match bookmarks.get(chapter) {
        Some(line) if line > 0 && line < lines.len() => {
            writeln!(output, "(resuming at line {})", line + 1)?;
            line
        }
        _ => 0,
    };

    while pos < lines.len() {
        let end = (pos + per_page).min(lines.len());
        for line in &lines[pos..end] {
            writeln!(output, "{}", line)?;
        }
        pos = end;
        if pos >= lines.len() {
            break;
        }
        write!(output, "{}", PROMPT)?;
        output.flush()?;
        let mut answer = String::new();
        let read = input.read_line(&mut answer)?;
        if read == 0 || answer.trim().eq_ignore_ascii_case("q") {
            bookmarks.set(chapter, pos);
            tracing::debug!(chapter = %chapter.display(), line = pos, "bookmarked");
            return Ok(ReadOutcome::Quit { line: pos });
        }
    }
    bookmarks.clear(chapter);
    Ok(ReadOutcome::Finished)
}
