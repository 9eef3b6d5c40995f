//! Download orchestration: index -> table of contents -> per-chapter fetch, extract, save.
//!
//! Only the index fetch and novel folder creation are fatal. Every chapter failure is
//! recorded in the [DownloadReport] and the loop moves on.

use crate::fetch::{FetchError, PageFetcher};
use crate::model::{ChapterRef, ExtractedChapter, NovelSource, Strategy};
use crate::storage::{ChapterFormat, NovelFolder, NovelStorage, StorageError};
use crate::toc::{self, TocTier};
use reqwest::Url;
use scraper::Html;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DELAY_SECS: u64 = 2;

/// Errors that abort a whole download.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid URL {input}: {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Could not fetch the index page: {0}")]
    IndexFetch(#[source] FetchError),

    #[error("Could not create the novel folder: {0}")]
    Storage(#[source] StorageError),
}

/// Why one chapter was not saved. Never aborts the run.
#[derive(Debug, Error)]
pub enum ChapterError {
    #[error("fetch failed: {0}")]
    Fetch(#[source] FetchError),

    #[error("no chapter text found ({strategy} markup)")]
    Parse { strategy: Strategy },

    #[error("save failed: {0}")]
    Save(#[source] StorageError),
}

/// Structured progress for whatever is presenting the run.
#[derive(Debug)]
pub enum ProgressEvent<'a> {
    TocResolved {
        novel: &'a str,
        tier: TocTier,
        total: usize,
    },
    Started {
        index: u32,
        url: &'a Url,
    },
    Fetched {
        index: u32,
        strategy: Strategy,
    },
    Extracted {
        index: u32,
        title: &'a str,
        too_short: bool,
    },
    Saved {
        index: u32,
        path: &'a std::path::Path,
    },
    Failed {
        index: u32,
        error: &'a ChapterError,
    },
}

/// Options for a download run.
pub struct DownloadOptions<'a> {
    /// Upper bound on chapters processed; None means all.
    pub max_chapters: Option<usize>,
    /// Pause before each chapter request.
    pub delay: Duration,
    pub format: ChapterFormat,
    pub progress: Option<&'a dyn Fn(&ProgressEvent<'_>)>,
    /// Checked before each chapter; an in-flight chapter always completes.
    pub cancel: Option<&'a AtomicBool>,
}

impl Default for DownloadOptions<'_> {
    fn default() -> Self {
        Self {
            max_chapters: None,
            delay: Duration::from_secs(DEFAULT_DELAY_SECS),
            format: ChapterFormat::default(),
            progress: None,
            cancel: None,
        }
    }
}

impl DownloadOptions<'_> {
    fn emit(&self, event: ProgressEvent<'_>) {
        if let Some(progress) = self.progress {
            progress(&event);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
pub enum ChapterStatus {
    Saved { path: PathBuf, too_short: bool },
    Failed(ChapterError),
}

#[derive(Debug)]
pub struct ChapterOutcome {
    pub chapter: ChapterRef,
    pub status: ChapterStatus,
}

/// What a completed (or cancelled) run did.
#[derive(Debug)]
pub struct DownloadReport {
    pub novel: NovelSource,
    pub folder: PathBuf,
    pub tier: TocTier,
    /// Chapters found in the table of contents, before `max_chapters`.
    pub total_chapters: usize,
    pub chapters: Vec<ChapterOutcome>,
    pub cancelled: bool,
}

impl DownloadReport {
    pub fn saved_count(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| matches!(c.status, ChapterStatus::Saved { .. }))
            .count()
    }

    pub fn failed_count(&self) -> usize {
        self.chapters.len() - self.saved_count()
    }

    pub fn too_short_count(&self) -> usize {
        self.chapters
            .iter()
            .filter(|c| matches!(c.status, ChapterStatus::Saved { too_short: true, .. }))
            .count()
    }
}

/// Download every chapter reachable from `url` into `storage`.
pub fn download_novel<F, S>(
    fetcher: &mut F,
    storage: &S,
    url: &str,
    options: &DownloadOptions<'_>,
) -> Result<DownloadReport, PipelineError>
where
    F: PageFetcher + ?Sized,
    S: NovelStorage + ?Sized,
{
    let index_url = parse_index_url(url)?;
    tracing::info!(url = %index_url, "fetching index page");
    let index_page = fetcher
        .fetch_index(index_url.as_str())
        .map_err(PipelineError::IndexFetch)?;
    let index_doc = Html::parse_document(&index_page.html);

    let novel = NovelSource::from_index(index_url, &index_doc);
    let folder = storage
        .make_novel_folder(novel.title(), Some(novel.index_url().as_str()))
        .map_err(PipelineError::Storage)?;

    let resolution = toc::resolve(&index_doc, novel.index_url());
    drop(index_doc);
    let total_chapters = resolution.links.len();
    tracing::info!(
        novel = novel.title(),
        tier = %resolution.tier,
        chapters = total_chapters,
        "table of contents resolved"
    );
    options.emit(ProgressEvent::TocResolved {
        novel: novel.title(),
        tier: resolution.tier,
        total: total_chapters,
    });

    let mut refs = resolution.chapter_refs();
    if let Some(max) = options.max_chapters {
        refs.truncate(max);
    }

    let mut chapters = Vec::with_capacity(refs.len());
    let mut cancelled = false;
    for mut chapter in refs {
        if options.is_cancelled() {
            tracing::warn!(next = chapter.index, "download cancelled");
            cancelled = true;
            break;
        }
        if !options.delay.is_zero() {
            std::thread::sleep(options.delay);
        }
        let status = match process_chapter(fetcher, storage, &folder, &mut chapter, options) {
            Ok((path, too_short)) => {
                options.emit(ProgressEvent::Saved {
                    index: chapter.index,
                    path: &path,
                });
                ChapterStatus::Saved { path, too_short }
            }
            Err(error) => {
                tracing::warn!(
                    index = chapter.index,
                    url = %chapter.url,
                    %error,
                    "chapter skipped"
                );
                options.emit(ProgressEvent::Failed {
                    index: chapter.index,
                    error: &error,
                });
                ChapterStatus::Failed(error)
            }
        };
        chapters.push(ChapterOutcome { chapter, status });
    }

    let report = DownloadReport {
        novel,
        folder: folder.path().to_path_buf(),
        tier: resolution.tier,
        total_chapters,
        chapters,
        cancelled,
    };
    tracing::info!(
        saved = report.saved_count(),
        failed = report.failed_count(),
        too_short = report.too_short_count(),
        cancelled = report.cancelled,
        "download finished"
    );
    Ok(report)
}

fn parse_index_url(input: &str) -> Result<Url, PipelineError> {
    let invalid = |reason: String| PipelineError::InvalidUrl {
        input: input.to_string(),
        reason,
    };
    let url = Url::parse(input.trim()).map_err(|e| invalid(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
    }
    if url.host_str().is_none() {
        return Err(invalid("URL has no host".to_string()));
    }
    Ok(url)
}

/// Fetch, extract, and save one chapter. Returns the saved path and the too-short flag.
fn process_chapter<F, S>(
    fetcher: &mut F,
    storage: &S,
    folder: &NovelFolder,
    chapter: &mut ChapterRef,
    options: &DownloadOptions<'_>,
) -> Result<(PathBuf, bool), ChapterError>
where
    F: PageFetcher + ?Sized,
    S: NovelStorage + ?Sized,
{
    options.emit(ProgressEvent::Started {
        index: chapter.index,
        url: &chapter.url,
    });
    let page = match fetcher.fetch(chapter.url.as_str()) {
        Ok(page) => page,
        Err(e) => {
            let note = format!("<!-- fetch failed for {}: {} -->\n", chapter.url, e);
            keep_artifact(storage, folder, chapter.index, &note);
            return Err(ChapterError::Fetch(e));
        }
    };
    options.emit(ProgressEvent::Fetched {
        index: chapter.index,
        strategy: page.strategy,
    });

    let extracted = {
        let document = Html::parse_document(&page.html);
        ExtractedChapter::from_document(&document, chapter.index)
    };
    let Some(extracted) = extracted else {
        keep_artifact(storage, folder, chapter.index, &page.html);
        return Err(ChapterError::Parse {
            strategy: page.strategy,
        });
    };
    let too_short = extracted.is_too_short();
    if too_short {
        tracing::warn!(
            index = chapter.index,
            chars = extracted.text.chars().count(),
            "chapter text is suspiciously short"
        );
        keep_artifact(storage, folder, chapter.index, &page.html);
    }
    options.emit(ProgressEvent::Extracted {
        index: chapter.index,
        title: &extracted.title,
        too_short,
    });
    chapter.title = Some(extracted.title.clone());

    let path = storage
        .save_chapter(
            folder,
            &extracted.title,
            &extracted.text,
            Some(chapter.url.as_str()),
            options.format,
        )
        .map_err(|e| {
            keep_artifact(storage, folder, chapter.index, &page.html);
            ChapterError::Save(e)
        })?;
    Ok((path, too_short))
}

fn keep_artifact<S: NovelStorage + ?Sized>(
    storage: &S,
    folder: &NovelFolder,
    index: u32,
    markup: &str,
) {
    match storage.save_debug_artifact(folder, index, markup) {
        Ok(path) => tracing::debug!(path = %path.display(), "wrote debug artifact"),
        Err(e) => tracing::warn!(index, error = %e, "could not write debug artifact"),
    }
}
