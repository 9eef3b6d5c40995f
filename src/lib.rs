//! novelfetch: download web novels chapter by chapter into a local archive and read them in
//! the terminal.

pub mod cli;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod logging;
pub mod model;
pub mod pipeline;
pub mod reader;
pub mod storage;
pub mod toc;

// Re-exports for CLI and consumers.
pub use fetch::{DirectClient, FetchError, Fetcher, PageFetcher, RenderConfig, Renderer};
pub use model::{ChapterRef, ExtractedChapter, FetchedPage, NovelSource, Strategy};
pub use pipeline::{
    download_novel, ChapterError, DownloadOptions, DownloadReport, PipelineError, ProgressEvent,
};
pub use reader::{read_chapter, BookmarkStore, ReaderError};
pub use storage::{ChapterFormat, NovelFolder, NovelStorage, NovelStore, StorageError, TitleMatch};
pub use toc::{resolve as resolve_toc, SiteAdapter, TocResolution, TocTier};
