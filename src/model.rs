//! Data model shared by the fetcher, resolver, extractor, and pipeline.
//!
//! Everything here except [NovelSource] is per-chapter and transient: it lives from fetch
//! until the storage hand-off and is never retained afterwards.

use reqwest::Url;
use scraper::Html;
use std::fmt;

use crate::extract;

/// Extracted text shorter than this (in characters) is saved but flagged.
pub const MIN_CONTENT_CHARS: usize = 100;

/// The novel being downloaded: its index URL and a display title derived once from the index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NovelSource {
    index_url: Url,
    title: String,
}

impl NovelSource {
    /// Derive the title from `og:title`, then `<title>`, then the hostname.
    pub fn from_index(index_url: Url, document: &Html) -> Self {
        let title = extract::guess_novel_title(document, &index_url);
        Self { index_url, title }
    }

    pub fn index_url(&self) -> &Url {
        &self.index_url
    }

    pub fn title(&self) -> &str {
        &self.title
    }
}

/// One entry of a resolved table of contents. Identity is the URL.
#[derive(Debug, Clone)]
pub struct ChapterRef {
    /// 1-based position in resolver order.
    pub index: u32,
    pub url: Url,
    /// Unknown at resolution time; filled in from the chapter page.
    pub title: Option<String>,
}

impl ChapterRef {
    pub fn new(index: u32, url: Url) -> Self {
        Self {
            index,
            url,
            title: None,
        }
    }
}

impl PartialEq for ChapterRef {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

impl Eq for ChapterRef {}

/// Which retrieval path produced a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Direct,
    Rendered,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Direct => f.write_str("direct"),
            Strategy::Rendered => f.write_str("rendered"),
        }
    }
}

/// Raw markup for one URL. `html` is never empty.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub html: String,
    pub strategy: Strategy,
}

/// Whether the extracted text looks like a full chapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionQuality {
    Full,
    /// Non-empty but under [MIN_CONTENT_CHARS]; still saved, reported separately.
    TooShort,
}

/// Title and cleaned text pulled from one chapter page.
#[derive(Debug, Clone)]
pub struct ExtractedChapter {
    pub title: String,
    pub text: String,
    pub quality: ExtractionQuality,
}

impl ExtractedChapter {
    /// Run the extractor over a parsed chapter page. Returns None when no text at all was found.
    pub fn from_document(document: &Html, index: u32) -> Option<Self> {
        let text = extract::extract_text(document);
        if text.trim().is_empty() {
            return None;
        }
        let title = extract::guess_chapter_title(document)
            .unwrap_or_else(|| format!("Chapter {}", index));
        let quality = if text.chars().count() < MIN_CONTENT_CHARS {
            ExtractionQuality::TooShort
        } else {
            ExtractionQuality::Full
        };
        Some(Self {
            title,
            text,
            quality,
        })
    }

    pub fn is_too_short(&self) -> bool {
        self.quality == ExtractionQuality::TooShort
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chapter_ref_identity_is_url() -> Result<(), url::ParseError> {
        let url = Url::parse("https://example.com/novel/chapter-1")?;
        let a = ChapterRef::new(1, url.clone());
        let mut b = ChapterRef::new(7, url);
        b.title = Some("Prologue".to_string());
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn short_extraction_is_flagged() {
        let doc = Html::parse_document(
            "<html><body><h2>Interlude</h2><div class=\"chapter-content\"><p>Just a teaser.</p></div></body></html>",
        );
        let chapter = ExtractedChapter::from_document(&doc, 4).expect("some text");
        assert_eq!(chapter.title, "Interlude");
        assert!(chapter.is_too_short());
    }

    #[test]
    fn full_extraction_is_not_flagged() {
        let body = "The rain had not stopped for three days, and the river was rising. ".repeat(4);
        let html = format!(
            "<html><body><div class=\"entry-content\"><p>{}</p></div></body></html>",
            body
        );
        let doc = Html::parse_document(&html);
        let chapter = ExtractedChapter::from_document(&doc, 2).expect("some text");
        assert_eq!(chapter.title, "Chapter 2");
        assert_eq!(chapter.quality, ExtractionQuality::Full);
    }

    #[test]
    fn novel_title_prefers_og_title() -> Result<(), url::ParseError> {
        let doc = Html::parse_document(
            r#"<html><head><meta property="og:title" content=" The Long Road "><title>Ignored</title></head></html>"#,
        );
        let novel = NovelSource::from_index(Url::parse("https://fic.example.org/n/1")?, &doc);
        assert_eq!(novel.title(), "The Long Road");
        Ok(())
    }
}
