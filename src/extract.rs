//! Main-content extraction for chapter pages whose layout is not known in advance.
//!
//! Every function here is pure over a parsed [Html] so it can be exercised with fixture markup.
//! Extraction degrades in stages: hinted containers, then any large text block, then
//! paragraph text, then the whole page.

use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

/// Class/id substrings that usually mark the chapter body. Compared lowercase.
const CONTENT_HINTS: &[&str] = &[
    "chapter-content",
    "chapter-body",
    "entry-content",
    "post-content",
    "reading-content",
    "text-left",
    "reader-content",
    "chaptertext",
    "novel-body",
];

/// Lines containing any of these (lowercase) are navigation or site chrome.
const BOILERPLATE_MARKERS: &[&str] = &[
    "support us",
    "bookmark",
    "previous",
    "next",
    "table of contents",
    "loading",
];

/// Unhinted blocks need more than this many words to count as content.
const MIN_BLOCK_WORDS: usize = 100;

/// Paragraphs at or under this many characters are skipped by the paragraph fallback.
const MIN_PARAGRAPH_CHARS: usize = 20;

/// Containers scanned when no hinted candidate exists.
const BLOCK_CONTAINERS: &str = "div, article, section, main";

/// Headings tried for the chapter title, most prominent first.
const TITLE_HEADINGS: &[&str] = &["h1", "h2", "h3"];

/// Elements whose text is never readable content.
const NON_CONTENT_TAGS: &[&str] = &["script", "style", "noscript", "template"];

/// Parse a CSS selector, logging instead of panicking if it is rejected.
fn selector(sel: &str) -> Option<Selector> {
    match Selector::parse(sel) {
        Ok(s) => Some(s),
        Err(e) => {
            tracing::error!(selector = sel, error = %e, "invalid selector");
            None
        }
    }
}

/// True when the element's class or id contains one of `hints` (case insensitive).
pub(crate) fn attr_matches_any(element: &ElementRef<'_>, hints: &[&str]) -> bool {
    let value = element.value();
    [value.attr("class"), value.attr("id")]
        .into_iter()
        .flatten()
        .map(str::to_lowercase)
        .any(|attr| hints.iter().any(|hint| attr.contains(hint)))
}

/// Text of an element with one newline between text nodes, skipping script and style bodies.
pub(crate) fn block_text(element: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| NON_CONTENT_TAGS.contains(&a.value().name()));
        if !hidden {
            parts.push(text);
        }
    }
    parts.join("\n").trim().to_string()
}

/// Candidate blocks in document order: hinted containers, or failing that any large block.
fn candidates(document: &Html) -> Vec<ElementRef<'_>> {
    let Some(all) = selector("*") else {
        return Vec::new();
    };
    let hinted: Vec<_> = document
        .select(&all)
        .filter(|el| attr_matches_any(el, CONTENT_HINTS))
        .collect();
    if !hinted.is_empty() {
        return hinted;
    }
    let Some(blocks) = selector(BLOCK_CONTAINERS) else {
        return Vec::new();
    };
    document
        .select(&blocks)
        .filter(|el| block_text(*el).split_whitespace().count() > MIN_BLOCK_WORDS)
        .collect()
}

/// Longest candidate text; the first one wins on equal length.
fn best_block(candidates: &[ElementRef<'_>]) -> String {
    let mut best = String::new();
    let mut best_len = 0;
    for el in candidates {
        let text = block_text(*el);
        let len = text.chars().count();
        if len > best_len {
            best_len = len;
            best = text;
        }
    }
    best
}

/// Drop blank lines and site chrome, then rejoin as blank-line separated paragraphs.
pub fn clean_block(block: &str) -> String {
    block
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lower = line.to_lowercase();
            !BOILERPLATE_MARKERS.iter().any(|m| lower.contains(m))
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn paragraph_text(document: &Html) -> String {
    let Some(p) = selector("p") else {
        return String::new();
    };
    document
        .select(&p)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| t.chars().count() > MIN_PARAGRAPH_CHARS)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Most likely main-content text of a page. May be empty when the page has no text at all.
pub fn extract_text(document: &Html) -> String {
    let best = best_block(&candidates(document));
    if !best.is_empty() {
        let cleaned = clean_block(&best);
        if !cleaned.is_empty() {
            return cleaned;
        }
        tracing::debug!("best content block was all boilerplate; falling back to paragraphs");
    }

    let paragraphs = paragraph_text(document);
    if !paragraphs.is_empty() {
        return paragraphs;
    }

    block_text(document.root_element())
}

/// First non-empty `h1`, then `h2`, then `h3`.
pub fn guess_chapter_title(document: &Html) -> Option<String> {
    TITLE_HEADINGS.iter().find_map(|tag| {
        let sel = selector(tag)?;
        document
            .select(&sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

/// Novel display title: `og:title`, then `<title>`, then the URL host, then "novel".
pub fn guess_novel_title(document: &Html, url: &Url) -> String {
    selector("meta[property=\"og:title\"]")
        .and_then(|og| {
            document
                .select(&og)
                .next()
                .and_then(|el| el.value().attr("content"))
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .or_else(|| {
            let title = selector("title")?;
            document
                .select(&title)
                .next()
                .map(|el| el.text().collect::<String>().trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .or_else(|| url.host_str().map(String::from))
        .unwrap_or_else(|| "novel".to_string())
}
