//! Table-of-contents resolution. Turns a parsed index page into ordered chapter URLs.
//!
//! Tiers are tried in order and the first one that yields links wins; results are never
//! merged across tiers:
//! 1. a site adapter when the host matches one ([SiteAdapter]),
//! 2. anchors inside containers whose class/id looks like a chapter list,
//! 3. a scan of every anchor for chapter-like URLs, ordered numerically,
//! 4. otherwise the index page itself is the only chapter.

mod adapters;

pub use adapters::SiteAdapter;

use crate::extract::attr_matches_any;
use crate::model::ChapterRef;
use regex::Regex;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

/// Class/id substrings of chapter-list containers, tried one hint at a time in this order.
const TOC_HINTS: &[&str] = &[
    "chapter-list",
    "chapter-listing",
    "chapter-list-wrap",
    "chapters",
    "chapter",
    "toc",
    "table-of-contents",
    "chapter__list",
    "list-chapters",
    "chapter-row",
];

/// Which tier produced the chapter list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TocTier {
    Adapter(SiteAdapter),
    HintContainer,
    AnchorScan,
    /// Nothing found; the index page is treated as a single chapter.
    SinglePage,
}

impl fmt::Display for TocTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TocTier::Adapter(adapter) => write!(f, "{} adapter", adapter.name()),
            TocTier::HintContainer => f.write_str("chapter-list container"),
            TocTier::AnchorScan => f.write_str("anchor scan"),
            TocTier::SinglePage => f.write_str("single page"),
        }
    }
}

/// Ordered, deduplicated chapter URLs and the tier they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocResolution {
    pub tier: TocTier,
    pub links: Vec<Url>,
}

impl TocResolution {
    /// 1-based chapter refs in resolved order.
    pub fn chapter_refs(&self) -> Vec<ChapterRef> {
        self.links
            .iter()
            .zip(1u32..)
            .map(|(url, index)| ChapterRef::new(index, url.clone()))
            .collect()
    }
}

/// Resolve the chapter list of an index page. Never empty: falls back to `base` itself.
pub fn resolve(document: &Html, base: &Url) -> TocResolution {
    if let Some(adapter) = SiteAdapter::for_url(base) {
        let links = adapter.chapter_links(document, base);
        if !links.is_empty() {
            return TocResolution {
                tier: TocTier::Adapter(adapter),
                links,
            };
        }
        tracing::debug!(
            adapter = adapter.name(),
            "adapter found no chapters; trying generic heuristics"
        );
    }

    let links = hint_container_links(document, base);
    if !links.is_empty() {
        return TocResolution {
            tier: TocTier::HintContainer,
            links,
        };
    }

    let links = anchor_scan_links(document, base);
    if !links.is_empty() {
        return TocResolution {
            tier: TocTier::AnchorScan,
            links,
        };
    }

    TocResolution {
        tier: TocTier::SinglePage,
        links: vec![base.clone()],
    }
}

/// Resolve an href against `base`, ignoring fragment-only, script and mail links.
pub(crate) fn absolutize(base: &Url, href: &str) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("mailto:") {
        return None;
    }
    base.join(href).ok()
}

/// Drop repeated URLs, keeping the first occurrence in place.
pub fn dedupe_preserve_order(links: Vec<Url>) -> Vec<Url> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|u| seen.insert(u.as_str().to_string()))
        .collect()
}

/// Dedupe, then stable-sort by the chapter number found in each URL.
pub fn dedupe_and_sort(links: Vec<Url>) -> Vec<Url> {
    let mut links = dedupe_preserve_order(links);
    links.sort_by(|a, b| chapter_sort_key(a).cmp(&chapter_sort_key(b)));
    links
}

/// Ordering key for a chapter URL. Numeric keys sort before lexical ones.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChapterKey {
    Numeric(u64),
    Lexical(String),
}

impl Ord for ChapterKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ChapterKey::Numeric(a), ChapterKey::Numeric(b)) => a.cmp(b),
            (ChapterKey::Numeric(_), ChapterKey::Lexical(_)) => Ordering::Less,
            (ChapterKey::Lexical(_), ChapterKey::Numeric(_)) => Ordering::Greater,
            (ChapterKey::Lexical(a), ChapterKey::Lexical(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for ChapterKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn chapter_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)chapter[-_/]?(\d+)").expect("Invalid regex")
    })
}

fn digits_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+").expect("Invalid regex"))
}

fn chapter_href_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)/chapters?/|chapter[-_]?\d+").expect("Invalid regex")
    })
}

fn trailing_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/\d{1,6}/?$").expect("Invalid regex"))
}

/// Key from the URL's path and query: digits after "chapter", else the last digit run,
/// else the path text itself. The host is ignored so ports and domains never count.
pub fn chapter_sort_key(url: &Url) -> ChapterKey {
    let tail = match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    };
    let numeric = chapter_marker_re()
        .captures(&tail)
        .and_then(|c| c.get(1))
        .or_else(|| digits_re().find_iter(&tail).last())
        .and_then(|m| m.as_str().parse::<u64>().ok());
    match numeric {
        Some(n) => ChapterKey::Numeric(n),
        None => ChapterKey::Lexical(url.as_str().to_string()),
    }
}

fn anchors_within<'a>(container: ElementRef<'a>, anchor: &Selector) -> Vec<ElementRef<'a>> {
    container.select(anchor).collect()
}

/// Tier 2: anchors inside containers whose class/id contains a TOC hint.
fn hint_container_links(document: &Html, base: &Url) -> Vec<Url> {
    let (Ok(all), Ok(anchor)) = (Selector::parse("*"), Selector::parse("a[href]")) else {
        return Vec::new();
    };
    for &hint in TOC_HINTS {
        let links: Vec<Url> = document
            .select(&all)
            .filter(|el| attr_matches_any(el, &[hint]))
            .flat_map(|container| anchors_within(container, &anchor))
            .filter_map(|a| a.value().attr("href"))
            .filter_map(|href| absolutize(base, href))
            .collect();
        if !links.is_empty() {
            tracing::debug!(hint, count = links.len(), "chapter links from hinted container");
            return dedupe_preserve_order(links);
        }
    }
    Vec::new()
}

/// Whether an anchor looks like a link to a chapter.
fn is_chapter_anchor(href: &str, text: &str) -> bool {
    chapter_href_re().is_match(href)
        || text.to_lowercase().contains("chapter")
        || trailing_number_re().is_match(href)
}

/// Tier 3: every anchor whose href or text looks like a chapter, numerically ordered.
fn anchor_scan_links(document: &Html, base: &Url) -> Vec<Url> {
    let Ok(anchor) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let links: Vec<Url> = document
        .select(&anchor)
        .filter_map(|a| {
            let href = a.value().attr("href")?.trim();
            let text = a.text().collect::<String>();
            if is_chapter_anchor(href, &text) {
                absolutize(base, href)
            } else {
                None
            }
        })
        .collect();
    dedupe_and_sort(links)
}
