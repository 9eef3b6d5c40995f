//! Site adapters: known chapter-list layouts that take priority over the generic heuristics.
//!
//! The set is closed. Adding a site means adding a variant, its host marker, and its parser.

use super::{absolutize, dedupe_and_sort, dedupe_preserve_order};
use reqwest::Url;
use scraper::{Html, Selector};
use serde::Deserialize;

/// A site whose table of contents is parsed with site-specific rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteAdapter {
    RoyalRoad,
    ScribbleHub,
    NovelLight,
}

impl SiteAdapter {
    pub const ALL: [SiteAdapter; 3] = [
        SiteAdapter::RoyalRoad,
        SiteAdapter::ScribbleHub,
        SiteAdapter::NovelLight,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SiteAdapter::RoyalRoad => "royalroad",
            SiteAdapter::ScribbleHub => "scribblehub",
            SiteAdapter::NovelLight => "novelight",
        }
    }

    /// Substring of the host that selects this adapter.
    fn host_marker(self) -> &'static str {
        match self {
            SiteAdapter::RoyalRoad => "royalroad.com",
            SiteAdapter::ScribbleHub => "scribblehub.com",
            SiteAdapter::NovelLight => "novelight",
        }
    }

    /// First adapter whose marker occurs in the URL's host.
    pub fn for_url(url: &Url) -> Option<Self> {
        let host = url.host_str()?.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|adapter| host.contains(adapter.host_marker()))
    }

    /// Ordered chapter URLs from the index page, or empty when the layout is not recognised.
    pub fn chapter_links(self, document: &Html, base: &Url) -> Vec<Url> {
        match self {
            SiteAdapter::RoyalRoad => royalroad_links(document, base),
            SiteAdapter::ScribbleHub => scribblehub_links(document, base),
            SiteAdapter::NovelLight => novelight_links(document, base),
        }
    }
}

fn select_hrefs(document: &Html, base: &Url, sel: &str) -> Vec<Url> {
    let Ok(selector) = Selector::parse(sel) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| absolutize(base, href))
        .collect()
}

/// One entry of Royal Road's inline `window.chapters` array.
#[derive(Debug, Deserialize)]
struct WindowChapter {
    url: String,
    #[serde(default)]
    order: u32,
}

/// Royal Road: the `window.chapters` script array (by `order`), else the `#chapters` table.
fn royalroad_links(document: &Html, base: &Url) -> Vec<Url> {
    let Ok(script_sel) = Selector::parse("script") else {
        return Vec::new();
    };
    for script in document.select(&script_sel) {
        let source = script.text().collect::<String>();
        if let Some(mut chapters) = parse_window_chapters(&source) {
            chapters.sort_by_key(|c| c.order);
            let links: Vec<Url> = chapters
                .iter()
                .filter_map(|c| absolutize(base, &c.url))
                .collect();
            if !links.is_empty() {
                return dedupe_preserve_order(links);
            }
        }
    }
    dedupe_preserve_order(select_hrefs(document, base, "#chapters a[href]"))
}

fn parse_window_chapters(source: &str) -> Option<Vec<WindowChapter>> {
    let needle = "window.chapters = ";
    let start = source.find(needle)? + needle.len();
    let array = extract_json_array(&source[start..])?;
    match serde_json::from_str(array) {
        Ok(chapters) => Some(chapters),
        Err(e) => {
            tracing::debug!(error = %e, "window.chapters is not valid JSON");
            None
        }
    }
}

/// Slice from the first '[' to its matching ']', skipping brackets inside JSON strings.
fn extract_json_array(s: &str) -> Option<&str> {
    let start = s.find('[')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;
    for (offset, c) in s[start..].char_indices() {
        if in_string {
            if escape {
                escape = false;
            } else if c == '\\' {
                escape = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[start..start + offset + 1]);
                }
            }
            '"' => in_string = true,
            _ => {}
        }
    }
    None
}

/// Scribble Hub: `ol.toc_ol li.toc_w a.toc_a`, ordered by each item's `order` attribute
/// (the page lists newest first).
fn scribblehub_links(document: &Html, base: &Url) -> Vec<Url> {
    let (Ok(li_sel), Ok(a_sel)) = (
        Selector::parse("ol.toc_ol li.toc_w"),
        Selector::parse("a.toc_a[href]"),
    ) else {
        return Vec::new();
    };
    let mut entries: Vec<(u32, Url)> = document
        .select(&li_sel)
        .filter_map(|li| {
            let order = li
                .value()
                .attr("order")
                .and_then(|s| s.trim().parse::<u32>().ok())
                .unwrap_or(0);
            let href = li.select(&a_sel).next()?.value().attr("href")?;
            Some((order, absolutize(base, href)?))
        })
        .collect();
    entries.sort_by_key(|(order, _)| *order);
    dedupe_preserve_order(entries.into_iter().map(|(_, url)| url).collect())
}

/// NovelLight: anchors in `div.chapter-list`, or `div.list-chapter`, numerically ordered.
fn novelight_links(document: &Html, base: &Url) -> Vec<Url> {
    for container in ["div.chapter-list a[href]", "div.list-chapter a[href]"] {
        let links = select_hrefs(document, base, container);
        if !links.is_empty() {
            return dedupe_and_sort(links);
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::super::{resolve, TocTier};
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).expect("valid url")
    }

    fn paths(links: &[Url]) -> Vec<&str> {
        links.iter().map(|u| u.path()).collect()
    }

    #[test]
    fn adapter_selected_by_host_substring() {
        assert_eq!(
            SiteAdapter::for_url(&url("https://www.royalroad.com/fiction/1/x")),
            Some(SiteAdapter::RoyalRoad)
        );
        assert_eq!(
            SiteAdapter::for_url(&url("https://www.ScribbleHub.com/series/1/x/")),
            Some(SiteAdapter::ScribbleHub)
        );
        assert_eq!(
            SiteAdapter::for_url(&url("https://novelight.net/book/abc")),
            Some(SiteAdapter::NovelLight)
        );
        assert_eq!(SiteAdapter::for_url(&url("https://example.com/x")), None);
    }

    #[test]
    fn royalroad_reads_window_chapters_in_order() {
        let html = r#"<html><body><script>
window.chapters = [{"id":2,"title":"Two [part]","url":"/fiction/1/s/chapter/2/two","order":1},{"id":1,"title":"One","url":"/fiction/1/s/chapter/1/one","order":0}];
window.something = 1;
</script></body></html>"#;
        let doc = Html::parse_document(html);
        let links = royalroad_links(&doc, &url("https://www.royalroad.com/fiction/1/s"));
        assert_eq!(
            paths(&links),
            vec!["/fiction/1/s/chapter/1/one", "/fiction/1/s/chapter/2/two"]
        );
    }

    #[test]
    fn royalroad_falls_back_to_chapter_table() {
        let html = r#"<html><body><table id="chapters"><tbody>
<tr><td><a href="/fiction/1/s/chapter/10/a">A</a></td></tr>
<tr><td><a href="/fiction/1/s/chapter/11/b">B</a></td></tr>
</tbody></table></body></html>"#;
        let doc = Html::parse_document(html);
        let links = royalroad_links(&doc, &url("https://www.royalroad.com/fiction/1/s"));
        assert_eq!(links.len(), 2);
        assert!(links[0].path().ends_with("/10/a"));
    }

    #[test]
    fn scribblehub_sorts_by_order_attribute() {
        let html = r#"<html><body><ol class="toc_ol">
<li class="toc_w" order="3"><a class="toc_a" href="https://www.scribblehub.com/read/1-s/chapter/30/">Three</a></li>
<li class="toc_w" order="2"><a class="toc_a" href="https://www.scribblehub.com/read/1-s/chapter/20/">Two</a></li>
<li class="toc_w" order="1"><a class="toc_a" href="https://www.scribblehub.com/read/1-s/chapter/10/">One</a></li>
</ol></body></html>"#;
        let doc = Html::parse_document(html);
        let links = scribblehub_links(&doc, &url("https://www.scribblehub.com/series/1/s/"));
        assert_eq!(
            paths(&links),
            vec![
                "/read/1-s/chapter/10/",
                "/read/1-s/chapter/20/",
                "/read/1-s/chapter/30/"
            ]
        );
    }

    #[test]
    fn novelight_uses_list_chapter_fallback() {
        let html = r#"<html><body><div class="list-chapter">
<a href="/book/x/chapter-3">3</a><a href="/book/x/chapter-1">1</a>
</div></body></html>"#;
        let doc = Html::parse_document(html);
        let links = novelight_links(&doc, &url("https://novelight.net/book/x"));
        assert_eq!(paths(&links), vec!["/book/x/chapter-1", "/book/x/chapter-3"]);
    }

    #[test]
    fn adapter_output_beats_generic_heuristics() {
        // The generic tiers would pick the sidebar list; the adapter picks the real TOC.
        let html = r#"<html><body>
<div class="chapter-list-wrap"><a href="/popular/chapter-1">Popular 1</a></div>
<ol class="toc_ol">
<li class="toc_w" order="1"><a class="toc_a" href="/read/9-s/chapter/100/">One</a></li>
</ol>
</body></html>"#;
        let doc = Html::parse_document(html);
        let resolution = resolve(&doc, &url("https://www.scribblehub.com/series/9/s/"));
        assert_eq!(resolution.tier, TocTier::Adapter(SiteAdapter::ScribbleHub));
        assert_eq!(paths(&resolution.links), vec!["/read/9-s/chapter/100/"]);
    }

    #[test]
    fn empty_adapter_result_falls_through_to_heuristics() {
        let html = r#"<html><body><ul class="chapter-list"><a href="/fiction/1/s/chapter/5/x">Five</a></ul></body></html>"#;
        let doc = Html::parse_document(html);
        let resolution = resolve(&doc, &url("https://www.royalroad.com/fiction/1/s"));
        assert_eq!(resolution.tier, TocTier::HintContainer);
        assert_eq!(resolution.links.len(), 1);
    }

    #[test]
    fn extract_json_array_skips_brackets_in_strings() {
        let s = r#"garbage [{"t":"a]b"},[1,2]] trailing"#;
        assert_eq!(extract_json_array(s), Some(r#"[{"t":"a]b"},[1,2]]"#));
        assert_eq!(extract_json_array("no array"), None);
    }
}
