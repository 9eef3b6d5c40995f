//! Page retrieval. Direct HTTP first; escalate to a rendered fetch when the direct result
//! looks like a client-side shell.

mod client;
mod error;
mod render;

pub use client::{DirectClient, DirectClientBuilder, DEFAULT_TIMEOUT_SECS, DEFAULT_USER_AGENTS};
pub use error::FetchError;
pub use render::{
    RenderConfig, Renderer, DEFAULT_NAVIGATION_TIMEOUT_SECS, DEFAULT_SETTLE_SECS,
};

use crate::model::FetchedPage;
use std::fmt;

/// Outcome of retrieving one URL.
pub type FetchResult = Result<FetchedPage, FetchError>;

/// Direct bodies shorter than this (in characters) are treated as unfinished.
pub const MIN_DIRECT_CHARS: usize = 400;

/// Substrings (lowercase) that mark a page still waiting on client-side scripts.
pub const STALL_MARKERS: &[&str] = &["loading", "subscribe", "table of contents"];

/// Why a direct result was not trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EscalationReason {
    Failed,
    Empty,
    TooSmall(usize),
    StallMarker(&'static str),
}

impl fmt::Display for EscalationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationReason::Failed => f.write_str("direct fetch failed"),
            EscalationReason::Empty => f.write_str("direct fetch was empty"),
            EscalationReason::TooSmall(n) => write!(f, "direct fetch was only {} chars", n),
            EscalationReason::StallMarker(m) => write!(f, "page contains {:?}", m),
        }
    }
}

/// Decide whether a direct result needs the rendered strategy. None means it is usable.
pub fn escalation_reason(direct: &FetchResult) -> Option<EscalationReason> {
    let page = match direct {
        Ok(page) => page,
        Err(_) => return Some(EscalationReason::Failed),
    };
    if page.html.trim().is_empty() {
        return Some(EscalationReason::Empty);
    }
    let chars = page.html.chars().count();
    if chars < MIN_DIRECT_CHARS {
        return Some(EscalationReason::TooSmall(chars));
    }
    let lower = page.html.to_lowercase();
    STALL_MARKERS
        .iter()
        .find(|m| lower.contains(*m))
        .map(|m| EscalationReason::StallMarker(*m))
}

/// The two retrieval strategies, with escalation layered on top.
///
/// The pipeline only talks to this trait, so tests can substitute scripted fetchers.
pub trait PageFetcher {
    fn fetch_direct(&mut self, url: &str) -> FetchResult;

    fn fetch_rendered(&mut self, url: &str) -> FetchResult;

    /// False when no renderer is available; escalation is then skipped.
    fn can_render(&self) -> bool {
        true
    }

    /// Direct fetch, escalating to rendering when [escalation_reason] says so. If rendering
    /// also fails, usable direct markup is returned rather than nothing.
    fn fetch(&mut self, url: &str) -> FetchResult {
        let direct = self.fetch_direct(url);
        let Some(reason) = escalation_reason(&direct) else {
            return direct;
        };
        if !self.can_render() {
            tracing::debug!(url, %reason, "page looks incomplete but rendering is disabled");
            return direct;
        }
        tracing::info!(url, %reason, "page looks incomplete, trying the renderer");
        match self.fetch_rendered(url) {
            Ok(page) => Ok(page),
            Err(render_err) => match direct {
                Ok(page) => {
                    tracing::warn!(
                        url,
                        error = %render_err,
                        "rendering failed; keeping direct markup"
                    );
                    Ok(page)
                }
                Err(direct_err) => {
                    tracing::warn!(url, error = %render_err, "rendering failed");
                    Err(direct_err)
                }
            },
        }
    }

    /// Index pages: direct, and rendered only if direct produced nothing at all.
    fn fetch_index(&mut self, url: &str) -> FetchResult {
        match self.fetch_direct(url) {
            Ok(page) => Ok(page),
            Err(direct_err) if self.can_render() => {
                tracing::info!(url, error = %direct_err, "index fetch failed, trying the renderer");
                self.fetch_rendered(url).map_err(|render_err| {
                    tracing::warn!(url, error = %render_err, "rendering the index failed");
                    direct_err
                })
            }
            Err(direct_err) => Err(direct_err),
        }
    }
}

/// Production fetcher: [DirectClient] plus an optional [Renderer].
#[derive(Debug)]
pub struct Fetcher {
    direct: DirectClient,
    renderer: Option<Renderer>,
}

impl Fetcher {
    pub fn new(direct: DirectClient, renderer: Option<Renderer>) -> Self {
        Self { direct, renderer }
    }
}

impl PageFetcher for Fetcher {
    fn fetch_direct(&mut self, url: &str) -> FetchResult {
        self.direct.get(url)
    }

    fn fetch_rendered(&mut self, url: &str) -> FetchResult {
        match &self.renderer {
            Some(renderer) => renderer.render(url),
            None => Err(FetchError::RenderDisabled {
                url: url.to_string(),
            }),
        }
    }

    fn can_render(&self) -> bool {
        self.renderer.is_some()
    }
}
