//! Blocking HTTP client for the direct strategy: rotating browser User-Agents, a referer equal
//! to the target URL, a cookie jar, and a per-request timeout.

use crate::fetch::error::FetchError;
use crate::model::{FetchedPage, Strategy};
use rand::seq::SliceRandom;
use reqwest::header::{ACCEPT_LANGUAGE, REFERER, USER_AGENT};
use std::time::Duration;

/// Browser identities rotated across requests.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Safari/605.1.15",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/117.0",
];
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;
const ACCEPT_LANGUAGE_VALUE: &str = "en-US,en;q=0.9";
const MAX_REDIRECTS: usize = 10;

/// Direct-retrieval client. Politeness delays are the caller's job.
#[derive(Debug)]
pub struct DirectClient {
    inner: reqwest::blocking::Client,
    user_agents: Vec<String>,
}

impl DirectClient {
    /// Build a client with the default User-Agent pool and timeout.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    pub fn builder() -> DirectClientBuilder {
        DirectClientBuilder::default()
    }

    /// One of the configured User-Agents, picked at random.
    pub fn pick_user_agent(&self) -> &str {
        self.user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(DEFAULT_USER_AGENTS[0])
    }

    /// GET `url`. Non-2xx, unreadable, and empty bodies are errors.
    pub fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self
            .inner
            .get(url)
            .header(USER_AGENT, self.pick_user_agent())
            .header(ACCEPT_LANGUAGE, ACCEPT_LANGUAGE_VALUE)
            .header(REFERER, url)
            .send()
            .map_err(|e| FetchError::Network {
                url: url.to_string(),
                source: e,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        let html = response.text().map_err(|e| FetchError::BodyRead {
            url: url.to_string(),
            source: e,
        })?;
        if html.trim().is_empty() {
            return Err(FetchError::EmptyBody {
                url: url.to_string(),
            });
        }
        Ok(FetchedPage {
            html,
            strategy: Strategy::Direct,
        })
    }
}

/// Builder for [DirectClient] with optional User-Agent pool and timeout.
#[derive(Debug)]
pub struct DirectClientBuilder {
    user_agents: Vec<String>,
    timeout_secs: u64,
}

impl Default for DirectClientBuilder {
    fn default() -> Self {
        Self {
            user_agents: Vec::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl DirectClientBuilder {
    /// Replace the User-Agent pool. An empty pool keeps the defaults.
    pub fn user_agents<I, S>(mut self, agents: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_agents = agents.into_iter().map(Into::into).collect();
        self
    }

    /// Request timeout in seconds. Default 15.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn build(self) -> Result<DirectClient, reqwest::Error> {
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let user_agents = if self.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            self.user_agents
        };
        Ok(DirectClient { inner, user_agents })
    }
}
