//! Configuration sources for base-URL resolution.
//!
//! # Design
//! Resolution never reads the process environment or a page directly. All
//! lookups go through `ConfigSource`, so the same resolver runs in tests,
//! behind a browser shim, or in a server-side process.
//!
//! `StaticConfig` is the plain-data provider; `EnvConfig` maps `CRM_*`
//! environment variables onto the same shape.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where the hosting page was loaded from. Present only in a browser context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContext {
    /// e.g. `https://clinic.example.com`
    pub origin: String,
    /// `https:` or `http:`
    pub protocol: String,
    pub hostname: String,
}

impl PageContext {
    /// Derive protocol and hostname from an origin such as
    /// `https://clinic.example.com:8443`. Returns `None` for anything that is
    /// not an absolute URL with a host.
    pub fn from_origin(origin: &str) -> Option<Self> {
        let parsed = url::Url::parse(origin.trim()).ok()?;
        let hostname = parsed.host_str()?.to_string();
        Some(Self {
            origin: origin.trim().trim_end_matches('/').to_string(),
            protocol: format!("{}:", parsed.scheme()),
            hostname,
        })
    }

    pub fn is_secure(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("https:")
    }

    pub fn is_local(&self) -> bool {
        is_loopback_host(&self.hostname)
    }
}

pub(crate) fn is_loopback_host(host: &str) -> bool {
    host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1"
}

/// Injectable view of every place a CRM base URL can come from.
pub trait ConfigSource {
    /// Build-time setting; may name several URLs separated by commas or
    /// whitespace.
    fn env_base_urls(&self) -> Option<String>;

    /// Runtime override set at page load.
    fn runtime_override(&self) -> Vec<String>;

    /// Contents of `<meta name="crm-api-base">` tags.
    fn meta_base_urls(&self) -> Vec<String>;

    /// The hosting page, or `None` outside a browser.
    fn page(&self) -> Option<PageContext>;
}

impl<C: ConfigSource + ?Sized> ConfigSource for &C {
    fn env_base_urls(&self) -> Option<String> {
        (**self).env_base_urls()
    }

    fn runtime_override(&self) -> Vec<String> {
        (**self).runtime_override()
    }

    fn meta_base_urls(&self) -> Vec<String> {
        (**self).meta_base_urls()
    }

    fn page(&self) -> Option<PageContext> {
        (**self).page()
    }
}

/// Fixed configuration values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticConfig {
    pub env_base_urls: Option<String>,
    pub runtime_override: Vec<String>,
    pub meta_base_urls: Vec<String>,
    pub page: Option<PageContext>,
}

impl StaticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, value: &str) -> Self {
        self.env_base_urls = Some(value.to_string());
        self
    }

    pub fn with_override(mut self, value: &str) -> Self {
        self.runtime_override.push(value.to_string());
        self
    }

    pub fn with_meta(mut self, value: &str) -> Self {
        self.meta_base_urls.push(value.to_string());
        self
    }

    /// Simulate a browser page loaded from `origin`. Origins that do not
    /// parse leave the config outside a browser context.
    pub fn with_page(mut self, origin: &str) -> Self {
        self.page = PageContext::from_origin(origin);
        self
    }
}

impl ConfigSource for StaticConfig {
    fn env_base_urls(&self) -> Option<String> {
        self.env_base_urls.clone()
    }

    fn runtime_override(&self) -> Vec<String> {
        self.runtime_override.clone()
    }

    fn meta_base_urls(&self) -> Vec<String> {
        self.meta_base_urls.clone()
    }

    fn page(&self) -> Option<PageContext> {
        self.page.clone()
    }
}

pub const ENV_BASE_URLS: &str = "CRM_API_URL";
pub const ENV_OVERRIDE: &str = "CRM_API_OVERRIDE";
pub const ENV_META: &str = "CRM_API_META";
pub const ENV_PAGE_ORIGIN: &str = "CRM_PAGE_ORIGIN";
pub const ENV_ATTEMPT_TIMEOUT_MS: &str = "CRM_ATTEMPT_TIMEOUT_MS";
pub const ENV_OVERALL_TIMEOUT_MS: &str = "CRM_OVERALL_TIMEOUT_MS";

/// Configuration read from `CRM_*` environment variables.
///
/// | Variable | Meaning |
/// |----------|---------|
/// | `CRM_API_URL` | base URLs, comma or whitespace separated |
/// | `CRM_API_OVERRIDE` | runtime override list, same syntax |
/// | `CRM_API_META` | meta tag values, same syntax |
/// | `CRM_PAGE_ORIGIN` | origin of the hosting page; unset outside a browser |
///
/// Values are captured once at construction.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    inner: StaticConfig,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let inner = StaticConfig {
            env_base_urls: non_empty(ENV_BASE_URLS),
            runtime_override: non_empty(ENV_OVERRIDE)
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            meta_base_urls: non_empty(ENV_META)
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            page: non_empty(ENV_PAGE_ORIGIN).and_then(|v| PageContext::from_origin(&v)),
        };
        Self { inner }
    }

    pub fn from_map(map: &HashMap<String, String>) -> Self {
        Self::from_lookup(|key| map.get(key).cloned())
    }
}

impl ConfigSource for EnvConfig {
    fn env_base_urls(&self) -> Option<String> {
        self.inner.env_base_urls()
    }

    fn runtime_override(&self) -> Vec<String> {
        self.inner.runtime_override()
    }

    fn meta_base_urls(&self) -> Vec<String> {
        self.inner.meta_base_urls()
    }

    fn page(&self) -> Option<PageContext> {
        self.inner.page()
    }
}

/// Split a comma/whitespace separated list, dropping empty entries.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// Time limits applied by the fetch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// Upper bound for a single candidate.
    pub attempt_timeout: Option<Duration>,
    /// Upper bound for the whole call across all candidates.
    pub overall_deadline: Option<Duration>,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Some(DEFAULT_ATTEMPT_TIMEOUT),
            overall_deadline: None,
        }
    }
}

impl FetchPolicy {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unparseable values fall back to the defaults; `0` disables a limit.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let millis = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let defaults = Self::default();
        let pick = |value: Option<u64>, fallback: Option<Duration>| match value {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => fallback,
        };
        Self {
            attempt_timeout: pick(millis(ENV_ATTEMPT_TIMEOUT_MS), defaults.attempt_timeout),
            overall_deadline: pick(millis(ENV_OVERALL_TIMEOUT_MS), defaults.overall_deadline),
        }
    }
}
