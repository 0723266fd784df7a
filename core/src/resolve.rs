//! Base-URL resolution and candidate URL enumeration.
//!
//! # Design
//! The CRM may be reachable through a same-origin proxy, a direct host, or a
//! local development port, and the client cannot tell in advance which one
//! is live. Resolution therefore produces an ordered list rather than one
//! URL, and the fetch loop walks it.
//!
//! Everything here is pure: inputs come from a `ConfigSource`, outputs are
//! strings, and the same config always yields the same list.

use crate::config::{is_loopback_host, split_list, ConfigSource, PageContext};

/// Tried when nothing is configured; the CRM's development port.
pub const LOCAL_DEFAULT: &str = "http://localhost:5001/api";

/// Last resort: same-origin relative prefix.
pub const RELATIVE_DEFAULT: &str = "/api";

const API_SEGMENT: &str = "/api";
const CONSULTATION_REQUESTS: &str = "/consultation-requests";
const PATIENTS: &str = "/patients";

/// Normalize one raw base URL.
///
/// Returns `None` for blank input. The result never ends in `/` and ends up
/// with an `/api` segment unless it already names the consultation-requests
/// endpoint.
pub fn normalize_base_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let qualified = if is_absolute(trimmed) || trimmed.starts_with('/') {
        trimmed.to_string()
    } else if trimmed.contains('.') || trimmed.contains(':') {
        format!("https://{trimmed}")
    } else {
        format!("/{trimmed}")
    };

    let stripped = qualified.trim_end_matches('/');

    if stripped.ends_with(CONSULTATION_REQUESTS) || has_api_segment(stripped) {
        return Some(stripped.to_string());
    }
    Some(format!("{stripped}{API_SEGMENT}"))
}

/// `true` when a plain-HTTP candidate would be mixed content on the page.
///
/// Loopback candidates stay allowed while the page itself is served from
/// loopback.
pub fn is_blocked_by_page(candidate: &str, page: Option<&PageContext>) -> bool {
    let Some(page) = page else {
        return false;
    };
    if !starts_with_ignore_case(candidate, "http://") {
        return false;
    }
    if page.is_local() && host_of(candidate).is_some_and(|h| is_loopback_host(&h)) {
        return false;
    }
    page.is_secure()
}

/// Ordered, de-duplicated base URLs to try.
///
/// Configured sources (build-time list, runtime override, meta tags) win
/// outright when any of them survives normalization and the mixed-content
/// guard. Only otherwise are the fallbacks used: page origin, the local
/// development default, and finally the relative `/api`.
pub fn base_url_candidates(config: &dyn ConfigSource) -> Vec<String> {
    let page = config.page();

    let mut raw = Vec::new();
    if let Some(env) = config.env_base_urls() {
        raw.extend(split_list(&env));
    }
    raw.extend(config.runtime_override());
    raw.extend(config.meta_base_urls());

    let configured = accept(raw, page.as_ref());
    if !configured.is_empty() {
        return configured;
    }

    let mut fallbacks = Vec::new();
    if let Some(p) = &page {
        fallbacks.push(p.origin.clone());
    }
    fallbacks.push(LOCAL_DEFAULT.to_string());
    fallbacks.push(RELATIVE_DEFAULT.to_string());
    accept(fallbacks, page.as_ref())
}

fn accept(raw: Vec<String>, page: Option<&PageContext>) -> Vec<String> {
    unique(
        raw.iter()
            .filter_map(|value| normalize_base_url(value))
            .filter(|candidate| !is_blocked_by_page(candidate, page)),
    )
}

/// Equivalent request paths for one logical path.
///
/// Consultation-request paths also get a `/patients`-prefixed alias, since
/// the CRM mounts that resource under both routes.
pub fn path_variants(path: &str) -> Vec<String> {
    let path = path.trim();
    if is_http_url(path) {
        return vec![path.to_string()];
    }

    let normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };

    if normalized.starts_with(CONSULTATION_REQUESTS) {
        let alias = format!("{PATIENTS}{normalized}");
        vec![normalized, alias]
    } else {
        vec![normalized]
    }
}

/// Every URL the fetch loop should try for `path`, in order.
pub fn url_candidates(path: &str, config: &dyn ConfigSource) -> Vec<String> {
    let paths = path_variants(path);
    let bases = base_url_candidates(config);
    if bases.is_empty() {
        return paths;
    }

    let mut urls = Vec::new();
    for base in &bases {
        let variants = base_variants(base);
        let last = variants.len() - 1;
        for (index, variant) in variants.iter().enumerate() {
            for path in &paths {
                if is_http_url(path) {
                    urls.push(path.clone());
                } else if variant.ends_with(path.as_str()) {
                    urls.push(variant.clone());
                } else if index == last {
                    // Only the fully stripped variant is joined with
                    // arbitrary paths; a resource-qualified base is used
                    // solely for the path it already names.
                    urls.push(format!("{variant}{path}"));
                }
            }
        }
    }
    unique(urls)
}

/// First candidate URL for `path`.
pub fn build_url(path: &str, config: &dyn ConfigSource) -> String {
    url_candidates(path, config)
        .into_iter()
        .next()
        .unwrap_or_default()
}

/// The base itself, plus the base with one trailing resource segment removed.
///
/// `url_candidates` joins only the last variant with arbitrary paths. A base
/// such as `.../api/patients` never yields `.../api/patients/appointments`;
/// the unstripped form is tried only for the path it already names.
fn base_variants(base: &str) -> Vec<String> {
    let mut variants = vec![base.to_string()];
    for suffix in [PATIENTS, CONSULTATION_REQUESTS] {
        if let Some(stripped) = base.strip_suffix(suffix) {
            if !stripped.is_empty() {
                variants.push(stripped.to_string());
            }
            break;
        }
    }
    variants
}

fn unique<I: IntoIterator<Item = String>>(values: I) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    for value in values {
        if !value.is_empty() && !result.contains(&value) {
            result.push(value);
        }
    }
    result
}

/// `scheme://...` with an RFC 3986 scheme.
fn is_absolute(value: &str) -> bool {
    let Some((scheme, _)) = value.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn is_http_url(value: &str) -> bool {
    starts_with_ignore_case(value, "http://") || starts_with_ignore_case(value, "https://")
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// `/api` followed by `/` or the end of the string.
fn has_api_segment(value: &str) -> bool {
    value.match_indices(API_SEGMENT).any(|(index, _)| {
        matches!(
            value[index + API_SEGMENT.len()..].chars().next(),
            None | Some('/')
        )
    })
}

fn host_of(candidate: &str) -> Option<String> {
    url::Url::parse(candidate)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StaticConfig;

    #[test]
    fn normalize_appends_api() {
        assert_eq!(
            normalize_base_url("https://crm.example.com").as_deref(),
            Some("https://crm.example.com/api")
        );
        assert_eq!(
            normalize_base_url("  https://crm.example.com///  ").as_deref(),
            Some("https://crm.example.com/api")
        );
    }

    #[test]
    fn normalize_keeps_existing_api_segment() {
        assert_eq!(
            normalize_base_url("https://crm.example.com/api/").as_deref(),
            Some("https://crm.example.com/api")
        );
        assert_eq!(
            normalize_base_url("https://crm.example.com/api/v2").as_deref(),
            Some("https://crm.example.com/api/v2")
        );
    }

    #[test]
    fn normalize_does_not_treat_apis_as_api_segment() {
        assert_eq!(
            normalize_base_url("https://apis.example.com/apiary").as_deref(),
            Some("https://apis.example.com/apiary/api")
        );
    }

    #[test]
    fn normalize_keeps_qualified_endpoint() {
        assert_eq!(
            normalize_base_url("https://crm.example.com/consultation-requests").as_deref(),
            Some("https://crm.example.com/consultation-requests")
        );
    }

    #[test]
    fn normalize_bare_host_and_bare_path() {
        assert_eq!(
            normalize_base_url("crm.example.com").as_deref(),
            Some("https://crm.example.com/api")
        );
        assert_eq!(
            normalize_base_url("crm.internal:5001").as_deref(),
            Some("https://crm.internal:5001/api")
        );
        assert_eq!(normalize_base_url("crm").as_deref(), Some("/crm/api"));
        assert_eq!(normalize_base_url("/").as_deref(), Some("/api"));
    }

    #[test]
    fn normalize_rejects_blank() {
        assert_eq!(normalize_base_url(""), None);
        assert_eq!(normalize_base_url("   \t"), None);
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in [
            "https://crm.example.com",
            "https://crm.example.com/api",
            "crm.example.com/",
            "/proxy",
            "crm",
            "http://localhost:5001",
            "https://crm.example.com/api/consultation-requests",
        ] {
            let once = normalize_base_url(raw).unwrap();
            let twice = normalize_base_url(&once).unwrap();
            assert_eq!(once, twice, "{raw}");
            assert!(!once.ends_with('/'), "{raw}");
        }
    }

    #[test]
    fn guard_only_applies_in_browser() {
        assert!(!is_blocked_by_page("http://crm.internal:5001/api", None));
    }

    #[test]
    fn guard_blocks_http_on_https_page() {
        let page = PageContext::from_origin("https://clinic.example.com").unwrap();
        assert!(is_blocked_by_page("http://crm.internal:5001/api", Some(&page)));
        assert!(is_blocked_by_page("http://localhost:5001/api", Some(&page)));
        assert!(!is_blocked_by_page("https://crm.example.com/api", Some(&page)));
        assert!(!is_blocked_by_page("/api", Some(&page)));
    }

    #[test]
    fn guard_allows_http_on_http_page() {
        let page = PageContext::from_origin("http://clinic.example.com").unwrap();
        assert!(!is_blocked_by_page("http://crm.internal:5001/api", Some(&page)));
    }

    #[test]
    fn guard_allows_loopback_from_loopback_page() {
        let page = PageContext::from_origin("https://localhost:5173").unwrap();
        assert!(!is_blocked_by_page("http://localhost:5001/api", Some(&page)));
        assert!(!is_blocked_by_page("http://127.0.0.1:5001/api", Some(&page)));
        assert!(is_blocked_by_page("http://crm.internal:5001/api", Some(&page)));
    }

    #[test]
    fn defaults_outside_browser() {
        let config = StaticConfig::new();
        assert_eq!(
            base_url_candidates(&config),
            vec!["http://localhost:5001/api", "/api"]
        );
    }

    #[test]
    fn defaults_in_browser_include_origin() {
        let config = StaticConfig::new().with_page("http://clinic.example.com");
        assert_eq!(
            base_url_candidates(&config),
            vec![
                "http://clinic.example.com/api",
                "http://localhost:5001/api",
                "/api"
            ]
        );
    }

    #[test]
    fn https_page_drops_local_default() {
        let config = StaticConfig::new().with_page("https://clinic.example.com");
        assert_eq!(
            base_url_candidates(&config),
            vec!["https://clinic.example.com/api", "/api"]
        );
    }

    #[test]
    fn configured_sources_follow_precedence_and_skip_fallbacks() {
        let config = StaticConfig::new()
            .with_env("https://env-a.example.com, https://env-b.example.com")
            .with_override("https://override.example.com")
            .with_meta("https://meta.example.com/api")
            .with_page("https://clinic.example.com");
        assert_eq!(
            base_url_candidates(&config),
            vec![
                "https://env-a.example.com/api",
                "https://env-b.example.com/api",
                "https://override.example.com/api",
                "https://meta.example.com/api",
            ]
        );
    }

    #[test]
    fn configured_duplicates_keep_first_occurrence() {
        let config = StaticConfig::new()
            .with_env("https://crm.example.com/api")
            .with_override("https://other.example.com")
            .with_meta("https://crm.example.com/");
        assert_eq!(
            base_url_candidates(&config),
            vec!["https://crm.example.com/api", "https://other.example.com/api"]
        );
    }

    #[test]
    fn mixed_content_candidate_falls_through_to_fallbacks() {
        let config = StaticConfig::new()
            .with_env("http://crm.internal:5001")
            .with_page("https://clinic.example.com");
        assert_eq!(
            base_url_candidates(&config),
            vec!["https://clinic.example.com/api", "/api"]
        );
    }

    #[test]
    fn mixed_content_candidate_dropped_but_others_survive() {
        let config = StaticConfig::new()
            .with_env("http://crm.internal:5001 https://crm.example.com")
            .with_page("https://clinic.example.com");
        assert_eq!(
            base_url_candidates(&config),
            vec!["https://crm.example.com/api"]
        );
    }

    #[test]
    fn path_variants_for_consultation_requests() {
        assert_eq!(
            path_variants("/consultation-requests"),
            vec!["/consultation-requests", "/patients/consultation-requests"]
        );
        assert_eq!(
            path_variants("consultation-requests/7/confirm"),
            vec![
                "/consultation-requests/7/confirm",
                "/patients/consultation-requests/7/confirm"
            ]
        );
    }

    #[test]
    fn path_variants_plain_and_absolute() {
        assert_eq!(path_variants("dashboard/stats"), vec!["/dashboard/stats"]);
        assert_eq!(
            path_variants("https://crm.example.com/api/patients"),
            vec!["https://crm.example.com/api/patients"]
        );
    }

    #[test]
    fn candidates_include_alias_for_every_base() {
        let config = StaticConfig::new();
        assert_eq!(
            url_candidates("/consultation-requests", &config),
            vec![
                "http://localhost:5001/api/consultation-requests",
                "http://localhost:5001/api/patients/consultation-requests",
                "/api/consultation-requests",
                "/api/patients/consultation-requests",
            ]
        );
    }

    #[test]
    fn qualified_base_is_not_doubled() {
        let config =
            StaticConfig::new().with_env("https://crm.example.com/api/consultation-requests");
        assert_eq!(
            url_candidates("/consultation-requests", &config),
            vec![
                "https://crm.example.com/api/consultation-requests",
                "https://crm.example.com/api/patients/consultation-requests",
            ]
        );
        assert_eq!(
            url_candidates("/dashboard/stats", &config),
            vec!["https://crm.example.com/api/dashboard/stats"]
        );
    }

    #[test]
    fn patients_base_is_stripped_for_other_paths() {
        let config = StaticConfig::new().with_env("https://crm.example.com/api/patients");
        assert_eq!(
            url_candidates("/patients", &config),
            vec!["https://crm.example.com/api/patients"]
        );
        assert_eq!(
            url_candidates("/appointments", &config),
            vec!["https://crm.example.com/api/appointments"]
        );
    }

    #[test]
    fn absolute_path_bypasses_bases() {
        let config = StaticConfig::new().with_env("https://crm.example.com");
        assert_eq!(
            url_candidates("https://elsewhere.example.com/api/patients", &config),
            vec!["https://elsewhere.example.com/api/patients"]
        );
    }

    #[test]
    fn build_url_never_doubles_segments() {
        for base in [
            "https://crm.example.com",
            "https://crm.example.com/api",
            "https://crm.example.com/api/",
            "https://crm.example.com/api/consultation-requests",
        ] {
            let config = StaticConfig::new().with_env(base);
            let url = build_url("/consultation-requests", &config);
            assert_eq!(url, "https://crm.example.com/api/consultation-requests", "{base}");
            assert!(!url.contains("/api/api"));
        }
    }
}
