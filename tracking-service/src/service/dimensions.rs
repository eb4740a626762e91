//! # Dimension Normalization
//!
//! Turns the URL-shaped parts of a request into interned dimension rows:
//! referrer domain (classified), landing-page path, and UTM values.
//!
//! The string-level extraction is pure and unit-tested here; the
//! interning itself delegates to [`DimensionRepository`] inside the
//! worker transaction.

use sqlx::PgConnection;
use url::Url;

use crate::domain::{IngestJob, LandingPage, ReferrerCategory, ReferrerDomain, UtmSet};
use crate::repository::{DimensionRepository, Result};

/// Maximum stored length of a landing-page `url_sample`.
const URL_SAMPLE_MAX_CHARS: usize = 500;

// =============================================================================
// NORMALIZED DIMENSIONS
// =============================================================================

/// The interned dimensions of one request.
#[derive(Debug, Default)]
pub struct NormalizedDimensions {
    pub referrer_domain: Option<ReferrerDomain>,
    pub landing_page: Option<LandingPage>,
    /// Interned `CustomUtmValue` ids for the request's UTM set.
    pub utm_value_ids: Vec<i64>,
}

impl NormalizedDimensions {
    pub fn referrer_domain_id(&self) -> Option<i64> {
        self.referrer_domain.as_ref().map(|d| d.referrer_domain_id)
    }

    pub fn landing_page_id(&self) -> Option<i64> {
        self.landing_page.as_ref().map(|p| p.landing_page_id)
    }
}

/// Interns all dimensions present on a job.
pub async fn normalize(conn: &mut PgConnection, job: &IngestJob) -> Result<NormalizedDimensions> {
    let mut dims = NormalizedDimensions::default();

    if let Some(domain) = job.referrer.as_deref().and_then(extract_referrer_domain) {
        let category = ReferrerCategory::classify(&domain);
        dims.referrer_domain = Some(
            DimensionRepository::intern_referrer_domain(conn, job.website_id, &domain, category)
                .await?,
        );
    }

    if let Some(url) = job.url.as_deref() {
        let path = extract_landing_path(url);
        let sample = truncate_url_sample(url);
        dims.landing_page = Some(
            DimensionRepository::intern_landing_page(conn, job.website_id, &path, Some(&sample))
                .await?,
        );
    }

    dims.utm_value_ids =
        DimensionRepository::intern_utm_set(conn, job.website_id, &job.utms).await?;

    Ok(dims)
}

// =============================================================================
// PURE EXTRACTION
// =============================================================================

/// Extracts the case-normalized host from a referrer URL.
///
/// Returns `None` for unparseable URLs and URLs without a host
/// (e.g. `about:blank`), which simply means "direct traffic".
pub fn extract_referrer_domain(referrer: &str) -> Option<String> {
    let parsed = Url::parse(referrer).ok()?;
    parsed.host_str().map(|h| h.to_ascii_lowercase())
}

/// Extracts the path from a page URL, defaulting to `/`.
pub fn extract_landing_path(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let path = parsed.path();
            if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            }
        }
        Err(_) => "/".to_string(),
    }
}

/// Truncates a URL to the stored sample length (on a char boundary).
pub fn truncate_url_sample(url: &str) -> String {
    url.chars().take(URL_SAMPLE_MAX_CHARS).collect()
}

/// Collects `utm_*` parameters from a URL query string.
///
/// Used by the conversion attributor to recover `utm_current` when the
/// SDK put campaign parameters on the page URL instead of the payload.
pub fn utms_from_url(url: &str) -> UtmSet {
    let mut set = UtmSet::new();

    if let Ok(parsed) = Url::parse(url) {
        for (key, value) in parsed.query_pairs() {
            if key.starts_with("utm_") {
                set.insert(&key, &value);
            }
        }
    }

    set
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_referrer_domain_lowercases_host() {
        assert_eq!(
            extract_referrer_domain("https://WWW.Google.COM/search?q=x"),
            Some("www.google.com".to_string())
        );
        assert_eq!(
            extract_referrer_domain("https://t.co/abc"),
            Some("t.co".to_string())
        );
    }

    #[test]
    fn test_extract_referrer_domain_handles_garbage() {
        assert_eq!(extract_referrer_domain("not a url"), None);
        assert_eq!(extract_referrer_domain(""), None);
        // parseable but hostless
        assert_eq!(extract_referrer_domain("mailto:x@example.com"), None);
    }

    #[test]
    fn test_extract_landing_path() {
        assert_eq!(extract_landing_path("https://shop.example/products/42"), "/products/42");
        assert_eq!(extract_landing_path("https://shop.example"), "/");
        assert_eq!(extract_landing_path("https://shop.example/?utm_source=x"), "/");
    }

    #[test]
    fn test_extract_landing_path_defaults_on_garbage() {
        assert_eq!(extract_landing_path("::::"), "/");
    }

    #[test]
    fn test_truncate_url_sample() {
        let long = format!("https://example.com/{}", "a".repeat(600));
        assert_eq!(truncate_url_sample(&long).chars().count(), 500);

        let short = "https://example.com/x";
        assert_eq!(truncate_url_sample(short), short);
    }

    #[test]
    fn test_utms_from_url_picks_only_utm_keys() {
        let set = utms_from_url("https://s/?utm_source=google&utm_medium=cpc&q=shoes&page=2");
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("source"), Some("google"));
        assert_eq!(set.get("medium"), Some("cpc"));
        assert_eq!(set.get("q"), None);
    }

    #[test]
    fn test_utms_from_url_skips_empty_values() {
        let set = utms_from_url("https://s/?utm_source=&utm_campaign=spring");
        assert_eq!(set.len(), 1);
        assert_eq!(set.get("campaign"), Some("spring"));
    }

    #[test]
    fn test_utms_from_url_handles_custom_parameters() {
        let set = utms_from_url("https://s/?utm_partner=acme");
        assert_eq!(set.get("partner"), Some("acme"));
    }
}
