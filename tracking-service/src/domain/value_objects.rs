//! # Tracking Value Objects
//!
//! Value objects for the ingestion domain: identity kinds, link provenance,
//! referrer categories, trackable kinds and UTM sets.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// IDENTITY KIND
// =============================================================================

/// Kind of observable signal pointing at a user.
///
/// The raw value is hashed before storage; the kind decides link
/// confidence and provenance when a new customer link is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityKind {
    /// First-party cookie identifier
    Cookie,
    /// Logged-in user id from the host application
    UserId,
    /// SHA-256 of a lowercased email address
    EmailHash,
    /// Google Analytics client id
    GaCid,
}

impl IdentityKind {
    /// Confidence assigned when this kind creates a fresh customer link.
    ///
    /// | Kind | Confidence |
    /// |------|------------|
    /// | `user_id` | 1.0 |
    /// | `cookie` | 1.0 |
    /// | `email_hash` | 0.95 |
    /// | other | 0.9 |
    pub fn default_confidence(&self) -> f64 {
        match self {
            IdentityKind::UserId | IdentityKind::Cookie => 1.0,
            IdentityKind::EmailHash => 0.95,
            IdentityKind::GaCid => 0.9,
        }
    }

    /// Provenance recorded when this kind creates a fresh customer link.
    ///
    /// Authenticated signals (`user_id`, `email_hash`) count as `login`;
    /// anything else came from the SDK itself.
    pub fn default_link_source(&self) -> LinkSource {
        match self {
            IdentityKind::UserId | IdentityKind::EmailHash => LinkSource::Login,
            IdentityKind::Cookie | IdentityKind::GaCid => LinkSource::Sdk,
        }
    }
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKind::Cookie => write!(f, "cookie"),
            IdentityKind::UserId => write!(f, "user_id"),
            IdentityKind::EmailHash => write!(f, "email_hash"),
            IdentityKind::GaCid => write!(f, "ga_cid"),
        }
    }
}

impl std::str::FromStr for IdentityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cookie" => Ok(IdentityKind::Cookie),
            "user_id" => Ok(IdentityKind::UserId),
            "email_hash" => Ok(IdentityKind::EmailHash),
            "ga_cid" => Ok(IdentityKind::GaCid),
            _ => Err(format!("Invalid identity kind: {}", s)),
        }
    }
}

// =============================================================================
// LINK SOURCE
// =============================================================================

/// How a customer-identity link came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkSource {
    /// Authenticated signal from the host application
    Login,
    /// Anonymous signal captured by the SDK
    Sdk,
    /// Stitched by email cross-match or IP correlation
    Heuristic,
}

impl std::fmt::Display for LinkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkSource::Login => write!(f, "login"),
            LinkSource::Sdk => write!(f, "sdk"),
            LinkSource::Heuristic => write!(f, "heuristic"),
        }
    }
}

impl std::str::FromStr for LinkSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(LinkSource::Login),
            "sdk" => Ok(LinkSource::Sdk),
            "heuristic" => Ok(LinkSource::Heuristic),
            _ => Err(format!("Invalid link source: {}", s)),
        }
    }
}

// =============================================================================
// REFERRER CATEGORY
// =============================================================================

/// Coarse traffic-source category for an interned referrer domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferrerCategory {
    Search,
    Social,
    Email,
    Other,
}

impl ReferrerCategory {
    /// Classifies a (case-normalized) referrer domain by substring table.
    ///
    /// | Category | Matches |
    /// |----------|---------|
    /// | search | google.com, bing.com, yahoo.com, duckduckgo.com, contains "search" |
    /// | social | facebook, twitter, instagram, linkedin, pinterest, tiktok, contains "social" |
    /// | email | contains "mail" or "email" |
    /// | other | everything else |
    pub fn classify(domain: &str) -> Self {
        const SEARCH_DOMAINS: [&str; 4] =
            ["google.com", "bing.com", "yahoo.com", "duckduckgo.com"];
        const SOCIAL_NETWORKS: [&str; 6] = [
            "facebook", "twitter", "instagram", "linkedin", "pinterest", "tiktok",
        ];

        if SEARCH_DOMAINS.iter().any(|d| domain.contains(d)) || domain.contains("search") {
            return ReferrerCategory::Search;
        }
        if SOCIAL_NETWORKS.iter().any(|n| domain.contains(n)) || domain.contains("social") {
            return ReferrerCategory::Social;
        }
        if domain.contains("mail") || domain.contains("email") {
            return ReferrerCategory::Email;
        }

        ReferrerCategory::Other
    }
}

impl std::fmt::Display for ReferrerCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferrerCategory::Search => write!(f, "search"),
            ReferrerCategory::Social => write!(f, "social"),
            ReferrerCategory::Email => write!(f, "email"),
            ReferrerCategory::Other => write!(f, "other"),
        }
    }
}

impl std::str::FromStr for ReferrerCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "search" => Ok(ReferrerCategory::Search),
            "social" => Ok(ReferrerCategory::Social),
            "email" => Ok(ReferrerCategory::Email),
            "other" => Ok(ReferrerCategory::Other),
            _ => Err(format!("Invalid referrer category: {}", s)),
        }
    }
}

// =============================================================================
// TRACKABLE KIND
// =============================================================================

/// Discriminator of the polymorphic UTM join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackableKind {
    Session,
    Event,
    Touch,
}

impl std::fmt::Display for TrackableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrackableKind::Session => write!(f, "session"),
            TrackableKind::Event => write!(f, "event"),
            TrackableKind::Touch => write!(f, "touch"),
        }
    }
}

// =============================================================================
// TOUCH KIND
// =============================================================================

/// Kind of acquisition touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TouchKind {
    /// First marketing-attributed page hit of a session
    Landing,
    /// Paid ad click-through
    AdClick,
    /// Marketing email open
    EmailOpen,
}

impl std::fmt::Display for TouchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TouchKind::Landing => write!(f, "landing"),
            TouchKind::AdClick => write!(f, "ad_click"),
            TouchKind::EmailOpen => write!(f, "email_open"),
        }
    }
}

impl std::str::FromStr for TouchKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "landing" => Ok(TouchKind::Landing),
            "ad_click" => Ok(TouchKind::AdClick),
            "email_open" => Ok(TouchKind::EmailOpen),
            _ => Err(format!("Invalid touch kind: {}", s)),
        }
    }
}

// =============================================================================
// JOB STATUS
// =============================================================================

/// Lifecycle state of a queued ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting to be claimed (or re-claimed after backoff)
    Pending,
    /// Claimed by a worker
    Running,
    /// Processed successfully
    Completed,
    /// Attempt failed; will be retried while attempts remain
    Failed,
    /// Attempts exhausted; requires operator attention
    Dead,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Dead => write!(f, "dead"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "dead" => Ok(JobStatus::Dead),
            _ => Err(format!("Invalid job status: {}", s)),
        }
    }
}

// =============================================================================
// UTM SET
// =============================================================================

/// An ordered set of UTM parameters with the `utm_` prefix stripped.
///
/// Keys are stored stripped because that is how parameters are interned;
/// the prefix is restored when a snapshot is rendered for a conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtmSet(BTreeMap<String, String>);

impl UtmSet {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a parameter by its full key (`utm_source`) or stripped
    /// name (`source`). Empty values are ignored.
    pub fn insert(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let name = key.strip_prefix("utm_").unwrap_or(key);
        if name.is_empty() {
            return;
        }
        self.0.insert(name.to_string(), value.to_string());
    }

    /// Iterates `(stripped_name, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Renders the set as a JSON object with full `utm_*` keys, the shape
    /// stored in conversion snapshots. Returns `None` when empty so empty
    /// snapshots persist as SQL NULL.
    pub fn to_snapshot(&self) -> Option<serde_json::Value> {
        if self.0.is_empty() {
            return None;
        }
        let map: serde_json::Map<String, serde_json::Value> = self
            .0
            .iter()
            .map(|(k, v)| (format!("utm_{}", k), serde_json::Value::String(v.clone())))
            .collect();
        Some(serde_json::Value::Object(map))
    }
}

impl FromIterator<(String, String)> for UtmSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut set = UtmSet::new();
        for (k, v) in iter {
            set.insert(&k, &v);
        }
        set
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_identity_kind_confidence_table() {
        assert_eq!(IdentityKind::UserId.default_confidence(), 1.0);
        assert_eq!(IdentityKind::Cookie.default_confidence(), 1.0);
        assert_eq!(IdentityKind::EmailHash.default_confidence(), 0.95);
        assert_eq!(IdentityKind::GaCid.default_confidence(), 0.9);
    }

    #[test]
    fn test_identity_kind_link_source() {
        assert_eq!(IdentityKind::UserId.default_link_source(), LinkSource::Login);
        assert_eq!(IdentityKind::EmailHash.default_link_source(), LinkSource::Login);
        assert_eq!(IdentityKind::Cookie.default_link_source(), LinkSource::Sdk);
        assert_eq!(IdentityKind::GaCid.default_link_source(), LinkSource::Sdk);
    }

    #[test]
    fn test_identity_kind_roundtrip() {
        for kind in [
            IdentityKind::Cookie,
            IdentityKind::UserId,
            IdentityKind::EmailHash,
            IdentityKind::GaCid,
        ] {
            assert_eq!(IdentityKind::from_str(&kind.to_string()), Ok(kind));
        }
        assert!(IdentityKind::from_str("fingerprint").is_err());
    }

    #[test]
    fn test_referrer_classification_search() {
        assert_eq!(ReferrerCategory::classify("google.com"), ReferrerCategory::Search);
        assert_eq!(ReferrerCategory::classify("www.bing.com"), ReferrerCategory::Search);
        assert_eq!(ReferrerCategory::classify("search.brave.io"), ReferrerCategory::Search);
        assert_eq!(ReferrerCategory::classify("duckduckgo.com"), ReferrerCategory::Search);
    }

    #[test]
    fn test_referrer_classification_social() {
        assert_eq!(ReferrerCategory::classify("facebook.com"), ReferrerCategory::Social);
        assert_eq!(ReferrerCategory::classify("l.instagram.com"), ReferrerCategory::Social);
        assert_eq!(ReferrerCategory::classify("socialclub.example"), ReferrerCategory::Social);
    }

    #[test]
    fn test_referrer_classification_email() {
        assert_eq!(ReferrerCategory::classify("mail.example.com"), ReferrerCategory::Email);
        assert_eq!(ReferrerCategory::classify("email.campaign.io"), ReferrerCategory::Email);
    }

    #[test]
    fn test_referrer_classification_other() {
        assert_eq!(ReferrerCategory::classify("news.ycombinator.com"), ReferrerCategory::Other);
        assert_eq!(ReferrerCategory::classify("example.org"), ReferrerCategory::Other);
    }

    #[test]
    fn test_referrer_classification_is_deterministic() {
        let domain = "partner-mailing.shop.com";
        let first = ReferrerCategory::classify(domain);
        for _ in 0..10 {
            assert_eq!(ReferrerCategory::classify(domain), first);
        }
    }

    #[test]
    fn test_utm_set_strips_prefix_and_skips_empties() {
        let mut set = UtmSet::new();
        set.insert("utm_source", "google");
        set.insert("utm_medium", "cpc");
        set.insert("utm_term", "");
        set.insert("campaign", "spring");

        assert_eq!(set.len(), 3);
        assert_eq!(set.get("source"), Some("google"));
        assert_eq!(set.get("campaign"), Some("spring"));
        assert_eq!(set.get("term"), None);
    }

    #[test]
    fn test_utm_snapshot_restores_prefix() {
        let mut set = UtmSet::new();
        set.insert("utm_source", "google");
        set.insert("utm_medium", "cpc");

        let snapshot = set.to_snapshot().unwrap();
        assert_eq!(snapshot["utm_source"], "google");
        assert_eq!(snapshot["utm_medium"], "cpc");
    }

    #[test]
    fn test_empty_utm_snapshot_is_none() {
        assert!(UtmSet::new().to_snapshot().is_none());
    }

    #[test]
    fn test_job_status_roundtrip() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Dead,
        ] {
            assert_eq!(JobStatus::from_str(&status.to_string()), Ok(status));
        }
    }
}
