use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a publication as the platform exposes it, e.g. `durov/123`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicationId(String);

impl PublicationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PublicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Publication {
    pub id: PublicationId,
    pub view_amount: u64,
    pub posted_at: DateTime<Utc>,
}

impl Publication {
    pub fn new(id: impl Into<String>, view_amount: u64, posted_at: DateTime<Utc>) -> Self {
        Self {
            id: PublicationId::new(id),
            view_amount,
            posted_at,
        }
    }
}

/// A content channel on some platform. Ordered by identifier, which is also
/// the order channels are visited in during cross-channel selection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Channel {
    pub id: String,
}

impl Channel {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// How strongly a publication is trending relative to its neighbours.
/// Unbounded; larger is more trending.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuggestionRate(pub f64);

impl fmt::Display for SuggestionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// A publication picked as the most trending one of a polling cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repost {
    pub publication: Publication,
    pub reposted_at: DateTime<Utc>,
    pub rate: SuggestionRate,
}

impl Repost {
    pub fn new(publication: Publication, reposted_at: DateTime<Utc>, rate: SuggestionRate) -> Self {
        Self {
            publication,
            reposted_at,
            rate,
        }
    }
}
