use crate::repost_service::{PurgeError, RepostService};
use crate::storage::RepostStore;
use crate::types::Repost;
use axum::Json;
use axum::extract::State;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

// ============================================================================
// Response body
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RepostMessage {
    pub publication_id: String,
    pub posted_at: String,
    pub reposted_at: String,
}

impl From<Repost> for RepostMessage {
    fn from(repost: Repost) -> Self {
        Self {
            publication_id: repost.publication.id.to_string(),
            posted_at: repost.publication.posted_at.to_rfc3339(),
            reposted_at: repost.reposted_at.to_rfc3339(),
        }
    }
}

// ============================================================================
// Route handlers
// ============================================================================

/// GET /reposts
///
/// Hands out every repost not picked up before. Each repost is returned by
/// exactly one call.
pub(super) async fn reposts_get<S>(
    State(reposts): State<Arc<RepostService<S>>>,
) -> Json<Vec<RepostMessage>>
where
    S: RepostStore + 'static,
{
    let picked = match reposts.pick_up_most_trending(true) {
        Ok(picked) => picked,
        Err(e) => {
            error!(error = %e, "Reposts picked up, however, persisting it failed");
            e.value
        }
    };
    info!(count = picked.len(), "Handing out reposts");

    tokio::task::spawn_blocking(move || purge(&reposts));

    Json(picked.into_iter().map(RepostMessage::from).collect())
}

/// GET /health
pub(super) async fn health_get() -> &'static str {
    "OK"
}

fn purge<S: RepostStore>(reposts: &RepostService<S>) {
    match reposts.purge_irrelevant() {
        Ok(0) => {}
        Ok(deleted) => info!(deleted, "Purged irrelevant reposts"),
        Err(PurgeError::UnreadPending) => {
            warn!("Cannot purge irrelevant reposts, some were never picked up")
        }
        Err(e) => error!(error = %e, "Cannot purge irrelevant reposts"),
    }
}

// ============================================================================
// Tests
// ============================================================================
