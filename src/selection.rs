use crate::types::{Channel, Publication, SuggestionRate};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;

/// Weights applied to the growth over the 1st, 2nd and 3rd predecessor.
const OVERWEIGHT_FACTORS: [f64; 3] = [1.5, 1.2, 1.0];

/// Minimum rate a channel's local winner needs to be considered globally.
const SUGGESTION_RATE_THRESHOLD: f64 = 4.0;

/// A publication together with the rate it was selected with.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub publication: Publication,
    pub rate: SuggestionRate,
}

#[derive(Debug, Error, PartialEq)]
pub enum SelectionError {
    #[error("all channels exhausted")]
    Exhausted,
}

// ============================================================================
// LocalSelector trait
// ============================================================================

pub trait LocalSelector: Send + Sync {
    /// Pick the most trending publication of a single channel.
    ///
    /// `publications` is in scrape order, which is assumed chronological.
    /// Returns `None` when there is nothing worth suggesting.
    fn select(&self, publications: &[Publication]) -> Option<Candidate>;
}

// ============================================================================
// SimpleLocalSelector — 3-neighbour growth heuristic
// ============================================================================

#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleLocalSelector;

impl SimpleLocalSelector {
    pub fn new() -> Self {
        Self
    }
}

impl LocalSelector for SimpleLocalSelector {
    fn select(&self, publications: &[Publication]) -> Option<Candidate> {
        let mut best: Option<Candidate> = None;

        for window in publications.windows(4) {
            let current = &window[3];
            let Some(rate) = overweight_rate(current, &window[..3]) else {
                continue;
            };

            if best.as_ref().is_none_or(|b| rate > b.rate.0) {
                debug!(
                    id = %current.id,
                    rate,
                    views = current.view_amount,
                    "New leader of channel"
                );
                best = Some(Candidate {
                    publication: current.clone(),
                    rate: SuggestionRate(rate),
                });
            }
        }

        best
    }
}

/// Weighted growth of `current` against its three predecessors (oldest first).
///
/// `None` when the publication is not accelerating against its immediate
/// predecessor, or when any predecessor has zero views.
fn overweight_rate(current: &Publication, predecessors: &[Publication]) -> Option<f64> {
    let views = current.view_amount as f64;
    let mut rate = 0.0;

    for (distance, predecessor) in predecessors.iter().rev().enumerate() {
        if predecessor.view_amount == 0 {
            return None;
        }
        let overweight = views / predecessor.view_amount as f64;
        if distance == 0 && overweight <= 1.0 {
            return None;
        }
        rate += OVERWEIGHT_FACTORS[distance] * overweight;
    }

    Some(rate)
}

// ============================================================================
// GlobalSelector — cross-channel arbitration
// ============================================================================

pub struct GlobalSelector<L> {
    local: L,
}

impl<L: LocalSelector> GlobalSelector<L> {
    pub fn new(local: L) -> Self {
        Self { local }
    }

    /// Pick the best publication across channels.
    ///
    /// Local winners that were already reposted (`exists`) or rate below the
    /// threshold are dropped. Channels are visited in identifier order and a
    /// later channel has to beat the leader strictly, so ties go to the
    /// channel that sorts first.
    pub fn select<F>(
        &self,
        candidates: &BTreeMap<Channel, Vec<Publication>>,
        exists: F,
    ) -> Result<Candidate, SelectionError>
    where
        F: Fn(&Publication) -> bool,
    {
        let mut best: Option<Candidate> = None;

        for (channel, publications) in candidates {
            let Some(candidate) = self.local.select(publications) else {
                continue;
            };
            if exists(&candidate.publication) {
                debug!(channel = %channel, id = %candidate.publication.id, "Leader already reposted");
                continue;
            }
            if candidate.rate.0 < SUGGESTION_RATE_THRESHOLD {
                continue;
            }
            if best.as_ref().is_none_or(|b| candidate.rate > b.rate) {
                best = Some(candidate);
            }
        }

        best.ok_or(SelectionError::Exhausted)
    }
}
