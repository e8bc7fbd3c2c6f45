use crate::channel_fetcher::ChannelFetcher;
use crate::configuration::PlatformConfig;
use crate::repost_service::RepostService;
use crate::selection::{GlobalSelector, LocalSelector, SelectionError};
use crate::storage::RepostStore;
use crate::types::{Channel, Publication, Repost};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span};

type Collected = BTreeMap<Channel, Vec<Publication>>;

/// What one polling cycle ended with.
#[derive(Debug, PartialEq)]
pub enum CycleOutcome {
    Reposted(Repost),
    Exhausted,
}

/// Polls the channels of one platform forever: fetch, select, repost, sleep.
pub struct PlatformPoller<F, S, L> {
    platform: String,
    config: PlatformConfig,
    fetcher: Arc<F>,
    selector: Arc<GlobalSelector<L>>,
    reposts: Arc<RepostService<S>>,
}

impl<F, S, L> PlatformPoller<F, S, L>
where
    F: ChannelFetcher,
    S: RepostStore + 'static,
    L: LocalSelector + 'static,
{
    pub fn new(
        platform: impl Into<String>,
        config: PlatformConfig,
        fetcher: Arc<F>,
        selector: Arc<GlobalSelector<L>>,
        reposts: Arc<RepostService<S>>,
    ) -> Self {
        Self {
            platform: platform.into(),
            config,
            fetcher,
            selector,
            reposts,
        }
    }

    /// Run the polling loop on its own task until `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        let span = info_span!("platform", id = %self.platform);
        tokio::spawn(self.run(cancel).instrument(span))
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            channels = self.config.channels.len(),
            parallel = self.config.parallel,
            "Poller started"
        );

        while self.run_cycle(&cancel).await.is_some() {
            debug!(
                seconds = self.config.frequency,
                "Sleeping before next traversal"
            );
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep(self.config.frequency()) => {}
            }
        }

        info!("Poller stopped");
    }

    /// One fetch → select → repost pass. `None` if cancelled while fetching.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Option<CycleOutcome> {
        debug!(channels = self.config.channels.len(), "Preparing to fetch channels");

        let collected = if self.config.parallel {
            self.fetch_parallel(cancel).await?
        } else {
            self.fetch_sequential(cancel).await?
        };

        debug!(fetched = collected.len(), "All channels finished");

        let candidate = match self
            .selector
            .select(&collected, |p| self.reposts.exists_for_publication(p))
        {
            Ok(candidate) => candidate,
            Err(SelectionError::Exhausted) => {
                info!("No trending publications so far");
                return Some(CycleOutcome::Exhausted);
            }
        };

        let repost = match self.reposts.repost(candidate) {
            Ok(repost) => repost,
            Err(e) => {
                error!(error = %e, "Repost succeeded, however, persisting it failed");
                e.value
            }
        };

        info!(
            publication = %repost.publication.id,
            rate = %repost.rate,
            "Picked most trending publication"
        );
        Some(CycleOutcome::Reposted(repost))
    }

    async fn fetch_parallel(&self, cancel: &CancellationToken) -> Option<Collected> {
        let collected = Arc::new(Mutex::new(Collected::new()));

        let handles: Vec<_> = self
            .config
            .channels
            .iter()
            .map(|id| {
                let channel = Channel::new(id.as_str());
                let fetcher = Arc::clone(&self.fetcher);
                let collected = Arc::clone(&collected);
                tokio::spawn(
                    async move {
                        if let Some(publications) = fetch_channel(&*fetcher, &channel).await {
                            collected
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .insert(channel, publications);
                        }
                    }
                    .in_current_span(),
                )
            })
            .collect();

        tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            results = futures::future::join_all(handles) => {
                for res in results {
                    if let Err(e) = res {
                        error!(error = %e, "Fetch task panicked");
                    }
                }
            }
        }

        let mut collected = collected.lock().unwrap_or_else(PoisonError::into_inner);
        Some(std::mem::take(&mut *collected))
    }

    async fn fetch_sequential(&self, cancel: &CancellationToken) -> Option<Collected> {
        let mut collected = Collected::new();
        let pause = self.config.pause_between_sync_channels();

        for (i, id) in self.config.channels.iter().enumerate() {
            if i > 0 && !pause.is_zero() {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return None,
                    () = sleep(pause) => {}
                }
            }

            let channel = Channel::new(id.as_str());
            let fetched = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                fetched = fetch_channel(&*self.fetcher, &channel) => fetched,
            };
            if let Some(publications) = fetched {
                collected.insert(channel, publications);
            }
        }

        Some(collected)
    }
}

/// Fetch one channel; failures are logged and yield nothing.
async fn fetch_channel<F: ChannelFetcher>(fetcher: &F, channel: &Channel) -> Option<Vec<Publication>> {
    match fetcher.fetch(channel).await {
        Ok(publications) => {
            debug!(channel = %channel, count = publications.len(), "Fetched channel");
            Some(publications)
        }
        Err(e) => {
            error!(channel = %channel, error = %e, "Fetching channel failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_fetcher::test_utils::FakeFetcher;
    use crate::clock::test_utils::FixedClock;
    use crate::selection::SimpleLocalSelector;
    use crate::storage::MemoryStore;
    use chrono::{Duration, TimeZone, Utc};

    fn make_publications(prefix: &str, views: &[u64]) -> Vec<Publication> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        views
            .iter()
            .enumerate()
            .map(|(i, &v)| {
                Publication::new(
                    format!("{}/{}", prefix, i),
                    v,
                    start + Duration::minutes(i as i64),
                )
            })
            .collect()
    }

    fn make_config(parallel: bool, channels: &[&str]) -> PlatformConfig {
        PlatformConfig {
            parallel,
            frequency: 3600,
            pause_between_sync_channels: 0,
            channels: channels.iter().map(|c| c.to_string()).collect(),
        }
    }

    fn make_poller(
        config: PlatformConfig,
        fetcher: FakeFetcher,
    ) -> (
        PlatformPoller<FakeFetcher, MemoryStore, SimpleLocalSelector>,
        Arc<FakeFetcher>,
        Arc<RepostService<MemoryStore>>,
    ) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
        ));
        let fetcher = Arc::new(fetcher);
        let reposts = Arc::new(RepostService::new(MemoryStore::new(), clock));
        let selector = Arc::new(GlobalSelector::new(SimpleLocalSelector::new()));
        let poller = PlatformPoller::new(
            "telegram",
            config,
            Arc::clone(&fetcher),
            selector,
            Arc::clone(&reposts),
        );
        (poller, fetcher, reposts)
    }

    fn trending_fetcher() -> FakeFetcher {
        FakeFetcher::new()
            .with_channel("alpha", make_publications("alpha", &[100, 110, 120, 200]))
            .with_channel("beta", make_publications("beta", &[100, 200, 400, 800]))
            .with_channel("flat", make_publications("flat", &[100, 100, 100, 100]))
    }

    #[tokio::test]
    async fn parallel_cycle_reposts_best_publication() {
        let (poller, fetcher, reposts) =
            make_poller(make_config(true, &["alpha", "beta", "flat"]), trending_fetcher());

        let outcome = poller.run_cycle(&CancellationToken::new()).await.unwrap();

        let CycleOutcome::Reposted(repost) = outcome else {
            panic!("expected a repost, got {:?}", outcome);
        };
        assert_eq!(repost.publication.id.as_str(), "beta/3");
        assert_eq!(fetcher.calls().len(), 3);
        assert_eq!(reposts.pick_up_most_trending(false).unwrap(), vec![repost]);
    }

    #[tokio::test]
    async fn failing_channel_is_left_out_of_cycle() {
        let (poller, _, _) = make_poller(
            make_config(true, &["alpha", "missing"]),
            trending_fetcher(),
        );

        let outcome = poller.run_cycle(&CancellationToken::new()).await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Reposted(r) if r.publication.id.as_str() == "alpha/3"
        ));
    }

    #[tokio::test]
    async fn consecutive_cycles_do_not_repost_twice() {
        let (poller, _, reposts) = make_poller(make_config(true, &["beta"]), trending_fetcher());
        let cancel = CancellationToken::new();

        assert!(matches!(
            poller.run_cycle(&cancel).await,
            Some(CycleOutcome::Reposted(_))
        ));
        assert_eq!(poller.run_cycle(&cancel).await, Some(CycleOutcome::Exhausted));
        assert_eq!(reposts.pick_up_most_trending(true).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_best_channel_wins_next_cycle() {
        let (poller, _, _) =
            make_poller(make_config(false, &["alpha", "beta"]), trending_fetcher());
        let cancel = CancellationToken::new();

        poller.run_cycle(&cancel).await.unwrap();
        let outcome = poller.run_cycle(&cancel).await.unwrap();

        assert!(matches!(
            outcome,
            CycleOutcome::Reposted(r) if r.publication.id.as_str() == "alpha/3"
        ));
    }

    #[tokio::test]
    async fn sequential_cycle_fetches_in_configured_order() {
        let (poller, fetcher, _) = make_poller(
            make_config(false, &["flat", "beta", "alpha"]),
            trending_fetcher(),
        );

        poller.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(fetcher.calls(), vec!["flat", "beta", "alpha"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sequential_cycle_pauses_between_channels_only() {
        let mut config = make_config(false, &["flat", "beta", "alpha"]);
        config.pause_between_sync_channels = 5;
        let (poller, fetcher, _) = make_poller(config, trending_fetcher());

        let started = tokio::time::Instant::now();
        poller.run_cycle(&CancellationToken::new()).await.unwrap();

        assert_eq!(started.elapsed(), std::time::Duration::from_secs(10));
        assert_eq!(fetcher.calls(), vec!["flat", "beta", "alpha"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_pause_stops_sequential_cycle() {
        let mut config = make_config(false, &["flat", "beta", "alpha"]);
        config.pause_between_sync_channels = 5;
        let (poller, fetcher, reposts) = make_poller(config, trending_fetcher());
        let cancel = CancellationToken::new();

        let (outcome, ()) = tokio::join!(poller.run_cycle(&cancel), async {
            sleep(std::time::Duration::from_secs(2)).await;
            cancel.cancel();
        });

        assert_eq!(outcome, None);
        assert_eq!(fetcher.calls(), vec!["flat"]);
        assert!(reposts.pick_up_most_trending(false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn cycle_without_trending_publications_is_exhausted() {
        let (poller, _, reposts) = make_poller(make_config(false, &["flat"]), trending_fetcher());

        let outcome = poller.run_cycle(&CancellationToken::new()).await;

        assert_eq!(outcome, Some(CycleOutcome::Exhausted));
        assert!(reposts.pick_up_most_trending(false).unwrap().is_empty());
    }

    #[tokio::test]
    async fn cancelled_cycle_returns_none() {
        let (poller, _, _) = make_poller(make_config(true, &["alpha"]), trending_fetcher());
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert_eq!(poller.run_cycle(&cancel).await, None);
    }

    #[tokio::test]
    async fn spawned_poller_stops_on_cancel() {
        let (poller, fetcher, _) = make_poller(make_config(true, &["beta"]), trending_fetcher());
        let cancel = CancellationToken::new();

        let handle = poller.spawn(cancel.clone());
        while fetcher.calls().is_empty() {
            tokio::task::yield_now().await;
        }
        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("poller did not stop")
            .unwrap();
    }
}
