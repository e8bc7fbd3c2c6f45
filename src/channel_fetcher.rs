use crate::types::{Channel, Publication};
use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::{Client, StatusCode};
use std::future::Future;
use std::sync::LazyLock;
use std::time::Duration;

const TELEGRAM_HOST: &str = "https://t.me";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static MESSAGE_WRAP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"class="tgme_widget_message_wrap\b"#).expect("valid regex"));
static DATA_POST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"data-post="([^"]+)""#).expect("valid regex"));
static VIEWS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class="tgme_widget_message_views"[^>]*>([^<]*)<"#).expect("valid regex")
});
static POSTED_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"class="tgme_widget_message_date"[^>]*>\s*<time[^>]*datetime="([^"]+)""#)
        .expect("valid regex")
});

// ============================================================================
// ChannelFetcher trait
// ============================================================================

pub trait ChannelFetcher: Send + Sync + 'static {
    /// Fetch the most recent publications of `channel`, oldest first.
    fn fetch(&self, channel: &Channel) -> impl Future<Output = Result<Vec<Publication>>> + Send;
}

// ============================================================================
// TelegramFetcher — public channel preview pages
// ============================================================================

/// Reads `t.me/s/<channel>`, the public web preview of a channel.
pub struct TelegramFetcher {
    client: Client,
    host: String,
}

impl Default for TelegramFetcher {
    fn default() -> Self {
        Self::with_host(TELEGRAM_HOST)
    }
}

impl TelegramFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(host: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            host: host.into(),
        }
    }
}

impl ChannelFetcher for TelegramFetcher {
    async fn fetch(&self, channel: &Channel) -> Result<Vec<Publication>> {
        let url = format!("{}/s/{}", self.host, channel.id);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("HTTP request to {} failed", url))?;

        if resp.status() != StatusCode::OK {
            bail!("HTTP request to {} failed with status {}", url, resp.status());
        }

        let body = resp.text().await.context("cannot read HTTP response")?;
        parse_channel_page(&body)?
            .into_iter()
            .map(RawPublication::generalize)
            .collect()
    }
}

/// Publication fields as they appear on the page.
#[derive(Debug, PartialEq)]
struct RawPublication<'a> {
    id: &'a str,
    views: &'a str,
    posted_at: &'a str,
}

impl RawPublication<'_> {
    fn generalize(self) -> Result<Publication> {
        let posted_at = DateTime::parse_from_rfc3339(self.posted_at)
            .with_context(|| format!("invalid posted at {:?} on {}", self.posted_at, self.id))?
            .with_timezone(&Utc);
        let views = dehumanize_view_count(self.views)
            .with_context(|| format!("invalid view count on {}", self.id))?;
        Ok(Publication::new(self.id, views, posted_at))
    }
}

fn parse_channel_page(html: &str) -> Result<Vec<RawPublication<'_>>> {
    let starts: Vec<usize> = MESSAGE_WRAP.find_iter(html).map(|m| m.start()).collect();
    if starts.is_empty() {
        bail!(
            "no publications found in tgme_widget_message_wrap. this may be private or non-existent channel"
        );
    }

    let mut publications = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(html.len());
        let block = &html[start..end];

        let id = capture(&DATA_POST, block).ok_or_else(|| anyhow!("one of publications has no ID"))?;

        // service messages (pins, title changes) carry no view counter
        let Some(views) = capture(&VIEWS, block) else {
            continue;
        };

        let posted_at = capture(&POSTED_AT, block)
            .ok_or_else(|| anyhow!("publication {} has no posted at", id))?;

        publications.push(RawPublication {
            id,
            views: views.trim(),
            posted_at,
        });
    }

    Ok(publications)
}

fn capture<'a>(re: &Regex, haystack: &'a str) -> Option<&'a str> {
    re.captures(haystack)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Turn a counter like `4.91M` or `12.5K` back into a number, truncating
/// toward zero. Bare digits are taken as is.
pub fn dehumanize_view_count(humanized: &str) -> Result<u64> {
    let humanized = humanized.trim();
    let (number, multiplier) = match humanized.chars().last() {
        Some('K') => (&humanized[..humanized.len() - 1], 1_000.0),
        Some('M') => (&humanized[..humanized.len() - 1], 1_000_000.0),
        _ => {
            return humanized
                .parse()
                .with_context(|| format!("cannot parse view count {:?}", humanized));
        }
    };

    let value: f64 = number
        .parse()
        .with_context(|| format!("cannot parse view count {:?}", humanized))?;
    if !value.is_finite() || value < 0.0 {
        bail!("view count {:?} out of range", humanized);
    }

    // 4.91 * 1e6 lands just below 4910000 in binary floating point
    Ok((value * multiplier + 1e-6).trunc() as u64)
}
