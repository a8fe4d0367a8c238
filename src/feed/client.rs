//! Feed fetch policy: up to 3 attempts with exponential backoff, terminal
//! on 404 and other 4xx, best-effort parse on non-200/non-4xx (spec §4.1).

use crate::error::{FeedError, Result};
use std::time::Duration;

const LORE_HOST: &str = "https://lore.kernel.org";
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_SCHEDULE_SECS: [u64; 2] = [1, 2];
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Thin wrapper over `reqwest::Client` carrying the fetch policy.
#[derive(Debug, Clone)]
pub struct FeedClient {
    http: reqwest::Client,
}

impl FeedClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self { http }
    }

    pub fn feed_url(subsystem: &str) -> String {
        format!("{LORE_HOST}/{subsystem}/new.atom")
    }

    /// Fetch `<subsystem>/new.atom`, retrying transient failures and
    /// terminating on 404 / other 4xx per spec §4.1.
    #[tracing::instrument(skip(self), fields(subsystem))]
    pub async fn fetch(&self, subsystem: &str) -> Result<String> {
        let url = Self::feed_url(subsystem);
        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..MAX_ATTEMPTS {
            match self.http.get(&url).send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.as_u16() == 404 {
                        return Err(FeedError::Unavailable {
                            subsystem: subsystem.to_string(),
                            reason: "404 not found".to_string(),
                        }
                        .into());
                    }
                    if status.is_client_error() {
                        return Err(FeedError::Unavailable {
                            subsystem: subsystem.to_string(),
                            reason: format!("terminal client error: {status}"),
                        }
                        .into());
                    }
                    if status.as_u16() == 429 {
                        let retry_after = response
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or_else(|| backoff_secs(attempt));
                        tracing::warn!(subsystem, retry_after, "rate limited, retrying");
                        tokio::time::sleep(Duration::from_secs(retry_after)).await;
                        continue;
                    }
                    if !status.is_success() {
                        tracing::warn!(subsystem, %status, "non-200 non-4xx feed response, attempting parse anyway");
                    }

                    return response
                        .text()
                        .await
                        .map_err(|e| FeedError::Transient {
                            url: url.clone(),
                            source: e.into(),
                        }
                        .into());
                }
                Err(error) => {
                    tracing::warn!(subsystem, attempt, %error, "transient feed fetch failure");
                    last_error = Some(error.into());
                    if attempt + 1 < MAX_ATTEMPTS {
                        tokio::time::sleep(Duration::from_secs(backoff_secs(attempt))).await;
                    }
                }
            }
        }

        Err(FeedError::Transient {
            url,
            source: last_error.unwrap_or_else(|| anyhow::anyhow!("exhausted retries")),
        }
        .into())
    }

    /// Fetch an arbitrary root URL for the CC-list fetcher (spec §4.6,
    /// §6 "CC-list fetcher").
    pub async fn fetch_raw(&self, url: &str) -> Result<String> {
        self.http
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::Transient {
                url: url.to_string(),
                source: e.into(),
            })?
            .text()
            .await
            .map_err(|e| {
                FeedError::Transient {
                    url: url.to_string(),
                    source: e.into(),
                }
                .into()
            })
    }
}

impl Default for FeedClient {
    fn default() -> Self {
        Self::new()
    }
}

fn backoff_secs(attempt: u32) -> u64 {
    BACKOFF_SCHEDULE_SECS
        .get(attempt as usize)
        .copied()
        .unwrap_or(*BACKOFF_SCHEDULE_SECS.last().unwrap())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feed_url_matches_lore_pattern() {
        assert_eq!(
            FeedClient::feed_url("linux-mm"),
            "https://lore.kernel.org/linux-mm/new.atom"
        );
    }

    #[test]
    fn backoff_schedule_is_1_then_2() {
        assert_eq!(backoff_secs(0), 1);
        assert_eq!(backoff_secs(1), 2);
        assert_eq!(backoff_secs(2), 2);
    }
}
