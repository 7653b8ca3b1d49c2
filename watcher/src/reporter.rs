//! Deliver change reports to the server

use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, warn};

use crate::classify::ChangeReport;

/// Attempts per report before it is dropped
const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(200);

pub struct Reporter {
    client: reqwest::Client,
    url: String,
}

impl Reporter {
    pub fn new(url: String) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Post one report, retrying transport failures and server errors with
    /// exponential backoff. Returns whether the server accepted it.
    pub async fn send(&self, report: &ChangeReport) -> bool {
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff(attempt)).await;
            }

            match self.client.post(&self.url).json(report).send().await {
                Ok(response) if response.status().is_success() => {
                    if response.status() == StatusCode::NO_CONTENT {
                        debug!("Server does not know container {}", report.container_id);
                    }
                    return true;
                }
                Ok(response) if response.status().is_client_error() => {
                    warn!(
                        "Server rejected {:?} {}: {}",
                        report.event,
                        report.path,
                        response.status()
                    );
                    return false;
                }
                Ok(response) => {
                    warn!(
                        "Attempt {} to report {} failed: {}",
                        attempt + 1,
                        report.path,
                        response.status()
                    );
                }
                Err(e) => {
                    warn!("Attempt {} to report {} failed: {}", attempt + 1, report.path, e);
                }
            }
        }

        warn!("Giving up on {:?} {}", report.event, report.path);
        false
    }
}

fn backoff(attempt: u32) -> Duration {
    BASE_BACKOFF * 2u32.pow(attempt.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_millis(200));
        assert_eq!(backoff(2), Duration::from_millis(400));
    }
}
