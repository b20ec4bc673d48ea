use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;

const USER_AGENT: &str = "telegram-bot-scheduler/1.0";

/// What the worker records after firing a schedule. A successful HTTP
/// exchange is recorded even if the upstream returned an error status —
/// only a transport failure after exhausting retries leaves `status_code`
/// empty and `error` set.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub status_code: Option<i32>,
    pub error: Option<String>,
}

/// Fires the outbound `scenarioRun` call against the puzzlebot API.
pub struct Dispatcher {
    client: Client,
    base_url: String,
    retries: u32,
}

impl Dispatcher {
    pub fn new(base_url: String, timeout: Duration, retries: u32) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url,
            retries,
        })
    }

    /// Fire a single schedule and report the outcome, never returning an
    /// `Err` itself — transport failures become an `error` string so the
    /// worker can always write back a result.
    pub async fn fire(&self, token: &str, user_id: i64, scenario_id: i64) -> DispatchOutcome {
        let params = [
            ("token", token.to_string()),
            ("method", "scenarioRun".to_string()),
            ("scenario_id", scenario_id.to_string()),
            ("user_id", user_id.to_string()),
        ];

        match self.request_with_retries(&params).await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_client_error() || status.is_server_error() {
                    let body = resp.text().await.unwrap_or_default();
                    let truncated: String = body.chars().take(1000).collect();
                    DispatchOutcome {
                        status_code: Some(status.as_u16() as i32),
                        error: Some(format!("HTTP {}: {}", status.as_u16(), truncated)),
                    }
                } else {
                    DispatchOutcome {
                        status_code: Some(status.as_u16() as i32),
                        error: None,
                    }
                }
            }
            Err(err) => DispatchOutcome {
                status_code: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Retry transport failures with exponential backoff (`0.5 * 2^i`
    /// seconds), giving up after `retries` extra attempts beyond the first.
    async fn request_with_retries(
        &self,
        params: &[(&str, String)],
    ) -> reqwest::Result<reqwest::Response> {
        let attempts = self.retries + 1;

        for attempt in 0..attempts {
            match self.client.get(&self.base_url).query(params).send().await {
                Ok(resp) => return Ok(resp),
                Err(err) if attempt + 1 == attempts => return Err(err),
                Err(_) => {
                    let delay = Duration::from_secs_f64(0.5 * 2f64.powi(attempt as i32));
                    tokio::time::sleep(delay).await;
                }
            }
        }

        unreachable!("loop always returns on the last attempt")
    }
}
