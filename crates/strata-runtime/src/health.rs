//! Periodic, timeout-bounded health gate.
//!
//! ```text
//!            success                 success
//! UNKNOWN ───────────► HEALTHY ◄──────────────┐
//!    │                    │                   │
//!    │ failure (after     │ failure           │
//!    │ start period)      ▼                   │
//!    └──────────────► count += 1 ── count >= retries ──► UNHEALTHY
//! ```
//!
//! Failures inside the start period are not counted, unless the service
//! already reported healthy once. Any success resets the count.

use std::future::Future;
use std::time::Duration;

use strata_core::HealthConfig;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// Result of a single probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure(String),
}

impl ProbeOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Derived probe state; never persisted.
#[derive(Debug, Clone)]
pub struct HealthState {
    status: HealthStatus,
    failures: u32,
    started: Instant,
    start_period: Duration,
    retries: u32,
    /// Set by the first success; failures count from then on.
    started_up: bool,
}

impl HealthState {
    pub fn new(config: &HealthConfig, started: Instant) -> Self {
        Self {
            status: HealthStatus::Unknown,
            failures: 0,
            started,
            start_period: config.start_period(),
            retries: config.retries.max(1),
            started_up: false,
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
    }

    /// Consecutive counted failures.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Folds one probe outcome observed at `at` into the state.
    pub fn observe(&mut self, outcome: &ProbeOutcome, at: Instant) -> HealthStatus {
        if outcome.is_success() {
            self.status = HealthStatus::Healthy;
            self.failures = 0;
            self.started_up = true;
            return self.status;
        }

        let in_start_period = at.saturating_duration_since(self.started) < self.start_period;
        if in_start_period && !self.started_up {
            return self.status;
        }

        self.failures += 1;
        if self.failures >= self.retries {
            self.status = HealthStatus::Unhealthy;
        }
        self.status
    }
}

/// Anything that can answer "is the service healthy right now".
#[allow(async_fn_in_trait)]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), HealthError>;
}

/// `GET http://<host>:<port><path>`; success is a 2xx status.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(host: &str, port: u16, config: &HealthConfig) -> Result<Self, HealthError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| HealthError::Client { source: e })?;
        Ok(Self {
            client,
            url: format!("http://{host}:{port}{}", config.path),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl HealthProbe for HttpProbe {
    async fn probe(&self) -> Result<(), HealthError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| HealthError::Request {
                url: self.url.clone(),
                source: e,
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(HealthError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            })
        }
    }
}

/// Drives a [`HealthProbe`] on the configured schedule.
pub struct HealthGate<P: HealthProbe> {
    probe: P,
    config: HealthConfig,
}

impl<P: HealthProbe> HealthGate<P> {
    pub fn new(probe: P, config: HealthConfig) -> Self {
        Self { probe, config }
    }

    /// One probe, bounded by the configured timeout. A timeout is a failure.
    pub async fn check_once(&self) -> ProbeOutcome {
        match tokio::time::timeout(self.config.timeout(), self.probe.probe()).await {
            Ok(Ok(())) => ProbeOutcome::Success,
            Ok(Err(e)) => ProbeOutcome::Failure(e.to_string()),
            Err(elapsed) => {
                tracing::debug!(%elapsed, "health probe cancelled");
                ProbeOutcome::Failure(
                    HealthError::Timeout {
                        after: self.config.timeout(),
                    }
                    .to_string(),
                )
            }
        }
    }

    /// Probes every interval, first one an interval after start, until the
    /// status becomes UNHEALTHY or `shutdown` completes. Returns the last
    /// status.
    pub async fn run<F>(&self, shutdown: F) -> HealthStatus
    where
        F: Future<Output = ()>,
    {
        let started = Instant::now();
        let mut state = HealthState::new(&self.config, started);
        let interval = self.config.interval();
        let mut ticker = tokio::time::interval_at(started + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => return state.status(),
                _ = ticker.tick() => {}
            }

            let outcome = self.check_once().await;
            let previous = state.status();
            let status = state.observe(&outcome, Instant::now());

            if let ProbeOutcome::Failure(reason) = &outcome {
                tracing::warn!(failures = state.failures(), %reason, "health probe failed");
            }
            if status != previous {
                tracing::info!(
                    from = previous.as_str(),
                    to = status.as_str(),
                    "health status changed"
                );
            }
            if status == HealthStatus::Unhealthy {
                return status;
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HealthError {
    #[error("failed to build HTTP client")]
    Client { source: reqwest::Error },

    #[error("request to {url} failed")]
    Request { url: String, source: reqwest::Error },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("probe timed out after {}s", after.as_secs())]
    Timeout { after: Duration },
}
