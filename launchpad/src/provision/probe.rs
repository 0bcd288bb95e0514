//! Readiness and liveness probes

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::utils::{calc_exp_backoff, CooldownOptions};

/// Upper bound on a single probe attempt
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(10);

/// A reachability check against `address:port`
#[async_trait]
pub trait Probe: Send + Sync {
    async fn check(&self, address: &str, port: u16) -> Result<(), String>;
}

/// Succeeds once a TCP connection is accepted
#[derive(Debug, Default)]
pub struct TcpProbe;

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self, address: &str, port: u16) -> Result<(), String> {
        match tokio::time::timeout(ATTEMPT_TIMEOUT, TcpStream::connect((address, port))).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(format!("connect {}:{}: {}", address, port, e)),
            Err(_) => Err(format!("connect {}:{}: timed out", address, port)),
        }
    }
}

/// Succeeds once the server answers an HTTP request with any status below 500
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(ATTEMPT_TIMEOUT).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, address: &str, port: u16) -> Result<(), String> {
        let url = format!("http://{}:{}/", address, port);
        match self.client.get(&url).send().await {
            Ok(response) if response.status().is_server_error() => {
                Err(format!("GET {}: HTTP {}", url, response.status()))
            }
            Ok(_) => Ok(()),
            Err(e) => Err(format!("GET {}: {}", url, e)),
        }
    }
}

/// Demo probe: every address is reachable
#[derive(Debug, Default)]
pub struct AlwaysReachable;

#[async_trait]
impl Probe for AlwaysReachable {
    async fn check(&self, _address: &str, _port: u16) -> Result<(), String> {
        Ok(())
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, PartialEq)]
pub struct ProbePolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub deadline: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            deadline: Duration::from_secs(300),
        }
    }
}

/// Why polling stopped without success
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    Deadline { attempts: u32, last_error: String },
    Cancelled,
}

/// Poll until the probe succeeds, the deadline elapses or `cancel` fires
///
/// Returns the number of attempts made. The first attempt runs immediately.
pub async fn wait_until_ready(
    probe: &dyn Probe,
    address: &str,
    port: u16,
    policy: &ProbePolicy,
    cancel: &CancellationToken,
) -> Result<u32, ProbeFailure> {
    let started = Instant::now();
    let cooldown = CooldownOptions {
        base_delay: policy.initial_delay,
        max_delay: policy.max_delay,
        multiplier: 2.0,
    };
    let mut attempts = 0;

    loop {
        attempts += 1;
        let result = tokio::select! {
            result = probe.check(address, port) => result,
            _ = cancel.cancelled() => return Err(ProbeFailure::Cancelled),
        };

        let last_error = match result {
            Ok(()) => {
                debug!("{}:{} reachable after {} attempt(s)", address, port, attempts);
                return Ok(attempts);
            }
            Err(e) => e,
        };

        let remaining = policy.deadline.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(ProbeFailure::Deadline {
                attempts,
                last_error,
            });
        }

        let delay = calc_exp_backoff(&cooldown, attempts - 1).min(remaining);
        debug!(
            "{}:{} not reachable ({}), retrying in {:?}",
            address, port, last_error, delay
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(ProbeFailure::Cancelled),
        }
    }
}
