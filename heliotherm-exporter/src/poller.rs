//! Scrape-driven polling of the heat pump.
//!
//! All scrapes funnel through one critical section: the serial link tolerates
//! exactly one in-flight query, so concurrent HTTP requests serialize here
//! rather than racing the transport.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use heliotherm_protocol::command::{CONNECT_STRING, RESPONSE_SUCCESS};
use heliotherm_protocol::{Command, Response};

use crate::config::PollConfig;
use crate::registers::{RegisterSpec, RegisterTable};
use crate::transport::{Connector, Link, TransportError};

/// Poll-level failures. Recovered at the scrape boundary; the HTTP layer
/// only ever sees a stale or missing snapshot.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("login rejected by controller")]
    LoginRejected,
    #[error("poll exceeded the {0:?} deadline")]
    Deadline(Duration),
}

/// Decoded register values from one successful poll.
///
/// Immutable once built; a failed poll never mutates an existing snapshot.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Values by logical register name. Registers the device answered with
    /// an error are simply absent.
    pub values: BTreeMap<String, f64>,
    /// Wall-clock time the poll completed.
    pub timestamp: DateTime<Utc>,
    taken_at: tokio::time::Instant,
}

impl Snapshot {
    fn new(values: BTreeMap<String, f64>) -> Self {
        Self {
            values,
            timestamp: Utc::now(),
            taken_at: tokio::time::Instant::now(),
        }
    }

    /// Age of this snapshot, for the minimum-interval cache.
    pub fn age(&self) -> Duration {
        self.taken_at.elapsed()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(values: BTreeMap<String, f64>) -> Self {
        Self::new(values)
    }
}

/// Result of one scrape.
#[derive(Debug, Clone)]
pub enum ScrapeOutcome {
    /// A snapshot no older than the minimum poll interval.
    Fresh(Arc<Snapshot>),
    /// The latest poll failed; this is the last known-good snapshot.
    Stale(Arc<Snapshot>),
    /// No poll has ever succeeded.
    NoData,
}

/// Poller statistics, exported as self-metrics.
#[derive(Debug, Clone, Default)]
pub struct PollerStats {
    /// Poll cycles that failed as a whole.
    pub gathering_errors: u64,
    /// Individual query failures (timeouts, rejected frames, `ERR,` replies).
    pub communication_errors: u64,
    /// Poll cycles attempted against the device.
    pub polls_attempted: u64,
    /// Poll cycles that produced a snapshot.
    pub polls_succeeded: u64,
}

struct PollState {
    link: Option<Link>,
    snapshot: Option<Arc<Snapshot>>,
    stale: bool,
}

/// Polls the full register table on demand and caches the result.
pub struct Poller {
    connector: Box<dyn Connector>,
    table: RegisterTable,
    config: PollConfig,
    state: Mutex<PollState>,
    stats: RwLock<PollerStats>,
}

impl Poller {
    pub fn new(connector: Box<dyn Connector>, table: RegisterTable, config: PollConfig) -> Self {
        Self {
            connector,
            table,
            config,
            state: Mutex::new(PollState {
                link: None,
                snapshot: None,
                stale: false,
            }),
            stats: RwLock::new(PollerStats::default()),
        }
    }

    /// The register table this poller reads.
    pub fn table(&self) -> &RegisterTable {
        &self.table
    }

    /// Current statistics.
    pub fn stats(&self) -> PollerStats {
        self.stats.read().clone()
    }

    /// Whether at least one poll has succeeded.
    pub async fn ready(&self) -> bool {
        self.state.lock().await.snapshot.is_some()
    }

    /// Serve a scrape: reuse the cached snapshot when it is young enough,
    /// otherwise poll the device. Failures fall back to the previous
    /// snapshot (marked stale) or report no data.
    pub async fn scrape(&self) -> ScrapeOutcome {
        let mut state = self.state.lock().await;

        if let Some(snapshot) = &state.snapshot {
            if snapshot.age() < Duration::from_secs(self.config.min_interval_secs) {
                debug!(age_ms = snapshot.age().as_millis() as u64, "Serving cached snapshot");
                return if state.stale {
                    ScrapeOutcome::Stale(Arc::clone(snapshot))
                } else {
                    ScrapeOutcome::Fresh(Arc::clone(snapshot))
                };
            }
        }

        self.stats.write().polls_attempted += 1;

        let deadline = Duration::from_secs(self.config.scrape_timeout_secs);
        let result = tokio::time::timeout(deadline, self.poll_once(&mut state))
            .await
            .unwrap_or(Err(PollError::Deadline(deadline)));

        match result {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                state.snapshot = Some(Arc::clone(&snapshot));
                state.stale = false;
                self.stats.write().polls_succeeded += 1;
                ScrapeOutcome::Fresh(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "Poll failed");
                self.stats.write().gathering_errors += 1;
                // drop the link; the next poll reopens it lazily
                state.link = None;
                state.stale = true;
                match &state.snapshot {
                    Some(snapshot) => ScrapeOutcome::Stale(Arc::clone(snapshot)),
                    None => ScrapeOutcome::NoData,
                }
            }
        }
    }

    /// Log out and drop the link on clean shutdown.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(link) = state.link.as_mut() {
            match link.exchange(&Command::Logout).await {
                Ok(payload) if payload == RESPONSE_SUCCESS => {
                    info!("Logged out from controller");
                }
                Ok(_) | Err(_) => {
                    debug!("Logout not acknowledged");
                }
            }
        }
        state.link = None;
    }

    /// One full poll cycle: connect if needed, read every register.
    async fn poll_once(&self, state: &mut PollState) -> Result<Snapshot, PollError> {
        self.ensure_link(state).await?;
        let link = state.link.as_mut().expect("link opened by ensure_link");

        let mut values = BTreeMap::new();
        for spec in self.table.all() {
            if let Some(value) = self.read_register(link, spec).await? {
                values.insert(spec.name.clone(), value);
            }
        }

        debug!(
            registers = values.len(),
            of = self.table.len(),
            "Poll complete"
        );
        Ok(Snapshot::new(values))
    }

    /// Open the transport and run the login handshake.
    ///
    /// A silent controller gets the modem wake-up string once, then one more
    /// login attempt.
    async fn ensure_link(&self, state: &mut PollState) -> Result<(), PollError> {
        if state.link.is_some() {
            return Ok(());
        }

        let stream = self.connector.connect().await?;
        let mut link = Link::new(stream, Duration::from_millis(self.config.response_timeout_ms));

        match link.exchange(&Command::Login).await {
            Ok(payload) if payload == RESPONSE_SUCCESS => {}
            Ok(_) => return Err(PollError::LoginRejected),
            Err(TransportError::Timeout(_)) => {
                debug!("No login reply; sending connect string");
                link.send_raw(CONNECT_STRING).await?;
                let payload = link.exchange(&Command::Login).await?;
                if payload != RESPONSE_SUCCESS {
                    return Err(PollError::LoginRejected);
                }
            }
            Err(e) => return Err(e.into()),
        }

        info!("Logged in to controller");
        state.link = Some(link);
        Ok(())
    }

    /// Read one register. `Ok(None)` means this register is absent from the
    /// snapshot (device-side error); transport failures abort the poll.
    async fn read_register(
        &self,
        link: &mut Link,
        spec: &RegisterSpec,
    ) -> Result<Option<f64>, PollError> {
        let command = spec.command();
        let mut attempts = 0u32;

        let payload = loop {
            match link.exchange(&command).await {
                Ok(payload) => break payload,
                Err(TransportError::Timeout(t)) if attempts < self.config.retries => {
                    attempts += 1;
                    self.stats.write().communication_errors += 1;
                    debug!(
                        register = %spec.name,
                        attempt = attempts,
                        timeout_ms = t.as_millis() as u64,
                        "Query timed out, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        };

        match Response::parse(&payload) {
            Ok(Response::Value(value)) if value.nr == spec.number => {
                debug!(register = %spec.name, nr = value.nr, value = value.value, "Read register");
                Ok(Some(value.value * spec.scale))
            }
            // a late reply to an earlier query must not be credited here
            Ok(Response::Value(value)) => {
                self.stats.write().communication_errors += 1;
                warn!(
                    register = %spec.name,
                    expected = spec.number,
                    answered = value.nr,
                    "Reply addresses a different register"
                );
                Ok(None)
            }
            Ok(Response::Err(message)) => {
                self.stats.write().communication_errors += 1;
                info!(register = %spec.name, %message, "Controller reported an error");
                Ok(None)
            }
            Ok(Response::Ok) => {
                self.stats.write().communication_errors += 1;
                warn!(register = %spec.name, "Unexpected OK reply to a read");
                Ok(None)
            }
            Err(e) => {
                self.stats.write().communication_errors += 1;
                warn!(register = %spec.name, error = %e, "Unparseable reply payload");
                Ok(None)
            }
        }
    }
}
