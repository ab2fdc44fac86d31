//! Circuit breaker guarding a single upstream dependency
//!
//! The breaker tracks consecutive failures and successes of outbound calls and
//! exposes a binary admission decision. When the upstream keeps failing the
//! breaker opens and short-circuits calls until a cool-down elapses, then
//! admits a bounded number of probe calls to test recovery.
//!
//! The breaker performs no I/O and never fails: it only answers
//! [`CircuitBreaker::can_execute`] and records outcomes. Callers raise their
//! own "circuit open" error when admission is denied.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

//==============================================================================
// Time Abstraction for Testability
//==============================================================================

/// Trait for time operations to enable deterministic testing
///
/// Production code uses [`SystemClock`]; tests drive a [`MockClock`] forward
/// to exercise the recovery window without sleeping.
pub trait Clock: Send + Sync + 'static {
    /// Get current instant (monotonic time)
    fn now(&self) -> Instant;

    /// Get current system time (wall clock)
    fn system_time(&self) -> SystemTime;

    /// Get milliseconds since UNIX epoch
    fn millis_since_epoch(&self) -> u64 {
        let millis =
            self.system_time().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        u64::try_from(millis).unwrap_or(u64::MAX)
    }
}

/// Real system clock implementation for production use
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Mock clock for deterministic testing
///
/// Clones share the same elapsed counter, so a test can keep one handle and
/// hand another to the breaker.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Create a new mock clock starting at the current instant
    pub fn new() -> Self {
        Self { start: Instant::now(), elapsed: Arc::new(Mutex::new(Duration::ZERO)) }
    }

    /// Advance the mock clock by a duration
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// Advance the mock clock by milliseconds
    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    /// Set the mock clock to a specific elapsed time
    pub fn set_elapsed(&self, duration: Duration) {
        *self.elapsed.lock() = duration;
    }

    /// Get the current elapsed time
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.elapsed()
    }
}

//==============================================================================
// Configuration
//==============================================================================

/// Configuration validation error
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Upstream presumed healthy, all calls admitted
    Closed,
    /// Upstream presumed unhealthy, calls short-circuited
    Open,
    /// Probing recovery with a bounded number of calls
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Immutable circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) that open the circuit
    pub failure_threshold: u64,
    /// Time the circuit stays open before admitting a probe
    pub reset_timeout: Duration,
    /// Maximum number of calls admitted while half-open
    pub half_open_max_calls: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, reset_timeout: Duration::from_secs(30), half_open_max_calls: 1 }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid {
                message: "failure_threshold must be greater than 0".to_string(),
            });
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::Invalid {
                message: "half_open_max_calls must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.config.reset_timeout = timeout;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

//==============================================================================
// Breaker
//==============================================================================

/// Point-in-time snapshot of breaker counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u64,
    pub success_count: u64,
    /// Wall-clock time of the most recent recorded failure
    pub last_failure_time: Option<SystemTime>,
    pub half_open_calls: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u64,
    success_count: u64,
    half_open_calls: u64,
    /// Bumped on every entry into half-open; tags probe permits
    probe_window: u64,
    last_failure_at: Option<Instant>,
    last_failure_time: Option<SystemTime>,
}

impl BreakerState {
    const fn closed(probe_window: u64) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            probe_window,
            last_failure_at: None,
            last_failure_time: None,
        }
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Rejected,
    Admitted,
    /// Admitted into the half-open window with the given tag
    Probe(u64),
}

/// Consecutive-failure circuit breaker
///
/// All counters live behind a single lock so every transition is applied
/// atomically with respect to concurrent callers. No method holds the lock
/// across an `.await`.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("config", &self.config)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker {
    /// Create a circuit breaker backed by the system clock
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }

    /// Create a circuit breaker with a custom clock (useful for testing)
    pub fn with_clock<C: Clock>(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        config.validate()?;

        Ok(Self { config, inner: Mutex::new(BreakerState::closed(0)), clock: Arc::new(clock) })
    }

    /// Configuration this breaker was built with
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Decide whether a call may proceed
    ///
    /// While open, the first check at or after `reset_timeout` since the last
    /// failure moves the breaker to half-open and admits that call as the
    /// first probe. While half-open, each admitted call consumes one of the
    /// `half_open_max_calls` probe slots.
    pub fn can_execute(&self) -> bool {
        self.admit() != Admission::Rejected
    }

    /// Admission check returning a permit that owns the admitted slot
    ///
    /// Settle the permit with [`CallPermit::record_success`] or
    /// [`CallPermit::record_failure`]. A permit dropped unsettled (the caller
    /// gave up, or the call never left the process) hands its half-open probe
    /// slot back without recording an outcome.
    pub fn try_acquire(self: &Arc<Self>) -> Option<CallPermit> {
        let probe_window = match self.admit() {
            Admission::Rejected => return None,
            Admission::Admitted => None,
            Admission::Probe(window) => Some(window),
        };

        Some(CallPermit { breaker: Arc::clone(self), probe_window, settled: false })
    }

    fn admit(&self) -> Admission {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => Admission::Admitted,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure_at
                    .map_or(Duration::MAX, |at| self.clock.now().saturating_duration_since(at));

                if elapsed < self.config.reset_timeout {
                    return Admission::Rejected;
                }

                inner.state = CircuitState::HalfOpen;
                inner.half_open_calls = 1;
                inner.probe_window = inner.probe_window.wrapping_add(1);
                let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                info!(elapsed_ms, "Circuit breaker half-open, admitting probe");
                Admission::Probe(inner.probe_window)
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    Admission::Probe(inner.probe_window)
                } else {
                    debug!(
                        half_open_calls = inner.half_open_calls,
                        "Circuit breaker rejecting call, probe slots exhausted"
                    );
                    Admission::Rejected
                }
            }
        }
    }

    /// Give back a probe slot taken in `probe_window`, if that window is
    /// still the current one
    fn release_probe(&self, probe_window: u64) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen
            && inner.probe_window == probe_window
            && inner.half_open_calls > 0
        {
            inner.half_open_calls -= 1;
            debug!(half_open_calls = inner.half_open_calls, "Released unsettled probe slot");
        }
    }

    /// Record a successful attempt
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.success_count = inner.success_count.saturating_add(1);

        match inner.state {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                inner.half_open_calls = 0;
                info!(success_count = inner.success_count, "Circuit breaker closed after probe success");
            }
            CircuitState::Open => {
                // A call admitted before the circuit opened completed late.
                debug!("Received success while circuit is open");
            }
        }
    }

    /// Record a failed attempt
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let wall = self.clock.system_time();
        let mut inner = self.inner.lock();

        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(now);
        inner.last_failure_time = Some(wall);

        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    warn!(
                        failure_count = inner.failure_count,
                        threshold = self.config.failure_threshold,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.half_open_calls = 0;
                warn!("Circuit breaker reopened due to failure in half-open state");
            }
            CircuitState::Open => {}
        }
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Snapshot of the breaker counters
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_time: inner.last_failure_time,
            half_open_calls: inner.half_open_calls,
        }
    }

    /// Time left before an open breaker admits its next probe
    ///
    /// `None` unless the breaker is open.
    pub fn remaining_open_time(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return None;
        }

        let elapsed = inner
            .last_failure_at
            .map_or(Duration::MAX, |at| self.clock.now().saturating_duration_since(at));
        Some(self.config.reset_timeout.saturating_sub(elapsed))
    }

    /// Force the breaker closed and zero every counter
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let probe_window = inner.probe_window;
        *inner = BreakerState::closed(probe_window);
        drop(inner);
        info!("Circuit breaker manually reset to closed state");
    }
}

/// Admission granted by [`CircuitBreaker::try_acquire`]
///
/// Holds at most one half-open probe slot until settled or dropped.
#[must_use = "an unsettled permit releases its slot without recording an outcome"]
#[derive(Debug)]
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    probe_window: Option<u64>,
    settled: bool,
}

impl CallPermit {
    /// Whether this call is a half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe_window.is_some()
    }

    /// Settle the call as a success
    pub fn record_success(mut self) {
        self.settled = true;
        self.breaker.record_success();
    }

    /// Settle the call as a failure
    pub fn record_failure(mut self) {
        self.settled = true;
        self.breaker.record_failure();
    }

    /// Settle the call without an outcome, handing back any probe slot
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Some(window) = self.probe_window {
            self.breaker.release_probe(window);
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            config: CircuitBreakerConfig::default(),
            inner: Mutex::new(BreakerState::closed(0)),
            clock: Arc::new(SystemClock),
        }
    }
}
