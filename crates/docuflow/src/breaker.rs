use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::errors::CircuitOpen;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Error)]
pub enum BreakerError {
    #[error(transparent)]
    Open(#[from] CircuitOpen),
    #[error(transparent)]
    Call(#[from] anyhow::Error),
}

/// Observability snapshot; read-only, never used for control decisions.
#[derive(Debug, Clone)]
pub struct BreakerStats {
    pub name: String,
    pub state: BreakerState,
    pub failure_count: u32,
    pub success_count: u32,
    pub since_last_failure: Option<Duration>,
    pub since_last_success: Option<Duration>,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    last_success_at: Option<Instant>,
    probe_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Normal,
    Probe,
}

/// Named failure-isolation primitive. State transitions are driven only by
/// recorded call outcomes and elapsed cooldown, evaluated lazily: no
/// background timer. At most one HALF_OPEN probe is in flight at a time.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    cfg: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: BreakerConfig) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            cfg,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure_at: None,
                last_success_at: None,
                probe_in_flight: false,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run `op` through the breaker. When the circuit is open the call is
    /// rejected with a typed `CircuitOpen` without invoking `op`.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let kind = self.begin_call()?;
        match op().await {
            Ok(value) => {
                self.record_success(kind);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(kind);
                Err(BreakerError::Call(err))
            }
        }
    }

    /// Like `execute`, but an open circuit invokes `fallback` instead of
    /// raising.
    pub async fn execute_with_fallback<T, F, Fut, FB, FbFut>(
        &self,
        op: F,
        fallback: FB,
    ) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
        FB: FnOnce() -> FbFut,
        FbFut: Future<Output = anyhow::Result<T>>,
    {
        match self.execute(op).await {
            Err(BreakerError::Open(_)) => fallback().await.map_err(BreakerError::Call),
            other => other,
        }
    }

    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.refresh_state(&mut inner);
        match inner.state {
            BreakerState::Closed => true,
            BreakerState::Open => false,
            BreakerState::HalfOpen => !inner.probe_in_flight,
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.refresh_state(&mut inner);
        inner.state
    }

    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.refresh_state(&mut inner);
        let now = Instant::now();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            since_last_failure: inner.last_failure_at.map(|t| now.duration_since(t)),
            since_last_success: inner.last_success_at.map(|t| now.duration_since(t)),
        }
    }

    /// Operator action only; outcomes never call this.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.probe_in_flight = false;
        info!(breaker = %self.name, "circuit breaker reset by operator");
    }

    fn begin_call(&self) -> Result<CallKind, CircuitOpen> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.refresh_state(&mut inner);
        match inner.state {
            BreakerState::Closed => Ok(CallKind::Normal),
            BreakerState::Open => Err(CircuitOpen {
                name: self.name.clone(),
            }),
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitOpen {
                        name: self.name.clone(),
                    })
                } else {
                    inner.probe_in_flight = true;
                    Ok(CallKind::Probe)
                }
            }
        }
    }

    fn refresh_state(&self, inner: &mut BreakerInner) {
        if inner.state == BreakerState::Open {
            if let Some(last) = inner.last_failure_at {
                if last.elapsed() >= self.cfg.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = false;
                    info!(breaker = %self.name, "cooldown elapsed, circuit half-open");
                }
            }
        }
    }

    fn record_success(&self, kind: CallKind) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.success_count = inner.success_count.saturating_add(1);
        inner.last_success_at = Some(Instant::now());
        inner.failure_count = 0;
        if kind == CallKind::Probe {
            inner.probe_in_flight = false;
        }
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
            info!(breaker = %self.name, "probe succeeded, circuit closed");
        }
    }

    fn record_failure(&self, kind: CallKind) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());
        match kind {
            CallKind::Probe => {
                inner.probe_in_flight = false;
                inner.state = BreakerState::Open;
                warn!(breaker = %self.name, "probe failed, circuit re-opened");
            }
            CallKind::Normal => {
                if inner.state == BreakerState::Closed
                    && inner.failure_count >= self.cfg.failure_threshold
                {
                    inner.state = BreakerState::Open;
                    warn!(
                        breaker = %self.name,
                        failures = inner.failure_count,
                        "failure threshold reached, circuit opened"
                    );
                }
            }
        }
    }
}

/// Process-wide registry: one breaker per remote dependency name. Each
/// process has its own instances; there is no cross-process coordination.
#[derive(Default)]
pub struct BreakerRegistry {
    inner: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, name: &str, cfg: BreakerConfig) -> Arc<CircuitBreaker> {
        let mut map = self.inner.lock().expect("registry lock poisoned");
        map.entry(name.to_string())
            .or_insert_with(|| CircuitBreaker::new(name, cfg))
            .clone()
    }

    pub fn all_stats(&self) -> Vec<BreakerStats> {
        let map = self.inner.lock().expect("registry lock poisoned");
        map.values().map(|b| b.stats()).collect()
    }
}
