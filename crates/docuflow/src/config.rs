use std::time::Duration;

/// Central runtime configuration, sourced from environment variables with
/// `DOCUFLOW_*` names and bare fallbacks.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub worker_id: String,

    /// Max simultaneous in-flight jobs per worker process (the GPU path
    /// concurrency bound).
    pub gpu_concurrency: usize,
    pub poll_interval_ms: u64,
    pub max_retries: i32,

    pub stuck_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    pub lock_ttl_secs: u64,

    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,

    pub review_poll_interval_secs: u64,
    pub review_max_wait_secs: u64,

    /// GPU-specific fallback: when a GPU-path job exhausts its retries, run
    /// the CPU-only pipeline directly instead of failing.
    pub auto_fallback_to_cpu: bool,
    /// Engine-level fallback consulted by the OCR engine itself when its GPU
    /// path is unavailable mid-call. Kept independent of
    /// `auto_fallback_to_cpu`; precedence between conflicting values is
    /// deliberately unresolved.
    pub ocr_auto_fallback: bool,

    pub escalation_drain_interval_secs: u64,
    pub delayed_promote_interval_ms: u64,

    pub migrate_on_startup: bool,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is missing"))?;

        let worker_id = env_or_fallback("DOCUFLOW_WORKER_ID", "WORKER_ID")
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| "worker-1".to_string());

        Ok(Self {
            database_url,
            worker_id,
            gpu_concurrency: env_parsed("DOCUFLOW_GPU_CONCURRENCY", "GPU_CONCURRENCY")
                .unwrap_or(2)
                .max(1),
            poll_interval_ms: env_parsed("DOCUFLOW_POLL_INTERVAL_MS", "POLL_INTERVAL_MS")
                .unwrap_or(500),
            max_retries: env_parsed("DOCUFLOW_MAX_RETRIES", "MAX_RETRIES").unwrap_or(3),
            stuck_timeout_secs: env_parsed("DOCUFLOW_STUCK_TIMEOUT_SECS", "STUCK_TIMEOUT_SECS")
                .unwrap_or(300),
            reaper_interval_secs: env_parsed(
                "DOCUFLOW_REAPER_INTERVAL_SECS",
                "REAPER_INTERVAL_SECS",
            )
            .unwrap_or(60),
            lock_ttl_secs: env_parsed("DOCUFLOW_LOCK_TTL_SECS", "LOCK_TTL_SECS").unwrap_or(120),
            breaker_failure_threshold: env_parsed(
                "DOCUFLOW_BREAKER_FAILURE_THRESHOLD",
                "BREAKER_FAILURE_THRESHOLD",
            )
            .unwrap_or(5),
            breaker_cooldown_secs: env_parsed(
                "DOCUFLOW_BREAKER_COOLDOWN_SECS",
                "BREAKER_COOLDOWN_SECS",
            )
            .unwrap_or(60),
            review_poll_interval_secs: env_parsed(
                "DOCUFLOW_REVIEW_POLL_INTERVAL_SECS",
                "REVIEW_POLL_INTERVAL_SECS",
            )
            .unwrap_or(3600),
            // One week of wall clock by default.
            review_max_wait_secs: env_parsed(
                "DOCUFLOW_REVIEW_MAX_WAIT_SECS",
                "REVIEW_MAX_WAIT_SECS",
            )
            .unwrap_or(7 * 24 * 3600),
            auto_fallback_to_cpu: env_bool("DOCUFLOW_AUTO_FALLBACK_TO_CPU").unwrap_or(true),
            ocr_auto_fallback: env_bool("DOCUFLOW_OCR_AUTO_FALLBACK").unwrap_or(false),
            escalation_drain_interval_secs: env_parsed(
                "DOCUFLOW_ESCALATION_DRAIN_INTERVAL_SECS",
                "ESCALATION_DRAIN_INTERVAL_SECS",
            )
            .unwrap_or(30),
            delayed_promote_interval_ms: env_parsed(
                "DOCUFLOW_DELAYED_PROMOTE_INTERVAL_MS",
                "DELAYED_PROMOTE_INTERVAL_MS",
            )
            .unwrap_or(1000),
            migrate_on_startup: env_bool("DOCUFLOW_MIGRATE_ON_STARTUP").unwrap_or(false),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn stuck_timeout(&self) -> Duration {
        Duration::from_secs(self.stuck_timeout_secs)
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_secs(self.breaker_cooldown_secs)
    }

    pub fn review_poll_interval(&self) -> Duration {
        Duration::from_secs(self.review_poll_interval_secs)
    }

    pub fn review_max_wait(&self) -> Duration {
        Duration::from_secs(self.review_max_wait_secs)
    }
}

fn env_or_fallback(primary: &str, fallback: &str) -> Option<String> {
    std::env::var(primary)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| std::env::var(fallback).ok().filter(|s| !s.trim().is_empty()))
}

fn env_parsed<T: std::str::FromStr>(primary: &str, fallback: &str) -> Option<T> {
    env_or_fallback(primary, fallback).and_then(|s| s.parse().ok())
}

fn env_bool(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
