use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use docuflow::breaker::{BreakerConfig, BreakerRegistry};
use docuflow::db;
use docuflow::escalation::EscalationChannel;
use docuflow::orchestrator::{Orchestrator, OrchestratorConfig};
use docuflow::pipeline::rules::{RuleBasedParser, RuleBasedScorer};
use docuflow::pipeline::{DocumentProcessor, ProcessorDeps};
use docuflow::queue::{JobQueue, ProcessingLock};
use docuflow::reaper::{ReaperConfig, StuckJobReaper};
use docuflow::results::result_channel;
use docuflow::workflow::{ReviewWorkflowConfig, WorkflowRegistry};
use docuflow::Config;

mod collab;
use collab::{
    DevOcrEngine, FsObjectStorage, HttpReviewService, PgDocumentStore, TracingNotifier,
    WorkflowLauncher,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = Config::from_env()?;
    info!(
        worker_id = %cfg.worker_id,
        gpu_concurrency = cfg.gpu_concurrency,
        max_retries = cfg.max_retries,
        stuck_timeout_secs = cfg.stuck_timeout_secs,
        auto_fallback_to_cpu = cfg.auto_fallback_to_cpu,
        "docuflow worker starting"
    );

    let storage_root =
        std::env::var("DOCUFLOW_STORAGE_ROOT").unwrap_or_else(|_| "./storage".to_string());
    let review_base_url = std::env::var("DOCUFLOW_REVIEW_BASE_URL")
        .unwrap_or_else(|_| "http://localhost:9090".to_string());
    let gpu_enabled = std::env::var("DOCUFLOW_GPU_ENABLED")
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false);

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
        info!("migrations applied");
    }

    // ---- Collaborators ----
    let store = Arc::new(PgDocumentStore::new(pool.clone()));
    let storage = Arc::new(FsObjectStorage::new(storage_root));
    let ocr = Arc::new(DevOcrEngine::new(gpu_enabled, cfg.ocr_auto_fallback));
    let review = Arc::new(HttpReviewService::new(review_base_url));
    let notifier = Arc::new(TracingNotifier);

    let breakers = BreakerRegistry::new();
    let review_breaker = breakers.get_or_create(
        "review-service",
        BreakerConfig {
            failure_threshold: cfg.breaker_failure_threshold,
            cooldown: cfg.breaker_cooldown(),
        },
    );
    let escalation = Arc::new(EscalationChannel::new(
        pool.clone(),
        review.clone(),
        review_breaker,
    ));

    let workflows = Arc::new(WorkflowRegistry::new());
    let launcher = Arc::new(WorkflowLauncher::new(
        workflows.clone(),
        store.clone(),
        escalation.clone(),
        review.clone(),
        notifier.clone(),
        ReviewWorkflowConfig::from_config(&cfg),
    ));

    let processor = Arc::new(DocumentProcessor::new(ProcessorDeps {
        store: store.clone(),
        storage,
        ocr,
        parser: Arc::new(RuleBasedParser),
        scorer: Arc::new(RuleBasedScorer),
        launcher,
    }));

    let queue = JobQueue::new(pool.clone());
    let lock = ProcessingLock::new(pool.clone());
    let (results_tx, mut results_rx) = result_channel(256);

    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_config(&cfg),
        queue.clone(),
        lock.clone(),
        processor,
        store.clone(),
        results_tx,
    );
    let reaper = StuckJobReaper::new(
        ReaperConfig::from_config(&cfg),
        queue.clone(),
        lock,
        store.clone(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ---- Worker loop task ----
    let orchestrator_handle = tokio::spawn(orchestrator.run(shutdown_rx.clone()));

    // ---- Reaper task ----
    let reaper_handle = tokio::spawn(reaper.run(shutdown_rx.clone()));

    // ---- Delayed-promotion task ----
    let promote_handle = {
        let queue = queue.clone();
        let mut shutdown = shutdown_rx.clone();
        let interval = Duration::from_millis(cfg.delayed_promote_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match queue.promote_due_delayed().await {
                            Ok(n) if n > 0 => info!(promoted = n, "delayed jobs promoted"),
                            Ok(_) => {}
                            Err(err) => warn!(error = %err, "delayed promotion failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    // ---- Escalation-drain task ----
    let drain_handle = {
        let escalation = escalation.clone();
        let mut shutdown = shutdown_rx.clone();
        let interval = Duration::from_secs(cfg.escalation_drain_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match escalation.drain_pending().await {
                            Ok(report) if report.sent > 0 || report.remaining > 0 => {
                                info!(sent = report.sent, remaining = report.remaining, "escalation drain");
                            }
                            Ok(_) => {}
                            Err(err) => warn!(error = %err, "escalation drain failed"),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    };

    // ---- Result log task ----
    let results_handle = tokio::spawn(async move {
        loop {
            match results_rx.recv().await {
                Ok(result) => {
                    if result.success {
                        info!(
                            document_id = %result.document_id,
                            correlation_id = %result.correlation_id,
                            gpu = result.gpu_processed,
                            score = result.score,
                            decision = result.decision.as_deref(),
                            "job result"
                        );
                    } else {
                        warn!(
                            document_id = %result.document_id,
                            correlation_id = %result.correlation_id,
                            outcome = result.outcome.as_deref(),
                            error = result.error.as_deref(),
                            "job result"
                        );
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "result log lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    shutdown_tx.send(true)?;

    for (name, handle) in [
        ("orchestrator", orchestrator_handle),
        ("reaper", reaper_handle),
        ("promoter", promote_handle),
        ("escalation-drain", drain_handle),
    ] {
        if let Err(err) = handle.await {
            error!(task = name, error = %err, "task join failed");
        }
    }
    results_handle.abort();

    info!("docuflow worker stopped");
    Ok(())
}
