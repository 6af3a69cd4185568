//! Integration tests for the queue store, pipeline, runner and sweep,
//! exercised through the library API against a real SQLite file.

use async_trait::async_trait;
use atlas::config::{Config, DuplicatePolicy};
use atlas::content::ContentStore;
use atlas::error::QueueError;
use atlas::models::{ContentRecord, JobStatus, NewJob, Priority, QueueJob};
use atlas::pipeline::Pipeline;
use atlas::processor::{ItemProcessor, ProcessOutcome, ProcessedContent, ProcessorRegistry};
use atlas::queue::{Enqueued, QueueStore};
use atlas::runner::{Runner, RunnerState};
use atlas::{db, migrate, sweep};
use sqlx::SqlitePool;
use std::collections::HashSet;
use std::sync::Arc;
use tempfile::TempDir;

// ─── Helpers ────────────────────────────────────────────────────────

/// Behaves according to the job's `mode` payload field.
struct ScriptedProcessor;

#[async_trait]
impl ItemProcessor for ScriptedProcessor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn process(&self, job: &QueueJob) -> ProcessOutcome {
        match job.payload_str("mode") {
            Some("fail") => ProcessOutcome::permanent("simulated failure"),
            Some("flaky") => ProcessOutcome::transient("simulated timeout"),
            Some("panic") => panic!("processor blew up"),
            Some("slow") => {
                tokio::time::sleep(std::time::Duration::from_millis(300)).await;
                ProcessOutcome::Success(ProcessedContent {
                    content: Some(format!("slow body of {}", job.id)),
                    ..Default::default()
                })
            }
            _ => ProcessOutcome::Success(ProcessedContent {
                title: job.payload_str("title").map(String::from),
                content: Some(format!("body of {}", job.id)),
                ..Default::default()
            }),
        }
    }
}

struct Env {
    _tmp: TempDir,
    cfg: Config,
    pool: SqlitePool,
    queue: QueueStore,
    content: ContentStore,
}

async fn setup_with(tweak: impl FnOnce(&mut Config)) -> Env {
    let tmp = TempDir::new().unwrap();
    let mut cfg = Config::for_db(tmp.path().join("atlas.sqlite"));
    tweak(&mut cfg);
    migrate::run_migrations(&cfg).await.unwrap();

    let pool = db::connect(&cfg).await.unwrap();
    let queue = QueueStore::new(pool.clone(), &cfg.queue);
    let content = ContentStore::new(pool.clone());
    Env {
        _tmp: tmp,
        cfg,
        pool,
        queue,
        content,
    }
}

async fn setup() -> Env {
    setup_with(|_| {}).await
}

fn scripted_pipeline(env: &Env) -> Pipeline {
    let mut registry = ProcessorRegistry::new();
    registry.set_fallback(Arc::new(ScriptedProcessor));
    Pipeline::new(
        &env.cfg,
        env.queue.clone(),
        env.content.clone(),
        Arc::new(registry),
    )
}

async fn enqueue(queue: &QueueStore, title: &str) -> String {
    let job = NewJob::new("article", "test-feed")
        .with("title", title)
        .with("url", format!("https://example.com/{}", title));
    queue.enqueue(job).await.unwrap().id().to_string()
}

async fn enqueue_mode(queue: &QueueStore, title: &str, mode: &str) -> String {
    let job = NewJob::new("article", "test-feed")
        .with("title", title)
        .with("mode", mode);
    queue.enqueue(job).await.unwrap().id().to_string()
}

async fn status_of(queue: &QueueStore, id: &str) -> JobStatus {
    queue.get(id).await.unwrap().unwrap().status
}

async fn backdate(pool: &SqlitePool, id: &str, secs: i64) {
    sqlx::query("UPDATE queue_jobs SET updated_at = updated_at - ? WHERE id = ?")
        .bind(secs)
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

async fn make_failed(env: &Env, job: NewJob) -> String {
    let id = env.queue.enqueue(job).await.unwrap().id().to_string();
    let claimed = env.queue.claim_batch(1).await.unwrap();
    assert_eq!(claimed[0].id, id);
    assert!(env
        .queue
        .update_status(&id, JobStatus::Failed, Some("fetch failed"))
        .await
        .unwrap());
    id
}

// ─── Claiming ───────────────────────────────────────────────────────

#[tokio::test]
async fn claim_batch_returns_oldest_pending_up_to_limit() {
    let env = setup().await;
    let a = enqueue(&env.queue, "a").await;
    let b = enqueue(&env.queue, "b").await;
    let c = enqueue(&env.queue, "c").await;

    let first = env.queue.claim_batch(2).await.unwrap();
    let ids: Vec<&str> = first.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec![a.as_str(), b.as_str()]);
    assert!(first.iter().all(|j| j.status == JobStatus::Processing));
    assert!(first.iter().all(|j| j.attempts == 1));

    let second = env.queue.claim_batch(2).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, c);

    assert!(env.queue.claim_batch(2).await.unwrap().is_empty());
    assert!(env.queue.claim_batch(0).await.unwrap().is_empty());
}

#[tokio::test]
async fn high_priority_jobs_are_claimed_first() {
    let env = setup().await;
    let normal = enqueue(&env.queue, "normal").await;
    let urgent = env
        .queue
        .enqueue(
            NewJob::new("podcast", "show")
                .with("content_id", "ep-1")
                .with_priority(Priority::High),
        )
        .await
        .unwrap()
        .id()
        .to_string();

    let claimed = env.queue.claim_batch(1).await.unwrap();
    assert_eq!(claimed[0].id, urgent);
    assert_eq!(status_of(&env.queue, &normal).await, JobStatus::Pending);
}

#[tokio::test]
async fn concurrent_claims_never_overlap() {
    let env = setup().await;
    let mut all = HashSet::new();
    for i in 0..20 {
        all.insert(enqueue(&env.queue, &format!("job-{}", i)).await);
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        let queue = env.queue.clone();
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = queue.claim_batch(3).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.into_iter().map(|j| j.id));
            }
            mine
        }));
    }

    let mut seen = Vec::new();
    for h in handles {
        seen.extend(h.await.unwrap());
    }
    let unique: HashSet<String> = seen.iter().cloned().collect();
    assert_eq!(seen.len(), 20, "a job was claimed twice");
    assert_eq!(unique, all);
}

#[tokio::test]
async fn peek_does_not_claim() {
    let env = setup().await;
    let a = enqueue(&env.queue, "a").await;
    let peeked = env.queue.peek_pending(5).await.unwrap();
    assert_eq!(peeked.len(), 1);
    assert_eq!(status_of(&env.queue, &a).await, JobStatus::Pending);
}

// ─── Enqueue ────────────────────────────────────────────────────────

#[tokio::test]
async fn same_content_id_is_enqueued_once() {
    let env = setup().await;
    let job = NewJob::new("podcast", "show").with("content_id", "ep-42");

    let first = env.queue.enqueue(job.clone()).await.unwrap();
    let second = env.queue.enqueue(job).await.unwrap();

    assert!(first.is_new());
    assert_eq!(second, Enqueued::Duplicate(first.id().to_string()));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_jobs")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[tokio::test]
async fn reject_policy_reports_existing_id() {
    let env = setup_with(|cfg| cfg.queue.duplicate_policy = DuplicatePolicy::Reject).await;
    let id = enqueue(&env.queue, "dup").await;

    let err = env
        .queue
        .enqueue(
            NewJob::new("article", "test-feed")
                .with("title", "dup again")
                .with("url", "https://example.com/dup"),
        )
        .await
        .unwrap_err();
    match err {
        QueueError::Duplicate { existing_id } => assert_eq!(existing_id, id),
        other => panic!("expected Duplicate, got {:?}", other),
    }
}

#[tokio::test]
async fn jobs_without_key_are_never_deduplicated() {
    let env = setup().await;
    let a = env.queue.enqueue(NewJob::new("note", "inbox")).await.unwrap();
    let b = env.queue.enqueue(NewJob::new("note", "inbox")).await.unwrap();
    assert!(a.is_new() && b.is_new());
    assert_ne!(a.id(), b.id());
}

#[tokio::test]
async fn blocked_sources_and_invalid_jobs_are_rejected() {
    let env = setup_with(|cfg| cfg.queue.blocked_sources = vec!["spam-feed".to_string()]).await;

    let blocked = env.queue.enqueue(NewJob::new("article", "spam-feed")).await;
    assert!(matches!(blocked, Err(QueueError::BlockedSource(_))));

    let empty_type = env.queue.enqueue(NewJob::new("  ", "feed")).await;
    assert!(matches!(empty_type, Err(QueueError::InvalidJob(_))));

    let mut bad_payload = NewJob::new("article", "feed");
    bad_payload.payload = serde_json::json!(["not", "an", "object"]);
    assert!(matches!(
        env.queue.enqueue(bad_payload).await,
        Err(QueueError::InvalidJob(_))
    ));
}

// ─── Status transitions ─────────────────────────────────────────────

#[tokio::test]
async fn update_status_on_unknown_id_is_a_noop() {
    let env = setup().await;
    let updated = env
        .queue
        .update_status("does-not-exist", JobStatus::Completed, None)
        .await
        .unwrap();
    assert!(!updated);
}

#[tokio::test]
async fn disallowed_transition_is_an_error_and_leaves_status() {
    let env = setup().await;
    let id = enqueue(&env.queue, "a").await;

    let err = env
        .queue
        .update_status(&id, JobStatus::Completed, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            from: JobStatus::Pending,
            to: JobStatus::Completed,
            ..
        }
    ));
    assert_eq!(status_of(&env.queue, &id).await, JobStatus::Pending);
}

#[tokio::test]
async fn failure_message_is_kept_and_cleared_on_completion() {
    let env = setup().await;
    let id = enqueue(&env.queue, "a").await;
    env.queue.claim_batch(1).await.unwrap();

    env.queue
        .update_status(&id, JobStatus::Pending, Some("timeout"))
        .await
        .unwrap();
    let job = env.queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.last_error.as_deref(), Some("timeout"));

    env.queue.claim_batch(1).await.unwrap();
    env.queue
        .update_status(&id, JobStatus::Completed, None)
        .await
        .unwrap();
    let job = env.queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 2);
    assert!(job.last_error.is_none());
}

#[tokio::test]
async fn requeue_resets_failed_jobs() {
    let env = setup().await;
    let failed = make_failed(&env, NewJob::new("article", "feed").with("content_id", "x1")).await;
    let other = make_failed(&env, NewJob::new("article", "feed").with("content_id", "x2")).await;

    let reset = env
        .queue
        .requeue(JobStatus::Failed, &[failed.clone()])
        .await
        .unwrap();
    assert_eq!(reset, 1);
    let job = env.queue.get(&failed).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.attempts, 0);
    assert_eq!(status_of(&env.queue, &other).await, JobStatus::Failed);

    assert!(env.queue.requeue(JobStatus::Completed, &[]).await.is_err());
    assert!(env.queue.requeue(JobStatus::Processing, &[]).await.is_err());
}

// ─── Housekeeping ───────────────────────────────────────────────────

#[tokio::test]
async fn release_stale_only_touches_old_processing_jobs() {
    let env = setup().await;
    let old = enqueue(&env.queue, "old").await;
    let fresh = enqueue(&env.queue, "fresh").await;
    env.queue.claim_batch(2).await.unwrap();
    backdate(&env.pool, &old, 7200).await;

    let released = env.queue.release_stale(3600).await.unwrap();
    assert_eq!(released, 1);
    assert_eq!(status_of(&env.queue, &old).await, JobStatus::Pending);
    assert_eq!(status_of(&env.queue, &fresh).await, JobStatus::Processing);
}

#[tokio::test]
async fn purge_errors_respects_retention() {
    let env = setup().await;
    let old = enqueue(&env.queue, "old").await;
    let recent = enqueue(&env.queue, "recent").await;
    let failed = enqueue(&env.queue, "failed").await;
    env.queue.claim_batch(3).await.unwrap();
    env.queue.update_status(&old, JobStatus::Error, Some("x")).await.unwrap();
    env.queue.update_status(&recent, JobStatus::Error, Some("x")).await.unwrap();
    env.queue.update_status(&failed, JobStatus::Failed, Some("x")).await.unwrap();
    backdate(&env.pool, &old, 30 * 86_400).await;
    backdate(&env.pool, &failed, 30 * 86_400).await;

    assert_eq!(env.queue.purge_errors(14).await.unwrap(), 1);
    assert!(env.queue.get(&old).await.unwrap().is_none());
    assert!(env.queue.get(&recent).await.unwrap().is_some());
    assert!(env.queue.get(&failed).await.unwrap().is_some());
}

#[tokio::test]
async fn release_stale_with_huge_window_releases_nothing() {
    let env = setup().await;
    let id = enqueue(&env.queue, "busy").await;
    env.queue.claim_batch(1).await.unwrap();
    backdate(&env.pool, &id, 7200).await;

    assert_eq!(env.queue.release_stale(u64::MAX).await.unwrap(), 0);
    assert_eq!(status_of(&env.queue, &id).await, JobStatus::Processing);
}

#[tokio::test]
async fn unreadable_payload_is_corrupt_and_not_claimed() {
    let env = setup().await;
    sqlx::query(
        "INSERT INTO queue_jobs (id, content_type, source, payload_json, status, priority, dedup_key, attempts, created_at, updated_at) \
         VALUES ('broken', 'article', 'feed', '{not json', 'pending', 'normal', 'job:broken', 0, 0, 0)",
    )
    .execute(&env.pool)
    .await
    .unwrap();
    let good = enqueue(&env.queue, "good").await;

    assert!(matches!(
        env.queue.get("broken").await,
        Err(QueueError::CorruptRow { .. })
    ));

    let claimed = env.queue.claim_batch(5).await.unwrap();
    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].id, good);

    let (status, last_error): (String, Option<String>) =
        sqlx::query_as("SELECT status, last_error FROM queue_jobs WHERE id = 'broken'")
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert_eq!(status, "error");
    assert!(last_error.unwrap().contains("payload_json"));
}

#[tokio::test]
async fn unreadable_content_metadata_is_corrupt() {
    let env = setup().await;
    sqlx::query(
        "INSERT INTO content (id, source, content_type, created_at, metadata_json) \
         VALUES ('c1', 'feed', 'article', 0, 'nope')",
    )
    .execute(&env.pool)
    .await
    .unwrap();

    match env.content.get("c1").await {
        Err(QueueError::CorruptRow { id, message }) => {
            assert_eq!(id, "c1");
            assert!(message.contains("metadata_json"));
        }
        other => panic!("expected CorruptRow, got {:?}", other),
    }
}

#[tokio::test]
async fn status_counts_cover_every_status() {
    let env = setup().await;
    enqueue(&env.queue, "a").await;
    enqueue(&env.queue, "b").await;
    env.queue.claim_batch(1).await.unwrap();

    let counts = env.queue.status_counts().await.unwrap();
    assert_eq!(counts.len(), JobStatus::ALL.len());
    let get = |s: JobStatus| counts.iter().find(|(x, _)| *x == s).unwrap().1;
    assert_eq!(get(JobStatus::Pending), 1);
    assert_eq!(get(JobStatus::Processing), 1);
    assert_eq!(get(JobStatus::Completed), 0);
}

// ─── Pipeline ───────────────────────────────────────────────────────

#[tokio::test]
async fn batch_records_success_and_failure() {
    let env = setup().await;
    let a = enqueue_mode(&env.queue, "a", "ok").await;
    let b = enqueue_mode(&env.queue, "b", "fail").await;
    let c = enqueue_mode(&env.queue, "c", "ok").await;

    let pipeline = scripted_pipeline(&env);
    let claimed = env.queue.claim_batch(2).await.unwrap();
    let ids: Vec<&str> = claimed.iter().map(|j| j.id.as_str()).collect();
    assert_eq!(ids, vec![a.as_str(), b.as_str()]);

    let report = pipeline.process_jobs(claimed).await.unwrap();
    assert_eq!(report.claimed, 2);
    assert_eq!(report.completed, 1);
    assert_eq!(report.failed, 1);

    assert_eq!(status_of(&env.queue, &a).await, JobStatus::Completed);
    let record = env.content.get(&a).await.unwrap().unwrap();
    assert_eq!(record.title.as_deref(), Some("a"));
    assert_eq!(record.source, "test-feed");
    assert!(record.metadata.is_object());

    let failed = env.queue.get(&b).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.last_error.as_deref(), Some("simulated failure"));
    assert!(env.content.get(&b).await.unwrap().is_none());

    assert_eq!(status_of(&env.queue, &c).await, JobStatus::Pending);
}

#[tokio::test]
async fn transient_failures_retry_until_max_attempts() {
    let env = setup_with(|cfg| {
        cfg.retry.auto_retry = true;
        cfg.retry.max_attempts = 2;
    })
    .await;
    let id = enqueue_mode(&env.queue, "flaky", "flaky").await;
    let pipeline = scripted_pipeline(&env);

    let first = pipeline.run_batch(5).await.unwrap();
    assert_eq!(first.retried, 1);
    assert_eq!(status_of(&env.queue, &id).await, JobStatus::Pending);

    let second = pipeline.run_batch(5).await.unwrap();
    assert_eq!(second.failed, 1);
    let job = env.queue.get(&id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn transient_failures_stay_failed_without_auto_retry() {
    let env = setup().await;
    let id = enqueue_mode(&env.queue, "flaky", "flaky").await;
    let report = scripted_pipeline(&env).run_batch(5).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(status_of(&env.queue, &id).await, JobStatus::Failed);
}

#[tokio::test]
async fn panicking_processor_marks_job_error() {
    let env = setup().await;
    let bad = enqueue_mode(&env.queue, "bad", "panic").await;
    let good = enqueue_mode(&env.queue, "good", "ok").await;

    let report = scripted_pipeline(&env).run_batch(5).await.unwrap();
    assert_eq!(report.errored, 1);
    assert_eq!(report.completed, 1);
    assert_eq!(status_of(&env.queue, &bad).await, JobStatus::Error);
    assert_eq!(status_of(&env.queue, &good).await, JobStatus::Completed);
}

#[tokio::test]
async fn failed_status_write_errors_one_job_and_drains_the_batch() {
    let env = setup().await;
    let a = enqueue_mode(&env.queue, "a", "ok").await;
    let b = enqueue_mode(&env.queue, "b", "slow").await;
    let c = enqueue_mode(&env.queue, "c", "slow").await;

    // Completing `a` fails at the database; every other write goes through.
    sqlx::query(&format!(
        "CREATE TRIGGER block_complete BEFORE UPDATE OF status ON queue_jobs \
         WHEN NEW.status = 'completed' AND OLD.id = '{}' \
         BEGIN SELECT RAISE(ABORT, 'disk I/O'); END",
        a
    ))
    .execute(&env.pool)
    .await
    .unwrap();

    let report = scripted_pipeline(&env).run_batch(5).await.unwrap();
    assert_eq!(report.claimed, 3);
    assert_eq!(report.completed, 2);
    assert_eq!(report.errored, 1);

    let stuck = env.queue.get(&a).await.unwrap().unwrap();
    assert_eq!(stuck.status, JobStatus::Error);
    assert!(stuck.last_error.unwrap().contains("status write failed"));

    for id in [&b, &c] {
        assert_eq!(status_of(&env.queue, id).await, JobStatus::Completed);
        assert!(env.content.get(id).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn unregistered_content_type_fails_permanently() {
    let env = setup().await;
    let id = enqueue(&env.queue, "orphan").await;
    let pipeline = Pipeline::new(
        &env.cfg,
        env.queue.clone(),
        env.content.clone(),
        Arc::new(ProcessorRegistry::new()),
    );

    let report = pipeline.run_batch(5).await.unwrap();
    assert_eq!(report.failed, 1);
    let job = env.queue.get(&id).await.unwrap().unwrap();
    assert!(job.last_error.unwrap().contains("no processor registered"));
}

// ─── Runner ─────────────────────────────────────────────────────────

#[tokio::test]
async fn runner_once_drains_queue_and_stops() {
    let env = setup_with(|cfg| cfg.queue.batch_size = 2).await;
    for name in ["a", "b", "c", "d", "e"] {
        enqueue_mode(&env.queue, name, "ok").await;
    }

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let mut runner = Runner::new(&env.cfg, scripted_pipeline(&env), rx).stop_when_idle(true);
    let totals = runner.run().await.unwrap();

    assert_eq!(runner.state(), RunnerState::Stopped);
    assert_eq!(totals.completed, 5);
    assert_eq!(runner.passes(), 4);
    assert_eq!(env.content.count().await.unwrap(), 5);
}

#[tokio::test]
async fn runner_stops_on_shutdown_signal() {
    let env = setup().await;
    let (tx, rx) = tokio::sync::watch::channel(false);
    let mut runner = Runner::new(&env.cfg, scripted_pipeline(&env), rx);

    let handle = tokio::spawn(async move {
        let totals = runner.run().await.unwrap();
        (runner.state(), totals)
    });
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    tx.send(true).unwrap();

    let (state, totals) = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("runner did not stop")
        .unwrap();
    assert_eq!(state, RunnerState::Stopped);
    assert_eq!(totals.claimed, 0);
}

#[tokio::test]
async fn runner_recovers_after_failing_pass() {
    let env = setup_with(|cfg| {
        cfg.runner.crash_backoff_secs = 0;
        cfg.runner.poll_interval_secs = 0;
    })
    .await;
    sqlx::query("DROP TABLE queue_jobs")
        .execute(&env.pool)
        .await
        .unwrap();

    let (tx, rx) = tokio::sync::watch::channel(false);
    let mut runner = Runner::new(&env.cfg, scripted_pipeline(&env), rx);
    let handle = tokio::spawn(async move {
        let totals = runner.run().await.unwrap();
        (runner.state(), runner.passes(), totals)
    });

    // Passes fail until the table is back.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    migrate::apply(&env.pool).await.unwrap();
    let id = enqueue_mode(&env.queue, "after-crash", "ok").await;

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while status_of(&env.queue, &id).await != JobStatus::Completed {
        assert!(tokio::time::Instant::now() < deadline, "runner did not recover");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    tx.send(true).unwrap();

    let (state, passes, totals) = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("runner did not stop")
        .unwrap();
    assert_eq!(state, RunnerState::Stopped);
    assert_eq!(totals.completed, 1);
    assert!(passes > 1);
}

#[tokio::test]
async fn runner_once_returns_error_from_failing_pass() {
    let env = setup().await;
    sqlx::query("DROP TABLE queue_jobs")
        .execute(&env.pool)
        .await
        .unwrap();

    let (_tx, rx) = tokio::sync::watch::channel(false);
    let mut runner = Runner::new(&env.cfg, scripted_pipeline(&env), rx).stop_when_idle(true);
    let result = runner.run().await;

    assert!(result.is_err());
    assert_eq!(runner.state(), RunnerState::Stopped);
    assert_eq!(runner.passes(), 1);
}

// ─── Fallback sweep ─────────────────────────────────────────────────

#[tokio::test]
async fn sweep_moves_only_matched_failed_jobs_to_local() {
    let env = setup().await;
    let assets = TempDir::new().unwrap();
    std::fs::write(assets.path().join("show-042.mp3"), b"audio").unwrap();

    let matched = make_failed(
        &env,
        NewJob::new("podcast", "show")
            .with("content_id", "show-42")
            .with("title", "Episode 42: Pilot"),
    )
    .await;
    let unmatched = make_failed(
        &env,
        NewJob::new("podcast", "show")
            .with("content_id", "show-77")
            .with("episode", 77),
    )
    .await;

    let dry = sweep::sweep(&env.queue, assets.path(), &env.cfg.sweep, false)
        .await
        .unwrap();
    assert_eq!(dry.matched.len(), 1);
    assert_eq!(dry.recovered, 0);
    assert_eq!(status_of(&env.queue, &matched).await, JobStatus::Failed);

    let report = sweep::sweep(&env.queue, assets.path(), &env.cfg.sweep, true)
        .await
        .unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.recovered, 1);
    assert_eq!(report.unmatched, vec![unmatched.clone()]);

    let job = env.queue.get(&matched).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Local);
    assert!(job.payload_str("local_path").unwrap().ends_with("show-042.mp3"));
    assert_eq!(job.payload_str("title"), Some("Episode 42: Pilot"));
    assert_eq!(status_of(&env.queue, &unmatched).await, JobStatus::Failed);
}

#[tokio::test]
async fn local_jobs_are_processed_from_their_asset() {
    let env = setup().await;
    let assets = TempDir::new().unwrap();
    std::fs::write(assets.path().join("ep-12.txt"), "transcript twelve").unwrap();

    let id = make_failed(
        &env,
        NewJob::new("podcast", "show")
            .with("content_id", "ep-12")
            .with("episode", "12"),
    )
    .await;
    sweep::sweep(&env.queue, assets.path(), &env.cfg.sweep, true)
        .await
        .unwrap();
    assert_eq!(env.queue.requeue(JobStatus::Local, &[]).await.unwrap(), 1);

    let registry = ProcessorRegistry::with_builtins(&env.cfg.processor).unwrap();
    let pipeline = Pipeline::new(
        &env.cfg,
        env.queue.clone(),
        env.content.clone(),
        Arc::new(registry),
    );
    let report = pipeline.run_batch(5).await.unwrap();
    assert_eq!(report.completed, 1);

    let record = env.content.get(&id).await.unwrap().unwrap();
    assert_eq!(record.content.as_deref(), Some("transcript twelve"));
    assert!(record.text_path.unwrap().ends_with("ep-12.txt"));
}

// ─── Content cleanup ────────────────────────────────────────────────

fn record(id: &str) -> ContentRecord {
    ContentRecord {
        id: id.to_string(),
        title: Some(format!("title {}", id)),
        url: None,
        source: "feed".to_string(),
        content_type: "article".to_string(),
        text_path: None,
        html_path: None,
        content: Some("body".to_string()),
        created_at: 0,
        metadata: serde_json::json!({}),
    }
}

#[tokio::test]
async fn content_insert_is_idempotent() {
    let env = setup().await;
    assert!(env.content.insert(&record("r1")).await.unwrap());
    assert!(!env.content.insert(&record("r1")).await.unwrap());
    assert_eq!(env.content.count().await.unwrap(), 1);
}

#[tokio::test]
async fn delete_by_ids_removes_exactly_the_given_rows() {
    let env = setup().await;
    for id in ["r1", "r2", "r3", "r4"] {
        env.content.insert(&record(id)).await.unwrap();
    }

    let ids: Vec<String> = ["r1", "r3", "missing", "r1"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let report = env.content.delete_by_ids(&ids).await.unwrap();

    assert_eq!(report.requested, 3);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.remaining, 2);
    assert!(env.content.get("r1").await.unwrap().is_none());
    assert!(env.content.get("r2").await.unwrap().is_some());
    assert!(env.content.get("r3").await.unwrap().is_none());
    assert!(env.content.get("r4").await.unwrap().is_some());
}
