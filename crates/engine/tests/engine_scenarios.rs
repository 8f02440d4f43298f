use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;

use casework_engine::command::{
    CommandContext, CommandExecutor, CommandInvoker, LogInterceptor, Operation,
};
use casework_engine::correlation::CorrelationParameter;
use casework_engine::executor::{
    drive, AcquireJobsLoop, ConsumeOutcome, ExecutorLoop, JobOutcome, ResetExpiredLoop,
    TimerLoop, WorkerPool,
};
use casework_engine::job::{
    DispatchMode, FailureOutcome, Job, JobHandler, JobMessage, JobSpec, JobState, MessageChannel,
};
use casework_engine::model::{
    Activity, CaseDefinition, InstanceState, PlanItemDefinition, PlanItemState,
    ProcessDefinition, Sentry, Variables,
};
use casework_engine::store::EngineStore;
use casework_engine::{
    AsyncExecutor, Clock, EngineConfig, EngineError, ManualClock, MemoryStore, ProcessEngine,
    SemaphoreWorkerPool, TransactionPhase,
};

/// Pool that holds submitted tasks until the test runs them.
struct InlinePool {
    capacity: usize,
    accept: bool,
    tasks: Mutex<Vec<BoxFuture<'static, ()>>>,
}

impl InlinePool {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            accept: true,
            tasks: Mutex::new(Vec::new()),
        })
    }

    fn rejecting(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            capacity,
            accept: false,
            tasks: Mutex::new(Vec::new()),
        })
    }

    async fn run_pending(&self) -> usize {
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap());
        let count = tasks.len();
        for task in tasks {
            task.await;
        }
        count
    }
}

impl WorkerPool for InlinePool {
    fn submit(&self, task: BoxFuture<'static, ()>) -> bool {
        if !self.accept {
            return false;
        }
        self.tasks.lock().unwrap().push(task);
        true
    }

    fn remaining_capacity(&self) -> usize {
        self.capacity
            .saturating_sub(self.tasks.lock().unwrap().len())
    }
}

#[derive(Default)]
struct RecordingChannel {
    messages: Mutex<Vec<JobMessage>>,
}

impl RecordingChannel {
    fn sent(&self) -> Vec<JobMessage> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageChannel for RecordingChannel {
    async fn send(&self, message: JobMessage) -> casework_engine::EngineResult<()> {
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

/// Channel that fails its first `failures` sends.
struct FlakyChannel {
    failures: AtomicUsize,
    attempts: AtomicUsize,
    delivered: RecordingChannel,
}

impl FlakyChannel {
    fn failing(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            failures: AtomicUsize::new(failures),
            attempts: AtomicUsize::new(0),
            delivered: RecordingChannel::default(),
        })
    }
}

#[async_trait]
impl MessageChannel for FlakyChannel {
    async fn send(&self, message: JobMessage) -> casework_engine::EngineResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::Channel("broker unavailable".to_string()));
        }
        self.delivered.send(message).await
    }
}

/// History handler that always fails.
struct FailingAuditHandler;

#[async_trait]
impl JobHandler for FailingAuditHandler {
    fn handler_type(&self) -> &'static str {
        "audit-log"
    }

    async fn execute(
        &self,
        _ctx: &mut CommandContext,
        _job: &Job,
    ) -> casework_engine::EngineResult<()> {
        Err(EngineError::JobHandler("audit sink rejected entry".to_string()))
    }
}

struct Harness {
    engine: ProcessEngine,
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn test_config() -> EngineConfig {
    EngineConfig {
        default_retries: 2,
        ..EngineConfig::default()
    }
}

fn vars(pairs: &[(&str, Value)]) -> Variables {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

fn harness_with(dispatch: DispatchMode, fail_shipping: Arc<AtomicBool>) -> Harness {
    harness_with_config(dispatch, fail_shipping, test_config())
}

fn harness_with_config(
    dispatch: DispatchMode,
    fail_shipping: Arc<AtomicBool>,
    config: EngineConfig,
) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    ));

    let engine = ProcessEngine::builder()
        .store(store.clone())
        .clock(clock.clone())
        .config(config)
        .dispatch_mode(dispatch)
        .job_handler(FailingAuditHandler)
        .delegate_fn("noop", |_| Ok(()))
        .delegate_fn("shipping", move |variables| {
            if fail_shipping.load(Ordering::SeqCst) {
                return Err(EngineError::Delegate("carrier unavailable".to_string()));
            }
            variables.insert("shipped".to_string(), json!(true));
            Ok(())
        })
        .deploy_process(
            ProcessDefinition::new("order")
                .activity(Activity::user_task("review"))
                .activity(Activity::service_task("ship", "shipping")),
        )
        .deploy_process(
            ProcessDefinition::new("async-order")
                .activity(Activity::service_task("ship", "shipping").async_before()),
        )
        .deploy_process(
            ProcessDefinition::new("delayed")
                .activity(Activity::timer("wait", 60))
                .activity(Activity::user_task("review")),
        )
        .deploy_process(
            ProcessDefinition::new("payment")
                .activity(Activity::receive_event("paid", "payment-received", &["order_id"]))
                .activity(Activity::user_task("ship")),
        )
        .deploy_process(ProcessDefinition::new("auto").activity(Activity::service_task("run", "noop")))
        .deploy_case(
            CaseDefinition::new("chain")
                .plan_item(PlanItemDefinition::process_task("p1", "auto"))
                .plan_item(
                    PlanItemDefinition::process_task("p2", "auto")
                        .entry(Sentry::on_completed(&["p1"])),
                )
                .plan_item(PlanItemDefinition::human_task("h").entry(Sentry::on_completed(&["p2"]))),
        )
        .build()
        .unwrap();

    Harness {
        engine,
        store,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(DispatchMode::InProcess, Arc::new(AtomicBool::new(false)))
}

impl Harness {
    fn acquire_loop(&self, pool: Arc<InlinePool>) -> AcquireJobsLoop {
        AcquireJobsLoop::new(self.engine.executor().clone(), pool, None)
    }

    async fn only_job(&self) -> casework_engine::Job {
        let jobs = self.store.jobs().await;
        assert_eq!(jobs.len(), 1, "expected exactly one job, found {:?}", jobs);
        jobs.into_iter().next().unwrap()
    }

    async fn process_state(&self, id: uuid::Uuid) -> (InstanceState, usize) {
        let process = self.engine.process_instance(id).await.unwrap().unwrap();
        (process.state, process.position)
    }
}

#[tokio::test]
async fn test_user_task_then_service_task_completes() {
    let h = harness();
    let id = h.engine.start_process("order", Variables::new()).await.unwrap();
    assert_eq!(h.process_state(id).await, (InstanceState::Active, 0));

    h.engine
        .complete_task(id, "review", vars(&[("approved", json!(true))]))
        .await
        .unwrap();

    let process = h.engine.process_instance(id).await.unwrap().unwrap();
    assert_eq!(process.state, InstanceState::Completed);
    assert_eq!(process.variables["approved"], json!(true));
    assert_eq!(process.variables["shipped"], json!(true));
}

#[tokio::test]
async fn test_completing_wrong_activity_is_rejected() {
    let h = harness();
    let id = h.engine.start_process("order", Variables::new()).await.unwrap();
    let commits = h.store.commit_count();

    let err = h
        .engine
        .complete_task(id, "ship", Variables::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidState(_)));
    assert_eq!(h.store.commit_count(), commits);
    assert_eq!(h.process_state(id).await, (InstanceState::Active, 0));
}

#[tokio::test]
async fn test_nested_execute_outside_drain_runs_to_completion() {
    let h = harness();
    let mut ctx = h.engine.executor().new_context();

    let result = ctx
        .execute_nested(Operation::StartProcess {
            definition_key: "auto".to_string(),
            variables: Variables::new(),
            parent: None,
            tenant_id: None,
        })
        .await
        .unwrap();

    assert!(result["process_instance_id"].is_string());
    assert!(ctx.agenda().is_empty());
    assert!(ctx.agenda().executed() >= 4);
    assert!(!ctx.is_reused());
    // Not committed: only the chain's transaction interceptor flushes.
    assert_eq!(h.store.commit_count(), 0);
}

#[tokio::test]
async fn test_chain_must_end_with_single_terminal() {
    let h = harness();
    let services = h.engine.services().clone();

    let after_terminal = CommandExecutor::builder(services.clone())
        .with(Arc::new(CommandInvoker))
        .and_then(|builder| builder.with(Arc::new(LogInterceptor)));
    assert!(matches!(after_terminal, Err(EngineError::Configuration(_))));

    let without_terminal = CommandExecutor::builder(services)
        .with(Arc::new(LogInterceptor))
        .and_then(|builder| builder.build());
    assert!(matches!(without_terminal, Err(EngineError::Configuration(_))));
}

#[tokio::test]
async fn test_committed_listener_runs_after_store_write() {
    let h = harness();
    let executor = h.engine.executor().clone();
    let mut ctx = executor.new_context();

    let seen_commits = Arc::new(AtomicUsize::new(usize::MAX));
    let seen = seen_commits.clone();
    let store = h.store.clone();
    ctx.transaction_mut()
        .add_listener(TransactionPhase::Committed, move |unit| {
            seen.store(store.commit_count(), Ordering::SeqCst);
            unit.plan(Operation::StartProcess {
                definition_key: "order".to_string(),
                variables: Variables::new(),
                parent: None,
                tenant_id: None,
            });
            Ok(())
        });

    executor
        .execute_in(
            &mut ctx,
            Operation::StartProcess {
                definition_key: "order".to_string(),
                variables: Variables::new(),
                parent: None,
                tenant_id: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(seen_commits.load(Ordering::SeqCst), 1);
    // The listener's own unit of work committed separately.
    assert_eq!(h.store.commit_count(), 2);
}

#[tokio::test]
async fn test_rollback_fires_rollback_listeners_only() {
    let h = harness();
    let executor = h.engine.executor().clone();
    let mut ctx = executor.new_context();

    let committed = Arc::new(AtomicBool::new(false));
    let rolled_back = Arc::new(AtomicBool::new(false));
    {
        let committed = committed.clone();
        let rolled_back = rolled_back.clone();
        let transaction = ctx.transaction_mut();
        transaction.add_listener(TransactionPhase::Committed, move |_| {
            committed.store(true, Ordering::SeqCst);
            Ok(())
        });
        transaction.add_listener(TransactionPhase::RollingBack, |_| {
            Err(EngineError::Internal("cleanup failed".to_string()))
        });
        transaction.add_listener(TransactionPhase::RolledBack, move |_| {
            rolled_back.store(true, Ordering::SeqCst);
            Ok(())
        });
    }

    let err = executor
        .execute_in(
            &mut ctx,
            Operation::StartProcess {
                definition_key: "missing".to_string(),
                variables: Variables::new(),
                parent: None,
                tenant_id: None,
            },
        )
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(!committed.load(Ordering::SeqCst));
    assert!(rolled_back.load(Ordering::SeqCst));
    assert!(ctx.failure().is_some());
    assert!(ctx.agenda().is_empty());

    let failures = ctx.transaction().failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].phase, TransactionPhase::RollingBack);
    assert_eq!(h.store.commit_count(), 0);
}

#[tokio::test]
async fn test_case_gets_single_reevaluation_pass() {
    let h = harness();
    let case_id = h.engine.start_case("chain", Variables::new()).await.unwrap();

    let case = h.engine.case_instance(case_id).await.unwrap().unwrap();
    assert_eq!(case.plan_item_state("p1"), Some(PlanItemState::Completed));
    assert_eq!(case.plan_item_state("p2"), Some(PlanItemState::Completed));
    // p2 completed during the re-evaluation pass; h waits for the next command.
    assert_eq!(case.plan_item_state("h"), Some(PlanItemState::Available));
    assert!(case.is_active());

    h.engine
        .set_case_variables(case_id, vars(&[("note", json!("nudge"))]))
        .await
        .unwrap();
    let case = h.engine.case_instance(case_id).await.unwrap().unwrap();
    assert_eq!(case.plan_item_state("h"), Some(PlanItemState::Active));

    h.engine
        .complete_human_task(case_id, "h", Variables::new())
        .await
        .unwrap();
    let case = h.engine.case_instance(case_id).await.unwrap().unwrap();
    assert_eq!(case.state, InstanceState::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_at_most_one_claim_wins() {
    let h = harness();
    h.engine.start_process("async-order", Variables::new()).await.unwrap();
    let job = h.only_job().await;
    let expiration = Utc::now() + chrono::Duration::minutes(5);

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = h.store.clone();
        let (id, version) = (job.id, job.version);
        handles.push(tokio::spawn(async move {
            store
                .claim_job(id, version, &format!("worker-{}", worker), expiration)
                .await
                .unwrap()
        }));
    }

    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
    assert!(h.only_job().await.lock_owner.is_some());
}

#[tokio::test]
async fn test_unacquire_clears_lock_for_owner_only() {
    let h = harness();
    h.engine.start_process("async-order", Variables::new()).await.unwrap();
    let job = h.only_job().await;
    let expiration = h.clock.now() + chrono::Duration::minutes(5);
    assert!(h.store.claim_job(job.id, job.version, "worker-a", expiration).await.unwrap());

    let manager = &h.engine.services().job_manager;
    assert!(!manager.unacquire(h.store.as_ref(), job.id, "worker-b").await.unwrap());
    assert!(manager.unacquire(h.store.as_ref(), job.id, "worker-a").await.unwrap());

    let job = h.only_job().await;
    assert_eq!(job.lock_owner, None);
    assert_eq!(job.lock_expiration, None);
    assert_eq!(job.retries, 2);
}

#[tokio::test]
async fn test_async_continuation_runs_through_acquisition() {
    let h = harness();
    let id = h.engine.start_process("async-order", Variables::new()).await.unwrap();
    assert_eq!(h.process_state(id).await, (InstanceState::Active, 0));

    let pool = InlinePool::new(4);
    let round = h.acquire_loop(pool.clone()).acquire().await.unwrap();
    assert!(round.queried);
    assert_eq!(round.claimed, 1);
    assert_eq!(round.submitted, 1);
    assert_eq!(pool.run_pending().await, 1);

    assert_eq!(h.process_state(id).await.0, InstanceState::Completed);
    assert!(h.engine.jobs_for_process(id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failing_job_retries_then_dead_letters() {
    let fail = Arc::new(AtomicBool::new(true));
    let h = harness_with(DispatchMode::InProcess, fail.clone());
    let id = h.engine.start_process("async-order", Variables::new()).await.unwrap();
    let pool = InlinePool::new(4);
    let acquire = h.acquire_loop(pool.clone());

    acquire.acquire().await.unwrap();
    pool.run_pending().await;
    let job = h.only_job().await;
    assert_eq!(job.state, JobState::Executable);
    assert_eq!(job.retries, 1);
    assert_eq!(job.lock_owner, None);
    assert!(job.exception_message.as_deref().unwrap().contains("carrier unavailable"));

    // Not due until the retry wait has passed.
    assert_eq!(acquire.acquire().await.unwrap().claimed, 0);
    h.clock.advance(chrono::Duration::seconds(11));
    assert_eq!(acquire.acquire().await.unwrap().claimed, 1);
    pool.run_pending().await;

    let dead = h.engine.dead_letter_jobs(None).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].retries, 0);
    let version = dead[0].version;

    // Recording another failure leaves a dead-letter job untouched.
    let mut ctx = h.engine.executor().new_context();
    let outcome = h
        .engine
        .services()
        .job_manager
        .handle_failure(&mut ctx, dead[0].clone(), "late failure");
    assert_eq!(outcome, FailureOutcome::DeadLettered);
    h.engine
        .executor()
        .execute(Operation::HandleJobFailure {
            job_id: dead[0].id,
            lock_owner: test_config().lock_owner,
            message: "late failure".to_string(),
        })
        .await
        .unwrap();
    let job = h.only_job().await;
    assert_eq!(job.state, JobState::DeadLetter);
    assert_eq!(job.version, version);

    fail.store(false, Ordering::SeqCst);
    h.engine.retry_dead_letter_job(job.id, 1).await.unwrap();
    assert_eq!(h.only_job().await.state, JobState::Executable);

    assert_eq!(acquire.acquire().await.unwrap().claimed, 1);
    pool.run_pending().await;
    assert_eq!(h.process_state(id).await.0, InstanceState::Completed);
    assert!(h.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_no_capacity_skips_store_query() {
    let h = harness();
    h.engine.start_process("async-order", Variables::new()).await.unwrap();

    let mut acquire = h.acquire_loop(InlinePool::new(0));
    let wait = acquire.run_once().await;

    assert_eq!(wait, test_config().acquire_wait());
    assert_eq!(h.store.due_job_queries(), 0);
    assert_eq!(h.only_job().await.lock_owner, None);
}

#[tokio::test]
async fn test_rejected_job_is_unacquired_without_retry_cost() {
    let h = harness();
    h.engine.start_process("async-order", Variables::new()).await.unwrap();

    let round = h.acquire_loop(InlinePool::rejecting(4)).acquire().await.unwrap();
    assert_eq!(round.claimed, 1);
    assert_eq!(round.rejected, 1);
    assert_eq!(round.submitted, 0);

    let job = h.only_job().await;
    assert_eq!(job.lock_owner, None);
    assert_eq!(job.retries, 2);
    assert_eq!(job.state, JobState::Executable);
}

#[tokio::test]
async fn test_message_dispatch_after_commit() {
    let channel = Arc::new(RecordingChannel::default());
    let h = harness_with(
        DispatchMode::Message(channel.clone()),
        Arc::new(AtomicBool::new(false)),
    );

    let id = h.engine.start_process("async-order", Variables::new()).await.unwrap();
    let job = h.only_job().await;
    let sent = channel.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].job_id, job.id);
    assert_eq!(sent[0].handler_type, "async-continuation");

    let consumer = h.engine.message_consumer();
    assert_eq!(
        consumer.consume(&sent[0]).await.unwrap(),
        ConsumeOutcome::Executed(JobOutcome::Completed)
    );
    assert_eq!(h.process_state(id).await.0, InstanceState::Completed);
    assert_eq!(consumer.consume(&sent[0]).await.unwrap(), ConsumeOutcome::Missing);
}

#[tokio::test]
async fn test_failed_command_sends_no_message() {
    let channel = Arc::new(RecordingChannel::default());
    let h = harness_with(
        DispatchMode::Message(channel.clone()),
        Arc::new(AtomicBool::new(false)),
    );
    let executor = h.engine.executor().clone();
    let mut ctx = executor.new_context();
    ctx.transaction_mut()
        .add_listener(TransactionPhase::Committing, |_| {
            Err(EngineError::Store("disk full".to_string()))
        });

    let result = executor
        .execute_in(
            &mut ctx,
            Operation::StartProcess {
                definition_key: "async-order".to_string(),
                variables: Variables::new(),
                parent: None,
                tenant_id: None,
            },
        )
        .await;

    assert!(result.is_err());
    assert!(channel.sent().is_empty());
    assert!(h.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_partial_correlation_resumes_waiting_process() {
    let h = harness();
    let id = h
        .engine
        .start_process("payment", vars(&[("order_id", json!(42))]))
        .await
        .unwrap();
    assert_eq!(h.store.subscriptions().await.len(), 1);

    let other = vec![
        CorrelationParameter::new("customer", json!(7)),
        CorrelationParameter::new("order_id", json!(43)),
    ];
    let matched = h
        .engine
        .correlate_event("payment-received", other, Variables::new(), None)
        .await
        .unwrap();
    assert_eq!(matched, 0);

    let parameters = vec![
        CorrelationParameter::new("customer", json!(7)),
        CorrelationParameter::new("order_id", json!(42)),
    ];
    let matched = h
        .engine
        .correlate_event(
            "payment-received",
            parameters,
            vars(&[("amount", json!(99))]),
            None,
        )
        .await
        .unwrap();
    assert_eq!(matched, 1);

    let process = h.engine.process_instance(id).await.unwrap().unwrap();
    assert_eq!(process.position, 1);
    assert_eq!(process.variables["amount"], json!(99));
    assert!(h.store.subscriptions().await.is_empty());
}

#[tokio::test]
async fn test_timer_fires_once_due() {
    let h = harness();
    let wake = h.engine.services().job_manager.signals().register(None);
    let id = h.engine.start_process("delayed", Variables::new()).await.unwrap();
    assert_eq!(h.only_job().await.state, JobState::Timer);

    let timers = TimerLoop::new(h.engine.executor().clone(), None);
    assert_eq!(timers.activate_due_timers().await.unwrap(), (0, 0));

    h.clock.advance(chrono::Duration::seconds(61));
    assert_eq!(timers.activate_due_timers().await.unwrap(), (1, 1));
    assert_eq!(h.only_job().await.state, JobState::Executable);
    assert!(tokio::time::timeout(Duration::from_secs(1), wake.notified())
        .await
        .is_ok());

    let pool = InlinePool::new(2);
    h.acquire_loop(pool.clone()).acquire().await.unwrap();
    pool.run_pending().await;

    assert_eq!(h.process_state(id).await, (InstanceState::Active, 1));
    assert!(h.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_suspended_process_jobs_are_not_acquired() {
    let h = harness();
    let id = h.engine.start_process("async-order", Variables::new()).await.unwrap();
    h.engine.suspend_process(id).await.unwrap();
    assert!(h.only_job().await.suspended);

    let pool = InlinePool::new(2);
    let acquire = h.acquire_loop(pool.clone());
    assert_eq!(acquire.acquire().await.unwrap().claimed, 0);

    h.engine.activate_process(id).await.unwrap();
    assert_eq!(acquire.acquire().await.unwrap().claimed, 1);
    pool.run_pending().await;
    assert_eq!(h.process_state(id).await.0, InstanceState::Completed);
}

#[tokio::test]
async fn test_executor_tenants_start_and_stop() {
    let h = harness();
    let executor: AsyncExecutor = h.engine.async_executor(Arc::new(SemaphoreWorkerPool::new(2)));

    assert!(executor.add_tenant(Some("acme".to_string())));
    assert!(!executor.add_tenant(Some("acme".to_string())));
    assert!(executor.add_tenant(Some("globex".to_string())));
    assert_eq!(
        executor.active_tenants(),
        vec![Some("acme".to_string()), Some("globex".to_string())]
    );

    assert!(executor.remove_tenant(Some("acme")).await);
    assert!(!executor.remove_tenant(Some("acme")).await);
    assert_eq!(executor.active_tenants(), vec![Some("globex".to_string())]);

    executor.shutdown().await;
    assert!(executor.active_tenants().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_executor_picks_up_new_job() {
    let engine = ProcessEngine::builder()
        .delegate_fn("noop", |_| Ok(()))
        .deploy_process(
            ProcessDefinition::new("background")
                .activity(Activity::service_task("run", "noop").async_before()),
        )
        .build()
        .unwrap();
    let executor = engine.async_executor(Arc::new(SemaphoreWorkerPool::new(2)));
    executor.start();
    assert_eq!(executor.active_tenants(), vec![None]);

    let id = engine.start_process("background", Variables::new()).await.unwrap();

    let mut completed = false;
    for _ in 0..250 {
        let process = engine.process_instance(id).await.unwrap().unwrap();
        if process.state == InstanceState::Completed {
            completed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    executor.shutdown().await;
    assert!(completed, "process was not completed by the background executor");
}

#[tokio::test]
async fn test_unsent_job_message_is_published_again() {
    let channel = FlakyChannel::failing(1);
    let h = harness_with(
        DispatchMode::Message(channel.clone()),
        Arc::new(AtomicBool::new(false)),
    );

    let id = h.engine.start_process("async-order", Variables::new()).await.unwrap();
    assert_eq!(channel.attempts.load(Ordering::SeqCst), 1);
    assert!(channel.delivered.sent().is_empty());

    let job = h.only_job().await;
    assert_eq!(job.state, JobState::Timer);
    assert_eq!(job.lock_owner, None);

    let timers = TimerLoop::new(h.engine.executor().clone(), None);
    assert_eq!(timers.activate_due_timers().await.unwrap(), (0, 0));
    h.clock.advance(chrono::Duration::seconds(11));
    assert_eq!(timers.activate_due_timers().await.unwrap(), (1, 1));

    let sent = channel.delivered.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].job_id, job.id);
    assert_eq!(h.only_job().await.state, JobState::Executable);

    let outcome = h.engine.message_consumer().consume(&sent[0]).await.unwrap();
    assert_eq!(outcome, ConsumeOutcome::Executed(JobOutcome::Completed));
    assert_eq!(h.process_state(id).await.0, InstanceState::Completed);
}

#[tokio::test]
async fn test_failure_from_former_owner_is_ignored() {
    let h = harness();
    h.engine.start_process("async-order", Variables::new()).await.unwrap();
    let job = h.only_job().await;
    let expiration = h.clock.now() + chrono::Duration::minutes(5);
    assert!(h.store.claim_job(job.id, job.version, "worker-b", expiration).await.unwrap());

    h.engine
        .executor()
        .execute(Operation::HandleJobFailure {
            job_id: job.id,
            lock_owner: "worker-a".to_string(),
            message: "late failure".to_string(),
        })
        .await
        .unwrap();
    let job = h.only_job().await;
    assert_eq!(job.lock_owner.as_deref(), Some("worker-b"));
    assert_eq!(job.retries, 2);
    assert_eq!(job.exception_message, None);

    h.engine
        .executor()
        .execute(Operation::HandleJobFailure {
            job_id: job.id,
            lock_owner: "worker-b".to_string(),
            message: "carrier unavailable".to_string(),
        })
        .await
        .unwrap();
    let job = h.only_job().await;
    assert_eq!(job.lock_owner, None);
    assert_eq!(job.retries, 1);
}

#[tokio::test]
async fn test_out_of_range_timer_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let engine = ProcessEngine::builder()
        .store(store.clone())
        .deploy_process(
            ProcessDefinition::new("forever").activity(Activity::timer("wait", 1u64 << 62)),
        )
        .deploy_process(
            ProcessDefinition::new("wrapped").activity(Activity::timer("wait", u64::MAX)),
        )
        .build()
        .unwrap();

    for key in ["forever", "wrapped"] {
        let err = engine.start_process(key, Variables::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)), "{}: {:?}", key, err);
    }
    assert_eq!(store.commit_count(), 0);
    assert!(store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_stop_interrupts_idle_wait() {
    let config = EngineConfig {
        acquire_wait_ms: 60_000,
        ..test_config()
    };
    let h = harness_with_config(DispatchMode::InProcess, Arc::new(AtomicBool::new(false)), config);
    let acquire = h.acquire_loop(InlinePool::new(2));

    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(drive(acquire, stop_rx, None));
    // Let the loop finish its empty round and park.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopped_at = Instant::now();
    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_millis(100), handle)
        .await
        .expect("loop did not stop within the idle interval")
        .unwrap();
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_full_acquisition_round_goes_again_immediately() {
    let config = EngineConfig {
        max_jobs_per_acquisition: 2,
        ..test_config()
    };
    let h = harness_with_config(DispatchMode::InProcess, Arc::new(AtomicBool::new(false)), config);
    for _ in 0..3 {
        h.engine.start_process("async-order", Variables::new()).await.unwrap();
    }

    let pool = InlinePool::new(10);
    let mut acquire = h.acquire_loop(pool.clone());
    assert_eq!(acquire.run_once().await, Duration::ZERO);
    assert_eq!(acquire.run_once().await, test_config().acquire_wait());
    assert_eq!(pool.run_pending().await, 3);
    assert!(h.store.jobs().await.is_empty());
}

#[tokio::test]
async fn test_expired_claim_is_reset_and_reacquired() {
    let h = harness();
    let id = h.engine.start_process("async-order", Variables::new()).await.unwrap();
    let job = h.only_job().await;
    let expiration = h.clock.now() + chrono::Duration::minutes(1);
    assert!(h.store.claim_job(job.id, job.version, "crashed-worker", expiration).await.unwrap());

    let pool = InlinePool::new(2);
    let acquire = h.acquire_loop(pool.clone());
    assert_eq!(acquire.acquire().await.unwrap().claimed, 0);

    let reset = ResetExpiredLoop::new(h.engine.executor().clone(), None);
    assert_eq!(reset.reset_expired().await.unwrap(), 0);

    h.clock.advance(chrono::Duration::minutes(2));
    assert_eq!(reset.reset_expired().await.unwrap(), 1);
    let job = h.only_job().await;
    assert_eq!(job.lock_owner, None);
    assert_eq!(job.lock_expiration, None);
    assert_eq!(job.retries, 2);

    assert_eq!(acquire.acquire().await.unwrap().claimed, 1);
    pool.run_pending().await;
    assert_eq!(h.process_state(id).await.0, InstanceState::Completed);
}

#[tokio::test]
async fn test_exhausted_history_job_is_deleted() {
    let h = harness();
    let executor = h.engine.executor().clone();
    let mut ctx = executor.new_context();
    let job = h
        .engine
        .services()
        .job_manager
        .schedule_job(&mut ctx, JobSpec::history("audit-log", json!({})).retries(1));
    executor
        .execute_in(
            &mut ctx,
            Operation::StartProcess {
                definition_key: "order".to_string(),
                variables: Variables::new(),
                parent: None,
                tenant_id: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(h.only_job().await.id, job.id);

    let pool = InlinePool::new(2);
    assert_eq!(h.acquire_loop(pool.clone()).acquire().await.unwrap().claimed, 1);
    pool.run_pending().await;

    assert!(h.store.jobs().await.is_empty());
    assert!(h.engine.dead_letter_jobs(None).await.unwrap().is_empty());
}
