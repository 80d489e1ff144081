//! Integration test: migration runs end to end against the in-memory store.
//!
//! Covers the run state machine, hook expectations, retention and teardown
//! ordering. Time is paused, so multi-minute deadlines finish instantly.
//!
//! The live test at the bottom requires `kubectl proxy --unix-socket` and is
//! ignored by default.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use vmigrate_core::{
    DiskType, HookOutcome, HookPhase, HookSpec, MigrationMode, MigrationPlan, MigrationState, PowerState, RemotePhase,
    ResourceKind, ResourceRef, SessionId, VmSpec,
};
use vmigrate_executor::provider::{InMemoryInventory, VsphereDisk, VsphereNic, VsphereVm};
use vmigrate_executor::{
    ExecutionContext, ExecutorConfig, ExecutorError, MemoryStore, MigrationOrchestrator, MigrationOutcome,
    MigrationTargets, SourceProvider, StaticHookRunner, TeardownEngine, TeardownPolicy, TeardownStatus, TrackingFile,
    VendorProvider,
};

const NS: &str = "mtv-it";

fn template(name: &str, power: &str) -> VsphereVm {
    VsphereVm {
        name: name.to_owned(),
        power_state: power.to_owned(),
        tools_running: true,
        disks: vec![VsphereDisk {
            file_name: format!("[datastore1] {name}/{name}.vmdk"),
            capacity_in_kb: 20 * 1024 * 1024,
            thin_provisioned: true,
            eagerly_scrub: false,
        }],
        nics: vec![VsphereNic {
            network: "VM Network".to_owned(),
            mac_address: "00:50:56:aa:bb:01".to_owned(),
            ip_addresses: vec!["192.168.10.20".to_owned()],
        }],
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    inventory: Arc<InMemoryInventory<VsphereVm>>,
    provider: Arc<SourceProvider>,
    hooks: Arc<StaticHookRunner>,
    config: ExecutorConfig,
    ctx: ExecutionContext,
    workdir: tempfile::TempDir,
}

impl Harness {
    async fn new(hooks: StaticHookRunner) -> Self {
        let inventory = Arc::new(InMemoryInventory::new(vec![
            template("rhel9", "poweredOff"),
            template("win2022-template", "poweredOff"),
        ]));
        let provider = Arc::new(SourceProvider::Vsphere(VendorProvider::new(
            "https://vcenter.example/sdk",
            inventory.clone(),
        )));
        if let Err(e) = provider.connect().await {
            panic!("unexpected error: {e}");
        }
        let store = Arc::new(MemoryStore::new());
        store.script_kind_status(ResourceKind::Plan, vec![json!({"conditions": [{"type": "Ready", "status": "True"}]})]);
        let session = match SessionId::new("it01") {
            Ok(s) => s,
            Err(e) => panic!("unexpected error: {e}"),
        };
        let workdir = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => panic!("failed to create temp dir: {e}"),
        };
        let mut config = ExecutorConfig::with_poll_interval(Duration::from_secs(1));
        config.tracking_file = Some(workdir.path().join("resources.json"));
        Self {
            store,
            inventory,
            provider,
            hooks: Arc::new(hooks),
            config,
            ctx: ExecutionContext::new(session),
            workdir,
        }
    }

    async fn tracking_file(&self) -> TrackingFile {
        match TrackingFile::read(&self.workdir.path().join("resources.json")).await {
            Ok(f) => f,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    fn script_migration(&self, statuses: Vec<Value>) {
        self.store.script_kind_status(ResourceKind::Migration, statuses);
    }

    async fn run(&mut self, plan: &MigrationPlan) -> Result<MigrationOutcome, ExecutorError> {
        let orchestrator = MigrationOrchestrator::new(self.store.clone(), self.hooks.clone(), self.config.clone());
        orchestrator.run(&mut self.ctx, plan, &targets(), &self.provider).await
    }

    fn teardown_engine(&self) -> TeardownEngine {
        TeardownEngine::new(self.store.clone(), &self.config).with_provider(self.provider.clone())
    }
}

fn targets() -> MigrationTargets {
    let ns = Some(NS.to_owned());
    MigrationTargets::new(
        NS,
        "migrated-it01",
        ResourceRef::new(ResourceKind::Provider, "vsphere-it01", ns.clone()),
        ResourceRef::new(ResourceKind::Provider, "host", ns.clone()),
        ResourceRef::new(ResourceKind::NetworkMap, "network-map-it01", ns.clone()),
        ResourceRef::new(ResourceKind::StorageMap, "storage-map-it01", ns),
    )
}

fn cold_plan(timeout: Duration) -> MigrationPlan {
    MigrationPlan::new(
        "rhel9",
        vec![VmSpec::new("rhel9", PowerState::Off, true, false, DiskType::Thin)],
        MigrationMode::Cold,
        PowerState::On,
        timeout,
    )
}

fn phases(phases: &[&str]) -> Vec<Value> {
    phases.iter().map(|p| json!({"phase": p})).collect()
}

fn kinds(ctx: &ExecutionContext) -> Vec<ResourceKind> {
    ctx.records().iter().map(|r| r.resource.kind).collect()
}

#[tokio::test(start_paused = true)]
async fn cold_migration_succeeds_and_tears_down_in_reverse() {
    let mut h = Harness::new(StaticHookRunner::new()).await;
    h.script_migration(phases(&["Pending", "Running", "Succeeded"]));

    let outcome = match h.run(&cold_plan(Duration::from_secs(300))).await {
        Ok(o) => o,
        Err(e) => panic!("unexpected error: {e}"),
    };
    assert!(outcome.succeeded());
    assert_eq!(
        outcome.run.history(),
        &[MigrationState::Pending, MigrationState::Running, MigrationState::Succeeded]
    );
    assert_eq!(outcome.run.last_phase(), Some(&RemotePhase::Succeeded));
    assert!(outcome.validate_vms);
    assert_eq!(kinds(&h.ctx), vec![ResourceKind::Plan, ResourceKind::Migration]);

    let plan = match &outcome.plan {
        Some(p) => p.clone(),
        None => panic!("plan reference missing"),
    };
    let migration = match &outcome.migration {
        Some(m) => m.clone(),
        None => panic!("migration reference missing"),
    };
    assert!(plan.name.starts_with("rhel9-cold-it01-"), "plan name: {}", plan.name);
    assert_eq!(h.ctx.records()[1].parent.as_ref(), Some(&plan));

    let report = h.teardown_engine().teardown(&mut h.ctx, TeardownPolicy::Enabled).await;
    assert!(report.is_clean());
    assert_eq!(h.store.deleted(), vec![migration, plan]);
}

#[tokio::test(start_paused = true)]
async fn migration_never_terminal_times_out() {
    let mut h = Harness::new(StaticHookRunner::new()).await;
    h.script_migration(phases(&["Pending", "Running"]));

    match h.run(&cold_plan(Duration::from_secs(5))).await {
        Err(ExecutorError::MigrationTimeout { plan, last_phase, waited, .. }) => {
            assert_eq!(plan, "rhel9");
            assert_eq!(last_phase, Some(RemotePhase::Running));
            assert!(waited >= Duration::from_secs(5), "waited only {waited:?}");
        }
        other => panic!("expected MigrationTimeout, got {other:?}"),
    }
    assert_eq!(kinds(&h.ctx), vec![ResourceKind::Plan, ResourceKind::Migration], "timed-out run stays tracked");
}

#[tokio::test(start_paused = true)]
async fn expected_pre_hook_failure_never_reaches_running() {
    let mut h = Harness::new(StaticHookRunner::new()).await;
    h.script_migration(phases(&["Succeeded"]));
    let plan = cold_plan(Duration::from_secs(300)).with_pre_hook(HookSpec::expecting(HookOutcome::Fail));

    let outcome = match h.run(&plan).await {
        Ok(o) => o,
        Err(e) => panic!("unexpected error: {e}"),
    };
    assert_eq!(outcome.run.state(), MigrationState::Failed);
    assert!(!outcome.run.history().contains(&MigrationState::Running));
    assert_eq!(outcome.expected_hook_failure, Some(HookPhase::Pre));
    assert!(!outcome.validate_vms);
    assert!(outcome.plan.is_none());
    assert!(h.store.objects_of(ResourceKind::Plan).is_empty());
    assert_eq!(kinds(&h.ctx), vec![ResourceKind::Hook]);
    assert_eq!(h.hooks.calls(), vec![HookPhase::Pre]);
}

#[tokio::test(start_paused = true)]
async fn pre_hook_mismatch_is_an_error() {
    let mut h = Harness::new(StaticHookRunner::new().with_outcome(HookPhase::Pre, HookOutcome::Fail)).await;
    let plan = cold_plan(Duration::from_secs(300)).with_pre_hook(HookSpec::expecting(HookOutcome::Succeed));

    match h.run(&plan).await {
        Err(ExecutorError::PreHookExpectationMismatch { expected, observed, .. }) => {
            assert_eq!(expected, HookOutcome::Succeed);
            assert_eq!(observed, HookOutcome::Fail);
        }
        other => panic!("expected PreHookExpectationMismatch, got {other:?}"),
    }
    assert!(h.store.objects_of(ResourceKind::Plan).is_empty());
}

#[tokio::test(start_paused = true)]
async fn expected_post_hook_failure_retains_plan_and_migration_but_not_hooks() {
    let mut h = Harness::new(StaticHookRunner::new()).await;
    h.script_migration(vec![
        json!({"phase": "Running"}),
        json!({"phase": "Failed", "conditions": [{"type": "Failed", "status": "True", "message": "PostHook step failed"}]}),
    ]);
    let plan = cold_plan(Duration::from_secs(300)).with_post_hook(HookSpec::expecting(HookOutcome::Fail));

    let outcome = match h.run(&plan).await {
        Ok(o) => o,
        Err(e) => panic!("unexpected error: {e}"),
    };
    assert_eq!(outcome.run.state(), MigrationState::Failed);
    assert!(outcome.run.history().contains(&MigrationState::PostHookRunning));
    assert_eq!(outcome.expected_hook_failure, Some(HookPhase::Post));
    assert!(outcome.validate_vms);
    assert!(outcome.run.retain_resources());
    let record = outcome.run.hook(HookPhase::Post).copied();
    assert!(record.is_some_and(|r| r.is_expected_failure()));

    let report = h.teardown_engine().teardown(&mut h.ctx, TeardownPolicy::Enabled).await;
    let statuses: Vec<(ResourceKind, TeardownStatus)> =
        report.outcomes.iter().map(|o| (o.record.resource.kind, o.status.clone())).collect();
    assert_eq!(
        statuses,
        vec![
            (ResourceKind::Migration, TeardownStatus::Retained),
            (ResourceKind::Plan, TeardownStatus::Retained),
            (ResourceKind::Hook, TeardownStatus::Deleted),
        ],
        "hook objects are not retained, only what the migration touched"
    );
    assert_eq!(h.store.objects_of(ResourceKind::Plan).len(), 1);
    assert_eq!(h.store.objects_of(ResourceKind::Migration).len(), 1);

    let kinds_left: Vec<ResourceKind> = h.tracking_file().await.resources.iter().map(|r| r.kind).collect();
    assert_eq!(kinds_left, vec![ResourceKind::Plan, ResourceKind::Migration]);
}

#[tokio::test(start_paused = true)]
async fn expected_post_hook_failure_retains_migrated_clone() {
    let mut h = Harness::new(StaticHookRunner::new()).await;
    h.script_migration(vec![
        json!({"phase": "Running"}),
        json!({"phase": "Failed", "conditions": [{"type": "Failed", "status": "True", "message": "PostHook step failed"}]}),
    ]);
    let plan = MigrationPlan::new(
        "win2022",
        vec![VmSpec::new("win2022-template", PowerState::On, true, true, DiskType::Thin)],
        MigrationMode::Cold,
        PowerState::On,
        Duration::from_secs(300),
    )
    .with_post_hook(HookSpec::expecting(HookOutcome::Fail));

    let outcome = match h.run(&plan).await {
        Ok(o) => o,
        Err(e) => panic!("unexpected error: {e}"),
    };
    assert_eq!(outcome.expected_hook_failure, Some(HookPhase::Post));
    let clone = outcome.vms[0].name.clone();

    let report = h.teardown_engine().teardown(&mut h.ctx, TeardownPolicy::Enabled).await;
    let statuses: Vec<(ResourceKind, TeardownStatus)> =
        report.outcomes.iter().map(|o| (o.record.resource.kind, o.status.clone())).collect();
    assert_eq!(
        statuses,
        vec![
            (ResourceKind::Migration, TeardownStatus::Retained),
            (ResourceKind::Plan, TeardownStatus::Retained),
            (ResourceKind::Hook, TeardownStatus::Deleted),
            (ResourceKind::ClonedVm(vmigrate_core::ProviderType::Vsphere), TeardownStatus::Retained),
        ]
    );
    assert!(h.inventory.contains(&clone), "clone behind a retained plan must survive teardown");

    let left = h.tracking_file().await.resources;
    assert_eq!(left.len(), 3);
    assert_eq!(left[0].name, clone, "tracking file keeps creation order");
}

#[tokio::test(start_paused = true)]
async fn suppressed_teardown_leaves_everything_in_tracking_file() {
    let mut h = Harness::new(StaticHookRunner::new()).await;
    h.script_migration(phases(&["Succeeded"]));
    if let Err(e) = h.run(&cold_plan(Duration::from_secs(300))).await {
        panic!("unexpected error: {e}");
    }

    let report = h.teardown_engine().teardown(&mut h.ctx, TeardownPolicy::Suppressed).await;
    assert!(report.is_clean());
    assert!(h.store.deleted().is_empty());
    let file = h.tracking_file().await;
    assert_eq!(file.session.as_str(), "it01");
    let kinds_left: Vec<ResourceKind> = file.resources.iter().map(|r| r.kind).collect();
    assert_eq!(kinds_left, vec![ResourceKind::Plan, ResourceKind::Migration]);
}

#[tokio::test(start_paused = true)]
async fn post_hook_mismatch_is_an_error() {
    let mut h = Harness::new(StaticHookRunner::new().with_outcome(HookPhase::Post, HookOutcome::Succeed)).await;
    h.script_migration(phases(&["Succeeded"]));
    let plan = cold_plan(Duration::from_secs(300)).with_post_hook(HookSpec::expecting(HookOutcome::Fail));

    assert!(matches!(
        h.run(&plan).await,
        Err(ExecutorError::PostHookExpectationMismatch { expected: HookOutcome::Fail, observed: HookOutcome::Succeed, .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn remote_failure_surfaces_condition_message() {
    let mut h = Harness::new(StaticHookRunner::new()).await;
    h.script_migration(vec![json!({"conditions": [
        {"type": "Failed", "status": "True", "message": "DiskTransfer failed for rhel9"}
    ]})]);

    match h.run(&cold_plan(Duration::from_secs(300))).await {
        Err(ExecutorError::MigrationPlanExec { phase, reason, .. }) => {
            assert_eq!(phase, RemotePhase::Failed);
            assert_eq!(reason, "DiskTransfer failed for rhel9");
        }
        other => panic!("expected MigrationPlanExec, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn warm_migration_of_clone_configures_cutover_and_cleans_clone() {
    let mut h = Harness::new(StaticHookRunner::new()).await;
    h.script_migration(phases(&["Running", "Succeeded"]));
    let plan = MigrationPlan::new(
        "win2022",
        vec![VmSpec::new("win2022-template", PowerState::On, true, true, DiskType::Thin)],
        MigrationMode::Warm { precopy_interval_minutes: 5, cutover_delay_minutes: 10 },
        PowerState::On,
        Duration::from_secs(600),
    );

    let outcome = match h.run(&plan).await {
        Ok(o) => o,
        Err(e) => panic!("unexpected error: {e}"),
    };
    assert!(outcome.succeeded());
    let clone = outcome.vms[0].name.clone();
    assert!(clone.starts_with("win2022-template-it01-"), "clone name: {clone}");
    assert!(h.inventory.contains("win2022-template"), "template must not be touched");
    assert_eq!(h.inventory.power_calls(), vec![(clone.clone(), PowerState::On)]);

    let plans = h.store.objects_of(ResourceKind::Plan);
    let (_, plan_obj) = &plans[0];
    assert_eq!(plan_obj["spec"]["warm"], true);
    assert_eq!(plan_obj["spec"]["vms"][0]["name"], clone.as_str());
    let migrations = h.store.objects_of(ResourceKind::Migration);
    let (_, migration_obj) = &migrations[0];
    assert!(migration_obj["spec"]["cutover"].is_string());
    assert_eq!(migration_obj["spec"]["precopyIntervalMinutes"], 5);

    assert_eq!(kinds(&h.ctx)[0], ResourceKind::ClonedVm(vmigrate_core::ProviderType::Vsphere));
    let report = h.teardown_engine().teardown(&mut h.ctx, TeardownPolicy::Enabled).await;
    assert!(report.is_clean());
    assert!(!h.inventory.contains(&clone), "clone must be deleted last");
}

#[tokio::test(start_paused = true)]
async fn invalid_plan_creates_nothing() {
    let mut h = Harness::new(StaticHookRunner::new()).await;
    let plan = MigrationPlan::new("empty", Vec::new(), MigrationMode::Cold, PowerState::On, Duration::from_secs(60));
    assert!(matches!(h.run(&plan).await, Err(ExecutorError::Core(_))));
    assert!(h.ctx.records().is_empty());
    assert_eq!(h.store.create_calls(), 0);
}

/// Create and delete a namespace through a live `kubectl proxy`.
#[tokio::test]
#[ignore = "requires `kubectl proxy --unix-socket` at $VMIGRATE_PROXY_SOCKET"]
async fn live_proxy_namespace_round_trip() {
    use vmigrate_executor::{readiness, CreateRequest, ProxyStore, ResourceCreator, ResourceName};

    let socket = std::env::var("VMIGRATE_PROXY_SOCKET").unwrap_or_else(|_| "/tmp/kubectl-proxy.sock".to_owned());
    let store = Arc::new(ProxyStore::new(socket));
    let mut config = ExecutorConfig::default();
    config.tracking_file = None;
    let creator = ResourceCreator::new(store.clone(), config.poll_interval);
    let mut ctx = ExecutionContext::generate();

    let request = CreateRequest::new(ResourceKind::Namespace, None, ResourceName::Scoped("vmigrate-it".to_owned()), json!({}));
    let handle = match creator
        .create_or_reuse(&mut ctx, request, readiness::phase_is("Active"), config.resource_wait_timeout)
        .await
    {
        Ok(h) => h,
        Err(e) => panic!("unexpected error: {e}"),
    };
    assert!(!handle.reused);

    let report = TeardownEngine::new(store, &config).teardown(&mut ctx, TeardownPolicy::Enabled).await;
    assert!(report.is_clean(), "leftovers: {:?}", report.leftovers());
}
