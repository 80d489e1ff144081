//! Migration orchestration.
//!
//! Drives one [`MigrationPlan`] from submission to a terminal state:
//!
//! ```text
//! Pending -> [PreHookRunning ->] Running -> [PostHookRunning ->] Succeeded | Failed
//!                                        \-> TimedOut
//! ```
//!
//! The remote side does the actual migration. This module creates the Hook,
//! Plan and Migration objects, runs hooks through a [`HookRunner`], and
//! samples the Migration's phase until it is terminal or the plan's deadline
//! passes. A deadline never cancels the remote run.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use vmigrate_core::{
    HookOutcome, HookPhase, HookPlaybook, HookRecord, MigrationMode, MigrationPlan, MigrationRun, MigrationState,
    RemotePhase, ResourceKind, ResourceRef, VmDescriptor,
};

use crate::creator::{readiness, CreateRequest, ResourceCreator, ResourceName};
use crate::hooks::{HookInvocation, HookRunner};
use crate::poll::{PollError, Poller};
use crate::provider::SourceProvider;
use crate::store::{conditions, field, ObjectStore};
use crate::{ExecutionContext, ExecutorConfig, ExecutorError};

/// Image the remote side runs hook playbooks in.
pub const HOOK_RUNNER_IMAGE: &str = "quay.io/konveyor/hook-runner";

/// Pre-existing objects a plan refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct MigrationTargets {
    /// Namespace the Hook, Plan and Migration objects are created in.
    pub namespace: String,
    /// Namespace the migrated VMs land in.
    pub target_namespace: String,
    pub source_provider: ResourceRef,
    pub destination_provider: ResourceRef,
    pub network_map: ResourceRef,
    pub storage_map: ResourceRef,
}

impl MigrationTargets {
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        target_namespace: impl Into<String>,
        source_provider: ResourceRef,
        destination_provider: ResourceRef,
        network_map: ResourceRef,
        storage_map: ResourceRef,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            target_namespace: target_namespace.into(),
            source_provider,
            destination_provider,
            network_map,
            storage_map,
        }
    }
}

/// How a run ended, when that end is not an error.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct MigrationOutcome {
    pub run: MigrationRun,
    /// VMs submitted for migration, clones included.
    pub vms: Vec<VmDescriptor>,
    pub plan: Option<ResourceRef>,
    pub migration: Option<ResourceRef>,
    /// Set when a hook declared to fail did fail.
    pub expected_hook_failure: Option<HookPhase>,
    /// Whether the migrated VMs are worth validating on the destination.
    pub validate_vms: bool,
}

impl MigrationOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.run.state() == MigrationState::Succeeded
    }
}

/// Runs migration plans against one object store.
pub struct MigrationOrchestrator {
    creator: ResourceCreator,
    hooks: Arc<dyn HookRunner>,
    config: ExecutorConfig,
}

impl MigrationOrchestrator {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, hooks: Arc<dyn HookRunner>, config: ExecutorConfig) -> Self {
        let creator = ResourceCreator::new(store, config.poll_interval);
        Self { creator, hooks, config }
    }

    #[must_use]
    pub fn creator(&self) -> &ResourceCreator {
        &self.creator
    }

    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `plan` and wait for it to finish.
    ///
    /// Every object created on the way is registered in `ctx`, including on
    /// error paths. A pre-hook that fails as declared ends the run in
    /// `Failed` without creating a Plan; a post-hook that fails as declared
    /// marks the Plan, the Migration, the clones they migrate and their
    /// dependents as retained.
    ///
    /// # Errors
    /// - [`ExecutorError::Core`] if the plan does not validate.
    /// - [`ExecutorError::PreHookExpectationMismatch`] /
    ///   [`ExecutorError::PostHookExpectationMismatch`] when a hook result
    ///   differs from its declared expectation.
    /// - [`ExecutorError::MigrationTimeout`] if the migration is not terminal
    ///   within the plan's timeout.
    /// - [`ExecutorError::MigrationPlanExec`] if the remote side reports a
    ///   failed or canceled migration that no hook expectation explains.
    /// - Provider, hook execution and resource errors from the steps on the way.
    pub async fn run(
        &self,
        ctx: &mut ExecutionContext,
        plan: &MigrationPlan,
        targets: &MigrationTargets,
        provider: &SourceProvider,
    ) -> Result<MigrationOutcome, ExecutorError> {
        let hooks = plan.validate()?;
        let mut run = MigrationRun::new(plan.name.as_str());
        tracing::info!(
            run = %run.id,
            plan = %plan.name,
            mode = plan.migration.as_str(),
            vms = plan.virtual_machines.len(),
            "starting migration run"
        );

        let vms = prepare_vms(ctx, plan, provider).await?;

        let pre_hook = match &hooks.pre {
            Some(playbook) => Some(self.create_hook(ctx, plan, targets, HookPhase::Pre, playbook).await?),
            None => None,
        };
        let post_hook = match &hooks.post {
            Some(playbook) => Some(self.create_hook(ctx, plan, targets, HookPhase::Post, playbook).await?),
            None => None,
        };

        if let Some(playbook) = &hooks.pre {
            run.advance(MigrationState::PreHookRunning)?;
            let record = self.run_hook(ctx, &run, HookPhase::Pre, playbook).await?;
            run.record_hook(record);
            if let Some(expected) = mismatch(&record) {
                run.advance(MigrationState::Failed)?;
                return Err(ExecutorError::PreHookExpectationMismatch { run: run.id, expected, observed: record.observed });
            }
            if record.observed == HookOutcome::Fail {
                run.advance(MigrationState::Failed)?;
                tracing::warn!(run = %run.id, plan = %plan.name, "pre-hook failed, migration not submitted");
                let expected_hook_failure = record.is_expected_failure().then_some(HookPhase::Pre);
                return Ok(MigrationOutcome {
                    run,
                    vms,
                    plan: None,
                    migration: None,
                    expected_hook_failure,
                    validate_vms: false,
                });
            }
        }

        let body = plan_body(plan, targets, &vms, pre_hook.as_ref(), post_hook.as_ref());
        let plan_ref = self
            .creator
            .create_or_reuse(
                ctx,
                CreateRequest::new(
                    ResourceKind::Plan,
                    Some(&targets.namespace),
                    ResourceName::Fresh(format!("{}-{}", plan.name, plan.migration.as_str())),
                    body,
                ),
                readiness::condition_true("Ready"),
                self.config.plan_ready_timeout,
            )
            .await?
            .reference;

        let body = migration_body(&plan_ref, plan.migration, chrono::Utc::now());
        let migration_ref = self
            .creator
            .create_or_reuse(
                ctx,
                CreateRequest::new(
                    ResourceKind::Migration,
                    Some(&targets.namespace),
                    ResourceName::Fresh(plan_ref.name.clone()),
                    body,
                )
                .with_parent(plan_ref.clone()),
                readiness::always(),
                self.config.resource_wait_timeout,
            )
            .await?
            .reference;
        run.advance(MigrationState::Running)?;

        let (phase, object) = self.wait_for_terminal(&mut run, &migration_ref, plan.timeout()).await?;

        let mut expected_hook_failure = None;
        if let Some(playbook) = &hooks.post {
            run.advance(MigrationState::PostHookRunning)?;
            let record = self.run_hook(ctx, &run, HookPhase::Post, playbook).await?;
            run.record_hook(record);
            if let Some(expected) = mismatch(&record) {
                run.advance(MigrationState::Failed)?;
                return Err(ExecutorError::PostHookExpectationMismatch {
                    run: run.id,
                    expected,
                    observed: record.observed,
                });
            }
            if record.is_expected_failure() {
                tracing::warn!(run = %run.id, plan = %plan_ref, "post-hook failed as expected, retaining migration resources");
                let mut roots = vec![plan_ref.clone(), migration_ref.clone()];
                roots.extend(migrated_clones(ctx, &vms));
                ctx.retain_with_dependents(&roots);
                run.mark_retained();
                expected_hook_failure = Some(HookPhase::Post);
            }
        }

        if phase == RemotePhase::Succeeded {
            run.advance(MigrationState::Succeeded)?;
            tracing::info!(run = %run.id, plan = %plan_ref, "migration succeeded");
        } else {
            run.advance(MigrationState::Failed)?;
            let reason = failure_message(&object);
            if expected_hook_failure.is_none() {
                tracing::warn!(run = %run.id, plan = %plan_ref, phase = %phase, reason = %reason, "migration failed");
                return Err(ExecutorError::MigrationPlanExec { run: run.id, plan: plan_ref.name, phase, reason });
            }
            tracing::info!(run = %run.id, plan = %plan_ref, reason = %reason, "migration failure explained by expected post-hook failure");
        }

        Ok(MigrationOutcome {
            run,
            vms,
            plan: Some(plan_ref),
            migration: Some(migration_ref),
            validate_vms: true,
            expected_hook_failure,
        })
    }

    async fn create_hook(
        &self,
        ctx: &mut ExecutionContext,
        plan: &MigrationPlan,
        targets: &MigrationTargets,
        phase: HookPhase,
        playbook: &HookPlaybook,
    ) -> Result<ResourceRef, ExecutorError> {
        let body = json!({
            "spec": {
                "image": HOOK_RUNNER_IMAGE,
                "playbook": playbook.to_base64(),
            }
        });
        let handle = self
            .creator
            .create_or_reuse(
                ctx,
                CreateRequest::new(
                    ResourceKind::Hook,
                    Some(&targets.namespace),
                    ResourceName::Fresh(format!("{}-{phase}-hook", plan.name)),
                    body,
                ),
                readiness::always(),
                self.config.resource_wait_timeout,
            )
            .await?;
        Ok(handle.reference)
    }

    async fn run_hook(
        &self,
        ctx: &ExecutionContext,
        run: &MigrationRun,
        phase: HookPhase,
        playbook: &HookPlaybook,
    ) -> Result<HookRecord, ExecutorError> {
        let invocation = HookInvocation::new(phase, playbook.clone(), ctx.session().clone(), run.id);
        let observed = self.hooks.run(&invocation).await?;
        let record = HookRecord::new(phase, playbook.expected(), observed);
        tracing::info!(
            run = %run.id,
            phase = %phase,
            expected = ?record.expected,
            observed = %observed,
            "hook finished"
        );
        Ok(record)
    }

    /// Sample the Migration until its phase is terminal.
    ///
    /// On deadline the run moves to `TimedOut`; the remote run is left alone.
    async fn wait_for_terminal(
        &self,
        run: &mut MigrationRun,
        migration: &ResourceRef,
        deadline: Duration,
    ) -> Result<(RemotePhase, Value), ExecutorError> {
        let poller = Poller::new(self.config.poll_interval, deadline);
        let store = self.creator.store();
        let last_phase: Mutex<Option<RemotePhase>> = Mutex::new(None);
        let last = &last_phase;
        let result = poller
            .until(|| async move {
                let object = store.get(migration).await?.ok_or_else(|| ExecutorError::NotFound(migration.clone()))?;
                let phase = remote_phase(&object);
                tracing::debug!(migration = %migration, phase = %phase, "sampled migration phase");
                let terminal = phase.is_terminal();
                if let Ok(mut seen) = last.lock() {
                    *seen = Some(phase.clone());
                }
                Ok::<_, ExecutorError>(terminal.then_some((phase, object)))
            })
            .await;

        let last_phase = last_phase.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Some(phase) = &last_phase {
            run.observe(phase.clone());
        }
        match result {
            Ok(terminal) => Ok(terminal),
            Err(PollError::DeadlineExceeded { waited, .. }) => {
                run.advance(MigrationState::TimedOut)?;
                tracing::warn!(
                    run = %run.id,
                    migration = %migration,
                    waited_secs = waited.as_secs(),
                    "migration not terminal before deadline, leaving it running"
                );
                Err(ExecutorError::MigrationTimeout { run: run.id, plan: run.plan_name.clone(), last_phase, waited })
            }
            Err(PollError::Sample(e)) => Err(e.for_resource(migration)),
        }
    }
}

/// Resolve every VM in the plan on the source provider and bring it to the
/// requested source power state.
async fn prepare_vms(
    ctx: &mut ExecutionContext,
    plan: &MigrationPlan,
    provider: &SourceProvider,
) -> Result<Vec<VmDescriptor>, ExecutorError> {
    let mut vms = Vec::with_capacity(plan.virtual_machines.len());
    for spec in &plan.virtual_machines {
        let mut vm = provider.vm_descriptor(ctx, &spec.name, spec.clone).await?;
        if vm.power_state != spec.source_power {
            provider.set_power_state(&vm.name, spec.source_power).await?;
            vm.power_state = spec.source_power;
        }
        if vm.guest_agent != spec.guest_agent {
            tracing::warn!(vm = %vm.name, expected = spec.guest_agent, "guest agent presence differs from plan");
        }
        tracing::info!(vm = %vm.name, source = %spec.name, power = %vm.power_state, cloned = spec.clone, "source VM ready");
        vms.push(vm);
    }
    Ok(vms)
}

fn object_ref(resource: &ResourceRef) -> Value {
    match &resource.namespace {
        Some(ns) => json!({ "name": resource.name, "namespace": ns }),
        None => json!({ "name": resource.name }),
    }
}

/// Body of the Plan object. Hooks are attached to every VM.
#[must_use]
pub fn plan_body(
    plan: &MigrationPlan,
    targets: &MigrationTargets,
    vms: &[VmDescriptor],
    pre_hook: Option<&ResourceRef>,
    post_hook: Option<&ResourceRef>,
) -> Value {
    let mut hooks = Vec::new();
    if let Some(hook) = pre_hook {
        hooks.push(json!({ "hook": object_ref(hook), "step": "PreHook" }));
    }
    if let Some(hook) = post_hook {
        hooks.push(json!({ "hook": object_ref(hook), "step": "PostHook" }));
    }
    let vms: Vec<Value> = vms.iter().map(|vm| json!({ "name": vm.name, "hooks": hooks })).collect();

    let mut spec = json!({
        "warm": plan.migration.is_warm(),
        "targetNamespace": targets.target_namespace,
        "targetPowerState": plan.target_power_state.to_string(),
        "provider": {
            "source": object_ref(&targets.source_provider),
            "destination": object_ref(&targets.destination_provider),
        },
        "map": {
            "network": object_ref(&targets.network_map),
            "storage": object_ref(&targets.storage_map),
        },
        "vms": vms,
    });
    if let (Some(template), Some(fields)) = (&plan.pvc_name_template, spec.as_object_mut()) {
        fields.insert("pvcNameTemplate".to_owned(), Value::from(template.as_str()));
    }
    json!({ "spec": spec })
}

/// Body of the Migration object. Warm runs schedule their cutover relative
/// to `now`.
#[must_use]
pub fn migration_body(plan: &ResourceRef, mode: MigrationMode, now: chrono::DateTime<chrono::Utc>) -> Value {
    let mut spec = json!({ "plan": object_ref(plan) });
    if let (MigrationMode::Warm { precopy_interval_minutes, cutover_delay_minutes }, Some(fields)) =
        (mode, spec.as_object_mut())
    {
        let cutover = now + chrono::Duration::minutes(i64::from(cutover_delay_minutes));
        fields.insert(
            "cutover".to_owned(),
            Value::from(cutover.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        );
        fields.insert("precopyIntervalMinutes".to_owned(), Value::from(precopy_interval_minutes));
    }
    json!({ "spec": spec })
}

/// Phase of a Migration object: `status.phase` if present, else derived from
/// its conditions.
#[must_use]
pub fn remote_phase(object: &Value) -> RemotePhase {
    if let Some(phase) = field(object, "status.phase").and_then(Value::as_str) {
        return phase.parse::<RemotePhase>().unwrap_or_else(|never| match never {});
    }
    let is_true = |kinds: &[&str]| conditions(object).any(|(kind, status, _)| kinds.contains(&kind) && status == "True");
    if is_true(&["Succeeded"]) {
        RemotePhase::Succeeded
    } else if is_true(&["Failed"]) {
        RemotePhase::Failed
    } else if is_true(&["Canceled"]) {
        RemotePhase::Canceled
    } else if is_true(&["Running", "Executing"]) {
        RemotePhase::Running
    } else {
        RemotePhase::Pending
    }
}

fn failure_message(object: &Value) -> String {
    conditions(object)
        .find(|(kind, status, _)| matches!(*kind, "Failed" | "Canceled") && *status == "True")
        .map(|(kind, _, message)| if message.is_empty() { kind.to_owned() } else { message.to_owned() })
        .unwrap_or_else(|| "no failure condition reported".to_owned())
}

/// Clones this session made of the VMs the plan migrates.
fn migrated_clones(ctx: &ExecutionContext, vms: &[VmDescriptor]) -> Vec<ResourceRef> {
    ctx.records()
        .iter()
        .map(|record| &record.resource)
        .filter(|resource| matches!(resource.kind, ResourceKind::ClonedVm(_)))
        .filter(|resource| vms.iter().any(|vm| vm.name == resource.name))
        .cloned()
        .collect()
}

fn mismatch(record: &HookRecord) -> Option<HookOutcome> {
    record.expected.filter(|expected| *expected != record.observed)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use vmigrate_core::{DiskType, PowerState, ProviderType, VmSpec};

    use super::*;

    fn reference(kind: ResourceKind, name: &str) -> ResourceRef {
        ResourceRef::new(kind, name, Some("mtv".to_owned()))
    }

    fn targets() -> MigrationTargets {
        MigrationTargets::new(
            "mtv",
            "migrated",
            reference(ResourceKind::Provider, "vsphere-ab12"),
            reference(ResourceKind::Provider, "host"),
            reference(ResourceKind::NetworkMap, "net-ab12"),
            reference(ResourceKind::StorageMap, "storage-ab12"),
        )
    }

    fn plan(mode: MigrationMode) -> MigrationPlan {
        MigrationPlan::new(
            "rhel9",
            vec![VmSpec::new("rhel9-template", PowerState::On, true, true, DiskType::Thin)],
            mode,
            PowerState::Off,
            Duration::from_secs(300),
        )
    }

    #[test]
    fn phase_field_wins_over_conditions() {
        let object = json!({"status": {"phase": "Running", "conditions": [{"type": "Succeeded", "status": "True"}]}});
        assert_eq!(remote_phase(&object), RemotePhase::Running);
    }

    #[test]
    fn phase_from_conditions() {
        let cases = [
            (json!([{"type": "Succeeded", "status": "True"}]), RemotePhase::Succeeded),
            (json!([{"type": "Failed", "status": "True"}]), RemotePhase::Failed),
            (json!([{"type": "Canceled", "status": "True"}]), RemotePhase::Canceled),
            (json!([{"type": "Executing", "status": "True"}]), RemotePhase::Running),
            (json!([{"type": "Succeeded", "status": "False"}]), RemotePhase::Pending),
        ];
        for (conds, expected) in cases {
            let object = json!({"status": {"conditions": conds}});
            assert_eq!(remote_phase(&object), expected, "conditions: {conds}");
        }
        assert_eq!(remote_phase(&json!({})), RemotePhase::Pending);
    }

    #[test]
    fn failure_message_prefers_condition_text() {
        let object = json!({"status": {"conditions": [
            {"type": "Ready", "status": "True", "message": "ready"},
            {"type": "Failed", "status": "True", "message": "disk transfer failed"},
        ]}});
        assert_eq!(failure_message(&object), "disk transfer failed");
        assert_eq!(failure_message(&json!({})), "no failure condition reported");
    }

    #[test]
    fn plan_body_carries_refs_and_hooks() {
        let vms = vec![VmDescriptor::new("rhel9-template-ab12-0", ProviderType::Vsphere, PowerState::On, true)];
        let pre = reference(ResourceKind::Hook, "rhel9-pre-hook-ab12-1");
        let plan = plan(MigrationMode::Cold).with_pvc_name_template("{{.VmName}}-disk-{{.DiskIndex}}");
        let body = plan_body(&plan, &targets(), &vms, Some(&pre), None);

        assert_eq!(body["spec"]["warm"], false);
        assert_eq!(body["spec"]["targetPowerState"], "off");
        assert_eq!(body["spec"]["targetNamespace"], "migrated");
        assert_eq!(body["spec"]["provider"]["source"]["name"], "vsphere-ab12");
        assert_eq!(body["spec"]["map"]["storage"]["name"], "storage-ab12");
        assert_eq!(body["spec"]["vms"][0]["name"], "rhel9-template-ab12-0");
        assert_eq!(body["spec"]["vms"][0]["hooks"][0]["step"], "PreHook");
        assert_eq!(body["spec"]["vms"][0]["hooks"][0]["hook"]["name"], "rhel9-pre-hook-ab12-1");
        assert_eq!(body["spec"]["pvcNameTemplate"], "{{.VmName}}-disk-{{.DiskIndex}}");
    }

    #[test]
    fn cold_migration_body_has_no_cutover() {
        let body = migration_body(&reference(ResourceKind::Plan, "p"), MigrationMode::Cold, chrono::Utc::now());
        assert_eq!(body["spec"]["plan"]["name"], "p");
        assert!(body["spec"].get("cutover").is_none());
    }

    #[test]
    fn warm_migration_body_schedules_cutover() {
        let now = match chrono::Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).single() {
            Some(t) => t,
            None => panic!("invalid fixture time"),
        };
        let mode = MigrationMode::Warm { precopy_interval_minutes: 5, cutover_delay_minutes: 15 };
        let body = migration_body(&reference(ResourceKind::Plan, "p"), mode, now);
        assert_eq!(body["spec"]["cutover"], "2026-03-01T12:15:00Z");
        assert_eq!(body["spec"]["precopyIntervalMinutes"], 5);
    }

    #[test]
    fn migrated_clones_skip_unrelated_records() {
        let session = match vmigrate_core::SessionId::new("mc01") {
            Ok(s) => s,
            Err(e) => panic!("unexpected error: {e}"),
        };
        let mut ctx = ExecutionContext::new(session);
        let migrated = ResourceRef::new(ResourceKind::ClonedVm(ProviderType::Vsphere), "rhel9-mc01-0", None);
        let other = ResourceRef::new(ResourceKind::ClonedVm(ProviderType::Vsphere), "rhel8-mc01-1", None);
        let hook = reference(ResourceKind::Hook, "rhel9-mc01-0");
        for resource in [migrated.clone(), other, hook] {
            ctx.register(vmigrate_core::ResourceRecord::new(resource, ctx.session().clone(), None));
        }
        let vms = vec![VmDescriptor::new("rhel9-mc01-0", ProviderType::Vsphere, PowerState::On, true)];
        assert_eq!(migrated_clones(&ctx, &vms), vec![migrated]);
    }

    proptest::proptest! {
        #[test]
        fn proptest_only_known_phases_terminate(raw in "[A-Za-z ]{0,16}") {
            let object = json!({"status": {"phase": raw.clone()}});
            let phase = remote_phase(&object);
            let known = ["succeeded", "failed", "canceled", "cancelled"];
            proptest::prop_assert_eq!(phase.is_terminal(), known.contains(&raw.trim().to_ascii_lowercase().as_str()));
        }
    }
}
