//! Declarative migration plan input.
//!
//! Deserialisation never fills in defaults: every field the orchestrator
//! reads must be present in the input.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::hook::{HookPhase, HookPlaybook, HookSpec};
use crate::vm::{DiskType, PowerState};

/// Placeholders the destination accepts in a PVC name template.
const PVC_PLACEHOLDERS: [&str; 5] = ["VmName", "PlanName", "DiskIndex", "RootDiskIndex", "Shared"];

/// One VM to migrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[non_exhaustive]
pub struct VmSpec {
    /// Source VM (or template, when `clone` is set) name.
    pub name: String,
    /// Power state to put the source VM in before migrating.
    pub source_power: PowerState,
    /// Whether the guest agent is expected on the migrated VM.
    pub guest_agent: bool,
    /// Migrate a session-scoped clone instead of the VM itself.
    pub clone: bool,
    pub disk_type: DiskType,
}

impl VmSpec {
    pub fn new(
        name: impl Into<String>,
        source_power: PowerState,
        guest_agent: bool,
        clone: bool,
        disk_type: DiskType,
    ) -> Self {
        Self { name: name.into(), source_power, guest_agent, clone, disk_type }
    }
}

/// Plan-level migration mode; a plan cannot mix modes across VMs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum MigrationMode {
    /// Single cutover with the source powered off.
    Cold,
    /// Source stays on while periodic precopies run until cutover.
    Warm {
        precopy_interval_minutes: u32,
        cutover_delay_minutes: u32,
    },
}

impl MigrationMode {
    #[must_use]
    pub fn is_warm(self) -> bool {
        matches!(self, Self::Warm { .. })
    }

    /// `"cold"` or `"warm"`, used as a name suffix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cold => "cold",
            Self::Warm { .. } => "warm",
        }
    }
}

/// Declarative description of one migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
#[non_exhaustive]
pub struct MigrationPlan {
    /// Base name; the orchestrator derives session-scoped object names from it.
    pub name: String,
    pub virtual_machines: Vec<VmSpec>,
    pub migration: MigrationMode,
    /// Applied by the remote side to every VM once the run completes.
    pub target_power_state: PowerState,
    pub pre_hook: Option<HookSpec>,
    pub post_hook: Option<HookSpec>,
    pub pvc_name_template: Option<String>,
    /// Deadline for the remote run, in seconds.
    pub timeout_secs: u64,
}

/// Hook playbooks of a validated plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanHooks {
    pub pre: Option<HookPlaybook>,
    pub post: Option<HookPlaybook>,
}

impl MigrationPlan {
    /// A plan with no hooks and no PVC name template.
    pub fn new(
        name: impl Into<String>,
        virtual_machines: Vec<VmSpec>,
        migration: MigrationMode,
        target_power_state: PowerState,
        timeout: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            virtual_machines,
            migration,
            target_power_state,
            pre_hook: None,
            post_hook: None,
            pvc_name_template: None,
            timeout_secs: timeout.as_secs(),
        }
    }

    #[must_use]
    pub fn with_pre_hook(mut self, hook: HookSpec) -> Self {
        self.pre_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn with_post_hook(mut self, hook: HookSpec) -> Self {
        self.post_hook = Some(hook);
        self
    }

    #[must_use]
    pub fn with_pvc_name_template(mut self, template: impl Into<String>) -> Self {
        self.pvc_name_template = Some(template.into());
        self
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Check every plan-level rule and resolve the hook playbooks.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidPlan`] for the first violated rule, or
    /// [`CoreError::InvalidHookConfig`] for an invalid hook.
    pub fn validate(&self) -> Result<PlanHooks, CoreError> {
        let invalid = |field: &str, reason: String| CoreError::InvalidPlan { field: field.to_owned(), reason };

        if self.name.trim().is_empty() {
            return Err(invalid("name", "must not be empty".to_owned()));
        }
        if self.virtual_machines.is_empty() {
            return Err(invalid("virtual_machines", "at least one VM is required".to_owned()));
        }
        let mut seen = BTreeSet::new();
        for vm in &self.virtual_machines {
            if vm.name.trim().is_empty() {
                return Err(invalid("virtual_machines", "VM name must not be empty".to_owned()));
            }
            if !seen.insert(vm.name.as_str()) {
                return Err(invalid("virtual_machines", format!("VM '{}' is listed twice", vm.name)));
            }
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout_secs", "must be greater than zero".to_owned()));
        }
        if let MigrationMode::Warm { precopy_interval_minutes, .. } = self.migration {
            if precopy_interval_minutes == 0 {
                return Err(invalid("migration", "warm precopy interval must be at least one minute".to_owned()));
            }
            if let Some(vm) = self.virtual_machines.iter().find(|vm| vm.source_power == PowerState::Off) {
                return Err(invalid(
                    "virtual_machines",
                    format!("warm migration keeps the source running, but VM '{}' is powered off", vm.name),
                ));
            }
        }
        if let Some(template) = &self.pvc_name_template {
            validate_pvc_template(template).map_err(|reason| invalid("pvc_name_template", reason))?;
        }

        Ok(PlanHooks {
            pre: self.pre_hook.as_ref().map(|h| h.resolve(HookPhase::Pre)).transpose()?,
            post: self.post_hook.as_ref().map(|h| h.resolve(HookPhase::Post)).transpose()?,
        })
    }
}

/// Check `{{.Name}}` placeholders in a PVC name template.
fn validate_pvc_template(template: &str) -> Result<(), String> {
    if template.trim().is_empty() {
        return Err("must not be empty".to_owned());
    }
    let mut rest = template;
    let mut per_disk = false;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| "unterminated '{{'".to_owned())?;
        let inner = after[..end].trim();
        let name = inner
            .strip_prefix('.')
            .ok_or_else(|| format!("placeholder '{inner}' must start with '.'"))?;
        if !PVC_PLACEHOLDERS.contains(&name) {
            return Err(format!("unknown placeholder '{{{{.{name}}}}}'"));
        }
        per_disk |= name == "DiskIndex";
        rest = &after[end + 2..];
    }
    if per_disk {
        Ok(())
    } else {
        Err("must reference {{.DiskIndex}} so each disk gets its own claim".to_owned())
    }
}
