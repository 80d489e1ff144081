//! Pre/post migration hook configuration and outcomes.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const SUCCEED_PLAYBOOK: &str = "\
- name: vmigrate-hook-succeed
  hosts: localhost
  tasks:
    - name: Report success
      ansible.builtin.debug:
        msg: hook completed
";

const FAIL_PLAYBOOK: &str = "\
- name: vmigrate-hook-fail
  hosts: localhost
  tasks:
    - name: Fail on purpose
      ansible.builtin.fail:
        msg: hook configured to fail
";

/// When a hook runs relative to the migration body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    Pre,
    Post,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => f.write_str("pre"),
            Self::Post => f.write_str("post"),
        }
    }
}

/// Result of a hook run, expected or observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookOutcome {
    Succeed,
    Fail,
}

impl fmt::Display for HookOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeed => f.write_str("succeed"),
            Self::Fail => f.write_str("fail"),
        }
    }
}

/// Hook configuration as written in a plan.
///
/// Exactly one of `expected_result` (built-in playbook) or
/// `playbook_base64` (custom playbook) must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookSpec {
    pub expected_result: Option<HookOutcome>,
    pub playbook_base64: Option<String>,
}

impl HookSpec {
    /// A hook running the built-in playbook that ends with `outcome`.
    #[must_use]
    pub fn expecting(outcome: HookOutcome) -> Self {
        Self { expected_result: Some(outcome), playbook_base64: None }
    }

    /// Validate the spec and resolve the playbook it runs.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidHookConfig`] if both or neither fields are
    /// set, or if a custom playbook is not base64-encoded UTF-8 YAML holding a
    /// non-empty list of plays.
    pub fn resolve(&self, phase: HookPhase) -> Result<HookPlaybook, CoreError> {
        let invalid = |reason: String| CoreError::InvalidHookConfig { phase, reason };
        match (&self.expected_result, &self.playbook_base64) {
            (Some(_), Some(_)) => Err(invalid(
                "'expected_result' and 'playbook_base64' are mutually exclusive".to_owned(),
            )),
            (None, None) => Err(invalid("must specify either 'expected_result' or 'playbook_base64'".to_owned())),
            (Some(outcome), None) => Ok(HookPlaybook::Predefined(*outcome)),
            (None, Some(encoded)) => {
                if encoded.trim().is_empty() {
                    return Err(invalid("'playbook_base64' cannot be empty".to_owned()));
                }
                let bytes = STANDARD
                    .decode(encoded.trim())
                    .map_err(|e| invalid(format!("playbook is not valid base64: {e}")))?;
                let text = String::from_utf8(bytes)
                    .map_err(|e| invalid(format!("playbook is not valid UTF-8: {e}")))?;
                let doc: serde_yaml::Value = serde_yaml::from_str(&text)
                    .map_err(|e| invalid(format!("playbook is not valid YAML: {e}")))?;
                match doc.as_sequence() {
                    Some(plays) if !plays.is_empty() => Ok(HookPlaybook::Custom(encoded.trim().to_owned())),
                    _ => Err(invalid("playbook must be a non-empty list of plays".to_owned())),
                }
            }
        }
    }
}

/// A validated hook playbook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookPlaybook {
    /// Built-in playbook whose outcome is known in advance.
    Predefined(HookOutcome),
    /// Caller-supplied base64 playbook; its outcome is only observed.
    Custom(String),
}

impl HookPlaybook {
    /// The outcome the plan declares, if any.
    #[must_use]
    pub fn expected(&self) -> Option<HookOutcome> {
        match self {
            Self::Predefined(outcome) => Some(*outcome),
            Self::Custom(_) => None,
        }
    }

    /// Base64-encoded playbook text as stored on the Hook object.
    #[must_use]
    pub fn to_base64(&self) -> String {
        match self {
            Self::Predefined(HookOutcome::Succeed) => STANDARD.encode(SUCCEED_PLAYBOOK),
            Self::Predefined(HookOutcome::Fail) => STANDARD.encode(FAIL_PLAYBOOK),
            Self::Custom(encoded) => encoded.clone(),
        }
    }
}

/// Observed-vs-expected result of one hook execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct HookRecord {
    pub phase: HookPhase,
    pub expected: Option<HookOutcome>,
    pub observed: HookOutcome,
}

impl HookRecord {
    #[must_use]
    pub fn new(phase: HookPhase, expected: Option<HookOutcome>, observed: HookOutcome) -> Self {
        Self { phase, expected, observed }
    }

    /// True when no expectation was declared or the observation matches it.
    #[must_use]
    pub fn matches_expectation(&self) -> bool {
        self.expected.is_none_or(|e| e == self.observed)
    }

    /// The hook was declared to fail and did.
    #[must_use]
    pub fn is_expected_failure(&self) -> bool {
        self.expected == Some(HookOutcome::Fail) && self.observed == HookOutcome::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom(yaml: &str) -> HookSpec {
        HookSpec { expected_result: None, playbook_base64: Some(STANDARD.encode(yaml)) }
    }

    #[test]
    fn predefined_hook_resolves_with_expectation() {
        let playbook = match HookSpec::expecting(HookOutcome::Fail).resolve(HookPhase::Post) {
            Ok(p) => p,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(playbook.expected(), Some(HookOutcome::Fail));
        let decoded = match STANDARD.decode(playbook.to_base64()) {
            Ok(b) => b,
            Err(e) => panic!("built-in playbook is not base64: {e}"),
        };
        assert!(String::from_utf8_lossy(&decoded).contains("ansible.builtin.fail"));
    }

    #[test]
    fn both_fields_set_is_rejected() {
        let spec = HookSpec {
            expected_result: Some(HookOutcome::Succeed),
            playbook_base64: Some(STANDARD.encode("- hosts: localhost\n")),
        };
        assert!(matches!(
            spec.resolve(HookPhase::Pre),
            Err(CoreError::InvalidHookConfig { phase: HookPhase::Pre, .. })
        ));
    }

    #[test]
    fn neither_field_set_is_rejected() {
        let spec = HookSpec { expected_result: None, playbook_base64: None };
        assert!(spec.resolve(HookPhase::Post).is_err());
    }

    #[test]
    fn custom_playbook_must_be_non_empty_list() {
        assert!(custom("- hosts: localhost\n  tasks: []\n").resolve(HookPhase::Pre).is_ok());
        assert!(custom("hosts: localhost\n").resolve(HookPhase::Pre).is_err());
        assert!(custom("[]").resolve(HookPhase::Pre).is_err());
    }

    #[test]
    fn custom_playbook_rejects_bad_base64() {
        let spec = HookSpec { expected_result: None, playbook_base64: Some("not base64!".to_owned()) };
        assert!(spec.resolve(HookPhase::Pre).is_err());
    }

    #[test]
    fn custom_playbook_has_no_expectation() {
        let playbook = match custom("- hosts: localhost\n").resolve(HookPhase::Post) {
            Ok(p) => p,
            Err(e) => panic!("unexpected error: {e}"),
        };
        assert_eq!(playbook.expected(), None);
        let record = HookRecord::new(HookPhase::Post, playbook.expected(), HookOutcome::Fail);
        assert!(record.matches_expectation(), "custom hooks are never a mismatch");
        assert!(!record.is_expected_failure());
    }

    #[test]
    fn hook_record_detects_mismatch() {
        let record = HookRecord::new(HookPhase::Pre, Some(HookOutcome::Succeed), HookOutcome::Fail);
        assert!(!record.matches_expectation());
        let expected_fail = HookRecord::new(HookPhase::Post, Some(HookOutcome::Fail), HookOutcome::Fail);
        assert!(expected_fail.matches_expectation());
        assert!(expected_fail.is_expected_failure());
    }
}
