//! Keeping toggle state honest after privileged changes.
//!
//! A toggle moves `Idle -> Pending -> Applied | RolledBack -> Idle`. While a
//! change is pending the previous value stays visible. On success the
//! requested value is committed; on failure the actual system value is read
//! back and shown instead, so a toggle never claims a state the system is not
//! in.

use parts_common::error::CommonError;
use parts_common::prefs::PreferenceStore;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::task::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TogglePhase {
    Idle,
    Pending,
    Applied,
    RolledBack,
}

/// Displayed and persisted state of one privileged toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToggleState {
    pub key: String,
    /// Value actually in effect on the system.
    pub live_value: bool,
    /// Whether the value is reapplied after reboot.
    pub persist: bool,
    /// False when the toggle cannot be changed (no root).
    pub enabled: bool,
    pub phase: TogglePhase,
}

impl ToggleState {
    pub fn new(key: impl Into<String>, live_value: bool, persist: bool) -> Self {
        Self {
            key: key.into(),
            live_value,
            persist,
            enabled: true,
            phase: TogglePhase::Idle,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self.persist = false;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.phase == TogglePhase::Pending
    }
}

/// Reads the real value of a setting from the system.
pub trait StateQuery {
    /// `None` when the value cannot be determined.
    fn query(&self, key: &str) -> Option<bool>;
}

/// What reconciliation did with a finished change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied { value: bool },
    RolledBack { requested: bool, actual: bool },
}

/// Sole writer of [`ToggleState`] once a command has finished.
pub struct Reconciler<Q> {
    query: Q,
    store: PreferenceStore,
}

impl<Q: StateQuery> Reconciler<Q> {
    pub fn new(query: Q, store: PreferenceStore) -> Self {
        Self { query, store }
    }

    pub fn store(&self) -> &PreferenceStore {
        &self.store
    }

    /// Mark a change as submitted.
    pub fn begin(&self, state: &mut ToggleState) {
        debug!(key = %state.key, "Toggle pending");
        state.phase = TogglePhase::Pending;
    }

    /// Fold a finished command into the toggle and the persistence store.
    pub fn on_result(
        &mut self,
        state: &mut ToggleState,
        requested: bool,
        result: &ExecutionResult,
    ) -> Result<Outcome, CommonError> {
        if result.success {
            state.live_value = requested;
            state.phase = TogglePhase::Applied;
            self.write_persistence(state)?;
            info!(key = %state.key, value = requested, "Applied");
            return Ok(Outcome::Applied { value: requested });
        }

        let actual = match self.query.query(&state.key) {
            Some(actual) => actual,
            None => {
                warn!(key = %state.key, "Cannot read actual state; keeping last known value");
                state.live_value
            }
        };
        state.live_value = actual;
        state.phase = TogglePhase::RolledBack;
        self.write_persistence(state)?;

        warn!(
            key = %state.key,
            requested,
            actual,
            error = result.error_text().as_deref().unwrap_or("unknown"),
            "Rolled back"
        );
        Ok(Outcome::RolledBack { requested, actual })
    }

    /// Change only whether the current value survives reboot.
    pub fn set_persistence(
        &mut self,
        state: &mut ToggleState,
        persist: bool,
    ) -> Result<(), CommonError> {
        state.persist = persist;
        self.write_persistence(state)?;
        info!(key = %state.key, persist, "Persistence changed");
        Ok(())
    }

    /// Return a finished toggle to `Idle`.
    pub fn settle(&self, state: &mut ToggleState) {
        if matches!(state.phase, TogglePhase::Applied | TogglePhase::RolledBack) {
            state.phase = TogglePhase::Idle;
        }
    }

    fn write_persistence(&mut self, state: &ToggleState) -> Result<(), CommonError> {
        if state.persist {
            self.store.put(&state.key, state.live_value)
        } else {
            self.store.remove(&state.key).map(|_| ())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrivilegeError;
    use std::cell::Cell;
    use tempfile::tempdir;

    struct Fixed(Cell<Option<bool>>);

    impl StateQuery for Fixed {
        fn query(&self, _key: &str) -> Option<bool> {
            self.0.get()
        }
    }

    fn reconciler(dir: &std::path::Path, truth: Option<bool>) -> Reconciler<Fixed> {
        let store = PreferenceStore::open(dir, "selinux_pref").unwrap();
        Reconciler::new(Fixed(Cell::new(truth)), store)
    }

    fn failed() -> ExecutionResult {
        ExecutionResult::failed(PrivilegeError::CommandFailed {
            command: "setenforce 1".into(),
            code: 1,
            output: "setenforce: Permission denied".into(),
        })
    }

    #[test]
    fn test_success_commits_request() {
        let dir = tempdir().unwrap();
        let mut r = reconciler(dir.path(), Some(false));
        let mut state = ToggleState::new("selinux_mode", false, false);

        r.begin(&mut state);
        assert!(state.is_pending());
        let outcome = r.on_result(&mut state, true, &ExecutionResult::ok("")).unwrap();

        assert_eq!(outcome, Outcome::Applied { value: true });
        assert!(state.live_value);
        assert_eq!(state.phase, TogglePhase::Applied);
        r.settle(&mut state);
        assert_eq!(state.phase, TogglePhase::Idle);
    }

    #[test]
    fn test_failure_restores_queried_value() {
        let dir = tempdir().unwrap();
        let mut r = reconciler(dir.path(), Some(false));
        let mut state = ToggleState::new("selinux_mode", true, false);

        // The system changed behind our back; the query wins over both the
        // request and the stale displayed value.
        let outcome = r.on_result(&mut state, true, &failed()).unwrap();
        assert_eq!(
            outcome,
            Outcome::RolledBack {
                requested: true,
                actual: false
            }
        );
        assert!(!state.live_value);
        assert_eq!(state.phase, TogglePhase::RolledBack);
    }

    #[test]
    fn test_failure_without_query_keeps_previous_value() {
        let dir = tempdir().unwrap();
        let mut r = reconciler(dir.path(), None);
        let mut state = ToggleState::new("selinux_mode", false, false);

        r.on_result(&mut state, true, &failed()).unwrap();
        assert!(!state.live_value);
    }

    #[test]
    fn test_persisted_success_writes_flag() {
        let dir = tempdir().unwrap();
        let mut r = reconciler(dir.path(), Some(false));
        let mut state = ToggleState::new("selinux_mode", false, true);

        r.on_result(&mut state, true, &ExecutionResult::ok("")).unwrap();
        assert_eq!(r.store().get("selinux_mode"), Some(true));
    }

    #[test]
    fn test_unpersisted_success_removes_flag() {
        let dir = tempdir().unwrap();
        let mut r = reconciler(dir.path(), Some(true));
        let mut state = ToggleState::new("selinux_mode", true, true);
        r.on_result(&mut state, false, &ExecutionResult::ok("")).unwrap();
        assert_eq!(r.store().get("selinux_mode"), Some(false));

        state.persist = false;
        r.on_result(&mut state, true, &ExecutionResult::ok("")).unwrap();
        assert!(!r.store().contains("selinux_mode"));
    }

    #[test]
    fn test_persisted_failure_stores_actual_value() {
        let dir = tempdir().unwrap();
        let mut r = reconciler(dir.path(), Some(false));
        let mut state = ToggleState::new("selinux_mode", false, true);

        r.on_result(&mut state, true, &failed()).unwrap();
        assert_eq!(r.store().get("selinux_mode"), Some(false));
    }

    #[test]
    fn test_persistence_toggle_keeps_mode() {
        let dir = tempdir().unwrap();
        let mut r = reconciler(dir.path(), Some(true));
        let mut state = ToggleState::new("selinux_mode", true, false);

        r.set_persistence(&mut state, true).unwrap();
        assert!(state.live_value);
        assert!(state.persist);
        assert_eq!(r.store().get("selinux_mode"), Some(true));

        r.set_persistence(&mut state, false).unwrap();
        assert!(state.live_value);
        assert!(!r.store().contains("selinux_mode"));
    }

    #[test]
    fn test_settle_ignores_pending() {
        let dir = tempdir().unwrap();
        let r = reconciler(dir.path(), Some(true));
        let mut state = ToggleState::new("selinux_mode", true, false);
        r.begin(&mut state);
        r.settle(&mut state);
        assert_eq!(state.phase, TogglePhase::Pending);
    }

    #[test]
    fn test_disabled_toggle_is_not_persisted() {
        let state = ToggleState::new("selinux_mode", true, true).disabled();
        assert!(!state.enabled);
        assert!(!state.persist);
    }
}
