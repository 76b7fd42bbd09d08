//! Automatic-selection eligibility tracking.
//!
//! Each profile carries a [`SelectionStatus`]. Failures are counted per
//! [`DisableReason`]; once a reason's counter reaches its threshold the
//! profile is disabled, temporarily or permanently depending on the reason.
//! Temporarily disabled profiles come back after a timeout that doubles with
//! every additional blocked transmitter.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::modules::observation::Observation;
use crate::profile::ProfileKey;

/// Number of distinct disable reasons, including [`DisableReason::Enable`].
pub const REASON_COUNT: usize = 10;

/// Reason codes at or above this index disable permanently.
pub const PERMANENT_START_INDEX: usize = 5;

/// Upper bound on the blocked-transmitter count used for backoff.
pub const MAX_BLOCKED_PER_NETWORK: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisableReason {
    Enable,
    AssociationRejection,
    AuthenticationFailure,
    DhcpFailure,
    NoInternetTemporary,
    AuthenticationNoCredentials,
    NoInternetPermanent,
    ByManager,
    WrongPassword,
    NoSubscription,
}

impl DisableReason {
    pub const ALL: [DisableReason; REASON_COUNT] = [
        DisableReason::Enable,
        DisableReason::AssociationRejection,
        DisableReason::AuthenticationFailure,
        DisableReason::DhcpFailure,
        DisableReason::NoInternetTemporary,
        DisableReason::AuthenticationNoCredentials,
        DisableReason::NoInternetPermanent,
        DisableReason::ByManager,
        DisableReason::WrongPassword,
        DisableReason::NoSubscription,
    ];

    /// Maps a raw reason code; codes outside the table yield `None`.
    pub fn from_code(code: i32) -> Option<Self> {
        usize::try_from(code).ok().and_then(|idx| Self::ALL.get(idx).copied())
    }

    pub fn code(self) -> usize {
        self as usize
    }

    pub fn is_permanent(self) -> bool {
        self.code() >= PERMANENT_START_INDEX
    }

    /// Reasons whose counters are frozen while the last-resort watchdog asks
    /// for updates to be ignored.
    pub fn is_watchdog_gated(self) -> bool {
        matches!(
            self,
            DisableReason::AssociationRejection
                | DisableReason::AuthenticationFailure
                | DisableReason::DhcpFailure
        )
    }

    pub fn name(self) -> &'static str {
        DEFAULT_REASON_TABLE[self.code()].name
    }
}

impl fmt::Display for DisableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Static configuration of one disable reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisableReasonInfo {
    pub name: &'static str,
    pub threshold: u32,
    /// Base re-enable timeout; `None` means the reason never times out.
    pub timeout_ms: Option<i64>,
}

const FIVE_MINUTES_MS: i64 = 5 * 60 * 1000;
const TEN_MINUTES_MS: i64 = 10 * 60 * 1000;

static DEFAULT_REASON_TABLE: Lazy<[DisableReasonInfo; REASON_COUNT]> = Lazy::new(|| {
    let info = |name, threshold, timeout_ms| DisableReasonInfo {
        name,
        threshold,
        timeout_ms,
    };
    [
        info("NETWORK_SELECTION_ENABLE", u32::MAX, None),
        info("NETWORK_SELECTION_DISABLED_ASSOCIATION_REJECTION", 5, Some(FIVE_MINUTES_MS)),
        info("NETWORK_SELECTION_DISABLED_AUTHENTICATION_FAILURE", 5, Some(FIVE_MINUTES_MS)),
        info("NETWORK_SELECTION_DISABLED_DHCP_FAILURE", 5, Some(FIVE_MINUTES_MS)),
        info("NETWORK_SELECTION_DISABLED_NO_INTERNET_TEMPORARY", 1, Some(TEN_MINUTES_MS)),
        info("NETWORK_SELECTION_DISABLED_AUTHENTICATION_NO_CREDENTIALS", 1, None),
        info("NETWORK_SELECTION_DISABLED_NO_INTERNET_PERMANENT", 1, None),
        info("NETWORK_SELECTION_DISABLED_BY_WIFI_MANAGER", 1, None),
        info("NETWORK_SELECTION_DISABLED_BY_WRONG_PASSWORD", 1, None),
        info("NETWORK_SELECTION_DISABLED_AUTHENTICATION_NO_SUBSCRIPTION", 1, None),
    ]
});

/// Threshold/timeout override for one reason, as read from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReasonOverride {
    pub threshold: Option<u32>,
    pub timeout_ms: Option<i64>,
}

/// Per-reason thresholds and timeouts in effect for one manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReasonTable {
    entries: [DisableReasonInfo; REASON_COUNT],
}

impl Default for ReasonTable {
    fn default() -> Self {
        Self {
            entries: *DEFAULT_REASON_TABLE,
        }
    }
}

impl ReasonTable {
    pub fn with_overrides(overrides: &HashMap<DisableReason, ReasonOverride>) -> Self {
        let mut table = Self::default();
        for (reason, value) in overrides {
            let entry = &mut table.entries[reason.code()];
            if let Some(threshold) = value.threshold {
                entry.threshold = threshold.max(1);
            }
            if let Some(timeout) = value.timeout_ms {
                entry.timeout_ms = (timeout >= 0).then_some(timeout);
            }
        }
        table
    }

    pub fn info(&self, reason: DisableReason) -> &DisableReasonInfo {
        &self.entries[reason.code()]
    }

    pub fn threshold(&self, reason: DisableReason) -> u32 {
        self.info(reason).threshold
    }

    pub fn timeout_ms(&self, reason: DisableReason) -> Option<i64> {
        self.info(reason).timeout_ms
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionState {
    Enabled,
    TemporarilyDisabled,
    PermanentlyDisabled,
}

/// Best observation of a profile during the current selection round.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanCandidate {
    pub observation: Observation,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectChoice {
    pub key: ProfileKey,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionStatus {
    state: SelectionState,
    reason: DisableReason,
    counters: [u32; REASON_COUNT],
    disable_time_ms: Option<i64>,
    #[serde(skip)]
    pub candidate: Option<ScanCandidate>,
    #[serde(skip)]
    pub seen_in_last_round: bool,
    pub connect_choice: Option<ConnectChoice>,
    pub has_ever_connected: bool,
}

impl Default for SelectionStatus {
    fn default() -> Self {
        Self {
            state: SelectionState::PermanentlyDisabled,
            reason: DisableReason::ByManager,
            counters: [0; REASON_COUNT],
            disable_time_ms: None,
            candidate: None,
            seen_in_last_round: false,
            connect_choice: None,
            has_ever_connected: false,
        }
    }
}

impl SelectionStatus {
    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn reason(&self) -> DisableReason {
        self.reason
    }

    pub fn disable_time_ms(&self) -> Option<i64> {
        self.disable_time_ms
    }

    pub fn counter(&self, reason: DisableReason) -> u32 {
        self.counters[reason.code()]
    }

    pub fn is_enabled(&self) -> bool {
        self.state == SelectionState::Enabled
    }

    pub fn is_temporarily_disabled(&self) -> bool {
        self.state == SelectionState::TemporarilyDisabled
    }

    pub fn is_permanently_disabled(&self) -> bool {
        self.state == SelectionState::PermanentlyDisabled
    }

    pub fn clear_counters(&mut self) {
        self.counters = [0; REASON_COUNT];
    }

    pub fn clear_counter(&mut self, reason: DisableReason) {
        self.counters[reason.code()] = 0;
    }

    pub fn set_candidate(&mut self, observation: Observation, score: i32) {
        self.candidate = Some(ScanCandidate { observation, score });
        self.seen_in_last_round = true;
    }

    pub fn clear_candidate(&mut self) {
        self.candidate = None;
        self.seen_in_last_round = false;
    }

    fn set(&mut self, state: SelectionState, reason: DisableReason, disable_time_ms: Option<i64>) {
        self.state = state;
        self.reason = reason;
        self.disable_time_ms = disable_time_ms;
    }
}

/// Visible outcome of feeding a reason into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The stored state already matched the requested one.
    Unchanged,
    /// Counter bumped but still below the reason's threshold.
    Debounced { count: u32, threshold: u32 },
    /// Dropped because the watchdog asked for updates to be ignored.
    Ignored,
    Enabled,
    TemporarilyDisabled(DisableReason),
    PermanentlyDisabled(DisableReason),
}

impl Transition {
    /// Whether the stored state changed and must be persisted and announced.
    pub fn is_state_change(self) -> bool {
        matches!(
            self,
            Transition::Enabled | Transition::TemporarilyDisabled(_) | Transition::PermanentlyDisabled(_)
        )
    }

    /// Whether the update was accepted (even if only counted).
    pub fn is_accepted(self) -> bool {
        !matches!(self, Transition::Ignored)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectionStateMachine {
    reasons: ReasonTable,
}

impl SelectionStateMachine {
    pub fn new(reasons: ReasonTable) -> Self {
        Self { reasons }
    }

    pub fn reasons(&self) -> &ReasonTable {
        &self.reasons
    }

    /// Feeds one reason into `status`.
    ///
    /// `ignore_update` is the watchdog signal; it only affects gated reasons.
    pub fn apply(
        &self,
        status: &mut SelectionStatus,
        reason: DisableReason,
        now_ms: i64,
        ignore_update: bool,
    ) -> Transition {
        if reason != DisableReason::Enable {
            if reason.is_watchdog_gated() && ignore_update {
                return Transition::Ignored;
            }
            let counter = &mut status.counters[reason.code()];
            *counter = counter.saturating_add(1);
            let count = *counter;
            let threshold = self.reasons.threshold(reason);
            if count < threshold {
                return Transition::Debounced { count, threshold };
            }
        }
        self.force(status, reason, now_ms)
    }

    /// Applies `reason` directly, bypassing the counters.
    pub fn force(&self, status: &mut SelectionStatus, reason: DisableReason, now_ms: i64) -> Transition {
        if reason == DisableReason::Enable {
            let was_enabled = status.is_enabled();
            status.set(SelectionState::Enabled, DisableReason::Enable, None);
            status.clear_counters();
            return if was_enabled {
                Transition::Unchanged
            } else {
                Transition::Enabled
            };
        }

        if reason.is_permanent() {
            if status.is_permanently_disabled() && status.reason == reason {
                return Transition::Unchanged;
            }
            status.set(SelectionState::PermanentlyDisabled, reason, None);
            Transition::PermanentlyDisabled(reason)
        } else {
            if status.is_temporarily_disabled() && status.reason == reason {
                return Transition::Unchanged;
            }
            status.set(SelectionState::TemporarilyDisabled, reason, Some(now_ms));
            Transition::TemporarilyDisabled(reason)
        }
    }

    /// Backoff before a temporarily disabled profile may come back.
    ///
    /// Zero blocked transmitters means no wait at all.
    pub fn reenable_timeout_ms(&self, reason: DisableReason, blocked: u32) -> Option<i64> {
        let blocked = blocked.min(MAX_BLOCKED_PER_NETWORK);
        if blocked == 0 {
            return Some(0);
        }
        let base = self.reasons.timeout_ms(reason)?;
        Some(base.saturating_mul(1i64 << (blocked - 1)))
    }

    /// Re-enables a temporarily disabled profile whose backoff has elapsed.
    pub fn try_enable(&self, status: &mut SelectionStatus, now_ms: i64, blocked: u32) -> Transition {
        if !status.is_temporarily_disabled() {
            return Transition::Unchanged;
        }
        let Some(timeout) = self.reenable_timeout_ms(status.reason, blocked) else {
            return Transition::Unchanged;
        };
        let elapsed = now_ms - status.disable_time_ms.unwrap_or(now_ms);
        if elapsed >= timeout {
            self.force(status, DisableReason::Enable, now_ms)
        } else {
            Transition::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn enabled() -> SelectionStatus {
        let mut status = SelectionStatus::default();
        SelectionStateMachine::default().force(&mut status, DisableReason::Enable, 0);
        status
    }

    #[test]
    fn new_status_is_disabled_by_manager() {
        let status = SelectionStatus::default();
        assert!(status.is_permanently_disabled());
        assert_eq!(status.reason(), DisableReason::ByManager);
    }

    #[test]
    fn unknown_codes_are_rejected() {
        assert_eq!(DisableReason::from_code(-1), None);
        assert_eq!(DisableReason::from_code(10), None);
        assert_eq!(DisableReason::from_code(3), Some(DisableReason::DhcpFailure));
    }

    #[test]
    fn debounces_until_threshold() {
        let machine = SelectionStateMachine::default();
        let mut status = enabled();
        for count in 1..5 {
            assert_eq!(
                machine.apply(&mut status, DisableReason::DhcpFailure, 100, false),
                Transition::Debounced { count, threshold: 5 }
            );
            assert!(status.is_enabled());
        }
        assert_eq!(
            machine.apply(&mut status, DisableReason::DhcpFailure, 100, false),
            Transition::TemporarilyDisabled(DisableReason::DhcpFailure)
        );
        assert_eq!(status.disable_time_ms(), Some(100));
        assert_eq!(
            machine.apply(&mut status, DisableReason::DhcpFailure, 200, false),
            Transition::Unchanged
        );
        assert_eq!(status.disable_time_ms(), Some(100));
        assert_eq!(status.counter(DisableReason::DhcpFailure), 6);
    }

    #[test]
    fn watchdog_freezes_gated_reasons_only() {
        let machine = SelectionStateMachine::default();
        let mut status = enabled();
        assert_eq!(
            machine.apply(&mut status, DisableReason::AssociationRejection, 0, true),
            Transition::Ignored
        );
        assert_eq!(status.counter(DisableReason::AssociationRejection), 0);
        assert_eq!(
            machine.apply(&mut status, DisableReason::NoInternetTemporary, 0, true),
            Transition::TemporarilyDisabled(DisableReason::NoInternetTemporary)
        );
    }

    #[test]
    fn permanent_reasons_clear_disable_time() {
        let machine = SelectionStateMachine::default();
        let mut status = enabled();
        assert_eq!(
            machine.apply(&mut status, DisableReason::WrongPassword, 50, false),
            Transition::PermanentlyDisabled(DisableReason::WrongPassword)
        );
        assert_eq!(status.disable_time_ms(), None);
        assert_eq!(machine.try_enable(&mut status, 1_000_000, 0), Transition::Unchanged);
    }

    #[test]
    fn enable_clears_counters() {
        let machine = SelectionStateMachine::default();
        let mut status = enabled();
        machine.apply(&mut status, DisableReason::AuthenticationFailure, 0, false);
        assert_eq!(
            machine.apply(&mut status, DisableReason::Enable, 0, false),
            Transition::Unchanged
        );
        assert_eq!(status.counter(DisableReason::AuthenticationFailure), 0);
    }

    #[test]
    fn backoff_doubles_per_blocked_transmitter() {
        let machine = SelectionStateMachine::default();
        let reason = DisableReason::AssociationRejection;
        assert_eq!(machine.reenable_timeout_ms(reason, 0), Some(0));
        assert_eq!(machine.reenable_timeout_ms(reason, 1), Some(FIVE_MINUTES_MS));
        assert_eq!(machine.reenable_timeout_ms(reason, 3), Some(4 * FIVE_MINUTES_MS));
        assert_eq!(
            machine.reenable_timeout_ms(reason, 40),
            Some(512 * FIVE_MINUTES_MS)
        );
    }

    #[test]
    fn try_enable_waits_for_timeout() {
        let mut overrides = HashMap::new();
        overrides.insert(
            DisableReason::DhcpFailure,
            ReasonOverride {
                threshold: Some(1),
                timeout_ms: None,
            },
        );
        let machine = SelectionStateMachine::new(ReasonTable::with_overrides(&overrides));
        let mut status = enabled();
        machine.apply(&mut status, DisableReason::DhcpFailure, 1_000, false);
        assert!(status.is_temporarily_disabled());
        assert_eq!(
            machine.try_enable(&mut status, 1_000 + 2 * FIVE_MINUTES_MS - 1, 2),
            Transition::Unchanged
        );
        assert_eq!(
            machine.try_enable(&mut status, 1_000 + 2 * FIVE_MINUTES_MS, 2),
            Transition::Enabled
        );
    }

    #[test]
    fn no_blocked_transmitters_reenables_immediately() {
        let machine = SelectionStateMachine::default();
        let mut status = enabled();
        machine.force(&mut status, DisableReason::NoInternetTemporary, 500);
        assert_eq!(machine.try_enable(&mut status, 500, 0), Transition::Enabled);
    }

    proptest! {
        #[test]
        fn never_reenabled_before_backoff(
            blocked in 1u32..20,
            elapsed in 0i64..(600 * FIVE_MINUTES_MS),
        ) {
            let machine = SelectionStateMachine::default();
            let mut status = enabled();
            machine.force(&mut status, DisableReason::AuthenticationFailure, 0);
            let floor = FIVE_MINUTES_MS << (blocked.min(MAX_BLOCKED_PER_NETWORK) - 1);
            let outcome = machine.try_enable(&mut status, elapsed, blocked);
            prop_assert_eq!(outcome == Transition::Enabled, elapsed >= floor);
        }

        #[test]
        fn below_threshold_never_changes_state(threshold in 2u32..12) {
            let mut overrides = HashMap::new();
            overrides.insert(
                DisableReason::AuthenticationFailure,
                ReasonOverride { threshold: Some(threshold), timeout_ms: None },
            );
            let machine = SelectionStateMachine::new(ReasonTable::with_overrides(&overrides));
            let mut status = enabled();
            let mut changes = 0;
            for _ in 0..(threshold * 2) {
                let before = status.state();
                let outcome = machine.apply(&mut status, DisableReason::AuthenticationFailure, 0, false);
                if outcome.is_state_change() {
                    changes += 1;
                } else {
                    prop_assert_eq!(before, status.state());
                }
            }
            prop_assert_eq!(changes, 1);
        }
    }
}
