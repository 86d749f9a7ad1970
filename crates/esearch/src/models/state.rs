//! Build states, pause reasons and the status exposed to callers

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One independent condition that halts the build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PauseReason {
    NetworkUnreachable,
    /// Only cellular is available and mobile-data indexing is disallowed
    WifiRequired,
    Overheating,
    LowBattery,
    LowStorage,
    /// The platform background execution window ran out
    BackgroundExpired,
    /// A page or detail fetch failed; retried after a delay
    RemoteUnavailable,
    /// Too many consecutive store writes failed
    StoreFailure,
    User,
}

impl PauseReason {
    /// Reasons that only an explicit resume clears
    pub fn requires_explicit_resume(self) -> bool {
        matches!(self, PauseReason::User | PauseReason::StoreFailure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PauseReason::NetworkUnreachable => "network-unreachable",
            PauseReason::WifiRequired => "wifi-required",
            PauseReason::Overheating => "overheating",
            PauseReason::LowBattery => "low-battery",
            PauseReason::LowStorage => "low-storage",
            PauseReason::BackgroundExpired => "background-expired",
            PauseReason::RemoteUnavailable => "remote-unavailable",
            PauseReason::StoreFailure => "store-failure",
            PauseReason::User => "user",
        }
    }
}

/// OR-combined set of active pause reasons
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PauseFlags(BTreeSet<PauseReason>);

impl PauseFlags {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise or clear one flag. Returns true if the set changed.
    pub fn set(&mut self, reason: PauseReason, active: bool) -> bool {
        if active {
            self.0.insert(reason)
        } else {
            self.0.remove(&reason)
        }
    }

    pub fn contains(&self, reason: PauseReason) -> bool {
        self.0.contains(&reason)
    }

    pub fn is_clear(&self) -> bool {
        self.0.is_empty()
    }

    pub fn reasons(&self) -> Vec<PauseReason> {
        self.0.iter().copied().collect()
    }

    /// True if any reason that needs an explicit resume is set
    pub fn needs_explicit_resume(&self) -> bool {
        self.0.iter().any(|r| r.requires_explicit_resume())
    }

    /// Replace every environment-driven flag with those in `environment`,
    /// keeping the explicit-resume ones.
    pub fn replace_environment(&mut self, environment: &PauseFlags) {
        self.0.retain(|r| r.requires_explicit_resume());
        self.0
            .extend(environment.0.iter().copied().filter(|r| !r.requires_explicit_resume()));
    }

    /// Drop every environment-driven flag
    pub fn clear_environment(&mut self) {
        self.0.retain(|r| r.requires_explicit_resume());
    }
}

impl FromIterator<PauseReason> for PauseFlags {
    fn from_iter<I: IntoIterator<Item = PauseReason>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Persisted phase of the build state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildPhase {
    Disabled,
    Downloading,
    Paused,
    Complete,
    /// Stopped at the configured storage limit
    Partial,
}

/// Observable index state, derived from the phase plus context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Undetermined,
    Disabled,
    Downloading,
    Refresh,
    Background,
    Paused,
    BackgroundStopped,
    LowStorage,
    Partial,
    Complete,
}

impl IndexState {
    pub fn derive(phase: BuildPhase, flags: &PauseFlags, in_background: bool, refreshing: bool) -> Self {
        match phase {
            BuildPhase::Disabled => IndexState::Disabled,
            BuildPhase::Downloading if refreshing => IndexState::Refresh,
            BuildPhase::Downloading if in_background => IndexState::Background,
            BuildPhase::Downloading => IndexState::Downloading,
            BuildPhase::Paused if flags.contains(PauseReason::BackgroundExpired) => {
                IndexState::BackgroundStopped
            }
            BuildPhase::Paused if flags.contains(PauseReason::LowStorage) => IndexState::LowStorage,
            BuildPhase::Paused => IndexState::Paused,
            BuildPhase::Complete if refreshing => IndexState::Refresh,
            BuildPhase::Complete => IndexState::Complete,
            BuildPhase::Partial => IndexState::Partial,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IndexState::Undetermined => "undetermined",
            IndexState::Disabled => "disabled",
            IndexState::Downloading => "downloading",
            IndexState::Refresh => "refresh",
            IndexState::Background => "background",
            IndexState::Paused => "paused",
            IndexState::BackgroundStopped => "backgroundStopped",
            IndexState::LowStorage => "lowStorage",
            IndexState::Partial => "partial",
            IndexState::Complete => "complete",
        }
    }
}

/// Coarse status for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusSummary {
    NotBuilt,
    Building,
    Paused(Vec<PauseReason>),
    Complete,
}

/// Snapshot of the build published by the coordinator
#[derive(Debug, Clone, PartialEq)]
pub struct IndexStatus {
    pub state: IndexState,
    pub processed_messages: u64,
    pub total_messages: u64,
    pub pause_reasons: Vec<PauseReason>,
    pub estimated_remaining: Option<Duration>,
    /// Consecutive store write failures since the last successful append
    pub write_failures: u32,
}

impl IndexStatus {
    pub fn undetermined() -> Self {
        Self {
            state: IndexState::Undetermined,
            processed_messages: 0,
            total_messages: 0,
            pause_reasons: Vec::new(),
            estimated_remaining: None,
            write_failures: 0,
        }
    }

    pub fn summary(&self) -> StatusSummary {
        match self.state {
            IndexState::Undetermined | IndexState::Disabled => StatusSummary::NotBuilt,
            IndexState::Downloading | IndexState::Refresh | IndexState::Background => {
                StatusSummary::Building
            }
            IndexState::Paused | IndexState::BackgroundStopped | IndexState::LowStorage => {
                StatusSummary::Paused(self.pause_reasons.clone())
            }
            IndexState::Partial | IndexState::Complete => StatusSummary::Complete,
        }
    }

    /// Fraction of the mailbox indexed, in `0.0..=1.0`
    pub fn progress(&self) -> f64 {
        if self.total_messages == 0 {
            return 0.0;
        }
        (self.processed_messages as f64 / self.total_messages as f64).min(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_are_independent() {
        let mut flags = PauseFlags::new();
        assert!(flags.set(PauseReason::Overheating, true));
        assert!(flags.set(PauseReason::LowBattery, true));
        assert!(!flags.set(PauseReason::LowBattery, true));

        // Battery recovers while still overheating
        assert!(flags.set(PauseReason::LowBattery, false));
        assert!(!flags.is_clear());
        assert_eq!(flags.reasons(), vec![PauseReason::Overheating]);
    }

    #[test]
    fn test_replace_environment_keeps_user_pause() {
        let mut flags: PauseFlags = [PauseReason::User, PauseReason::Overheating].into_iter().collect();
        let environment: PauseFlags = [PauseReason::NetworkUnreachable].into_iter().collect();

        flags.replace_environment(&environment);

        assert!(flags.contains(PauseReason::User));
        assert!(flags.contains(PauseReason::NetworkUnreachable));
        assert!(!flags.contains(PauseReason::Overheating));
        assert!(flags.needs_explicit_resume());
    }

    #[test]
    fn test_derived_states() {
        let clear = PauseFlags::new();
        let low_storage: PauseFlags = [PauseReason::LowStorage].into_iter().collect();
        let expired: PauseFlags = [PauseReason::BackgroundExpired, PauseReason::LowStorage]
            .into_iter()
            .collect();

        assert_eq!(IndexState::derive(BuildPhase::Downloading, &clear, true, false), IndexState::Background);
        assert_eq!(IndexState::derive(BuildPhase::Downloading, &clear, true, true), IndexState::Refresh);
        assert_eq!(IndexState::derive(BuildPhase::Paused, &low_storage, false, false), IndexState::LowStorage);
        assert_eq!(IndexState::derive(BuildPhase::Paused, &expired, true, false), IndexState::BackgroundStopped);
        assert_eq!(IndexState::derive(BuildPhase::Complete, &clear, false, false), IndexState::Complete);
    }

    #[test]
    fn test_summary() {
        let mut status = IndexStatus::undetermined();
        assert_eq!(status.summary(), StatusSummary::NotBuilt);

        status.state = IndexState::LowStorage;
        status.pause_reasons = vec![PauseReason::LowStorage];
        assert_eq!(status.summary(), StatusSummary::Paused(vec![PauseReason::LowStorage]));

        status.state = IndexState::Partial;
        assert_eq!(status.summary(), StatusSummary::Complete);
    }
}
