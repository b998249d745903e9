use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::Result;
use crate::logging::{log_flag, log_infection, log_lockout, ProfileScope};
use crate::store::{InventoryStore, UserDirectory};

pub const DEFAULT_INFECTION_THRESHOLD: u32 = 3;

/// `Clean -> Infected`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InfectionStatus {
    Clean,
    Infected,
}

impl From<bool> for InfectionStatus {
    fn from(infected: bool) -> Self {
        if infected {
            InfectionStatus::Infected
        } else {
            InfectionStatus::Clean
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged(InfectionStatus),
    BecameInfected,
}

/// Status after one more flag lands on a target that already has
/// `prior_flags` flags against it.
pub fn next_status(current: InfectionStatus, prior_flags: u32, threshold: u32) -> Transition {
    match current {
        InfectionStatus::Infected => Transition::Unchanged(InfectionStatus::Infected),
        InfectionStatus::Clean if prior_flags.saturating_add(1) >= threshold => Transition::BecameInfected,
        InfectionStatus::Clean => Transition::Unchanged(InfectionStatus::Clean),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfectionPolicy {
    pub threshold: u32,
    pub cascade_lockout: bool,
}

impl Default for InfectionPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_INFECTION_THRESHOLD,
            cascade_lockout: true,
        }
    }
}

impl InfectionPolicy {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            threshold: cfg.infection_threshold,
            cascade_lockout: cfg.cascade_lockout,
        }
    }

    pub fn evaluate(&self, current: InfectionStatus, prior_flags: u32) -> Transition {
        next_status(current, prior_flags, self.threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOutcome {
    /// Self-flag: nothing recorded.
    Ignored,
    Recorded {
        flag_count: u32,
        transition: Transition,
        inventory_locked: bool,
    },
}

impl FlagOutcome {
    pub fn became_infected(&self) -> bool {
        matches!(
            self,
            FlagOutcome::Recorded {
                transition: Transition::BecameInfected,
                ..
            }
        )
    }
}

pub struct InfectionService<S> {
    store: Arc<S>,
    policy: InfectionPolicy,
}

impl<S: UserDirectory + InventoryStore> InfectionService<S> {
    pub fn new(store: Arc<S>, policy: InfectionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn from_config(store: Arc<S>, cfg: &Config) -> Self {
        Self::new(store, InfectionPolicy::from_config(cfg))
    }

    pub fn policy(&self) -> InfectionPolicy {
        self.policy
    }

    /// Record that `flagger_id` accuses `target_id` of being infected.
    ///
    /// The count read, the status flip and the flag insert happen in one
    /// store-level unit. With `cascade_lockout` off the caller must follow a
    /// flip with [`InfectionService::lock_inventory`].
    pub fn flag(&self, flagger_id: &str, target_id: &str) -> Result<FlagOutcome> {
        let _scope = ProfileScope::new("flag");
        let outcome = self.store.record_flag(flagger_id, target_id, &self.policy)?;
        if let FlagOutcome::Recorded {
            flag_count,
            transition,
            inventory_locked,
        } = outcome
        {
            log_flag(flagger_id, target_id, flag_count, self.policy.threshold);
            if transition == Transition::BecameInfected {
                log_infection(target_id, flag_count, inventory_locked);
            }
        }
        Ok(outcome)
    }

    /// Mark every inventory record of the user inaccessible.
    pub fn lock_inventory(&self, user_id: &str) -> Result<()> {
        self.store.find(user_id)?;
        self.store.lock_user(user_id)?;
        log_lockout(user_id);
        Ok(())
    }

    pub fn status(&self, user_id: &str) -> Result<InfectionStatus> {
        Ok(self.store.find(user_id)?.status())
    }

    pub fn is_infected(&self, user_id: &str) -> Result<bool> {
        Ok(self.status(user_id)? == InfectionStatus::Infected)
    }

    pub fn flag_count(&self, user_id: &str) -> Result<usize> {
        Ok(self.store.flags_against(user_id)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flips_exactly_at_threshold() {
        assert_eq!(
            next_status(InfectionStatus::Clean, 0, 3),
            Transition::Unchanged(InfectionStatus::Clean)
        );
        assert_eq!(
            next_status(InfectionStatus::Clean, 1, 3),
            Transition::Unchanged(InfectionStatus::Clean)
        );
        assert_eq!(next_status(InfectionStatus::Clean, 2, 3), Transition::BecameInfected);
    }

    #[test]
    fn test_infected_is_terminal() {
        for prior in [0, 2, 3, 10] {
            assert_eq!(
                next_status(InfectionStatus::Infected, prior, 3),
                Transition::Unchanged(InfectionStatus::Infected)
            );
        }
    }

    #[test]
    fn test_clean_past_threshold_still_flips() {
        // A target whose flip was missed keeps flipping on the next flag.
        assert_eq!(next_status(InfectionStatus::Clean, 7, 3), Transition::BecameInfected);
    }

    #[test]
    fn test_policy_from_config() {
        let cfg = Config {
            infection_threshold: 5,
            cascade_lockout: false,
            ..Config::default()
        };
        let policy = InfectionPolicy::from_config(&cfg);
        assert_eq!(policy.threshold, 5);
        assert!(!policy.cascade_lockout);
        assert_eq!(policy.evaluate(InfectionStatus::Clean, 3), Transition::Unchanged(InfectionStatus::Clean));
        assert_eq!(policy.evaluate(InfectionStatus::Clean, 4), Transition::BecameInfected);
    }

    #[test]
    fn test_outcome_became_infected() {
        let flipped = FlagOutcome::Recorded {
            flag_count: 3,
            transition: Transition::BecameInfected,
            inventory_locked: true,
        };
        assert!(flipped.became_infected());
        assert!(!FlagOutcome::Ignored.became_infected());
    }
}
