use std::fmt;

use crate::backend::BackendResolvable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanAction {
    Install,
    Update,
    Remove,
}

impl PlanAction {
    /// Install and update both need the package downloaded first.
    pub fn needs_download(self) -> bool {
        matches!(self, Self::Install | Self::Update)
    }
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Install => "install",
            Self::Update => "update",
            Self::Remove => "remove",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    pub action: PlanAction,
    pub resolvable: BackendResolvable,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitPolicy {
    /// Run the transaction without changing anything.
    pub dry_run: bool,
    /// Stop after downloading.
    pub download_only: bool,
}

/// Ordered actions of one transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitPlan {
    pub actions: Vec<PlannedAction>,
    pub policy: CommitPolicy,
}

impl CommitPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(mut self, resolvable: BackendResolvable) -> Self {
        self.actions.push(PlannedAction {
            action: PlanAction::Install,
            resolvable,
        });
        self
    }

    pub fn update(mut self, resolvable: BackendResolvable) -> Self {
        self.actions.push(PlannedAction {
            action: PlanAction::Update,
            resolvable,
        });
        self
    }

    pub fn remove(mut self, resolvable: BackendResolvable) -> Self {
        self.actions.push(PlannedAction {
            action: PlanAction::Remove,
            resolvable,
        });
        self
    }

    pub fn with_policy(mut self, policy: CommitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// What the backend reports after a transaction. Failures are not counted
/// here; they went out as error events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    pub attempted: usize,
    pub no_errors: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Completed(CommitReport),
    /// The user asked to stop; items not yet begun were skipped.
    Aborted(CommitReport),
}

impl CommitOutcome {
    pub fn report(&self) -> &CommitReport {
        match self {
            Self::Completed(report) | Self::Aborted(report) => report,
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Self::Aborted(_))
    }
}
