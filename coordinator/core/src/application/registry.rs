// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::run::RunBinding;
use crate::domain::team::TeamRunId;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("no run binding for team run {0}")]
pub struct RunNotBoundError(pub TeamRunId);

/// Worker-local binding store seam. The command handlers depend on this
/// trait so alternative stores (or recording decorators in tests) can stand
/// in for the default in-memory registry.
pub trait TeamBindingRegistry: Send + Sync {
    /// Bind a run, overwriting any existing binding for the same run id.
    fn bind_run(&self, binding: RunBinding);

    fn try_resolve_run(&self, team_run_id: TeamRunId) -> Option<RunBinding>;

    fn resolve_run(&self, team_run_id: TeamRunId) -> Result<RunBinding, RunNotBoundError> {
        self.try_resolve_run(team_run_id)
            .ok_or(RunNotBoundError(team_run_id))
    }

    fn unbind_run(&self, team_run_id: TeamRunId);
}

/// Worker-local map of run id to bound runtime team.
///
/// Pure bookkeeping: the registry does not enforce cleanup ordering.
/// Closing forwarders before unbinding, and finalizing before rebinding,
/// is the command handlers' responsibility.
#[derive(Debug, Default)]
pub struct RunScopedTeamBindingRegistry {
    bindings: DashMap<TeamRunId, RunBinding>,
}

impl RunScopedTeamBindingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bound_run_count(&self) -> usize {
        self.bindings.len()
    }
}

impl TeamBindingRegistry for RunScopedTeamBindingRegistry {
    fn bind_run(&self, binding: RunBinding) {
        self.bindings.insert(binding.team_run_id, binding);
    }

    fn try_resolve_run(&self, team_run_id: TeamRunId) -> Option<RunBinding> {
        self.bindings.get(&team_run_id).map(|b| b.clone())
    }

    fn unbind_run(&self, team_run_id: TeamRunId) {
        self.bindings.remove(&team_run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::run::RunVersion;
    use crate::domain::team::{RuntimeTeamId, TeamDefinitionId};

    fn binding(run_id: TeamRunId, team: &str, version: u64) -> RunBinding {
        RunBinding {
            team_run_id: run_id,
            run_version: RunVersion(version),
            team_definition_id: TeamDefinitionId::new("def"),
            runtime_team_id: RuntimeTeamId::new(team),
            member_bindings: vec![],
        }
    }

    #[test]
    fn bind_and_resolve() {
        let registry = RunScopedTeamBindingRegistry::new();
        let run_id = TeamRunId::new();
        registry.bind_run(binding(run_id, "team-1", 1));

        let resolved = registry.resolve_run(run_id).unwrap();
        assert_eq!(resolved.runtime_team_id, RuntimeTeamId::new("team-1"));
        assert!(registry.try_resolve_run(TeamRunId::new()).is_none());
    }

    #[test]
    fn rebind_overwrites() {
        let registry = RunScopedTeamBindingRegistry::new();
        let run_id = TeamRunId::new();
        registry.bind_run(binding(run_id, "team-1", 1));
        registry.bind_run(binding(run_id, "team-2", 2));

        let resolved = registry.resolve_run(run_id).unwrap();
        assert_eq!(resolved.runtime_team_id, RuntimeTeamId::new("team-2"));
        assert_eq!(resolved.run_version, RunVersion(2));
        assert_eq!(registry.bound_run_count(), 1);
    }

    #[test]
    fn unbind_then_resolve_is_typed_error() {
        let registry = RunScopedTeamBindingRegistry::new();
        let run_id = TeamRunId::new();
        registry.bind_run(binding(run_id, "team-1", 1));
        registry.unbind_run(run_id);

        assert!(registry.resolve_run(run_id).is_err());
        // Unbinding an absent run is a no-op.
        registry.unbind_run(run_id);
    }
}
