//! Update ordering for role-bearing instances.
//!
//! The plan is a small DAG over the live instances, rebuilt every pass:
//!
//! - `Serial`: one chain in base role order, the leader last
//! - `Parallel`: every instance hangs off the root
//! - `BestEffortParallel`: five stages, each fully connected to the next:
//!   non-quorum roles, half of the quorum followers, the other half, the
//!   leftover follower, the leader
//!
//! [`UpdatePlan::execute`] walks it breadth-first. A vertex is only
//! visited once every parent has been passed through.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::model::{Instance, MemberUpdateStrategy};
use crate::roles::RolePriorities;

/// What the walk does at one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexState {
    /// Needs an update now. Nothing below it is visited.
    Eligible,
    /// Mid-transition. Nothing below it is visited.
    Blocked,
    /// Up to date and healthy; the walk continues past it.
    Deferred,
}

/// Inputs that do not vary per vertex.
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions {
    /// Require a probed role before anything can be updated.
    pub role_check: bool,
    pub min_ready_seconds: i32,
    pub now: DateTime<Utc>,
}

/// State of one vertex. `needs_update` is whether the instance differs
/// from its desired template.
pub fn vertex_state(instance: &Instance, needs_update: bool, opts: &WalkOptions) -> VertexState {
    if instance.is_terminating() {
        return VertexState::Blocked;
    }
    if opts.role_check && !instance.has_role() {
        return VertexState::Blocked;
    }
    if needs_update {
        return VertexState::Eligible;
    }
    if !instance.is_ready() || !instance.is_available(opts.min_ready_seconds, opts.now) {
        return VertexState::Blocked;
    }
    VertexState::Deferred
}

#[derive(Debug, Clone)]
pub struct UpdatePlan<'a> {
    strategy: MemberUpdateStrategy,
    vertices: Vec<&'a Instance>,
    children: Vec<Vec<usize>>,
    parents: Vec<usize>,
    role_check: bool,
}

impl<'a> UpdatePlan<'a> {
    pub fn build(
        instances: &[&'a Instance],
        roles: &RolePriorities,
        strategy: MemberUpdateStrategy,
    ) -> Self {
        let mut sorted: Vec<&'a Instance> = instances.to_vec();
        roles.sort_instances(&mut sorted, false);

        let stages: Vec<Vec<usize>> = match strategy {
            MemberUpdateStrategy::Serial => (0..sorted.len()).map(|i| vec![i]).collect(),
            MemberUpdateStrategy::Parallel => vec![(0..sorted.len()).collect()],
            MemberUpdateStrategy::BestEffortParallel => best_effort_stages(&sorted, roles),
        };

        let mut children = vec![Vec::new(); sorted.len()];
        let mut parents = vec![0; sorted.len()];
        let non_empty: Vec<&Vec<usize>> = stages.iter().filter(|s| !s.is_empty()).collect();
        for pair in non_empty.windows(2) {
            for &from in pair[0] {
                for &to in pair[1] {
                    children[from].push(to);
                    parents[to] += 1;
                }
            }
        }

        let any_probed = sorted.iter().any(|i| i.has_role());
        let role_check =
            !roles.is_empty() && !(strategy == MemberUpdateStrategy::Serial && !any_probed);

        Self {
            strategy,
            vertices: sorted,
            children,
            parents,
            role_check,
        }
    }

    pub fn strategy(&self) -> MemberUpdateStrategy {
        self.strategy
    }

    pub fn role_check(&self) -> bool {
        self.role_check
    }

    /// Instances that may be updated this pass, in walk order.
    pub fn execute<F>(&self, needs_update: F, min_ready_seconds: i32, now: DateTime<Utc>) -> Vec<&'a Instance>
    where
        F: Fn(&Instance) -> bool,
    {
        let opts = WalkOptions {
            role_check: self.role_check,
            min_ready_seconds,
            now,
        };

        let mut remaining = self.parents.clone();
        let mut queue: VecDeque<usize> = (0..self.vertices.len())
            .filter(|&i| remaining[i] == 0)
            .collect();
        let mut eligible = Vec::new();

        while let Some(idx) = queue.pop_front() {
            let instance = self.vertices[idx];
            match vertex_state(instance, needs_update(instance), &opts) {
                VertexState::Eligible => eligible.push(instance),
                VertexState::Blocked => {
                    debug!(instance = %instance.name(), "Update walk blocked");
                }
                VertexState::Deferred => {
                    for &child in &self.children[idx] {
                        remaining[child] -= 1;
                        if remaining[child] == 0 {
                            queue.push_back(child);
                        }
                    }
                }
            }
        }

        eligible
    }
}

fn best_effort_stages(sorted: &[&Instance], roles: &RolePriorities) -> Vec<Vec<usize>> {
    let leader = roles.highest();
    let mut others = Vec::new();
    let mut quorum = Vec::new();
    let mut leaders = Vec::new();

    for (idx, instance) in sorted.iter().enumerate() {
        let info = instance.role().and_then(|r| roles.info(&r));
        match info {
            Some(info) if Some(info.priority) == leader => leaders.push(idx),
            Some(info) if info.participates_in_quorum => quorum.push(idx),
            _ => others.push(idx),
        }
    }

    let half = quorum.len() / 2;
    let rest = quorum.split_off(2 * half);
    let second = quorum.split_off(half);
    vec![others, quorum, second, rest, leaders]
}
