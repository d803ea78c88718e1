//! Dependency resolution over an in-memory plan collection.
//!
//! Everything here is a pure function over a [`PlanCollection`] snapshot;
//! nothing touches disk. Graph-shape problems (dangling dependency ids,
//! cycles, orphan parents) never error: they degrade to "not found", which
//! makes these functions safe to call speculatively from listing and
//! reporting code.

use std::collections::{HashSet, VecDeque};

use planrun_plan::{Plan, PlanCollection, PlanFile, PlanStatus, Priority};

/// Status filter for [`find_next_plan`].
#[derive(Debug, Clone, Copy)]
pub struct NextPlanFilter {
    pub include_pending: bool,
    pub include_in_progress: bool,
}

impl Default for NextPlanFilter {
    fn default() -> Self {
        Self {
            include_pending: true,
            include_in_progress: true,
        }
    }
}

/// Result of a breadth-first dependency search.
#[derive(Debug)]
pub struct DependencySearch<'a> {
    pub plan: Option<&'a PlanFile>,
    pub message: String,
}

/// A plan is ready iff it is in progress (work already underway), or it is
/// pending, not priority `maybe`, and every dependency id that resolves to a
/// known plan has status done. Unknown dependency ids are skipped.
#[must_use]
pub fn is_ready(plan: &Plan, all: &PlanCollection) -> bool {
    match plan.status {
        PlanStatus::InProgress => true,
        PlanStatus::Pending => {
            if plan.priority == Some(Priority::Maybe) {
                return false;
            }
            plan.dependencies
                .iter()
                .filter_map(|dep| all.get(*dep))
                .all(|dep| dep.plan.status == PlanStatus::Done)
        }
        PlanStatus::Done | PlanStatus::Cancelled => false,
    }
}

/// Find the next actionable plan across the whole collection.
///
/// Candidates are filtered by status per the flags, kept only when ready and
/// not priority `maybe`, then ordered by status (in-progress before pending,
/// meaningful only when both are included), priority rank descending, and id
/// ascending.
#[must_use]
pub fn find_next_plan<'a>(all: &'a PlanCollection, filter: NextPlanFilter) -> Option<&'a PlanFile> {
    let mut candidates: Vec<&PlanFile> = all
        .plans
        .values()
        .filter(|pf| match pf.plan.status {
            PlanStatus::Pending => filter.include_pending,
            PlanStatus::InProgress => filter.include_in_progress,
            PlanStatus::Done | PlanStatus::Cancelled => false,
        })
        .filter(|pf| pf.plan.priority != Some(Priority::Maybe))
        .filter(|pf| is_ready(&pf.plan, all))
        .collect();

    candidates.sort_by(|a, b| {
        let status_rank = |s: PlanStatus| match s {
            PlanStatus::InProgress => 0u8,
            _ => 1,
        };
        status_rank(a.plan.status)
            .cmp(&status_rank(b.plan.status))
            .then_with(|| {
                Priority::rank(b.plan.priority).cmp(&Priority::rank(a.plan.priority))
            })
            .then_with(|| a.plan.id.cmp(&b.plan.id))
    });

    candidates.first().copied()
}

/// Breadth-first search for the next actionable dependency of a plan.
///
/// The frontier is seeded with the parent's `dependencies` in array order,
/// then its children in discovery order. An in-progress node returns
/// immediately: work is already underway there, so it is actionable even
/// with unmet sub-dependencies. A pending node is returned when it has at
/// least one task and its own dependencies are satisfied (the [`is_ready`]
/// rule, not expanded recursively). Every other node contributes its own
/// dependencies and children to the next frontier. A visited set keyed by
/// plan id guarantees termination on cycles of any length.
#[must_use]
pub fn find_next_ready_dependency(parent_id: u32, all: &PlanCollection) -> DependencySearch<'_> {
    let Some(parent) = all.get(parent_id) else {
        return DependencySearch {
            plan: None,
            message: format!("Plan not found: {parent_id}"),
        };
    };

    let mut visited: HashSet<u32> = HashSet::new();
    visited.insert(parent_id);

    let mut frontier: VecDeque<u32> = VecDeque::new();
    frontier.extend(parent.plan.dependencies.iter().copied());
    frontier.extend(all.children_of(parent_id));

    while let Some(id) = frontier.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        // Ids with no backing file are skipped, not errors.
        let Some(candidate) = all.get(id) else {
            continue;
        };

        match candidate.plan.status {
            PlanStatus::InProgress => {
                return DependencySearch {
                    plan: Some(candidate),
                    message: "Found in-progress plan".to_string(),
                };
            }
            PlanStatus::Pending => {
                if !candidate.plan.tasks.is_empty() && is_ready(&candidate.plan, all) {
                    return DependencySearch {
                        plan: Some(candidate),
                        message: "Found ready plan".to_string(),
                    };
                }
            }
            PlanStatus::Done | PlanStatus::Cancelled => {}
        }

        frontier.extend(candidate.plan.dependencies.iter().copied());
        frontier.extend(all.children_of(id));
    }

    DependencySearch {
        plan: None,
        message: "No ready or pending dependencies found".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planrun_plan::{Step, Task};

    fn plan_file(plan: Plan) -> PlanFile {
        PlanFile {
            path: format!("{}.plan.yaml", plan.id).into(),
            plan,
        }
    }

    fn collection(plans: Vec<Plan>) -> PlanCollection {
        let mut all = PlanCollection::default();
        for plan in plans {
            all.plans.insert(plan.id, plan_file(plan));
        }
        all
    }

    fn with_task(mut plan: Plan) -> Plan {
        plan.tasks.push(Task {
            title: "work".into(),
            steps: vec![Step {
                prompt: "do it".into(),
                done: false,
            }],
            ..Task::default()
        });
        plan
    }

    #[test]
    fn empty_dependency_pending_plan_is_ready() {
        let plan = Plan::new(1, "standalone");
        let all = collection(vec![plan.clone()]);
        assert!(is_ready(&plan, &all));
    }

    #[test]
    fn maybe_priority_is_never_ready() {
        let mut plan = Plan::new(1, "speculative");
        plan.priority = Some(Priority::Maybe);
        let all = collection(vec![plan.clone()]);
        assert!(!is_ready(&plan, &all));
    }

    #[test]
    fn unknown_dependency_ids_are_skipped() {
        let mut plan = Plan::new(1, "dangling");
        plan.dependencies = vec![41, 42];
        let all = collection(vec![plan.clone()]);
        assert!(is_ready(&plan, &all));
    }

    #[test]
    fn pending_plan_with_undone_dependency_is_not_ready() {
        let mut one = Plan::new(1, "dependent");
        one.dependencies = vec![2];
        let two = Plan::new(2, "blocker");
        let all = collection(vec![one.clone(), two]);
        assert!(!is_ready(&one, &all));
    }

    #[test]
    fn in_progress_plan_is_always_ready() {
        let mut plan = Plan::new(1, "active");
        plan.status = PlanStatus::InProgress;
        plan.dependencies = vec![2];
        let mut blocker = Plan::new(2, "blocker");
        blocker.status = PlanStatus::Pending;
        let all = collection(vec![plan.clone(), blocker]);
        assert!(is_ready(&plan, &all));
    }

    #[test]
    fn next_plan_returns_dependent_once_dependency_done() {
        // Scenario: plan 1 depends on [2], plan 2 is done.
        let mut one = Plan::new(1, "dependent");
        one.dependencies = vec![2];
        let mut two = Plan::new(2, "finished");
        two.status = PlanStatus::Done;
        let all = collection(vec![one, two]);

        let next = find_next_plan(
            &all,
            NextPlanFilter {
                include_pending: true,
                include_in_progress: false,
            },
        );
        assert_eq!(next.map(|pf| pf.plan.id), Some(1));
    }

    #[test]
    fn next_plan_prefers_in_progress_when_both_included() {
        let mut active = Plan::new(5, "active");
        active.status = PlanStatus::InProgress;
        let mut urgent = Plan::new(2, "urgent but pending");
        urgent.priority = Some(Priority::Urgent);
        let all = collection(vec![active, urgent]);

        let next = find_next_plan(&all, NextPlanFilter::default());
        assert_eq!(next.map(|pf| pf.plan.id), Some(5));
    }

    #[test]
    fn next_plan_sorts_by_priority_then_id() {
        let mut low = Plan::new(1, "low");
        low.priority = Some(Priority::Low);
        let mut high = Plan::new(9, "high");
        high.priority = Some(Priority::High);
        let mut high_earlier = Plan::new(3, "high earlier");
        high_earlier.priority = Some(Priority::High);
        let all = collection(vec![low, high, high_earlier]);

        let next = find_next_plan(&all, NextPlanFilter::default());
        assert_eq!(next.map(|pf| pf.plan.id), Some(3));
    }

    #[test]
    fn next_plan_excludes_maybe_priority() {
        let mut maybe = Plan::new(1, "maybe");
        maybe.priority = Some(Priority::Maybe);
        let all = collection(vec![maybe]);
        assert!(find_next_plan(&all, NextPlanFilter::default()).is_none());
    }

    #[test]
    fn dependency_search_unknown_parent() {
        let all = collection(vec![]);
        let result = find_next_ready_dependency(77, &all);
        assert!(result.plan.is_none());
        assert_eq!(result.message, "Plan not found: 77");
    }

    #[test]
    fn dependency_search_finds_ready_plan() {
        let mut parent = Plan::new(1, "parent");
        parent.dependencies = vec![2];
        let dep = with_task(Plan::new(2, "ready dep"));
        let all = collection(vec![parent, dep]);

        let result = find_next_ready_dependency(1, &all);
        assert_eq!(result.plan.map(|pf| pf.plan.id), Some(2));
        assert_eq!(result.message, "Found ready plan");
    }

    #[test]
    fn dependency_search_short_circuits_on_in_progress() {
        let mut parent = Plan::new(1, "parent");
        parent.dependencies = vec![2];
        let mut dep = with_task(Plan::new(2, "active dep"));
        dep.status = PlanStatus::InProgress;
        // Even with its own unmet dependency, in-progress wins.
        dep.dependencies = vec![3];
        let blocker = Plan::new(3, "blocker");
        let all = collection(vec![parent, dep, blocker]);

        let result = find_next_ready_dependency(1, &all);
        assert_eq!(result.plan.map(|pf| pf.plan.id), Some(2));
        assert_eq!(result.message, "Found in-progress plan");
    }

    #[test]
    fn dependency_search_includes_children() {
        let parent = Plan::new(1, "parent");
        let mut child = with_task(Plan::new(2, "child"));
        child.parent = Some(1);
        let all = collection(vec![parent, child]);

        let result = find_next_ready_dependency(1, &all);
        assert_eq!(result.plan.map(|pf| pf.plan.id), Some(2));
    }

    #[test]
    fn dependency_search_skips_taskless_pending_plans() {
        let mut parent = Plan::new(1, "parent");
        parent.dependencies = vec![2];
        // Stub plan: pending with zero tasks is not actionable.
        let stub = Plan::new(2, "stub");
        let all = collection(vec![parent, stub]);

        let result = find_next_ready_dependency(1, &all);
        assert!(result.plan.is_none());
        assert_eq!(result.message, "No ready or pending dependencies found");
    }

    fn cycle_collection(len: u32) -> PlanCollection {
        // Plan 1 depends on the head of a cycle 2 -> 3 -> ... -> 2; every
        // cycle member blocks on its successor, so none is ready.
        let mut plans = Vec::new();
        let mut parent = Plan::new(1, "parent");
        parent.dependencies = vec![2];
        plans.push(parent);
        for i in 0..len {
            let id = 2 + i;
            let next = 2 + ((i + 1) % len);
            let mut member = with_task(Plan::new(id, format!("cycle {id}")));
            member.dependencies = vec![next];
            plans.push(member);
        }
        collection(plans)
    }

    #[test]
    fn dependency_search_terminates_on_cycles() {
        for len in [2u32, 3, 5] {
            let all = cycle_collection(len);
            let result = find_next_ready_dependency(1, &all);
            assert!(result.plan.is_none(), "cycle of length {len}");
            assert_eq!(result.message, "No ready or pending dependencies found");
        }
    }

    #[test]
    fn dependency_search_three_node_cycle_scenario() {
        // Scenario: 1 -> [2], 2 -> [3], 3 -> [2].
        let mut one = Plan::new(1, "root");
        one.dependencies = vec![2];
        let mut two = with_task(Plan::new(2, "two"));
        two.dependencies = vec![3];
        let mut three = with_task(Plan::new(3, "three"));
        three.dependencies = vec![2];
        let all = collection(vec![one, two, three]);

        let result = find_next_ready_dependency(1, &all);
        assert!(result.plan.is_none());
        assert_eq!(result.message, "No ready or pending dependencies found");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Arbitrary dependency graphs (including dense cycles and
            /// dangling ids) never panic and always yield one of the three
            /// documented messages.
            #[test]
            fn search_terminates_on_arbitrary_graphs(
                edges in proptest::collection::vec((1u32..20, 1u32..25), 0..60),
                parent_id in 1u32..20,
            ) {
                let mut plans: Vec<Plan> = (1..20).map(|id| with_task(Plan::new(id, "node"))).collect();
                for (from, to) in edges {
                    plans[(from - 1) as usize].dependencies.push(to);
                }
                let all = collection(plans);

                let result = find_next_ready_dependency(parent_id, &all);
                prop_assert!(
                    result.message == "Found ready plan"
                        || result.message == "Found in-progress plan"
                        || result.message == "No ready or pending dependencies found"
                        || result.message.starts_with("Plan not found:")
                );
            }
        }
    }
}
