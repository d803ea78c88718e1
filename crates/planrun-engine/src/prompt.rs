//! Prompt construction seam.
//!
//! The orchestrator never formats prompts inline; it asks a [`PromptBuilder`]
//! so callers can swap in project-specific prompt conventions.

use planrun_plan::Plan;

/// Builds the content handed to an executor for one work item.
pub trait PromptBuilder: Send + Sync {
    /// Prompt for a single task or step. `step_idx` is `None` for a
    /// stepless task.
    fn build_item_prompt(&self, plan: &Plan, task_idx: usize, step_idx: Option<usize>) -> String;

    /// Prompt covering every currently-incomplete task, for batch mode.
    fn build_batch_prompt(&self, plan: &Plan) -> String;
}

/// Plain-text prompt rendering: plan context followed by the work item.
#[derive(Debug, Default)]
pub struct DefaultPromptBuilder;

impl DefaultPromptBuilder {
    fn plan_header(plan: &Plan) -> String {
        let mut out = format!("Plan {}: {}\n", plan.id, plan.title);
        if let Some(goal) = &plan.goal {
            out.push_str(&format!("Goal: {goal}\n"));
        }
        if let Some(details) = &plan.details {
            out.push_str(&format!("Details:\n{details}\n"));
        }
        out
    }
}

impl PromptBuilder for DefaultPromptBuilder {
    fn build_item_prompt(&self, plan: &Plan, task_idx: usize, step_idx: Option<usize>) -> String {
        let mut out = Self::plan_header(plan);
        let task = &plan.tasks[task_idx];
        out.push_str(&format!("\nCurrent task: {}\n", task.title));
        if !task.description.is_empty() {
            out.push_str(&format!("{}\n", task.description));
        }
        match step_idx {
            Some(idx) => {
                out.push_str(&format!("\nExecute this step now:\n{}\n", task.steps[idx].prompt));
            }
            None => {
                out.push_str("\nComplete this task now.\n");
            }
        }
        out
    }

    fn build_batch_prompt(&self, plan: &Plan) -> String {
        let mut out = Self::plan_header(plan);
        out.push_str("\nIncomplete tasks:\n");
        for task in plan.tasks.iter().filter(|t| !t.is_done()) {
            out.push_str(&format!("- {}\n", task.title));
            for step in task.steps.iter().filter(|s| !s.done) {
                out.push_str(&format!("  - {}\n", step.prompt));
            }
        }
        out.push_str(
            "\nWork through these tasks. Mark each task done in the plan file as you finish it.\n",
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use planrun_plan::{Step, Task};

    fn plan_with_steps() -> Plan {
        let mut plan = Plan::new(3, "ship feature");
        plan.goal = Some("make it work".into());
        plan.tasks = vec![Task {
            title: "write code".into(),
            description: "the important part".into(),
            done: false,
            steps: vec![
                Step {
                    prompt: "first step".into(),
                    done: true,
                },
                Step {
                    prompt: "second step".into(),
                    done: false,
                },
            ],
        }];
        plan
    }

    #[test]
    fn item_prompt_names_plan_task_and_step() {
        let plan = plan_with_steps();
        let prompt = DefaultPromptBuilder.build_item_prompt(&plan, 0, Some(1));
        assert!(prompt.contains("Plan 3: ship feature"));
        assert!(prompt.contains("make it work"));
        assert!(prompt.contains("write code"));
        assert!(prompt.contains("second step"));
        assert!(!prompt.contains("first step"));
    }

    #[test]
    fn batch_prompt_lists_only_incomplete_work() {
        let mut plan = plan_with_steps();
        plan.tasks.push(Task {
            title: "already finished".into(),
            done: true,
            ..Task::default()
        });

        let prompt = DefaultPromptBuilder.build_batch_prompt(&plan);
        assert!(prompt.contains("write code"));
        assert!(prompt.contains("second step"));
        assert!(!prompt.contains("first step"));
        assert!(!prompt.contains("already finished"));
    }
}
