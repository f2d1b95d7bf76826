// DAG scheduler (C6, §4.6, §5). Builds a dependency graph from explicit
// `depends_on` edges plus two implicit edge classes (package-manager lock
// serialization, service-unit serialization), validates it, then runs ready
// steps on a bounded worker pool.

use crate::errors::ExecutorError;
use crate::executor::{self, ExecutionContext};
use crate::plan::{Plan, Step, StepResult, StepStatus, StepType};
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("plan references unknown dependency '{dep}' from step '{step}'")]
    UnknownDependency { step: String, dep: String },

    #[error("dependency cycle detected among steps: {0:?}")]
    Cycle(Vec<String>),
}

/// A validated, edge-complete dependency graph over a plan's steps.
pub struct Dag {
    order: Vec<String>,
    edges: HashMap<String, BTreeSet<String>>,
}

impl Dag {
    /// Builds the graph: explicit `depends_on`, plus an implicit edge
    /// serializing every step that touches the same package-manager lock
    /// (all `packages` steps run one after another, never concurrently),
    /// plus an implicit edge serializing `service` steps against each other.
    pub fn build(plan: &Plan) -> Result<Self, SchedulerError> {
        let ids: HashSet<&str> = plan.steps.iter().map(|s| s.id.as_str()).collect();
        let mut edges: HashMap<String, BTreeSet<String>> = plan.steps.iter().map(|s| (s.id.clone(), BTreeSet::new())).collect();

        for step in &plan.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(SchedulerError::UnknownDependency { step: step.id.clone(), dep: dep.clone() });
                }
                edges.get_mut(&step.id).unwrap().insert(dep.clone());
            }
        }

        add_serialization_edges(plan, &mut edges, |s| matches!(s.step_type, StepType::Packages { .. }));
        add_serialization_edges(plan, &mut edges, |s| matches!(s.step_type, StepType::Service { .. }));

        let order = topo_order(&edges)?;
        Ok(Dag { order, edges })
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Chains steps matching `pred` into a total order by plan position, so they
/// never run concurrently (e.g. two `apt install` invocations would race on
/// dpkg's lock).
fn add_serialization_edges(plan: &Plan, edges: &mut HashMap<String, BTreeSet<String>>, pred: impl Fn(&Step) -> bool) {
    let mut matching: Vec<&str> = plan.steps.iter().filter(|s| pred(s)).map(|s| s.id.as_str()).collect();
    matching.sort();
    for window in matching.windows(2) {
        edges.get_mut(window[1]).unwrap().insert(window[0].to_string());
    }
}

fn topo_order(edges: &HashMap<String, BTreeSet<String>>) -> Result<Vec<String>, SchedulerError> {
    let mut in_progress: BTreeSet<String> = BTreeSet::new();
    let mut done: BTreeSet<String> = BTreeSet::new();
    let mut order = Vec::new();
    let mut stack_trace = Vec::new();

    fn visit(
        node: &str,
        edges: &HashMap<String, BTreeSet<String>>,
        in_progress: &mut BTreeSet<String>,
        done: &mut BTreeSet<String>,
        order: &mut Vec<String>,
        stack_trace: &mut Vec<String>,
    ) -> Result<(), SchedulerError> {
        if done.contains(node) {
            return Ok(());
        }
        if in_progress.contains(node) {
            stack_trace.push(node.to_string());
            return Err(SchedulerError::Cycle(stack_trace.clone()));
        }
        in_progress.insert(node.to_string());
        stack_trace.push(node.to_string());
        if let Some(deps) = edges.get(node) {
            for dep in deps {
                visit(dep, edges, in_progress, done, order, stack_trace)?;
            }
        }
        stack_trace.pop();
        in_progress.remove(node);
        done.insert(node.to_string());
        order.push(node.to_string());
        Ok(())
    }

    let mut keys: Vec<&String> = edges.keys().collect();
    keys.sort();
    for node in keys {
        visit(node, edges, &mut in_progress, &mut done, &mut order, &mut stack_trace)?;
    }
    Ok(order)
}

/// Runs every step in `plan` to completion, respecting the DAG's edges and a
/// worker budget of `min(4, cpu_count)`. Steps whose dependency failed are
/// marked `blocked` and never dispatched (§5).
pub fn run_plan(plan: &Plan, dag: &Dag, ctx: &ExecutionContext) -> Result<Vec<StepResult>, ExecutorError> {
    let worker_budget = std::cmp::min(4, std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
    log_debug!("[Scheduler] running {} steps with worker budget {}", plan.steps.len(), worker_budget);

    let steps_by_id: HashMap<String, Step> = plan.steps.iter().map(|s| (s.id.clone(), s.clone())).collect();
    let results: Arc<Mutex<HashMap<String, StepResult>>> = Arc::new(Mutex::new(HashMap::new()));
    let mut remaining: VecDeque<String> = dag.order.iter().cloned().collect();
    let ctx = ctx.clone();

    while !remaining.is_empty() {
        if ctx.cancel.is_cancelled() {
            log_warn!("[Scheduler] cancellation requested; no further rounds will be dispatched");
            break;
        }

        let ready: Vec<String> = {
            let done = results.lock().unwrap();
            remaining
                .iter()
                .filter(|id| dag.edges.get(*id).map(|deps| deps.iter().all(|d| done.contains_key(d))).unwrap_or(true))
                .take(worker_budget)
                .cloned()
                .collect()
        };

        if ready.is_empty() {
            // Nothing dispatchable but work remains: either a missed
            // dependency (already ruled out at build time) or every
            // remaining step is blocked by an upstream failure.
            break;
        }

        let mut handles = Vec::new();
        for id in &ready {
            remaining.retain(|r| r != id);
            let step = steps_by_id[id].clone();
            let blocked_by_failed_dep = {
                let done = results.lock().unwrap();
                dag.edges.get(id).map(|deps| deps.iter().any(|d| done.get(d).map(|r| r.status == StepStatus::Failed || r.status == StepStatus::Blocked).unwrap_or(false))).unwrap_or(false)
            };

            if blocked_by_failed_dep {
                let result = StepResult { status: StepStatus::Blocked, ..StepResult::pending(id) };
                results.lock().unwrap().insert(id.clone(), result);
                continue;
            }

            let results = Arc::clone(&results);
            let ctx = ctx.clone();
            handles.push(std::thread::spawn(move || {
                let result = executor::execute_step(&step, &ctx).unwrap_or_else(|e| StepResult {
                    status: StepStatus::Failed,
                    error: Some(e.to_string()),
                    ..StepResult::pending(&step.id)
                });
                if result.status == StepStatus::Failed {
                    log_warn!("[Scheduler] step {} failed", step.id.red());
                } else {
                    log_info!("[Scheduler] step {} done in {}ms", step.id.green(), result.duration_ms);
                }
                results.lock().unwrap().insert(step.id.clone(), result);
            }));
        }
        for h in handles {
            let _ = h.join();
        }
    }

    let done = results.lock().unwrap();
    Ok(dag.order.iter().map(|id| done.get(id).cloned().unwrap_or_else(|| StepResult { status: StepStatus::Cancelled, ..StepResult::pending(id) })).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::Step;

    fn plan_with(steps: Vec<Step>) -> Plan {
        let mut plan = Plan::new("t", "t");
        for s in steps {
            plan.push(s);
        }
        plan
    }

    #[test]
    fn detects_missing_dependency() {
        let mut step = Step::new("a", StepType::Tool, "a");
        step.depends_on = vec!["ghost".to_string()];
        let plan = plan_with(vec![step]);
        assert!(matches!(Dag::build(&plan), Err(SchedulerError::UnknownDependency { .. })));
    }

    #[test]
    fn detects_cycle() {
        let mut a = Step::new("a", StepType::Tool, "a");
        a.depends_on = vec!["b".to_string()];
        let mut b = Step::new("b", StepType::Tool, "b");
        b.depends_on = vec!["a".to_string()];
        let plan = plan_with(vec![a, b]);
        assert!(matches!(Dag::build(&plan), Err(SchedulerError::Cycle(_))));
    }

    #[test]
    fn packages_steps_serialize_even_without_explicit_edges() {
        let p1 = Step::new("pkg-debian", StepType::Packages { family: "debian".to_string(), packages: vec!["git".to_string()] }, "pkg1");
        let p2 = Step::new("pkg-rhel", StepType::Packages { family: "rhel".to_string(), packages: vec!["git".to_string()] }, "pkg2");
        let plan = plan_with(vec![p1, p2]);
        let dag = Dag::build(&plan).unwrap();
        assert!(dag.edges["pkg-rhel"].contains("pkg-debian"));
    }

    #[test]
    fn topo_order_respects_explicit_dependency() {
        let mut b = Step::new("b", StepType::Tool, "b");
        b.depends_on = vec!["a".to_string()];
        let a = Step::new("a", StepType::Tool, "a");
        let plan = plan_with(vec![b, a]);
        let dag = Dag::build(&plan).unwrap();
        let pos_a = dag.order.iter().position(|x| x == "a").unwrap();
        let pos_b = dag.order.iter().position(|x| x == "b").unwrap();
        assert!(pos_a < pos_b);
    }
}
