// Subcommand implementations for `install`, `plan`, `resume`, `pending`
// (§6). Exit codes follow §6's convenience-entry-point table: 0 completed,
// 1 step failed, 65 tool not found, 64 invalid arguments.

use crate::analyzer;
use crate::config::EngineConfig;
use crate::engine::{Engine, PlanResult};
use crate::errors::EngineError;
use crate::executor::sudo::{PasswordProvider, Secret};
use crate::resolver::choices::{self, Answers};
use crate::resolver::Resolver;
use colored::Colorize;
use dialoguer::{Confirm, Password, Select};
use prettytable::{row, Table};
use std::sync::Arc;

/// Prompts for the sudo password via `dialoguer`, once per process
/// invocation; the orchestrator is the only caller, and `Secret` scrubs the
/// buffer on drop.
struct InteractivePasswordProvider;

impl PasswordProvider for InteractivePasswordProvider {
    fn provide(&self, reason: &str) -> Option<Secret> {
        let prompt = format!("sudo password needed ({reason})");
        Password::new().with_prompt(prompt).interact().ok().map(Secret::new)
    }
}

pub fn run_install(tool_id: &str) -> i32 {
    let engine = match build_engine() {
        Ok(e) => e,
        Err(code) => return code,
    };

    if !engine.registry().contains(tool_id) {
        eprintln!("{}", format!("tool '{tool_id}' is not in the recipe registry").red());
        return 65;
    }

    let answers = match prompt_choices(&engine, tool_id) {
        Ok(a) => a,
        Err(code) => return code,
    };

    let provider: Arc<dyn PasswordProvider> = Arc::new(InteractivePasswordProvider);
    match engine.install_tool(tool_id, Some(&answers), Some(provider)) {
        Ok(result) => report_result(&result, &engine),
        Err(err) => {
            eprintln!("{}", format!("install failed: {err}").red());
            1
        }
    }
}

pub fn run_plan(tool_id: &str) -> i32 {
    let engine = match build_engine() {
        Ok(e) => e,
        Err(code) => return code,
    };
    if !engine.registry().contains(tool_id) {
        eprintln!("{}", format!("tool '{tool_id}' is not in the recipe registry").red());
        return 65;
    }

    let resolver = Resolver::new(engine.registry());
    let answers = match prompt_choices(&engine, tool_id) {
        Ok(a) => a,
        Err(code) => return code,
    };
    match resolver.resolve_with_choices(tool_id, engine.profile(), &answers) {
        Ok(plan) => {
            let mut table = Table::new();
            table.add_row(row!["#", "kind", "label", "needs_sudo"]);
            for (i, step) in plan.steps.iter().enumerate() {
                table.add_row(row![i, step.step_type.kind_name(), step.label, step.needs_sudo]);
            }
            table.printstd();
            0
        }
        Err(err) => {
            eprintln!("{}", format!("could not resolve a plan: {err}").red());
            1
        }
    }
}

pub fn run_resume(plan_id: &str) -> i32 {
    let engine = match build_engine() {
        Ok(e) => e,
        Err(code) => return code,
    };
    let provider: Arc<dyn PasswordProvider> = Arc::new(InteractivePasswordProvider);
    match engine.resume_plan(plan_id, Some(provider)) {
        Ok(result) => report_result(&result, &engine),
        Err(EngineError::StateStore(e)) => {
            eprintln!("{}", format!("could not resume '{plan_id}': {e}").red());
            1
        }
        Err(err) => {
            eprintln!("{}", format!("resume failed: {err}").red());
            1
        }
    }
}

pub fn run_pending() -> i32 {
    let engine = match build_engine() {
        Ok(e) => e,
        Err(code) => return code,
    };
    match engine.list_pending_plans() {
        Ok(plans) if plans.is_empty() => {
            println!("{}", "no pending plans".green());
            0
        }
        Ok(plans) => {
            let mut table = Table::new();
            table.add_row(row!["plan_id", "tool_id", "lifecycle", "last_completed_index", "updated_at"]);
            for plan in &plans {
                table.add_row(row![plan.plan_id, plan.tool_id, format!("{:?}", plan.lifecycle), plan.last_completed_index, plan.updated_at]);
            }
            table.printstd();
            0
        }
        Err(err) => {
            eprintln!("{}", format!("could not list pending plans: {err}").red());
            1
        }
    }
}

fn build_engine() -> Result<Engine, i32> {
    let config = EngineConfig::load().unwrap_or_else(|e| {
        crate::log_warn!("[CLI] failed to load engine config, using defaults: {e}");
        EngineConfig::default()
    });
    Engine::new(config).map_err(|e| {
        eprintln!("{}", format!("engine failed to initialize: {e}").red());
        1
    })
}

/// Interactively resolves every choice a recipe declares via
/// `dialoguer::Select`, skipping the prompt when a choice has exactly one
/// available option and `auto_select_if_singleton` applies.
fn prompt_choices(engine: &Engine, tool_id: &str) -> Result<Answers, i32> {
    let recipe = engine.registry().get(tool_id).expect("checked by caller");
    let mut answers = Answers::new();
    if recipe.choices.is_empty() {
        return Ok(answers);
    }

    let questions = choices::resolve_choices(&recipe.choices, engine.profile());
    for question in &questions {
        if let Some(singleton) = question.singleton_recommendation() {
            answers.insert(question.id.clone(), singleton.id.clone());
            continue;
        }

        let available: Vec<_> = question.options.iter().filter(|o| o.available).collect();
        if available.is_empty() {
            eprintln!("{}", format!("no available option for choice '{}'", question.label).red());
            return Err(1);
        }

        let labels: Vec<String> = available.iter().map(|o| o.label.clone()).collect();
        let selection = Select::new().with_prompt(&question.label).items(&labels).default(0).interact().unwrap_or(0);
        answers.insert(question.id.clone(), available[selection].id.clone());
    }
    Ok(answers)
}

fn report_result(result: &PlanResult, engine: &Engine) -> i32 {
    if result.ok {
        println!("{}", format!("plan {} completed", result.plan_id).green());
        return 0;
    }

    println!("{}", format!("plan {} failed", result.plan_id).red());
    let recipe = engine.registry().get(&result.tool_id);
    let tool_on_failure: &[crate::recipe::schema::FailureHandlerSpec] = recipe.map(|r| r.on_failure.as_slice()).unwrap_or(&[]);
    for step in &result.steps {
        if step.status != crate::plan::StepStatus::Failed {
            continue;
        }
        println!("  step {} failed (exit={:?})", step.step_id.bold(), step.exit_code);
        for line in step.stderr_tail.iter().rev().take(20).rev() {
            println!("    {}", line.dimmed());
        }

        let ranked = analyzer::analyze(tool_on_failure, step.method.as_deref(), step, engine.profile(), engine.registry());
        if !ranked.is_empty() {
            let mut table = Table::new();
            table.add_row(row!["option", "strategy", "availability", "recommended"]);
            for option in &ranked {
                table.add_row(row![option.label, format!("{:?}", option.strategy), format!("{:?}", option.availability), option.recommended]);
            }
            table.printstd();
        }
    }

    if !result.ok {
        let _ = Confirm::new().with_prompt("acknowledge failure and exit?").default(true).interact();
    }
    1
}
