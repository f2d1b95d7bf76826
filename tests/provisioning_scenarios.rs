//! End-to-end scenarios from spec.md §8 (S1-S6), driving the crate through
//! its public API against the built-in recipe registry and synthetic
//! profiles rather than the real package managers or network.

use provisionctl::config::EngineConfig;
use provisionctl::engine::Engine;
use provisionctl::plan::{Step, StepType};
use provisionctl::profile::{test_support::fake_profile, DistroFamily};
use provisionctl::recipe::registry::RecipeRegistry;
use provisionctl::resolver::choices::{self, Answers};
use provisionctl::resolver::Resolver;
use provisionctl::state::{PlanLifecycle, PlanStateRecord, PlanStateStore};

fn ubuntu() -> provisionctl::profile::SystemProfile {
    fake_profile("ubuntu", DistroFamily::Debian, Some("apt"), true, true)
}

fn fedora() -> provisionctl::profile::SystemProfile {
    fake_profile("fedora", DistroFamily::Rhel, Some("dnf"), false, true)
}

fn alpine_no_systemd() -> provisionctl::profile::SystemProfile {
    fake_profile("alpine", DistroFamily::Alpine, Some("apk"), true, false)
}

/// S1: installing cargo-audit on Ubuntu pulls in rustup as a dependency,
/// batches the debian dev packages ahead of it, and ends with a verify step.
#[test]
fn s1_cargo_audit_on_ubuntu_resolves_rustup_dependency_first() {
    let registry = RecipeRegistry::load_builtin().unwrap();
    let resolver = Resolver::new(&registry);
    let plan = resolver.resolve("cargo-audit", &ubuntu()).unwrap();

    let kinds: Vec<&str> = plan.steps.iter().map(|s| s.step_type.kind_name()).collect();
    assert_eq!(kinds, vec!["packages", "tool", "tool", "verify"]);

    let rustup_index = plan.steps.iter().position(|s| s.command.iter().any(|a| a.contains("rustup.rs"))).expect("rustup bootstrap step present");
    let cargo_audit_index = plan.steps.iter().position(|s| s.command.contains(&"cargo-audit".to_string())).expect("cargo-audit install step present");
    assert!(rustup_index < cargo_audit_index, "dependency must be installed before the dependent tool");

    let cargo_audit_step = &plan.steps[cargo_audit_index];
    assert!(!cargo_audit_step.post_env.is_empty(), "cargo-audit must inherit rustup's PATH export");
}

/// S2: the same recipe on Fedora selects the rhel package family and the
/// dnf-flavored dev packages instead of the debian ones.
#[test]
fn s2_cargo_audit_on_fedora_uses_the_rhel_package_family() {
    let registry = RecipeRegistry::load_builtin().unwrap();
    let resolver = Resolver::new(&registry);
    let plan = resolver.resolve("cargo-audit", &fedora()).unwrap();

    let packages_step = plan.steps.iter().find(|s| s.step_type.kind_name() == "packages").unwrap();
    assert!(packages_step.command.contains(&"dnf".to_string()));
    assert!(packages_step.command.contains(&"openssl-devel".to_string()));
    assert!(!packages_step.command.iter().any(|a| a == "libssl-dev"));
}

/// S3: docker's install-method choice on a no-systemd Alpine host marks
/// snap as locked/unavailable while apk stays ready, and every option is
/// still reported (never hidden).
#[test]
fn s3_docker_choice_on_alpine_without_systemd_locks_out_snap() {
    let registry = RecipeRegistry::load_builtin().unwrap();
    let recipe = registry.get("docker").unwrap();
    let profile = alpine_no_systemd();

    let questions = choices::resolve_choices(&recipe.choices, &profile);
    let install_method = questions.iter().find(|q| q.id == "install_method").unwrap();
    assert_eq!(install_method.options.len(), 4, "every declared option must be returned");

    let snap = install_method.options.iter().find(|o| o.id == "snap").unwrap();
    assert!(!snap.available, "snap requires systemd");
    let apk = install_method.options.iter().find(|o| o.id == "apk").unwrap();
    assert!(apk.available);

    let resolver = Resolver::new(&registry);
    let mut answers = Answers::new();
    answers.insert("install_method".to_string(), "apk".to_string());
    let plan = resolver.resolve_with_choices("docker", &profile, &answers).unwrap();
    let install_step = plan.steps.iter().find(|s| s.needs_sudo && s.command.first().map(String::as_str) == Some("apk")).expect("apk install step");
    assert!(install_step.command.contains(&"docker".to_string()));
}

/// S4: ruff's PEP 668 failure handler surfaces "switch to pipx" as the
/// recommended, ready remediation option when pipx is resolvable.
#[test]
fn s4_ruff_pep668_failure_recommends_switching_to_pipx() {
    let registry = RecipeRegistry::load_builtin().unwrap();
    let recipe = registry.get("ruff").unwrap();
    let profile = ubuntu();

    let mut step_result = provisionctl::plan::StepResult::pending("ruff-install");
    step_result.status = provisionctl::plan::StepStatus::Failed;
    step_result.stderr_tail = vec!["error: externally-managed-environment".to_string()];

    let ranked = provisionctl::analyzer::analyze(&recipe.on_failure, Some("pip"), &step_result, &profile, &registry);
    assert!(!ranked.is_empty(), "the PEP 668 handler must match");
    assert_eq!(ranked[0].option_id, "switch-to-pipx");
    assert!(ranked[0].recommended);
}

/// S5: a plan interrupted after its first step resumes from exactly that
/// point rather than re-running everything, and produces a completed
/// record afterward.
#[test]
fn s5_resume_continues_after_the_last_completed_step() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EngineConfig::default();
    config.state_root = Some(dir.path().to_path_buf());
    let engine = Engine::new(config).unwrap();

    let mut plan = provisionctl::plan::Plan::new("two-step", "two-step");
    plan.push(Step::new("first", StepType::Notification { message: "one".to_string() }, "first"));
    plan.push(Step::new("second", StepType::Notification { message: "two".to_string() }, "second"));

    let store = PlanStateStore::new(dir.path().to_path_buf());
    let mut record = PlanStateRecord::new("interrupted-plan".to_string(), plan);
    let mut first_result = provisionctl::plan::StepResult::pending("first");
    first_result.status = provisionctl::plan::StepStatus::Done;
    record.record_step(0, first_result);
    record.lifecycle = PlanLifecycle::Paused;
    store.save(&record).unwrap();

    let result = engine.resume_plan("interrupted-plan", None).unwrap();
    assert!(result.ok);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[1].step_id, "second");
    assert_eq!(result.steps[1].status, provisionctl::plan::StepStatus::Done);
}

/// S6: answering pytorch's device choice materializes the chosen backend's
/// wheel install step in the resolved plan; leaving it unanswered fails
/// with a clear choice-unresolved error rather than silently defaulting
/// (the choice isn't a singleton-auto-select: cpu is always available, but
/// cuda/rocm are also listed whenever their hardware predicate holds).
#[test]
fn s6_pytorch_choice_round_trips_into_the_resolved_plan() {
    let registry = RecipeRegistry::load_builtin().unwrap();
    let resolver = Resolver::new(&registry);
    let profile = ubuntu();

    let mut answers = Answers::new();
    answers.insert("device".to_string(), "cpu".to_string());
    let plan = resolver.resolve_with_choices("pytorch", &profile, &answers).unwrap();
    assert!(plan.steps.iter().any(|s| s.id == "pytorch-install-cpu"));
    assert!(plan.steps.iter().any(|s| s.command.iter().any(|a| a.contains("whl/cpu"))));

    let unanswered = resolver.resolve_with_choices("pytorch", &profile, &Answers::new());
    assert!(matches!(unanswered, Err(provisionctl::errors::ResolverError::ChoiceUnresolved { .. })));

    // Choosing a backend whose availability predicate doesn't hold on this
    // profile (no AMD GPU detected in this test environment) is rejected
    // rather than silently accepted.
    let mut bad_answers = Answers::new();
    bad_answers.insert("device".to_string(), "rocm".to_string());
    if !profile.deep().has_amd_gpu() {
        let rejected = resolver.resolve_with_choices("pytorch", &profile, &bad_answers);
        assert!(matches!(rejected, Err(provisionctl::errors::ResolverError::ChoiceUnresolved { .. })));
    }
}
