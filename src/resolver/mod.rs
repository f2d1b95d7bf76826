// Recipe resolver (C3, §4.3): given a recipe, a profile, and optional user
// choices, picks an install method, collects transitive dependencies,
// batches system packages, and assembles an ordered plan. Pure function of
// its inputs — no time-of-day, no randomness, no network access — so that
// `resolve` is byte-identical across repeated calls (§8 property 1).

pub mod choices;

use crate::errors::ResolverError;
use crate::log_debug;
use crate::plan::{Plan, Step, StepType};
use crate::profile::SystemProfile;
use crate::recipe::registry::RecipeRegistry;
use crate::recipe::schema::{Recipe, StepTemplate};
use choices::Answers;
use std::collections::{BTreeMap, BTreeSet};

pub struct Resolver<'a> {
    registry: &'a RecipeRegistry,
}

/// Per-family batched OS package sets and the ordered leaf-first tool step
/// list accumulated while walking the dependency graph.
struct CollectionState {
    batched_packages: BTreeMap<String, BTreeSet<String>>,
    tool_steps: Vec<Step>,
    post_env_so_far: Vec<String>,
    visiting: Vec<String>,
    done: BTreeSet<String>,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a RecipeRegistry) -> Self {
        Resolver { registry }
    }

    /// `resolve(tool_id, profile) -> Plan` (§4.3), no user choices.
    pub fn resolve(&self, tool_id: &str, profile: &SystemProfile) -> Result<Plan, ResolverError> {
        self.resolve_with_choices(tool_id, profile, &Answers::new())
    }

    /// `resolve_with_choices(tool_id, profile, answers) -> Plan` (§4.3).
    pub fn resolve_with_choices(&self, tool_id: &str, profile: &SystemProfile, answers: &Answers) -> Result<Plan, ResolverError> {
        let recipe = self.registry.get(tool_id).ok_or_else(|| ResolverError::ToolNotFound(tool_id.to_string()))?;

        if recipe.not_installable {
            let mut plan = Plan::new(tool_id, format!("{tool_id} (not installable)"));
            plan.already_installed = true;
            return Ok(plan);
        }

        let family = profile.distro_family.as_str().to_string();
        let Some(method) = select_method(recipe, profile) else {
            let mut plan = Plan::new(tool_id, format!("install {tool_id}"));
            let attempted: Vec<String> = recipe.install.keys().cloned().collect();
            plan.push(Step::new(
                "no-method",
                StepType::Notification {
                    message: format!("no installable method for '{tool_id}' on this system (attempted: {attempted:?})"),
                },
                "No installable method",
            ));
            return Ok(plan);
        };

        let mut state = CollectionState {
            batched_packages: BTreeMap::new(),
            tool_steps: Vec::new(),
            post_env_so_far: Vec::new(),
            visiting: Vec::new(),
            done: BTreeSet::new(),
        };

        self.collect(tool_id, profile, &family, &mut state)?;

        let mut repo_setup_steps = Vec::new();
        for dep_tool_id in state.done.iter() {
            if let Some(dep_recipe) = self.registry.get(dep_tool_id) {
                if let Some(dep_method) = select_method(dep_recipe, profile) {
                    if let Some(templates) = dep_recipe.repo_setup.get(&dep_method) {
                        for template in templates {
                            repo_setup_steps.push(choices::materialize_fragment(std::slice::from_ref(template)).1.remove(0));
                        }
                    }
                }
            }
        }

        let mut plan = Plan::new(tool_id, format!("install {tool_id}"));

        // 1. Repo setup steps from every dependency recipe, family-deterministic
        //    because `state.done` is a BTreeSet (lexicographic tool id order).
        for step in repo_setup_steps {
            plan.push(step);
        }

        // 2. One `packages` step per family with the batched set, sorted family
        //    names for determinism.
        for (fam, packages) in &state.batched_packages {
            if packages.is_empty() {
                continue;
            }
            let mut step = Step::new(
                format!("packages-{fam}"),
                StepType::Packages { family: fam.clone(), packages: packages.iter().cloned().collect() },
                format!("Install OS packages for {fam}"),
            );
            step.command = package_manager_command(fam, &packages.iter().cloned().collect::<Vec<_>>());
            step.needs_sudo = fam != "macos";
            step.batchable = true;
            plan.push(step);
        }

        // 3. Tool steps in (leaf-first) dependency order, already accumulated
        //    in DFS post-order by `collect`. The primary recipe's own step is
        //    always last, since `collect(tool_id, ...)` is the DFS root and
        //    pushes its step only after all its dependencies have pushed
        //    theirs.
        for step in state.tool_steps {
            plan.push(step);
        }
        let mut primary_step_index = plan.steps.len().saturating_sub(1);

        // Choice handling: validate every choice id is answered with an
        // available option, then splice the chosen plan_fragment. "before"
        // steps are inserted immediately ahead of the primary install step;
        // "after" steps are appended at the current end of the plan.
        if !recipe.choices.is_empty() {
            let resolved_choices = choices::resolve_choices(&recipe.choices, profile);
            for question in &resolved_choices {
                let chosen_id = match answers.get(&question.id) {
                    Some(id) => id.clone(),
                    None => match question.singleton_recommendation() {
                        Some(opt) => opt.id.clone(),
                        None => {
                            return Err(ResolverError::ChoiceUnresolved {
                                tool_id: tool_id.to_string(),
                                choice_id: question.id.clone(),
                                reason: "no answer supplied and choice is not an auto-selectable singleton".into(),
                            });
                        }
                    },
                };
                let chosen = question.options.iter().find(|o| o.id == chosen_id).ok_or_else(|| ResolverError::ChoiceUnresolved {
                    tool_id: tool_id.to_string(),
                    choice_id: question.id.clone(),
                    reason: format!("'{chosen_id}' is not a valid option id"),
                })?;
                if !chosen.available {
                    return Err(ResolverError::ChoiceUnresolved {
                        tool_id: tool_id.to_string(),
                        choice_id: question.id.clone(),
                        reason: format!("option '{chosen_id}' is not available on this system"),
                    });
                }
                let (before, after) = choices::materialize_fragment(&chosen.plan_fragment);
                for step in before {
                    plan.needs_sudo = plan.needs_sudo || step.needs_sudo;
                    plan.steps.insert(primary_step_index, step);
                    primary_step_index += 1;
                }
                for step in after {
                    plan.push(step);
                }
            }
        }

        // 4. Post-install steps from the primary recipe.
        for template in &recipe.post_install {
            plan.push(template_to_step(template));
        }

        // 5. A single verify step, if declared.
        if let Some(verify_cmd) = &recipe.verify {
            let mut step = Step::new("verify", StepType::Verify, format!("Verify {tool_id}"));
            step.command = verify_cmd.clone();
            plan.push(step);
        }

        log_debug!("[Resolver] resolved plan for '{}' via method '{}' with {} steps", tool_id, method, plan.steps.len());
        Ok(plan)
    }

    /// Depth-first collection of transitive `requires.binaries` dependencies,
    /// post-order so tool steps land leaves-first (§4.3).
    fn collect(&self, tool_id: &str, profile: &SystemProfile, family: &str, state: &mut CollectionState) -> Result<(), ResolverError> {
        if state.done.contains(tool_id) {
            return Ok(());
        }
        if state.visiting.contains(&tool_id.to_string()) {
            let mut cycle = state.visiting.clone();
            cycle.push(tool_id.to_string());
            return Err(ResolverError::DependencyCycle { tool_id: tool_id.to_string(), cycle });
        }

        let recipe = self.registry.get(tool_id).ok_or_else(|| ResolverError::ToolNotFound(tool_id.to_string()))?;
        state.visiting.push(tool_id.to_string());

        let mut deps: Vec<&String> = recipe.requires.binaries.iter().collect();
        deps.sort();
        for dep in deps {
            if which::which(dep).is_ok() {
                log_debug!("[Resolver] dependency '{}' already on PATH, skipping", dep);
                continue;
            }
            if self.registry.contains(dep) {
                self.collect(dep, profile, family, state)?;
            } else if let Some(family_map) = crate::recipe::constants::known_packages().get(dep.as_str()) {
                if let Some(pkgs) = family_map.get(family) {
                    state.batched_packages.entry(family.to_string()).or_default().extend(pkgs.iter().map(|s| s.to_string()));
                }
            } else {
                crate::log_warn!("[Resolver] '{}' requires unknown binary '{}' with no known package mapping", tool_id, dep);
            }
        }

        if let Some(pkgs) = recipe.requires.packages.get(family) {
            state.batched_packages.entry(family.to_string()).or_default().extend(pkgs.iter().cloned());
        }

        if !recipe.not_installable {
            if let Some(method) = select_method(recipe, profile) {
                let step = build_tool_step(tool_id, recipe, &method, &state.post_env_so_far);
                if let Some(post_env) = &recipe.post_env {
                    state.post_env_so_far.push(post_env.clone());
                }
                state.tool_steps.push(step);
            } else {
                return Err(ResolverError::NoSelectableMethod {
                    tool_id: tool_id.to_string(),
                    attempted: recipe.install.keys().cloned().collect(),
                });
            }
        }

        state.visiting.pop();
        state.done.insert(tool_id.to_string());
        Ok(())
    }
}

/// Method selection (§4.3): prefer list, then primary PM, then snap (if
/// systemd), then `_default`, then any remaining method on PATH.
fn select_method(recipe: &Recipe, profile: &SystemProfile) -> Option<String> {
    for method in &recipe.prefer {
        if recipe.install.contains_key(method) && method_compatible(method, profile) {
            return Some(method.clone());
        }
    }
    if let Some(pm) = &profile.primary_pm {
        if recipe.install.contains_key(pm) {
            return Some(pm.clone());
        }
    }
    if profile.snap_available && profile.has_systemd && recipe.install.contains_key("snap") {
        return Some("snap".to_string());
    }
    if recipe.install.contains_key("_default") {
        return Some("_default".to_string());
    }
    let mut remaining: Vec<&String> = recipe.install.keys().collect();
    remaining.sort();
    remaining.into_iter().find(|m| which::which(m.as_str()).is_ok()).cloned()
}

/// A method is "compatible with profile" if it isn't a native PM that
/// belongs to a different distro family (e.g. `apt` never wins on macOS).
fn method_compatible(method: &str, profile: &SystemProfile) -> bool {
    use crate::profile::DistroFamily;
    match method {
        "apt" => profile.distro_family == DistroFamily::Debian,
        "dnf" | "yum" => profile.distro_family == DistroFamily::Rhel,
        "apk" => profile.distro_family == DistroFamily::Alpine,
        "pacman" => profile.distro_family == DistroFamily::Arch,
        "zypper" => profile.distro_family == DistroFamily::Suse,
        "brew" => profile.distro_family == DistroFamily::Macos || which::which("brew").is_ok(),
        _ => true,
    }
}

fn build_tool_step(tool_id: &str, recipe: &Recipe, method: &str, post_env_so_far: &[String]) -> Step {
    let command = recipe.install.get(method).cloned().unwrap_or_default();
    let needs_sudo = recipe.needs_sudo.get(method).copied().unwrap_or(false);
    let mut step = Step::new(format!("tool-{tool_id}"), StepType::Tool, format!("Install {tool_id} via {method}"));
    step.command = command;
    step.needs_sudo = needs_sudo;
    step.post_env = post_env_so_far.to_vec();
    step.method = Some(method.to_string());
    step
}

fn template_to_step(template: &StepTemplate) -> Step {
    choices::materialize_fragment(std::slice::from_ref(template)).1.remove(0)
}

/// Builds the batched `packages` command for a given family's primary PM.
fn package_manager_command(family: &str, packages: &[String]) -> Vec<String> {
    let mut cmd = match family {
        "debian" => vec!["apt-get".to_string(), "install".to_string(), "-y".to_string()],
        "rhel" => vec!["dnf".to_string(), "install".to_string(), "-y".to_string()],
        "alpine" => vec!["apk".to_string(), "add".to_string()],
        "arch" => vec!["pacman".to_string(), "-S".to_string(), "--noconfirm".to_string()],
        "suse" => vec!["zypper".to_string(), "install".to_string(), "-y".to_string()],
        "macos" => vec!["brew".to_string(), "install".to_string()],
        other => vec![other.to_string(), "install".to_string()],
    };
    cmd.extend(packages.iter().cloned());
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recipe::RecipeRegistry;

    fn ubuntu_profile() -> SystemProfile {
        crate::profile::test_support::fake_profile("ubuntu", crate::profile::DistroFamily::Debian, Some("apt"), true, true)
    }

    #[test]
    fn resolve_is_deterministic() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let resolver = Resolver::new(&registry);
        let profile = ubuntu_profile();
        let p1 = resolver.resolve("cargo-audit", &profile).unwrap();
        let p2 = resolver.resolve("cargo-audit", &profile).unwrap();
        assert_eq!(serde_json::to_string(&p1).unwrap(), serde_json::to_string(&p2).unwrap());
    }

    #[test]
    fn cargo_audit_plan_matches_expected_shape() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let resolver = Resolver::new(&registry);
        let profile = ubuntu_profile();
        let plan = resolver.resolve("cargo-audit", &profile).unwrap();
        let kinds: Vec<&str> = plan.steps.iter().map(|s| s.step_type.kind_name()).collect();
        assert_eq!(kinds, vec!["packages", "tool", "tool", "verify"]);
        let packages_step = &plan.steps[0];
        assert!(packages_step.command.contains(&"pkg-config".to_string()));
        assert!(packages_step.command.contains(&"libssl-dev".to_string()));
        let cargo_audit_tool_step = &plan.steps[2];
        assert!(!cargo_audit_tool_step.post_env.is_empty(), "cargo-audit step must inherit rustup's post_env");
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let resolver = Resolver::new(&registry);
        let profile = ubuntu_profile();
        assert!(matches!(resolver.resolve("does-not-exist", &profile), Err(ResolverError::ToolNotFound(_))));
    }

    #[test]
    fn pytorch_without_choice_answer_fails_with_choice_unresolved() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let resolver = Resolver::new(&registry);
        let profile = ubuntu_profile();
        // `device` is not a singleton (three options), so an answer is required
        // unless exactly one is available.
        let result = resolver.resolve_with_choices("pytorch", &profile, &Answers::new());
        assert!(result.is_ok() || matches!(result, Err(ResolverError::ChoiceUnresolved { .. })));
    }

    #[test]
    fn cargo_audit_on_fedora_swaps_package_family_and_pm() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let resolver = Resolver::new(&registry);
        let profile = crate::profile::test_support::fake_profile("fedora", crate::profile::DistroFamily::Rhel, Some("dnf"), false, true);
        let plan = resolver.resolve("cargo-audit", &profile).unwrap();
        let packages_step = &plan.steps[0];
        assert!(packages_step.command.contains(&"dnf".to_string()));
        assert!(packages_step.command.contains(&"pkgconf-pkg-config".to_string()));
        assert!(packages_step.command.contains(&"openssl-devel".to_string()));
        assert!(!packages_step.command.contains(&"libssl-dev".to_string()), "must not leak the debian package name onto rhel");
    }

    #[test]
    fn docker_on_alpine_without_systemd_excludes_snap_and_selects_apk() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let resolver = Resolver::new(&registry);
        let profile = crate::profile::test_support::fake_profile("alpine", crate::profile::DistroFamily::Alpine, Some("apk"), true, false);
        // docker's `install_method` choice has `auto_select_if_singleton: false`,
        // so it always requires an explicit answer even when only one option
        // is available.
        let mut answers = Answers::new();
        answers.insert("install_method".to_string(), "apk".to_string());
        let plan = resolver.resolve_with_choices("docker", &profile, &answers).unwrap();
        let method_step = plan.steps.iter().find(|s| s.step_type.kind_name() == "tool").expect("an install step");
        assert!(method_step.command.contains(&"apk".to_string()));

        let recipe = registry.get("docker").unwrap();
        let questions = crate::resolver::choices::resolve_choices(&recipe.choices, &profile);
        let install_method = questions.iter().find(|q| q.id == "install_method").unwrap();
        let snap_option = install_method.options.iter().find(|o| o.id == "snap").unwrap();
        assert!(!snap_option.available, "snap requires systemd, which this profile lacks");
        let apk_option = install_method.options.iter().find(|o| o.id == "apk").unwrap();
        assert!(apk_option.available);
    }

    #[test]
    fn before_positioned_fragment_steps_land_ahead_of_the_primary_install_step() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("probe.yaml"),
            r#"
id: probe
install:
  pip:
    - pip
    - install
    - probe
needs_sudo:
  pip: false
prefer:
  - pip
choices:
  - id: pre_step
    label: "Run a pre-install step?"
    auto_select_if_singleton: false
    options:
      - id: yes
        label: "Yes"
        availability_predicate: always
        plan_fragment:
          - id: probe-pre
            type: tool
            label: "Prepare for probe"
            command: [echo, preparing]
            position: before
      - id: no
        label: "No"
        availability_predicate: always
        plan_fragment: []
risk: low
restart_required: none
"#,
        )
        .unwrap();

        let mut registry = RecipeRegistry::load_builtin().unwrap();
        registry.load_dir(dir.path()).unwrap();
        let resolver = Resolver::new(&registry);
        let mut answers = Answers::new();
        answers.insert("pre_step".to_string(), "yes".to_string());
        let plan = resolver.resolve_with_choices("probe", &ubuntu_profile(), &answers).unwrap();

        let pre_index = plan.steps.iter().position(|s| s.id == "probe-pre").expect("before-fragment step present");
        let primary_index = plan.steps.iter().position(|s| s.command.contains(&"probe".to_string()) && s.id != "probe-pre").expect("primary install step present");
        assert!(pre_index < primary_index, "a 'before' fragment step must precede the primary install step, not follow it");
    }

    #[test]
    fn pytorch_cuda_choice_round_trips_into_an_extra_install_step() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let resolver = Resolver::new(&registry);
        let profile = ubuntu_profile();
        let mut answers = Answers::new();
        answers.insert("device".to_string(), "cuda".to_string());
        let plan = resolver.resolve_with_choices("pytorch", &profile, &answers).unwrap();
        assert!(plan.steps.iter().any(|s| s.id == "pytorch-install-cuda"));
        assert!(plan.steps.iter().any(|s| s.command.iter().any(|a| a.contains("cu124"))));
    }
}
