// Failure analyzer (C8, §4.8). Matches a failed step's output against
// handler patterns layered tool on_failure -> method family -> INFRA, then
// ranks the union of matched remediation options by availability.

pub mod handlers;

use crate::plan::StepResult;
use crate::profile::SystemProfile;
use crate::recipe::registry::RecipeRegistry;
use crate::recipe::schema::{FailureHandlerSpec, RemediationOptionSpec, RemediationStrategy};
use crate::resolver::choices::Availability;
use regex::RegexBuilder;

#[derive(Debug, Clone)]
pub struct RankedOption {
    pub handler_failure_id: String,
    pub option_id: String,
    pub label: String,
    pub strategy: RemediationStrategy,
    pub availability: Availability,
    pub recommended: bool,
}

/// `analyze(step_method, step_result, profile) -> ranked remediation options`
/// (§4.8). `tool_on_failure` is the failing recipe's inline handlers (empty
/// if none); `method` is the install method the failed step used, if any
/// (method-family handlers are method-keyed, not every step has one).
pub fn analyze(tool_on_failure: &[FailureHandlerSpec], method: Option<&str>, step_result: &StepResult, profile: &SystemProfile, registry: &RecipeRegistry) -> Vec<RankedOption> {
    let haystack = format!("{}\n{}", step_result.stderr_tail.join("\n"), step_result.stdout_tail.join("\n"));

    let mut matched: Vec<&FailureHandlerSpec> = Vec::new();
    collect_matches(tool_on_failure, &haystack, &mut matched);

    if let Some(method) = method {
        if let Some(family_handlers) = handlers::method_family_handlers().get(method) {
            collect_matches(family_handlers, &haystack, &mut matched);
        }
    }

    collect_matches(handlers::infra_handlers(), &haystack, &mut matched);

    let mut ranked: Vec<RankedOption> = Vec::new();
    for handler in &matched {
        for option in &handler.options {
            let availability = option_availability(option, profile, registry);
            ranked.push(RankedOption {
                handler_failure_id: handler.failure_id.clone(),
                option_id: option.id.clone(),
                label: option.label.clone(),
                strategy: option.strategy,
                availability,
                recommended: option.recommended,
            });
        }
    }

    // Stable sort preserves each group's declared order (§4.8 step 4).
    ranked.sort_by_key(|r| rank_order(r.availability));
    ranked
}

fn rank_order(a: Availability) -> u8 {
    match a {
        Availability::Ready => 0,
        Availability::Locked => 1,
        Availability::Impossible => 2,
    }
}

fn collect_matches<'a>(candidates: &'a [FailureHandlerSpec], haystack: &str, out: &mut Vec<&'a FailureHandlerSpec>) {
    for handler in candidates {
        let Ok(re) = RegexBuilder::new(&handler.pattern).case_insensitive(true).multi_line(true).build() else {
            continue;
        };
        if re.is_match(haystack) {
            out.push(handler);
        }
    }
}

fn option_availability(option: &RemediationOptionSpec, profile: &SystemProfile, registry: &RecipeRegistry) -> Availability {
    match option.strategy {
        RemediationStrategy::InstallDep => {
            let dep = option.fields.get("dep").and_then(|v| v.as_str());
            match dep {
                Some(dep_id) if registry.contains(dep_id) => Availability::Ready,
                Some(_) => Availability::Impossible,
                None => Availability::Ready,
            }
        }
        RemediationStrategy::SwitchMethod => {
            let method = option.fields.get("method").and_then(|v| v.as_str());
            match method {
                Some(m) if which::which(m).is_ok() => Availability::Ready,
                Some(_) => Availability::Locked,
                None => Availability::Impossible,
            }
        }
        RemediationStrategy::InstallPackages => {
            if profile.writable_rootfs {
                Availability::Ready
            } else {
                Availability::Locked
            }
        }
        RemediationStrategy::RetryWithModifier | RemediationStrategy::EnvFix | RemediationStrategy::Manual | RemediationStrategy::CleanupRetry => Availability::Ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{StepResult, StepStatus};

    fn failed_result(stderr: &str) -> StepResult {
        StepResult { stderr_tail: vec![stderr.to_string()], ..StepResult::pending("s") }
    }

    fn profile() -> SystemProfile {
        crate::profile::test_support::fake_profile("ubuntu", crate::profile::DistroFamily::Debian, Some("apt"), false, true)
    }

    #[test]
    fn pep668_failure_surfaces_switch_to_pipx_first_when_available() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let result = failed_result("error: externally-managed-environment");
        let ranked = analyze(&[], Some("pip"), &result, &profile(), &registry);
        assert!(!ranked.is_empty());
        assert_eq!(ranked[0].handler_failure_id, "pip-pep668");
    }

    #[test]
    fn unmatched_output_produces_no_options() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let result = failed_result("some unrelated message");
        let ranked = analyze(&[], None, &result, &profile(), &registry);
        assert!(ranked.is_empty());
    }

    #[test]
    fn disk_full_is_infra_matched_even_without_method() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let result = failed_result("write failed: no space left on device");
        let ranked = analyze(&[], None, &result, &profile(), &registry);
        assert!(ranked.iter().any(|r| r.handler_failure_id == "disk-full"));
    }

    #[test]
    fn ready_options_rank_before_locked_options() {
        let registry = RecipeRegistry::load_builtin().unwrap();
        let mut result = failed_result("externally-managed-environment");
        result.stdout_tail.push("command not found: rustup".to_string());
        let ranked = analyze(&[], Some("pip"), &result, &profile(), &registry);
        let positions: Vec<u8> = ranked.iter().map(|r| rank_order(r.availability)).collect();
        assert!(positions.windows(2).all(|w| w[0] <= w[1]));
    }
}
