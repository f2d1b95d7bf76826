// Choice resolver (C4, §4.4). Evaluates each choice option's availability
// predicate against the profile and fills in `disabled_reason`/`enable_hint`
// from a small decision table. Every option is always returned; none are
// ever hidden (§3.4 invariant, tested by §8 property 3).

use crate::plan::{Step, StepType};
use crate::profile::SystemProfile;
use crate::recipe::schema::{ChoiceOptionSpec, ChoiceSpec, StepTemplate};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Ready,
    Locked,
    Impossible,
}

#[derive(Debug, Clone)]
pub struct ChoiceOption {
    pub id: String,
    pub label: String,
    pub available: bool,
    pub availability: Availability,
    pub disabled_reason: Option<String>,
    pub enable_hint: Option<String>,
    pub plan_fragment: Vec<StepTemplate>,
    pub recommended: bool,
}

#[derive(Debug, Clone)]
pub struct ChoiceQuestion {
    pub id: String,
    pub label: String,
    pub options: Vec<ChoiceOption>,
    pub auto_select_if_singleton: bool,
}

impl ChoiceQuestion {
    /// If exactly one option is available and the question allows it, the
    /// resolver may mark it recommended and let the orchestrator
    /// short-circuit, while still presenting the full option list.
    pub fn singleton_recommendation(&self) -> Option<&ChoiceOption> {
        if !self.auto_select_if_singleton {
            return None;
        }
        let available: Vec<&ChoiceOption> = self.options.iter().filter(|o| o.available).collect();
        if available.len() == 1 {
            available.into_iter().next()
        } else {
            None
        }
    }
}

/// Evaluates a named availability predicate against the profile. The set of
/// predicate names is the decision table §4.4 refers to; recipes reference
/// them by name so new predicates can be added without touching recipe
/// YAML beyond the name itself.
fn evaluate_predicate(name: &str, profile: &SystemProfile) -> (bool, Option<String>, Option<String>) {
    use crate::profile::DistroFamily;

    match name {
        "always" => (true, None, None),
        "family_debian" => family_gate(profile, DistroFamily::Debian),
        "family_rhel" => family_gate(profile, DistroFamily::Rhel),
        "family_alpine" => family_gate(profile, DistroFamily::Alpine),
        "family_arch" => family_gate(profile, DistroFamily::Arch),
        "family_suse" => family_gate(profile, DistroFamily::Suse),
        "family_macos" => family_gate(profile, DistroFamily::Macos),
        "snap_with_systemd" => {
            if profile.snap_available && profile.has_systemd {
                (true, None, None)
            } else if !profile.has_systemd {
                (false, Some("snap requires systemd, which this system does not have".into()), None)
            } else {
                (false, Some("snapd is not installed".into()), Some("install snapd, then retry".into()))
            }
        }
        "nvidia_gpu_present" => {
            if profile.deep().has_nvidia_gpu() {
                (true, None, None)
            } else {
                (false, Some("no NVIDIA GPU detected".into()), Some("requires an NVIDIA GPU and driver".into()))
            }
        }
        "amd_gpu_present" => {
            if profile.deep().has_amd_gpu() {
                (true, None, None)
            } else {
                (false, Some("no AMD GPU detected".into()), Some("requires an AMD GPU with ROCm support".into()))
            }
        }
        _ => (false, Some(format!("unknown availability predicate '{name}'")), None),
    }
}

fn family_gate(profile: &SystemProfile, wanted: crate::profile::DistroFamily) -> (bool, Option<String>, Option<String>) {
    if profile.distro_family == wanted {
        (true, None, None)
    } else {
        (false, Some(format!("this system's distro family is '{}', not '{}'", profile.distro_family.as_str(), wanted.as_str())), None)
    }
}

fn classify(available: bool, locked: bool) -> Availability {
    if available {
        Availability::Ready
    } else if locked {
        Availability::Locked
    } else {
        Availability::Impossible
    }
}

fn resolve_option(spec: &ChoiceOptionSpec, profile: &SystemProfile) -> ChoiceOption {
    let (available, disabled_reason, enable_hint) = evaluate_predicate(&spec.availability_predicate, profile);
    // A missing prerequisite that the decision table says is installable
    // (enable_hint present) is `locked`; anything else unavailable is
    // `impossible` (§3.5).
    let locked = !available && enable_hint.is_some();
    ChoiceOption {
        id: spec.id.clone(),
        label: spec.label.clone(),
        available,
        availability: classify(available, locked),
        disabled_reason,
        enable_hint,
        plan_fragment: spec.plan_fragment.clone(),
        recommended: spec.recommended && available,
    }
}

/// `resolve_choices(tool_id, profile)` (§4.4).
pub fn resolve_choices(choices: &[ChoiceSpec], profile: &SystemProfile) -> Vec<ChoiceQuestion> {
    choices
        .iter()
        .map(|spec| ChoiceQuestion {
            id: spec.id.clone(),
            label: spec.label.clone(),
            options: spec.options.iter().map(|o| resolve_option(o, profile)).collect(),
            auto_select_if_singleton: spec.auto_select_if_singleton,
        })
        .collect()
}

/// Materializes a chosen option's `plan_fragment` templates into real
/// `Step`s, grouped by declared position ("before"/"after" the primary
/// install step).
pub fn materialize_fragment(templates: &[StepTemplate]) -> (Vec<Step>, Vec<Step>) {
    let mut before = Vec::new();
    let mut after = Vec::new();
    for template in templates {
        let step = template_to_tool_step(template);
        if template.position == "before" {
            before.push(step);
        } else {
            after.push(step);
        }
    }
    (before, after)
}

fn template_to_tool_step(template: &StepTemplate) -> Step {
    let step_type = match template.step_type.as_str() {
        "tool" => StepType::Tool,
        "post_install" => StepType::PostInstall { streaming: false },
        "notification" => StepType::Notification { message: template.label.clone() },
        other => StepType::Notification { message: format!("unsupported fragment step type '{other}'") },
    };
    let mut step = Step::new(template.id.clone(), step_type, template.label.clone());
    step.command = template.command.clone();
    step.env = template.env.clone();
    step.needs_sudo = template.needs_sudo;
    step.depends_on = template.depends_on.clone();
    step.batchable = template.batchable;
    if let Some(t) = template.timeout_ms {
        step.timeout_ms = t;
    }
    step
}

pub type Answers = HashMap<String, String>;
