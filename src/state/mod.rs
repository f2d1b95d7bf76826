// Plan state store (C7, §3.7, §4.7). Plan snapshots are written atomically
// (write to a temp file, fsync, rename) so a crash mid-write never leaves a
// corrupted record behind; resume trusts `last_completed_index` strictly.

use crate::errors::StateStoreError;
use crate::plan::{Plan, StepResult, StepStatus};
use crate::{log_debug, log_info, log_warn};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanLifecycle {
    Running,
    Paused,
    Completed,
    Failed,
}

/// Persisted record of a plan's execution progress (§3.7). Carries only the
/// fields named by the spec plus `duration_ms`, per the Open Question
/// decision to keep plan-state telemetry minimal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStateRecord {
    pub plan_id: String,
    pub tool_id: String,
    pub plan: Plan,
    pub step_results: Vec<StepResult>,
    pub last_completed_index: i64,
    pub lifecycle: PlanLifecycle,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub duration_ms: u64,
}

impl PlanStateRecord {
    pub fn new(plan_id: impl Into<String>, plan: Plan) -> Self {
        let now = chrono::Utc::now();
        PlanStateRecord {
            plan_id: plan_id.into(),
            tool_id: plan.tool_id.clone(),
            plan,
            step_results: Vec::new(),
            last_completed_index: -1,
            lifecycle: PlanLifecycle::Running,
            created_at: now,
            updated_at: now,
            duration_ms: 0,
        }
    }

    pub fn record_step(&mut self, index: usize, result: StepResult) {
        let succeeded = result.status == StepStatus::Done || result.status == StepStatus::Skipped;
        self.duration_ms += result.duration_ms;
        if self.step_results.len() <= index {
            self.step_results.resize_with(index + 1, || StepResult::pending(""));
        }
        self.step_results[index] = result;
        if succeeded && index as i64 == self.last_completed_index + 1 {
            self.last_completed_index = index as i64;
        }
        self.updated_at = chrono::Utc::now();
    }

    /// Steps at or before `last_completed_index` are trusted done; resume
    /// re-runs everything after it, even steps that individually reported
    /// success but weren't contiguous with the trusted prefix (§10.6).
    pub fn resume_from_index(&self) -> usize {
        (self.last_completed_index + 1).max(0) as usize
    }
}

pub struct PlanStateStore {
    root: PathBuf,
}

const STALE_RUNNING_THRESHOLD: Duration = Duration::from_secs(3600);

impl PlanStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        PlanStateStore { root: root.into() }
    }

    fn plan_path(&self, plan_id: &str) -> PathBuf {
        self.root.join(format!("{plan_id}.json"))
    }

    /// Atomically persists `record`: write to `<id>.json.tmp`, fsync, then
    /// rename over the final path (§8 property: resume correctness depends
    /// on never observing a partially-written record).
    pub fn save(&self, record: &PlanStateRecord) -> Result<(), StateStoreError> {
        fs::create_dir_all(&self.root)?;
        let final_path = self.plan_path(&record.plan_id);
        let tmp_path = self.root.join(format!("{}.json.tmp", record.plan_id));

        let serialized = serde_json::to_vec_pretty(record)?;
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&serialized)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        log_debug!("[StateStore] saved plan {} at index {}", record.plan_id.cyan(), record.last_completed_index);
        Ok(())
    }

    pub fn load(&self, plan_id: &str) -> Result<PlanStateRecord, StateStoreError> {
        let path = self.plan_path(plan_id);
        let contents = fs::read_to_string(&path).map_err(|_| StateStoreError::PlanNotFound(plan_id.to_string()))?;
        serde_json::from_str(&contents).map_err(|e| StateStoreError::PlanCorrupted { plan_id: plan_id.to_string(), reason: e.to_string() })
    }

    pub fn delete(&self, plan_id: &str) -> Result<(), StateStoreError> {
        let path = self.plan_path(plan_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    /// Lists plans in `running` or `paused` lifecycle, most recently
    /// updated first.
    pub fn list_pending(&self) -> Result<Vec<PlanStateRecord>, StateStoreError> {
        let mut records = Vec::new();
        if !self.root.exists() {
            return Ok(records);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(contents) = fs::read_to_string(&path) else { continue };
            let Ok(record) = serde_json::from_str::<PlanStateRecord>(&contents) else {
                log_warn!("[StateStore] skipping corrupted record at {:?}", path);
                continue;
            };
            if matches!(record.lifecycle, PlanLifecycle::Running | PlanLifecycle::Paused) {
                records.push(record);
            }
        }
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }

    /// Demotes any `running` record whose `updated_at` is older than the
    /// stale threshold to `paused`, as if the process that owned it had
    /// crashed mid-execution.
    pub fn reap(&self) -> Result<usize, StateStoreError> {
        let mut reaped = 0;
        let now = SystemTime::now();
        let now_chrono = chrono::DateTime::<chrono::Utc>::from(now);
        if !self.root.exists() {
            return Ok(0);
        }
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(contents) = fs::read_to_string(&path) else { continue };
            let Ok(mut record) = serde_json::from_str::<PlanStateRecord>(&contents) else { continue };
            if record.lifecycle != PlanLifecycle::Running {
                continue;
            }
            let age = now_chrono.signed_duration_since(record.updated_at).to_std().unwrap_or_default();
            if age >= STALE_RUNNING_THRESHOLD {
                log_info!("[StateStore] reaping stale running plan {}", record.plan_id.yellow());
                record.lifecycle = PlanLifecycle::Paused;
                self.save(&record)?;
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}

pub fn default_state_root() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".provisionctl").join("state").join("plans")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{Plan, Step, StepType};

    fn sample_plan() -> Plan {
        let mut plan = Plan::new("cargo-audit", "install cargo-audit");
        plan.push(Step::new("s1", StepType::Tool, "step one"));
        plan.push(Step::new("s2", StepType::Tool, "step two"));
        plan
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStateStore::new(dir.path());
        let record = PlanStateRecord::new("plan-1", sample_plan());
        store.save(&record).unwrap();
        let loaded = store.load("plan-1").unwrap();
        assert_eq!(loaded.plan_id, "plan-1");
        assert_eq!(loaded.last_completed_index, -1);
    }

    #[test]
    fn missing_plan_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStateStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(StateStoreError::PlanNotFound(_))));
    }

    #[test]
    fn resume_index_skips_trusted_prefix_only() {
        let mut record = PlanStateRecord::new("plan-2", sample_plan());
        record.record_step(0, StepResult { status: StepStatus::Done, ..StepResult::pending("s1") });
        assert_eq!(record.resume_from_index(), 1);
    }

    #[test]
    fn non_contiguous_success_does_not_advance_resume_index() {
        let mut record = PlanStateRecord::new("plan-3", sample_plan());
        // Step 1 reports success before step 0 has; the trusted prefix
        // can't jump ahead of a hole.
        record.record_step(1, StepResult { status: StepStatus::Done, ..StepResult::pending("s2") });
        assert_eq!(record.last_completed_index, -1);
        assert_eq!(record.resume_from_index(), 0);
    }

    #[test]
    fn list_pending_excludes_completed_plans() {
        let dir = tempfile::tempdir().unwrap();
        let store = PlanStateStore::new(dir.path());
        let mut running = PlanStateRecord::new("running-1", sample_plan());
        running.lifecycle = PlanLifecycle::Running;
        let mut completed = PlanStateRecord::new("done-1", sample_plan());
        completed.lifecycle = PlanLifecycle::Completed;
        store.save(&running).unwrap();
        store.save(&completed).unwrap();
        let pending = store.list_pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].plan_id, "running-1");
    }
}
