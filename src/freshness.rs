use std::collections::{BTreeMap, HashMap};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Tuning knobs for the freshness model. All penalties are points off a
/// 0-100 score.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FreshnessConfig {
    /// Exponential decay rate per hour.
    pub lambda: f64,
    pub file_change_penalty: f64,
    pub command_rerun_penalty: f64,
    pub git_change_penalty: f64,
    pub package_change_penalty: f64,
    pub base_confidence: f64,
    /// Confidence lost per hour of age.
    pub uncertainty_factor: f64,
    pub cache_enabled: bool,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        Self {
            lambda: 0.08,
            file_change_penalty: 5.0,
            command_rerun_penalty: 15.0,
            git_change_penalty: 8.0,
            package_change_penalty: 12.0,
            base_confidence: 0.95,
            uncertainty_factor: 0.1,
            cache_enabled: true,
        }
    }
}

/// What is known about a capture at scoring time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureMetadata {
    pub path: PathBuf,
    pub command: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub hash: String,
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub related_files: Vec<PathBuf>,
}

fn default_working_dir() -> PathBuf {
    env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecentCommand {
    pub command: String,
    pub timestamp: DateTime<Utc>,
}

/// Observed system state supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentState {
    #[serde(default)]
    pub recent_commands: Vec<RecentCommand>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FreshnessResult {
    /// Main freshness score, clamped to 0..=100.
    pub score: f64,
    /// Confidence in the score, clamped to 0.1..=1.0.
    pub confidence: f64,
    /// Signed contribution of each factor.
    pub factors: BTreeMap<String, f64>,
    /// Human-readable staleness explanations.
    pub reasons: Vec<String>,
    pub compute_time: Duration,
    pub cached: bool,
}

/// Scores how trustworthy a past capture still is.
///
/// The base is pure time decay, `100 * exp(-lambda * hours)`; evidence of
/// change since the capture (modified files, reruns of the same command, git
/// or manifest churn) subtracts from it. Every filesystem and subprocess
/// probe is gated on age so that scoring a fresh capture stays cheap.
pub struct FreshnessScorer {
    config: FreshnessConfig,
    cache: HashMap<String, FreshnessResult>,
}

impl FreshnessScorer {
    pub fn new(config: FreshnessConfig) -> Self {
        Self {
            config,
            cache: HashMap::new(),
        }
    }

    pub fn score(&mut self, metadata: &CaptureMetadata, state: &CurrentState) -> FreshnessResult {
        let started = Instant::now();
        let cache_key = self.cache_key(metadata, state);

        if self.config.cache_enabled {
            if let Some(hit) = self.cache.get(&cache_key) {
                let mut result = hit.clone();
                result.cached = true;
                result.compute_time = started.elapsed();
                return result;
            }
        }

        let mut result = FreshnessResult {
            score: 0.0,
            confidence: 0.0,
            factors: BTreeMap::new(),
            reasons: Vec::new(),
            compute_time: Duration::ZERO,
            cached: false,
        };

        let hours = hours_since(metadata.timestamp);
        self.apply_time_decay(hours, &mut result);
        self.apply_file_changes(metadata, hours, &mut result);
        self.apply_command_reruns(metadata, state, &mut result);
        self.apply_git_changes(metadata, hours, &mut result);
        self.apply_package_changes(metadata, hours, &mut result);

        result.score = result.score.clamp(0.0, 100.0);
        result.confidence = self.confidence(metadata, hours);
        result.compute_time = started.elapsed();
        debug!(
            path = %metadata.path.display(),
            score = result.score,
            confidence = result.confidence,
            "freshness scored"
        );

        if self.config.cache_enabled {
            self.cache.insert(cache_key, result.clone());
        }
        result
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn apply_time_decay(&self, hours: f64, result: &mut FreshnessResult) {
        let time_score = (100.0 * (-self.config.lambda * hours).exp()).max(0.0);
        result.factors.insert("time_decay".into(), time_score);
        result.score = time_score;

        if hours > 1.0 {
            result.reasons.push(format!("Capture is {hours:.1} hours old"));
        }
        if time_score < 50.0 {
            result.reasons.push("Significant time decay detected".into());
        }
    }

    fn apply_file_changes(&self, metadata: &CaptureMetadata, hours: f64, result: &mut FreshnessResult) {
        // Under a minute old, mtime jitter from the capture itself dominates.
        if hours < 1.0 / 60.0 {
            return;
        }

        let mut changes = 0usize;
        let mut changed: Vec<String> = Vec::new();

        if let Some(mtime) = file_mtime(&metadata.path) {
            // Allow 5 seconds of slack for the write that created the capture.
            if mtime > metadata.timestamp + chrono::Duration::seconds(5) {
                changes += 1;
                changed.push(metadata.path.display().to_string());
            }
        }

        // Working-directory scan only once the capture is half an hour old.
        if hours > 0.5 {
            let recent = recently_modified(&metadata.working_dir, metadata.timestamp);
            changes += recent.len().min(2);
            changed.extend(recent.into_iter().take(2));
        }

        for file in metadata.related_files.iter().take(3) {
            if let Some(mtime) = file_mtime(file) {
                if mtime > metadata.timestamp {
                    changes += 1;
                    changed.push(file.display().to_string());
                }
            }
        }

        if changes > 0 {
            let penalty = changes as f64 * self.config.file_change_penalty;
            result.factors.insert("file_changes".into(), -penalty);
            result.score = (result.score - penalty).max(0.0);
            result.reasons.push(format!(
                "{changes} file(s) modified since capture: {}",
                changed.iter().take(3).cloned().collect::<Vec<_>>().join(", ")
            ));
        }
    }

    fn apply_command_reruns(
        &self,
        metadata: &CaptureMetadata,
        state: &CurrentState,
        result: &mut FreshnessResult,
    ) {
        let reruns = state
            .recent_commands
            .iter()
            .filter(|c| c.command == metadata.command && c.timestamp > metadata.timestamp)
            .count();

        if reruns > 0 {
            let penalty = reruns as f64 * self.config.command_rerun_penalty;
            result.factors.insert("command_reruns".into(), -penalty);
            result.score = (result.score - penalty).max(0.0);
            result
                .reasons
                .push(format!("Same command run {reruns} time(s) since capture"));
        }
    }

    fn apply_git_changes(&self, metadata: &CaptureMetadata, hours: f64, result: &mut FreshnessResult) {
        // Skip entirely for fresh captures, and only pay for `git status`
        // once the capture is over an hour old.
        if hours < 5.0 / 60.0 || hours <= 1.0 {
            return;
        }
        if !in_git_repository(&metadata.working_dir) {
            return;
        }
        match git_status_porcelain(&metadata.working_dir) {
            Some(status) if !status.trim().is_empty() => {
                let penalty = self.config.git_change_penalty;
                result.factors.insert("git_changes".into(), -penalty);
                result.score = (result.score - penalty).max(0.0);
                result
                    .reasons
                    .push("Git repository has uncommitted changes".into());
            }
            _ => {}
        }
    }

    fn apply_package_changes(
        &self,
        metadata: &CaptureMetadata,
        hours: f64,
        result: &mut FreshnessResult,
    ) {
        if hours < 1.0 {
            return;
        }
        let manifests = [
            ("package.json", "package.json modified since capture"),
            ("package-lock.json", "Dependencies changed since capture"),
            ("Cargo.toml", "Cargo.toml modified since capture"),
            ("Cargo.lock", "Dependencies changed since capture"),
        ];
        for (name, reason) in manifests {
            let path = metadata.working_dir.join(name);
            let Some(mtime) = file_mtime(&path) else {
                continue;
            };
            // 60 seconds of tolerance for installs racing the capture.
            if mtime > metadata.timestamp + chrono::Duration::seconds(60) {
                let penalty = self.config.package_change_penalty;
                let entry = result.factors.entry("package_changes".into()).or_insert(0.0);
                *entry = entry.min(-penalty);
                result.score = (result.score - penalty).max(0.0);
                result.reasons.push(reason.into());
            }
        }
    }

    fn confidence(&self, metadata: &CaptureMetadata, hours: f64) -> f64 {
        let mut confidence = self.config.base_confidence - hours * self.config.uncertainty_factor;

        if metadata.hash.is_empty() {
            confidence -= 0.1;
        }
        if metadata.size == 0 {
            confidence -= 0.05;
        }
        if metadata.related_files.is_empty() {
            confidence -= 0.05;
        }
        if hours < 0.5 && !metadata.hash.is_empty() && metadata.size > 0 {
            confidence = (confidence + 0.05).min(1.0);
        }

        confidence.clamp(0.1, 1.0)
    }

    fn cache_key(&self, metadata: &CaptureMetadata, state: &CurrentState) -> String {
        let mut hasher = Sha256::new();
        hasher.update(metadata.path.display().to_string());
        hasher.update(&metadata.command);
        hasher.update(metadata.timestamp.to_rfc3339());
        hasher.update(serde_json::to_string(state).unwrap_or_default());
        hex::encode(hasher.finalize())
    }
}

impl Default for FreshnessScorer {
    fn default() -> Self {
        Self::new(FreshnessConfig::default())
    }
}

fn hours_since(timestamp: DateTime<Utc>) -> f64 {
    let elapsed = Utc::now().signed_duration_since(timestamp);
    (elapsed.num_milliseconds() as f64 / 3_600_000.0).max(0.0)
}

fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

/// First few directory entries modified after `since`. Bounded so scoring an
/// old capture in a huge directory stays fast.
fn recently_modified(dir: &Path, since: DateTime<Utc>) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .take(5)
        .filter(|e| e.path().is_file())
        .filter(|e| file_mtime(&e.path()).is_some_and(|m| m > since))
        .map(|e| e.path().display().to_string())
        .collect()
}

fn in_git_repository(dir: &Path) -> bool {
    run_with_budget(
        Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null()),
    )
    .is_some_and(|out| out.status_ok)
}

fn git_status_porcelain(dir: &Path) -> Option<String> {
    let out = run_with_budget(
        Command::new("git")
            .args(["status", "--porcelain"])
            .current_dir(dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::null()),
    )?;
    out.status_ok.then_some(out.stdout)
}

struct BudgetedOutput {
    status_ok: bool,
    stdout: String,
}

/// Run a subprocess with a one second budget; kill it if it overruns.
fn run_with_budget(command: &mut Command) -> Option<BudgetedOutput> {
    let mut child = command.spawn().ok()?;
    let deadline = Instant::now() + Duration::from_secs(1);

    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(10));
            }
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return None;
            }
        }
    }

    let output = child.wait_with_output().ok()?;
    Some(BudgetedOutput {
        status_ok: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}
