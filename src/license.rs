//! Offline trial and license bookkeeping.
//!
//! One JSON record per machine lives at the configured license file. The
//! first status check creates a 7-day trial. Activating a key bound to
//! this machine switches the record to a licensed state valid for 365
//! days from activation.
//!
//! Key format (case-insensitive):
//!
//! ```text
//! IL-<first 8 hex chars of machine id>-<duration days>-<16 random hex chars>
//! ```
//!
//! Dates are trusted as stored; nothing here defends against clock
//! tampering.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const TRIAL_DAYS: i64 = 7;
pub const LICENSE_DURATION_DAYS: i64 = 365;

/// Durations a key may encode.
pub const VALID_KEY_DURATIONS: [i64; 3] = [7, 30, 365];

const KEY_PREFIX: &str = "IL";
const TYPE_INVALID: &str = "INVALID";

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|p| *p.into_inner())
    }
}

/// What a license record grants. Unrecognised values read as `Unknown`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseKind {
    Trial,
    Licensed,
    #[serde(other)]
    Unknown,
}

impl LicenseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LicenseKind::Trial => "TRIAL",
            LicenseKind::Licensed => "LICENSED",
            LicenseKind::Unknown => TYPE_INVALID,
        }
    }
}

/// The persisted license record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LicenseRecord {
    pub machine_id: String,
    #[serde(rename = "type")]
    pub kind: LicenseKind,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
    pub license_key: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LicenseState {
    TrialActive,
    TrialExpired,
    LicenseActive,
    LicenseExpired,
    Invalid,
}

/// Result of a status check, as reported to the front end.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LicenseStatus {
    pub status: LicenseState,
    pub message: String,
    pub days_left: i64,
    #[serde(rename = "type")]
    pub license_type: String,
}

impl LicenseStatus {
    /// Whether the application may be used.
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            LicenseState::TrialActive | LicenseState::LicenseActive
        )
    }

    fn invalid() -> Self {
        Self {
            status: LicenseState::Invalid,
            message: "Invalid license state. Reinstall the application.".to_string(),
            days_left: 0,
            license_type: TYPE_INVALID.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ActivationResult {
    pub success: bool,
    pub message: String,
}

pub struct LicenseManager {
    path: PathBuf,
    machine_id: String,
    clock: Arc<dyn Clock>,
}

impl LicenseManager {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            machine_id: machine_id(),
            clock,
        }
    }

    pub fn machine_id(&self) -> &str {
        &self.machine_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current status. Creates the trial record on first use.
    pub fn status(&self) -> Result<LicenseStatus> {
        let now = self.clock.now();

        let record = match self.read_record() {
            Ok(Some(record)) => record,
            Ok(None) => {
                tracing::info!(path = %self.path.display(), "first run, starting trial");
                let record = LicenseRecord {
                    machine_id: self.machine_id.clone(),
                    kind: LicenseKind::Trial,
                    trial_start: Some(now),
                    trial_end: Some(now + Duration::days(TRIAL_DAYS)),
                    activated_at: None,
                    license_key: None,
                };
                self.write_record(&record)?;
                record
            }
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "unreadable license record");
                return Ok(LicenseStatus::invalid());
            }
        };

        Ok(evaluate(&record, now))
    }

    /// Activate `key` for this machine.
    pub fn activate(&self, key: &str) -> ActivationResult {
        if !validate_key(key, &self.machine_id) {
            tracing::warn!("license key rejected");
            return ActivationResult {
                success: false,
                message: "Invalid license key or not compatible with this computer.".to_string(),
            };
        }

        let record = LicenseRecord {
            machine_id: self.machine_id.clone(),
            kind: LicenseKind::Licensed,
            trial_start: None,
            trial_end: None,
            activated_at: Some(self.clock.now()),
            license_key: Some(key.trim().to_string()),
        };

        match self.write_record(&record) {
            Ok(()) => {
                tracing::info!("license activated");
                ActivationResult {
                    success: true,
                    message: format!(
                        "License activated successfully! Valid for {} days.",
                        LICENSE_DURATION_DAYS
                    ),
                }
            }
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "failed to save license");
                ActivationResult {
                    success: false,
                    message: "Error saving license information. Check system permissions."
                        .to_string(),
                }
            }
        }
    }

    /// Produce a key for this machine. For demos and testing.
    pub fn generate_key(&self, duration_days: i64) -> Result<String> {
        generate_key(&self.machine_id, duration_days)
    }

    fn read_record(&self) -> Result<Option<LicenseRecord>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let record = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(record))
    }

    fn write_record(&self, record: &LicenseRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(record)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))?;
        Ok(())
    }
}

/// Compute the status of `record` at `now`.
pub fn evaluate(record: &LicenseRecord, now: DateTime<Utc>) -> LicenseStatus {
    match record.kind {
        LicenseKind::Trial => {
            let Some(end) = record.trial_end else {
                return LicenseStatus::invalid();
            };
            let days_left = (end - now).num_days();
            if days_left <= 0 {
                LicenseStatus {
                    status: LicenseState::TrialExpired,
                    message: format!(
                        "Your {}-day trial period has expired. Activate a license to continue.",
                        TRIAL_DAYS
                    ),
                    days_left: 0,
                    license_type: LicenseKind::Trial.as_str().to_string(),
                }
            } else {
                LicenseStatus {
                    status: LicenseState::TrialActive,
                    message: format!("Trial period active. {} days left.", days_left),
                    days_left,
                    license_type: LicenseKind::Trial.as_str().to_string(),
                }
            }
        }
        LicenseKind::Licensed => {
            let Some(activated) = record.activated_at else {
                return LicenseStatus::invalid();
            };
            let expires = activated + Duration::days(LICENSE_DURATION_DAYS);
            let days_left = (expires - now).num_days();
            if days_left <= 0 {
                LicenseStatus {
                    status: LicenseState::LicenseExpired,
                    message: "Your annual license has expired. Renew it to keep using the application."
                        .to_string(),
                    days_left: 0,
                    license_type: LicenseKind::Licensed.as_str().to_string(),
                }
            } else {
                LicenseStatus {
                    status: LicenseState::LicenseActive,
                    message: format!("License active. {} days left.", days_left),
                    days_left,
                    license_type: LicenseKind::Licensed.as_str().to_string(),
                }
            }
        }
        LicenseKind::Unknown => LicenseStatus::invalid(),
    }
}

/// Stable identifier for this machine: 16 hex chars of a SHA-256 digest
/// over architecture, OS family, and OS.
pub fn machine_id() -> String {
    let info = format!(
        "{}-{}-{}",
        std::env::consts::ARCH,
        std::env::consts::FAMILY,
        std::env::consts::OS
    );
    let digest = Sha256::digest(info.as_bytes());
    hex::encode(digest)[..16].to_string()
}

/// Check a key's shape, machine binding, and duration.
pub fn validate_key(key: &str, machine_id: &str) -> bool {
    let key = key.trim().to_uppercase();
    let parts: Vec<&str> = key.split('-').collect();
    if parts.len() != 4 || parts[0] != KEY_PREFIX {
        return false;
    }

    let expected_prefix = machine_id
        .get(..8)
        .map(str::to_uppercase)
        .unwrap_or_default();
    if parts[1] != expected_prefix {
        return false;
    }

    match parts[2].parse::<i64>() {
        Ok(days) => VALID_KEY_DURATIONS.contains(&days),
        Err(_) => false,
    }
}

/// Build a key for `machine_id` encoding `duration_days`.
pub fn generate_key(machine_id: &str, duration_days: i64) -> Result<String> {
    if !VALID_KEY_DURATIONS.contains(&duration_days) {
        bail!(
            "Invalid duration {}: must be one of 7, 30, 365",
            duration_days
        );
    }
    let Some(prefix) = machine_id.get(..8) else {
        bail!("Machine id too short: {}", machine_id);
    };

    let random = uuid::Uuid::new_v4();
    let random_hex = hex::encode(&random.as_bytes()[..8]);
    Ok(format!("{}-{}-{}-{}", KEY_PREFIX, prefix, duration_days, random_hex).to_uppercase())
}
