// crates/expunge-config/src/lib.rs
// ============================================================================
// Module: Expunge Configuration
// Description: Typed YAML configuration with env indirection and validation.
// Purpose: Resolve and validate the single config document at startup.
// Dependencies: serde, serde_yaml, thiserror
// ============================================================================

//! ## Overview
//! Expunge is configured by one YAML document. Any string value of the form
//! `env:NAME` is substituted with that environment variable during an
//! explicit resolution pass; unset or empty references are a configuration
//! error at startup, never at first use. Validation runs after resolution
//! and rejects out-of-range engine bounds (claim TTL, run timeout) and
//! incomplete LLM provider settings.
//!
//! Security posture: config values include credentials; they are never
//! echoed back in errors.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde_yaml::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading and validation errors.
///
/// # Invariants
/// - Messages name the offending key, never the offending secret value.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config file unreadable: {0}")]
    Io(String),
    /// The config document failed to parse or decode.
    #[error("config decode failed: {0}")]
    Decode(String),
    /// An `env:NAME` reference resolved to nothing.
    #[error("environment variable '{0}' referenced in config is missing or empty")]
    MissingEnv(String),
    /// A resolved value failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Sections
// ============================================================================

/// Retry policy settings.
///
/// # Invariants
/// - `attempts >= 1`; `jitter` is a fraction in `[0, 1)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetrySettings {
    /// Maximum attempts per task, including the first.
    #[serde(default = "default_retry_attempts")]
    pub attempts: u32,
    /// Initial backoff delay in milliseconds.
    #[serde(default = "default_retry_min_delay_ms")]
    pub min_delay_ms: u64,
    /// Backoff cap in milliseconds.
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Symmetric jitter fraction.
    #[serde(default = "default_retry_jitter")]
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            attempts: default_retry_attempts(),
            min_delay_ms: default_retry_min_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            jitter: default_retry_jitter(),
        }
    }
}

/// Side-effect and launch policy settings.
///
/// # Invariants
/// - `confidence_threshold` is a fraction in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicySettings {
    /// Require an idempotency key on every launch.
    #[serde(default = "default_true")]
    pub require_idempotency_key: bool,
    /// Gate side-effect tasks behind approvals.
    #[serde(default = "default_true")]
    pub side_effects_require_approval: bool,
    /// Default identity-match confidence threshold.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            require_idempotency_key: true,
            side_effects_require_approval: true,
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// LLM provider selection.
///
/// # Invariants
/// - Variants are stable for config round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    /// Deterministic in-process stub.
    #[default]
    Mock,
    /// OpenAI-compatible chat completions endpoint.
    OpenaiCompatible,
}

/// LLM task settings.
///
/// # Invariants
/// - `openai_compatible` requires endpoint, api key, and model.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct LlmSettings {
    /// Provider backing `llm.json` tasks.
    #[serde(default)]
    pub provider: LlmProvider,
    /// Chat completions base endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Bearer token for the endpoint.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Model name requested from the endpoint.
    #[serde(default)]
    pub model: Option<String>,
}

/// Agent mailbox settings for email tasks.
///
/// # Invariants
/// - Empty strings mean "not configured"; email tasks then fail closed.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AgentEmailSettings {
    /// Agent mailbox address.
    #[serde(default)]
    pub address: String,
    /// IMAP host for inbox polling.
    #[serde(default)]
    pub imap_host: String,
    /// IMAP port.
    #[serde(default = "default_imap_port")]
    pub imap_port: u16,
    /// SMTP host for outbound mail.
    #[serde(default)]
    pub smtp_host: String,
    /// SMTP port.
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    /// Mailbox password.
    #[serde(default)]
    pub password: String,
    /// Additional addresses monitored for verification mail.
    #[serde(default)]
    pub alternative_addresses: Vec<String>,
}

/// Browser connector settings.
///
/// # Invariants
/// - `rate_limit_per_broker_per_hour >= 1`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BrowserSettings {
    /// Run the browser headless.
    #[serde(default = "default_true")]
    pub headless: bool,
    /// Consult robots.txt before rendered fetches.
    #[serde(default = "default_true")]
    pub check_robots_txt: bool,
    /// Per-broker hourly request budget.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_broker_per_hour: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            check_robots_txt: true,
            rate_limit_per_broker_per_hour: default_rate_limit(),
        }
    }
}

/// Scheduler settings.
///
/// # Invariants
/// - `poll_interval_seconds >= 1`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerSettings {
    /// Whether the scheduler worker starts.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Tick interval in seconds.
    #[serde(default = "default_scheduler_poll")]
    pub poll_interval_seconds: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_seconds: default_scheduler_poll(),
        }
    }
}

/// Artifact retention settings.
///
/// # Invariants
/// - Negative retention means "keep indefinitely" for that kind.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionSettings {
    /// Days to keep `html` artifacts.
    #[serde(default = "default_html_days")]
    pub html_days: i64,
    /// Days to keep `screenshot` artifacts.
    #[serde(default = "default_screenshot_days")]
    pub screenshot_days: i64,
    /// Days to keep `confirmation` and `receipt` artifacts.
    #[serde(default = "default_confirmation_days")]
    pub confirmation_days: i64,
    /// Sweep interval in seconds.
    #[serde(default = "default_sweep_interval")]
    pub poll_interval_seconds: u64,
}

impl Default for RetentionSettings {
    fn default() -> Self {
        Self {
            html_days: default_html_days(),
            screenshot_days: default_screenshot_days(),
            confirmation_days: default_confirmation_days(),
            poll_interval_seconds: default_sweep_interval(),
        }
    }
}

/// PII redaction settings.
///
/// # Invariants
/// - Built-in SSN/phone/email/ZIP scrubbing is controlled only by
///   `log_redaction`; `redact_terms` adds operator-supplied strings on top.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PiiSettings {
    /// Scrub PII from persisted error messages and log output.
    #[serde(default = "default_true")]
    pub log_redaction: bool,
    /// Additional literal terms scrubbed from error messages.
    #[serde(default)]
    pub redact_terms: Vec<String>,
}

impl Default for PiiSettings {
    fn default() -> Self {
        Self {
            log_redaction: true,
            redact_terms: Vec::new(),
        }
    }
}

/// Dead-letter controller settings.
///
/// # Invariants
/// - `max_failures >= 1`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeadLetterSettings {
    /// Consecutive failures before a broker's schedules are disabled.
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,
}

impl Default for DeadLetterSettings {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
        }
    }
}

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Resolved and validated executor configuration.
///
/// # Invariants
/// - `run_claim_ttl_seconds >= 30` and `run_timeout_ms >= 1000`.
/// - Every `env:` reference was resolved before construction.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutorConfig {
    /// API bind host.
    pub bind_host: String,
    /// API bind port.
    pub bind_port: u16,
    /// Bearer token required by mutating endpoints.
    pub auth_token: String,
    /// Path of the sqlite database file.
    pub database_path: PathBuf,
    /// Root directory of plan YAML files.
    pub plans_root: PathBuf,
    /// Root directory of run artifacts.
    pub artifacts_root: PathBuf,
    /// Optional broker catalog file used for schedule bootstrap.
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
    /// Parallel runner budget.
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: u32,
    /// Default per-task timeout in milliseconds.
    #[serde(default = "default_task_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Wall-clock run timeout in milliseconds.
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    /// Run claim lease TTL in seconds.
    #[serde(default = "default_claim_ttl_seconds")]
    pub run_claim_ttl_seconds: u64,
    /// Retry policy settings.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Side-effect and launch policy settings.
    #[serde(default)]
    pub policy: PolicySettings,
    /// LLM task settings.
    #[serde(default)]
    pub llm: LlmSettings,
    /// Agent mailbox settings.
    #[serde(default)]
    pub agent_email: AgentEmailSettings,
    /// Browser connector settings.
    #[serde(default)]
    pub browser: BrowserSettings,
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Artifact retention settings.
    #[serde(default)]
    pub retention: RetentionSettings,
    /// PII redaction settings.
    #[serde(default)]
    pub pii: PiiSettings,
    /// Dead-letter controller settings.
    #[serde(default)]
    pub dead_letter: DeadLetterSettings,
}

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Returns `true` for defaulted boolean flags.
const fn default_true() -> bool {
    true
}

/// Default retry attempt budget.
const fn default_retry_attempts() -> u32 {
    3
}

/// Default initial backoff in milliseconds.
const fn default_retry_min_delay_ms() -> u64 {
    500
}

/// Default backoff cap in milliseconds.
const fn default_retry_max_delay_ms() -> u64 {
    60_000
}

/// Default jitter fraction.
const fn default_retry_jitter() -> f64 {
    0.15
}

/// Default identity-match confidence threshold.
const fn default_confidence_threshold() -> f64 {
    0.8
}

/// Default IMAP port.
const fn default_imap_port() -> u16 {
    993
}

/// Default SMTP submission port.
const fn default_smtp_port() -> u16 {
    587
}

/// Default per-broker hourly request budget.
const fn default_rate_limit() -> u32 {
    30
}

/// Default scheduler poll interval in seconds.
const fn default_scheduler_poll() -> u64 {
    300
}

/// Default html artifact retention in days.
const fn default_html_days() -> i64 {
    7
}

/// Default screenshot artifact retention in days.
const fn default_screenshot_days() -> i64 {
    30
}

/// Default confirmation/receipt retention (negative keeps forever).
const fn default_confirmation_days() -> i64 {
    -1
}

/// Default sweep interval in seconds.
const fn default_sweep_interval() -> u64 {
    86_400
}

/// Default dead-letter failure threshold.
const fn default_max_failures() -> u32 {
    3
}

/// Default parallel runner budget.
const fn default_max_concurrent_runs() -> u32 {
    2
}

/// Default per-task timeout in milliseconds.
const fn default_task_timeout_ms() -> u64 {
    120_000
}

/// Default run wall-clock timeout in milliseconds.
const fn default_run_timeout_ms() -> u64 {
    3_600_000
}

/// Default run claim TTL in seconds.
const fn default_claim_ttl_seconds() -> u64 {
    600
}

// ============================================================================
// SECTION: Loading
// ============================================================================

/// Prefix marking an environment-variable reference.
const ENV_REF_PREFIX: &str = "env:";

/// Loads, resolves, and validates the config document at `path`.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is unreadable, fails to decode, an
/// `env:` reference is unset, or validation rejects a value.
pub fn load_config(path: &Path) -> Result<ExecutorConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|err| ConfigError::Io(err.to_string()))?;
    load_config_str(&raw)
}

/// Loads, resolves, and validates a config document from a string.
///
/// # Errors
///
/// Returns [`ConfigError`] when decoding, env resolution, or validation
/// fails.
pub fn load_config_str(raw: &str) -> Result<ExecutorConfig, ConfigError> {
    load_config_str_with_env(raw, &|name| env::var(name).ok())
}

/// Loads a config document with an injectable environment lookup.
///
/// # Errors
///
/// Returns [`ConfigError`] when decoding, env resolution, or validation
/// fails.
pub fn load_config_str_with_env(
    raw: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ExecutorConfig, ConfigError> {
    let mut document: Value =
        serde_yaml::from_str(raw).map_err(|err| ConfigError::Decode(err.to_string()))?;
    resolve_env_refs(&mut document, lookup)?;
    let config: ExecutorConfig =
        serde_yaml::from_value(document).map_err(|err| ConfigError::Decode(err.to_string()))?;
    validate(&config)?;
    Ok(config)
}

/// Substitutes every `env:NAME` string value in the document tree.
fn resolve_env_refs(
    value: &mut Value,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    match value {
        Value::String(text) => {
            if let Some(name) = text.strip_prefix(ENV_REF_PREFIX) {
                let name = name.trim();
                if name.is_empty() {
                    return Err(ConfigError::Invalid("empty env reference".to_string()));
                }
                let resolved = lookup(name).unwrap_or_default();
                if resolved.trim().is_empty() {
                    return Err(ConfigError::MissingEnv(name.to_string()));
                }
                *text = resolved.trim().to_string();
            }
            Ok(())
        }
        Value::Sequence(items) => {
            for item in items {
                resolve_env_refs(item, lookup)?;
            }
            Ok(())
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                resolve_env_refs(item, lookup)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Validates engine bounds and provider completeness.
fn validate(config: &ExecutorConfig) -> Result<(), ConfigError> {
    if config.auth_token.trim().is_empty() {
        return Err(ConfigError::Invalid("auth_token must be non-empty".to_string()));
    }
    if config.bind_host.trim().is_empty() {
        return Err(ConfigError::Invalid("bind_host must be non-empty".to_string()));
    }
    if config.max_concurrent_runs == 0 {
        return Err(ConfigError::Invalid("max_concurrent_runs must be >= 1".to_string()));
    }
    if config.run_timeout_ms < 1_000 {
        return Err(ConfigError::Invalid("run_timeout_ms must be >= 1000".to_string()));
    }
    if config.run_claim_ttl_seconds < 30 {
        return Err(ConfigError::Invalid("run_claim_ttl_seconds must be >= 30".to_string()));
    }
    if config.retry.attempts == 0 {
        return Err(ConfigError::Invalid("retry.attempts must be >= 1".to_string()));
    }
    if !(0.0..1.0).contains(&config.retry.jitter) {
        return Err(ConfigError::Invalid("retry.jitter must be in [0, 1)".to_string()));
    }
    if config.scheduler.poll_interval_seconds == 0 {
        return Err(ConfigError::Invalid(
            "scheduler.poll_interval_seconds must be >= 1".to_string(),
        ));
    }
    if config.dead_letter.max_failures == 0 {
        return Err(ConfigError::Invalid("dead_letter.max_failures must be >= 1".to_string()));
    }
    if config.llm.provider == LlmProvider::OpenaiCompatible
        && (is_unset(config.llm.endpoint.as_deref())
            || is_unset(config.llm.api_key.as_deref())
            || is_unset(config.llm.model.as_deref()))
    {
        return Err(ConfigError::Invalid(
            "llm.provider=openai_compatible requires endpoint, api_key, and model".to_string(),
        ));
    }
    Ok(())
}

/// Returns `true` for absent or blank optional strings.
fn is_unset(value: Option<&str>) -> bool {
    value.is_none_or(|text| text.trim().is_empty())
}

// ============================================================================
// SECTION: Tests
// ============================================================================
