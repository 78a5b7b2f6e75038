use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub slack: SlackConfig,
    pub approval: ApprovalConfig,
    pub reminders: ReminderConfig,
    pub verification: VerificationConfig,
    pub extraction: ExtractionConfig,
    pub org: OrgConfig,
    pub templates: TemplateConfig,
    pub scheduler: SchedulerConfig,
    pub analytics: AnalyticsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SlackConfig {
    pub bot_token: SecretString,
    pub signing_secret: Option<SecretString>,
    pub leave_channel_id: String,
    pub admin_channel_id: Option<String>,
    pub api_base_url: String,
    pub request_timeout_secs: u64,
}

/// Thresholds and switches for the approval state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApprovalConfig {
    pub enabled: bool,
    pub auto_approve_days: u32,
    pub senior_approval_days: u32,
    pub remote_policy_enabled: bool,
    /// Falls back to `auto_approve_days` when not set explicitly.
    pub remote_auto_approve_days: Option<u32>,
    pub timeout_hours: u32,
    pub reminder_before_timeout_hours: u32,
    pub escalation_enabled: bool,
    pub auto_escalate_on_timeout: bool,
    pub hr_user_ids: Vec<String>,
    pub retention_days: u32,
}

impl ApprovalConfig {
    pub fn effective_remote_auto_approve_days(&self) -> u32 {
        self.remote_auto_approve_days.unwrap_or(self.auto_approve_days)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReminderConfig {
    /// Hour offsets from record creation for level 1, level 2 and level 3.
    pub escalation_hours: Vec<u32>,
    pub retention_days: u32,
    pub partial_match_policy: PartialMatchPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationConfig {
    pub first_contact_mode: FirstContactMode,
    pub grace_period_minutes: u32,
    pub recheck_hours: Vec<u32>,
    pub max_rechecks: u32,
    pub retention_days: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionConfig {
    pub max_range_days: u32,
    pub working_days_only: bool,
    pub min_confidence: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrgConfig {
    pub directory_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TemplateConfig {
    pub directory: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub send_dedup_window_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnalyticsConfig {
    pub enabled: bool,
    pub batch_size: usize,
    pub flush_interval_ms: u64,
    pub queue_capacity: usize,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// What a reminder due-check does when some, but not all, outstanding dates
/// have appeared in the HR system since the last pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialMatchPolicy {
    /// Send a progress notice and keep the current level for this pass.
    HoldLevel,
    /// Send a progress notice and escalate the remaining dates in the same pass.
    EscalateRemaining,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FirstContactMode {
    /// Reconcile as soon as the mention is accepted.
    Immediate,
    /// Wait out the grace period, then run bounded re-checks.
    GracePeriod,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    pub slack_leave_channel_id: Option<String>,
    pub approval_enabled: Option<bool>,
    pub org_directory_path: Option<PathBuf>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://leavewatch.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            slack: SlackConfig {
                bot_token: String::new().into(),
                signing_secret: None,
                leave_channel_id: String::new(),
                admin_channel_id: None,
                api_base_url: "https://slack.com/api".to_string(),
                request_timeout_secs: 10,
            },
            approval: ApprovalConfig::default(),
            reminders: ReminderConfig::default(),
            verification: VerificationConfig::default(),
            extraction: ExtractionConfig::default(),
            org: OrgConfig::default(),
            templates: TemplateConfig::default(),
            scheduler: SchedulerConfig {
                poll_interval_secs: 30,
                sweep_interval_secs: 300,
                send_dedup_window_secs: 600,
            },
            analytics: AnalyticsConfig {
                enabled: true,
                batch_size: 10,
                flush_interval_ms: 1_000,
                queue_capacity: 1_024,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            auto_approve_days: 2,
            senior_approval_days: 5,
            remote_policy_enabled: true,
            remote_auto_approve_days: None,
            timeout_hours: 48,
            reminder_before_timeout_hours: 12,
            escalation_enabled: true,
            auto_escalate_on_timeout: true,
            hr_user_ids: Vec::new(),
            retention_days: 90,
        }
    }
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            escalation_hours: vec![12, 48, 72],
            retention_days: 7,
            partial_match_policy: PartialMatchPolicy::HoldLevel,
        }
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            first_contact_mode: FirstContactMode::Immediate,
            grace_period_minutes: 30,
            recheck_hours: vec![12, 24, 48],
            max_rechecks: 3,
            retention_days: 30,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self { max_range_days: 90, working_days_only: true, min_confidence: 0.5 }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl std::str::FromStr for PartialMatchPolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "hold_level" => Ok(Self::HoldLevel),
            "escalate_remaining" => Ok(Self::EscalateRemaining),
            other => Err(ConfigError::Validation(format!(
                "unsupported partial match policy `{other}` (expected hold_level|escalate_remaining)"
            ))),
        }
    }
}

impl std::str::FromStr for FirstContactMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "immediate" => Ok(Self::Immediate),
            "grace_period" => Ok(Self::GracePeriod),
            other => Err(ConfigError::Validation(format!(
                "unsupported first contact mode `{other}` (expected immediate|grace_period)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("leavewatch.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(slack) = patch.slack {
            if let Some(bot_token) = slack.bot_token {
                self.slack.bot_token = secret_value(bot_token);
            }
            if let Some(signing_secret) = slack.signing_secret {
                self.slack.signing_secret = Some(secret_value(signing_secret));
            }
            if let Some(leave_channel_id) = slack.leave_channel_id {
                self.slack.leave_channel_id = leave_channel_id;
            }
            if let Some(admin_channel_id) = slack.admin_channel_id {
                self.slack.admin_channel_id = Some(admin_channel_id);
            }
            if let Some(api_base_url) = slack.api_base_url {
                self.slack.api_base_url = api_base_url;
            }
            if let Some(request_timeout_secs) = slack.request_timeout_secs {
                self.slack.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(approval) = patch.approval {
            let target = &mut self.approval;
            if let Some(enabled) = approval.enabled {
                target.enabled = enabled;
            }
            if let Some(days) = approval.auto_approve_days {
                target.auto_approve_days = days;
            }
            if let Some(days) = approval.senior_approval_days {
                target.senior_approval_days = days;
            }
            if let Some(enabled) = approval.remote_policy_enabled {
                target.remote_policy_enabled = enabled;
            }
            if let Some(days) = approval.remote_auto_approve_days {
                target.remote_auto_approve_days = Some(days);
            }
            if let Some(hours) = approval.timeout_hours {
                target.timeout_hours = hours;
            }
            if let Some(hours) = approval.reminder_before_timeout_hours {
                target.reminder_before_timeout_hours = hours;
            }
            if let Some(enabled) = approval.escalation_enabled {
                target.escalation_enabled = enabled;
            }
            if let Some(enabled) = approval.auto_escalate_on_timeout {
                target.auto_escalate_on_timeout = enabled;
            }
            if let Some(ids) = approval.hr_user_ids {
                target.hr_user_ids = ids;
            }
            if let Some(days) = approval.retention_days {
                target.retention_days = days;
            }
        }

        if let Some(reminders) = patch.reminders {
            if let Some(hours) = reminders.escalation_hours {
                self.reminders.escalation_hours = hours;
            }
            if let Some(days) = reminders.retention_days {
                self.reminders.retention_days = days;
            }
            if let Some(policy) = reminders.partial_match_policy {
                self.reminders.partial_match_policy = policy;
            }
        }

        if let Some(verification) = patch.verification {
            if let Some(mode) = verification.first_contact_mode {
                self.verification.first_contact_mode = mode;
            }
            if let Some(minutes) = verification.grace_period_minutes {
                self.verification.grace_period_minutes = minutes;
            }
            if let Some(hours) = verification.recheck_hours {
                self.verification.recheck_hours = hours;
            }
            if let Some(max_rechecks) = verification.max_rechecks {
                self.verification.max_rechecks = max_rechecks;
            }
            if let Some(days) = verification.retention_days {
                self.verification.retention_days = days;
            }
        }

        if let Some(extraction) = patch.extraction {
            if let Some(days) = extraction.max_range_days {
                self.extraction.max_range_days = days;
            }
            if let Some(working_days_only) = extraction.working_days_only {
                self.extraction.working_days_only = working_days_only;
            }
            if let Some(min_confidence) = extraction.min_confidence {
                self.extraction.min_confidence = min_confidence;
            }
        }

        if let Some(org) = patch.org {
            if let Some(path) = org.directory_path {
                self.org.directory_path = Some(path);
            }
        }

        if let Some(templates) = patch.templates {
            if let Some(directory) = templates.directory {
                self.templates.directory = Some(directory);
            }
        }

        if let Some(scheduler) = patch.scheduler {
            if let Some(secs) = scheduler.poll_interval_secs {
                self.scheduler.poll_interval_secs = secs;
            }
            if let Some(secs) = scheduler.sweep_interval_secs {
                self.scheduler.sweep_interval_secs = secs;
            }
            if let Some(secs) = scheduler.send_dedup_window_secs {
                self.scheduler.send_dedup_window_secs = secs;
            }
        }

        if let Some(analytics) = patch.analytics {
            if let Some(enabled) = analytics.enabled {
                self.analytics.enabled = enabled;
            }
            if let Some(batch_size) = analytics.batch_size {
                self.analytics.batch_size = batch_size;
            }
            if let Some(ms) = analytics.flush_interval_ms {
                self.analytics.flush_interval_ms = ms;
            }
            if let Some(capacity) = analytics.queue_capacity {
                self.analytics.queue_capacity = capacity;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEAVEWATCH_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEAVEWATCH_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEAVEWATCH_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEAVEWATCH_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEAVEWATCH_SLACK_BOT_TOKEN") {
            self.slack.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("LEAVEWATCH_SLACK_SIGNING_SECRET") {
            self.slack.signing_secret = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEAVEWATCH_SLACK_LEAVE_CHANNEL_ID") {
            self.slack.leave_channel_id = value;
        }
        if let Some(value) = read_env("LEAVEWATCH_SLACK_ADMIN_CHANNEL_ID") {
            self.slack.admin_channel_id = Some(value);
        }
        if let Some(value) = read_env("LEAVEWATCH_SLACK_API_BASE_URL") {
            self.slack.api_base_url = value;
        }
        if let Some(value) = read_env("LEAVEWATCH_SLACK_REQUEST_TIMEOUT_SECS") {
            self.slack.request_timeout_secs =
                parse_u64("LEAVEWATCH_SLACK_REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_ENABLED") {
            self.approval.enabled = parse_bool("LEAVEWATCH_APPROVAL_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_AUTO_APPROVE_DAYS") {
            self.approval.auto_approve_days =
                parse_u32("LEAVEWATCH_APPROVAL_AUTO_APPROVE_DAYS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_SENIOR_APPROVAL_DAYS") {
            self.approval.senior_approval_days =
                parse_u32("LEAVEWATCH_APPROVAL_SENIOR_APPROVAL_DAYS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_REMOTE_POLICY_ENABLED") {
            self.approval.remote_policy_enabled =
                parse_bool("LEAVEWATCH_APPROVAL_REMOTE_POLICY_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_REMOTE_AUTO_APPROVE_DAYS") {
            self.approval.remote_auto_approve_days =
                Some(parse_u32("LEAVEWATCH_APPROVAL_REMOTE_AUTO_APPROVE_DAYS", &value)?);
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_TIMEOUT_HOURS") {
            self.approval.timeout_hours = parse_u32("LEAVEWATCH_APPROVAL_TIMEOUT_HOURS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_REMINDER_BEFORE_TIMEOUT_HOURS") {
            self.approval.reminder_before_timeout_hours =
                parse_u32("LEAVEWATCH_APPROVAL_REMINDER_BEFORE_TIMEOUT_HOURS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_ESCALATION_ENABLED") {
            self.approval.escalation_enabled =
                parse_bool("LEAVEWATCH_APPROVAL_ESCALATION_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_AUTO_ESCALATE_ON_TIMEOUT") {
            self.approval.auto_escalate_on_timeout =
                parse_bool("LEAVEWATCH_APPROVAL_AUTO_ESCALATE_ON_TIMEOUT", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_HR_USER_IDS") {
            self.approval.hr_user_ids = parse_string_list(&value);
        }
        if let Some(value) = read_env("LEAVEWATCH_APPROVAL_RETENTION_DAYS") {
            self.approval.retention_days =
                parse_u32("LEAVEWATCH_APPROVAL_RETENTION_DAYS", &value)?;
        }

        if let Some(value) = read_env("LEAVEWATCH_REMINDERS_ESCALATION_HOURS") {
            self.reminders.escalation_hours =
                parse_u32_list("LEAVEWATCH_REMINDERS_ESCALATION_HOURS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_REMINDERS_RETENTION_DAYS") {
            self.reminders.retention_days =
                parse_u32("LEAVEWATCH_REMINDERS_RETENTION_DAYS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_REMINDERS_PARTIAL_MATCH_POLICY") {
            self.reminders.partial_match_policy = value.parse()?;
        }

        if let Some(value) = read_env("LEAVEWATCH_VERIFICATION_FIRST_CONTACT_MODE") {
            self.verification.first_contact_mode = value.parse()?;
        }
        if let Some(value) = read_env("LEAVEWATCH_VERIFICATION_GRACE_PERIOD_MINUTES") {
            self.verification.grace_period_minutes =
                parse_u32("LEAVEWATCH_VERIFICATION_GRACE_PERIOD_MINUTES", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_VERIFICATION_RECHECK_HOURS") {
            self.verification.recheck_hours =
                parse_u32_list("LEAVEWATCH_VERIFICATION_RECHECK_HOURS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_VERIFICATION_MAX_RECHECKS") {
            self.verification.max_rechecks =
                parse_u32("LEAVEWATCH_VERIFICATION_MAX_RECHECKS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_VERIFICATION_RETENTION_DAYS") {
            self.verification.retention_days =
                parse_u32("LEAVEWATCH_VERIFICATION_RETENTION_DAYS", &value)?;
        }

        if let Some(value) = read_env("LEAVEWATCH_EXTRACTION_MAX_RANGE_DAYS") {
            self.extraction.max_range_days =
                parse_u32("LEAVEWATCH_EXTRACTION_MAX_RANGE_DAYS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_EXTRACTION_WORKING_DAYS_ONLY") {
            self.extraction.working_days_only =
                parse_bool("LEAVEWATCH_EXTRACTION_WORKING_DAYS_ONLY", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_EXTRACTION_MIN_CONFIDENCE") {
            self.extraction.min_confidence =
                parse_f64("LEAVEWATCH_EXTRACTION_MIN_CONFIDENCE", &value)?;
        }

        if let Some(value) = read_env("LEAVEWATCH_ORG_DIRECTORY_PATH") {
            self.org.directory_path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("LEAVEWATCH_TEMPLATES_DIRECTORY") {
            self.templates.directory = Some(PathBuf::from(value));
        }

        if let Some(value) = read_env("LEAVEWATCH_SCHEDULER_POLL_INTERVAL_SECS") {
            self.scheduler.poll_interval_secs =
                parse_u64("LEAVEWATCH_SCHEDULER_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_SCHEDULER_SWEEP_INTERVAL_SECS") {
            self.scheduler.sweep_interval_secs =
                parse_u64("LEAVEWATCH_SCHEDULER_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_SCHEDULER_SEND_DEDUP_WINDOW_SECS") {
            self.scheduler.send_dedup_window_secs =
                parse_u64("LEAVEWATCH_SCHEDULER_SEND_DEDUP_WINDOW_SECS", &value)?;
        }

        if let Some(value) = read_env("LEAVEWATCH_ANALYTICS_ENABLED") {
            self.analytics.enabled = parse_bool("LEAVEWATCH_ANALYTICS_ENABLED", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_ANALYTICS_BATCH_SIZE") {
            self.analytics.batch_size = parse_usize("LEAVEWATCH_ANALYTICS_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_ANALYTICS_FLUSH_INTERVAL_MS") {
            self.analytics.flush_interval_ms =
                parse_u64("LEAVEWATCH_ANALYTICS_FLUSH_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_ANALYTICS_QUEUE_CAPACITY") {
            self.analytics.queue_capacity =
                parse_usize("LEAVEWATCH_ANALYTICS_QUEUE_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("LEAVEWATCH_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEAVEWATCH_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("LEAVEWATCH_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("LEAVEWATCH_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEAVEWATCH_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("LEAVEWATCH_LOGGING_LEVEL").or_else(|| read_env("LEAVEWATCH_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEAVEWATCH_LOGGING_FORMAT").or_else(|| read_env("LEAVEWATCH_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.slack_bot_token {
            self.slack.bot_token = secret_value(bot_token);
        }
        if let Some(signing_secret) = overrides.slack_signing_secret {
            self.slack.signing_secret = Some(secret_value(signing_secret));
        }
        if let Some(leave_channel_id) = overrides.slack_leave_channel_id {
            self.slack.leave_channel_id = leave_channel_id;
        }
        if let Some(enabled) = overrides.approval_enabled {
            self.approval.enabled = enabled;
        }
        if let Some(path) = overrides.org_directory_path {
            self.org.directory_path = Some(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_slack(&self.slack)?;
        validate_approval(&self.approval)?;
        validate_reminders(&self.reminders)?;
        validate_verification(&self.verification)?;
        validate_extraction(&self.extraction)?;
        validate_scheduler(&self.scheduler, &self.analytics)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leavewatch.toml"), PathBuf::from("config/leavewatch.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_slack(slack: &SlackConfig) -> Result<(), ConfigError> {
    let bot_token = slack.bot_token.expose_secret();
    if bot_token.is_empty() {
        return Err(ConfigError::Validation(
            "slack.bot_token is required. Get it from https://api.slack.com/apps > Your App > OAuth & Permissions > Bot User OAuth Token".to_string()
        ));
    }
    if !bot_token.starts_with("xoxb-") {
        let hint = if bot_token.starts_with("xapp-") {
            " (hint: you may have used an app-level token instead of the bot token)"
        } else {
            ""
        };
        return Err(ConfigError::Validation(format!(
            "slack.bot_token must start with `xoxb-`{hint}. Get it from https://api.slack.com/apps"
        )));
    }

    if slack.leave_channel_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "slack.leave_channel_id is required (the channel where people announce absences)"
                .to_string(),
        ));
    }

    if !slack.api_base_url.starts_with("http://") && !slack.api_base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "slack.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if slack.request_timeout_secs == 0 || slack.request_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "slack.request_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_approval(approval: &ApprovalConfig) -> Result<(), ConfigError> {
    if approval.auto_approve_days > approval.senior_approval_days {
        return Err(ConfigError::Validation(format!(
            "approval.auto_approve_days ({}) must not exceed approval.senior_approval_days ({})",
            approval.auto_approve_days, approval.senior_approval_days
        )));
    }

    if approval.timeout_hours == 0 {
        return Err(ConfigError::Validation(
            "approval.timeout_hours must be greater than zero".to_string(),
        ));
    }

    if approval.reminder_before_timeout_hours >= approval.timeout_hours {
        return Err(ConfigError::Validation(
            "approval.reminder_before_timeout_hours must be smaller than approval.timeout_hours"
                .to_string(),
        ));
    }

    if approval.retention_days == 0 {
        return Err(ConfigError::Validation(
            "approval.retention_days must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_reminders(reminders: &ReminderConfig) -> Result<(), ConfigError> {
    let hours = &reminders.escalation_hours;
    let increasing = hours.windows(2).all(|pair| pair[0] < pair[1]);
    if hours.len() != 3 || !increasing || hours[0] == 0 {
        return Err(ConfigError::Validation(
            "reminders.escalation_hours must hold exactly three strictly increasing, non-zero offsets (e.g. [12, 48, 72])"
                .to_string(),
        ));
    }

    if reminders.retention_days == 0 {
        return Err(ConfigError::Validation(
            "reminders.retention_days must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_verification(verification: &VerificationConfig) -> Result<(), ConfigError> {
    if verification.recheck_hours.is_empty() {
        return Err(ConfigError::Validation(
            "verification.recheck_hours must contain at least one offset".to_string(),
        ));
    }

    if verification.max_rechecks == 0 {
        return Err(ConfigError::Validation(
            "verification.max_rechecks must be greater than zero".to_string(),
        ));
    }

    if verification.retention_days == 0 {
        return Err(ConfigError::Validation(
            "verification.retention_days must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_extraction(extraction: &ExtractionConfig) -> Result<(), ConfigError> {
    if extraction.max_range_days == 0 || extraction.max_range_days > 366 {
        return Err(ConfigError::Validation(
            "extraction.max_range_days must be in range 1..=366".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&extraction.min_confidence) {
        return Err(ConfigError::Validation(
            "extraction.min_confidence must be in range 0.0..=1.0".to_string(),
        ));
    }

    Ok(())
}

fn validate_scheduler(
    scheduler: &SchedulerConfig,
    analytics: &AnalyticsConfig,
) -> Result<(), ConfigError> {
    if scheduler.poll_interval_secs == 0 || scheduler.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "scheduler.poll_interval_secs and scheduler.sweep_interval_secs must be greater than zero"
                .to_string(),
        ));
    }

    if analytics.batch_size == 0 || analytics.queue_capacity == 0 || analytics.flush_interval_ms == 0
    {
        return Err(ConfigError::Validation(
            "analytics.batch_size, analytics.queue_capacity and analytics.flush_interval_ms must be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid(key, value))
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.trim().parse::<usize>().map_err(|_| invalid(key, value))
}

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.trim().parse::<f64>().map_err(|_| invalid(key, value))
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().to_ascii_lowercase().parse::<bool>().map_err(|_| invalid(key, value))
}

fn parse_u32_list(key: &str, value: &str) -> Result<Vec<u32>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<u32>().map_err(|_| invalid(key, value)))
        .collect()
}

fn parse_string_list(value: &str) -> Vec<String> {
    value.split(',').map(str::trim).filter(|item| !item.is_empty()).map(str::to_owned).collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    slack: Option<SlackPatch>,
    approval: Option<ApprovalPatch>,
    reminders: Option<ReminderPatch>,
    verification: Option<VerificationPatch>,
    extraction: Option<ExtractionPatch>,
    org: Option<OrgPatch>,
    templates: Option<TemplatePatch>,
    scheduler: Option<SchedulerPatch>,
    analytics: Option<AnalyticsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackPatch {
    bot_token: Option<String>,
    signing_secret: Option<String>,
    leave_channel_id: Option<String>,
    admin_channel_id: Option<String>,
    api_base_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApprovalPatch {
    enabled: Option<bool>,
    auto_approve_days: Option<u32>,
    senior_approval_days: Option<u32>,
    remote_policy_enabled: Option<bool>,
    remote_auto_approve_days: Option<u32>,
    timeout_hours: Option<u32>,
    reminder_before_timeout_hours: Option<u32>,
    escalation_enabled: Option<bool>,
    auto_escalate_on_timeout: Option<bool>,
    hr_user_ids: Option<Vec<String>>,
    retention_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ReminderPatch {
    escalation_hours: Option<Vec<u32>>,
    retention_days: Option<u32>,
    partial_match_policy: Option<PartialMatchPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct VerificationPatch {
    first_contact_mode: Option<FirstContactMode>,
    grace_period_minutes: Option<u32>,
    recheck_hours: Option<Vec<u32>>,
    max_rechecks: Option<u32>,
    retention_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ExtractionPatch {
    max_range_days: Option<u32>,
    working_days_only: Option<bool>,
    min_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct OrgPatch {
    directory_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct TemplatePatch {
    directory: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulerPatch {
    poll_interval_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    send_dedup_window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AnalyticsPatch {
    enabled: Option<bool>,
    batch_size: Option<usize>,
    flush_interval_ms: Option<u64>,
    queue_capacity: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
