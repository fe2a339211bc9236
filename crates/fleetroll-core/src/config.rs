//! fleetroll.toml configuration parser.
//!
//! Each component takes its own section by value at construction time;
//! nothing reads configuration from ambient state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetrollConfig {
    /// Enables confirmation prompts and other blocking reads.
    pub interactive: bool,
    pub ssh: SshConfig,
    pub rotation: RotationConfig,
    pub connectivity: ConnectivityConfig,
    pub change_set: ChangeSetConfig,
}

impl Default for FleetrollConfig {
    fn default() -> Self {
        Self {
            interactive: true,
            ssh: SshConfig::default(),
            rotation: RotationConfig::default(),
            connectivity: ConnectivityConfig::default(),
            change_set: ChangeSetConfig::default(),
        }
    }
}

/// Remote shell access.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub identity_file: Option<PathBuf>,
    pub user: Option<String>,
    /// Raw options string, inserted verbatim into the ssh command line.
    pub options: Option<String>,
    /// Connect to this instance instead of selecting one from the group.
    pub instance: Option<String>,
    /// Group (logical or physical id) to pick connectivity targets from.
    pub group_name: Option<String>,
}

impl SshConfig {
    /// Fill unset fields from `FLEETROLL_SSH_*` variables, and the user
    /// from `USER` as a last resort.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.identity_file.is_none() {
            self.identity_file = lookup("FLEETROLL_SSH_KEY_FILE").map(PathBuf::from);
        }
        if self.options.is_none() {
            self.options = lookup("FLEETROLL_SSH_OPTIONS");
        }
        if self.user.is_none() {
            self.user = lookup("FLEETROLL_SSH_USER").or_else(|| lookup("USER"));
        }
    }
}

/// Rotation behaviour and the bounds of its wait loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub shutdown_command: String,
    pub member_ready_attempts: u32,
    #[serde(with = "duration_str")]
    pub member_ready_delay: Duration,
    pub capacity_attempts: u32,
    #[serde(with = "duration_str")]
    pub capacity_delay: Duration,
    pub instance_stop_attempts: u32,
    #[serde(with = "duration_str")]
    pub instance_stop_delay: Duration,
    pub retry: RetryConfig,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            shutdown_command: "sudo shutdown -h now".to_string(),
            member_ready_attempts: 60,
            member_ready_delay: Duration::from_secs(10),
            capacity_attempts: 60,
            capacity_delay: Duration::from_secs(30),
            instance_stop_attempts: 40,
            instance_stop_delay: Duration::from_secs(15),
            retry: RetryConfig::default(),
        }
    }
}

impl RotationConfig {
    pub fn member_ready(&self) -> PollBudget {
        PollBudget::new(self.member_ready_attempts, self.member_ready_delay)
    }

    pub fn capacity(&self) -> PollBudget {
        PollBudget::new(self.capacity_attempts, self.capacity_delay)
    }

    pub fn instance_stop(&self) -> PollBudget {
        PollBudget::new(self.instance_stop_attempts, self.instance_stop_delay)
    }
}

/// Remote connectivity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub attempts: u32,
    #[serde(with = "duration_str")]
    pub backoff: Duration,
    pub command: String,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_secs(5),
            command: "/bin/true".to_string(),
        }
    }
}

/// Change-set polling and deletion retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeSetConfig {
    #[serde(with = "duration_str")]
    pub wait_timeout: Duration,
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,
    pub delete_retry_attempts: u32,
    #[serde(with = "duration_str")]
    pub delete_retry_delay: Duration,
    pub retry: RetryConfig,
}

impl Default for ChangeSetConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(90),
            poll_interval: Duration::from_secs(5),
            delete_retry_attempts: 30,
            delete_retry_delay: Duration::from_secs(1),
            retry: RetryConfig::default(),
        }
    }
}

/// Retry of throttled control-plane calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
    #[serde(with = "duration_str")]
    pub delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            delay: Duration::from_secs(2),
        }
    }
}

impl RetryConfig {
    pub fn budget(&self) -> PollBudget {
        PollBudget::new(self.attempts, self.delay)
    }
}

/// An attempt ceiling and the sleep between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBudget {
    pub attempts: u32,
    pub delay: Duration,
}

impl PollBudget {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Upper bound on the time spent sleeping.
    pub fn total(&self) -> Duration {
        self.delay * self.attempts
    }
}

impl FleetrollConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration string like "5s", "500ms", "1m".
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

/// Format a duration the way `parse_duration` reads it back.
pub fn format_duration(d: Duration) -> String {
    if d.subsec_millis() != 0 {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid duration: {raw:?}")))
    }
}
