//! Configuration values as the core consumes them. Parsing and schema
//! validation happen upstream; these structs only carry already-validated
//! settings, with serde defaults matching the shipped behaviour.

use std::time::Duration;

use serde::Deserialize;

/// Connection, command and heartbeat settings for the RCON channel.
#[derive(Debug, Clone, Deserialize)]
pub struct RconConfig {
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

impl RconConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Exponential backoff settings for automatic reconnection.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    /// Symmetric jitter fraction in `0..=1` applied to each delay.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// 0 means unlimited attempts.
    #[serde(default)]
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
            max_attempts: 0,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Per-command settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    #[serde(default = "default_command_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_command_retries")]
    pub retries: u32,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_command_timeout_ms(),
            retries: default_command_retries(),
        }
    }
}

impl CommandConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Keep-alive command issued while connected.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub interval_ms: u64,
    /// The command text; the default empty body is answered but ignored by
    /// the server.
    #[serde(default)]
    pub command: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: default_heartbeat_interval_ms(),
            command: String::new(),
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Which transport delivers the server log and where it lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSourceMode {
    Tail,
    Ftp,
    Sftp,
}

/// Log reader settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LogReaderConfig {
    pub mode: LogSourceMode,
    /// Directory the server writes its log into.
    pub log_dir: String,
    #[serde(default = "default_log_filename")]
    pub filename: String,
    /// Remote credentials, required for ftp/sftp modes.
    #[serde(default)]
    pub credentials: Option<RemoteCredentials>,
    /// Remote fetch cadence.
    #[serde(default = "default_fetch_interval_ms")]
    pub fetch_interval_ms: u64,
    /// Local stat fallback cadence next to the FS watcher.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Skip the backlog present at watch start.
    #[serde(default = "default_true")]
    pub start_from_end: bool,
    /// Capacity of the line queue between reader and rule loop.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl LogReaderConfig {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn file_path(&self) -> String {
        let dir = self.log_dir.trim_end_matches(['/', '\\']);
        format!("{}/{}", dir, self.filename)
    }
}

/// Login data for the remote log transports.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// FTPS instead of plain FTP.
    #[serde(default)]
    pub secure: bool,
}

/// Cadences of the periodic RCON polls.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_list_interval_ms")]
    pub player_list_interval_ms: u64,
    #[serde(default = "default_list_interval_ms")]
    pub squad_list_interval_ms: u64,
    #[serde(default = "default_list_interval_ms")]
    pub layer_info_interval_ms: u64,
    #[serde(default = "default_list_interval_ms")]
    pub server_info_interval_ms: u64,
    #[serde(default = "default_admin_list_interval_ms")]
    pub admin_list_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            player_list_interval_ms: default_list_interval_ms(),
            squad_list_interval_ms: default_list_interval_ms(),
            layer_info_interval_ms: default_list_interval_ms(),
            server_info_interval_ms: default_list_interval_ms(),
            admin_list_interval_ms: default_admin_list_interval_ms(),
        }
    }
}

/// Everything one managed server needs.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Display name used in logs and the push channel.
    #[serde(default = "default_server_name")]
    pub name: String,
    pub rcon: RconConfig,
    pub log_reader: LogReaderConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Local files the admin list task re-reads.
    #[serde(default)]
    pub admin_lists: Vec<String>,
    /// Per-component verbosity, 0 (error) to 5 (trace).
    #[serde(default)]
    pub verbosity: std::collections::HashMap<String, u8>,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.2
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

fn default_command_retries() -> u32 {
    2
}

fn default_heartbeat_interval_ms() -> u64 {
    15_000
}

fn default_log_filename() -> String {
    "SquadGame.log".to_owned()
}

fn default_fetch_interval_ms() -> u64 {
    5_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_list_interval_ms() -> u64 {
    30_000
}

fn default_admin_list_interval_ms() -> u64 {
    300_000
}

fn default_server_name() -> String {
    "squad-server".to_owned()
}
