use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// `json` or `pretty`
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Startup timeout for connecting to backing services in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// Run entirely in-process with in-memory log, store and broadcaster
    #[serde(default)]
    pub in_memory: bool,

    // Redis (outbox log) configuration
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Stream carrying submitted messages
    #[serde(default = "default_stream")]
    pub stream: String,

    #[serde(default = "default_group")]
    pub group: String,

    /// Give each replica its own name to spread load across the group
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,

    /// Entries per group read
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum wait of a blocking group read in milliseconds
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    /// Pause after a failed group read in milliseconds
    #[serde(default = "default_read_failure_backoff_ms")]
    pub read_failure_backoff_ms: u64,

    /// Minimum time between retries of pending entries in milliseconds
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,

    /// Deliveries before an entry is dead-lettered, 0 retries forever
    #[serde(default)]
    pub dead_letter_max_deliveries: u64,

    #[serde(default = "default_dead_letter_stream")]
    pub dead_letter_stream: String,

    // NATS (live fan-out) configuration
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    #[serde(default = "default_broadcast_subject")]
    pub broadcast_subject: String,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    // Demo producer configuration
    #[serde(default)]
    pub demo_producer_enabled: bool,

    #[serde(default = "default_demo_producer_interval_secs")]
    pub demo_producer_interval_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    10
}

// Redis defaults
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_stream() -> String {
    "chat_messages_stream".to_string()
}

fn default_group() -> String {
    "chat_persistence_group".to_string()
}

fn default_consumer_name() -> String {
    "chat_persistence_consumer".to_string()
}

fn default_batch_size() -> usize {
    1
}

fn default_block_ms() -> u64 {
    1000
}

fn default_read_failure_backoff_ms() -> u64 {
    5000
}

fn default_retry_interval_ms() -> u64 {
    5000
}

fn default_dead_letter_stream() -> String {
    "chat_messages_dead_letter".to_string()
}

// NATS defaults
fn default_nats_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_broadcast_subject() -> String {
    "chat.messages".to_string()
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "chatline".to_string()
}

fn default_postgres_username() -> String {
    "chatline".to_string()
}

fn default_postgres_password() -> String {
    "chatline".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    5
}

fn default_demo_producer_interval_secs() -> u64 {
    5
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("CHATLINE"))
            .build()?
            .try_deserialize()
    }
}
