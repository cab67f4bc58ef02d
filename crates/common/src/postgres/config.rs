use serde::{Deserialize, Serialize};

/// PostgreSQL connection settings for the store of record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "chatline".to_string(),
            username: "chatline".to_string(),
            password: "chatline".to_string(),
            max_pool_size: 5,
        }
    }
}
