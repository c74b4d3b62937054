// Redis connection settings shared by the worker and the CLI

use crate::redis::{DEFAULT_CHANNEL, DEFAULT_QUEUE};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Clone, PartialEq)]
pub struct RedisSettings {
    pub url: String,
    pub queue: String,
    pub channel: String,
}

impl RedisSettings {
    /// REDIS_URL, JUDGE_QUEUE, JUDGE_CHANNEL
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            url: lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string()),
            queue: lookup("JUDGE_QUEUE").unwrap_or_else(|| DEFAULT_QUEUE.to_string()),
            channel: lookup("JUDGE_CHANNEL").unwrap_or_else(|| DEFAULT_CHANNEL.to_string()),
        }
    }
}
