//! Environment log entries

use serde::{Deserialize, Serialize};

use crate::utils::{generate_id, now_micros};

/// Log rows carry a full uuid
const LOG_ID_LEN: usize = 32;

/// Syslog priority for informational lines
pub const PRIORITY_INFO: i32 = 6;

/// Syslog priority for failures
pub const PRIORITY_ERR: i32 = 3;

/// One log line attributed to an environment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EnvLog {
    pub id: String,
    pub environment_id: String,
    pub deployment_id: String,
    pub machine_id: String,
    pub image_id: String,
    pub level: i32,
    pub message: String,

    /// UTC microseconds
    pub published_at: i64,
}

impl EnvLog {
    pub fn info(message: impl Into<String>) -> Self {
        Self::with_level(PRIORITY_INFO, message)
    }

    fn with_level(level: i32, message: impl Into<String>) -> Self {
        Self {
            id: generate_id(LOG_ID_LEN),
            level,
            message: message.into(),
            published_at: now_micros(),
            ..Default::default()
        }
    }

    /// A new entry with the same attribution and a fresh id and timestamp
    pub fn with_message(&self, level: i32, message: impl Into<String>) -> Self {
        Self {
            id: generate_id(LOG_ID_LEN),
            level,
            message: message.into(),
            published_at: now_micros(),
            ..self.clone()
        }
    }

    pub fn environment(mut self, environment_id: &str) -> Self {
        self.environment_id = environment_id.to_string();
        self
    }

    pub fn deployment(mut self, deployment_id: &str) -> Self {
        self.deployment_id = deployment_id.to_string();
        self
    }

    pub fn machine(mut self, machine_id: &str) -> Self {
        self.machine_id = machine_id.to_string();
        self
    }

    pub fn image(mut self, image_id: &str) -> Self {
        self.image_id = image_id.to_string();
        self
    }
}

/// Direction of a log query relative to a timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogWindow {
    Before(i64),
    After(i64),
}

impl LogWindow {
    /// Parse the `before`/`after` path segment
    pub fn parse(direction: &str, timestamp: i64) -> Option<Self> {
        match direction {
            "before" => Some(LogWindow::Before(timestamp)),
            "after" => Some(LogWindow::After(timestamp)),
            _ => None,
        }
    }

    pub fn contains(&self, published_at: i64) -> bool {
        match *self {
            LogWindow::Before(ts) => published_at <= ts,
            LogWindow::After(ts) => published_at >= ts,
        }
    }
}
