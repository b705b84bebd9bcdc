use serde::{Deserialize, Serialize};

/// Persisted greeter settings, stored under the `hello` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub world: String,
}

impl Default for Hello {
    fn default() -> Self {
        Self {
            world: "good".to_string(),
        }
    }
}

/// Process options read from `GREETER_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GreeterOptions {
    /// Word put in front of every greeting.
    pub greeting: String,
    /// Cron spec of the heartbeat job.
    pub heartbeat: String,
}

impl Default for GreeterOptions {
    fn default() -> Self {
        Self {
            greeting: default_greeting(),
            heartbeat: default_heartbeat(),
        }
    }
}

fn default_greeting() -> String {
    "hello".to_string()
}

fn default_heartbeat() -> String {
    "0 */5 * * * *".to_string()
}
