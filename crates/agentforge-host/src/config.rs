//! Launch specs and supervisor tuning.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Launch spec for one tool-server subprocess.
///
/// Resolved by configuration loaded elsewhere; the supervisor only consumes
/// it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSpec {
    /// Unique identifier for this server.
    pub id: String,

    /// Command to launch the server process.
    pub command: String,

    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory (optional).
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for the subprocess.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Maximum concurrent invocations on this server. `1` serializes calls;
    /// unset uses the supervisor default.
    #[serde(default)]
    pub max_in_flight: Option<usize>,
}

impl ServerSpec {
    pub fn new(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            max_in_flight: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = Some(max);
        self
    }
}

/// Supervisor tuning knobs.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Deadline for the capability-discovery round trip at startup.
    pub discovery_timeout: Duration,

    /// Deadline for a `ping` health check.
    pub health_timeout: Duration,

    /// Default concurrent-invocation cap per server.
    pub max_in_flight: usize,

    /// Restart attempts before `restart` gives up.
    pub restart_attempts: u32,

    /// Backoff before the first restart retry; doubles per attempt.
    pub restart_backoff: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            discovery_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(1),
            max_in_flight: 8,
            restart_attempts: 3,
            restart_backoff: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_spec_builder() {
        let spec = ServerSpec::new("calc", "agentforge-calc-server")
            .with_args(["--verbose"])
            .with_max_in_flight(1);
        assert_eq!(spec.id, "calc");
        assert_eq!(spec.args, vec!["--verbose"]);
        assert_eq!(spec.max_in_flight, Some(1));
    }

    #[test]
    fn test_server_spec_deserialize_minimal() {
        let spec: ServerSpec =
            serde_json::from_str(r#"{"id": "echo", "command": "agentforge-echo-server"}"#).unwrap();
        assert!(spec.args.is_empty());
        assert!(spec.env.is_empty());
        assert!(spec.max_in_flight.is_none());
    }

    #[test]
    fn test_supervisor_config_defaults() {
        let config = SupervisorConfig::default();
        assert_eq!(config.max_in_flight, 8);
        assert_eq!(config.restart_attempts, 3);
    }
}
