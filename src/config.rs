use tracing::warn;

/// Environment variable read by [`TriggerConfig::from_env`].
pub const OFFLOAD_THRESHOLD_ENV_VAR: &str = "TASK_PAYLOAD_OFFLOAD_THRESHOLD";

const DEFAULT_OFFLOAD_THRESHOLD: usize = 512 * 1024;

/// Configuration for the trigger pipeline.
#[derive(Debug, Clone)]
pub struct TriggerConfig {
    /// Serialized payloads larger than this many bytes are uploaded to
    /// object storage instead of being stored inline on the run.
    pub payload_offload_threshold: usize,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            payload_offload_threshold: DEFAULT_OFFLOAD_THRESHOLD,
        }
    }
}

impl TriggerConfig {
    /// Build a configuration from the process environment, falling back to
    /// defaults for unset or unparseable values.
    pub fn from_env() -> Self {
        let payload_offload_threshold = match std::env::var(OFFLOAD_THRESHOLD_ENV_VAR) {
            Ok(raw) => match raw.parse() {
                Ok(value) => value,
                Err(_) => {
                    warn!(
                        value = %raw,
                        "ignoring unparseable {OFFLOAD_THRESHOLD_ENV_VAR}, using default"
                    );
                    DEFAULT_OFFLOAD_THRESHOLD
                }
            },
            Err(_) => DEFAULT_OFFLOAD_THRESHOLD,
        };

        Self {
            payload_offload_threshold,
        }
    }
}
