//! Server settings read from the client's `initializationOptions`.

use serde::Deserialize;

const DEFAULT_DEBOUNCE_MS: u64 = 50;
const DEFAULT_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Quiet period before queued diagnostics run.
    pub debounce_ms: u64,
    pub evaluate: EvaluateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            evaluate: EvaluateConfig::default(),
        }
    }
}

/// How to run `docker buildx bake --print` when a target's build file
/// depends on inheritance or expressions.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EvaluateConfig {
    pub enabled: bool,
    pub docker: String,
    pub timeout_ms: u64,
}

impl Default for EvaluateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            docker: "docker".to_string(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl Config {
    /// Read settings, falling back to the defaults when they are absent or
    /// malformed.
    #[must_use]
    pub fn from_initialization_options(options: Option<&serde_json::Value>) -> Self {
        let Some(options) = options.filter(|o| !o.is_null()) else {
            return Self::default();
        };
        match Self::deserialize(options) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(%error, "ignoring malformed initialization options");
                Self::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn absent_options_use_defaults() {
        assert_eq!(Config::from_initialization_options(None), Config::default());
        assert_eq!(
            Config::from_initialization_options(Some(&serde_json::Value::Null)),
            Config::default()
        );
    }

    #[test]
    fn partial_options_keep_other_defaults() {
        let options = json!({ "debounceMs": 10, "evaluate": { "enabled": false } });
        let config = Config::from_initialization_options(Some(&options));
        assert_eq!(config.debounce_ms, 10);
        assert!(!config.evaluate.enabled);
        assert_eq!(config.evaluate.docker, "docker");
        assert_eq!(config.evaluate.timeout_ms, 5000);
    }

    #[test]
    fn malformed_options_fall_back() {
        let options = json!({ "debounceMs": "soon" });
        assert_eq!(
            Config::from_initialization_options(Some(&options)),
            Config::default()
        );
    }
}
