//! Configuration for the orchestration core
//!
//! Provides:
//! - `Parameters` — the per-turn snapshot (model, sampling, tools, memory)
//! - `MemorySettings` / `RerankWeights` — context assembly knobs
//! - `AgentConfig` — turn lifecycle limits (tool rounds, approval timeout, retry)
//! - `OrchestratorConfig` — everything above plus the tool policy, persisted
//!   as camelCase JSON

use crate::error::ConfigError;
use crate::retry::RetryConfig;
use crate::tools::policy::ToolPolicy;
use crate::types::ToolDefinition;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Maximum number of model round trips with tool calls in one turn
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 8;

/// Approval wait before a call is denied with reason `timeout`
pub const DEFAULT_APPROVAL_TIMEOUT_MS: u64 = 30_000;

// ============================================================================
// Memory Settings
// ============================================================================

/// Weights of the long-term re-ranking score
///
/// `score = similarity·w_sim + recency·w_rec + same_thread·w_thread`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankWeights {
    pub similarity: f32,
    pub recency: f32,
    pub same_thread: f32,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            similarity: 0.75,
            recency: 0.20,
            same_thread: 0.05,
        }
    }
}

/// Context assembly settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySettings {
    /// Size of the recency window (items taken before the new input)
    pub max_context_messages: usize,

    /// Whether long-term vector retrieval runs at all
    pub use_vector_store: bool,

    /// Number of candidates requested from the vector index
    pub retrieval_top_k: usize,

    /// Candidates below this cosine similarity are discarded
    pub retrieval_min_similarity: f32,

    pub rerank_weights: RerankWeights,

    /// Age at which the recency score halves
    pub recency_half_life_secs: u64,

    /// Optional token budget for the assembled context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,

    /// Prepend the conversation summary as a system item
    pub include_summary: bool,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            max_context_messages: 20,
            use_vector_store: true,
            retrieval_top_k: 5,
            retrieval_min_similarity: 0.3,
            rerank_weights: RerankWeights::default(),
            recency_half_life_secs: 7 * 24 * 3600,
            max_context_tokens: None,
            include_summary: true,
        }
    }
}

impl MemorySettings {
    /// Recency window only; retrieval disabled
    pub fn recency_only(max_context_messages: usize) -> Self {
        Self {
            max_context_messages,
            use_vector_store: false,
            ..Default::default()
        }
    }

    /// Whether steps 2–4 of assembly (embed, query, re-rank) run
    pub fn retrieval_enabled(&self) -> bool {
        self.use_vector_store && self.retrieval_top_k > 0
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Sampling settings forwarded to the provider untouched
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Resolved settings for one turn
///
/// The agent clones its current parameters at turn start; changes made with
/// `Agent::set_parameters` apply to the next turn only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameters {
    /// Provider model id
    pub model: String,

    #[serde(default)]
    pub sampling: SamplingSettings,

    /// Functions advertised to the model
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,

    #[serde(default)]
    pub memory: MemorySettings,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Parameters {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            sampling: SamplingSettings::default(),
            tools: Vec::new(),
            memory: MemorySettings::default(),
            system_prompt: None,
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_memory(mut self, memory: MemorySettings) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

impl Default for Parameters {
    fn default() -> Self {
        Self::new("default")
    }
}

// ============================================================================
// Agent Configuration
// ============================================================================

/// Turn lifecycle limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Tool rounds allowed per turn before `ToolLoopExceeded`
    pub max_tool_rounds: usize,

    /// How long a call waits in `AwaitingApproval`
    pub approval_timeout_ms: u64,

    /// Retry policy for transient provider failures (disabled by default)
    pub retry: RetryConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            approval_timeout_ms: DEFAULT_APPROVAL_TIMEOUT_MS,
            retry: RetryConfig::disabled(),
        }
    }
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Complete orchestrator configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub agent: AgentConfig,

    /// Default per-turn parameters
    #[serde(default)]
    pub parameters: Parameters,

    /// Tool approval policy table
    #[serde(default)]
    pub tool_policy: ToolPolicy,
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;

        std::fs::write(path, content).map_err(io_err)?;
        Ok(())
    }

    /// Reject values the core cannot honor
    pub fn validate(&self) -> Result<(), ConfigError> {
        let memory = &self.parameters.memory;
        if !(-1.0..=1.0).contains(&memory.retrieval_min_similarity) {
            return Err(ConfigError::Invalid(format!(
                "retrievalMinSimilarity must be within [-1, 1], got {}",
                memory.retrieval_min_similarity
            )));
        }
        let w = memory.rerank_weights;
        if w.similarity < 0.0 || w.recency < 0.0 || w.same_thread < 0.0 {
            return Err(ConfigError::Invalid(
                "rerankWeights must be non-negative".to_string(),
            ));
        }
        if memory.recency_half_life_secs == 0 {
            return Err(ConfigError::Invalid(
                "recencyHalfLifeSecs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::policy::PolicyAction;

    #[test]
    fn test_memory_settings_defaults() {
        let settings = MemorySettings::default();
        assert_eq!(settings.max_context_messages, 20);
        assert!(settings.retrieval_enabled());
        assert_eq!(settings.rerank_weights, RerankWeights::default());
        assert!((settings.rerank_weights.similarity - 0.75).abs() < f32::EPSILON);
    }

    #[test]
    fn test_retrieval_disabled_by_top_k_or_flag() {
        let mut settings = MemorySettings::default();
        settings.retrieval_top_k = 0;
        assert!(!settings.retrieval_enabled());

        assert!(!MemorySettings::recency_only(10).retrieval_enabled());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{
            "agent": { "maxToolRounds": 3 },
            "parameters": {
                "model": "gpt-test",
                "memory": { "retrievalTopK": 0 }
            },
            "toolPolicy": { "rules": { "get_*": "auto_approve" }, "default": "require_approval" }
        }"#;
        let config: OrchestratorConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.agent.max_tool_rounds, 3);
        assert_eq!(config.agent.approval_timeout_ms, DEFAULT_APPROVAL_TIMEOUT_MS);
        assert_eq!(config.parameters.model, "gpt-test");
        assert_eq!(config.parameters.memory.retrieval_top_k, 0);
        assert_eq!(config.parameters.memory.max_context_messages, 20);
        assert_eq!(config.tool_policy.evaluate("get_weather"), PolicyAction::AutoApprove);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("orchestrator.json");

        let mut config = OrchestratorConfig::new();
        config.parameters = Parameters::new("model-x").with_system_prompt("be brief");
        config.agent.max_tool_rounds = 4;
        config.save_to_file(&path).unwrap();

        let loaded = OrchestratorConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("maxToolRounds"));
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.json");
        assert!(matches!(
            OrchestratorConfig::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));

        let broken = dir.path().join("broken.json");
        std::fs::write(&broken, "{ not json").unwrap();
        assert!(matches!(
            OrchestratorConfig::from_file(&broken),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = OrchestratorConfig::new();
        config.parameters.memory.retrieval_min_similarity = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = OrchestratorConfig::new();
        config.parameters.memory.rerank_weights.recency = -0.1;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::new();
        config.parameters.memory.recency_half_life_secs = 0;
        assert!(config.validate().is_err());

        assert!(OrchestratorConfig::new().validate().is_ok());
    }
}
