use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::regex_gen::DEFAULT_MAX_REPEAT;
use crate::utils::{GrammarError, Result};

/// How an alternative is picked among the candidates of a non-terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// Every candidate is equally likely
    #[default]
    Uniform,
    /// Candidates are drawn in proportion to their declared weight
    Weighted,
    /// Earlier declarations are more likely: of `n` alternatives the one at
    /// index `i` weighs `n - i`
    DeclarationOrder,
}

/// Configuration options for generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Deepest nesting level a non-terminal may be expanded at; the start
    /// symbol sits at depth 0
    pub max_depth: usize,
    /// Upper bound for unbounded regex repetitions (`+`, `*`, `{n,}`)
    pub max_terminal_length: usize,
    /// Policy used to pick among alternatives
    pub selection_policy: SelectionPolicy,
    /// Seed for reproducible output; fresh entropy when absent
    pub seed: Option<u64>,
    /// Optional cap on the bytes emitted by literal text and terminals
    pub max_output_size: Option<usize>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            max_depth: 100,
            max_terminal_length: DEFAULT_MAX_REPEAT,
            selection_policy: SelectionPolicy::Uniform,
            seed: None,
            max_output_size: None,
        }
    }
}

impl GeneratorConfig {
    /// Load a configuration from a JSON file; missing fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| GrammarError::InvalidGrammar(format!("bad generator config: {}", e)))
    }

    /// Set the seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the maximum depth
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the selection policy
    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.selection_policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: GeneratorConfig =
            serde_json::from_str(r#"{"max_depth": 12, "selection_policy": "declaration-order"}"#)
                .unwrap();
        assert_eq!(config.max_depth, 12);
        assert_eq!(config.selection_policy, SelectionPolicy::DeclarationOrder);
        assert_eq!(config.max_terminal_length, DEFAULT_MAX_REPEAT);
        assert_eq!(config.seed, None);
    }

    #[test]
    fn test_builder_methods() {
        let config = GeneratorConfig::default()
            .with_seed(42)
            .with_max_depth(3)
            .with_policy(SelectionPolicy::Weighted);
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.selection_policy, SelectionPolicy::Weighted);
    }
}
