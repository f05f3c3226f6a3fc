use std::io;
use thiserror::Error;

use crate::script::ScriptError;

/// Custom error types for the grammar generator
#[derive(Error, Debug)]
pub enum GrammarError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error on line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("Invalid grammar: {0}")]
    InvalidGrammar(String),

    #[error("Undefined non-terminal: {0}")]
    UndefinedNonterminal(String),

    #[error("Non-terminal has no alternatives: {0}")]
    EmptyNonterminal(String),

    #[error("Unsupported regex construct in {pattern:?}: {reason}")]
    UnsupportedRegexConstruct { pattern: String, reason: String },

    #[error("Recursion limit of {limit} exceeded while expanding {nonterminal}")]
    RecursionLimitExceeded { nonterminal: String, limit: usize },

    #[error("Output size limit of {limit} bytes exceeded while expanding {nonterminal}")]
    SizeLimitExceeded { nonterminal: String, limit: usize },

    #[error("Script for {nonterminal} failed: {source}")]
    ScriptExecutionFailed {
        nonterminal: String,
        #[source]
        source: ScriptError,
    },
}

impl GrammarError {
    /// Whether the error is raised while loading a grammar rather than while
    /// generating from one.
    pub fn is_load_time(&self) -> bool {
        matches!(
            self,
            GrammarError::Io(_)
                | GrammarError::Parse { .. }
                | GrammarError::InvalidGrammar(_)
                | GrammarError::UndefinedNonterminal(_)
                | GrammarError::EmptyNonterminal(_)
                | GrammarError::UnsupportedRegexConstruct { .. }
        )
    }
}

/// Result type for grammar operations
pub type Result<T> = std::result::Result<T, GrammarError>;

/// Trait extension for Option<T> to convert to GrammarError
pub trait OptionExt<T> {
    fn ok_or_grammar_err<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_grammar_err<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.ok_or_else(|| GrammarError::InvalidGrammar(f()))
    }
}
