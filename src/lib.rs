//! Grammar-Synth is a grammar-driven generator of random structured inputs.
//!
//! A grammar maps non-terminals to alternative productions of three kinds:
//! literal templates with `{NAME}` placeholders, regular expressions that are
//! synthesized into matching strings, and scripts that combine the generated
//! values of child non-terminals with a function. Generation expands a start
//! symbol into bytes under a depth bound, so grammars may freely refer to
//! themselves.
//!
//! # Example
//!
//! ```rust
//! use grammar_synth::{generate, GeneratorConfig, GrammarBuilder};
//!
//! let grammar = GrammarBuilder::new()
//!     .literal("START", "<document>{XML_CONTENT}</document>")
//!     .literal("XML_CONTENT", "{XML}{XML_CONTENT}")
//!     .literal("XML_CONTENT", "")
//!     .script("XML", &["TAG", "XML_CONTENT"], |values| {
//!         let tag = String::from_utf8_lossy(&values[0]);
//!         let body = String::from_utf8_lossy(&values[1]);
//!         Ok(format!("<{0}>{1}</{0}>", tag, body).into_bytes())
//!     })
//!     .literal("TAG", "item")
//!     .regex("TAG", "[a-z]+")
//!     .build()?;
//!
//! let config = GeneratorConfig::default().with_seed(42).with_max_depth(8);
//! let artifact = generate(&grammar, "START", &config)?;
//! assert!(artifact.to_string_lossy().starts_with("<document>"));
//! # Ok::<(), grammar_synth::GrammarError>(())
//! ```

pub mod config;
pub mod generator;
pub mod grammar;
pub mod loader;
pub mod output;
pub mod regex_gen;
pub mod script;
pub mod utils;

pub use config::{GeneratorConfig, SelectionPolicy};
pub use generator::{DerivationStats, Generator, generate};
pub use grammar::{Grammar, GrammarBuilder};
pub use output::Artifact;
pub use utils::{GrammarError, Result};

// Re-export common enums and structs
pub use grammar::{Alternative, Element, Production, Rule, Script};
pub use regex_gen::RegexTerminal;
pub use script::{
    Combinator, CombinatorRegistry, FnCombinator, ScriptError, default_combinator_registry,
};
