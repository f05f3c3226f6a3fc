use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::GeneratorConfig;
use crate::generator::Generator;
use crate::output::Artifact;
use crate::regex_gen::RegexTerminal;
use crate::script::{Combinator, FnCombinator, ScriptResult};
use crate::utils::{GrammarError, Result};

/// Represents a piece of a literal template
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    /// Literal bytes copied verbatim
    Text(Vec<u8>),
    /// A `{NAME}` placeholder (reference to another rule)
    NonTerminal(String),
}

/// A script production: child non-terminals and the combinator merging them
#[derive(Debug, Clone)]
pub struct Script {
    children: Vec<String>,
    combinator: Arc<dyn Combinator>,
}

impl Script {
    /// The child non-terminals, in the order their values reach the combinator
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// The combinator
    pub fn combinator(&self) -> &dyn Combinator {
        self.combinator.as_ref()
    }
}

/// One way of expanding a non-terminal
#[derive(Debug, Clone)]
pub enum Production {
    /// Template text with embedded placeholders
    Literal(Vec<Element>),
    /// A regular expression synthesized afresh on every expansion
    Regex(RegexTerminal),
    /// A combinator applied to freshly generated child values
    Script(Script),
}

impl Production {
    /// Parse a literal template.
    ///
    /// `{NAME}` refers to another non-terminal, `\{` and `\}` stand for literal
    /// braces. Everything else, line terminators included, is kept verbatim.
    pub fn literal<T: AsRef<[u8]>>(template: T) -> Result<Self> {
        Ok(Production::Literal(parse_template(template.as_ref())?))
    }

    /// Compile a regex terminal
    pub fn regex(pattern: &str) -> Result<Self> {
        Ok(Production::Regex(RegexTerminal::new(pattern)?))
    }

    /// Build a script production, checking the combinator accepts the children
    pub fn script(children: &[&str], combinator: Arc<dyn Combinator>) -> Result<Self> {
        if !combinator.accepts(children.len()) {
            return Err(GrammarError::InvalidGrammar(format!(
                "combinator {} cannot take {} children",
                combinator.name(),
                children.len()
            )));
        }
        for child in children {
            check_name(child)?;
        }

        Ok(Production::Script(Script {
            children: children.iter().map(|c| c.to_string()).collect(),
            combinator,
        }))
    }

    /// The non-terminals this production refers to, in expansion order
    pub fn references(&self) -> Vec<&str> {
        match self {
            Production::Literal(elements) => elements
                .iter()
                .filter_map(|e| match e {
                    Element::NonTerminal(name) => Some(name.as_str()),
                    Element::Text(_) => None,
                })
                .collect(),
            Production::Regex(_) => Vec::new(),
            Production::Script(script) => script.children.iter().map(String::as_str).collect(),
        }
    }
}

/// A production together with its selection metadata
#[derive(Debug, Clone)]
pub struct Alternative {
    production: Production,
    weight: u32,
    min_height: Option<usize>,
}

impl Alternative {
    pub fn production(&self) -> &Production {
        &self.production
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Fewest non-terminal levels a derivation through this alternative
    /// needs, counting the owning non-terminal; `None` if no derivation ends
    pub fn min_height(&self) -> Option<usize> {
        self.min_height
    }
}

/// All alternatives of one non-terminal
#[derive(Debug, Clone)]
pub struct Rule {
    alternatives: Vec<Alternative>,
    min_height: Option<usize>,
}

impl Rule {
    pub fn alternatives(&self) -> &[Alternative] {
        &self.alternatives
    }

    /// Smallest `min_height` over the alternatives
    pub fn min_height(&self) -> Option<usize> {
        self.min_height
    }
}

/// A validated, read-only grammar.
///
/// Built once by [`GrammarBuilder::build`]; every reference resolves and every
/// non-terminal has at least one alternative. It can be shared freely between
/// threads.
#[derive(Debug, Clone)]
pub struct Grammar {
    /// The rules mapping non-terminals to alternatives
    rules: HashMap<String, Rule>,
}

impl Grammar {
    /// Start building a grammar
    pub fn builder() -> GrammarBuilder {
        GrammarBuilder::new()
    }

    /// The alternatives of a non-terminal
    pub fn lookup(&self, name: &str) -> Result<&[Alternative]> {
        self.rules
            .get(name)
            .map(|rule| rule.alternatives.as_slice())
            .ok_or_else(|| GrammarError::UndefinedNonterminal(name.to_string()))
    }

    /// The rule of a non-terminal, if defined
    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    /// Check if the grammar contains a specific non-terminal
    pub fn has_non_terminal(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Names of all non-terminals, sorted
    pub fn non_terminals(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.rules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of non-terminals
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Generate one artifact starting from `start`
    pub fn generate(&self, start: &str, config: &GeneratorConfig) -> Result<Artifact> {
        Generator::new(self, config.clone()).generate(start)
    }
}

/// Builder for constructing Grammar instances.
///
/// The `define_*` methods report errors immediately; the chaining methods
/// (`literal`, `regex`, ...) remember the first error and return it from
/// [`build`](GrammarBuilder::build).
#[derive(Debug, Default)]
pub struct GrammarBuilder {
    rules: HashMap<String, Vec<Alternative>>,
    errors: Vec<GrammarError>,
}

impl GrammarBuilder {
    /// Create a new, empty grammar builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a non-terminal without alternatives.
    ///
    /// Building fails with `EmptyNonterminal` unless alternatives are added later.
    pub fn declare(&mut self, non_terminal: &str) -> Result<&mut Self> {
        check_name(non_terminal)?;
        self.rules.entry(non_terminal.to_string()).or_default();
        Ok(self)
    }

    /// Add an alternative with weight 1
    pub fn define(&mut self, non_terminal: &str, production: Production) -> Result<&mut Self> {
        self.define_weighted(non_terminal, production, 1)
    }

    /// Add an alternative with an explicit selection weight
    pub fn define_weighted(
        &mut self,
        non_terminal: &str,
        production: Production,
        weight: u32,
    ) -> Result<&mut Self> {
        check_name(non_terminal)?;
        if weight == 0 {
            return Err(GrammarError::InvalidGrammar(format!(
                "alternative of {} has weight 0",
                non_terminal
            )));
        }

        self.rules
            .entry(non_terminal.to_string())
            .or_default()
            .push(Alternative {
                production,
                weight,
                min_height: None,
            });
        Ok(self)
    }

    /// Add a literal template alternative
    pub fn define_literal<T: AsRef<[u8]>>(
        &mut self,
        non_terminal: &str,
        template: T,
    ) -> Result<&mut Self> {
        self.define(non_terminal, Production::literal(template)?)
    }

    /// Add a regex terminal alternative
    pub fn define_regex(&mut self, non_terminal: &str, pattern: &str) -> Result<&mut Self> {
        self.define(non_terminal, Production::regex(pattern)?)
    }

    /// Add a script alternative backed by a closure taking `children.len()` values
    pub fn define_script<F>(
        &mut self,
        non_terminal: &str,
        children: &[&str],
        func: F,
    ) -> Result<&mut Self>
    where
        F: Fn(&[Vec<u8>]) -> ScriptResult + Send + Sync + 'static,
    {
        let combinator = FnCombinator::new(non_terminal, children.len(), func);
        self.define_combinator(non_terminal, children, Arc::new(combinator))
    }

    /// Add a script alternative backed by a shared combinator
    pub fn define_combinator(
        &mut self,
        non_terminal: &str,
        children: &[&str],
        combinator: Arc<dyn Combinator>,
    ) -> Result<&mut Self> {
        self.define(non_terminal, Production::script(children, combinator)?)
    }

    /// Add a literal template alternative
    pub fn literal<T: AsRef<[u8]>>(mut self, non_terminal: &str, template: T) -> Self {
        let result = self.define_literal(non_terminal, template).map(|_| ());
        self.defer(result)
    }

    /// Add a weighted literal template alternative
    pub fn weighted_literal<T: AsRef<[u8]>>(
        mut self,
        non_terminal: &str,
        template: T,
        weight: u32,
    ) -> Self {
        let result = Production::literal(template)
            .and_then(|p| self.define_weighted(non_terminal, p, weight).map(|_| ()));
        self.defer(result)
    }

    /// Add a regex terminal alternative
    pub fn regex(mut self, non_terminal: &str, pattern: &str) -> Self {
        let result = self.define_regex(non_terminal, pattern).map(|_| ());
        self.defer(result)
    }

    /// Add a script alternative backed by a closure
    pub fn script<F>(mut self, non_terminal: &str, children: &[&str], func: F) -> Self
    where
        F: Fn(&[Vec<u8>]) -> ScriptResult + Send + Sync + 'static,
    {
        let result = self.define_script(non_terminal, children, func).map(|_| ());
        self.defer(result)
    }

    /// Add a script alternative backed by a shared combinator
    pub fn combinator(
        mut self,
        non_terminal: &str,
        children: &[&str],
        combinator: Arc<dyn Combinator>,
    ) -> Self {
        let result = self
            .define_combinator(non_terminal, children, combinator)
            .map(|_| ());
        self.defer(result)
    }

    fn defer(mut self, result: Result<()>) -> Self {
        if let Err(err) = result {
            self.errors.push(err);
        }
        self
    }

    /// Check if a non-terminal has been defined or declared
    pub fn has_non_terminal(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Validate and freeze the grammar.
    ///
    /// Checks run in sorted name order so the reported error is stable.
    pub fn build(self) -> Result<Grammar> {
        let GrammarBuilder { rules, errors } = self;
        if let Some(err) = errors.into_iter().next() {
            return Err(err);
        }

        let mut names: Vec<&String> = rules.keys().collect();
        names.sort_unstable();

        for name in &names {
            if rules[*name].is_empty() {
                return Err(GrammarError::EmptyNonterminal(name.to_string()));
            }
        }
        for name in &names {
            for alternative in &rules[*name] {
                if let Some(missing) = alternative
                    .production
                    .references()
                    .into_iter()
                    .find(|r| !rules.contains_key(*r))
                {
                    return Err(GrammarError::UndefinedNonterminal(missing.to_string()));
                }
            }
        }

        let heights = min_heights(&rules);
        for name in &names {
            if !heights.contains_key(*name) {
                warn!(non_terminal = %name, "non-terminal has no finite derivation");
            }
        }

        let rules: HashMap<String, Rule> = rules
            .into_iter()
            .map(|(name, alternatives)| {
                let alternatives: Vec<Alternative> = alternatives
                    .into_iter()
                    .map(|mut alt| {
                        alt.min_height = production_height(&alt.production, &heights);
                        alt
                    })
                    .collect();
                let min_height = heights.get(&name).copied();
                (
                    name,
                    Rule {
                        alternatives,
                        min_height,
                    },
                )
            })
            .collect();

        debug!(non_terminals = rules.len(), "grammar built");
        Ok(Grammar { rules })
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GrammarError::InvalidGrammar(
            "non-terminal name is empty".to_string(),
        ));
    }
    Ok(())
}

fn is_placeholder_name(name: &[u8]) -> bool {
    match name.split_first() {
        Some((first, rest)) => {
            (first.is_ascii_alphabetic() || *first == b'_')
                && rest
                    .iter()
                    .all(|b| b.is_ascii_alphanumeric() || *b == b'_' || *b == b'-')
        }
        None => false,
    }
}

fn parse_template(template: &[u8]) -> Result<Vec<Element>> {
    let mut elements = Vec::new();
    let mut text = Vec::new();
    let mut pos = 0;

    while pos < template.len() {
        match template[pos] {
            b'\\' if matches!(template.get(pos + 1), Some(b'{' | b'}')) => {
                text.push(template[pos + 1]);
                pos += 2;
            }
            b'{' => {
                let len = template[pos + 1..]
                    .iter()
                    .position(|&b| b == b'}')
                    .ok_or_else(|| {
                        GrammarError::InvalidGrammar(format!(
                            "unterminated placeholder in template {:?}",
                            String::from_utf8_lossy(template)
                        ))
                    })?;
                let name = &template[pos + 1..pos + 1 + len];
                if !is_placeholder_name(name) {
                    return Err(GrammarError::InvalidGrammar(format!(
                        "malformed placeholder {{{}}}",
                        String::from_utf8_lossy(name)
                    )));
                }
                if !text.is_empty() {
                    elements.push(Element::Text(std::mem::take(&mut text)));
                }
                elements.push(Element::NonTerminal(
                    String::from_utf8_lossy(name).into_owned(),
                ));
                pos += len + 2;
            }
            byte => {
                text.push(byte);
                pos += 1;
            }
        }
    }

    if !text.is_empty() {
        elements.push(Element::Text(text));
    }
    Ok(elements)
}

fn production_height(production: &Production, heights: &HashMap<String, usize>) -> Option<usize> {
    production
        .references()
        .into_iter()
        .try_fold(0, |deepest, name| heights.get(name).map(|&h| deepest.max(h)))
        .map(|deepest| deepest + 1)
}

// Heights only ever shrink, so the fixpoint is reached after at most one pass
// per non-terminal.
fn min_heights(rules: &HashMap<String, Vec<Alternative>>) -> HashMap<String, usize> {
    let mut heights: HashMap<String, usize> = HashMap::new();
    loop {
        let mut changed = false;
        for (name, alternatives) in rules {
            let best = alternatives
                .iter()
                .filter_map(|alt| production_height(&alt.production, &heights))
                .min();
            if let Some(height) = best {
                if heights.get(name).is_none_or(|&old| height < old) {
                    heights.insert(name.clone(), height);
                    changed = true;
                }
            }
        }
        if !changed {
            return heights;
        }
    }
}
