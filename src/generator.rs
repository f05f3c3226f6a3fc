//! Randomized expansion of a start symbol into bytes.
//!
//! Every `generate` call owns a fresh derivation context holding the random
//! generator and the size bookkeeping, plus a stack of pending productions
//! whose height is the current depth; the grammar is only read. Near the
//! depth bound, selection is restricted to alternatives whose shortest
//! derivation still fits, so self-referential rules with a terminating
//! alternative always finish. The depth check itself stays as the hard stop for
//! rules that cannot terminate at all.

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::config::{GeneratorConfig, SelectionPolicy};
use crate::grammar::{Alternative, Element, Grammar, Production, Script};
use crate::output::Artifact;
use crate::utils::{GrammarError, Result};

/// Counters collected over one derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DerivationStats {
    /// Seed the derivation's random generator was created from
    pub seed: u64,
    /// Deepest level a non-terminal was expanded at
    pub deepest: usize,
    /// Bytes emitted by literal text and regex terminals
    pub emitted: usize,
    /// Number of non-terminals expanded
    pub expansions: usize,
}

struct DerivationContext {
    rng: StdRng,
    stats: DerivationStats,
}

impl DerivationContext {
    fn new(seed: u64) -> Self {
        DerivationContext {
            rng: StdRng::seed_from_u64(seed),
            stats: DerivationStats {
                seed,
                ..DerivationStats::default()
            },
        }
    }
}

/// Expands non-terminals of a grammar under a configuration
#[derive(Debug, Clone)]
pub struct Generator<'g> {
    grammar: &'g Grammar,
    config: GeneratorConfig,
}

impl<'g> Generator<'g> {
    pub fn new(grammar: &'g Grammar, config: GeneratorConfig) -> Self {
        Generator { grammar, config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generate one artifact from `start`
    pub fn generate(&self, start: &str) -> Result<Artifact> {
        self.generate_with_stats(start).map(|(artifact, _)| artifact)
    }

    /// Generate one artifact and report how the derivation went
    pub fn generate_with_stats(&self, start: &str) -> Result<(Artifact, DerivationStats)> {
        let seed = self.config.seed.unwrap_or_else(rand::random);
        self.generate_with_seed(start, seed)
    }

    /// Generate `count` artifacts; sample `i` uses seed `seed + i`
    pub fn generate_many(&self, start: &str, count: usize) -> Result<Vec<Artifact>> {
        let base = self.config.seed.unwrap_or_else(rand::random);
        (0..count as u64)
            .map(|i| {
                self.generate_with_seed(start, base.wrapping_add(i))
                    .map(|(artifact, _)| artifact)
            })
            .collect()
    }

    /// Generate one artifact from an explicit seed
    pub fn generate_with_seed(
        &self,
        start: &str,
        seed: u64,
    ) -> Result<(Artifact, DerivationStats)> {
        debug!(start, seed, max_depth = self.config.max_depth, "generating");
        let mut ctx = DerivationContext::new(seed);
        let value = self.derive(start, &mut ctx)?;
        debug!(
            start,
            bytes = value.len(),
            deepest = ctx.stats.deepest,
            expansions = ctx.stats.expansions,
            "generated"
        );
        Ok((Artifact::new(value), ctx.stats))
    }

    /// Expand `start` to bytes.
    ///
    /// Pending productions live on a heap stack of frames, one per level, so
    /// `max_depth` bounds memory use rather than native stack use. The frame at
    /// index `d` belongs to a non-terminal expanded at depth `d`.
    fn derive<'a>(&'a self, start: &'a str, ctx: &mut DerivationContext) -> Result<Vec<u8>> {
        let mut stack: Vec<Frame<'a>> = Vec::new();
        let mut step = Step::Enter(start);

        loop {
            step = match step {
                Step::Enter(name) => match self.enter(name, stack.len(), ctx)? {
                    Entered::Value(value) => Step::Return(value),
                    Entered::Frame(frame) => {
                        stack.push(frame);
                        self.advance(&mut stack, ctx)?
                    }
                },
                Step::Return(value) => match stack.last_mut() {
                    None => return Ok(value),
                    Some(frame) => {
                        frame.accept(value);
                        self.advance(&mut stack, ctx)?
                    }
                },
            };
        }
    }

    fn enter<'a>(
        &'a self,
        name: &'a str,
        depth: usize,
        ctx: &mut DerivationContext,
    ) -> Result<Entered<'a>> {
        if depth > self.config.max_depth {
            return Err(GrammarError::RecursionLimitExceeded {
                nonterminal: name.to_string(),
                limit: self.config.max_depth,
            });
        }
        ctx.stats.expansions += 1;
        ctx.stats.deepest = ctx.stats.deepest.max(depth);

        let alternatives = self.grammar.lookup(name)?;
        if alternatives.is_empty() {
            return Err(GrammarError::EmptyNonterminal(name.to_string()));
        }
        let alternative = self.select(alternatives, depth, ctx)?;
        trace!(non_terminal = name, depth, "expanding");

        Ok(match alternative.production() {
            Production::Literal(elements) => Entered::Frame(Frame::Literal {
                name,
                elements,
                next: 0,
                out: Vec::new(),
            }),
            Production::Regex(terminal) => {
                let value = terminal.synthesize(&mut ctx.rng, self.config.max_terminal_length);
                self.consume(name, value.len(), ctx)?;
                Entered::Value(value)
            }
            Production::Script(script) => Entered::Frame(Frame::Script {
                name,
                script,
                values: Vec::with_capacity(script.children().len()),
            }),
        })
    }

    /// Move the top frame forward until it needs a child or is complete
    fn advance<'a>(
        &self,
        stack: &mut Vec<Frame<'a>>,
        ctx: &mut DerivationContext,
    ) -> Result<Step<'a>> {
        let Some(frame) = stack.last_mut() else {
            return Err(GrammarError::InvalidGrammar("derivation stack is empty".to_string()));
        };

        match frame {
            Frame::Literal {
                name,
                elements,
                next,
                out,
            } => {
                let name: &'a str = *name;
                let elements: &'a [Element] = *elements;
                while let Some(element) = elements.get(*next) {
                    *next += 1;
                    match element {
                        Element::Text(text) => {
                            self.consume(name, text.len(), ctx)?;
                            out.extend_from_slice(text);
                        }
                        Element::NonTerminal(child) => return Ok(Step::Enter(child)),
                    }
                }
                let value = std::mem::take(out);
                stack.pop();
                Ok(Step::Return(value))
            }
            Frame::Script {
                name,
                script,
                values,
            } => {
                let name: &'a str = *name;
                let script: &'a Script = *script;
                if let Some(child) = script.children().get(values.len()) {
                    return Ok(Step::Enter(child));
                }
                let values = std::mem::take(values);
                stack.pop();

                let value = run_script(name, script, &values)?;
                // Child bytes were already counted; only growth is charged.
                let input: usize = values.iter().map(Vec::len).sum();
                self.consume(name, value.len().saturating_sub(input), ctx)?;
                Ok(Step::Return(value))
            }
        }
    }

    /// Pick an alternative among those that can still finish within the
    /// remaining depth; all of them when none can.
    fn select<'a>(
        &self,
        alternatives: &'a [Alternative],
        depth: usize,
        ctx: &mut DerivationContext,
    ) -> Result<&'a Alternative> {
        let remaining = self.config.max_depth - depth + 1;
        let mut candidates: Vec<(usize, &Alternative)> = alternatives
            .iter()
            .enumerate()
            .filter(|(_, alt)| alt.min_height().is_some_and(|h| h <= remaining))
            .collect();
        if candidates.is_empty() {
            candidates = alternatives.iter().enumerate().collect();
        }
        if candidates.len() == 1 {
            return Ok(candidates[0].1);
        }

        let pick = match self.config.selection_policy {
            SelectionPolicy::Uniform => ctx.rng.gen_range(0..candidates.len()),
            SelectionPolicy::Weighted => {
                weighted_pick(candidates.iter().map(|(_, alt)| alt.weight()), &mut ctx.rng)?
            }
            SelectionPolicy::DeclarationOrder => {
                let count = alternatives.len();
                weighted_pick(
                    candidates.iter().map(|(index, _)| (count - index) as u32),
                    &mut ctx.rng,
                )?
            }
        };
        Ok(candidates[pick].1)
    }

    fn consume(&self, name: &str, bytes: usize, ctx: &mut DerivationContext) -> Result<()> {
        ctx.stats.emitted += bytes;
        match self.config.max_output_size {
            Some(limit) if ctx.stats.emitted > limit => Err(GrammarError::SizeLimitExceeded {
                nonterminal: name.to_string(),
                limit,
            }),
            _ => Ok(()),
        }
    }
}

enum Step<'a> {
    Enter(&'a str),
    Return(Vec<u8>),
}

enum Entered<'a> {
    Value(Vec<u8>),
    Frame(Frame<'a>),
}

/// A production whose children are still being expanded
enum Frame<'a> {
    Literal {
        name: &'a str,
        elements: &'a [Element],
        next: usize,
        out: Vec<u8>,
    },
    Script {
        name: &'a str,
        script: &'a Script,
        values: Vec<Vec<u8>>,
    },
}

impl Frame<'_> {
    fn accept(&mut self, value: Vec<u8>) {
        match self {
            Frame::Literal { out, .. } => out.extend_from_slice(&value),
            Frame::Script { values, .. } => values.push(value),
        }
    }
}

fn weighted_pick<I>(weights: I, rng: &mut StdRng) -> Result<usize>
where
    I: IntoIterator<Item = u32>,
{
    let dist = WeightedIndex::new(weights)
        .map_err(|e| GrammarError::InvalidGrammar(format!("bad alternative weights: {}", e)))?;
    Ok(dist.sample(rng))
}

fn run_script(name: &str, script: &Script, values: &[Vec<u8>]) -> Result<Vec<u8>> {
    let combinator = script.combinator();
    if !combinator.accepts(values.len()) {
        return Err(GrammarError::ScriptExecutionFailed {
            nonterminal: name.to_string(),
            source: format!(
                "combinator {} cannot take {} values",
                combinator.name(),
                values.len()
            )
            .into(),
        });
    }

    combinator
        .combine(values)
        .map_err(|source| GrammarError::ScriptExecutionFailed {
            nonterminal: name.to_string(),
            source,
        })
}

/// Expand `start` in `grammar` once
pub fn generate(grammar: &Grammar, start: &str, config: &GeneratorConfig) -> Result<Artifact> {
    Generator::new(grammar, config.clone()).generate(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::GrammarBuilder;
    use pretty_assertions::assert_eq;

    fn count(samples: &[Artifact], word: &str) -> usize {
        samples
            .iter()
            .filter(|s| s.as_bytes() == word.as_bytes())
            .count()
    }

    fn doubling_grammar() -> Grammar {
        GrammarBuilder::new()
            .literal("START", "{A}")
            .literal("A", "x")
            .literal("A", "{A}{A}")
            .build()
            .unwrap()
    }

    #[test]
    fn test_doubling_grammar_is_bounded() {
        let grammar = doubling_grammar();
        let config = GeneratorConfig::default().with_max_depth(3).with_seed(42);
        let generator = Generator::new(&grammar, config);

        let (artifact, stats) = generator.generate_with_stats("START").unwrap();
        assert!(!artifact.is_empty());
        assert!(artifact.len() <= 1 << 3);
        assert!(artifact.as_bytes().iter().all(|&b| b == b'x'));
        assert!(stats.deepest <= 3);
        assert_eq!(stats.seed, 42);

        // Same seed, same bytes.
        assert_eq!(generator.generate("START").unwrap(), artifact);
    }

    #[test]
    fn test_no_placeholders_survive() {
        let grammar = GrammarBuilder::new()
            .literal("START", "{FROM}\n{TO}")
            .literal("FROM", "From: {ADDRESS}")
            .literal("TO", "To: {ADDRESS}")
            .literal("ADDRESS", "{USER}@{DOMAIN}.com")
            .regex("USER", "[a-zA-Z0-9]+")
            .regex("DOMAIN", "[a-zA-Z0-9]+")
            .build()
            .unwrap();

        let generator = Generator::new(&grammar, GeneratorConfig::default());
        for artifact in generator.generate_many("START", 50).unwrap() {
            let text = artifact.to_string_lossy().into_owned();
            assert!(!text.contains('{') && !text.contains('}'), "{}", text);
            assert!(text.starts_with("From: "));
            assert!(text.contains("\nTo: "));
        }
    }

    #[test]
    fn test_unterminating_rule_hits_recursion_limit() {
        let grammar = GrammarBuilder::new()
            .literal("recursive", "{recursive} loop")
            .build()
            .unwrap();
        let config = GeneratorConfig::default().with_max_depth(5).with_seed(1);

        let err = generate(&grammar, "recursive", &config).unwrap_err();
        match err {
            GrammarError::RecursionLimitExceeded { nonterminal, limit } => {
                assert_eq!(nonterminal, "recursive");
                assert_eq!(limit, 5);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unknown_start_symbol() {
        let grammar = doubling_grammar();
        let err = generate(&grammar, "MISSING", &GeneratorConfig::default()).unwrap_err();
        assert!(matches!(err, GrammarError::UndefinedNonterminal(ref n) if n == "MISSING"));
    }

    #[test]
    fn test_script_values_in_order() {
        let grammar = GrammarBuilder::new()
            .script("START", &["LEFT", "RIGHT"], |values| {
                Ok([&values[1][..], &b"|"[..], &values[0][..]].concat())
            })
            .literal("LEFT", "l")
            .literal("RIGHT", "{LEFT}r")
            .build()
            .unwrap();

        let artifact = generate(&grammar, "START", &GeneratorConfig::default()).unwrap();
        assert_eq!(artifact.as_bytes(), b"lr|l");
    }

    #[test]
    fn test_script_output_is_not_rescanned() {
        let grammar = GrammarBuilder::new()
            .script("START", &["X"], |_| Ok(b"{X}".to_vec()))
            .literal("X", "x")
            .build()
            .unwrap();

        let artifact = generate(&grammar, "START", &GeneratorConfig::default()).unwrap();
        assert_eq!(artifact.as_bytes(), b"{X}");
    }

    #[test]
    fn test_script_failure_names_nonterminal() {
        let grammar = GrammarBuilder::new()
            .script("MIME", &["BODY"], |values| {
                let body = std::str::from_utf8(&values[0])?;
                Ok(body.as_bytes().to_vec())
            })
            .regex("BODY", "(?-u:\\xff)")
            .build()
            .unwrap();

        let err = generate(&grammar, "MIME", &GeneratorConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            GrammarError::ScriptExecutionFailed { ref nonterminal, .. } if nonterminal == "MIME"
        ));
    }

    #[test]
    fn test_size_limit() {
        let grammar = GrammarBuilder::new()
            .literal("START", "{WORD}{WORD}")
            .literal("WORD", "abcdef")
            .build()
            .unwrap();

        let mut config = GeneratorConfig::default();
        config.max_output_size = Some(8);
        let err = generate(&grammar, "START", &config).unwrap_err();
        assert!(matches!(err, GrammarError::SizeLimitExceeded { limit: 8, .. }));

        config.max_output_size = Some(12);
        assert_eq!(generate(&grammar, "START", &config).unwrap().len(), 12);
    }

    #[test]
    fn test_size_limit_counts_script_output() {
        let grammar = GrammarBuilder::new()
            .script("START", &["X"], |values| Ok(values[0].repeat(100)))
            .literal("X", "x")
            .build()
            .unwrap();

        let mut config = GeneratorConfig::default();
        config.max_output_size = Some(10);
        let err = generate(&grammar, "START", &config).unwrap_err();
        assert!(matches!(
            err,
            GrammarError::SizeLimitExceeded { ref nonterminal, limit: 10 } if nonterminal == "START"
        ));

        config.max_output_size = Some(100);
        let (artifact, stats) = Generator::new(&grammar, config)
            .generate_with_stats("START")
            .unwrap();
        assert_eq!(artifact.len(), 100);
        assert_eq!(stats.emitted, 100);
    }

    #[test]
    fn test_deep_bound_does_not_use_native_stack() {
        let grammar = GrammarBuilder::new()
            .literal("LOOP", "{LOOP}")
            .build()
            .unwrap();
        let config = GeneratorConfig::default().with_max_depth(20_000).with_seed(3);

        let result = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(move || generate(&grammar, "LOOP", &config))
            .unwrap()
            .join()
            .unwrap();
        assert!(matches!(
            result,
            Err(GrammarError::RecursionLimitExceeded { limit: 20_000, .. })
        ));
    }

    #[test]
    fn test_terminal_length_comes_from_config() {
        let grammar = GrammarBuilder::new()
            .regex("WORD", "[a-z]+")
            .build()
            .unwrap();
        let config = GeneratorConfig {
            max_terminal_length: 3,
            ..GeneratorConfig::default()
        };

        let samples = Generator::new(&grammar, config.with_seed(5))
            .generate_many("WORD", 500)
            .unwrap();
        assert!(samples.iter().all(|s| (1..=3).contains(&s.len())));
        assert!(samples.iter().any(|s| s.len() == 3));
    }

    #[test]
    fn test_weighted_policy() {
        let grammar = GrammarBuilder::new()
            .weighted_literal("START", "a", 99)
            .weighted_literal("START", "b", 1)
            .build()
            .unwrap();
        let config = GeneratorConfig::default()
            .with_seed(7)
            .with_policy(SelectionPolicy::Weighted);

        let samples = Generator::new(&grammar, config)
            .generate_many("START", 1000)
            .unwrap();
        let a = samples.iter().filter(|s| s.as_bytes() == b"a").count();
        assert!(a > 900, "only {} of 1000 picked the heavy alternative", a);
    }

    #[test]
    fn test_declaration_order_policy() {
        let grammar = GrammarBuilder::new()
            .literal("START", "first")
            .literal("START", "second")
            .literal("START", "third")
            .build()
            .unwrap();
        let config = GeneratorConfig::default()
            .with_seed(11)
            .with_policy(SelectionPolicy::DeclarationOrder);

        let samples = Generator::new(&grammar, config)
            .generate_many("START", 3000)
            .unwrap();
        let first = count(&samples, "first");
        let second = count(&samples, "second");
        let third = count(&samples, "third");
        assert!(first > second, "{} vs {}", first, second);
        assert!(second > third, "{} vs {}", second, third);
        assert!(third > 0);
    }

    #[test]
    fn test_self_reference_terminates_near_bound() {
        let grammar = GrammarBuilder::new()
            .literal("S_EXPRESSIONS", "")
            .literal("S_EXPRESSIONS", "({S_EXPRESSIONS}) {S_EXPRESSIONS}")
            .build()
            .unwrap();

        for seed in 0..200 {
            let config = GeneratorConfig::default().with_max_depth(6).with_seed(seed);
            let (_, stats) = Generator::new(&grammar, config)
                .generate_with_stats("S_EXPRESSIONS")
                .unwrap();
            assert!(stats.deepest <= 6);
        }
    }
}
