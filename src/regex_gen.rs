//! Random strings from regular expressions.
//!
//! Patterns are parsed once into `regex-syntax`'s high-level IR and walked on
//! every draw. The match is always whole-string, so start/end anchors are
//! accepted and ignored. Constructs whose output cannot be guaranteed to match
//! (word boundaries, empty classes that cannot be skipped) are rejected at
//! construction time, as are repetition counts above [`MAX_BOUNDED_REPEAT`]
//! and everything `regex-syntax` refuses outright (backreferences, lookaround).

use rand::Rng;
use regex_syntax::ParserBuilder;
use regex_syntax::hir::{Class, ClassBytesRange, ClassUnicodeRange, Hir, HirKind, Look};

use crate::utils::{GrammarError, Result};

/// Default upper bound for unbounded repetitions such as `+` and `*`
pub const DEFAULT_MAX_REPEAT: usize = 32;

/// Largest explicit count accepted in `{n}`, `{n,}` and `{n,m}`
pub const MAX_BOUNDED_REPEAT: u32 = 1000;

/// A compiled regex terminal
#[derive(Debug, Clone)]
pub struct RegexTerminal {
    pattern: String,
    hir: Hir,
}

impl RegexTerminal {
    /// Parse a pattern, failing on constructs the synthesizer cannot honor
    pub fn new(pattern: &str) -> Result<Self> {
        let hir = ParserBuilder::new()
            .utf8(false)
            .build()
            .parse(pattern)
            .map_err(|e| unsupported(pattern, e.to_string()))?;
        check_supported(&hir).map_err(|reason| unsupported(pattern, reason))?;

        Ok(RegexTerminal {
            pattern: pattern.to_string(),
            hir,
        })
    }

    /// A terminal that always yields `text` verbatim
    pub fn literal(text: &str) -> Result<Self> {
        Self::new(&regex_syntax::escape(text))
    }

    /// The source pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Draw a random byte string that fully matches the pattern.
    ///
    /// Unbounded repetitions repeat between their minimum and
    /// `max(minimum, max_repeat)` times.
    pub fn synthesize<R: Rng + ?Sized>(&self, rng: &mut R, max_repeat: usize) -> Vec<u8> {
        let mut out = Vec::new();
        emit(&self.hir, rng, max_repeat, &mut out);
        out
    }
}

/// Compile `pattern` and draw one matching string from it
pub fn synthesize<R: Rng + ?Sized>(pattern: &str, rng: &mut R, max_repeat: usize) -> Result<Vec<u8>> {
    Ok(RegexTerminal::new(pattern)?.synthesize(rng, max_repeat))
}

fn unsupported(pattern: &str, reason: String) -> GrammarError {
    GrammarError::UnsupportedRegexConstruct {
        pattern: pattern.to_string(),
        reason,
    }
}

fn check_supported(hir: &Hir) -> std::result::Result<(), String> {
    check_constructs(hir)?;
    if can_match(hir) {
        Ok(())
    } else {
        Err("every path through the pattern needs a character class that matches nothing"
            .to_string())
    }
}

fn check_constructs(hir: &Hir) -> std::result::Result<(), String> {
    match hir.kind() {
        HirKind::Empty | HirKind::Literal(_) | HirKind::Class(_) => Ok(()),
        HirKind::Look(look) => match look {
            Look::Start
            | Look::End
            | Look::StartLF
            | Look::EndLF
            | Look::StartCRLF
            | Look::EndCRLF => Ok(()),
            other => Err(format!("{:?} assertions are not supported", other)),
        },
        HirKind::Repetition(rep) => {
            let count = rep.max.unwrap_or(rep.min);
            if count > MAX_BOUNDED_REPEAT {
                return Err(format!(
                    "repetition count {} is above {}",
                    count, MAX_BOUNDED_REPEAT
                ));
            }
            check_constructs(&rep.sub)
        }
        HirKind::Capture(cap) => check_constructs(&cap.sub),
        HirKind::Concat(subs) | HirKind::Alternation(subs) => {
            subs.iter().try_for_each(check_constructs)
        }
    }
}

// Whether some string matches `hir`; false only when an empty class cannot be
// skipped.
fn can_match(hir: &Hir) -> bool {
    match hir.kind() {
        HirKind::Empty | HirKind::Literal(_) | HirKind::Look(_) => true,
        HirKind::Class(Class::Unicode(cls)) => !cls.ranges().is_empty(),
        HirKind::Class(Class::Bytes(cls)) => !cls.ranges().is_empty(),
        HirKind::Repetition(rep) => rep.min == 0 || can_match(&rep.sub),
        HirKind::Capture(cap) => can_match(&cap.sub),
        HirKind::Concat(subs) => subs.iter().all(can_match),
        HirKind::Alternation(subs) => subs.iter().any(can_match),
    }
}

fn emit<R: Rng + ?Sized>(hir: &Hir, rng: &mut R, max_repeat: usize, out: &mut Vec<u8>) {
    match hir.kind() {
        HirKind::Empty | HirKind::Look(_) => {}
        HirKind::Literal(lit) => out.extend_from_slice(&lit.0),
        HirKind::Class(Class::Unicode(cls)) => emit_unicode(cls.ranges(), rng, out),
        HirKind::Class(Class::Bytes(cls)) => emit_byte(cls.ranges(), rng, out),
        HirKind::Repetition(rep) if !can_match(&rep.sub) => {}
        HirKind::Repetition(rep) => {
            let min = rep.min as usize;
            let max = rep.max.map_or(min.max(max_repeat), |max| max as usize);
            let count = rng.gen_range(min..=max);
            for _ in 0..count {
                emit(&rep.sub, rng, max_repeat, out);
            }
        }
        HirKind::Capture(cap) => emit(&cap.sub, rng, max_repeat, out),
        HirKind::Concat(subs) => {
            for sub in subs {
                emit(sub, rng, max_repeat, out);
            }
        }
        HirKind::Alternation(subs) => {
            let viable: Vec<&Hir> = subs.iter().filter(|sub| can_match(sub)).collect();
            let pick = rng.gen_range(0..viable.len());
            emit(viable[pick], rng, max_repeat, out);
        }
    }
}

// Ranges are weighted by width so every member of the class is equally likely.
fn emit_unicode<R: Rng + ?Sized>(ranges: &[ClassUnicodeRange], rng: &mut R, out: &mut Vec<u8>) {
    let width = |r: &ClassUnicodeRange| u64::from(u32::from(r.end()) - u32::from(r.start())) + 1;
    let total: u64 = ranges.iter().map(width).sum();
    let mut pick = rng.gen_range(0..total);

    for range in ranges {
        let w = width(range);
        if pick < w {
            let code = u32::from(range.start()) + pick as u32;
            // Ranges may span the surrogate block, which has no chars.
            let chr = char::from_u32(code).unwrap_or(range.start());
            let mut buf = [0; 4];
            out.extend_from_slice(chr.encode_utf8(&mut buf).as_bytes());
            return;
        }
        pick -= w;
    }
}

fn emit_byte<R: Rng + ?Sized>(ranges: &[ClassBytesRange], rng: &mut R, out: &mut Vec<u8>) {
    let width = |r: &ClassBytesRange| u32::from(r.end()) - u32::from(r.start()) + 1;
    let total: u32 = ranges.iter().map(width).sum();
    let mut pick = rng.gen_range(0..total);

    for range in ranges {
        let w = width(range);
        if pick < w {
            out.push(range.start() + pick as u8);
            return;
        }
        pick -= w;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use regex::bytes::Regex;

    fn assert_always_matches(pattern: &str, samples: u64) {
        let terminal = RegexTerminal::new(pattern).unwrap();
        let checker = Regex::new(&format!("^(?:{})$", pattern)).unwrap();
        for seed in 0..samples {
            let mut rng = StdRng::seed_from_u64(seed);
            let out = terminal.synthesize(&mut rng, DEFAULT_MAX_REPEAT);
            assert!(
                checker.is_match(&out),
                "{:?} does not match {}",
                String::from_utf8_lossy(&out),
                pattern
            );
        }
    }

    #[test]
    fn test_sample_grammar_patterns_match() {
        for pattern in ["[a-zA-Z0-9]+", "[a-z]+", "[0-9]+", "#t", "#f"] {
            assert_always_matches(pattern, 1000);
        }
    }

    #[test]
    fn test_operators_match() {
        for pattern in [
            "ab?c*d+",
            "(foo|bar|baz)-[0-9]{2,4}",
            "x{3}y{2,}",
            "(?:[a-f]|[0-5])+",
            "[^a-z]",
            "(?i)mime",
            "^anchored$",
            "\\d\\s\\w",
            ".",
            "(?-u:[\\x80-\\xff])+",
        ] {
            assert_always_matches(pattern, 1000);
        }
    }

    #[test]
    fn test_escaped_literal() {
        let terminal = RegexTerminal::literal("MIME-Version: 1.0").unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(terminal.synthesize(&mut rng, 8), b"MIME-Version: 1.0".to_vec());
    }

    #[test]
    fn test_unbounded_repetition_respects_bound() {
        let terminal = RegexTerminal::new("[a-z]+").unwrap();
        for seed in 0..500 {
            let mut rng = StdRng::seed_from_u64(seed);
            let out = terminal.synthesize(&mut rng, 5);
            assert!((1..=5).contains(&out.len()));
        }

        let terminal = RegexTerminal::new("a*").unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(terminal.synthesize(&mut rng, 0).is_empty());
    }

    #[test]
    fn test_minimum_beats_bound() {
        let terminal = RegexTerminal::new("z{10,}").unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        assert_eq!(terminal.synthesize(&mut rng, 4), vec![b'z'; 10]);
    }

    #[test]
    fn test_unsupported_constructs() {
        for pattern in ["(a)\\1", "(?=a)b", "\\bword\\b", "[a&&b]", "(unclosed"] {
            match RegexTerminal::new(pattern) {
                Err(GrammarError::UnsupportedRegexConstruct { pattern: p, .. }) => {
                    assert_eq!(p, pattern)
                }
                other => panic!("expected rejection of {}, got {:?}", pattern, other),
            }
        }
    }

    #[test]
    fn test_skippable_empty_class() {
        for pattern in ["x[a&&b]*", "(y|[a&&b])", "(?:[a&&b]|z)+", "w(?:[a&&b]{2})?"] {
            assert_always_matches(pattern, 200);
        }
        for pattern in ["[a&&b]+", "x(?:[a&&b]|[c&&d])", "(?:q[a&&b]){1,3}"] {
            assert!(
                matches!(
                    RegexTerminal::new(pattern),
                    Err(GrammarError::UnsupportedRegexConstruct { .. })
                ),
                "{} should be rejected",
                pattern
            );
        }
    }

    #[test]
    fn test_repetition_count_limit() {
        for pattern in ["a{4000000000}", "a{1001}", "a{2,5000}", "(?:ab){1001,}"] {
            match RegexTerminal::new(pattern) {
                Err(GrammarError::UnsupportedRegexConstruct { reason, .. }) => {
                    assert!(reason.contains("repetition count"), "{}", reason)
                }
                other => panic!("expected rejection of {}, got {:?}", pattern, other),
            }
        }

        let terminal = RegexTerminal::new("a{1000}").unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(terminal.synthesize(&mut rng, 4).len(), 1000);
    }

    #[test]
    fn test_synthesize_is_deterministic_per_seed() {
        let a = synthesize("[a-z]{5,20}", &mut StdRng::seed_from_u64(77), 32).unwrap();
        let b = synthesize("[a-z]{5,20}", &mut StdRng::seed_from_u64(77), 32).unwrap();
        assert_eq!(a, b);
    }
}
