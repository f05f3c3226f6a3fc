//! Grammar files.
//!
//! Two formats are understood. `.json` files hold an array of
//! `["NONTERMINAL", "template"]` pairs; a `START` rule pointing at the first
//! non-terminal is added when the file does not start with one. Any other file
//! is read as the line-based text format:
//!
//! ```text
//! # comment
//! <START>   ::= "{MIME}"
//! <SUBJECT> ~= "[a-zA-Z0-9]+"
//! <MIME>    := mime_mac(<HEADER>, <BODY>)
//! <TYPE>    ::= "text/plain" @ 3
//!           |   "text/html"
//! ```
//!
//! `::=` adds a literal template, `~=` a regex terminal and `:=` a script
//! resolved by name in a [`CombinatorRegistry`]. A line starting with `|` adds
//! another alternative of the same kind to the previous non-terminal, and `@ N`
//! sets the selection weight.
//!
//! Literal strings understand `\n \r \t \" \\ \xHH`. Regex strings only
//! unescape `\"`; everything else, `\xHH` included, goes to the regex parser
//! as written.

use regex::Regex;
use std::fs;
use std::path::Path;

use crate::grammar::{Grammar, GrammarBuilder, Production};
use crate::script::{CombinatorRegistry, default_combinator_registry};
use crate::utils::{GrammarError, OptionExt, Result};

const RULE_PATTERN: &str = r"^<([^<>\s]+)>\s*(::=|~=|:=)\s*(.*)$";
const ALTERNATIVE_PATTERN: &str = r"^\|\s*(.*)$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    Literal,
    Regex,
    Script,
}

impl Grammar {
    /// Load a grammar file, resolving scripts against the built-in combinators
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_file_with_registry(path, &default_combinator_registry())
    }

    /// Load a grammar file, resolving scripts against `registry`
    pub fn from_file_with_registry<P: AsRef<Path>>(
        path: P,
        registry: &CombinatorRegistry,
    ) -> Result<Self> {
        load_builder(path.as_ref(), registry)?.build()
    }
}

/// Read a grammar file into a builder, leaving room for more definitions
pub fn load_builder(path: &Path, registry: &CombinatorRegistry) -> Result<GrammarBuilder> {
    let source = fs::read_to_string(path)?;
    if path.extension().is_some_and(|ext| ext == "json") {
        parse_json_rules(&source)
    } else {
        parse_grammar(&source, registry)
    }
}

/// Parse the JSON pair-list format
pub fn parse_json_rules(source: &str) -> Result<GrammarBuilder> {
    let rules: Vec<(String, String)> =
        serde_json::from_str(source).map_err(|e| GrammarError::Parse {
            line: e.line(),
            message: e.to_string(),
        })?;
    let (first, _) = rules
        .first()
        .ok_or_grammar_err(|| "grammar file contains no rules".to_string())?;

    let mut builder = GrammarBuilder::new();
    if first != "START" {
        builder.define_literal("START", format!("{{{}}}", first))?;
    }
    for (non_terminal, template) in &rules {
        builder.define_literal(non_terminal, template)?;
    }
    Ok(builder)
}

/// Parse the line-based text format
pub fn parse_grammar(source: &str, registry: &CombinatorRegistry) -> Result<GrammarBuilder> {
    let rule_regex = Regex::new(RULE_PATTERN).map_err(|e| GrammarError::InvalidGrammar(e.to_string()))?;
    let alternative_regex =
        Regex::new(ALTERNATIVE_PATTERN).map_err(|e| GrammarError::InvalidGrammar(e.to_string()))?;

    let mut builder = GrammarBuilder::new();
    let mut current: Option<(String, RuleKind)> = None;

    for (index, line) in source.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();

        // Skip empty lines and comments
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let (name, kind, body) = if let Some(captures) = rule_regex.captures(trimmed) {
            let kind = match &captures[2] {
                "::=" => RuleKind::Literal,
                "~=" => RuleKind::Regex,
                _ => RuleKind::Script,
            };
            let name = captures[1].to_string();
            current = Some((name.clone(), kind));
            (name, kind, captures.get(3).map_or("", |m| m.as_str()))
        } else if let Some(captures) = alternative_regex.captures(trimmed) {
            let (name, kind) = current.clone().ok_or_else(|| GrammarError::Parse {
                line: line_no,
                message: "alternative without a preceding rule".to_string(),
            })?;
            (name, kind, captures.get(1).map_or("", |m| m.as_str()))
        } else {
            return Err(GrammarError::Parse {
                line: line_no,
                message: format!("expected a rule definition, found {:?}", trimmed),
            });
        };

        let (production, weight) =
            parse_body(body, kind, registry).map_err(|err| at_line(err, line_no))?;
        builder
            .define_weighted(&name, production, weight)
            .map_err(|err| at_line(err, line_no))?;
    }

    Ok(builder)
}

// Attach a line number to errors that do not name a non-terminal.
fn at_line(err: GrammarError, line: usize) -> GrammarError {
    match err {
        GrammarError::InvalidGrammar(message) => GrammarError::Parse { line, message },
        other => other,
    }
}

fn parse_body(
    body: &str,
    kind: RuleKind,
    registry: &CombinatorRegistry,
) -> Result<(Production, u32)> {
    let mut cursor = Cursor::new(body);
    let production = match kind {
        RuleKind::Literal => Production::literal(cursor.quoted()?)?,
        RuleKind::Regex => {
            let pattern = cursor.raw_quoted()?;
            Production::regex(&pattern)?
        }
        RuleKind::Script => {
            let name = cursor.identifier()?;
            let combinator = registry
                .get(name)
                .ok_or_grammar_err(|| format!("unknown combinator {}", name))?;
            let children = cursor.children()?;
            let children: Vec<&str> = children.iter().map(String::as_str).collect();
            Production::script(&children, combinator)?
        }
    };
    let weight = cursor.weight()?;
    cursor.finish()?;
    Ok((production, weight))
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str) -> Self {
        Cursor { rest: source }
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, c: char) -> bool {
        self.skip_whitespace();
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", c)))
        }
    }

    fn error(&self, message: String) -> GrammarError {
        GrammarError::InvalidGrammar(format!("{} at {:?}", message, self.rest))
    }

    /// A double-quoted string with `\n \r \t \" \\ \xHH` escapes; any other
    /// backslash sequence is kept as written.
    fn quoted(&mut self) -> Result<Vec<u8>> {
        self.expect('"')?;
        let source = self.rest;
        let mut out = Vec::new();
        let mut chars = source.char_indices();

        while let Some((index, c)) = chars.next() {
            match c {
                '"' => {
                    self.rest = &source[index + 1..];
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push(b'\n'),
                    Some((_, 'r')) => out.push(b'\r'),
                    Some((_, 't')) => out.push(b'\t'),
                    Some((_, '"')) => out.push(b'"'),
                    Some((_, '\\')) => out.push(b'\\'),
                    Some((at, 'x')) => {
                        let hex = source
                            .get(at + 1..at + 3)
                            .ok_or_else(|| self.error("truncated \\x escape".to_string()))?;
                        let byte = u8::from_str_radix(hex, 16)
                            .map_err(|_| self.error(format!("bad \\x escape {:?}", hex)))?;
                        out.push(byte);
                        chars.next();
                        chars.next();
                    }
                    Some((_, other)) => {
                        out.push(b'\\');
                        let mut buf = [0; 4];
                        out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                    }
                    None => break,
                },
                other => {
                    let mut buf = [0; 4];
                    out.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                }
            }
        }

        Err(self.error("unterminated string".to_string()))
    }

    /// A double-quoted string where only `\"` is unescaped, leaving every
    /// other backslash sequence for the regex parser.
    fn raw_quoted(&mut self) -> Result<String> {
        self.expect('"')?;
        let source = self.rest;
        let mut out = String::new();
        let mut chars = source.char_indices();

        while let Some((index, c)) = chars.next() {
            match c {
                '"' => {
                    self.rest = &source[index + 1..];
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, '"')) => out.push('"'),
                    Some((_, other)) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                other => out.push(other),
            }
        }

        Err(self.error("unterminated string".to_string()))
    }

    fn identifier(&mut self) -> Result<&'a str> {
        self.skip_whitespace();
        let len = self
            .rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(self.rest.len());
        if len == 0 {
            return Err(self.error("expected a combinator name".to_string()));
        }
        let (ident, rest) = self.rest.split_at(len);
        self.rest = rest;
        Ok(ident)
    }

    /// `(<A>, <B>, ...)`
    fn children(&mut self) -> Result<Vec<String>> {
        self.expect('(')?;
        let mut children = Vec::new();
        if self.eat(')') {
            return Ok(children);
        }
        loop {
            self.expect('<')?;
            let end = self
                .rest
                .find('>')
                .ok_or_else(|| self.error("unterminated non-terminal".to_string()))?;
            children.push(self.rest[..end].trim().to_string());
            self.rest = &self.rest[end + 1..];

            if self.eat(')') {
                return Ok(children);
            }
            self.expect(',')?;
        }
    }

    /// Optional `@ N`, defaulting to 1
    fn weight(&mut self) -> Result<u32> {
        if !self.eat('@') {
            return Ok(1);
        }
        self.skip_whitespace();
        let len = self
            .rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(self.rest.len());
        let weight = self.rest[..len]
            .parse()
            .map_err(|_| self.error("expected a weight".to_string()))?;
        self.rest = &self.rest[len..];
        Ok(weight)
    }

    /// Only whitespace or a trailing comment may remain
    fn finish(&mut self) -> Result<()> {
        self.skip_whitespace();
        if self.rest.is_empty() || self.rest.starts_with('#') {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input".to_string()))
        }
    }
}
