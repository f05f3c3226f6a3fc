//! Script combinators: pure functions that merge the generated values of a
//! production's children into one new value.
//!
//! A combinator never sees the grammar or the derivation state, only the
//! ordered child values, so the same combinator can be shared by any number of
//! rules and generator threads.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Error type produced by a failing combinator
pub type ScriptError = Box<dyn std::error::Error + Send + Sync>;

/// Result of running a combinator
pub type ScriptResult = std::result::Result<Vec<u8>, ScriptError>;

/// Trait for functions that combine child values into a composite value
pub trait Combinator: Send + Sync + fmt::Debug {
    /// Combine the values generated for the children, in declaration order
    fn combine(&self, children: &[Vec<u8>]) -> ScriptResult;

    /// Get the name of this combinator
    fn name(&self) -> &str;

    /// Number of children this combinator accepts, `None` for any number
    fn arity(&self) -> Option<usize>;

    /// Check whether `count` children can be passed to this combinator
    fn accepts(&self, count: usize) -> bool {
        self.arity().is_none_or(|arity| arity == count)
    }
}

/// Closure type wrapped by [`FnCombinator`]
pub type CombineFn = dyn Fn(&[Vec<u8>]) -> ScriptResult + Send + Sync;

/// A combinator backed by a closure
#[derive(Clone)]
pub struct FnCombinator {
    name: String,
    arity: Option<usize>,
    func: Arc<CombineFn>,
}

impl FnCombinator {
    /// Create a combinator taking exactly `arity` children
    pub fn new<F>(name: &str, arity: usize, func: F) -> Self
    where
        F: Fn(&[Vec<u8>]) -> ScriptResult + Send + Sync + 'static,
    {
        FnCombinator {
            name: name.to_string(),
            arity: Some(arity),
            func: Arc::new(func),
        }
    }

    /// Create a combinator accepting any number of children
    pub fn variadic<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Vec<u8>]) -> ScriptResult + Send + Sync + 'static,
    {
        FnCombinator {
            name: name.to_string(),
            arity: None,
            func: Arc::new(func),
        }
    }
}

impl fmt::Debug for FnCombinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCombinator")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl Combinator for FnCombinator {
    fn combine(&self, children: &[Vec<u8>]) -> ScriptResult {
        (self.func)(children)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn arity(&self) -> Option<usize> {
        self.arity
    }
}

/// Concatenates all children with no separator
#[derive(Debug, Clone)]
pub struct ConcatCombinator;

impl Combinator for ConcatCombinator {
    fn combine(&self, children: &[Vec<u8>]) -> ScriptResult {
        Ok(children.concat())
    }

    fn name(&self) -> &str {
        "concat"
    }

    fn arity(&self) -> Option<usize> {
        None
    }
}

/// Wraps a body in an XML element: `<tag attr>body</tag>`
#[derive(Debug, Clone)]
pub struct XmlElementCombinator;

impl Combinator for XmlElementCombinator {
    fn combine(&self, children: &[Vec<u8>]) -> ScriptResult {
        let [tag, attr, body] = children else {
            return Err(arity_error(self, children.len()));
        };

        let mut out = Vec::with_capacity(2 * tag.len() + attr.len() + body.len() + 5);
        out.push(b'<');
        out.extend_from_slice(tag);
        out.push(b' ');
        out.extend_from_slice(attr);
        out.push(b'>');
        out.extend_from_slice(body);
        out.extend_from_slice(b"</");
        out.extend_from_slice(tag);
        out.push(b'>');
        Ok(out)
    }

    fn name(&self) -> &str {
        "xml_element"
    }

    fn arity(&self) -> Option<usize> {
        Some(3)
    }
}

/// Appends a message authentication code to a MIME header.
///
/// The output is `header\nX-MAC:<digest>\n\nbody`, where the digest is the
/// lowercase hex SHA-256 of `header\n\nbody`. Header and body must be UTF-8.
#[derive(Debug, Clone)]
pub struct MimeMacCombinator;

impl MimeMacCombinator {
    /// Digest over the header and body as joined by the message separator
    pub fn digest(header: &[u8], body: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(header);
        hasher.update(b"\n\n");
        hasher.update(body);
        hex::encode(hasher.finalize())
    }
}

impl Combinator for MimeMacCombinator {
    fn combine(&self, children: &[Vec<u8>]) -> ScriptResult {
        let [header, body] = children else {
            return Err(arity_error(self, children.len()));
        };

        let header_text = std::str::from_utf8(header)?;
        let body_text = std::str::from_utf8(body)?;
        let mac = Self::digest(header, body);
        Ok(format!("{}\nX-MAC:{}\n\n{}", header_text, mac, body_text).into_bytes())
    }

    fn name(&self) -> &str {
        "mime_mac"
    }

    fn arity(&self) -> Option<usize> {
        Some(2)
    }
}

fn arity_error(combinator: &dyn Combinator, got: usize) -> ScriptError {
    format!(
        "{} expects {} children, got {}",
        combinator.name(),
        combinator.arity().map_or("any number of".to_string(), |n| n.to_string()),
        got
    )
    .into()
}

/// Registry for managing and retrieving combinators by name
#[derive(Debug, Clone, Default)]
pub struct CombinatorRegistry {
    combinators: Vec<(String, Arc<dyn Combinator>)>,
}

impl CombinatorRegistry {
    /// Create a new empty combinator registry
    pub fn new() -> Self {
        CombinatorRegistry {
            combinators: Vec::new(),
        }
    }

    /// Register a combinator with a name, replacing any previous one
    pub fn register<C: Combinator + 'static>(&mut self, name: &str, combinator: C) -> &mut Self {
        self.register_arc(name, Arc::new(combinator))
    }

    /// Register an already shared combinator with a name
    pub fn register_arc(&mut self, name: &str, combinator: Arc<dyn Combinator>) -> &mut Self {
        self.combinators.retain(|(n, _)| n != name);
        self.combinators.push((name.to_string(), combinator));
        self
    }

    /// Get a combinator by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Combinator>> {
        self.combinators
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, c)| Arc::clone(c))
    }

    /// Get a list of all registered combinator names
    pub fn list_combinators(&self) -> Vec<String> {
        self.combinators
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Register the built-in combinators
    pub fn register_defaults(&mut self) -> &mut Self {
        self.register("concat", ConcatCombinator)
            .register("xml_element", XmlElementCombinator)
            .register("mime_mac", MimeMacCombinator)
    }
}

/// Create a combinator registry holding the built-in combinators
pub fn default_combinator_registry() -> CombinatorRegistry {
    let mut registry = CombinatorRegistry::new();
    registry.register_defaults();
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_xml_element() {
        let out = XmlElementCombinator
            .combine(&[b"note".to_vec(), b"foo=bar".to_vec(), b"hi".to_vec()])
            .unwrap();
        assert_eq!(out, b"<note foo=bar>hi</note>".to_vec());
    }

    #[test]
    fn test_mime_mac_embeds_digest() {
        let out = MimeMacCombinator
            .combine(&[b"From: a@b.com".to_vec(), b"hello".to_vec()])
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let expected = format!(
            "From: a@b.com\nX-MAC:{}\n\nhello",
            MimeMacCombinator::digest(b"From: a@b.com", b"hello")
        );
        assert_eq!(text, expected);
        // sha256 hex
        assert_eq!(MimeMacCombinator::digest(b"", b"").len(), 64);
    }

    #[test]
    fn test_mime_mac_rejects_invalid_utf8() {
        let result = MimeMacCombinator.combine(&[vec![0xff, 0xfe], b"body".to_vec()]);
        assert!(result.is_err());
    }

    #[test]
    fn test_arity_mismatch_is_an_error() {
        let result = XmlElementCombinator.combine(&[b"only".to_vec()]);
        let err = result.unwrap_err();
        assert!(err.to_string().contains("expects 3 children, got 1"));
        assert!(ConcatCombinator.accepts(7));
        assert!(!MimeMacCombinator.accepts(3));
    }

    #[test]
    fn test_fn_combinator() {
        let upper = FnCombinator::new("upper", 1, |children| {
            Ok(children[0].to_ascii_uppercase())
        });
        assert_eq!(upper.combine(&[b"abc".to_vec()]).unwrap(), b"ABC".to_vec());
        assert_eq!(upper.arity(), Some(1));
        assert!(format!("{:?}", upper).contains("upper"));

        let joined = FnCombinator::variadic("dash", |children| Ok(children.join(&b'-')));
        assert_eq!(
            joined.combine(&[b"a".to_vec(), b"b".to_vec()]).unwrap(),
            b"a-b".to_vec()
        );
    }

    #[test]
    fn test_combinator_registry() {
        let mut registry = default_combinator_registry();
        assert_eq!(
            registry.list_combinators(),
            vec!["concat", "xml_element", "mime_mac"]
        );

        registry.register("concat", FnCombinator::variadic("concat", |_| Ok(Vec::new())));
        let concat = registry.get("concat").unwrap();
        assert!(concat.combine(&[b"x".to_vec()]).unwrap().is_empty());
        assert_eq!(registry.list_combinators().len(), 3);
        assert!(registry.get("missing").is_none());
    }
}
