use std::borrow::Cow;
use std::fmt;
use std::io::{self, Write};

/// The final byte sequence produced for a start symbol
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Artifact(Vec<u8>);

impl Artifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Artifact(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// View the artifact as text, replacing invalid UTF-8 sequences
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.0)
    }

    /// Write the raw bytes to `writer`
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

impl From<Vec<u8>> for Artifact {
    fn from(bytes: Vec<u8>) -> Self {
        Artifact(bytes)
    }
}

impl AsRef<[u8]> for Artifact {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_is_passed_through_untouched() {
        let artifact = Artifact::new(b"  a\r\n\xff ".to_vec());
        assert_eq!(artifact.len(), 6);
        assert_eq!(artifact.as_bytes(), b"  a\r\n\xff ");

        let mut sink = Vec::new();
        artifact.write_to(&mut sink).unwrap();
        assert_eq!(sink, artifact.clone().into_bytes());
        assert_eq!(artifact.to_string_lossy(), "  a\r\n\u{fffd} ");
    }
}
