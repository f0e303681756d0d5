//! Keyed codec: packs a `(key, message)` pair into one string.
//!
//! The session layer nests application traffic inside a single frame
//! message, so it needs a way to carry the application key alongside the
//! payload. [`DelimitedCodec`] joins the two with a single delimiter
//! character.
//!
//! # Escaping
//!
//! A bare delimiter scheme breaks as soon as a key or message contains the
//! delimiter. Both halves are therefore escaped: the delimiter and the
//! escape character itself (`\`) are prefixed with `\`. Decoding splits on
//! the first *unescaped* delimiter.
//!
//! ```text
//! serialize("move", "a|b")  →  "move|a\|b"
//! ```

use crate::ProtocolError;

/// The escape character. Never usable as a delimiter.
const ESCAPE: char = '\\';

/// Serializer/deserializer contract for `(key, message)` pairs.
pub trait KeyedCodec: Send + Sync + 'static {
    /// Packs a key and a message into a wire string.
    fn serialize(&self, key: &str, message: &str) -> String;

    /// Unpacks a wire string. Returns `None` when the input is malformed;
    /// callers treat that as transport noise and drop it.
    fn deserialize(&self, wire: &str) -> Option<(String, String)>;
}

/// A [`KeyedCodec`] that separates key and message with one character.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelimitedCodec {
    delimiter: char,
}

impl DelimitedCodec {
    /// The delimiter used by the session layer unless configured otherwise.
    pub const DEFAULT_DELIMITER: char = '|';

    /// Creates a codec with the given delimiter.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidDelimiter`] if `delimiter` is the
    /// escape character `\`.
    pub fn new(delimiter: char) -> Result<Self, ProtocolError> {
        if delimiter == ESCAPE {
            return Err(ProtocolError::InvalidDelimiter(delimiter));
        }
        Ok(Self { delimiter })
    }

    /// Returns the configured delimiter.
    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    fn escape_into(&self, out: &mut String, input: &str) {
        for c in input.chars() {
            if c == ESCAPE || c == self.delimiter {
                out.push(ESCAPE);
            }
            out.push(c);
        }
    }
}

impl Default for DelimitedCodec {
    fn default() -> Self {
        Self {
            delimiter: Self::DEFAULT_DELIMITER,
        }
    }
}

impl KeyedCodec for DelimitedCodec {
    fn serialize(&self, key: &str, message: &str) -> String {
        let mut out = String::with_capacity(key.len() + message.len() + 1);
        self.escape_into(&mut out, key);
        out.push(self.delimiter);
        self.escape_into(&mut out, message);
        out
    }

    fn deserialize(&self, wire: &str) -> Option<(String, String)> {
        let mut key = String::new();
        let mut message = String::new();
        let mut in_key = true;
        let mut chars = wire.chars();

        while let Some(c) = chars.next() {
            let target = if in_key { &mut key } else { &mut message };
            if c == ESCAPE {
                // A trailing escape, or an escape in front of an ordinary
                // character, was not produced by `serialize`.
                let next = chars.next()?;
                if next != ESCAPE && next != self.delimiter {
                    return None;
                }
                target.push(next);
            } else if c == self.delimiter {
                if !in_key {
                    return None;
                }
                in_key = false;
            } else {
                target.push(c);
            }
        }

        if in_key { None } else { Some((key, message)) }
    }
}
