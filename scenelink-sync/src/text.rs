//! Tagged-field text form used for context bodies and scene files.
//!
//! ```text
//! // comment to end of line
//! SEND_GEOM { name cube1 class mesh color { 1 0 0 } payload AQID }
//! CREATE { name cube1 }
//! DONE { }
//! ```
//!
//! A block is a tag followed by `{ field value ... }`. A value is either a
//! single atom (bare word or double-quoted string) or a braced list of
//! values. Decoders look fields up by name, so field order is free and
//! unknown fields are ignored.

use std::fmt::{Display, Write as _};
use std::str::FromStr;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::protocol::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    Word(String),
}

struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, line: 1 }
    }

    fn peek_char(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn skip_trivia(&mut self) {
        loop {
            match self.peek_char() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('/') if self.src[self.pos..].starts_with("//") => {
                    while let Some(c) = self.bump() {
                        if c == '\n' {
                            break;
                        }
                    }
                }
                _ => return,
            }
        }
    }

    fn next(&mut self) -> Result<Option<(Token, usize)>, ProtocolError> {
        self.skip_trivia();
        let line = self.line;
        let Some(c) = self.peek_char() else {
            return Ok(None);
        };
        let token = match c {
            '{' => {
                self.bump();
                Token::Open
            }
            '}' => {
                self.bump();
                Token::Close
            }
            '"' => {
                self.bump();
                Token::Word(self.quoted(line)?)
            }
            _ => {
                let start = self.pos;
                while let Some(c) = self.peek_char() {
                    if c.is_whitespace() || matches!(c, '{' | '}' | '"') {
                        break;
                    }
                    self.bump();
                }
                Token::Word(self.src[start..self.pos].to_string())
            }
        };
        Ok(Some((token, line)))
    }

    fn quoted(&mut self, line: usize) -> Result<String, ProtocolError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some(c) => out.push(c),
                    None => break,
                },
                Some(c) => out.push(c),
                None => break,
            }
        }
        Err(ProtocolError::Unterminated { line, what: "string" })
    }
}

/// A field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Atom(String),
    List(Vec<Value>),
}

impl Value {
    pub fn as_atom(&self) -> Option<&str> {
        match self {
            Self::Atom(s) => Some(s),
            Self::List(_) => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            Self::Atom(_) => None,
        }
    }
}

/// The parsed fields of one block.
#[derive(Debug, Clone, PartialEq)]
pub struct Fields {
    tag: String,
    entries: Vec<(String, Value)>,
}

impl Fields {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            entries: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Value) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Log fields not in `known` and carry on.
    pub fn skip_unknown(&self, known: &[&str]) {
        for (name, _) in &self.entries {
            if !known.contains(&name.as_str()) {
                log::debug!("{}: skipping unknown field '{name}'", self.tag);
            }
        }
    }

    fn malformed(&self, field: &str, reason: impl Into<String>) -> ProtocolError {
        ProtocolError::MalformedField {
            tag: self.tag.clone(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn atom(&self, name: &str) -> Result<&str, ProtocolError> {
        match self.get(name) {
            Some(Value::Atom(s)) => Ok(s),
            Some(Value::List(_)) => Err(self.malformed(name, "must be a single value")),
            None => Err(self.malformed(name, "is missing")),
        }
    }

    pub fn opt_atom(&self, name: &str) -> Result<Option<&str>, ProtocolError> {
        if self.contains(name) {
            self.atom(name).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> Result<T, ProtocolError> {
        let raw = self.atom(name)?;
        raw.parse()
            .map_err(|_| self.malformed(name, format!("has unparsable value '{raw}'")))
    }

    pub fn opt_parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ProtocolError> {
        if self.contains(name) {
            self.parse(name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// An optional attribute: absent → `None`, empty list → `Some(None)`,
    /// atom → `Some(Some(value))`.
    pub fn optional<T: FromStr>(&self, name: &str) -> Result<Option<Option<T>>, ProtocolError> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::List(items)) if items.is_empty() => Ok(Some(None)),
            Some(Value::List(_)) => Err(self.malformed(name, "must be a value or { }")),
            Some(Value::Atom(_)) => self.parse(name).map(|v| Some(Some(v))),
        }
    }

    /// `1`/`0` (also `true`/`false`).
    pub fn flag(&self, name: &str) -> Result<bool, ProtocolError> {
        match self.atom(name)? {
            "1" | "true" => Ok(true),
            "0" | "false" => Ok(false),
            other => Err(self.malformed(name, format!("is not a flag: '{other}'"))),
        }
    }

    pub fn opt_flag(&self, name: &str) -> Result<Option<bool>, ProtocolError> {
        if self.contains(name) {
            self.flag(name).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn floats<const N: usize>(&self, name: &str) -> Result<[f64; N], ProtocolError> {
        let items = match self.get(name) {
            Some(Value::List(items)) => items,
            Some(Value::Atom(_)) => return Err(self.malformed(name, "must be a list")),
            None => return Err(self.malformed(name, "is missing")),
        };
        if items.len() != N {
            return Err(self.malformed(
                name,
                format!("needs {N} numbers, got {}", items.len()),
            ));
        }
        let mut out = [0.0; N];
        for (slot, item) in out.iter_mut().zip(items) {
            *slot = item
                .as_atom()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| self.malformed(name, "contains a non-number"))?;
        }
        Ok(out)
    }

    pub fn opt_floats<const N: usize>(&self, name: &str) -> Result<Option<[f64; N]>, ProtocolError> {
        if self.contains(name) {
            self.floats(name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Base64-encoded bytes.
    pub fn bytes(&self, name: &str) -> Result<Vec<u8>, ProtocolError> {
        let raw = self.atom(name)?;
        BASE64
            .decode(raw)
            .map_err(|e| self.malformed(name, format!("is not base64: {e}")))
    }

    pub fn opt_bytes(&self, name: &str) -> Result<Option<Vec<u8>>, ProtocolError> {
        if self.contains(name) {
            self.bytes(name).map(Some)
        } else {
            Ok(None)
        }
    }

    /// A list of alternating keys and values.
    pub fn pairs(&self, name: &str) -> Result<Vec<(String, String)>, ProtocolError> {
        let items = match self.get(name) {
            Some(Value::List(items)) => items,
            Some(Value::Atom(_)) => return Err(self.malformed(name, "must be a list")),
            None => return Ok(Vec::new()),
        };
        if items.len() % 2 != 0 {
            return Err(self.malformed(name, "has an odd number of entries"));
        }
        items
            .chunks(2)
            .map(|kv| match (kv[0].as_atom(), kv[1].as_atom()) {
                (Some(k), Some(v)) => Ok((k.to_string(), v.to_string())),
                _ => Err(self.malformed(name, "entries must be single values")),
            })
            .collect()
    }
}

/// One parsed `TAG { ... }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub line: usize,
    pub fields: Fields,
}

impl Block {
    pub fn tag(&self) -> &str {
        self.fields.tag()
    }
}

/// Reads blocks one at a time from a context body.
pub struct BlockReader<'a> {
    tokens: Tokenizer<'a>,
}

impl<'a> BlockReader<'a> {
    pub fn new(src: &'a str) -> Self {
        Self {
            tokens: Tokenizer::new(src),
        }
    }

    /// Current line, for diagnostics.
    pub fn line(&self) -> usize {
        self.tokens.line
    }

    /// Parse the next block, or `None` at end of input.
    pub fn next_block(&mut self) -> Result<Option<Block>, ProtocolError> {
        let (tag, line) = match self.tokens.next()? {
            None => return Ok(None),
            Some((Token::Word(tag), line)) => (tag, line),
            Some((tok, line)) => return Err(unexpected(line, "a tag", &tok)),
        };
        match self.tokens.next()? {
            Some((Token::Open, _)) => {}
            Some((tok, line)) => return Err(unexpected(line, "'{'", &tok)),
            None => return Err(ProtocolError::Unterminated { line, what: "block" }),
        }

        let mut fields = Fields::new(tag);
        loop {
            match self.tokens.next()? {
                Some((Token::Close, _)) => break,
                Some((Token::Word(name), field_line)) => {
                    let value = match self.tokens.next()? {
                        Some((Token::Word(atom), _)) => Value::Atom(atom),
                        Some((Token::Open, _)) => self.list(field_line)?,
                        Some((Token::Close, _)) => {
                            return Err(fields.malformed(&name, "has no value"));
                        }
                        None => return Err(ProtocolError::Unterminated { line, what: "block" }),
                    };
                    fields.push(name, value);
                }
                Some((Token::Open, l)) => return Err(unexpected(l, "a field name", &Token::Open)),
                None => return Err(ProtocolError::Unterminated { line, what: "block" }),
            }
        }
        Ok(Some(Block { line, fields }))
    }

    fn list(&mut self, line: usize) -> Result<Value, ProtocolError> {
        let mut items = Vec::new();
        loop {
            match self.tokens.next()? {
                Some((Token::Close, _)) => return Ok(Value::List(items)),
                Some((Token::Open, l)) => items.push(self.list(l)?),
                Some((Token::Word(w), _)) => items.push(Value::Atom(w)),
                None => return Err(ProtocolError::Unterminated { line, what: "list" }),
            }
        }
    }
}

fn unexpected(line: usize, expected: &'static str, found: &Token) -> ProtocolError {
    let found = match found {
        Token::Open => "{".to_string(),
        Token::Close => "}".to_string(),
        Token::Word(w) => w.clone(),
    };
    ProtocolError::UnexpectedToken {
        line,
        expected,
        found,
    }
}

// ─── Writing ────────────────────────────────────────────────────

/// Builds one `TAG { ... }` block.
#[derive(Debug, Clone)]
pub struct BlockWriter {
    out: String,
}

impl BlockWriter {
    pub fn new(tag: &str) -> Self {
        let mut out = String::with_capacity(64);
        out.push_str(&quote(tag));
        out.push_str(" {");
        Self { out }
    }

    pub fn atom(mut self, name: &str, value: impl Display) -> Self {
        let value = value.to_string();
        let _ = write!(self.out, " {name} {}", quote(&value));
        self
    }

    pub fn flag(self, name: &str, value: bool) -> Self {
        self.atom(name, if value { 1 } else { 0 })
    }

    pub fn floats(mut self, name: &str, values: &[f64]) -> Self {
        let _ = write!(self.out, " {name} {{");
        for v in values {
            let _ = write!(self.out, " {v}");
        }
        self.out.push_str(" }");
        self
    }

    /// An empty list, meaning "no value".
    pub fn none(mut self, name: &str) -> Self {
        let _ = write!(self.out, " {name} {{ }}");
        self
    }

    pub fn bytes(self, name: &str, bytes: &[u8]) -> Self {
        let encoded = BASE64.encode(bytes);
        self.atom(name, encoded)
    }

    pub fn pairs<'p>(mut self, name: &str, pairs: impl IntoIterator<Item = (&'p str, &'p str)>) -> Self {
        let _ = write!(self.out, " {name} {{");
        for (k, v) in pairs {
            let _ = write!(self.out, " {} {}", quote(k), quote(v));
        }
        self.out.push_str(" }");
        self
    }

    pub fn finish(mut self) -> String {
        self.out.push_str(" }");
        self.out
    }
}

/// Quote `s` if it would not survive as a bare word.
pub fn quote(s: &str) -> std::borrow::Cow<'_, str> {
    let bare = !s.is_empty()
        && !s.starts_with("//")
        && !s
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '"' | '\\'));
    if bare {
        return std::borrow::Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('"');
    std::borrow::Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(src: &str) -> Vec<Block> {
        let mut reader = BlockReader::new(src);
        let mut out = Vec::new();
        while let Some(block) = reader.next_block().unwrap() {
            out.push(block);
        }
        out
    }

    #[test]
    fn test_reads_blocks_and_values() {
        let src = "COLOR { name cube1 color { 1 0.5 0 } }\nDONE { }\n";
        let parsed = blocks(src);
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].tag(), "COLOR");
        assert_eq!(parsed[0].fields.atom("name").unwrap(), "cube1");
        assert_eq!(parsed[0].fields.floats::<3>("color").unwrap(), [1.0, 0.5, 0.0]);
        assert_eq!(parsed[1].tag(), "DONE");
        assert!(parsed[1].fields.is_empty());
        assert_eq!(parsed[1].line, 2);
    }

    #[test]
    fn test_comments_and_quotes() {
        let src = "// header comment\nTEXTURE { name \"my cube\" texture \"a \\\"b\\\"\" } // trailing\n";
        let parsed = blocks(src);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].fields.atom("name").unwrap(), "my cube");
        assert_eq!(parsed[0].fields.atom("texture").unwrap(), "a \"b\"");
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let parsed = blocks("DISPLAY { name a }");
        let err = parsed[0].fields.flag("on").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedField { ref field, .. } if field == "on"));
    }

    #[test]
    fn test_field_without_value() {
        let mut reader = BlockReader::new("DISPLAY { name }");
        assert!(matches!(
            reader.next_block(),
            Err(ProtocolError::MalformedField { .. })
        ));
    }

    #[test]
    fn test_unterminated_block() {
        let mut reader = BlockReader::new("CREATE { name a");
        assert!(matches!(
            reader.next_block(),
            Err(ProtocolError::Unterminated { what: "block", .. })
        ));
    }

    #[test]
    fn test_nested_list() {
        let parsed = blocks("X { data { { 1 2 } 3 } }");
        let list = parsed[0].fields.get("data").unwrap().as_list().unwrap();
        assert_eq!(list.len(), 2);
        assert!(list[0].as_list().is_some());
        assert_eq!(list[1].as_atom(), Some("3"));
    }

    #[test]
    fn test_writer_output_reads_back() {
        let line = BlockWriter::new("SEND_GEOM")
            .atom("name", "two words")
            .flag("networked", true)
            .floats("xform", &[1.0, 0.25, -3.5])
            .bytes("payload", &[0, 1, 2, 255])
            .pairs("vars", [("k", "v v")])
            .finish();

        let parsed = blocks(&line);
        let f = &parsed[0].fields;
        assert_eq!(f.atom("name").unwrap(), "two words");
        assert!(f.flag("networked").unwrap());
        assert_eq!(f.floats::<3>("xform").unwrap(), [1.0, 0.25, -3.5]);
        assert_eq!(f.bytes("payload").unwrap(), vec![0, 1, 2, 255]);
        assert_eq!(f.pairs("vars").unwrap(), vec![("k".into(), "v v".into())]);
    }

    #[test]
    fn test_quote_rules() {
        assert_eq!(quote("cube1"), "cube1");
        assert_eq!(quote(""), "\"\"");
        assert_eq!(quote("//x"), "\"//x\"");
        assert_eq!(quote("a{b"), "\"a{b\"");
    }
}
