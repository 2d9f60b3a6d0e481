//! Preprocessing pipeline strings.
//!
//! A pipeline such as
//! `decode|resize_small(256)|central_crop(224)|onehot(1000, key="label")`
//! is a `|`-separated list of ops. This module only parses and checks the
//! string; running the ops is left to the input pipeline.

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::config::ConfigValue;
use crate::error::{BigVisionError, Result};

/// Ops the bundled configs use.
pub const KNOWN_OPS: &[&str] = &[
    "decode",
    "decode_jpeg_and_inception_crop",
    "inception_crop",
    "random_crop",
    "central_crop",
    "resize",
    "resize_small",
    "flip_lr",
    "randaug",
    "value_range",
    "onehot",
    "keep",
];

/// One op of a pipeline with its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpOp {
    pub name: String,
    pub args: Vec<ConfigValue>,
    pub kwargs: Vec<(String, ConfigValue)>,
}

impl PpOp {
    pub fn kwarg(&self, key: &str) -> Option<&ConfigValue> {
        self.kwargs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }
}

impl fmt::Display for PpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if self.args.is_empty() && self.kwargs.is_empty() {
            return Ok(());
        }
        write!(f, "(")?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write_value(f, arg)?;
        }
        for (key, value) in &self.kwargs {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{}=", key)?;
            write_value(f, value)?;
        }
        write!(f, ")")
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: &ConfigValue) -> fmt::Result {
    match value {
        ConfigValue::Str(s) => write_quoted(f, s),
        ConfigValue::List(items) => {
            write!(f, "(")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_value(f, item)?;
            }
            write!(f, ")")
        }
        other => write!(f, "{}", other),
    }
}

/// Double-quoted, escaping only what `Parser::string` reads back.
fn write_quoted(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_char('"')?;
    for c in s.chars() {
        match c {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}

/// Renders ops back into a pipeline string.
pub fn to_string(ops: &[PpOp]) -> String {
    ops.iter().map(ToString::to_string).collect::<Vec<_>>().join("|")
}

/// Parses a pipeline string. Empty segments are skipped.
pub fn parse(spec: &str) -> Result<Vec<PpOp>> {
    let mut parser = Parser { src: spec, pos: 0 };
    let mut ops = Vec::new();
    loop {
        parser.skip_ws();
        match parser.peek() {
            None => break,
            Some('|') => {
                parser.pos += 1;
                continue;
            }
            Some(_) => {}
        }
        ops.push(parser.op()?);
        parser.skip_ws();
        match parser.peek() {
            None => break,
            Some('|') => parser.pos += 1,
            Some(c) => return Err(parser.error(format!("expected `|` after op, found `{}`", c))),
        }
    }
    Ok(ops)
}

/// Fails on the first op whose name is not in `known`.
pub fn validate(ops: &[PpOp], known: &[&str]) -> Result<()> {
    match ops.iter().find(|op| !known.contains(&op.name.as_str())) {
        Some(op) => Err(BigVisionError::unknown("preprocessing op", &op.name)),
        None => Ok(()),
    }
}

/// [`parse`] followed by [`validate`] against [`KNOWN_OPS`].
pub fn parse_known(spec: &str) -> Result<Vec<PpOp>> {
    let ops = parse(spec)?;
    validate(&ops, KNOWN_OPS)?;
    Ok(ops)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().map_or(false, char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, message: impl Into<String>) -> BigVisionError {
        BigVisionError::PpParse {
            offset: self.pos,
            message: message.into(),
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.peek() {
            Some(c) if c == want => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected `{}`, found `{}`", want, c))),
            None => Err(self.error(format!("expected `{}`, found end of input", want))),
        }
    }

    fn ident(&mut self) -> Result<&'a str> {
        let start = self.pos;
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            Some(c) => return Err(self.error(format!("expected a name, found `{}`", c))),
            None => return Err(self.error("expected a name, found end of input")),
        }
        while self.peek().map_or(false, |c| c.is_ascii_alphanumeric() || c == '_') {
            self.bump();
        }
        Ok(&self.src[start..self.pos])
    }

    fn op(&mut self) -> Result<PpOp> {
        let name = self.ident()?.to_string();
        let mut op = PpOp {
            name,
            args: Vec::new(),
            kwargs: Vec::new(),
        };
        self.skip_ws();
        if self.peek() != Some('(') {
            return Ok(op);
        }
        self.bump();
        loop {
            self.skip_ws();
            if self.peek() == Some(')') {
                self.bump();
                return Ok(op);
            }
            match self.keyword()? {
                Some(key) => {
                    let value = self.value()?;
                    op.kwargs.push((key, value));
                }
                None => {
                    if !op.kwargs.is_empty() {
                        return Err(self.error("positional argument after keyword argument"));
                    }
                    op.args.push(self.value()?);
                }
            }
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                }
                Some(')') => {}
                Some(c) => return Err(self.error(format!("expected `,` or `)`, found `{}`", c))),
                None => return Err(self.error("unclosed `(`")),
            }
        }
    }

    /// Consumes `name=` if present.
    fn keyword(&mut self) -> Result<Option<String>> {
        let start = self.pos;
        if !self.peek().map_or(false, |c| c.is_ascii_alphabetic() || c == '_') {
            return Ok(None);
        }
        let name = self.ident()?;
        self.skip_ws();
        if self.peek() == Some('=') {
            self.bump();
            self.skip_ws();
            return Ok(Some(name.to_string()));
        }
        self.pos = start;
        Ok(None)
    }

    fn value(&mut self) -> Result<ConfigValue> {
        self.skip_ws();
        match self.peek() {
            Some(q @ ('"' | '\'')) => self.string(q),
            Some('(') => self.sequence(')'),
            Some('[') => self.sequence(']'),
            Some(c) if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => self.number(),
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                match self.ident()? {
                    "True" => Ok(ConfigValue::Bool(true)),
                    "False" => Ok(ConfigValue::Bool(false)),
                    "None" => Ok(ConfigValue::None),
                    other => {
                        let message = format!("unexpected name `{}`", other);
                        self.pos = start;
                        Err(self.error(message))
                    }
                }
            }
            Some(c) => Err(self.error(format!("unexpected `{}`", c))),
            None => Err(self.error("expected a value, found end of input")),
        }
    }

    fn string(&mut self, quote: char) -> Result<ConfigValue> {
        let start = self.pos;
        self.bump();
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\\') => match self.bump() {
                    Some('n') => out.push('\n'),
                    Some('t') => out.push('\t'),
                    Some(c) => out.push(c),
                    None => break,
                },
                Some(c) if c == quote => return Ok(ConfigValue::Str(out)),
                Some(c) => out.push(c),
                None => break,
            }
        }
        self.pos = start;
        Err(self.error("unterminated string"))
    }

    fn sequence(&mut self, close: char) -> Result<ConfigValue> {
        self.bump();
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            if self.peek() == Some(close) {
                self.bump();
                return Ok(ConfigValue::List(items));
            }
            items.push(self.value()?);
            self.skip_ws();
            if self.peek() == Some(',') {
                self.bump();
            } else {
                self.expect(close)?;
                return Ok(ConfigValue::List(items));
            }
        }
    }

    fn number(&mut self) -> Result<ConfigValue> {
        let start = self.pos;
        let mut prev = None;
        while let Some(c) = self.peek() {
            let sign_ok = (c == '-' || c == '+') && (self.pos == start || matches!(prev, Some('e' | 'E')));
            if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || c == '_' || sign_ok {
                prev = Some(c);
                self.bump();
            } else {
                break;
            }
        }
        let text: String = self.src[start..self.pos].chars().filter(|&c| c != '_').collect();
        let is_float = text.contains(&['.', 'e', 'E'][..]);
        let parsed = if is_float {
            text.parse::<f64>().ok().map(ConfigValue::Float)
        } else {
            text.parse::<i64>().ok().map(ConfigValue::Int)
        };
        parsed.ok_or_else(|| BigVisionError::PpParse {
            offset: start,
            message: format!("invalid number `{}`", text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_eval_pipeline() {
        let spec = "decode|resize_small(256)|central_crop(224)|value_range(-1, 1)\
                    |onehot(1000, key=\"label\", key_result=\"labels\")|keep(\"image\", \"labels\")";
        let ops = parse(spec).unwrap();
        let names: Vec<&str> = ops.iter().map(|op| op.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["decode", "resize_small", "central_crop", "value_range", "onehot", "keep"]
        );
        assert_eq!(ops[3].args, vec![ConfigValue::Int(-1), ConfigValue::Int(1)]);
        assert_eq!(ops[4].args, vec![ConfigValue::Int(1000)]);
        assert_eq!(ops[4].kwarg("key"), Some(&ConfigValue::from("label")));
        assert_eq!(ops[4].kwarg("key_result"), Some(&ConfigValue::from("labels")));
        assert!(ops[0].args.is_empty());
    }

    #[test]
    fn test_empty_segments_are_skipped() {
        let ops = parse("decode_jpeg_and_inception_crop(224)|flip_lr||value_range(-1, 1)").unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(parse("").unwrap(), vec![]);
    }

    #[test]
    fn test_values() {
        let ops = parse("op(1.5, -2e-3, 'a|b', True, None, (1, 2), [3], x=False)").unwrap();
        let op = &ops[0];
        assert_eq!(
            op.args,
            vec![
                ConfigValue::Float(1.5),
                ConfigValue::Float(-2e-3),
                ConfigValue::from("a|b"),
                ConfigValue::Bool(true),
                ConfigValue::None,
                ConfigValue::list(vec![1, 2]),
                ConfigValue::list(vec![3]),
            ]
        );
        assert_eq!(op.kwarg("x"), Some(&ConfigValue::Bool(false)));
    }

    #[test]
    fn test_display_is_canonical() {
        let spec = "onehot(1000, key='label')|keep('image', 'labels')|flip_lr";
        let ops = parse(spec).unwrap();
        let rendered = to_string(&ops);
        assert_eq!(
            rendered,
            "onehot(1000, key=\"label\")|keep(\"image\", \"labels\")|flip_lr"
        );
        assert_eq!(parse(&rendered).unwrap(), ops);
    }

    #[test]
    fn test_strings_survive_rendering() {
        let text = "say \"hi\"\\ \r\u{1}\u{7f} caf\u{e9}\n\tend";
        let op = PpOp {
            name: "keep".to_string(),
            args: vec![ConfigValue::from(text)],
            kwargs: vec![("key".to_string(), ConfigValue::from("\r"))],
        };
        let reparsed = parse(&op.to_string()).unwrap();
        assert_eq!(reparsed, vec![op]);
        assert_eq!(reparsed[0].args[0].as_str(), Some(text));
    }

    #[test]
    fn test_errors_carry_offsets() {
        match parse("decode|resize(256") {
            Err(BigVisionError::PpParse { offset, .. }) => assert_eq!(offset, 17),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(parse("keep(\"image)").is_err());
        assert!(parse("onehot(key=1, 2)").is_err());
        assert!(parse("resize(foo)").is_err());
        assert!(parse("decode resize").is_err());
    }

    #[test]
    fn test_validate_unknown_op() {
        assert!(parse_known("decode|flip_lr").is_ok());
        assert!(matches!(
            parse_known("decode|mixup(0.5)"),
            Err(BigVisionError::Unknown { .. })
        ));
    }
}
