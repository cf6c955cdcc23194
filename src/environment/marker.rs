use std::env::consts;
use std::iter::Peekable;
use std::str::Chars;

use anyhow::{anyhow, bail, Result};

use super::version::Version;

/// The values environment markers are evaluated against.
///
/// Python-derived values are optional: when the interpreter could not be asked and the
/// site-packages path gave no hint, comparisons against them are treated as satisfied so that
/// no dependency edge is hidden.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEnvironment {
    pub python_version: Option<String>,
    pub python_full_version: Option<String>,
    pub sys_platform: String,
    pub platform_system: String,
    pub os_name: String,
    pub platform_machine: String,
    pub implementation_name: String,
    pub platform_python_implementation: String,
}

impl MarkerEnvironment {
    /// Platform values of the machine running the scan, with no Python version known.
    pub fn host() -> Self {
        let (sys_platform, platform_system) = match consts::OS {
            "linux" => ("linux", "Linux"),
            "macos" => ("darwin", "Darwin"),
            "windows" => ("win32", "Windows"),
            "freebsd" => ("freebsd", "FreeBSD"),
            other => (other, other),
        };
        let platform_machine = match (consts::OS, consts::ARCH) {
            ("macos", "aarch64") => "arm64",
            ("windows", "x86_64") => "AMD64",
            (_, arch) => arch,
        };
        MarkerEnvironment {
            python_version: None,
            python_full_version: None,
            sys_platform: sys_platform.to_string(),
            platform_system: platform_system.to_string(),
            os_name: if cfg!(windows) { "nt" } else { "posix" }.to_string(),
            platform_machine: platform_machine.to_string(),
            implementation_name: "cpython".to_string(),
            platform_python_implementation: "CPython".to_string(),
        }
    }

    /// Record the interpreter version, either `X.Y` or a full `X.Y.Z`.
    pub fn with_python_version(mut self, version: &str) -> Self {
        let version = version.trim();
        let short: Vec<&str> = version.split('.').take(2).collect();
        self.python_version = Some(short.join("."));
        self.python_full_version = Some(version.to_string());
        self
    }

    fn lookup(&self, variable: &str) -> Option<String> {
        match variable {
            "python_version" => self.python_version.clone(),
            "python_full_version" => self.python_full_version.clone(),
            "sys_platform" => Some(self.sys_platform.clone()),
            "platform_system" => Some(self.platform_system.clone()),
            "os_name" => Some(self.os_name.clone()),
            "platform_machine" => Some(self.platform_machine.clone()),
            "implementation_name" => Some(self.implementation_name.clone()),
            "platform_python_implementation" => Some(self.platform_python_implementation.clone()),
            // no extras are ever requested
            "extra" => Some(String::new()),
            _ => None,
        }
    }
}

impl Default for MarkerEnvironment {
    fn default() -> Self {
        MarkerEnvironment::host()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compatible,
    Arbitrary,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerValue {
    Variable(String),
    Literal(String),
}

/// A parsed environment marker such as `python_version < "3.8" and sys_platform == "win32"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    And(Vec<Marker>),
    Or(Vec<Marker>),
    Compare {
        lhs: MarkerValue,
        op: Operator,
        rhs: MarkerValue,
    },
}

impl Marker {
    pub fn parse(input: &str) -> Result<Marker> {
        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0 };
        let marker = parser.parse_or()?;
        if parser.pos != parser.tokens.len() {
            bail!("unexpected trailing input in marker `{}`", input);
        }
        Ok(marker)
    }

    pub fn evaluate(&self, env: &MarkerEnvironment) -> bool {
        match self {
            Marker::And(items) => items.iter().all(|m| m.evaluate(env)),
            Marker::Or(items) => items.iter().any(|m| m.evaluate(env)),
            Marker::Compare { lhs, op, rhs } => {
                let (Some(left), Some(right)) = (resolve(lhs, env), resolve(rhs, env)) else {
                    return true;
                };
                if is_extra(lhs) || is_extra(rhs) {
                    let (left, right) = (normalize_extra(&left), normalize_extra(&right));
                    return compare_strings(*op, &left, &right);
                }
                compare(*op, &left, &right)
            }
        }
    }

    /// Whether the marker refers to the `extra` variable anywhere.
    pub fn mentions_extra(&self) -> bool {
        match self {
            Marker::And(items) | Marker::Or(items) => items.iter().any(Marker::mentions_extra),
            Marker::Compare { lhs, rhs, .. } => is_extra(lhs) || is_extra(rhs),
        }
    }
}

fn is_extra(value: &MarkerValue) -> bool {
    matches!(value, MarkerValue::Variable(name) if name == "extra")
}

fn normalize_extra(value: &str) -> String {
    value.to_lowercase().replace(['_', '.'], "-")
}

fn resolve(value: &MarkerValue, env: &MarkerEnvironment) -> Option<String> {
    match value {
        MarkerValue::Literal(literal) => Some(literal.clone()),
        MarkerValue::Variable(name) => env.lookup(name),
    }
}

fn compare(op: Operator, left: &str, right: &str) -> bool {
    if !matches!(op, Operator::In | Operator::NotIn | Operator::Arbitrary) {
        if let Ok(version) = left.parse::<Version>() {
            if let Some(result) = compare_version(op, &version, right) {
                return result;
            }
        }
    }
    compare_strings(op, left, right)
}

fn compare_strings(op: Operator, left: &str, right: &str) -> bool {
    match op {
        Operator::Equal | Operator::Arbitrary => left == right,
        Operator::NotEqual => left != right,
        Operator::Less => left < right,
        Operator::LessEqual => left <= right,
        Operator::Greater => left > right,
        Operator::GreaterEqual => left >= right,
        Operator::Compatible => left == right,
        Operator::In => right.contains(left),
        Operator::NotIn => !right.contains(left),
    }
}

/// Compare `version` against a specifier operand, or `None` if the operand is not a version.
pub fn compare_version(op: Operator, version: &Version, operand: &str) -> Option<bool> {
    if let Some(prefix) = operand.strip_suffix(".*") {
        let prefix: Version = prefix.parse().ok()?;
        let matched = release_starts_with(version, prefix.release());
        return match op {
            Operator::Equal => Some(matched),
            Operator::NotEqual => Some(!matched),
            _ => None,
        };
    }

    let other: Version = operand.parse().ok()?;
    let result = match op {
        Operator::Equal => *version == other,
        Operator::NotEqual => *version != other,
        Operator::Less => *version < other,
        Operator::LessEqual => *version <= other,
        Operator::Greater => *version > other,
        Operator::GreaterEqual => *version >= other,
        Operator::Compatible => {
            let release = other.release();
            if release.len() < 2 {
                return None;
            }
            *version >= other && release_starts_with(version, &release[..release.len() - 1])
        }
        Operator::Arbitrary | Operator::In | Operator::NotIn => return None,
    };
    Some(result)
}

fn release_starts_with(version: &Version, prefix: &[u64]) -> bool {
    prefix
        .iter()
        .enumerate()
        .all(|(i, segment)| version.release().get(i).copied().unwrap_or(0) == *segment)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Str(String),
    Ident(String),
    Op(Operator),
    And,
    Or,
}

fn read_quoted(chars: &mut Peekable<Chars<'_>>, quote: char) -> Result<String> {
    let mut value = String::new();
    for c in chars.by_ref() {
        if c == quote {
            return Ok(value);
        }
        value.push(c);
    }
    Err(anyhow!("unterminated string in marker"))
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' | '\'' => {
                chars.next();
                tokens.push(Token::Str(read_quoted(&mut chars, c)?));
            }
            '=' | '!' | '<' | '>' | '~' => {
                let mut op = String::new();
                while let Some(&c) = chars.peek() {
                    if matches!(c, '=' | '!' | '<' | '>' | '~') {
                        op.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let op = match op.as_str() {
                    "==" => Operator::Equal,
                    "!=" => Operator::NotEqual,
                    "<" => Operator::Less,
                    "<=" => Operator::LessEqual,
                    ">" => Operator::Greater,
                    ">=" => Operator::GreaterEqual,
                    "~=" => Operator::Compatible,
                    "===" => Operator::Arbitrary,
                    other => bail!("unknown marker operator `{}`", other),
                };
                tokens.push(Token::Op(op));
            }
            c if c.is_ascii_alphanumeric() || c == '_' || c == '.' => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                        word.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "in" => Token::Op(Operator::In),
                    "not" => Token::Ident(word),
                    _ => Token::Ident(word.replace('.', "_")),
                };
                tokens.push(token);
            }
            other => bail!("unexpected character `{}` in marker", other),
        }
    }

    // fold `not in` into a single operator
    let mut folded = Vec::with_capacity(tokens.len());
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        if token == Token::Ident("not".to_string()) {
            if iter.peek() == Some(&Token::Op(Operator::In)) {
                iter.next();
                folded.push(Token::Op(Operator::NotIn));
                continue;
            }
            bail!("expected `in` after `not` in marker");
        }
        folded.push(token);
    }
    Ok(folded)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Marker> {
        let mut items = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            items.push(self.parse_and()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Marker::Or(items)
        })
    }

    fn parse_and(&mut self) -> Result<Marker> {
        let mut items = vec![self.parse_atom()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            items.push(self.parse_atom()?);
        }
        Ok(if items.len() == 1 {
            items.remove(0)
        } else {
            Marker::And(items)
        })
    }

    fn parse_atom(&mut self) -> Result<Marker> {
        if self.peek() == Some(&Token::LParen) {
            self.next();
            let inner = self.parse_or()?;
            match self.next() {
                Some(Token::RParen) => return Ok(inner),
                _ => bail!("expected `)` in marker"),
            }
        }
        let lhs = self.parse_value()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => bail!("expected a comparison operator in marker, found {:?}", other),
        };
        let rhs = self.parse_value()?;
        Ok(Marker::Compare { lhs, op, rhs })
    }

    fn parse_value(&mut self) -> Result<MarkerValue> {
        match self.next() {
            Some(Token::Str(value)) => Ok(MarkerValue::Literal(value)),
            Some(Token::Ident(name)) => Ok(MarkerValue::Variable(name)),
            other => bail!("expected a marker variable or string, found {:?}", other),
        }
    }
}
