//! Username templates.
//!
//! Templates use the familiar `{{ pipeline }}` action syntax: a pipeline is a
//! chain of commands separated by `|`, where the value of each stage is
//! passed as the last argument of the next. Values are fields of the input
//! record (`.DisplayName`, `.RoleName`, ...), string or integer literals,
//! parenthesized sub-pipelines, and calls to a fixed function set:
//!
//! | Function | Result |
//! |----------|--------|
//! | `truncate N s` | first `N` runes of `s` |
//! | `truncate_sha256 N s` | `s` cut to `N - 8` runes plus 8 hex chars of the SHA-256 of the cut suffix |
//! | `uppercase s` / `lowercase s` | case conversion |
//! | `replace OLD NEW s` | every `OLD` replaced by `NEW` |
//! | `sha256 s` | hex SHA-256 |
//! | `base64 s` | standard base64 |
//! | `unix_time` / `unix_time_millis` | current Unix time |
//! | `timestamp LAYOUT` | current UTC time in a reference-time layout such as `2006-01-02T15:04:05` |
//! | `uuid` | random UUID v4 |
//! | `random N` | `N` random base62 characters |
//! | `printf FMT args...` | `%s`, `%d`, `%v` and `%%` formatting |
//!
//! ```
//! use std::collections::BTreeMap;
//! use vault_sdk::template::StringTemplate;
//!
//! let tmpl = StringTemplate::new("v-{{.DisplayName | truncate 4}}-{{.RoleName | uppercase}}").unwrap();
//! let mut fields = BTreeMap::new();
//! fields.insert("DisplayName".to_string(), "approle".to_string());
//! fields.insert("RoleName".to_string(), "ro".to_string());
//! assert_eq!(tmpl.generate(&fields).unwrap(), "v-appr-RO");
//! ```

use crate::error::{SdkError, SdkResult};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// A parsed username template.
#[derive(Debug, Clone)]
pub struct StringTemplate {
    source: String,
    nodes: Vec<Node>,
}

#[derive(Debug, Clone)]
enum Node {
    Text(String),
    Action(Pipeline),
}

#[derive(Debug, Clone)]
struct Pipeline {
    commands: Vec<Command>,
}

#[derive(Debug, Clone)]
struct Command {
    operands: Vec<Operand>,
}

#[derive(Debug, Clone)]
enum Operand {
    Field(String),
    Str(String),
    Int(i64),
    Call(Func),
    Sub(Pipeline),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Pipe,
    LParen,
    RParen,
    Field(String),
    Str(String),
    Int(i64),
    Ident(String),
}

#[derive(Debug, Clone)]
enum Val {
    Str(String),
    Int(i64),
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(i) => write!(f, "{i}"),
        }
    }
}

impl Val {
    fn into_string(self) -> String {
        match self {
            Self::Str(s) => s,
            Self::Int(i) => i.to_string(),
        }
    }

    fn as_int(&self, func: &str) -> SdkResult<i64> {
        match self {
            Self::Int(i) => Ok(*i),
            Self::Str(s) => s
                .parse()
                .map_err(|_| SdkError::template(format!("{func}: expected integer, got {s:?}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Func {
    Truncate,
    TruncateSha256,
    Uppercase,
    Lowercase,
    Replace,
    Sha256,
    Base64,
    UnixTime,
    UnixTimeMillis,
    Timestamp,
    Uuid,
    Random,
    Printf,
}

impl Func {
    fn lookup(name: &str) -> SdkResult<Self> {
        Ok(match name {
            "truncate" => Self::Truncate,
            "truncate_sha256" => Self::TruncateSha256,
            "uppercase" => Self::Uppercase,
            "lowercase" => Self::Lowercase,
            "replace" => Self::Replace,
            "sha256" => Self::Sha256,
            "base64" => Self::Base64,
            "unix_time" => Self::UnixTime,
            "unix_time_millis" => Self::UnixTimeMillis,
            "timestamp" => Self::Timestamp,
            "uuid" => Self::Uuid,
            "random" => Self::Random,
            "printf" => Self::Printf,
            _ => return Err(SdkError::template(format!("function {name:?} not defined"))),
        })
    }

    const fn name(self) -> &'static str {
        match self {
            Self::Truncate => "truncate",
            Self::TruncateSha256 => "truncate_sha256",
            Self::Uppercase => "uppercase",
            Self::Lowercase => "lowercase",
            Self::Replace => "replace",
            Self::Sha256 => "sha256",
            Self::Base64 => "base64",
            Self::UnixTime => "unix_time",
            Self::UnixTimeMillis => "unix_time_millis",
            Self::Timestamp => "timestamp",
            Self::Uuid => "uuid",
            Self::Random => "random",
            Self::Printf => "printf",
        }
    }

    fn check_arity(self, argc: usize) -> SdkResult<()> {
        let ok = match self {
            Self::UnixTime | Self::UnixTimeMillis | Self::Uuid => argc == 0,
            Self::Uppercase | Self::Lowercase | Self::Sha256 | Self::Base64 | Self::Timestamp | Self::Random => {
                argc == 1
            }
            Self::Truncate | Self::TruncateSha256 => argc == 2,
            Self::Replace => argc == 3,
            Self::Printf => argc >= 1,
        };
        if ok {
            Ok(())
        } else {
            Err(SdkError::template(format!(
                "wrong number of args for {}: got {argc}",
                self.name()
            )))
        }
    }

    fn call(self, mut args: Vec<Val>, now: DateTime<Utc>) -> SdkResult<Val> {
        self.check_arity(args.len())?;
        let name = self.name();
        Ok(match self {
            Self::Truncate => {
                let s = pop_str(&mut args);
                let max = positive(args[0].as_int(name)?, 0, name)?;
                Val::Str(s.chars().take(max).collect())
            }
            Self::TruncateSha256 => {
                let s = pop_str(&mut args);
                let max = positive(args[0].as_int(name)?, 8, name)?;
                let runes: Vec<char> = s.chars().collect();
                if runes.len() <= max {
                    Val::Str(s)
                } else {
                    let keep: String = runes[..max - 8].iter().collect();
                    let cut: String = runes[max - 8..].iter().collect();
                    let hash = hex::encode(Sha256::digest(cut.as_bytes()));
                    Val::Str(format!("{keep}{}", &hash[..8]))
                }
            }
            Self::Uppercase => Val::Str(pop_str(&mut args).to_uppercase()),
            Self::Lowercase => Val::Str(pop_str(&mut args).to_lowercase()),
            Self::Replace => {
                let s = pop_str(&mut args);
                let new = pop_str(&mut args);
                let old = pop_str(&mut args);
                Val::Str(s.replace(&old, &new))
            }
            Self::Sha256 => Val::Str(hex::encode(Sha256::digest(pop_str(&mut args).as_bytes()))),
            Self::Base64 => Val::Str(base64::engine::general_purpose::STANDARD.encode(pop_str(&mut args))),
            Self::UnixTime => Val::Int(now.timestamp()),
            Self::UnixTimeMillis => Val::Int(now.timestamp_millis()),
            Self::Timestamp => {
                let layout = pop_str(&mut args);
                Val::Str(now.format(&go_layout_to_strftime(&layout)).to_string())
            }
            Self::Uuid => Val::Str(uuid::Uuid::new_v4().to_string()),
            Self::Random => {
                let n = positive(args[0].as_int(name)?, 0, name)?;
                Val::Str(credential_random::base62::random(n)?)
            }
            Self::Printf => {
                let format = args.remove(0).into_string();
                Val::Str(printf(&format, args)?)
            }
        })
    }
}

fn pop_str(args: &mut Vec<Val>) -> String {
    args.pop().map(Val::into_string).unwrap_or_default()
}

fn positive(n: i64, floor: usize, func: &str) -> SdkResult<usize> {
    usize::try_from(n)
        .ok()
        .filter(|n| *n > floor)
        .ok_or_else(|| SdkError::template(format!("{func}: length must be > {floor}, got {n}")))
}

fn printf(format: &str, args: Vec<Val>) -> SdkResult<String> {
    let mut out = String::with_capacity(format.len());
    let mut args = args.into_iter();
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some('s' | 'v' | 'd') => match args.next() {
                Some(v) => out.push_str(&v.to_string()),
                None => out.push_str("%!(MISSING)"),
            },
            Some(other) => {
                return Err(SdkError::template(format!("printf: unsupported verb %{other}")));
            }
            None => out.push_str("%!(NOVERB)"),
        }
    }
    Ok(out)
}

/// Translate a reference-time layout (`Mon Jan 2 15:04:05 MST 2006`) to a
/// chrono format string.
fn go_layout_to_strftime(layout: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        (".000000000", "%.9f"),
        ("January", "%B"),
        ("Monday", "%A"),
        (".000000", "%.6f"),
        ("-07:00", "%:z"),
        ("-0700", "%z"),
        (".000", "%.3f"),
        ("2006", "%Y"),
        ("Jan", "%b"),
        ("Mon", "%a"),
        ("MST", "%Z"),
        ("01", "%m"),
        ("02", "%d"),
        ("03", "%I"),
        ("04", "%M"),
        ("05", "%S"),
        ("06", "%y"),
        ("15", "%H"),
        ("PM", "%p"),
        ("1", "%-m"),
        ("2", "%-d"),
        ("3", "%-I"),
        ("4", "%-M"),
        ("5", "%-S"),
    ];
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'outer: while let Some(c) = rest.chars().next() {
        for (go, strftime) in TOKENS {
            if let Some(tail) = rest.strip_prefix(go) {
                out.push_str(strftime);
                rest = tail;
                continue 'outer;
            }
        }
        if c == '%' {
            out.push_str("%%");
        } else {
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn tokenize(src: &str) -> SdkResult<Vec<Token>> {
    let chars: Vec<char> = src.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    let word = |i: usize| chars.get(i).is_some_and(|c| c.is_alphanumeric() || *c == '_');

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '.' => {
                let start = i + 1;
                i = start;
                while word(i) {
                    i += 1;
                }
                if i == start {
                    return Err(SdkError::template("field name expected after '.'"));
                }
                tokens.push(Token::Field(chars[start..i].iter().collect()));
            }
            '"' => {
                i += 1;
                let mut s = String::new();
                loop {
                    match chars.get(i) {
                        None => return Err(SdkError::template("unterminated quoted string")),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = match chars.get(i + 1) {
                                Some('n') => '\n',
                                Some('t') => '\t',
                                Some('"') => '"',
                                Some('\\') => '\\',
                                other => {
                                    return Err(SdkError::template(format!("invalid escape {other:?}")));
                                }
                            };
                            s.push(escaped);
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            '`' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|c| *c == '`')
                    .ok_or_else(|| SdkError::template("unterminated raw string"))?;
                tokens.push(Token::Str(chars[start..start + end].iter().collect()));
                i = start + end + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) => {
                let start = i;
                i += 1;
                while chars.get(i).is_some_and(char::is_ascii_digit) {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse()
                    .map_err(|_| SdkError::template(format!("invalid number {text}")))?;
                tokens.push(Token::Int(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while word(i) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => return Err(SdkError::template(format!("unexpected character {other:?} in action"))),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_pipeline(&mut self) -> SdkResult<Pipeline> {
        let mut commands = vec![self.parse_command()?];
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            commands.push(self.parse_command()?);
        }

        for (i, cmd) in commands.iter().enumerate() {
            let piped = usize::from(i > 0);
            match &cmd.operands[0] {
                Operand::Call(func) => func.check_arity(cmd.operands.len() - 1 + piped)?,
                _ if i > 0 => return Err(SdkError::template("cannot pipe a value into a non-function")),
                _ if cmd.operands.len() > 1 => {
                    return Err(SdkError::template("can't give arguments to a non-function"));
                }
                _ => {}
            }
            for operand in &cmd.operands[1..] {
                if let Operand::Call(func) = operand {
                    func.check_arity(0)?;
                }
            }
        }
        Ok(Pipeline { commands })
    }

    fn parse_command(&mut self) -> SdkResult<Command> {
        let mut operands = Vec::new();
        loop {
            let operand = match self.peek() {
                None | Some(Token::Pipe | Token::RParen) => break,
                Some(Token::LParen) => {
                    self.pos += 1;
                    let sub = self.parse_pipeline()?;
                    if self.peek() != Some(&Token::RParen) {
                        return Err(SdkError::template("unclosed left paren"));
                    }
                    Operand::Sub(sub)
                }
                Some(Token::Field(name)) => Operand::Field(name.clone()),
                Some(Token::Str(s)) => Operand::Str(s.clone()),
                Some(Token::Int(n)) => Operand::Int(*n),
                Some(Token::Ident(name)) => Operand::Call(Func::lookup(name)?),
            };
            self.pos += 1;
            operands.push(operand);
        }
        if operands.is_empty() {
            return Err(SdkError::template("missing value for command"));
        }
        Ok(Command { operands })
    }
}

fn parse_action(src: &str) -> SdkResult<Pipeline> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
    };
    let pipeline = parser.parse_pipeline()?;
    if parser.pos != parser.tokens.len() {
        return Err(SdkError::template(format!("unexpected {:?} in action", parser.tokens[parser.pos])));
    }
    Ok(pipeline)
}

struct EvalContext<'a> {
    fields: &'a BTreeMap<String, String>,
    now: DateTime<Utc>,
}

impl EvalContext<'_> {
    fn pipeline(&self, pipeline: &Pipeline) -> SdkResult<Val> {
        let mut value: Option<Val> = None;
        for cmd in &pipeline.commands {
            value = Some(self.command(cmd, value.take())?);
        }
        value.ok_or_else(|| SdkError::template("empty pipeline"))
    }

    fn command(&self, cmd: &Command, piped: Option<Val>) -> SdkResult<Val> {
        match &cmd.operands[0] {
            Operand::Call(func) => {
                let mut args = cmd.operands[1..]
                    .iter()
                    .map(|o| self.operand(o))
                    .collect::<SdkResult<Vec<_>>>()?;
                args.extend(piped);
                func.call(args, self.now)
            }
            other => self.operand(other),
        }
    }

    fn operand(&self, operand: &Operand) -> SdkResult<Val> {
        match operand {
            Operand::Field(name) => self
                .fields
                .get(name)
                .cloned()
                .map(Val::Str)
                .ok_or_else(|| SdkError::template(format!("no field {name:?} in template input"))),
            Operand::Str(s) => Ok(Val::Str(s.clone())),
            Operand::Int(n) => Ok(Val::Int(*n)),
            Operand::Call(func) => func.call(Vec::new(), self.now),
            Operand::Sub(pipeline) => self.pipeline(pipeline),
        }
    }
}

impl StringTemplate {
    /// Parse a template.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Template`] on unbalanced delimiters, unknown
    /// functions, or wrong argument counts.
    pub fn new(source: &str) -> SdkResult<Self> {
        if source.trim().is_empty() {
            return Err(SdkError::template("template must not be empty"));
        }

        let mut nodes = Vec::new();
        let mut rest = source;
        let mut trim_next = false;
        while let Some(open) = rest.find("{{") {
            let mut text = &rest[..open];
            if trim_next {
                text = text.trim_start();
            }
            let after_open = &rest[open + 2..];
            let close = after_open
                .find("}}")
                .ok_or_else(|| SdkError::template("unclosed action"))?;
            let mut action = &after_open[..close];

            if let Some(a) = action.strip_prefix('-') {
                text = text.trim_end();
                action = a;
            }
            trim_next = false;
            if let Some(a) = action.strip_suffix('-') {
                trim_next = true;
                action = a;
            }

            if !text.is_empty() {
                nodes.push(Node::Text(text.to_string()));
            }
            nodes.push(Node::Action(parse_action(action)?));
            rest = &after_open[close + 2..];
        }
        if rest.contains("}}") {
            return Err(SdkError::template("unexpected \"}}\" outside of an action"));
        }
        let tail = if trim_next { rest.trim_start() } else { rest };
        if !tail.is_empty() {
            nodes.push(Node::Text(tail.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            nodes,
        })
    }

    /// The original template text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render with the current time.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Template`] if a referenced field is missing or a
    /// function fails.
    pub fn generate(&self, fields: &BTreeMap<String, String>) -> SdkResult<String> {
        self.generate_at(fields, Utc::now())
    }

    /// Render with a fixed time for `unix_time`, `unix_time_millis` and
    /// `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`SdkError::Template`] if a referenced field is missing or a
    /// function fails.
    pub fn generate_at(&self, fields: &BTreeMap<String, String>, now: DateTime<Utc>) -> SdkResult<String> {
        let ctx = EvalContext { fields, now };
        let mut out = String::new();
        for node in &self.nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Action(pipeline) => out.push_str(&ctx.pipeline(pipeline)?.into_string()),
            }
        }
        Ok(out)
    }
}
