//! `{{ ... }}` expansion for configuration values.
//!
//! Supports a small action language evaluated against the flat key space:
//!
//! ```text
//! url   = "http://{{ .server.host }}:{{ .server.port }}/api"
//! name  = "{{ .app.name | upper }}"
//! home  = "{{ env \"HOME\" }}"
//! level = "{{ default \"info\" .log.level }}"
//! ```
//!
//! `.a.b` looks up the flat key `a.b` (falling back to nested maps); `.`
//! alone is the whole key space. A bare identifier calls a function with
//! the following operands; `x | f a` calls `f(a, x)`. Parentheses group.
//! Control structures are not supported.

use std::collections::HashMap;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

use parking_lot::RwLock;

use super::error::{SourceError, TemplateError};
use super::value::{Map, Value};

/// A template function. Errors are reported with the function's name.
pub type TemplateFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

/// Expands templates in configuration values.
///
/// Functions can be added at any time; sources already wrapped with this
/// processor see them on their next load.
pub struct TemplateProcessor {
    functions: RwLock<HashMap<String, TemplateFn>>,
}

impl TemplateProcessor {
    /// Creates a processor with the built-in function set.
    pub fn new() -> Self {
        let processor = Self {
            functions: RwLock::new(HashMap::new()),
        };
        register_builtins(&processor);
        processor
    }

    /// Adds or replaces a function.
    pub fn add_function(
        &self,
        name: impl Into<String>,
        function: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) {
        self.functions.write().insert(name.into(), Arc::new(function));
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.read().contains_key(name)
    }

    /// Expands every templated string in `data`, using `data` itself as the
    /// variable context.
    pub fn process(&self, data: &Map) -> Result<Map, SourceError> {
        let mut result = Map::new();
        for (key, value) in data {
            let processed = self
                .process_value(value, data)
                .map_err(|source| SourceError::Template {
                    key: key.clone(),
                    source,
                })?;
            result.insert(key.clone(), processed);
        }
        Ok(result)
    }

    fn process_value(&self, value: &Value, ctx: &Map) -> Result<Value, TemplateError> {
        match value {
            Value::String(s) if is_template(s) => self.render(s, ctx).map(Value::String),
            Value::Map(map) => {
                let mut out = Map::new();
                for (k, v) in map {
                    out.insert(k.clone(), self.process_value(v, ctx)?);
                }
                Ok(Value::Map(out))
            }
            Value::List(items) => items
                .iter()
                .map(|item| self.process_value(item, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            other => Ok(other.clone()),
        }
    }

    /// Renders a single template string.
    pub fn render(&self, template: &str, ctx: &Map) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;

        while let Some(start) = rest.find("{{") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            let end = find_action_end(after).ok_or(TemplateError::Unclosed)?;
            let value = self.eval_action(&after[..end], ctx)?;
            out.push_str(&value.to_string());
            rest = &after[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn eval_action(&self, action: &str, ctx: &Map) -> Result<Value, TemplateError> {
        let tokens = lex(action)?;
        if tokens.is_empty() {
            return Err(TemplateError::Syntax("empty action".to_string()));
        }
        let mut parser = Parser {
            tokens: &tokens,
            pos: 0,
        };
        let expr = parser.parse_pipeline()?;
        if parser.pos != tokens.len() {
            return Err(TemplateError::Syntax(format!(
                "unexpected {:?}",
                tokens[parser.pos]
            )));
        }
        self.eval(&expr, ctx)
    }

    fn eval(&self, expr: &Expr, ctx: &Map) -> Result<Value, TemplateError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field(path) => lookup(ctx, path),
            Expr::Call { name, args } => {
                let function = self
                    .functions
                    .read()
                    .get(name)
                    .cloned()
                    .ok_or_else(|| TemplateError::UnknownFunction(name.clone()))?;
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg, ctx))
                    .collect::<Result<Vec<_>, _>>()?;
                function(&args).map_err(|message| TemplateError::Function {
                    name: name.clone(),
                    message,
                })
            }
        }
    }
}

impl Default for TemplateProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TemplateProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let functions = self.functions.read();
        let mut names: Vec<_> = functions.keys().collect();
        names.sort();
        f.debug_struct("TemplateProcessor")
            .field("functions", &names)
            .finish()
    }
}

/// A string is a template when it holds both an opening and closing pair.
pub fn is_template(s: &str) -> bool {
    s.contains("{{") && s.contains("}}")
}

/// Finds the closing `}}`, skipping over quoted strings.
fn find_action_end(s: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut in_string = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' if in_string => i += 1,
            b'"' => in_string = !in_string,
            b'}' if !in_string && bytes.get(i + 1) == Some(&b'}') => return Some(i),
            _ => {}
        }
        i += 1;
    }
    None
}

/// Looks up `.a.b` as the flat key `a.b`, then as a nested path.
fn lookup(ctx: &Map, path: &str) -> Result<Value, TemplateError> {
    if path.is_empty() {
        return Ok(Value::Map(ctx.clone()));
    }
    if let Some(value) = ctx.get(path) {
        return Ok(value.clone());
    }

    let not_found = || TemplateError::MissingVariable(path.to_string());
    let mut parts = path.split('.');
    let first = parts.next().ok_or_else(not_found)?;
    let mut current = ctx.get(first).ok_or_else(not_found)?;
    for part in parts {
        current = current
            .as_map()
            .and_then(|m| m.get(part))
            .ok_or_else(not_found)?;
    }
    Ok(current.clone())
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Ident(String),
    Literal(Value),
    Pipe,
    LParen,
    RParen,
}

fn lex(src: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '|' => {
                chars.next();
                tokens.push(Token::Pipe);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '"' => {
                chars.next();
                tokens.push(Token::Literal(Value::String(lex_string(&mut chars)?)));
            }
            '.' => {
                chars.next();
                let path = take_while(&mut chars, |c| {
                    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
                });
                tokens.push(Token::Field(path));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let text = take_while(&mut chars, |c| {
                    c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E')
                });
                tokens.push(Token::Literal(lex_number(&text)?));
            }
            c if c.is_alphabetic() || c == '_' => {
                let ident = take_while(&mut chars, |c| c.is_alphanumeric() || c == '_');
                tokens.push(match ident.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "nil" => Token::Literal(Value::Null),
                    _ => Token::Ident(ident),
                });
            }
            other => {
                return Err(TemplateError::Syntax(format!(
                    "unexpected character {other:?}"
                )))
            }
        }
    }

    Ok(tokens)
}

fn take_while(chars: &mut Peekable<Chars>, keep: impl Fn(char) -> bool) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !keep(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

fn lex_string(chars: &mut Peekable<Chars>) -> Result<String, TemplateError> {
    let mut out = String::new();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => return Ok(out),
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => break,
            },
            other => out.push(other),
        }
    }
    Err(TemplateError::Syntax("unterminated string".to_string()))
}

fn lex_number(text: &str) -> Result<Value, TemplateError> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    text.parse::<f64>()
        .map(Value::Float)
        .map_err(|_| TemplateError::Syntax(format!("invalid number {text:?}")))
}

#[derive(Debug, Clone)]
enum Expr {
    Literal(Value),
    Field(String),
    Call { name: String, args: Vec<Expr> },
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn parse_pipeline(&mut self) -> Result<Expr, TemplateError> {
        let mut expr = self.parse_command()?;
        while self.peek() == Some(&Token::Pipe) {
            self.pos += 1;
            match self.parse_command()? {
                Expr::Call { name, mut args } => {
                    args.push(expr);
                    expr = Expr::Call { name, args };
                }
                _ => {
                    return Err(TemplateError::Syntax(
                        "pipeline stage must be a function call".to_string(),
                    ))
                }
            }
        }
        Ok(expr)
    }

    fn parse_command(&mut self) -> Result<Expr, TemplateError> {
        if let Some(Token::Ident(name)) = self.peek() {
            let name = name.clone();
            self.pos += 1;
            let mut args = Vec::new();
            while let Some(arg) = self.parse_operand()? {
                args.push(arg);
            }
            return Ok(Expr::Call { name, args });
        }

        let operand = self
            .parse_operand()?
            .ok_or_else(|| TemplateError::Syntax("missing operand".to_string()))?;
        match self.peek() {
            None | Some(Token::Pipe) | Some(Token::RParen) => Ok(operand),
            Some(other) => Err(TemplateError::Syntax(format!("unexpected {other:?}"))),
        }
    }

    /// Returns `None` at the end of a command.
    fn parse_operand(&mut self) -> Result<Option<Expr>, TemplateError> {
        let Some(token) = self.peek().cloned() else {
            return Ok(None);
        };
        let expr = match token {
            Token::Pipe | Token::RParen => return Ok(None),
            Token::Field(path) => Expr::Field(path),
            Token::Literal(value) => Expr::Literal(value),
            // Niladic call in argument position.
            Token::Ident(name) => Expr::Call {
                name,
                args: Vec::new(),
            },
            Token::LParen => {
                self.pos += 1;
                let inner = self.parse_pipeline()?;
                if self.peek() != Some(&Token::RParen) {
                    return Err(TemplateError::Syntax("missing ')'".to_string()));
                }
                self.pos += 1;
                return Ok(Some(inner));
            }
        };
        self.pos += 1;
        Ok(Some(expr))
    }
}

fn arity(args: &[Value], n: usize) -> Result<(), String> {
    if args.len() == n {
        Ok(())
    } else {
        Err(format!("expected {n} arguments, got {}", args.len()))
    }
}

fn unary_str(f: fn(&str) -> String) -> impl Fn(&[Value]) -> Result<Value, String> {
    move |args| {
        arity(args, 1)?;
        Ok(Value::String(f(&args[0].to_string())))
    }
}

fn binary_str(f: fn(&str, &str) -> Value) -> impl Fn(&[Value]) -> Result<Value, String> {
    move |args| {
        arity(args, 2)?;
        Ok(f(&args[0].to_string(), &args[1].to_string()))
    }
}

fn compare(f: fn(f64, f64) -> bool) -> impl Fn(&[Value]) -> Result<Value, String> {
    move |args| {
        arity(args, 2)?;
        let a = as_number(&args[0])?;
        let b = as_number(&args[1])?;
        Ok(Value::Bool(f(a, b)))
    }
}

/// Largest string the `repeat` function may produce, in bytes.
const MAX_REPEAT_LEN: usize = 1 << 20;

fn as_number(value: &Value) -> Result<f64, String> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Float(x) => Ok(*x),
        other => other
            .to_string()
            .trim()
            .parse()
            .map_err(|_| format!("{other} is not a number")),
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(x) => *x != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::List(items) => !items.is_empty(),
        Value::Map(map) => !map.is_empty(),
    }
}

fn as_list(value: &Value) -> Vec<String> {
    match value {
        Value::List(items) => items.iter().map(Value::to_string).collect(),
        Value::String(s) if s.is_empty() => Vec::new(),
        Value::String(s) => s.split(',').map(str::to_string).collect(),
        other => vec![other.to_string()],
    }
}

fn register_builtins(p: &TemplateProcessor) {
    p.add_function("env", |args: &[Value]| {
        arity(args, 1)?;
        Ok(Value::String(
            std::env::var(args[0].to_string()).unwrap_or_default(),
        ))
    });

    p.add_function("lower", unary_str(str::to_lowercase));
    p.add_function("toLower", unary_str(str::to_lowercase));
    p.add_function("upper", unary_str(str::to_uppercase));
    p.add_function("toUpper", unary_str(str::to_uppercase));
    p.add_function("trim", unary_str(|s| s.trim().to_string()));
    p.add_function("trimSpace", unary_str(|s| s.trim().to_string()));

    p.add_function(
        "trimPrefix",
        binary_str(|s, prefix| Value::String(s.strip_prefix(prefix).unwrap_or(s).to_string())),
    );
    p.add_function(
        "trimSuffix",
        binary_str(|s, suffix| Value::String(s.strip_suffix(suffix).unwrap_or(s).to_string())),
    );
    p.add_function("contains", binary_str(|s, sub| Value::Bool(s.contains(sub))));
    p.add_function("hasPrefix", binary_str(|s, p| Value::Bool(s.starts_with(p))));
    p.add_function("hasSuffix", binary_str(|s, p| Value::Bool(s.ends_with(p))));
    p.add_function(
        "split",
        binary_str(|s, sep| Value::List(s.split(sep).map(Value::from).collect())),
    );

    p.add_function("replace", |args: &[Value]| {
        arity(args, 3)?;
        Ok(Value::String(
            args[0]
                .to_string()
                .replace(&args[1].to_string(), &args[2].to_string()),
        ))
    });
    p.add_function("repeat", |args: &[Value]| {
        arity(args, 2)?;
        let n = as_number(&args[1])?;
        if !n.is_finite() || n.fract() != 0.0 || n < 0.0 {
            return Err(format!("repeat count {n} is not a non-negative integer"));
        }
        let s = args[0].to_string();
        let count = n as usize;
        match s.len().checked_mul(count) {
            Some(len) if len <= MAX_REPEAT_LEN => Ok(Value::String(s.repeat(count))),
            _ => Err(format!(
                "repeat output exceeds {MAX_REPEAT_LEN} bytes ({count} x {} bytes)",
                s.len()
            )),
        }
    });
    p.add_function("join", |args: &[Value]| {
        arity(args, 2)?;
        Ok(Value::String(as_list(&args[0]).join(&args[1].to_string())))
    });

    p.add_function("eq", |args: &[Value]| {
        arity(args, 2)?;
        Ok(Value::Bool(args[0].to_string() == args[1].to_string()))
    });
    p.add_function("ne", |args: &[Value]| {
        arity(args, 2)?;
        Ok(Value::Bool(args[0].to_string() != args[1].to_string()))
    });
    p.add_function("lt", compare(|a, b| a < b));
    p.add_function("le", compare(|a, b| a <= b));
    p.add_function("gt", compare(|a, b| a > b));
    p.add_function("ge", compare(|a, b| a >= b));

    p.add_function("and", |args: &[Value]| {
        arity(args, 2)?;
        Ok(Value::Bool(truthy(&args[0]) && truthy(&args[1])))
    });
    p.add_function("or", |args: &[Value]| {
        arity(args, 2)?;
        Ok(Value::Bool(truthy(&args[0]) || truthy(&args[1])))
    });
    p.add_function("not", |args: &[Value]| {
        arity(args, 1)?;
        Ok(Value::Bool(!truthy(&args[0])))
    });

    p.add_function("len", |args: &[Value]| {
        arity(args, 1)?;
        let len = match &args[0] {
            Value::List(items) => items.len(),
            Value::Map(map) => map.len(),
            other => other.to_string().chars().count(),
        };
        Ok(Value::Int(len as i64))
    });

    // default DEFAULT VALUE: VALUE unless it is empty.
    p.add_function("default", |args: &[Value]| {
        arity(args, 2)?;
        if truthy(&args[1]) {
            Ok(args[1].clone())
        } else {
            Ok(args[0].clone())
        }
    });

    // format "x=%v y=%v" a b
    p.add_function("format", |args: &[Value]| {
        let (format, rest) = args
            .split_first()
            .ok_or_else(|| "expected a format string".to_string())?;
        let format = format.to_string();
        let mut out = String::new();
        let mut rest = rest.iter();
        let mut chars = format.chars();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('%') => out.push('%'),
                Some(_) => match rest.next() {
                    Some(arg) => out.push_str(&arg.to_string()),
                    None => return Err("not enough arguments for format".to_string()),
                },
                None => out.push('%'),
            }
        }
        Ok(Value::String(out))
    });
}
