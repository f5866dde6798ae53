//! Template parsing and evaluation
//!
//! Text with `{{ ... }}` actions. Supported actions:
//!
//! - `{{ getv "/key" }}` / `{{ getv "/key" "default" }}`: value of a key/value leaf
//! - `{{ env "NAME" }}` / `{{ env "NAME" "default" }}`: process environment variable

use crate::error::{KvError, RenderError};
use crate::kv::KvStore;
use crate::types::normalize_key;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    GetValue { key: String, default: Option<String> },
    Env { name: String, default: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Action(Action),
}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            if start > 0 {
                segments.push(Segment::Text(rest[..start].to_string()));
            }
            let body_start = start + OPEN.len();
            let end = rest[body_start..]
                .find(CLOSE)
                .ok_or(RenderError::Unterminated(offset + start))?;
            let body = &rest[body_start..body_start + end];
            segments.push(Segment::Action(parse_action(body)?));

            let consumed = body_start + end + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(Self { segments })
    }

    /// Keys read by `getv` actions, in order of first use
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for segment in &self.segments {
            if let Segment::Action(Action::GetValue { key, .. }) = segment {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }

    pub async fn render(&self, kv: &dyn KvStore) -> Result<String, RenderError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Action(Action::GetValue { key, default }) => {
                    match kv.get(key).await {
                        Ok(node) if node.is_file() => out.push_str(&node.value),
                        Ok(_) => {
                            return Err(RenderError::BadArguments {
                                function: "getv".to_string(),
                                reason: format!("{} is a directory", key),
                            })
                        }
                        Err(KvError::NotFound(_)) => match default {
                            Some(default) => out.push_str(default),
                            None => return Err(RenderError::MissingKey(key.clone())),
                        },
                        Err(e) => return Err(e.into()),
                    }
                }
                Segment::Action(Action::Env { name, default }) => match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => out.push_str(default.as_deref().unwrap_or("")),
                },
            }
        }
        Ok(out)
    }
}

fn parse_action(body: &str) -> Result<Action, RenderError> {
    let tokens = tokenize(body)?;
    let Some((function, args)) = tokens.split_first() else {
        return Err(RenderError::UnknownFunction(String::new()));
    };
    let Token::Word(function) = function else {
        return Err(RenderError::UnknownFunction(body.trim().to_string()));
    };

    let mut strings = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Token::Quoted(s) => strings.push(s.clone()),
            Token::Word(w) => {
                return Err(RenderError::BadArguments {
                    function: function.clone(),
                    reason: format!("expected a quoted string, got {}", w),
                })
            }
        }
    }

    let arity = |min: usize, max: usize| -> Result<(), RenderError> {
        if strings.len() < min || strings.len() > max {
            return Err(RenderError::BadArguments {
                function: function.clone(),
                reason: format!("takes {} to {} arguments, got {}", min, max, strings.len()),
            });
        }
        Ok(())
    };

    match function.as_str() {
        "getv" => {
            arity(1, 2)?;
            Ok(Action::GetValue {
                key: normalize_key(&strings[0]),
                default: strings.get(1).cloned(),
            })
        }
        "env" => {
            arity(1, 2)?;
            Ok(Action::Env {
                name: strings[0].clone(),
                default: strings.get(1).cloned(),
            })
        }
        other => Err(RenderError::UnknownFunction(other.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
}

fn tokenize(body: &str) -> Result<Vec<Token>, RenderError> {
    let mut tokens = Vec::new();
    let mut chars = body.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(RenderError::BadArguments {
                    function: body.trim().to_string(),
                    reason: "unterminated string".to_string(),
                });
            }
            tokens.push(Token::Quoted(value));
        } else {
            let mut word = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '"' {
                    break;
                }
                word.push(c);
                chars.next();
            }
            tokens.push(Token::Word(word));
        }
    }
    Ok(tokens)
}
