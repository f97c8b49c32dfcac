use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::Channel;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub channel: Channel,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Template {
    pub fn new(name: &str, channel: Channel, body: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::EmptyTemplateName);
        }
        if body.is_empty() {
            return Err(Error::EmptyTemplateBody);
        }
        parse(body).map_err(Error::InvalidTemplateBody)?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(),
            name: name.to_string(),
            channel,
            body: body.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn render(&self, variables: &BTreeMap<String, String>) -> Result<String> {
        let segments = parse(&self.body).map_err(Error::TemplateRenderFailed)?;

        let mut out = String::with_capacity(self.body.len());
        for segment in segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Variable(name) => match variables.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        return Err(Error::TemplateRenderFailed(format!(
                            "undefined variable {:?}",
                            name
                        )))
                    }
                },
            }
        }

        Ok(out)
    }
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Literal(&'a str),
    Variable(&'a str),
}

/// Splits a body into literal and `{{.Name}}` segments. A lone `}}` is
/// literal text; an unclosed `{{` or a malformed reference is an error.
fn parse(body: &str) -> std::result::Result<Vec<Segment<'_>>, String> {
    let mut segments = Vec::new();
    let mut rest = body;

    while let Some(open) = rest.find("{{") {
        if open > 0 {
            segments.push(Segment::Literal(&rest[..open]));
        }
        rest = &rest[open + 2..];

        let close = rest
            .find("}}")
            .ok_or_else(|| "unclosed {{ delimiter".to_string())?;
        let token = rest[..close].trim();

        let name = token
            .strip_prefix('.')
            .ok_or_else(|| format!("expected {{{{.Variable}}}}, found {:?}", token))?;
        if name.is_empty() || !is_identifier(name) {
            return Err(format!("invalid variable name {:?}", name));
        }

        segments.push(Segment::Variable(name));
        rest = &rest[close + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }

    Ok(segments)
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
