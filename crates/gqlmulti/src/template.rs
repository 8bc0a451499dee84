use crate::types::ParamSet;
use thiserror::Error;

/// Name of the reserved placeholder that receives the pagination fragment
pub const CURSOR_PLACEHOLDER: &str = "after";

/// A sub-query template with named placeholders.
///
/// The syntax is fixed: `{name}` marks a placeholder to be filled from a
/// [`ParamSet`], literal braces must be doubled (`{{` and `}}`), and the
/// reserved placeholder `{after}` marks the spot where the pagination driver
/// splices each round's cursor fragment.  The query text itself is opaque;
/// nothing here knows GraphQL.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Segment {
    Literal(String),
    Field(String),
    Cursor,
}

impl Template {
    pub fn parse(source: &str) -> Result<Template, TemplateError> {
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '{' if chars.peek() == Some(&'{') => {
                    let _ = chars.next();
                    literal.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => return Err(TemplateError::Unterminated),
                            Some(c) => name.push(c),
                        }
                    }
                    if name.is_empty() {
                        return Err(TemplateError::EmptyPlaceholder);
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    if name == CURSOR_PLACEHOLDER {
                        segments.push(Segment::Cursor);
                    } else {
                        segments.push(Segment::Field(name));
                    }
                }
                '}' if chars.peek() == Some(&'}') => {
                    let _ = chars.next();
                    literal.push('}');
                }
                '}' => return Err(TemplateError::UnmatchedBrace),
                _ => literal.push(ch),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(Template { segments })
    }

    /// Whether the template contains the reserved `{after}` placeholder
    pub fn has_cursor_slot(&self) -> bool {
        self.segments.iter().any(|s| s == &Segment::Cursor)
    }

    /// Substitutes every named placeholder from `params`, leaving cursor
    /// slots open for later rounds
    pub fn render(&self, params: &ParamSet) -> Result<Rendered, TemplateError> {
        let mut chunks = Vec::new();
        let mut text = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => text.push_str(s),
                Segment::Field(name) => {
                    let value = params
                        .get(name)
                        .ok_or_else(|| TemplateError::MissingField(name.clone()))?;
                    text.push_str(value);
                }
                Segment::Cursor => {
                    if !text.is_empty() {
                        chunks.push(Chunk::Text(std::mem::take(&mut text)));
                    }
                    chunks.push(Chunk::Cursor);
                }
            }
        }
        if !text.is_empty() {
            chunks.push(Chunk::Text(text));
        }
        Ok(Rendered { chunks })
    }
}

/// A template with its parameters substituted and its cursor slots still open
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Rendered {
    chunks: Vec<Chunk>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Chunk {
    Text(String),
    Cursor,
}

impl Rendered {
    /// Produces the final sub-query text with `fragment` substituted verbatim
    /// into every cursor slot
    pub fn with_cursor(&self, fragment: &str) -> String {
        let mut out = String::new();
        for chunk in &self.chunks {
            match chunk {
                Chunk::Text(s) => out.push_str(s),
                Chunk::Cursor => out.push_str(fragment),
            }
        }
        out
    }
}

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum TemplateError {
    #[error("placeholder opened but never closed in query template")]
    Unterminated,
    #[error("single '}}' without matching '{{' in query template")]
    UnmatchedBrace,
    #[error("empty placeholder in query template")]
    EmptyPlaceholder,
    #[error("no value supplied for template field {0:?}")]
    MissingField(String),
}
