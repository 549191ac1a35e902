//! Per-call-site acceptance rules
//!
//! Every call site supplies its own notion of "acceptable output" and its own
//! conversion into a typed value. Both live behind [`OutputHandler`] so a single
//! retrying generator can serve all of them.

use super::schema::StructuredFields;
use anyhow::{anyhow, Context, Result};
use serde_json::Value;

/// Output of one attempt, after schema parsing for structured requests
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    raw: String,
    fields: Option<StructuredFields>,
}

impl GenerationOutput {
    pub fn text_only(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            fields: None,
        }
    }

    pub fn structured(raw: impl Into<String>, fields: StructuredFields) -> Self {
        Self {
            raw: raw.into(),
            fields: Some(fields),
        }
    }

    /// Raw output exactly as the service returned it
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Raw output without surrounding whitespace
    pub fn text(&self) -> &str {
        self.raw.trim()
    }

    pub fn fields(&self) -> Option<&StructuredFields> {
        self.fields.as_ref()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|fields| fields.get(name))
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    pub fn int_field(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(Value::as_i64)
    }
}

/// Validator and transformer pair supplied by a call site
pub trait OutputHandler<T>: Send + Sync {
    /// Semantic acceptance check
    fn validate(&self, output: &GenerationOutput) -> bool;

    /// Convert an accepted output into the call site's value
    fn transform(&self, output: &GenerationOutput) -> Result<T>;
}

/// Handler built from two closures
pub struct FnHandler<V, F> {
    validate: V,
    transform: F,
}

/// Build a handler from a validator closure and a transformer closure
pub fn handler<T, V, F>(validate: V, transform: F) -> FnHandler<V, F>
where
    V: Fn(&GenerationOutput) -> bool + Send + Sync,
    F: Fn(&GenerationOutput) -> Result<T> + Send + Sync,
{
    FnHandler {
        validate,
        transform,
    }
}

impl<T, V, F> OutputHandler<T> for FnHandler<V, F>
where
    V: Fn(&GenerationOutput) -> bool + Send + Sync,
    F: Fn(&GenerationOutput) -> Result<T> + Send + Sync,
{
    fn validate(&self, output: &GenerationOutput) -> bool {
        (self.validate)(output)
    }

    fn transform(&self, output: &GenerationOutput) -> Result<T> {
        (self.transform)(output)
    }
}

/// Accepts any non-blank text and returns it trimmed
pub struct NonEmptyText;

impl OutputHandler<String> for NonEmptyText {
    fn validate(&self, output: &GenerationOutput) -> bool {
        !output.text().is_empty()
    }

    fn transform(&self, output: &GenerationOutput) -> Result<String> {
        Ok(output.text().to_string())
    }
}

/// Accepts output whose leading token is an integer within `[min, max]`
pub struct IntegerInRange {
    pub min: i64,
    pub max: i64,
}

impl IntegerInRange {
    pub fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    fn parse(&self, output: &GenerationOutput) -> Option<i64> {
        let token = output.text().split_whitespace().next()?;
        let token = token.trim_matches(|c: char| !c.is_ascii_digit() && c != '-');
        token.parse::<i64>().ok()
    }
}

impl OutputHandler<i64> for IntegerInRange {
    fn validate(&self, output: &GenerationOutput) -> bool {
        self.parse(output)
            .is_some_and(|n| (self.min..=self.max).contains(&n))
    }

    fn transform(&self, output: &GenerationOutput) -> Result<i64> {
        self.parse(output)
            .ok_or_else(|| anyhow!("no integer in output '{}'", output.text()))
    }
}

/// Accepts output containing exactly `expected` tokens
pub struct TokenCount {
    pub expected: usize,
    pub separator: Option<char>,
}

impl TokenCount {
    /// Whitespace-separated tokens
    pub fn words(expected: usize) -> Self {
        Self {
            expected,
            separator: None,
        }
    }

    pub fn separated_by(expected: usize, separator: char) -> Self {
        Self {
            expected,
            separator: Some(separator),
        }
    }

    fn tokens(&self, output: &GenerationOutput) -> Vec<String> {
        match self.separator {
            Some(sep) => output
                .text()
                .split(sep)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            None => output
                .text()
                .split_whitespace()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl OutputHandler<Vec<String>> for TokenCount {
    fn validate(&self, output: &GenerationOutput) -> bool {
        self.tokens(output).len() == self.expected
    }

    fn transform(&self, output: &GenerationOutput) -> Result<Vec<String>> {
        Ok(self.tokens(output))
    }
}

/// Accepts output (or one structured field) matching one of a fixed set of choices
pub struct OneOf {
    pub choices: Vec<String>,
    pub field: Option<String>,
}

impl OneOf {
    pub fn new<I, S>(choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            choices: choices.into_iter().map(Into::into).collect(),
            field: None,
        }
    }

    /// Match against a structured field instead of the whole text
    pub fn in_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn matched(&self, output: &GenerationOutput) -> Option<&String> {
        let candidate = match &self.field {
            Some(field) => output.str_field(field)?,
            None => output.text(),
        };
        let candidate = candidate.trim().trim_end_matches('.');
        self.choices
            .iter()
            .find(|choice| choice.eq_ignore_ascii_case(candidate))
    }
}

impl OutputHandler<String> for OneOf {
    fn validate(&self, output: &GenerationOutput) -> bool {
        self.matched(output).is_some()
    }

    fn transform(&self, output: &GenerationOutput) -> Result<String> {
        self.matched(output)
            .cloned()
            .context("output matched no choice")
    }
}

/// Accepts structured output whose named string fields are all non-blank
pub struct RequiredFields {
    pub fields: Vec<String>,
}

impl RequiredFields {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

impl OutputHandler<StructuredFields> for RequiredFields {
    fn validate(&self, output: &GenerationOutput) -> bool {
        self.fields.iter().all(|name| match output.field(name) {
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(Value::Null) | None => false,
            Some(_) => true,
        })
    }

    fn transform(&self, output: &GenerationOutput) -> Result<StructuredFields> {
        output
            .fields()
            .cloned()
            .context("output has no structured fields")
    }
}
