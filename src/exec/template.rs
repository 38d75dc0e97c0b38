//! Command templates.
//!
//! Commands are written with `{{ Name }}` placeholders and rendered by tera
//! against a [`RenderContext`]. Drivers call [`check_all`] when they are
//! built, so a placeholder without a matching variable is reported before
//! any command runs.

use serde_json::Value;
use tera::{Context, Tera};

use crate::error::TemplateError;

/// Name the command is registered under while rendering.
const TEMPLATE_NAME: &str = "command";

/// Variables available to command templates.
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    context: Context,
}

impl RenderContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the context with `name` set to `value`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Sets `name` to `value`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.context.insert(name.into(), &value.into());
    }

    /// Returns the value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.context.get(name).and_then(Value::as_str)
    }

    /// Returns a copy with an empty value for each of `names` not already set.
    ///
    /// Used to check templates that also reference per-step variables.
    #[must_use]
    pub fn with_placeholders(&self, names: &[&str]) -> Self {
        let mut checked = self.clone();
        for name in names {
            if !checked.context.contains_key(name) {
                checked.insert(*name, "");
            }
        }
        checked
    }

    /// The underlying tera context.
    #[must_use]
    pub const fn as_tera(&self) -> &Context {
        &self.context
    }
}

/// Renders `source` against `ctx`.
///
/// # Errors
///
/// Returns [`TemplateError::Invalid`] if `source` does not parse, and
/// [`TemplateError::Render`] if it references a variable `ctx` lacks.
pub fn render(source: &str, ctx: &RenderContext) -> Result<String, TemplateError> {
    let mut tera = Tera::default();
    tera.autoescape_on(Vec::new());
    tera.add_raw_template(TEMPLATE_NAME, source)
        .map_err(|e| TemplateError::Invalid {
            template: source.to_string(),
            message: describe(&e),
        })?;

    tera.render(TEMPLATE_NAME, ctx.as_tera())
        .map_err(|e| TemplateError::Render {
            template: source.to_string(),
            message: describe(&e),
        })
}

/// Renders every template once against `ctx`, discarding the output.
///
/// # Errors
///
/// Returns the first parse or render error.
pub fn check_all(templates: &[&str], ctx: &RenderContext) -> Result<(), TemplateError> {
    templates
        .iter()
        .try_for_each(|source| render(source, ctx).map(drop))
}

/// Flattens a tera error and its causes into one line.
fn describe(err: &tera::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
