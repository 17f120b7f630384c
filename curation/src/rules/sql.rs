//! SQL template rendering.
//!
//! Rule SQL lives in `const` templates with `{{name}}` placeholders. Rendering
//! is strict: every placeholder must be bound and every binding must be used,
//! so a typo in either place surfaces as a rule error instead of bad SQL.

use crate::errors::RuleError;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*)\s*\}\}").expect("placeholder pattern is valid")
});

/// Renders `template`, substituting each `{{key}}` with its bound value.
///
/// # Errors
///
/// Returns [`RuleError::Template`] if a placeholder has no binding or a
/// binding is never used.
pub fn render(name: &str, template: &str, bindings: &[(&str, &str)]) -> Result<String, RuleError> {
    let mut used = BTreeSet::new();
    let mut missing = None;

    let rendered = PLACEHOLDER.replace_all(template, |caps: &regex::Captures<'_>| {
        let key = &caps[1];
        match bindings.iter().find(|(k, _)| *k == key) {
            Some((k, v)) => {
                used.insert(*k);
                (*v).to_string()
            }
            None => {
                missing.get_or_insert_with(|| key.to_string());
                String::new()
            }
        }
    });

    if let Some(key) = missing {
        return Err(RuleError::Template {
            template: name.to_string(),
            reason: format!("no value bound for '{key}'"),
        });
    }
    if let Some((unused, _)) = bindings.iter().find(|(k, _)| !used.contains(k)) {
        return Err(RuleError::Template {
            template: name.to_string(),
            reason: format!("binding '{unused}' is not used"),
        });
    }

    Ok(rendered.into_owned())
}

/// Quotes `project.dataset.table` with backticks.
#[must_use]
pub fn table_ref(project_id: &str, dataset_id: &str, table_id: &str) -> String {
    format!("`{project_id}.{dataset_id}.{table_id}`")
}

/// Quotes a string literal for standard SQL.
#[must_use]
pub fn string_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
