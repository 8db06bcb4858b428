//! Minimal `{{field}}` templates used to turn CSV rows into page bodies.

use crate::slug::template_short_name;

/// Parameter schema of a template page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSchema {
    /// Template page name without the `Templates/` namespace.
    pub name: String,
    pub fields: Vec<String>,
}

impl TemplateSchema {
    pub fn from_page(page_name: &str, content: &str) -> Self {
        Self {
            name: template_short_name(page_name).to_string(),
            fields: extract_placeholders(content),
        }
    }

    /// `{{Name|field=value|...}}` for every schema field present in `row`, in schema order.
    pub fn render(&self, row: &[(String, String)]) -> String {
        let mut parts = vec![self.name.clone()];
        for field in &self.fields {
            if let Some((_, value)) = row.iter().find(|(key, _)| key == field) {
                parts.push(format!("{field}={value}"));
            }
        }
        format!("{{{{{}}}}}", parts.join("|"))
    }
}

/// Bare `{{name}}` tokens in order of first appearance, duplicates dropped.
///
/// Tokens carrying parameters (`{{name|x}}`) or nested braces are not placeholders.
pub fn extract_placeholders(content: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find("{{") {
        let after_open = &rest[start + 2..];
        let Some(end) = after_open.find("}}") else {
            break;
        };
        let inner = &after_open[..end];
        if let Some(open) = inner.rfind("{{") {
            // `{{ {{a}}`: restart from the innermost opener.
            rest = &after_open[open..];
            continue;
        }
        let name = inner.trim();
        if is_field_name(name) && !fields.iter().any(|field| field == name) {
            fields.push(name.to_string());
        }
        rest = &after_open[end + 2..];
    }
    fields
}

fn is_field_name(value: &str) -> bool {
    !value.is_empty() && !value.contains(['{', '}', '|', '\n', '='])
}
