//! Dialtone Template
//!
//! Substitutes named variables into a payload before it becomes part of an
//! operation definition (a contact-flow document, a whole plan file).
//!
//! Placeholders have the form `{{name}}`; whitespace inside the braces is
//! allowed. Rendering is permissive: a placeholder whose name has no variable
//! is left in the output exactly as written, as is anything between braces
//! that is not a plain name (`{{ a | upper }}`) and an unterminated `{{`.
//!
//! ```
//! use std::collections::HashMap;
//!
//! let vars = HashMap::from([("name".to_string(), "X".to_string())]);
//! assert_eq!(dialtone_template::render("Hello {{name}}", &vars), "Hello X");
//! assert_eq!(dialtone_template::render("Hello {{other}}", &vars), "Hello {{other}}");
//! ```

use std::collections::HashMap;

/// Output of [`render_checked`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
  pub output: String,
  /// Placeholder names that had no variable, in order of first appearance.
  pub unresolved: Vec<String>,
}

/// Render a template, leaving unknown placeholders verbatim.
pub fn render(template: &str, vars: &HashMap<String, String>) -> String {
  render_with(template, vars, |s| s.to_string()).output
}

/// Render a template and report which placeholders stayed unresolved.
pub fn render_checked(template: &str, vars: &HashMap<String, String>) -> Rendered {
  render_with(template, vars, |s| s.to_string())
}

/// Render a template whose placeholders sit inside JSON string literals.
///
/// Substituted values are JSON-escaped so a value containing quotes or
/// backslashes cannot break the surrounding document.
pub fn render_json(template: &str, vars: &HashMap<String, String>) -> Rendered {
  render_with(template, vars, escape_json)
}

/// Names of all well-formed placeholders, in order of first appearance.
pub fn placeholders(template: &str) -> Vec<String> {
  render_checked(template, &HashMap::new()).unresolved
}

fn render_with(
  template: &str,
  vars: &HashMap<String, String>,
  encode: impl Fn(&str) -> String,
) -> Rendered {
  let mut output = String::with_capacity(template.len());
  let mut unresolved: Vec<String> = Vec::new();
  let mut rest = template;

  while let Some(start) = rest.find("{{") {
    output.push_str(&rest[..start]);
    let body_start = start + 2;

    let Some(len) = rest[body_start..].find("}}") else {
      // Unterminated: keep the remainder as-is.
      output.push_str(&rest[start..]);
      rest = "";
      break;
    };

    let body_end = body_start + len;
    let raw = &rest[start..body_end + 2];
    let name = rest[body_start..body_end].trim();

    match vars.get(name) {
      Some(value) if is_name(name) => output.push_str(&encode(value)),
      _ => {
        output.push_str(raw);
        if is_name(name) && !unresolved.iter().any(|u| u == name) {
          unresolved.push(name.to_string());
        }
      }
    }

    rest = &rest[body_end + 2..];
  }

  output.push_str(rest);
  Rendered { output, unresolved }
}

fn is_name(name: &str) -> bool {
  !name.is_empty()
    && name
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

fn escape_json(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for c in value.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\t' => out.push_str("\\t"),
      c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
      c => out.push(c),
    }
  }
  out
}
