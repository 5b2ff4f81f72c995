//! Handlebars-style prompt templates.
//!
//! Supported syntax: `{{path}}`, `{{{raw}}}`, `{{this}}` / `{{.}}`, parent
//! access with `../`, `@root`, loop data (`@index`, `@first`, `@last`, `@key`),
//! comments, whitespace control with `~`, and the block helpers `each`, `if`,
//! `unless` and `with` (all accepting `{{else}}`). Partials and helpers with
//! arguments are rejected at parse time.
//!
//! Templates authored in the rich text editor are HTML. For those, values are
//! HTML-escaped during rendering and the result is converted to
//! markdown-flavoured text (see [`html::to_text`]) before it reaches a model.

pub mod html;
mod parser;
mod render;

use serde_json::Value;
use thiserror::Error;

use parser::Node;
use render::Renderer;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("Parse error at offset {offset}: {message}")]
    Parse { message: String, offset: usize },
}

impl TemplateError {
    /// The underlying parse message without position information.
    pub fn message(&self) -> &str {
        match self {
            TemplateError::Parse { message, .. } => message,
        }
    }
}

/// A parsed template, reusable across contexts.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
    rich: bool,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            nodes: parser::parse(source)?,
            rich: is_rich_text(source),
        })
    }

    /// Whether the source was authored as rich text (HTML).
    pub fn is_rich(&self) -> bool {
        self.rich
    }

    /// Render verbatim. Values are interpolated without escaping.
    pub fn render(&self, context: &Value) -> String {
        Renderer::new(context, false).render(&self.nodes)
    }

    /// Render as HTML, escaping interpolated values.
    pub fn render_html(&self, context: &Value) -> String {
        Renderer::new(context, true).render(&self.nodes)
    }

    /// Render the text a language model should see: rich templates go
    /// through the HTML pipeline, plain ones render verbatim.
    pub fn render_prompt(&self, context: &Value) -> String {
        if self.rich {
            html::to_text(&self.render_html(context))
        } else {
            self.render(context)
        }
    }
}

/// Compile `template` against `context`. Unknown variables render empty.
pub fn compile(template: &str, context: &Value) -> Result<String, TemplateError> {
    Ok(Template::parse(template)?.render(context))
}

/// Compile a stored prompt template into model-ready text.
pub fn render_prompt(template: &str, context: &Value) -> Result<String, TemplateError> {
    Ok(Template::parse(template)?.render_prompt(context).trim().to_string())
}

/// Block elements the rich text editor opens its output with.
const EDITOR_BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "blockquote", "pre", "div", "hr",
];

/// Editor output starts with one of its block elements and ends with an
/// element. Plain prompts that use XML-style tags such as
/// `<context>...</context>` are not rich text.
pub fn is_rich_text(source: &str) -> bool {
    let trimmed = source.trim();
    let Some(rest) = trimmed.strip_prefix('<') else {
        return false;
    };
    if !trimmed.ends_with('>') {
        return false;
    }
    let name: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    EDITOR_BLOCK_TAGS.contains(&name.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    mod compile_tests {
        use super::*;

        #[test]
        fn interpolates_variables() {
            assert_eq!(compile("Hello {{name}}", &json!({"name": "Ada"})).unwrap(), "Hello Ada");
        }

        #[test]
        fn iterates_lists() {
            assert_eq!(
                compile("{{#each xs}}{{.}},{{/each}}", &json!({"xs": ["a", "b"]})).unwrap(),
                "a,b,"
            );
        }

        #[test]
        fn missing_variables_render_empty() {
            assert_eq!(compile("{{missing}}", &json!({})).unwrap(), "");
            assert_eq!(compile("[{{a.b.c}}]", &json!({"a": 1})).unwrap(), "[]");
        }

        #[test]
        fn plain_compile_does_not_escape() {
            assert_eq!(
                compile("{{bio}}", &json!({"bio": "Tom & <Jerry>"})).unwrap(),
                "Tom & <Jerry>"
            );
        }

        #[test]
        fn malformed_template_reports_parse_message() {
            let err = compile("{{#each xs}}", &json!({})).unwrap_err();
            assert_eq!(err.message(), "unclosed '#each' block");
            assert!(err.to_string().starts_with("Parse error at offset 0"));
        }
    }

    mod prompt_tests {
        use super::*;

        #[test]
        fn detects_rich_text() {
            assert!(is_rich_text("  <p>Hi {{bio}}</p>\n"));
            assert!(!is_rich_text("You are a coach. {{bio}}"));
            assert!(!is_rich_text("<b>partly</b> html"));
            assert!(is_rich_text("<H3>Title</H3><ul><li>{{bio}}</li></ul>"));
            assert!(is_rich_text("<hr><p>{{bio}}</p>"));
        }

        #[test]
        fn xml_style_prompt_is_plain_text() {
            let template = "<context>{{bio}}</context>";
            assert!(!is_rich_text(template));
            assert_eq!(
                render_prompt(template, &json!({"bio": "Gardener"})).unwrap(),
                "<context>Gardener</context>"
            );
        }

        #[test]
        fn rich_template_renders_to_markdown() {
            let template = "<p>About me: <strong>{{bio}}</strong></p><ul>{{#each exerciseSteps}}<li><p>{{content}}: {{result}}</p></li>{{/each}}</ul>";
            let context = json!({
                "bio": "Gardener & cook",
                "exerciseSteps": [
                    {"content": "Values", "result": "honesty"},
                    {"content": "Goals", "result": "<grow>"}
                ]
            });
            assert_eq!(
                render_prompt(template, &context).unwrap(),
                "About me: **Gardener & cook**\n\n- Values: honesty\n- Goals: <grow>"
            );
        }

        #[test]
        fn plain_template_renders_verbatim() {
            let template = "You are a coach.\n{{#if bio}}The user says: {{bio}}\n{{/if}}Links: {{urls}}\n";
            let context = json!({"bio": "I like <tags>", "urls": "https://a.example"});
            assert_eq!(
                render_prompt(template, &context).unwrap(),
                "You are a coach.\nThe user says: I like <tags>\nLinks: https://a.example"
            );
        }

        #[test]
        fn parsed_template_is_reusable() {
            let template = Template::parse("Hi {{name}}").unwrap();
            assert!(!template.is_rich());
            assert_eq!(template.render(&json!({"name": "A"})), "Hi A");
            assert_eq!(template.render(&json!({"name": "B"})), "Hi B");
        }
    }

    proptest! {
        #[test]
        fn literal_text_passes_through(text in "[^{}\\\\]*") {
            prop_assert_eq!(compile(&text, &json!({})).unwrap(), text);
        }

        #[test]
        fn unknown_variables_never_fail(name in "[a-z][a-z0-9_]{0,12}") {
            prop_assume!(!matches!(name.as_str(), "else" | "this" | "known"));
            let source = format!("<{{{{{}}}}}>", name);
            prop_assert_eq!(compile(&source, &json!({"known": 1})).unwrap(), "<>");
        }
    }
}
