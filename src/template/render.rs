//! Evaluates a parsed template against a JSON context.

use std::borrow::Cow;

use serde_json::Value;

use super::parser::{BlockHelper, DataVar, Node, Path};

#[derive(Debug, Clone, Default)]
struct LoopData {
    index: Option<usize>,
    first: bool,
    last: bool,
    key: Option<String>,
}

struct Scope<'a> {
    value: &'a Value,
    data: LoopData,
}

pub(crate) struct Renderer<'a> {
    root: &'a Value,
    escape: bool,
}

impl<'a> Renderer<'a> {
    pub(crate) fn new(root: &'a Value, escape: bool) -> Self {
        Self { root, escape }
    }

    pub(crate) fn render(&self, nodes: &[Node]) -> String {
        let mut out = String::new();
        let mut scopes = vec![Scope {
            value: self.root,
            data: LoopData::default(),
        }];
        self.render_nodes(nodes, &mut scopes, &mut out);
        out
    }

    fn render_nodes(&self, nodes: &[Node], scopes: &mut Vec<Scope<'a>>, out: &mut String) {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Value { path, escape } => {
                    if let Some(value) = self.lookup(path, scopes) {
                        let text = display(&value);
                        if *escape && self.escape {
                            out.push_str(&escape_html(&text));
                        } else {
                            out.push_str(&text);
                        }
                    }
                }
                Node::Block {
                    helper,
                    path,
                    body,
                    inverse,
                } => {
                    let value = self.lookup(path, scopes);
                    match helper {
                        BlockHelper::If => {
                            let branch = if value.as_deref().is_some_and(truthy) {
                                body
                            } else {
                                inverse
                            };
                            self.render_nodes(branch, scopes, out);
                        }
                        BlockHelper::Unless => {
                            let branch = if value.as_deref().is_some_and(truthy) {
                                inverse
                            } else {
                                body
                            };
                            self.render_nodes(branch, scopes, out);
                        }
                        BlockHelper::With => match value {
                            Some(Cow::Borrowed(v)) if truthy(v) => {
                                let data = scopes.last().map(|s| s.data.clone()).unwrap_or_default();
                                scopes.push(Scope { value: v, data });
                                self.render_nodes(body, scopes, out);
                                scopes.pop();
                            }
                            // Data variables are rejected as block arguments by the parser
                            _ => self.render_nodes(inverse, scopes, out),
                        },
                        BlockHelper::Each => {
                            let iterated = match value {
                                Some(Cow::Borrowed(v)) => self.render_each(v, body, scopes, out),
                                _ => false,
                            };
                            if !iterated {
                                self.render_nodes(inverse, scopes, out);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Returns false when there was nothing to iterate.
    fn render_each(
        &self,
        value: &'a Value,
        body: &[Node],
        scopes: &mut Vec<Scope<'a>>,
        out: &mut String,
    ) -> bool {
        match value {
            Value::Array(items) if !items.is_empty() => {
                let last = items.len() - 1;
                for (index, item) in items.iter().enumerate() {
                    scopes.push(Scope {
                        value: item,
                        data: LoopData {
                            index: Some(index),
                            first: index == 0,
                            last: index == last,
                            key: None,
                        },
                    });
                    self.render_nodes(body, scopes, out);
                    scopes.pop();
                }
                true
            }
            Value::Object(map) if !map.is_empty() => {
                let last = map.len() - 1;
                for (index, (key, item)) in map.iter().enumerate() {
                    scopes.push(Scope {
                        value: item,
                        data: LoopData {
                            index: Some(index),
                            first: index == 0,
                            last: index == last,
                            key: Some(key.clone()),
                        },
                    });
                    self.render_nodes(body, scopes, out);
                    scopes.pop();
                }
                true
            }
            _ => false,
        }
    }

    fn lookup(&self, path: &Path, scopes: &[Scope<'a>]) -> Option<Cow<'a, Value>> {
        match path {
            Path::Context { depth, segments } => {
                let scope = scopes.len().checked_sub(depth + 1).map(|i| &scopes[i])?;
                walk(scope.value, segments).map(Cow::Borrowed)
            }
            Path::Root(segments) => walk(self.root, segments).map(Cow::Borrowed),
            Path::Data(var) => {
                let data = &scopes.last()?.data;
                let value = match var {
                    DataVar::Index => Value::from(data.index?),
                    DataVar::First => Value::Bool(data.index.is_some() && data.first),
                    DataVar::Last => Value::Bool(data.index.is_some() && data.last),
                    DataVar::Key => Value::String(data.key.clone()?),
                };
                Some(Cow::Owned(value))
            }
        }
    }
}

fn walk<'a>(mut value: &'a Value, segments: &[String]) -> Option<&'a Value> {
    for segment in segments {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Handlebars truthiness: `false`, `null`, `""`, `0` and `[]` are falsy.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}

/// String form of a value as interpolated into output.
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items.iter().map(display).collect::<Vec<_>>().join(","),
        Value::Object(_) => value.to_string(),
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '`' => out.push_str("&#x60;"),
            '=' => out.push_str("&#x3D;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parser::parse;
    use serde_json::json;

    fn render(source: &str, context: Value) -> String {
        Renderer::new(&context, false).render(&parse(source).unwrap())
    }

    #[test]
    fn nested_paths_and_parent_access() {
        let ctx = json!({"title": "Week 1", "steps": [{"name": "Sit"}, {"name": "Walk"}]});
        assert_eq!(
            render("{{#each steps}}{{../title}}: {{name}};{{/each}}", ctx),
            "Week 1: Sit;Week 1: Walk;"
        );
    }

    #[test]
    fn loop_data_variables() {
        let ctx = json!({"xs": ["a", "b", "c"]});
        assert_eq!(
            render(
                "{{#each xs}}{{@index}}={{this}}{{#if @first}}(first){{/if}}{{#unless @last}}, {{/unless}}{{/each}}",
                ctx
            ),
            "0=a(first), 1=b, 2=c"
        );
    }

    #[test]
    fn each_over_object_exposes_key() {
        let ctx = json!({"m": {"a": 1, "b": 2}});
        assert_eq!(render("{{#each m}}{{@key}}{{this}} {{/each}}", ctx), "a1 b2 ");
    }

    #[test]
    fn each_else_runs_for_empty_or_missing() {
        assert_eq!(render("{{#each xs}}x{{else}}none{{/each}}", json!({"xs": []})), "none");
        assert_eq!(render("{{#each xs}}x{{else}}none{{/each}}", json!({})), "none");
    }

    #[test]
    fn if_uses_handlebars_truthiness() {
        for (value, expected) in [
            (json!(0), "no"),
            (json!(""), "no"),
            (json!([]), "no"),
            (json!(null), "no"),
            (json!({}), "yes"),
            (json!("x"), "yes"),
            (json!(2), "yes"),
        ] {
            assert_eq!(
                render("{{#if v}}yes{{else}}no{{/if}}", json!({ "v": value })),
                expected
            );
        }
    }

    #[test]
    fn with_changes_context() {
        let ctx = json!({"user": {"bio": "Gardener"}});
        assert_eq!(render("{{#with user}}{{bio}}{{/with}}", ctx), "Gardener");
    }

    #[test]
    fn display_of_compound_values() {
        assert_eq!(display(&json!(["a", 1, null])), "a,1,");
        assert_eq!(display(&json!({"k": "v"})), r#"{"k":"v"}"#);
        assert_eq!(display(&json!(true)), "true");
    }

    #[test]
    fn escaping_applies_only_when_enabled() {
        let ctx = json!({"v": "<b>&'"});
        let nodes = parse("{{v}}|{{{v}}}").unwrap();
        assert_eq!(
            Renderer::new(&ctx, true).render(&nodes),
            "&lt;b&gt;&amp;&#x27;|<b>&'"
        );
        assert_eq!(Renderer::new(&ctx, false).render(&nodes), "<b>&'|<b>&'");
    }
}
