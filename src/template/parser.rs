//! Tokenizer and tree builder for Handlebars-style templates.

use super::TemplateError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Value {
        path: Path,
        escape: bool,
    },
    Block {
        helper: BlockHelper,
        path: Path,
        body: Vec<Node>,
        inverse: Vec<Node>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockHelper {
    Each,
    If,
    Unless,
    With,
}

impl BlockHelper {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "each" => Some(BlockHelper::Each),
            "if" => Some(BlockHelper::If),
            "unless" => Some(BlockHelper::Unless),
            "with" => Some(BlockHelper::With),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            BlockHelper::Each => "each",
            BlockHelper::If => "if",
            BlockHelper::Unless => "unless",
            BlockHelper::With => "with",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DataVar {
    Index,
    First,
    Last,
    Key,
}

/// A variable reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Path {
    /// `foo.bar`, `this`, `../foo`
    Context { depth: usize, segments: Vec<String> },
    /// `@index`, `@first`, `@last`, `@key`
    Data(DataVar),
    /// `@root.foo`
    Root(Vec<String>),
}

#[derive(Debug)]
enum Token {
    Text(String),
    Tag(Tag),
}

#[derive(Debug)]
struct Tag {
    kind: TagKind,
    offset: usize,
    trim_left: bool,
    trim_right: bool,
}

#[derive(Debug)]
enum TagKind {
    Comment,
    Open(BlockHelper, Path),
    Close(String),
    Else,
    Value(Path, bool),
}

impl TagKind {
    /// Tags that vanish with their line when they stand alone on it.
    fn is_standalone_candidate(&self) -> bool {
        !matches!(self, TagKind::Value(..))
    }
}

fn error(offset: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Parse {
        message: message.into(),
        offset,
    }
}

pub(crate) fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let mut tokens = tokenize(source)?;
    strip_standalone_lines(&mut tokens);
    apply_whitespace_control(&mut tokens);
    build_tree(tokens)
}

fn tokenize(source: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = source;
    let mut offset = 0;

    while let Some(start) = rest.find("{{") {
        if start > 0 {
            tokens.push(Token::Text(rest[..start].to_string()));
        }
        let tag_offset = offset + start;
        let after_open = &rest[start..];

        let (inner, consumed, raw) = if after_open.starts_with("{{{") {
            let end = after_open[3..]
                .find("}}}")
                .ok_or_else(|| error(tag_offset, "unclosed '{{{'"))?;
            (&after_open[3..3 + end], end + 6, true)
        } else if after_open.starts_with("{{!--") || after_open.starts_with("{{~!--") {
            let end = after_open
                .find("--}}")
                .or_else(|| after_open.find("--~}}"))
                .ok_or_else(|| error(tag_offset, "unclosed comment"))?;
            let close_len = if after_open[end..].starts_with("--~}}") { 5 } else { 4 };
            let trim_left = after_open.starts_with("{{~");
            tokens.push(Token::Tag(Tag {
                kind: TagKind::Comment,
                offset: tag_offset,
                trim_left,
                trim_right: close_len == 5,
            }));
            let consumed = end + close_len;
            rest = &after_open[consumed..];
            offset = tag_offset + consumed;
            continue;
        } else {
            let end = after_open[2..]
                .find("}}")
                .ok_or_else(|| error(tag_offset, "unclosed '{{'"))?;
            (&after_open[2..2 + end], end + 4, false)
        };

        let (inner, trim_left) = match inner.strip_prefix('~') {
            Some(s) => (s, true),
            None => (inner, false),
        };
        let (inner, trim_right) = match inner.strip_suffix('~') {
            Some(s) => (s, true),
            None => (inner, false),
        };

        let kind = if raw {
            TagKind::Value(parse_path(inner.trim(), tag_offset)?, false)
        } else {
            parse_tag(inner, tag_offset)?
        };
        tokens.push(Token::Tag(Tag {
            kind,
            offset: tag_offset,
            trim_left,
            trim_right,
        }));

        rest = &after_open[consumed..];
        offset = tag_offset + consumed;
    }

    if !rest.is_empty() {
        tokens.push(Token::Text(rest.to_string()));
    }
    Ok(tokens)
}

fn parse_tag(inner: &str, offset: usize) -> Result<TagKind, TemplateError> {
    let inner = inner.trim();
    if inner.is_empty() {
        return Err(error(offset, "empty expression '{{}}'"));
    }

    if inner.starts_with('!') {
        return Ok(TagKind::Comment);
    }
    if inner == "else" || inner == "^" {
        return Ok(TagKind::Else);
    }
    if let Some(rest) = inner.strip_prefix('#') {
        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let helper = BlockHelper::from_name(name)
            .ok_or_else(|| error(offset, format!("unknown block helper '{}'", name)))?;
        let argument = words
            .next()
            .ok_or_else(|| error(offset, format!("'#{}' needs an argument", name)))?;
        if let Some(extra) = words.next() {
            return Err(error(
                offset,
                format!("unexpected '{}' in '#{}' expression", extra, name),
            ));
        }
        let path = parse_path(argument, offset)?;
        // Only context values can become the scope of a block
        if matches!(helper, BlockHelper::Each | BlockHelper::With) && matches!(path, Path::Data(_)) {
            return Err(error(
                offset,
                format!("'#{}' cannot take the data variable '{}'", name, argument),
            ));
        }
        return Ok(TagKind::Open(helper, path));
    }
    if let Some(rest) = inner.strip_prefix('/') {
        return Ok(TagKind::Close(rest.trim().to_string()));
    }
    if let Some(rest) = inner.strip_prefix('&') {
        return Ok(TagKind::Value(parse_path(rest.trim(), offset)?, false));
    }
    if inner.starts_with('>') {
        return Err(error(offset, "partials are not supported"));
    }
    if inner.starts_with("else ") {
        return Err(error(offset, "chained 'else' blocks are not supported"));
    }
    if inner.split_whitespace().nth(1).is_some() {
        let name = inner.split_whitespace().next().unwrap_or_default();
        return Err(error(offset, format!("unknown helper '{}'", name)));
    }
    Ok(TagKind::Value(parse_path(inner, offset)?, true))
}

fn parse_path(expr: &str, offset: usize) -> Result<Path, TemplateError> {
    if expr.is_empty() {
        return Err(error(offset, "expected a variable name"));
    }

    if let Some(name) = expr.strip_prefix('@') {
        let data = match name {
            "index" => DataVar::Index,
            "first" => DataVar::First,
            "last" => DataVar::Last,
            "key" => DataVar::Key,
            "root" => return Ok(Path::Root(Vec::new())),
            _ => match name.strip_prefix("root.").or_else(|| name.strip_prefix("root/")) {
                Some(rest) => return Ok(Path::Root(split_segments(rest, offset)?)),
                None => return Err(error(offset, format!("unknown data variable '@{}'", name))),
            },
        };
        return Ok(Path::Data(data));
    }

    let mut rest = expr;
    let mut depth = 0;
    while let Some(stripped) = rest.strip_prefix("../") {
        depth += 1;
        rest = stripped;
    }
    if rest == ".." {
        return Ok(Path::Context {
            depth: depth + 1,
            segments: Vec::new(),
        });
    }

    if rest == "this" || rest == "." {
        return Ok(Path::Context {
            depth,
            segments: Vec::new(),
        });
    }
    let rest = rest
        .strip_prefix("this.")
        .or_else(|| rest.strip_prefix("this/"))
        .or_else(|| rest.strip_prefix("./"))
        .unwrap_or(rest);

    Ok(Path::Context {
        depth,
        segments: split_segments(rest, offset)?,
    })
}

fn split_segments(expr: &str, offset: usize) -> Result<Vec<String>, TemplateError> {
    expr.split(['.', '/'])
        .map(|segment| {
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_' || c == '-' || c == '$');
            if valid {
                Ok(segment.to_string())
            } else {
                Err(error(offset, format!("invalid variable name '{}'", expr)))
            }
        })
        .collect()
}

/// Remove the whitespace and newline around block tags that sit alone on a
/// line, so block markup does not leave blank lines in the output.
fn strip_standalone_lines(tokens: &mut [Token]) {
    let standalone: Vec<bool> = (0..tokens.len())
        .map(|i| is_standalone(tokens, i))
        .collect();

    for (i, _) in standalone.iter().enumerate().filter(|(_, s)| **s) {
        if i > 0 {
            if let Token::Text(text) = &mut tokens[i - 1] {
                let keep = text.rfind('\n').map(|p| p + 1).unwrap_or(0);
                text.truncate(keep);
            }
        }
        if let Some(Token::Text(text)) = tokens.get_mut(i + 1) {
            match text.find('\n') {
                Some(p) => {
                    text.drain(..=p);
                }
                None => text.clear(),
            }
        }
    }
}

fn is_standalone(tokens: &[Token], i: usize) -> bool {
    let candidate = matches!(&tokens[i], Token::Tag(tag) if tag.kind.is_standalone_candidate());
    if !candidate {
        return false;
    }

    let line_start = match i.checked_sub(1).map(|p| &tokens[p]) {
        None => true,
        Some(Token::Text(text)) => {
            let tail = text.rsplit('\n').next().unwrap_or_default();
            tail.chars().all(|c| c == ' ' || c == '\t') && (text.contains('\n') || i == 1)
        }
        Some(Token::Tag(_)) => false,
    };
    let line_end = match tokens.get(i + 1) {
        None => true,
        Some(Token::Text(text)) => {
            let head = text.split('\n').next().unwrap_or_default();
            head.chars().all(|c| c == ' ' || c == '\t' || c == '\r')
                && (text.contains('\n') || i + 2 == tokens.len())
        }
        Some(Token::Tag(_)) => false,
    };
    line_start && line_end
}

fn apply_whitespace_control(tokens: &mut [Token]) {
    for i in 0..tokens.len() {
        let (trim_left, trim_right) = match &tokens[i] {
            Token::Tag(tag) => (tag.trim_left, tag.trim_right),
            Token::Text(_) => continue,
        };
        if trim_left && i > 0 {
            if let Token::Text(text) = &mut tokens[i - 1] {
                let trimmed = text.trim_end().len();
                text.truncate(trimmed);
            }
        }
        if trim_right {
            if let Some(Token::Text(text)) = tokens.get_mut(i + 1) {
                *text = text.trim_start().to_string();
            }
        }
    }
}

struct OpenBlock {
    helper: BlockHelper,
    path: Path,
    offset: usize,
    body: Vec<Node>,
    inverse: Option<Vec<Node>>,
}

impl OpenBlock {
    fn target(&mut self) -> &mut Vec<Node> {
        match &mut self.inverse {
            Some(inverse) => inverse,
            None => &mut self.body,
        }
    }
}

fn build_tree(tokens: Vec<Token>) -> Result<Vec<Node>, TemplateError> {
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<OpenBlock> = Vec::new();

    for token in tokens {
        let target = match stack.last_mut() {
            Some(block) => block.target(),
            None => &mut root,
        };
        match token {
            Token::Text(text) => {
                if !text.is_empty() {
                    target.push(Node::Text(text));
                }
            }
            Token::Tag(tag) => match tag.kind {
                TagKind::Comment => {}
                TagKind::Value(path, escape) => target.push(Node::Value { path, escape }),
                TagKind::Open(helper, path) => stack.push(OpenBlock {
                    helper,
                    path,
                    offset: tag.offset,
                    body: Vec::new(),
                    inverse: None,
                }),
                TagKind::Else => match stack.last_mut() {
                    Some(block) if block.inverse.is_none() => block.inverse = Some(Vec::new()),
                    Some(block) => {
                        return Err(error(
                            tag.offset,
                            format!("duplicate '{{{{else}}}}' in '#{}'", block.helper.name()),
                        ))
                    }
                    None => return Err(error(tag.offset, "'{{else}}' outside of a block")),
                },
                TagKind::Close(name) => {
                    let block = stack.pop().ok_or_else(|| {
                        error(tag.offset, format!("unexpected '{{{{/{}}}}}'", name))
                    })?;
                    if block.helper.name() != name {
                        return Err(error(
                            tag.offset,
                            format!(
                                "'#{}' doesn't match '/{}'",
                                block.helper.name(),
                                name
                            ),
                        ));
                    }
                    let node = Node::Block {
                        helper: block.helper,
                        path: block.path,
                        body: block.body,
                        inverse: block.inverse.unwrap_or_default(),
                    };
                    match stack.last_mut() {
                        Some(parent) => parent.target().push(node),
                        None => root.push(node),
                    }
                }
            },
        }
    }

    if let Some(block) = stack.pop() {
        return Err(error(
            block.offset,
            format!("unclosed '#{}' block", block.helper.name()),
        ));
    }
    Ok(root)
}
