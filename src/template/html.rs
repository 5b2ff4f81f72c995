//! Rich text (editor HTML) to markdown-flavoured plain text.
//!
//! Keeps the structure a language model can use (paragraphs, headings,
//! lists, quotes, emphasis, link targets) and drops presentational markup.

/// Convert an HTML fragment to plain text.
pub fn to_text(html: &str) -> String {
    let mut writer = TextWriter::default();
    let mut rest = html;

    while !rest.is_empty() {
        match rest.find('<') {
            Some(0) => {
                if let Some(after) = rest.strip_prefix("<!--") {
                    rest = match after.find("-->") {
                        Some(end) => &after[end + 3..],
                        None => "",
                    };
                    continue;
                }
                match parse_tag(rest) {
                    Some((tag, consumed)) => {
                        rest = &rest[consumed..];
                        if let Some(skip) = writer.handle_tag(&tag) {
                            // Raw-text element: jump past its closing tag
                            let close = format!("</{}", skip);
                            let lower = rest.to_ascii_lowercase();
                            rest = match lower.find(&close) {
                                Some(pos) => match rest[pos..].find('>') {
                                    Some(end) => &rest[pos + end + 1..],
                                    None => "",
                                },
                                None => "",
                            };
                        }
                    }
                    None => {
                        writer.text("<");
                        rest = &rest[1..];
                    }
                }
            }
            Some(pos) => {
                writer.text(&decode_entities(&rest[..pos]));
                rest = &rest[pos..];
            }
            None => {
                writer.text(&decode_entities(rest));
                rest = "";
            }
        }
    }

    writer.finish()
}

#[derive(Debug)]
struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    href: Option<String>,
}

/// Parse one tag at the start of `input`. Returns the tag and the number of
/// bytes consumed, or `None` when `<` does not begin a tag.
fn parse_tag(input: &str) -> Option<(Tag, usize)> {
    let bytes = input.as_bytes();
    let mut i = 1;
    let closing = bytes.get(i) == Some(&b'/');
    if closing {
        i += 1;
    }
    if bytes.get(i) == Some(&b'!') || bytes.get(i) == Some(&b'?') {
        let end = input.find('>')?;
        return Some((
            Tag {
                name: String::new(),
                closing: false,
                self_closing: true,
                href: None,
            },
            end + 1,
        ));
    }

    let name_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        i += 1;
    }
    if i == name_start {
        return None;
    }
    let name = input[name_start..i].to_ascii_lowercase();

    // Scan to the closing '>' honouring quoted attribute values
    let attrs_start = i;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        match (quote, bytes[i]) {
            (Some(q), c) if c == q => quote = None,
            (None, b'"') | (None, b'\'') => quote = Some(bytes[i]),
            (None, b'>') => break,
            _ => {}
        }
        i += 1;
    }
    if i >= bytes.len() {
        return None;
    }
    let attrs = &input[attrs_start..i];
    let self_closing = attrs.trim_end().ends_with('/');

    Some((
        Tag {
            href: if name == "a" { attribute(attrs, "href") } else { None },
            name,
            closing,
            self_closing,
        },
        i + 1,
    ))
}

fn attribute(attrs: &str, wanted: &str) -> Option<String> {
    let mut rest = attrs;
    while let Some(pos) = rest.find('=') {
        let name = rest[..pos]
            .rsplit(|c: char| c.is_whitespace())
            .next()
            .unwrap_or_default()
            .trim();
        let after = rest[pos + 1..].trim_start();
        let (value, remaining) = match after.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let inner = &after[1..];
                let end = inner.find(q).unwrap_or(inner.len());
                (&inner[..end], &inner[(end + 1).min(inner.len())..])
            }
            _ => {
                let end = after
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(after.len());
                (&after[..end], &after[end..])
            }
        };
        if name.eq_ignore_ascii_case(wanted) {
            return Some(decode_entities(value));
        }
        rest = remaining;
    }
    None
}

/// Decode named and numeric character references.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let decoded = rest
            .find(';')
            .filter(|end| *end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse::<u32>().ok()?,
        };
        return char::from_u32(code);
    }
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "copy" => '\u{00A9}',
        _ => return None,
    };
    Some(c)
}

#[derive(Debug)]
struct List {
    ordered: bool,
    counter: usize,
}

#[derive(Debug, Default)]
struct TextWriter {
    out: String,
    pending_space: bool,
    at_line_start: bool,
    /// A list marker was just written; swallow the next paragraph break
    after_marker: bool,
    quote_depth: usize,
    in_pre: bool,
    lists: Vec<List>,
    /// Open links: (href, byte offset where the link text starts)
    links: Vec<(Option<String>, usize)>,
}

impl TextWriter {
    /// Apply a tag. Returns the element name when its content must be skipped.
    fn handle_tag(&mut self, tag: &Tag) -> Option<String> {
        let name = tag.name.as_str();
        if tag.closing {
            self.close(name);
            return None;
        }

        match name {
            "script" | "style" | "head" | "title" | "template" if !tag.self_closing => {
                return Some(name.to_string())
            }
            "br" => self.newline(),
            "hr" => {
                self.block_break(2);
                self.write_inline("---");
                self.block_break(2);
            }
            "p" | "div" | "section" | "article" | "header" | "footer" | "table" => {
                if !self.after_marker {
                    self.para_break();
                }
            }
            "tr" => self.block_break(1),
            "td" | "th" => {
                if !self.at_line_start {
                    self.write_inline(" | ");
                }
            }
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = name[1..].parse::<usize>().unwrap_or(1);
                self.block_break(2);
                self.write_inline(&"#".repeat(level));
                self.write_inline(" ");
                self.pending_space = false;
            }
            "ul" | "ol" => {
                if self.lists.is_empty() {
                    self.block_break(2);
                } else {
                    self.block_break(1);
                }
                self.lists.push(List {
                    ordered: name == "ol",
                    counter: 0,
                });
            }
            "li" => {
                self.block_break(1);
                let depth = self.lists.len().saturating_sub(1);
                let marker = match self.lists.last_mut() {
                    Some(list) if list.ordered => {
                        list.counter += 1;
                        format!("{}. ", list.counter)
                    }
                    _ => "- ".to_string(),
                };
                self.write_inline(&format!("{}{}", "  ".repeat(depth), marker));
                self.pending_space = false;
                self.after_marker = true;
            }
            "blockquote" => {
                self.block_break(2);
                self.quote_depth += 1;
            }
            "pre" => {
                self.block_break(2);
                self.write_inline("```");
                self.newline();
                self.in_pre = true;
            }
            "strong" | "b" => self.open_inline("**"),
            "em" | "i" => self.open_inline("*"),
            "code" if !self.in_pre => self.open_inline("`"),
            "a" => {
                self.flush_space();
                self.links.push((tag.href.clone(), self.out.len()));
            }
            _ => {}
        }
        None
    }

    fn close(&mut self, name: &str) {
        match name {
            "p" | "div" | "section" | "article" | "header" | "footer" | "table" => {
                self.para_break()
            }
            "tr" => self.block_break(1),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => self.block_break(2),
            "li" => self.block_break(1),
            "ul" | "ol" => {
                self.lists.pop();
                if self.lists.is_empty() {
                    self.block_break(2);
                } else {
                    self.block_break(1);
                }
            }
            "blockquote" => {
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.block_break(2);
            }
            "pre" => {
                self.in_pre = false;
                if !self.at_line_start {
                    self.newline();
                }
                self.write_inline("```");
                self.block_break(2);
            }
            "strong" | "b" => self.write_inline("**"),
            "em" | "i" => self.write_inline("*"),
            "code" if !self.in_pre => self.write_inline("`"),
            "a" => {
                if let Some((href, start)) = self.links.pop() {
                    let href = href.unwrap_or_default();
                    let href = href.trim();
                    let text = self.out.get(start..).unwrap_or_default().trim().to_string();
                    if !href.is_empty() && text != href {
                        if text.is_empty() {
                            self.write_inline(href);
                        } else {
                            self.write_inline(&format!(" ({})", href));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn text(&mut self, text: &str) {
        if self.in_pre {
            for c in text.chars() {
                if c == '\n' {
                    self.newline();
                } else {
                    self.write_char(c);
                }
            }
            return;
        }

        for c in text.chars() {
            if c.is_whitespace() {
                if !self.at_line_start && !self.out.is_empty() {
                    self.pending_space = true;
                }
            } else {
                self.flush_space();
                self.write_char(c);
            }
        }
    }

    fn flush_space(&mut self) {
        if self.pending_space && !self.at_line_start {
            self.out.push(' ');
        }
        self.pending_space = false;
    }

    fn open_inline(&mut self, marker: &str) {
        self.flush_space();
        self.write_inline(marker);
    }

    fn write_inline(&mut self, s: &str) {
        for c in s.chars() {
            self.write_char(c);
        }
    }

    fn write_char(&mut self, c: char) {
        if self.at_line_start || self.out.is_empty() {
            for _ in 0..self.quote_depth {
                self.out.push_str("> ");
            }
            self.at_line_start = false;
        }
        self.after_marker = false;
        self.out.push(c);
    }

    fn newline(&mut self) {
        self.out.push('\n');
        self.pending_space = false;
        self.at_line_start = true;
    }

    fn para_break(&mut self) {
        if self.lists.is_empty() {
            self.block_break(2);
        } else {
            self.block_break(1);
        }
    }

    /// Make sure the output ends with at least `count` newlines.
    fn block_break(&mut self, count: usize) {
        if self.out.is_empty() {
            return;
        }
        let trailing = self.out.chars().rev().take_while(|c| *c == '\n').count();
        for _ in trailing..count {
            self.newline();
        }
        self.pending_space = false;
        self.at_line_start = true;
    }

    fn finish(self) -> String {
        let mut lines: Vec<&str> = Vec::new();
        let mut blank_run = 0;
        for line in self.out.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            lines.push(line);
        }
        lines.join("\n").trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraphs_and_emphasis() {
        assert_eq!(
            to_text("<p>Hello <strong>world</strong>, be <em>kind</em>.</p><p>Second</p>"),
            "Hello **world**, be *kind*.\n\nSecond"
        );
    }

    #[test]
    fn editor_lists_with_paragraph_items() {
        let html = "<p>Steps:</p><ul><li><p>One</p></li><li><p>Two</p><ol><li>Inner</li></ol></li></ul><p>Done</p>";
        assert_eq!(to_text(html), "Steps:\n\n- One\n- Two\n  1. Inner\n\nDone");
    }

    #[test]
    fn ordered_list_counts() {
        assert_eq!(
            to_text("<ol><li>a</li><li>b</li><li>c</li></ol>"),
            "1. a\n2. b\n3. c"
        );
    }

    #[test]
    fn headings_and_rules() {
        assert_eq!(
            to_text("<h2>Title</h2><p>Body</p><hr><p>End</p>"),
            "## Title\n\nBody\n\n---\n\nEnd"
        );
    }

    #[test]
    fn links_keep_their_target() {
        assert_eq!(
            to_text(r#"<p>See <a href="https://example.com/a?b=1&amp;c=2">docs</a>.</p>"#),
            "See docs (https://example.com/a?b=1&c=2)."
        );
        assert_eq!(
            to_text(r#"<a href="https://x.example">https://x.example</a>"#),
            "https://x.example"
        );
    }

    #[test]
    fn blockquotes_are_prefixed() {
        assert_eq!(
            to_text("<blockquote><p>Be here</p></blockquote><p>now</p>"),
            "> Be here\n\nnow"
        );
    }

    #[test]
    fn scripts_and_styles_are_dropped() {
        assert_eq!(
            to_text("<style>p{color:red}</style><p>Text</p><script>alert('<p>')</script>"),
            "Text"
        );
    }

    #[test]
    fn whitespace_collapses_and_breaks_survive() {
        assert_eq!(to_text("<p>a\n   b<br>c</p>"), "a b\nc");
    }

    #[test]
    fn preformatted_text_is_fenced() {
        assert_eq!(
            to_text("<pre><code>let x = 1;\nlet y = 2;</code></pre>"),
            "```\nlet x = 1;\nlet y = 2;\n```"
        );
    }

    #[test]
    fn entities_decode() {
        assert_eq!(decode_entities("a &lt;b&gt; &amp; &#39;c&#x27; &nbsp;&unknown;"), "a <b> & 'c'  &unknown;");
        assert_eq!(to_text("Tom &amp; Jerry"), "Tom & Jerry");
    }

    #[test]
    fn stray_angle_bracket_is_text() {
        assert_eq!(to_text("1 < 2"), "1 < 2");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(to_text("Just words"), "Just words");
    }
}
