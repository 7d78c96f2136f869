//! Conservative minifiers.
//!
//! These only remove comments and redundant whitespace. They never rename,
//! reorder or rewrite tokens, so the worst case is a file that is a little
//! larger than a real minifier would produce. String literals are copied
//! verbatim, and so are `/*! ... */` license comments.

/// Minify a stylesheet.
pub fn minify_css(src: &str) -> String {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                flush_space(&mut out, &mut pending_space, c, css_tight);
                i = copy_string(&chars, i, &mut out);
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = block_comment_end(&chars, i);
                if chars.get(i + 2) == Some(&'!') {
                    flush_space(&mut out, &mut pending_space, c, css_tight);
                    out.extend(&chars[i..end]);
                } else {
                    pending_space = pending_space || !out.is_empty();
                }
                i = end;
                continue;
            }
            c if c.is_whitespace() => {
                pending_space = !out.is_empty();
            }
            '}' => {
                pending_space = false;
                if out.ends_with(';') {
                    out.pop();
                }
                out.push(c);
            }
            _ => {
                flush_space(&mut out, &mut pending_space, c, css_tight);
                out.push(c);
            }
        }
        i += 1;
    }
    out
}

/// Characters around which whitespace carries no meaning in CSS.
fn css_tight(prev: char, next: char) -> bool {
    matches!(prev, '{' | '}' | ';' | ',' | ':') || matches!(next, '{' | '}' | ';' | ',')
}

/// Minify a script.
///
/// Line structure is kept (one statement line per output line) so automatic
/// semicolon insertion behaves exactly as in the source.
pub fn minify_js(src: &str) -> String {
    let chars: Vec<char> = src.chars().collect();
    let mut out = String::with_capacity(src.len());
    let mut line = String::new();
    let mut pending_space = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\n' => {
                push_line(&mut out, &mut line);
                pending_space = false;
            }
            '"' | '\'' | '`' => {
                flush_space(&mut line, &mut pending_space, c, js_tight);
                // Template literals may span lines; their newlines are content.
                i = copy_string(&chars, i, &mut line);
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = block_comment_end(&chars, i);
                if chars.get(i + 2) == Some(&'!') {
                    flush_space(&mut line, &mut pending_space, c, js_tight);
                    line.extend(&chars[i..end]);
                } else if chars[i..end].contains(&'\n') {
                    push_line(&mut out, &mut line);
                    pending_space = false;
                } else {
                    pending_space = !line.is_empty();
                }
                i = end;
                continue;
            }
            '/' if regex_allowed(&line) => {
                flush_space(&mut line, &mut pending_space, c, js_tight);
                i = copy_regex(&chars, i, &mut line);
                continue;
            }
            c if c.is_whitespace() => {
                pending_space = !line.is_empty();
            }
            _ => {
                flush_space(&mut line, &mut pending_space, c, js_tight);
                line.push(c);
            }
        }
        i += 1;
    }
    push_line(&mut out, &mut line);
    if out.ends_with('\n') {
        out.pop();
    }
    out
}

fn js_tight(prev: char, next: char) -> bool {
    const PUNCT: &[char] = &['{', '}', '(', ')', '[', ']', ';', ',', ':', '=', '<', '>', '?', '!', '&', '|', '*'];
    // `a + +b` and `a - -b` must keep their space.
    PUNCT.contains(&prev) || PUNCT.contains(&next)
}

fn push_line(out: &mut String, line: &mut String) {
    let trimmed = line.trim_end();
    if !trimmed.is_empty() {
        out.push_str(trimmed);
        out.push('\n');
    }
    line.clear();
}

/// A `/` starts a regex literal when it cannot be a division operator.
fn regex_allowed(line: &str) -> bool {
    match line.trim_end().chars().last() {
        None => true,
        Some(c) => matches!(
            c,
            '(' | ',' | '=' | ':' | '[' | '!' | '&' | '|' | '?' | '{' | '}' | ';' | '+' | '-' | '*' | '%' | '<' | '>' | '~' | '^'
        ),
    }
}

fn copy_regex(chars: &[char], start: usize, out: &mut String) -> usize {
    let mut i = start;
    out.push(chars[i]);
    i += 1;
    let mut in_class = false;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;
        match c {
            '\\' => {
                if let Some(&next) = chars.get(i) {
                    out.push(next);
                    i += 1;
                }
            }
            '[' => in_class = true,
            ']' => in_class = false,
            '/' if !in_class => break,
            '\n' => break,
            _ => {}
        }
    }
    i
}

/// Elements whose content is copied verbatim by [`minify_html`].
const RAW_ELEMENTS: &[&str] = &["pre", "textarea", "script", "style"];

/// Minify an HTML document or fragment.
///
/// Whitespace runs collapse to a single space (never removed entirely, since
/// whitespace between inline elements renders). Comments are dropped except
/// conditional comments (`<!--[if ...`).
pub fn minify_html(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    let mut pending_space = false;

    while let Some(c) = rest.chars().next() {
        if rest.starts_with("<!--") && !rest.starts_with("<!--[if") {
            let end = rest.find("-->").map(|p| p + 3).unwrap_or(rest.len());
            rest = &rest[end..];
            continue;
        }
        if c == '<'
            && let Some(name) = raw_element_at(rest)
        {
            flush_html_space(&mut out, &mut pending_space);
            let close = format!("</{name}");
            let end = find_ci(rest, &close)
                .and_then(|p| rest[p..].find('>').map(|q| p + q + 1))
                .unwrap_or(rest.len());
            out.push_str(&rest[..end]);
            rest = &rest[end..];
            continue;
        }
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else {
            flush_html_space(&mut out, &mut pending_space);
            out.push(c);
        }
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn flush_html_space(out: &mut String, pending: &mut bool) {
    if *pending {
        out.push(' ');
        *pending = false;
    }
}

fn raw_element_at(s: &str) -> Option<&'static str> {
    let after = s.get(1..)?;
    RAW_ELEMENTS.iter().copied().find(|name| {
        after
            .get(..name.len())
            .is_some_and(|tag| tag.eq_ignore_ascii_case(name))
            && after
                .get(name.len()..)
                .and_then(|r| r.chars().next())
                .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace())
    })
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .to_ascii_lowercase()
        .find(&needle.to_ascii_lowercase())
}

fn flush_space(out: &mut String, pending: &mut bool, next: char, tight: fn(char, char) -> bool) {
    if *pending {
        if let Some(prev) = out.chars().last()
            && !tight(prev, next)
        {
            out.push(' ');
        }
        *pending = false;
    }
}

/// Copy a quoted literal starting at `start`; returns the index after it.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    out.push(quote);
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;
        if c == '\\' {
            if let Some(&next) = chars.get(i) {
                out.push(next);
                i += 1;
            }
        } else if c == quote {
            break;
        }
    }
    i
}

fn block_comment_end(chars: &[char], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < chars.len() {
        if chars[i] == '*' && chars[i + 1] == '/' {
            return i + 2;
        }
        i += 1;
    }
    chars.len()
}
