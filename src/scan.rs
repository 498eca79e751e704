//! Brace and string aware scanning over script text.
//!
//! Delimiters are ASCII, so byte offsets returned here always fall on char
//! boundaries and can be used to slice the original `&str`.

/// Index just past the string literal starting at `start` (which holds the quote).
/// Unterminated literals run to the end of the text.
pub fn skip_string(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            c if c == quote => return i + 1,
            b'\n' if quote != b'`' => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_line_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start;
    while i < bytes.len() && bytes[i] != b'\n' {
        i += 1;
    }
    i
}

fn skip_block_comment(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Whether a `/` at `pos` opens a regular expression literal, judged by the
/// previous significant character.
fn starts_regex(bytes: &[u8], pos: usize) -> bool {
    let mut j = pos;
    while j > 0 {
        j -= 1;
        let c = bytes[j];
        if c.is_ascii_whitespace() {
            continue;
        }
        return matches!(
            c,
            b'(' | b',' | b'=' | b':' | b'[' | b'!' | b'&' | b'|' | b'?' | b'{' | b'}' | b';'
        );
    }
    true
}

fn skip_regex(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'[' => {
                in_class = true;
                i += 1
            }
            b']' => {
                in_class = false;
                i += 1
            }
            b'/' if !in_class => return i + 1,
            b'\n' => return i,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn closing_for(open: u8) -> Option<u8> {
    match open {
        b'{' => Some(b'}'),
        b'(' => Some(b')'),
        b'[' => Some(b']'),
        _ => None,
    }
}

/// Index of the bracket matching the one at `open`, skipping strings and comments.
pub fn find_matching(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    closing_for(*bytes.get(open)?)?;
    let mut stack: Vec<u8> = Vec::new();
    let mut i = open;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\'' | b'"' | b'`' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                i = skip_line_comment(bytes, i);
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_block_comment(bytes, i);
                continue;
            }
            b'{' | b'(' | b'[' => stack.push(c),
            b'}' | b')' | b']' => {
                let top = stack.pop()?;
                if closing_for(top) != Some(c) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Remove `//` and `/* */` comments, leaving string, template and regex
/// literals intact. Line structure is preserved.
pub fn strip_comments(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                i = skip_string(bytes, i);
            }
            // `://` belongs to an unquoted URL in an asset directive.
            b'/' if bytes.get(i + 1) == Some(&b'/') && (i == 0 || bytes[i - 1] != b':') => {
                out.push_str(&text[last..i]);
                i = skip_line_comment(bytes, i);
                last = i;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                out.push_str(&text[last..i]);
                let end = skip_block_comment(bytes, i);
                let newlines = text[i..end].matches('\n').count();
                out.push_str(&"\n".repeat(newlines));
                i = end;
                last = i;
            }
            b'/' if starts_regex(bytes, i) => {
                i = skip_regex(bytes, i);
            }
            _ => i += 1,
        }
    }
    out.push_str(&text[last..]);
    out
}

/// Split on `sep` at bracket depth zero, outside strings. Parts are trimmed
/// and empty parts dropped.
pub fn split_top_level(text: &str, sep: u8) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut last = 0;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' | b'`' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'{' | b'(' | b'[' => depth += 1,
            b'}' | b')' | b']' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push(text[last..i].trim().to_string());
                last = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(text[last..].trim().to_string());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// `Regex::replace_all` with a fallible, stateful replacement.
pub fn replace_all_with<E>(
    re: &regex::Regex,
    text: &str,
    mut replace: impl FnMut(&regex::Captures) -> Result<String, E>,
) -> Result<String, E> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        out.push_str(&text[last..m.start()]);
        out.push_str(&replace(&caps)?);
        last = m.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Strip one pair of matching surrounding quotes.
pub fn unquote(value: &str) -> &str {
    let v = value.trim();
    for q in ['\'', '"', '`'] {
        if v.len() >= 2 && v.starts_with(q) && v.ends_with(q) {
            return &v[1..v.len() - 1];
        }
    }
    v
}

/// Quote `value` as a JavaScript string literal.
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_braces_skip_strings() {
        let text = "class A { m() { return '}'; } }";
        let open = text.find('{').unwrap();
        assert_eq!(find_matching(text, open), Some(text.len() - 1));
    }

    #[test]
    fn test_unbalanced_braces() {
        assert_eq!(find_matching("{ ( }", 0), None);
        assert_eq!(find_matching("{ {", 0), None);
    }

    #[test]
    fn test_strip_comments_keeps_urls_in_strings() {
        let code = "let u = 'http://x.y'; // note\n/* a\nb */let r = /\\/\\//g;";
        let stripped = strip_comments(code);
        assert!(stripped.contains("'http://x.y'"));
        assert!(!stripped.contains("note"));
        assert!(!stripped.contains("a\nb"));
        assert!(stripped.contains("let r = /\\/\\//g;"));
        assert_eq!(stripped.matches('\n').count(), 2);
    }

    #[test]
    fn test_unquoted_directive_url_survives() {
        let stripped = strip_comments("@lx:css https://cdn.x/a.css; // c");
        assert_eq!(stripped.trim_end(), "@lx:css https://cdn.x/a.css;");
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(
            split_top_level("a:1, b:f(1,2), c:'x,y'", b','),
            vec!["a:1", "b:f(1,2)", "c:'x,y'"]
        );
    }
}
