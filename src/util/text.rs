use std::borrow::Cow;

/// Strips HTML markup from text, yielding a plain-text rendering.
///
/// Feed titles, descriptions, and content bodies routinely arrive with
/// embedded markup (`<p>`, `<a href=...>`, entity references). This removes
/// tags, decodes the common entities, and collapses whitespace runs to a
/// single space, which is what a summary line wants.
///
/// Returns `Cow::Borrowed` when the input is already plain (no markup, no
/// entities, no whitespace to normalize) — the common case for titles.
pub fn strip_html(s: &str) -> Cow<'_, str> {
    if !needs_stripping(s) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    let mut in_tag = false;
    let mut pending_space = false;

    while let Some(c) = rest.chars().next() {
        let char_len = c.len_utf8();

        if in_tag {
            if c == '>' {
                in_tag = false;
            }
            rest = &rest[char_len..];
            continue;
        }

        match c {
            '<' => {
                in_tag = true;
                // A tag boundary separates words: "<p>a</p><p>b</p>" -> "a b"
                if !out.is_empty() {
                    pending_space = true;
                }
                rest = &rest[char_len..];
            }
            '&' => {
                let (decoded, consumed) = decode_entity(rest);
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push_str(&decoded);
                rest = &rest[consumed..];
            }
            c if c.is_whitespace() => {
                if !out.is_empty() {
                    pending_space = true;
                }
                rest = &rest[char_len..];
            }
            c => {
                if pending_space {
                    out.push(' ');
                    pending_space = false;
                }
                out.push(c);
                rest = &rest[char_len..];
            }
        }
    }

    Cow::Owned(out)
}

/// Truncates a string to at most `max_chars` characters (not bytes), never
/// splitting a codepoint. Returns `Cow::Borrowed` when the string already
/// fits.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((byte_end, _)) => Cow::Owned(s[..byte_end].to_string()),
        None => Cow::Borrowed(s),
    }
}

fn needs_stripping(s: &str) -> bool {
    let mut prev_was_space = true; // leading whitespace must go
    for c in s.chars() {
        if c == '<' || c == '&' {
            return true;
        }
        if c.is_whitespace() {
            if c != ' ' || prev_was_space {
                return true;
            }
            prev_was_space = true;
        } else {
            prev_was_space = false;
        }
    }
    // Trailing space needs trimming
    s.ends_with(' ')
}

/// Decodes a single entity reference at the start of `s` (which begins with
/// `&`). Returns the decoded text and the number of bytes consumed. Unknown
/// or unterminated references are passed through literally as `&`.
fn decode_entity(s: &str) -> (Cow<'static, str>, usize) {
    // Entities are short; cap the scan so stray ampersands in prose don't
    // swallow the rest of the line.
    let probe_end = s.char_indices().nth(12).map(|(i, _)| i).unwrap_or(s.len());
    let end = match s[..probe_end].find(';') {
        Some(i) => i,
        None => return (Cow::Borrowed("&"), 1),
    };
    let name = &s[1..end];
    let consumed = end + 1;

    let decoded: Cow<'static, str> = match name {
        "amp" => Cow::Borrowed("&"),
        "lt" => Cow::Borrowed("<"),
        "gt" => Cow::Borrowed(">"),
        "quot" => Cow::Borrowed("\""),
        "apos" => Cow::Borrowed("'"),
        "nbsp" => Cow::Borrowed(" "),
        _ => {
            let code = if let Some(hex) =
                name.strip_prefix("#x").or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = name.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                None
            };
            match code.and_then(char::from_u32) {
                Some(c) => Cow::Owned(c.to_string()),
                None => return (Cow::Borrowed("&"), 1),
            }
        }
    };

    (decoded, consumed)
}
