//! Scanning and rewriting of `url()` references in declaration values
//!
//! Values are kept as raw text in the rule model, so asset rewriting works
//! directly on the text. The scanner recognizes `url(...)` tokens with
//! optional quoting and leaves everything else untouched.

use url::Url;

/// Quick check used to skip declarations without asset references.
#[must_use]
pub fn contains_url(value: &str) -> bool {
    find_url_token(value, 0).is_some()
}

#[must_use]
pub fn is_data_uri(reference: &str) -> bool {
    reference.trim_start().starts_with("data:")
}

/// Absolute or protocol-relative references are fetched over the network
/// rather than resolved against asset directories.
#[must_use]
pub fn is_remote_url(reference: &str) -> bool {
    let reference = reference.trim_start();
    reference.starts_with("http://") || reference.starts_with("https://") || reference.starts_with("//")
}

/// Join a CSS reference against a base URL, defaulting protocol-relative
/// references to https.
#[must_use]
pub fn join_url(base: &Url, reference: &str) -> Option<String> {
    let reference = reference.trim();
    if let Some(rest) = reference.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    base.join(reference).ok().map(|joined| joined.to_string())
}

/// Rewrite every `url()` reference in a declaration value. The callback
/// returns the replacement reference or `None` to keep the original.
pub fn rewrite_urls<F>(value: &str, mut replace: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(value.len());
    let mut cursor = 0;

    while let Some(token) = find_url_token(value, cursor) {
        out.push_str(&value[cursor..token.start]);

        match replace(&token.reference) {
            Some(replacement) => {
                out.push_str("url(");
                match token.quote {
                    Some(q) => {
                        out.push(q);
                        out.push_str(&replacement);
                        out.push(q);
                    }
                    None => {
                        if replacement
                            .chars()
                            .any(|c| c.is_whitespace() || matches!(c, '\'' | '"' | '(' | ')'))
                        {
                            out.push('"');
                            out.push_str(&replacement);
                            out.push('"');
                        } else {
                            out.push_str(&replacement);
                        }
                    }
                }
                out.push(')');
            }
            None => out.push_str(&value[token.start..token.end]),
        }

        cursor = token.end;
    }

    out.push_str(&value[cursor..]);
    out
}

/// Visit every `url()` reference without rewriting.
pub fn visit_urls<F>(value: &str, mut visit: F)
where
    F: FnMut(&str),
{
    let mut cursor = 0;
    while let Some(token) = find_url_token(value, cursor) {
        visit(&token.reference);
        cursor = token.end;
    }
}

struct UrlToken {
    /// Byte offset of `url(`
    start: usize,
    /// Byte offset just past the closing `)`
    end: usize,
    reference: String,
    quote: Option<char>,
}

fn find_url_token(value: &str, from: usize) -> Option<UrlToken> {
    let bytes = value.as_bytes();
    let mut i = from;

    // Byte-level scan: `i` may sit inside a multi-byte character, so the
    // comparison has to stay off `str` slicing until a match anchors it to
    // the ASCII `url(`.
    while i + 4 <= bytes.len() {
        if !bytes[i..i + 4].eq_ignore_ascii_case(b"url(") {
            i += 1;
            continue;
        }
        // Reject matches inside longer identifiers like `-custom-url(`
        if i > 0 {
            let prev = bytes[i - 1] as char;
            if prev.is_ascii_alphanumeric() || prev == '-' || prev == '_' {
                i += 1;
                continue;
            }
        }

        if let Some(token) = parse_url_token(value, i) {
            return Some(token);
        }
        i += 4;
    }

    None
}

fn parse_url_token(value: &str, start: usize) -> Option<UrlToken> {
    let mut chars = value[start + 4..].char_indices().peekable();
    let offset = start + 4;

    let mut pos = offset;
    while let Some(&(i, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else {
            pos = offset + i;
            break;
        }
    }

    let quote = match value[pos..].chars().next() {
        Some(q @ ('"' | '\'')) => Some(q),
        Some(_) => None,
        None => return None,
    };

    if let Some(q) = quote {
        let body_start = pos + q.len_utf8();
        let rel_close = value[body_start..].find(q)?;
        let reference = value[body_start..body_start + rel_close].to_string();
        let after_quote = body_start + rel_close + q.len_utf8();
        let rel_paren = value[after_quote..].find(')')?;
        if !value[after_quote..after_quote + rel_paren].trim().is_empty() {
            return None;
        }
        Some(UrlToken {
            start,
            end: after_quote + rel_paren + 1,
            reference,
            quote,
        })
    } else {
        let rel_paren = value[pos..].find(')')?;
        let reference = value[pos..pos + rel_paren].trim().to_string();
        Some(UrlToken {
            start,
            end: pos + rel_paren + 1,
            reference,
            quote: None,
        })
    }
}
