//! The `~name` parameter placeholder pre-pass (§4.5).
//!
//! `~name` is not legal SPARQL 1.1 grammar, so a prepared statement's
//! text is rewritten before it ever reaches `spargebra`: every `~name`
//! occurrence outside a string/IRI literal or a `#` comment is replaced
//! with a fresh SPARQL variable the grammar does accept, and the
//! `name → variable` mapping is kept alongside the parsed query so that
//! `Statement::bind_*` can find the right slot at execution time.
//!
//! Unbound slots stay ordinary unprojected variables: `?s nie:title
//! ?__ph_arg1` simply fails to bind `?__ph_arg1` to anything, which
//! matches the "unbound parameters produce unbound" rule in §6.2
//! exactly — no special casing needed downstream.

use std::collections::HashMap;
use std::fmt::Write as _;

/// Maps a placeholder's surface name (`arg1` in `~arg1`) to the
/// generated variable name substituted in its place (without the `?`).
pub type PlaceholderMap = HashMap<String, String>;

/// Rewrite every `~name` occurrence in `query` into a fresh bound
/// variable, returning the rewritten text and the name→variable map.
pub fn rewrite_placeholders(query: &str) -> (String, PlaceholderMap) {
    let mut out = String::with_capacity(query.len());
    let mut map = PlaceholderMap::new();
    let len = query.len();
    let mut i = 0usize;
    let mut next_slot = 0usize;

    while i < len {
        let c = query[i..].chars().next().expect("i < len implies a char remains");
        match c {
            '"' | '\'' => {
                let end = skip_literal(query, i);
                out.push_str(&query[i..end]);
                i = end;
            }
            '<' if looks_like_iri_ref(query, i) => {
                let end = skip_iri(query, i);
                out.push_str(&query[i..end]);
                i = end;
            }
            '#' => {
                let end = query[i..].find('\n').map(|p| i + p).unwrap_or(len);
                out.push_str(&query[i..end]);
                i = end;
            }
            '~' if is_placeholder_start(query, i) => {
                let end = placeholder_name_end(query, i + 1);
                let name = &query[i + 1..end];
                let var = map.entry(name.to_string()).or_insert_with(|| {
                    let slot = next_slot;
                    next_slot += 1;
                    format!("__ph_{slot}_{name}")
                });
                write!(out, "?{var}").expect("String write is infallible");
                i = end;
            }
            c => {
                out.push(c);
                i += c.len_utf8();
            }
        }
    }

    (out, map)
}

fn is_placeholder_start(query: &str, tilde_pos: usize) -> bool {
    query[tilde_pos + 1..]
        .chars()
        .next()
        .map(|c| c.is_alphabetic() || c == '_')
        .unwrap_or(false)
}

fn placeholder_name_end(query: &str, start: usize) -> usize {
    query[start..]
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .map(|p| start + p)
        .unwrap_or(query.len())
}

fn looks_like_iri_ref(query: &str, start: usize) -> bool {
    // Distinguish `<http://...>` from a `<`/`<=` comparison operator: an
    // IRI ref never contains whitespace before its closing `>`.
    query[start + 1..]
        .find(|c: char| c == '>' || c.is_whitespace())
        .map(|p| query.as_bytes()[start + 1 + p] == b'>')
        .unwrap_or(false)
}

fn skip_literal(input: &str, start: usize) -> usize {
    let len = input.len();
    let quote = input[start..].chars().next().expect("start is a valid char boundary");
    let quote_str: String = std::iter::repeat(quote).take(3).collect();
    let triple = input[start..].starts_with(&quote_str);
    let quote_len = if triple { quote.len_utf8() * 3 } else { quote.len_utf8() };
    let mut i = start + quote_len;
    while i < len {
        if input[i..].starts_with('\\') {
            let mut chars = input[i + 1..].chars();
            let escaped_len = chars.next().map(|c| c.len_utf8()).unwrap_or(0);
            i += 1 + escaped_len;
            continue;
        }
        if input[i..].starts_with(&input[start..start + quote_len]) {
            return i + quote_len;
        }
        i += input[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
    }
    len
}

fn skip_iri(input: &str, start: usize) -> usize {
    let len = input.len();
    let mut i = start + 1;
    while i < len && !input[i..].starts_with('>') {
        i += input[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
    }
    (i + 1).min(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_simple_placeholder() {
        let (rewritten, map) = rewrite_placeholders("SELECT ?s WHERE { ?s nie:title ~arg1 }");
        assert!(rewritten.contains("?__ph_0_arg1"));
        assert_eq!(map.get("arg1").unwrap(), "__ph_0_arg1");
    }

    #[test]
    fn test_placeholder_ignored_inside_string() {
        let (rewritten, map) = rewrite_placeholders(r#"SELECT ?s WHERE { ?s a "~notAPlaceholder" }"#);
        assert!(map.is_empty());
        assert!(rewritten.contains("~notAPlaceholder"));
    }

    #[test]
    fn test_placeholder_ignored_inside_iri() {
        let (rewritten, _map) = rewrite_placeholders("SELECT ?s WHERE { ?s a <http://ex/~not-a-slot> }");
        assert!(rewritten.contains("<http://ex/~not-a-slot>"));
    }

    #[test]
    fn test_same_name_reuses_slot() {
        let (_rewritten, map) = rewrite_placeholders("SELECT ?s WHERE { ?s ?p ~x . ?s ?q ~x }");
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_multibyte_literal_does_not_panic() {
        let (rewritten, map) =
            rewrite_placeholders(r#"SELECT ?s WHERE { ?s a "héllo wörld é" ; nie:title ~t }"#);
        assert!(rewritten.contains("héllo wörld"));
        assert!(map.contains_key("t"));
    }

    #[test]
    fn test_multibyte_iri_does_not_panic() {
        let (rewritten, _map) = rewrite_placeholders("SELECT ?s WHERE { ?s a <http://ex/café> }");
        assert!(rewritten.contains("café"));
    }
}
