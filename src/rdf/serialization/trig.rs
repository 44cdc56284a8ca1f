//! TriG format implementation.
//!
//! TriG triple syntax is identical to Turtle; the only addition is
//! `GRAPH <iri> { ... }` blocks (and a bare `<iri> { ... }` short form).
//! The parser here splits a TriG document into its `@prefix`/`@base`
//! header plus a sequence of graph blocks at brace-depth zero, then
//! reuses the Turtle parser (`super::turtle`) for the triples inside each
//! block — the same approach the library takes for the Turtle-proper
//! path, just driven per-block instead of once for the whole document.
//!
//! The serializer is a hand-rolled streaming writer implementing the
//! graph/subject/predicate/object break-sequence: it tracks
//! `(graph, subject, predicate)` of the previously written quad and
//! emits the minimal punctuation needed to continue, open, or close a
//! block when the next quad differs.

use super::turtle::{TurtleParserWrapper, TurtleSerializerWrapper};
use super::{ParseError, ParseResult, SerializeError, SerializeResult};
use crate::rdf::{NamedNode, Quad, RdfObject, RdfSubject};
use std::fmt::Write as _;

pub struct TriGParserWrapper;

impl TriGParserWrapper {
    pub fn parse(input: &str) -> ParseResult<Vec<Quad>> {
        let (header, blocks) = split_blocks(input)?;
        let mut quads = Vec::new();

        for block in blocks {
            let doc = format!("{header}\n{}", block.content);
            let triples = TurtleParserWrapper::parse(&doc)?;
            for triple in triples {
                quads.push(Quad::new(
                    triple.subject,
                    triple.predicate,
                    triple.object,
                    block.graph.clone(),
                ));
            }
        }

        Ok(quads)
    }
}

pub struct TriGSerializerWrapper;

impl TriGSerializerWrapper {
    /// Serialize quads to TriG text. Quads must be passed grouped by
    /// graph and, within a graph, grouped by subject and predicate for
    /// the comma/semicolon compaction to kick in — callers typically sort
    /// by `(graph, subject, predicate)` before calling this.
    pub fn serialize(quads: &[Quad]) -> SerializeResult<String> {
        let mut sorted: Vec<&Quad> = quads.iter().collect();
        sorted.sort_by(|a, b| {
            sort_key(a.graph.as_ref()).cmp(&sort_key(b.graph.as_ref())).then_with(|| {
                a.subject
                    .to_string()
                    .cmp(&b.subject.to_string())
                    .then_with(|| a.predicate.to_string().cmp(&b.predicate.to_string()))
            })
        });

        let mut out = String::new();
        let mut last: Option<(Option<NamedNode>, RdfSubject, String)> = None;
        let mut graph_open = false;

        for quad in sorted {
            let predicate_str = quad.predicate.to_string();
            let same_graph = last.as_ref().map(|(g, _, _)| g == &quad.graph).unwrap_or(false);
            let same_subject = same_graph
                && last
                    .as_ref()
                    .map(|(_, s, _)| s == &quad.subject)
                    .unwrap_or(false);
            let same_predicate = same_subject
                && last
                    .as_ref()
                    .map(|(_, _, p)| p == &predicate_str)
                    .unwrap_or(false);

            if !same_graph {
                if last.is_some() {
                    out.push_str(" .\n");
                }
                if graph_open {
                    out.push_str("}\n");
                    graph_open = false;
                }
                if let Some(graph) = &quad.graph {
                    writeln!(out, "GRAPH {} {{", graph).ok();
                    graph_open = true;
                }
                write!(out, "{} {} {}", quad.subject, quad.predicate, format_object(&quad.object))
                    .ok();
            } else if !same_subject {
                out.push_str(" .\n");
                write!(out, "{} {} {}", quad.subject, quad.predicate, format_object(&quad.object))
                    .ok();
            } else if !same_predicate {
                out.push_str(" ;\n    ");
                write!(out, "{} {}", quad.predicate, format_object(&quad.object)).ok();
            } else {
                out.push_str(", ");
                write!(out, "{}", format_object(&quad.object)).ok();
            }

            last = Some((quad.graph.clone(), quad.subject.clone(), predicate_str));
        }

        if last.is_some() {
            out.push_str(" .\n");
        }
        if graph_open {
            out.push_str("}\n");
        }

        Ok(out)
    }
}

fn sort_key(graph: Option<&NamedNode>) -> String {
    graph.map(|g| g.as_str().to_string()).unwrap_or_default()
}

fn format_object(object: &RdfObject) -> String {
    object.to_string()
}

struct Block {
    graph: Option<NamedNode>,
    content: String,
}

/// Split a TriG document into its directive header (`@prefix`/`@base`
/// lines, reused verbatim for every block) and a sequence of graph
/// blocks. Text outside any `GRAPH ... { }` block belongs to the default
/// graph and is emitted as one `graph: None` block.
fn split_blocks(input: &str) -> ParseResult<(String, Vec<Block>)> {
    let mut header = String::new();
    let mut blocks = Vec::new();
    let mut default_buf = String::new();

    let bytes = input.as_bytes();
    let mut i = 0usize;
    let mut segment_start = 0usize;

    while i < bytes.len() {
        if segment_start == i
            && (input[i..].starts_with("@prefix")
                || input[i..].starts_with("@base")
                || input[i..].starts_with("PREFIX")
                || input[i..].starts_with("BASE"))
        {
            if let Some(end) = input[i..].find('.') {
                header.push_str(&input[i..i + end + 1]);
                header.push('\n');
                i += end + 1;
                segment_start = i;
                continue;
            }
        }

        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_literal(input, i);
                continue;
            }
            b'<' => {
                i = skip_iri(input, i);
                continue;
            }
            b'{' => {
                let segment = &input[segment_start..i];
                let split_at = find_last_top_level_dot(segment);
                let (default_part, graph_token) = match split_at {
                    Some(pos) => (&segment[..=pos], &segment[pos + 1..]),
                    None => ("", segment),
                };
                default_buf.push_str(default_part);
                let graph = parse_graph_term(graph_token.trim())?;

                let block_start = i + 1;
                let mut block_depth = 1usize;
                let mut j = block_start;
                while j < bytes.len() && block_depth > 0 {
                    match bytes[j] {
                        b'"' | b'\'' => {
                            j = skip_literal(input, j);
                            continue;
                        }
                        b'<' => {
                            j = skip_iri(input, j);
                            continue;
                        }
                        b'{' => block_depth += 1,
                        b'}' => block_depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                let block_end = j - 1;
                blocks.push(Block {
                    graph,
                    content: input[block_start..block_end].to_string(),
                });
                i = j;
                segment_start = i;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    if segment_start < bytes.len() {
        default_buf.push_str(&input[segment_start..]);
    }
    if !default_buf.trim().is_empty() {
        blocks.insert(
            0,
            Block {
                graph: None,
                content: default_buf,
            },
        );
    }

    Ok((header, blocks))
}

/// Find the byte offset of the last top-level (depth-0, outside
/// literals/IRIs) `.` in `segment`, if any.
fn find_last_top_level_dot(segment: &str) -> Option<usize> {
    let bytes = segment.as_bytes();
    let mut i = 0usize;
    let mut last_dot = None;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => {
                i = skip_literal(segment, i);
                continue;
            }
            b'<' => {
                i = skip_iri(segment, i);
                continue;
            }
            b'.' => last_dot = Some(i),
            _ => {}
        }
        i += 1;
    }
    last_dot
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
    let bytes = input.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() && bytes[i] != b'>' {
        i += 1;
    }
    (i + 1).min(bytes.len())
}

fn parse_graph_term(token: &str) -> ParseResult<Option<NamedNode>> {
    let token = token.trim();
    let token = token.strip_prefix("GRAPH").map(str::trim).unwrap_or(token);
    if token.is_empty() {
        return Ok(None);
    }
    if let Some(iri) = token.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
        return Ok(Some(
            NamedNode::new(iri).map_err(|e| ParseError::Parse(e.to_string()))?,
        ));
    }
    Err(ParseError::Parse(format!(
        "unsupported graph term in TriG block header: {token}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trig_two_graphs() {
        let input = r#"
            <http://x/a> <http://x/p> 1 .
            GRAPH <http://x/g> { <http://x/a> <http://x/p> 1, 2 ; <http://x/q> "x" . }
            GRAPH <http://x/h> { <http://x/a> <http://x/p> 3 . }
        "#;
        let quads = TriGParserWrapper::parse(input).unwrap();
        let g = NamedNode::new("http://x/g").unwrap();
        let h = NamedNode::new("http://x/h").unwrap();
        assert_eq!(quads.iter().filter(|q| q.graph.as_ref() == Some(&g)).count(), 3);
        assert_eq!(quads.iter().filter(|q| q.graph.as_ref() == Some(&h)).count(), 1);
        assert_eq!(quads.iter().filter(|q| q.graph.is_none()).count(), 1);
    }

    #[test]
    fn test_trig_parse_multibyte_literal_does_not_panic() {
        let input = r#"
            GRAPH <http://x/g> { <http://x/a> <http://x/p> "héllo wörld é" . }
        "#;
        let quads = TriGParserWrapper::parse(input).unwrap();
        assert_eq!(quads.len(), 1);
    }

    #[test]
    fn test_trig_serialize_break_sequence() {
        use crate::rdf::{Literal, RdfPredicate};
        let g = NamedNode::new("http://x/g").unwrap();
        let a = NamedNode::new("http://x/a").unwrap();
        let p = RdfPredicate::new("http://x/p").unwrap();
        let q = RdfPredicate::new("http://x/q").unwrap();

        let quads = vec![
            Quad::new(a.clone().into(), p.clone(), Literal::new_simple_literal("1").into(), Some(g.clone())),
            Quad::new(a.clone().into(), p.clone(), Literal::new_simple_literal("2").into(), Some(g.clone())),
            Quad::new(a.into(), q, Literal::new_simple_literal("x").into(), Some(g)),
        ];

        let out = TriGSerializerWrapper::serialize(&quads).unwrap();
        assert!(out.contains("GRAPH <http://x/g>"));
        assert!(out.contains(", "));
        assert!(out.contains(" ;\n"));
    }
}
