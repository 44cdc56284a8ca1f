//! RDF serialization formats
//!
//! Supports the three graph formats the store's connection surface
//! exposes: Turtle, TriG, and JSON-LD. RDF/XML and N-Triples are not part
//! of the wire contract and are not implemented.

mod jsonld;
mod trig;
mod turtle;

use super::{NamedNode, Quad, RdfStore, Triple};
use thiserror::Error;

pub use jsonld::{JsonLdParserWrapper, JsonLdSerializerWrapper};
pub use trig::{TriGParserWrapper, TriGSerializerWrapper};
pub use turtle::{TurtleParserWrapper, TurtleSerializerWrapper};

/// RDF graph serialization format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RdfFormat {
    /// Turtle format (.ttl) — default-graph triples only.
    Turtle,
    /// TriG format (.trig) — Turtle plus `GRAPH` blocks for named graphs.
    TriG,
    /// JSON-LD format (.jsonld).
    JsonLd,
}

impl RdfFormat {
    /// Guess a format from a MIME content-type, as used by `deserialize`
    /// and the HTTP endpoint's content negotiation.
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime.split(';').next().unwrap_or("").trim() {
            "text/turtle" => Some(RdfFormat::Turtle),
            "application/trig" => Some(RdfFormat::TriG),
            "application/ld+json" => Some(RdfFormat::JsonLd),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            RdfFormat::Turtle => "text/turtle",
            RdfFormat::TriG => "application/trig",
            RdfFormat::JsonLd => "application/ld+json",
        }
    }
}

/// Parse errors, carrying a line/column position when the underlying
/// parser reports one.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(RdfFormat),
}

pub type ParseResult<T> = Result<T, ParseError>;

#[derive(Error, Debug)]
pub enum SerializeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Unsupported format: {0:?}")]
    UnsupportedFormat(RdfFormat),
}

pub type SerializeResult<T> = Result<T, SerializeError>;

/// Dispatching parser: reads a graph document in `format` into a flat list
/// of quads (default-graph triples carry `graph: None`).
pub struct RdfParser;

impl RdfParser {
    pub fn parse(input: &str, format: RdfFormat) -> ParseResult<Vec<Quad>> {
        match format {
            RdfFormat::Turtle => Ok(TurtleParserWrapper::parse(input)?
                .into_iter()
                .map(Quad::from_triple)
                .collect()),
            RdfFormat::TriG => TriGParserWrapper::parse(input),
            RdfFormat::JsonLd => JsonLdParserWrapper::parse(input),
        }
    }

    pub fn parse_file(path: &std::path::Path, format: RdfFormat) -> ParseResult<Vec<Quad>> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, format)
    }
}

/// Dispatching serializer: the reverse of `RdfParser`.
pub struct RdfSerializer;

impl RdfSerializer {
    pub fn serialize(quads: &[Quad], format: RdfFormat) -> SerializeResult<String> {
        match format {
            RdfFormat::Turtle => {
                let triples: Vec<Triple> = quads.iter().map(Quad::as_triple).collect();
                TurtleSerializerWrapper::serialize(&triples)
            }
            RdfFormat::TriG => TriGSerializerWrapper::serialize(quads),
            RdfFormat::JsonLd => {
                let triples: Vec<Triple> = quads.iter().map(Quad::as_triple).collect();
                JsonLdSerializerWrapper::serialize(&triples)
            }
        }
    }

    pub fn serialize_triples(triples: &[Triple], format: RdfFormat) -> SerializeResult<String> {
        match format {
            RdfFormat::Turtle => TurtleSerializerWrapper::serialize(triples),
            RdfFormat::JsonLd => JsonLdSerializerWrapper::serialize(triples),
            RdfFormat::TriG => {
                let quads: Vec<Quad> = triples.iter().cloned().map(Quad::from_triple).collect();
                TriGSerializerWrapper::serialize(&quads)
            }
        }
    }

    /// Serialize every quad in `store`, grouping by named graph.
    pub fn serialize_store(
        store: &RdfStore,
        format: RdfFormat,
        graphs: &[NamedNode],
    ) -> SerializeResult<String> {
        let mut quads = Vec::new();
        for triple in store.iter() {
            quads.push(Quad::from_triple(triple.clone()));
        }
        for graph in graphs {
            if let Ok(triples) = store.get_graph(graph.as_str()) {
                for triple in triples {
                    quads.push(Quad::new(
                        triple.subject,
                        triple.predicate,
                        triple.object,
                        Some(graph.clone()),
                    ));
                }
            }
        }
        Self::serialize(&quads, format)
    }

    pub fn serialize_file(
        quads: &[Quad],
        path: &std::path::Path,
        format: RdfFormat,
    ) -> SerializeResult<()> {
        let content = Self::serialize(quads, format)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turtle_dispatch_roundtrip() {
        let input = r#"<http://example.org/a> <http://example.org/b> "c" ."#;
        let quads = RdfParser::parse(input, RdfFormat::Turtle).unwrap();
        assert_eq!(quads.len(), 1);
        let output = RdfSerializer::serialize(&quads, RdfFormat::Turtle).unwrap();
        assert!(output.contains("example.org/a"));
    }

    #[test]
    fn test_mime_roundtrip() {
        assert_eq!(RdfFormat::from_mime("text/turtle"), Some(RdfFormat::Turtle));
        assert_eq!(RdfFormat::Turtle.mime_type(), "text/turtle");
    }
}
