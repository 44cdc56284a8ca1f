//! SPARQL query results and their wire serializations (SR/DS, §4.9).
//!
//! `Bindings`/`Boolean` results reuse `sparesults` for the standard
//! SPARQL Results JSON and XML formats; `Graph` results (CONSTRUCT/
//! DESCRIBE) go through the RDF layer's own Turtle/TriG/JSON-LD
//! serializers rather than duplicating them here. TSV has no
//! `sparesults` writer, so it is hand-rolled — a tab-separated dump
//! using the same term lexical forms SPARQL Results JSON would emit.

use crate::rdf::serialization::RdfFormat;
use crate::rdf::{Literal, NamedNode, RdfSerializer, RdfTerm, Triple};
use sparesults::{QueryResultsFormat, QueryResultsSerializer};
use std::collections::HashMap;

use super::executor::Binding;

/// The wire format a result set is serialized to. `Turtle`/`TriG`/
/// `JsonLd` only make sense for `Graph` results; `Json`/`Xml`/`Tsv`
/// only for `Bindings`/`Boolean`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    Turtle,
    TriG,
    JsonLd,
    Xml,
    Json,
    Tsv,
}

/// One row of a SELECT/ASK result: the subset of a `Binding` that
/// survived projection, kept in its own type so the rest of the crate
/// is not coupled to the executor's internal solution representation.
#[derive(Debug, Clone, Default)]
pub struct QuerySolution {
    pub bindings: HashMap<String, RdfTerm>,
}

impl QuerySolution {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, variable: &str) -> Option<&RdfTerm> {
        self.bindings.get(variable)
    }

    pub fn bind(&mut self, variable: String, term: RdfTerm) {
        self.bindings.insert(variable, term);
    }

    pub fn from_binding(binding: Binding) -> Self {
        Self { bindings: binding }
    }
}

#[derive(Debug, Clone)]
pub enum SparqlResults {
    Bindings {
        variables: Vec<String>,
        solutions: Vec<QuerySolution>,
    },
    Boolean(bool),
    Graph(Vec<Triple>),
}

#[derive(Debug, thiserror::Error)]
pub enum ResultsError {
    #[error("serialization I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("graph serialization error: {0}")]
    Rdf(#[from] crate::rdf::serialization::SerializeError),

    #[error("{0} results cannot be serialized to {1:?}")]
    IncompatibleFormat(&'static str, ResultFormat),
}

impl SparqlResults {
    pub fn empty() -> Self {
        SparqlResults::Bindings {
            variables: Vec::new(),
            solutions: Vec::new(),
        }
    }

    pub fn serialize(&self, format: ResultFormat) -> Result<Vec<u8>, ResultsError> {
        match (self, format) {
            (SparqlResults::Bindings { variables, solutions }, ResultFormat::Json | ResultFormat::Xml) => {
                serialize_bindings_sparesults(variables, solutions, format)
            }
            (SparqlResults::Bindings { variables, solutions }, ResultFormat::Tsv) => {
                Ok(serialize_bindings_tsv(variables, solutions))
            }
            (SparqlResults::Boolean(value), ResultFormat::Json | ResultFormat::Xml) => serialize_boolean_sparesults(*value, format),
            (SparqlResults::Boolean(value), ResultFormat::Tsv) => Ok(if *value { b"true\n".to_vec() } else { b"false\n".to_vec() }),
            (SparqlResults::Graph(triples), ResultFormat::Turtle) => Ok(RdfSerializer::serialize_triples(triples, RdfFormat::Turtle)?.into_bytes()),
            (SparqlResults::Graph(triples), ResultFormat::TriG) => Ok(RdfSerializer::serialize_triples(triples, RdfFormat::TriG)?.into_bytes()),
            (SparqlResults::Graph(triples), ResultFormat::JsonLd) => Ok(RdfSerializer::serialize_triples(triples, RdfFormat::JsonLd)?.into_bytes()),
            (SparqlResults::Bindings { .. }, other) => Err(ResultsError::IncompatibleFormat("bindings", other)),
            (SparqlResults::Boolean(_), other) => Err(ResultsError::IncompatibleFormat("boolean", other)),
            (SparqlResults::Graph(_), other) => Err(ResultsError::IncompatibleFormat("graph", other)),
        }
    }

    /// The MIME type to report for a given serialization, for HTTP
    /// content negotiation (§4.10).
    pub fn content_type(format: ResultFormat) -> &'static str {
        match format {
            ResultFormat::Turtle => "text/turtle",
            ResultFormat::TriG => "application/trig",
            ResultFormat::JsonLd => "application/ld+json",
            ResultFormat::Xml => "application/sparql-results+xml",
            ResultFormat::Json => "application/sparql-results+json",
            ResultFormat::Tsv => "text/tab-separated-values",
        }
    }
}

fn sparesults_format(format: ResultFormat) -> QueryResultsFormat {
    match format {
        ResultFormat::Xml => QueryResultsFormat::Xml,
        _ => QueryResultsFormat::Json,
    }
}

fn serialize_bindings_sparesults(variables: &[String], solutions: &[QuerySolution], format: ResultFormat) -> Result<Vec<u8>, ResultsError> {
    let var_names: Vec<oxrdf::Variable> = variables.iter().map(|v| oxrdf::Variable::new_unchecked(v.clone())).collect();
    let serializer = QueryResultsSerializer::from_format(sparesults_format(format));
    let mut writer = serializer.serialize_solutions_to_writer(Vec::new(), var_names.clone())?;
    for solution in solutions {
        let row: Vec<(oxrdf::Variable, oxrdf::Term)> = var_names
            .iter()
            .filter_map(|v| solution.get(v.as_str()).map(|t| (v.clone(), term_to_oxrdf(t))))
            .collect();
        writer.write(row)?;
    }
    Ok(writer.finish()?)
}

fn serialize_boolean_sparesults(value: bool, format: ResultFormat) -> Result<Vec<u8>, ResultsError> {
    let serializer = QueryResultsSerializer::from_format(sparesults_format(format));
    Ok(serializer.serialize_boolean_to_writer(Vec::new(), value)?)
}

fn term_to_oxrdf(term: &RdfTerm) -> oxrdf::Term {
    match term {
        RdfTerm::NamedNode(n) => oxrdf::Term::NamedNode(n.inner().clone()),
        RdfTerm::BlankNode(b) => oxrdf::Term::BlankNode(b.inner().clone()),
        RdfTerm::Literal(l) => oxrdf::Term::Literal(l.inner().clone()),
    }
}

/// Hand-rolled TSV: header row of `?var` names, then one tab-separated
/// row per solution using the same lexical-form quoting SPARQL Results
/// JSON would produce for each term kind (`<iri>`, `_:label`,
/// `"value"`/`"value"@lang`/`"value"^^<dt>`), empty cell for unbound.
fn serialize_bindings_tsv(variables: &[String], solutions: &[QuerySolution]) -> Vec<u8> {
    let mut out = String::new();
    for (i, var) in variables.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        out.push('?');
        out.push_str(var);
    }
    out.push('\n');

    for solution in solutions {
        for (i, var) in variables.iter().enumerate() {
            if i > 0 {
                out.push('\t');
            }
            if let Some(term) = solution.get(var) {
                out.push_str(&tsv_term(term));
            }
        }
        out.push('\n');
    }
    out.into_bytes()
}

fn tsv_term(term: &RdfTerm) -> String {
    match term {
        RdfTerm::NamedNode(n) => format!("<{}>", n.as_str()),
        RdfTerm::BlankNode(b) => format!("_:{}", b.as_str()),
        RdfTerm::Literal(l) => tsv_literal(l),
    }
}

fn tsv_literal(literal: &Literal) -> String {
    let escaped = crate::rdf::escape_string(literal.value());
    if let Some(lang) = literal.language() {
        format!("\"{escaped}\"@{lang}")
    } else {
        let dt = literal.datatype();
        if dt.as_str() == "http://www.w3.org/2001/XMLSchema#string" {
            format!("\"{escaped}\"")
        } else {
            format!("\"{escaped}\"^^<{}>", dt.as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tsv_shape() {
        let mut solution = QuerySolution::new();
        solution.bind("s".to_string(), RdfTerm::NamedNode(NamedNode::new("http://ex/a").unwrap()));
        solution.bind("n".to_string(), RdfTerm::Literal(Literal::new_simple_literal("Aaa")));
        let results = SparqlResults::Bindings {
            variables: vec!["s".to_string(), "n".to_string()],
            solutions: vec![solution],
        };
        let tsv = String::from_utf8(results.serialize(ResultFormat::Tsv).unwrap()).unwrap();
        assert_eq!(tsv, "?s\t?n\n<http://ex/a>\t\"Aaa\"\n");
    }

    #[test]
    fn test_boolean_json() {
        let results = SparqlResults::Boolean(true);
        let json = String::from_utf8(results.serialize(ResultFormat::Json).unwrap()).unwrap();
        assert!(json.contains("true"));
    }

    #[test]
    fn test_incompatible_format_rejected() {
        let results = SparqlResults::Boolean(true);
        assert!(results.serialize(ResultFormat::Turtle).is_err());
    }

    #[test]
    fn test_graph_turtle_roundtrip() {
        use crate::rdf::{RdfObject, RdfPredicate, RdfSubject};
        let triple = Triple::new(
            RdfSubject::NamedNode(NamedNode::new("http://ex/a").unwrap()),
            RdfPredicate::new("http://ex/p").unwrap(),
            RdfObject::Literal(Literal::new_simple_literal("v")),
        );
        let results = SparqlResults::Graph(vec![triple]);
        let turtle = String::from_utf8(results.serialize(ResultFormat::Turtle).unwrap()).unwrap();
        assert!(turtle.contains("ex/a"));
    }
}
