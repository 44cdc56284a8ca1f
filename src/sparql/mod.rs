//! SPARQL 1.1 query language support: parsing (SP), optimization (QC),
//! execution (XR), and result serialization (SR/DS).
//!
//! `SparqlEngine` is the component boundary the connection surface (CS)
//! talks to: it owns nothing storage-shaped itself, only borrowing the
//! `OntologyModel`/`StorageEngine` pair a connection already holds for
//! the lifetime of one call.

pub mod executor;
pub mod optimizer;
pub mod parser;
pub mod placeholders;
pub mod results;

pub use executor::{BlankNodeMode, ChangeEvent, ChangeKind, LoadResolver, NullLoadResolver, NullServiceResolver, QueryExecutor, ServiceResolver, UpdateSummary};
pub use parser::{ParsedQuery, ParsedUpdate, SparqlParser};
pub use results::{QuerySolution, ResultFormat, SparqlResults};

use crate::ontology::OntologyModel;
use crate::storage::{StorageError, StorageEngine};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors raised anywhere in the SPARQL stack, unified under one enum so
/// `error::TrackerError`'s `From` impl can classify them by component-
/// independent `ErrorKind` (parse / unknown-prefix / unknown-class /
/// unknown-property / type-error / unsupported / internal / cancelled).
#[derive(Error, Debug)]
pub enum SparqlError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("unknown prefix: {0}")]
    UnknownPrefix(String),

    #[error("unknown class: {0}")]
    UnknownClass(String),

    #[error("unknown property: {0}")]
    UnknownProperty(String),

    #[error("type error: {0}")]
    TypeError(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("query cancelled")]
    Cancelled,
}

pub type SparqlResult<T> = Result<T, SparqlError>;

/// Binds `SparqlParser` + `QueryExecutor` + `SparqlResults` behind one
/// call surface for a single `(OntologyModel, StorageEngine)` pair —
/// what a `Connection` holds on to and reuses across many queries.
pub struct SparqlEngine<'a> {
    ontology: &'a OntologyModel,
    storage: &'a StorageEngine,
    resolver: &'a dyn ServiceResolver,
    loader: &'a dyn LoadResolver,
}

impl<'a> SparqlEngine<'a> {
    pub fn new(ontology: &'a OntologyModel, storage: &'a StorageEngine, resolver: &'a dyn ServiceResolver) -> Self {
        Self { ontology, storage, resolver, loader: &NullLoadResolver }
    }

    /// Wires in a real `LOAD` resolver (§4.5/§4.6); see
    /// [`QueryExecutor::with_loader`].
    pub fn with_loader(mut self, loader: &'a dyn LoadResolver) -> Self {
        self.loader = loader;
        self
    }

    /// Parse, optimize (inline, inside the executor's BGP evaluation),
    /// and run a SPARQL query, binding `~name` placeholders from
    /// `bindings` before evaluation.
    pub fn query(&self, text: &str, bindings: &executor::Binding, cancel: &CancellationToken) -> SparqlResult<SparqlResults> {
        let parsed = SparqlParser::parse(text, self.ontology)?;
        let executor = QueryExecutor::new(self.ontology, self.storage, self.resolver, cancel);
        executor.execute_query(&parsed, bindings)
    }

    pub fn update(
        &self,
        text: &str,
        bindings: &executor::Binding,
        bnode_mode: BlankNodeMode,
        cancel: &CancellationToken,
    ) -> SparqlResult<UpdateSummary> {
        let parsed = SparqlParser::parse_update(text, self.ontology)?;
        let executor = QueryExecutor::new(self.ontology, self.storage, self.resolver, cancel).with_loader(self.loader);
        executor.execute_update(&parsed, bindings, bnode_mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Cardinality, OntologyModelBuilder, PropertyRange};
    use crate::storage::OpenFlags;
    use std::path::PathBuf;
    use std::sync::Arc;

    #[test]
    fn test_engine_query_and_update() {
        let mut b = OntologyModelBuilder::new();
        let thing = b.add_class("http://ex/Thing", false).unwrap();
        b.add_property(
            "http://ex/name",
            thing,
            PropertyRange::Datatype("http://www.w3.org/2001/XMLSchema#string".to_string()),
            Cardinality::Single,
            false,
            false,
            false,
            None,
        )
        .unwrap();
        let ontology = Arc::new(b.build().unwrap());
        let storage = StorageEngine::open(&PathBuf::from(":memory:"), OpenFlags::default(), ontology.clone()).unwrap();
        let resolver = NullServiceResolver;
        let engine = SparqlEngine::new(&ontology, &storage, &resolver);
        let cancel = CancellationToken::new();

        engine
            .update(
                "INSERT DATA { <http://ex/a> a <http://ex/Thing> ; <http://ex/name> \"Aaa\" }",
                &executor::Binding::new(),
                BlankNodeMode::Default,
                &cancel,
            )
            .unwrap();

        let results = engine
            .query("SELECT ?n WHERE { ?s <http://ex/name> ?n }", &executor::Binding::new(), &cancel)
            .unwrap();
        match results {
            SparqlResults::Bindings { solutions, .. } => assert_eq!(solutions.len(), 1),
            _ => panic!("expected bindings"),
        }
    }
}
