//! The RDF logical layer: interned terms, an in-memory quad store used for
//! staging `CONSTRUCT`/`DESCRIBE` results and deserializer targets, a
//! namespace/prefix manager, graph serialization (Turtle/TriG/JSON-LD),
//! and an RDFS forward-chaining reasoner.
//!
//! This is the foundation the ontology model, storage engine, and SPARQL
//! compiler are all built on top of.
//!
//! # Example
//!
//! ```rust
//! use tracker_store::rdf::{RdfStore, Triple, NamedNode, Literal, RdfPredicate};
//!
//! let mut store = RdfStore::new();
//!
//! let subject = NamedNode::new("http://example.org/alice").unwrap();
//! let predicate = RdfPredicate::new("http://xmlns.com/foaf/0.1/name").unwrap();
//! let object = Literal::new_simple_literal("Alice");
//!
//! let triple = Triple::new(subject.clone().into(), predicate, object.into());
//! store.insert(triple.clone()).unwrap();
//!
//! let results = store.get_triples_with_subject(&subject.into());
//! assert_eq!(results.len(), 1);
//! ```

mod namespace;
mod schema;
mod serialization;
mod store;
mod types;

pub use namespace::{Namespace, NamespaceManager, PrefixError, PrefixResult};

pub use schema::{InferenceRule, ReasoningError, ReasoningResult, RdfsReasoner};

pub use serialization::{
    ParseError, ParseResult, RdfFormat, RdfParser, RdfSerializer, SerializeError, SerializeResult,
};

pub use store::{RdfStore, RdfStoreError, RdfStoreResult, TripleIterator};

pub use types::{
    escape_string, unescape_string, BlankNode, Literal, NamedNode, Quad, QuadPattern, RdfError,
    RdfObject, RdfPredicate, RdfResult, RdfSubject, RdfTerm, Triple, TriplePattern,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rdf_module_exports() {
        let _store: RdfStore = RdfStore::new();
        let _ns_mgr = NamespaceManager::new();
    }
}
