//! tracker-store: an embedded RDF triple/quad store with a SPARQL 1.1
//! query/update interface.
//!
//! A connection owns an ontology-defined physical schema (one SQLite
//! table per class, side tables for multi-valued properties, an FTS5
//! full-text index) and exposes it through the statement/cursor
//! contract in [`connection`] — the same shape whether the connection
//! is local, over the in-process bus transport, or over HTTP.
//!
//! # Modules
//!
//! - [`ontology`] — the ontology model (OM), its builder, the `.ttl`
//!   loader (OL), and the RDFS forward-chaining reasoner.
//! - [`rdf`] — interned RDF terms, an in-memory quad store, namespace
//!   management, and Turtle/TriG/JSON-LD parsing and serialization.
//! - [`storage`] — the physical storage engine (SE): schema DDL,
//!   resource/graph interning, and the `rusqlite` connection it all
//!   runs on top of.
//! - [`sparql`] — the SPARQL parser (SP, via `spargebra`), query
//!   compiler and execution runtime (QC/XR), and result serializers
//!   (SR/DS).
//! - [`connection`] — the connection surface (CS) and HTTP/bus
//!   endpoints (EP) built on top of the above.
//! - [`error`] — the crate-level error taxonomy every component's
//!   error type folds into.
//!
//! # Example
//!
//! ```rust
//! use tracker_store::connection::{Connection, OpenFlags};
//! use tracker_store::ontology::{Cardinality, OntologyModelBuilder, PropertyRange};
//! use tokio_util::sync::CancellationToken;
//! use std::sync::Arc;
//!
//! let mut builder = OntologyModelBuilder::new();
//! builder.add_namespace("http://example.org/", "ex");
//! let thing = builder.add_class("http://example.org/Thing", false).unwrap();
//! builder
//!     .add_property(
//!         "http://example.org/name",
//!         thing,
//!         PropertyRange::Datatype("http://www.w3.org/2001/XMLSchema#string".to_string()),
//!         Cardinality::Single,
//!         true,
//!         false,
//!         false,
//!         None,
//!     )
//!     .unwrap();
//! let ontology = Arc::new(builder.build().unwrap());
//!
//! let conn = Connection::open_in_memory(ontology, OpenFlags::default()).unwrap();
//! let cancel = CancellationToken::new();
//!
//! conn.update(
//!     "INSERT DATA { <http://example.org/a> a <http://example.org/Thing> ; <http://example.org/name> \"Aaa\" }",
//!     &cancel,
//! )
//! .unwrap();
//!
//! let mut cursor = conn
//!     .query("SELECT ?n WHERE { ?s <http://example.org/name> ?n }", &cancel)
//!     .unwrap();
//! assert!(cursor.next());
//! ```

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod error;
pub mod http;
pub mod ontology;
pub mod rdf;
pub mod sparql;
pub mod storage;

pub use connection::{Connection, ConnectionError, ConnectionResult, OpenFlags};
pub use error::{ErrorKind, TrackerError, TrackerResult};

pub use ontology::{
    Cardinality, Class, ClassId, OntologyError, OntologyMeta, OntologyModel, OntologyModelBuilder,
    OntologyResult, Property, PropertyId, PropertyRange,
};

pub use rdf::{
    BlankNode, InferenceRule, Literal, NamedNode, NamespaceManager, Quad, RdfFormat, RdfParser,
    RdfPredicate, RdfSerializer, RdfStore, RdfStoreError, RdfStoreResult, RdfSubject, RdfTerm,
    RdfsReasoner, Triple,
};

pub use sparql::{ResultFormat, SparqlEngine, SparqlError, SparqlResult, SparqlResults};

pub use storage::{StorageEngine, StorageError, StorageResult};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get version string
pub fn version() -> &'static str {
    VERSION
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        let ver = version();
        assert!(!ver.is_empty());
    }
}
