//! Resource interning: maps an IRI or blank-node label to a stable
//! integer rowid in the `resources` table, the unit every other table
//! foreign-keys against.
//!
//! IRIs are stored exactly as they arrive from the logical RDF layer
//! (already-decoded Unicode, never percent-encoded) — percent-encoding
//! is purely a wire-format concern at the HTTP endpoint and SPARQL
//! serializer boundary, not something the storage engine or the
//! in-memory model ever see. An `lru`-backed cache sits in front of the
//! `resources` table lookup so that hot resources (the subject of many
//! triples in a batch insert) don't round-trip through SQLite on every
//! reference.

use super::schema::resource_table_name;
use super::{StorageError, StorageResult};
use lru::LruCache;
use rusqlite::{Connection, OptionalExtension};
use std::num::NonZeroUsize;
use std::sync::Mutex;

const CACHE_CAPACITY: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Iri(String),
    Blank(String),
}

pub struct ResourceCache {
    cache: Mutex<LruCache<ResourceKey, i64>>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(CACHE_CAPACITY).unwrap())),
        }
    }

    /// Look up an already-interned resource without creating it.
    pub fn lookup(&self, conn: &Connection, key: &ResourceKey) -> StorageResult<Option<i64>> {
        if let Some(&id) = self.cache.lock().unwrap().get(key) {
            return Ok(Some(id));
        }
        let (column, value) = match key {
            ResourceKey::Iri(iri) => ("iri", iri.as_str()),
            ResourceKey::Blank(label) => ("blank_label", label.as_str()),
        };
        let id: Option<i64> = conn
            .query_row(
                &format!("SELECT id FROM {} WHERE {column} = ?1", resource_table_name()),
                [value],
                |row| row.get(0),
            )
            .optional()
            .map_err(StorageError::Sqlite)?;
        if let Some(id) = id {
            self.cache.lock().unwrap().put(key.clone(), id);
        }
        Ok(id)
    }

    /// Look up an interned resource, creating it if it doesn't exist yet.
    pub fn intern(&self, conn: &Connection, key: &ResourceKey) -> StorageResult<i64> {
        if let Some(id) = self.lookup(conn, key)? {
            return Ok(id);
        }
        let (column, value) = match key {
            ResourceKey::Iri(iri) => ("iri", iri.as_str()),
            ResourceKey::Blank(label) => ("blank_label", label.as_str()),
        };
        conn.execute(
            &format!("INSERT INTO {} ({column}) VALUES (?1)", resource_table_name()),
            [value],
        )
        .map_err(StorageError::Sqlite)?;
        let id = conn.last_insert_rowid();
        self.cache.lock().unwrap().put(key.clone(), id);
        Ok(id)
    }

    /// Resolve a previously-interned resource's id back to its key.
    /// Used by result-row materialization (a query returns resource ids
    /// internally; callers need the IRI/blank label to build RDF terms).
    pub fn resolve(conn: &Connection, id: i64) -> StorageResult<ResourceKey> {
        conn.query_row(
            &format!("SELECT iri, blank_label FROM {} WHERE id = ?1", resource_table_name()),
            [id],
            |row| {
                let iri: Option<String> = row.get(0)?;
                let blank: Option<String> = row.get(1)?;
                Ok((iri, blank))
            },
        )
        .map_err(StorageError::Sqlite)
        .and_then(|(iri, blank)| match (iri, blank) {
            (Some(iri), _) => Ok(ResourceKey::Iri(iri)),
            (None, Some(label)) => Ok(ResourceKey::Blank(label)),
            (None, None) => Err(StorageError::Constraint(format!(
                "resource {id} has neither an IRI nor a blank label"
            ))),
        })
    }
}

impl Default for ResourceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Intern a named graph IRI, returning its `graphs.id`. `None` maps to
/// the reserved default-graph id `0`.
pub fn intern_graph(conn: &Connection, graph: Option<&str>) -> StorageResult<i64> {
    let Some(iri) = graph else { return Ok(0) };
    let existing: Option<i64> = conn
        .query_row(
            &format!("SELECT id FROM {} WHERE iri = ?1", super::schema::graph_table_name()),
            [iri],
            |row| row.get(0),
        )
        .optional()
        .map_err(StorageError::Sqlite)?;
    if let Some(id) = existing {
        return Ok(id);
    }
    conn.execute(
        &format!("INSERT INTO {} (iri) VALUES (?1)", super::schema::graph_table_name()),
        [iri],
    )
    .map_err(StorageError::Sqlite)?;
    Ok(conn.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::OntologyModelBuilder;
    use crate::storage::schema::generate_ddl;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let model = OntologyModelBuilder::new().build().unwrap();
        for stmt in generate_ddl(&model) {
            conn.execute(&stmt, []).unwrap();
        }
        conn
    }

    #[test]
    fn test_intern_is_idempotent() {
        let conn = test_conn();
        let cache = ResourceCache::new();
        let key = ResourceKey::Iri("http://ex/alice".to_string());
        let id1 = cache.intern(&conn, &key).unwrap();
        let id2 = cache.intern(&conn, &key).unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn test_resolve_round_trips() {
        let conn = test_conn();
        let cache = ResourceCache::new();
        let key = ResourceKey::Iri("http://ex/alice".to_string());
        let id = cache.intern(&conn, &key).unwrap();
        assert_eq!(ResourceCache::resolve(&conn, id).unwrap(), key);
    }

    #[test]
    fn test_intern_graph_default_is_zero() {
        let conn = test_conn();
        assert_eq!(intern_graph(&conn, None).unwrap(), 0);
    }
}
