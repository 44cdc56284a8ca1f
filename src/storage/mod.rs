//! The storage engine (SE): a `rusqlite`-backed physical store whose
//! schema is generated from a loaded [`crate::ontology::OntologyModel`]
//! (see [`schema`]) and whose resource interning lives in [`resource`].
//!
//! Durability is SQLite's own WAL journal mode rather than a hand-rolled
//! write-ahead log: `PRAGMA journal_mode=WAL` already gives atomic,
//! crash-consistent commits and concurrent readers during a writer's
//! transaction, which is exactly what a custom WAL would have to
//! reimplement. `backup()` uses `rusqlite::backup` (SQLite's online
//! backup API) so a snapshot can be taken while the engine is live.
//!
//! A single [`rusqlite::Connection`] is shared behind a `Mutex`: SQLite
//! serializes writers per-database regardless, and the execution
//! runtime already serializes statements per connection (§4.7), so a
//! connection pool would add complexity without concurrency to spend it
//! on.

pub mod resource;
pub mod schema;

use crate::ontology::reasoner::materialize_types;
use crate::ontology::{ClassId, OntologyModel, PropertyId};
use resource::{intern_graph, ResourceCache, ResourceKey};
use rusqlite::{Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::sleep;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database busy after retrying")]
    Busy,
}

pub type StorageResult<T> = Result<T, StorageError>;

/// How to open a [`StorageEngine`]. Mirrors the teacher's
/// `PersistentStorage::open` path-based configuration, trimmed to what
/// a single-file SQLite database needs.
#[derive(Debug, Clone, Copy)]
pub struct OpenFlags {
    pub read_only: bool,
    /// Create the database file (and run `schema::generate_ddl`) if it
    /// does not exist yet. Ignored for `:memory:`, which is always
    /// freshly created.
    pub create: bool,
    /// Number of times a write that hits `SQLITE_BUSY` is retried before
    /// giving up, with a short sleep between attempts.
    pub busy_retries: u32,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read_only: false,
            create: true,
            busy_retries: 5,
        }
    }
}

pub struct StorageEngine {
    conn: Mutex<Connection>,
    ontology: Arc<OntologyModel>,
    resources: ResourceCache,
    busy_retries: u32,
}

impl StorageEngine {
    /// Open (or create) the database at `path` and apply `ontology`'s
    /// schema. `path` of `:memory:` opens a private in-memory database,
    /// used by tests and by connections that never persist.
    pub fn open(path: &Path, flags: OpenFlags, ontology: Arc<OntologyModel>) -> StorageResult<Self> {
        info!(path = %path.display(), "opening storage engine");
        let conn = if path.as_os_str() == ":memory:" {
            Connection::open_in_memory()?
        } else if flags.read_only {
            Connection::open_with_flags(path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY)?
        } else {
            Connection::open(path)?
        };

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.busy_timeout(Duration::from_millis(250))?;

        let engine = Self {
            conn: Mutex::new(conn),
            ontology,
            resources: ResourceCache::new(),
            busy_retries: flags.busy_retries,
        };

        if flags.create {
            engine.apply_schema()?;
        }

        Ok(engine)
    }

    fn apply_schema(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;
        for statement in schema::generate_ddl(&self.ontology) {
            tx.execute(&statement, [])?;
        }
        tx.commit()?;
        debug!("storage schema applied");
        Ok(())
    }

    pub fn ontology(&self) -> &Arc<OntologyModel> {
        &self.ontology
    }

    /// Take an online backup of the live database to `dest`.
    pub fn backup(&self, dest: &Path) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        let mut dest_conn = Connection::open(dest)?;
        let backup = rusqlite::backup::Backup::new(&conn, &mut dest_conn)?;
        backup.run_to_completion(100, Duration::from_millis(50), None)?;
        info!(dest = %dest.display(), "backup complete");
        Ok(())
    }

    /// Run `f` against the locked connection, retrying on
    /// `SQLITE_BUSY` with a short backoff — a second writer from another
    /// thread in this process is the only source of contention, since
    /// each `StorageEngine` owns its connection outright.
    fn with_retry<T>(&self, mut f: impl FnMut(&Connection) -> rusqlite::Result<T>) -> StorageResult<T> {
        let conn = self.conn.lock().unwrap();
        let mut attempt = 0;
        loop {
            match f(&conn) {
                Ok(value) => return Ok(value),
                Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::DatabaseBusy => {
                    attempt += 1;
                    if attempt > self.busy_retries {
                        warn!("giving up after {attempt} busy retries");
                        return Err(StorageError::Busy);
                    }
                    sleep(Duration::from_millis(10 * attempt as u64));
                }
                Err(e) => return Err(StorageError::Sqlite(e)),
            }
        }
    }

    pub fn intern_resource(&self, key: ResourceKey) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        self.resources.intern(&conn, &key)
    }

    pub fn intern_graph(&self, graph_iri: Option<&str>) -> StorageResult<i64> {
        let conn = self.conn.lock().unwrap();
        intern_graph(&conn, graph_iri)
    }

    /// Look up an already-interned resource without creating it. A query
    /// that matches against a bound IRI must never have the side effect
    /// of fabricating a resource row for an IRI that was never inserted.
    pub fn lookup_resource(&self, key: &ResourceKey) -> StorageResult<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        self.resources.lookup(&conn, key)
    }

    /// Look up an already-interned named graph's id without creating it.
    /// `None` is returned for a graph IRI no quad has ever been written
    /// into; `Some(0)` for the default graph.
    pub fn lookup_graph(&self, graph_iri: Option<&str>) -> StorageResult<Option<i64>> {
        let Some(iri) = graph_iri else { return Ok(Some(0)) };
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("SELECT id FROM {} WHERE iri = ?1", schema::graph_table_name()),
            [iri],
            |row| row.get(0),
        )
        .optional()
        .map_err(StorageError::Sqlite)
    }

    /// Resolve an interned resource id back to its IRI or blank label.
    pub fn resolve_resource(&self, id: i64) -> StorageResult<ResourceKey> {
        let conn = self.conn.lock().unwrap();
        ResourceCache::resolve(&conn, id)
    }

    /// Record `resource_id` as an instance of `class`, materializing
    /// every transitive superclass too (invariant 2).
    pub fn assert_type(&self, resource_id: i64, class: ClassId, graph_id: i64) -> StorageResult<()> {
        let closure = materialize_types(&self.ontology, &[class]);
        let conn = self.conn.lock().unwrap();
        for class_id in closure {
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (resource_id, class_id, graph_id) VALUES (?1, ?2, ?3)",
                    schema::resource_type_table_name()
                ),
                rusqlite::params![resource_id, class_id.0 as i64, graph_id],
            )?;
            conn.execute(
                &format!(
                    "INSERT OR IGNORE INTO {} (id) VALUES (?1)",
                    schema::class_table_name(class_id)
                ),
                [resource_id],
            )?;
        }
        Ok(())
    }

    pub fn set_single_valued(&self, property: PropertyId, resource_id: i64, value: &str) -> StorageResult<()> {
        let property_meta = self.ontology.property(property);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (id, {col}) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET {col} = excluded.{col}",
                schema::class_table_name(property_meta.domain),
                col = schema::property_column_name(property)
            ),
            rusqlite::params![resource_id, value],
        )?;
        Ok(())
    }

    pub fn add_multi_valued(&self, property: PropertyId, resource_id: i64, value: &str, graph_id: i64) -> StorageResult<()> {
        if self.ontology.property(property).inverse_functional {
            let table = schema::property_table_name(property);
            let existing: Option<i64> = {
                let conn = self.conn.lock().unwrap();
                conn.query_row(
                    &format!("SELECT resource_id FROM {table} WHERE value = ?1 AND resource_id != ?2"),
                    rusqlite::params![value, resource_id],
                    |row| row.get(0),
                )
                .optional()?
            };
            if existing.is_some() {
                return Err(StorageError::Constraint(format!(
                    "inverse-functional property {} already has value {} on a different resource",
                    self.ontology.property(property).iri,
                    value
                )));
            }
        }
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} (resource_id, value, graph_id) VALUES (?1, ?2, ?3)",
                schema::property_table_name(property)
            ),
            rusqlite::params![resource_id, value, graph_id],
        )?;
        Ok(())
    }

    pub fn remove_multi_valued(&self, property: PropertyId, resource_id: i64, value: &str, graph_id: i64) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "DELETE FROM {} WHERE resource_id = ?1 AND value = ?2 AND graph_id = ?3",
                schema::property_table_name(property)
            ),
            rusqlite::params![resource_id, value, graph_id],
        )?;
        Ok(())
    }

    pub fn remove_single_valued(&self, property: PropertyId, resource_id: i64) -> StorageResult<()> {
        let property_meta = self.ontology.property(property);
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "UPDATE {} SET {col} = NULL WHERE id = ?1",
                schema::class_table_name(property_meta.domain),
                col = schema::property_column_name(property)
            ),
            [resource_id],
        )?;
        Ok(())
    }

    /// Used by [`crate::ontology::loader::CardinalityVerifier`] during an
    /// ontology migration: does any resource currently hold more than
    /// one value for `property` (across all graphs)?
    pub fn property_has_multiple_values(&self, property: PropertyId) -> StorageResult<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM (
                    SELECT resource_id FROM {} GROUP BY resource_id HAVING COUNT(*) > 1
                )",
                schema::property_table_name(property)
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Direct access to the underlying connection for the SPARQL
    /// compiler's generated SQL, which needs arbitrary read/write queries
    /// this module's typed helpers don't anticipate. Retries on
    /// `SQLITE_BUSY` the same way the typed helpers would.
    pub fn with_connection<T>(&self, f: impl FnMut(&Connection) -> rusqlite::Result<T>) -> StorageResult<T> {
        self.with_retry(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Cardinality, OntologyModelBuilder, PropertyRange};
    use std::path::PathBuf;

    fn model_with_class() -> (Arc<OntologyModel>, ClassId, PropertyId) {
        let mut b = OntologyModelBuilder::new();
        let animal = b.add_class("http://ex/Animal", false).unwrap();
        let name = b
            .add_property(
                "http://ex/name",
                animal,
                PropertyRange::Datatype("http://www.w3.org/2001/XMLSchema#string".to_string()),
                Cardinality::Single,
                true,
                false,
                false,
                None,
            )
            .unwrap();
        (Arc::new(b.build().unwrap()), animal, name)
    }

    #[test]
    fn test_open_in_memory_and_assert_type() {
        let (ontology, animal, _name) = model_with_class();
        let engine = StorageEngine::open(&PathBuf::from(":memory:"), OpenFlags::default(), ontology).unwrap();
        let id = engine.intern_resource(ResourceKey::Iri("http://ex/rex".to_string())).unwrap();
        engine.assert_type(id, animal, 0).unwrap();
    }

    #[test]
    fn test_set_and_read_single_valued() {
        let (ontology, animal, name) = model_with_class();
        let engine = StorageEngine::open(&PathBuf::from(":memory:"), OpenFlags::default(), ontology).unwrap();
        let id = engine.intern_resource(ResourceKey::Iri("http://ex/rex".to_string())).unwrap();
        engine.assert_type(id, animal, 0).unwrap();
        engine.set_single_valued(name, id, "Rex").unwrap();

        let value: String = engine
            .with_connection(|conn| {
                conn.query_row(
                    &format!("SELECT prop_{} FROM class_{} WHERE id = ?1", name.0, animal.0),
                    [id],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(value, "Rex");
    }

    #[test]
    fn test_backup_and_restore() {
        let dir = tempfile::TempDir::new().unwrap();
        let main_path = dir.path().join("main.sqlite");
        let backup_path = dir.path().join("backup.sqlite");

        let (ontology, animal, name) = model_with_class();
        let engine = StorageEngine::open(&main_path, OpenFlags::default(), ontology.clone()).unwrap();
        let id = engine.intern_resource(ResourceKey::Iri("http://ex/rex".to_string())).unwrap();
        engine.assert_type(id, animal, 0).unwrap();
        engine.set_single_valued(name, id, "Rex").unwrap();
        engine.backup(&backup_path).unwrap();
        drop(engine);
        std::fs::remove_file(&main_path).unwrap();

        let restored = StorageEngine::open(&backup_path, OpenFlags { create: false, ..OpenFlags::default() }, ontology).unwrap();
        let restored_id = restored.lookup_resource(&ResourceKey::Iri("http://ex/rex".to_string())).unwrap().unwrap();
        assert_eq!(restored_id, id);
        let value: String = restored
            .with_connection(|conn| {
                conn.query_row(
                    &format!("SELECT prop_{} FROM class_{} WHERE id = ?1", name.0, animal.0),
                    [restored_id],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(value, "Rex");
    }
}
