//! Generates the physical SQL schema from a loaded [`OntologyModel`]:
//! one row store (`resources`/`graphs`) plus one table per class for its
//! single-valued properties, one side table per multi-valued property,
//! a `resource_type` table recording every materialized `rdf:type`, and
//! an FTS5 virtual table indexing every `tracker:fulltextIndexed`
//! property.
//!
//! Table and column names are opaque (`class_{id}`, `prop_{id}`) rather
//! than derived from the class/property's IRI local name: IRIs can
//! contain characters that are not valid unquoted SQL identifiers, and
//! keeping the physical layout keyed by the arena index means a
//! property rename in the ontology (same id, new IRI) needs no table
//! rename at all.
//!
//! Single-valued properties (`nrl:maxCardinality 1`) live as a column
//! on their domain class's table and are implicitly scoped to the
//! default graph, matching the bootstrap ontology's own singleton
//! properties (`tracker:Ontology`'s `nrl:lastModified`, for instance).
//! Multi-valued properties live in a side table carrying an explicit
//! graph column, since a resource can hold different values for the
//! same property in different named graphs.

use crate::ontology::{Cardinality, ClassId, OntologyModel, PropertyId};

pub fn resource_table_name() -> &'static str {
    "resources"
}

pub fn graph_table_name() -> &'static str {
    "graphs"
}

pub fn resource_type_table_name() -> &'static str {
    "resource_type"
}

pub fn class_table_name(class: ClassId) -> String {
    format!("class_{}", class.0)
}

pub fn property_table_name(property: PropertyId) -> String {
    format!("prop_{}", property.0)
}

pub fn property_column_name(property: PropertyId) -> String {
    format!("prop_{}", property.0)
}

pub fn fts_table_name() -> &'static str {
    "fts_index"
}

/// The full set of `CREATE TABLE`/`CREATE INDEX` statements needed to
/// represent `ontology` physically, in dependency order (base tables
/// first, side tables and indexes after).
pub fn generate_ddl(ontology: &OntologyModel) -> Vec<String> {
    let mut statements = Vec::new();

    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY,
            iri TEXT UNIQUE,
            blank_label TEXT UNIQUE
        )",
        resource_table_name()
    ));

    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id INTEGER PRIMARY KEY,
            iri TEXT NOT NULL UNIQUE
        )",
        graph_table_name()
    ));
    // id 0 is reserved for the default (unnamed) graph.
    statements.push(format!(
        "INSERT OR IGNORE INTO {} (id, iri) VALUES (0, '')",
        graph_table_name()
    ));

    statements.push(format!(
        "CREATE TABLE IF NOT EXISTS {} (
            resource_id INTEGER NOT NULL REFERENCES {}(id),
            class_id INTEGER NOT NULL,
            graph_id INTEGER NOT NULL DEFAULT 0 REFERENCES {}(id),
            PRIMARY KEY (resource_id, class_id, graph_id)
        )",
        resource_type_table_name(),
        resource_table_name(),
        graph_table_name()
    ));
    statements.push(format!(
        "CREATE INDEX IF NOT EXISTS idx_resource_type_class ON {} (class_id, resource_id)",
        resource_type_table_name()
    ));

    for (class_id, _class) in ontology.classes() {
        let mut columns = vec![format!(
            "id INTEGER PRIMARY KEY REFERENCES {}(id)",
            resource_table_name()
        )];
        for (property_id, property) in ontology.properties_of_class(class_id) {
            if matches!(property.cardinality, Cardinality::Single) {
                columns.push(format!("{} TEXT", property_column_name(property_id)));
            }
        }
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
            class_table_name(class_id),
            columns.join(",\n    ")
        ));
    }

    let mut fulltext_properties = Vec::new();
    for (property_id, property) in ontology.properties() {
        if matches!(property.cardinality, Cardinality::Multi) {
            statements.push(format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    resource_id INTEGER NOT NULL REFERENCES {}(id),
                    value TEXT NOT NULL,
                    graph_id INTEGER NOT NULL DEFAULT 0 REFERENCES {}(id),
                    PRIMARY KEY (resource_id, value, graph_id)
                )",
                property_table_name(property_id),
                resource_table_name(),
                graph_table_name()
            ));
            if property.indexed {
                statements.push(format!(
                    "CREATE INDEX IF NOT EXISTS idx_{}_value ON {} (value)",
                    property_table_name(property_id),
                    property_table_name(property_id)
                ));
            }
        } else if property.indexed {
            statements.push(format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
                class_table_name(property.domain),
                property_column_name(property_id),
                class_table_name(property.domain),
                property_column_name(property_id)
            ));
        }
        if property.fulltext_indexed {
            fulltext_properties.push(property_id);
        }
    }

    if !fulltext_properties.is_empty() {
        statements.push(format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {} USING fts5(resource_id UNINDEXED, property_id UNINDEXED, value)",
            fts_table_name()
        ));
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Cardinality, OntologyModelBuilder, PropertyRange};

    #[test]
    fn test_generate_ddl_for_simple_class() {
        let mut b = OntologyModelBuilder::new();
        let animal = b.add_class("http://ex/Animal", false).unwrap();
        b.add_property(
            "http://ex/name",
            animal,
            PropertyRange::Datatype("http://www.w3.org/2001/XMLSchema#string".to_string()),
            Cardinality::Single,
            true,
            true,
            false,
            None,
        )
        .unwrap();
        b.add_property(
            "http://ex/tag",
            animal,
            PropertyRange::Datatype("http://www.w3.org/2001/XMLSchema#string".to_string()),
            Cardinality::Multi,
            true,
            false,
            false,
            None,
        )
        .unwrap();
        let model = b.build().unwrap();

        let ddl = generate_ddl(&model);
        assert!(ddl.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS class_0")));
        assert!(ddl.iter().any(|s| s.contains("prop_0 TEXT")));
        assert!(ddl.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS prop_1")));
        assert!(ddl.iter().any(|s| s.contains("fts5")));
    }
}
