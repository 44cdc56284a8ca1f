//! `rdf:type` closure computation for the storage engine's insert path.
//!
//! This is deliberately narrow compared to [`crate::rdf::schema::RdfsReasoner`]:
//! it does not run a general fixpoint over arbitrary triples, it only
//! answers one question the storage engine needs on every
//! `INSERT DATA`/`INSERT WHERE` — given the classes a resource is
//! directly asserted to be an instance of, which additional `rdf:type`
//! rows must be materialized so that invariant 2 holds (an instance of
//! C is also an instance of every transitive superclass of C)? The
//! answer comes straight from `OntologyModel::super_classes_transitive`,
//! which is already a closure over the declared `rdfs:subClassOf` arena
//! edges, so no separate inference rules are needed here.

use super::{ClassId, OntologyModel, OntologyResult};
use std::collections::HashSet;

/// The full set of classes a resource must be recorded as an instance
/// of, given the classes it is directly asserted to be an instance of.
/// Always a superset of `asserted` (every class is a superclass of
/// itself in the closure).
pub fn materialize_types(model: &OntologyModel, asserted: &[ClassId]) -> HashSet<ClassId> {
    let mut all = HashSet::new();
    for &class in asserted {
        all.extend(model.super_classes_transitive(class));
    }
    all
}

/// Same as [`materialize_types`] but over class IRIs, as they arrive
/// from a parsed `INSERT DATA` block before the execution runtime has
/// resolved them to [`ClassId`]s.
pub fn materialize_type_iris(model: &OntologyModel, asserted_iris: &[String]) -> OntologyResult<HashSet<String>> {
    let mut ids = Vec::with_capacity(asserted_iris.len());
    for iri in asserted_iris {
        ids.push(model.lookup_class(iri)?);
    }
    Ok(materialize_types(model, &ids)
        .into_iter()
        .map(|id| model.class(id).iri.clone())
        .collect())
}

/// Given a newly-declared `rdf:type` edge for a resource that already
/// holds `existing` types, the set of *new* classes that must be
/// inserted (the closure of `existing ∪ {new_type}` minus `existing`
/// itself). Used when a later `INSERT` adds one more type to a resource
/// that already has some.
pub fn additional_types_for_new_assertion(
    model: &OntologyModel,
    existing: &HashSet<ClassId>,
    new_type: ClassId,
) -> HashSet<ClassId> {
    model
        .super_classes_transitive(new_type)
        .into_iter()
        .filter(|c| !existing.contains(c))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::OntologyModelBuilder;

    fn build_model() -> (OntologyModel, ClassId, ClassId, ClassId) {
        let mut b = OntologyModelBuilder::new();
        let resource = b.add_class("http://ex/Resource", false).unwrap();
        let animal = b.add_class("http://ex/Animal", false).unwrap();
        let cat = b.add_class("http://ex/Cat", true).unwrap();
        b.add_super_class(animal, resource);
        b.add_super_class(cat, animal);
        (b.build().unwrap(), resource, animal, cat)
    }

    #[test]
    fn test_materialize_types_includes_all_ancestors() {
        let (model, resource, animal, cat) = build_model();
        let types = materialize_types(&model, &[cat]);
        assert!(types.contains(&cat));
        assert!(types.contains(&animal));
        assert!(types.contains(&resource));
    }

    #[test]
    fn test_materialize_type_iris() {
        let (model, _resource, _animal, _cat) = build_model();
        let types = materialize_type_iris(&model, &["http://ex/Cat".to_string()]).unwrap();
        assert!(types.contains("http://ex/Cat"));
        assert!(types.contains("http://ex/Animal"));
        assert!(types.contains("http://ex/Resource"));
    }

    #[test]
    fn test_additional_types_for_new_assertion_excludes_existing() {
        let (model, resource, animal, cat) = build_model();
        let existing: HashSet<ClassId> = [resource].into_iter().collect();
        let added = additional_types_for_new_assertion(&model, &existing, cat);
        assert!(added.contains(&cat));
        assert!(added.contains(&animal));
        assert!(!added.contains(&resource));
    }

    #[test]
    fn test_unknown_class_iri_errors() {
        let (model, ..) = build_model();
        assert!(materialize_type_iris(&model, &["http://ex/Nope".to_string()]).is_err());
    }
}
