//! Ontology model (OM): a typed, in-memory representation of namespaces,
//! classes, properties, inheritance, cardinalities, and domain indexes.
//!
//! Pure data, built once per connection and then frozen: cross-references
//! between classes and properties are small arena indexes (`ClassId`,
//! `PropertyId`), never owning pointers, so the whole model is `Send +
//! Sync` and can be shared across threads via `Arc` without interior
//! mutability. See `ontology::loader` for how it is constructed and
//! migrated, and `ontology::reasoner` for the `rdf:type` closure
//! computation that keeps class instances consistent with invariant 2
//! (an instance of C is also an instance of every transitive superclass
//! of C).

pub mod bootstrap;
pub mod loader;
pub mod reasoner;

use std::collections::{HashMap, HashSet};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OntologyError {
    #[error("unknown class: {0}")]
    UnknownClass(String),

    #[error("unknown property: {0}")]
    UnknownProperty(String),

    #[error("cyclic subClassOf/subPropertyOf relation involving {0}")]
    Cycle(String),

    #[error("ontology parse error: {0}")]
    Parse(String),

    #[error("ontology change not supported: {0}")]
    ChangeNotSupported(String),

    #[error("duplicate IRI declared more than once: {0}")]
    DuplicateIri(String),
}

pub type OntologyResult<T> = Result<T, OntologyError>;

/// Index of a [`Class`] within an [`OntologyModel`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

/// Index of a [`Property`] within an [`OntologyModel`]'s arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(pub usize);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub iri: String,
    pub prefix: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Multi,
}

/// The range of a property: either another known class, or an XSD
/// literal datatype (by IRI).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyRange {
    Class(ClassId),
    Datatype(String),
}

#[derive(Debug, Clone)]
pub struct Class {
    pub iri: String,
    /// Direct `rdfs:subClassOf` parents only; transitive closure is
    /// computed on demand (and cached) by `OntologyModel`.
    pub super_classes: Vec<ClassId>,
    /// Enables change notifications for instances of this class.
    pub notify: bool,
    /// Properties on which to create secondary indexes for instances of
    /// this class.
    pub domain_indexes: Vec<PropertyId>,
    /// True once this class has been superseded by a migration that
    /// could not remove it outright (§4.3 "Removal").
    pub deprecated: bool,
}

#[derive(Debug, Clone)]
pub struct Property {
    pub iri: String,
    pub domain: ClassId,
    pub range: PropertyRange,
    pub cardinality: Cardinality,
    pub indexed: bool,
    /// Another property this one is jointly indexed with, for composite
    /// ordering (e.g. secondary sort key).
    pub secondary_index: Option<PropertyId>,
    pub fulltext_indexed: bool,
    /// Uniqueness constraint on the object: no two resources may share a
    /// value for this property.
    pub inverse_functional: bool,
    pub sub_property_of: Option<PropertyId>,
    pub deprecated: bool,
}

#[derive(Debug, Clone)]
pub struct OntologyMeta {
    pub iri: String,
    pub last_modified: chrono::DateTime<chrono::Utc>,
}

/// The frozen, arena-indexed ontology. Constructed via
/// [`OntologyModelBuilder`] and shared immutably (typically behind an
/// `Arc`) for the life of a connection.
#[derive(Debug, Clone)]
pub struct OntologyModel {
    namespaces: Vec<Namespace>,
    classes: Vec<Class>,
    properties: Vec<Property>,
    class_by_iri: HashMap<String, ClassId>,
    property_by_iri: HashMap<String, PropertyId>,
    ontologies: Vec<OntologyMeta>,
}

impl OntologyModel {
    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0]
    }

    pub fn property(&self, id: PropertyId) -> &Property {
        &self.properties[id.0]
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &Class)> {
        self.classes.iter().enumerate().map(|(i, c)| (ClassId(i), c))
    }

    pub fn properties(&self) -> impl Iterator<Item = (PropertyId, &Property)> {
        self.properties.iter().enumerate().map(|(i, p)| (PropertyId(i), p))
    }

    pub fn namespaces(&self) -> &[Namespace] {
        &self.namespaces
    }

    pub fn ontologies(&self) -> &[OntologyMeta] {
        &self.ontologies
    }

    pub fn lookup_class(&self, iri: &str) -> OntologyResult<ClassId> {
        self.class_by_iri
            .get(iri)
            .copied()
            .ok_or_else(|| OntologyError::UnknownClass(iri.to_string()))
    }

    pub fn lookup_property(&self, iri: &str) -> OntologyResult<PropertyId> {
        self.property_by_iri
            .get(iri)
            .copied()
            .ok_or_else(|| OntologyError::UnknownProperty(iri.to_string()))
    }

    pub fn try_lookup_class(&self, iri: &str) -> Option<ClassId> {
        self.class_by_iri.get(iri).copied()
    }

    pub fn try_lookup_property(&self, iri: &str) -> Option<PropertyId> {
        self.property_by_iri.get(iri).copied()
    }

    /// Resolve a `prefix:local` compact name to a full IRI using the
    /// ontology's declared namespaces.
    pub fn resolve_prefixed(&self, name: &str) -> Option<String> {
        let (prefix, local) = name.split_once(':')?;
        self.namespaces
            .iter()
            .find(|ns| ns.prefix == prefix)
            .map(|ns| format!("{}{}", ns.iri, local))
    }

    /// Direct super-classes of `class`.
    pub fn direct_super_classes(&self, class: ClassId) -> &[ClassId] {
        &self.classes[class.0].super_classes
    }

    /// The transitive closure of `rdfs:subClassOf`, including `class`
    /// itself.
    pub fn super_classes_transitive(&self, class: ClassId) -> HashSet<ClassId> {
        let mut seen = HashSet::new();
        let mut stack = vec![class];
        while let Some(c) = stack.pop() {
            if seen.insert(c) {
                stack.extend(self.classes[c.0].super_classes.iter().copied());
            }
        }
        seen
    }

    /// The transitive closure of `rdfs:subPropertyOf`, including
    /// `property` itself.
    pub fn super_properties_transitive(&self, property: PropertyId) -> HashSet<PropertyId> {
        let mut seen = HashSet::new();
        let mut stack = vec![property];
        while let Some(p) = stack.pop() {
            if seen.insert(p) {
                if let Some(parent) = self.properties[p.0].sub_property_of {
                    stack.push(parent);
                }
            }
        }
        seen
    }

    pub fn is_multi_valued(&self, property: PropertyId) -> bool {
        matches!(self.properties[property.0].cardinality, Cardinality::Multi)
    }

    /// Classes that declare at least one domain index, used by the
    /// storage engine's schema projection to decide which secondary SQL
    /// indexes to create.
    pub fn classes_needing_domain_indexes(&self) -> impl Iterator<Item = (ClassId, &Class)> {
        self.classes()
            .filter(|(_, c)| !c.domain_indexes.is_empty())
    }

    /// All properties whose domain is `class`, direct only (no
    /// inheritance — a subclass does not "declare" its superclass's
    /// properties, it merely satisfies their domain constraint).
    pub fn properties_of_class(&self, class: ClassId) -> impl Iterator<Item = (PropertyId, &Property)> {
        self.properties().filter(move |(_, p)| p.domain == class)
    }
}

/// Builder used by [`loader::OntologyLoader`] to assemble a provisional
/// model before validating and freezing it into an [`OntologyModel`].
#[derive(Default)]
pub struct OntologyModelBuilder {
    namespaces: Vec<Namespace>,
    classes: Vec<Class>,
    properties: Vec<Property>,
    class_by_iri: HashMap<String, ClassId>,
    property_by_iri: HashMap<String, PropertyId>,
    ontologies: Vec<OntologyMeta>,
}

impl OntologyModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_namespace(&mut self, iri: impl Into<String>, prefix: impl Into<String>) {
        self.namespaces.push(Namespace {
            iri: iri.into(),
            prefix: prefix.into(),
        });
    }

    pub fn add_ontology(&mut self, iri: impl Into<String>, last_modified: chrono::DateTime<chrono::Utc>) {
        self.ontologies.push(OntologyMeta {
            iri: iri.into(),
            last_modified,
        });
    }

    /// Declare a class, returning its id. Declaring the same IRI twice is
    /// an error (invariant: every class IRI is unique within a
    /// connection).
    pub fn add_class(&mut self, iri: impl Into<String>, notify: bool) -> OntologyResult<ClassId> {
        let iri = iri.into();
        if self.class_by_iri.contains_key(&iri) {
            return Err(OntologyError::DuplicateIri(iri));
        }
        let id = ClassId(self.classes.len());
        self.classes.push(Class {
            iri: iri.clone(),
            super_classes: Vec::new(),
            notify,
            domain_indexes: Vec::new(),
            deprecated: false,
        });
        self.class_by_iri.insert(iri, id);
        Ok(id)
    }

    pub fn add_super_class(&mut self, class: ClassId, super_class: ClassId) {
        self.classes[class.0].super_classes.push(super_class);
    }

    pub fn add_domain_index(&mut self, class: ClassId, property: PropertyId) {
        self.classes[class.0].domain_indexes.push(property);
    }

    #[allow(clippy::too_many_arguments)]
    pub fn add_property(
        &mut self,
        iri: impl Into<String>,
        domain: ClassId,
        range: PropertyRange,
        cardinality: Cardinality,
        indexed: bool,
        fulltext_indexed: bool,
        inverse_functional: bool,
        sub_property_of: Option<PropertyId>,
    ) -> OntologyResult<PropertyId> {
        let iri = iri.into();
        if self.property_by_iri.contains_key(&iri) {
            return Err(OntologyError::DuplicateIri(iri));
        }
        let id = PropertyId(self.properties.len());
        self.properties.push(Property {
            iri: iri.clone(),
            domain,
            range,
            cardinality,
            indexed,
            secondary_index: None,
            fulltext_indexed,
            inverse_functional,
            sub_property_of,
            deprecated: false,
        });
        self.property_by_iri.insert(iri, id);
        Ok(id)
    }

    pub fn class_id(&self, iri: &str) -> Option<ClassId> {
        self.class_by_iri.get(iri).copied()
    }

    pub fn property_id(&self, iri: &str) -> Option<PropertyId> {
        self.property_by_iri.get(iri).copied()
    }

    /// Validate invariants and freeze into an immutable [`OntologyModel`]:
    /// every property's domain/range is known, and `subClassOf` is
    /// acyclic.
    pub fn build(self) -> OntologyResult<OntologyModel> {
        for property in &self.properties {
            if property.domain.0 >= self.classes.len() {
                return Err(OntologyError::UnknownClass(format!(
                    "property {} has an undeclared domain",
                    property.iri
                )));
            }
            if let PropertyRange::Class(range_class) = &property.range {
                if range_class.0 >= self.classes.len() {
                    return Err(OntologyError::UnknownClass(format!(
                        "property {} has an undeclared class range",
                        property.iri
                    )));
                }
            }
        }

        check_acyclic(&self.classes)?;

        Ok(OntologyModel {
            namespaces: self.namespaces,
            classes: self.classes,
            properties: self.properties,
            class_by_iri: self.class_by_iri,
            property_by_iri: self.property_by_iri,
            ontologies: self.ontologies,
        })
    }
}

fn check_acyclic(classes: &[Class]) -> OntologyResult<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }
    let mut marks = vec![Mark::Unvisited; classes.len()];

    fn visit(i: usize, classes: &[Class], marks: &mut [Mark]) -> OntologyResult<()> {
        match marks[i] {
            Mark::Done => return Ok(()),
            Mark::InProgress => return Err(OntologyError::Cycle(classes[i].iri.clone())),
            Mark::Unvisited => {}
        }
        marks[i] = Mark::InProgress;
        for parent in &classes[i].super_classes {
            visit(parent.0, classes, marks)?;
        }
        marks[i] = Mark::Done;
        Ok(())
    }

    for i in 0..classes.len() {
        visit(i, classes, &mut marks)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_simple_hierarchy() {
        let mut b = OntologyModelBuilder::new();
        let animal = b.add_class("http://ex/Animal", false).unwrap();
        let cat = b.add_class("http://ex/Cat", true).unwrap();
        b.add_super_class(cat, animal);
        let model = b.build().unwrap();

        let closure = model.super_classes_transitive(cat);
        assert!(closure.contains(&animal));
        assert!(closure.contains(&cat));
    }

    #[test]
    fn test_cycle_detected() {
        let mut b = OntologyModelBuilder::new();
        let a = b.add_class("http://ex/A", false).unwrap();
        let c = b.add_class("http://ex/C", false).unwrap();
        b.add_super_class(a, c);
        b.add_super_class(c, a);
        assert!(matches!(b.build(), Err(OntologyError::Cycle(_))));
    }

    #[test]
    fn test_duplicate_class_rejected() {
        let mut b = OntologyModelBuilder::new();
        b.add_class("http://ex/A", false).unwrap();
        assert!(matches!(
            b.add_class("http://ex/A", false),
            Err(OntologyError::DuplicateIri(_))
        ));
    }

    #[test]
    fn test_resolve_prefixed() {
        let mut b = OntologyModelBuilder::new();
        b.add_namespace("http://ex/", "ex");
        let model = b.build().unwrap();
        assert_eq!(model.resolve_prefixed("ex:Foo").unwrap(), "http://ex/Foo");
    }
}
