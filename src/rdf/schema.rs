//! RDFS (RDF Schema) reasoning
//!
//! Implements basic RDFS entailment rules for inference over a free-standing
//! `RdfStore` (used for `LOAD`-time materialization and for ontology files
//! that declare their own `rdfs:subClassOf`/`rdfs:domain`/`rdfs:range` facts
//! as plain triples). The ontology-driven closure used to satisfy the
//! "every superclass is also an instance" invariant at insert time is a
//! separate, arena-indexed computation in `crate::ontology::reasoner`.

use super::{NamedNode, RdfObject, RdfPredicate, RdfStore, RdfSubject, Triple};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Reasoning errors
#[derive(Error, Debug)]
pub enum ReasoningError {
    /// Invalid rule
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Inference error
    #[error("Inference error: {0}")]
    InferenceError(String),
}

pub type ReasoningResult<T> = Result<T, ReasoningError>;

/// RDFS inference rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceRule {
    /// rdfs:subClassOf transitivity
    SubClassOfTransitive,

    /// rdfs:subPropertyOf transitivity
    SubPropertyOfTransitive,

    /// rdfs:domain inference
    DomainInference,

    /// rdfs:range inference
    RangeInference,

    /// rdf:type inheritance via rdfs:subClassOf
    TypeInheritance,
}

/// RDFS reasoner with forward chaining
pub struct RdfsReasoner {
    /// Enable specific rules
    enabled_rules: Vec<InferenceRule>,
}

impl RdfsReasoner {
    /// Create a new reasoner with all rules enabled
    pub fn new() -> Self {
        Self {
            enabled_rules: vec![
                InferenceRule::SubClassOfTransitive,
                InferenceRule::SubPropertyOfTransitive,
                InferenceRule::DomainInference,
                InferenceRule::RangeInference,
                InferenceRule::TypeInheritance,
            ],
        }
    }

    /// Create a reasoner with specific rules
    pub fn with_rules(rules: Vec<InferenceRule>) -> Self {
        Self {
            enabled_rules: rules,
        }
    }

    fn rdf_type() -> RdfPredicate {
        RdfPredicate::new("http://www.w3.org/1999/02/22-rdf-syntax-ns#type").unwrap()
    }

    fn sub_class_of() -> RdfPredicate {
        RdfPredicate::new("http://www.w3.org/2000/01/rdf-schema#subClassOf").unwrap()
    }

    fn sub_property_of() -> RdfPredicate {
        RdfPredicate::new("http://www.w3.org/2000/01/rdf-schema#subPropertyOf").unwrap()
    }

    fn domain() -> RdfPredicate {
        RdfPredicate::new("http://www.w3.org/2000/01/rdf-schema#domain").unwrap()
    }

    fn range() -> RdfPredicate {
        RdfPredicate::new("http://www.w3.org/2000/01/rdf-schema#range").unwrap()
    }

    fn enabled(&self, rule: InferenceRule) -> bool {
        self.enabled_rules.contains(&rule)
    }

    /// Materialize all inferences implied by the enabled rules, forward
    /// chaining to a fixpoint. Returns only the newly inferred triples
    /// (facts already present in `store` are not repeated).
    ///
    /// Rules:
    /// - `subClassOf` transitivity: (A subClassOf B) ∧ (B subClassOf C) → (A subClassOf C)
    /// - `subPropertyOf` transitivity (same shape, over properties)
    /// - domain: (P domain C) ∧ (X P Y) → (X type C)
    /// - range: (P range C) ∧ (X P Y) → (Y type C)
    /// - type inheritance: (X type A) ∧ (A subClassOf B) → (X type B)
    pub fn materialize(&self, store: &RdfStore) -> ReasoningResult<Vec<Triple>> {
        let mut known: HashSet<Triple> = store.iter().cloned().collect();
        let mut inferred = Vec::new();
        let mut frontier: Vec<Triple> = known.iter().cloned().collect();

        while !frontier.is_empty() {
            let mut next_frontier = Vec::new();

            if self.enabled(InferenceRule::SubClassOfTransitive) {
                self.transitive_closure(&frontier, &known, &Self::sub_class_of(), &mut next_frontier);
            }
            if self.enabled(InferenceRule::SubPropertyOfTransitive) {
                self.transitive_closure(&frontier, &known, &Self::sub_property_of(), &mut next_frontier);
            }
            if self.enabled(InferenceRule::DomainInference) {
                self.class_membership_via(&frontier, &known, &Self::domain(), &mut next_frontier, true);
            }
            if self.enabled(InferenceRule::RangeInference) {
                self.class_membership_via(&frontier, &known, &Self::range(), &mut next_frontier, false);
            }
            if self.enabled(InferenceRule::TypeInheritance) {
                self.type_inheritance(&frontier, &known, &mut next_frontier);
            }

            next_frontier.retain(|t| known.insert(t.clone()));
            inferred.extend(next_frontier.iter().cloned());
            frontier = next_frontier;
        }

        Ok(inferred)
    }

    /// Apply reasoning and add inferred triples to store, returning how
    /// many new triples were materialized.
    pub fn reason(&self, store: &mut RdfStore) -> ReasoningResult<usize> {
        let inferred = self.materialize(store)?;
        let count = inferred.len();
        for triple in inferred {
            // A triple may already exist if another rule derived it first
            // in the same pass; duplicates are not an error here.
            let _ = store.insert(triple);
        }
        Ok(count)
    }

    fn transitive_closure(
        &self,
        frontier: &[Triple],
        known: &HashSet<Triple>,
        via: &RdfPredicate,
        out: &mut Vec<Triple>,
    ) {
        // Build an adjacency map of `via` edges from the full known set so
        // that newly-derived edges in `frontier` compose with older ones.
        let mut edges: HashMap<RdfSubject, Vec<RdfObject>> = HashMap::new();
        for t in known.iter().chain(frontier.iter()) {
            if &t.predicate == via {
                edges.entry(t.subject.clone()).or_default().push(t.object.clone());
            }
        }

        for t in frontier {
            if &t.predicate != via {
                continue;
            }
            if let RdfObject::NamedNode(mid_node) = &t.object {
                let mid_subject = RdfSubject::NamedNode(mid_node.clone());
                if let Some(next_objs) = edges.get(&mid_subject) {
                    for obj in next_objs {
                        out.push(Triple::new(t.subject.clone(), via.clone(), obj.clone()));
                    }
                }
            }
        }
    }

    fn class_membership_via(
        &self,
        frontier: &[Triple],
        known: &HashSet<Triple>,
        schema_predicate: &RdfPredicate,
        out: &mut Vec<Triple>,
        use_subject: bool,
    ) {
        // schema facts: (P schema_predicate C); data facts: (X P Y)
        let mut class_of_property: HashMap<RdfPredicate, Vec<RdfObject>> = HashMap::new();
        for t in known.iter().chain(frontier.iter()) {
            if &t.predicate == schema_predicate {
                if let RdfSubject::NamedNode(p) = &t.subject {
                    class_of_property
                        .entry(RdfPredicate::from(p.clone()))
                        .or_default()
                        .push(t.object.clone());
                }
            }
        }

        for t in frontier {
            if t.predicate == *schema_predicate {
                continue;
            }
            if let Some(classes) = class_of_property.get(&t.predicate) {
                let member = if use_subject {
                    RdfTermFrom::subject(&t.subject)
                } else {
                    RdfTermFrom::object(&t.object)
                };
                if let Some(member) = member {
                    for class in classes {
                        if let RdfObject::NamedNode(class_iri) = class {
                            out.push(Triple::new(
                                member.clone(),
                                Self::rdf_type(),
                                RdfObject::NamedNode(class_iri.clone()),
                            ));
                        }
                    }
                }
            }
        }
    }

    fn type_inheritance(&self, frontier: &[Triple], known: &HashSet<Triple>, out: &mut Vec<Triple>) {
        let mut super_classes: HashMap<NamedNode, Vec<NamedNode>> = HashMap::new();
        for t in known.iter().chain(frontier.iter()) {
            if t.predicate == Self::sub_class_of() {
                if let (RdfSubject::NamedNode(sub), RdfObject::NamedNode(sup)) =
                    (&t.subject, &t.object)
                {
                    super_classes.entry(sub.clone()).or_default().push(sup.clone());
                }
            }
        }

        for t in frontier {
            if t.predicate != Self::rdf_type() {
                continue;
            }
            if let RdfObject::NamedNode(class) = &t.object {
                if let Some(supers) = super_classes.get(class) {
                    for sup in supers {
                        out.push(Triple::new(
                            t.subject.clone(),
                            Self::rdf_type(),
                            RdfObject::NamedNode(sup.clone()),
                        ));
                    }
                }
            }
        }
    }
}

struct RdfTermFrom;

impl RdfTermFrom {
    fn subject(s: &RdfSubject) -> Option<RdfSubject> {
        Some(s.clone())
    }

    fn object(o: &RdfObject) -> Option<RdfSubject> {
        match o {
            RdfObject::NamedNode(n) => Some(RdfSubject::NamedNode(n.clone())),
            RdfObject::BlankNode(b) => Some(RdfSubject::BlankNode(b.clone())),
            RdfObject::Literal(_) => None,
        }
    }
}

impl Default for RdfsReasoner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoner_creation() {
        let reasoner = RdfsReasoner::new();
        assert_eq!(reasoner.enabled_rules.len(), 5);
    }

    #[test]
    fn test_custom_rules() {
        let reasoner = RdfsReasoner::with_rules(vec![InferenceRule::SubClassOfTransitive]);
        assert_eq!(reasoner.enabled_rules.len(), 1);
    }

    #[test]
    fn test_materialization_on_empty_store() {
        let reasoner = RdfsReasoner::new();
        let store = RdfStore::new();

        let inferred = reasoner.materialize(&store).unwrap();
        assert!(inferred.is_empty());
    }

    #[test]
    fn test_type_inheritance() {
        let mut store = RdfStore::new();
        let cat = NamedNode::new("http://example.org/Cat").unwrap();
        let animal = NamedNode::new("http://example.org/Animal").unwrap();
        let felix = NamedNode::new("http://example.org/felix").unwrap();

        store
            .insert(Triple::new(
                cat.clone().into(),
                RdfsReasoner::sub_class_of(),
                animal.clone().into(),
            ))
            .unwrap();
        store
            .insert(Triple::new(
                felix.clone().into(),
                RdfsReasoner::rdf_type(),
                cat.into(),
            ))
            .unwrap();

        let mut reasoner_store = store.clone();
        let reasoner = RdfsReasoner::new();
        let added = reasoner.reason(&mut reasoner_store).unwrap();
        assert_eq!(added, 1);

        let inferred = reasoner_store.get_triples_with_subject(&felix.into());
        assert!(inferred
            .iter()
            .any(|t| t.object == RdfObject::NamedNode(animal.clone())));
    }

    #[test]
    fn test_subclass_transitivity() {
        let mut store = RdfStore::new();
        let a = NamedNode::new("http://example.org/A").unwrap();
        let b = NamedNode::new("http://example.org/B").unwrap();
        let c = NamedNode::new("http://example.org/C").unwrap();

        store
            .insert(Triple::new(
                a.clone().into(),
                RdfsReasoner::sub_class_of(),
                b.clone().into(),
            ))
            .unwrap();
        store
            .insert(Triple::new(
                b.into(),
                RdfsReasoner::sub_class_of(),
                c.clone().into(),
            ))
            .unwrap();

        let reasoner = RdfsReasoner::with_rules(vec![InferenceRule::SubClassOfTransitive]);
        let inferred = reasoner.materialize(&store).unwrap();
        assert!(inferred.iter().any(|t| {
            t.subject == a.clone().into()
                && t.predicate == RdfsReasoner::sub_class_of()
                && t.object == c.clone().into()
        }));
    }
}
