//! Query compiler (QC) selectivity ordering — §4.6 step 3.
//!
//! A static heuristic over a Basic Graph Pattern's triple-pattern list,
//! not a cost-based optimizer with stored statistics refresh: spec.md
//! describes exactly this static heuristic, and the teacher's own
//! `optimizer.rs` stub was named but empty, so there was no richer
//! teacher behavior to generalize from here — this is new code grounded
//! in the shape spec.md §4.6 step 3 describes literally.

use crate::ontology::OntologyModel;
use spargebra::algebra::TriplePattern;
use spargebra::term::{NamedNodePattern, TermPattern};

const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// Reorder `patterns` so that the most selective pattern (by §4.6's
/// estimate: bound subject first, then `rdf:type` constraints, then
/// indexed properties, then declared row counts) is evaluated first.
/// Stable with respect to patterns of equal selectivity.
pub fn order_by_selectivity(mut patterns: Vec<TriplePattern>, ontology: &OntologyModel) -> Vec<TriplePattern> {
    let mut scored: Vec<(i32, usize, TriplePattern)> = patterns
        .drain(..)
        .enumerate()
        .map(|(i, p)| (selectivity_score(&p, ontology), i, p))
        .collect();
    // Lower score = more selective = evaluated first.
    scored.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));
    scored.into_iter().map(|(_, _, p)| p).collect()
}

fn selectivity_score(pattern: &TriplePattern, ontology: &OntologyModel) -> i32 {
    let mut score = 1000;

    if !matches!(pattern.subject, TermPattern::Variable(_)) {
        score -= 500;
    }

    if let NamedNodePattern::NamedNode(predicate) = &pattern.predicate {
        if predicate.as_str() == RDF_TYPE {
            score -= 300;
        } else if let Some(id) = ontology.try_lookup_property(predicate.as_str()) {
            if ontology.property(id).indexed {
                score -= 150;
            }
            // A single-valued property is a direct column lookup, cheaper
            // than a side-table scan for a multi-valued one.
            if !ontology.is_multi_valued(id) {
                score -= 50;
            }
        }
    } else {
        // Variable predicate: a UNION over every known property, the
        // least selective shape this compiler produces.
        score += 400;
    }

    if !matches!(pattern.object, TermPattern::Variable(_)) {
        score -= 100;
    }

    score
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::{Cardinality, OntologyModelBuilder, PropertyRange};
    use spargebra::term::Variable;

    fn ontology() -> OntologyModel {
        let mut b = OntologyModelBuilder::new();
        let class = b.add_class("http://ex/Thing", false).unwrap();
        b.add_property(
            "http://ex/name",
            class,
            PropertyRange::Datatype("http://www.w3.org/2001/XMLSchema#string".to_string()),
            Cardinality::Single,
            true,
            false,
            false,
            None,
        )
        .unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_bound_subject_ordered_first() {
        let ontology = ontology();
        let v = |n: &str| TermPattern::Variable(Variable::new(n).unwrap());
        let bound_subject = TriplePattern {
            subject: TermPattern::NamedNode(oxrdf::NamedNode::new("http://ex/a").unwrap()),
            predicate: NamedNodePattern::Variable(Variable::new("p").unwrap()),
            object: v("o"),
        };
        let unbound_subject = TriplePattern {
            subject: v("s"),
            predicate: NamedNodePattern::NamedNode(oxrdf::NamedNode::new("http://ex/name").unwrap()),
            object: v("o2"),
        };
        let ordered = order_by_selectivity(vec![unbound_subject, bound_subject.clone()], &ontology);
        assert_eq!(ordered[0].subject, bound_subject.subject);
    }
}
