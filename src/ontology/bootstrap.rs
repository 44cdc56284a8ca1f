//! The bootstrap ontology: reserved namespaces and the root class that
//! every connection loads before any user-supplied ontology file, so
//! that `rdf:type`, `rdfs:Resource`, and the well-known prefixes always
//! resolve even for an otherwise-empty store.
//!
//! Ontology files use a small vocabulary of their own (not a subset of
//! OWL): `a rdfs:Class` / `a rdf:Property` declare classes/properties,
//! `a tracker:Namespace` with `tracker:prefix` declares a prefix,
//! `a tracker:Ontology` with `nrl:lastModified` declares ontology version
//! metadata, and `tracker:notify`, `tracker:indexed`,
//! `tracker:fulltextIndexed`, `tracker:domainIndex`, `nrl:maxCardinality`,
//! `a nrl:InverseFunctionalProperty` carry the per-class/per-property
//! flags §3.2 defines. See `ontology::loader` for the reader.

pub const BOOTSTRAP_TURTLE: &str = r#"
@prefix rdf: <http://www.w3.org/1999/02/22-rdf-syntax-ns#> .
@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .
@prefix nrl: <http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#> .
@prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
@prefix tracker: <http://tracker.api.gnome.org/ontology/v3/tracker#> .

<http://www.w3.org/1999/02/22-rdf-syntax-ns#> a tracker:Namespace ; tracker:prefix "rdf" .
<http://www.w3.org/2000/01/rdf-schema#> a tracker:Namespace ; tracker:prefix "rdfs" .
<http://www.semanticdesktop.org/ontologies/2007/08/15/nrl#> a tracker:Namespace ; tracker:prefix "nrl" .
<http://www.w3.org/2001/XMLSchema#> a tracker:Namespace ; tracker:prefix "xsd" .
<http://tracker.api.gnome.org/ontology/v3/tracker#> a tracker:Namespace ; tracker:prefix "tracker" .

tracker:Ontology a tracker:Ontology ;
    nrl:lastModified "1970-01-01T00:00:00Z"^^xsd:dateTime .

rdfs:Resource a rdfs:Class .
"#;

#[cfg(test)]
mod tests {
    use super::BOOTSTRAP_TURTLE;
    use crate::rdf::serialization::{RdfParser, RdfFormat};

    #[test]
    fn test_bootstrap_is_valid_turtle() {
        let quads = RdfParser::parse(BOOTSTRAP_TURTLE, RdfFormat::Turtle).unwrap();
        assert!(!quads.is_empty());
    }
}
