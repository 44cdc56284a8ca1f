//! HTTP handlers for the SPARQL 1.1 Protocol endpoint (§4.10, §6.4).

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::sparql::{ResultFormat, SparqlResults};

/// Query-string / form-body parameters the SPARQL 1.1 Protocol defines.
/// `default-graph-uri`/`named-graph-uri` (the protocol's dataset-scoping
/// parameters) are accepted but not yet honored — a query's `FROM`/`FROM
/// NAMED` clauses are the only dataset-scoping mechanism this executor
/// implements (§4.6 QC works over the store's one physical dataset).
#[derive(Debug, Deserialize, Default)]
pub struct SparqlParams {
    pub query: Option<String>,
    pub update: Option<String>,
}

/// Picks a result serialization from the `Accept` header, falling back
/// to the sensible default for the result's own kind (bindings/boolean
/// to SPARQL Results JSON, graph results to Turtle) when the header is
/// absent or names nothing this endpoint emits.
fn negotiate_format(accept: Option<&str>, results: &SparqlResults) -> ResultFormat {
    let default = match results {
        SparqlResults::Graph(_) => ResultFormat::Turtle,
        SparqlResults::Bindings { .. } | SparqlResults::Boolean(_) => ResultFormat::Json,
    };
    let Some(accept) = accept else { return default };
    let candidates: &[(&str, ResultFormat)] = match results {
        SparqlResults::Graph(_) => &[
            ("text/turtle", ResultFormat::Turtle),
            ("application/trig", ResultFormat::TriG),
            ("application/ld+json", ResultFormat::JsonLd),
        ],
        SparqlResults::Bindings { .. } | SparqlResults::Boolean(_) => &[
            ("application/sparql-results+json", ResultFormat::Json),
            ("application/sparql-results+xml", ResultFormat::Xml),
            ("text/tab-separated-values", ResultFormat::Tsv),
            ("application/json", ResultFormat::Json),
        ],
    };
    candidates.iter().find(|(mime, _)| accept.contains(mime)).map(|(_, format)| *format).unwrap_or(default)
}

/// `application/x-www-form-urlencoded` decoding for the POST form-body
/// variant of the protocol (§6.4) — hand-rolled rather than pulling in
/// `serde_urlencoded` directly, since `percent-encoding` (already a
/// dependency for IRI escaping, §6.3) is all unescaping a flat
/// `key=value&key=value` body needs.
fn parse_form_body(body: &[u8]) -> SparqlParams {
    let text = String::from_utf8_lossy(body);
    let mut params = SparqlParams::default();
    for pair in text.split('&') {
        let Some((key, value)) = pair.split_once('=') else { continue };
        let decoded = percent_encoding::percent_decode_str(&value.replace('+', " "))
            .decode_utf8_lossy()
            .into_owned();
        match key {
            "query" => params.query = Some(decoded),
            "update" => params.update = Some(decoded),
            _ => {}
        }
    }
    params
}

async fn run_query(conn: &Connection, query: &str, accept: Option<&str>) -> Response {
    let cancel = CancellationToken::new();
    match conn.query_results(query, &cancel) {
        Ok(results) => {
            let format = negotiate_format(accept, &results);
            match results.serialize(format) {
                Ok(body) => ([(header::CONTENT_TYPE, SparqlResults::content_type(format))], body).into_response(),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
            }
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn run_update(conn: &Connection, update: &str) -> Response {
    let cancel = CancellationToken::new();
    match conn.update(update, &cancel) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

/// `GET /sparql?query=...` (§6.4): read-only, query string only — the
/// protocol reserves `update` for POST bodies, so a `?update=` on a GET
/// is rejected rather than silently accepted.
pub async fn get_handler(State(conn): State<Arc<Connection>>, headers: HeaderMap, Query(params): Query<SparqlParams>) -> Response {
    match params.query {
        Some(query) => run_query(&conn, &query, headers.get(header::ACCEPT).and_then(|v| v.to_str().ok())).await,
        None => (StatusCode::BAD_REQUEST, "missing query parameter").into_response(),
    }
}

/// `POST /sparql` (§6.4): body is either a raw query
/// (`application/sparql-query`), a raw update
/// (`application/sparql-update`), or a form body carrying `query=`/
/// `update=`.
pub async fn post_handler(State(conn): State<Arc<Connection>>, headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());

    if content_type.starts_with("application/sparql-update") {
        return match String::from_utf8(body.to_vec()) {
            Ok(update) => run_update(&conn, &update).await,
            Err(_) => (StatusCode::BAD_REQUEST, "update body is not valid UTF-8").into_response(),
        };
    }

    if content_type.starts_with("application/sparql-query") {
        return match String::from_utf8(body.to_vec()) {
            Ok(query) => run_query(&conn, &query, accept).await,
            Err(_) => (StatusCode::BAD_REQUEST, "query body is not valid UTF-8").into_response(),
        };
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let params = parse_form_body(&body);
        if let Some(update) = params.update {
            return run_update(&conn, &update).await;
        }
        if let Some(query) = params.query {
            return run_query(&conn, &query, accept).await;
        }
        return (StatusCode::BAD_REQUEST, "form body has neither query nor update").into_response();
    }

    (
        StatusCode::UNSUPPORTED_MEDIA_TYPE,
        "expected application/sparql-query, application/sparql-update, or application/x-www-form-urlencoded",
    )
        .into_response()
}

/// Liveness/version probe — not part of the SPARQL 1.1 Protocol, kept
/// for the same operational role the teacher's `/api/status` served.
pub async fn status_handler() -> Response {
    axum::Json(serde_json::json!({ "status": "healthy", "version": crate::VERSION })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_form_body_query() {
        let params = parse_form_body(b"query=SELECT%20%2A%20WHERE%20%7B%20%7D");
        assert_eq!(params.query.as_deref(), Some("SELECT * WHERE { }"));
        assert!(params.update.is_none());
    }

    #[test]
    fn test_parse_form_body_update() {
        let params = parse_form_body(b"update=CLEAR+ALL");
        assert_eq!(params.update.as_deref(), Some("CLEAR ALL"));
    }

    #[test]
    fn test_negotiate_format_defaults() {
        let bindings = SparqlResults::Bindings { variables: vec![], solutions: vec![] };
        assert_eq!(negotiate_format(None, &bindings), ResultFormat::Json);
        let graph = SparqlResults::Graph(vec![]);
        assert_eq!(negotiate_format(None, &graph), ResultFormat::Turtle);
        assert_eq!(negotiate_format(Some("application/trig, text/plain"), &graph), ResultFormat::TriG);
    }
}
