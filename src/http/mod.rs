//! The HTTP endpoint (EP, §4.10): SPARQL 1.1 Protocol `GET`/`POST
//! /sparql`, reusing the teacher's `axum` + `tower-http` stack.

pub mod handler;
pub mod server;

pub use server::HttpServer;
