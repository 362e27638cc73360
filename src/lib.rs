//! ontolink - Clinical Ontology Graph Loader
//!
//! Loads ICD10 and HPO ontologies into a graph store, links their
//! hierarchies, cross-maps them through UMLS concepts, attaches label
//! embeddings and ingests patient annotations.

pub mod cli;
pub mod config;
pub mod context;
pub mod di;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod hierarchy;
pub mod loader;
pub mod mapping;
pub mod models;
pub mod parser;
pub mod patients;
pub mod services;
pub mod store;

// Re-export FromRef at crate root for di-macros generated code
pub use di::FromRef;
