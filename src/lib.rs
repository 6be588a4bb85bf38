//! Metadata extraction, data mapping and attribute-association-graph engine for
//! relational tabular datasets.
//!
//! The crate is organized around three pipelines that share the [`types`] metadata
//! model: metadata generation (inferring [`types::MetaData`] from raw tables),
//! data mapping (translating between two [`types::MetaData`] schemas via
//! [`logic`]/[`conclusion`]/[`mapping`]/[`transform`]), and graph materialization
//! ([`graph`], [`query`], [`aag`]).

pub mod aag;
pub mod aggregate;
pub mod cancel;
pub mod conclusion;
pub mod error;
pub mod generator;
pub mod graph;
pub mod io;
pub mod lattice;
pub mod logic;
pub mod mapping;
pub mod postfilter;
pub mod query;
pub mod sourcedata;
pub mod transform;
pub mod types;

pub use cancel::CancellationToken;
pub use error::{CoreError, CoreResult};
