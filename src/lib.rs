//! Visage groups face descriptors belonging to one user into stable, named
//! persons and keeps that grouping consistent across repeated re-clustering
//! passes.
//!
//! The pipeline: a staleness policy decides whether a user needs work, the
//! batch scheduler and label-propagation clusterer turn descriptors into
//! candidate clusters, and the reconciler maps those clusters onto the
//! previously persisted persons so names and external references survive.

pub mod clustering;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod reconcile;
pub mod runner;
pub mod staleness;

pub use config::Config;
pub use db::Database;
pub use error::VisageError;
