//! Bulk namespace maintenance for Cloud Datastore: purge every kind of the
//! namespaces listed in a checkpoint file, clone a namespace, list namespaces
//! and report their storage.

pub mod cloning;
pub mod config;
pub mod inventory;
pub mod observability;
pub mod pipeline;
pub mod purge;
pub mod store;

#[cfg(test)]
mod tests;
