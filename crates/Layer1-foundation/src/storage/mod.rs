//! Storage module for ncluster
//!
//! - `json`: JSON file store used for configuration

mod json;

pub use json::JsonStore;
