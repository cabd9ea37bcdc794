//! Lectern Kernel Library
//!
//! Content lifecycle for posts and comments whose code snippets and images
//! live outside the relational store. The main entry point for running the
//! server is the `lectern` binary.

pub mod aggregator;
pub mod code;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod image;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod routes;
pub mod state;
pub mod store;
