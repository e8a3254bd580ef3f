//! # Postgres
//!
//! This crate provides the PostgreSQL bootstrap for the campground crawler:
//! connection pool creation, a connectivity check and the table schema.

/// Database pool and schema management for the campground crawler.
pub mod database;
