//! `alexandria_core`
//!
//! Core library for the data layer of Alexandria, a library-lending application.
//! This crate owns the catalog (books, authors, categories), engagement records
//! (ratings, interests), the lending ledger and homepage quotes, and keeps them
//! consistent so that both an HTTP server and a desktop shell can share the same
//! persistence logic.

pub mod database;

pub mod identity;
