//! Adapters implementing the domain ports.

pub mod memory;
pub mod persistence;
pub mod publication;
pub mod retrieval;
pub mod rpsl_text_parser;
pub mod whois_nrtm;
