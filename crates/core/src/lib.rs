//! Domain types and boundary validation shared by the storage layer and the HTTP app.

pub mod types;
pub mod validation;
