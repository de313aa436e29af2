//! Rolewright - least-privilege role compiler
//!
//! Compiles a static role manifest into canonical IAM policy and trust
//! documents, lints the result for overly broad grants, and simulates
//! authorization decisions against it.

pub mod authz;
pub mod errors;
pub mod settings;
