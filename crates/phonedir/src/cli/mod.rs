//! CLI module for phonedir
//!
//! Command handlers are thin: they parse arguments, call the store or the
//! reconciler, and render the result as a table or as JSON.

pub mod context;
pub mod directory;
pub mod error;
pub mod feed;
pub mod maintenance;
pub mod output;
