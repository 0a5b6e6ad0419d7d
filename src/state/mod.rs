/// State management module
///
/// This module handles the persistent catalog state:
/// - Database connections, transactions and queries (catalog.rs)
/// - Shared data structures (data.rs)

pub mod catalog;
pub mod data;
