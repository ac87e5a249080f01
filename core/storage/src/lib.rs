pub mod database;
pub mod error;
mod history;
mod links;
mod workspaces;
mod zettels;

pub use database::{Database, StoreStats};
pub use error::{Result, StoreError};
pub use history::HistoryEntry;
