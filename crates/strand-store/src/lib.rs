pub mod database;
pub mod error;
pub mod events;
pub mod fold;
pub mod row_helpers;
pub mod schema;
pub mod threads;

pub use database::Database;
pub use error::StoreError;
