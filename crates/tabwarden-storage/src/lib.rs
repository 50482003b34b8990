pub mod db;
pub mod migrations;
pub mod models;

pub use db::{Store, StoreError};
pub use models::{BlockTier, Settings};
