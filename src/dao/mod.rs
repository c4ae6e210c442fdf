/// Database model definitions.
pub mod models;
/// Open poll storage and its backends.
pub mod poll_store;
/// Storage abstraction layer for database operations.
pub mod storage;
