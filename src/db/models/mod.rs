//! Database models split into separate files.
//! Re-exported here so call sites can use `crate::db::models::*`.

pub mod history;
pub mod task;

pub use self::history::*;
pub use self::task::*;
