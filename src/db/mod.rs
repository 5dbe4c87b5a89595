//! Database module: pool setup, entity models and SQL repositories.
//!
//! Repositories are grouped by area (`accounts`, `fund`, `grants`, `awards`, `reports`,
//! `outbox`) and take a `&Pool` or an open transaction. Callers import the
//! area module they need, e.g. `crate::db::fund::get_donor`.

pub mod accounts;
pub mod awards;
pub mod fund;
pub mod grants;
pub mod model;
pub mod outbox;
pub mod reports;
mod pool;

pub use pool::*;
