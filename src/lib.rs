//! Quarry: a single-node relational storage and query engine built directly
//! on a paged-file abstraction (spec §1).
//!
//! Layering, leaves first (spec §2): [`pager`] gives fixed-size page I/O
//! with a write-through cache; [`record`] lays slotted-page tuple storage on
//! top of it; [`index`] is an independent B+tree secondary-index facility
//! over the same pager primitive; [`catalog`] is the (externally supplied)
//! schema-version authority both storage layers consult; [`query`] is a
//! pull-based iterator pipeline of physical operators that consume all of
//! the above. Nothing above is safe for concurrent access (spec §5) — the
//! engine is single-threaded and cooperative.

pub mod catalog;
pub mod error;
pub mod index;
pub mod logging;
pub mod pager;
pub mod query;
pub mod record;
pub mod types;

pub use error::{Error, Result};
