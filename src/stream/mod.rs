//! Stream utilities for progress delivery

mod coalesce;

pub use coalesce::{Coalesce, CoalesceExt};
