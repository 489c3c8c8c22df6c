//! Compiler core: types, parsing, graph, resolution, ordering, wiring,
//! planning, and execution.

pub mod deferred;
pub mod error;
pub mod executor;
pub mod graph;
pub mod order;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod state;
pub mod types;
pub mod wiring;
