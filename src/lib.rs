//! Stackwire — resource dependency and access-wiring compiler for cloud stacks.
//!
//! Declared nodes in, a cycle-free materialization order and a least-privilege
//! access edge set out. BLAKE3 state hashing. Provenance event log.

pub mod cli;
pub mod core;
pub mod kinds;
pub mod provenance;
pub mod provider;
