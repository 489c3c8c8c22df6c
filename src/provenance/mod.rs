//! Provenance — append-only event log and BLAKE3 configuration hashing.

pub mod eventlog;
pub mod hasher;
