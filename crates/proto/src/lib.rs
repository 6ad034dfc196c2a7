//! Proto definitions for MediChain
//!
//! This crate contains all the protobuf definitions and generated types
//! that are shared across the ledger and chaincode services.

pub mod v1 {
    tonic::include_proto!("medichain.v1");
}

// Re-export commonly used types for convenience
pub use v1::*;

// Re-export prost so callers can serialize transaction payloads without
// depending on prost directly.
pub use prost::Message;
