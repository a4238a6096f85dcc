#![doc = include_str!("../README.md")]

mod error;
pub use error::*;

/// Generated protobuf messages, client and server for package `leafid`.
pub mod proto {
    tonic::include_proto!("leafid");

    /// Encoded file descriptor set, for gRPC reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("leafid_descriptor");
}

// Downstream crates reach the core types as `leafid_tonic_core::leafid`.
pub use leafid;
