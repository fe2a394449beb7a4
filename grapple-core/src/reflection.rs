//! # Server Reflection
//!
//! This module contains the logic necessary to interact with the gRPC Server Reflection Protocol.
//!
//! It enables the client to query a server for its own Protobuf schema at runtime, allowing
//! `grapple` to function without pre-compiled descriptors. The protocol types are the ones
//! generated by `tonic-reflection` for `grpc.reflection.v1`.
pub mod session;
