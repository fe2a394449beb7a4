//! # Grapple Core
//!
//! `grapple-core` is the foundational library powering the Grapple CLI. It calls any gRPC
//! method on any server without compile-time knowledge of the Protobuf schema: the schema is
//! discovered at runtime and messages are transcoded between line-delimited JSON and the
//! Protobuf wire format on the fly.
//!
//! ## Key Components
//!
//! * **[`target`]:** Canonicalizes developer shorthand addresses (`:` and `:8080`).
//! * **[`metadata`]:** Composes the shared, discovery-only and call-only header channels.
//! * **[`source`]:** The [`MethodSource`](source::MethodSource) abstraction and its three
//!   variants (server reflection, descriptor set files, `.proto` sources compiled with `protoc`).
//! * **[`registry`]:** A closed, fully resolved
//!   [`DescriptorRegistry`](registry::DescriptorRegistry).
//! * **[`invoke`]:** The invocation engine driving unary and streaming calls.
//!
//! ## Internal clients
//!
//! * **[`GrpcClient`](grpc::client::GrpcClient):** A dynamic gRPC client using a
//!   [`DynamicCodec`](grpc::codec::DynamicCodec).
//! * **[`ReflectionSession`](reflection::session::ReflectionSession):** A long-lived
//!   reflection exchange (`grpc.reflection.v1`, or `v1alpha` for older servers) offering the
//!   functionality we need internally.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect`, `prost-types` and `tonic` to ensure that
//! consumers use compatible versions of these underlying dependencies.
pub mod connection;
pub mod grpc;
pub mod invoke;
pub mod metadata;
pub mod reflection;
pub mod registry;
pub mod source;
pub mod target;
pub mod transcode;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use prost_types;
pub use tonic;

/// Type alias for the standard boxed error used in generic bounds.
type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
