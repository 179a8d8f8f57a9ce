//! Wire surface of the HeronFS nameserver service.
//!
//! Message structs are checked-in prost derives (no build-time codegen)
//! under the `heronfs.NameService` package; [`NameServiceClient`] is a
//! thin unary client over a tonic channel. This crate is client-only:
//! the server side of the service lives in the nameserver itself.

mod client;
mod messages;

pub use client::NameServiceClient;
pub use messages::*;
