//! The two halves of the host bridge: commands in, commands out.
//!
//! - [`RequestAssembler`] turns inbound commands into a [`crate::http::Request`].
//! - [`ResponseWriter`] turns a [`crate::http::Response`] into outbound commands.

pub mod assembler;
pub mod serializer;

pub use assembler::{RequestAssembler, State, Step};
pub use serializer::{ResponseWriter, WriteError, Written};
