//! Syntax layer for Docker Bake files.
//!
//! [`hcl::parse`] reads a build definition into a located syntax tree,
//! recovering from errors so half-typed files still produce a useful tree.
//! [`dockerfile::parse`] reads the instruction structure of a Dockerfile,
//! [`schema`] describes the blocks and attributes bake understands, and
//! [`decode::validate`] applies the structural rules bake enforces when
//! loading a file.

pub mod decode;
pub mod dockerfile;
mod error;
pub mod hcl;
mod location;
pub mod schema;

pub use error::ParseError;
pub use location::{Location, Position};
