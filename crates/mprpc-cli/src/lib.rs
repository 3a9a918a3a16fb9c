//! # mprpc CLI
//!
//! Support code for the `mprpc` binary:
//!
//! - **demo**: the method table served by `mprpc serve`
//! - **json**: conversion between command-line JSON and MessagePack values
//! - **bench**: single-connection and pooled throughput runs for `mprpc bench`

pub mod bench;
pub mod demo;
pub mod json;
