//! mprpc Server
//!
//! This crate provides the MessagePack-RPC server: a [`MethodTable`] of
//! named handlers and an [`RpcServer`] that serves it over TCP.

pub mod dispatcher;
pub mod server;

pub use dispatcher::{HandlerFuture, MethodTable, MethodTableBuilder};
pub use server::{serve_connection, RpcServer, ServerConfig};
