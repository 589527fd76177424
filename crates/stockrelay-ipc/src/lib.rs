//! IPC protocol and server for daemon communication.
//!
//! Clients talk to the daemon over a Unix domain socket using newline-delimited
//! JSON requests and responses. Every exchange is a single request followed by
//! a single response; there are no server-initiated messages.

pub mod error;
pub mod protocol;
pub mod server;

pub use error::{IpcError, IpcResult};
pub use protocol::{error_codes, ErrorInfo, Method, Request, Response};
pub use server::{HandlerFn, IpcClient, IpcServer};
