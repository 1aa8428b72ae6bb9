#![allow(clippy::return_self_not_must_use)]
#![doc = include_str!("../README.md")]

//! # Trellis
//!
//! A small blocking HTTP/1.1 server with a segment-trie router.
//!
//! ## Example
//! ```no_run
//! use trellis::{Request, Response, Router, Server, Status};
//!
//! fn main() -> trellis::Result<()> {
//!     let mut router = Router::new();
//!     router.get("/echo/{str}", |req: &Request| {
//!         Response::new(Status::Ok).with_body(req.param("str").unwrap_or_default())
//!     })?;
//!
//!     Server::bind("127.0.0.1:4221")?.serve(router)
//! }
//! ```
//!
//! ## Architecture
//! Every accepted connection goes through the same pipeline, once:
//!
//! - `parser`: reads the request line, headers and optional body
//! - `Router`: resolves the path to a handler, or to 404 / 405
//! - `Negotiator`: gzips the body when the client accepts it
//! - `Dispatcher`: ties the above together and writes the response
//! - `Executor`: runs each connection on its own worker thread
//!
//! The connection is closed after the response; there is no keep-alive.
//!
//! ## Configuration
//! Server settings can be configured via:
//! - Environment variables (prefixed with `TRELLIS_`)
//! - Configuration file (`trellis.toml`)
//! - Builder methods on `Dispatcher`

pub use crate::config::ServerConfig;
pub use crate::encoding::{ContentEncoding, Negotiator};
pub use crate::error::{ParseError, ParseResult, Result, RouteError, ServerError};
pub use crate::http::{Headers, Method, PathParams, Request, Response, Status};
pub use crate::parser::{parse_request, BodyPolicy};
pub use crate::router::{Found, Handler, NodeId, PathMatch, RouteMiss, Router, Segment};
pub use crate::server::{Dispatcher, Server};

mod config;
mod encoding;
mod error;
mod executor;
mod http;
mod parser;
mod router;
mod server;
