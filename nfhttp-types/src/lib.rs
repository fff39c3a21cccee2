#![forbid(unsafe_code)]
#![deny(unused_must_use)]
//! Core data model shared by every layer of the nfhttp client pipeline:
//! the immutable `Request`/`Response` pair, their `Cache-Control` views,
//! the fingerprint used as cache and coalesce key, the uniform `Client`
//! capability every layer implements, and the cancellation `RequestToken`.
//!
//! This crate has no I/O and no async runtime dependency; it is the
//! vocabulary the transport, cache, coalescer and modifier crates share.

mod cache_control;
mod client;
mod error;
mod headers;
mod method;
mod request;
mod response;
mod token;

pub use cache_control::{RequestCacheControl, ResponseCacheControl};
pub use client::{Callback, Client, ClientExt, LabelsCallback, ResponsesCallback};
pub use error::{NfError, Result};
pub use headers::HeaderMap;
pub use method::Method;
pub use request::Request;
pub use response::{Response, STATUS_INVALID};
pub use token::RequestToken;
