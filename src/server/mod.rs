//! HTTP exposition

pub mod http;

pub use http::{router, serve};
