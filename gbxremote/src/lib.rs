//! A client for the XML-RPC interface of ManiaPlanet dedicated servers,
//! which speak the length-prefixed "GBXRemote 2" framing over TCP.
//!
//! [`Remote`] maintains the connection: it correlates concurrent requests
//! with their responses, hands server-pushed callbacks to subscribers,
//! and reconnects when the server goes away.

pub use client::*;
pub use registry::*;
pub use xml::*;

mod client;
pub mod frame;
mod registry;
mod xml;
