// (c) 2025 the llrpd contributors

//! `llrpd` is a device-service adapter for RFID readers that speak
//! LLRP (the Low-Level Reader Protocol, a binary request/response
//! protocol over TCP).
//!
//! It multiplexes any number of reader connections behind a uniform
//! read/write command surface: resource names map to LLRP request
//! messages, responses correlate by message id, and asynchronous
//! reader traffic (tag reports, reader events, keepalives) flows back
//! to the host through an event outlet.
//!
//! ## Layout
//!
//! * [`protocol`] - the wire codec: header packing, frame streaming,
//!   the typed message catalog and status decoding.
//! * [`client`] - one TCP connection to one reader: concurrent
//!   senders, a receive dispatcher, id correlation and the version
//!   handshake.
//! * [`reader`] - the durable per-reader supervisor: reconnects with
//!   backoff, retries sends interrupted by connection loss, surfaces
//!   reader rejections.
//! * [`registry`] - the name-to-supervisor map, single-flight on
//!   creation.
//! * [`driver`] - the adapter surface a hosting framework calls:
//!   initialize, read, write, add/update/remove device, stop.
//! * [`config`] - service settings (timeouts, backoff, default port).
//!
//! The library never installs a tracing subscriber or touches process
//! globals; construct a [`driver::Driver`] and hand it your outlets.

pub(crate) mod cli;
pub use cli::main;

pub mod client;
pub mod config;
pub mod driver;
pub mod protocol;
pub mod reader;
pub mod registry;
pub(crate) mod util;
