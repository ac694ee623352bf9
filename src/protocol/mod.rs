//! The LLRP wire protocol: framing, typed messages, status handling
// (c) 2025 the llrpd contributors
//
//! # On-wire framing
//!
//! Every LLRP message starts with a fixed 10-byte header: 3 reserved
//! bits, a 3-bit protocol version, a 10-bit message type, a 32-bit
//! total length (header included) and a 32-bit message id. Exactly
//! `total length - 10` payload bytes follow.
//!
//! [`header`] is the header codec, [`frame`] reads and writes whole
//! frames over a socket, [`messages`] is the typed catalog (which
//! request pairs with which response, and how each payload marshals),
//! and [`status`] decodes the `LLRPStatus` sub-structure most
//! responses carry.

pub mod frame;
pub mod header;
pub mod messages;
pub mod status;
