//! Heliotherm Heat Pump Protocol
//!
//! This crate implements the framed ASCII protocol spoken by Heliotherm heat
//! pump controllers over their serial service interface:
//!
//! - [`crc`] - The vendor checksum algorithm
//! - [`command`] - Typed query commands (`LIN;`, `MP,NR=<n>;`, ...)
//! - [`frame`] - Request framing and response frame decoding
//! - [`response`] - Parsing of decoded ASCII payloads
//!
//! The crate is pure: it never touches a socket or serial port. Callers feed
//! received bytes into [`frame::decode_frame`] and get payloads back, which
//! makes the codec testable without hardware.
//!
//! # Wire format
//!
//! ```text
//! request:  02 FD D0 E0 00 00 | len | 7E | ascii command | crc
//! response: 02 FD E0 D0 xx 00 | len | 7E | ascii payload | crc
//! ```
//!
//! `len` counts the `7E` prefix plus the ASCII bytes. The checksum covers
//! every byte before it. Two response header variants relax the checksum
//! (see [`frame`]); everything else is rejected on mismatch.

pub mod command;
pub mod crc;
pub mod frame;
pub mod response;

pub use command::Command;
pub use frame::{FrameError, decode_frame, encode_command};
pub use response::{Response, ResponseError};
