//! Transmit side of the AT90CAN CAN bootloader.
//!
//! [`transmit::Transmitter`] loads bootloader messages into the transmit
//! MObs 8 to 14, [`interrupt::on_transmit_complete`] hands them back once
//! the bus acknowledged them. [`sim::SimController`] models the registers
//! so the whole path runs on a host, [`gateway::forward`] hands the
//! transmitted frames to a cand.

pub mod buffers;
pub mod config;
pub mod error;
pub mod gateway;
pub mod interrupt;
pub mod registers;
pub mod sim;
pub mod transmit;

pub use error::*;
