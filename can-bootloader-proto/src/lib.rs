//! Wire format shared by AT90CAN bootloaders and the host programmer.
//!
//! Every bootloader frame carries a standard identifier (`0x7ff` from the
//! host, `0x7fe` from the boards) and a four byte header:
//!
//! +----------+---------+--------+--------------+------------+
//! | board id | command | number | data counter | [u8; 0..4] |
//! +----------+---------+--------+--------------+------------+

mod codec;
mod error;
mod frame;
mod message;

pub use codec::*;
pub use error::*;
pub use frame::*;
pub use message::*;
