use crate::{Error, Result};

pub const MAX_STANDARD_ID: u16 = 0x07ff;
pub const MAX_EXTENDED_ID: u32 = 0x1fff_ffff;
pub const MAX_FRAME_LENGTH: usize = 8;

/// CAN arbitration field, either 11 bit (standard) or 29 bit (extended).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Identifier {
    Standard(u16),
    Extended(u32),
}

impl Identifier {
    pub fn standard(id: u16) -> Result<Identifier> {
        if id > MAX_STANDARD_ID {
            return Err(Error::InvalidIdentifier(id as u32));
        }
        Ok(Identifier::Standard(id))
    }

    pub fn extended(id: u32) -> Result<Identifier> {
        if id > MAX_EXTENDED_ID {
            return Err(Error::InvalidIdentifier(id));
        }
        Ok(Identifier::Extended(id))
    }

    pub fn raw(&self) -> u32 {
        match *self {
            Identifier::Standard(id) => id as u32,
            Identifier::Extended(id) => id,
        }
    }

    pub fn is_extended(&self) -> bool {
        matches!(self, Identifier::Extended(_))
    }
}

/// A classic CAN data or remote frame with at most 8 data bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: Identifier,
    rtr: bool,
    len: usize,
    data: [u8; MAX_FRAME_LENGTH],
}

impl CanFrame {
    pub fn new(id: Identifier, payload: &[u8]) -> Result<CanFrame> {
        if payload.len() > MAX_FRAME_LENGTH {
            return Err(Error::FrameTooLong(payload.len()));
        }
        let mut data = [0u8; MAX_FRAME_LENGTH];
        data[..payload.len()].copy_from_slice(payload);
        Ok(CanFrame {
            id,
            rtr: false,
            len: payload.len(),
            data,
        })
    }

    pub fn new_remote(id: Identifier, dlc: usize) -> Result<CanFrame> {
        if dlc > MAX_FRAME_LENGTH {
            return Err(Error::FrameTooLong(dlc));
        }
        Ok(CanFrame {
            id,
            rtr: true,
            len: dlc,
            data: [0u8; MAX_FRAME_LENGTH],
        })
    }

    pub fn id(&self) -> Identifier {
        self.id
    }

    pub fn is_remote(&self) -> bool {
        self.rtr
    }

    pub fn dlc(&self) -> usize {
        self.len
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }
}
