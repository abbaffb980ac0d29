use std::fmt;

use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

use crate::frame::{CanFrame, Identifier};
use crate::{Error, Result};

/// Identifier used by boards when answering the host.
pub const BOARD_IDENTIFIER: u16 = 0x7fe;
/// Identifier used by the host programmer.
pub const HOST_IDENTIFIER: u16 = 0x7ff;

/// Set in the data counter of the first message of a block.
pub const START_OF_MESSAGE_MASK: u8 = 0x80;

/// board id, command, message number, data counter
pub const HEADER_LENGTH: usize = 4;
pub const MAX_DATA_LENGTH: usize = 4;

const TYPE_SHIFT: u8 = 6;
const SUBJECT_MASK: u8 = 0x3f;

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Subject {
    Identify = 1,
    SetAddress = 2,
    Data = 3,
    StartApplication = 4,
    // only available in the bigger bootloader variants
    GetFusebits = 5,
    ChipErase = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum MessageType {
    Request = 0,
    Success = 1,
    Error = 2,
    WrongNumber = 3,
}

impl Subject {
    pub fn name(self) -> &'static str {
        match self {
            Subject::Identify => "identify",
            Subject::SetAddress => "set_address",
            Subject::Data => "data",
            Subject::StartApplication => "start_app",
            Subject::GetFusebits => "get_fusebit",
            Subject::ChipErase => "chip_erase",
        }
    }
}

impl MessageType {
    pub fn name(self) -> &'static str {
        match self {
            MessageType::Request => "request",
            MessageType::Success => "success",
            MessageType::Error => "error",
            MessageType::WrongNumber => "wrong_number",
        }
    }
}

/// The second header byte: message type in bits 7..6, subject in bits 5..0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub message_type: MessageType,
    pub subject: Subject,
}

impl Command {
    pub fn new(message_type: MessageType, subject: Subject) -> Command {
        Command {
            message_type,
            subject,
        }
    }

    pub fn from_raw(raw: u8) -> Result<Command> {
        let subject = match Subject::from_u8(raw & SUBJECT_MASK) {
            Some(subject) => subject,
            None => return Err(Error::InvalidSubject(raw & SUBJECT_MASK)),
        };
        let message_type = MessageType::from_u8(raw >> TYPE_SHIFT)
            .ok_or(Error::InvalidFormat("message type"))?;
        Ok(Command::new(message_type, subject))
    }

    pub fn raw(&self) -> u8 {
        (self.message_type as u8) << TYPE_SHIFT | self.subject as u8
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command.raw()
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // SUBJECT.type, as the host programmer logs it
        write!(
            f,
            "{}.{}",
            self.subject.name().to_uppercase(),
            self.message_type.name()
        )
    }
}

/// Application level view of a bootloader CAN frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootloaderMessage {
    pub board_id: u8,
    pub command: Command,
    pub number: u8,
    pub data_counter: u8,
    pub data: Vec<u8>,
}

impl BootloaderMessage {
    pub fn is_start_of_message(&self) -> bool {
        self.data_counter & START_OF_MESSAGE_MASK != 0
    }

    /// Messages still to follow in the current block.
    pub fn remaining(&self) -> u8 {
        self.data_counter & !START_OF_MESSAGE_MASK
    }

    pub fn encode(&self, id: u16) -> Result<CanFrame> {
        if self.data.len() > MAX_DATA_LENGTH {
            return Err(Error::FrameTooLong(HEADER_LENGTH + self.data.len()));
        }
        let mut payload = Vec::with_capacity(HEADER_LENGTH + self.data.len());
        payload.push(self.board_id);
        payload.push(self.command.raw());
        payload.push(self.number);
        payload.push(self.data_counter);
        payload.extend_from_slice(&self.data);

        CanFrame::new(Identifier::standard(id)?, &payload)
    }

    pub fn decode(frame: &CanFrame) -> Result<BootloaderMessage> {
        if frame.id().is_extended() {
            return Err(Error::InvalidFormat("extended identifier"));
        }
        if frame.is_remote() {
            return Err(Error::InvalidFormat("remote frame"));
        }
        let data = frame.data();
        if data.len() < HEADER_LENGTH {
            return Err(Error::InvalidFormat("frame shorter than header"));
        }

        Ok(BootloaderMessage {
            board_id: data[0],
            command: Command::from_raw(data[1])?,
            number: data[2],
            data_counter: data[3],
            data: data[HEADER_LENGTH..].to_vec(),
        })
    }
}

impl fmt::Display for BootloaderMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} id {:#x} [{:x}] {} >",
            self.command, self.board_id, self.number, self.data_counter
        )?;
        for byte in &self.data {
            write!(f, " {:02x}", byte)?;
        }
        Ok(())
    }
}
