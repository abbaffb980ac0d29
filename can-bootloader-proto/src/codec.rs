use std::io;
use std::io::ErrorKind;

use bytes::{Buf, BufMut, BytesMut};
use num_derive::FromPrimitive;
use tokio_util::codec::{Decoder, Encoder};

use crate::frame::{CanFrame, Identifier, MAX_FRAME_LENGTH, MAX_STANDARD_ID};

// TODO: Unknown(u8) would be nicer than rejecting, but FromPrimitive can't derive it
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromPrimitive)]
pub enum Rs232CanCmd {
    Reset = 0x00,
    SetFilter = 0x10,
    Pkt = 0x11,
    SetMode = 0x12,
    Error = 0x13,
    NotifyReset = 0x14,
    PingGateway = 0x15,
    Resync = 0x16,
    Version = 0x17,
    IDString = 0x18,
    Packetcounters = 0x19,
    Errorcounters = 0x1A,
    Powerdraw = 0x1B,
    ReadCtrlReg = 0x1C,
    WriteCtrlReg = 0x1D,
    GetResetCause = 0x1E,
    NotifyTXOvf = 0x1F,
}

const HEADER_LENGTH: usize = 2;
const MAX_PAYLOAD_LENGTH: usize = 18;

/// u32 id + u8 dlc in front of the frame data
const RAW_FRAME_HEADER: usize = 5;
const EXTENDED_FLAG: u32 = 1 << 31;

pub struct CanTcpCodec;

impl Decoder for CanTcpCodec {
    type Item = CanTcpPacket;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let payload_length = src[0] as usize;

        if payload_length > MAX_PAYLOAD_LENGTH {
            return Err(io::Error::new(
                ErrorKind::InvalidData,
                "invalid length field",
            ));
        }

        if src.len() < payload_length + HEADER_LENGTH {
            // more bytes are needed
            src.reserve(payload_length + HEADER_LENGTH - src.len());
            return Ok(None);
        }

        let packet_data = src.split_to(HEADER_LENGTH + payload_length);

        let cmd = match num_traits::FromPrimitive::from_u8(packet_data[1]) {
            Some(cmd) => cmd,
            None => return Err(io::Error::new(ErrorKind::InvalidData, "invalid command")),
        };

        Ok(Some(CanTcpPacket {
            cmd,
            data: packet_data[HEADER_LENGTH..].to_vec(),
        }))
    }
}

impl Encoder<CanTcpPacket> for CanTcpCodec {
    type Error = io::Error;

    /// CanTCP packet format:
    /// +--------+---------+--------------+
    /// | u8 len | u8 type | [u8] payload |
    /// +--------+---------+--------------+
    fn encode(&mut self, item: CanTcpPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if item.data.len() > MAX_PAYLOAD_LENGTH {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                "payload too long for CanTCP",
            ));
        }
        dst.reserve(HEADER_LENGTH + item.data.len());

        dst.put_u8(item.data.len() as u8);
        dst.put_u8(item.cmd as u8);
        dst.put_slice(&item.data);

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanTcpPacket {
    pub cmd: Rs232CanCmd,
    pub data: Vec<u8>,
}

impl CanTcpPacket {
    pub fn data_len(&self) -> usize {
        self.data.len()
    }
}

impl CanFrame {
    /// Wraps the frame into a `Pkt` packet:
    /// +-----------+--------+-------------+
    /// | u32le id  | u8 dlc | [u8] data   |
    /// +-----------+--------+-------------+
    /// Bit 31 of the id marks an extended frame.
    pub fn to_packet(&self) -> CanTcpPacket {
        let mut data = Vec::with_capacity(RAW_FRAME_HEADER + self.dlc());
        let id = match self.id() {
            Identifier::Standard(id) => id as u32,
            Identifier::Extended(id) => id | EXTENDED_FLAG,
        };
        data.put_u32_le(id);
        data.put_u8(self.dlc() as u8);
        data.put_slice(self.data());

        CanTcpPacket {
            cmd: Rs232CanCmd::Pkt,
            data,
        }
    }

    pub fn from_packet(packet: &CanTcpPacket) -> io::Result<CanFrame> {
        if packet.cmd != Rs232CanCmd::Pkt {
            return Err(io::Error::new(ErrorKind::InvalidData, "not a frame packet"));
        }
        if packet.data_len() < RAW_FRAME_HEADER {
            return Err(io::Error::new(ErrorKind::InvalidData, "frame packet too short"));
        }

        let mut buf = &packet.data[..];
        let raw_id = buf.get_u32_le();
        let dlc = buf.get_u8() as usize;
        if dlc > MAX_FRAME_LENGTH || buf.remaining() < dlc {
            return Err(io::Error::new(ErrorKind::InvalidData, "invalid dlc"));
        }

        let id = if raw_id & EXTENDED_FLAG != 0 {
            Identifier::extended(raw_id & !EXTENDED_FLAG)
        } else if raw_id <= MAX_STANDARD_ID as u32 {
            Ok(Identifier::Standard(raw_id as u16))
        } else {
            Err(crate::Error::InvalidIdentifier(raw_id))
        }
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;

        CanFrame::new(id, &buf[..dlc])
            .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    #[test]
    fn partial_packets_wait_for_more_bytes() {
        let mut codec = CanTcpCodec;
        let mut buf = BytesMut::from(&[0x02, 0x15, 0xaa][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 3);

        buf.put_u8(0xbb);
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.cmd, Rs232CanCmd::PingGateway);
        assert_eq!(packet.data, vec![0xaa, 0xbb]);
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_length_is_rejected() {
        let mut buf = BytesMut::from(&[19u8, 0x11][..]);
        assert!(CanTcpCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn unknown_command_is_rejected() {
        let mut buf = BytesMut::from(&[0u8, 0x42][..]);
        assert!(CanTcpCodec.decode(&mut buf).is_err());
    }

    #[test]
    fn bootloader_frame_packet_layout() {
        let frame = CanFrame::new(Identifier::Standard(0x7fe), &[0x21, 0x41, 0x00, 0x80]).unwrap();
        let mut buf = BytesMut::new();
        CanTcpCodec.encode(frame.to_packet(), &mut buf).unwrap();
        assert_eq!(
            &buf[..],
            &[9, 0x11, 0xfe, 0x07, 0x00, 0x00, 4, 0x21, 0x41, 0x00, 0x80]
        );
    }

    #[test]
    fn extended_flag_survives_packet() {
        let frame = CanFrame::new(Identifier::Extended(0x18_21_ff_01), &[]).unwrap();
        let back = CanFrame::from_packet(&frame.to_packet()).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn packet_with_bad_dlc_is_rejected() {
        let packet = CanTcpPacket {
            cmd: Rs232CanCmd::Pkt,
            data: vec![0xfe, 0x07, 0, 0, 9, 0, 0],
        };
        assert!(CanFrame::from_packet(&packet).is_err());
    }

    #[tokio::test]
    async fn frames_stream_through_framed_io() {
        let (client, server) = tokio::io::duplex(64);
        let mut write = FramedWrite::new(client, CanTcpCodec);
        let mut read = FramedRead::new(server, CanTcpCodec);

        let frames = [
            CanFrame::new(Identifier::Standard(0x7fe), &[1, 0x41, 0, 0x80]).unwrap(),
            CanFrame::new(Identifier::Standard(0x7fe), &[1, 0x43, 1, 0, 0, 3]).unwrap(),
        ];
        for frame in &frames {
            write.send(frame.to_packet()).await.unwrap();
        }
        drop(write);

        let mut received = vec![];
        while let Some(packet) = read.next().await {
            received.push(CanFrame::from_packet(&packet.unwrap()).unwrap());
        }
        assert_eq!(received, frames);
    }
}
