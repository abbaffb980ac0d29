use std::sync::Arc;
use std::time::Duration;

use at90can::buffers::FreeBuffers;
use at90can::gateway;
use at90can::interrupt::on_transmit_complete;
use at90can::sim::SimController;
use at90can::transmit::{Staging, Transmitter};
use can_bootloader_proto::{
    BootloaderMessage, CanFrame, CanTcpCodec, Command, MessageType, Subject, BOARD_IDENTIFIER,
    START_OF_MESSAGE_MASK,
};
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};

#[tokio::test]
async fn transmitted_frames_reach_a_cantcp_peer() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let sim = SimController::new();
    let buffers = Arc::new(FreeBuffers::default());
    let mut tx = Transmitter::new(sim.clone(), sim.gate(), buffers.clone(), 0x21);

    let command = Command::new(MessageType::Success, Subject::Identify);
    for number in 0..3 {
        let staging = Staging {
            message_number: number,
            message_data_counter: START_OF_MESSAGE_MASK,
            message_data: &[0x15, 0x03, 0x01, 0xe0],
        };
        tx.send_message(command, &staging, 4).unwrap();
    }

    let completed = sim.complete_all();
    assert_eq!(sim.interrupt(|regs| on_transmit_complete(regs, &buffers)).len(), 3);
    assert_eq!(buffers.available(), buffers.capacity());

    let conn = TcpStream::connect(addr).await.unwrap();
    let mut sink = FramedWrite::new(conn, CanTcpCodec);
    for (_, frame) in &completed {
        sink.send(frame.to_packet()).await.unwrap();
    }
    drop(sink);

    let (peer, _) = listener.accept().await.unwrap();
    let packets: Vec<_> = FramedRead::new(peer, CanTcpCodec)
        .map(|packet| CanFrame::from_packet(&packet.unwrap()).unwrap())
        .collect()
        .await;

    assert_eq!(packets.len(), 3);
    for (number, frame) in packets.iter().enumerate() {
        assert_eq!(frame.id().raw(), BOARD_IDENTIFIER as u32);
        let message = BootloaderMessage::decode(frame).unwrap();
        assert_eq!(message.board_id, 0x21);
        assert_eq!(message.command, command);
        assert_eq!(message.number, number as u8);
        assert!(message.is_start_of_message());
        assert_eq!(message.data, vec![0x15, 0x03, 0x01, 0xe0]);
    }
}

fn identify_frames(count: u8) -> Vec<CanFrame> {
    (0..count)
        .map(|number| {
            BootloaderMessage {
                board_id: 0x21,
                command: Command::new(MessageType::Success, Subject::Identify),
                number,
                data_counter: START_OF_MESSAGE_MASK,
                data: vec![0x15, 0x03, 0x01, 0xe0],
            }
            .encode(BOARD_IDENTIFIER)
            .unwrap()
        })
        .collect()
}

#[tokio::test]
async fn unreachable_gateway_keeps_draining_frames() {
    // nothing listens on a port that was just released
    let addr = TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap();

    let (tx, rx) = mpsc::unbounded();
    let forwarder = tokio::spawn(gateway::forward(Some(addr), rx));

    let frames = identify_frames(6);
    for frame in &frames[..3] {
        tx.unbounded_send(*frame).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    for frame in &frames[3..] {
        tx.unbounded_send(*frame).unwrap();
    }
    assert!(!tx.is_closed());

    drop(tx);
    forwarder.await.unwrap().unwrap();
}

#[tokio::test]
async fn closed_gateway_connection_stops_only_the_forwarding() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (tx, rx) = mpsc::unbounded();
    let forwarder = tokio::spawn(gateway::forward(Some(addr), rx));

    let (peer, _) = listener.accept().await.unwrap();
    drop(peer);
    drop(listener);

    for frame in identify_frames(50) {
        tx.unbounded_send(frame).unwrap();
        tokio::task::yield_now().await;
    }
    assert!(!tx.is_closed());

    drop(tx);
    forwarder.await.unwrap().unwrap();
}
