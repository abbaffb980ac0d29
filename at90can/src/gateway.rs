//! Forwarding of transmitted frames to a cand over CanTCP.

use std::net::SocketAddr;

use can_bootloader_proto::{BootloaderMessage, CanFrame, CanTcpCodec};
use futures::channel::mpsc::UnboundedReceiver;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::FramedWrite;

type GatewaySink = FramedWrite<TcpStream, CanTcpCodec>;

async fn connect(addr: SocketAddr) -> Option<GatewaySink> {
    match TcpStream::connect(addr).await {
        Ok(conn) => {
            log::info!("Forwarding frames to cand at {}", addr);
            Some(FramedWrite::new(conn, CanTcpCodec))
        }
        Err(e) => {
            log::error!("Cannot reach cand at {}: {}, only logging frames", addr, e);
            None
        }
    }
}

/// Logs every transmitted frame and, while the gateway is reachable, writes
/// it to the cand there as a CanTCP `Pkt`.
///
/// A gateway failure only stops the forwarding. The receiver is drained
/// until every sender is gone, so the bus side never sees a closed channel.
pub async fn forward(
    gateway: Option<SocketAddr>,
    mut frames: UnboundedReceiver<CanFrame>,
) -> anyhow::Result<()> {
    let mut sink = match gateway {
        Some(addr) => connect(addr).await,
        None => None,
    };

    let mut forwarded = 0usize;
    while let Some(frame) = frames.next().await {
        match BootloaderMessage::decode(&frame) {
            Ok(message) => log::info!("< {}", message),
            Err(e) => log::warn!("Transmitted a frame that is no bootloader message: {}", e),
        }

        let failed = match &mut sink {
            Some(sink) => sink.send(frame.to_packet()).await.err(),
            None => None,
        };
        match failed {
            Some(e) => {
                log::error!("Lost the cand connection: {}, only logging frames", e);
                sink = None;
            }
            None if sink.is_some() => forwarded += 1,
            None => {}
        }
    }

    log::debug!("Frame stream closed, {} frames forwarded", forwarded);
    Ok(())
}
