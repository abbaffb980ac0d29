mod util;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use at90can::buffers::FreeBuffers;
use at90can::config::{Config, Wait};
use at90can::{gateway, interrupt};
use at90can::sim::SimController;
use at90can::transmit::{CancelToken, Staging, Transmitter};
use can_bootloader_proto::{CanFrame, Command, MessageType, Subject, START_OF_MESSAGE_MASK};
use clap::{value_parser, ArgAction};
use futures::channel::mpsc;
use tokio::task;
use tokio::time::{self, Duration};

const DEFAULT_BOARD_ID: u8 = 0x01;
const DEFAULT_COUNT: u16 = 16;
const DEFAULT_COMPLETION_DELAY_MS: u64 = 10;

/// Bootloader type 1 version 5, 256 byte pages, 480 pages.
const IDENTIFY_RESPONSE: [u8; 4] = [0x15, 0x03, 0x01, 0xe0];

fn parse_board_id(s: &str) -> Result<u8, String> {
    let res = match s.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    res.map_err(|e| format!("invalid board id {:?}: {}", s, e))
}

fn args() -> clap::Command {
    clap::command!()
        .arg(
            clap::Arg::new("config")
                .short('c')
                .long("config")
                .action(ArgAction::Set)
                .value_parser(value_parser!(PathBuf))
                .help("TOML file with board-id, wait and gateway"),
        )
        .arg(
            clap::Arg::new("board-id")
                .short('b')
                .long("board-id")
                .action(ArgAction::Set)
                .value_parser(parse_board_id),
        )
        .arg(
            clap::Arg::new("count")
                .short('n')
                .long("count")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u16))
                .help("Number of IDENTIFY responses to send"),
        )
        .arg(
            clap::Arg::new("gateway")
                .short('g')
                .long("gateway")
                .action(ArgAction::Set)
                .value_parser(value_parser!(SocketAddr))
                .help("The cand to forward transmitted frames to"),
        )
        .arg(
            clap::Arg::new("timeout-ms")
                .long("timeout-ms")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u64))
                .help("Give up when no transmit buffer frees up in time"),
        )
        .arg(
            clap::Arg::new("completion-delay-ms")
                .long("completion-delay-ms")
                .action(ArgAction::Set)
                .value_parser(value_parser!(u64))
                .help("Simulated bus time per completion round"),
        )
}

/// Plays the bus: acknowledges every armed MOb each `delay` and raises the
/// transmit interrupt. Keeps servicing the MObs after the frame log is gone.
async fn complete_transmissions(
    sim: SimController,
    buffers: Arc<FreeBuffers>,
    delay: Duration,
    frames: mpsc::UnboundedSender<CanFrame>,
) -> anyhow::Result<()> {
    let mut ticker = time::interval(delay);
    loop {
        ticker.tick().await;

        let completed = sim.complete_all();
        if completed.is_empty() {
            continue;
        }
        for (mob, frame) in completed {
            if frames.unbounded_send(frame).is_err() {
                log::debug!("Frame of {:?} not logged, forwarder is gone", mob);
            }
        }

        let serviced = sim.interrupt(|regs| interrupt::on_transmit_complete(regs, &buffers));
        log::debug!("Serviced {} transmit MObs", serviced.len());
    }
}

async fn drained(buffers: &FreeBuffers, delay: Duration) {
    while buffers.available() < buffers.capacity() {
        time::sleep(delay).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let matches = args().get_matches();

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => Config::load(path)?,
        None => Config::new(DEFAULT_BOARD_ID),
    };
    if let Some(board_id) = matches.get_one::<u8>("board-id") {
        config.board_id = *board_id;
    }
    if let Some(gateway) = matches.get_one::<SocketAddr>("gateway") {
        config.gateway = Some(*gateway);
    }
    if let Some(ms) = matches.get_one::<u64>("timeout-ms") {
        config.wait = Wait::TimeoutMs(*ms);
    }
    let count = matches
        .get_one::<u16>("count")
        .copied()
        .unwrap_or(DEFAULT_COUNT);
    let delay = Duration::from_millis(
        matches
            .get_one::<u64>("completion-delay-ms")
            .copied()
            .unwrap_or(DEFAULT_COMPLETION_DELAY_MS)
            .max(1),
    );

    let sim = SimController::new();
    let buffers = Arc::new(FreeBuffers::default());
    let cancel = CancelToken::new();

    let (frame_tx, frame_rx) = mpsc::unbounded();
    let forwarder = util::spawn_logged("forwarder", gateway::forward(config.gateway, frame_rx));
    let mut completion = util::spawn_logged(
        "completion",
        complete_transmissions(sim.clone(), buffers.clone(), delay, frame_tx),
    );

    let mut transmitter =
        Transmitter::from_config(sim.clone(), sim.gate(), buffers.clone(), &config)
            .with_cancel(cancel.clone());
    let board_id = transmitter.board_id();

    let mut sender = task::spawn_blocking(move || -> at90can::Result<u16> {
        let command = Command::new(MessageType::Success, Subject::Identify);
        for number in 0..count {
            let staging = Staging {
                message_number: number as u8,
                message_data_counter: START_OF_MESSAGE_MASK,
                message_data: &IDENTIFY_RESPONSE,
            };
            transmitter.send_message(command, &staging, IDENTIFY_RESPONSE.len() as u8)?;
        }
        Ok(count)
    });

    let sent = tokio::select! {
        res = &mut sender => res??,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("Interrupted, cancelling pending transmission");
            cancel.cancel();
            sender.await??
        }
        _ = &mut completion => {
            log::error!("Completion task stopped, cancelling pending transmission");
            cancel.cancel();
            sender.await??;
            anyhow::bail!("Completion task stopped before all transmissions finished");
        }
    };
    log::info!("Board {:#04x} queued {} messages", board_id, sent);

    tokio::select! {
        _ = drained(&buffers, delay) => log::info!("All transmit buffers free again"),
        _ = tokio::signal::ctrl_c() => {
            log::warn!(
                "Interrupted with {} transmit buffers still busy",
                buffers.capacity() - buffers.available()
            );
        }
        _ = &mut completion => {
            log::error!("Completion task stopped before all transmissions finished");
        }
    }
    // aborting the completion task closes the frame channel
    completion.abort();
    forwarder.await?;

    Ok(())
}
