use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use can_bootloader_proto::{
    Command, Identifier, BOARD_IDENTIFIER, HEADER_LENGTH, MAX_DATA_LENGTH,
};

use crate::buffers::{FreeBuffers, InterruptGate};
use crate::config::Config;
use crate::registers::{IdentifierRegisters, Mob, MobPage, MobRegisters};
use crate::{Error, Result};

/// Outgoing message state prepared by the caller before sending.
#[derive(Debug, Clone, Copy)]
pub struct Staging<'a> {
    pub message_number: u8,
    pub message_data_counter: u8,
    pub message_data: &'a [u8],
}

/// How long [`Transmitter::send_message`] polls for a free buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitPolicy {
    /// Spin until a buffer frees up, however long that takes.
    #[default]
    Forever,
    /// Give up after this many unsuccessful polling rounds.
    Spins(u32),
    Timeout(Duration),
}

/// Shared flag that aborts a waiting transmitter.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

struct Wait {
    policy: WaitPolicy,
    rounds: u32,
    started: Instant,
}

impl Wait {
    fn new(policy: WaitPolicy) -> Wait {
        Wait {
            policy,
            rounds: 0,
            started: Instant::now(),
        }
    }

    /// Accounts for one round without a free MOb.
    fn round(&mut self) -> Result<()> {
        self.rounds = self.rounds.saturating_add(1);
        if self.rounds == 1 {
            log::debug!("No free transmit buffer, waiting ({:?})", self.policy);
        }

        let exhausted = match self.policy {
            WaitPolicy::Forever => false,
            WaitPolicy::Spins(spins) => self.rounds > spins,
            WaitPolicy::Timeout(timeout) => self.started.elapsed() >= timeout,
        };
        if exhausted {
            log::warn!("Giving up on transmission after {} rounds", self.rounds);
            return Err(Error::Timeout {
                rounds: self.rounds,
            });
        }

        std::hint::spin_loop();
        Ok(())
    }
}

/// Sends bootloader messages through the transmit MObs 8 to 14.
///
/// The transmitter owns the register bank, so it is the only path claiming
/// MObs. The interrupt side shares nothing but the [`FreeBuffers`] pool.
pub struct Transmitter<R, G> {
    regs: R,
    gate: G,
    buffers: Arc<FreeBuffers>,
    board_id: u8,
    identifier: IdentifierRegisters,
    policy: WaitPolicy,
    cancel: Option<CancelToken>,
}

impl<R: MobRegisters, G: InterruptGate> Transmitter<R, G> {
    pub fn new(regs: R, gate: G, buffers: Arc<FreeBuffers>, board_id: u8) -> Transmitter<R, G> {
        Transmitter {
            regs,
            gate,
            buffers,
            board_id,
            identifier: Identifier::Standard(BOARD_IDENTIFIER).into(),
            policy: WaitPolicy::Forever,
            cancel: None,
        }
    }

    pub fn from_config(
        regs: R,
        gate: G,
        buffers: Arc<FreeBuffers>,
        config: &Config,
    ) -> Transmitter<R, G> {
        Transmitter::new(regs, gate, buffers, config.board_id).with_policy(config.wait.into())
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn board_id(&self) -> u8 {
        self.board_id
    }

    pub fn buffers(&self) -> &Arc<FreeBuffers> {
        &self.buffers
    }

    /// Loads the first free transmit MOb with
    /// `[board id, command, number, data counter, data[..length]]` and
    /// starts the transmission.
    ///
    /// Blocks while no buffer is free. With [`WaitPolicy::Forever`] and no
    /// cancel token this only returns once a MOb has been armed.
    pub fn send_message(
        &mut self,
        command: Command,
        staging: &Staging<'_>,
        length: u8,
    ) -> Result<Mob> {
        let length = length as usize;
        if length > MAX_DATA_LENGTH {
            return Err(Error::PayloadTooLong { length });
        }
        if staging.message_data.len() < length {
            return Err(Error::StagingTooShort {
                length,
                available: staging.message_data.len(),
            });
        }

        let header: [u8; HEADER_LENGTH] = [
            self.board_id,
            command.raw(),
            staging.message_number,
            staging.message_data_counter,
        ];
        let data = &staging.message_data[..length];

        let mut wait = Wait::new(self.policy);
        loop {
            if let Some(cancel) = &self.cancel {
                if cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
            }

            if self.buffers.available() != 0 {
                if let Some(mob) = self.load_free_mob(&header, data) {
                    log::trace!("{} #{} armed on {:?}", command, staging.message_number, mob);
                    return Ok(mob);
                }
            }

            wait.round()?;
        }
    }

    fn load_free_mob(&mut self, header: &[u8], data: &[u8]) -> Option<Mob> {
        for mob in Mob::transmit() {
            let mut page = MobPage::select(&mut self.regs, mob);
            if !page.is_free() {
                continue;
            }

            let page = page
                .clear_status()
                .write_identifier(self.identifier)
                .write_data(header)
                .write_data(data)
                .enable_interrupt();

            let buffers = &self.buffers;
            return match self.gate.free(|cs| buffers.claim(cs)) {
                Some(claim) => Some(page.arm(claim)),
                None => {
                    log::warn!("{:?} was free but the buffer pool is empty", mob);
                    page.abandon();
                    None
                }
            };
        }
        None
    }
}
