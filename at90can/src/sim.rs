//! Software model of the AT90CAN MOb registers.
//!
//! The controller is shared between the foreground transmit path and the
//! simulated interrupt through cheap clones. Each register access locks the
//! model once, interrupt handlers run with the lock held so they appear
//! atomic to the foreground, just like a real ISR.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use can_bootloader_proto::{CanFrame, MAX_FRAME_LENGTH};

use crate::buffers::{InterruptGate, InterruptState};
use crate::registers::{
    IdentifierRegisters, Mob, MobRegisters, MobSet, AINC, CONMOB0, CONMOB1, DLC_MASK, IDE,
    INDX_MASK, MOBNB_SHIFT, MOB_COUNT, TXOK,
};

/// One register access as seen on the bus to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadPage,
    Page(u8),
    ReadControl,
    Control(u8),
    ReadStatus,
    Status(u8),
    ReadIdentifier,
    Identifier(IdentifierRegisters),
    ReadData,
    Data(u8),
    ReadInterruptEnable,
    InterruptEnable(u8),
    ReadPending,
}

/// Register contents of one MOb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MobSnapshot {
    pub control: u8,
    pub status: u8,
    pub id: IdentifierRegisters,
    pub data: [u8; MAX_FRAME_LENGTH],
}

impl MobSnapshot {
    pub fn dlc(&self) -> usize {
        ((self.control & DLC_MASK) as usize).min(MAX_FRAME_LENGTH)
    }

    pub fn is_transmitting(&self) -> bool {
        self.control & (1 << CONMOB1 | 1 << CONMOB0) == 1 << CONMOB0
            && self.status & (1 << TXOK) == 0
    }

    pub fn frame(&self) -> Option<CanFrame> {
        let id = self.id.to_identifier(self.control & (1 << IDE) != 0);
        CanFrame::new(id, &self.data[..self.dlc()]).ok()
    }
}

#[derive(Debug, Default)]
pub struct SimRegisters {
    canpage: u8,
    mobs: [MobSnapshot; MOB_COUNT as usize],
    canie1: u8,
    log: Vec<Access>,
}

impl SimRegisters {
    fn selected(&mut self) -> &mut MobSnapshot {
        let index = (self.canpage >> MOBNB_SHIFT) as usize;
        debug_assert!(index < MOB_COUNT as usize, "CANPAGE selects no MOb");
        &mut self.mobs[index.min(MOB_COUNT as usize - 1)]
    }

    fn advance_index(&mut self) {
        if self.canpage & (1 << AINC) == 0 {
            let index = (self.canpage + 1) & INDX_MASK;
            self.canpage = self.canpage & !INDX_MASK | index;
        }
    }

    pub fn snapshot(&self, mob: Mob) -> MobSnapshot {
        self.mobs[mob.index() as usize]
    }

    pub fn take_log(&mut self) -> Vec<Access> {
        std::mem::take(&mut self.log)
    }
}

impl MobRegisters for SimRegisters {
    fn canpage(&mut self) -> u8 {
        self.log.push(Access::ReadPage);
        self.canpage
    }

    fn set_canpage(&mut self, value: u8) {
        self.log.push(Access::Page(value));
        self.canpage = value;
    }

    fn control(&mut self) -> u8 {
        self.log.push(Access::ReadControl);
        self.selected().control
    }

    fn set_control(&mut self, value: u8) {
        self.log.push(Access::Control(value));
        self.selected().control = value;
    }

    fn status(&mut self) -> u8 {
        self.log.push(Access::ReadStatus);
        self.selected().status
    }

    fn set_status(&mut self, value: u8) {
        self.log.push(Access::Status(value));
        self.selected().status = value;
    }

    fn identifier(&mut self) -> IdentifierRegisters {
        self.log.push(Access::ReadIdentifier);
        self.selected().id
    }

    fn set_identifier(&mut self, id: IdentifierRegisters) {
        self.log.push(Access::Identifier(id));
        self.selected().id = id;
    }

    fn read_data(&mut self) -> u8 {
        self.log.push(Access::ReadData);
        let index = (self.canpage & INDX_MASK) as usize;
        let byte = self.selected().data[index];
        self.advance_index();
        byte
    }

    fn write_data(&mut self, byte: u8) {
        self.log.push(Access::Data(byte));
        let index = (self.canpage & INDX_MASK) as usize;
        self.selected().data[index] = byte;
        self.advance_index();
    }

    fn interrupt_enable(&mut self) -> u8 {
        self.log.push(Access::ReadInterruptEnable);
        self.canie1
    }

    fn set_interrupt_enable(&mut self, value: u8) {
        self.log.push(Access::InterruptEnable(value));
        self.canie1 = value;
    }

    fn pending(&mut self) -> MobSet {
        self.log.push(Access::ReadPending);
        let mut pending = MobSet::empty();
        for mob in Mob::transmit() {
            let flagged = self.mobs[mob.index() as usize].status & (1 << TXOK) != 0;
            let enabled = mob
                .interrupt_bit()
                .map_or(false, |bit| self.canie1 & bit != 0);
            if flagged && enabled {
                pending.insert(mob);
            }
        }
        pending
    }
}

struct SimState {
    regs: SimRegisters,
    interrupts_enabled: bool,
    critical_sections: usize,
}

/// Cloneable handle to one simulated controller.
#[derive(Clone)]
pub struct SimController {
    state: Arc<Mutex<SimState>>,
}

impl SimController {
    pub fn new() -> SimController {
        SimController {
            state: Arc::new(Mutex::new(SimState {
                regs: SimRegisters::default(),
                interrupts_enabled: true,
                critical_sections: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn gate(&self) -> SimGate {
        SimGate {
            state: self.state.clone(),
        }
    }

    pub fn interrupts_enabled(&self) -> bool {
        self.lock().interrupts_enabled
    }

    pub fn critical_sections(&self) -> usize {
        self.lock().critical_sections
    }

    pub fn take_log(&self) -> Vec<Access> {
        self.lock().regs.take_log()
    }

    pub fn snapshot(&self, mob: Mob) -> MobSnapshot {
        self.lock().regs.snapshot(mob)
    }

    pub fn interrupt_enable_bits(&self) -> u8 {
        self.lock().regs.canie1
    }

    /// Marks a MOb as enabled for reception, so the transmitter skips it.
    pub fn occupy(&self, mob: Mob) {
        self.lock().regs.mobs[mob.index() as usize].control = 1 << CONMOB1;
    }

    /// MObs armed for transmission that have not completed yet.
    pub fn armed_frames(&self) -> Vec<(Mob, CanFrame)> {
        let state = self.lock();
        Mob::transmit()
            .filter_map(|mob| {
                let snapshot = state.regs.snapshot(mob);
                if snapshot.is_transmitting() {
                    snapshot.frame().map(|frame| (mob, frame))
                } else {
                    None
                }
            })
            .collect()
    }

    /// The bus acknowledged the frame of `mob`: sets TXOK.
    pub fn complete(&self, mob: Mob) -> Option<CanFrame> {
        let mut state = self.lock();
        let snapshot = &mut state.regs.mobs[mob.index() as usize];
        if !snapshot.is_transmitting() {
            return None;
        }
        snapshot.status |= 1 << TXOK;
        snapshot.frame()
    }

    pub fn complete_all(&self) -> Vec<(Mob, CanFrame)> {
        Mob::transmit()
            .filter_map(|mob| self.complete(mob).map(|frame| (mob, frame)))
            .collect()
    }

    /// Runs `handler` as an interrupt service routine. Waits while the
    /// foreground holds a critical section.
    pub fn interrupt<F, T>(&self, handler: F) -> T
    where
        F: FnOnce(&mut SimRegisters) -> T,
    {
        loop {
            {
                let mut state = self.lock();
                if state.interrupts_enabled {
                    return handler(&mut state.regs);
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Default for SimController {
    fn default() -> SimController {
        SimController::new()
    }
}

impl MobRegisters for SimController {
    fn canpage(&mut self) -> u8 {
        self.lock().regs.canpage()
    }

    fn set_canpage(&mut self, value: u8) {
        self.lock().regs.set_canpage(value)
    }

    fn control(&mut self) -> u8 {
        self.lock().regs.control()
    }

    fn set_control(&mut self, value: u8) {
        self.lock().regs.set_control(value)
    }

    fn status(&mut self) -> u8 {
        self.lock().regs.status()
    }

    fn set_status(&mut self, value: u8) {
        self.lock().regs.set_status(value)
    }

    fn identifier(&mut self) -> IdentifierRegisters {
        self.lock().regs.identifier()
    }

    fn set_identifier(&mut self, id: IdentifierRegisters) {
        self.lock().regs.set_identifier(id)
    }

    fn read_data(&mut self) -> u8 {
        self.lock().regs.read_data()
    }

    fn write_data(&mut self, byte: u8) {
        self.lock().regs.write_data(byte)
    }

    fn interrupt_enable(&mut self) -> u8 {
        self.lock().regs.interrupt_enable()
    }

    fn set_interrupt_enable(&mut self, value: u8) {
        self.lock().regs.set_interrupt_enable(value)
    }

    fn pending(&mut self) -> MobSet {
        self.lock().regs.pending()
    }
}

/// Global interrupt flag of a [`SimController`].
#[derive(Clone)]
pub struct SimGate {
    state: Arc<Mutex<SimState>>,
}

impl InterruptGate for SimGate {
    fn disable(&self) -> InterruptState {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = state.interrupts_enabled;
        state.interrupts_enabled = false;
        state.critical_sections += 1;
        if previous {
            InterruptState::enabled()
        } else {
            InterruptState::disabled()
        }
    }

    fn restore(&self, previous: InterruptState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.interrupts_enabled = previous.is_enabled();
    }
}
