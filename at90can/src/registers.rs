//! Message object (MOb) register access.
//!
//! The AT90CAN controller exposes its 15 MObs through a paged register
//! window: CANPAGE selects the MOb, after which CANCDMOB, CANSTMOB,
//! CANIDT1..4 and CANMSG refer to that MOb. Writes are order sensitive,
//! CANMSG in particular advances the data index of the page on every access.

use std::fmt;
use std::marker::PhantomData;

use can_bootloader_proto::{Identifier, MAX_FRAME_LENGTH};

use crate::buffers::Claim;

pub const MOB_COUNT: u8 = 15;
pub const FIRST_TX_MOB: u8 = 8;
pub const TX_MOB_COUNT: u8 = MOB_COUNT - FIRST_TX_MOB;

// CANCDMOB
pub const CONMOB1: u8 = 7;
pub const CONMOB0: u8 = 6;
pub const IDE: u8 = 4;
pub const DLC_MASK: u8 = 0x0f;

// CANSTMOB
pub const TXOK: u8 = 6;

// CANPAGE
pub const MOBNB_SHIFT: u8 = 4;
pub const AINC: u8 = 3;
pub const INDX_MASK: u8 = 0x07;

/// Index of a hardware message object, always below [`MOB_COUNT`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Mob(u8);

impl Mob {
    pub fn new(index: u8) -> Option<Mob> {
        if index < MOB_COUNT {
            Some(Mob(index))
        } else {
            None
        }
    }

    /// The MObs reserved for transmission, lowest index first.
    pub fn transmit() -> impl Iterator<Item = Mob> + Clone {
        (FIRST_TX_MOB..MOB_COUNT).map(Mob)
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn is_transmit(self) -> bool {
        self.0 >= FIRST_TX_MOB
    }

    /// CANPAGE value selecting this MOb with the data index reset to 0.
    pub fn page(self) -> u8 {
        self.0 << MOBNB_SHIFT
    }

    pub fn from_page(canpage: u8) -> Option<Mob> {
        Mob::new(canpage >> MOBNB_SHIFT)
    }

    /// Bit of this MOb in CANIE1. Only transmit MObs have one.
    pub fn interrupt_bit(self) -> Option<u8> {
        if self.is_transmit() {
            Some(1 << (self.0 - FIRST_TX_MOB))
        } else {
            None
        }
    }
}

impl fmt::Debug for Mob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MOb{}", self.0)
    }
}

/// Bitmap with one bit per MOb, laid out like CANSIT2:CANSIT1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MobSet(u16);

impl MobSet {
    pub fn empty() -> MobSet {
        MobSet(0)
    }

    pub fn from_bits(bits: u16) -> MobSet {
        MobSet(bits & ((1 << MOB_COUNT) - 1))
    }

    pub fn bits(&self) -> u16 {
        self.0
    }

    pub fn insert(&mut self, mob: Mob) {
        self.0 |= 1 << mob.0;
    }

    pub fn contains(&self, mob: Mob) -> bool {
        self.0 & (1 << mob.0) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Mob> + '_ {
        (0..MOB_COUNT).map(Mob).filter(move |mob| self.contains(*mob))
    }
}

/// Contents of CANIDT1..CANIDT4 for the selected MOb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdentifierRegisters {
    pub idt1: u8,
    pub idt2: u8,
    pub idt3: u8,
    pub idt4: u8,
}

impl IdentifierRegisters {
    /// Reads the registers back, `extended` is the IDE bit of CANCDMOB.
    pub fn to_identifier(&self, extended: bool) -> Identifier {
        if extended {
            Identifier::Extended(
                (self.idt1 as u32) << 21
                    | (self.idt2 as u32) << 13
                    | (self.idt3 as u32) << 5
                    | (self.idt4 as u32) >> 3,
            )
        } else {
            Identifier::Standard((self.idt1 as u16) << 3 | (self.idt2 as u16) >> 5)
        }
    }
}

impl From<Identifier> for IdentifierRegisters {
    fn from(id: Identifier) -> IdentifierRegisters {
        match id {
            Identifier::Standard(id) => IdentifierRegisters {
                idt1: (id >> 3) as u8,
                idt2: (id << 5) as u8,
                idt3: 0,
                idt4: 0,
            },
            Identifier::Extended(id) => IdentifierRegisters {
                idt1: (id >> 21) as u8,
                idt2: (id >> 13) as u8,
                idt3: (id >> 5) as u8,
                idt4: (id << 3) as u8,
            },
        }
    }
}

/// Raw access to the paged MOb registers of one CAN controller.
///
/// Every call is a single register access with side effects. Reads take
/// `&mut self` because some of them (CANMSG) advance hardware state.
pub trait MobRegisters {
    fn canpage(&mut self) -> u8;
    fn set_canpage(&mut self, value: u8);

    /// CANCDMOB of the selected MOb.
    fn control(&mut self) -> u8;
    fn set_control(&mut self, value: u8);

    /// CANSTMOB of the selected MOb.
    fn status(&mut self) -> u8;
    fn set_status(&mut self, value: u8);

    fn identifier(&mut self) -> IdentifierRegisters;
    /// Writes CANIDT4, CANIDT3, CANIDT2 and CANIDT1, in that order.
    fn set_identifier(&mut self, id: IdentifierRegisters);

    /// CANMSG, both directions advance the data index.
    fn read_data(&mut self) -> u8;
    fn write_data(&mut self, byte: u8);

    /// CANIE1, the interrupt enables of MOb 8 to 14.
    fn interrupt_enable(&mut self) -> u8;
    fn set_interrupt_enable(&mut self, value: u8);

    /// CANSIT2:CANSIT1, MObs with a pending interrupt.
    fn pending(&mut self) -> MobSet;

    fn select(&mut self, mob: Mob) {
        self.set_canpage(mob.page());
    }
}

pub struct Selected;
pub struct Cleared;
pub struct Loading;
pub struct Armable;

/// Programming sequence for one transmit MOb.
///
/// Each step consumes the page and hands back the next state, so the
/// hardware ordering (select, clear status, identifier, data, interrupt
/// enable, arm) cannot be reordered or skipped.
#[must_use]
pub struct MobPage<'a, R: MobRegisters + ?Sized, S> {
    regs: &'a mut R,
    mob: Mob,
    written: u8,
    _state: PhantomData<S>,
}

impl<'a, R: MobRegisters + ?Sized, S> MobPage<'a, R, S> {
    fn next<T>(self) -> MobPage<'a, R, T> {
        MobPage {
            regs: self.regs,
            mob: self.mob,
            written: self.written,
            _state: PhantomData,
        }
    }
}

impl<'a, R: MobRegisters + ?Sized> MobPage<'a, R, Selected> {
    pub fn select(regs: &'a mut R, mob: Mob) -> Self {
        regs.select(mob);
        MobPage {
            regs,
            mob,
            written: 0,
            _state: PhantomData,
        }
    }

    /// Neither CONMOB bit set: the MOb is disabled and may be claimed.
    pub fn is_free(&mut self) -> bool {
        self.regs.control() & (1 << CONMOB1 | 1 << CONMOB0) == 0
    }

    /// The flags must be cleared with a read-write cycle.
    pub fn clear_status(self) -> MobPage<'a, R, Cleared> {
        let status = self.regs.status();
        self.regs.set_status(status & 0);
        self.next()
    }
}

impl<'a, R: MobRegisters + ?Sized> MobPage<'a, R, Cleared> {
    pub fn write_identifier(self, id: IdentifierRegisters) -> MobPage<'a, R, Loading> {
        self.regs.set_identifier(id);
        self.next()
    }
}

impl<'a, R: MobRegisters + ?Sized> MobPage<'a, R, Loading> {
    pub fn write_data(mut self, bytes: &[u8]) -> Self {
        debug_assert!(self.written as usize + bytes.len() <= MAX_FRAME_LENGTH);
        for byte in bytes {
            self.regs.write_data(*byte);
            self.written += 1;
        }
        self
    }

    pub fn enable_interrupt(self) -> MobPage<'a, R, Armable> {
        if let Some(bit) = self.mob.interrupt_bit() {
            let enabled = self.regs.interrupt_enable();
            self.regs.set_interrupt_enable(enabled | bit);
        }
        self.next()
    }
}

impl<'a, R: MobRegisters + ?Sized> MobPage<'a, R, Armable> {
    /// Bytes loaded into CANMSG so far, the DLC the MOb will be armed with.
    pub fn dlc(&self) -> u8 {
        self.written
    }

    /// Starts the transmission. Requires the free buffer this MOb occupies.
    pub fn arm(self, claim: Claim) -> Mob {
        claim.consume();
        let dlc = self.dlc();
        self.regs.set_control(1 << CONMOB0 | (dlc & DLC_MASK));
        self.mob
    }

    /// Leaves the MOb disabled and masks its interrupt again.
    pub fn abandon(self) -> Mob {
        if let Some(bit) = self.mob.interrupt_bit() {
            let enabled = self.regs.interrupt_enable();
            self.regs.set_interrupt_enable(enabled & !bit);
        }
        self.mob
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transmit_mobs_ascend_from_eight() {
        let indices: Vec<u8> = Mob::transmit().map(Mob::index).collect();
        assert_eq!(indices, vec![8, 9, 10, 11, 12, 13, 14]);
        assert_eq!(Mob::transmit().count(), TX_MOB_COUNT as usize);
    }

    #[test]
    fn mob_index_is_bounded() {
        assert!(Mob::new(14).is_some());
        assert!(Mob::new(15).is_none());
    }

    #[test]
    fn page_and_interrupt_bits() {
        let mob = Mob::new(10).unwrap();
        assert_eq!(mob.page(), 0xa0);
        assert_eq!(Mob::from_page(0xa3), Some(mob));
        assert_eq!(mob.interrupt_bit(), Some(0x04));
        assert_eq!(Mob::new(3).unwrap().interrupt_bit(), None);
    }

    #[test]
    fn bootloader_identifier_layout() {
        let regs = IdentifierRegisters::from(Identifier::Standard(0x7fe));
        assert_eq!(
            regs,
            IdentifierRegisters {
                idt1: 0xff,
                idt2: 0xc0,
                idt3: 0,
                idt4: 0
            }
        );
        assert_eq!(regs.to_identifier(false), Identifier::Standard(0x7fe));
    }

    #[test]
    fn extended_identifier_layout() {
        let id = Identifier::Extended(0x18_21_ff_01);
        let regs = IdentifierRegisters::from(id);
        assert_eq!(regs.idt4 & 0x07, 0);
        assert_eq!(regs.to_identifier(true), id);
    }

    #[test]
    fn mob_set_iterates_in_order() {
        let mut set = MobSet::empty();
        set.insert(Mob::new(12).unwrap());
        set.insert(Mob::new(8).unwrap());
        assert_eq!(set.len(), 2);
        assert_eq!(set.bits(), 0x1100);
        let mobs: Vec<u8> = set.iter().map(Mob::index).collect();
        assert_eq!(mobs, vec![8, 12]);
        assert_eq!(MobSet::from_bits(0xffff).len(), 15);
    }

    #[test]
    fn armed_dlc_counts_loaded_bytes() {
        use crate::buffers::{FreeBuffers, InterruptGate};
        use crate::sim::SimController;

        let mut sim = SimController::new();
        let gate = sim.gate();
        let buffers = FreeBuffers::default();
        let mob = Mob::new(9).unwrap();

        let page = MobPage::select(&mut sim, mob)
            .clear_status()
            .write_identifier(Identifier::Standard(0x7fe).into())
            .write_data(&[0x21, 0x41, 0x00, 0x80])
            .write_data(&[0xaa, 0xbb])
            .enable_interrupt();
        assert_eq!(page.dlc(), 6);

        let claim = gate.free(|cs| buffers.claim(cs)).unwrap();
        assert_eq!(page.arm(claim), mob);

        let snapshot = sim.snapshot(mob);
        assert_eq!(snapshot.control, 1 << CONMOB0 | 6);
        assert_eq!(snapshot.dlc(), 6);
        assert_eq!(&snapshot.data[..6], &[0x21, 0x41, 0x00, 0x80, 0xaa, 0xbb]);
    }
}
