use crate::buffers::FreeBuffers;
use crate::registers::{Mob, MobRegisters, MobSet};

/// CAN interrupt service for finished transmissions.
///
/// Frees every transmit MOb with a pending interrupt and returns its buffer
/// to the pool. CANPAGE is saved and restored, the foreground may be in the
/// middle of loading a MOb.
pub fn on_transmit_complete<R>(regs: &mut R, buffers: &FreeBuffers) -> MobSet
where
    R: MobRegisters + ?Sized,
{
    let saved_page = regs.canpage();
    let pending = regs.pending();

    let mut serviced = MobSet::empty();
    for mob in Mob::transmit().filter(|mob| pending.contains(*mob)) {
        regs.select(mob);

        let status = regs.status();
        regs.set_status(status & 0);
        regs.set_control(0);

        if let Some(bit) = mob.interrupt_bit() {
            let enabled = regs.interrupt_enable();
            regs.set_interrupt_enable(enabled & !bit);
        }

        buffers.release();
        serviced.insert(mob);
    }

    regs.set_canpage(saved_page);

    if !serviced.is_empty() {
        log::trace!("Transmission complete on {:?}", serviced.iter().collect::<Vec<_>>());
    }
    serviced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::InterruptGate;
    use crate::registers::{CONMOB0, TXOK};
    use crate::sim::SimController;

    fn mob(index: u8) -> Mob {
        Mob::new(index).unwrap()
    }

    fn arm(sim: &mut SimController, buffers: &FreeBuffers, index: u8) {
        let gate = sim.gate();
        sim.select(mob(index));
        let enabled = sim.interrupt_enable();
        sim.set_interrupt_enable(enabled | mob(index).interrupt_bit().unwrap());
        assert!(gate.free(|cs| buffers.claim(cs)).is_some());
        sim.set_control(1 << CONMOB0 | 4);
    }

    #[test]
    fn frees_completed_mobs_and_buffers() {
        let mut sim = SimController::new();
        let buffers = FreeBuffers::default();
        arm(&mut sim, &buffers, 8);
        arm(&mut sim, &buffers, 11);
        arm(&mut sim, &buffers, 12);
        assert_eq!(buffers.available(), 4);

        sim.complete(mob(8));
        sim.complete(mob(12));
        let serviced = sim.interrupt(|regs| on_transmit_complete(regs, &buffers));

        assert_eq!(serviced.iter().collect::<Vec<_>>(), vec![mob(8), mob(12)]);
        assert_eq!(buffers.available(), 6);
        assert_eq!(sim.snapshot(mob(8)).control, 0);
        assert_eq!(sim.snapshot(mob(8)).status, 0);
        assert_eq!(sim.snapshot(mob(11)).control, 1 << CONMOB0 | 4);
        assert_eq!(sim.interrupt_enable_bits(), 0x08);
    }

    #[test]
    fn restores_the_foreground_page() {
        let mut sim = SimController::new();
        let buffers = FreeBuffers::default();
        arm(&mut sim, &buffers, 9);
        sim.complete(mob(9));

        // foreground halfway through loading MOb 13
        sim.select(mob(13));
        sim.write_data(0x21);
        sim.write_data(0x41);

        sim.interrupt(|regs| on_transmit_complete(regs, &buffers));
        assert_eq!(sim.canpage(), 0xd2);
    }

    #[test]
    fn receive_mobs_are_left_alone() {
        let mut sim = SimController::new();
        let buffers = FreeBuffers::new(7);
        sim.select(mob(3));
        sim.set_control(1 << CONMOB0 | 1);
        sim.set_status(1 << TXOK);

        let serviced = sim.interrupt(|regs| on_transmit_complete(regs, &buffers));
        assert!(serviced.is_empty());
        assert_eq!(sim.snapshot(mob(3)).status, 1 << TXOK);
        assert_eq!(buffers.available(), 7);
    }
}
