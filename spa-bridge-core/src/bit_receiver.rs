//! Bit Receiver: reassembles 16-bit frames bit-by-bit from clock edges, per
//! §4.1.
//!
//! This is hardware-free on purpose: it takes the already-sampled data and
//! latch levels as plain booleans and returns an outcome, so the firmware's
//! interrupt handler is a thin adapter and this logic is unit-testable on
//! the host.

/// Number of bits in one frame.
pub const BITS: u8 = 16;

/// What happened on a single rising CLOCK edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BitOutcome {
    /// Nothing to do: we're between frames and latch is not asserted.
    Idle,
    /// The bit was accepted into the in-progress frame.
    Assembling,
    /// A full 16-bit frame was assembled; the accumulator has been reset.
    FrameComplete(u16),
    /// Latch was de-asserted mid-frame (after at least one bit but before
    /// the last); the partial frame is discarded and the accumulator reset.
    FrameDropped,
}

/// Shift-register bit assembler for the spa panel's CLOCK/DATA/LATCH bus.
#[derive(Debug, Default)]
pub struct BitReceiver {
    accumulator: u16,
    bits_received: u8,
}

impl BitReceiver {
    /// A fresh receiver, as at boot.
    pub const fn new() -> Self {
        BitReceiver {
            accumulator: 0,
            bits_received: 0,
        }
    }

    /// Handle one rising CLOCK edge.
    ///
    /// `data` is the already-inverted logical bit (the bus is active-low,
    /// so callers pass `!data_pin_level`). `latch_asserted` is likewise the
    /// already-inverted logical gate state.
    ///
    /// The final bit of a frame is accepted even after latch has just
    /// de-asserted — do not simplify this to a latch-only gate; see the
    /// design notes.
    pub fn on_rising_edge(&mut self, data: bool, latch_asserted: bool) -> BitOutcome {
        if latch_asserted || self.bits_received == BITS - 1 {
            self.accumulator = (self.accumulator << 1) | (data as u16);
            self.bits_received += 1;

            if self.bits_received == BITS {
                let frame = self.accumulator;
                self.reset();
                BitOutcome::FrameComplete(frame)
            } else {
                BitOutcome::Assembling
            }
        } else if (1..=BITS - 2).contains(&self.bits_received) {
            self.reset();
            BitOutcome::FrameDropped
        } else {
            BitOutcome::Idle
        }
    }

    fn reset(&mut self) {
        self.accumulator = 0;
        self.bits_received = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_bits(receiver: &mut BitReceiver, bits: &[bool]) -> Option<u16> {
        let mut last = None;
        for (i, &bit) in bits.iter().enumerate() {
            let latch_asserted = i < bits.len() - 1 || bits.len() < BITS as usize;
            match receiver.on_rising_edge(bit, latch_asserted) {
                BitOutcome::FrameComplete(frame) => last = Some(frame),
                _ => {}
            }
        }
        last
    }

    #[test]
    fn assembles_a_full_frame_msb_first() {
        let mut r = BitReceiver::new();
        // 0b0000_0000_0000_0101 = 5, sent MSB-first with latch held low
        // (asserted) throughout.
        let mut value: u16 = 0;
        for i in 0..16 {
            let bit = (5u16 >> (15 - i)) & 1 == 1;
            let outcome = r.on_rising_edge(bit, true);
            if let BitOutcome::FrameComplete(frame) = outcome {
                value = frame;
            }
        }
        assert_eq!(value, 5);
    }

    #[test]
    fn accepts_final_bit_after_latch_deasserts() {
        let mut r = BitReceiver::new();
        for i in 0..15 {
            let bit = (0xBEEFu16 >> (15 - i)) & 1 == 1;
            assert_eq!(r.on_rising_edge(bit, true), BitOutcome::Assembling);
        }
        // Latch de-asserts exactly on the 16th bit; it must still be
        // accepted because bits_received == BITS - 1.
        let last_bit = 0xBEEFu16 & 1 == 1;
        assert_eq!(
            r.on_rising_edge(last_bit, false),
            BitOutcome::FrameComplete(0xBEEF)
        );
    }

    #[test]
    fn mid_frame_latch_loss_drops_the_frame() {
        let mut r = BitReceiver::new();
        for _ in 0..5 {
            r.on_rising_edge(true, true);
        }
        assert_eq!(r.on_rising_edge(true, false), BitOutcome::FrameDropped);
        // Receiver is clean afterwards.
        for _ in 0..15 {
            assert_eq!(r.on_rising_edge(false, true), BitOutcome::Assembling);
        }
        assert_eq!(r.on_rising_edge(false, true), BitOutcome::FrameComplete(0));
    }

    #[test]
    fn idle_clock_edges_between_frames_are_ignored() {
        let mut r = BitReceiver::new();
        assert_eq!(r.on_rising_edge(false, false), BitOutcome::Idle);
        assert_eq!(r.on_rising_edge(true, false), BitOutcome::Idle);
    }

    #[test]
    fn helper_matches_manual_assembly() {
        let mut r = BitReceiver::new();
        let bits: [bool; 16] = [
            false, false, false, false, false, false, false, false, false, false, false, false,
            false, true, false, true,
        ];
        assert_eq!(feed_bits(&mut r, &bits), Some(0b101));
    }
}
