//! `SpaBridge`: the bus-facing decoder/injector engine an interrupt handler
//! owns exclusively, tying the Bit Receiver, Frame Classifier, Display and
//! LED decoders together, per §6.
//!
//! [`SpaState`] and [`ButtonCounters`] are deliberately *not* owned here.
//! Both are plain `core::sync::atomic` cells with no other state, so they
//! need no priority-ceiling protocol to read and write safely from both
//! interrupt and task context — a firmware integrator holds them as
//! ordinary `'static` values (see `spa-bridge-fw`'s `STATE`/`BUTTONS`
//! statics) and passes `&SpaState`/`&ButtonCounters` into every call here.
//! `SpaBridge` itself touches no atomics and is mutated only from whichever
//! single context owns the CLOCK-line interrupt.

use crate::bit_receiver::{BitOutcome, BitReceiver};
use crate::button::{ButtonCounters, ButtonKey};
use crate::display::DisplayDecoder;
use crate::frame::{classify, FrameKind};
use crate::led::LedDecoder;
use crate::model::Model;
use crate::state::SpaState;

/// Owns every piece of per-bus decoder state. `on_clock_edge` is the single
/// entry point a CLOCK-line interrupt calls on every rising edge.
pub struct SpaBridge {
    model: Model,
    receiver: BitReceiver,
    display: DisplayDecoder,
    led: LedDecoder,
}

impl SpaBridge {
    pub const fn new(model: Model) -> Self {
        let cycle = model.cycle();
        SpaBridge {
            model,
            receiver: BitReceiver::new(),
            display: DisplayDecoder::new(cycle),
            led: LedDecoder::new(cycle),
        }
    }

    pub const fn model(&self) -> Model {
        self.model
    }

    /// Handle one rising CLOCK edge. `data`/`latch_asserted` are the
    /// already-inverted logical levels (see [`BitReceiver::on_rising_edge`]).
    ///
    /// Returns `Some(key)` when a button-scan frame just completed and
    /// the caller (running in the same interrupt context) must now drive
    /// the DATA-low electrical reply for that key.
    pub fn on_clock_edge(
        &mut self,
        data: bool,
        latch_asserted: bool,
        state: &SpaState,
        buttons: &ButtonCounters,
    ) -> Option<ButtonKey> {
        let outcome = self.receiver.on_rising_edge(data, latch_asserted);
        match outcome {
            BitOutcome::Idle | BitOutcome::Assembling => None,
            BitOutcome::FrameDropped => {
                state.record_dropped_frame();
                None
            }
            BitOutcome::FrameComplete(frame) => {
                state.increment_frame_counter();
                self.dispatch(frame, state, buttons)
            }
        }
    }

    fn dispatch(&mut self, frame: u16, state: &SpaState, buttons: &ButtonCounters) -> Option<ButtonKey> {
        let masks = self.model.masks();
        match classify(frame, &masks) {
            FrameKind::Cue | FrameKind::Empty | FrameKind::Unknown => None,
            FrameKind::Digit => {
                let frame_counter = state.frame_counter_snapshot();
                self.display.on_frame(frame, &masks, frame_counter, state);
                None
            }
            FrameKind::Led => {
                self.led.on_frame(frame, state, buttons);
                None
            }
            FrameKind::Button => {
                let buzzer_on = state.buzzer_on();
                buttons.on_button_scan_frame(frame, &masks, self.model, buzzer_on)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_frame(
        bridge: &mut SpaBridge,
        state: &SpaState,
        buttons: &ButtonCounters,
        frame: u16,
    ) -> Option<ButtonKey> {
        let mut last = None;
        for i in 0..16 {
            let bit = (frame >> (15 - i)) & 1 == 1;
            let latch_asserted = i < 15;
            if let Some(key) = bridge.on_clock_edge(bit, latch_asserted, state, buttons) {
                last = Some(key);
            }
        }
        last
    }

    #[test]
    fn a_cue_frame_is_a_no_op() {
        let mut bridge = SpaBridge::new(Model::SbH20);
        let state = SpaState::new(Model::SbH20);
        let buttons = ButtonCounters::new();
        let masks = Model::SbH20.masks();
        assert_eq!(push_frame(&mut bridge, &state, &buttons, masks.cue), None);
        assert_eq!(state.total_frames(), 1);
    }

    #[test]
    fn a_button_scan_frame_with_no_armed_press_yields_no_reply() {
        let mut bridge = SpaBridge::new(Model::SbH20);
        let state = SpaState::new(Model::SbH20);
        let buttons = ButtonCounters::new();
        let masks = Model::SbH20.masks();
        assert_eq!(
            push_frame(&mut bridge, &state, &buttons, masks.button_filter),
            None
        );
    }

    #[test]
    fn an_armed_press_replies_on_the_matching_scan_frame() {
        let mut bridge = SpaBridge::new(Model::SbH20);
        let state = SpaState::new(Model::SbH20);
        let buttons = ButtonCounters::new();
        let masks = Model::SbH20.masks();
        buttons.arm(ButtonKey::Filter, 1);
        assert_eq!(
            push_frame(&mut bridge, &state, &buttons, masks.button_filter),
            Some(ButtonKey::Filter)
        );
    }

    #[test]
    fn dropped_frames_are_counted_separately_from_total_frames() {
        let mut bridge = SpaBridge::new(Model::SbH20);
        let state = SpaState::new(Model::SbH20);
        let buttons = ButtonCounters::new();
        for _ in 0..5 {
            bridge.on_clock_edge(true, true, &state, &buttons);
        }
        bridge.on_clock_edge(true, false, &state, &buttons); // latch loss mid-frame
        assert_eq!(state.dropped_frames(), 1);
        assert_eq!(state.total_frames(), 1);
    }
}
