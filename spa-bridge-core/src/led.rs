//! LED Decoder: stabilises the LED bitmap frame before publishing it,
//! derives the buzzer/ack signal from the bitmap, and clears outstanding
//! button presses on every ack, per §4.4.

use crate::button::ButtonCounters;
use crate::model::CycleConstants;
use crate::state::SpaState;

/// Stateful reassembly of the LED-bitmap frame.
#[derive(Debug)]
pub struct LedDecoder {
    confirm_regular: u32,
    latest_led_status: Option<u16>,
    stable_led_status_count: u32,
}

impl LedDecoder {
    pub const fn new(cycle: CycleConstants) -> Self {
        LedDecoder {
            confirm_regular: cycle.confirm_regular,
            latest_led_status: None,
            stable_led_status_count: cycle.confirm_regular,
        }
    }

    /// Handle one `Led`-classified frame's raw bits.
    pub fn on_frame(&mut self, frame: u16, state: &SpaState, buttons: &ButtonCounters) {
        if self.latest_led_status == Some(frame) {
            self.stable_led_status_count -= 1;
            if self.stable_led_status_count == 0 {
                state.publish_led_status(frame);
                self.stable_led_status_count = self.confirm_regular;
                if state.buzzer_on() {
                    buttons.ack_clear_all();
                }
            }
        } else {
            self.latest_led_status = Some(frame);
            self.stable_led_status_count = self.confirm_regular;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn led_bitmap_confirms_after_repeats_and_derives_buzzer() {
        let state = SpaState::new(Model::SbH20);
        let buttons = ButtonCounters::new();
        let mut decoder = LedDecoder::new(Model::SbH20.cycle());
        let masks = Model::SbH20.masks();

        let bitmap = (masks.led_power | masks.led_filter).bits();
        for _ in 0..(3 + 1) {
            decoder.on_frame(bitmap, &state, &buttons);
        }

        assert_eq!(state.raw_led_value(), Some(bitmap));
        assert_eq!(state.is_power_on(), Some(true));
        // NO_BEEP bit is clear in `bitmap`, so the buzzer is sounding.
        assert!(state.buzzer_on());
    }

    #[test]
    fn no_beep_bit_set_means_buzzer_is_quiet() {
        let state = SpaState::new(Model::SbH20);
        let buttons = ButtonCounters::new();
        let mut decoder = LedDecoder::new(Model::SbH20.cycle());
        let masks = Model::SbH20.masks();

        let bitmap = (masks.led_power | masks.led_no_beep).bits();
        for _ in 0..(3 + 1) {
            decoder.on_frame(bitmap, &state, &buttons);
        }

        assert!(!state.buzzer_on());
    }

    #[test]
    fn buzzer_ack_clears_outstanding_button_presses() {
        use crate::button::ButtonKey;

        let state = SpaState::new(Model::SbH20);
        let buttons = ButtonCounters::new();
        buttons.arm(ButtonKey::Filter, 5);
        let mut decoder = LedDecoder::new(Model::SbH20.cycle());
        let masks = Model::SbH20.masks();

        // NO_BEEP clear => buzzer sounds => every outstanding press is
        // cleared on this confirm, matching the reference firmware's
        // reading of a fresh ack as "a key was accepted".
        let bitmap = masks.led_power.bits();
        for _ in 0..(3 + 1) {
            decoder.on_frame(bitmap, &state, &buttons);
        }

        assert_eq!(buttons.remaining(ButtonKey::Filter), 0);
    }
}
