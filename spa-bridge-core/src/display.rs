//! Display Decoder: reassembles the multiplexed 4-digit display into a
//! stable word, distinguishes a blinking setpoint edit from a steady
//! reading, and publishes water temperature, desired temperature,
//! disinfection time and error words, per §4.3 Steps B and C.

use crate::digit::{segment_to_char, DisplayWord};
use crate::model::{CycleConstants, FrameMasks};
use crate::state::SpaState;

const POS_1: u8 = 0b1000;
const POS_2: u8 = 0b0100;
const POS_3: u8 = 0b0010;
const POS_4: u8 = 0b0001;
const POS_1_2: u8 = POS_1 | POS_2;
const POS_1_2_3: u8 = POS_1 | POS_2 | POS_3;
const POS_ALL: u8 = POS_1 | POS_2 | POS_3 | POS_4;

/// How many frames ago, with wraparound-safe unsigned subtraction (the
/// frame counter only ever increases, but may wrap past `u32::MAX` on a
/// long-running unit).
fn frames_since(now: u32, then: u32) -> u32 {
    now.wrapping_sub(then)
}

/// Stateful reassembly of the scanned 4-digit display, per §4.3.
///
/// Owns no hardware access; `on_frame` is called once per classified
/// `Digit` frame with the frame's raw bits, and writes confirmed readings
/// through to [`SpaState`].
#[derive(Debug)]
pub struct DisplayDecoder {
    cycle: CycleConstants,

    display_value: u32,
    received_digits: u8,

    latest_display_value: Option<u32>,
    stable_display_value_count: u32,
    stable_display_blank_count: u32,

    is_blinking: bool,
    last_blank_frame_counter: u32,
    blank_counter: u32,

    latest_water_temp: Option<u32>,
    stable_water_temp_count: u32,

    latest_blinking_temp: Option<u32>,
    stable_blinking_water_temp_count: u32,

    latest_disinfection_time: Option<u32>,
    stable_disinfection_time_count: u32,
}

impl DisplayDecoder {
    pub const fn new(cycle: CycleConstants) -> Self {
        DisplayDecoder {
            stable_display_value_count: cycle.confirm_regular,
            stable_display_blank_count: cycle.confirm_regular,
            stable_water_temp_count: cycle.confirm_not_blinking,
            stable_disinfection_time_count: cycle.confirm_regular,
            cycle,
            display_value: 0,
            received_digits: 0,
            latest_display_value: None,
            is_blinking: false,
            last_blank_frame_counter: 0,
            blank_counter: 0,
            latest_water_temp: None,
            stable_blinking_water_temp_count: 0,
            latest_disinfection_time: None,
        }
    }

    /// Handle one `Digit`-classified frame. `frame_counter` is the
    /// decoder's running tally of accepted frames, used for the
    /// blink-window timing the way the reference firmware uses its own
    /// frame counter.
    pub fn on_frame(
        &mut self,
        frame: u16,
        masks: &FrameMasks,
        frame_counter: u32,
        state: &SpaState,
    ) {
        let Some(glyph) = segment_to_char(frame, masks) else {
            return;
        };

        self.assemble_position(frame, glyph, masks);

        if self.received_digits != POS_ALL {
            return;
        }
        self.received_digits = 0;

        self.confirm_word(frame_counter, state);
    }

    fn assemble_position(&mut self, frame: u16, glyph: char, masks: &FrameMasks) {
        let glyph = glyph as u32;
        if frame & masks.digit_pos_1 != 0 {
            self.display_value = (self.display_value & 0xFFFF_FF00) | glyph;
            self.received_digits = POS_1;
        } else if frame & masks.digit_pos_2 != 0 {
            if self.received_digits == POS_1 {
                self.display_value = (self.display_value & 0xFFFF_00FF) | (glyph << 8);
                self.received_digits |= POS_2;
            }
        } else if frame & masks.digit_pos_3 != 0 {
            if self.received_digits == POS_1_2 {
                self.display_value = (self.display_value & 0xFF00_FFFF) | (glyph << 16);
                self.received_digits |= POS_3;
            }
        } else if frame & masks.digit_pos_4 != 0 && self.received_digits == POS_1_2_3 {
            self.display_value = (self.display_value & 0x00FF_FFFF) | (glyph << 24);
            self.received_digits = POS_ALL;
        }
    }

    /// Step C: a full word has just been assembled this cycle. Decide
    /// whether it repeats the last candidate closely enough to confirm,
    /// or whether it's a new candidate (possibly a blank, which toggles
    /// the blink state machine).
    fn confirm_word(&mut self, frame_counter: u32, state: &SpaState) {
        let word = DisplayWord(self.display_value);

        if self.latest_display_value == Some(self.display_value) {
            self.stable_display_value_count -= 1;
            if self.stable_display_value_count == 0 {
                self.stable_display_value_count = self.cycle.confirm_regular;
                self.on_confirmed(word, frame_counter, state);
            }
        } else if word.is_blank() {
            if self.stable_display_blank_count > 0 {
                self.stable_display_blank_count -= 1;
            } else {
                self.on_blank_confirmed(frame_counter, state);
                self.last_blank_frame_counter = frame_counter;
            }
        } else {
            self.latest_display_value = Some(self.display_value);
            self.stable_display_value_count = self.cycle.confirm_regular;
            self.stable_display_blank_count = self.cycle.confirm_regular;
        }
    }

    fn on_confirmed(&mut self, word: DisplayWord, frame_counter: u32, state: &SpaState) {
        if self.is_blinking
            && frames_since(frame_counter, self.last_blank_frame_counter)
                > self.cycle.blink_stopped_frames
        {
            self.is_blinking = false;
            self.latest_blinking_temp = None;
        }

        if word.is_error() {
            state.publish_error(word.0 & 0x00FF_FFFF);
            return;
        }

        if word.is_temperature() {
            self.confirm_temperature(word, frame_counter, state);
        } else if word.is_time() {
            self.confirm_disinfection_time(word, state);
        }
    }

    fn confirm_temperature(&mut self, word: DisplayWord, frame_counter: u32, state: &SpaState) {
        if self.is_blinking {
            if self.latest_blinking_temp == Some(word.0) {
                self.stable_blinking_water_temp_count += 1;
            } else if frames_since(frame_counter, self.last_blank_frame_counter)
                < self.cycle.blink_temp_frames
            {
                self.latest_blinking_temp = Some(word.0);
                self.stable_blinking_water_temp_count = 0;
            }
        } else if self.latest_water_temp == Some(word.0) {
            self.stable_water_temp_count -= 1;
            if self.stable_water_temp_count == 0 {
                if state.water_temp_raw() != Some(word.0) {
                    state.publish_water_temp(word.0);
                }
                self.stable_water_temp_count = self.cycle.confirm_not_blinking;
            }
        } else {
            self.latest_water_temp = Some(word.0);
            self.stable_water_temp_count = self.cycle.confirm_not_blinking;
        }
    }

    /// **[EXPANDED]** Disinfection-time capture: the panel shows the
    /// selected duration as a steady (never-blinking) time word, so this
    /// mirrors the steady-temperature capture path rather than the
    /// blink-tracking one.
    fn confirm_disinfection_time(&mut self, word: DisplayWord, state: &SpaState) {
        if self.latest_disinfection_time == Some(word.0) {
            self.stable_disinfection_time_count -= 1;
            if self.stable_disinfection_time_count == 0 {
                state.publish_disinfection_time(word.0);
                self.stable_disinfection_time_count = self.cycle.confirm_regular;
            }
        } else {
            self.latest_disinfection_time = Some(word.0);
            self.stable_disinfection_time_count = self.cycle.confirm_regular;
        }
    }

    fn on_blank_confirmed(&mut self, frame_counter: u32, state: &SpaState) {
        if self.is_blinking {
            if self.latest_blinking_temp.is_some() {
                self.blank_counter += 1;
            }
            if state.error_code_raw() == 0
                && self.blank_counter > 2
                && self.stable_blinking_water_temp_count >= self.cycle.confirm_regular
            {
                if let Some(candidate) = self.latest_blinking_temp {
                    if state.desired_temp_raw() != Some(candidate) {
                        state.publish_desired_temp(candidate);
                    }
                }
            }
            self.latest_blinking_temp = None;
            self.stable_blinking_water_temp_count = 0;
        } else {
            self.is_blinking = true;
            self.blank_counter = 0;
        }
        let _ = frame_counter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn digit_frame(masks: &FrameMasks, pos: u16, glyph: char) -> u16 {
        let segment_bits = match glyph {
            ' ' => 0,
            '0' => 0x2000 | 0x1000 | 0x0200 | 0x0400 | 0x0080 | 0x0008,
            '1' => 0x1000 | 0x0200,
            '3' => 0x2000 | 0x1000 | 0x0200 | 0x0400 | 0x0010,
            '8' => 0x2000 | 0x1000 | 0x0200 | 0x0400 | 0x0080 | 0x0008 | 0x0010,
            'C' => 0x2000 | 0x0008 | 0x0080 | 0x0400,
            'H' => 0x1000 | 0x0200 | 0x0080 | 0x0008 | 0x0010,
            other => panic!("unsupported test glyph {other}"),
        };
        pos | (segment_bits & masks.digit_segments)
    }

    fn feed_word(
        decoder: &mut DisplayDecoder,
        masks: &FrameMasks,
        chars: [char; 4],
        frame_counter: &mut u32,
        state: &SpaState,
    ) {
        let positions = [
            masks.digit_pos_1,
            masks.digit_pos_2,
            masks.digit_pos_3,
            masks.digit_pos_4,
        ];
        for (pos, ch) in positions.into_iter().zip(chars) {
            *frame_counter += 1;
            decoder.on_frame(digit_frame(masks, pos, ch), masks, *frame_counter, state);
        }
    }

    #[test]
    fn steady_temperature_confirms_on_final_drain_of_its_stability_counter() {
        // Rather than hand-simulating the ~150 multiplex cycles the real
        // confirm_not_blinking window takes, start one decrement away from
        // the publish edge — the same state a long-stable reading settles
        // into — and confirm the last word triggers the publish.
        let masks = Model::SbH20.masks();
        let state = SpaState::new(Model::SbH20);
        let mut decoder = DisplayDecoder::new(Model::SbH20.cycle());
        let word = DisplayWord::from_chars('0', '3', '8', 'C').0;
        decoder.latest_display_value = Some(word);
        decoder.stable_display_value_count = 1;
        decoder.latest_water_temp = Some(word);
        decoder.stable_water_temp_count = 1;

        let mut frame_counter = 1000u32;
        feed_word(
            &mut decoder,
            &masks,
            ['0', '3', '8', 'C'],
            &mut frame_counter,
            &state,
        );

        assert_eq!(state.act_water_temp_celsius(), 38);
    }

    #[test]
    fn blinking_temperature_promotes_to_desired_after_third_confirmed_blank() {
        // Exercise the promotion branch directly: a blink candidate that
        // has already confirmed stably three times, with the panel now
        // showing its third confirmed blank since that candidate first
        // appeared (the real multiplex sequence this mirrors is
        // candidate-on, blank, candidate-on, blank, candidate-on, blank).
        let masks = Model::SbH20.masks();
        let state = SpaState::new(Model::SbH20);
        let mut decoder = DisplayDecoder::new(Model::SbH20.cycle());
        decoder.is_blinking = true;
        decoder.latest_blinking_temp = Some(DisplayWord::from_chars('0', '4', '0', 'C').0);
        decoder.stable_blinking_water_temp_count = decoder.cycle.confirm_regular;
        decoder.blank_counter = 2;
        decoder.stable_display_blank_count = 0;

        let mut frame_counter = 1000u32;
        feed_word(
            &mut decoder,
            &masks,
            [' ', ' ', ' ', 'C'],
            &mut frame_counter,
            &state,
        );

        assert_eq!(state.desired_water_temp_celsius(), 40);
        assert!(decoder.latest_blinking_temp.is_none());
    }

    #[test]
    fn blink_promotion_is_withheld_below_the_confirmed_blank_threshold() {
        let masks = Model::SbH20.masks();
        let state = SpaState::new(Model::SbH20);
        let mut decoder = DisplayDecoder::new(Model::SbH20.cycle());
        decoder.is_blinking = true;
        decoder.latest_blinking_temp = Some(DisplayWord::from_chars('0', '4', '0', 'C').0);
        decoder.stable_blinking_water_temp_count = decoder.cycle.confirm_regular;
        decoder.blank_counter = 1;
        decoder.stable_display_blank_count = 0;

        let mut frame_counter = 1000u32;
        feed_word(
            &mut decoder,
            &masks,
            [' ', ' ', ' ', 'C'],
            &mut frame_counter,
            &state,
        );

        assert_eq!(
            state.desired_water_temp_celsius(),
            crate::state::UNDEF_CELSIUS
        );
        assert_eq!(decoder.blank_counter, 2);
    }

    #[test]
    fn error_word_publishes_error_code_not_temperature() {
        let masks = Model::SbH20.masks();
        let state = SpaState::new(Model::SbH20);
        let mut decoder = DisplayDecoder::new(Model::SbH20.cycle());
        let mut frame_counter = 0u32;

        for _ in 0..(3 + 1) {
            feed_word(
                &mut decoder,
                &masks,
                ['E', '9', '0', ' '],
                &mut frame_counter,
                &state,
            );
        }

        assert_eq!(&state.error_code().unwrap(), b"E90");
        assert_eq!(state.act_water_temp_celsius(), crate::state::UNDEF_CELSIUS);
    }

    #[test]
    fn out_of_position_digit_is_dropped_until_position_one_restarts() {
        let masks = Model::SbH20.masks();
        let state = SpaState::new(Model::SbH20);
        let mut decoder = DisplayDecoder::new(Model::SbH20.cycle());

        // Feed position 3 first: it must be ignored since received_digits
        // isn't POS_1_2 yet.
        decoder.on_frame(digit_frame(&masks, masks.digit_pos_3, '8'), &masks, 1, &state);
        assert_eq!(decoder.received_digits, 0);

        // Now start properly at position 1.
        decoder.on_frame(digit_frame(&masks, masks.digit_pos_1, '0'), &masks, 2, &state);
        assert_eq!(decoder.received_digits, POS_1);
    }

    #[test]
    fn time_word_confirms_to_disinfection_time() {
        let masks = Model::SbH20.masks();
        let state = SpaState::new(Model::SjbHs);
        let mut decoder = DisplayDecoder::new(Model::SjbHs.cycle());
        let word = DisplayWord::from_chars('0', '0', '8', 'H').0;
        decoder.latest_display_value = Some(word);
        decoder.stable_display_value_count = 1;
        decoder.latest_disinfection_time = Some(word);
        decoder.stable_disinfection_time_count = 1;

        state.publish_led_status(masks.led_disinfection.bits());

        let mut frame_counter = 1000u32;
        feed_word(
            &mut decoder,
            &masks,
            ['0', '0', '8', 'H'],
            &mut frame_counter,
            &state,
        );

        assert_eq!(state.disinfection_time_hours(), 8);
    }
}
