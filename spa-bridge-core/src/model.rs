//! Per-variant bit masks and frame-timing constants.
//!
//! The control board's shift-register protocol is the same across both
//! Intex PureSpa control panels this bridge supports, but the two panels
//! scan a different number of buttons per cycle and the larger panel (the
//! SJB-HS) has two extra front-panel features (disinfection cycle, jet
//! pump) with their own LED and button-scan bits. [`Model`] carries that
//! difference as a value rather than a build-time `#[cfg]`, so a single
//! firmware image can in principle be told at runtime which panel it is
//! talking to.

use bitflags::bitflags;

bitflags! {
    /// Named flags of the LED bitmap frame, per §3. `DISINFECTION` and
    /// `JET` are only ever set in a frame from a `Model::SjbHs` panel; on
    /// `Model::SbH20` their mask bits are simply never assigned (see
    /// `FrameMasks::SB_H20`), so `contains` on them is always `false`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct LedBitmap: u16 {
        const POWER          = 0x0001;
        const HEATER_ON      = 0x0080;
        const NO_BEEP        = 0x0100;
        const HEATER_STANDBY = 0x0200;
        const BUBBLE         = 0x0400;
        const FILTER         = 0x1000;
        /// Inferred SJB-HS extension bit; unused on `Model::SbH20`.
        const DISINFECTION   = 0x0002;
        /// Inferred SJB-HS extension bit; unused on `Model::SbH20`.
        const JET            = 0x0008;
    }
}

/// Which Intex PureSpa control panel this bridge is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Model {
    /// Intex PureSpa SB-H20: filter, heater, bubble, power, temp up/down.
    SbH20,
    /// Intex PureSpa SJB-HS: adds disinfection cycle and jet pump.
    SjbHs,
}

impl Model {
    /// Human-readable model name, as surfaced by `getModelName()` in the
    /// original control interface.
    pub const fn name(self) -> &'static str {
        match self {
            Model::SbH20 => "Intex PureSpa SB-H20",
            Model::SjbHs => "Intex PureSpa SJB-HS",
        }
    }

    /// Number of button-scan frames this panel emits per display cycle.
    const fn button_frames(self) -> u32 {
        match self {
            Model::SbH20 => 7,
            Model::SjbHs => 9,
        }
    }

    /// Does this panel support the disinfection-cycle and jet-pump
    /// features?
    pub const fn has_disinfection_and_jet(self) -> bool {
        matches!(self, Model::SjbHs)
    }

    /// The frame-classification bit masks for this panel.
    pub const fn masks(self) -> FrameMasks {
        match self {
            Model::SbH20 => FrameMasks::SB_H20,
            Model::SjbHs => FrameMasks::SJB_HS,
        }
    }

    /// The derived timing constants for this panel.
    pub const fn cycle(self) -> CycleConstants {
        CycleConstants::for_button_frames(self.button_frames())
    }
}

/// Bit masks identifying each of the four disjoint frame shapes, and the
/// sub-masks within a display or LED frame.
///
/// These values come from the reference control unit's bus trace for the
/// SB-H20 panel. The SJB-HS's `DISINFECTION`/`JET` bit positions are not
/// present in that trace (only the SB-H20 branch of the original firmware
/// fully defines its masks) and are an inferred extension recorded in
/// `DESIGN.md`.
#[derive(Debug, Clone, Copy)]
pub struct FrameMasks {
    /// Synchronisation marker frame; content-free.
    pub cue: u16,
    /// Any digit-position bit is set.
    pub digit: u16,
    /// The LED bitmap frame bit.
    pub led: u16,
    /// Union of every button-scan bit this panel polls (includes `cue`,
    /// matching the reference firmware's own mask construction).
    pub button: u16,

    pub digit_pos_1: u16,
    pub digit_pos_2: u16,
    pub digit_pos_3: u16,
    pub digit_pos_4: u16,
    pub digit_segments: u16,

    pub led_power: LedBitmap,
    pub led_filter: LedBitmap,
    pub led_bubble: LedBitmap,
    pub led_heater_on: LedBitmap,
    pub led_heater_standby: LedBitmap,
    pub led_no_beep: LedBitmap,
    pub led_disinfection: LedBitmap,
    pub led_jet: LedBitmap,

    pub button_filter: u16,
    pub button_heater: u16,
    pub button_bubble: u16,
    pub button_power: u16,
    pub button_temp_up: u16,
    pub button_temp_down: u16,
    pub button_temp_unit: u16,
    pub button_disinfection: u16,
    pub button_jet: u16,
}

impl FrameMasks {
    const CUE: u16 = 0x0100;
    const LED_FRAME_BIT: u16 = 0x4000;

    const DIGIT_POS_1: u16 = 0x0040;
    const DIGIT_POS_2: u16 = 0x0020;
    const DIGIT_POS_3: u16 = 0x0800;
    const DIGIT_POS_4: u16 = 0x0004;
    const DIGIT_SEGMENTS: u16 =
        0x2000 | 0x1000 | 0x0200 | 0x0400 | 0x0080 | 0x0008 | 0x0010;

    const BUTTON_FILTER: u16 = 0x0002;
    const BUTTON_BUBBLE: u16 = 0x0008;
    const BUTTON_TEMP_DOWN: u16 = 0x0080;
    const BUTTON_POWER: u16 = 0x0400;
    const BUTTON_TEMP_UP: u16 = 0x1000;
    const BUTTON_TEMP_UNIT: u16 = 0x2000;
    const BUTTON_HEATER: u16 = 0x8000;
    /// Inferred SJB-HS extension bit: unused by the SB-H20 button mask.
    const BUTTON_DISINFECTION: u16 = 0x0001;
    /// Inferred SJB-HS extension bit: unused by the SB-H20 button mask.
    const BUTTON_JET: u16 = 0x0010;

    const SB_H20: FrameMasks = FrameMasks {
        cue: Self::CUE,
        digit: Self::DIGIT_POS_1 | Self::DIGIT_POS_2 | Self::DIGIT_POS_3 | Self::DIGIT_POS_4,
        led: Self::LED_FRAME_BIT,
        button: Self::CUE
            | Self::BUTTON_FILTER
            | Self::BUTTON_BUBBLE
            | Self::BUTTON_TEMP_DOWN
            | Self::BUTTON_POWER
            | Self::BUTTON_TEMP_UP
            | Self::BUTTON_TEMP_UNIT
            | Self::BUTTON_HEATER,

        digit_pos_1: Self::DIGIT_POS_1,
        digit_pos_2: Self::DIGIT_POS_2,
        digit_pos_3: Self::DIGIT_POS_3,
        digit_pos_4: Self::DIGIT_POS_4,
        digit_segments: Self::DIGIT_SEGMENTS,

        led_power: LedBitmap::POWER,
        led_filter: LedBitmap::FILTER,
        led_bubble: LedBitmap::BUBBLE,
        led_heater_on: LedBitmap::HEATER_ON,
        led_heater_standby: LedBitmap::HEATER_STANDBY,
        led_no_beep: LedBitmap::NO_BEEP,
        led_disinfection: LedBitmap::empty(),
        led_jet: LedBitmap::empty(),

        button_filter: Self::BUTTON_FILTER,
        button_heater: Self::BUTTON_HEATER,
        button_bubble: Self::BUTTON_BUBBLE,
        button_power: Self::BUTTON_POWER,
        button_temp_up: Self::BUTTON_TEMP_UP,
        button_temp_down: Self::BUTTON_TEMP_DOWN,
        button_temp_unit: Self::BUTTON_TEMP_UNIT,
        button_disinfection: 0,
        button_jet: 0,
    };

    const SJB_HS: FrameMasks = FrameMasks {
        button: Self::SB_H20.button | Self::BUTTON_DISINFECTION | Self::BUTTON_JET,
        led_disinfection: LedBitmap::DISINFECTION,
        led_jet: LedBitmap::JET,
        button_disinfection: Self::BUTTON_DISINFECTION,
        button_jet: Self::BUTTON_JET,
        ..Self::SB_H20
    };
}

/// Frame-rate and confirmation-window constants, derived from the panel's
/// button-scan cycle length exactly as the reference firmware derives them
/// (including its integer-truncating division).
#[derive(Debug, Clone, Copy)]
pub struct CycleConstants {
    /// Milliseconds per multiplexed display/button cycle.
    pub period_ms: u32,
    /// How long `online` may go without a LED update before it clears.
    pub receive_timeout_ms: u32,
    /// Confirmation repeats required for a non-blinking steady reading.
    pub confirm_not_blinking: u32,
    /// Confirmation repeats required for everything else (LED, blinking
    /// temperature capture window, regular display stabilisation).
    pub confirm_regular: u32,
    /// Frames since the last blank within which a blinking temperature
    /// candidate is still accepted as "the same edit".
    pub blink_temp_frames: u32,
    /// Frames without a blank after which blinking is considered stopped.
    pub blink_stopped_frames: u32,
    /// Frame count a full-length button press holds for.
    pub button_press_count: u32,
    /// Frame count a short ("nudge") button press holds for.
    pub button_press_short_count: u32,
    /// Milliseconds between ack-polling checks in the Command Engine.
    pub button_ack_check_period_ms: u32,
    /// Milliseconds the Command Engine waits for an ack before giving up.
    pub button_ack_timeout_ms: u32,
}

impl CycleConstants {
    const DISPLAY_FRAME_GROUPS: u32 = 5;
    const BLINK_PERIOD_MS: u32 = 500;
    const PERIOD_MS: u32 = 21;

    const fn for_button_frames(button_frames: u32) -> Self {
        let total_frames = 25 + button_frames;
        // Integer-truncating, exactly as the reference firmware computes it.
        let frame_frequency = total_frames / Self::PERIOD_MS;
        let confirm_regular = 3;
        let confirm_not_blinking =
            Self::BLINK_PERIOD_MS / 2 * frame_frequency / Self::DISPLAY_FRAME_GROUPS;
        let button_press_count = Self::BLINK_PERIOD_MS / Self::PERIOD_MS;
        CycleConstants {
            period_ms: Self::PERIOD_MS,
            receive_timeout_ms: 50 * Self::PERIOD_MS,
            confirm_not_blinking,
            confirm_regular,
            blink_temp_frames: Self::BLINK_PERIOD_MS / 4 * frame_frequency,
            blink_stopped_frames: 2 * Self::BLINK_PERIOD_MS * frame_frequency,
            button_press_count,
            button_press_short_count: 380 / Self::PERIOD_MS,
            button_ack_check_period_ms: 10,
            button_ack_timeout_ms: 2 * button_press_count * Self::PERIOD_MS,
        }
    }
}

/// Legal range for [`crate::command::CommandEngine::set_desired_water_temp_celsius`].
pub mod water_temp {
    /// Lowest settable target temperature, in Celsius.
    pub const SET_MIN: i32 = 20;
    /// Highest settable target temperature, in Celsius.
    pub const SET_MAX: i32 = 40;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sb_h20_cycle_constants_match_reference_firmware() {
        let c = Model::SbH20.cycle();
        assert_eq!(c.confirm_regular, 3);
        assert_eq!(c.confirm_not_blinking, 50);
        assert_eq!(c.button_press_count, 23);
        assert_eq!(c.button_press_short_count, 18);
        assert_eq!(c.button_ack_timeout_ms, 966);
        assert_eq!(c.receive_timeout_ms, 1050);
        assert_eq!(c.blink_temp_frames, 125);
        assert_eq!(c.blink_stopped_frames, 1000);
    }

    #[test]
    fn sjb_hs_cycle_constants_match_sb_h20() {
        // Integer truncation makes frame_frequency == 1 for both panels,
        // so every derived constant is identical despite the different
        // button-scan frame count.
        assert_eq!(
            Model::SbH20.cycle().button_press_count,
            Model::SjbHs.cycle().button_press_count
        );
    }

    #[test]
    fn sb_h20_has_no_disinfection_or_jet() {
        assert!(!Model::SbH20.has_disinfection_and_jet());
        assert!(Model::SjbHs.has_disinfection_and_jet());
    }

    #[test]
    fn sb_h20_masks_leave_disinfection_and_jet_flags_unset() {
        let masks = Model::SbH20.masks();
        assert_eq!(masks.led_disinfection, LedBitmap::empty());
        assert_eq!(masks.led_jet, LedBitmap::empty());
    }

    #[test]
    fn led_bitmap_flags_combine_and_query_independently() {
        let on = LedBitmap::POWER | LedBitmap::FILTER;
        assert!(on.contains(LedBitmap::POWER));
        assert!(on.contains(LedBitmap::FILTER));
        assert!(!on.contains(LedBitmap::NO_BEEP));
        assert!(!on.intersects(LedBitmap::HEATER_ON | LedBitmap::HEATER_STANDBY));
    }
}
