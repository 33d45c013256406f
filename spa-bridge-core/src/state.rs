//! Spa State: the denoised, source-of-truth view of the panel, written
//! only from interrupt context and read from task context, per §3 and
//! §4.6.

use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, Ordering};

use crate::model::{LedBitmap, Model};

/// Sentinel stored in an `AtomicU32` field to mean "no value has been
/// confirmed yet". Never a legal display-word or temperature encoding.
const UNDEF_U32: u32 = u32::MAX;
/// Sentinel stored in the LED-bitmap `AtomicU16` field.
const UNDEF_U16: u16 = u16::MAX;

/// Degrees-Celsius sentinel returned by the public getters, matching the
/// original control interface's `UNDEF::INT == -99`.
pub const UNDEF_CELSIUS: i32 = -99;

/// The denoised, cross-context view of the panel.
///
/// Every field is a lock-free atomic cell. Interrupt context is the only
/// writer; task context only reads (with the exception of
/// [`SpaState::poll_liveness`] and [`SpaState::record_dropped_frame`]/
/// [`SpaState::increment_frame_counter`], which are called from whichever
/// context owns framing bookkeeping).
#[derive(Debug)]
pub struct SpaState {
    model: Model,

    water_temp: AtomicU32,
    desired_temp: AtomicU32,
    disinfection_time: AtomicU32,
    error: AtomicU32,

    led_status: AtomicU16,
    buzzer: AtomicBool,
    online: AtomicBool,
    state_updated: AtomicBool,

    frame_counter: AtomicU32,
    frame_dropped: AtomicU32,
    last_state_update_ms: AtomicU32,
}

impl SpaState {
    /// A freshly booted state: everything undefined, offline.
    pub const fn new(model: Model) -> Self {
        SpaState {
            model,
            water_temp: AtomicU32::new(UNDEF_U32),
            desired_temp: AtomicU32::new(UNDEF_U32),
            disinfection_time: AtomicU32::new(UNDEF_U32),
            error: AtomicU32::new(0),
            led_status: AtomicU16::new(UNDEF_U16),
            buzzer: AtomicBool::new(false),
            online: AtomicBool::new(false),
            state_updated: AtomicBool::new(false),
            frame_counter: AtomicU32::new(0),
            frame_dropped: AtomicU32::new(0),
            last_state_update_ms: AtomicU32::new(0),
        }
    }

    pub const fn model(&self) -> Model {
        self.model
    }

    // --- framing bookkeeping (§4.1, §4.2, §8 invariant 1) -------------

    pub(crate) fn increment_frame_counter(&self) {
        self.frame_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dropped_frame(&self) {
        self.frame_dropped.fetch_add(1, Ordering::Relaxed);
        self.frame_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn total_frames(&self) -> u32 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    pub fn dropped_frames(&self) -> u32 {
        self.frame_dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn frame_counter_snapshot(&self) -> u32 {
        self.frame_counter.load(Ordering::Relaxed)
    }

    // --- display decoder writes ----------------------------------------

    pub(crate) fn publish_water_temp(&self, raw_word: u32) {
        self.water_temp.store(raw_word, Ordering::Relaxed);
    }

    pub(crate) fn publish_desired_temp(&self, raw_word: u32) {
        self.desired_temp.store(raw_word, Ordering::Relaxed);
    }

    pub(crate) fn publish_disinfection_time(&self, raw_word: u32) {
        self.disinfection_time.store(raw_word, Ordering::Relaxed);
    }

    pub(crate) fn publish_error(&self, code: u32) {
        self.error.store(code, Ordering::Relaxed);
    }

    pub(crate) fn desired_temp_raw(&self) -> Option<u32> {
        match self.desired_temp.load(Ordering::Relaxed) {
            UNDEF_U32 => None,
            raw => Some(raw),
        }
    }

    pub(crate) fn water_temp_raw(&self) -> Option<u32> {
        match self.water_temp.load(Ordering::Relaxed) {
            UNDEF_U32 => None,
            raw => Some(raw),
        }
    }

    pub(crate) fn error_code_raw(&self) -> u32 {
        self.error.load(Ordering::Relaxed)
    }

    // --- LED decoder writes ---------------------------------------------

    pub(crate) fn publish_led_status(&self, bitmap: u16) {
        self.led_status.store(bitmap, Ordering::Relaxed);
        let buzzer = self.is_buzzer_bit_clear(bitmap);
        self.buzzer.store(buzzer, Ordering::Relaxed);
        self.state_updated.store(true, Ordering::Relaxed);
    }

    fn is_buzzer_bit_clear(&self, bitmap: u16) -> bool {
        !LedBitmap::from_bits_retain(bitmap).intersects(self.model.masks().led_no_beep)
    }

    pub(crate) fn led_status_raw(&self) -> Option<u16> {
        match self.led_status.load(Ordering::Relaxed) {
            UNDEF_U16 => None,
            raw => Some(raw),
        }
    }

    // --- liveness (§4.6) -------------------------------------------------

    /// Called periodically from task context (nominally every
    /// `CYCLE::PERIOD`). Returns whether `online` changed.
    pub fn poll_liveness(&self, now_ms: u32, receive_timeout_ms: u32) -> bool {
        if self.state_updated.swap(false, Ordering::Relaxed) {
            self.last_state_update_ms.store(now_ms, Ordering::Relaxed);
            !self.online.swap(true, Ordering::Relaxed)
        } else if self.online.load(Ordering::Relaxed) {
            let last = self.last_state_update_ms.load(Ordering::Relaxed);
            if now_ms.wrapping_sub(last) > receive_timeout_ms {
                self.online.store(false, Ordering::Relaxed);
                true
            } else {
                false
            }
        } else {
            false
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::Relaxed)
    }

    // --- public getters (§6) ---------------------------------------------

    pub fn buzzer_on(&self) -> bool {
        self.buzzer.load(Ordering::Relaxed)
    }

    pub fn error_code(&self) -> Option<[u8; 3]> {
        let raw = self.error.load(Ordering::Relaxed);
        if raw == 0 {
            None
        } else {
            Some(raw.to_le_bytes()[0..3].try_into().expect("3 bytes"))
        }
    }

    /// `getErrorMessage`: the current error code rendered in `lang`, or
    /// `None` while the panel has no error latched at all.
    pub fn error_message(&self, lang: crate::error_catalog::Lang) -> Option<&'static str> {
        crate::error_catalog::message(self.error_code()?, lang)
    }

    pub fn act_water_temp_celsius(&self) -> i32 {
        match self.water_temp.load(Ordering::Relaxed) {
            UNDEF_U32 => UNDEF_CELSIUS,
            raw => convert_display_word_to_celsius(crate::digit::DisplayWord(raw))
                .unwrap_or(UNDEF_CELSIUS),
        }
    }

    pub fn desired_water_temp_celsius(&self) -> i32 {
        match self.desired_temp.load(Ordering::Relaxed) {
            UNDEF_U32 => UNDEF_CELSIUS,
            raw => convert_display_word_to_celsius(crate::digit::DisplayWord(raw))
                .unwrap_or(UNDEF_CELSIUS),
        }
    }

    /// `0` when the panel has confirmed disinfection is off, `-99`
    /// (`UNDEF_CELSIUS`) while either that LED or the duration reading is
    /// still unconfirmed, else the number of hours. Matches the original's
    /// `isDisinfectionOn() ? (... : UNDEF) : 0` — a *definite* off is the
    /// only thing that short-circuits to zero; an unconfirmed LED state is
    /// treated the same as "on" (truthy in the original's `UCHAR_MAX`
    /// sentinel) and falls through to the duration check.
    pub fn disinfection_time_hours(&self) -> i32 {
        if self.is_disinfection_on() == Some(false) {
            return 0;
        }
        match self.disinfection_time.load(Ordering::Relaxed) {
            UNDEF_U32 => UNDEF_CELSIUS,
            raw => crate::digit::DisplayWord(raw)
                .numeric_value()
                .map(|v| v as i32)
                .unwrap_or(UNDEF_CELSIUS),
        }
    }

    fn led_flag(&self, mask: LedBitmap) -> Option<bool> {
        self.led_status_raw()
            .map(|bitmap| LedBitmap::from_bits_retain(bitmap).intersects(mask))
    }

    pub fn is_power_on(&self) -> Option<bool> {
        self.led_flag(self.model.masks().led_power)
    }

    pub fn is_filter_on(&self) -> Option<bool> {
        self.led_flag(self.model.masks().led_filter)
    }

    pub fn is_bubble_on(&self) -> Option<bool> {
        self.led_flag(self.model.masks().led_bubble)
    }

    pub fn is_heater_on(&self) -> Option<bool> {
        let masks = self.model.masks();
        self.led_flag(masks.led_heater_on | masks.led_heater_standby)
    }

    pub fn is_heater_standby(&self) -> Option<bool> {
        self.led_flag(self.model.masks().led_heater_standby)
    }

    /// `Some(false)` on a model without a disinfection cycle at all
    /// (mirroring [`SpaState::is_jet_on`]'s "no such feature" reading),
    /// otherwise the LED flag verbatim — `None` while the LED bitmap
    /// itself hasn't been confirmed yet.
    pub fn is_disinfection_on(&self) -> Option<bool> {
        if !self.model.has_disinfection_and_jet() {
            return Some(false);
        }
        self.led_flag(self.model.masks().led_disinfection)
    }

    pub fn is_jet_on(&self) -> Option<bool> {
        if !self.model.has_disinfection_and_jet() {
            return Some(false);
        }
        self.led_flag(self.model.masks().led_jet)
    }

    pub fn raw_led_value(&self) -> Option<u16> {
        self.led_status_raw()
    }
}

/// §4.3: convert a confirmed temperature word to Celsius, applying the
/// Fahrenheit conversion and the `[0, 60]` sanity window. Returns `None`
/// for anything outside that window or with an unrecognised unit
/// character.
pub(crate) fn convert_display_word_to_celsius(word: crate::digit::DisplayWord) -> Option<i32> {
    let value = word.numeric_value()? as i32;
    let celsius = match word.pos4() {
        'C' => value,
        'F' => libm_round_div(value - 32, 5, 9),
        _ => return None,
    };
    if (0..=60).contains(&celsius) {
        Some(celsius)
    } else {
        None
    }
}

/// `round((numerator * mul) / div)` using only integer arithmetic, for
/// `no_std` targets without a libm dependency. Equivalent to
/// `round(((f - 32) * 5) / 9)` for the Fahrenheit conversion.
fn libm_round_div(numerator: i32, mul: i32, div: i32) -> i32 {
    let scaled = numerator * mul;
    let double = scaled * 2;
    let div2 = div * 2;
    // Round-half-away-from-zero at the .5 boundary, matching `round()`.
    if scaled >= 0 {
        (double + div) / div2
    } else {
        (double - div) / div2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digit::DisplayWord;

    #[test]
    fn fahrenheit_conversion_matches_round_half_up() {
        // 104F -> (104-32)*5/9 = 40.0
        let w = DisplayWord::from_chars('1', '0', '4', 'F');
        assert_eq!(convert_display_word_to_celsius(w), Some(40));
    }

    #[test]
    fn celsius_word_passes_through() {
        let w = DisplayWord::from_chars('0', '3', '8', 'C');
        assert_eq!(convert_display_word_to_celsius(w), Some(38));
    }

    #[test]
    fn out_of_range_temperature_is_undefined() {
        let w = DisplayWord::from_chars('9', '9', '9', 'C');
        assert_eq!(convert_display_word_to_celsius(w), None);
    }

    #[test]
    fn non_temperature_unit_is_undefined() {
        let w = DisplayWord::from_chars('0', '3', '8', 'H');
        assert_eq!(convert_display_word_to_celsius(w), None);
    }

    #[test]
    fn disinfection_time_is_undefined_until_the_led_bitmap_is_confirmed() {
        // Matches the original's `isDisinfectionOn() ? ... : 0`: the
        // sentinel "not yet known" LED reading is truthy in that ternary,
        // not falsy, so an unconfirmed LED bitmap must not read as "off".
        let s = SpaState::new(Model::SjbHs);
        assert_eq!(s.disinfection_time_hours(), UNDEF_CELSIUS);
    }

    #[test]
    fn disinfection_time_is_zero_once_the_led_confirms_off() {
        let masks = Model::SjbHs.masks();
        let s = SpaState::new(Model::SjbHs);
        s.publish_led_status(masks.led_power.bits()); // disinfection bit clear
        assert_eq!(s.disinfection_time_hours(), 0);
    }

    #[test]
    fn sb_h20_has_no_disinfection_cycle_and_always_reads_zero_hours() {
        let s = SpaState::new(Model::SbH20);
        assert_eq!(s.is_disinfection_on(), Some(false));
        assert_eq!(s.disinfection_time_hours(), 0);
    }

    #[test]
    fn fresh_state_reports_undefined_everywhere() {
        let s = SpaState::new(Model::SbH20);
        assert_eq!(s.act_water_temp_celsius(), UNDEF_CELSIUS);
        assert_eq!(s.desired_water_temp_celsius(), UNDEF_CELSIUS);
        assert_eq!(s.is_power_on(), None);
        assert!(!s.is_online());
        assert_eq!(s.error_code(), None);
    }

    #[test]
    fn error_message_resolves_through_the_catalogue_in_the_requested_language() {
        use crate::error_catalog::Lang;

        let s = SpaState::new(Model::SbH20);
        assert_eq!(s.error_message(Lang::En), None);

        s.publish_error(DisplayWord::from_chars('E', '9', '0', ' ').0 & 0x00FF_FFFF);
        assert_eq!(s.error_message(Lang::En), Some("no water flow"));
        assert_eq!(s.error_message(Lang::De), Some("kein Wasserdurchfluss"));
        assert_eq!(s.error_message(Lang::Code), Some("E90"));
    }

    #[test]
    fn liveness_requires_state_updates_within_the_timeout() {
        let s = SpaState::new(Model::SbH20);
        s.publish_led_status(0);
        assert!(s.poll_liveness(0, 1050));
        assert!(s.is_online());
        assert!(!s.poll_liveness(500, 1050));
        assert!(s.poll_liveness(2000, 1050));
        assert!(!s.is_online());
    }
}
