//! Button Injector: tracks in-flight presses per key and arms the
//! electrical reply when a matching button-scan frame arrives, per §4.5.
//!
//! Counters live in `core::sync::atomic` cells rather than behind a lock
//! because two different execution contexts touch them: the bit-frame
//! interrupt both arms a press (via the Command Engine, which may run at
//! a lower priority) and decrements it (on a scan match), while the LED
//! decoder clears all of them on an unsolicited ack.

use core::sync::atomic::{AtomicU32, Ordering};

use crate::model::{FrameMasks, Model};

/// One physical button on the panel. `TempUnit` is classifiable but never
/// injected — the reference firmware's button decoder has no branch for
/// it either, since nothing ever presses it programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ButtonKey {
    Filter,
    Heater,
    Bubble,
    Power,
    TempUp,
    TempDown,
    /// SJB-HS only.
    Disinfection,
    /// SJB-HS only.
    Jet,
}

/// Per-key in-flight press counters.
#[derive(Debug, Default)]
pub struct ButtonCounters {
    filter: AtomicU32,
    heater: AtomicU32,
    bubble: AtomicU32,
    power: AtomicU32,
    temp_up: AtomicU32,
    temp_down: AtomicU32,
    disinfection: AtomicU32,
    jet: AtomicU32,
}

impl ButtonCounters {
    pub const fn new() -> Self {
        ButtonCounters {
            filter: AtomicU32::new(0),
            heater: AtomicU32::new(0),
            bubble: AtomicU32::new(0),
            power: AtomicU32::new(0),
            temp_up: AtomicU32::new(0),
            temp_down: AtomicU32::new(0),
            disinfection: AtomicU32::new(0),
            jet: AtomicU32::new(0),
        }
    }

    fn cell(&self, key: ButtonKey) -> &AtomicU32 {
        match key {
            ButtonKey::Filter => &self.filter,
            ButtonKey::Heater => &self.heater,
            ButtonKey::Bubble => &self.bubble,
            ButtonKey::Power => &self.power,
            ButtonKey::TempUp => &self.temp_up,
            ButtonKey::TempDown => &self.temp_down,
            ButtonKey::Disinfection => &self.disinfection,
            ButtonKey::Jet => &self.jet,
        }
    }

    /// Start a press: arm `key`'s counter with the number of scan matches
    /// it should reply to before the Command Engine considers it done.
    pub fn arm(&self, key: ButtonKey, count: u32) {
        self.cell(key).store(count, Ordering::Relaxed);
    }

    /// Remaining scan-reply count for `key`; `0` once the press is spent
    /// or was never armed.
    pub fn remaining(&self, key: ButtonKey) -> u32 {
        self.cell(key).load(Ordering::Relaxed)
    }

    /// §4.5's `updateButtonState`: if this key has presses outstanding,
    /// either cancel them (buzzer already sounding — a conflicting ack is
    /// in flight) or consume one and signal that an electrical reply is
    /// due on this scan.
    fn update(&self, key: ButtonKey, buzzer_on: bool) -> bool {
        let cell = self.cell(key);
        let current = cell.load(Ordering::Relaxed);
        if current == 0 {
            return false;
        }
        if buzzer_on {
            cell.store(0, Ordering::Relaxed);
            false
        } else {
            cell.store(current - 1, Ordering::Relaxed);
            true
        }
    }

    /// §4.4: an unsolicited (buzzer-bit) ack clears every outstanding
    /// press, the way the reference firmware's LED decoder does on every
    /// confirmed LED frame with the buzzer bit set.
    pub fn ack_clear_all(&self) {
        self.filter.store(0, Ordering::Relaxed);
        self.heater.store(0, Ordering::Relaxed);
        self.bubble.store(0, Ordering::Relaxed);
        self.power.store(0, Ordering::Relaxed);
        self.temp_up.store(0, Ordering::Relaxed);
        self.temp_down.store(0, Ordering::Relaxed);
        self.disinfection.store(0, Ordering::Relaxed);
        self.jet.store(0, Ordering::Relaxed);
    }

    /// Handle one `Button`-classified frame. Returns the key whose press
    /// this scan just advanced, if the ISR should now drive an electrical
    /// reply on DATA.
    ///
    /// Priority order and button set match the reference firmware's
    /// `decodeButton` exactly for the SB-H20 four masks it defines.
    /// `Disinfection`/`Jet` matching is this crate's own addition: the
    /// reference `decodeButton` has no branch for either even on the
    /// SJB-HS build (see `model.rs`), which would leave a disinfection or
    /// jet press permanently un-acked. Recorded as a deliberate
    /// enrichment in the design notes, not a literal port.
    pub fn on_button_scan_frame(
        &self,
        frame: u16,
        masks: &FrameMasks,
        model: Model,
        buzzer_on: bool,
    ) -> Option<ButtonKey> {
        let key = if frame & masks.button_filter != 0 {
            ButtonKey::Filter
        } else if frame & masks.button_heater != 0 {
            ButtonKey::Heater
        } else if frame & masks.button_bubble != 0 {
            ButtonKey::Bubble
        } else if frame & masks.button_power != 0 {
            ButtonKey::Power
        } else if frame & masks.button_temp_up != 0 {
            ButtonKey::TempUp
        } else if frame & masks.button_temp_down != 0 {
            ButtonKey::TempDown
        } else if model.has_disinfection_and_jet() && frame & masks.button_disinfection != 0 {
            ButtonKey::Disinfection
        } else if model.has_disinfection_and_jet() && frame & masks.button_jet != 0 {
            ButtonKey::Jet
        } else {
            return None;
        };

        self.update(key, buzzer_on).then_some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    #[test]
    fn armed_press_replies_once_per_scan_until_spent() {
        let counters = ButtonCounters::new();
        let masks = Model::SbH20.masks();
        counters.arm(ButtonKey::Filter, 2);

        let frame = masks.button_filter;
        assert_eq!(
            counters.on_button_scan_frame(frame, &masks, Model::SbH20, false),
            Some(ButtonKey::Filter)
        );
        assert_eq!(counters.remaining(ButtonKey::Filter), 1);
        assert_eq!(
            counters.on_button_scan_frame(frame, &masks, Model::SbH20, false),
            Some(ButtonKey::Filter)
        );
        assert_eq!(counters.remaining(ButtonKey::Filter), 0);
        assert_eq!(
            counters.on_button_scan_frame(frame, &masks, Model::SbH20, false),
            None
        );
    }

    #[test]
    fn buzzer_already_sounding_cancels_rather_than_replies() {
        let counters = ButtonCounters::new();
        let masks = Model::SbH20.masks();
        counters.arm(ButtonKey::Power, 5);

        assert_eq!(
            counters.on_button_scan_frame(masks.button_power, &masks, Model::SbH20, true),
            None
        );
        assert_eq!(counters.remaining(ButtonKey::Power), 0);
    }

    #[test]
    fn ack_clear_all_zeroes_every_counter() {
        let counters = ButtonCounters::new();
        counters.arm(ButtonKey::Filter, 3);
        counters.arm(ButtonKey::TempUp, 4);
        counters.ack_clear_all();
        assert_eq!(counters.remaining(ButtonKey::Filter), 0);
        assert_eq!(counters.remaining(ButtonKey::TempUp), 0);
    }

    #[test]
    fn sb_h20_never_matches_disinfection_or_jet_bits() {
        let counters = ButtonCounters::new();
        let masks = Model::SbH20.masks();
        counters.arm(ButtonKey::Disinfection, 1);
        // SB-H20's disinfection/jet masks are both zero, so no frame bit
        // pattern can select them; a zero frame degrades to `None` too.
        assert_eq!(
            counters.on_button_scan_frame(masks.cue, &masks, Model::SbH20, false),
            None
        );
    }

    #[test]
    fn sjb_hs_matches_disinfection_and_jet() {
        let counters = ButtonCounters::new();
        let masks = Model::SjbHs.masks();
        counters.arm(ButtonKey::Jet, 1);
        assert_eq!(
            counters.on_button_scan_frame(masks.button_jet, &masks, Model::SjbHs, false),
            Some(ButtonKey::Jet)
        );
    }
}
