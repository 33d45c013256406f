//! Hard-real-time bus decoder and button-injection engine for Intex
//! PureSpa control panels.
//!
//! This crate is the hardware-free half of a spa bridge: it turns a
//! stream of CLOCK/DATA/LATCH edge samples into panel state
//! ([`SpaState`]) and turns panel-state change requests into the
//! button-press sequences the panel's own shift-register bus expects.
//! It never touches a GPIO register or blocks on a real clock — the one
//! timing abstraction it needs, [`embedded_hal::delay::DelayNs`], is
//! injected by the caller, so the whole decode/command pipeline is
//! unit-testable on the host.
//!
//! [`bridge::SpaBridge`] is the entry point: one interrupt-context method
//! ([`bridge::SpaBridge::on_clock_edge`]) and a [`command::CommandEngine`]
//! factory for task context.
#![no_std]

pub mod bit_receiver;
pub mod bridge;
pub mod button;
pub mod command;
pub mod digit;
pub mod display;
pub mod error_catalog;
pub mod frame;
pub mod led;
pub mod model;
pub mod state;

pub use bridge::SpaBridge;
pub use button::{ButtonCounters, ButtonKey};
pub use command::{CommandEngine, CommandError};
pub use error_catalog::Lang;
pub use model::Model;
pub use state::SpaState;
