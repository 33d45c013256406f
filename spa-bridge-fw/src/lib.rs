//! Board support shell for `spa-bridge-fw`.
//!
//! Mirrors the Neotron BMC firmware crates this workspace is built from:
//! `main.rs` does `use spa_bridge_fw as _;` purely to pull in the panic
//! handler and the `defmt-rtt` logging transport, and never calls anything
//! in this crate directly.
#![no_std]

use defmt_rtt as _;
use panic_probe as _;

/// Bridges `defmt`'s panic message into `panic-probe`'s handler so a panic
/// on target prints through RTT before resetting, exactly as the BMC
/// firmware crates wire it up.
#[defmt::panic_handler]
fn defmt_panic() -> ! {
    panic!()
}

/// `cortex-m`'s hard-fault handler just logs and spins; there is no
/// watchdog on this board to recover a button-reply ISR that never
/// returns, and a spa bridge fainting silently is worse than one parked
/// visibly in the debugger.
#[cortex_m_rt::exception]
unsafe fn HardFault(frame: &cortex_m_rt::ExceptionFrame) -> ! {
    defmt::error!("HardFault: {:?}", defmt::Debug2Format(frame));
    cortex_m::asm::udf()
}
