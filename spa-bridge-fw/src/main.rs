//! Spa Bridge Firmware
//!
//! RTIC application that wires [`spa_bridge_core::SpaBridge`] to the
//! CLOCK/DATA/LATCH shift-register bus tapped off an Intex PureSpa control
//! panel, and exposes the resulting [`spa_bridge_core::CommandEngine`] on a
//! UART command line for whatever higher-level collaborator (Wi-Fi/HTTP
//! bridge, test harness, ...) is wired up downstream. For more details, see
//! the `README.md` file.
//!
//! # Licence
//! This source code as a whole is licensed under the GPL v3. Third-party
//! crates are covered by their respective licences.
#![no_main]
#![no_std]

use rtic::app;
use stm32f4xx_hal::{
    gpio::{DynamicPin, Edge, ErasedPin, Input},
    pac,
    prelude::*,
    serial,
};

use spa_bridge_fw as _;

use spa_bridge_core::{ButtonCounters, ButtonKey, CommandEngine, Model, SpaBridge, SpaState};

/// Version string baked in at build time.
static VERSION: &str = env!("CARGO_PKG_VERSION");

/// Model this image is built for. Selected by Cargo feature, matching the
/// core crate's own `Model` values; see `spa-bridge-core::model`.
#[cfg(feature = "model-sjbhs")]
const MODEL: Model = Model::SjbHs;
#[cfg(not(feature = "model-sjbhs"))]
const MODEL: Model = Model::SbH20;

/// How long to wait before driving DATA low for a button reply, and how
/// long to hold it there, expressed as core clock cycles at 84 MHz. Mirrors
/// the `~1 us` / `~2 us` windows from the bus timing contract; tune to the
/// real trace with a logic analyser before trusting it on a new board.
const REPLY_WAIT_CYCLES: u32 = 84;
const REPLY_HOLD_CYCLES: u32 = 168;

/// How often the liveness loop re-checks `online`, in milliseconds. Matches
/// `CYCLE::PERIOD` for the SB-H20/SJB-HS panel's own multiplex rate.
const LIVENESS_POLL_PERIOD_MS: u32 = 21;

/// A wall-clock delay backed by `cortex_m::asm::delay`, calibrated to the
/// system clock at init time. The Command Engine is generic over
/// [`embedded_hal::delay::DelayNs`] precisely so it can run against this on
/// target and a no-op fake in host tests.
pub struct CycleDelay {
    cycles_per_us: u32,
}

impl CycleDelay {
    fn new(sysclk_hz: u32) -> Self {
        CycleDelay {
            cycles_per_us: (sysclk_hz / 1_000_000).max(1),
        }
    }
}

impl embedded_hal::delay::DelayNs for CycleDelay {
    fn delay_ns(&mut self, ns: u32) {
        cortex_m::asm::delay((ns / 1000).max(1) * self.cycles_per_us);
    }

    fn delay_ms(&mut self, ms: u32) {
        cortex_m::asm::delay(ms * 1000 * self.cycles_per_us);
    }
}

#[app(device = crate::pac, peripherals = true, dispatchers = [USART2, USART6])]
mod app {
    use super::*;
    use systick_monotonic::*;

    /// The cross-context view of the panel and its outstanding button
    /// presses. Both are pure `core::sync::atomic` cells (see
    /// `spa_bridge_core::SpaState`/`ButtonCounters`), so they carry no
    /// priority-ceiling requirement of their own; they live as plain
    /// `'static` values rather than RTIC resources precisely so the
    /// priority-4 `clock_edge` task and the priority-1 `liveness_poll`/
    /// `run_command` tasks can all read and write them without a lock.
    static STATE: SpaState = SpaState::new(MODEL);
    static BUTTONS: ButtonCounters = ButtonCounters::new();

    #[shared]
    struct Shared {
        /// Host-facing UART, used only to relay a minimal ASCII command
        /// line into the Command Engine. The real HTTP/SSE/MQTT bridge
        /// this firmware ultimately serves is out of this workspace's
        /// scope; this UART stands in for "some collaborator calls the
        /// control interface". Touched by exactly one task (`usart1_interrupt`),
        /// so it is safe to mark lock-free.
        #[lock_free]
        serial: serial::Serial<pac::USART1>,
    }

    #[local]
    struct Local {
        /// Data line, switched between floating input (decode) and
        /// push-pull output (button reply) on every CLOCK edge that needs
        /// a reply.
        pin_data: DynamicPin<'A', 1>,
        pin_latch: ErasedPin<Input>,
        exti: pac::EXTI,
        /// The bus decoder/injector engine. Every field it owns is either
        /// ISR-private mutable state or a pure `const fn`-built constant;
        /// none of it is an atomic, so it is exclusive to this one task
        /// rather than a shared RTIC resource.
        bridge: SpaBridge,
        cmd_buf: heapless::Vec<u8, 32>,
    }

    #[monotonic(binds = SysTick, default = true)]
    type MyMono = Systick<1000>; // 1 kHz tick = 1 ms resolution

    #[init]
    fn init(ctx: init::Context) -> (Shared, Local, init::Monotonics) {
        defmt::info!("spa-bridge-fw {} booting, model {}", VERSION, MODEL.name());

        let dp = ctx.device;
        let cp = ctx.core;

        let rcc = dp.RCC.constrain();
        let clocks = rcc.cfgr.sysclk(84.mhz()).pclk1(42.mhz()).freeze();

        let mono = Systick::new(cp.SYST, clocks.sysclk().raw());

        let gpioa = dp.GPIOA.split();
        let mut syscfg = dp.SYSCFG.constrain();

        // CLOCK: PA0, interrupt on every rising edge.
        let mut pin_clock = gpioa.pa0.into_floating_input();
        pin_clock.make_interrupt_source(&mut syscfg);
        pin_clock.trigger_on_edge(&mut dp.EXTI, Edge::Rising);
        pin_clock.enable_interrupt(&mut dp.EXTI);

        // DATA: PA1, starts as a floating input; the clock-edge task
        // switches it to push-pull output for the ~2us reply window and
        // switches it straight back, per the button-reply contract.
        let pin_data: DynamicPin<'A', 1> = gpioa.pa1.into_dynamic();

        // LATCH: PA2, plain input, sampled (not interrupt-driven) on every
        // CLOCK edge.
        let pin_latch = gpioa.pa2.into_floating_input().erase();

        let serial = serial::Serial::new(
            dp.USART1,
            (gpioa.pa9.into_alternate(), gpioa.pa10.into_alternate()),
            serial::Config::default().baudrate(115_200.bps()),
            &clocks,
        )
        .unwrap();

        liveness_poll::spawn().unwrap();

        defmt::info!("Init complete!");

        (
            Shared { serial },
            Local {
                pin_data,
                pin_latch,
                exti: dp.EXTI,
                bridge: SpaBridge::new(MODEL),
                cmd_buf: heapless::Vec::new(),
            },
            init::Monotonics(mono),
        )
    }

    #[idle]
    fn idle(_ctx: idle::Context) -> ! {
        loop {
            cortex_m::asm::wfi();
        }
    }

    /// The CLOCK-line task: the hard-real-time heart of the bridge. Bound
    /// to EXTI0 at the highest static priority in this application so it
    /// preempts the liveness/command tasks and can never miss an edge.
    ///
    /// On `Some(key)` the matching button-scan frame was just decoded and
    /// this ISR performs the timed DATA-low reply inline, per the bus's
    /// "reply within one clock period" contract.
    #[task(binds = EXTI0, priority = 4, local = [pin_data, pin_latch, exti, bridge])]
    fn clock_edge(ctx: clock_edge::Context) {
        // Bus is active-low: a low pin level is a logical 1.
        let data = ctx.local.pin_data.is_low().unwrap_or(false);
        let latch_asserted = ctx.local.pin_latch.is_low().unwrap();

        if let Some(key) = ctx
            .local
            .bridge
            .on_clock_edge(data, latch_asserted, &STATE, &BUTTONS)
        {
            reply_button_press(ctx.local.pin_data, key);
        }

        ctx.local.exti.pr.write(|w| w.pr0().set_bit());
    }

    /// §4.5's electrical reply: wait ~1us, drive DATA low for ~2us, return
    /// it to Hi-Z input. Runs inline in the CLOCK ISR for timing fidelity;
    /// do not move this to a spawned task.
    fn reply_button_press(pin_data: &mut DynamicPin<'A', 1>, key: ButtonKey) {
        defmt::trace!("button reply: {}", key);
        cortex_m::asm::delay(REPLY_WAIT_CYCLES);
        pin_data.make_push_pull_output();
        pin_data.set_low().ok();
        cortex_m::asm::delay(REPLY_HOLD_CYCLES);
        pin_data.make_floating_input();
    }

    /// Task-context liveness loop, per §4.6: polls `online` on a
    /// `CYCLE::PERIOD`-ish cadence and logs the transition either way.
    #[task]
    fn liveness_poll(_ctx: liveness_poll::Context) {
        let now_ms = monotonics::now().ticks() as u32;
        if STATE.poll_liveness(now_ms, MODEL.cycle().receive_timeout_ms) {
            if STATE.is_online() {
                defmt::info!("panel online");
            } else {
                defmt::warn!("panel offline: no LED update within the receive timeout");
            }
        }
        liveness_poll::spawn_after(LIVENESS_POLL_PERIOD_MS.millis()).unwrap();
    }

    /// USART1 RX: accumulates one ASCII command line at a time and hands
    /// complete lines to `run_command`, off the hard-real-time path.
    #[task(binds = USART1, shared = [serial], local = [cmd_buf])]
    fn usart1_interrupt(ctx: usart1_interrupt::Context) {
        let byte = match ctx.shared.serial.read() {
            Ok(b) => b,
            Err(_) => return,
        };
        if byte == b'\n' || byte == b'\r' {
            if !ctx.local.cmd_buf.is_empty() {
                let _ = run_command::spawn(ctx.local.cmd_buf.clone());
                ctx.local.cmd_buf.clear();
            }
        } else if ctx.local.cmd_buf.push(byte).is_err() {
            ctx.local.cmd_buf.clear();
        }
    }

    /// Parses and executes one command line against the Command Engine.
    /// Recognises `power on|off`, `filter on|off`, `bubble on|off`,
    /// `heater on|off`, `jet on|off`, `temp <celsius>`, `disinfect <hours>`
    /// — a deliberately small grammar standing in for whatever richer
    /// wire protocol (HTTP/SSE/MQTT) a downstream collaborator speaks.
    #[task(capacity = 4)]
    fn run_command(_ctx: run_command::Context, line: heapless::Vec<u8, 32>) {
        let Ok(text) = core::str::from_utf8(&line) else {
            defmt::warn!("command line was not UTF-8");
            return;
        };
        let mut parts = text.trim().splitn(2, ' ');
        let (Some(verb), arg) = (parts.next(), parts.next()) else {
            return;
        };

        let mut engine: CommandEngine<'_, CycleDelay> =
            CommandEngine::new(&STATE, &BUTTONS, CycleDelay::new(84_000_000));

        match (verb, arg.map(str::trim)) {
            ("power", Some("on")) => _ = engine.set_power_on(true),
            ("power", Some("off")) => _ = engine.set_power_on(false),
            ("filter", Some("on")) => _ = engine.set_filter_on(true),
            ("filter", Some("off")) => _ = engine.set_filter_on(false),
            ("bubble", Some("on")) => _ = engine.set_bubble_on(true),
            ("bubble", Some("off")) => _ = engine.set_bubble_on(false),
            ("heater", Some("on")) => _ = engine.set_heater_on(true),
            ("heater", Some("off")) => _ = engine.set_heater_on(false),
            ("jet", Some("on")) => _ = engine.set_jet_on(true),
            ("jet", Some("off")) => _ = engine.set_jet_on(false),
            ("temp", Some(value)) => match value.parse::<i32>() {
                Ok(celsius) => {
                    if let Err(e) = engine.set_desired_water_temp_celsius(celsius) {
                        defmt::warn!("temp command rejected: {}", defmt::Debug2Format(&e));
                    }
                }
                Err(_) => defmt::warn!("temp command needs an integer argument"),
            },
            ("disinfect", Some(value)) => match value.parse::<i32>() {
                Ok(hours) => {
                    if let Err(e) = engine.set_disinfection_time(hours) {
                        defmt::warn!("disinfect command rejected: {}", defmt::Debug2Format(&e));
                    }
                }
                Err(_) => defmt::warn!("disinfect command needs an integer argument"),
            },
            _ => defmt::warn!("unrecognised command: {}", text),
        }
    }
}
