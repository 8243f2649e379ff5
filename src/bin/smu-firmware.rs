//! # SMU Firmware
//!
//! Streaming firmware for a two-channel source-measure unit.
//!
//! The host streams output levels to the device and receives the voltage and current readback of
//! both channels in fixed-size bulk packets over USB.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

#[cfg(target_os = "none")]
use panic_probe as _; // global panic handler

use serde::Serialize;
use smu_firmware::{
    control::MIN_PERIOD,
    packet::{Layout, HALF_PACKET, IN_PACKET_SIZE, OUT_PACKET_SIZE, SAMPLES_PER_PACKET},
};

/// Stream geometry, as seen by the host.
#[derive(Serialize)]
struct Geometry {
    samples_per_packet: usize,
    half_packet: usize,
    in_packet_size: usize,
    out_packet_size: usize,
    min_period: u16,
    layouts: [Layout; 2],
}

const GEOMETRY: Geometry = Geometry {
    samples_per_packet: SAMPLES_PER_PACKET,
    half_packet: HALF_PACKET,
    in_packet_size: IN_PACKET_SIZE,
    out_packet_size: OUT_PACKET_SIZE,
    min_period: MIN_PERIOD,
    layouts: [Layout::Contiguous, Layout::Interleaved],
};

#[cfg(not(target_os = "none"))]
fn main() {
    println!(
        "{}",
        serde_json_core::to_string::<_, 512>(&GEOMETRY).unwrap()
    );
}

#[cfg(target_os = "none")]
#[rtic::app(device = hal::stm32, peripherals = true, dispatchers=[DCMI, JPEG])]
mod app {
    use super::*;
    use fugit::ExtU32;
    use grounded::uninit::GroundedCell;
    use smu_firmware::command::Request;
    use smu_firmware::hardware::{
        analog::ModeSwitches, hal, setup::setup, timer, usb::frame_number, Controller,
        SampleClock, Systick, UsbDevice,
    };
    use smu_firmware::packet::PacketStore;
    use smu_firmware::pipeline::Pipeline;
    use usb_device::device::UsbDeviceState;

    /// Telemetry log period in seconds.
    const REPORT_PERIOD: u32 = 5;

    static PIPELINE: Pipeline = Pipeline::new();

    #[link_section = ".axisram.buffers"]
    static STORE: GroundedCell<PacketStore> = GroundedCell::uninit();

    #[shared]
    struct Shared {}

    #[local]
    struct Local {
        sample_clock: SampleClock,
        controller: Controller,
        usb: UsbDevice,
        switches: ModeSwitches,
    }

    #[init]
    fn init(c: init::Context) -> (Shared, Local) {
        // Note(unsafe): The store is initialized exactly once, before any interrupt is unmasked.
        let store: &'static PacketStore = unsafe {
            STORE.get().write(PacketStore::new());
            &*STORE.get()
        };

        let smu = setup(c.core, c.device, &PIPELINE, store);
        log::info!(
            "{} {} on {}",
            smu.metadata.app,
            smu.metadata.firmware_version,
            smu.metadata.hardware_version
        );

        report::spawn().unwrap();

        (
            Shared {},
            Local {
                sample_clock: smu.sample_clock,
                controller: smu.controller,
                usb: smu.usb,
                switches: smu.switches,
            },
        )
    }

    #[idle(local=[controller, usb, switches])]
    fn idle(c: idle::Context) -> ! {
        let controller = c.local.controller;
        let usb = c.local.usb;
        let switches = c.local.switches;
        let mut configured = false;
        let mut frame = frame_number();
        loop {
            usb.poll(&mut [controller.link_mut()]);

            let state = usb.state() == UsbDeviceState::Configured;
            if state != configured {
                configured = state;
                if configured {
                    controller.enable();
                } else {
                    controller.disable();
                }
            }

            while let Some(request) = controller.link_mut().take_request() {
                match request {
                    Request::SetMode { channel, mode } => switches.set(channel, mode),
                    Request::ConfigureSampling {
                        period,
                        start_frame,
                    } => controller.configure(period, start_frame),
                    Request::SetInterleave(interleaved) => {
                        controller.set_layout_mode(interleaved)
                    }
                    // Answered in the control transfer.
                    Request::Info(_) | Request::FrameNumber => {}
                }
            }

            let now = frame_number();
            if now != frame {
                frame = now;
                controller.on_frame(frame);
            }

            controller.service_main_loop();
        }
    }

    #[task(priority = 1)]
    async fn report(_c: report::Context) {
        loop {
            let status = PIPELINE.status();
            match serde_json_core::to_string::<_, 256>(&status) {
                Ok(json) => log::info!("{}", json.as_str()),
                Err(e) => log::warn!("Status serialization: {e:?}"),
            }
            Systick::delay(REPORT_PERIOD.secs()).await;
        }
    }

    #[task(binds = TIM2, priority = 3, local=[sample_clock])]
    fn sample(c: sample::Context) {
        timer::acknowledge();
        c.local.sample_clock.service();
    }
}
