//! # SMU Firmware
//!
//! Hardware specific setup etc.

pub use stm32h7xx_hal as hal;

pub mod analog;
pub mod engine;
pub mod metadata;
pub mod setup;
pub mod timer;
pub mod usb;

/// System timer (RTIC Monotonic) tick frequency
pub const MONOTONIC_FREQUENCY: u32 = 1_000;
rtic_monotonics::systick_monotonic!(Systick, MONOTONIC_FREQUENCY);

pub type UsbBus = stm32h7xx_hal::usb_hs::UsbBus<stm32h7xx_hal::usb_hs::USB2>;

// Type alias for the USB device.
pub type UsbDevice = usb_device::device::UsbDevice<'static, UsbBus>;

pub type Link = usb::BulkLink<'static, UsbBus>;

pub type Controller = crate::control::Controller<timer::SampleTimer2, Link>;

pub type SampleClock = crate::sample_clock::SampleClock<
    engine::OutputEngine,
    engine::ReadbackEngine<hal::stm32::SPI2>,
    engine::ReadbackEngine<hal::stm32::SPI3>,
    engine::ConversionStrobe,
>;
