//! SMU hardware configuration
//!
//! This file contains all of the hardware-specific configuration of the SMU.
use rtt_logger::RTTLogger;

use log::info;

use super::{
    analog::{ModeSwitches, SwitchPins},
    engine::{ConversionStrobe, OutputEngine, ReadbackEngine, Stream},
    hal::{self, prelude::*, spi::HalEnabledSpi},
    metadata::ApplicationMetadata,
    timer::SampleTimer2,
    usb::BulkLink,
    Controller, SampleClock, Systick, UsbBus, UsbDevice,
};
use crate::packet::PacketStore;
use crate::pipeline::Pipeline;

/// Converter and DAC serial clock.
const SPI_FREQUENCY: u32 = 25_000_000;

pub struct SmuDevices {
    pub sample_clock: SampleClock,
    pub controller: Controller,
    pub usb: UsbDevice,
    pub switches: ModeSwitches,
    pub metadata: &'static ApplicationMetadata,
}

/// Configure the SMU hardware.
///
/// # Args
/// * `core` - The cortex-m peripherals.
/// * `device` - The microcontroller peripherals to be configured.
/// * `pipeline` - State shared between the sample clock and the controller.
/// * `store` - Packet store in DMA accessible memory.
///
/// # Returns
/// All devices, with sampling stopped and the USB device not yet polled.
pub fn setup(
    mut core: rtic::export::Peripherals,
    device: hal::stm32::Peripherals,
    pipeline: &'static Pipeline,
    store: &'static PacketStore,
) -> SmuDevices {
    static LOGGER: RTTLogger = RTTLogger::new(log::LevelFilter::Info);
    rtt_target::rtt_init_print!();
    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Trace))
        .unwrap();
    info!("---Starting Hardware Setup");

    let pwr = device.PWR.constrain();
    let vos = pwr.freeze();

    // Select the PLLs for SPI.
    device
        .RCC
        .d2ccip1r
        .modify(|_, w| w.spi123sel().pll2_p());

    let rcc = device.RCC.constrain();
    let mut ccdr = rcc
        .use_hse(8.MHz())
        .sysclk(400.MHz())
        .hclk(200.MHz())
        .pll2_p_ck(100.MHz())
        .freeze(vos, &device.SYSCFG);

    // Set up USB clocks.
    ccdr.clocks.hsi48_ck().unwrap();
    ccdr.peripheral
        .kernel_usb_clk_mux(hal::rcc::rec::UsbClkSel::Hsi48);

    Systick::start(core.SYST, ccdr.clocks.sysclk().to_Hz());

    // The data cache stays off: packet buffers are shared with DMA1 and the USB core.
    core.SCB.enable_icache();

    let gpioa = device.GPIOA.split(ccdr.peripheral.GPIOA);
    let gpiob = device.GPIOB.split(ccdr.peripheral.GPIOB);
    let gpioc = device.GPIOC.split(ccdr.peripheral.GPIOC);
    let gpioe = device.GPIOE.split(ccdr.peripheral.GPIOE);

    let _ = ccdr.peripheral.DMA1.enable();

    let sample_timer = SampleTimer2::new(
        device.TIM2,
        ccdr.peripheral.TIM2,
        &ccdr.clocks,
        (gpioa.pa0.into_alternate(), gpioa.pa1.into_alternate()),
    );

    // Note(unsafe): Every stream index is used exactly once.
    let streams = unsafe { [0, 1, 2, 3, 4].map(|i| Stream::new(i)) };
    let [s0, s1, s2, s3, s4] = streams;

    let output = {
        let sck = gpioa.pa5.into_alternate().speed(hal::gpio::Speed::VeryHigh);
        let mosi = gpioa.pa7.into_alternate().speed(hal::gpio::Speed::VeryHigh);
        let spi: hal::spi::Spi<_, _, u8> = device.SPI1.spi(
            (sck, hal::spi::NoMiso, mosi),
            hal::spi::MODE_1,
            SPI_FREQUENCY.Hz(),
            ccdr.peripheral.SPI1,
            &ccdr.clocks,
        );
        OutputEngine::new(spi.disable(), s0)
    };

    let voltage = {
        let sck = gpiob.pb10.into_alternate().speed(hal::gpio::Speed::VeryHigh);
        let miso = gpiob.pb14.into_alternate().speed(hal::gpio::Speed::VeryHigh);
        let mosi = gpiob.pb15.into_alternate().speed(hal::gpio::Speed::VeryHigh);
        let spi: hal::spi::Spi<_, _, u8> = device.SPI2.spi(
            (sck, miso, mosi),
            hal::spi::MODE_0,
            SPI_FREQUENCY.Hz(),
            ccdr.peripheral.SPI2,
            &ccdr.clocks,
        );
        ReadbackEngine::new(spi.disable(), s1, s2)
    };

    let current = {
        let sck = gpioc.pc10.into_alternate().speed(hal::gpio::Speed::VeryHigh);
        let miso = gpioc.pc11.into_alternate().speed(hal::gpio::Speed::VeryHigh);
        let mosi = gpioc.pc12.into_alternate().speed(hal::gpio::Speed::VeryHigh);
        let spi: hal::spi::Spi<_, _, u8> = device.SPI3.spi(
            (sck, miso, mosi),
            hal::spi::MODE_0,
            SPI_FREQUENCY.Hz(),
            ccdr.peripheral.SPI3,
            &ccdr.clocks,
        );
        ReadbackEngine::new(spi.disable(), s3, s4)
    };

    let strobe = {
        let mut pin = gpioa.pa4.into_push_pull_output();
        pin.set_high();
        ConversionStrobe(pin)
    };

    let sample_clock = SampleClock::new(pipeline, store, output, voltage, current, strobe);

    let switches = ModeSwitches::new([
        SwitchPins {
            source_current: gpioe.pe2.into_push_pull_output().erase(),
            disconnect: gpioe.pe3.into_push_pull_output().erase(),
        },
        SwitchPins {
            source_current: gpioe.pe4.into_push_pull_output().erase(),
            disconnect: gpioe.pe5.into_push_pull_output().erase(),
        },
    ]);

    let metadata = ApplicationMetadata::new();

    let (usb, link) = {
        let usb_n = gpioa.pa11.into_alternate();
        let usb_p = gpioa.pa12.into_alternate();
        let usb = hal::usb_hs::USB2::new(
            device.OTG2_HS_GLOBAL,
            device.OTG2_HS_DEVICE,
            device.OTG2_HS_PWRCLK,
            usb_n,
            usb_p,
            ccdr.peripheral.USB2OTG,
            &ccdr.clocks,
        );

        let endpoint_memory =
            cortex_m::singleton!(: [u32; 1024] = [0; 1024]).unwrap();
        let usb_bus = cortex_m::singleton!(: usb_device::bus::UsbBusAllocator<UsbBus> =
            hal::usb_hs::UsbBus::new(usb, &mut endpoint_memory[..]))
        .unwrap();

        let link = BulkLink::new(
            usb_bus,
            [metadata.hardware_version, metadata.firmware_version],
        );

        let usb = usb_device::device::UsbDeviceBuilder::new(
            usb_bus,
            usb_device::device::UsbVidPid(0x064b, 0x784c),
        )
        .strings(&[usb_device::device::StringDescriptors::default()
            .manufacturer("Analog Devices, Inc.")
            .product("SMU")
            .serial_number(metadata.firmware_version)])
        .unwrap()
        .device_class(0xff)
        .build();

        (usb, link)
    };

    let controller = Controller::new(pipeline, store, sample_timer, link);

    info!("--- Hardware setup done");

    SmuDevices {
        sample_clock,
        controller,
        usb,
        switches,
        metadata,
    }
}
