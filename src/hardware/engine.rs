//! SPI + DMA transfer engines.
//!
//! Every engine is one SPI peripheral driven by DMA1 streams. The streams are reprogrammed on every
//! sample tick since each tick transfers to and from a different packet slot. The HAL DMA
//! `Transfer` type owns a fixed buffer for its whole lifetime, so the streams are programmed at
//! register level instead.
//!
//! DMA1 reaches flash and AXI SRAM but not DTCM. All regions handed to an engine must live in one
//! of those. The data cache is left disabled, so no cache maintenance is required.
use grounded::uninit::GroundedCell;

use super::hal::{
    self,
    gpio::{gpioa::PA4, Output, PushPull},
    stm32,
};
use crate::engine::{Region, RegionMut, SyncLine, Transfer, TransferEngine};

/// Selector byte followed by the output sample.
#[link_section = ".axisram.buffers"]
static OUTPUT_STAGING: GroundedCell<[u8; 3]> = GroundedCell::uninit();

// DMA_SxCR
const CR_EN: u32 = 1 << 0;
const CR_DIR_M2P: u32 = 0b01 << 6;
const CR_MINC: u32 = 1 << 10;
const CR_PL_VERY_HIGH: u32 = 0b11 << 16;

// SPI_CR1
const SPI_SPE: u32 = 1 << 0;
const SPI_CSTART: u32 = 1 << 9;
// SPI_CFG1
const SPI_RXDMAEN: u32 = 1 << 14;
const SPI_TXDMAEN: u32 = 1 << 15;
// SPI_IFCR: all clearable flags
const SPI_IFCR_ALL: u32 = 0xff8;

/// A SPI peripheral usable as a transfer engine.
pub trait SpiInstance {
    const RX_REQUEST: u8;
    const TX_REQUEST: u8;
    fn regs() -> &'static stm32::spi1::RegisterBlock;
}

macro_rules! spi_instance {
    ($spi:ty, $rx:literal, $tx:literal) => {
        impl SpiInstance for $spi {
            const RX_REQUEST: u8 = $rx;
            const TX_REQUEST: u8 = $tx;
            fn regs() -> &'static stm32::spi1::RegisterBlock {
                // Note(unsafe): The engine owns the peripheral.
                unsafe { &*<$spi>::ptr() }
            }
        }
    };
}

spi_instance!(stm32::SPI1, 37, 38);
spi_instance!(stm32::SPI2, 39, 40);
spi_instance!(stm32::SPI3, 61, 62);

/// One DMA1 stream and its DMAMUX1 channel.
pub struct Stream(usize);

impl Stream {
    /// # Safety
    /// Every stream index may only be used once.
    pub unsafe fn new(index: usize) -> Self {
        debug_assert!(index < 8);
        Self(index)
    }

    fn regs(&self) -> &'static stm32::dma1::ST {
        // Note(unsafe): Stream register blocks are owned by exactly one `Stream`.
        unsafe { &(*stm32::DMA1::ptr()).st[self.0] }
    }

    fn init(&self, request: u8, peripheral: u32, to_peripheral: bool) {
        let mux = unsafe { &*stm32::DMAMUX1::ptr() };
        mux.ccr[self.0].write(|w| unsafe { w.bits(request as u32) });
        let st = self.regs();
        st.cr.write(|w| unsafe { w.bits(0) });
        st.par.write(|w| unsafe { w.bits(peripheral) });
        let dir = if to_peripheral { CR_DIR_M2P } else { 0 };
        st.cr
            .write(|w| unsafe { w.bits(dir | CR_MINC | CR_PL_VERY_HIGH) });
    }

    fn clear_flags(&self) {
        let dma = unsafe { &*stm32::DMA1::ptr() };
        let shift = [0, 6, 16, 22][self.0 % 4];
        let mask = 0x3d << shift;
        if self.0 < 4 {
            dma.lifcr.write(|w| unsafe { w.bits(mask) });
        } else {
            dma.hifcr.write(|w| unsafe { w.bits(mask) });
        }
    }

    fn start(&self, addr: u32, len: usize) {
        let st = self.regs();
        st.cr.modify(|r, w| unsafe { w.bits(r.bits() & !CR_EN) });
        self.clear_flags();
        st.m0ar.write(|w| unsafe { w.bits(addr) });
        st.ndtr.write(|w| unsafe { w.bits(len as u32) });
        st.cr.modify(|r, w| unsafe { w.bits(r.bits() | CR_EN) });
    }
}

fn start_spi(spi: &stm32::spi1::RegisterBlock, len: usize, rx: bool) {
    spi.cr1.modify(|r, w| unsafe { w.bits(r.bits() & !SPI_SPE) });
    spi.ifcr.write(|w| unsafe { w.bits(SPI_IFCR_ALL) });
    spi.cr2.write(|w| unsafe { w.bits(len as u32) });
    let dma = SPI_TXDMAEN | if rx { SPI_RXDMAEN } else { 0 };
    spi.cfg1.modify(|r, w| unsafe { w.bits(r.bits() | dma) });
    spi.cr1.modify(|r, w| unsafe { w.bits(r.bits() | SPI_SPE) });
    spi.cr1.modify(|r, w| unsafe { w.bits(r.bits() | SPI_CSTART) });
}

/// Shared output line: DAC channel selector followed by the sample, transmit only.
///
/// STM32 DMA streams cannot chain a second descriptor, so both parts are staged into one
/// contiguous buffer.
pub struct OutputEngine {
    _spi: hal::spi::Spi<stm32::SPI1, hal::spi::Disabled, u8>,
    tx: Stream,
    staging: *mut [u8; 3],
    len: usize,
}

// Note(unsafe): The staging buffer is a static owned by this engine.
unsafe impl Send for OutputEngine {}

impl OutputEngine {
    pub fn new(spi: hal::spi::Spi<stm32::SPI1, hal::spi::Disabled, u8>, tx: Stream) -> Self {
        let regs = stm32::SPI1::regs();
        tx.init(
            stm32::SPI1::TX_REQUEST,
            &regs.txdr as *const _ as u32,
            true,
        );
        // Note(unsafe): Initialized here, only used by this engine afterwards.
        let staging = unsafe {
            OUTPUT_STAGING.get().write([0; 3]);
            OUTPUT_STAGING.get()
        };
        Self {
            _spi: spi,
            tx,
            staging,
            len: 0,
        }
    }
}

impl TransferEngine for OutputEngine {
    fn prepare(&mut self, transfer: Transfer) {
        let Transfer::Write { first, next } = transfer else {
            return;
        };
        // Note(unsafe): The previous transfer completed one sample period ago.
        let staging = unsafe { &mut *self.staging };
        self.len = 0;
        for region in [first, next] {
            let src = unsafe { core::slice::from_raw_parts(region.addr(), region.len()) };
            let end = (self.len + src.len()).min(staging.len());
            staging[self.len..end].copy_from_slice(&src[..end - self.len]);
            self.len = end;
        }
    }

    fn launch(&mut self) {
        if self.len == 0 {
            return;
        }
        self.tx.start(self.staging as u32, self.len);
        start_spi(stm32::SPI1::regs(), self.len, false);
    }
}

/// Read-back converter: configuration word out, sample in.
pub struct ReadbackEngine<SPI: SpiInstance> {
    _spi: hal::spi::Spi<SPI, hal::spi::Disabled, u8>,
    tx: Stream,
    rx: Stream,
    pending: Option<(Region, RegionMut)>,
}

impl<SPI: SpiInstance> ReadbackEngine<SPI> {
    pub fn new(spi: hal::spi::Spi<SPI, hal::spi::Disabled, u8>, tx: Stream, rx: Stream) -> Self {
        let regs = SPI::regs();
        tx.init(SPI::TX_REQUEST, &regs.txdr as *const _ as u32, true);
        rx.init(SPI::RX_REQUEST, &regs.rxdr as *const _ as u32, false);
        Self {
            _spi: spi,
            tx,
            rx,
            pending: None,
        }
    }
}

impl<SPI: SpiInstance> TransferEngine for ReadbackEngine<SPI> {
    fn prepare(&mut self, transfer: Transfer) {
        if let Transfer::Exchange { command, response } = transfer {
            self.pending = Some((command, response));
        }
    }

    fn launch(&mut self) {
        let Some((command, response)) = self.pending.take() else {
            return;
        };
        let len = command.len().min(response.len());
        self.rx.start(response.addr() as u32, len);
        self.tx.start(command.addr() as u32, len);
        start_spi(SPI::regs(), len, true);
    }
}

/// Active low conversion strobe shared by both read-back converters.
pub struct ConversionStrobe(pub PA4<Output<PushPull>>);

impl SyncLine for ConversionStrobe {
    fn assert(&mut self) {
        self.0.set_low();
    }

    fn deassert(&mut self) {
        self.0.set_high();
    }
}
