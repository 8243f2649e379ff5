//! Serial transfer engine abstraction.
//!
//! A transfer engine is one byte-serial peripheral together with the DMA machinery that lets it
//! run a short transfer without CPU involvement. The sample clock only ever asks for two shapes
//! of transfer, so the engine API is limited to exactly those.
use bytemuck::Pod;

/// Memory read by an engine.
///
/// A region is a raw view: it does not borrow the memory it points to. The code that builds a
/// region is responsible for keeping the memory owned (and unaliased by writers) until the
/// transfer using it has completed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Region {
    addr: *const u8,
    len: usize,
}

impl Region {
    pub fn new<T: Pod>(data: &T) -> Self {
        let bytes = bytemuck::bytes_of(data);
        Self {
            addr: bytes.as_ptr(),
            len: bytes.len(),
        }
    }

    pub fn addr(&self) -> *const u8 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Memory written by an engine.
///
/// Same ownership rules as [Region].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionMut {
    addr: *mut u8,
    len: usize,
}

impl RegionMut {
    pub fn new<T: Pod>(data: &mut T) -> Self {
        let bytes = bytemuck::bytes_of_mut(data);
        Self {
            addr: bytes.as_mut_ptr(),
            len: bytes.len(),
        }
    }

    pub fn addr(&self) -> *mut u8 {
        self.addr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// Note(unsafe): A region is only an address range. Using it requires ownership of the memory,
// not of the region.
unsafe impl Send for Region {}
unsafe impl Send for RegionMut {}

/// A transfer description.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transfer {
    /// Transmit `first`, then `next` back to back, receiving nothing.
    Write { first: Region, next: Region },
    /// Transmit `command` while clocking the response into `response`.
    ///
    /// Both regions have the same length.
    Exchange { command: Region, response: RegionMut },
}

/// One serial transfer engine.
///
/// `prepare()` only loads descriptors. Nothing is clocked before `launch()`, which lets the
/// caller start all engines of a tick with minimal skew.
pub trait TransferEngine {
    fn prepare(&mut self, transfer: Transfer);
    fn launch(&mut self);
}

/// Converter sync/strobe line shared by both read-back converters.
///
/// The line is active low. The converters sample on the rising edge of `deassert()` and shift
/// out the result while the line is asserted.
pub trait SyncLine {
    fn assert(&mut self);
    fn deassert(&mut self);
}
