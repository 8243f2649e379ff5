//! Host transfer packets and their ping-pong store.
//!
//! # Design
//! A packet holds `SAMPLES_PER_PACKET` slots. Every slot carries one output level per channel
//! (outbound) or one voltage/current read-back pair per channel (inbound). Two layouts are
//! supported on the wire:
//!
//! * [Layout::Contiguous]: every channel and quantity occupies its own run of samples.
//! * [Layout::Interleaved]: all samples of one slot are adjacent, in time order.
//!
//! Both layouts are typed views ([bytemuck::Pod]) over the same storage, so they share one size
//! and one sample count by construction. Sample addressing goes through the named fields of the
//! views instead of stride arithmetic on raw pointers.
//!
//! The [PacketStore] owns two packets per direction. Which half belongs to the sample clock and
//! which to the host link is tracked by [crate::pipeline::Pipeline]; the store itself only hands
//! out raw pointers to the owner.
use bytemuck::{Pod, Zeroable};
use core::cell::UnsafeCell;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::channel::Channel;

/// A raw converter sample in wire byte order.
pub type Sample = u16;

/// Slots (A+B sample pairs) per packet.
pub const SAMPLES_PER_PACKET: usize = 256;

/// Slot at which the next outbound packet is requested from the host.
pub const HALF_PACKET: usize = SAMPLES_PER_PACKET / 2;

const IN_WORDS: usize = SAMPLES_PER_PACKET * 4;
const OUT_WORDS: usize = SAMPLES_PER_PACKET * 2;

/// Inbound packet size in bytes.
pub const IN_PACKET_SIZE: usize = core::mem::size_of::<InPacket>();

/// Outbound packet size in bytes.
pub const OUT_PACKET_SIZE: usize = core::mem::size_of::<OutPacket>();

/// Sample ordering within a packet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Layout {
    #[default]
    Contiguous,
    Interleaved,
}

impl From<bool> for Layout {
    /// Construct from the host's `interleaved` flag.
    fn from(interleaved: bool) -> Self {
        if interleaved {
            Self::Interleaved
        } else {
            Self::Contiguous
        }
    }
}

/// One of the two ping-pong halves of a direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive, Serialize)]
#[repr(u8)]
pub enum Half {
    Zero = 0,
    One = 1,
}

impl Half {
    pub fn other(self) -> Self {
        match self {
            Self::Zero => Self::One,
            Self::One => Self::Zero,
        }
    }
}

/// Voltage and current read back for one channel in one slot.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Readback<T> {
    pub voltage: T,
    pub current: T,
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ChannelRun {
    voltage: [Sample; SAMPLES_PER_PACKET],
    current: [Sample; SAMPLES_PER_PACKET],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ContiguousIn {
    a: ChannelRun,
    b: ChannelRun,
}

/// `[A.voltage, A.current, B.voltage, B.current]` per slot.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct InterleavedIn {
    slots: [[Sample; 4]; SAMPLES_PER_PACKET],
}

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct ContiguousOut {
    a: [Sample; SAMPLES_PER_PACKET],
    b: [Sample; SAMPLES_PER_PACKET],
}

/// `[A, B]` per slot.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
struct InterleavedOut {
    slots: [[Sample; 2]; SAMPLES_PER_PACKET],
}

const _: () = assert!(
    core::mem::size_of::<ContiguousIn>() == core::mem::size_of::<InterleavedIn>()
        && core::mem::size_of::<ContiguousOut>() == core::mem::size_of::<InterleavedOut>()
);

/// Measured samples sent to the host.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct InPacket {
    words: [Sample; IN_WORDS],
}

impl InPacket {
    pub const ZERO: Self = Self {
        words: [0; IN_WORDS],
    };

    /// Locate the read-back pair of `channel` in `slot`.
    pub fn readback_mut(
        &mut self,
        layout: Layout,
        channel: Channel,
        slot: usize,
    ) -> Readback<&mut Sample> {
        match layout {
            Layout::Contiguous => {
                let view: &mut ContiguousIn = bytemuck::cast_mut(self);
                let run = match channel {
                    Channel::A => &mut view.a,
                    Channel::B => &mut view.b,
                };
                Readback {
                    voltage: &mut run.voltage[slot],
                    current: &mut run.current[slot],
                }
            }
            Layout::Interleaved => {
                let view: &mut InterleavedIn = bytemuck::cast_mut(self);
                let [a_v, a_i, b_v, b_i] = &mut view.slots[slot];
                match channel {
                    Channel::A => Readback {
                        voltage: a_v,
                        current: a_i,
                    },
                    Channel::B => Readback {
                        voltage: b_v,
                        current: b_i,
                    },
                }
            }
        }
    }

    pub fn readback(&self, layout: Layout, channel: Channel, slot: usize) -> Readback<Sample> {
        match layout {
            Layout::Contiguous => {
                let view: &ContiguousIn = bytemuck::cast_ref(self);
                let run = match channel {
                    Channel::A => &view.a,
                    Channel::B => &view.b,
                };
                Readback {
                    voltage: run.voltage[slot],
                    current: run.current[slot],
                }
            }
            Layout::Interleaved => {
                let view: &InterleavedIn = bytemuck::cast_ref(self);
                let pair = &view.slots[slot][2 * channel as usize..][..2];
                Readback {
                    voltage: pair[0],
                    current: pair[1],
                }
            }
        }
    }

    /// Flat view in wire order.
    pub fn words(&self) -> &[Sample] {
        &self.words
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }
}

/// Output levels received from the host.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct OutPacket {
    words: [Sample; OUT_WORDS],
}

impl OutPacket {
    pub const ZERO: Self = Self {
        words: [0; OUT_WORDS],
    };

    /// Output level of `channel` in `slot`.
    pub fn level(&self, layout: Layout, channel: Channel, slot: usize) -> &Sample {
        match layout {
            Layout::Contiguous => {
                let view: &ContiguousOut = bytemuck::cast_ref(self);
                match channel {
                    Channel::A => &view.a[slot],
                    Channel::B => &view.b[slot],
                }
            }
            Layout::Interleaved => {
                let view: &InterleavedOut = bytemuck::cast_ref(self);
                &view.slots[slot][channel as usize]
            }
        }
    }

    pub fn level_mut(&mut self, layout: Layout, channel: Channel, slot: usize) -> &mut Sample {
        match layout {
            Layout::Contiguous => {
                let view: &mut ContiguousOut = bytemuck::cast_mut(self);
                match channel {
                    Channel::A => &mut view.a[slot],
                    Channel::B => &mut view.b[slot],
                }
            }
            Layout::Interleaved => {
                let view: &mut InterleavedOut = bytemuck::cast_mut(self);
                &mut view.slots[slot][channel as usize]
            }
        }
    }

    /// Flat view in wire order.
    pub fn words(&self) -> &[Sample] {
        &self.words
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::bytes_of_mut(self)
    }
}

/// Two packets per direction.
///
/// The store does not track ownership. Every access goes through a raw pointer that only the
/// current owner of a half (see [crate::pipeline::Pipeline]) may dereference.
pub struct PacketStore {
    inbound: [UnsafeCell<InPacket>; 2],
    outbound: [UnsafeCell<OutPacket>; 2],
}

// Note(unsafe): Halves are handed between the sample clock and the host link by the pipeline
// handoff protocol. A half is never accessed by more than one context at a time.
unsafe impl Sync for PacketStore {}

impl PacketStore {
    pub const fn new() -> Self {
        Self {
            inbound: [
                UnsafeCell::new(InPacket::ZERO),
                UnsafeCell::new(InPacket::ZERO),
            ],
            outbound: [
                UnsafeCell::new(OutPacket::ZERO),
                UnsafeCell::new(OutPacket::ZERO),
            ],
        }
    }

    pub(crate) fn inbound(&self, half: Half) -> *mut InPacket {
        self.inbound[half as usize].get()
    }

    pub(crate) fn outbound(&self, half: Half) -> *mut OutPacket {
        self.outbound[half as usize].get()
    }
}

impl core::fmt::Debug for PacketStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PacketStore").finish_non_exhaustive()
    }
}

impl Default for PacketStore {
    fn default() -> Self {
        Self::new()
    }
}
