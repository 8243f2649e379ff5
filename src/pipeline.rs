//! Lock-free state shared between the sample clock and the host context.
//!
//! # Design
//! All state that both contexts touch lives in one [Pipeline] record of atomics. For every
//! packet direction a [Handoff] tracks which context currently owns the half that is not being
//! filled (inbound) or drained (outbound) by the sample clock:
//!
//! ```text
//!  Idle --(sample clock)--> Ready(h) --(scheduler)--> InFlight(h) --(scheduler)--> Idle
//!                                                                  \-> Delivered(h) --(sample clock)--> Idle
//! ```
//!
//! Each transition has exactly one writing context and is performed with a compare-exchange
//! against the expected source state, so a writer never clobbers a state it did not observe.
//! `Delivered` is only used by the outbound direction.
//!
//! Whole-record resets happen from the host context while the sample timer is stopped.
use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

use crate::packet::{Half, Layout};

/// Sampling phase.
#[derive(
    Copy,
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
)]
#[repr(u8)]
pub enum Phase {
    /// Not configured, timer stopped.
    #[default]
    Stopped = 0,
    /// Configured, waiting for the first outbound packet.
    Priming = 1,
    /// First outbound packet delivered, waiting for the start frame.
    Armed = 2,
    /// Sample timer running.
    Streaming = 3,
}

/// Configuration generation. Every (re)configuration starts a new epoch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Epoch(u8);

impl Epoch {
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Ownership of the non-active half of one direction.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Handoff {
    /// Owned by the scheduler, nothing to do.
    #[default]
    Idle,
    /// Raised by the sample clock, waiting for submission.
    Ready(Half),
    /// Owned by the host link.
    InFlight(Half),
    /// Outbound packet received, waiting for the sample clock to swap it in.
    Delivered(Half),
}

#[derive(Copy, Clone, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum Stage {
    Idle = 0,
    Ready = 1,
    InFlight = 2,
    Delivered = 3,
}

impl Handoff {
    fn encode(self) -> u8 {
        let (stage, half) = match self {
            Self::Idle => (Stage::Idle, Half::Zero),
            Self::Ready(h) => (Stage::Ready, h),
            Self::InFlight(h) => (Stage::InFlight, h),
            Self::Delivered(h) => (Stage::Delivered, h),
        };
        (u8::from(stage) << 1) | u8::from(half)
    }

    fn decode(raw: u8) -> Self {
        let half = if raw & 1 == 0 { Half::Zero } else { Half::One };
        match Stage::try_from(raw >> 1) {
            Ok(Stage::Ready) => Self::Ready(half),
            Ok(Stage::InFlight) => Self::InFlight(half),
            Ok(Stage::Delivered) => Self::Delivered(half),
            Ok(Stage::Idle) | Err(_) => Self::Idle,
        }
    }
}

/// Atomic storage of a [Handoff].
pub struct HandoffCell(AtomicU8);

impl HandoffCell {
    const fn new() -> Self {
        Self(AtomicU8::new(0))
    }

    pub fn get(&self) -> Handoff {
        Handoff::decode(self.0.load(Ordering::Acquire))
    }

    /// Move from `from` to `to`. Returns `false` (and changes nothing) if the state was not
    /// `from`.
    pub fn transition(&self, from: Handoff, to: Handoff) -> bool {
        self.0
            .compare_exchange(
                from.encode(),
                to.encode(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    fn reset(&self) {
        self.0.store(Handoff::Idle.encode(), Ordering::Release);
    }
}

/// Snapshot of the pipeline for reporting.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Status {
    pub phase: Phase,
    pub layout: Layout,
    pub inbound: Handoff,
    pub outbound: Handoff,
    pub overruns: u32,
    pub underruns: u32,
}

pub struct Pipeline {
    phase: AtomicU8,
    epoch: AtomicU8,
    interleaved: AtomicBool,
    restart: AtomicBool,
    inbound: HandoffCell,
    outbound: HandoffCell,
    overruns: AtomicU32,
    underruns: AtomicU32,
}

impl Pipeline {
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Stopped as u8),
            epoch: AtomicU8::new(0),
            interleaved: AtomicBool::new(false),
            restart: AtomicBool::new(false),
            inbound: HandoffCell::new(),
            outbound: HandoffCell::new(),
            overruns: AtomicU32::new(0),
            underruns: AtomicU32::new(0),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::try_from(self.phase.load(Ordering::Acquire)).unwrap_or(Phase::Stopped)
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase.into(), Ordering::Release);
    }

    /// Whether the first outbound packet of this epoch has been delivered.
    pub fn sent_out(&self) -> bool {
        self.phase() >= Phase::Armed
    }

    pub fn epoch(&self) -> Epoch {
        Epoch(self.epoch.load(Ordering::Acquire))
    }

    /// Start a new epoch and reset all handoffs.
    ///
    /// Only called from the host context with the sample timer stopped.
    pub(crate) fn renew(&self) -> Epoch {
        self.reset_handoffs();
        let epoch = self.epoch().next();
        self.epoch.store(epoch.0, Ordering::Release);
        self.restart.store(true, Ordering::Release);
        epoch
    }

    /// Consume a pending cursor restart. Only called by the sample clock.
    pub(crate) fn take_restart(&self) -> bool {
        self.restart.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn reset_handoffs(&self) {
        self.inbound.reset();
        self.outbound.reset();
    }

    /// Layout requested for the next epoch.
    pub fn layout(&self) -> Layout {
        self.interleaved.load(Ordering::Acquire).into()
    }

    pub(crate) fn set_layout(&self, layout: Layout) {
        self.interleaved
            .store(layout == Layout::Interleaved, Ordering::Release);
    }

    pub fn inbound(&self) -> &HandoffCell {
        &self.inbound
    }

    pub fn outbound(&self) -> &HandoffCell {
        &self.outbound
    }

    /// Inbound packets overwritten because the previous one was still owned by the host link.
    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Outbound packets replayed because no fresh one was delivered in time.
    pub fn underruns(&self) -> u32 {
        self.underruns.load(Ordering::Relaxed)
    }

    // Counters have a single writer (the sample clock), so load/store suffices.
    pub(crate) fn count_overrun(&self) {
        let n = self.overruns.load(Ordering::Relaxed);
        self.overruns.store(n.wrapping_add(1), Ordering::Relaxed);
    }

    pub(crate) fn count_underrun(&self) {
        let n = self.underruns.load(Ordering::Relaxed);
        self.underruns.store(n.wrapping_add(1), Ordering::Relaxed);
    }

    pub fn status(&self) -> Status {
        Status {
            phase: self.phase(),
            layout: self.layout(),
            inbound: self.inbound.get(),
            outbound: self.outbound.get(),
            overruns: self.overruns(),
            underruns: self.underruns(),
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}
