//! Bulk transfer scheduling between the packet store and the host link.
//!
//! The scheduler runs in the main loop. It submits packet halves raised by the sample clock to
//! the host link and processes the link's completions. At most one transfer per direction is in
//! flight.
//!
//! Access to a half's bytes outside of the sample clock is only possible through a lease. A lease
//! is created when a half is submitted and consumed when its completion is processed, so the host
//! link cannot keep touching a half after the scheduler has handed it back.
use crate::packet::{Half, InPacket, OutPacket, PacketStore};
use crate::pipeline::{Epoch, Handoff, Phase, Pipeline};

/// Transfer direction as seen from the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Measurements to the host.
    In,
    /// Output levels from the host.
    Out,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferError {
    /// Cancelled before completion.
    Aborted,
    /// The host ended the transfer after the given number of bytes.
    Short(usize),
    /// The link reported an error (e.g. bus reset, stall).
    Link,
}

/// Exclusive access to an inbound half while the host link sends it.
#[derive(Debug)]
pub struct InLease {
    store: &'static PacketStore,
    half: Half,
    epoch: Epoch,
}

impl InLease {
    pub fn half(&self) -> Half {
        self.half
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn packet(&self) -> &InPacket {
        // Note(unsafe): The half is `InFlight` for as long as the lease exists. The sample clock
        // does not touch a half in that state.
        unsafe { &*self.store.inbound(self.half) }
    }

    pub fn bytes(&self) -> &[u8] {
        self.packet().as_bytes()
    }
}

/// Exclusive access to an outbound half while the host link fills it.
#[derive(Debug)]
pub struct OutLease {
    store: &'static PacketStore,
    half: Half,
    epoch: Epoch,
}

impl OutLease {
    pub fn half(&self) -> Half {
        self.half
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn packet_mut(&mut self) -> &mut OutPacket {
        // Note(unsafe): See `InLease::packet()`.
        unsafe { &mut *self.store.outbound(self.half) }
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.packet_mut().as_bytes_mut()
    }
}

/// A finished (or failed) host transfer, returning its lease.
#[derive(Debug)]
pub enum Completion {
    In(InLease, Result<(), TransferError>),
    Out(OutLease, Result<(), TransferError>),
}

/// Bulk transfer link to the host.
pub trait HostLink {
    /// Start sending the leased inbound half.
    fn submit_in(&mut self, lease: InLease);

    /// Start receiving into the leased outbound half.
    fn submit_out(&mut self, lease: OutLease);

    /// Cancel the inbound transfer. Returns its lease if one was in flight.
    ///
    /// No completion is reported for an aborted transfer.
    fn abort_in(&mut self) -> Option<InLease>;

    /// Cancel the outbound transfer. Returns its lease if one was in flight.
    fn abort_out(&mut self) -> Option<OutLease>;

    /// Next finished transfer, if any.
    fn poll_completion(&mut self) -> Option<Completion>;
}

pub struct Scheduler {
    pipeline: &'static Pipeline,
    store: &'static PacketStore,
}

impl Scheduler {
    pub fn new(pipeline: &'static Pipeline, store: &'static PacketStore) -> Self {
        Self { pipeline, store }
    }

    /// Request the initial outbound packet.
    ///
    /// The request is level triggered: while priming it is raised again whenever no outbound
    /// transfer is pending, which retries a failed initial transfer.
    pub fn prime(&self) {
        if self.pipeline.phase() == Phase::Priming {
            self.pipeline
                .outbound()
                .transition(Handoff::Idle, Handoff::Ready(Half::Zero));
        }
    }

    /// Submit raised halves to the link.
    pub fn service<L: HostLink>(&mut self, link: &mut L) {
        let epoch = self.pipeline.epoch();

        if let Handoff::Ready(half) = self.pipeline.outbound().get() {
            if self
                .pipeline
                .outbound()
                .transition(Handoff::Ready(half), Handoff::InFlight(half))
            {
                log::trace!("Receiving outbound half {half:?}");
                link.submit_out(OutLease {
                    store: self.store,
                    half,
                    epoch,
                });
            }
        }

        if let Handoff::Ready(half) = self.pipeline.inbound().get() {
            if self
                .pipeline
                .inbound()
                .transition(Handoff::Ready(half), Handoff::InFlight(half))
            {
                log::trace!("Sending inbound half {half:?}");
                link.submit_in(InLease {
                    store: self.store,
                    half,
                    epoch,
                });
            }
        }
    }

    pub fn on_in_complete(&mut self, lease: InLease, result: Result<(), TransferError>) {
        if lease.epoch != self.pipeline.epoch() {
            log::debug!("Discarding stale inbound completion");
            return;
        }
        if let Err(e) = result {
            log::warn!("Inbound transfer failed: {e:?}");
        }
        self.pipeline
            .inbound()
            .transition(Handoff::InFlight(lease.half), Handoff::Idle);
    }

    /// Returns `true` on the first successful outbound delivery of an epoch.
    pub fn on_out_complete(&mut self, lease: OutLease, result: Result<(), TransferError>) -> bool {
        if lease.epoch != self.pipeline.epoch() {
            log::debug!("Discarding stale outbound completion");
            return false;
        }
        let half = lease.half;
        match result {
            Ok(()) => {
                self.pipeline
                    .outbound()
                    .transition(Handoff::InFlight(half), Handoff::Delivered(half));
                if self.pipeline.phase() == Phase::Priming {
                    self.pipeline.set_phase(Phase::Armed);
                    return true;
                }
            }
            Err(e) => {
                log::warn!("Outbound transfer failed: {e:?}");
                self.pipeline
                    .outbound()
                    .transition(Handoff::InFlight(half), Handoff::Idle);
            }
        }
        false
    }

    /// Hand back an aborted inbound lease.
    pub fn reclaim_in(&mut self, lease: InLease) {
        self.pipeline
            .inbound()
            .transition(Handoff::InFlight(lease.half), Handoff::Idle);
    }

    /// Hand back an aborted outbound lease.
    pub fn reclaim_out(&mut self, lease: OutLease) {
        self.pipeline
            .outbound()
            .transition(Handoff::InFlight(lease.half), Handoff::Idle);
    }
}
