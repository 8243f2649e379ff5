//! Host-side stand-ins for the hardware collaborators.
use std::{boxed::Box, cell::RefCell, collections::VecDeque, rc::Rc, vec::Vec};

use fugit::HertzU32;

use crate::control::{SampleTimer, TimerCompares};
use crate::engine::{SyncLine, Transfer, TransferEngine};
use crate::packet::PacketStore;
use crate::pipeline::Pipeline;
use crate::sample_clock::SampleClock;
use crate::scheduler::{Completion, Direction, HostLink, InLease, OutLease, TransferError};

/// First sample returned by the voltage engine. Every launch returns the next value.
pub const VOLTAGE_SEED: u16 = 0x1000;
/// First sample returned by the current engine.
pub const CURRENT_SEED: u16 = 0x8000;

/// Fresh shared state with a static lifetime.
pub fn leak() -> (&'static Pipeline, &'static PacketStore) {
    (
        Box::leak(Box::new(Pipeline::new())),
        Box::leak(Box::new(PacketStore::new())),
    )
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EngineId {
    Output,
    Voltage,
    Current,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Deassert,
    Assert,
    Launch(EngineId),
}

#[derive(Default)]
pub struct Recorder {
    pub events: Vec<Event>,
    sent: [Vec<Vec<u8>>; 3],
}

impl Recorder {
    /// Bytes transmitted by each launch of an engine.
    pub fn sent(&self, id: EngineId) -> &[Vec<u8>] {
        &self.sent[id as usize]
    }
}

pub struct MockEngine {
    id: EngineId,
    recorder: Rc<RefCell<Recorder>>,
    pending: Option<Transfer>,
    sample: u16,
}

impl MockEngine {
    fn new(id: EngineId, seed: u16, recorder: Rc<RefCell<Recorder>>) -> Self {
        Self {
            id,
            recorder,
            pending: None,
            sample: seed,
        }
    }
}

unsafe fn read(addr: *const u8, len: usize) -> Vec<u8> {
    core::slice::from_raw_parts(addr, len).to_vec()
}

impl TransferEngine for MockEngine {
    fn prepare(&mut self, transfer: Transfer) {
        self.pending = Some(transfer);
    }

    fn launch(&mut self) {
        let mut rec = self.recorder.borrow_mut();
        rec.events.push(Event::Launch(self.id));
        let sent = match self.pending.take() {
            Some(Transfer::Write { first, next }) => unsafe {
                let mut bytes = read(first.addr(), first.len());
                bytes.extend(read(next.addr(), next.len()));
                bytes
            },
            Some(Transfer::Exchange { command, response }) => unsafe {
                assert_eq!(command.len(), response.len());
                let bytes = self.sample.to_ne_bytes();
                core::ptr::copy_nonoverlapping(bytes.as_ptr(), response.addr(), response.len());
                self.sample = self.sample.wrapping_add(1);
                read(command.addr(), command.len())
            },
            None => return,
        };
        rec.sent[self.id as usize].push(sent);
    }
}

pub struct MockSync(Rc<RefCell<Recorder>>);

impl SyncLine for MockSync {
    fn assert(&mut self) {
        self.0.borrow_mut().events.push(Event::Assert);
    }

    fn deassert(&mut self) {
        self.0.borrow_mut().events.push(Event::Deassert);
    }
}

/// Shared state plus a recorder for building sample clocks.
pub struct Bench {
    pub pipeline: &'static Pipeline,
    pub store: &'static PacketStore,
    pub recorder: Rc<RefCell<Recorder>>,
}

impl Bench {
    pub fn new() -> Self {
        let (pipeline, store) = leak();
        Self {
            pipeline,
            store,
            recorder: Default::default(),
        }
    }

    pub fn sample_clock(&self) -> SampleClock<MockEngine, MockEngine, MockEngine, MockSync> {
        SampleClock::new(
            self.pipeline,
            self.store,
            MockEngine::new(EngineId::Output, 0, self.recorder.clone()),
            MockEngine::new(EngineId::Voltage, VOLTAGE_SEED, self.recorder.clone()),
            MockEngine::new(EngineId::Current, CURRENT_SEED, self.recorder.clone()),
            MockSync(self.recorder.clone()),
        )
    }
}

#[derive(Debug, Default)]
pub struct MockTimer {
    pub compares: Option<TimerCompares>,
    pub running: bool,
    pub starts: usize,
}

impl SampleTimer for MockTimer {
    fn configure(&mut self, compares: TimerCompares) {
        self.compares = Some(compares);
    }

    fn start(&mut self) {
        self.running = true;
        self.starts += 1;
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn clock(&self) -> HertzU32 {
        HertzU32::MHz(84)
    }
}

/// Host link holding at most one lease per direction until the test completes it.
#[derive(Debug, Default)]
pub struct MockLink {
    pub inbound: Option<InLease>,
    pub outbound: Option<OutLease>,
    pub submissions: Vec<Direction>,
    completions: VecDeque<Completion>,
}

impl MockLink {
    /// Finish the inbound transfer, handing its bytes to `host`.
    pub fn complete_in(&mut self, result: Result<(), TransferError>, host: impl FnOnce(&[u8])) {
        let lease = self.inbound.take().expect("no inbound transfer");
        host(lease.bytes());
        self.completions.push_back(Completion::In(lease, result));
    }

    /// Finish the outbound transfer with data written by `host`.
    pub fn complete_out(
        &mut self,
        result: Result<(), TransferError>,
        host: impl FnOnce(&mut [u8]),
    ) {
        let mut lease = self.outbound.take().expect("no outbound transfer");
        host(lease.bytes_mut());
        self.completions.push_back(Completion::Out(lease, result));
    }
}

impl HostLink for MockLink {
    fn submit_in(&mut self, lease: InLease) {
        assert!(self.inbound.is_none());
        self.submissions.push(Direction::In);
        self.inbound = Some(lease);
    }

    fn submit_out(&mut self, lease: OutLease) {
        assert!(self.outbound.is_none());
        self.submissions.push(Direction::Out);
        self.outbound = Some(lease);
    }

    fn abort_in(&mut self) -> Option<InLease> {
        self.inbound.take()
    }

    fn abort_out(&mut self) -> Option<OutLease> {
        self.outbound.take()
    }

    fn poll_completion(&mut self) -> Option<Completion> {
        self.completions.pop_front()
    }
}
