//! Sampling control surface.
//!
//! The [Controller] lives in the main loop context. It owns the sample timer, the host link, the
//! bulk transfer scheduler and the start synchronizer and implements the (re)configuration
//! protocol on top of them. The sample clock interrupt only shares the [Pipeline] with it.
use fugit::HertzU32;
use serde::Serialize;

use crate::packet::{Layout, PacketStore};
use crate::pipeline::{Phase, Pipeline, Status};
use crate::scheduler::{Completion, HostLink, InLease, OutLease, Scheduler, TransferError};
use crate::synchronizer::{Frame, StartSynchronizer};

/// Conversion edge, in timer counts after the period start.
const CONVERSION_EDGE: u16 = 10;

/// Smallest sample timer period. Shorter periods would put the conversion edge after the
/// mid-period edge.
pub const MIN_PERIOD: u16 = 2 * CONVERSION_EDGE + 1;

/// Sample timer compare points, in timer counts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TimerCompares {
    pub rise: u16,
    pub mid: u16,
    pub end: u16,
}

impl TimerCompares {
    /// Compare points for `period`, or `None` if the period is too short to sample.
    pub fn new(period: u16) -> Option<Self> {
        (period >= MIN_PERIOD).then(|| Self {
            rise: CONVERSION_EDGE,
            mid: period - CONVERSION_EDGE,
            end: period,
        })
    }
}

/// Hardware timer driving the sample clock interrupt.
pub trait SampleTimer {
    fn configure(&mut self, compares: TimerCompares);
    fn start(&mut self);
    fn stop(&mut self);
    /// Counter clock rate.
    fn clock(&self) -> HertzU32;
}

pub struct Controller<T, L> {
    pipeline: &'static Pipeline,
    scheduler: Scheduler,
    synchronizer: StartSynchronizer,
    timer: T,
    link: L,
    enabled: bool,
    reported: (u32, u32),
}

impl<T: SampleTimer, L: HostLink> Controller<T, L> {
    pub fn new(
        pipeline: &'static Pipeline,
        store: &'static PacketStore,
        mut timer: T,
        link: L,
    ) -> Self {
        timer.stop();
        Self {
            pipeline,
            scheduler: Scheduler::new(pipeline, store),
            synchronizer: StartSynchronizer::default(),
            timer,
            link,
            enabled: false,
            reported: (pipeline.overruns(), pipeline.underruns()),
        }
    }

    /// (Re)configure sampling.
    ///
    /// # Args
    /// * `period` - Sample timer period in timer counts. Each channel is sampled every other
    ///   period. Periods below [MIN_PERIOD] stop sampling.
    /// * `start_frame` - Host frame on which to start sampling. 0 starts as soon as the first
    ///   outbound packet has been received.
    pub fn configure(&mut self, period: u16, start_frame: Frame) {
        self.timer.stop();
        self.abort();
        self.pipeline.renew();

        match TimerCompares::new(period) {
            None => {
                self.synchronizer.disarm();
                self.pipeline.set_phase(Phase::Stopped);
                log::info!("Sampling stopped");
            }
            Some(compares) => {
                self.pipeline.set_phase(Phase::Priming);
                self.synchronizer.arm(start_frame);
                self.timer.configure(compares);
                let rate = self.timer.clock() / (2 * period as u32);
                log::info!(
                    "Sampling at {} Hz per channel, start frame {}, {:?}",
                    rate.to_Hz(),
                    start_frame,
                    self.pipeline.layout()
                );
            }
        }
    }

    /// Select the packet layout. Takes effect at the next configuration.
    pub fn set_layout_mode(&mut self, interleaved: bool) {
        if self.pipeline.phase() == Phase::Streaming {
            log::warn!("Layout change takes effect at the next configuration");
        }
        self.pipeline.set_layout(interleaved.into());
    }

    /// The host is ready for bulk transfers.
    pub fn enable(&mut self) {
        log::debug!("Bulk transfers enabled");
        self.enabled = true;
        self.scheduler.prime();
    }

    /// The host link went away.
    pub fn disable(&mut self) {
        log::debug!("Bulk transfers disabled");
        self.enabled = false;
        self.abort();
    }

    /// Process link completions and submit pending packets.
    pub fn service_main_loop(&mut self) {
        while let Some(completion) = self.link.poll_completion() {
            match completion {
                Completion::In(lease, result) => self.on_in_complete(lease, result),
                Completion::Out(lease, result) => self.on_out_complete(lease, result),
            }
        }

        if self.enabled {
            self.scheduler.prime();
            self.scheduler.service(&mut self.link);
        }

        self.report();
    }

    pub fn on_in_complete(&mut self, lease: InLease, result: Result<(), TransferError>) {
        self.scheduler.on_in_complete(lease, result);
    }

    pub fn on_out_complete(&mut self, lease: OutLease, result: Result<(), TransferError>) {
        if self.scheduler.on_out_complete(lease, result) {
            log::debug!("First outbound packet received");
            self.synchronizer.release();
        }
    }

    /// Handle a host bus frame tick.
    pub fn on_frame(&mut self, frame: Frame) {
        if self.synchronizer.on_frame(frame) {
            self.timer.start();
            self.pipeline.set_phase(Phase::Streaming);
            log::info!("Sampling started at frame {frame}");
        }
    }

    pub fn status(&self) -> Status {
        self.pipeline.status()
    }

    pub fn layout(&self) -> Layout {
        self.pipeline.layout()
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn abort(&mut self) {
        if let Some(lease) = self.link.abort_in() {
            self.scheduler.reclaim_in(lease);
        }
        if let Some(lease) = self.link.abort_out() {
            self.scheduler.reclaim_out(lease);
        }
    }

    fn report(&mut self) {
        let (overruns, underruns) = (self.pipeline.overruns(), self.pipeline.underruns());
        if overruns != self.reported.0 {
            log::warn!(
                "Inbound overrun: {} packets lost",
                overruns.wrapping_sub(self.reported.0)
            );
        }
        if underruns != self.reported.1 {
            log::warn!(
                "Outbound underrun: {} packets replayed",
                underruns.wrapping_sub(self.reported.1)
            );
        }
        self.reported = (overruns, underruns);
    }
}
