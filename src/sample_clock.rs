//! Per-tick sampling engine.
//!
//! # Design
//! The sample timer interrupt calls [SampleClock::service()] once per period. Ticks alternate
//! between channel A and B. On every tick the three transfer engines are loaded for the active
//! channel and launched together:
//!
//! * output: channel selector byte followed by the output level from the active outbound half,
//! * voltage: converter configuration word out, voltage sample into the active inbound half,
//! * current: same for the current converter.
//!
//! A converter transfer clocks out the result of the conversion started on the previous tick,
//! so every read-back lands one tick after its conversion.
//!
//! The slot cursor advances once per A+B pair. When it reaches half a packet the next outbound
//! half is requested. When it reaches a full packet the filled inbound half is handed to the
//! scheduler and the outbound halves are swapped. Handing over only ever happens at the start
//! of an A tick, after the previous B tick's read-back has completed.
//!
//! The sample clock never blocks and never waits for the host link. If the link falls behind,
//! the active inbound half is overwritten and the active outbound half is replayed.
use crate::channel::{Channel, ChannelConfig};
use crate::engine::{Region, RegionMut, SyncLine, Transfer, TransferEngine};
use crate::packet::{Half, Layout, PacketStore, HALF_PACKET, SAMPLES_PER_PACKET};
use crate::pipeline::{Handoff, Pipeline};

/// Transmitted in place by the engines, so kept in memory that outlives every transfer.
static CHANNEL_CONFIG: [ChannelConfig; 2] = [
    ChannelConfig::new(Channel::A),
    ChannelConfig::new(Channel::B),
];

pub struct SampleClock<O, V, I, S> {
    pipeline: &'static Pipeline,
    store: &'static PacketStore,
    output: O,
    voltage: V,
    current: I,
    sync: S,
    layout: Layout,
    channel: Channel,
    slot: usize,
    active_in: Half,
    active_out: Half,
}

impl<O, V, I, S> SampleClock<O, V, I, S>
where
    O: TransferEngine,
    V: TransferEngine,
    I: TransferEngine,
    S: SyncLine,
{
    pub fn new(
        pipeline: &'static Pipeline,
        store: &'static PacketStore,
        output: O,
        voltage: V,
        current: I,
        sync: S,
    ) -> Self {
        Self {
            pipeline,
            store,
            output,
            voltage,
            current,
            sync,
            layout: Layout::Contiguous,
            channel: Channel::A,
            slot: 0,
            active_in: Half::Zero,
            active_out: Half::Zero,
        }
    }

    /// Run one tick.
    pub fn service(&mut self) {
        // Rising edge starts the conversions whose results the next tick reads back.
        self.sync.deassert();

        if !self.pipeline.sent_out() {
            return;
        }

        // The first tick after a (re)configuration consumes the primed outbound half.
        if self.pipeline.take_restart() {
            self.restart();
        }

        if self.channel == Channel::A {
            if self.slot == HALF_PACKET {
                self.pipeline
                    .outbound()
                    .transition(Handoff::Idle, Handoff::Ready(self.active_out.other()));
            } else if self.slot == SAMPLES_PER_PACKET {
                self.swap();
            }
        }

        let config = &CHANNEL_CONFIG[self.channel as usize];

        // Note(unsafe): The active halves are owned by the sample clock until the next swap.
        // Neither is reachable through a lease while active.
        let inbound = unsafe { &mut *self.store.inbound(self.active_in) };
        let outbound = unsafe { &*self.store.outbound(self.active_out) };

        let readback = inbound.readback_mut(self.layout, self.channel, self.slot);
        let level = outbound.level(self.layout, self.channel, self.slot);

        self.output.prepare(Transfer::Write {
            first: Region::new(&config.selector),
            next: Region::new(level),
        });
        self.voltage.prepare(Transfer::Exchange {
            command: Region::new(&config.voltage),
            response: RegionMut::new(readback.voltage),
        });
        self.current.prepare(Transfer::Exchange {
            command: Region::new(&config.current),
            response: RegionMut::new(readback.current),
        });

        self.sync.assert();
        self.output.launch();
        self.voltage.launch();
        self.current.launch();

        if self.channel == Channel::B {
            self.slot += 1;
        }
        self.channel = self.channel.next();
    }

    fn restart(&mut self) {
        self.layout = self.pipeline.layout();
        self.channel = Channel::A;
        self.slot = 0;
        self.active_in = Half::Zero;
        self.active_out = Half::Zero;
        // The primed half is now active.
        self.pipeline
            .outbound()
            .transition(Handoff::Delivered(Half::Zero), Handoff::Idle);
    }

    fn swap(&mut self) {
        self.slot = 0;

        if self
            .pipeline
            .inbound()
            .transition(Handoff::Idle, Handoff::Ready(self.active_in))
        {
            self.active_in = self.active_in.other();
        } else {
            self.pipeline.count_overrun();
        }

        let next = self.active_out.other();
        if self
            .pipeline
            .outbound()
            .transition(Handoff::Delivered(next), Handoff::Idle)
        {
            self.active_out = next;
        } else {
            self.pipeline.count_underrun();
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Inbound half being filled.
    pub fn active_in(&self) -> Half {
        self.active_in
    }

    /// Outbound half being drained.
    pub fn active_out(&self) -> Half {
        self.active_out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{InPacket, OutPacket};
    use crate::pipeline::Phase;
    use crate::testing::{Bench, EngineId, Event, CURRENT_SEED, VOLTAGE_SEED};

    const N: usize = SAMPLES_PER_PACKET;

    /// Bench with a delivered initial outbound packet.
    fn armed(layout: Layout) -> Bench {
        let bench = Bench::new();
        bench.pipeline.set_layout(layout);
        bench.pipeline.renew();
        bench
            .pipeline
            .outbound()
            .transition(Handoff::Idle, Handoff::Delivered(Half::Zero));
        bench.pipeline.set_phase(Phase::Streaming);
        bench
    }

    fn inbound(bench: &Bench, half: Half) -> &InPacket {
        unsafe { &*bench.store.inbound(half) }
    }

    fn outbound(bench: &Bench, half: Half) -> &mut OutPacket {
        unsafe { &mut *bench.store.outbound(half) }
    }

    #[test]
    fn idle_until_first_delivery() {
        let bench = Bench::new();
        let mut clock = bench.sample_clock();
        bench.pipeline.set_phase(Phase::Priming);
        clock.service();
        assert_eq!(bench.recorder.borrow().events, [Event::Deassert]);
        assert_eq!(clock.slot(), 0);
        assert_eq!(clock.channel(), Channel::A);
    }

    #[test]
    fn sync_brackets_launches() {
        let bench = armed(Layout::Contiguous);
        let mut clock = bench.sample_clock();
        clock.service();
        assert_eq!(
            bench.recorder.borrow().events,
            [
                Event::Deassert,
                Event::Assert,
                Event::Launch(EngineId::Output),
                Event::Launch(EngineId::Voltage),
                Event::Launch(EngineId::Current),
            ]
        );
        // Primed half consumed.
        assert_eq!(bench.pipeline.outbound().get(), Handoff::Idle);
    }

    #[test]
    fn engines_transmit_channel_words() {
        let bench = armed(Layout::Interleaved);
        *outbound(&bench, Half::Zero).level_mut(Layout::Interleaved, Channel::A, 0) = 0x1234;
        *outbound(&bench, Half::Zero).level_mut(Layout::Interleaved, Channel::B, 0) = 0xabcd;
        let mut clock = bench.sample_clock();
        clock.service();
        clock.service();
        let rec = bench.recorder.borrow();
        let mut a = std::vec![0u8];
        a.extend_from_slice(&0x1234u16.to_ne_bytes());
        let mut b = std::vec![1u8];
        b.extend_from_slice(&0xabcdu16.to_ne_bytes());
        assert_eq!(rec.sent(EngineId::Output), [a, b]);
        assert_eq!(
            rec.sent(EngineId::Voltage),
            [std::vec![0xf1, 0x20], std::vec![0xf1, 0x20]]
        );
        assert_eq!(rec.sent(EngineId::Current)[1], [0xf7, 0x20]);
    }

    #[test]
    fn slot_advances_per_pair_and_wraps() {
        let bench = armed(Layout::Contiguous);
        let mut clock = bench.sample_clock();
        for tick in 0..2 * N {
            clock.service();
            assert_eq!(clock.slot(), (tick + 1) / 2);
        }
        assert_eq!(clock.slot(), N);
        clock.service();
        assert_eq!(clock.slot(), 0);
        assert_eq!(clock.channel(), Channel::B);
    }

    #[test]
    fn outbound_requested_half_a_packet_ahead() {
        let bench = armed(Layout::Contiguous);
        let mut clock = bench.sample_clock();
        for _ in 0..2 * HALF_PACKET {
            clock.service();
        }
        assert_eq!(bench.pipeline.outbound().get(), Handoff::Idle);
        clock.service();
        assert_eq!(bench.pipeline.outbound().get(), Handoff::Ready(Half::One));
        // Raised once.
        bench
            .pipeline
            .outbound()
            .transition(Handoff::Ready(Half::One), Handoff::InFlight(Half::One));
        for _ in 0..4 {
            clock.service();
        }
        assert_eq!(bench.pipeline.outbound().get(), Handoff::InFlight(Half::One));
    }

    #[test]
    fn full_packet_raises_inbound_and_swaps() {
        let bench = armed(Layout::Contiguous);
        let mut clock = bench.sample_clock();
        for _ in 0..2 * N {
            clock.service();
        }
        assert_eq!(bench.pipeline.inbound().get(), Handoff::Idle);

        // Host delivered the look-ahead packet.
        bench
            .pipeline
            .outbound()
            .transition(Handoff::Ready(Half::One), Handoff::Delivered(Half::One));

        clock.service();
        assert_eq!(bench.pipeline.inbound().get(), Handoff::Ready(Half::Zero));
        assert_eq!(clock.active_in(), Half::One);
        assert_eq!(clock.active_out(), Half::One);
        assert_eq!(bench.pipeline.outbound().get(), Handoff::Idle);
        assert_eq!(bench.pipeline.overruns(), 0);
        assert_eq!(bench.pipeline.underruns(), 0);
    }

    #[test]
    fn readbacks_land_in_logical_order() {
        for layout in [Layout::Contiguous, Layout::Interleaved] {
            let bench = armed(layout);
            let mut clock = bench.sample_clock();
            for _ in 0..2 * N + 1 {
                clock.service();
            }
            let packet = inbound(&bench, Half::Zero);
            for slot in 0..N {
                for ch in Channel::ALL {
                    let tick = (2 * slot + ch as usize) as u16;
                    let rb = packet.readback(layout, ch, slot);
                    assert_eq!(rb.voltage, VOLTAGE_SEED + tick, "{layout:?} {ch:?} {slot}");
                    assert_eq!(rb.current, CURRENT_SEED + tick);
                }
            }
        }
    }

    #[test]
    fn stalled_link_overruns_and_replays() {
        let bench = armed(Layout::Contiguous);
        let mut clock = bench.sample_clock();
        for _ in 0..2 * (2 * N) + 1 {
            clock.service();
        }
        // First packet raised, second one found the inbound handoff still busy.
        assert_eq!(bench.pipeline.inbound().get(), Handoff::Ready(Half::Zero));
        assert_eq!(clock.active_in(), Half::One);
        assert_eq!(bench.pipeline.overruns(), 1);
        // No outbound packet was ever delivered.
        assert_eq!(clock.active_out(), Half::Zero);
        assert_eq!(bench.pipeline.underruns(), 2);
    }

    #[test]
    fn parity_alternates_across_packets() {
        let bench = armed(Layout::Contiguous);
        let mut clock = bench.sample_clock();
        clock.service();
        for expected in [Half::Zero, Half::One, Half::Zero] {
            for _ in 0..2 * N {
                clock.service();
            }
            assert_eq!(bench.pipeline.inbound().get(), Handoff::Ready(expected));
            assert_eq!(clock.active_in(), expected.other());
            // Host takes the packet.
            bench
                .pipeline
                .inbound()
                .transition(Handoff::Ready(expected), Handoff::Idle);
        }
    }

    #[test]
    fn new_epoch_restarts_cursor_and_latches_layout() {
        let bench = armed(Layout::Contiguous);
        let mut clock = bench.sample_clock();
        for _ in 0..7 {
            clock.service();
        }
        bench.pipeline.set_layout(Layout::Interleaved);
        clock.service();
        assert_eq!(clock.slot(), 4);

        bench.pipeline.renew();
        clock.service();
        assert_eq!(clock.slot(), 0);
        assert_eq!(clock.channel(), Channel::B);
        let packet = inbound(&bench, Half::Zero);
        assert_eq!(packet.words()[0], VOLTAGE_SEED + 8);
        assert_eq!(packet.words()[1], CURRENT_SEED + 8);
    }

    #[test]
    fn restart_after_epoch_wraps() {
        let bench = armed(Layout::Contiguous);
        let mut clock = bench.sample_clock();
        for _ in 0..7 {
            clock.service();
        }
        assert_eq!(clock.slot(), 3);

        let epoch = bench.pipeline.epoch();
        for _ in 0..256 {
            bench.pipeline.renew();
        }
        assert_eq!(bench.pipeline.epoch(), epoch);
        bench
            .pipeline
            .outbound()
            .transition(Handoff::Idle, Handoff::Delivered(Half::Zero));

        clock.service();
        assert_eq!(clock.slot(), 0);
        assert_eq!(clock.channel(), Channel::B);
        assert_eq!(bench.pipeline.outbound().get(), Handoff::Idle);
    }
}
