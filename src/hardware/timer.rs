//! Sample timer.
//!
//! TIM2 counts timer kernel clock cycles. Per period it drives
//! * CH1 (conversion edge) high at `rise`,
//! * CH2 (DAC load) high at `mid`,
//! and raises the update interrupt that runs the sample clock at `end`.
use fugit::HertzU32;

use super::hal::{
    gpio::{gpioa::PA0, gpioa::PA1, Alternate},
    prelude::*,
    rcc::{rec, CoreClocks},
    stm32::TIM2,
};
use crate::control::{SampleTimer, TimerCompares};

// TIMx_CCMR1: OC1M = OC2M = PWM mode 2 (inactive while CNT < CCRx), preload enabled.
const CCMR1_PWM2: u32 = (0b111 << 4) | (1 << 3) | (0b111 << 12) | (1 << 11);
// TIMx_CCER: CC1E | CC2E
const CCER_OUTPUTS: u32 = (1 << 0) | (1 << 4);

pub struct SampleTimer2 {
    tim: TIM2,
    clock: HertzU32,
    _pins: (PA0<Alternate<1>>, PA1<Alternate<1>>),
}

impl SampleTimer2 {
    pub fn new(
        tim: TIM2,
        rec: rec::Tim2,
        clocks: &CoreClocks,
        pins: (PA0<Alternate<1>>, PA1<Alternate<1>>),
    ) -> Self {
        rec.enable().reset();
        let clock = clocks.timx_ker_ck();
        tim.cr1.write(|w| unsafe { w.bits(0) });
        tim.psc.write(|w| unsafe { w.bits(0) });
        tim.ccmr1_output()
            .write(|w| unsafe { w.bits(CCMR1_PWM2) });
        tim.ccer.write(|w| unsafe { w.bits(CCER_OUTPUTS) });
        tim.dier.write(|w| w.uie().set_bit());
        Self {
            tim,
            clock,
            _pins: pins,
        }
    }
}

/// Acknowledge the update interrupt.
///
/// Called from the sample clock interrupt, which does not own the timer.
pub fn acknowledge() {
    // Note(unsafe): Single write-zero-to-clear of the update flag, no other state is touched.
    unsafe { &*TIM2::ptr() }.sr.write(|w| unsafe { w.bits(!1) });
}

impl SampleTimer for SampleTimer2 {
    fn configure(&mut self, compares: TimerCompares) {
        self.tim.arr.write(|w| unsafe { w.bits(compares.end as u32 - 1) });
        self.tim.ccr1.write(|w| unsafe { w.bits(compares.rise as u32) });
        self.tim.ccr2.write(|w| unsafe { w.bits(compares.mid as u32) });
        // Load shadow registers without raising the interrupt.
        self.tim.cr1.modify(|_, w| w.urs().set_bit());
        self.tim.egr.write(|w| w.ug().set_bit());
        acknowledge();
    }

    fn start(&mut self) {
        self.tim.cr1.modify(|_, w| w.cen().set_bit());
    }

    fn stop(&mut self) {
        self.tim.cr1.modify(|_, w| w.cen().clear_bit());
        self.tim.cnt.reset();
        acknowledge();
    }

    fn clock(&self) -> HertzU32 {
        self.clock
    }
}
