// Channel analog switch network.

use super::hal::gpio::{ErasedPin, Output, PushPull};
use crate::channel::{Channel, ChannelMode};

type O = ErasedPin<Output<PushPull>>;

/// Switch control pins of one channel.
/// * `source_current` - Feedback path select, high for current sourcing.
/// * `disconnect` - Output relay, high disconnects the terminal.
pub struct SwitchPins {
    pub source_current: O,
    pub disconnect: O,
}

pub struct ModeSwitches {
    pins: [SwitchPins; 2],
    modes: [ChannelMode; 2],
}

impl ModeSwitches {
    /// Construct the switch driver with both channels disabled.
    pub fn new(pins: [SwitchPins; 2]) -> Self {
        let mut switches = Self {
            pins,
            modes: Default::default(),
        };
        for ch in Channel::ALL {
            switches.set(ch, ChannelMode::Disabled);
        }
        switches
    }

    pub fn set(&mut self, channel: Channel, mode: ChannelMode) {
        let state = mode.switches();
        let pins = &mut self.pins[channel as usize];
        if state.source_current {
            pins.source_current.set_high();
        } else {
            pins.source_current.set_low();
        }
        if state.connected {
            pins.disconnect.set_low();
        } else {
            pins.disconnect.set_high();
        }
        self.modes[channel as usize] = mode;
        log::info!("Channel {channel:?}: {mode:?}");
    }

    pub fn mode(&self, channel: Channel) -> ChannelMode {
        self.modes[channel as usize]
    }
}
