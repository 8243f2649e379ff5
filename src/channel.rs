//! Source-measure channel model.
//!
//! Each of the two channels drives one DAC output (addressed on the shared output line by a
//! selector byte) and reads back its voltage and current through two AD7682 converters. The
//! converters are reprogrammed on every conversion by the configuration word that is clocked out
//! while the previous result is clocked in.
//! AD7682 datasheet: https://www.analog.com/media/en/technical-documentation/data-sheets/AD7682_7689.pdf

use arbitrary_int::{u2, u3};
use bitbybit::{bitenum, bitfield};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use strum::EnumIter;

/// A source-measure channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, EnumIter, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Channel {
    A = 0,
    B = 1,
}

impl Channel {
    pub const ALL: [Self; 2] = [Self::A, Self::B];

    /// The channel serviced on the tick after this one.
    pub fn next(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// Channel operating mode.
///
/// The mode only concerns the analog switch network. The sampling engine moves the same samples
/// regardless of it.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, EnumIter, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum ChannelMode {
    /// Output disconnected, DAC parked at its idle code.
    #[default]
    Disabled = 0,
    /// Source voltage, measure current.
    Svmi = 1,
    /// Source current, measure voltage.
    Simv = 2,
}

/// Analog switch states realizing a [ChannelMode].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Switches {
    /// Current sourcing (rather than voltage sourcing) feedback path.
    pub source_current: bool,
    /// Output connected to the terminal.
    pub connected: bool,
}

impl ChannelMode {
    pub fn switches(self) -> Switches {
        match self {
            // Current sourcing at the idle code keeps a disconnected output quiet.
            Self::Disabled => Switches {
                source_current: true,
                connected: false,
            },
            Self::Svmi => Switches {
                source_current: false,
                connected: true,
            },
            Self::Simv => Switches {
                source_current: true,
                connected: true,
            },
        }
    }
}

/// AD7682 input channel selection.
#[derive(Debug, PartialEq, Eq)]
#[bitenum(u3, exhaustive = true)]
pub enum AdcInput {
    In0 = 0,
    In1 = 1,
    In2 = 2,
    In3 = 3,
    In4 = 4,
    In5 = 5,
    In6 = 6,
    In7 = 7,
}

/// AD7682 configuration register (CFG).
///
/// The 14 bit register is shifted in MSB first and is left aligned in the 16 bit transfer, so
/// CFG[13] maps to bit 15 and CFG[0] to bit 2.
#[bitfield(u16, default = 0)]
#[derive(Debug, PartialEq, Eq)]
pub struct AdcConfig {
    /// Overwrite the register contents. Cleared, the rest of the word is ignored.
    #[bit(15, rw)]
    overwrite: bool,

    /// Input channel configuration. `0b111`: unipolar, referenced to GND.
    #[bits(12..=14, rw)]
    input_mode: u3,

    #[bits(9..=11, rw)]
    input: AdcInput,

    /// Full (rather than 1/4) low-pass bandwidth.
    #[bit(8, rw)]
    full_bandwidth: bool,

    /// Reference selection. `0b001`: internal 4.096 V reference, temperature sensor enabled.
    #[bits(5..=7, rw)]
    reference: u3,

    /// Channel sequencer. `0b00`: disabled.
    #[bits(3..=4, rw)]
    sequencer: u2,

    /// Do not read back the configuration after the data.
    #[bit(2, rw)]
    skip_readback: bool,
}

impl AdcConfig {
    const UNIPOLAR_GND: u3 = u3::new(0b111);
    const INTERNAL_4V096: u3 = u3::new(0b001);

    /// Continuous single-channel conversions of `input`, unipolar against ground.
    pub const fn single_ended(input: AdcInput) -> Self {
        Self::new_with_raw_value(0)
            .with_overwrite(true)
            .with_input_mode(Self::UNIPOLAR_GND)
            .with_input(input)
            .with_full_bandwidth(true)
            .with_reference(Self::INTERNAL_4V096)
            .with_sequencer(u2::new(0))
            .with_skip_readback(false)
    }

    /// The two bytes in the order they are shifted out.
    pub const fn to_wire(self) -> [u8; 2] {
        self.raw_value().to_be_bytes()
    }
}

/// Per-channel constants consumed by the transfer engines.
///
/// Byte arrays are kept in wire order so the engines can transmit them in place.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Output line selector byte preceding the DAC sample.
    pub selector: [u8; 1],
    /// Configuration word sent to the voltage converter.
    pub voltage: [u8; 2],
    /// Configuration word sent to the current converter.
    pub current: [u8; 2],
}

impl ChannelConfig {
    /// Voltage is sensed on IN0, current on IN3 of the respective converter.
    pub const VOLTAGE_SENSE: AdcConfig = AdcConfig::single_ended(AdcInput::In0);
    pub const CURRENT_SENSE: AdcConfig = AdcConfig::single_ended(AdcInput::In3);

    pub const fn new(channel: Channel) -> Self {
        Self {
            selector: [channel as u8],
            voltage: Self::VOLTAGE_SENSE.to_wire(),
            current: Self::CURRENT_SENSE.to_wire(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn sense_words_match_converter_wire_format() {
        assert_eq!(ChannelConfig::VOLTAGE_SENSE.raw_value(), 0xF120);
        assert_eq!(ChannelConfig::CURRENT_SENSE.raw_value(), 0xF720);
        assert_eq!(ChannelConfig::new(Channel::A).voltage, [0xF1, 0x20]);
        assert_eq!(ChannelConfig::new(Channel::B).current, [0xF7, 0x20]);
    }

    #[test]
    fn config_fields_decode() {
        let cfg = AdcConfig::new_with_raw_value(0xF720);
        assert!(cfg.overwrite());
        assert_eq!(cfg.input(), AdcInput::In3);
        assert_eq!(cfg.input_mode(), u3::new(0b111));
        assert_eq!(cfg.reference(), u3::new(0b001));
        assert!(cfg.full_bandwidth());
        assert!(!cfg.skip_readback());
    }

    #[test]
    fn selector_is_channel_index() {
        for ch in Channel::iter() {
            assert_eq!(ChannelConfig::new(ch).selector, [u8::from(ch)]);
        }
    }

    #[test]
    fn channel_alternates() {
        assert_eq!(Channel::A.next(), Channel::B);
        assert_eq!(Channel::B.next().next(), Channel::B);
    }

    #[test]
    fn only_disabled_disconnects() {
        for mode in ChannelMode::iter() {
            assert_eq!(mode.switches().connected, mode != ChannelMode::Disabled);
        }
        assert!(!ChannelMode::Svmi.switches().source_current);
    }

    #[test]
    fn mode_from_wire() {
        assert_eq!(ChannelMode::try_from(1u8).ok(), Some(ChannelMode::Svmi));
        assert_eq!(ChannelMode::try_from(2u8).ok(), Some(ChannelMode::Simv));
        assert!(ChannelMode::try_from(3u8).is_err());
        assert_eq!(ChannelMode::iter().count(), 3);
    }
}
