//! Host vendor control requests.
//!
//! Only the requests that drive sampling and the channel modes are decoded here. The USB layer
//! stalls every request that fails to decode.
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::channel::{Channel, ChannelMode};
use crate::synchronizer::Frame;

#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RequestCode {
    Info = 0x00,
    SetMode = 0x53,
    FrameNumber = 0x6F,
    ConfigureSampling = 0xC5,
    SetInterleave = 0xDD,
}

/// Identification string selected by an info request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum Info {
    Hardware = 0,
    Firmware = 1,
}

/// Raw fields of a vendor setup packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SetupPacket {
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Info(Info),
    SetMode { channel: Channel, mode: ChannelMode },
    FrameNumber,
    /// Periods below [crate::control::MIN_PERIOD] stop sampling.
    ConfigureSampling { period: u16, start_frame: Frame },
    SetInterleave(bool),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestError {
    Unknown(u8),
    Info(u16),
    Channel(u8),
    Mode(u8),
}

impl TryFrom<SetupPacket> for Request {
    type Error = RequestError;

    fn try_from(setup: SetupPacket) -> Result<Self, Self::Error> {
        let code = RequestCode::try_from(setup.request)
            .map_err(|_| RequestError::Unknown(setup.request))?;
        Ok(match code {
            RequestCode::Info => Self::Info(
                Info::try_from(setup.index).map_err(|_| RequestError::Info(setup.index))?,
            ),
            RequestCode::SetMode => {
                let channel = (setup.value & 0xf) as u8;
                let mode = (setup.index & 0xf) as u8;
                Self::SetMode {
                    channel: Channel::try_from(channel)
                        .map_err(|_| RequestError::Channel(channel))?,
                    mode: ChannelMode::try_from(mode).map_err(|_| RequestError::Mode(mode))?,
                }
            }
            RequestCode::FrameNumber => Self::FrameNumber,
            RequestCode::ConfigureSampling => Self::ConfigureSampling {
                period: setup.value,
                start_frame: setup.index,
            },
            RequestCode::SetInterleave => Self::SetInterleave(setup.value & 1 != 0),
        })
    }
}

impl Request {
    /// Whether the request has an IN data stage.
    pub fn has_response(&self) -> bool {
        matches!(self, Self::Info(_) | Self::FrameNumber)
    }
}

/// Frame number data stage.
pub fn frame_response(frame: Frame) -> [u8; 2] {
    frame.to_le_bytes()
}
