//! Start of sampling aligned to the host's bus frame counter.
//!
//! Several instruments on one host start on the same frame if they are configured with the same
//! target frame. A target of 0 starts on the first frame after release.

/// Host bus frame number.
pub type Frame = u16;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum StartSynchronizer {
    #[default]
    Idle,
    /// Configured, but the first outbound packet has not arrived.
    Waiting { target: Frame },
    /// Ready to start on `target`.
    Released { target: Frame },
}

impl StartSynchronizer {
    pub fn arm(&mut self, target: Frame) {
        *self = Self::Waiting { target };
    }

    pub fn release(&mut self) {
        if let Self::Waiting { target } = *self {
            *self = Self::Released { target };
        }
    }

    pub fn disarm(&mut self) {
        *self = Self::Idle;
    }

    /// Handle a frame tick. Returns `true` exactly once, when the sample timer is to be started.
    pub fn on_frame(&mut self, frame: Frame) -> bool {
        match *self {
            Self::Released { target } if target == 0 || target == frame => {
                *self = Self::Idle;
                true
            }
            _ => false,
        }
    }
}
