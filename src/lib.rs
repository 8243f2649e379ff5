#![cfg_attr(not(test), no_std)]

#[cfg(target_os = "none")]
pub mod hardware;

pub mod channel;
pub mod command;
pub mod control;
pub mod engine;
pub mod packet;
pub mod pipeline;
pub mod sample_clock;
pub mod scheduler;
pub mod synchronizer;

#[cfg(test)]
mod testing;
