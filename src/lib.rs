//! Rate-gated gateways for the MIPS device API and Telegram, the periodic
//! polling job built on them, and a queued logging pipeline.

pub mod config;
pub mod gate;
pub mod http;
pub mod logging;
pub mod mips;
pub mod runner;
pub mod telegram;
