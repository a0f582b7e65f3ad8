//! Invader core: the real-time guitar amplifier signal chain
//!
//! Everything in this crate is file-system agnostic except for the
//! configuration and preset layer, which uses `tokio::fs`.

pub mod domain;
