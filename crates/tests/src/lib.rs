//! Cross-crate integration scenarios for the amp chain
//!
//! Everything here is test-only; the crate has no public API.

#[cfg(test)]
mod chain_integration;
#[cfg(test)]
mod library_integration;
#[cfg(test)]
mod support;
