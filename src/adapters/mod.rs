//! Adapters Layer
//!
//! Outbound adapters implementing the domain ports against real panels.

pub mod outbound;
