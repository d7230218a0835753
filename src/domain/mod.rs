//! Domain Layer
//!
//! Entities, ports and pure selection logic. Nothing here performs I/O.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod services;
pub mod value_objects;
