//! # Tracking Domain Module
//!
//! Core domain types for the ingestion service.

pub mod entities;
pub mod events;
pub mod value_objects;

pub use entities::*;
pub use events::*;
pub use value_objects::*;
