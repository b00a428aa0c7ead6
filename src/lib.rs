#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

pub mod config;
pub mod engine;
pub mod error;
pub mod memory;
pub mod persona;
pub mod platform;

pub use config::Config;
pub use engine::{CycleReport, Engine};
pub use error::{EngineError, Result};
pub use persona::PersonaProfile;
