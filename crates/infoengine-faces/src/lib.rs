//! infoengine-faces — Face identity workflows.
//!
//! Enroll a person from a photo, identify the person in a query photo,
//! and remove a person with everything stored for them. The presentation
//! layer only sees plain data and [`FaceError`].

pub mod config;
pub mod error;
pub mod service;

pub use config::{Config, ConfigError};
pub use error::FaceError;
pub use service::{FaceService, MatchOutcome, PersonMatch, Removal, StoreStatus};
