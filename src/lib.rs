pub mod catalog;
pub mod collections;
pub mod config;
pub mod core;
pub mod error;
pub mod events;
pub mod index;
pub mod logging;
pub mod model;
pub mod queue;
pub mod store;

pub use crate::core::MusicCore;
pub use crate::error::{CoreError, Result};
