//! Data model shared between the desk and the controller simulator.

pub mod controller;
pub mod library;
pub mod show;
pub mod wire;

pub use controller::*;
pub use library::*;
pub use show::*;
pub use wire::*;
