pub mod config;
pub mod device;
pub mod discovery;
pub mod exchange;
pub mod library;
pub mod monitor;
pub mod safety;
pub mod show;
pub mod storage;
pub mod validation;

pub mod prelude {
    pub use crate::{
        config::*,
        device::{ControllerHub, DeviceApi, DeviceError, DeviceFactory, HttpDeviceFactory},
        discovery::Discovery,
        library::TypeLibrary,
        monitor::StatusMonitor,
        safety::SafetyGate,
        show::*,
        storage::{Snapshot, Store},
    };
}
