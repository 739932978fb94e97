use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{info, warn};

use crate::device::{DeviceError, DeviceResult};

/// Process-wide interlock for pyrotechnic commands. Lighting is never gated.
/// Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct SafetyGate {
    armed: Arc<AtomicBool>,
}

impl SafetyGate {
    pub fn new(armed: bool) -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(armed)),
        }
    }

    pub fn arm(&self) {
        if !self.armed.swap(true, Ordering::SeqCst) {
            warn!("System ARMED, firework commands will be sent");
        }
    }

    pub fn disarm(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            info!("System disarmed");
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Refuse `action` unless armed
    pub fn check(&self, action: &'static str) -> DeviceResult<()> {
        if self.is_armed() {
            Ok(())
        } else {
            warn!("Refusing to {} while disarmed", action);
            Err(DeviceError::Disarmed(action))
        }
    }
}
