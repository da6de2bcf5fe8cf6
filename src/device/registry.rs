//! Session registry: one session per physical device

use super::{DeviceInfo, DeviceSession, Enumerator};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Hands out one [`DeviceSession`] per serial number.
///
/// Two callers resolving the same serial get the same session, so the
/// sequence counter and control socket stay coherent within a process.
/// The registry is an explicit object; create one where the application
/// wires its dependencies and share it from there.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<DeviceSession>>>,
    enumerator: Option<Arc<dyn Enumerator>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            sessions: Mutex::new(HashMap::new()),
            enumerator: None,
        }
    }

    /// A registry whose sessions can re-enumerate their device after a
    /// reset.
    pub fn with_enumerator(enumerator: Arc<dyn Enumerator>) -> Self {
        SessionRegistry {
            sessions: Mutex::new(HashMap::new()),
            enumerator: Some(enumerator),
        }
    }

    /// Session for the device described by `device_info`, created on first
    /// resolve and shared afterwards.
    pub fn resolve(&self, device_info: DeviceInfo) -> Arc<DeviceSession> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(&device_info.serial_number) {
            return Arc::clone(session);
        }
        let serial_number = device_info.serial_number.clone();
        log::debug!("Creating session for device {}", serial_number);
        let session = match self.enumerator.as_ref() {
            Some(enumerator) => Arc::new(DeviceSession::with_enumerator(
                device_info,
                Arc::clone(enumerator),
            )),
            None => Arc::new(DeviceSession::new(device_info)),
        };
        sessions.insert(serial_number, Arc::clone(&session));
        session
    }

    /// Drop the registry's reference to a device's session. Callers still
    /// holding the `Arc` keep a working session.
    pub fn remove(&self, serial_number: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.lock().remove(serial_number)
    }

    /// Drop all sessions.
    pub fn clear(&self) {
        self.sessions.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
