//! Type-keyed session pool
//!
//! Holds at most one live session per device type so repeated requests
//! reuse the slow-to-establish serial connection. Sessions idle for more
//! than thirty seconds are closed on the next acquisition to release the
//! USB port.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::DeviceType;
use crate::hardware::manager::DeviceManager;
use crate::hardware::session::DeviceSession;
use crate::hardware::HardwareResult;

/// Idle window after which a pooled session is recycled
pub const MAX_IDLE_TIME: Duration = Duration::from_secs(30);

struct Slot {
    session: Arc<Mutex<DeviceSession>>,
    last_used: Instant,
}

pub struct SessionPool {
    manager: Arc<DeviceManager>,
    slots: Mutex<HashMap<DeviceType, Slot>>,
}

impl SessionPool {
    pub fn new(manager: Arc<DeviceManager>) -> Self {
        SessionPool {
            manager,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Get a healthy session for the device type, creating one if needed.
    ///
    /// A cached session is reused only when it is connected, passes a
    /// connection check, and has been used within the idle window;
    /// otherwise it is closed and replaced.
    pub fn acquire(&self, device: DeviceType) -> HardwareResult<Arc<Mutex<DeviceSession>>> {
        let mut slots = self.slots.lock();

        if let Some(slot) = slots.get_mut(&device) {
            let idle_ok = slot.last_used.elapsed() <= MAX_IDLE_TIME;
            let healthy = {
                let mut session = slot.session.lock();
                session.is_connected() && session.check_connection()
            };

            if healthy && idle_ok {
                tracing::info!("Reusing existing {} session", device);
                slot.last_used = Instant::now();
                return Ok(slot.session.clone());
            }

            if !idle_ok {
                tracing::info!("Closing idle {} session", device);
            } else {
                tracing::warn!("Existing {} session failed health check", device);
            }
            slot.session.lock().close();
            slots.remove(&device);
        }

        tracing::info!("Creating new {} session", device);
        let config = self.manager.catalog().get(device).clone();
        let session = DeviceSession::connect(device, config, self.manager.clone(), None)?;
        let session = Arc::new(Mutex::new(session));
        slots.insert(
            device,
            Slot {
                session: session.clone(),
                last_used: Instant::now(),
            },
        );
        tracing::info!("New {} session established", device);
        Ok(session)
    }

    /// Session handle without health checks or creation, if one is live
    pub fn peek(&self, device: DeviceType) -> Option<Arc<Mutex<DeviceSession>>> {
        self.slots.lock().get(&device).map(|s| s.session.clone())
    }

    /// Whether a live, connected session exists for the device type.
    /// A session whose mutex is held is being driven by a campaign and
    /// counts as connected.
    pub fn is_connected(&self, device: DeviceType) -> bool {
        self.slots
            .lock()
            .get(&device)
            .map(|s| match s.session.try_lock() {
                Some(session) => session.is_connected(),
                None => true,
            })
            .unwrap_or(false)
    }

    /// Close every live session; run on process shutdown
    pub fn close_all(&self) {
        let mut slots = self.slots.lock();
        for (device, slot) in slots.drain() {
            tracing::info!("Closing {} session", device);
            slot.session.lock().close();
        }
    }
}
