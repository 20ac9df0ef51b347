//! The table of live switch connections.

use std::collections::HashMap;
use std::sync::Arc;

use log::warn;
use parking_lot::Mutex;

use crate::connection::SwitchHandle;
use crate::policy::SwitchId;

/// Live connections keyed by switch id. At most one per switch.
///
/// Cloning shares the table. Connection threads admit and remove themselves;
/// the controller looks handles up to send.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    switches: Arc<Mutex<HashMap<SwitchId, Arc<SwitchHandle>>>>,
}

impl Registry {
    pub fn new() -> Registry {
        Registry::default()
    }

    /// Register `handle` under its switch id.
    ///
    /// A switch reconnecting while its old connection still looks alive
    /// replaces it; the old one is closed. Returns the replaced handle.
    pub fn admit(&self, handle: Arc<SwitchHandle>) -> Option<Arc<SwitchHandle>> {
        let switch_id = handle.switch_id();
        let conn_id = handle.conn_id();
        let old = self.switches.lock().insert(switch_id, handle);
        if let Some(ref old) = old {
            if old.is_connected() {
                warn!(
                    "switch {:#x} connected again (conn {}) while conn {} is live, closing the old one",
                    switch_id,
                    conn_id,
                    old.conn_id()
                );
            }
            old.close();
        }
        old
    }

    pub fn get(&self, switch_id: SwitchId) -> Option<Arc<SwitchHandle>> {
        self.switches.lock().get(&switch_id).cloned()
    }

    /// Remove the entry for `switch_id` only if it still belongs to `conn_id`.
    pub fn remove_if(&self, switch_id: SwitchId, conn_id: u64) -> bool {
        let mut switches = self.switches.lock();
        match switches.get(&switch_id) {
            Some(handle) if handle.conn_id() == conn_id => {
                switches.remove(&switch_id);
                true
            }
            _ => false,
        }
    }

    /// Remove and close whatever connection `switch_id` has. Safe to repeat.
    pub fn disconnect(&self, switch_id: SwitchId) -> bool {
        let removed = self.switches.lock().remove(&switch_id);
        match removed {
            Some(handle) => {
                handle.close();
                true
            }
            None => false,
        }
    }

    pub fn switch_ids(&self) -> Vec<SwitchId> {
        let mut ids: Vec<SwitchId> = self.switches.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.switches.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.lock().is_empty()
    }
}
