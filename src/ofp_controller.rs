//! The controller event loop.
//!
//! A single thread owns the policy and every switch's outbound queue. It reacts
//! to connection events, then drains whatever queues are allowed to make
//! progress. Nothing here blocks on a switch: sends go through the switch's
//! bounded writer channel and report backpressure instead of waiting.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam_channel::{select, Receiver, Sender};
use log::{debug, error, info, trace, warn};

use crate::config::BarrierMode;
use crate::connection::{Event, SendResult};
use crate::error::PolicyError;
use crate::flow_table::{build_install_sequence, OutboundEntry, OutboundQueue};
use crate::ofp_message::OfpMessage;
use crate::openflow0x01::message::Message;
use crate::openflow0x01::SwitchFeatures;
use crate::policy::{Reaction, ReactivePolicy, SwitchId};
use crate::registry::Registry;

/// Largest message the 16-bit header length can describe.
const MAX_MESSAGE_LEN: usize = u16::MAX as usize;

/// Raised when a policy cannot serve traffic and someone should look.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorAlert {
    pub switch_id: SwitchId,
    pub error: PolicyError,
}

#[derive(Copy, Clone, Debug)]
pub struct ControllerSettings {
    pub barrier_mode: BarrierMode,
    /// Upper bound on how long a queue held back by backpressure waits for a retry.
    pub tick: Duration,
}

/// Per-switch state, owned by the event loop.
#[derive(Debug)]
struct SwitchState {
    conn_id: u64,
    queue: OutboundQueue,
    next_xid: u32,
    /// Xid of a barrier sent in sync mode whose reply has not arrived.
    pending_barrier: Option<u32>,
}

impl SwitchState {
    fn new(conn_id: u64) -> SwitchState {
        SwitchState {
            conn_id,
            queue: OutboundQueue::new(),
            next_xid: 1,
            pending_barrier: None,
        }
    }

    /// Xid 0 belongs to the handshake; the counter wraps around it.
    fn allocate_xid(&mut self) -> u32 {
        let xid = self.next_xid;
        self.next_xid = match self.next_xid.wrapping_add(1) {
            0 => 1,
            n => n,
        };
        xid
    }
}

pub struct Controller<P: ReactivePolicy> {
    policy: P,
    registry: Registry,
    settings: ControllerSettings,
    events: Receiver<Event>,
    shutdown: Receiver<()>,
    alerts: Option<Sender<OperatorAlert>>,
    switches: HashMap<SwitchId, SwitchState>,
}

impl<P: ReactivePolicy> Controller<P> {
    pub fn new(
        policy: P,
        registry: Registry,
        settings: ControllerSettings,
        events: Receiver<Event>,
        shutdown: Receiver<()>,
    ) -> Controller<P> {
        Controller {
            policy,
            registry,
            settings,
            events,
            shutdown,
            alerts: None,
            switches: HashMap::new(),
        }
    }

    /// Publish `OperatorAlert`s on `alerts`.
    pub fn with_alerts(mut self, alerts: Sender<OperatorAlert>) -> Controller<P> {
        self.alerts = Some(alerts);
        self
    }

    #[cfg(test)]
    fn policy(&self) -> &P {
        &self.policy
    }

    #[cfg(test)]
    fn switch_ids(&self) -> Vec<SwitchId> {
        let mut ids: Vec<SwitchId> = self.switches.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    #[cfg(test)]
    fn queue_len(&self, sw: SwitchId) -> Option<usize> {
        self.switches.get(&sw).map(|state| state.queue.len())
    }

    #[cfg(test)]
    fn pending_barrier(&self, sw: SwitchId) -> Option<u32> {
        self.switches.get(&sw).and_then(|state| state.pending_barrier)
    }

    /// Run until a shutdown signal arrives or every event sender is gone.
    pub fn run(&mut self) {
        info!("controller running ({:?} barriers)", self.settings.barrier_mode);
        let events = self.events.clone();
        let shutdown = self.shutdown.clone();
        let tick = self.settings.tick;
        loop {
            let stop = select! {
                recv(events) -> event => match event {
                    Ok(event) => {
                        self.handle_event(event);
                        false
                    }
                    Err(_) => {
                        info!("event channel closed");
                        true
                    }
                },
                recv(shutdown) -> _ => {
                    info!("shutdown requested");
                    true
                },
                default(tick) => false,
            };
            if stop {
                break;
            }
            self.drain_all();
        }
        info!("controller stopped with {} switch(es) connected", self.switches.len());
    }

    fn is_current(&self, sw: SwitchId, conn_id: u64) -> bool {
        matches!(self.switches.get(&sw), Some(state) if state.conn_id == conn_id)
    }

    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::SwitchConnected { switch_id, conn_id } => match self.registry.get(switch_id) {
                Some(handle) if handle.conn_id() == conn_id => {
                    self.switch_connected(switch_id, conn_id, handle.features())
                }
                _ => debug!("switch {:#x}: conn {} went away before setup", switch_id, conn_id),
            },
            Event::SwitchDisconnected { switch_id, conn_id } => {
                if !self.is_current(switch_id, conn_id) {
                    debug!("switch {:#x}: ignoring stale disconnect of conn {}", switch_id, conn_id);
                    return;
                }
                self.switches.remove(&switch_id);
                self.registry.remove_if(switch_id, conn_id);
                self.policy.switch_disconnected(switch_id);
                info!("switch {:#x}: forgotten", switch_id);
            }
            Event::PacketIn {
                switch_id,
                conn_id,
                xid,
                packet_in,
            } => {
                if !self.is_current(switch_id, conn_id) {
                    debug!("switch {:#x}: dropping packet-in from stale conn {}", switch_id, conn_id);
                    return;
                }
                trace!("switch {:#x}: packet-in xid {} on port {}", switch_id, xid, packet_in.port);
                match self.policy.packet_in(switch_id, &packet_in) {
                    Ok(Reaction::Drop) => trace!("switch {:#x}: dropped", switch_id),
                    Ok(Reaction::PacketOut(po)) => self.enqueue(switch_id, OutboundEntry::PacketOut(po)),
                    Ok(Reaction::PolicyChanged { switches, packet_out }) => {
                        for sw in switches {
                            self.reinstall(sw);
                        }
                        self.enqueue(switch_id, OutboundEntry::PacketOut(packet_out));
                    }
                    Err(e) => {
                        error!("switch {:#x}: dropping packet on port {}: {}", switch_id, packet_in.port, e);
                        if let Some(ref alerts) = self.alerts {
                            let _ = alerts.send(OperatorAlert { switch_id, error: e });
                        }
                    }
                }
            }
            Event::BarrierReply { switch_id, conn_id, xid } => {
                if !self.is_current(switch_id, conn_id) {
                    return;
                }
                if let Some(state) = self.switches.get_mut(&switch_id) {
                    if state.pending_barrier == Some(xid) {
                        trace!("switch {:#x}: barrier {} acknowledged", switch_id, xid);
                        state.pending_barrier = None;
                    } else if self.settings.barrier_mode == BarrierMode::Sync {
                        debug!("switch {:#x}: unexpected barrier reply {}", switch_id, xid);
                    }
                }
            }
            Event::PortStatus { switch_id, status, .. } => {
                info!(
                    "switch {:#x}: port {} ({}) {:?}, link down: {}",
                    switch_id, status.desc.port_no, status.desc.name, status.reason, status.desc.state.down
                );
            }
            Event::SwitchError { switch_id, error, .. } => {
                warn!(
                    "switch {:#x}: error type {} code {} ({} bytes of offending message)",
                    switch_id,
                    error.typ,
                    error.code,
                    error.data.len()
                );
            }
        }
    }

    fn switch_connected(&mut self, sw: SwitchId, conn_id: u64, features: &SwitchFeatures) {
        self.policy.switch_connected(sw, features);
        let rules = self.policy.compile(sw);
        info!("switch {:#x}: installing {} rule(s)", sw, rules.len());
        let mut state = SwitchState::new(conn_id);
        state.queue.extend(build_install_sequence(sw, rules));
        if let Some(old) = self.switches.insert(sw, state) {
            debug!("switch {:#x}: replaced state of conn {}", sw, old.conn_id);
        }
    }

    /// Queue the full table of `sw` again. Switches not connected right now
    /// get their table when they connect.
    fn reinstall(&mut self, sw: SwitchId) {
        let rules = self.policy.compile(sw);
        match self.switches.get_mut(&sw) {
            Some(state) => {
                debug!("switch {:#x}: reinstalling {} rule(s)", sw, rules.len());
                state.queue.extend(build_install_sequence(sw, rules));
            }
            None => debug!("switch {:#x}: not connected, skipping reinstall", sw),
        }
    }

    fn enqueue(&mut self, sw: SwitchId, entry: OutboundEntry) {
        if let Some(state) = self.switches.get_mut(&sw) {
            state.queue.push_back(entry);
        }
    }

    /// Push every queue as far as it can go right now.
    pub fn drain_all(&mut self) {
        let mode = self.settings.barrier_mode;
        for (&sw, state) in self.switches.iter_mut() {
            if state.queue.is_empty() || state.pending_barrier.is_some() {
                continue;
            }
            drain(&self.registry, mode, sw, state);
        }
    }
}

fn drain(registry: &Registry, mode: BarrierMode, sw: SwitchId, state: &mut SwitchState) {
    let handle = match registry.get(sw) {
        Some(handle) if handle.conn_id() == state.conn_id => handle,
        _ => return,
    };
    while state.pending_barrier.is_none() {
        let entry = match state.queue.pop_consolidated() {
            Some(entry) => entry,
            None => break,
        };
        let msg = entry.to_message();
        let size = Message::size_of(&msg);
        if size > MAX_MESSAGE_LEN {
            error!("switch {:#x}: dropping {} byte message, over the {} byte frame limit", sw, size, MAX_MESSAGE_LEN);
            continue;
        }
        let xid = state.allocate_xid();
        match handle.send(xid, &msg) {
            SendResult::Sent => {
                if entry == OutboundEntry::Barrier && mode == BarrierMode::Sync {
                    state.pending_barrier = Some(xid);
                }
            }
            SendResult::Backpressure => {
                trace!("switch {:#x}: backpressure with {} queued", sw, state.queue.len() + 1);
                state.queue.push_front(entry);
                break;
            }
            SendResult::Disconnected => {
                error!("switch {:#x}: send failed, discarding {} queued", sw, state.queue.len());
                handle.close();
                state.queue.clear();
                break;
            }
        }
    }
}
