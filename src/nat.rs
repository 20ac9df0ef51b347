//! Dynamic network address translation.
//!
//! The first packet of a flow from a private endpoint is sent to the
//! controller, which allocates a public port for the endpoint and installs a
//! pair of translation rules, one per traffic direction. Mappings live for the
//! lifetime of the process; nothing is ever evicted.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use log::{debug, info};

use crate::config::{Location, NatConfig};
use crate::error::{NatError, PolicyError};
use crate::openflow0x01::{Action, Mask, PacketIn, PacketOut, Pattern, Payload, PseudoPort};
use crate::packet::{rewrite_endpoint, Endpoint, Packet, ETH_TYP_IP};
use crate::policy::{Reaction, ReactivePolicy, Rule, StaticPolicy, SwitchId};

/// One bidirectional private/public mapping.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TranslationEntry {
    pub private_addr: Ipv4Addr,
    pub private_port: u16,
    pub public_port: u16,
}

/// Append-only allocator of public ports in `[min_port, max_port]`.
///
/// Both directions are kept in separate maps that are only ever updated
/// together, so a lookup never observes half an allocation.
#[derive(Clone, Debug)]
pub struct TranslationTable {
    public_addr: Ipv4Addr,
    min_port: u16,
    max_port: u16,
    next_port: u16,
    by_private: HashMap<(Ipv4Addr, u16), u16>,
    by_public: HashMap<u16, (Ipv4Addr, u16)>,
}

impl TranslationTable {
    pub fn new(public_addr: Ipv4Addr, min_port: u16, max_port: u16) -> Result<TranslationTable, NatError> {
        if min_port >= max_port {
            return Err(NatError::InvalidRange { min_port, max_port });
        }
        Ok(TranslationTable {
            public_addr,
            min_port,
            max_port,
            next_port: min_port,
            by_private: HashMap::new(),
            by_public: HashMap::new(),
        })
    }

    pub fn public_addr(&self) -> Ipv4Addr {
        self.public_addr
    }

    /// Number of ports in the configured range.
    pub fn capacity(&self) -> usize {
        (self.max_port - self.min_port) as usize + 1
    }

    pub fn len(&self) -> usize {
        self.by_public.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_public.is_empty()
    }

    fn step(&self, port: u16) -> u16 {
        if port == self.max_port {
            self.min_port
        } else {
            port + 1
        }
    }

    /// Return the public port for `(private_addr, private_port)`, allocating one
    /// if the endpoint has none yet.
    ///
    /// Allocation scans forward from where the previous one stopped, wrapping
    /// from `max_port` to `min_port` and skipping ports in use.
    pub fn allocate_public_port(&mut self, private_addr: Ipv4Addr, private_port: u16) -> Result<u16, NatError> {
        if let Some(&public) = self.by_private.get(&(private_addr, private_port)) {
            return Ok(public);
        }
        let mut candidate = self.next_port;
        for _ in 0..self.capacity() {
            if !self.by_public.contains_key(&candidate) {
                self.by_private.insert((private_addr, private_port), candidate);
                self.by_public.insert(candidate, (private_addr, private_port));
                self.next_port = self.step(candidate);
                return Ok(candidate);
            }
            candidate = self.step(candidate);
        }
        Err(NatError::PortSpaceExhausted {
            min_port: self.min_port,
            max_port: self.max_port,
        })
    }

    pub fn lookup_public_port(&self, private_addr: Ipv4Addr, private_port: u16) -> Option<u16> {
        self.by_private.get(&(private_addr, private_port)).copied()
    }

    pub fn lookup_private_address(&self, public_port: u16) -> Option<(Ipv4Addr, u16)> {
        self.by_public.get(&public_port).copied()
    }

    /// All mappings, ordered by public port.
    pub fn entries(&self) -> Vec<TranslationEntry> {
        let mut entries: Vec<TranslationEntry> = self
            .by_public
            .iter()
            .map(|(&public_port, &(private_addr, private_port))| TranslationEntry {
                private_addr,
                private_port,
                public_port,
            })
            .collect();
        entries.sort_by_key(|e| e.public_port);
        entries
    }
}

pub const TRANSLATION_PRIORITY: u16 = 1000;
pub const INSIDE_TO_CONTROLLER_PRIORITY: u16 = 100;
pub const OUTSIDE_TO_CONTROLLER_PRIORITY: u16 = 90;
pub const DEFAULT_DROP_PRIORITY: u16 = 0;

/// Send whole packets to the controller.
const CONTROLLER_MAX_LEN: u16 = 0xffff;

/// NAT in front of a private network, layered over a static policy for
/// everything the NAT does not own.
pub struct NatPolicy {
    inside: Location,
    outside: Location,
    table: TranslationTable,
    /// IP protocol of the flow that created each mapping, keyed by public port.
    protocols: HashMap<u16, u8>,
    base: StaticPolicy,
}

impl NatPolicy {
    pub fn new(config: &NatConfig, base: StaticPolicy) -> Result<NatPolicy, NatError> {
        Ok(NatPolicy {
            inside: config.inside,
            outside: config.outside,
            table: TranslationTable::new(config.public_ip, config.min_port, config.max_port)?,
            protocols: HashMap::new(),
            base,
        })
    }

    pub fn table(&self) -> &TranslationTable {
        &self.table
    }

    /// Port on the inside switch that leads to the public network.
    fn egress_outbound(&self) -> u16 {
        if self.inside.switch == self.outside.switch {
            self.outside.port
        } else {
            self.inside.uplink.unwrap_or(self.outside.port)
        }
    }

    /// Port on the outside switch that leads to the private network.
    fn egress_inbound(&self) -> u16 {
        if self.inside.switch == self.outside.switch {
            self.inside.port
        } else {
            self.outside.uplink.unwrap_or(self.inside.port)
        }
    }

    fn affected_switches(&self) -> Vec<SwitchId> {
        let mut switches = vec![self.inside.switch];
        if self.outside.switch != self.inside.switch {
            switches.push(self.outside.switch);
        }
        switches
    }

    fn ip_pattern(in_port: u16) -> Pattern {
        Pattern {
            in_port: Some(in_port),
            dl_typ: Some(ETH_TYP_IP),
            ..Pattern::match_all()
        }
    }

    fn exact(addr: Ipv4Addr) -> Option<Mask<u32>> {
        Some(Mask {
            value: u32::from(addr),
            mask: None,
        })
    }

    fn outbound_rule(&self, entry: &TranslationEntry, proto: u8) -> Rule {
        let pattern = Pattern {
            nw_proto: Some(proto),
            nw_src: Self::exact(entry.private_addr),
            tp_src: Some(entry.private_port),
            ..Self::ip_pattern(self.inside.port)
        };
        Rule::new(
            TRANSLATION_PRIORITY,
            pattern,
            vec![
                Action::SetNwSrc(u32::from(self.table.public_addr())),
                Action::SetTpSrc(entry.public_port),
                Action::Output(PseudoPort::PhysicalPort(self.egress_outbound())),
            ],
        )
    }

    fn inbound_rule(&self, entry: &TranslationEntry, proto: u8) -> Rule {
        let pattern = Pattern {
            nw_proto: Some(proto),
            nw_dst: Self::exact(self.table.public_addr()),
            tp_dst: Some(entry.public_port),
            ..Self::ip_pattern(self.outside.port)
        };
        Rule::new(
            TRANSLATION_PRIORITY,
            pattern,
            vec![
                Action::SetNwDst(u32::from(entry.private_addr)),
                Action::SetTpDst(entry.private_port),
                Action::Output(PseudoPort::PhysicalPort(self.egress_inbound())),
            ],
        )
    }

    /// A `PacketOut` releasing `pkt` with `endpoint` rewritten to `(addr, port)`.
    ///
    /// Unbuffered packets are rewritten here; buffered ones only exist on the
    /// switch, so the rewrite travels as actions.
    fn translated(pkt: &PacketIn, endpoint: Endpoint, addr: Ipv4Addr, port: u16, egress: u16) -> PacketOut {
        let output = Action::Output(PseudoPort::PhysicalPort(egress));
        let rewrite = match endpoint {
            Endpoint::Src => [Action::SetNwSrc(u32::from(addr)), Action::SetTpSrc(port)],
            Endpoint::Dst => [Action::SetNwDst(u32::from(addr)), Action::SetTpDst(port)],
        };
        let (output_payload, apply_actions) = match pkt.input_payload {
            Payload::NotBuffered(ref bytes) => match rewrite_endpoint(bytes, endpoint, u32::from(addr), port) {
                Some(rewritten) => (Payload::NotBuffered(rewritten), vec![output]),
                None => (pkt.input_payload.clone(), vec![rewrite[0], rewrite[1], output]),
            },
            Payload::Buffered(_, _) => (pkt.input_payload.clone(), vec![rewrite[0], rewrite[1], output]),
        };
        PacketOut {
            output_payload,
            port_id: Some(pkt.port),
            apply_actions,
        }
    }
}

impl ReactivePolicy for NatPolicy {
    fn compile(&self, sw: SwitchId) -> Vec<Rule> {
        let mut rules = vec![];
        for entry in self.table.entries() {
            let proto = match self.protocols.get(&entry.public_port) {
                Some(&proto) => proto,
                None => continue,
            };
            if sw == self.inside.switch {
                rules.push(self.outbound_rule(&entry, proto));
            }
            if sw == self.outside.switch {
                rules.push(self.inbound_rule(&entry, proto));
            }
        }
        let to_controller = vec![Action::Output(PseudoPort::Controller(CONTROLLER_MAX_LEN))];
        if sw == self.inside.switch {
            rules.push(Rule::new(
                INSIDE_TO_CONTROLLER_PRIORITY,
                Self::ip_pattern(self.inside.port),
                to_controller.clone(),
            ));
        }
        if sw == self.outside.switch {
            rules.push(Rule::new(
                OUTSIDE_TO_CONTROLLER_PRIORITY,
                Self::ip_pattern(self.outside.port),
                to_controller,
            ));
        }
        if sw == self.inside.switch || sw == self.outside.switch {
            rules.push(Rule::new(DEFAULT_DROP_PRIORITY, Pattern::match_all(), vec![]));
        }
        rules.extend(self.base.compile(sw));
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    fn packet_in(&mut self, sw: SwitchId, pkt: &PacketIn) -> Result<Reaction, PolicyError> {
        let parsed = match Packet::parse(pkt.input_payload.bytes()) {
            Some(parsed) => parsed,
            None => return Ok(self.base.classify(sw, pkt)),
        };
        let flow = parsed.ip().and_then(|ip| ip.ports().map(|ports| (ip, ports)));
        let (ip, (src_port, dst_port)) = match flow {
            Some(flow) => flow,
            None => return Ok(self.base.classify(sw, pkt)),
        };

        if sw == self.inside.switch && pkt.port == self.inside.port {
            let private_addr = Ipv4Addr::from(ip.src);
            let public_addr = self.table.public_addr();
            if let Some(public_port) = self.table.lookup_public_port(private_addr, src_port) {
                debug!("{}:{} already mapped to {}, translating in place", private_addr, src_port, public_port);
                let po = Self::translated(pkt, Endpoint::Src, public_addr, public_port, self.egress_outbound());
                return Ok(Reaction::PacketOut(po));
            }
            let public_port = self.table.allocate_public_port(private_addr, src_port)?;
            self.protocols.insert(public_port, ip.proto);
            info!(
                "mapped {}:{} to {}:{} ({} of {} ports in use)",
                private_addr,
                src_port,
                public_addr,
                public_port,
                self.table.len(),
                self.table.capacity()
            );
            let packet_out = Self::translated(pkt, Endpoint::Src, public_addr, public_port, self.egress_outbound());
            return Ok(Reaction::PolicyChanged {
                switches: self.affected_switches(),
                packet_out,
            });
        }

        if sw == self.outside.switch && pkt.port == self.outside.port && Ipv4Addr::from(ip.dst) == self.table.public_addr() {
            return Ok(match self.table.lookup_private_address(dst_port) {
                Some((private_addr, private_port)) => Reaction::PacketOut(Self::translated(
                    pkt,
                    Endpoint::Dst,
                    private_addr,
                    private_port,
                    self.egress_inbound(),
                )),
                None => {
                    debug!("no mapping for public port {}, dropping", dst_port);
                    Reaction::Drop
                }
            });
        }

        Ok(self.base.classify(sw, pkt))
    }
}
