use super::ChipCoord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterEntry {
    pub key: u32,
    pub mask: u32,
    pub processor_ids: Vec<u8>,
    pub link_ids: Vec<u8>,
    pub defaultable: bool,
}

pub const NUM_LINKS: u8 = 6;
/// Processor bits fill the rest of the route word.
pub const MAX_PROCESSORS: u8 = 32 - NUM_LINKS;

impl RouterEntry {
    /// Links occupy bits 0-5, processors start at bit 6.
    ///
    /// `None` when a link or processor id has no bit in the word.
    pub fn route_word(&self) -> Option<u32> {
        let mut route = 0u32;
        for &link in &self.link_ids {
            if link >= NUM_LINKS {
                return None;
            }
            route |= 1 << link;
        }
        for &processor in &self.processor_ids {
            if processor >= MAX_PROCESSORS {
                return None;
            }
            route |= 1 << (NUM_LINKS + processor);
        }
        Some(route)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingTable {
    pub chip: ChipCoord,
    pub entries: Vec<RouterEntry>,
}

/// Router diagnostic counter register slots.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum DiagnosticCounter {
    LocalMulticast = 0,
    ExternalMulticast = 1,
    LocalPointToPoint = 2,
    ExternalPointToPoint = 3,
    LocalNearestNeighbour = 4,
    ExternalNearestNeighbour = 5,
    LocalFixedRoute = 6,
    ExternalFixedRoute = 7,
    DroppedMulticast = 8,
    DroppedPointToPoint = 9,
    DroppedNearestNeighbour = 10,
    DroppedFixedRoute = 11,
    User0 = 12,
    User1 = 13,
    User2 = 14,
    User3 = 15,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterDestination {
    Dump = 0,
    Local = 1,
    LocalMonitor = 2,
    Link0 = 3,
    Link1 = 4,
    Link2 = 5,
    Link3 = 6,
    Link4 = 7,
    Link5 = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterSource {
    Local = 0,
    NonLocal = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterPayload {
    WithPayload = 0,
    WithoutPayload = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterDefaultRouting {
    DefaultRouted = 0,
    NonDefaultRouted = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterEmergencyRouting {
    Normal = 0,
    FirstStageCombined = 1,
    FirstStage = 2,
    SecondStage = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FilterPacketType {
    Multicast = 0,
    PointToPoint = 1,
    NearestNeighbour = 2,
    FixedRoute = 3,
}

const ENABLE_INTERRUPT_OFFSET: u32 = 30;
const MATCH_EMERGENCY_OFFSET: u32 = 29;
const DESTINATION_OFFSET: u32 = 16;
const SOURCE_OFFSET: u32 = 14;
const PAYLOAD_OFFSET: u32 = 12;
const DEFAULT_ROUTING_OFFSET: u32 = 10;
const EMERGENCY_ROUTING_OFFSET: u32 = 4;
const PACKET_TYPE_OFFSET: u32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiagnosticFilter {
    pub enable_interrupt_on_counter_event: bool,
    pub match_emergency_routing_status_to_incoming_packet: bool,
    pub destinations: Vec<FilterDestination>,
    pub sources: Vec<FilterSource>,
    pub payload_statuses: Vec<FilterPayload>,
    pub default_routing_statuses: Vec<FilterDefaultRouting>,
    pub emergency_routing_statuses: Vec<FilterEmergencyRouting>,
    pub packet_types: Vec<FilterPacketType>,
}

/// An empty criterion matches every value of its field.
fn field_bits(values: impl Iterator<Item = u32>, width: u32) -> u32 {
    let bits = values.fold(0, |acc, v| acc | (1 << v));
    if bits == 0 {
        (1 << width) - 1
    } else {
        bits
    }
}

impl DiagnosticFilter {
    /// Counts multicast packets that fell through to default routing.
    pub fn default_routed_multicast(source: FilterSource) -> Self {
        Self {
            sources: vec![source],
            default_routing_statuses: vec![FilterDefaultRouting::DefaultRouted],
            packet_types: vec![FilterPacketType::Multicast],
            ..Default::default()
        }
    }

    pub fn filter_word(&self) -> u32 {
        let mut word = 0;
        if self.enable_interrupt_on_counter_event {
            word |= 1 << ENABLE_INTERRUPT_OFFSET;
        }
        if self.match_emergency_routing_status_to_incoming_packet {
            word |= 1 << MATCH_EMERGENCY_OFFSET;
        }

        word |= field_bits(self.destinations.iter().map(|v| *v as u32), 9) << DESTINATION_OFFSET;
        word |= field_bits(self.sources.iter().map(|v| *v as u32), 2) << SOURCE_OFFSET;
        word |= field_bits(self.payload_statuses.iter().map(|v| *v as u32), 2) << PAYLOAD_OFFSET;
        word |= field_bits(self.default_routing_statuses.iter().map(|v| *v as u32), 2)
            << DEFAULT_ROUTING_OFFSET;
        word |= field_bits(self.emergency_routing_statuses.iter().map(|v| *v as u32), 4)
            << EMERGENCY_ROUTING_OFFSET;
        word |= field_bits(self.packet_types.iter().map(|v| *v as u32), 4) << PACKET_TYPE_OFFSET;

        word
    }
}
