use std::collections::{BTreeMap, HashMap, HashSet};

use crate::{
    chip::CoreLocation,
    error::{LoadError, Result},
    loader::resources::{ResourceDescriptor, ResourceRequirement},
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct VertexId(pub usize);

/// Produces the data specification program for one placed vertex.
pub trait DataSpecGenerator: Send + Sync {
    fn generate_data_spec(
        &self,
        context: &SpecContext<'_>,
    ) -> std::result::Result<Vec<u8>, BoxError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordingConfig {
    pub buffer_size: u64,
    pub minimum_sdram_for_buffering: u64,
    pub auto_pause_and_resume: bool,
}

/// A logical computation unit and the capabilities it offers the loader.
pub struct Vertex {
    pub label: String,
    pub resources: ResourceDescriptor,
    pub binary_name: Option<String>,
    pub data_spec: Option<Box<dyn DataSpecGenerator>>,
    pub recording: Option<RecordingConfig>,
}

impl std::fmt::Debug for Vertex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vertex")
            .field("label", &self.label)
            .field("resources", &self.resources)
            .field("binary_name", &self.binary_name)
            .field("data_spec", &self.data_spec.is_some())
            .field("recording", &self.recording)
            .finish()
    }
}

impl Vertex {
    pub fn new(label: impl Into<String>, resources: ResourceDescriptor) -> Self {
        Self {
            label: label.into(),
            resources,
            binary_name: None,
            data_spec: None,
            recording: None,
        }
    }

    pub fn with_binary(mut self, name: &str) -> Self {
        self.binary_name = Some(name.to_string());
        self
    }

    pub fn with_data_spec(mut self, generator: impl DataSpecGenerator + 'static) -> Self {
        self.data_spec = Some(Box::new(generator));
        self
    }

    pub fn with_recording(mut self, recording: RecordingConfig) -> Self {
        self.recording = Some(recording);
        self
    }

    pub fn requires_data_spec(&self) -> bool {
        self.data_spec.is_some()
    }
}

#[derive(Debug, Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_vertex(&mut self, vertex: Vertex) -> VertexId {
        self.vertices.push(vertex);
        VertexId(self.vertices.len() - 1)
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub core: CoreLocation,
    pub vertex: VertexId,
}

impl Placement {
    pub fn new(x: u8, y: u8, p: u8, vertex: VertexId) -> Self {
        Self {
            core: CoreLocation::new(x, y, p),
            vertex,
        }
    }

    pub fn x(&self) -> u8 {
        self.core.x
    }

    pub fn y(&self) -> u8 {
        self.core.y
    }

    pub fn p(&self) -> u8 {
        self.core.p
    }
}

/// No two placements may share a core, and every vertex must exist.
pub fn validate_placements(graph: &Graph, placements: &[Placement]) -> Result<()> {
    let mut seen = HashSet::with_capacity(placements.len());
    for placement in placements {
        if !seen.insert(placement.core) {
            return Err(LoadError::DuplicatePlacement(placement.core));
        }
        if graph.vertex(placement.vertex).is_none() {
            return Err(LoadError::UnknownVertex {
                core: placement.core,
                vertex: placement.vertex,
            });
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAndMask {
    pub key: u32,
    pub mask: u32,
}

#[derive(Debug, Default, Clone)]
pub struct RoutingInfo {
    keys: HashMap<VertexId, Vec<KeyAndMask>>,
}

impl RoutingInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_key(&mut self, vertex: VertexId, key: u32, mask: u32) {
        self.keys
            .entry(vertex)
            .or_default()
            .push(KeyAndMask { key, mask });
    }

    pub fn keys_for(&self, vertex: VertexId) -> &[KeyAndMask] {
        self.keys.get(&vertex).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Outbound host endpoint assigned to a core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpTag {
    pub board_address: String,
    pub tag: u8,
    pub ip_address: String,
    pub port: u16,
    pub strip_sdp: bool,
}

/// Inbound host endpoint routed to a core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseIpTag {
    pub board_address: String,
    pub tag: u8,
    pub port: u16,
    pub sdp_port: u8,
}

#[derive(Debug, Default, Clone)]
pub struct TagAssignments {
    ip_tags: BTreeMap<VertexId, Vec<IpTag>>,
    reverse_ip_tags: BTreeMap<VertexId, Vec<ReverseIpTag>>,
}

impl TagAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_ip_tag(&mut self, vertex: VertexId, tag: IpTag) {
        self.ip_tags.entry(vertex).or_default().push(tag);
    }

    pub fn add_reverse_ip_tag(&mut self, vertex: VertexId, tag: ReverseIpTag) {
        self.reverse_ip_tags.entry(vertex).or_default().push(tag);
    }

    pub fn ip_tags_for(&self, vertex: VertexId) -> &[IpTag] {
        self.ip_tags.get(&vertex).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn reverse_ip_tags_for(&self, vertex: VertexId) -> &[ReverseIpTag] {
        self.reverse_ip_tags
            .get(&vertex)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Everything a generator may consult when writing one core's program.
pub struct SpecContext<'a> {
    pub placement: &'a Placement,
    pub vertex: &'a Vertex,
    pub resources: &'a ResourceRequirement,
    pub routing_info: &'a RoutingInfo,
    pub ip_tags: &'a [IpTag],
    pub reverse_ip_tags: &'a [ReverseIpTag],
}

impl SpecContext<'_> {
    pub fn keys(&self) -> &[KeyAndMask] {
        self.routing_info.keys_for(self.placement.vertex)
    }
}
