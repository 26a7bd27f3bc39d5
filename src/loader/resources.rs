use std::collections::BTreeMap;

use crate::{
    chip::{ChipCoord, CoreLocation},
    config::{PlatformConfig, DATA_SPECABLE_BASIC_SETUP_INFO_N_WORDS, SARK_PER_MALLOC_SDRAM_USAGE},
    error::{LoadError, Result},
    graph::{Graph, Placement, Vertex},
};

/// One SDRAM region a vertex reserves, sized by its atom count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub id: u8,
    pub fixed_bytes: u64,
    pub bytes_per_atom: u64,
}

impl RegionDescriptor {
    pub fn new(id: u8, fixed_bytes: u64, bytes_per_atom: u64) -> Self {
        Self {
            id,
            fixed_bytes,
            bytes_per_atom,
        }
    }

    pub fn size(&self, n_atoms: u32) -> u64 {
        self.fixed_bytes
            .saturating_add(self.bytes_per_atom.saturating_mul(n_atoms as u64))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpTagSpec {
    pub ip_address: String,
    pub port: u16,
    pub strip_sdp: bool,
    pub tag: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseIpTagSpec {
    pub port: u16,
    pub sdp_port: u8,
    pub tag: Option<u8>,
}

/// Declarative resource needs of a vertex.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub n_atoms: u32,
    pub regions: Vec<RegionDescriptor>,
    pub dtcm_fixed: u64,
    pub dtcm_per_atom: u64,
    pub cpu_fixed: u64,
    pub cpu_per_atom: u64,
    pub ip_tags: Vec<IpTagSpec>,
    pub reverse_ip_tags: Vec<ReverseIpTagSpec>,
    pub provenance_bytes: u64,
}

impl ResourceDescriptor {
    pub fn new(n_atoms: u32) -> Self {
        Self {
            n_atoms,
            ..Default::default()
        }
    }

    pub fn region(mut self, id: u8, fixed_bytes: u64, bytes_per_atom: u64) -> Self {
        self.regions
            .push(RegionDescriptor::new(id, fixed_bytes, bytes_per_atom));
        self
    }

    pub fn dtcm(mut self, fixed: u64, per_atom: u64) -> Self {
        self.dtcm_fixed = fixed;
        self.dtcm_per_atom = per_atom;
        self
    }

    pub fn cpu_cycles(mut self, fixed: u64, per_atom: u64) -> Self {
        self.cpu_fixed = fixed;
        self.cpu_per_atom = per_atom;
        self
    }

    pub fn ip_tag(mut self, tag: IpTagSpec) -> Self {
        self.ip_tags.push(tag);
        self
    }

    pub fn reverse_ip_tag(mut self, tag: ReverseIpTagSpec) -> Self {
        self.reverse_ip_tags.push(tag);
        self
    }

    pub fn provenance(mut self, bytes: u64) -> Self {
        self.provenance_bytes = bytes;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRequirement {
    pub sdram_bytes: u64,
    pub dtcm_bytes: u64,
    pub cpu_cycles: u64,
    pub ip_tags: Vec<IpTagSpec>,
    pub reverse_ip_tags: Vec<ReverseIpTagSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Sdram,
    Dtcm,
    CpuCycles,
    IpTags,
    ReverseIpTags,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResourceKind::Sdram => "bytes of SDRAM",
            ResourceKind::Dtcm => "bytes of DTCM",
            ResourceKind::CpuCycles => "CPU cycles per tick",
            ResourceKind::IpTags => "IP tags",
            ResourceKind::ReverseIpTags => "reverse IP tags",
        };
        f.write_str(name)
    }
}

fn sdram_for(vertex: &Vertex) -> u64 {
    let resources = &vertex.resources;
    let n_atoms = resources.n_atoms;

    let mut mallocs = resources.regions.len() as u64;
    let mut sdram = DATA_SPECABLE_BASIC_SETUP_INFO_N_WORDS * 4;
    for region in &resources.regions {
        sdram = sdram.saturating_add(region.size(n_atoms));
    }

    if let Some(recording) = &vertex.recording {
        let buffer = if recording.auto_pause_and_resume {
            recording.minimum_sdram_for_buffering
        } else {
            recording.buffer_size
        };
        sdram = sdram.saturating_add(buffer);
        mallocs += 1;
    }

    if resources.provenance_bytes > 0 {
        sdram = sdram.saturating_add(resources.provenance_bytes);
        mallocs += 1;
    }

    sdram.saturating_add(mallocs * SARK_PER_MALLOC_SDRAM_USAGE)
}

fn check_ceiling(vertex: &Vertex, kind: ResourceKind, required: u64, available: u64) -> Result<()> {
    if required > available {
        return Err(LoadError::ResourceOverflow {
            vertex: vertex.label.clone(),
            kind,
            required,
            available,
        });
    }
    Ok(())
}

/// Works out what `vertex` needs on one core and proves it fits.
///
/// Makes no remote calls, so it is safe to run over the whole graph before
/// anything is sent.
pub fn compute_resources(vertex: &Vertex, config: &PlatformConfig) -> Result<ResourceRequirement> {
    let resources = &vertex.resources;
    let n_atoms = resources.n_atoms as u64;

    let requirement = ResourceRequirement {
        sdram_bytes: sdram_for(vertex),
        dtcm_bytes: resources
            .dtcm_fixed
            .saturating_add(resources.dtcm_per_atom.saturating_mul(n_atoms)),
        cpu_cycles: resources
            .cpu_fixed
            .saturating_add(resources.cpu_per_atom.saturating_mul(n_atoms)),
        ip_tags: resources.ip_tags.clone(),
        reverse_ip_tags: resources.reverse_ip_tags.clone(),
    };

    check_ceiling(vertex, ResourceKind::Sdram, requirement.sdram_bytes, config.sdram_per_core)?;
    check_ceiling(vertex, ResourceKind::Dtcm, requirement.dtcm_bytes, config.dtcm_per_core)?;
    check_ceiling(
        vertex,
        ResourceKind::CpuCycles,
        requirement.cpu_cycles,
        config.cpu_cycles_per_tick,
    )?;
    check_ceiling(
        vertex,
        ResourceKind::IpTags,
        requirement.ip_tags.len() as u64,
        config.max_ip_tags as u64,
    )?;
    check_ceiling(
        vertex,
        ResourceKind::ReverseIpTags,
        requirement.reverse_ip_tags.len() as u64,
        config.max_reverse_ip_tags as u64,
    )?;

    tracing::trace!(
        "{}: {} bytes SDRAM, {} bytes DTCM, {} cycles",
        vertex.label,
        requirement.sdram_bytes,
        requirement.dtcm_bytes,
        requirement.cpu_cycles
    );

    Ok(requirement)
}

/// Checks every placement and the SDRAM total of each chip.
///
/// A core may hold only one placement.
pub fn check_placements(
    graph: &Graph,
    placements: &[Placement],
    config: &PlatformConfig,
) -> Result<BTreeMap<CoreLocation, ResourceRequirement>> {
    let mut requirements = BTreeMap::new();
    let mut per_chip: BTreeMap<ChipCoord, u64> = BTreeMap::new();

    for placement in placements {
        if requirements.contains_key(&placement.core) {
            return Err(LoadError::DuplicatePlacement(placement.core));
        }
        let vertex = graph
            .vertex(placement.vertex)
            .ok_or(LoadError::UnknownVertex {
                core: placement.core,
                vertex: placement.vertex,
            })?;

        let requirement = compute_resources(vertex, config)?;
        let total = per_chip.entry(placement.core.chip()).or_default();
        *total = total.saturating_add(requirement.sdram_bytes);
        requirements.insert(placement.core, requirement);
    }

    for (chip, required) in per_chip {
        if required > config.sdram_per_chip {
            return Err(LoadError::ChipSdramOverflow {
                chip,
                required,
                available: config.sdram_per_chip,
            });
        }
    }

    tracing::debug!("{} placements fit their cores", requirements.len());
    Ok(requirements)
}
