use std::{collections::BTreeMap, path::PathBuf};

use crate::{
    chip::{transceiver::Transceiver, CoreLocation},
    config::PlatformConfig,
    data_spec::{ArtifactStore, DataSpecProgram, DseHeader},
    error::{LoadError, Result},
    graph::{Graph, Placement, RoutingInfo, SpecContext, TagAssignments},
};

use super::{
    binary::{ExecutableFinder, ExecutableTargets},
    progress::ProgressBar,
    resources::{check_placements, ResourceRequirement},
};

/// Where a core's program ended up in remote memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramHandle {
    pub header_address: u32,
    pub base_address: u32,
    pub length: u32,
    /// Local copy, when an artifact directory is configured.
    pub artifact: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementOutcome {
    Written(ProgramHandle),
    NoDataSpec,
    Failed(String),
    NotAttempted,
}

/// Per-placement result of one transmission batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransmissionReport {
    pub outcomes: BTreeMap<CoreLocation, PlacementOutcome>,
}

impl TransmissionReport {
    fn with_placements(placements: &[Placement]) -> Self {
        Self {
            outcomes: placements
                .iter()
                .map(|p| (p.core, PlacementOutcome::NotAttempted))
                .collect(),
        }
    }

    pub(crate) fn record(&mut self, core: CoreLocation, outcome: PlacementOutcome) {
        self.outcomes.insert(core, outcome);
    }

    fn matching(&self, f: impl Fn(&PlacementOutcome) -> bool) -> Vec<CoreLocation> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| f(outcome))
            .map(|(core, _)| *core)
            .collect()
    }

    pub fn succeeded(&self) -> Vec<CoreLocation> {
        self.matching(|o| matches!(o, PlacementOutcome::Written(_)))
    }

    pub fn skipped(&self) -> Vec<CoreLocation> {
        self.matching(|o| matches!(o, PlacementOutcome::NoDataSpec))
    }

    pub fn failed(&self) -> Vec<CoreLocation> {
        self.matching(|o| matches!(o, PlacementOutcome::Failed(_)))
    }

    pub fn not_attempted(&self) -> Vec<CoreLocation> {
        self.matching(|o| matches!(o, PlacementOutcome::NotAttempted))
    }

    pub fn outcome(&self, core: CoreLocation) -> Option<&PlacementOutcome> {
        self.outcomes.get(&core)
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransmissionResult {
    pub dsg_targets: BTreeMap<CoreLocation, ProgramHandle>,
    pub executable_targets: ExecutableTargets,
    pub report: TransmissionReport,
}

/// The collaborators a generator may consult.
#[derive(Clone, Copy)]
pub struct SpecInputs<'a> {
    pub graph: &'a Graph,
    pub placements: &'a [Placement],
    pub routing_info: &'a RoutingInfo,
    pub tags: &'a TagAssignments,
}

/// Allocates header and body, writes them in that order, then hands the
/// header address to the core through its user 0 register.
pub fn write_program<T: Transceiver + ?Sized>(
    transceiver: &mut T,
    core: CoreLocation,
    program: &DataSpecProgram,
    target_app_id: u8,
    config: &PlatformConfig,
) -> Result<ProgramHandle> {
    let chip = core.chip();
    let length = program.length_word(core)?;

    let header_address = transceiver.malloc_sdram(chip, DseHeader::SIZE, config.dse_app_id)?;
    let base_address = transceiver.malloc_sdram(chip, program.len(), config.dse_app_id)?;

    let header = DseHeader {
        base_address,
        program_length: length,
        target_app_id: target_app_id as u32,
        memory_map_report: config.write_memory_map_report as u32,
    };

    transceiver.write_memory(chip, header_address, &header.to_bytes())?;
    transceiver.write_memory(chip, base_address, program.as_bytes())?;

    let user_0 = transceiver.user_0_register_address(core);
    transceiver.write_memory32(chip, user_0, header_address)?;

    tracing::debug!(
        "{core}: {length} byte program at 0x{base_address:08x}, header at 0x{header_address:08x}"
    );

    Ok(ProgramHandle {
        header_address,
        base_address,
        length,
        artifact: None,
    })
}

/// What one placement contributes to the batch once its generator has run.
pub(crate) struct PreparedSpec {
    pub program: DataSpecProgram,
    pub binary: Option<PathBuf>,
    pub artifact: Option<PathBuf>,
}

pub(crate) enum Prepared {
    NoDataSpec,
    Ready(PreparedSpec),
    GeneratorFailed(String),
}

/// Runs the generator for one placement and resolves its binary.
pub(crate) fn prepare(
    inputs: &SpecInputs<'_>,
    placement: &Placement,
    requirement: &ResourceRequirement,
    finder: &ExecutableFinder,
    artifacts: Option<&ArtifactStore>,
) -> Result<Prepared> {
    let vertex = inputs
        .graph
        .vertex(placement.vertex)
        .ok_or(LoadError::UnknownVertex {
            core: placement.core,
            vertex: placement.vertex,
        })?;

    let Some(generator) = &vertex.data_spec else {
        return Ok(Prepared::NoDataSpec);
    };

    let context = SpecContext {
        placement,
        vertex,
        resources: requirement,
        routing_info: inputs.routing_info,
        ip_tags: inputs.tags.ip_tags_for(placement.vertex),
        reverse_ip_tags: inputs.tags.reverse_ip_tags_for(placement.vertex),
    };

    let program = match generator.generate_data_spec(&context) {
        Ok(bytes) => DataSpecProgram::new(bytes),
        Err(err) => {
            tracing::error!(
                "{}: data spec generation for {} failed: {err}",
                placement.core,
                vertex.label
            );
            return Ok(Prepared::GeneratorFailed(err.to_string()));
        }
    };

    let binary = match &vertex.binary_name {
        Some(name) => Some(finder.get_executable_path(name)?),
        None => {
            tracing::warn!("{}: {} has no binary to run", placement.core, vertex.label);
            None
        }
    };

    let artifact = match artifacts {
        Some(store) => Some(store.persist(placement.core, &program)?),
        None => None,
    };

    Ok(Prepared::Ready(PreparedSpec {
        program,
        binary,
        artifact,
    }))
}

/// Sends every program from the calling thread, one placement at a time.
pub struct SpecTransmitter<'a> {
    config: &'a PlatformConfig,
    finder: &'a ExecutableFinder,
    artifacts: Option<ArtifactStore>,
}

impl<'a> SpecTransmitter<'a> {
    pub fn new(config: &'a PlatformConfig, finder: &'a ExecutableFinder) -> Result<Self> {
        let artifacts = match &config.artifact_dir {
            Some(dir) => Some(ArtifactStore::new(dir)?),
            None => None,
        };

        Ok(Self {
            config,
            finder,
            artifacts,
        })
    }

    pub fn artifacts(&self) -> Option<&ArtifactStore> {
        self.artifacts.as_ref()
    }

    /// Generates and writes the program of every placement that has one.
    ///
    /// The first generator failure stops the batch. Programs already written
    /// stay in remote memory; the returned error carries the report naming them.
    pub fn transmit<T: Transceiver + ?Sized>(
        &self,
        transceiver: &mut T,
        inputs: &SpecInputs<'_>,
    ) -> Result<TransmissionResult> {
        let requirements = check_placements(inputs.graph, inputs.placements, self.config)?;

        let mut result = TransmissionResult {
            report: TransmissionReport::with_placements(inputs.placements),
            ..Default::default()
        };
        let mut progress = ProgressBar::new(
            inputs.placements.len(),
            "Generating and sending data specifications",
        );

        for placement in inputs.placements {
            let core = placement.core;
            let Some(requirement) = requirements.get(&core) else {
                continue;
            };

            match prepare(inputs, placement, requirement, self.finder, self.artifacts.as_ref())? {
                Prepared::NoDataSpec => {
                    result.report.record(core, PlacementOutcome::NoDataSpec);
                }
                Prepared::GeneratorFailed(reason) => {
                    result
                        .report
                        .record(core, PlacementOutcome::Failed(reason.clone()));
                    progress.end();
                    return Err(LoadError::SpecGeneration {
                        core,
                        reason,
                        report: Box::new(result.report),
                    });
                }
                Prepared::Ready(spec) => {
                    let mut handle = write_program(
                        transceiver,
                        core,
                        &spec.program,
                        self.config.app_id,
                        self.config,
                    )?;
                    handle.artifact = spec.artifact;

                    if let Some(binary) = &spec.binary {
                        result.executable_targets.add_processor(binary, core)?;
                    }
                    result
                        .report
                        .record(core, PlacementOutcome::Written(handle.clone()));
                    result.dsg_targets.insert(core, handle);
                }
            }

            progress.update();
        }

        progress.end();
        Ok(result)
    }
}
