use std::collections::BTreeMap;

use crate::{
    chip::{transceiver::Transceiver, CoreLocation, CoreSubsets},
    config::PlatformConfig,
    error::{LoadError, Result},
    graph::validate_placements,
    loader::{
        binary::{
            check_binary_size, load_executable_images, BinaryImage, ExecutableFinder,
            ExecutableTargets,
        },
        coordinator::{CompletionToken, ExecutionCoordinator},
        pipeline::PipelinedTransmitter,
        resources::check_placements,
        transmit::{
            ProgramHandle, SpecInputs, SpecTransmitter, TransmissionReport, TransmissionResult,
        },
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransmitStrategy {
    /// Interpreter flooded to every participant, then programs written from
    /// the calling thread.
    #[default]
    Synchronous,
    /// Programs written by a sender thread that starts the interpreter on
    /// each core as soon as its program is in place.
    Pipelined,
}

/// Outcome of a completed data loading phase.
#[derive(Debug, Clone)]
pub struct LoadedApplicationData {
    pub token: CompletionToken,
    pub dsg_targets: BTreeMap<CoreLocation, ProgramHandle>,
    pub executable_targets: ExecutableTargets,
    pub report: TransmissionReport,
}

/// Runs the whole data specification phase and waits for the interpreter
/// fleet to finish.
///
/// Nothing is sent until every placement has been shown to fit.
pub fn load_application_data<T: Transceiver + Send + ?Sized>(
    transceiver: &mut T,
    inputs: &SpecInputs<'_>,
    finder: &ExecutableFinder,
    config: &PlatformConfig,
    strategy: TransmitStrategy,
) -> Result<LoadedApplicationData> {
    config.validate()?;
    validate_placements(inputs.graph, inputs.placements)?;
    check_placements(inputs.graph, inputs.placements, config)?;

    let participants: CoreSubsets = inputs
        .placements
        .iter()
        .filter(|p| {
            inputs
                .graph
                .vertex(p.vertex)
                .map(|v| v.requires_data_spec())
                .unwrap_or(false)
        })
        .map(|p| p.core)
        .collect();

    let interpreter_path = finder.get_executable_path(&config.interpreter_binary)?;
    let interpreter = BinaryImage::from_file(&interpreter_path)?;
    check_binary_size(&interpreter, config)?;

    tracing::info!(
        "loading data for {} placements, {} need the interpreter ({strategy:?})",
        inputs.placements.len(),
        participants.len()
    );

    let mut coordinator = ExecutionCoordinator::from_config(config, participants)?;

    let transmitted = match strategy {
        TransmitStrategy::Synchronous => {
            coordinator.launch(transceiver, &interpreter, config)?;
            SpecTransmitter::new(config, finder)
                .and_then(|transmitter| transmitter.transmit(transceiver, inputs))
        }
        TransmitStrategy::Pipelined => PipelinedTransmitter::new(config, finder, &interpreter)
            .and_then(|transmitter| transmitter.transmit(transceiver, inputs)),
    };

    let TransmissionResult {
        dsg_targets,
        executable_targets,
        report,
    } = match transmitted {
        Ok(result) => result,
        Err(err) => {
            // Release whatever cores the interpreter already holds.
            tracing::error!("app {}: transmission failed: {err}", config.dse_app_id);
            if let Err(stop_err) = transceiver.stop_application(config.dse_app_id) {
                tracing::warn!("app {}: stop after abort failed: {stop_err}", config.dse_app_id);
            }
            return Err(err);
        }
    };

    if strategy == TransmitStrategy::Pipelined {
        coordinator.mark_running()?;
    }
    let token = coordinator.await_completion(transceiver)?;

    Ok(LoadedApplicationData {
        token,
        dsg_targets,
        executable_targets,
        report,
    })
}

/// Floods the application binaries once the data phase has completed.
pub fn load_application_executables<T: Transceiver + ?Sized>(
    transceiver: &mut T,
    loaded: &LoadedApplicationData,
    config: &PlatformConfig,
) -> Result<usize> {
    tracing::info!(
        "app {}: loading {} binaries after app {} finished",
        config.app_id,
        loaded.executable_targets.n_binaries(),
        loaded.token.app_id
    );
    load_executable_images(transceiver, &loaded.executable_targets, config.app_id, config)
}
