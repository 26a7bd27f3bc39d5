use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::mpsc::{self, Receiver},
};

use crate::{
    chip::{transceiver::Transceiver, CoreLocation, CoreSubsets},
    config::PlatformConfig,
    data_spec::{ArtifactStore, DataSpecProgram},
    error::{LoadError, Result},
};

use super::{
    binary::{check_binary_size, BinaryImage, ExecutableFinder},
    progress::ProgressBar,
    resources::check_placements,
    transmit::{
        prepare, write_program, PlacementOutcome, Prepared, ProgramHandle, SpecInputs,
        TransmissionReport, TransmissionResult,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpecJob {
    pub core: CoreLocation,
    pub program: DataSpecProgram,
    pub target_app_id: u8,
}

/// Commands understood by the sender thread.
///
/// `Stop` is only seen after every `Send` queued before it has been handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecCommand {
    Send(SpecJob),
    Stop,
}

#[derive(Debug, Default)]
pub struct SenderSummary {
    pub handles: BTreeMap<CoreLocation, ProgramHandle>,
    pub floods: usize,
}

/// Drains `commands` until `Stop`, writing each program and then starting the
/// interpreter on that one core.
pub fn run_sender<T: Transceiver + ?Sized>(
    transceiver: &mut T,
    commands: Receiver<SpecCommand>,
    interpreter: &BinaryImage,
    config: &PlatformConfig,
) -> Result<SenderSummary> {
    let mut summary = SenderSummary::default();

    loop {
        let job = match commands.recv() {
            Ok(SpecCommand::Send(job)) => job,
            Ok(SpecCommand::Stop) => {
                tracing::debug!("sender: stop after {} programs", summary.handles.len());
                return Ok(summary);
            }
            Err(_) => return Err(LoadError::SenderDisconnected),
        };

        let handle = write_program(transceiver, job.core, &job.program, job.target_app_id, config)?;

        let cores = CoreSubsets::from_iter([job.core]);
        transceiver.execute_flood(&cores, interpreter.bytes(), config.dse_app_id)?;
        summary.floods += 1;

        tracing::trace!("{}: interpreter started", job.core);
        summary.handles.insert(job.core, handle);
    }
}

/// Generates programs on the calling thread while a scoped sender thread
/// writes them out through a bounded queue.
pub struct PipelinedTransmitter<'a> {
    config: &'a PlatformConfig,
    finder: &'a ExecutableFinder,
    interpreter: &'a BinaryImage,
    artifacts: Option<ArtifactStore>,
}

impl<'a> PipelinedTransmitter<'a> {
    pub fn new(
        config: &'a PlatformConfig,
        finder: &'a ExecutableFinder,
        interpreter: &'a BinaryImage,
    ) -> Result<Self> {
        config.validate()?;
        check_binary_size(interpreter, config)?;

        let artifacts = match &config.artifact_dir {
            Some(dir) => Some(ArtifactStore::new(dir)?),
            None => None,
        };

        Ok(Self {
            config,
            finder,
            interpreter,
            artifacts,
        })
    }

    pub fn transmit<T: Transceiver + Send + ?Sized>(
        &self,
        transceiver: &mut T,
        inputs: &SpecInputs<'_>,
    ) -> Result<TransmissionResult> {
        let requirements = check_placements(inputs.graph, inputs.placements, self.config)?;

        let mut report = TransmissionReport::default();
        for placement in inputs.placements {
            report.record(placement.core, PlacementOutcome::NotAttempted);
        }
        let mut result = TransmissionResult::default();
        let mut artifacts: BTreeMap<CoreLocation, PathBuf> = BTreeMap::new();

        let mut progress = ProgressBar::new(
            inputs.placements.len(),
            "Generating and asynchronously sending data specifications",
        );

        let (commands, receiver) = mpsc::sync_channel(self.config.pipeline_depth);
        let config = self.config;
        let interpreter = self.interpreter;

        let (sender_result, abort, failure) = std::thread::scope(|scope| {
            let sender =
                scope.spawn(move || run_sender(transceiver, receiver, interpreter, config));

            let mut abort = None;
            let mut failure = None;

            for placement in inputs.placements {
                let core = placement.core;
                let Some(requirement) = requirements.get(&core) else {
                    continue;
                };

                let spec = match prepare(
                    inputs,
                    placement,
                    requirement,
                    self.finder,
                    self.artifacts.as_ref(),
                ) {
                    Ok(Prepared::NoDataSpec) => {
                        report.record(core, PlacementOutcome::NoDataSpec);
                        progress.update();
                        continue;
                    }
                    Ok(Prepared::Ready(spec)) => spec,
                    Ok(Prepared::GeneratorFailed(reason)) => {
                        report.record(core, PlacementOutcome::Failed(reason.clone()));
                        failure = Some((core, reason));
                        break;
                    }
                    Err(err) => {
                        abort = Some(err);
                        break;
                    }
                };

                if let Some(binary) = &spec.binary {
                    if let Err(err) = result.executable_targets.add_processor(binary, core) {
                        abort = Some(err);
                        break;
                    }
                }
                if let Some(path) = spec.artifact {
                    artifacts.insert(core, path);
                }

                let job = SpecJob {
                    core,
                    program: spec.program,
                    target_app_id: config.app_id,
                };
                if commands.send(SpecCommand::Send(job)).is_err() {
                    // The sender has already failed; its error is reported below.
                    break;
                }
                progress.update();
            }

            // Sending Stop may fail for the same reason.
            let _ = commands.send(SpecCommand::Stop);
            drop(commands);

            let sender_result = sender
                .join()
                .unwrap_or(Err(LoadError::SenderDisconnected));
            (sender_result, abort, failure)
        });

        progress.end();
        let summary = sender_result?;

        for (core, mut handle) in summary.handles {
            handle.artifact = artifacts.remove(&core);
            report.record(core, PlacementOutcome::Written(handle.clone()));
            result.dsg_targets.insert(core, handle);
        }

        if let Some(err) = abort {
            return Err(err);
        }
        if let Some((core, reason)) = failure {
            return Err(LoadError::SpecGeneration {
                core,
                reason,
                report: Box::new(report),
            });
        }

        tracing::info!(
            "{} programs sent, {} interpreter floods",
            result.dsg_targets.len(),
            summary.floods
        );
        result.report = report;
        Ok(result)
    }
}
