use std::time::{Duration, Instant};

use crate::{
    chip::{transceiver::Transceiver, CoreLocation, CoreState, CoreSubsets},
    config::PlatformConfig,
    error::{LoadError, Result},
};

use super::binary::{load_and_flood, BinaryImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Loading,
    Running,
    Finished,
    TimedOut,
}

/// Proof that every participant finished and the application was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionToken {
    pub app_id: u8,
    pub finished: usize,
    pub polls: usize,
    pub elapsed: Duration,
}

/// Starts the interpreter fleet and blocks until it has finished.
#[derive(Debug)]
pub struct ExecutionCoordinator {
    app_id: u8,
    participants: CoreSubsets,
    poll_interval: Duration,
    timeout: Duration,
    phase: Phase,
}

impl ExecutionCoordinator {
    pub fn new(
        app_id: u8,
        participants: CoreSubsets,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        if poll_interval.is_zero() {
            return Err(LoadError::InvalidConfig(
                "poll interval must be non-zero".to_string(),
            ));
        }
        if poll_interval > timeout {
            return Err(LoadError::InvalidConfig(format!(
                "poll interval {poll_interval:?} is longer than the timeout {timeout:?}"
            )));
        }

        Ok(Self {
            app_id,
            participants,
            poll_interval,
            timeout,
            phase: Phase::Loading,
        })
    }

    /// Coordinator for the data spec interpreter, using the configured polling.
    pub fn from_config(config: &PlatformConfig, participants: CoreSubsets) -> Result<Self> {
        Self::new(
            config.dse_app_id,
            participants,
            config.poll_interval,
            config.completion_timeout,
        )
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn app_id(&self) -> u8 {
        self.app_id
    }

    pub fn participants(&self) -> &CoreSubsets {
        &self.participants
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Floods `interpreter` onto every participant.
    pub fn launch<T: Transceiver + ?Sized>(
        &mut self,
        transceiver: &mut T,
        interpreter: &BinaryImage,
        config: &PlatformConfig,
    ) -> Result<()> {
        self.expect_phase(Phase::Loading)?;
        load_and_flood(transceiver, interpreter, &self.participants, self.app_id, config)?;
        self.phase = Phase::Running;
        Ok(())
    }

    /// For when the interpreter was started elsewhere, one core at a time.
    pub fn mark_running(&mut self) -> Result<()> {
        self.expect_phase(Phase::Loading)?;
        self.phase = Phase::Running;
        Ok(())
    }

    pub fn run_and_await<T: Transceiver + ?Sized>(
        &mut self,
        transceiver: &mut T,
        interpreter: &BinaryImage,
        config: &PlatformConfig,
    ) -> Result<CompletionToken> {
        self.launch(transceiver, interpreter, config)?;
        self.await_completion(transceiver)
    }

    /// Polls until the finished count equals the participant count exactly,
    /// then stops the application.
    pub fn await_completion<T: Transceiver + ?Sized>(
        &mut self,
        transceiver: &mut T,
    ) -> Result<CompletionToken> {
        self.expect_phase(Phase::Running)?;

        let expected = self.participants.len();
        let start = Instant::now();
        let mut polls = 0;

        loop {
            polls += 1;
            let finished = transceiver.get_core_state_count(self.app_id, CoreState::Finished)?;

            if finished == expected {
                transceiver.stop_application(self.app_id)?;
                self.phase = Phase::Finished;

                let elapsed = start.elapsed();
                tracing::info!(
                    "app {}: {finished} cores finished after {polls} polls ({}s)",
                    self.app_id,
                    elapsed.as_secs_f32()
                );
                return Ok(CompletionToken {
                    app_id: self.app_id,
                    finished,
                    polls,
                    elapsed,
                });
            }

            if finished > expected {
                tracing::error!(
                    "app {}: {finished} cores finished but only {expected} participate",
                    self.app_id
                );
                return Err(LoadError::OverCount {
                    app_id: self.app_id,
                    expected,
                    observed: finished,
                });
            }

            self.check_failures(transceiver)?;

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                self.phase = Phase::TimedOut;
                let outstanding = self.outstanding(transceiver)?;
                tracing::error!(
                    "app {}: {} of {expected} cores never finished",
                    self.app_id,
                    outstanding.len()
                );
                return Err(LoadError::PartialCompletion {
                    app_id: self.app_id,
                    elapsed,
                    outstanding,
                });
            }

            tracing::debug!(
                "app {}: {finished} of {expected} cores finished, waiting",
                self.app_id
            );
            std::thread::sleep(self.poll_interval);
        }
    }

    fn expect_phase(&self, phase: Phase) -> Result<()> {
        if self.phase != phase {
            return Err(LoadError::InvalidConfig(format!(
                "coordinator for app {} is {:?}, expected {:?}",
                self.app_id, self.phase, phase
            )));
        }
        Ok(())
    }

    fn check_failures<T: Transceiver + ?Sized>(&self, transceiver: &mut T) -> Result<()> {
        let failing = transceiver.get_core_state_count(self.app_id, CoreState::Watchdog)?
            + transceiver.get_core_state_count(self.app_id, CoreState::Error)?;
        if failing == 0 {
            return Ok(());
        }

        let mut cores = Vec::new();
        for core in self.participants.iter() {
            let state = transceiver.get_cpu_state(core)?;
            if state.is_failure() {
                tracing::error!("{core}: entered {state:?}");
                cores.push((core, state));
            }
        }

        if cores.is_empty() {
            return Ok(());
        }
        Err(LoadError::CoresFailed {
            app_id: self.app_id,
            cores,
        })
    }

    fn outstanding<T: Transceiver + ?Sized>(
        &self,
        transceiver: &mut T,
    ) -> Result<Vec<CoreLocation>> {
        let mut outstanding = Vec::new();
        for core in self.participants.iter() {
            if transceiver.get_cpu_state(core)? != CoreState::Finished {
                outstanding.push(core);
            }
        }
        Ok(outstanding)
    }
}
