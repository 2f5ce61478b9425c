//! Running program state
//!
//! Host-owned observables describing the robot program currently running.
//! Components observe [`RunningProgramInfo::state`] and the elapsed run
//! time on [`ProgramTimer::monitor`], or forward state changes over a bind
//! channel.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::module::channel::ChannelEnd;
use crate::module::monitor::{MonitorCallback, Monitorable};
use crate::module::traits::{ContextId, ModuleError};
use crate::utils::lock_unpoisoned;

/// Channel event carrying program state changes
pub const PROGRAM_STATE_EVENT: &str = "program_state";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum ProgramState {
    #[default]
    Idle = 0,
    Running = 1,
    Paused = 2,
    Stopped = 3,
}

struct TimerState {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl TimerState {
    fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map_or(Duration::ZERO, |t| t.elapsed())
    }
}

/// Elapsed run time of a program, excluding paused spans
pub struct ProgramTimer {
    elapsed: Monitorable<Duration>,
    state: Mutex<TimerState>,
}

impl ProgramTimer {
    pub fn new() -> Self {
        Self {
            elapsed: Monitorable::new("program_timer", Duration::ZERO),
            state: Mutex::new(TimerState {
                accumulated: Duration::ZERO,
                running_since: None,
            }),
        }
    }

    pub fn monitor(&self) -> &Monitorable<Duration> {
        &self.elapsed
    }

    pub fn elapsed(&self) -> Duration {
        lock_unpoisoned(&self.state).elapsed()
    }

    pub fn is_running(&self) -> bool {
        lock_unpoisoned(&self.state).running_since.is_some()
    }

    /// Restart from zero
    pub fn start(&self) {
        {
            let mut state = lock_unpoisoned(&self.state);
            state.accumulated = Duration::ZERO;
            state.running_since = Some(Instant::now());
        }
        self.elapsed.set(Duration::ZERO);
    }

    /// Stop counting, keeping the time accumulated so far
    pub fn pause(&self) {
        let elapsed = {
            let mut state = lock_unpoisoned(&self.state);
            if let Some(since) = state.running_since.take() {
                state.accumulated += since.elapsed();
            }
            state.accumulated
        };
        self.elapsed.set(elapsed);
    }

    pub fn resume(&self) {
        let mut state = lock_unpoisoned(&self.state);
        if state.running_since.is_none() {
            state.running_since = Some(Instant::now());
        }
    }

    /// Publish the current elapsed time
    pub fn tick(&self) -> Duration {
        let elapsed = self.elapsed();
        self.elapsed.set(elapsed);
        elapsed
    }
}

impl Default for ProgramTimer {
    fn default() -> Self {
        Self::new()
    }
}

/// Publish the timer every `period` while it runs
///
/// The task ends once `program` reaches `Stopped`.
pub fn spawn_timer_ticker(program: Arc<RunningProgramInfo>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match program.state().value() {
                ProgramState::Running => {
                    program.timer().tick();
                }
                ProgramState::Stopped => break,
                ProgramState::Idle | ProgramState::Paused => {}
            }
        }
        debug!("Program timer ticker finished");
    })
}

/// State of the running program
pub struct RunningProgramInfo {
    program_name: Mutex<Option<String>>,
    state: Monitorable<ProgramState>,
    timer: ProgramTimer,
}

impl RunningProgramInfo {
    pub fn new() -> Self {
        Self {
            program_name: Mutex::new(None),
            state: Monitorable::new("program_state", ProgramState::Idle),
            timer: ProgramTimer::new(),
        }
    }

    pub fn state(&self) -> &Monitorable<ProgramState> {
        &self.state
    }

    pub fn timer(&self) -> &ProgramTimer {
        &self.timer
    }

    pub fn program_name(&self) -> Option<String> {
        lock_unpoisoned(&self.program_name).clone()
    }

    fn transition(&self, allowed: &[ProgramState], next: ProgramState) -> Result<(), ModuleError> {
        let current = self.state.value();
        if !allowed.contains(&current) {
            return Err(ModuleError::InvalidTransition(format!(
                "{:?} -> {:?}",
                current, next
            )));
        }
        self.state.set(next);
        Ok(())
    }

    pub fn start(&self, program_name: impl Into<String>) -> Result<(), ModuleError> {
        let program_name = program_name.into();
        self.transition(&[ProgramState::Idle, ProgramState::Stopped], ProgramState::Running)?;
        info!("Program {} started", program_name);
        *lock_unpoisoned(&self.program_name) = Some(program_name);
        self.timer.start();
        Ok(())
    }

    pub fn pause(&self) -> Result<(), ModuleError> {
        self.transition(&[ProgramState::Running], ProgramState::Paused)?;
        self.timer.pause();
        Ok(())
    }

    pub fn resume(&self) -> Result<(), ModuleError> {
        self.transition(&[ProgramState::Paused], ProgramState::Running)?;
        self.timer.resume();
        Ok(())
    }

    pub fn stop(&self) -> Result<(), ModuleError> {
        self.transition(&[ProgramState::Running, ProgramState::Paused], ProgramState::Stopped)?;
        self.timer.pause();
        info!("Program stopped after {:?}", self.timer.elapsed());
        Ok(())
    }

    /// Send every state change to the peer of `channel`
    ///
    /// The current state is sent immediately. The returned callback is
    /// registered under `owner`; pass it to `state().unregister` when the
    /// bind ends.
    pub fn forward_to_channel(&self, owner: ContextId, channel: ChannelEnd) -> MonitorCallback<ProgramState> {
        let callback: MonitorCallback<ProgramState> = Arc::new(move |state: &ProgramState| {
            if let Ok(value) = serde_json::to_value(state) {
                channel.send(PROGRAM_STATE_EVENT, &[value]);
            }
        });
        self.state.register(owner, Arc::clone(&callback), true);
        callback
    }
}

impl Default for RunningProgramInfo {
    fn default() -> Self {
        Self::new()
    }
}
