use std::fmt;
use std::io::{self, Write};
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::GeneratorConfig;
use crate::error::{GatewayError, ProfileError, Result};
use crate::gateway::{InstrumentGateway, InstrumentLink};
use crate::profile::ProfileParameters;
use crate::status::{banner, status, DisplayMessage, FINISHED_LABEL, STARTING_LABEL};
use crate::InstrumentCommand;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Growing,
    Resting,
    Detaching,
    Idle,
}

impl Stage {
    pub const ORDER: [Stage; 4] = [Stage::Growing, Stage::Resting, Stage::Detaching, Stage::Idle];

    /// Label shown on the instrument while the stage runs.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Growing => "Growing",
            Stage::Resting => "Resting",
            Stage::Detaching => "Detaching",
            Stage::Idle => "FINISHED!",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Growing => "growing",
            Stage::Resting => "resting",
            Stage::Detaching => "detaching",
            Stage::Idle => "idle",
        };
        write!(f, "{}", name)
    }
}

/// Operator stop request, checked by the scheduler between ticks.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    raised: Arc<Mutex<bool>>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn raise(&self) {
        *self.raised.lock().await = true;
    }

    pub async fn is_raised(&self) -> bool {
        *self.raised.lock().await
    }
}

/// Where the run is and what the generator is outputting.
#[derive(Debug, Clone, PartialEq)]
pub struct RunState {
    stage: Stage,
    elapsed_ticks: u64,
    frequency: f64, // Hz
    amplitude: f64, // Vpp
}

impl RunState {
    fn new(params: &ProfileParameters) -> Self {
        Self {
            stage: Stage::Growing,
            elapsed_ticks: 0,
            frequency: params.start_frequency(),
            amplitude: params.start_amplitude(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Ticks started in the current stage.
    pub fn elapsed_ticks(&self) -> u64 {
        self.elapsed_ticks
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }
}

/// Tick numbers of a stage together with the seconds elapsed at each of
/// them. The last tick may run past `duration`, its elapsed value is held
/// at `duration`.
pub(crate) fn stage_ticks(duration: u64, tick_seconds: u64) -> impl Iterator<Item = (u64, u64)> {
    let count = duration.div_ceil(tick_seconds);
    (1..=count).map(move |tick| (tick, tick.saturating_mul(tick_seconds).min(duration)))
}

/// Drives one profile through growing, resting, detaching and idle.
pub struct StageScheduler {
    params: ProfileParameters,
    config: GeneratorConfig,
    state: RunState,
    console: Box<dyn Write + Send>,
}

impl StageScheduler {
    pub fn new(params: ProfileParameters, config: GeneratorConfig) -> Self {
        let state = RunState::new(&params);
        Self {
            params,
            config,
            state,
            console: Box::new(io::stdout()),
        }
    }

    /// Replaces stdout as the console sink for status lines.
    pub fn with_console(mut self, console: impl Write + Send + 'static) -> Self {
        self.console = Box::new(console);
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Runs the stages in order until the operator interrupts, then shows
    /// the finish banner. Returns the state the run ended in.
    pub async fn run<L: InstrumentLink>(
        &mut self,
        gateway: &mut InstrumentGateway<L>,
        interrupt: &Interrupt,
    ) -> Result<RunState> {
        for stage in Stage::ORDER {
            self.enter(stage);
            let flow = match stage {
                Stage::Growing => self.grow(gateway, interrupt).await?,
                Stage::Resting => self.rest(gateway, interrupt).await?,
                Stage::Detaching => self.detach(gateway, interrupt).await?,
                Stage::Idle => self.idle(gateway, interrupt).await?,
            };
            if flow.is_break() {
                break;
            }
        }
        self.show(gateway, &banner(FINISHED_LABEL)).await?;
        info!(
            "profile stopped in {} stage after {} ticks",
            self.state.stage, self.state.elapsed_ticks
        );
        Ok(self.state.clone())
    }

    fn enter(&mut self, stage: Stage) {
        self.state.stage = stage;
        self.state.elapsed_ticks = 0;
        info!("{} stage", stage);
    }

    async fn grow<L: InstrumentLink>(
        &mut self,
        gateway: &mut InstrumentGateway<L>,
        interrupt: &Interrupt,
    ) -> Result<ControlFlow<()>> {
        let ramp = self.params.amplitude_ramp();
        let apply = InstrumentCommand::ApplySine {
            frequency: self.state.frequency,
            amplitude: ramp.start(),
        };
        self.send(gateway, apply).await?;
        self.show(gateway, &banner(STARTING_LABEL)).await?;
        sleep(self.config.settle_delay()).await;

        let duration = ramp.duration().get();
        for (tick, elapsed) in stage_ticks(duration, self.config.tick_seconds()) {
            if interrupt.is_raised().await {
                return Ok(ControlFlow::Break(()));
            }
            self.state.amplitude = ramp.value_at(elapsed);
            let command = InstrumentCommand::SetAmplitude(self.state.amplitude);
            self.tick(gateway, tick, Some(command), duration - elapsed).await?;
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn rest<L: InstrumentLink>(
        &mut self,
        gateway: &mut InstrumentGateway<L>,
        interrupt: &Interrupt,
    ) -> Result<ControlFlow<()>> {
        let duration = self.params.rest_duration();
        for (tick, elapsed) in stage_ticks(duration, self.config.tick_seconds()) {
            if interrupt.is_raised().await {
                return Ok(ControlFlow::Break(()));
            }
            self.tick(gateway, tick, None, duration - elapsed).await?;
        }
        Ok(ControlFlow::Continue(()))
    }

    async fn detach<L: InstrumentLink>(
        &mut self,
        gateway: &mut InstrumentGateway<L>,
        interrupt: &Interrupt,
    ) -> Result<ControlFlow<()>> {
        let ramp = self.params.frequency_ramp(self.state.frequency);
        let duration = ramp.duration().get();
        for (tick, elapsed) in stage_ticks(duration, self.config.tick_seconds()) {
            if interrupt.is_raised().await {
                return Ok(ControlFlow::Break(()));
            }
            self.state.frequency = ramp.value_at(elapsed);
            let command = InstrumentCommand::SetFrequency(self.state.frequency);
            self.tick(gateway, tick, Some(command), duration - elapsed).await?;
        }
        Ok(ControlFlow::Continue(()))
    }

    /// Counts the time since the profile finished until interrupted.
    async fn idle<L: InstrumentLink>(
        &mut self,
        gateway: &mut InstrumentGateway<L>,
        interrupt: &Interrupt,
    ) -> Result<ControlFlow<()>> {
        if self.config.switch_off_output() {
            self.send(gateway, InstrumentCommand::OutputOff).await?;
        }
        info!("hit Ctrl-C to stop");
        let mut tick: u64 = 0;
        while !interrupt.is_raised().await {
            tick += 1;
            let since_finish = tick.saturating_mul(self.config.tick_seconds());
            self.tick(gateway, tick, None, since_finish).await?;
        }
        Ok(ControlFlow::Break(()))
    }

    /// One tick: optional parameter command, status display, then the wait.
    async fn tick<L: InstrumentLink>(
        &mut self,
        gateway: &mut InstrumentGateway<L>,
        tick: u64,
        command: Option<InstrumentCommand>,
        clock_seconds: u64,
    ) -> Result<()> {
        self.state.elapsed_ticks = tick;
        if let Some(command) = command {
            self.send(gateway, command).await?;
        }
        let message = status(
            self.state.stage.label(),
            clock_seconds,
            self.state.frequency,
            self.state.amplitude,
        );
        self.show(gateway, &message).await?;
        sleep(self.config.tick_interval()).await;
        Ok(())
    }

    async fn send<L: InstrumentLink>(
        &mut self,
        gateway: &mut InstrumentGateway<L>,
        command: InstrumentCommand,
    ) -> Result<()> {
        gateway
            .send_parameter_command(&command)
            .await
            .map_err(|source| self.abort(source))
    }

    async fn show<L: InstrumentLink>(
        &mut self,
        gateway: &mut InstrumentGateway<L>,
        message: &DisplayMessage,
    ) -> Result<()> {
        if let Err(e) = writeln!(self.console, "{}", message.console_line()) {
            warn!("failed to write status line: {}", e);
        }
        gateway.show_text(message).await.map_err(|source| self.abort(source))
    }

    fn abort(&self, source: GatewayError) -> ProfileError {
        debug!(
            "{} stage aborted at tick {}: {}",
            self.state.stage, self.state.elapsed_ticks, source
        );
        ProfileError::StageAborted {
            stage: self.state.stage,
            tick: self.state.elapsed_ticks,
            source,
        }
    }
}
