mod config;
mod error;
mod gateway;
mod profile;
mod ramp;
mod scheduler;
mod status;

use std::fmt;

pub use config::{
    GeneratorConfig, InstrumentAddress, ALTERNATE_ADDRESS, ALTERNATE_SELECTOR, DEFAULT_ADDRESS,
    DEFAULT_TICK_SECONDS, MAX_TICK_SECONDS,
};
pub use error::{GatewayError, ProfileError, Result};
pub use gateway::{
    DeviceFileLink, InstrumentGateway, InstrumentLink, Link, SimulatedLink, SocketLink, AMPLITUDE_RANGE,
    FREQUENCY_RANGE,
};
pub use profile::{ProfileParameters, MIN_START_AMPLITUDE};
pub use ramp::Ramp;
pub use scheduler::{Interrupt, RunState, Stage, StageScheduler};
pub use status::{banner, format_clock, status, DisplayMessage, FINISHED_LABEL, MAX_DISPLAY_CHARS, STARTING_LABEL};

/// Program messages understood by the function generator.
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentCommand {
    Reset,
    /// Lock the front panel for the session.
    Remote,
    /// Hand the front panel back to the operator.
    Local,
    ApplySine { frequency: f64, amplitude: f64 },
    SetAmplitude(f64),
    SetFrequency(f64),
    DisplayText(String),
    OutputOff,
}

impl fmt::Display for InstrumentCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentCommand::Reset => write!(f, "*RST"),
            InstrumentCommand::Remote => write!(f, "SYST:COMM:RLST REM"),
            InstrumentCommand::Local => write!(f, "SYST:COMM:RLST LOC"),
            InstrumentCommand::ApplySine { frequency, amplitude } => {
                write!(f, "APPL:SIN {:.6}, {:.6}", frequency, amplitude)
            }
            InstrumentCommand::SetAmplitude(amplitude) => write!(f, "volt {:.6}", amplitude),
            InstrumentCommand::SetFrequency(frequency) => write!(f, "FREQ {:.6}", frequency),
            // SCPI strings escape a quote by doubling it
            InstrumentCommand::DisplayText(text) => write!(f, "DISP:TEXT '{}'", text.replace('\'', "''")),
            InstrumentCommand::OutputOff => write!(f, "OUTP OFF"),
        }
    }
}

/// Runs the whole profile on `gateway` and releases the instrument
/// afterwards, whether the run finished, was interrupted or failed.
pub async fn run_profile<L: InstrumentLink>(
    scheduler: &mut StageScheduler,
    mut gateway: InstrumentGateway<L>,
    interrupt: &Interrupt,
) -> Result<RunState> {
    let outcome = scheduler.run(&mut gateway, interrupt).await;
    gateway.disconnect().await;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::recording::RecordingLink;

    fn profile(grow: u64, rest: u64, detach: u64) -> ProfileParameters {
        ProfileParameters::from_minutes(40.0, 1.0, 5.0, grow, rest, 60.0, detach).unwrap()
    }

    fn config(tick: u64) -> GeneratorConfig {
        GeneratorConfig::new(tick, InstrumentAddress::Simulated, InstrumentAddress::Simulated, false).unwrap()
    }

    #[test]
    fn test_command_text() {
        assert_eq!(InstrumentCommand::Reset.to_string(), "*RST");
        assert_eq!(InstrumentCommand::Remote.to_string(), "SYST:COMM:RLST REM");
        assert_eq!(InstrumentCommand::Local.to_string(), "SYST:COMM:RLST LOC");
        assert_eq!(
            InstrumentCommand::ApplySine { frequency: 40.0, amplitude: 0.0001 }.to_string(),
            "APPL:SIN 40.000000, 0.000100"
        );
        assert_eq!(InstrumentCommand::SetAmplitude(2.5).to_string(), "volt 2.500000");
        assert_eq!(InstrumentCommand::SetFrequency(487.5).to_string(), "FREQ 487.500000");
        assert_eq!(InstrumentCommand::OutputOff.to_string(), "OUTP OFF");
        assert_eq!(
            InstrumentCommand::DisplayText("Growing 0:05\r1.00 Hz".to_string()).to_string(),
            "DISP:TEXT 'Growing 0:05\r1.00 Hz'"
        );
    }

    #[test]
    fn test_display_text_escapes_quotes() {
        let command = InstrumentCommand::DisplayText("it's".to_string());
        assert_eq!(command.to_string(), "DISP:TEXT 'it''s'");
    }

    #[tokio::test(start_paused = true)]
    async fn test_communication_error_releases_session_once() {
        let (link, transcript) = RecordingLink::new();
        let link = link.fail_on("volt", 10);
        let gateway = InstrumentGateway::new(link, "recording");
        let mut scheduler = StageScheduler::new(profile(1, 1, 1), config(1)).with_console(std::io::sink());

        let err = run_profile(&mut scheduler, gateway, &Interrupt::new()).await.unwrap_err();
        match err {
            ProfileError::StageAborted { stage, tick, source } => {
                assert_eq!(stage, Stage::Growing);
                assert_eq!(tick, 10);
                assert!(matches!(source, GatewayError::Communication { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(transcript.closes(), 1);

        let lines = transcript.lines();
        assert_eq!(lines.iter().filter(|l| l.starts_with("volt")).count(), 9);
        assert!(lines.iter().all(|l| !l.starts_with("FREQ")));
        assert!(lines[lines.len() - 2].starts_with("DISP:TEXT 'Growing 0:51"));
        assert_eq!(lines.last().unwrap(), "SYST:COMM:RLST LOC");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupted_run_releases_session_once() {
        let interrupt = Interrupt::new();
        let (link, transcript) = RecordingLink::new();
        let link = link.interrupt_on("DISP:TEXT 'FINISHED!", 1, interrupt.clone());
        let gateway = InstrumentGateway::new(link, "recording");
        let mut scheduler = StageScheduler::new(profile(1, 0, 1), config(5)).with_console(std::io::sink());

        let state = run_profile(&mut scheduler, gateway, &interrupt).await.unwrap();
        assert_eq!(state.stage(), Stage::Idle);
        assert_eq!(transcript.closes(), 1);
        let lines = transcript.lines();
        assert_eq!(lines[lines.len() - 2], "DISP:TEXT 'Finished!'");
        assert_eq!(lines.last().unwrap(), "SYST:COMM:RLST LOC");
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_gateway_runs_profile() {
        let interrupt = Interrupt::new();
        interrupt.raise().await;
        let gateway = InstrumentGateway::connect(&InstrumentAddress::Simulated).await.unwrap();
        let mut scheduler = StageScheduler::new(profile(1, 1, 1), config(5)).with_console(std::io::sink());

        let state = run_profile(&mut scheduler, gateway, &interrupt).await.unwrap();
        assert_eq!(state.stage(), Stage::Growing);
        assert_eq!(state.elapsed_ticks(), 0);
        assert_eq!(state.amplitude(), 1.0);
    }
}
