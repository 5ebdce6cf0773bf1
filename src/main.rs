use std::future::Future;
use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tokio::runtime::Builder;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use vesicle_grower::{
    run_profile, GeneratorConfig, InstrumentAddress, InstrumentGateway, Interrupt, ProfileParameters, RunState,
    StageScheduler, ALTERNATE_ADDRESS, DEFAULT_ADDRESS, DEFAULT_TICK_SECONDS,
};

/// Grow vesicles in three stages: ramp the amplitude, rest, then ramp the
/// frequency down to detach them.
#[derive(Parser, Debug)]
#[command(name = "vesicle_grower", version)]
struct Cli {
    /// Generator to use, `2` selects the alternate device
    device: String,
    /// Main frequency, Hz
    #[arg(allow_negative_numbers = true)]
    start_frequency: f64,
    /// Initial amplitude, Vpp
    #[arg(allow_negative_numbers = true)]
    start_amplitude: f64,
    /// Final amplitude, Vpp
    #[arg(allow_negative_numbers = true)]
    target_amplitude: f64,
    /// Duration of the growing stage, min
    grow_minutes: u64,
    /// Duration of the resting stage, min
    rest_minutes: u64,
    /// Detachment frequency, Hz
    #[arg(allow_negative_numbers = true)]
    target_frequency: f64,
    /// Duration of the detaching stage, min
    detach_minutes: u64,
    /// Update interval of values and displays, s
    #[arg(long, default_value_t = DEFAULT_TICK_SECONDS)]
    tick: u64,
    /// Explicit instrument address (host:port, TCPIP0::host::port::SOCKET, /dev/usbtmcN or sim)
    #[arg(long, env = "VESICLE_GROWER_ADDRESS")]
    address: Option<String>,
    /// Turn the generator output off once the profile is done
    #[arg(long)]
    switch_off_output: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let (params, config, address) = match prepare(&cli) {
        Ok(prepared) => prepared,
        Err(e) => Cli::command().error(ErrorKind::ValueValidation, e).exit(),
    };

    let runtime = match Builder::new_current_thread()
        .thread_name("vesicle-grower")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(params, config, address)) {
        Ok(state) => {
            info!(
                "done, output left at {:.2} Hz and {:.2} Vpp",
                state.frequency(),
                state.amplitude()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Everything that can be rejected before touching the instrument.
fn prepare(cli: &Cli) -> vesicle_grower::Result<(ProfileParameters, GeneratorConfig, InstrumentAddress)> {
    let params = ProfileParameters::from_minutes(
        cli.start_frequency,
        cli.start_amplitude,
        cli.target_amplitude,
        cli.grow_minutes,
        cli.rest_minutes,
        cli.target_frequency,
        cli.detach_minutes,
    )?;
    let config = GeneratorConfig::new(
        cli.tick,
        DEFAULT_ADDRESS.parse()?,
        ALTERNATE_ADDRESS.parse()?,
        cli.switch_off_output,
    )?;
    let address = match &cli.address {
        Some(address) => address.parse()?,
        None => config.resolve_address(&cli.device).clone(),
    };
    Ok((params, config, address))
}

/// Raises `interrupt` once `signal` fires. Returns after the listener has
/// been polled, so the signal handler is installed before the caller
/// touches the instrument.
async fn listen_for_interrupt<S>(signal: S, interrupt: &Interrupt)
where
    S: Future<Output = io::Result<()>> + Send + 'static,
{
    let listener = interrupt.clone();
    tokio::spawn(async move {
        match signal.await {
            Ok(()) => {
                info!("interrupt received, stopping at the next tick");
                listener.raise().await;
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });
    tokio::task::yield_now().await;
}

async fn run(params: ProfileParameters, config: GeneratorConfig, address: InstrumentAddress) -> Result<RunState> {
    let interrupt = Interrupt::new();
    listen_for_interrupt(tokio::signal::ctrl_c(), &interrupt).await;

    let gateway = InstrumentGateway::connect(&address)
        .await
        .with_context(|| format!("could not connect to the generator at {}", address))?;
    let mut scheduler = StageScheduler::new(params, config);
    let state = run_profile(&mut scheduler, gateway, &interrupt).await?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    const ARGS: [&str; 9] = ["vesicle_grower", "1", "500", "0.1", "2.5", "30", "60", "50", "30"];

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_positional_arguments() {
        let cli = Cli::try_parse_from(ARGS).unwrap();
        assert_eq!(cli.device, "1");
        assert_eq!(cli.start_frequency, 500.0);
        assert_eq!(cli.grow_minutes, 30);
        assert_eq!(cli.detach_minutes, 30);
        assert_eq!(cli.tick, DEFAULT_TICK_SECONDS);
        assert!(!cli.switch_off_output);
    }

    #[test]
    fn test_missing_arguments_is_usage_error() {
        let err = Cli::try_parse_from(ARGS[..8].to_vec()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_malformed_minutes_is_usage_error() {
        let mut args = ARGS;
        args[5] = "half";
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn test_selector_picks_address() {
        let cli = Cli::try_parse_from(ARGS).unwrap();
        let (_, _, address) = prepare(&cli).unwrap();
        assert_eq!(address, DEFAULT_ADDRESS.parse().unwrap());

        let mut args = ARGS;
        args[1] = "2";
        let cli = Cli::try_parse_from(args).unwrap();
        let (_, _, address) = prepare(&cli).unwrap();
        assert_eq!(address, ALTERNATE_ADDRESS.parse().unwrap());
    }

    #[test]
    fn test_explicit_address_overrides_selector() {
        let mut args: Vec<&str> = ARGS.to_vec();
        args.extend(["--address", "sim", "--tick", "1"]);
        let cli = Cli::try_parse_from(args).unwrap();
        let (_, config, address) = prepare(&cli).unwrap();
        assert_eq!(address, InstrumentAddress::Simulated);
        assert_eq!(config.tick_seconds(), 1);
    }

    #[test]
    fn test_zero_grow_minutes_rejected_before_connecting() {
        let mut args = ARGS;
        args[5] = "0";
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(prepare(&cli).unwrap_err().is_invalid_parameter());
    }

    #[test]
    fn test_huge_tick_rejected_before_connecting() {
        let mut args: Vec<&str> = ARGS.to_vec();
        args.extend(["--tick", "184467440737095516"]);
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(prepare(&cli).unwrap_err().is_invalid_parameter());
    }

    #[tokio::test]
    async fn test_listener_armed_before_returning() {
        let armed = Arc::new(AtomicBool::new(false));
        let flag = armed.clone();
        let interrupt = Interrupt::new();
        listen_for_interrupt(
            async move {
                flag.store(true, Ordering::SeqCst);
                std::future::pending::<io::Result<()>>().await
            },
            &interrupt,
        )
        .await;
        assert!(armed.load(Ordering::SeqCst));
        assert!(!interrupt.is_raised().await);
    }

    #[tokio::test]
    async fn test_signal_raises_interrupt() {
        let interrupt = Interrupt::new();
        listen_for_interrupt(async { Ok(()) }, &interrupt).await;
        assert!(interrupt.is_raised().await);
    }

    #[test]
    fn test_negative_amplitude_reaches_validation() {
        let mut args = ARGS;
        args[3] = "-0.5";
        let cli = Cli::try_parse_from(args).unwrap();
        assert!(prepare(&cli).unwrap_err().is_invalid_parameter());
    }
}
