use std::io;
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::InstrumentAddress;
use crate::error::GatewayError;
use crate::status::DisplayMessage;
use crate::InstrumentCommand;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Output frequencies the 33220A can produce, Hz.
pub const FREQUENCY_RANGE: RangeInclusive<f64> = 1.0e-6..=2.0e7;
/// Sine amplitudes into a 50 Ohm load with no offset, Vpp.
pub const AMPLITUDE_RANGE: RangeInclusive<f64> = 0.01..=10.0;

/// Byte transport to the instrument. Every call carries one program
/// message, the link appends the terminator.
#[allow(async_fn_in_trait)]
pub trait InstrumentLink: Sized {
    async fn write_line(&mut self, line: &str) -> io::Result<()>;

    async fn close(self) -> io::Result<()>;
}

/// Raw SCPI socket.
pub struct SocketLink {
    stream: TcpStream,
}

impl SocketLink {
    pub async fn open(addr: &str) -> io::Result<Self> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connection timed out"))??;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl InstrumentLink for SocketLink {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.stream.write_all(terminated(line).as_bytes()).await?;
        self.stream.flush().await
    }

    async fn close(mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }
}

/// USBTMC character device. Each write is one USBTMC message, so the
/// terminator goes out in the same write.
pub struct DeviceFileLink {
    file: File,
}

impl DeviceFileLink {
    pub async fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path).await?;
        Ok(Self { file })
    }
}

impl InstrumentLink for DeviceFileLink {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.file.write_all(terminated(line).as_bytes()).await?;
        self.file.flush().await
    }

    async fn close(mut self) -> io::Result<()> {
        self.file.flush().await
    }
}

/// Stand-in generator for dry runs. Logs what it is told and keeps track
/// of the output it would be producing.
#[derive(Debug, Clone)]
pub struct SimulatedLink {
    frequency: f64,
    amplitude: f64,
    output_on: bool,
    remote: bool,
    display: Option<String>,
}

impl Default for SimulatedLink {
    fn default() -> Self {
        // power-on state of the 33220A
        Self {
            frequency: 1000.0,
            amplitude: 0.1,
            output_on: false,
            remote: false,
            display: None,
        }
    }
}

impl SimulatedLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn amplitude(&self) -> f64 {
        self.amplitude
    }

    pub fn output_on(&self) -> bool {
        self.output_on
    }

    fn apply(&mut self, line: &str) -> io::Result<()> {
        let (header, args) = line.split_once(' ').unwrap_or((line, ""));
        let values = || -> io::Result<Vec<f64>> {
            args.split(',')
                .map(|value| {
                    value
                        .trim()
                        .parse::<f64>()
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("`{}`: {}", line, e)))
                })
                .collect()
        };
        match header.to_ascii_uppercase().as_str() {
            "*RST" => {
                *self = Self {
                    remote: self.remote,
                    ..Self::default()
                }
            }
            "SYST:COMM:RLST" => self.remote = args.trim().eq_ignore_ascii_case("REM"),
            "APPL:SIN" => {
                let values = values()?;
                if let Some(&frequency) = values.first() {
                    self.frequency = frequency;
                }
                if let Some(&amplitude) = values.get(1) {
                    self.amplitude = amplitude;
                }
                self.output_on = true;
            }
            "VOLT" => self.amplitude = values()?.first().copied().unwrap_or(self.amplitude),
            "FREQ" => self.frequency = values()?.first().copied().unwrap_or(self.frequency),
            "OUTP" => self.output_on = args.trim().eq_ignore_ascii_case("ON"),
            "DISP:TEXT" => self.display = Some(args.trim_matches('\'').replace("''", "'")),
            _ => warn!("simulated generator ignores `{}`", line),
        }
        Ok(())
    }
}

impl InstrumentLink for SimulatedLink {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        info!("sim <- {}", line.escape_default());
        self.apply(line)
    }

    async fn close(self) -> io::Result<()> {
        info!(
            "sim closed at {:.2} Hz, {:.2} Vpp, output {}",
            self.frequency,
            self.amplitude,
            if self.output_on { "on" } else { "off" }
        );
        Ok(())
    }
}

fn terminated(line: &str) -> String {
    format!("{}\n", line)
}

/// Any of the supported transports, picked from an address.
pub enum Link {
    Socket(SocketLink),
    DeviceFile(DeviceFileLink),
    Simulated(SimulatedLink),
}

impl Link {
    pub async fn open(address: &InstrumentAddress) -> io::Result<Self> {
        Ok(match address {
            InstrumentAddress::Socket(addr) => Link::Socket(SocketLink::open(addr).await?),
            InstrumentAddress::DeviceFile(path) => Link::DeviceFile(DeviceFileLink::open(path).await?),
            InstrumentAddress::Simulated => Link::Simulated(SimulatedLink::new()),
        })
    }
}

impl InstrumentLink for Link {
    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        match self {
            Link::Socket(link) => link.write_line(line).await,
            Link::DeviceFile(link) => link.write_line(line).await,
            Link::Simulated(link) => link.write_line(line).await,
        }
    }

    async fn close(self) -> io::Result<()> {
        match self {
            Link::Socket(link) => link.close().await,
            Link::DeviceFile(link) => link.close().await,
            Link::Simulated(link) => link.close().await,
        }
    }
}

/// Session with one function generator. Owned by whoever runs the
/// profile and given up through [`InstrumentGateway::disconnect`].
pub struct InstrumentGateway<L: InstrumentLink> {
    link: L,
    address: String,
}

impl InstrumentGateway<Link> {
    /// Opens the instrument, takes the front panel into remote and resets
    /// it to its power-on state.
    pub async fn connect(address: &InstrumentAddress) -> Result<Self, GatewayError> {
        let link = Link::open(address).await.map_err(|source| GatewayError::Connection {
            address: address.to_string(),
            source,
        })?;
        let mut gateway = Self::new(link, address.to_string());
        if let Err(e) = gateway.start_session().await {
            gateway.disconnect().await;
            return Err(e);
        }
        info!("connected to {}", address);
        Ok(gateway)
    }
}

impl<L: InstrumentLink> InstrumentGateway<L> {
    pub fn new(link: L, address: impl Into<String>) -> Self {
        Self {
            link,
            address: address.into(),
        }
    }

    async fn start_session(&mut self) -> Result<(), GatewayError> {
        self.send_parameter_command(&InstrumentCommand::Remote).await?;
        self.send_parameter_command(&InstrumentCommand::Reset).await
    }

    /// Sends one command. Frequencies and amplitudes outside what the
    /// generator can output are clipped to the nearest limit.
    pub async fn send_parameter_command(&mut self, command: &InstrumentCommand) -> Result<(), GatewayError> {
        let line = clip_to_output_range(command).to_string();
        debug!("{} <- {}", self.address, line.escape_default());
        self.link
            .write_line(&line)
            .await
            .map_err(|source| GatewayError::Communication { command: line, source })
    }

    pub async fn show_text(&mut self, message: &DisplayMessage) -> Result<(), GatewayError> {
        self.send_parameter_command(&InstrumentCommand::DisplayText(message.device_text()))
            .await
    }

    /// Returns the front panel to the operator and closes the link. Best
    /// effort, failures are only logged.
    pub async fn disconnect(mut self) {
        if let Err(e) = self.send_parameter_command(&InstrumentCommand::Local).await {
            warn!("failed to return {} to local control: {}", self.address, e);
        }
        match self.link.close().await {
            Ok(()) => info!("disconnected from {}", self.address),
            Err(e) => warn!("failed to close {}: {}", self.address, e),
        }
    }
}

fn clip(name: &str, value: f64, range: &RangeInclusive<f64>) -> f64 {
    let clipped = value.clamp(*range.start(), *range.end());
    if clipped != value {
        debug!("{} {} clipped to {}", name, value, clipped);
    }
    clipped
}

fn clip_to_output_range(command: &InstrumentCommand) -> InstrumentCommand {
    match command {
        InstrumentCommand::ApplySine { frequency, amplitude } => InstrumentCommand::ApplySine {
            frequency: clip("frequency", *frequency, &FREQUENCY_RANGE),
            amplitude: clip("amplitude", *amplitude, &AMPLITUDE_RANGE),
        },
        InstrumentCommand::SetAmplitude(amplitude) => {
            InstrumentCommand::SetAmplitude(clip("amplitude", *amplitude, &AMPLITUDE_RANGE))
        }
        InstrumentCommand::SetFrequency(frequency) => {
            InstrumentCommand::SetFrequency(clip("frequency", *frequency, &FREQUENCY_RANGE))
        }
        other => other.clone(),
    }
}
