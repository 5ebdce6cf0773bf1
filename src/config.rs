use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::error;

use crate::error::{ProfileError, Result};

pub const DEFAULT_TICK_SECONDS: u64 = 5;
/// Longest accepted tick interval, one hour.
pub const MAX_TICK_SECONDS: u64 = 3600;
pub const DEFAULT_ADDRESS: &str = "TCPIP0::A-33220A-11622::5025::SOCKET";
pub const ALTERNATE_ADDRESS: &str = "TCPIP0::A-33220A-20723::5025::SOCKET";
/// Device selector that picks the alternate generator.
pub const ALTERNATE_SELECTOR: &str = "2";

/// Where the function generator is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstrumentAddress {
    /// Raw SCPI socket, `host:port`.
    Socket(String),
    /// USBTMC character device such as `/dev/usbtmc0`.
    DeviceFile(PathBuf),
    /// No hardware, commands are only logged.
    Simulated,
}

impl FromStr for InstrumentAddress {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("sim") || s.eq_ignore_ascii_case("simulated") {
            return Ok(InstrumentAddress::Simulated);
        }
        if s.to_ascii_uppercase().starts_with("TCPIP") {
            // TCPIP[board]::host::port::SOCKET
            let parts: Vec<&str> = s.split("::").collect();
            return match parts.as_slice() {
                [_, host, port, kind] if kind.eq_ignore_ascii_case("SOCKET") => {
                    let port = parse_port(port)?;
                    Ok(InstrumentAddress::Socket(format!("{}:{}", host, port)))
                }
                _ => Err(ProfileError::invalid(
                    "address",
                    format!("`{}` is not a TCPIP::host::port::SOCKET resource", s),
                )),
            };
        }
        if s.starts_with('/') {
            return Ok(InstrumentAddress::DeviceFile(PathBuf::from(s)));
        }
        match s.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() => {
                let port = parse_port(port)?;
                Ok(InstrumentAddress::Socket(format!("{}:{}", host, port)))
            }
            _ => Err(ProfileError::invalid(
                "address",
                format!("`{}` is neither host:port, a TCPIP socket resource, a device path nor `sim`", s),
            )),
        }
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse::<u16>()
        .map_err(|_| ProfileError::invalid("address", format!("`{}` is not a valid port", port)))
}

impl fmt::Display for InstrumentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentAddress::Socket(addr) => write!(f, "{}", addr),
            InstrumentAddress::DeviceFile(path) => write!(f, "{}", path.display()),
            InstrumentAddress::Simulated => write!(f, "sim"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    tick_seconds: u64,
    primary_address: InstrumentAddress,
    alternate_address: InstrumentAddress,
    switch_off_output: bool, // send OUTP OFF once the profile is done
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            tick_seconds: DEFAULT_TICK_SECONDS,
            primary_address: InstrumentAddress::Socket("A-33220A-11622:5025".to_string()),
            alternate_address: InstrumentAddress::Socket("A-33220A-20723:5025".to_string()),
            switch_off_output: false,
        }
    }
}

impl GeneratorConfig {
    pub fn new(
        tick_seconds: u64,
        primary_address: InstrumentAddress,
        alternate_address: InstrumentAddress,
        switch_off_output: bool,
    ) -> Result<Self> {
        if tick_seconds == 0 {
            error!("tick interval must be at least one second");
            return Err(ProfileError::invalid("tick", "tick interval must be at least one second"));
        }
        if tick_seconds > MAX_TICK_SECONDS {
            error!("tick interval of {} s is longer than {} s", tick_seconds, MAX_TICK_SECONDS);
            return Err(ProfileError::invalid(
                "tick",
                format!("tick interval must be at most {} seconds", MAX_TICK_SECONDS),
            ));
        }
        Ok(Self {
            tick_seconds,
            primary_address,
            alternate_address,
            switch_off_output,
        })
    }

    pub fn tick_seconds(&self) -> u64 {
        self.tick_seconds
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds)
    }

    /// Pause after the initial `APPL:SIN`, a fifth of a tick.
    pub fn settle_delay(&self) -> Duration {
        self.tick_interval() / 5
    }

    pub fn switch_off_output(&self) -> bool {
        self.switch_off_output
    }

    /// Selector `2` picks the alternate generator, anything else the default.
    pub fn resolve_address(&self, selector: &str) -> &InstrumentAddress {
        if selector.trim() == ALTERNATE_SELECTOR {
            &self.alternate_address
        } else {
            &self.primary_address
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generator_config_default() {
        let config = GeneratorConfig::default();
        assert_eq!(config.tick_seconds(), 5);
        assert_eq!(config.tick_interval(), Duration::from_secs(5));
        assert_eq!(config.settle_delay(), Duration::from_secs(1));
        assert!(!config.switch_off_output());
        assert_eq!(config.primary_address, DEFAULT_ADDRESS.parse().unwrap());
        assert_eq!(config.alternate_address, ALTERNATE_ADDRESS.parse().unwrap());
    }

    #[test]
    fn test_generator_config_zero_tick() {
        let config = GeneratorConfig::new(0, InstrumentAddress::Simulated, InstrumentAddress::Simulated, false);
        assert!(config.unwrap_err().is_invalid_parameter());
    }

    #[test]
    fn test_generator_config_tick_upper_bound() {
        let config = GeneratorConfig::new(
            MAX_TICK_SECONDS,
            InstrumentAddress::Simulated,
            InstrumentAddress::Simulated,
            false,
        )
        .unwrap();
        assert_eq!(config.settle_delay(), Duration::from_secs(720));

        for tick in [MAX_TICK_SECONDS + 1, u64::MAX / 100, u64::MAX] {
            let config = GeneratorConfig::new(tick, InstrumentAddress::Simulated, InstrumentAddress::Simulated, false);
            assert!(config.unwrap_err().is_invalid_parameter(), "tick {} accepted", tick);
        }
    }

    #[test]
    fn test_settle_delay_is_fifth_of_tick() {
        let config = GeneratorConfig::new(7, InstrumentAddress::Simulated, InstrumentAddress::Simulated, false).unwrap();
        assert_eq!(config.settle_delay(), Duration::from_millis(1400));
    }

    #[test]
    fn test_selector_resolution() {
        let config = GeneratorConfig::default();
        let alternate = InstrumentAddress::Socket("A-33220A-20723:5025".to_string());
        let primary = InstrumentAddress::Socket("A-33220A-11622:5025".to_string());
        assert_eq!(config.resolve_address("2"), &alternate);
        assert_eq!(config.resolve_address("1"), &primary);
        assert_eq!(config.resolve_address("20"), &primary);
        assert_eq!(config.resolve_address(""), &primary);
    }

    #[test]
    fn test_parse_addresses() {
        assert_eq!("sim".parse::<InstrumentAddress>().unwrap(), InstrumentAddress::Simulated);
        assert_eq!(
            "TCPIP0::192.168.1.20::5025::SOCKET".parse::<InstrumentAddress>().unwrap(),
            InstrumentAddress::Socket("192.168.1.20:5025".to_string())
        );
        assert_eq!(
            "localhost:5025".parse::<InstrumentAddress>().unwrap(),
            InstrumentAddress::Socket("localhost:5025".to_string())
        );
        assert_eq!(
            "/dev/usbtmc0".parse::<InstrumentAddress>().unwrap(),
            InstrumentAddress::DeviceFile(PathBuf::from("/dev/usbtmc0"))
        );
    }

    #[test]
    fn test_parse_bad_addresses() {
        assert!("USB0::2391::1031::MY44011622::0::INSTR".parse::<InstrumentAddress>().is_err());
        assert!("TCPIP0::host::5025::INSTR".parse::<InstrumentAddress>().is_err());
        assert!("host:99999".parse::<InstrumentAddress>().is_err());
        assert!("generator".parse::<InstrumentAddress>().is_err());
    }
}
