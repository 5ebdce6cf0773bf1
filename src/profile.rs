use std::num::NonZeroU64;

use tracing::{error, warn};

use crate::error::{ProfileError, Result};
use crate::ramp::Ramp;

/// Substitute for a zero start amplitude, Vpp.
pub const MIN_START_AMPLITUDE: f64 = 0.0001;

/// Operator input for one run. Durations are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileParameters {
    start_frequency: f64,
    start_amplitude: f64,
    target_amplitude: f64,
    grow_duration: NonZeroU64,
    rest_duration: u64,
    target_frequency: f64,
    detach_duration: NonZeroU64,
}

impl ProfileParameters {
    /// Builds a profile from the operator's minute values.
    ///
    /// Both ramps need a non-zero duration, the rest stage may be skipped
    /// with zero minutes.
    pub fn from_minutes(
        start_frequency: f64,
        start_amplitude: f64,
        target_amplitude: f64,
        grow_minutes: u64,
        rest_minutes: u64,
        target_frequency: f64,
        detach_minutes: u64,
    ) -> Result<Self> {
        check_frequency("start_frequency", start_frequency)?;
        check_frequency("target_frequency", target_frequency)?;
        check_amplitude("start_amplitude", start_amplitude)?;
        check_amplitude("target_amplitude", target_amplitude)?;

        let start_amplitude = if start_amplitude == 0.0 {
            warn!("start amplitude of 0 replaced by {} Vpp", MIN_START_AMPLITUDE);
            MIN_START_AMPLITUDE
        } else {
            start_amplitude
        };

        let grow_duration = ramp_duration("grow_minutes", grow_minutes)?;
        let rest_duration = minutes_to_seconds("rest_minutes", rest_minutes)?;
        let detach_duration = ramp_duration("detach_minutes", detach_minutes)?;

        Ok(Self {
            start_frequency,
            start_amplitude,
            target_amplitude,
            grow_duration,
            rest_duration,
            target_frequency,
            detach_duration,
        })
    }

    pub fn start_frequency(&self) -> f64 {
        self.start_frequency
    }

    pub fn start_amplitude(&self) -> f64 {
        self.start_amplitude
    }

    pub fn target_amplitude(&self) -> f64 {
        self.target_amplitude
    }

    pub fn target_frequency(&self) -> f64 {
        self.target_frequency
    }

    pub fn grow_duration(&self) -> NonZeroU64 {
        self.grow_duration
    }

    pub fn rest_duration(&self) -> u64 {
        self.rest_duration
    }

    pub fn detach_duration(&self) -> NonZeroU64 {
        self.detach_duration
    }

    pub fn amplitude_ramp(&self) -> Ramp {
        Ramp::new(self.start_amplitude, self.target_amplitude, self.grow_duration)
    }

    /// Frequency ramp of the detaching stage, starting wherever the
    /// previous stages left the output.
    pub fn frequency_ramp(&self, from: f64) -> Ramp {
        Ramp::new(from, self.target_frequency, self.detach_duration)
    }
}

fn check_frequency(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        error!("{} must be a positive frequency, got {}", name, value);
        return Err(ProfileError::invalid(name, format!("must be a positive frequency in Hz, got {}", value)));
    }
    Ok(())
}

fn check_amplitude(name: &'static str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        error!("{} must be a non-negative amplitude, got {}", name, value);
        return Err(ProfileError::invalid(name, format!("must be a non-negative amplitude in Vpp, got {}", value)));
    }
    Ok(())
}

fn minutes_to_seconds(name: &'static str, minutes: u64) -> Result<u64> {
    minutes
        .checked_mul(60)
        .ok_or_else(|| ProfileError::invalid(name, format!("{} minutes is too long", minutes)))
}

fn ramp_duration(name: &'static str, minutes: u64) -> Result<NonZeroU64> {
    let seconds = minutes_to_seconds(name, minutes)?;
    NonZeroU64::new(seconds).ok_or_else(|| {
        error!("{} must be greater than 0", name);
        ProfileError::invalid(name, "a ramp stage needs at least one minute")
    })
}
