//! Axis input shaper: impulse-table synthesis and configuration.
//!
//! The shaper convolves commanded acceleration with a short impulse train
//! tuned to the machine's dominant vibration mode. This module owns the
//! synthesised parameters (cumulative impulse coefficients, inter-impulse
//! durations, and the derived clock bookkeeping) and the configuration
//! surfaces that produce them.

use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ShaperConfig;
use crate::gcode::{CommandArgs, CommandError};
use crate::motion::STEP_CLOCK_RATE;
use crate::MoveUpdateListener;

/// Impulses beyond the implicit final one; EI3 uses all four.
pub const MAX_EXTRA_IMPULSES: usize = 4;

const MIN_FREQUENCY: f32 = STEP_CLOCK_RATE / (2.0 * 65535.0);
const MAX_FREQUENCY: f32 = 1000.0;
const MAX_DAMPING: f32 = 0.99;

const DEFAULT_FREQUENCY: f32 = 40.0;
const DEFAULT_DAMPING: f32 = 0.1;
const DEFAULT_MIN_ACCELERATION: f32 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputShaperType {
    #[default]
    None,
    Daa,
    Zvd,
    Zvdd,
    Ei2,
    Ei3,
    Custom,
}

impl InputShaperType {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" => Some(Self::None),
            "daa" => Some(Self::Daa),
            "zvd" => Some(Self::Zvd),
            "zvdd" => Some(Self::Zvdd),
            "ei2" => Some(Self::Ei2),
            "ei3" => Some(Self::Ei3),
            "custom" => Some(Self::Custom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Daa => "daa",
            Self::Zvd => "zvd",
            Self::Zvdd => "zvdd",
            Self::Ei2 => "ei2",
            Self::Ei3 => "ei3",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for InputShaperType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum ShaperConfigError {
    #[error("Unsupported input shaper type '{0}'")]
    UnsupportedType(String),
    #[error("Too few durations given")]
    TooFewDurations,
    #[error("Too many amplitudes given")]
    TooManyAmplitudes,
    #[error("Missing parameter 'H'")]
    MissingAmplitudes,
    #[error("Amplitudes must be strictly increasing and within (0, 1]")]
    BadAmplitudes,
    #[error("Invalid shaper config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Outcome of a configuration command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigReply {
    /// Parameters were changed and the move subsystem notified.
    Updated,
    /// Pure query: the current configuration, formatted for the operator.
    Report(String),
}

/// Synthesised input shaper parameters plus the configurator that keeps
/// them current. Stable between configuration changes; the planner only
/// reads it.
#[derive(Clone)]
pub struct AxisShaper {
    shaper_type: InputShaperType,
    frequency: f32,
    zeta: f32,
    minimum_acceleration: f32,
    num_extra_impulses: usize,
    /// Cumulative impulse amplitudes; the implicit final value is 1.0.
    coefficients: [f32; MAX_EXTRA_IMPULSES],
    /// Inter-impulse delays in seconds. For DAA, `durations[0]` holds the
    /// full ringing period instead.
    durations: [f32; MAX_EXTRA_IMPULSES],
    total_duration: f32,
    total_shaping_clocks: f32,
    clocks_lost_at_start: f32,
    clocks_lost_at_end: f32,
    overlapped_coefficients: [f32; 2 * MAX_EXTRA_IMPULSES],
    overlapped_average_acceleration: f32,
    listener: Option<Arc<dyn MoveUpdateListener>>,
}

impl Default for AxisShaper {
    fn default() -> Self {
        Self::new()
    }
}

impl AxisShaper {
    pub fn new() -> Self {
        Self {
            shaper_type: InputShaperType::None,
            frequency: DEFAULT_FREQUENCY,
            zeta: DEFAULT_DAMPING,
            minimum_acceleration: DEFAULT_MIN_ACCELERATION,
            num_extra_impulses: 0,
            coefficients: [0.0; MAX_EXTRA_IMPULSES],
            durations: [0.0; MAX_EXTRA_IMPULSES],
            total_duration: 0.0,
            total_shaping_clocks: 0.0,
            clocks_lost_at_start: 0.0,
            clocks_lost_at_end: 0.0,
            overlapped_coefficients: [0.0; 2 * MAX_EXTRA_IMPULSES],
            overlapped_average_acceleration: 0.0,
            listener: None,
        }
    }

    pub fn set_move_update_listener(&mut self, listener: Arc<dyn MoveUpdateListener>) {
        self.listener = Some(listener);
    }

    /// Process a configuration command. With no parameter words this is a
    /// pure query and returns a report; otherwise the new parameters are
    /// synthesised and the move subsystem notified.
    pub fn configure(&mut self, args: &CommandArgs) -> Result<ConfigReply, ShaperConfigError> {
        let mut seen = false;
        if args.seen('F') {
            seen = true;
            self.frequency = args.limited_f32_value('F', MIN_FREQUENCY, MAX_FREQUENCY)?;
        }
        if args.seen('L') {
            seen = true;
            // very low minimum accelerations cause problems with the maths
            self.minimum_acceleration = args.f32_value('L')?.max(1.0);
        }
        if args.seen('S') {
            seen = true;
            self.zeta = args.limited_f32_value('S', 0.0, MAX_DAMPING)?;
        }

        if args.seen('P') {
            let name = args.string_value('P').unwrap_or_default();
            let new_type = InputShaperType::parse(name)
                .ok_or_else(|| ShaperConfigError::UnsupportedType(name.to_string()))?;
            seen = true;
            self.shaper_type = new_type;
        } else if seen && self.shaper_type == InputShaperType::None {
            // Parameters given before any type was chosen.
            self.shaper_type = if cfg!(feature = "daa") {
                InputShaperType::Daa
            } else {
                InputShaperType::Zvd
            };
        }

        if seen {
            if self.shaper_type == InputShaperType::Custom {
                if !args.seen('H') {
                    return Err(ShaperConfigError::MissingAmplitudes);
                }
                let amplitudes = args.f32_array('H')?;
                let durations = if args.seen('T') {
                    Some(args.f32_array('T')?)
                } else {
                    None
                };
                self.set_custom_impulses(&amplitudes, durations.as_deref())?;
            }
            self.synthesise();
            tracing::info!(
                "input shaper set to '{}' at {:.1}Hz, damping {:.2}",
                self.shaper_type,
                self.frequency,
                self.zeta
            );
            if let Some(listener) = &self.listener {
                listener.move_updated();
            }
            Ok(ConfigReply::Updated)
        } else {
            Ok(ConfigReply::Report(self.report()))
        }
    }

    /// Apply parameters from a loaded configuration file.
    pub fn apply_config(&mut self, config: &ShaperConfig) -> Result<(), ShaperConfigError> {
        config.validate().map_err(ShaperConfigError::InvalidConfig)?;
        self.shaper_type = config.r#type;
        self.frequency = config.frequency;
        self.zeta = config.damping;
        self.minimum_acceleration = config.min_acceleration.max(1.0);
        if self.shaper_type == InputShaperType::Custom {
            let amplitudes = config
                .amplitudes
                .as_deref()
                .ok_or(ShaperConfigError::MissingAmplitudes)?;
            self.set_custom_impulses(amplitudes, config.durations.as_deref())?;
        }
        self.synthesise();
        tracing::info!(
            "input shaper set to '{}' at {:.1}Hz, damping {:.2}",
            self.shaper_type,
            self.frequency,
            self.zeta
        );
        if let Some(listener) = &self.listener {
            listener.move_updated();
        }
        Ok(())
    }

    /// Current configuration formatted for the operator.
    pub fn report(&self) -> String {
        if self.shaper_type == InputShaperType::None {
            return "Input shaping is disabled".to_string();
        }
        let mut reply = format!(
            "Input shaping '{}' at {:.1}Hz damping factor {:.2}, min. acceleration {:.1}",
            self.shaper_type, self.frequency, self.zeta, self.minimum_acceleration
        );
        if self.num_extra_impulses != 0 {
            reply.push_str(", impulses");
            for coefficient in &self.coefficients[..self.num_extra_impulses] {
                let _ = write!(reply, " {:.3}", coefficient);
            }
            reply.push_str(" with durations (ms)");
            for duration in &self.durations[..self.num_extra_impulses] {
                let _ = write!(reply, " {:.2}", duration * 1000.0);
            }
        }
        reply
    }

    fn set_custom_impulses(
        &mut self,
        amplitudes: &[f32],
        durations: Option<&[f32]>,
    ) -> Result<(), ShaperConfigError> {
        if amplitudes.len() > MAX_EXTRA_IMPULSES {
            return Err(ShaperConfigError::TooManyAmplitudes);
        }
        let mut previous = 0.0;
        for &amplitude in amplitudes {
            if amplitude <= previous || amplitude > 1.0 {
                return Err(ShaperConfigError::BadAmplitudes);
            }
            previous = amplitude;
        }
        match durations {
            Some(durations) if durations.len() != amplitudes.len() => {
                self.shaper_type = InputShaperType::None;
                return Err(ShaperConfigError::TooFewDurations);
            }
            Some(durations) => {
                self.durations[..durations.len()].copy_from_slice(durations);
            }
            None => {
                for duration in &mut self.durations[..amplitudes.len()] {
                    *duration = 0.5 / self.frequency;
                }
            }
        }
        self.coefficients[..amplitudes.len()].copy_from_slice(amplitudes);
        self.num_extra_impulses = amplitudes.len();
        Ok(())
    }

    /// Synthesise the impulse table for the current type, frequency, and
    /// damping, then recompute the derived clock bookkeeping.
    fn synthesise(&mut self) {
        let sqrt_one_minus_zeta_squared = (1.0 - self.zeta * self.zeta).sqrt();
        let damped_frequency = self.frequency * sqrt_one_minus_zeta_squared;
        let k = (-self.zeta * std::f32::consts::PI / sqrt_one_minus_zeta_squared).exp();

        match self.shaper_type {
            InputShaperType::None => {
                self.num_extra_impulses = 0;
            }

            InputShaperType::Daa => {
                // Not an impulse table: the full ringing period, consumed by
                // the acceleration adjuster.
                self.durations[0] = 1.0 / damped_frequency;
                self.num_extra_impulses = 0;
            }

            // Impulse table already loaded by set_custom_impulses.
            InputShaperType::Custom => {}

            InputShaperType::Zvd => {
                let j = 1.0 + 2.0 * k + k * k;
                self.coefficients[0] = 1.0 / j;
                self.coefficients[1] = self.coefficients[0] + 2.0 * k / j;
                self.durations[0] = 0.5 / damped_frequency;
                self.durations[1] = 0.5 / damped_frequency;
                self.num_extra_impulses = 2;
            }

            InputShaperType::Zvdd => {
                let j = 1.0 + 3.0 * (k + k * k) + k * k * k;
                self.coefficients[0] = 1.0 / j;
                self.coefficients[1] = self.coefficients[0] + 3.0 * k / j;
                self.coefficients[2] = self.coefficients[1] + 3.0 * (k * k) / j;
                self.durations[0] = 0.5 / damped_frequency;
                self.durations[1] = 0.5 / damped_frequency;
                self.durations[2] = 0.5 / damped_frequency;
                self.num_extra_impulses = 3;
            }

            InputShaperType::Ei2 => {
                // Singer/Seering extra-insensitive shaper, degree-3 fits in
                // the damping ratio. The constants are tabulated, not
                // derivable in closed form.
                let zeta = self.zeta;
                let zeta_squared = zeta * zeta;
                let zeta_cubed = zeta_squared * zeta;
                self.coefficients[0] = 0.16054
                    + 0.76699 * zeta
                    + 2.26560 * zeta_squared
                    + (-1.22750) * zeta_cubed;
                self.coefficients[1] = (0.16054 + 0.33911)
                    + (0.76699 + 0.45081) * zeta
                    + (2.26560 - 2.58080) * zeta_squared
                    + (-1.22750 + 1.73650) * zeta_cubed;
                self.coefficients[2] = (0.16054 + 0.33911 + 0.34089)
                    + (0.76699 + 0.45081 - 0.61533) * zeta
                    + (2.26560 - 2.58080 - 0.68765) * zeta_squared
                    + (-1.22750 + 1.73650 + 0.42261) * zeta_cubed;

                self.durations[0] = (0.49890
                    + 0.16270 * zeta
                    + (-0.54262) * zeta_squared
                    + 6.16180 * zeta_cubed)
                    / damped_frequency;
                self.durations[1] = ((0.99748 - 0.49890)
                    + (0.18382 - 0.16270) * zeta
                    + (-1.58270 + 0.54262) * zeta_squared
                    + (8.17120 - 6.16180) * zeta_cubed)
                    / damped_frequency;
                self.durations[2] = ((1.49920 - 0.99748)
                    + (-0.09297 - 0.18382) * zeta
                    + (-0.28338 + 1.58270) * zeta_squared
                    + (1.85710 - 8.17120) * zeta_cubed)
                    / damped_frequency;
                self.num_extra_impulses = 3;
            }

            InputShaperType::Ei3 => {
                let zeta = self.zeta;
                let zeta_squared = zeta * zeta;
                let zeta_cubed = zeta_squared * zeta;
                self.coefficients[0] = 0.11275
                    + 0.76632 * zeta
                    + 3.29160 * zeta_squared
                    + (-1.44380) * zeta_cubed;
                self.coefficients[1] = (0.11275 + 0.23698)
                    + (0.76632 + 0.61164) * zeta
                    + (3.29160 - 2.57850) * zeta_squared
                    + (-1.44380 + 4.85220) * zeta_cubed;
                self.coefficients[2] = (0.11275 + 0.23698 + 0.30008)
                    + (0.76632 + 0.61164 - 0.19062) * zeta
                    + (3.29160 - 2.57850 - 2.14560) * zeta_squared
                    + (-1.44380 + 4.85220 + 0.13744) * zeta_cubed;
                self.coefficients[3] = (0.11275 + 0.23698 + 0.30008 + 0.23775)
                    + (0.76632 + 0.61164 - 0.19062 - 0.73297) * zeta
                    + (3.29160 - 2.57850 - 2.14560 + 0.46885) * zeta_squared
                    + (-1.44380 + 4.85220 + 0.13744 - 2.08650) * zeta_cubed;

                self.durations[0] = (0.49974
                    + 0.23834 * zeta
                    + 0.44559 * zeta_squared
                    + 12.4720 * zeta_cubed)
                    / damped_frequency;
                self.durations[1] = ((0.99849 - 0.49974)
                    + (0.29808 - 0.23834) * zeta
                    + (-2.36460 - 0.44559) * zeta_squared
                    + (23.3990 - 12.4720) * zeta_cubed)
                    / damped_frequency;
                self.durations[2] = ((1.49870 - 0.99849)
                    + (0.10306 - 0.29808) * zeta
                    + (-2.01390 + 2.36460) * zeta_squared
                    + (17.0320 - 23.3990) * zeta_cubed)
                    / damped_frequency;
                self.durations[3] = ((1.99960 - 1.49870)
                    + (-0.28231 - 0.10306) * zeta
                    + (0.61536 + 2.01390) * zeta_squared
                    + (5.40450 - 17.0320) * zeta_cubed)
                    / damped_frequency;
                self.num_extra_impulses = 4;
            }
        }

        // Total extra shaping time and its split across the two phase ends.
        // The last duration is deliberately excluded (legacy behaviour).
        self.total_duration = 0.0;
        let mut t_lost_at_start = 0.0;
        let mut t_lost_at_end = 0.0;
        for i in 0..self.num_extra_impulses.saturating_sub(1) {
            self.total_duration += self.durations[i];
            t_lost_at_start += (1.0 - self.coefficients[i]) * self.durations[i];
            t_lost_at_end += self.coefficients[i] * self.durations[i];
        }
        self.clocks_lost_at_start = t_lost_at_start * STEP_CLOCK_RATE;
        self.clocks_lost_at_end = t_lost_at_end * STEP_CLOCK_RATE;
        self.total_shaping_clocks = self.total_duration * STEP_CLOCK_RATE;

        // Coefficients for moves too short to shape the start and end of a
        // phase separately, so the two impulse trains superpose.
        self.overlapped_coefficients = [0.0; 2 * MAX_EXTRA_IMPULSES];
        self.overlapped_average_acceleration = 0.0;
        let n = self.num_extra_impulses;
        if n != 0 {
            let mut max_value = 0.0f32;
            let mut total_acceleration = 0.0;
            for i in 0..2 * n {
                let mut value = if i < n { self.coefficients[i] } else { 1.0 };
                if i >= n {
                    value -= self.coefficients[i - n];
                }
                max_value = max_value.max(value);
                self.overlapped_coefficients[i] = value;
                total_acceleration += value;
            }
            let scaling = 1.0 / max_value;
            for value in &mut self.overlapped_coefficients[..2 * n] {
                *value *= scaling;
            }
            total_acceleration *= scaling;
            self.overlapped_average_acceleration = total_acceleration / n as f32 + n as f32;
        }
    }

    pub fn shaper_type(&self) -> InputShaperType {
        self.shaper_type
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    pub fn damping(&self) -> f32 {
        self.zeta
    }

    pub fn minimum_acceleration(&self) -> f32 {
        self.minimum_acceleration
    }

    pub fn num_extra_impulses(&self) -> usize {
        self.num_extra_impulses
    }

    pub fn coefficients(&self) -> &[f32] {
        &self.coefficients[..self.num_extra_impulses]
    }

    /// Inter-impulse delays in seconds; for DAA this is the full ringing
    /// period in element 0.
    pub fn durations(&self) -> &[f32] {
        &self.durations[..self.num_extra_impulses]
    }

    pub(crate) fn daa_ideal_period(&self) -> f32 {
        self.durations[0]
    }

    pub fn total_duration(&self) -> f32 {
        self.total_duration
    }

    pub fn total_shaping_clocks(&self) -> f32 {
        self.total_shaping_clocks
    }

    pub fn clocks_lost_at_start(&self) -> f32 {
        self.clocks_lost_at_start
    }

    pub fn clocks_lost_at_end(&self) -> f32 {
        self.clocks_lost_at_end
    }

    pub fn overlapped_coefficients(&self) -> &[f32] {
        &self.overlapped_coefficients[..2 * self.num_extra_impulses]
    }

    pub fn overlapped_average_acceleration(&self) -> f32 {
        self.overlapped_average_acceleration
    }
}

impl fmt::Debug for AxisShaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AxisShaper")
            .field("type", &self.shaper_type)
            .field("frequency", &self.frequency)
            .field("zeta", &self.zeta)
            .field("minimum_acceleration", &self.minimum_acceleration)
            .field("num_extra_impulses", &self.num_extra_impulses)
            .field("coefficients", &&self.coefficients[..self.num_extra_impulses])
            .field("durations", &&self.durations[..self.num_extra_impulses])
            .finish()
    }
}
