use std::{
    collections::HashSet,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::InitError;

pub const DEFAULT_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_MAX_ITERATION: u32 = 50;
pub const DEFAULT_BASE_MVA: f64 = 100.0;
pub const DEFAULT_PHASE_SHIFT_SIGN: f64 = 1.0;
pub const DEFAULT_LN_MAGNITUDE: f64 = 1.0;
pub const DEFAULT_MAX_APPARENT_POWER: f64 = 1.0;
/// Feeder federates report VA; this many VA make one p.u.
pub const DEFAULT_FEEDER_POWER_BASE: f64 = 1e8;

/// Network file selected by the configuration, resolved once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkFile {
    Pti23(PathBuf),
    Pti33(PathBuf),
}

impl NetworkFile {
    pub fn path(&self) -> &Path {
        match self {
            NetworkFile::Pti23(path) | NetworkFile::Pti33(path) => path,
        }
    }
}

/// Power flow options as written in the configuration file. Every field is
/// optional; [`PowerflowOptions::resolve`] substitutes the defaults.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PowerflowOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    #[serde(default, rename = "maxIteration", skip_serializing_if = "Option::is_none")]
    pub max_iteration: Option<u32>,
    #[serde(default, rename = "baseMVA", skip_serializing_if = "Option::is_none")]
    pub base_mva: Option<f64>,
    #[serde(default, rename = "phaseShiftSign", skip_serializing_if = "Option::is_none")]
    pub phase_shift_sign: Option<f64>,
    #[serde(
        default,
        rename = "networkConfiguration",
        skip_serializing_if = "Option::is_none"
    )]
    pub network_configuration: Option<PathBuf>,
    #[serde(
        default,
        rename = "networkConfiguration_v33",
        skip_serializing_if = "Option::is_none"
    )]
    pub network_configuration_v33: Option<PathBuf>,
}

/// Resolved solver settings, immutable for the run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverOptions {
    pub tolerance: f64,
    pub max_iterations: u32,
    pub base_mva: f64,
    pub phase_shift_sign: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tolerance: DEFAULT_TOLERANCE,
            max_iterations: DEFAULT_MAX_ITERATION,
            base_mva: DEFAULT_BASE_MVA,
            phase_shift_sign: DEFAULT_PHASE_SHIFT_SIGN,
        }
    }
}

impl SolverOptions {
    pub fn validate(&self) -> Result<(), InitError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(InitError::Config(format!(
                "tolerance must be a positive number, got {}",
                self.tolerance
            )));
        }
        if self.max_iterations == 0 {
            return Err(InitError::Config("maxIteration must be at least 1".into()));
        }
        if !(self.base_mva.is_finite() && self.base_mva > 0.0) {
            return Err(InitError::Config(format!(
                "baseMVA must be a positive number, got {}",
                self.base_mva
            )));
        }
        if self.phase_shift_sign != 1.0 && self.phase_shift_sign != -1.0 {
            return Err(InitError::Config(format!(
                "phaseShiftSign must be 1 or -1, got {}",
                self.phase_shift_sign
            )));
        }
        Ok(())
    }
}

impl PowerflowOptions {
    /// Applies the default table and validates the result.
    pub fn resolve(&self) -> Result<SolverOptions, InitError> {
        let defaults = SolverOptions::default();
        let options = SolverOptions {
            tolerance: self.tolerance.unwrap_or(defaults.tolerance),
            max_iterations: self.max_iteration.unwrap_or(defaults.max_iterations),
            base_mva: self.base_mva.unwrap_or(defaults.base_mva),
            phase_shift_sign: self.phase_shift_sign.unwrap_or(defaults.phase_shift_sign),
        };
        options.validate()?;
        Ok(options)
    }

    /// `networkConfiguration` selects the v23 reader; `networkConfiguration_v33`
    /// is consulted only when the former is absent.
    pub fn network_file(&self) -> Result<NetworkFile, InitError> {
        match (&self.network_configuration, &self.network_configuration_v33) {
            (Some(path), _) => Ok(NetworkFile::Pti23(path.clone())),
            (None, Some(path)) => Ok(NetworkFile::Pti33(path.clone())),
            (None, None) => Err(InitError::Config(
                "no network configuration file specified".into(),
            )),
        }
    }
}

/// Transmission bus together with the feeder federates that load it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusGroupConfig {
    pub bus_id: i64,
    pub feeders: Vec<String>,
    /// Prepended to `Va`/`Vb`/`Vc` when registering this bus's publications.
    #[serde(default)]
    pub publication_prefix: String,
}

/// Top-level co-simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoSimConfig {
    #[serde(default = "default_federate_name")]
    pub federate_name: String,
    /// Simulated horizon in seconds.
    pub total_time: f64,
    /// Line-to-neutral base voltage in volts used to scale published phasors.
    #[serde(
        default,
        rename = "lnMagnitude",
        alias = "ln_magnitude",
        skip_serializing_if = "Option::is_none"
    )]
    pub ln_magnitude: Option<f64>,
    /// Per-feeder admission limit in p.u.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_apparent_power: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feeder_power_base: Option<f64>,
    pub bus_groups: Vec<BusGroupConfig>,
    #[serde(default)]
    pub powerflow: PowerflowOptions,
    /// Directory relative network paths are resolved against.
    #[serde(skip)]
    pub base_dir: Option<PathBuf>,
}

fn default_federate_name() -> String {
    "gridpack".to_owned()
}

impl CoSimConfig {
    pub fn from_json_str(text: &str) -> Result<Self, InitError> {
        let config: CoSimConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a configuration file. Relative network paths are
    /// taken relative to the file's directory.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, InitError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_json_str(&text)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn ln_magnitude(&self) -> f64 {
        self.ln_magnitude.unwrap_or(DEFAULT_LN_MAGNITUDE)
    }

    pub fn max_apparent_power(&self) -> f64 {
        self.max_apparent_power.unwrap_or(DEFAULT_MAX_APPARENT_POWER)
    }

    pub fn feeder_power_base(&self) -> f64 {
        self.feeder_power_base.unwrap_or(DEFAULT_FEEDER_POWER_BASE)
    }

    pub fn solver_options(&self) -> Result<SolverOptions, InitError> {
        self.powerflow.resolve()
    }

    pub fn network_file(&self) -> Result<NetworkFile, InitError> {
        let file = self.powerflow.network_file()?;
        let Some(base) = &self.base_dir else {
            return Ok(file);
        };
        Ok(match file {
            NetworkFile::Pti23(path) => NetworkFile::Pti23(base.join(path)),
            NetworkFile::Pti33(path) => NetworkFile::Pti33(base.join(path)),
        })
    }

    pub fn validate(&self) -> Result<(), InitError> {
        self.powerflow.resolve()?;
        if !(self.total_time.is_finite() && self.total_time >= 0.0) {
            return Err(InitError::Config(format!(
                "total_time must be a non-negative number, got {}",
                self.total_time
            )));
        }
        if !self.ln_magnitude().is_finite() {
            return Err(InitError::Config("lnMagnitude must be finite".into()));
        }
        let max_s = self.max_apparent_power();
        if !(max_s.is_finite() && max_s > 0.0) {
            return Err(InitError::Config(format!(
                "max_apparent_power must be a positive number, got {max_s}"
            )));
        }
        let base = self.feeder_power_base();
        if !(base.is_finite() && base > 0.0) {
            return Err(InitError::Config(format!(
                "feeder_power_base must be a positive number, got {base}"
            )));
        }
        if self.bus_groups.is_empty() {
            return Err(InitError::Config("no bus groups configured".into()));
        }
        let mut feeders = HashSet::new();
        let mut prefixes = HashSet::new();
        for group in &self.bus_groups {
            if !prefixes.insert(group.publication_prefix.as_str()) {
                return Err(InitError::Config(format!(
                    "bus {} reuses publication prefix {:?}",
                    group.bus_id, group.publication_prefix
                )));
            }
            for feeder in &group.feeders {
                if !feeders.insert(feeder.as_str()) {
                    return Err(InitError::Config(format!(
                        "feeder {feeder} is bound to more than one bus group"
                    )));
                }
            }
        }
        Ok(())
    }
}
