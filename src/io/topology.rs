use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::InitError;

/// Bus type code as carried by network files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusKind {
    Pq,
    Pv,
    Slack,
    Isolated,
}

impl BusKind {
    /// Maps the PSS/E `IDE` code to a bus kind.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(BusKind::Pq),
            2 => Some(BusKind::Pv),
            3 => Some(BusKind::Slack),
            4 => Some(BusKind::Isolated),
            _ => None,
        }
    }
}

/// A bus as read from the network file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusRecord {
    /// External bus number.
    pub number: i64,
    pub name: String,
    pub kind: BusKind,
    pub base_kv: f64,
    /// Initial voltage magnitude in p.u.
    pub vm_pu: f64,
    /// Initial voltage angle in degrees.
    pub va_deg: f64,
    /// Shunt conductance in MW at 1 p.u. voltage.
    pub gs_mw: f64,
    /// Shunt susceptance in Mvar at 1 p.u. voltage.
    pub bs_mvar: f64,
}

/// In-service constant-power load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadRecord {
    pub bus: i64,
    pub p_mw: f64,
    pub q_mvar: f64,
}

/// In-service generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorRecord {
    pub bus: i64,
    pub p_mw: f64,
    pub q_mvar: f64,
    /// Scheduled voltage magnitude in p.u.
    pub vm_setpoint_pu: f64,
}

/// In-service line or two-winding transformer in p.u. on the system base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRecord {
    pub from: i64,
    pub to: i64,
    pub r_pu: f64,
    pub x_pu: f64,
    /// Total line charging susceptance.
    pub b_pu: f64,
    /// Off-nominal turns ratio at the from end, 1.0 for lines.
    pub tap_ratio: f64,
    /// Phase shift in degrees, 0.0 for lines.
    pub shift_deg: f64,
}

/// Static network topology handed to the algebra engine once per phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    /// System base in MVA.
    pub base_mva: f64,
    pub buses: Vec<BusRecord>,
    pub loads: Vec<LoadRecord>,
    pub generators: Vec<GeneratorRecord>,
    pub branches: Vec<BranchRecord>,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            base_mva: 100.0,
            buses: Vec::new(),
            loads: Vec::new(),
            generators: Vec::new(),
            branches: Vec::new(),
        }
    }
}

impl Topology {
    /// Number of buses in the network.
    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    /// Negates every branch phase shift.
    pub fn flip_phase_shift(&mut self) {
        for branch in &mut self.branches {
            branch.shift_deg = -branch.shift_deg;
        }
    }

    /// Checks that the topology is self-consistent: positive base, unique bus
    /// numbers and every element attached to a known bus.
    pub fn validate(&self) -> Result<(), InitError> {
        if !(self.base_mva.is_finite() && self.base_mva > 0.0) {
            return Err(InitError::Topology(format!(
                "system base must be positive, got {}",
                self.base_mva
            )));
        }
        if self.buses.is_empty() {
            return Err(InitError::Topology("network has no buses".into()));
        }
        let mut known = HashSet::with_capacity(self.buses.len());
        for bus in &self.buses {
            if !known.insert(bus.number) {
                return Err(InitError::Topology(format!(
                    "bus {} is defined more than once",
                    bus.number
                )));
            }
        }
        let check = |bus: i64, what: &str| {
            if known.contains(&bus) {
                Ok(())
            } else {
                Err(InitError::Topology(format!(
                    "{what} refers to unknown bus {bus}"
                )))
            }
        };
        for load in &self.loads {
            check(load.bus, "load")?;
        }
        for generator in &self.generators {
            check(generator.bus, "generator")?;
        }
        for branch in &self.branches {
            check(branch.from, "branch")?;
            check(branch.to, "branch")?;
            if branch.r_pu == 0.0 && branch.x_pu == 0.0 {
                return Err(InitError::Topology(format!(
                    "branch {}-{} has zero impedance",
                    branch.from, branch.to
                )));
            }
        }
        if !self.buses.iter().any(|b| b.kind == BusKind::Slack) {
            return Err(InitError::Topology("network has no slack bus".into()));
        }
        Ok(())
    }
}
