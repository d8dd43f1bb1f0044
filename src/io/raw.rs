//! Readers for PSS/E RAW network files, revisions 23 and 33.
//!
//! Only the sections needed for a balanced positive-sequence power flow are
//! read: buses, loads, shunts, generators, branches and two-winding
//! transformers. Everything after the transformer data is ignored.

use std::{collections::HashMap, fs, str::Lines};

use tracing::{debug, info, warn};

use super::{
    config::NetworkFile,
    topology::{BranchRecord, BusKind, BusRecord, GeneratorRecord, LoadRecord, Topology},
};
use crate::error::InitError;

/// Reads the network selected by the configuration, applies the phase shift
/// sign and validates the result.
pub fn load_network(file: &NetworkFile, phase_shift_sign: f64) -> Result<Topology, InitError> {
    let text = fs::read_to_string(file.path())?;
    let mut topology = match file {
        NetworkFile::Pti23(_) => parse_raw_v23(&text)?,
        NetworkFile::Pti33(_) => parse_raw_v33(&text)?,
    };
    if phase_shift_sign < 0.0 {
        topology.flip_phase_shift();
    }
    topology.validate()?;
    info!(
        path = %file.path().display(),
        buses = topology.buses.len(),
        branches = topology.branches.len(),
        generators = topology.generators.len(),
        "network loaded"
    );
    Ok(topology)
}

/// One data record split into fields.
struct Record {
    line: usize,
    fields: Vec<String>,
}

impl Record {
    fn text(&self, idx: usize) -> &str {
        self.fields.get(idx).map(String::as_str).unwrap_or("")
    }

    fn parse_error(&self, idx: usize, name: &str) -> InitError {
        InitError::Topology(format!(
            "line {}: cannot read {name} from field {} ({:?})",
            self.line,
            idx + 1,
            self.text(idx)
        ))
    }

    fn f64_or(&self, idx: usize, name: &str, default: f64) -> Result<f64, InitError> {
        match self.text(idx) {
            "" => Ok(default),
            s => s.parse().map_err(|_| self.parse_error(idx, name)),
        }
    }

    fn f64(&self, idx: usize, name: &str) -> Result<f64, InitError> {
        match self.text(idx) {
            "" => Err(self.parse_error(idx, name)),
            _ => self.f64_or(idx, name, 0.0),
        }
    }

    fn int_or(&self, idx: usize, name: &str, default: i64) -> Result<i64, InitError> {
        let s = self.text(idx);
        if s.is_empty() {
            return Ok(default);
        }
        if let Ok(v) = s.parse::<i64>() {
            return Ok(v);
        }
        // Some writers emit integer codes as "1.0".
        match s.parse::<f64>() {
            Ok(v) if v.fract() == 0.0 => Ok(v as i64),
            _ => Err(self.parse_error(idx, name)),
        }
    }

    fn int(&self, idx: usize, name: &str) -> Result<i64, InitError> {
        match self.text(idx) {
            "" => Err(self.parse_error(idx, name)),
            _ => self.int_or(idx, name, 0),
        }
    }

    fn bus_kind(&self, idx: usize) -> Result<BusKind, InitError> {
        let code = self.int(idx, "IDE")?;
        BusKind::from_code(code).ok_or_else(|| {
            InitError::Topology(format!("line {}: unknown bus type code {code}", self.line))
        })
    }

    fn in_service(&self, idx: usize) -> Result<bool, InitError> {
        Ok(self.int_or(idx, "STATUS", 1)? != 0)
    }
}

/// Splits a data line into fields. Commas separate fields and a `/` starts a
/// comment, except inside single-quoted strings.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in line.chars() {
        match ch {
            '\'' | '"' => {
                quoted = !quoted;
                current.push(ch);
            }
            '/' if !quoted => break,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() || !fields.is_empty() {
        fields.push(current);
    }
    fields
        .into_iter()
        .map(|f| {
            f.trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .trim()
                .to_owned()
        })
        .collect()
}

struct RawReader<'a> {
    lines: Lines<'a>,
    line_no: usize,
}

impl<'a> RawReader<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            lines: text.lines(),
            line_no: 0,
        }
    }

    fn next_raw(&mut self) -> Option<&'a str> {
        self.line_no += 1;
        self.lines.next()
    }

    /// Next non-blank, non-annotation line as a record.
    fn next_record(&mut self) -> Option<Record> {
        loop {
            let line = self.next_raw()?;
            let trimmed = line.trim_start();
            if trimmed.is_empty() || trimmed.starts_with("@!") {
                continue;
            }
            return Some(Record {
                line: self.line_no,
                fields: split_fields(line),
            });
        }
    }

    /// Parses the three header lines and returns an empty topology carrying
    /// the system base.
    fn header(&mut self) -> Result<Topology, InitError> {
        let record = self
            .next_record()
            .ok_or_else(|| InitError::Topology("network file is empty".into()))?;
        let base_mva = record.f64(1, "SBASE")?;
        for _ in 0..2 {
            self.next_raw();
        }
        Ok(Topology {
            base_mva,
            ..Default::default()
        })
    }

    /// Records up to the next section terminator (`0` or `Q`).
    fn section(&mut self) -> Vec<Record> {
        let mut records = Vec::new();
        while let Some(record) = self.next_record() {
            if is_terminator(&record) {
                break;
            }
            records.push(record);
        }
        records
    }
}

fn is_terminator(record: &Record) -> bool {
    let first = record.text(0);
    first == "0" || first.starts_with('Q')
}

fn bus_lookup(topology: &Topology) -> HashMap<i64, usize> {
    topology
        .buses
        .iter()
        .enumerate()
        .map(|(idx, bus)| (bus.number, idx))
        .collect()
}

/// Adds a shunt given in MW/Mvar at 1 p.u. to the bus.
fn add_bus_shunt(
    topology: &mut Topology,
    lookup: &HashMap<i64, usize>,
    bus: i64,
    g_mw: f64,
    b_mvar: f64,
    line: usize,
) -> Result<(), InitError> {
    let idx = lookup.get(&bus).copied().ok_or_else(|| {
        InitError::Topology(format!("line {line}: shunt refers to unknown bus {bus}"))
    })?;
    topology.buses[idx].gs_mw += g_mw;
    topology.buses[idx].bs_mvar += b_mvar;
    Ok(())
}

fn read_generators(topology: &mut Topology, records: Vec<Record>) -> Result<(), InitError> {
    for record in records {
        if !record.in_service(14)? {
            continue;
        }
        topology.generators.push(GeneratorRecord {
            bus: record.int(0, "I")?,
            p_mw: record.f64_or(2, "PG", 0.0)?,
            q_mvar: record.f64_or(3, "QG", 0.0)?,
            vm_setpoint_pu: record.f64_or(6, "VS", 1.0)?,
        });
    }
    Ok(())
}

/// Reads line records. `shunt_at` is the position of `GI`; `BI`, `GJ`, `BJ`
/// and `ST` follow it. With `with_tap`, `RATIO` and `ANGLE` precede `GI`.
fn read_branches(
    topology: &mut Topology,
    lookup: &HashMap<i64, usize>,
    records: Vec<Record>,
    shunt_at: usize,
    with_tap: bool,
) -> Result<(), InitError> {
    let base = topology.base_mva;
    for record in records {
        if !record.in_service(shunt_at + 4)? {
            continue;
        }
        // A negative number marks the metered end; the sign carries no topology.
        let from = record.int(0, "I")?.abs();
        let to = record.int(1, "J")?.abs();
        let (tap_ratio, shift_deg) = if with_tap {
            let ratio = record.f64_or(9, "RATIO", 0.0)?;
            let ratio = if ratio == 0.0 { 1.0 } else { ratio };
            (ratio, record.f64_or(10, "ANGLE", 0.0)?)
        } else {
            (1.0, 0.0)
        };
        let gi = record.f64_or(shunt_at, "GI", 0.0)?;
        let bi = record.f64_or(shunt_at + 1, "BI", 0.0)?;
        let gj = record.f64_or(shunt_at + 2, "GJ", 0.0)?;
        let bj = record.f64_or(shunt_at + 3, "BJ", 0.0)?;
        add_bus_shunt(topology, lookup, from, gi * base, bi * base, record.line)?;
        add_bus_shunt(topology, lookup, to, gj * base, bj * base, record.line)?;
        topology.branches.push(BranchRecord {
            from,
            to,
            r_pu: record.f64(3, "R")?,
            x_pu: record.f64(4, "X")?,
            b_pu: record.f64_or(5, "B", 0.0)?,
            tap_ratio,
            shift_deg,
        });
    }
    Ok(())
}

/// Parses a revision 23 RAW file. Loads and shunts are carried on the bus
/// records and transformers are ordinary branches with a ratio.
pub fn parse_raw_v23(text: &str) -> Result<Topology, InitError> {
    let mut reader = RawReader::new(text);
    let mut topology = reader.header()?;

    for record in reader.section() {
        let number = record.int(0, "I")?;
        let p_mw = record.f64_or(2, "PL", 0.0)?;
        let q_mvar = record.f64_or(3, "QL", 0.0)?;
        topology.buses.push(BusRecord {
            number,
            name: record.text(9).to_owned(),
            kind: record.bus_kind(1)?,
            base_kv: record.f64_or(10, "BASKV", 0.0)?,
            vm_pu: record.f64_or(7, "VM", 1.0)?,
            va_deg: record.f64_or(8, "VA", 0.0)?,
            gs_mw: record.f64_or(4, "GL", 0.0)?,
            bs_mvar: record.f64_or(5, "BL", 0.0)?,
        });
        if p_mw != 0.0 || q_mvar != 0.0 {
            topology.loads.push(LoadRecord {
                bus: number,
                p_mw,
                q_mvar,
            });
        }
    }
    let lookup = bus_lookup(&topology);

    let generators = reader.section();
    read_generators(&mut topology, generators)?;

    let branches = reader.section();
    read_branches(&mut topology, &lookup, branches, 11, true)?;

    debug!(base_mva = topology.base_mva, "parsed PTI v23 network");
    Ok(topology)
}

/// Parses a revision 33 RAW file.
pub fn parse_raw_v33(text: &str) -> Result<Topology, InitError> {
    let mut reader = RawReader::new(text);
    let mut topology = reader.header()?;

    for record in reader.section() {
        topology.buses.push(BusRecord {
            number: record.int(0, "I")?,
            name: record.text(1).to_owned(),
            kind: record.bus_kind(3)?,
            base_kv: record.f64_or(2, "BASKV", 0.0)?,
            vm_pu: record.f64_or(7, "VM", 1.0)?,
            va_deg: record.f64_or(8, "VA", 0.0)?,
            gs_mw: 0.0,
            bs_mvar: 0.0,
        });
    }
    let lookup = bus_lookup(&topology);

    // Current and admittance components are taken at their 1 p.u. value.
    for record in reader.section() {
        if !record.in_service(2)? {
            continue;
        }
        let p = record.f64_or(5, "PL", 0.0)?
            + record.f64_or(7, "IP", 0.0)?
            + record.f64_or(9, "YP", 0.0)?;
        let q = record.f64_or(6, "QL", 0.0)? + record.f64_or(8, "IQ", 0.0)?
            - record.f64_or(10, "YQ", 0.0)?;
        topology.loads.push(LoadRecord {
            bus: record.int(0, "I")?,
            p_mw: p,
            q_mvar: q,
        });
    }

    for record in reader.section() {
        if !record.in_service(2)? {
            continue;
        }
        let bus = record.int(0, "I")?;
        let g = record.f64_or(3, "GL", 0.0)?;
        let b = record.f64_or(4, "BL", 0.0)?;
        add_bus_shunt(&mut topology, &lookup, bus, g, b, record.line)?;
    }

    let generators = reader.section();
    read_generators(&mut topology, generators)?;

    let branches = reader.section();
    read_branches(&mut topology, &lookup, branches, 9, false)?;

    read_transformers_v33(&mut reader, &mut topology, &lookup)?;

    debug!(base_mva = topology.base_mva, "parsed PTI v33 network");
    Ok(topology)
}

fn read_transformers_v33(
    reader: &mut RawReader<'_>,
    topology: &mut Topology,
    lookup: &HashMap<i64, usize>,
) -> Result<(), InitError> {
    let base = topology.base_mva;
    while let Some(head) = reader.next_record() {
        if is_terminator(&head) {
            break;
        }
        let k = head.int_or(2, "K", 0)?;
        if k != 0 {
            for _ in 0..4 {
                reader.next_raw();
            }
            warn!(
                line = head.line,
                "three-winding transformer {}-{}-{} skipped",
                head.text(0),
                head.text(1),
                head.text(2)
            );
            continue;
        }
        let missing = || {
            InitError::Topology(format!(
                "line {}: transformer record is truncated",
                head.line
            ))
        };
        let impedance = reader.next_record().ok_or_else(missing)?;
        let winding1 = reader.next_record().ok_or_else(missing)?;
        let winding2 = reader.next_record().ok_or_else(missing)?;

        if !head.in_service(11)? {
            continue;
        }
        let from = head.int(0, "I")?;
        let to = head.int(1, "J")?;
        let cw = head.int_or(4, "CW", 1)?;
        let cz = head.int_or(5, "CZ", 1)?;
        let cm = head.int_or(6, "CM", 1)?;

        let mut r = impedance.f64_or(0, "R1-2", 0.0)?;
        let mut x = impedance.f64(1, "X1-2")?;
        let winding_base = impedance.f64_or(2, "SBASE1-2", base)?;
        match cz {
            1 => {}
            2 | 3 => {
                if cz == 3 {
                    // R is the load loss in W and X the impedance magnitude.
                    let z = x;
                    r = r / 1e6 / winding_base;
                    x = (z * z - r * r).max(0.0).sqrt();
                }
                r *= base / winding_base;
                x *= base / winding_base;
            }
            other => {
                return Err(InitError::Topology(format!(
                    "line {}: unsupported impedance code CZ={other}",
                    head.line
                )));
            }
        }

        let base_kv = |bus: i64| {
            lookup
                .get(&bus)
                .map(|&idx| topology.buses[idx].base_kv)
                .unwrap_or(0.0)
        };
        let windv1 = winding_ratio(&winding1, cw, base_kv(from))?;
        let windv2 = winding_ratio(&winding2, cw, base_kv(to))?;
        let tap_ratio = if windv2 == 0.0 { windv1 } else { windv1 / windv2 };
        let shift_deg = winding1.f64_or(2, "ANG1", 0.0)?;

        match cm {
            1 => {
                let g = head.f64_or(7, "MAG1", 0.0)?;
                let b = head.f64_or(8, "MAG2", 0.0)?;
                add_bus_shunt(topology, lookup, from, g * base, b * base, head.line)?;
            }
            _ => warn!(
                line = head.line,
                "magnetizing data in CM={cm} form ignored for transformer {from}-{to}"
            ),
        }

        topology.branches.push(BranchRecord {
            from,
            to,
            r_pu: r,
            x_pu: x,
            b_pu: 0.0,
            tap_ratio,
            shift_deg,
        });
    }
    Ok(())
}

/// Winding voltage in p.u. of the bus base voltage.
fn winding_ratio(record: &Record, cw: i64, bus_kv: f64) -> Result<f64, InitError> {
    let windv = record.f64_or(0, "WINDV", 1.0)?;
    let nomv = record.f64_or(1, "NOMV", 0.0)?;
    let ratio = match cw {
        2 if bus_kv > 0.0 => windv / bus_kv,
        3 if nomv > 0.0 && bus_kv > 0.0 => windv * nomv / bus_kv,
        1..=3 => windv,
        other => {
            return Err(InitError::Topology(format!(
                "line {}: unsupported winding code CW={other}",
                record.line
            )));
        }
    };
    Ok(ratio)
}

#[cfg(test)]
mod tests {
    use super::*;

    const V23: &str = include_str!("../../cases/four_bus_v23.raw");
    const V33: &str = include_str!("../../cases/four_bus_v33.raw");

    #[test]
    fn test_split_fields() {
        let fields = split_fields("   1,'BUS, ONE / A', 138.0 / trailing, comment");
        assert_eq!(fields, vec!["1", "BUS, ONE / A", "138.0"]);
        assert_eq!(split_fields("0 / END OF BUS DATA"), vec!["0"]);
        assert!(split_fields("   ").is_empty());
    }

    #[test]
    fn test_parse_v23() {
        let topo = parse_raw_v23(V23).unwrap();
        assert_eq!(topo.base_mva, 100.0);
        assert_eq!(topo.buses.len(), 4);
        assert_eq!(topo.buses[0].kind, BusKind::Slack);
        assert_eq!(topo.buses[0].name, "BUS 1");
        assert_eq!(topo.buses[1].bs_mvar, 5.0);
        assert_eq!(topo.loads.len(), 2);
        assert_eq!(topo.generators.len(), 2);
        assert_eq!(topo.branches.len(), 4);
        let xfmr = &topo.branches[3];
        assert_eq!((xfmr.from, xfmr.to), (2, 4));
        assert_eq!(xfmr.tap_ratio, 1.025);
        assert_eq!(xfmr.shift_deg, 5.0);
        assert_eq!(topo.branches[0].tap_ratio, 1.0);
        assert!(topo.validate().is_ok());
    }

    #[test]
    fn test_v23_and_v33_describe_the_same_network() {
        let v23 = parse_raw_v23(V23).unwrap();
        let v33 = parse_raw_v33(V33).unwrap();
        assert_eq!(v23, v33);
    }

    #[test]
    fn test_three_winding_transformer_skipped() {
        let text = "\
0, 100.0, 33 / header
 T1
 T2
 1,'A', 138.0, 3, 1, 1, 1, 1.0, 0.0
 2,'B', 138.0, 1, 1, 1, 1, 1.0, 0.0
 3,'C', 13.8, 1, 1, 1, 1, 1.0, 0.0
0 / END OF BUS DATA
0 / END OF LOAD DATA
0 / END OF FIXED SHUNT DATA
0 / END OF GENERATOR DATA
 1, 2,'1 ', 0.01, 0.05, 0.0, 100, 100, 100, 0, 0, 0, 0, 1
0 / END OF BRANCH DATA
 1, 2, 3,'1 ',1,1,1, 0, 0, 2,'T3',1
 0.0, 0.1, 100, 0.0, 0.1, 100, 0.0, 0.1, 100, 1.0, 0.0
 1.0, 0.0, 0.0
 1.0, 0.0, 0.0
 1.0, 0.0, 0.0
 2, 3, 0,'1 ',2,2,1, 0.0, -0.01, 2,'T2',1
 0.0, 0.2, 50.0
 140.0, 0.0, -3.0
 13.8, 0.0
0 / END OF TRANSFORMER DATA
Q
";
        let topo = parse_raw_v33(text).unwrap();
        assert_eq!(topo.branches.len(), 2);
        let xfmr = &topo.branches[1];
        assert_eq!((xfmr.from, xfmr.to), (2, 3));
        // CZ=2 on a 50 MVA winding base, CW=2 in kV.
        assert!((xfmr.x_pu - 0.4).abs() < 1e-12);
        assert!((xfmr.tap_ratio - 140.0 / 138.0).abs() < 1e-12);
        assert_eq!(xfmr.shift_deg, -3.0);
        assert!((topo.buses[1].bs_mvar + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_bad_field_reports_line() {
        let text = "0, 100.0\n t\n t\n 1, 3, x\n0\n0\n0\n";
        let err = parse_raw_v23(text).unwrap_err();
        assert!(err.to_string().contains("line 4"));
    }

    #[test]
    fn test_load_network_flips_shift() {
        let dir = env!("CARGO_MANIFEST_DIR");
        let file = NetworkFile::Pti33(format!("{dir}/cases/four_bus_v33.raw").into());
        let topo = load_network(&file, -1.0).unwrap();
        assert_eq!(topo.branches[3].shift_deg, -5.0);
    }
}
