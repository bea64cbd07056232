//! Serde model of the grid exchange snapshot: equipment tables with their
//! recorded state variables, loadable from a single JSON document or a zip of
//! CSV tables. Flow records are optional everywhere; a missing value means
//! the snapshot simply does not carry it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use csv::ReaderBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::basic::ecs::network::InterpretError;

/// One electrical node with its nominal voltage and, when present, the
/// recorded voltage phasor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BusRecord {
    pub index: i64,
    pub name: Option<String>,
    pub vn_kv: f64,
    pub vm_kv: Option<f64>,
    pub va_degree: Option<f64>,
}

/// AC line between two buses, impedance in ohms, total charging in µS.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LineRecord {
    pub id: String,
    pub from_bus: i64,
    pub to_bus: i64,
    pub r_ohm: f64,
    pub x_ohm: f64,
    pub g_us: f64,
    pub b_us: f64,
    pub from_connected: bool,
    pub to_connected: bool,
    pub p_from_mw: Option<f64>,
    pub q_from_mvar: Option<f64>,
    pub p_to_mw: Option<f64>,
    pub q_to_mvar: Option<f64>,
}

impl Default for LineRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            from_bus: 0,
            to_bus: 0,
            r_ohm: 0.0,
            x_ohm: 0.0,
            g_us: 0.0,
            b_us: 0.0,
            from_connected: true,
            to_connected: true,
            p_from_mw: None,
            q_from_mvar: None,
            p_to_mw: None,
            q_to_mvar: None,
        }
    }
}

/// Line with only one end inside the model; the far end is a boundary node
/// whose state may or may not be part of the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DanglingLineRecord {
    pub id: String,
    pub bus: i64,
    pub r_ohm: f64,
    pub x_ohm: f64,
    pub g_us: f64,
    pub b_us: f64,
    pub connected: bool,
    pub p_mw: Option<f64>,
    pub q_mvar: Option<f64>,
    pub boundary_vn_kv: f64,
    pub boundary_vm_kv: Option<f64>,
    pub boundary_va_degree: Option<f64>,
}

impl Default for DanglingLineRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            bus: 0,
            r_ohm: 0.0,
            x_ohm: 0.0,
            g_us: 0.0,
            b_us: 0.0,
            connected: true,
            p_mw: None,
            q_mvar: None,
            boundary_vn_kv: 0.0,
            boundary_vm_kv: None,
            boundary_va_degree: None,
        }
    }
}

/// Tap changer position data. The exchange format does not say which
/// transformer end the steps refer to; that is exactly the ambiguity the
/// mapping alternatives explore. A non-zero `step_degree` makes the changer a
/// phase shifter.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TapChanger {
    pub neutral: f64,
    pub pos: f64,
    pub step_percent: f64,
    pub step_degree: f64,
}

impl TapChanger {
    /// Off-nominal ratio factor for the current position.
    pub fn ratio(&self) -> f64 {
        1.0 + (self.pos - self.neutral) * self.step_percent / 100.0
    }

    /// Phase shift of the current position in degrees, sign as exchanged.
    pub fn angle_degree(&self) -> f64 {
        (self.pos - self.neutral) * self.step_degree
    }
}

/// Two-winding transformer. Impedance and magnetizing admittance are referred
/// to the LV side; `shift_degree` is the fixed winding displacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Trafo2wRecord {
    pub id: String,
    pub hv_bus: i64,
    pub lv_bus: i64,
    pub rated_hv_kv: f64,
    pub rated_lv_kv: f64,
    pub r_ohm: f64,
    pub x_ohm: f64,
    pub g_us: f64,
    pub b_us: f64,
    pub shift_degree: f64,
    pub tap: Option<TapChanger>,
    pub hv_connected: bool,
    pub lv_connected: bool,
    pub p_hv_mw: Option<f64>,
    pub q_hv_mvar: Option<f64>,
    pub p_lv_mw: Option<f64>,
    pub q_lv_mvar: Option<f64>,
}

impl Default for Trafo2wRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            hv_bus: 0,
            lv_bus: 0,
            rated_hv_kv: 0.0,
            rated_lv_kv: 0.0,
            r_ohm: 0.0,
            x_ohm: 0.0,
            g_us: 0.0,
            b_us: 0.0,
            shift_degree: 0.0,
            tap: None,
            hv_connected: true,
            lv_connected: true,
            p_hv_mw: None,
            q_hv_mvar: None,
            p_lv_mw: None,
            q_lv_mvar: None,
        }
    }
}

/// One winding of a three-winding transformer, impedance referred to its own
/// rated voltage, clock in multiples of 30°.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafoLegRecord {
    pub bus: i64,
    pub rated_kv: f64,
    pub r_ohm: f64,
    pub x_ohm: f64,
    pub clock: i32,
    pub connected: bool,
    pub tap: Option<TapChanger>,
    pub p_mw: Option<f64>,
    pub q_mvar: Option<f64>,
}

impl Default for TrafoLegRecord {
    fn default() -> Self {
        Self {
            bus: 0,
            rated_kv: 0.0,
            r_ohm: 0.0,
            x_ohm: 0.0,
            clock: 0,
            connected: true,
            tap: None,
            p_mw: None,
            q_mvar: None,
        }
    }
}

/// Three-winding transformer; the magnetizing admittance in µS is given at
/// the first leg.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Trafo3wRecord {
    pub id: String,
    pub g_us: f64,
    pub b_us: f64,
    pub legs: [TrafoLegRecord; 3],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadRecord {
    pub id: String,
    pub bus: i64,
    pub p_mw: Option<f64>,
    pub q_mvar: Option<f64>,
    pub connected: bool,
}

impl Default for LoadRecord {
    fn default() -> Self {
        Self { id: String::new(), bus: 0, p_mw: None, q_mvar: None, connected: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenRecord {
    pub id: String,
    pub bus: i64,
    pub p_mw: Option<f64>,
    pub q_mvar: Option<f64>,
    pub connected: bool,
}

impl Default for GenRecord {
    fn default() -> Self {
        Self { id: String::new(), bus: 0, p_mw: None, q_mvar: None, connected: true }
    }
}

/// Shunt admittance in µS at a bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuntRecord {
    pub id: String,
    pub bus: i64,
    pub g_us: f64,
    pub b_us: f64,
    pub connected: bool,
}

impl Default for ShuntRecord {
    fn default() -> Self {
        Self { id: String::new(), bus: 0, g_us: 0.0, b_us: 0.0, connected: true }
    }
}

/// A complete exchange snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridModel {
    pub sn_mva: f64,
    pub bus: Vec<BusRecord>,
    pub line: Option<Vec<LineRecord>>,
    pub dangling_line: Option<Vec<DanglingLineRecord>>,
    pub trafo2w: Option<Vec<Trafo2wRecord>>,
    pub trafo3w: Option<Vec<Trafo3wRecord>>,
    pub load: Option<Vec<LoadRecord>>,
    pub r#gen: Option<Vec<GenRecord>>,
    pub shunt: Option<Vec<ShuntRecord>>,
}

impl Default for GridModel {
    fn default() -> Self {
        Self {
            sn_mva: 100.0,
            bus: Vec::new(),
            line: None,
            dangling_line: None,
            trafo2w: None,
            trafo3w: None,
            load: None,
            r#gen: None,
            shunt: None,
        }
    }
}

/// Parses a snapshot from a JSON string.
pub fn load_json_str(content: &str) -> Result<GridModel, InterpretError> {
    Ok(serde_json::from_str(content)?)
}

/// Loads a snapshot from a JSON file.
pub fn load_json(path: impl AsRef<Path>) -> Result<GridModel, InterpretError> {
    load_json_str(&std::fs::read_to_string(path)?)
}

/// Reads a CSV table from the extracted archive map and replaces the
/// "True"/"False" booleans some exporters emit.
fn csv_from_map<T: DeserializeOwned>(
    map: &HashMap<String, String>,
    key: &str,
) -> Result<Option<Vec<T>>, InterpretError> {
    let Some(content) = map.get(key) else {
        return Ok(None);
    };
    let content = content.replace("True", "true").replace("False", "false");
    let mut rdr = ReaderBuilder::new().from_reader(content.as_bytes());
    let headers = rdr.headers()?.to_owned();
    let mut records: Vec<T> = Vec::new();
    for row in rdr.records() {
        records.push(row?.deserialize(Some(&headers))?);
    }
    if records.is_empty() {
        return Ok(None);
    }
    Ok(Some(records))
}

#[derive(Debug, Deserialize)]
struct CommonRecord {
    sn_mva: f64,
}

/// Loads a snapshot from a zip archive of CSV tables (`bus.csv`, `line.csv`,
/// `dangling_line.csv`, `load.csv`, `gen.csv`, `shunt.csv`, optionally
/// `common.csv` with the MVA base). Transformer tables carry nested tap
/// records and travel in the JSON format only.
pub fn load_csv_zip(path: impl AsRef<Path>) -> Result<GridModel, InterpretError> {
    read_csv_zip(File::open(path)?)
}

/// Same as [`load_csv_zip`] for any seekable reader.
pub fn read_csv_zip<R: Read + Seek>(reader: R) -> Result<GridModel, InterpretError> {
    let mut zip = zip::ZipArchive::new(reader)?;
    let mut map = HashMap::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        let name = file.name().to_string();
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        map.insert(name, content);
    }

    let mut model = GridModel::default();
    model.bus = csv_from_map(&map, "bus.csv")?
        .ok_or_else(|| InterpretError::Conversion("archive has no bus.csv".to_string()))?;
    model.line = csv_from_map(&map, "line.csv")?;
    model.dangling_line = csv_from_map(&map, "dangling_line.csv")?;
    model.load = csv_from_map(&map, "load.csv")?;
    model.r#gen = csv_from_map(&map, "gen.csv")?;
    model.shunt = csv_from_map(&map, "shunt.csv")?;
    if let Some(common) = csv_from_map::<CommonRecord>(&map, "common.csv")? {
        if let Some(c) = common.first() {
            model.sn_mva = c.sn_mva;
        }
    }
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use zip::write::SimpleFileOptions;

    #[test]
    fn json_snapshot_parses_with_partial_records() {
        let content = r#"{
            "sn_mva": 100.0,
            "bus": [
                {"index": 0, "vn_kv": 400.0, "vm_kv": 400.0, "va_degree": 0.0},
                {"index": 1, "vn_kv": 400.0}
            ],
            "line": [
                {"id": "L-01", "from_bus": 0, "to_bus": 1, "r_ohm": 8.32, "x_ohm": 142.4,
                 "b_us": 6.25, "p_from_mw": -37.6855}
            ],
            "trafo2w": [
                {"id": "T-1", "hv_bus": 0, "lv_bus": 1,
                 "rated_hv_kv": 400.0, "rated_lv_kv": 400.0, "x_ohm": 10.0,
                 "tap": {"neutral": 0, "pos": 2, "step_percent": 1.25}}
            ]
        }"#;
        let model = load_json_str(content).unwrap();
        assert_eq!(model.bus.len(), 2);
        assert!(model.bus[1].vm_kv.is_none());
        let line = &model.line.as_ref().unwrap()[0];
        assert!(line.from_connected);
        assert_eq!(line.p_from_mw, Some(-37.6855));
        assert!(line.q_from_mvar.is_none());
        let tap = model.trafo2w.as_ref().unwrap()[0].tap.unwrap();
        assert!((tap.ratio() - 1.025).abs() < 1e-12);
        assert_eq!(tap.angle_degree(), 0.0);
    }

    #[test]
    fn csv_zip_snapshot_round_trips() {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();
            use std::io::Write;
            writer.start_file("bus.csv", options).unwrap();
            writer
                .write_all(b"index,vn_kv,vm_kv,va_degree\n0,400.0,400.0,0.0\n1,400.0,403.93,-1.94\n")
                .unwrap();
            writer.start_file("line.csv", options).unwrap();
            writer
                .write_all(
                    b"id,from_bus,to_bus,r_ohm,x_ohm,b_us,from_connected,to_connected,p_from_mw\n\
                      L-01,0,1,8.32,142.4,6.25,True,False,-37.7\n",
                )
                .unwrap();
            writer.start_file("common.csv", options).unwrap();
            writer.write_all(b"sn_mva\n250.0\n").unwrap();
            writer.finish().unwrap();
        }
        cursor.set_position(0);

        let model = read_csv_zip(cursor).unwrap();
        assert_eq!(model.sn_mva, 250.0);
        assert_eq!(model.bus.len(), 2);
        let line = &model.line.as_ref().unwrap()[0];
        assert!(line.from_connected);
        assert!(!line.to_connected);
        assert_eq!(line.p_from_mw, Some(-37.7));
        assert!(line.p_to_mw.is_none());
        assert!(model.trafo2w.is_none());
    }
}
