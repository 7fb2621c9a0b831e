//! The availability table: per-intersection, per-year acquisition status.
//!
//! The table is a CSV file with one row per intersection record and one column
//! per year. Columns the harvester does not understand (station attributes, an
//! unnamed index column, ...) are carried through untouched. Year cells hold
//! `0` (unfetched), `1` (blank) or `2` (saved); empty and `NaN` cells load as
//! unfetched.
//!
//! ## Durability
//!
//! [`AvailabilityStore::set_and_persist`] is the only way to change a status.
//! It rewrites the whole table before returning: the new contents go to a
//! temporary file in the same directory, which is flushed, synced and then
//! renamed over the table. A crash at any point leaves either the previous
//! table or the new one on disk, never a truncated file.
//!
//! ## Duplicate ids
//!
//! The upstream formatter emits one row per (station, intersection) pair, so
//! the same `Intersection_ID` can appear on several rows. Those rows share one
//! status: on load the most advanced code wins, and every write updates all of
//! them.

use crate::{AvailabilityStatus, HarvestError, Intersection, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column holding the intersection id.
pub const ID_COLUMN: &str = "Intersection_ID";
/// Column holding the intersection latitude.
pub const LAT_COLUMN: &str = "Inter_Latitude";
/// Column holding the intersection longitude.
pub const LON_COLUMN: &str = "Inter_Longitude";

const TABLE_NAME: &str = "intersection table";

/// Status totals for one year column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub unfetched: usize,
    pub blank: usize,
    pub saved: usize,
}

impl StatusCounts {
    /// Total intersections counted.
    pub fn total(&self) -> usize {
        self.unfetched + self.blank + self.saved
    }
}

/// In-memory availability table bound to its backing file.
#[derive(Debug)]
pub struct AvailabilityStore {
    /// Backing file rewritten by [`persist`](Self::persist).
    path: PathBuf,
    /// Column names in file order.
    headers: Vec<String>,
    /// Raw cells, row-major. Year cells are regenerated from `statuses` on write.
    rows: Vec<Vec<String>>,
    /// Year -> column index.
    year_columns: BTreeMap<i32, usize>,
    /// Unique intersections in first-seen order.
    intersections: Vec<Intersection>,
    /// Position in `intersections` for each row.
    row_positions: Vec<usize>,
    /// Intersection id -> position in `intersections`.
    position_by_id: HashMap<i64, usize>,
    /// Year -> status per entry of `intersections`.
    statuses: BTreeMap<i32, Vec<AvailabilityStatus>>,
}

impl AvailabilityStore {
    /// Load the table from `path`; later writes go back to the same file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::from_reader(file, path)
    }

    /// Load a table from any reader, binding it to `path` for persistence.
    pub fn from_reader<R: Read, P: AsRef<Path>>(reader: R, path: P) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);
        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();

        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| HarvestError::MissingColumn {
                    table: TABLE_NAME,
                    column: name.to_string(),
                })
        };
        let id_col = find(ID_COLUMN)?;
        let lat_col = find(LAT_COLUMN)?;
        let lon_col = find(LON_COLUMN)?;

        let year_columns: BTreeMap<i32, usize> = headers
            .iter()
            .enumerate()
            .filter_map(|(i, h)| parse_year_header(h).map(|year| (year, i)))
            .collect();

        let mut store = Self {
            path: path.as_ref().to_path_buf(),
            headers,
            rows: Vec::new(),
            year_columns,
            intersections: Vec::new(),
            row_positions: Vec::new(),
            position_by_id: HashMap::new(),
            statuses: BTreeMap::new(),
        };
        for &year in store.year_columns.keys() {
            store.statuses.insert(year, Vec::new());
        }

        for (index, record) in csv_reader.records().enumerate() {
            let record = record?;
            let row_number = index + 1;
            let cells: Vec<String> = record.iter().map(str::to_string).collect();

            let id = parse_id(&cells[id_col], row_number)?;
            let latitude = parse_coordinate(&cells[lat_col], LAT_COLUMN, row_number)?;
            let longitude = parse_coordinate(&cells[lon_col], LON_COLUMN, row_number)?;

            let position = match store.position_by_id.get(&id) {
                Some(&position) => position,
                None => {
                    let position = store.intersections.len();
                    store.intersections.push(Intersection {
                        id,
                        latitude,
                        longitude,
                    });
                    store.position_by_id.insert(id, position);
                    for statuses in store.statuses.values_mut() {
                        statuses.push(AvailabilityStatus::Unfetched);
                    }
                    position
                }
            };

            for (year, &col) in &store.year_columns {
                let status = parse_status(&cells[col], &store.headers[col], row_number)?;
                if let Some(statuses) = store.statuses.get_mut(year) {
                    if status.code() > statuses[position].code() {
                        statuses[position] = status;
                    }
                }
            }

            store.row_positions.push(position);
            store.rows.push(cells);
        }

        debug!(
            path = %store.path.display(),
            rows = store.rows.len(),
            intersections = store.intersections.len(),
            years = store.year_columns.len(),
            "loaded availability table"
        );
        Ok(store)
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of unique intersections.
    pub fn len(&self) -> usize {
        self.intersections.len()
    }

    /// Whether the table has no intersections.
    pub fn is_empty(&self) -> bool {
        self.intersections.is_empty()
    }

    /// Number of data rows in the file.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column names in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Unique intersections in table order.
    pub fn intersections(&self) -> impl Iterator<Item = &Intersection> {
        self.intersections.iter()
    }

    /// Years that have a column, ascending.
    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.year_columns.keys().copied()
    }

    /// Whether the table has a column for `year`.
    pub fn has_year(&self, year: i32) -> bool {
        self.year_columns.contains_key(&year)
    }

    /// Append an all-unfetched column for `year` if missing.
    ///
    /// Returns `true` if a column was added. The caller persists.
    pub fn ensure_year(&mut self, year: i32) -> bool {
        if self.has_year(year) {
            return false;
        }
        let col = self.headers.len();
        self.headers.push(year.to_string());
        for row in &mut self.rows {
            row.push(AvailabilityStatus::Unfetched.code().to_string());
        }
        self.year_columns.insert(year, col);
        self.statuses
            .insert(year, vec![AvailabilityStatus::Unfetched; self.intersections.len()]);
        true
    }

    /// Current status of intersection `id` for `year`.
    pub fn status(&self, id: i64, year: i32) -> Result<AvailabilityStatus> {
        let position = *self
            .position_by_id
            .get(&id)
            .ok_or(HarvestError::UnknownIntersection(id))?;
        let statuses = self.statuses.get(&year).ok_or(HarvestError::UnknownYear(year))?;
        Ok(statuses[position])
    }

    /// Record a terminal status and write the table to disk before returning.
    ///
    /// Only `Unfetched -> Blank` and `Unfetched -> Saved` are accepted; anything
    /// else fails with [`HarvestError::InvalidTransition`] and leaves both the
    /// table and the file untouched.
    pub fn set_and_persist(&mut self, id: i64, year: i32, status: AvailabilityStatus) -> Result<()> {
        self.set(id, year, status)?;
        self.persist()
    }

    fn set(&mut self, id: i64, year: i32, status: AvailabilityStatus) -> Result<()> {
        let current = self.status(id, year)?;
        if current.is_terminal() || !status.is_terminal() {
            return Err(HarvestError::InvalidTransition {
                id,
                year,
                from: current.code(),
                to: status.code(),
            });
        }
        let position = self.position_by_id[&id];
        if let Some(statuses) = self.statuses.get_mut(&year) {
            statuses[position] = status;
        }
        Ok(())
    }

    /// Rewrite the backing file with the current table.
    pub fn persist(&self) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
            writer.write_record(&self.headers)?;
            for (cells, &position) in self.rows.iter().zip(&self.row_positions) {
                let mut cells = cells.clone();
                for (year, &col) in &self.year_columns {
                    cells[col] = self.statuses[year][position].code().to_string();
                }
                writer.write_record(&cells)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    /// Status totals for `year`, counting each intersection once.
    pub fn counts(&self, year: i32) -> Option<StatusCounts> {
        let statuses = self.statuses.get(&year)?;
        let mut counts = StatusCounts::default();
        for status in statuses {
            match status {
                AvailabilityStatus::Unfetched => counts.unfetched += 1,
                AvailabilityStatus::Blank => counts.blank += 1,
                AvailabilityStatus::Saved => counts.saved += 1,
            }
        }
        Some(counts)
    }
}

fn parse_year_header(header: &str) -> Option<i32> {
    let header = header.trim();
    if header.len() == 4 && header.bytes().all(|b| b.is_ascii_digit()) {
        header.parse().ok()
    } else {
        None
    }
}

fn parse_id(cell: &str, row: usize) -> Result<i64> {
    let text = cell.trim();
    text.parse::<i64>()
        .ok()
        .or_else(|| {
            text.parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0 && v.is_finite())
                .map(|v| v as i64)
        })
        .ok_or_else(|| HarvestError::InvalidCell {
            row,
            column: ID_COLUMN.to_string(),
            value: cell.to_string(),
        })
}

fn parse_coordinate(cell: &str, column: &str, row: usize) -> Result<f64> {
    cell.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| HarvestError::InvalidCell {
            row,
            column: column.to_string(),
            value: cell.to_string(),
        })
}

fn parse_status(cell: &str, column: &str, row: usize) -> Result<AvailabilityStatus> {
    let text = cell.trim();
    if text.is_empty() || text.eq_ignore_ascii_case("nan") {
        return Ok(AvailabilityStatus::Unfetched);
    }
    text.parse::<f64>()
        .ok()
        .filter(|v| v.fract() == 0.0 && (0.0..=2.0).contains(v))
        .and_then(|v| AvailabilityStatus::from_code(v as u8))
        .ok_or_else(|| HarvestError::InvalidCell {
            row,
            column: column.to_string(),
            value: cell.to_string(),
        })
}
