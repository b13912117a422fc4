//! Sparse technical-coefficient storage
//!
//! A matrix is materialised at most once per model instance. The first load
//! result, success or failure, is kept for the process lifetime: a failed load
//! is never retried and every later lookup reports the same failure.
//!
//! Supplier order is the input row order, so ties in `top_suppliers` are
//! broken by position in the source file.

use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Default bound on memoised point lookups per model
pub const DEFAULT_MEMO_LIMIT: usize = 100_000;

/// One `(supplier, buyer, coefficient)` record as stored on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub from_country: String,
    pub from_sector: String,
    pub to_country: String,
    pub to_sector: String,
    pub coefficient: f64,
}

impl CoefficientRow {
    pub fn new(
        from_country: &str,
        from_sector: &str,
        to_country: &str,
        to_sector: &str,
        coefficient: f64,
    ) -> Self {
        CoefficientRow {
            from_country: from_country.to_string(),
            from_sector: from_sector.to_string(),
            to_country: to_country.to_string(),
            to_sector: to_sector.to_string(),
            coefficient,
        }
    }
}

/// Where a model's coefficients come from
#[derive(Debug, Clone)]
pub enum CoefficientSource {
    /// CSV file, zstd-compressed when the extension is `.zst`
    Csv(PathBuf),
    /// SQLite database holding a coefficient table
    Sqlite { path: PathBuf, table: String },
    /// Rows already in memory
    Rows(Arc<Vec<CoefficientRow>>),
}

impl CoefficientSource {
    pub fn rows(rows: Vec<CoefficientRow>) -> Self {
        CoefficientSource::Rows(Arc::new(rows))
    }

    /// Human-readable location used in logs and errors
    pub fn location(&self) -> String {
        match self {
            CoefficientSource::Csv(path) => path.display().to_string(),
            CoefficientSource::Sqlite { path, table } => {
                format!("{}#{}", path.display(), table)
            }
            CoefficientSource::Rows(rows) => format!("<memory: {} rows>", rows.len()),
        }
    }

    fn read_rows(&self) -> Result<Vec<CoefficientRow>> {
        match self {
            CoefficientSource::Csv(path) => read_csv(path),
            CoefficientSource::Sqlite { path, table } => read_sqlite(path, table),
            CoefficientSource::Rows(rows) => Ok(rows.as_ref().clone()),
        }
    }
}

/// Coefficient data could not be materialised
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("failed to load coefficient matrix from {location}: {reason}")]
pub struct MatrixLoadFailure {
    pub location: String,
    pub reason: String,
}

fn read_csv(path: &Path) -> Result<Vec<CoefficientRow>> {
    let compressed = path.extension().is_some_and(|ext| ext == "zst");
    let rows = if compressed {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let bytes = zstd::decode_all(file)
            .with_context(|| format!("failed to decompress {}", path.display()))?;
        parse_csv(csv::Reader::from_reader(bytes.as_slice()))
    } else {
        let reader = csv::Reader::from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        parse_csv(reader)
    };
    rows.with_context(|| format!("invalid coefficient CSV: {}", path.display()))
}

fn parse_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Vec<CoefficientRow>> {
    let mut rows = Vec::new();
    for (i, record) in reader.deserialize().enumerate() {
        // +2: header line plus 1-based numbering
        let row: CoefficientRow = record.with_context(|| format!("line {}", i + 2))?;
        rows.push(row);
    }
    Ok(rows)
}

fn is_valid_table_name(table: &str) -> bool {
    !table.is_empty() && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn read_sqlite(path: &Path, table: &str) -> Result<Vec<CoefficientRow>> {
    if !is_valid_table_name(table) {
        bail!("invalid coefficient table name '{}'", table);
    }
    let conn = rusqlite::Connection::open_with_flags(
        path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open {}", path.display()))?;

    let sql = format!(
        "SELECT from_country, from_sector, to_country, to_sector, coefficient FROM {} ORDER BY rowid",
        table
    );
    let mut stmt = conn
        .prepare(&sql)
        .with_context(|| format!("failed to query table '{}' in {}", table, path.display()))?;
    let rows = stmt
        .query_map([], |row| {
            Ok(CoefficientRow {
                from_country: row.get(0)?,
                from_sector: row.get(1)?,
                to_country: row.get(2)?,
                to_sector: row.get(3)?,
                coefficient: row.get(4)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()
        .with_context(|| format!("failed to read table '{}' in {}", table, path.display()))?;
    Ok(rows)
}

/// Summary statistics over a loaded matrix
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatrixStats {
    /// Distinct country-sector nodes seen as supplier or buyer
    pub rows: usize,
    pub non_zero: usize,
    pub mean_coefficient: f64,
    pub max_coefficient: f64,
}

/// Supplier edge as returned by `top_suppliers`
#[derive(Debug, Clone, PartialEq)]
pub struct SupplierEdge {
    pub country: String,
    pub sector: String,
    pub coefficient: f64,
}

/// Interned sparse matrix indexed by buyer
#[derive(Debug, Default)]
pub struct CoefficientMatrix {
    nodes: Vec<(String, String)>,
    index: HashMap<String, HashMap<String, usize>>,
    /// Buyer node id -> `(supplier node id, coefficient)` in input order
    columns: Vec<Vec<(usize, f64)>>,
    /// Buyer node id -> positions into its column, sorted by supplier id
    by_supplier: Vec<Vec<u32>>,
}

impl CoefficientMatrix {
    /// Build from rows. A repeated `(supplier, buyer)` pair keeps its first
    /// position and takes the last value.
    pub fn from_rows<I>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = CoefficientRow>,
    {
        let mut matrix = CoefficientMatrix::default();
        // (supplier, buyer) -> position in the buyer's column, build only
        let mut positions: HashMap<(usize, usize), usize> = HashMap::new();
        for row in rows {
            if !row.coefficient.is_finite() || row.coefficient < 0.0 {
                bail!(
                    "invalid coefficient {} for {}/{} -> {}/{}",
                    row.coefficient,
                    row.from_country,
                    row.from_sector,
                    row.to_country,
                    row.to_sector
                );
            }
            let supplier = matrix.intern(&row.from_country, &row.from_sector);
            let buyer = matrix.intern(&row.to_country, &row.to_sector);
            let column = &mut matrix.columns[buyer];
            match positions.get(&(supplier, buyer)) {
                Some(&pos) => column[pos].1 = row.coefficient,
                None => {
                    positions.insert((supplier, buyer), column.len());
                    column.push((supplier, row.coefficient));
                }
            }
        }
        drop(positions);

        matrix.by_supplier = matrix
            .columns
            .iter()
            .map(|column| {
                let mut order: Vec<u32> = (0..column.len() as u32).collect();
                order.sort_unstable_by_key(|&pos| column[pos as usize].0);
                order
            })
            .collect();
        Ok(matrix)
    }

    fn intern(&mut self, country: &str, sector: &str) -> usize {
        if let Some(id) = self.node_id(country, sector) {
            return id;
        }
        let id = self.nodes.len();
        self.nodes.push((country.to_string(), sector.to_string()));
        self.columns.push(Vec::new());
        self.index
            .entry(country.to_string())
            .or_default()
            .insert(sector.to_string(), id);
        id
    }

    fn node_id(&self, country: &str, sector: &str) -> Option<usize> {
        self.index.get(country)?.get(sector).copied()
    }

    /// Coefficient for `supplier -> buyer`, `0.0` when absent
    pub fn coefficient(
        &self,
        from_country: &str,
        from_sector: &str,
        to_country: &str,
        to_sector: &str,
    ) -> f64 {
        let (Some(supplier), Some(buyer)) = (
            self.node_id(from_country, from_sector),
            self.node_id(to_country, to_sector),
        ) else {
            return 0.0;
        };
        let column = &self.columns[buyer];
        let order = &self.by_supplier[buyer];
        order
            .binary_search_by_key(&supplier, |&pos| column[pos as usize].0)
            .map_or(0.0, |i| column[order[i] as usize].1)
    }

    /// Suppliers of a buyer with coefficient strictly above `min_coefficient`,
    /// strictly descending, ties in input order, at most `top_n`
    pub fn top_suppliers(
        &self,
        country: &str,
        sector: &str,
        top_n: usize,
        min_coefficient: f64,
    ) -> Vec<SupplierEdge> {
        let Some(buyer) = self.node_id(country, sector) else {
            return Vec::new();
        };
        let mut edges: Vec<(usize, f64)> = self.columns[buyer]
            .iter()
            .copied()
            .filter(|(_, coef)| *coef > min_coefficient)
            .collect();
        // sort_by is stable, which keeps input order for ties
        edges.sort_by(|a, b| b.1.total_cmp(&a.1));
        edges.truncate(top_n);
        edges
            .into_iter()
            .map(|(id, coefficient)| {
                let (country, sector) = &self.nodes[id];
                SupplierEdge {
                    country: country.clone(),
                    sector: sector.clone(),
                    coefficient,
                }
            })
            .collect()
    }

    pub fn non_zero(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    pub fn stats(&self) -> MatrixStats {
        let mut sum = 0.0;
        let mut max = 0.0_f64;
        let mut count = 0usize;
        for (_, coef) in self.columns.iter().flatten() {
            sum += coef;
            max = max.max(*coef);
            count += 1;
        }
        MatrixStats {
            rows: self.nodes.len(),
            non_zero: count,
            mean_coefficient: if count == 0 { 0.0 } else { sum / count as f64 },
            max_coefficient: max,
        }
    }
}

type MemoKey = (String, String, String, String);

/// Lazily loaded matrix with a bounded memo of point lookups
#[derive(Debug)]
pub struct LazyMatrix {
    source: CoefficientSource,
    cell: OnceLock<Result<Arc<CoefficientMatrix>, MatrixLoadFailure>>,
    memo: DashMap<MemoKey, f64>,
    memo_limit: usize,
}

impl LazyMatrix {
    pub fn new(source: CoefficientSource) -> Self {
        Self::with_memo_limit(source, DEFAULT_MEMO_LIMIT)
    }

    pub fn with_memo_limit(source: CoefficientSource, memo_limit: usize) -> Self {
        LazyMatrix {
            source,
            cell: OnceLock::new(),
            memo: DashMap::new(),
            memo_limit,
        }
    }

    pub fn source(&self) -> &CoefficientSource {
        &self.source
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }

    /// The materialised matrix, loading it on first use
    pub fn get(&self) -> Result<Arc<CoefficientMatrix>, MatrixLoadFailure> {
        self.cell.get_or_init(|| self.load()).clone()
    }

    fn load(&self) -> Result<Arc<CoefficientMatrix>, MatrixLoadFailure> {
        let location = self.source.location();
        let started = Instant::now();
        let matrix = self
            .source
            .read_rows()
            .and_then(CoefficientMatrix::from_rows)
            .map_err(|e| {
                let failure = MatrixLoadFailure {
                    location: location.clone(),
                    reason: format!("{:#}", e),
                };
                tracing::error!(location = %location, reason = %failure.reason, "coefficient load failed");
                failure
            })?;
        tracing::info!(
            location = %location,
            entries = matrix.non_zero(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "loaded coefficient matrix"
        );
        Ok(Arc::new(matrix))
    }

    pub fn coefficient(
        &self,
        from_country: &str,
        from_sector: &str,
        to_country: &str,
        to_sector: &str,
    ) -> Result<f64, MatrixLoadFailure> {
        let key = (
            from_country.to_string(),
            from_sector.to_string(),
            to_country.to_string(),
            to_sector.to_string(),
        );
        if let Some(hit) = self.memo.get(&key) {
            return Ok(*hit);
        }
        let value = self
            .get()?
            .coefficient(from_country, from_sector, to_country, to_sector);
        if self.memo.len() < self.memo_limit {
            self.memo.insert(key, value);
        }
        Ok(value)
    }

    pub fn top_suppliers(
        &self,
        country: &str,
        sector: &str,
        top_n: usize,
        min_coefficient: f64,
    ) -> Result<Vec<SupplierEdge>, MatrixLoadFailure> {
        Ok(self
            .get()?
            .top_suppliers(country, sector, top_n, min_coefficient))
    }

    pub fn stats(&self) -> Result<MatrixStats, MatrixLoadFailure> {
        Ok(self.get()?.stats())
    }

    pub fn memo_len(&self) -> usize {
        self.memo.len()
    }
}
