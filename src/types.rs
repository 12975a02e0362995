//src/types.rs

use std::fmt::{self, Write as FmtWrite};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use crate::error::{FunctionError, Result};

/// Rank names, index 0 is rank 1.
pub const TAXA: [&str; 8] = [
    "kingdom", "phylum", "class", "order", "family", "genus", "species", "strain",
];

/// Count of a function annotation under one taxon.
///
/// Tallies saturate at `u32::MAX` instead of wrapping.
pub type GeneCount = u32;

/// A taxonomic depth between 1 (kingdom) and 8 (strain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaxonomicRank(u8);

impl TaxonomicRank {
    pub const STRAIN: TaxonomicRank = TaxonomicRank(8);

    pub fn new(level: u8) -> Result<Self> {
        if (1..=8).contains(&level) {
            Ok(Self(level))
        } else {
            Err(FunctionError::InvalidRank(level.to_string()))
        }
    }

    /// Number of lineage fields kept at this rank.
    #[inline]
    pub fn level(&self) -> usize {
        self.0 as usize
    }

    pub fn name(&self) -> &'static str {
        TAXA[self.level() - 1]
    }

    /// Strain rank means no collapsing of the reference.
    pub fn is_strain(&self) -> bool {
        self.0 == 8
    }
}

impl FromStr for TaxonomicRank {
    type Err = FunctionError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(level) = s.parse::<u8>() {
            return Self::new(level);
        }
        TAXA.iter()
            .position(|name| name.eq_ignore_ascii_case(s))
            .map(|idx| Self(idx as u8 + 1))
            .ok_or_else(|| FunctionError::InvalidRank(s.to_string()))
    }
}

impl fmt::Display for TaxonomicRank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Truncates a lineage to its first `level` semicolon-delimited fields.
pub fn truncate_lineage(lineage: &str, level: usize) -> String {
    lineage.split(';').take(level).collect::<Vec<_>>().join(";")
}

/// Median of `values`, sorting them in place. Even lengths average the two
/// middle values; an empty slice gives 0.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// How cells are rendered when a table is written out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    /// `%d`: truncated toward zero.
    Integer,
    /// `%f`: six decimals.
    Float,
}

impl ValueFormat {
    fn render(&self, out: &mut String, value: f64) {
        if !value.is_finite() {
            out.push('0');
            return;
        }
        match self {
            ValueFormat::Integer => write!(out, "{}", value.trunc() as i64),
            ValueFormat::Float => write!(out, "{:.6}", value),
        }
        .unwrap();
    }
}

/// A dense labeled table: `values[row][col]`.
///
/// Used for sample taxatables (taxa x samples), function tables
/// (functions x samples) and group tables (groups x samples).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AbundanceTable {
    pub row_ids: Vec<String>,
    pub col_ids: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

impl AbundanceTable {
    pub fn new(row_ids: Vec<String>, col_ids: Vec<String>, values: Vec<Vec<f64>>) -> Self {
        debug_assert_eq!(row_ids.len(), values.len());
        debug_assert!(values.iter().all(|row| row.len() == col_ids.len()));
        Self { row_ids, col_ids, values }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }

    #[inline]
    pub fn n_cols(&self) -> usize {
        self.col_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.row_ids.is_empty()
    }

    /// Value at (row, col), or `None` when either index is out of range.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.values.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Looks up a cell by its labels.
    pub fn get_by_id(&self, row_id: &str, col_id: &str) -> Option<f64> {
        let row = self.row_ids.iter().position(|r| r == row_id)?;
        let col = self.col_ids.iter().position(|c| c == col_id)?;
        self.get(row, col)
    }

    /// Totals per column.
    pub fn col_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.n_cols()];
        for row in &self.values {
            for (sum, &v) in sums.iter_mut().zip(row) {
                *sum += v;
            }
        }
        sums
    }

    /// Drops every row whose values are all zero.
    pub fn without_zero_rows(self) -> Self {
        let (row_ids, values): (Vec<_>, Vec<_>) = self
            .row_ids
            .into_iter()
            .zip(self.values)
            .filter(|(_, row)| row.iter().any(|&v| v != 0.0))
            .unzip();
        Self {
            row_ids,
            col_ids: self.col_ids,
            values,
        }
    }

    /// Render as tab-separated text with `id_header` in the corner cell.
    pub fn to_tsv_string(&self, id_header: &str, format: ValueFormat) -> String {
        let mut output = String::with_capacity(16 * (self.n_rows() + 1) * (self.n_cols() + 1));
        output.push_str(id_header);
        for col in &self.col_ids {
            output.push('\t');
            output.push_str(col);
        }
        output.push('\n');

        for (id, row) in self.row_ids.iter().zip(&self.values) {
            output.push_str(id);
            for &v in row {
                output.push('\t');
                format.render(&mut output, v);
            }
            output.push('\n');
        }
        output
    }

    pub fn write_tsv<P: AsRef<Path>>(
        &self,
        path: P,
        id_header: &str,
        format: ValueFormat,
    ) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        out.write_all(self.to_tsv_string(id_header, format).as_bytes())?;
        out.flush()?;
        Ok(())
    }
}
