//src/taxatable.rs

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{FunctionError, Result};
use crate::types::{median, AbundanceTable, TaxonomicRank};

/// Cell and label spellings read as missing.
const NA_TOKENS: [&str; 8] = ["", "NA", "N/A", "NaN", "nan", "null", "NULL", "#N/A"];

fn is_na(token: &str) -> bool {
    NA_TOKENS.contains(&token.trim())
}

/// Opens `path`, decompressing when it ends with `.gz`.
fn open_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let f = File::open(path)?;
    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    Ok(if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    })
}

/// Output name stem for a taxatable: the file name minus its last extension,
/// with `.<rank>` appended unless the rank name already appears in it.
pub fn output_prefix<P: AsRef<Path>>(input: P, rank: TaxonomicRank) -> String {
    let mut prefix = input
        .as_ref()
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !prefix.contains(rank.name()) {
        prefix.push('.');
        prefix.push_str(rank.name());
    }
    prefix
}

/// Reads a tab-separated taxatable: a header of sample ids, then one row per
/// lineage. Rows whose lineage is missing are dropped, missing cells are 0.
pub fn read_taxatable<P: AsRef<Path>>(path: P) -> Result<AbundanceTable> {
    let path = path.as_ref();
    let mut lines = open_reader(path)?.lines();

    let header_line = lines
        .next()
        .ok_or_else(|| FunctionError::EmptyData(format!("{} has no header", path.display())))??;
    let sample_ids: Vec<String> = header_line
        .trim_end_matches('\r')
        .split('\t')
        .skip(1)
        .map(|s| s.to_string())
        .collect();
    let n_samples = sample_ids.len();

    let mut row_ids = Vec::new();
    let mut values = Vec::new();
    let mut dropped = 0usize;

    for (idx, line_result) in lines.enumerate() {
        let line = line_result?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let line_no = idx + 2;
        let mut fields = line.split('\t');
        let label = fields.next().unwrap_or_default();
        let cells: Vec<&str> = fields.collect();

        if cells.len() > n_samples {
            return Err(FunctionError::Malformed {
                path: path.to_path_buf(),
                line: line_no,
                expected: n_samples + 1,
                found: cells.len() + 1,
            });
        }
        if is_na(label) {
            dropped += 1;
            continue;
        }

        let mut row = vec![0.0; n_samples];
        for (col, cell) in cells.iter().enumerate() {
            if is_na(cell) {
                continue;
            }
            row[col] = cell.trim().parse().map_err(|_| FunctionError::InvalidValue {
                path: path.to_path_buf(),
                line: line_no,
                col: col + 1,
                value: cell.to_string(),
            })?;
        }
        row_ids.push(label.to_string());
        values.push(row);
    }

    if dropped > 0 {
        log::debug!("Dropped {dropped} rows without a lineage from {}", path.display());
    }
    Ok(AbundanceTable::new(row_ids, sample_ids, values))
}

/// Re-keys rows by their lineage cut to `rank` (spaces become underscores)
/// and sums rows sharing a key. Lineages with fewer than `rank` fields are
/// dropped. Keys come out sorted.
pub fn summarize_taxatable(table: &AbundanceTable, rank: TaxonomicRank) -> AbundanceTable {
    let level = rank.level();
    let mut grouped: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    let mut unresolved = 0usize;

    for (label, row) in table.row_ids.iter().zip(&table.values) {
        let fields: Vec<&str> = label.split(';').take(level).collect();
        if fields.len() < level {
            unresolved += 1;
            continue;
        }
        let key = fields.join(";").replace(' ', "_");
        let sums = grouped.entry(key).or_insert_with(|| vec![0.0; table.n_cols()]);
        for (sum, &v) in sums.iter_mut().zip(row) {
            *sum += v;
        }
    }

    if unresolved > 0 {
        log::debug!("Dropped {unresolved} taxa not resolved to {rank}");
    }

    let (row_ids, values) = grouped.into_iter().unzip();
    AbundanceTable::new(row_ids, table.col_ids.clone(), values)
}

/// Rescales every sample to the median sample depth:
/// `x_ij * median(totals) / total_j`. Empty samples stay at zero.
pub fn normalize_by_median_depth(table: &AbundanceTable) -> AbundanceTable {
    let totals = table.col_sums();
    let target = median(&mut totals.clone());
    let factors: Vec<f64> = totals
        .iter()
        .map(|&t| if t > 0.0 { target / t } else { 0.0 })
        .collect();

    let values = table
        .values
        .iter()
        .map(|row| row.iter().zip(&factors).map(|(&v, &f)| v * f).collect())
        .collect();
    AbundanceTable::new(table.row_ids.clone(), table.col_ids.clone(), values)
}

/// Reads, summarizes and depth-normalizes a taxatable at `rank`.
pub fn load_taxatable<P: AsRef<Path>>(path: P, rank: TaxonomicRank) -> Result<AbundanceTable> {
    let path = path.as_ref();
    log::info!("Reading in taxatable for functional prediction at {}", path.display());
    let raw = read_taxatable(path)?;
    log::debug!("Taxatable shape ({}, {})", raw.n_rows(), raw.n_cols());

    let summarized = summarize_taxatable(&raw, rank);
    log::debug!(
        "Taxatable summarized at {} shape ({}, {})",
        rank,
        summarized.n_rows(),
        summarized.n_cols()
    );
    Ok(normalize_by_median_depth(&summarized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    const TABLE: &str = "#OTU ID\tS1\tS2\tS3\n\
        k__B;p__F;c__C;o__O;f__F;g__G;s__G a\t10\t0\t4\n\
        k__B;p__F;c__C;o__O;f__F;g__G;s__G b\t5\t20\t\n\
        k__B;p__F;c__C;o__O;f__F;g__H\t1\t1\t1\n\
        k__B;p__F\t100\t100\t100\n\
        \t7\t7\t7\n\
        NA\t7\t7\t7\n";

    fn write_table(dir: &TempDir, name: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, TABLE).unwrap();
        path
    }

    #[test]
    fn test_read_taxatable_drops_missing_labels() {
        let dir = TempDir::new().unwrap();
        let table = read_taxatable(write_table(&dir, "sample.txt")).unwrap();
        assert_eq!(table.col_ids, vec!["S1", "S2", "S3"]);
        assert_eq!(table.n_rows(), 4);
        assert_eq!(table.get(1, 2), Some(0.0));
    }

    #[test]
    fn test_read_gzipped_taxatable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.txt.gz");
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        enc.write_all(TABLE.as_bytes()).unwrap();
        enc.finish().unwrap();

        let table = read_taxatable(&path).unwrap();
        assert_eq!(table.n_rows(), 4);
    }

    #[test]
    fn test_invalid_cells_and_long_rows_are_errors() {
        let dir = TempDir::new().unwrap();
        let bad_value = dir.path().join("bad_value.txt");
        std::fs::write(&bad_value, "id\tS1\nk;p\tabc\n").unwrap();
        assert!(matches!(
            read_taxatable(&bad_value),
            Err(FunctionError::InvalidValue { line: 2, col: 1, .. })
        ));

        let long_row = dir.path().join("long_row.txt");
        std::fs::write(&long_row, "id\tS1\nk;p\t1\t2\n").unwrap();
        assert!(matches!(read_taxatable(&long_row), Err(FunctionError::Malformed { .. })));

        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "").unwrap();
        assert!(matches!(read_taxatable(&empty), Err(FunctionError::EmptyData(_))));
    }

    #[test]
    fn test_summarize_groups_and_drops_shallow_rows() {
        let dir = TempDir::new().unwrap();
        let raw = read_taxatable(write_table(&dir, "sample.txt")).unwrap();

        let species = summarize_taxatable(&raw, TaxonomicRank::new(7).unwrap());
        assert_eq!(
            species.row_ids,
            vec![
                "k__B;p__F;c__C;o__O;f__F;g__G;s__G_a",
                "k__B;p__F;c__C;o__O;f__F;g__G;s__G_b",
            ]
        );

        let genus = summarize_taxatable(&raw, TaxonomicRank::new(6).unwrap());
        assert_eq!(genus.row_ids.len(), 2);
        assert_eq!(genus.get_by_id("k__B;p__F;c__C;o__O;f__F;g__G", "S2"), Some(20.0));
        assert_eq!(genus.get_by_id("k__B;p__F;c__C;o__O;f__F;g__G", "S1"), Some(15.0));
        assert!(genus.row_ids.iter().all(|id| id.split(';').count() == 6));
    }

    #[test]
    fn test_normalize_by_median_depth() {
        let table = AbundanceTable::new(
            vec!["a".into(), "b".into()],
            vec!["S1".into(), "S2".into(), "S3".into(), "S4".into()],
            vec![vec![10.0, 5.0, 30.0, 0.0], vec![10.0, 5.0, 10.0, 0.0]],
        );
        // totals 20, 10, 40, 0 -> median 15
        let normalized = normalize_by_median_depth(&table);
        let totals = normalized.col_sums();
        assert_relative_eq!(totals[0], 15.0);
        assert_relative_eq!(totals[1], 15.0);
        assert_relative_eq!(totals[2], 15.0);
        assert_relative_eq!(totals[3], 0.0);
        assert_relative_eq!(normalized.values[0][2], 11.25);
    }

    #[test]
    fn test_output_prefix() {
        let species = TaxonomicRank::new(7).unwrap();
        assert_eq!(output_prefix("/data/taxatable.txt", species), "taxatable.species");
        assert_eq!(output_prefix("run1.species.txt", species), "run1.species");
        assert_eq!(output_prefix("run1.txt.gz", TaxonomicRank::STRAIN), "run1.txt.strain");
    }
}
