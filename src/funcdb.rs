//src/funcdb.rs

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use serde::Deserialize;
use sprs::{CsMat, TriMat};

use crate::error::{FunctionError, Result};
use crate::types::GeneCount;

/// Label -> row/column index, assigned in order of first appearance.
pub type IndexMap = AHashMap<String, usize>;

/// Function ids in the membership files are cut to this many characters.
pub const FUNCTION_ID_WIDTH: usize = 7;

/// Category marker a pathway annotation row must carry to be counted.
pub const ENZYME_MARKER: &str = "Enzymes";

pub const MODULES_SUFFIX: &str = "module-annotations.txt";
pub const STRAIN2KO_SUFFIX: &str = "strain2ko.txt";
pub const PATHWAYS_SUFFIX: &str = "pathway-annotations.txt";

/// Taxon x function count matrix in CSR form.
///
/// `row_names` maps a lineage to its row, `kegg_ids` maps a KEGG ortholog
/// to its column.
#[derive(Debug, Clone)]
pub struct ReferenceMatrix {
    pub row_names: IndexMap,
    pub kegg_ids: IndexMap,
    pub csr: CsMat<GeneCount>,
}

impl ReferenceMatrix {
    pub fn n_taxa(&self) -> usize {
        self.csr.rows()
    }

    pub fn n_functions(&self) -> usize {
        self.csr.cols()
    }

    pub fn row_index(&self, taxon: &str) -> Option<usize> {
        self.row_names.get(taxon).copied()
    }

    /// Row labels ordered by row index.
    pub fn taxa_by_index(&self) -> Vec<&str> {
        sorted_by_index(&self.row_names)
    }

    /// Function ids ordered by column index.
    pub fn functions_by_index(&self) -> Vec<&str> {
        sorted_by_index(&self.kegg_ids)
    }

    /// Dense copy of one reference row.
    pub fn row_dense(&self, row: usize) -> Vec<GeneCount> {
        let mut dense = vec![0; self.n_functions()];
        if let Some(row_vec) = self.csr.outer_view(row) {
            for (col, &val) in row_vec.iter() {
                dense[col] = val;
            }
        }
        dense
    }

    /// Sum of all function counts annotated to one taxon.
    pub fn row_total(&self, row: usize) -> u64 {
        self.csr
            .outer_view(row)
            .map(|v| v.iter().map(|(_, &val)| val as u64).sum())
            .unwrap_or(0)
    }

    /// Count for `(taxon, function)`, 0 when either label is unknown.
    pub fn count(&self, taxon: &str, kegg_id: &str) -> GeneCount {
        match (self.row_names.get(taxon), self.kegg_ids.get(kegg_id)) {
            (Some(&row), Some(&col)) => self.csr.get(row, col).copied().unwrap_or(0),
            _ => 0,
        }
    }
}

fn sorted_by_index(map: &IndexMap) -> Vec<&str> {
    let mut labels: Vec<(&str, usize)> = map.iter().map(|(k, &v)| (k.as_str(), v)).collect();
    labels.sort_unstable_by_key(|&(_, idx)| idx);
    labels.into_iter().map(|(k, _)| k).collect()
}

fn register(map: &mut IndexMap, label: &str) -> usize {
    if let Some(&idx) = map.get(label) {
        return idx;
    }
    let idx = map.len();
    map.insert(label.to_string(), idx);
    idx
}

#[inline]
fn saturate(count: u64) -> GeneCount {
    GeneCount::try_from(count).unwrap_or(GeneCount::MAX)
}

/// Yields `(line_number, fields)` for every non-blank line of a tab-separated file.
fn for_each_row<F>(path: &Path, mut f: F) -> Result<()>
where
    F: FnMut(usize, &[&str]) -> Result<()>,
{
    let reader = BufReader::new(File::open(path)?);
    for (idx, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        f(idx + 1, &fields)?;
    }
    Ok(())
}

/// Parses a strain2ko file in the format:
/// ```text
/// <lineage>\t<KEGG id>\t<KEGG id>\t...
/// ```
/// Each distinct non-empty KEGG id on a row contributes one cell whose
/// value is the number of times it occurs on that row. A lineage seen on
/// several rows keeps a single matrix row and the counts add up.
pub fn parse_kegg_table<P: AsRef<Path>>(filepath: P) -> Result<ReferenceMatrix> {
    let path = filepath.as_ref();
    let mut row_names = IndexMap::new();
    let mut kegg_ids = IndexMap::new();
    let mut triplets: Vec<(usize, usize, GeneCount)> = Vec::new();

    for_each_row(path, |_, fields| {
        let row = register(&mut row_names, fields[0]);

        // Tally in order of first occurrence so columns are registered
        // in stream order.
        let mut tally: Vec<(&str, u64)> = Vec::new();
        let mut seen: AHashMap<&str, usize> = AHashMap::new();
        for &token in &fields[1..] {
            if token.is_empty() {
                continue;
            }
            match seen.get(token) {
                Some(&pos) => tally[pos].1 += 1,
                None => {
                    seen.insert(token, tally.len());
                    tally.push((token, 1));
                }
            }
        }

        for (token, n) in tally {
            let col = register(&mut kegg_ids, token);
            triplets.push((row, col, saturate(n)));
        }
        Ok(())
    })?;

    let mut tri_mat = TriMat::new((row_names.len(), kegg_ids.len()));
    for (row, col, val) in triplets {
        tri_mat.add_triplet(row, col, val);
    }
    let csr: CsMat<GeneCount> = tri_mat.to_csr();

    log::debug!(
        "Parsed {} taxa x {} KEGG ids ({} non-zero) from {}",
        csr.rows(),
        csr.cols(),
        csr.nnz(),
        path.display()
    );

    Ok(ReferenceMatrix {
        row_names,
        kegg_ids,
        csr,
    })
}

/// Dense function x group count table (modules or pathways).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipTable {
    pub function_ids: Vec<String>,
    pub group_ids: Vec<String>,
    /// `counts[function][group]`
    pub counts: Vec<Vec<GeneCount>>,
}

impl MembershipTable {
    pub fn n_functions(&self) -> usize {
        self.function_ids.len()
    }

    pub fn n_groups(&self) -> usize {
        self.group_ids.len()
    }

    /// Total membership per group (column sums).
    pub fn group_totals(&self) -> Vec<u64> {
        let mut totals = vec![0u64; self.n_groups()];
        for row in &self.counts {
            for (total, &c) in totals.iter_mut().zip(row) {
                *total += c as u64;
            }
        }
        totals
    }

    pub fn get(&self, function_id: &str, group_id: &str) -> GeneCount {
        let f = self.function_ids.iter().position(|k| k == function_id);
        let g = self.group_ids.iter().position(|k| k == group_id);
        match (f, g) {
            (Some(f), Some(g)) => self.counts[f][g],
            _ => 0,
        }
    }

    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut function_index = IndexMap::new();
        let mut group_index = IndexMap::new();
        let mut tally: AHashMap<(usize, usize), u64> = AHashMap::new();

        for (group, function) in &pairs {
            let g = register(&mut group_index, group);
            let f = register(&mut function_index, function);
            *tally.entry((f, g)).or_insert(0) += 1;
        }

        let mut counts = vec![vec![0; group_index.len()]; function_index.len()];
        for ((f, g), n) in tally {
            counts[f][g] = saturate(n);
        }

        Self {
            function_ids: sorted_by_index(&function_index).into_iter().map(String::from).collect(),
            group_ids: sorted_by_index(&group_index).into_iter().map(String::from).collect(),
            counts,
        }
    }
}

fn function_prefix(field: &str) -> String {
    field.chars().take(FUNCTION_ID_WIDTH).collect()
}

/// Streams a membership file, keeping `(group, function)` pairs picked by `select`.
fn parse_membership<P, F>(filepath: P, min_fields: usize, select: F) -> Result<MembershipTable>
where
    P: AsRef<Path>,
    F: Fn(&[&str]) -> Option<(String, String)>,
{
    let path = filepath.as_ref();
    let mut pairs = Vec::new();

    for_each_row(path, |line, fields| {
        if fields.len() < min_fields {
            return Err(FunctionError::Malformed {
                path: path.to_path_buf(),
                line,
                expected: min_fields,
                found: fields.len(),
            });
        }
        if let Some(pair) = select(fields) {
            pairs.push(pair);
        }
        Ok(())
    })?;

    let table = MembershipTable::from_pairs(pairs);
    log::debug!(
        "Parsed {} functions x {} groups from {}",
        table.n_functions(),
        table.n_groups(),
        path.display()
    );
    Ok(table)
}

/// Module annotations: field 0 is the module id, the last field holds
/// the KEGG id in its first seven characters.
pub fn parse_modules<P: AsRef<Path>>(filepath: P) -> Result<MembershipTable> {
    parse_membership(filepath, 2, |fields| {
        let module = fields[0].trim_end().to_string();
        let kegg = function_prefix(fields[fields.len() - 1]);
        Some((module, kegg))
    })
}

/// Pathway annotations: field 0 is the pathway id, field 1 the category
/// and field 4 the KEGG id. Only `Enzymes` rows with a KEGG id count.
pub fn parse_pathways<P: AsRef<Path>>(filepath: P) -> Result<MembershipTable> {
    parse_membership(filepath, 5, |fields| {
        if fields[1] == ENZYME_MARKER && !fields[4].is_empty() {
            Some((fields[0].trim_end().to_string(), function_prefix(fields[4])))
        } else {
            None
        }
    })
}

/// The part of a database's `metadata.yaml` this crate reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseMetadata {
    /// Path prefix of the function files, relative to the database directory.
    #[serde(default)]
    pub function: Option<String>,
}

impl DatabaseMetadata {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_yaml::from_reader(BufReader::new(file))?)
    }
}

/// The three reference files of a function database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDbFiles {
    pub modules: PathBuf,
    pub strain2ko: PathBuf,
    pub pathways: PathBuf,
}

impl FunctionDbFiles {
    /// `<database>/<prefix>-<suffix>` for each of the three files.
    pub fn from_prefix<P: AsRef<Path>>(database: P, prefix: &str) -> Self {
        let base = database.as_ref().join(prefix);
        let with_suffix = |suffix: &str| {
            let mut name = base.clone().into_os_string();
            name.push(format!("-{suffix}"));
            PathBuf::from(name)
        };
        Self {
            modules: with_suffix(MODULES_SUFFIX),
            strain2ko: with_suffix(STRAIN2KO_SUFFIX),
            pathways: with_suffix(PATHWAYS_SUFFIX),
        }
    }

    pub fn missing(&self) -> Vec<&Path> {
        [&self.modules, &self.strain2ko, &self.pathways]
            .into_iter()
            .filter(|p| !p.is_file())
            .map(PathBuf::as_path)
            .collect()
    }
}

/// Reference structures shared read-only by every per-file run.
#[derive(Debug, Clone)]
pub struct FunctionDb {
    pub reference: ReferenceMatrix,
    pub modules: MembershipTable,
    pub pathways: MembershipTable,
}

/// Outcome of looking for a function database.
#[derive(Debug)]
pub enum FunctionDbStatus {
    Available(FunctionDb),
    Unavailable(String),
}

impl FunctionDb {
    pub fn from_files(files: &FunctionDbFiles) -> Result<Self> {
        let modules = parse_modules(&files.modules)?;
        let pathways = parse_pathways(&files.pathways)?;
        let reference = parse_kegg_table(&files.strain2ko)?;
        Ok(Self {
            reference,
            modules,
            pathways,
        })
    }

    /// Looks up the function files named by `<database>/metadata.yaml`.
    ///
    /// Returns `Unavailable` if the metadata has no `function` entry or any
    /// of the three files is missing; nothing is parsed in that case.
    pub fn load<P: AsRef<Path>>(database: P) -> Result<FunctionDbStatus> {
        let database = database.as_ref();
        let metadata_path = database.join("metadata.yaml");
        if !metadata_path.is_file() {
            return Ok(unavailable(format!(
                "no metadata.yaml in {}",
                database.display()
            )));
        }

        let metadata = DatabaseMetadata::from_path(&metadata_path)?;
        let Some(prefix) = metadata.function else {
            return Ok(unavailable(format!(
                "{} has no function entry",
                metadata_path.display()
            )));
        };

        let files = FunctionDbFiles::from_prefix(database, &prefix);
        let missing = files.missing();
        if !missing.is_empty() {
            let names: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
            return Ok(unavailable(format!("missing {}", names.join(", "))));
        }

        log::info!("Loading function database from {}", database.display());
        Ok(FunctionDbStatus::Available(Self::from_files(&files)?))
    }
}

fn unavailable(reason: String) -> FunctionDbStatus {
    log::warn!("No function database available: {reason}");
    FunctionDbStatus::Unavailable(reason)
}
