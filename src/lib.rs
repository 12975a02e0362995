// src/lib.rs
pub mod collapse;
pub mod error;
pub mod funcdb;
pub mod predict;
pub mod summarize;
pub mod taxatable;
pub mod types;

use std::borrow::Cow;
use std::path::Path;

use crate::collapse::summarize_at_level;
use crate::error::Result;
use crate::funcdb::{FunctionDb, ReferenceMatrix};
use crate::predict::create_kegg_table;
use crate::summarize::{summarize_kegg_table, GroupSummary};
use crate::taxatable::{load_taxatable, output_prefix};
use crate::types::{AbundanceTable, TaxonomicRank, ValueFormat};

pub use crate::error::FunctionError;
pub use crate::funcdb::FunctionDbStatus;

pub const OTU_ID_HEADER: &str = "#OTU ID";
pub const KEGG_ID_HEADER: &str = "#KEGG ID";
pub const MODULE_ID_HEADER: &str = "#MODULE ID";
pub const PATHWAY_ID_HEADER: &str = "#PATHWAY ID";

/// Everything predicted for one taxatable.
/// Text for each output file is generated on demand.
#[derive(Debug, Clone)]
pub struct FunctionResults {
    /// Stem shared by the output file names.
    pub prefix: String,
    pub rank: TaxonomicRank,

    /// Taxatable summarized at `rank` and normalized to median depth
    pub taxatable: AbundanceTable,

    /// KEGG id x sample predicted abundances
    pub kegg_table: AbundanceTable,
    pub modules: GroupSummary,
    pub pathways: GroupSummary,

    /// Fraction of taxatable rows found in the reference
    pub overlap: f64,
}

impl FunctionResults {
    pub fn get_normalized_taxatable_text(&self) -> String {
        self.taxatable.to_tsv_string(OTU_ID_HEADER, ValueFormat::Integer)
    }

    pub fn get_kegg_text(&self) -> String {
        self.kegg_table.to_tsv_string(KEGG_ID_HEADER, ValueFormat::Integer)
    }

    pub fn get_modules_text(&self) -> String {
        self.modules.abundance.to_tsv_string(MODULE_ID_HEADER, ValueFormat::Integer)
    }

    pub fn get_modules_coverage_text(&self) -> String {
        self.modules.coverage.to_tsv_string(MODULE_ID_HEADER, ValueFormat::Float)
    }

    pub fn get_pathways_text(&self) -> String {
        self.pathways.abundance.to_tsv_string(PATHWAY_ID_HEADER, ValueFormat::Integer)
    }

    pub fn get_pathways_coverage_text(&self) -> String {
        self.pathways.coverage.to_tsv_string(PATHWAY_ID_HEADER, ValueFormat::Float)
    }

    /// `(file name, contents)` for every prediction table.
    pub fn output_files(&self) -> Vec<(String, String)> {
        let p = &self.prefix;
        vec![
            (format!("{p}.kegg.txt"), self.get_kegg_text()),
            (format!("{p}.kegg.modules.txt"), self.get_modules_text()),
            (format!("{p}.kegg.modules.coverage.txt"), self.get_modules_coverage_text()),
            (format!("{p}.kegg.pathways.txt"), self.get_pathways_text()),
            (format!("{p}.kegg.pathways.coverage.txt"), self.get_pathways_coverage_text()),
        ]
    }
}

/// Reference at `rank`: the strain matrix itself at strain rank, a collapsed
/// copy otherwise.
pub fn reference_at_rank(reference: &ReferenceMatrix, rank: TaxonomicRank) -> Cow<'_, ReferenceMatrix> {
    log::debug!("Summarizing KEGG table at {} with median", rank);
    let reference = if rank.is_strain() {
        Cow::Borrowed(reference)
    } else {
        Cow::Owned(summarize_at_level(reference, rank))
    };
    log::debug!("Number of rows {}", reference.n_taxa());
    reference
}

/// Predicts KEGG, module and pathway profiles for one taxatable.
pub fn function_run<P: AsRef<Path>>(
    input: P,
    func_db: &FunctionDb,
    rank: TaxonomicRank,
) -> Result<FunctionResults> {
    let input = input.as_ref();

    // 1. Reference at the requested rank
    let reference = reference_at_rank(&func_db.reference, rank);

    // 2. Taxatable at the same rank, normalized to median depth
    let taxatable = load_taxatable(input, rank)?;

    // 3. Taxa -> KEGG ids
    log::info!("Starting functional prediction");
    let prediction = create_kegg_table(&taxatable, &reference);

    // 4. KEGG ids -> modules and pathways
    let modules = summarize_kegg_table(&prediction.table, &func_db.modules);
    let pathways = summarize_kegg_table(&prediction.table, &func_db.pathways);

    Ok(FunctionResults {
        prefix: output_prefix(input, rank),
        rank,
        taxatable,
        kegg_table: prediction.table,
        modules,
        pathways,
        overlap: prediction.overlap,
    })
}

/// Runs [`function_run`] and writes its tables into `output`.
///
/// `<prefix>.normalized.txt` is written too when `save_median_taxatable` is set.
pub fn function_run_and_save<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    func_db: &FunctionDb,
    output: Q,
    rank: TaxonomicRank,
    save_median_taxatable: bool,
) -> Result<FunctionResults> {
    let output = output.as_ref();
    let results = function_run(input, func_db, rank)?;

    if save_median_taxatable {
        let path = output.join(format!("{}.normalized.txt", results.prefix));
        std::fs::write(&path, results.get_normalized_taxatable_text())?;
    }
    for (name, text) in results.output_files() {
        std::fs::write(output.join(&name), text)?;
    }
    log::info!("Wrote functional predictions for {} to {}", results.prefix, output.display());

    Ok(results)
}
