//src/predict.rs

use crate::funcdb::ReferenceMatrix;
use crate::types::AbundanceTable;

/// Below this fraction of matched taxa the prediction is flagged as unreliable.
pub const MIN_OVERLAP: f64 = 0.5;

/// A function x sample table plus how much of the taxatable it was built from.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub table: AbundanceTable,
    /// Taxatable rows with a reference row.
    pub taxa_found: usize,
    /// `taxa_found / taxatable rows`, 0 for an empty taxatable.
    pub overlap: f64,
}

/// Fraction of `matched` out of `total`, in [0, 1].
#[inline]
pub fn overlap_fraction(matched: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        matched as f64 / total as f64
    }
}

/// Propagates taxon abundances through the reference.
///
/// Every taxatable row with a reference row adds the outer product of its
/// per-sample abundances and its KEGG counts to a samples x functions
/// accumulator; unmatched rows add nothing. The result is transposed to
/// functions x samples, KEGG ids in column-index order, with all-zero
/// rows removed.
pub fn create_kegg_table(taxatable: &AbundanceTable, reference: &ReferenceMatrix) -> Prediction {
    let n_samples = taxatable.n_cols();
    let n_kegg = reference.n_functions();
    log::debug!("KEGG table shape ({}, {})", reference.n_taxa(), n_kegg);
    log::debug!("Taxatable shape ({}, {})", taxatable.n_rows(), n_samples);

    let mut kegg_table = vec![vec![0.0f64; n_kegg]; n_samples];
    let mut taxa_found = 0usize;

    for (name, abundances) in taxatable.row_ids.iter().zip(&taxatable.values) {
        let Some(idx) = reference.row_index(name) else {
            continue;
        };
        taxa_found += 1;
        let Some(row_vec) = reference.csr.outer_view(idx) else {
            continue;
        };
        for (sample, &abundance) in abundances.iter().enumerate() {
            if abundance == 0.0 {
                continue;
            }
            let acc = &mut kegg_table[sample];
            for (col, &count) in row_vec.iter() {
                acc[col] += abundance * count as f64;
            }
        }
    }

    let overlap = overlap_fraction(taxa_found, taxatable.n_rows());
    if overlap < MIN_OVERLAP {
        log::warn!("Overlap of taxa and function {:.2}", overlap);
    } else {
        log::info!("Overlap of taxa and function {:.2}", overlap);
    }
    log::debug!("Row names found in taxatable {}", taxa_found);

    let row_ids: Vec<String> = reference
        .functions_by_index()
        .into_iter()
        .map(String::from)
        .collect();
    let values: Vec<Vec<f64>> = (0..n_kegg)
        .map(|col| kegg_table.iter().map(|sample| sample[col]).collect())
        .collect();

    let table = AbundanceTable::new(row_ids, taxatable.col_ids.clone(), values).without_zero_rows();
    Prediction {
        table,
        taxa_found,
        overlap,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::funcdb::IndexMap;
    use approx::assert_relative_eq;
    use sprs::TriMat;

    fn reference() -> ReferenceMatrix {
        // t1: K1=2, K2=1   t2: K2=3   t3: K3=4
        let mut row_names = IndexMap::new();
        for (i, name) in ["a;t1", "a;t2", "a;t3"].iter().enumerate() {
            row_names.insert(name.to_string(), i);
        }
        let mut kegg_ids = IndexMap::new();
        for (i, name) in ["K1", "K2", "K3"].iter().enumerate() {
            kegg_ids.insert(name.to_string(), i);
        }
        let mut tri_mat = TriMat::new((3, 3));
        tri_mat.add_triplet(0, 0, 2);
        tri_mat.add_triplet(0, 1, 1);
        tri_mat.add_triplet(1, 1, 3);
        tri_mat.add_triplet(2, 2, 4);
        ReferenceMatrix {
            row_names,
            kegg_ids,
            csr: tri_mat.to_csr(),
        }
    }

    fn taxatable(rows: &[(&str, [f64; 2])]) -> AbundanceTable {
        AbundanceTable::new(
            rows.iter().map(|(n, _)| n.to_string()).collect(),
            vec!["S1".into(), "S2".into()],
            rows.iter().map(|(_, v)| v.to_vec()).collect(),
        )
    }

    #[test]
    fn test_weighted_sum_of_gene_counts() {
        let refm = reference();
        let taxa = taxatable(&[("a;t1", [10.0, 1.0]), ("a;t2", [0.0, 2.0]), ("a;missing", [50.0, 50.0])]);
        let prediction = create_kegg_table(&taxa, &refm);

        assert_eq!(prediction.taxa_found, 2);
        assert_relative_eq!(prediction.overlap, 2.0 / 3.0);

        let table = &prediction.table;
        // K3 never observed -> dropped
        assert_eq!(table.row_ids, vec!["K1", "K2"]);
        assert_eq!(table.col_ids, vec!["S1", "S2"]);
        assert_eq!(table.get_by_id("K1", "S1"), Some(20.0));
        assert_eq!(table.get_by_id("K1", "S2"), Some(2.0));
        assert_eq!(table.get_by_id("K2", "S1"), Some(10.0));
        assert_eq!(table.get_by_id("K2", "S2"), Some(7.0));

        // Per sample: sum over matched taxa of abundance x total gene count.
        for (sample, expected) in [(0, 10.0 * 3.0), (1, 1.0 * 3.0 + 2.0 * 3.0)] {
            assert_relative_eq!(table.col_sums()[sample], expected);
        }
    }

    #[test]
    fn test_row_order_does_not_change_totals() {
        let refm = reference();
        let forward = create_kegg_table(
            &taxatable(&[("a;t1", [0.5, 1.5]), ("a;t2", [2.25, 0.0]), ("a;t3", [1.0, 3.0])]),
            &refm,
        );
        let backward = create_kegg_table(
            &taxatable(&[("a;t3", [1.0, 3.0]), ("a;t2", [2.25, 0.0]), ("a;t1", [0.5, 1.5])]),
            &refm,
        );
        assert_eq!(forward.table.row_ids, backward.table.row_ids);
        for (a, b) in forward.table.values.iter().flatten().zip(backward.table.values.iter().flatten()) {
            assert_relative_eq!(*a, *b);
        }
        assert_relative_eq!(forward.overlap, 1.0);
    }

    #[test]
    fn test_no_overlap_yields_empty_table() {
        let prediction = create_kegg_table(&taxatable(&[("b;x", [1.0, 1.0])]), &reference());
        assert!(prediction.table.is_empty());
        assert_eq!(prediction.overlap, 0.0);

        let empty = create_kegg_table(&taxatable(&[]), &reference());
        assert_eq!(empty.overlap, 0.0);
    }
}
