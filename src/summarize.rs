//src/summarize.rs

use ahash::AHashMap;

use crate::funcdb::MembershipTable;
use crate::types::AbundanceTable;

/// Group abundance and coverage tables, both groups x samples.
#[derive(Debug, Clone, Default)]
pub struct GroupSummary {
    pub abundance: AbundanceTable,
    /// Fraction of each group's member functions seen in a sample.
    pub coverage: AbundanceTable,
}

/// Rolls a function table up into module or pathway tables.
///
/// The membership table is aligned to the function table's rows, with
/// functions missing on either side counting as zero. Then:
///   - abundance = membershipᵀ · functions
///   - coverage  = membershipᵀ · (functions > 0), divided by each group's
///     total membership
///
/// All-zero rows are removed from both tables.
pub fn summarize_kegg_table(kegg_table: &AbundanceTable, membership: &MembershipTable) -> GroupSummary {
    let n_groups = membership.n_groups();
    let n_samples = kegg_table.n_cols();

    let function_index: AHashMap<&str, usize> = membership
        .function_ids
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();

    let mut abundance = vec![vec![0.0f64; n_samples]; n_groups];
    let mut observed = vec![vec![0.0f64; n_samples]; n_groups];
    let mut matched = 0usize;

    for (kegg_id, row) in kegg_table.row_ids.iter().zip(&kegg_table.values) {
        let Some(&f) = function_index.get(kegg_id.as_str()) else {
            continue;
        };
        matched += 1;
        for (g, &weight) in membership.counts[f].iter().enumerate() {
            if weight == 0 {
                continue;
            }
            let weight = weight as f64;
            for (s, &value) in row.iter().enumerate() {
                abundance[g][s] += weight * value;
                if value > 0.0 {
                    observed[g][s] += weight;
                }
            }
        }
    }
    log::debug!(
        "{} of {} KEGG ids found in a {}-group membership table",
        matched,
        kegg_table.n_rows(),
        n_groups
    );

    let totals = membership.group_totals();
    let coverage: Vec<Vec<f64>> = observed
        .into_iter()
        .zip(&totals)
        .map(|(row, &total)| {
            row.into_iter()
                .map(|hits| if total > 0 { hits / total as f64 } else { 0.0 })
                .collect()
        })
        .collect();

    GroupSummary {
        abundance: AbundanceTable::new(membership.group_ids.clone(), kegg_table.col_ids.clone(), abundance)
            .without_zero_rows(),
        coverage: AbundanceTable::new(membership.group_ids.clone(), kegg_table.col_ids.clone(), coverage)
            .without_zero_rows(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn membership() -> MembershipTable {
        // M1 = {K1, K2, K3}, M2 = {K2, K2}, M3 = {K9}
        MembershipTable {
            function_ids: vec!["K1".into(), "K2".into(), "K3".into(), "K9".into()],
            group_ids: vec!["M1".into(), "M2".into(), "M3".into()],
            counts: vec![vec![1, 0, 0], vec![1, 2, 0], vec![1, 0, 0], vec![0, 0, 1]],
        }
    }

    fn kegg_table() -> AbundanceTable {
        AbundanceTable::new(
            vec!["K1".into(), "K2".into(), "K4".into()],
            vec!["S1".into(), "S2".into()],
            vec![vec![10.0, 0.0], vec![5.0, 3.0], vec![100.0, 100.0]],
        )
    }

    #[test]
    fn test_abundance_and_coverage() {
        let summary = summarize_kegg_table(&kegg_table(), &membership());

        // M3 has nothing observed and is dropped.
        assert_eq!(summary.abundance.row_ids, vec!["M1", "M2"]);
        assert_eq!(summary.abundance.get_by_id("M1", "S1"), Some(15.0));
        assert_eq!(summary.abundance.get_by_id("M1", "S2"), Some(3.0));
        assert_eq!(summary.abundance.get_by_id("M2", "S1"), Some(10.0));
        assert_eq!(summary.abundance.get_by_id("M2", "S2"), Some(6.0));

        assert_eq!(summary.coverage.row_ids, vec!["M1", "M2"]);
        assert_relative_eq!(summary.coverage.get_by_id("M1", "S1").unwrap(), 2.0 / 3.0);
        assert_relative_eq!(summary.coverage.get_by_id("M1", "S2").unwrap(), 1.0 / 3.0);
        assert_relative_eq!(summary.coverage.get_by_id("M2", "S2").unwrap(), 1.0);
    }

    #[test]
    fn test_coverage_is_a_fraction() {
        let summary = summarize_kegg_table(&kegg_table(), &membership());
        for &v in summary.coverage.values.iter().flatten() {
            assert!((0.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_disjoint_functions_drop_everything() {
        let table = AbundanceTable::new(
            vec!["K7".into(), "K8".into()],
            vec!["S1".into()],
            vec![vec![4.0], vec![2.0]],
        );
        let summary = summarize_kegg_table(&table, &membership());
        assert!(summary.abundance.is_empty());
        assert!(summary.coverage.is_empty());
        assert_eq!(summary.abundance.col_ids, vec!["S1"]);
    }
}
