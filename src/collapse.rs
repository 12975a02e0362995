//src/collapse.rs

use std::collections::BTreeMap;

use ahash::AHashMap;
use sprs::{CsMat, TriMat};

use crate::funcdb::{IndexMap, ReferenceMatrix};
use crate::types::{median, truncate_lineage, GeneCount, TaxonomicRank};

/// A function is kept for a group only when it is present in strictly
/// more than this fraction of the group's members.
pub const PRESENCE_THRESHOLD: f64 = 0.8;

/// Collapses a strain-level reference to `rank`.
///
/// Strains are grouped by the first `rank` fields of their lineage. For each
/// group, a KEGG id survives if its presence fraction exceeds
/// [`PRESENCE_THRESHOLD`], and its collapsed count is the median over all
/// members (absent members count as 0), truncated toward zero. Groups with
/// no surviving KEGG id are dropped. Rows are numbered in the order groups
/// are first met when walking strains by row index.
///
/// The KEGG id columns are unchanged.
pub fn summarize_at_level(reference: &ReferenceMatrix, rank: TaxonomicRank) -> ReferenceMatrix {
    let level = rank.level();

    // group key -> member rows, in order of first appearance
    let mut groups: Vec<(String, Vec<usize>)> = Vec::new();
    let mut group_pos: AHashMap<String, usize> = AHashMap::new();
    for (row, name) in reference.taxa_by_index().into_iter().enumerate() {
        let key = truncate_lineage(name, level);
        match group_pos.get(&key) {
            Some(&pos) => groups[pos].1.push(row),
            None => {
                group_pos.insert(key.clone(), groups.len());
                groups.push((key, vec![row]));
            }
        }
    }

    let mut row_names = IndexMap::new();
    let mut triplets: Vec<(usize, usize, GeneCount)> = Vec::new();

    for (key, members) in &groups {
        let kept = collapse_group(&reference.csr, members);
        if kept.is_empty() {
            continue;
        }
        let new_row = row_names.len();
        row_names.insert(key.clone(), new_row);
        triplets.extend(kept.into_iter().map(|(col, val)| (new_row, col, val)));
    }

    let mut tri_mat = TriMat::new((row_names.len(), reference.n_functions()));
    for (row, col, val) in triplets {
        tri_mat.add_triplet(row, col, val);
    }
    let csr: CsMat<GeneCount> = tri_mat.to_csr();

    log::debug!(
        "Collapsed {} strains into {} {} rows ({} groups dropped)",
        reference.n_taxa(),
        csr.rows(),
        rank,
        groups.len() - csr.rows()
    );

    ReferenceMatrix {
        row_names,
        kegg_ids: reference.kegg_ids.clone(),
        csr,
    }
}

/// Returns the `(column, median)` pairs that pass the presence threshold for
/// the rows in `members`.
fn collapse_group(csr: &CsMat<GeneCount>, members: &[usize]) -> Vec<(usize, GeneCount)> {
    let n_members = members.len();

    // column -> non-zero counts across the group
    let mut present: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for &row in members {
        if let Some(row_vec) = csr.outer_view(row) {
            for (col, &val) in row_vec.iter() {
                if val > 0 {
                    present.entry(col).or_default().push(val as f64);
                }
            }
        }
    }

    present
        .into_iter()
        .filter(|(_, values)| values.len() as f64 / n_members as f64 > PRESENCE_THRESHOLD)
        .filter_map(|(col, mut values)| {
            values.resize(n_members, 0.0);
            let m = median(&mut values) as GeneCount;
            (m > 0).then_some((col, m))
        })
        .collect()
}
