//! DBSCAN clustering of gene profiles with a shared-nearest-neighbour
//! secondary distance (Ertöz, Steinbach & Kumar).

use std::collections::BTreeSet;

use rayon::prelude::*;
use serde::Serialize;

/// A cluster of genes with its overlap-variance score.
#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct Cluster {
    pub genes: Vec<String>,
    pub variance: f64,
}

/// Symmetric pairwise distances, stored as the upper triangle.
struct DistanceMap {
    rows: Vec<Vec<f32>>,
}

impl DistanceMap {
    fn build(dim: usize, distance: impl Fn(usize, usize) -> f32 + Sync) -> Self {
        let rows = (0..dim)
            .into_par_iter()
            .map(|x| ((x + 1)..dim).map(|y| distance(x, y)).collect())
            .collect();
        Self { rows }
    }

    fn get(&self, a: usize, b: usize) -> f32 {
        if a == b {
            return 0.0;
        }
        let (a, b) = if a < b { (a, b) } else { (b, a) };
        self.rows[a][b - a - 1]
    }
}

/// Primary distance between two gene profiles: a screen-count scaled
/// combination of matching signed signals with penalties for missing and
/// opposing ones, flipped into a distance in `[0, 1]`.
fn primary_distance(a: &[f32], b: &[f32]) -> f32 {
    let screen_count = a.len();

    let mut na_significant = 0i32;
    let mut nb_significant = 0i32;
    let mut n_significant = 0i32;
    let mut n_missing = 0i32;
    let mut n_mismatch = 0i32;
    let mut n_match = 0i32;

    for i in 0..screen_count {
        let (ai, bi) = (a[i], b[i]);

        if ai != 0.0 {
            na_significant += 1;
        }
        if bi != 0.0 {
            nb_significant += 1;
        }
        if ai != 0.0 && bi != 0.0 {
            n_significant += 1;
        }

        if ai == 0.0 || bi == 0.0 {
            if ai != bi {
                n_missing += 1;
            }
            continue;
        }

        if (ai < 0.0) == (bi < 0.0) {
            n_match += 1;
        } else {
            n_mismatch += 1;
        }
    }

    let mut score = 0.0f32;
    if n_significant > 0 {
        let f1 = (2.0 * n_significant as f32) / (na_significant + nb_significant) as f32;
        let f2 = (0.2 * n_missing as f32) / n_significant as f32;

        let matched = (n_match as f32 - 0.75 * n_mismatch as f32).max(0.0);
        score = matched * (f1 - f2);
    }

    let distance = (screen_count as f32 - score).clamp(0.0, screen_count as f32);
    distance / screen_count as f32
}

/// The `nns` nearest neighbours of every gene, as ascending index lists.
fn nearest_neighbours(d: &DistanceMap, gene_count: usize, nns: usize) -> Vec<Vec<usize>> {
    (0..gene_count)
        .into_par_iter()
        .map(|i| {
            let mut candidates: Vec<(f32, usize)> = (0..gene_count)
                .filter(|&j| j != i)
                .map(|j| (d.get(i, j), j))
                .collect();
            candidates
                .sort_by(|a, b| a.partial_cmp(b).expect("NaN distance"));
            candidates.truncate(nns);

            let mut nn: Vec<usize> = candidates.into_iter().map(|(_, j)| j).collect();
            nn.sort_unstable();
            nn
        })
        .collect()
}

fn shared_fraction(a: &[usize], b: &[usize], nns: usize) -> f32 {
    let mut shared = 0usize;
    let (mut ai, mut bi) = (0, 0);
    while ai < a.len() && bi < b.len() {
        match a[ai].cmp(&b[bi]) {
            std::cmp::Ordering::Equal => {
                shared += 1;
                ai += 1;
                bi += 1;
            }
            std::cmp::Ordering::Less => ai += 1,
            std::cmp::Ordering::Greater => bi += 1,
        }
    }
    1.0 - shared as f32 / nns as f32
}

const UNDEFINED: usize = 0;
const NOISE: usize = usize::MAX;

/// Cluster gene profiles (`data` gene-major, `screen_count` wide).
pub(crate) fn find_clusters(
    data: &[f32],
    gene_names: &[String],
    screen_count: usize,
    min_pts: usize,
    eps: f32,
    nns: usize,
) -> Vec<Cluster> {
    let gene_count = gene_names.len();
    if gene_count == 0 || screen_count == 0 {
        return Vec::new();
    }

    let profile = |g: usize| &data[g * screen_count..(g + 1) * screen_count];
    let d = DistanceMap::build(gene_count, |x, y| primary_distance(profile(x), profile(y)));

    let nn = if nns > 0 {
        nearest_neighbours(&d, gene_count, nns)
    } else {
        Vec::new()
    };

    let sec_d = |a: usize, b: usize| -> f32 {
        if nns == 0 {
            d.get(a, b)
        } else {
            shared_fraction(&nn[a], &nn[b], nns)
        }
    };

    let range_query = |q: usize| -> BTreeSet<usize> {
        (0..gene_count)
            .filter(|&p| p != q && sec_d(p, q) <= eps && d.get(p, q) < 1.0)
            .collect()
    };

    // plain DBSCAN over the secondary distance
    let mut cluster_nr = 0usize;
    let mut label = vec![UNDEFINED; gene_count];

    for p in 0..gene_count {
        if label[p] != UNDEFINED {
            continue;
        }

        let neighbours = range_query(p);
        if neighbours.len() < min_pts {
            label[p] = NOISE;
            continue;
        }

        cluster_nr += 1;
        label[p] = cluster_nr;

        let mut seeds = neighbours;
        seeds.remove(&p);

        while let Some(&q) = seeds.iter().next() {
            seeds.remove(&q);

            if label[q] != UNDEFINED && label[q] != NOISE {
                continue;
            }
            label[q] = cluster_nr;

            let reachable = range_query(q);
            if reachable.len() >= min_pts {
                for r in reachable {
                    if label[r] != cluster_nr {
                        seeds.insert(r);
                    }
                }
            }
        }
    }

    // score each cluster by how poorly its members' screen coverage
    // overlaps
    let mut clusters: Vec<(Vec<usize>, f64)> = (1..=cluster_nr)
        .map(|c| {
            let members: Vec<usize> = (0..gene_count).filter(|&g| label[g] == c).collect();

            let mut overlap = vec![true; screen_count];
            for &g in &members {
                for (si, covered) in overlap.iter_mut().enumerate() {
                    if profile(g)[si] == 0.0 {
                        *covered = false;
                    }
                }
            }
            let overlap_count = overlap.iter().filter(|&&b| b).count();
            let variance = 1.0 - overlap_count as f64 / screen_count as f64;

            (members, variance)
        })
        .collect();

    clusters.sort_by(|a, b| a.1.partial_cmp(&b.1).expect("NaN variance"));

    clusters
        .into_iter()
        .filter(|(members, _)| !members.is_empty())
        .map(|(members, variance)| Cluster {
            genes: members.iter().map(|&g| gene_names[g].clone()).collect(),
            variance,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use float_cmp::approx_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("G{}", i)).collect()
    }

    #[test]
    fn identical_profiles_have_zero_distance() {
        let a = [1.0f32, -2.0, 0.5, 0.0];
        assert!(approx_eq!(f32, 0.0, primary_distance(&a, &a), epsilon = 1e-6));
    }

    #[test]
    fn opposite_profiles_are_distant() {
        let a = [1.0f32, 1.0, 1.0, 1.0];
        let b = [-1.0f32, -1.0, -1.0, -1.0];
        assert!(approx_eq!(f32, 1.0, primary_distance(&a, &b), epsilon = 1e-6));
    }

    #[test]
    fn missing_screens_penalize() {
        let a = [1.0f32, 1.0, 1.0, 1.0];
        let b = [1.0f32, 1.0, 0.0, 0.0];
        let d = primary_distance(&a, &b);
        assert!(d > 0.0 && d < 1.0, "d = {}", d);
    }

    #[test]
    fn two_blocks_form_two_clusters() {
        // two groups of four genes with identical in-group profiles
        let screen_count = 6;
        let mut data = Vec::new();
        for g in 0..8 {
            for s in 0..screen_count {
                let v = if g < 4 {
                    if s < 3 {
                        2.0
                    } else {
                        0.0
                    }
                } else if s >= 3 {
                    -2.0
                } else {
                    0.0
                };
                data.push(v as f32);
            }
        }

        let clusters = find_clusters(&data, &names(8), screen_count, 3, 0.3, 0);
        assert_eq!(2, clusters.len());
        for cluster in &clusters {
            assert_eq!(4, cluster.genes.len());
        }
        // half the screens covered in each cluster
        assert!(clusters
            .iter()
            .all(|c| approx_eq!(f64, 0.5, c.variance, epsilon = 1e-9)));
    }

    #[test]
    fn sparse_genes_are_noise() {
        let screen_count = 4;
        let mut data = vec![0.0f32; 5 * screen_count];
        // one gene with signal, the rest empty
        for s in 0..screen_count {
            data[s] = 1.0;
        }

        let clusters = find_clusters(&data, &names(5), screen_count, 3, 0.2, 0);
        assert!(clusters.is_empty());
    }

    #[test]
    fn snn_secondary_distance_still_finds_blocks() {
        let screen_count = 6;
        let mut data = Vec::new();
        for g in 0..10 {
            for s in 0..screen_count {
                let v = if g < 5 {
                    if s < 3 {
                        1.5
                    } else {
                        0.0
                    }
                } else if s >= 3 {
                    -1.5
                } else {
                    0.0
                };
                data.push(v as f32);
            }
        }

        let clusters = find_clusters(&data, &names(10), screen_count, 3, 0.5, 4);
        assert_eq!(2, clusters.len());
        for cluster in &clusters {
            assert_eq!(5, cluster.genes.len());
        }
    }
}
