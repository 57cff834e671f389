//! Union-find merging of near-duplicate concepts by cosine similarity.

use crate::concepts::Concept;
use crate::embeddings::Embedding;
use ndarray::{Array2, ArrayView1};

/// Cosine similarity above which two concepts collapse into one group.
pub const MERGE_THRESHOLD: f32 = 0.70;

/// Centroid similarity above which two groups are reported as connected.
pub const LINK_THRESHOLD: f32 = 0.4;

/// Cosine similarity of two vectors; zero vectors score 0.
pub fn cosine_similarity(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    a.dot(&b) / (norm_a * norm_b)
}

/// Disjoint-set forest with path compression. Unions attach the larger
/// root index under the smaller, so component discovery order follows
/// the original concept order.
pub struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    /// Builds `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self { parent: (0..n).collect() }
    }

    /// Representative of `x`'s set.
    pub fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    /// Merges the sets holding `a` and `b`.
    pub fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (small, large) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[large] = small;
    }
}

/// A merged group of near-duplicate concepts.
#[derive(Debug, Clone)]
pub struct MergedGroup {
    /// Member names, largest importance first.
    pub names: Vec<String>,
    /// Largest member importance, used for downstream scoring.
    pub max_importance: f32,
    /// Arithmetic mean of member embeddings, not renormalized.
    pub centroid: Embedding,
}

/// Merges concepts whose pairwise cosine similarity exceeds `threshold`.
///
/// Components are emitted in order of their smallest concept index;
/// within a group, members are ordered by descending importance with
/// the original index breaking ties.
pub fn merge_concepts(
    concepts: &[Concept],
    embeddings: &[Embedding],
    threshold: f32,
) -> Vec<MergedGroup> {
    assert_eq!(concepts.len(), embeddings.len(), "one embedding per concept");
    let n = concepts.len();
    if n == 0 {
        return Vec::new();
    }

    let mut uf = UnionFind::new(n);
    for i in 0..n {
        for j in (i + 1)..n {
            if cosine_similarity(embeddings[i].view(), embeddings[j].view()) > threshold {
                uf.union(i, j);
            }
        }
    }

    // Collect components in first-seen order.
    let mut component_of_root: Vec<Option<usize>> = vec![None; n];
    let mut components: Vec<Vec<usize>> = Vec::new();
    for i in 0..n {
        let root = uf.find(i);
        match component_of_root[root] {
            Some(c) => components[c].push(i),
            None => {
                component_of_root[root] = Some(components.len());
                components.push(vec![i]);
            }
        }
    }

    components
        .into_iter()
        .map(|mut members| {
            members.sort_by(|&a, &b| {
                concepts[b]
                    .importance
                    .partial_cmp(&concepts[a].importance)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.cmp(&b))
            });

            let dim = embeddings[members[0]].len();
            let mut centroid = Embedding::zeros(dim);
            for &idx in &members {
                centroid += &embeddings[idx];
            }
            centroid /= members.len() as f32;

            MergedGroup {
                names: members.iter().map(|&i| concepts[i].name.clone()).collect(),
                max_importance: concepts[members[0]].importance,
                centroid,
            }
        })
        .collect()
}

/// Full cosine similarity matrix over group centroids, diagonal 1.0.
/// This matrix is deliberately unthresholded: it drives both layout
/// attraction and the connection lists.
pub fn group_similarity(groups: &[MergedGroup]) -> Array2<f32> {
    let g = groups.len();
    let mut matrix = Array2::zeros((g, g));
    for a in 0..g {
        matrix[[a, a]] = 1.0;
        for b in (a + 1)..g {
            let sim = cosine_similarity(groups[a].centroid.view(), groups[b].centroid.view());
            matrix[[a, b]] = sim;
            matrix[[b, a]] = sim;
        }
    }
    matrix
}

/// Indices of groups connected to `a`: strictly ascending, no self.
pub fn connections(matrix: &Array2<f32>, a: usize, link_threshold: f32) -> Vec<usize> {
    (0..matrix.nrows())
        .filter(|&b| b != a && matrix[[a, b]] > link_threshold)
        .collect()
}
