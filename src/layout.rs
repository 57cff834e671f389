//! Geometric layout: PCA projection to 3D refined by a force simulation.
//!
//! Both stages are deterministic. PCA runs a Gram-matrix power iteration
//! with a fixed start vector and sign-fixed components; the force loop
//! uses no randomness at all.

use crate::embeddings::Embedding;
use ndarray::{Array1, Array2, Axis};

/// Attraction gain between connected groups.
const K_ATTRACT: f64 = 2.0;
/// Repulsion gain between every pair.
const K_REPEL: f64 = 10.0;
/// Pull toward the origin.
const K_GRAVITY: f64 = 0.1;
/// Squared-distance floor for repulsion.
const EPS: f64 = 0.01;
/// Velocity damping per step.
const DAMPING: f64 = 0.9;
/// Per-step speed clamp.
const MAX_SPEED: f64 = 2.0;
/// Fixed integration timestep.
const DT: f64 = 1.0;
/// Iteration cap for the force loop.
const MAX_ITERATIONS: usize = 150;
/// Early-stop threshold on the max per-node displacement.
const CONVERGENCE_EPS: f64 = 1e-3;
/// Consecutive calm iterations required to stop early.
const CONVERGENCE_RUNS: usize = 3;
/// Largest absolute coordinate after rescaling.
const TARGET_EXTENT: f64 = 10.0;

/// Power-iteration budget per principal component.
const POWER_ITERATIONS: usize = 300;

/// Projects centroids to 3D along their top three principal components.
///
/// Components are sign-fixed: the largest-magnitude coordinate of each
/// principal direction is made positive, so the projection is unique.
/// Degenerate directions (fewer effective dimensions than three) come
/// out as zero columns.
pub fn pca_project(embeddings: &[Embedding]) -> Vec<[f32; 3]> {
    let g = embeddings.len();
    if g == 0 {
        return Vec::new();
    }
    let d = embeddings[0].len();

    let mut x = Array2::<f64>::zeros((g, d));
    for (i, embedding) in embeddings.iter().enumerate() {
        for (j, &v) in embedding.iter().enumerate() {
            x[[i, j]] = v as f64;
        }
    }
    if let Some(mean) = x.mean_axis(Axis(0)) {
        for mut row in x.rows_mut() {
            row -= &mean;
        }
    }

    // Work on the G×G Gram matrix: for G groups in a D-dimensional
    // embedding space with G ≪ D, its eigenvectors give the projections
    // directly (scores = sqrt(λ)·u).
    let gram = x.dot(&x.t());

    let mut scores = vec![[0.0f32; 3]; g];
    let mut found: Vec<Array1<f64>> = Vec::new();
    for comp in 0..3.min(g) {
        let Some((u, lambda)) = dominant_eigenvector(&gram, &found) else {
            break;
        };
        if lambda > 1e-9 {
            let direction = x.t().dot(&u);
            let sign = sign_for(&direction);
            let scale = lambda.sqrt();
            for (i, score) in scores.iter_mut().enumerate() {
                score[comp] = (sign * scale * u[i]) as f32;
            }
        }
        found.push(u);
    }
    scores
}

/// Largest eigenpair of `gram` orthogonal to the already-found vectors.
fn dominant_eigenvector(
    gram: &Array2<f64>,
    found: &[Array1<f64>],
) -> Option<(Array1<f64>, f64)> {
    let n = gram.nrows();

    // Fixed start vector; harmonically decaying entries avoid being
    // orthogonal to real data directions.
    let mut u = Array1::from_iter((0..n).map(|i| 1.0 / (i as f64 + 1.0)));
    orthogonalize(&mut u, found);
    let norm = u.dot(&u).sqrt();
    if norm < 1e-12 {
        return None;
    }
    u /= norm;

    let mut lambda = 0.0;
    for _ in 0..POWER_ITERATIONS {
        let mut next = gram.dot(&u);
        orthogonalize(&mut next, found);
        let norm = next.dot(&next).sqrt();
        if norm < 1e-12 {
            return Some((u, 0.0));
        }
        next /= norm;

        let new_lambda = next.dot(&gram.dot(&next));
        let aligned = next.dot(&u).abs() > 1.0 - 1e-12;
        u = next;
        if aligned && (new_lambda - lambda).abs() < 1e-12 {
            return Some((u, new_lambda));
        }
        lambda = new_lambda;
    }
    Some((u, lambda))
}

/// Removes the projections of `u` onto each of `found`.
fn orthogonalize(u: &mut Array1<f64>, found: &[Array1<f64>]) {
    for prev in found {
        let proj = u.dot(prev);
        *u -= &(prev * proj);
    }
}

/// Sign that makes the largest-magnitude coordinate of `v` positive.
fn sign_for(v: &Array1<f64>) -> f64 {
    let mut best = 0usize;
    for (i, value) in v.iter().enumerate() {
        if value.abs() > v[best].abs() {
            best = i;
        }
    }
    if v[best] < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Refines initial positions with attraction along the similarity
/// matrix, universal repulsion, and center gravity, then rescales the
/// result to a fixed extent.
pub fn force_layout(initial: &[[f32; 3]], similarity: &Array2<f32>) -> Vec<[f32; 3]> {
    let g = initial.len();
    let mut positions: Vec<[f64; 3]> = initial
        .iter()
        .map(|p| [p[0] as f64, p[1] as f64, p[2] as f64])
        .collect();
    let mut velocities = vec![[0.0f64; 3]; g];

    let mut calm = 0;
    for _ in 0..MAX_ITERATIONS {
        let mut forces = vec![[0.0f64; 3]; g];

        for i in 0..g {
            for j in 0..g {
                if i == j {
                    continue;
                }
                let delta = [
                    positions[j][0] - positions[i][0],
                    positions[j][1] - positions[i][1],
                    positions[j][2] - positions[i][2],
                ];
                let dist_sq = delta[0] * delta[0] + delta[1] * delta[1] + delta[2] * delta[2];
                let dist = dist_sq.sqrt();

                if dist > 1e-12 {
                    let attraction = K_ATTRACT * similarity[[i, j]] as f64 * dist;
                    let repulsion = K_REPEL / dist_sq.max(EPS);
                    let scale = (attraction - repulsion) / dist;
                    for k in 0..3 {
                        forces[i][k] += scale * delta[k];
                    }
                } else {
                    // Coincident nodes: push apart along a fixed axis so
                    // the tie breaks the same way every run.
                    let axis = (i + j) % 3;
                    let direction = if i < j { -1.0 } else { 1.0 };
                    forces[i][axis] += direction * K_REPEL / EPS;
                }
            }
            for k in 0..3 {
                forces[i][k] -= K_GRAVITY * positions[i][k];
            }
        }

        let mut max_step = 0.0f64;
        for i in 0..g {
            for k in 0..3 {
                velocities[i][k] = (velocities[i][k] + forces[i][k] * DT) * DAMPING;
            }
            let speed = (velocities[i][0] * velocities[i][0]
                + velocities[i][1] * velocities[i][1]
                + velocities[i][2] * velocities[i][2])
                .sqrt();
            if speed > MAX_SPEED {
                let scale = MAX_SPEED / speed;
                for k in 0..3 {
                    velocities[i][k] *= scale;
                }
            }
            let step = speed.min(MAX_SPEED) * DT;
            max_step = max_step.max(step);
            for k in 0..3 {
                positions[i][k] += velocities[i][k] * DT;
            }
        }

        if max_step < CONVERGENCE_EPS {
            calm += 1;
            if calm >= CONVERGENCE_RUNS {
                break;
            }
        } else {
            calm = 0;
        }
    }

    rescale(&mut positions);
    positions
        .into_iter()
        .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
        .collect()
}

/// Scales all positions so the largest absolute coordinate equals the
/// target extent, preserving aspect ratio. All-zero layouts stay put.
fn rescale(positions: &mut [[f64; 3]]) {
    let max_coord = positions
        .iter()
        .flat_map(|p| p.iter())
        .fold(0.0f64, |acc, &v| acc.max(v.abs()));
    if max_coord > 1e-9 {
        let scale = TARGET_EXTENT / max_coord;
        for p in positions.iter_mut() {
            for v in p.iter_mut() {
                *v *= scale;
            }
        }
    }
}

/// PCA initialization followed by force refinement.
pub fn layout_positions(centroids: &[Embedding], similarity: &Array2<f32>) -> Vec<[f32; 3]> {
    let initial = pca_project(centroids);
    force_layout(&initial, similarity)
}
