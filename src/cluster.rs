//! Grouping of feedback by embedding similarity and naming of the groups.

use std::collections::BTreeMap;

use anyhow::Result;
use rand::Rng;
use tracing::debug;

use crate::llm::{Embedder, Message, TextGenerator};

pub const THEME_PROMPT: &str = "Summarise the common theme in these snippets:\n";
const SNIPPET_SEPARATOR: &str = "\n---\n";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("embedding service returned {got} vectors for {expected} texts")]
    EmbeddingCount { expected: usize, got: usize },
    #[error("embedding {index} has {got} dimensions, expected {expected}")]
    Dimension {
        index: usize,
        expected: usize,
        got: usize,
    },
    #[error("cannot form clusters with k = 0")]
    NoClusters,
}

/// Lloyd's k-means with k-means++ seeding.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub k: usize,
    /// Independent initialisations; `None` runs a single k-means++ seeding.
    pub runs: Option<usize>,
    pub max_iter: usize,
    pub tol: f64,
}

impl KMeans {
    pub fn new(k: usize) -> Self {
        Self {
            k,
            runs: None,
            max_iter: 300,
            tol: 1e-4,
        }
    }

    /// Assigns every point a label in `[0, k)`; the best run by inertia wins.
    pub fn fit<R: Rng + ?Sized>(
        &self,
        points: &[Vec<f32>],
        rng: &mut R,
    ) -> Result<Vec<usize>, Error> {
        if self.k == 0 {
            return Err(Error::NoClusters);
        }
        let Some(first) = points.first() else {
            return Ok(Vec::new());
        };
        let dim = first.len();
        if let Some((index, p)) = points.iter().enumerate().find(|(_, p)| p.len() != dim) {
            return Err(Error::Dimension {
                index,
                expected: dim,
                got: p.len(),
            });
        }

        let data: Vec<Vec<f64>> = points
            .iter()
            .map(|p| p.iter().map(|&x| f64::from(x)).collect())
            .collect();
        let k = self.k.min(data.len());
        let tol = self.tol * mean_variance(&data);

        let mut best: Option<(f64, Vec<usize>)> = None;
        for _ in 0..self.runs.unwrap_or(1).max(1) {
            let (inertia, labels) = self.lloyd(&data, k, tol, rng);
            if best.as_ref().is_none_or(|(b, _)| inertia < *b) {
                best = Some((inertia, labels));
            }
        }
        Ok(best.map(|(_, labels)| labels).unwrap_or_default())
    }

    fn lloyd<R: Rng + ?Sized>(
        &self,
        data: &[Vec<f64>],
        k: usize,
        tol: f64,
        rng: &mut R,
    ) -> (f64, Vec<usize>) {
        let mut centers = seed_centers(data, k, rng);
        let (mut labels, mut inertia) = assign(data, &centers);

        for _ in 0..self.max_iter {
            let next = recompute(data, &labels, &centers);
            let shift: f64 = centers
                .iter()
                .zip(&next)
                .map(|(a, b)| squared_distance(a, b))
                .sum();
            centers = next;
            (labels, inertia) = assign(data, &centers);
            if shift <= tol {
                break;
            }
        }
        (inertia, labels)
    }
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum()
}

fn mean_variance(data: &[Vec<f64>]) -> f64 {
    let n = data.len() as f64;
    let dim = data[0].len();
    if dim == 0 {
        return 0.0;
    }
    let total: f64 = (0..dim)
        .map(|j| {
            let mean = data.iter().map(|p| p[j]).sum::<f64>() / n;
            data.iter().map(|p| (p[j] - mean).powi(2)).sum::<f64>() / n
        })
        .sum();
    total / dim as f64
}

/// k-means++: each further centre is drawn with probability proportional to
/// its squared distance from the nearest chosen centre.
fn seed_centers<R: Rng + ?Sized>(data: &[Vec<f64>], k: usize, rng: &mut R) -> Vec<Vec<f64>> {
    let mut centers = vec![data[rng.random_range(0..data.len())].clone()];
    let mut nearest: Vec<f64> = data
        .iter()
        .map(|p| squared_distance(p, &centers[0]))
        .collect();

    while centers.len() < k {
        let total: f64 = nearest.iter().sum();
        let index = if total > 0.0 {
            let mut target = rng.random::<f64>() * total;
            nearest
                .iter()
                .position(|&d| {
                    target -= d;
                    target < 0.0
                })
                .unwrap_or(data.len() - 1)
        } else {
            rng.random_range(0..data.len())
        };
        let center = data[index].clone();
        for (d, p) in nearest.iter_mut().zip(data) {
            *d = d.min(squared_distance(p, &center));
        }
        centers.push(center);
    }
    centers
}

/// Nearest centre per point (ties go to the lower index) and the inertia.
fn assign(data: &[Vec<f64>], centers: &[Vec<f64>]) -> (Vec<usize>, f64) {
    let mut inertia = 0.0;
    let labels = data
        .iter()
        .map(|p| {
            let (label, dist) = centers
                .iter()
                .map(|c| squared_distance(p, c))
                .enumerate()
                .fold((0, f64::INFINITY), |best, (i, d)| {
                    if d < best.1 {
                        (i, d)
                    } else {
                        best
                    }
                });
            inertia += dist;
            label
        })
        .collect();
    (labels, inertia)
}

/// Mean of the members of each cluster; an empty cluster keeps its centre.
fn recompute(data: &[Vec<f64>], labels: &[usize], centers: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let dim = data[0].len();
    let mut sums = vec![vec![0.0; dim]; centers.len()];
    let mut counts = vec![0usize; centers.len()];
    for (p, &label) in data.iter().zip(labels) {
        counts[label] += 1;
        for (s, x) in sums[label].iter_mut().zip(p) {
            *s += x;
        }
    }
    sums.into_iter()
        .zip(counts)
        .zip(centers)
        .map(|((sum, count), center)| {
            if count == 0 {
                center.clone()
            } else {
                sum.into_iter().map(|s| s / count as f64).collect()
            }
        })
        .collect()
}

/// Embeds all feedback in one call and partitions it with `kmeans`.
pub async fn cluster<R: Rng + ?Sized>(
    embedder: &dyn Embedder,
    feedback: &[String],
    kmeans: &KMeans,
    rng: &mut R,
) -> Result<Vec<usize>> {
    if feedback.is_empty() {
        return Ok(Vec::new());
    }
    let vectors = embedder.embed(feedback).await?;
    if vectors.len() != feedback.len() {
        return Err(Error::EmbeddingCount {
            expected: feedback.len(),
            got: vectors.len(),
        }
        .into());
    }
    let labels = kmeans.fit(&vectors, rng)?;
    debug!("Cluster sizes: {:?}", cluster_sizes(&labels));
    Ok(labels)
}

fn cluster_sizes(labels: &[usize]) -> BTreeMap<usize, usize> {
    let mut sizes = BTreeMap::new();
    for &label in labels {
        *sizes.entry(label).or_default() += 1;
    }
    sizes
}

/// Builds the theme prompt from the first `max_snippets` texts of a cluster.
pub fn theme_prompt<'a>(snippets: impl IntoIterator<Item = &'a str>, max_snippets: usize) -> String {
    let snippets: Vec<&str> = snippets.into_iter().take(max_snippets).collect();
    format!("{THEME_PROMPT}{}", snippets.join(SNIPPET_SEPARATOR))
}

/// Asks for a one-line theme per distinct label, visiting labels in
/// ascending order.
pub async fn label(
    generator: &dyn TextGenerator,
    feedback: &[String],
    labels: &[usize],
    max_snippets: usize,
) -> Result<BTreeMap<usize, String>> {
    let mut themes = BTreeMap::new();
    for &id in cluster_sizes(labels).keys() {
        let members = feedback
            .iter()
            .zip(labels)
            .filter(|(_, l)| **l == id)
            .map(|(text, _)| text.as_str());
        let prompt = theme_prompt(members, max_snippets);
        let theme = generator.generate(&[Message::user(prompt)]).await?;
        themes.insert(id, theme);
    }
    Ok(themes)
}
