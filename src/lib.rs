//! Lloyd's k-means partitioning of n-dimensional vectors.
//!
//! The crate splits a dataset into `k` clusters by alternating nearest-center
//! assignment and center recomputation until assignments settle or the
//! iteration budget runs out. Clusters that lose every member are reseeded from
//! over-populated clusters, runs are reproducible given a seed, and an
//! [`Observer`] can watch the cluster state after every iteration. Dataset
//! loaders, a silhouette-based cluster count suggestion and a CLI entry-point
//! sit on top of the core.

use csv::ReaderBuilder;
use ndarray::{Array1, ArrayView1};
use ndarray_rand::rand_distr::{Distribution, Normal, Uniform};
use ndarray_rand::RandomExt;
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::{Field, Row};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::ops::{Index, IndexMut, RangeInclusive};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure reported by an [`Observer`]; surfaced unchanged by the partitioner.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error type used by operations in this crate.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("dataset must hold at least one vector with at least one dimension")]
    EmptyDataset,
    #[error("k must be greater than zero")]
    InvalidK,
    #[error("dataset has {n} vectors but k = {k}; add more data or decrease k")]
    InsufficientData { k: usize, n: usize },
    #[error("there is no mean for an empty set of vectors")]
    EmptyInput,
    #[error(transparent)]
    Observer(ObserverError),
    #[error("internal error: {0}")]
    Internal(String),
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error(transparent)]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Convenient alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, PartitionError>;

/// A point in `D`-dimensional real space.
///
/// Vectors are values: averaging produces a new vector and never touches its
/// inputs. All vectors taking part in one partitioning call must share the same
/// dimensionality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<f64>", into = "Vec<f64>")]
pub struct Vector(Array1<f64>);

impl Vector {
    /// Create a vector from its components.
    pub fn new(coords: Vec<f64>) -> Self {
        Self(Array1::from_vec(coords))
    }

    /// Vector of `dim` independent uniform values in `[0.0, 1.0)`.
    pub fn random<R: Rng + ?Sized>(dim: usize, rng: &mut R) -> Self {
        Self(Array1::random_using(dim, Uniform::new(0.0, 1.0), rng))
    }

    /// Number of components.
    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn view(&self) -> ArrayView1<'_, f64> {
        self.0.view()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> + '_ {
        self.0.iter()
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.0.to_vec()
    }

    /// Squared Euclidean distance to `other`.
    ///
    /// The square root is never taken: the value orders candidates correctly
    /// for nearest-center search but is not a metric magnitude.
    pub fn distance(&self, other: &Vector) -> f64 {
        debug_assert_eq!(self.dim(), other.dim(), "dimension mismatch");
        squared_distance(&self.view(), &other.view())
    }

    /// Component-wise arithmetic mean of a non-empty set of vectors.
    pub fn mean(vectors: &[Vector]) -> Result<Vector> {
        let first = vectors.first().ok_or(PartitionError::EmptyInput)?;
        let mut sum = Array1::<f64>::zeros(first.dim());
        for vector in vectors {
            debug_assert_eq!(vector.dim(), first.dim(), "dimension mismatch");
            for (acc, &value) in sum.iter_mut().zip(vector.0.iter()) {
                *acc += value;
            }
        }
        Ok(Self(sum / vectors.len() as f64))
    }
}

impl From<Vec<f64>> for Vector {
    fn from(coords: Vec<f64>) -> Self {
        Self::new(coords)
    }
}

impl From<Array1<f64>> for Vector {
    fn from(coords: Array1<f64>) -> Self {
        Self(coords)
    }
}

impl From<Vector> for Vec<f64> {
    fn from(vector: Vector) -> Self {
        vector.0.to_vec()
    }
}

impl FromIterator<f64> for Vector {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Index<usize> for Vector {
    type Output = f64;

    fn index(&self, idx: usize) -> &f64 {
        &self.0[idx]
    }
}

impl fmt::Display for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value:.4}")?;
        }
        write!(f, ")")
    }
}

/// A center and the vectors currently gravitating around it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub center: Vector,
    pub members: Vec<Vector>,
}

impl Cluster {
    /// Create a cluster without members.
    pub fn new(center: Vector) -> Self {
        Self {
            center,
            members: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Move the center to the mean of the members. Without members the center
    /// stays where it is.
    pub fn recenter(&mut self) {
        if let Ok(center) = Vector::mean(&self.members) {
            self.center = center;
        }
    }
}

/// Ordered, fixed-size collection of clusters. A cluster's index is its
/// identity for the lifetime of a partitioning call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterSet {
    clusters: Vec<Cluster>,
}

impl ClusterSet {
    /// `k` member-less clusters centered on uniform random points in `[0, 1)^dim`.
    pub fn random<R: Rng + ?Sized>(k: usize, dim: usize, rng: &mut R) -> Self {
        Self::from_centers((0..k).map(|_| Vector::random(dim, rng)))
    }

    pub fn from_centers<I: IntoIterator<Item = Vector>>(centers: I) -> Self {
        Self {
            clusters: centers.into_iter().map(Cluster::new).collect(),
        }
    }

    pub fn from_clusters(clusters: Vec<Cluster>) -> Self {
        Self { clusters }
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Cluster> {
        self.clusters.iter()
    }

    pub fn centers(&self) -> Vec<&Vector> {
        self.clusters.iter().map(|c| &c.center).collect()
    }

    /// Membership size of every cluster, in cluster order.
    pub fn sizes(&self) -> Vec<usize> {
        self.clusters.iter().map(Cluster::len).collect()
    }

    /// Index of the cluster whose center is closest to `point`.
    ///
    /// Ties go to the lowest index. Returns `None` only for an empty set.
    pub fn nearest(&self, point: &Vector) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, cluster) in self.clusters.iter().enumerate() {
            let distance = point.distance(&cluster.center);
            let closer = match best {
                None => true,
                Some((_, best_distance)) => distance < best_distance,
            };
            if closer {
                best = Some((idx, distance));
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Drop every membership, keeping the centers.
    pub fn reset(&mut self) {
        for cluster in &mut self.clusters {
            cluster.members.clear();
        }
    }

    /// Recenter every cluster on its current membership.
    pub fn recenter(&mut self) {
        for cluster in &mut self.clusters {
            cluster.recenter();
        }
    }

    pub fn into_clusters(self) -> Vec<Cluster> {
        self.clusters
    }
}

impl Index<usize> for ClusterSet {
    type Output = Cluster;

    fn index(&self, idx: usize) -> &Cluster {
        &self.clusters[idx]
    }
}

impl IndexMut<usize> for ClusterSet {
    fn index_mut(&mut self, idx: usize) -> &mut Cluster {
        &mut self.clusters[idx]
    }
}

impl<'a> IntoIterator for &'a ClusterSet {
    type Item = &'a Cluster;
    type IntoIter = std::slice::Iter<'a, Cluster>;

    fn into_iter(self) -> Self::IntoIter {
        self.clusters.iter()
    }
}

impl IntoIterator for ClusterSet {
    type Item = Cluster;
    type IntoIter = std::vec::IntoIter<Cluster>;

    fn into_iter(self) -> Self::IntoIter {
        self.clusters.into_iter()
    }
}

/// Hook invoked once per completed iteration with the iteration's final
/// cluster state.
///
/// Returning an error aborts the running partition call, which then returns
/// [`PartitionError::Observer`] carrying the error unchanged.
pub trait Observer {
    fn observe(
        &self,
        clusters: &ClusterSet,
        iteration: usize,
    ) -> std::result::Result<(), ObserverError>;
}

/// Observer that does nothing and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {
    fn observe(&self, _: &ClusterSet, _: usize) -> std::result::Result<(), ObserverError> {
        Ok(())
    }
}

impl<F> Observer for F
where
    F: Fn(&ClusterSet, usize) -> std::result::Result<(), ObserverError>,
{
    fn observe(
        &self,
        clusters: &ClusterSet,
        iteration: usize,
    ) -> std::result::Result<(), ObserverError> {
        self(clusters, iteration)
    }
}

/// Observer logging cluster sizes (debug) and centers (trace) per iteration.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn observe(
        &self,
        clusters: &ClusterSet,
        iteration: usize,
    ) -> std::result::Result<(), ObserverError> {
        tracing::debug!(iteration, sizes = ?clusters.sizes(), "cluster state");
        for (idx, cluster) in clusters.iter().enumerate() {
            tracing::trace!(
                iteration,
                cluster = idx,
                center = %cluster.center,
                members = cluster.len(),
                "cluster center"
            );
        }
        Ok(())
    }
}

/// Writes every iteration's cluster state to `<dir>/<k>_<iteration>.json`.
#[derive(Debug, Clone)]
pub struct SnapshotObserver {
    dir: PathBuf,
}

#[derive(Serialize)]
struct IterationSnapshot<'a> {
    iteration: usize,
    clusters: &'a ClusterSet,
}

impl SnapshotObserver {
    /// Create the observer, creating `dir` if needed.
    pub fn new<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Path the snapshot of `iteration` for a `k`-cluster run is written to.
    pub fn snapshot_path(&self, k: usize, iteration: usize) -> PathBuf {
        self.dir.join(format!("{k}_{iteration}.json"))
    }
}

impl Observer for SnapshotObserver {
    fn observe(
        &self,
        clusters: &ClusterSet,
        iteration: usize,
    ) -> std::result::Result<(), ObserverError> {
        let snapshot = IterationSnapshot {
            iteration,
            clusters,
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        std::fs::write(self.snapshot_path(clusters.len(), iteration), json)?;
        Ok(())
    }
}

/// How a partitioning call stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    /// Fewer vectors than the convergence fraction changed cluster.
    Converged,
    /// The iteration cap was reached first.
    Exhausted,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Converged => write!(f, "converged"),
            Termination::Exhausted => write!(f, "exhausted"),
        }
    }
}

/// Configurable knobs for a partitioning engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PartitionConfig {
    /// Stop once fewer than this fraction of the vectors changed cluster in an
    /// iteration. Must lie strictly between 0.0 and 1.0.
    pub convergence_fraction: f64,
    /// Index of the last iteration that may run; 0 allows a single iteration.
    pub max_iterations: usize,
    /// Seed for center initialisation and empty-cluster repair. Unset seeds
    /// every call from OS entropy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            convergence_fraction: 0.01,
            max_iterations: 96,
            seed: None,
        }
    }
}

impl PartitionConfig {
    pub fn with_convergence_fraction(mut self, fraction: f64) -> Self {
        self.convergence_fraction = fraction;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<()> {
        let fraction = self.convergence_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(PartitionError::InvalidConfiguration(format!(
                "convergence_fraction must be > 0.0 and < 1.0, got {fraction}"
            )));
        }
        Ok(())
    }

    /// Fresh random source for one call.
    fn rng(&self) -> ChaCha8Rng {
        match self.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        }
    }
}

/// Result of a single partitioning call.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionOutcome {
    /// Final clusters, none of them empty.
    pub clusters: ClusterSet,
    /// Final cluster index for each vector of the dataset.
    pub assignments: Vec<usize>,
    /// Number of completed iterations.
    pub iterations: usize,
    pub termination: Termination,
    /// Sum of squared distances from every vector to its assigned center.
    pub inertia: f64,
}

impl PartitionOutcome {
    pub fn converged(&self) -> bool {
        self.termination == Termination::Converged
    }
}

/// Cluster count picked by [`Partitioner::suggest_k`].
#[derive(Debug, Clone, Serialize)]
pub struct KSuggestion {
    /// Candidate with the highest mean silhouette.
    pub k: usize,
    pub score: f64,
    /// Seed of the winning run; `partition_with_rng` with a `ChaCha8Rng`
    /// seeded from it reproduces `outcome`.
    pub seed: u64,
    /// The scored partition of the winning candidate.
    pub outcome: PartitionOutcome,
    /// Score of every candidate, in ascending `k` order.
    pub scores: Vec<(usize, f64)>,
}

/// Lloyd's k-means engine.
///
/// The configuration is fixed at construction. Each call owns its clusters,
/// assignment table and random source, so one engine may serve concurrent
/// calls as long as its observer is `Sync`.
#[derive(Debug, Clone)]
pub struct Partitioner<O = NoopObserver> {
    config: PartitionConfig,
    observer: O,
}

impl Partitioner {
    /// Create an engine without an observer.
    pub fn new(config: PartitionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            observer: NoopObserver,
        })
    }
}

impl<O: Observer> Partitioner<O> {
    /// Replace the observer invoked after every iteration.
    pub fn with_observer<P: Observer>(self, observer: P) -> Partitioner<P> {
        Partitioner {
            config: self.config,
            observer,
        }
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Partition `dataset` into `k` clusters.
    pub fn partition(&self, dataset: &[Vector], k: usize) -> Result<ClusterSet> {
        self.partition_detailed(dataset, k).map(|outcome| outcome.clusters)
    }

    /// Partition `dataset` into `k` clusters, returning diagnostics about the run.
    pub fn partition_detailed(&self, dataset: &[Vector], k: usize) -> Result<PartitionOutcome> {
        let mut rng = self.config.rng();
        self.partition_with_rng(dataset, k, &mut rng)
    }

    /// Partition using a caller-owned random source instead of the configured seed.
    pub fn partition_with_rng<R: Rng + ?Sized>(
        &self,
        dataset: &[Vector],
        k: usize,
        rng: &mut R,
    ) -> Result<PartitionOutcome> {
        let dim = validate_dataset(dataset, k)?;
        let n = dataset.len();
        let threshold = self.config.convergence_fraction * n as f64;

        let mut clusters = ClusterSet::random(k, dim, rng);
        let mut assignments: Vec<Option<usize>> = vec![None; n];
        let mut iteration = 0usize;

        let termination = loop {
            clusters.reset();

            let mut changes = 0usize;
            for (idx, vector) in dataset.iter().enumerate() {
                let cid = clusters.nearest(vector).ok_or_else(|| {
                    PartitionError::Internal("nearest-cluster search on an empty set".into())
                })?;
                clusters[cid].members.push(vector.clone());
                if assignments[idx] != Some(cid) {
                    assignments[idx] = Some(cid);
                    changes += 1;
                }
            }

            let repaired = repair_empty_clusters(&mut clusters, dataset, &mut assignments, rng)?;
            changes += repaired;

            if changes > 0 {
                clusters.recenter();
            }

            tracing::debug!(iteration, changes, repaired, "partition iteration complete");

            self.observer
                .observe(&clusters, iteration)
                .map_err(PartitionError::Observer)?;

            if (changes as f64) < threshold {
                break Termination::Converged;
            }
            if iteration == self.config.max_iterations {
                break Termination::Exhausted;
            }
            iteration += 1;
        };

        let assignments = assignments
            .into_iter()
            .map(|cid| {
                cid.ok_or_else(|| PartitionError::Internal("vector left unassigned".into()))
            })
            .collect::<Result<Vec<usize>>>()?;
        let inertia = inertia(dataset, &clusters, &assignments);
        let iterations = iteration + 1;

        match termination {
            Termination::Converged => {
                tracing::info!(k, iterations, inertia, "partition converged")
            }
            Termination::Exhausted => tracing::warn!(
                k,
                iterations,
                inertia,
                "partition stopped at the iteration cap before converging"
            ),
        }

        Ok(PartitionOutcome {
            clusters,
            assignments,
            iterations,
            termination,
            inertia,
        })
    }

    /// Suggest a cluster count for `dataset` among `candidates`.
    ///
    /// Every candidate is partitioned `restarts` times from different random
    /// centers (candidates run in parallel); the lowest-inertia run of each is
    /// scored by its mean silhouette coefficient. The highest score wins, the
    /// lowest `k` on ties. With a configured seed, candidate `k` draws its
    /// restart seeds from `seed + k`.
    pub fn suggest_k(
        &self,
        dataset: &[Vector],
        candidates: RangeInclusive<usize>,
        restarts: usize,
    ) -> Result<KSuggestion>
    where
        O: Sync,
    {
        let (first, last) = (*candidates.start(), *candidates.end());
        if first < 2 || first > last {
            return Err(PartitionError::InvalidConfiguration(format!(
                "candidate cluster counts must form a non-empty range starting at 2 or above, got {first}..={last}"
            )));
        }
        if restarts == 0 {
            return Err(PartitionError::InvalidConfiguration(
                "restarts must be at least 1".into(),
            ));
        }
        validate_dataset(dataset, last)?;

        let scored = candidates
            .into_par_iter()
            .map(|k| self.score_candidate(dataset, k, restarts))
            .collect::<Result<Vec<ScoredCandidate>>>()?;

        let scores: Vec<(usize, f64)> = scored.iter().map(|c| (c.k, c.score)).collect();
        let best = scored
            .into_iter()
            .reduce(|best, candidate| {
                if candidate.score > best.score {
                    candidate
                } else {
                    best
                }
            })
            .ok_or_else(|| PartitionError::Internal("no candidate cluster count".into()))?;
        tracing::info!(k = best.k, score = best.score, "suggested cluster count");

        Ok(KSuggestion {
            k: best.k,
            score: best.score,
            seed: best.seed,
            outcome: best.outcome,
            scores,
        })
    }

    /// Best-of-`restarts` partition for one candidate `k`, with its silhouette.
    fn score_candidate(
        &self,
        dataset: &[Vector],
        k: usize,
        restarts: usize,
    ) -> Result<ScoredCandidate> {
        let mut seeds = match self.config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed.wrapping_add(k as u64)),
            None => ChaCha8Rng::from_entropy(),
        };

        let mut best: Option<(u64, PartitionOutcome)> = None;
        for restart in 0..restarts {
            let seed = seeds.next_u64();
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            let outcome = self.partition_with_rng(dataset, k, &mut rng)?;
            if best
                .as_ref()
                .map(|(_, current)| outcome.inertia < current.inertia)
                .unwrap_or(true)
            {
                tracing::debug!(
                    k,
                    restart,
                    inertia = outcome.inertia,
                    "accepting new best restart"
                );
                best = Some((seed, outcome));
            }
        }

        let (seed, outcome) = best.ok_or_else(|| {
            PartitionError::Internal(format!("no restart completed for k = {k}"))
        })?;
        let score = silhouette_score(dataset, &outcome.assignments, k)?;
        tracing::debug!(k, score, "scored candidate cluster count");
        Ok(ScoredCandidate {
            k,
            score,
            seed,
            outcome,
        })
    }
}

struct ScoredCandidate {
    k: usize,
    score: f64,
    seed: u64,
    outcome: PartitionOutcome,
}

/// Check the preconditions of a partitioning call and return the dimensionality.
fn validate_dataset(dataset: &[Vector], k: usize) -> Result<usize> {
    let dim = dataset.first().map(Vector::dim).unwrap_or(0);
    if dim == 0 {
        return Err(PartitionError::EmptyDataset);
    }
    if k == 0 {
        return Err(PartitionError::InvalidK);
    }
    if k > dataset.len() {
        return Err(PartitionError::InsufficientData {
            k,
            n: dataset.len(),
        });
    }
    Ok(dim)
}

/// Give every member-less cluster a random vector owned by a cluster with more
/// than one member. The donor stays in its old cluster's membership; only the
/// assignment table moves. Returns the number of repaired clusters.
fn repair_empty_clusters<R: Rng + ?Sized>(
    clusters: &mut ClusterSet,
    dataset: &[Vector],
    assignments: &mut [Option<usize>],
    rng: &mut R,
) -> Result<usize> {
    let mut repaired = 0usize;
    for cid in 0..clusters.len() {
        if !clusters[cid].is_empty() {
            continue;
        }
        let donors: Vec<usize> = assignments
            .iter()
            .enumerate()
            .filter_map(|(idx, owner)| match owner {
                Some(owner) if clusters[*owner].len() > 1 => Some(idx),
                _ => None,
            })
            .collect();
        let &donor = donors.choose(rng).ok_or_else(|| {
            PartitionError::Internal(format!(
                "no cluster has a member to spare for empty cluster {cid}"
            ))
        })?;
        clusters[cid].members.push(dataset[donor].clone());
        assignments[donor] = Some(cid);
        repaired += 1;
    }
    Ok(repaired)
}

fn inertia(dataset: &[Vector], clusters: &ClusterSet, assignments: &[usize]) -> f64 {
    dataset
        .iter()
        .zip(assignments)
        .map(|(vector, &cid)| vector.distance(&clusters[cid].center))
        .sum()
}

/// Mean silhouette coefficient of a labelled dataset, in `[-1, 1]`.
///
/// Uses true (square-rooted) Euclidean distances. Vectors in singleton
/// clusters score 0.
pub fn silhouette_score(dataset: &[Vector], assignments: &[usize], k: usize) -> Result<f64> {
    if dataset.is_empty() {
        return Err(PartitionError::EmptyDataset);
    }
    if dataset.len() != assignments.len() {
        return Err(PartitionError::InvalidData(format!(
            "{} vectors but {} assignments",
            dataset.len(),
            assignments.len()
        )));
    }
    if let Some(&cid) = assignments.iter().find(|&&cid| cid >= k) {
        return Err(PartitionError::InvalidData(format!(
            "assignment to cluster {cid} with k = {k}"
        )));
    }

    let mut sizes = vec![0usize; k];
    for &cid in assignments {
        sizes[cid] += 1;
    }

    let per_vector: Vec<f64> = (0..dataset.len())
        .into_par_iter()
        .map(|i| {
            let own = assignments[i];
            if sizes[own] <= 1 {
                return 0.0;
            }
            let mut sums = vec![0.0f64; k];
            for (j, other) in dataset.iter().enumerate() {
                if j != i {
                    sums[assignments[j]] += dataset[i].distance(other).sqrt();
                }
            }
            let a = sums[own] / (sizes[own] - 1) as f64;
            let b = (0..k)
                .filter(|&cid| cid != own && sizes[cid] > 0)
                .map(|cid| sums[cid] / sizes[cid] as f64)
                .fold(f64::INFINITY, f64::min);
            if !b.is_finite() {
                return 0.0;
            }
            let scale = a.max(b);
            if scale > 0.0 {
                (b - a) / scale
            } else {
                0.0
            }
        })
        .collect();

    Ok(per_vector.iter().sum::<f64>() / dataset.len() as f64)
}

/// Generate `n` uniform random vectors in `[0, 1)^dim`.
pub fn generate_points<R: Rng + ?Sized>(n: usize, dim: usize, rng: &mut R) -> Vec<Vector> {
    (0..n).map(|_| Vector::random(dim, rng)).collect()
}

/// Generate Gaussian blobs of `n_per_cluster` vectors around each of `centers`.
pub fn generate_blobs<R: Rng + ?Sized>(
    n_per_cluster: usize,
    centers: &[Vector],
    spread: f64,
    rng: &mut R,
) -> Result<Vec<Vector>> {
    let normal = Normal::new(0.0, spread).map_err(|err| {
        PartitionError::InvalidConfiguration(format!("invalid blob spread {spread}: {err}"))
    })?;
    let mut points = Vec::with_capacity(n_per_cluster * centers.len());
    for center in centers {
        for _ in 0..n_per_cluster {
            points.push(synthesise_sample(center, &normal, rng));
        }
    }
    Ok(points)
}

fn synthesise_sample<R: Rng + ?Sized>(
    center: &Vector,
    normal: &Normal<f64>,
    rng: &mut R,
) -> Vector {
    center.iter().map(|&c| c + normal.sample(rng)).collect()
}

fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Per-dimension min-max scaling parameters.
#[derive(Debug, Clone, Serialize)]
pub struct Normalization {
    /// Feature-wise minimum.
    pub min: Vector,
    /// Feature-wise `max - min`.
    pub range: Vector,
}

impl Normalization {
    /// Scale `vector` into the unit hypercube. Constant dimensions map to 0.0.
    pub fn apply(&self, vector: &Vector) -> Vector {
        vector
            .iter()
            .zip(self.min.iter().zip(self.range.iter()))
            .map(|(&x, (&lo, &span))| if span > 0.0 { (x - lo) / span } else { 0.0 })
            .collect()
    }

    /// Map a vector from the unit hypercube back to the original coordinates.
    pub fn denormalize(&self, vector: &Vector) -> Vector {
        vector
            .iter()
            .zip(self.min.iter().zip(self.range.iter()))
            .map(|(&x, (&lo, &span))| lo + x * span)
            .collect()
    }
}

/// Output of [`normalize`] helper.
#[derive(Debug, Clone)]
pub struct NormalizedData {
    /// Transformed dataset.
    pub data: Vec<Vector>,
    /// Parameters required to map centers back to input coordinates.
    pub params: Normalization,
}

/// Min-max scale each dimension of the dataset into `[0, 1]`, the space the
/// random initial centers are drawn from.
pub fn normalize(dataset: &[Vector]) -> NormalizedData {
    let Some(first) = dataset.first() else {
        return NormalizedData {
            data: Vec::new(),
            params: Normalization {
                min: Vector::new(Vec::new()),
                range: Vector::new(Vec::new()),
            },
        };
    };

    let mut min = first.to_vec();
    let mut max = first.to_vec();
    for vector in &dataset[1..] {
        for (j, &value) in vector.iter().enumerate().take(min.len()) {
            min[j] = min[j].min(value);
            max[j] = max[j].max(value);
        }
    }
    let range: Vec<f64> = max.iter().zip(&min).map(|(hi, lo)| hi - lo).collect();

    let params = Normalization {
        min: Vector::new(min),
        range: Vector::new(range),
    };
    let data = dataset.iter().map(|vector| params.apply(vector)).collect();

    NormalizedData { data, params }
}

/// DataLoader abstraction to load CSV/Parquet files into datasets.
pub struct DataLoader;

impl DataLoader {
    /// Load a headered CSV file whose columns are all numeric.
    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Vector>> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
        let mut dataset = Vec::new();
        let mut width = None;
        for record in rdr.records() {
            let record = record?;
            let mut row = Vec::with_capacity(record.len());
            for field in record.iter() {
                row.push(field.trim().parse()?);
            }
            if let Some(expected) = width {
                if expected != row.len() {
                    return Err(PartitionError::InvalidData(format!(
                        "found inconsistent row width: expected {expected}, got {}",
                        row.len()
                    )));
                }
            } else {
                width = Some(row.len());
            }
            dataset.push(Vector::new(row));
        }
        Ok(dataset)
    }

    /// Load a Parquet file containing only numeric (int/float) columns.
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Vec<Vector>> {
        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let rows = reader
            .get_row_iter(None)?
            .collect::<std::result::Result<Vec<Row>, _>>()?;
        let Some(width) = rows.first().map(Row::len) else {
            return Ok(Vec::new());
        };

        let mut dataset = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(PartitionError::InvalidData(format!(
                    "row {i} width mismatch: expected {width}, found {}",
                    row.len()
                )));
            }
            let mut coords = Vec::with_capacity(width);
            for (j, (_, field)) in row.get_column_iter().enumerate() {
                let value = match field {
                    Field::Double(v) => *v,
                    Field::Float(v) => *v as f64,
                    Field::Int(v) => *v as f64,
                    Field::Long(v) => *v as f64,
                    Field::Short(v) => *v as f64,
                    Field::Byte(v) => *v as f64,
                    Field::UInt(v) => *v as f64,
                    Field::ULong(v) => *v as f64,
                    Field::UShort(v) => *v as f64,
                    Field::UByte(v) => *v as f64,
                    Field::Null => {
                        return Err(PartitionError::InvalidData(format!(
                            "column {j} contained a NULL value which cannot be converted to f64"
                        )))
                    }
                    other => {
                        return Err(PartitionError::InvalidData(format!(
                            "unsupported parquet field at column {j}: {other:?}"
                        )))
                    }
                };
                coords.push(value);
            }
            dataset.push(Vector::new(coords));
        }

        Ok(dataset)
    }
}
