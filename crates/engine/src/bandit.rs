//! Beta-Bernoulli Thompson Sampling over budget sources.
//!
//! Each arm keeps `(trials, successes)` counters on top of a shared Beta prior.
//! The bandit hands out one budget increment at a time; arms are removed once
//! their budget ceiling is reached, and a backup arm set takes over when the
//! primary set runs dry.

use std::collections::{BTreeMap, BTreeSet};

use autopilot_core::types::Source;

use crate::random::RandomSource;

/// Posterior snapshot for one arm.
#[derive(Debug, Clone, Copy)]
pub struct ArmStats {
    pub trials: u64,
    pub successes: u64,
    pub alpha: f64,
    pub beta: f64,
}

impl ArmStats {
    pub fn expected_value(&self) -> f64 {
        self.alpha / (self.alpha + self.beta)
    }
}

pub struct BetaBandit {
    sources: Vec<Source>,
    backup_sources: Vec<Source>,
    banned: BTreeSet<Source>,
    prior: (f64, f64),
    trials: BTreeMap<Source, u64>,
    successes: BTreeMap<Source, u64>,
}

impl BetaBandit {
    /// Backup sources already present in `sources` are ignored.
    pub fn new(sources: Vec<Source>, backup_sources: Vec<Source>, prior: (f64, f64)) -> Self {
        let backup_sources: Vec<Source> = backup_sources
            .into_iter()
            .filter(|s| !sources.contains(s))
            .collect();

        let trials = sources
            .iter()
            .chain(backup_sources.iter())
            .map(|s| (s.clone(), 0))
            .collect::<BTreeMap<_, _>>();
        let successes = trials.clone();

        Self {
            sources,
            backup_sources,
            banned: BTreeSet::new(),
            prior,
            trials,
            successes,
        }
    }

    pub fn add_result(&mut self, source: &Source, success: bool) {
        *self.trials.entry(source.clone()).or_insert(0) += 1;
        let successes = self.successes.entry(source.clone()).or_insert(0);
        if success {
            *successes += 1;
        }
    }

    /// Sample every eligible arm's posterior and return the best one.
    ///
    /// When every remaining arm is banned the bans are lifted and sampling is
    /// retried once. Returns `None` only when no arms remain.
    pub fn get_recommendation<R: RandomSource + ?Sized>(&mut self, rng: &mut R) -> Option<Source> {
        if self.sources.is_empty() {
            return None;
        }

        if self.sources.iter().all(|s| self.banned.contains(s)) {
            self.banned.clear();
        }

        let mut best_sample = f64::NEG_INFINITY;
        let mut best_source = None;

        for source in self.sources.iter().filter(|s| !self.banned.contains(*s)) {
            let stats = self.stats(source);
            let sample = rng.beta(stats.alpha, stats.beta);
            if sample > best_sample {
                best_sample = sample;
                best_source = Some(source);
            }
        }

        best_source.cloned()
    }

    /// Exclude a source from recommendations until the next time every arm is banned.
    pub fn ban_source(&mut self, source: &Source) {
        if self.sources.contains(source) {
            self.banned.insert(source.clone());
        }
    }

    /// Permanently drop a source, promoting the backup set if the primary set
    /// becomes empty.
    pub fn remove_source(&mut self, source: &Source) {
        self.sources.retain(|s| s != source);
        self.backup_sources.retain(|s| s != source);
        self.banned.remove(source);

        if self.sources.is_empty() && !self.backup_sources.is_empty() {
            self.sources = std::mem::take(&mut self.backup_sources);
        }
    }

    pub fn active_sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn stats(&self, source: &Source) -> ArmStats {
        let trials = self.trials.get(source).copied().unwrap_or(0);
        let successes = self.successes.get(source).copied().unwrap_or(0);
        ArmStats {
            trials,
            successes,
            alpha: self.prior.0 + successes as f64,
            beta: self.prior.1 + (trials - successes) as f64,
        }
    }
}
