//! Particle-set sharding.
//!
//! Particles are split into contiguous, order-preserving slices. With
//! `base = N / T` and `remainder = N % T`, the first `remainder` shards take
//! `base + 1` particles and the others `base`. When `T > N` partitioning stops
//! at the first empty shard, leaving exactly `N` single-particle shards.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::particles::{write_particles, Particle};
use crate::run_config::RunConfiguration;

/// One unit of work: a particle slice and its own run configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Shard {
    pub index: usize,
    pub particles: Vec<Particle>,
    pub config: RunConfiguration,
}

impl Shard {
    /// Identifier passed to the integrator on its command line.
    pub fn case_id(&self) -> &str {
        &self.config.case_name
    }
}

/// Files written for a shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardArtifacts {
    pub index: usize,
    pub particle_file: PathBuf,
    pub config_file: PathBuf,
}

/// Shard sizes for `total` particles over `threads` workers. Empty shards are
/// never produced.
pub fn shard_sizes(total: usize, threads: usize) -> Vec<usize> {
    let threads = threads.max(1);
    let base = total / threads;
    let remainder = total % threads;

    let mut sizes = Vec::with_capacity(threads);
    for index in 0..threads {
        let size = if index < remainder { base + 1 } else { base };
        if size == 0 {
            warn!(
                "Requested {threads} threads but only {total} particle(s); running {index} shard(s)"
            );
            break;
        }
        sizes.push(size);
    }
    sizes
}

/// Split `particles` into at most `config.thread_count` shards.
pub fn partition(particles: &[Particle], config: &RunConfiguration) -> Result<Vec<Shard>> {
    if particles.is_empty() {
        return Err(Error::EmptyInput);
    }

    let sizes = shard_sizes(particles.len(), config.thread_count);
    let mut shards = Vec::with_capacity(sizes.len());
    let mut offset = 0;
    for (index, size) in sizes.into_iter().enumerate() {
        let slice = &particles[offset..offset + size];
        offset += size;
        shards.push(Shard {
            index,
            particles: slice.to_vec(),
            config: config.for_shard(index),
        });
    }

    info!(
        "Partitioned {} particles into {} shard(s)",
        particles.len(),
        shards.len()
    );
    Ok(shards)
}

/// Write each shard's particle file under `particle_dir` and its run artifact
/// under `run_dir`.
pub fn materialize(
    shards: &[Shard],
    particle_dir: &Path,
    run_dir: &Path,
) -> Result<Vec<ShardArtifacts>> {
    shards
        .iter()
        .map(|shard| {
            let particle_file = shard.config.particle_file(particle_dir);
            write_particles(&particle_file, &shard.particles)?;
            let config_file = shard.config.write_artifact(run_dir)?;
            debug!(
                "Shard {}: {} particles -> {}, {}",
                shard.index,
                shard.particles.len(),
                particle_file.display(),
                config_file.display()
            );
            Ok(ShardArtifacts {
                index: shard.index,
                particle_file,
                config_file,
            })
        })
        .collect()
}
