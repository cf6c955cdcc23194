mod ledger;
mod subpackages;
mod walker;

use anyhow::{Context, Result};
use log::warn;
use rayon::prelude::*;

pub use ledger::{file_id, DedupLedger, FileId};
pub use subpackages::{enumerate_subpackages, SubpackageNode};
pub use walker::{ExcludeSet, FileEntry, SizeOptions, SizeTarget, SizeTotals, Sizer, EDITABLE_EXCLUDES};

use crate::environment::Distribution;
use crate::error::PkgsizerError;
use crate::interrupt::Interrupt;

impl SizeTarget {
    /// What to walk for a distribution: its source tree for editable installs, its installed
    /// file list otherwise.
    pub fn for_distribution(dist: &Distribution) -> Self {
        match dist.editable_location() {
            Some(source) => SizeTarget {
                paths: vec![source.to_path_buf()],
                base: source.to_path_buf(),
                editable: true,
            },
            None => SizeTarget {
                paths: dist.files().to_vec(),
                base: dist.site_packages().to_path_buf(),
                editable: false,
            },
        }
    }
}

/// Sizes of many targets measured in one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SizeReport {
    /// One entry per target, in input order.
    pub totals: Vec<SizeTotals>,
    /// Files that could not be read.
    pub warnings: usize,
}

impl SizeReport {
    pub fn total(&self) -> SizeTotals {
        self.totals.iter().copied().sum()
    }
}

/// Size every target on a pool of `jobs` threads, counting each file identity once across
/// all of them.
///
/// Walks run concurrently and claim identities in a shared ledger; a shared identity belongs
/// to the target earliest in `targets`, whichever walk reached it first.
pub fn size_targets(
    targets: &[SizeTarget],
    options: &SizeOptions,
    jobs: usize,
    interrupt: &Interrupt,
) -> Result<SizeReport> {
    let ledger = DedupLedger::new();
    let sizer = Sizer::new(options, interrupt);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .thread_name(|i| format!("pkgsizer-walk-{}", i))
        .build()
        .context("Failed to start the directory walker pool")?;

    let walked: Vec<Vec<FileEntry>> = pool.install(|| {
        targets
            .par_iter()
            .enumerate()
            .map(|(rank, target)| -> Result<Vec<FileEntry>, PkgsizerError> {
                let entries = sizer.collect(target)?;
                for id in entries.iter().filter_map(|entry| entry.id) {
                    ledger.claim(id, rank);
                }
                Ok(entries)
            })
            .collect::<Result<Vec<_>, PkgsizerError>>()
    })?;

    let totals: Vec<SizeTotals> = walked
        .iter()
        .enumerate()
        .map(|(rank, entries)| {
            entries
                .iter()
                .filter(|entry| entry.id.map_or(true, |id| ledger.owner(&id) == Some(rank)))
                .map(|entry| SizeTotals::new(entry.bytes, 1))
                .sum::<SizeTotals>()
        })
        .collect();

    let warnings = sizer.warnings();
    if warnings > 0 {
        warn!("{} file(s) could not be read and were skipped", warnings);
    }

    Ok(SizeReport { totals, warnings })
}

/// Size distributions, in the given order, with one shared ledger.
pub fn size_distributions(
    distributions: &[&Distribution],
    options: &SizeOptions,
    jobs: usize,
    interrupt: &Interrupt,
) -> Result<SizeReport> {
    let targets: Vec<SizeTarget> = distributions
        .iter()
        .map(|dist| SizeTarget::for_distribution(dist))
        .collect();
    size_targets(&targets, options, jobs, interrupt)
}
