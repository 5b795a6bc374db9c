//! Output commit: staging → destination, once per successful job.

use std::fs;
use std::path::Path;

use tracing::debug;

use jobwave_core::error::{Error, Result};

use crate::job::CompiledJob;

pub trait OutputCommitter {
    fn commit(&self, job: &CompiledJob) -> Result<()>;

    /// Remove a committed temporary output once the run no longer needs it.
    fn discard(&self, _job: &CompiledJob) -> Result<()> {
        Ok(())
    }
}

/// Moves staging output into place with a single `rename`, so a destination
/// is either absent or complete.
///
/// Final destinations are never overwritten. A temporary destination that
/// already exists was left behind by an earlier launch of the same plan and
/// is replaced.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsCommitter;

impl OutputCommitter for FsCommitter {
    fn commit(&self, job: &CompiledJob) -> Result<()> {
        let fail = |reason: String| Error::Commit {
            job: job.name.clone(),
            reason,
        };
        let staging = Path::new(&job.staging);
        let destination = Path::new(&job.destination);

        if !staging.exists() {
            return Err(fail(format!("staging output {} is missing", job.staging)));
        }
        if destination.exists() {
            if !job.temporary {
                return Err(fail(format!("destination {} already exists", job.destination)));
            }
            debug!(
                job = %job.name,
                destination = %job.destination,
                "replacing stale temporary output"
            );
            remove(destination)
                .map_err(|e| fail(format!("remove stale {}: {e}", job.destination)))?;
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| fail(format!("create {}: {e}", parent.display())))?;
        }
        fs::rename(staging, destination)
            .map_err(|e| fail(format!("rename to {}: {e}", job.destination)))?;

        debug!(job = %job.name, destination = %job.destination, "committed output");
        Ok(())
    }

    fn discard(&self, job: &CompiledJob) -> Result<()> {
        let destination = Path::new(&job.destination);
        if !job.temporary || !destination.exists() {
            return Ok(());
        }
        remove(destination).map_err(|e| Error::Commit {
            job: job.name.clone(),
            reason: format!("remove temporary {}: {e}", job.destination),
        })?;
        debug!(job = %job.name, destination = %job.destination, "removed temporary output");
        Ok(())
    }
}

fn remove(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Commits nothing; for dry runs against substrates that write no files.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCommitter;

impl OutputCommitter for NoopCommitter {
    fn commit(&self, job: &CompiledJob) -> Result<()> {
        debug!(job = %job.name, "dry run, output left in place");
        Ok(())
    }
}
