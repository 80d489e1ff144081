//! Resource tracking file.
//!
//! Written at the end of a run so that resources left behind (retained,
//! suppressed teardown, failed deletions, a crashed process) can be cleaned
//! up later from another process:
//!
//! ```json
//! { "session": "3f9a2c1b", "resources": [ { "kind": "Plan", "name": "...", "namespace": "mtv" } ] }
//! ```

use std::io::Write as _;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use vmigrate_core::{ResourceRecord, ResourceRef, SessionId};

use crate::{ExecutionContext, ExecutorError};

/// On-disk list of a session's resources in creation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackingFile {
    pub session: SessionId,
    pub resources: Vec<ResourceRef>,
}

impl TrackingFile {
    /// Snapshot the creation log of `ctx`.
    #[must_use]
    pub fn from_context(ctx: &ExecutionContext) -> Self {
        Self {
            session: ctx.session().clone(),
            resources: ctx.records().iter().map(|r| r.resource.clone()).collect(),
        }
    }

    /// Snapshot arbitrary records, e.g. teardown leftovers.
    #[must_use]
    pub fn from_records<'a>(session: SessionId, records: impl IntoIterator<Item = &'a ResourceRecord>) -> Self {
        Self { session, resources: records.into_iter().map(|r| r.resource.clone()).collect() }
    }

    /// Write the file atomically: temp file in the target directory, fsync,
    /// rename.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Io`] if the file cannot be written.
    pub async fn write(&self, path: &Path) -> Result<(), ExecutorError> {
        let content = serde_json::to_vec_pretty(self)?;
        let target = path.to_path_buf();
        let written = tokio::task::spawn_blocking(move || write_atomic(&target, &content))
            .await
            .map_err(|e| ExecutorError::Io(std::io::Error::other(e)))?;
        written?;
        tracing::info!(path = %path.display(), resources = self.resources.len(), "wrote tracking file");
        Ok(())
    }

    /// Read a tracking file back.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Io`] if the file cannot be read and
    /// [`ExecutorError::Json`] if it is malformed (including an invalid
    /// session id or unknown resource kind).
    pub async fn read(path: &Path) -> Result<Self, ExecutorError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Rebuild an execution context owning these resources, so that the
    /// teardown engine can process them.
    #[must_use]
    pub fn into_context(self) -> ExecutionContext {
        let mut ctx = ExecutionContext::new(self.session);
        for resource in self.resources {
            let record = ResourceRecord::new(resource, ctx.session().clone(), None);
            ctx.register(record);
        }
        ctx
    }
}

fn write_atomic(target: &Path, content: &[u8]) -> std::io::Result<()> {
    let dir = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(target).map_err(|e| e.error)?;
    Ok(())
}
