//! Marker store: the durable, insertion-ordered collection of problem reports.
//!
//! The collection lives in one JSON file holding an array of reports. Reads go
//! straight to the file; every mutation is queued to a single writer task that
//! performs the read-modify-write and replaces the file atomically, so two
//! appends in flight can never lose each other's record.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::fs;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, warn};

use crate::models::{ProblemReport, ReportId};
use crate::{Result, UrbanFixError};

/// What a read of the persisted collection found
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    Loaded(Vec<ProblemReport>),
    /// Nothing persisted yet
    Missing,
    /// File exists but could not be read
    Unavailable { reason: String },
    /// File exists but is not a well-formed report array
    Corrupt { reason: String },
}

impl LoadOutcome {
    /// Collapse to the sequence callers see: anything but `Loaded` is empty
    #[must_use]
    pub fn into_reports(self) -> Vec<ProblemReport> {
        match self {
            LoadOutcome::Loaded(reports) => reports,
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, LoadOutcome::Corrupt { .. })
    }
}

type Reply = oneshot::Sender<Result<Vec<ProblemReport>>>;

enum WriteCommand {
    Append { report: ProblemReport, reply: Reply },
    Delete { id: ReportId, reply: Reply },
    AssignIds { reply: Reply },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Handle to the marker collection. Clones share one writer queue.
#[derive(Clone)]
pub struct MarkerStore {
    path: Arc<PathBuf>,
    writer: mpsc::UnboundedSender<WriteCommand>,
}

impl MarkerStore {
    /// Open the store at `path` and start its writer task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = Arc::new(path.into());
        let (writer, commands) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(path.clone(), commands));
        info!("Marker store opened at {}", path.display());
        Self { path, writer }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the collection and report exactly what was found.
    ///
    /// Records without an id get one, persisted through the writer so the ids
    /// stay the same on every later read.
    pub async fn load_outcome(&self) -> LoadOutcome {
        match read_collection(&self.path).await {
            LoadOutcome::Loaded(reports) if reports.iter().any(|r| !r.id.is_assigned()) => {
                let (reply, response) = oneshot::channel();
                match self.submit(WriteCommand::AssignIds { reply }, response).await {
                    Ok(reports) => LoadOutcome::Loaded(reports),
                    Err(e) => {
                        warn!("Could not persist ids for legacy markers: {}", e);
                        let mut reports = reports;
                        assign_missing_ids(&mut reports);
                        LoadOutcome::Loaded(reports)
                    }
                }
            }
            outcome => outcome,
        }
    }

    /// Read the collection, degrading missing or corrupt storage to an empty sequence
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn load(&self) -> Vec<ProblemReport> {
        match self.load_outcome().await {
            LoadOutcome::Loaded(reports) => {
                debug!("Loaded {} markers", reports.len());
                reports
            }
            LoadOutcome::Missing => {
                debug!("No marker file yet");
                Vec::new()
            }
            LoadOutcome::Unavailable { reason } => {
                warn!("Marker file unreadable, treating as empty: {}", reason);
                Vec::new()
            }
            LoadOutcome::Corrupt { reason } => {
                warn!("Marker file corrupt, treating as empty: {}", reason);
                Vec::new()
            }
        }
    }

    /// Append one report and return the updated collection
    #[instrument(skip(self, report), fields(label = %report.label))]
    pub async fn append(&self, report: ProblemReport) -> Result<Vec<ProblemReport>> {
        report.validate()?;
        let (reply, response) = oneshot::channel();
        self.submit(WriteCommand::Append { report, reply }, response)
            .await
    }

    /// Remove the report with `id` and return the updated collection
    #[instrument(skip(self))]
    pub async fn delete(&self, id: &ReportId) -> Result<Vec<ProblemReport>> {
        let (reply, response) = oneshot::channel();
        self.submit(
            WriteCommand::Delete {
                id: id.clone(),
                reply,
            },
            response,
        )
        .await
    }

    /// Finish queued writes and stop the writer. Later mutations fail.
    pub async fn close(&self) {
        let (reply, done) = oneshot::channel();
        if self.writer.send(WriteCommand::Shutdown { reply }).is_ok() {
            let _ = done.await;
        }
        info!("Marker store closed");
    }

    async fn submit(
        &self,
        command: WriteCommand,
        response: oneshot::Receiver<Result<Vec<ProblemReport>>>,
    ) -> Result<Vec<ProblemReport>> {
        self.writer
            .send(command)
            .map_err(|_| UrbanFixError::storage_unavailable("Marker store is closed"))?;
        response
            .await
            .map_err(|_| UrbanFixError::storage_unavailable("Marker writer stopped"))?
    }
}

async fn run_writer(path: Arc<PathBuf>, mut commands: mpsc::UnboundedReceiver<WriteCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            WriteCommand::Append { report, reply } => {
                let _ = reply.send(append_to(&path, report).await);
            }
            WriteCommand::Delete { id, reply } => {
                let _ = reply.send(delete_from(&path, &id).await);
            }
            WriteCommand::AssignIds { reply } => {
                let _ = reply.send(persist_ids(&path).await);
            }
            WriteCommand::Shutdown { reply } => {
                commands.close();
                let _ = reply.send(());
                break;
            }
        }
    }
    debug!("Marker writer finished");
}

async fn append_to(path: &Path, report: ProblemReport) -> Result<Vec<ProblemReport>> {
    let mut reports = match read_collection(path).await {
        LoadOutcome::Loaded(reports) => reports,
        LoadOutcome::Missing => Vec::new(),
        LoadOutcome::Unavailable { reason } => {
            return Err(UrbanFixError::storage_unavailable(reason));
        }
        LoadOutcome::Corrupt { reason } => {
            preserve_corrupt(path, &reason).await?;
            Vec::new()
        }
    };
    assign_missing_ids(&mut reports);
    reports.push(report);
    write_collection(path, &reports).await?;
    info!("Appended marker, collection now holds {}", reports.len());
    Ok(reports)
}

async fn delete_from(path: &Path, id: &ReportId) -> Result<Vec<ProblemReport>> {
    let mut reports = match read_collection(path).await {
        LoadOutcome::Loaded(reports) => reports,
        LoadOutcome::Missing => Vec::new(),
        LoadOutcome::Unavailable { reason } => {
            return Err(UrbanFixError::storage_unavailable(reason));
        }
        LoadOutcome::Corrupt { reason } => return Err(UrbanFixError::storage_corrupt(reason)),
    };
    assign_missing_ids(&mut reports);
    let position = reports
        .iter()
        .position(|r| &r.id == id)
        .ok_or_else(|| UrbanFixError::not_found(format!("No marker with id {id}")))?;
    reports.remove(position);
    write_collection(path, &reports).await?;
    info!("Deleted marker {}", id);
    Ok(reports)
}

/// Give every unassigned record a fresh id; returns how many were assigned
fn assign_missing_ids(reports: &mut [ProblemReport]) -> usize {
    let mut assigned = 0;
    for report in reports.iter_mut().filter(|r| !r.id.is_assigned()) {
        report.id = ReportId::generate();
        assigned += 1;
    }
    assigned
}

async fn persist_ids(path: &Path) -> Result<Vec<ProblemReport>> {
    let mut reports = match read_collection(path).await {
        LoadOutcome::Loaded(reports) => reports,
        LoadOutcome::Missing => return Ok(Vec::new()),
        LoadOutcome::Unavailable { reason } => {
            return Err(UrbanFixError::storage_unavailable(reason));
        }
        LoadOutcome::Corrupt { reason } => return Err(UrbanFixError::storage_corrupt(reason)),
    };
    let assigned = assign_missing_ids(&mut reports);
    if assigned > 0 {
        write_collection(path, &reports).await?;
        info!("Assigned ids to {} legacy markers", assigned);
    }
    Ok(reports)
}

async fn read_collection(path: &Path) -> LoadOutcome {
    match fs::read_to_string(path).await {
        Ok(content) => match serde_json::from_str::<Vec<ProblemReport>>(&content) {
            Ok(reports) => LoadOutcome::Loaded(reports),
            Err(e) => LoadOutcome::Corrupt {
                reason: e.to_string(),
            },
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => LoadOutcome::Missing,
        Err(e) => LoadOutcome::Unavailable {
            reason: e.to_string(),
        },
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "markers.json".into());
    name.push(suffix);
    path.with_file_name(name)
}

async fn write_collection(path: &Path, reports: &[ProblemReport]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await.map_err(|e| {
            UrbanFixError::storage_unavailable(format!(
                "Failed to create {}: {e}",
                parent.display()
            ))
        })?;
    }
    let bytes = serde_json::to_vec(reports)
        .map_err(|e| UrbanFixError::general(format!("Failed to serialize markers: {e}")))?;
    let tmp = sibling(path, ".tmp");
    fs::write(&tmp, bytes).await.map_err(|e| {
        UrbanFixError::storage_unavailable(format!("Failed to write {}: {e}", tmp.display()))
    })?;
    fs::rename(&tmp, path).await.map_err(|e| {
        UrbanFixError::storage_unavailable(format!("Failed to replace {}: {e}", path.display()))
    })?;
    Ok(())
}

async fn preserve_corrupt(path: &Path, reason: &str) -> Result<()> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let backup = sibling(path, &format!(".corrupt-{millis}"));
    warn!(
        "Marker file corrupt ({}), preserving it as {}",
        reason,
        backup.display()
    );
    fs::rename(path, &backup).await.map_err(|e| {
        UrbanFixError::storage_unavailable(format!(
            "Failed to preserve corrupt marker file: {e}"
        ))
    })?;
    Ok(())
}
