//! JSONL event sink
//!
//! Appends events to a file, one JSON object per line, so another process
//! can tail a run's progress.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use super::ProgressEvent;
use crate::error::{Error, Result};

/// Appends events to a JSONL file
#[derive(Debug)]
pub struct JsonlEventSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventSink {
    /// Open `path` for appending, creating parent directories
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event
    pub fn write(&self, event: &ProgressEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| Error::InvalidState("event sink lock poisoned".to_string()))?;
        writeln!(file, "{}", json)?;
        file.flush()?;
        Ok(())
    }

    /// Write everything received until the channel closes or a run's
    /// terminal event is seen, when `until_terminal` is set
    pub fn spawn(
        self,
        mut receiver: broadcast::Receiver<ProgressEvent>,
        until_terminal: bool,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => {
                        if let Err(e) = self.write(&event) {
                            warn!(path = %self.path.display(), error = %e, "Failed to write event");
                        }
                        if until_terminal && event.kind.is_terminal() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Event sink lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Read back every well-formed event in a JSONL file
pub fn read_events(path: &Path) -> Result<Vec<ProgressEvent>> {
    let reader = BufReader::new(File::open(path)?);
    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(error = %e, "Skipping malformed event line"),
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RunId, Stage};
    use crate::events::{ProgressBroadcaster, ProgressKind};

    #[test]
    fn test_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.jsonl");
        let sink = JsonlEventSink::open(&path).unwrap();
        let run = RunId::new();

        sink.write(&ProgressEvent::new(
            run.clone(),
            ProgressKind::StageStarted {
                stage: Stage::Extract,
                iteration: 0,
            },
        ))
        .unwrap();
        sink.write(&ProgressEvent::new(
            run.clone(),
            ProgressKind::RunFailed {
                reason: "cancelled".to_string(),
            },
        ))
        .unwrap();

        std::fs::write(
            &path,
            format!("{}not json\n", std::fs::read_to_string(&path).unwrap()),
        )
        .unwrap();

        let events = read_events(&path).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind.name(), "run_failed");
    }

    #[tokio::test]
    async fn test_spawned_sink_stops_after_terminal_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        let broadcaster = ProgressBroadcaster::default();
        let handle = JsonlEventSink::open(&path)
            .unwrap()
            .spawn(broadcaster.subscribe(), true);
        let run = RunId::new();

        broadcaster.emit(ProgressEvent::new(
            run.clone(),
            ProgressKind::RunStarted {
                target_subsystem: "Navigation".to_string(),
                resumed: false,
            },
        ));
        broadcaster.emit(ProgressEvent::new(
            run,
            ProgressKind::RunCompleted {
                outcome: None,
                artifacts: vec![],
            },
        ));
        handle.await.unwrap();

        assert_eq!(read_events(&path).unwrap().len(), 2);
    }
}
