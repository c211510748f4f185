use std::io;

use tokio::sync::{mpsc, oneshot};

use crate::model::StoreEvent;
use crate::observability::{JOURNAL_FLUSH_BATCH_SIZE, JOURNAL_FLUSH_DURATION_SECONDS};
use super::file::JournalFile;

pub(super) enum JournalCommand {
    Append {
        event: StoreEvent,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<StoreEvent>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = Vec<(StoreEvent, oneshot::Sender<io::Result<()>>)>;

/// Background task that owns the journal and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain every Append already queued.
/// 4. One sync for the whole batch.
/// 5. Answer every sender with the batch result.
pub(super) async fn writer_loop(mut file: JournalFile, mut rx: mpsc::Receiver<JournalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            JournalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(JournalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut file, &mut batch);
                if let Some(other) = deferred {
                    handle_control(&mut file, other);
                }
            }
            other => handle_control(&mut file, other),
        }
    }
    tracing::debug!(path = %file.path().display(), "journal writer stopped");
}

fn commit_batch(file: &mut JournalFile, batch: &mut Pending) {
    metrics::histogram!(JOURNAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let result = flush_batch(file, batch);
    metrics::histogram!(JOURNAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!(path = %file.path().display(), "journal flush failed: {e}");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(file: &mut JournalFile, batch: &Pending) -> io::Result<()> {
    let mut append_err = None;
    for (event, _) in batch {
        if let Err(e) = file.append(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so half-buffered bytes don't leak
    // into the next batch.
    let flush_err = file.sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_control(file: &mut JournalFile, cmd: JournalCommand) {
    match cmd {
        JournalCommand::Compact { events, response } => {
            let _ = response.send(file.rewrite(&events));
        }
        JournalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(file.appends_since_compact());
        }
        JournalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(file, &mut batch);
        }
    }
}
