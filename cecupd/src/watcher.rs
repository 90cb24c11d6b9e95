//! Inbound image channel
//!
//! Watches the image directory with filesystem notifications and
//! delivers the path of every regular file that is closed after
//! writing. The progress file the manager itself writes into the same
//! directory is filtered out.

use std::path::Path;

use notify::event::{AccessKind, AccessMode};
use notify::{Event as FsEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

use cecup_common::config::PROGRESS_FILE_NAME;

use crate::events::Event;

/// Whether a filesystem event is a close-after-write
pub fn is_close_write(event: &FsEvent) -> bool {
    matches!(
        event.kind,
        EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}

/// Whether a path names the manager's own progress file
pub fn is_progress_file(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()) == Some(PROGRESS_FILE_NAME)
}

/// Start watching the image directory
///
/// The returned watcher must be kept alive for events to flow.
pub fn spawn_image_watch(
    dir: &Path,
    tx: UnboundedSender<Event>,
) -> notify::Result<RecommendedWatcher> {
    std::fs::create_dir_all(dir)?;

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<FsEvent>| {
        match result {
            Ok(event) if is_close_write(&event) => {
                for path in event.paths {
                    if is_progress_file(&path) {
                        continue;
                    }
                    let _ = tx.send(Event::ImageArrived(path));
                }
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "image watch error"),
        }
    })?;

    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    info!(dir = %dir.display(), "watching for incoming firmware images");
    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_close_write_classification() {
        let close_write = FsEvent::new(EventKind::Access(AccessKind::Close(AccessMode::Write)));
        assert!(is_close_write(&close_write));

        let close_read = FsEvent::new(EventKind::Access(AccessKind::Close(AccessMode::Read)));
        assert!(!is_close_write(&close_read));

        let create = FsEvent::new(EventKind::Create(notify::event::CreateKind::File));
        assert!(!is_close_write(&create));
    }

    #[test]
    fn test_progress_file_filter() {
        assert!(is_progress_file(&PathBuf::from(
            "/tmp/cec_images/progress.txt"
        )));
        assert!(!is_progress_file(&PathBuf::from("/tmp/cec_images/img.bin")));
    }
}
