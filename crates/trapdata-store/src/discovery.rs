//! Image discovery.
//!
//! Scans a trap's base directory for JPEG images, reads their capture time
//! and files them into monitoring sessions keyed by (base directory, date).

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use trapdata_models::SessionId;

use crate::error::StoreResult;
use crate::records::NewImage;
use crate::store::RecordStore;

/// Filename prefix layout written by the trap firmware.
const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const FILENAME_TIMESTAMP_LEN: usize = 14;

/// Outcome of one discovery scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    /// Image files found on disk
    pub scanned: usize,
    /// Newly inserted images
    pub added: usize,
    /// Images already known to the store
    pub skipped: usize,
    /// Sessions touched by this scan, ascending id
    pub sessions: Vec<SessionId>,
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

fn timestamp_from_filename(path: &Path) -> Option<DateTime<Utc>> {
    let stem = path.file_stem()?.to_str()?;
    let prefix = stem.get(..FILENAME_TIMESTAMP_LEN)?;
    if !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(prefix, FILENAME_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// Capture time of an image: the filename prefix if present, else the file's mtime.
pub fn capture_timestamp(path: &Path) -> StoreResult<DateTime<Utc>> {
    if let Some(ts) = timestamp_from_filename(path) {
        return Ok(ts);
    }
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Scan `base_dir` recursively and register any images not yet in the store.
///
/// New images are not queued for processing.
pub fn discover_images(store: &dyn RecordStore, base_dir: &Path) -> StoreResult<DiscoveryReport> {
    let base_directory = base_dir.to_string_lossy().into_owned();
    info!(base_directory = %base_directory, "Scanning for images");

    let mut found = Vec::new();
    for entry in WalkDir::new(base_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !entry.file_type().is_file() || !is_jpeg(path) {
            continue;
        }
        match capture_timestamp(path) {
            Ok(captured_at) => found.push((captured_at, path.to_string_lossy().into_owned())),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable image"),
        }
    }
    found.sort();

    let mut report = DiscoveryReport {
        scanned: found.len(),
        ..Default::default()
    };
    let mut sessions = BTreeSet::new();

    for (captured_at, path) in found {
        let session_id = store.get_or_create_session(&base_directory, captured_at.date_naive())?;
        sessions.insert(session_id);

        let image = NewImage {
            session_id,
            path,
            captured_at,
        };
        match store.insert_image(&image)? {
            Some(image_id) => {
                debug!(image_id = %image_id, path = %image.path, "Registered image");
                report.added += 1;
            }
            None => report.skipped += 1,
        }
    }

    report.sessions = sessions.into_iter().collect();
    info!(
        base_directory = %base_directory,
        scanned = report.scanned,
        added = report.added,
        skipped = report.skipped,
        sessions = report.sessions.len(),
        "Discovery complete"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteStore;
    use chrono::TimeZone;
    use trapdata_models::Scope;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"not really a jpeg").unwrap();
    }

    #[test]
    fn test_timestamp_from_filename() {
        let ts = timestamp_from_filename(Path::new("/x/20220801213000-snapshot.jpg")).unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2022, 8, 1, 21, 30, 0).unwrap());

        assert!(timestamp_from_filename(Path::new("/x/IMG_0001.jpg")).is_none());
        assert!(timestamp_from_filename(Path::new("/x/20221399999999.jpg")).is_none());
    }

    #[test]
    fn test_capture_timestamp_falls_back_to_mtime() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "IMG_0001.jpg");
        let ts = capture_timestamp(&dir.path().join("IMG_0001.jpg")).unwrap();
        assert!(ts <= Utc::now());
    }

    #[test]
    fn test_discover_groups_by_date_and_skips_known() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "20220801220000.jpg");
        touch(dir.path(), "20220801210000.jpg");
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        touch(&dir.path().join("nested"), "20220802010000.JPG");
        touch(dir.path(), "notes.txt");

        let store = SqliteStore::memory().unwrap();
        let report = discover_images(&store, dir.path()).unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.added, 3);
        assert_eq!(report.sessions.len(), 2);

        let sessions = store.sessions().unwrap();
        assert_eq!(sessions[0].image_count, 2);
        assert_eq!(sessions[1].image_count, 1);

        assert!(store.eligible_images(&Scope::All, 10).unwrap().is_empty());
        assert_eq!(store.enqueue(&Scope::All, None).unwrap(), 3);

        // Images are inserted in capture order.
        let ids = store.eligible_images(&Scope::All, 10).unwrap();
        let images = store.images(&ids).unwrap();
        assert!(images[0].path.ends_with("20220801210000.jpg"));

        let again = discover_images(&store, dir.path()).unwrap();
        assert_eq!(again.added, 0);
        assert_eq!(again.skipped, 3);
    }
}
