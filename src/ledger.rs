//! Append-only session ledger on removable storage.
//!
//! One `<session_id>,<photo_count>` line is appended when a session closes;
//! nothing is ever rewritten in place. The count written at close time is
//! the ground truth for that session. A session interrupted before close
//! leaves photos on disk but no ledger line, so it is discoverable by a
//! storage scan but not authoritative until reconciled.

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::Path,
};
use tracing::warn;

/// Extension shared by every stored photo.
pub const PHOTO_EXT: &str = ".jpg";

/// Appends one entry, creating the ledger file on first use. The write is
/// flushed to the media before returning so a close survives a power cut.
pub fn append(path: &Path, session_id: u64, count: u32) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{},{}", session_id, count)?;
    file.sync_all()
}

/// Reads the full ledger and builds the authoritative session -> count map.
///
/// Later lines override earlier ones for the same id, so a duplicate close
/// event resolves to last-write-wins. A missing ledger file is an empty map,
/// not an error; malformed lines are skipped with a warning.
pub fn reconcile(path: &Path) -> io::Result<BTreeMap<u64, u32>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e),
    };

    let mut sessions = BTreeMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_entry(line) {
            Some((id, count)) => {
                sessions.insert(id, count);
            }
            None => warn!("skipping malformed ledger line: {:?}", line),
        }
    }
    Ok(sessions)
}

fn parse_entry(line: &str) -> Option<(u64, u32)> {
    let (id, count) = line.split_once(',')?;
    Some((id.trim().parse().ok()?, count.trim().parse().ok()?))
}

/// Rebuilds session counts by grouping `session_<id>_<index>.jpg` filenames.
///
/// This is the self-healing fallback for when the ledger is absent or
/// distrusted; it reflects what is physically on the media rather than what
/// was recorded at close time, so the ledger wins whenever it exists.
pub fn scan_reconstruct(dir: &Path) -> io::Result<BTreeMap<u64, u32>> {
    let mut sessions: BTreeMap<u64, u32> = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((id, _index)) = parse_session_photo(name) {
            *sessions.entry(id).or_insert(0) += 1;
        }
    }
    Ok(sessions)
}

/// Splits a session photo filename into `(session_id, shot_index)`.
pub fn parse_session_photo(name: &str) -> Option<(u64, u32)> {
    let rest = name.strip_prefix("session_")?;
    let rest = rest.strip_suffix(PHOTO_EXT)?;
    let (id, index) = rest.split_once('_')?;
    Some((id.parse().ok()?, index.parse().ok()?))
}

/// Builds a session photo filename: `session_<id>_<index>.jpg`.
pub fn session_photo_name(session_id: u64, index: u32) -> String {
    format!("session_{}_{}{}", session_id, index, PHOTO_EXT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn missing_ledger_reconciles_to_empty() {
        let dir = tempdir().unwrap();
        let map = reconcile(&dir.path().join("sessions.csv")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn append_then_reconcile_keeps_every_session() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.csv");

        append(&path, 1700000000001, 3).unwrap();
        append(&path, 1700000000002, 5).unwrap();

        let map = reconcile(&path).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1700000000001], 3);
        assert_eq!(map[&1700000000002], 5);
    }

    #[test]
    fn duplicate_close_events_resolve_last_write_wins() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.csv");

        append(&path, 42, 7).unwrap();
        append(&path, 42, 8).unwrap();

        assert_eq!(reconcile(&path).unwrap()[&42], 8);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sessions.csv");
        fs::write(&path, "1,2\nnot a line\n,\n3,4\n").unwrap();

        let map = reconcile(&path).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&1], 2);
        assert_eq!(map[&3], 4);
    }

    #[test]
    fn scan_groups_photos_by_embedded_session_id() {
        let dir = tempdir().unwrap();
        for name in [
            "session_100_0.jpg",
            "session_100_1.jpg",
            "session_200_0.jpg",
            "photo_7_20240101.jpg",
            "sessions.csv",
        ] {
            File::create(dir.path().join(name)).unwrap();
        }

        let map = scan_reconstruct(dir.path()).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&100], 2);
        assert_eq!(map[&200], 1);
    }

    #[test]
    fn session_photo_names_round_trip() {
        let name = session_photo_name(1700000000123, 4);
        assert_eq!(name, "session_1700000000123_4.jpg");
        assert_eq!(parse_session_photo(&name), Some((1700000000123, 4)));
        assert_eq!(parse_session_photo("photo_1_20240101.jpg"), None);
    }
}
