//! Merging the local and remote views of the board.
//!
//! This is last-writer-wins by source, not a CRDT: when both batches hold
//! the same id the remote copy is taken as-is. Two devices editing the same
//! photo resolve to whichever remote state arrived last.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use snapboard_shared::{sort_newest_first, PhotoId, PhotoRecord};

/// One record per id, remote copies replacing local ones, newest first.
pub fn merge(remote: &[PhotoRecord], local: &[PhotoRecord]) -> Vec<PhotoRecord> {
    let mut by_id: HashMap<PhotoId, &PhotoRecord> = HashMap::with_capacity(remote.len() + local.len());
    for record in local.iter().chain(remote) {
        by_id.insert(record.id, record);
    }

    let mut merged: Vec<PhotoRecord> = by_id.into_values().cloned().collect();
    sort_newest_first(&mut merged);
    merged
}

/// Drop records that fell out of the retention window.
pub fn without_expired(
    records: Vec<PhotoRecord>,
    now: DateTime<Utc>,
    retention: Duration,
) -> Vec<PhotoRecord> {
    records
        .into_iter()
        .filter(|r| !r.is_expired(now, retention))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use snapboard_shared::ImageLocation;

    fn photo(secs: i64) -> PhotoRecord {
        PhotoRecord::capture(
            ImageLocation::Inline("data:image/png;base64,AA==".into()),
            Utc.timestamp_opt(secs, 0).unwrap(),
        )
    }

    #[test]
    fn remote_copy_wins_on_shared_id() {
        let local = photo(10);
        let mut remote = local.clone();
        remote.image = ImageLocation::Remote("https://cdn/public/x.png".into());
        remote.caption = "Remote caption".into();

        let merged = merge(&[remote.clone()], &[local]);
        assert_eq!(merged, vec![remote]);
    }

    #[test]
    fn result_has_one_record_per_id_newest_first() {
        let a = photo(1);
        let b = photo(2);
        let c = photo(3);
        let remote = vec![a.clone(), c.clone()];
        let local = vec![b.clone(), a.clone(), a.clone()];

        let merged = merge(&remote, &local);
        let ids: Vec<PhotoId> = merged.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c.id, b.id, a.id]);

        for pair in merged.windows(2) {
            assert!(pair[0].timestamp >= pair[1].timestamp);
        }
    }

    #[test]
    fn merge_is_deterministic() {
        let remote: Vec<PhotoRecord> = (0..20).map(photo).collect();
        let local: Vec<PhotoRecord> = (10..30).map(photo).collect();

        assert_eq!(merge(&remote, &local), merge(&remote, &local));
    }

    #[test]
    fn same_second_captures_are_both_kept() {
        let a = photo(5);
        let b = photo(5);
        let merged = merge(&[a.clone()], &[b.clone()]);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn expired_records_are_dropped() {
        let now = Utc.timestamp_opt(100 * 3600, 0).unwrap();
        let fresh = photo(99 * 3600);
        let stale = photo(0);
        let mut legacy = photo(0);
        legacy.timestamp = None;

        let kept = without_expired(vec![fresh.clone(), stale, legacy.clone()], now, Duration::hours(24));
        assert_eq!(kept, vec![fresh, legacy]);
    }
}
