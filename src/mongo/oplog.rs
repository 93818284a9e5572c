//! Oplog entry model.
//!
//! Entries come off the `local.oplog.rs` collection shaped as
//! `{ts, op, ns, o, o2?}`. The 64-bit logical position packs the BSON
//! timestamp as `(time << 32) | increment`, matching how the source orders
//! its log.

use mongodb::bson::{Bson, Document, Timestamp};

use crate::{Error, Result};

/// Operation kind carried by a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Insert,
    Update,
    Delete,
    Noop,
    Other,
}

impl OpKind {
    pub fn parse(op: &str) -> OpKind {
        match op {
            "i" => OpKind::Insert,
            "u" => OpKind::Update,
            "d" => OpKind::Delete,
            "n" => OpKind::Noop,
            _ => OpKind::Other,
        }
    }
}

/// One decoded oplog entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Packed logical timestamp.
    pub ts: u64,
    pub op: OpKind,
    /// `<database>.<collection>` the entry applies to.
    pub ns: String,
    /// Full document for insert/replace, modifier object for partial
    /// updates, id-only stub for delete.
    pub doc: Document,
    /// Id stub naming the updated document (`o2`), present on updates.
    pub update_target: Option<Document>,
}

/// What a log entry asks of the target store.
#[derive(Debug, Clone, PartialEq)]
pub enum Action<'a> {
    Insert {
        doc: &'a Document,
        replace: bool,
    },
    Update {
        id: &'a Bson,
        set: Option<&'a Document>,
        unset: Option<&'a Document>,
    },
    Delete {
        id: &'a Bson,
    },
    Skip,
}

impl LogEntry {
    pub fn parse(raw: &Document) -> Result<LogEntry> {
        let ts = raw
            .get_timestamp("ts")
            .map_err(|e| Error::InvalidEntry {
                message: format!("bad ts: {e}"),
            })?;
        let op = raw.get_str("op").map_err(|e| Error::InvalidEntry {
            message: format!("bad op: {e}"),
        })?;
        Ok(LogEntry {
            ts: pack_timestamp(ts),
            op: OpKind::parse(op),
            ns: raw.get_str("ns").unwrap_or_default().to_string(),
            doc: raw.get_document("o").cloned().unwrap_or_default(),
            update_target: raw.get_document("o2").ok().cloned(),
        })
    }

    /// Classifies this entry against the definition's id field.
    ///
    /// An update carrying `$set`/`$unset` translates to a partial update; an
    /// update without them is a full-document replace. Delivery order is the
    /// caller's responsibility: actions on the same key must be applied in
    /// the order their entries were read.
    pub fn action(&self, id_field: &str) -> Result<Action<'_>> {
        match self.op {
            OpKind::Insert => Ok(Action::Insert {
                doc: &self.doc,
                replace: false,
            }),
            OpKind::Update => {
                let set = self.doc.get_document("$set").ok();
                let unset = self.doc.get_document("$unset").ok();
                if set.is_none() && unset.is_none() {
                    // Full-document replace; replay-safe by construction.
                    return Ok(Action::Insert {
                        doc: &self.doc,
                        replace: true,
                    });
                }
                let id = self
                    .update_target
                    .as_ref()
                    .and_then(|target| target.get(id_field))
                    .ok_or_else(|| Error::InvalidEntry {
                        message: format!("update entry carries no {id_field} target"),
                    })?;
                Ok(Action::Update { id, set, unset })
            }
            OpKind::Delete => {
                let id = self.doc.get(id_field).ok_or_else(|| Error::InvalidEntry {
                    message: format!("delete entry carries no {id_field}"),
                })?;
                Ok(Action::Delete { id })
            }
            OpKind::Noop | OpKind::Other => Ok(Action::Skip),
        }
    }
}

/// Packs a BSON timestamp into the 64-bit position the checkpoint stores.
pub fn pack_timestamp(ts: Timestamp) -> u64 {
    ((ts.time as u64) << 32) | ts.increment as u64
}

/// Inverse of [`pack_timestamp`], for building cursor filters.
pub fn unpack_timestamp(ts: u64) -> Timestamp {
    Timestamp {
        time: (ts >> 32) as u32,
        increment: (ts & 0xffff_ffff) as u32,
    }
}

/// Whether an entry delivered by the cursor is a replay that must not be
/// reprocessed: a no-op, or the inclusive boundary entry whose timestamp
/// equals the current checkpoint.
pub fn should_skip(entry: &LogEntry, checkpoint: u64) -> bool {
    entry.op == OpKind::Noop || entry.ts == checkpoint
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    fn ts(time: u32, increment: u32) -> Timestamp {
        Timestamp { time, increment }
    }

    #[test]
    fn timestamp_packing_round_trips() {
        let original = ts(1_700_000_000, 7);
        let packed = pack_timestamp(original);
        assert_eq!(packed, (1_700_000_000u64 << 32) | 7);
        assert_eq!(unpack_timestamp(packed), original);
    }

    #[test]
    fn packing_preserves_log_order() {
        assert!(pack_timestamp(ts(10, 2)) < pack_timestamp(ts(10, 3)));
        assert!(pack_timestamp(ts(10, 9)) < pack_timestamp(ts(11, 0)));
    }

    #[test]
    fn parses_insert_entry() {
        let raw = doc! {
            "ts": ts(100, 1),
            "op": "i",
            "ns": "app.users",
            "o": { "_id": "u1", "name": "Ann" },
        };
        let entry = LogEntry::parse(&raw).unwrap();
        assert_eq!(entry.op, OpKind::Insert);
        assert_eq!(entry.ns, "app.users");
        assert_eq!(entry.ts, pack_timestamp(ts(100, 1)));
        assert_eq!(entry.update_target, None);
    }

    #[test]
    fn entry_without_ts_is_invalid() {
        let raw = doc! { "op": "i", "ns": "app.users", "o": {} };
        assert!(LogEntry::parse(&raw).is_err());
    }

    #[test]
    fn insert_classifies_as_plain_insert() {
        let raw = doc! { "ts": ts(1, 1), "op": "i", "ns": "app.users", "o": { "_id": "u1" } };
        let entry = LogEntry::parse(&raw).unwrap();
        match entry.action("_id").unwrap() {
            Action::Insert { replace, .. } => assert!(!replace),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn modifier_update_classifies_as_partial_update() {
        let raw = doc! {
            "ts": ts(1, 2),
            "op": "u",
            "ns": "app.users",
            "o": { "$set": { "age": 31 } },
            "o2": { "_id": "u1" },
        };
        let entry = LogEntry::parse(&raw).unwrap();
        match entry.action("_id").unwrap() {
            Action::Update { id, set, unset } => {
                assert_eq!(id, &Bson::String("u1".to_string()));
                assert_eq!(set.unwrap().get_i32("age").unwrap(), 31);
                assert!(unset.is_none());
            }
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn bare_update_classifies_as_replace() {
        let raw = doc! {
            "ts": ts(1, 3),
            "op": "u",
            "ns": "app.users",
            "o": { "_id": "u1", "name": "Ann", "age": 31 },
            "o2": { "_id": "u1" },
        };
        let entry = LogEntry::parse(&raw).unwrap();
        match entry.action("_id").unwrap() {
            Action::Insert { replace, .. } => assert!(replace),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn delete_classifies_with_id_from_payload() {
        let raw = doc! { "ts": ts(1, 4), "op": "d", "ns": "app.users", "o": { "_id": "u1" } };
        let entry = LogEntry::parse(&raw).unwrap();
        match entry.action("_id").unwrap() {
            Action::Delete { id } => assert_eq!(id, &Bson::String("u1".to_string())),
            other => panic!("unexpected action: {other:?}"),
        }
    }

    #[test]
    fn modifier_update_without_target_is_invalid() {
        let raw = doc! {
            "ts": ts(1, 5),
            "op": "u",
            "ns": "app.users",
            "o": { "$set": { "age": 31 } },
        };
        let entry = LogEntry::parse(&raw).unwrap();
        assert!(entry.action("_id").is_err());
    }

    #[test]
    fn noop_and_boundary_entries_are_skipped() {
        let noop = LogEntry::parse(&doc! { "ts": ts(5, 0), "op": "n", "ns": "", "o": {} }).unwrap();
        assert!(should_skip(&noop, 0));

        let boundary =
            LogEntry::parse(&doc! { "ts": ts(5, 1), "op": "i", "ns": "app.users", "o": {} })
                .unwrap();
        let checkpoint = pack_timestamp(ts(5, 1));
        assert!(should_skip(&boundary, checkpoint));
        assert!(!should_skip(&boundary, checkpoint - 1));
    }

    #[test]
    fn replayed_entries_classify_identically() {
        let raw = doc! {
            "ts": ts(9, 1),
            "op": "u",
            "ns": "app.users",
            "o": { "$set": { "age": 31 } },
            "o2": { "_id": "u1" },
        };
        let entry = LogEntry::parse(&raw).unwrap();
        assert_eq!(entry.action("_id").unwrap(), entry.action("_id").unwrap());
    }
}
