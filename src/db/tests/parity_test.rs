// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::{db_utils::parity::TempParityDB, subtests};
use crate::db::{SectorStore, parity_db::ParityDb, parity_db_config::ParityDbConfig};
use crate::sector::SectorLog;

#[test]
fn db_get_missing() {
    let db = TempParityDB::new();
    subtests::get_missing(&*db);
}

#[test]
fn db_put_get() {
    let db = TempParityDB::new();
    subtests::put_get(&*db);
}

#[test]
fn db_list_sorted() {
    let db = TempParityDB::new();
    subtests::list_sorted(&*db);
}

#[test]
fn db_append_log() {
    let db = TempParityDB::new();
    subtests::append_log(&*db);
}

#[test]
fn db_put_merged_keeps_appended_entries() {
    let db = TempParityDB::new();
    subtests::put_merged_keeps_appended_entries(&*db);
}

#[test]
fn db_concurrent_append_log() {
    let db = TempParityDB::new();
    subtests::concurrent_append_log(&*db);
}

#[test]
fn db_refs_idempotent() {
    let db = TempParityDB::new();
    subtests::refs_idempotent(&*db);
}

#[test]
fn db_record_survives_reopen() {
    let mut db = TempParityDB::new();
    let mut info = subtests::sample_sector(12);
    info.log.push(SectorLog::new("event;TaskDone", "Packing -> Unsealed", ""));
    db.put(&info).unwrap();
    db.append_log(12, SectorLog::new("note", "after put", "")).unwrap();
    info = db.get(12).unwrap().unwrap();

    db.reopen();

    assert_eq!(db.get(12).unwrap(), Some(info));
    assert_eq!(db.list().unwrap(), vec![12]);
}

#[test]
fn db_statistics() {
    let dir = tempfile::tempdir().unwrap();
    let config = ParityDbConfig {
        enable_statistics: true,
        ..Default::default()
    };
    let db = ParityDb::open(dir.path().join("stats"), &config).unwrap();
    assert!(db.statistics().is_some());

    let db = TempParityDB::new();
    assert!(db.statistics().is_none());
}
