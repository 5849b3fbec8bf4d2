// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use cid::Cid;
use multihash_codetable::{Code, MultihashDigest};

use crate::db::SectorStore;
use crate::sector::{Piece, RegisteredSealProof, SealedRef, SectorInfo, SectorLog, SectorState};

pub fn sample_sector(id: u64) -> SectorInfo {
    let mut info = SectorInfo::new(
        id,
        RegisteredSealProof::StackedDrg2KiBV1,
        vec![Piece {
            key: format!("piece-{id}"),
            deal_id: Some(id * 10),
            size: 1016,
        }],
    );
    info.state = SectorState::PreCommitting;
    info.comm_d = Some(vec![1; 32]);
    info.precommit_message = Some(Cid::new_v1(0x71, Code::Blake2b256.digest(b"precommit")));
    info.log.push(SectorLog::new("event;Start", "Empty -> Packing", ""));
    info
}

pub fn get_missing<DB>(db: &DB)
where
    DB: SectorStore,
{
    assert_eq!(db.get(42).unwrap(), None);
}

pub fn put_get<DB>(db: &DB)
where
    DB: SectorStore,
{
    let info = sample_sector(1);
    db.put(&info).unwrap();
    assert_eq!(db.get(1).unwrap(), Some(info.clone()));

    // full overwrite
    let mut updated = info;
    updated.state = SectorState::WaitSeed;
    updated.comm_r = Some(vec![2; 32]);
    db.put(&updated).unwrap();
    db.put(&updated).unwrap();
    assert_eq!(db.get(1).unwrap(), Some(updated));
}

pub fn list_sorted<DB>(db: &DB)
where
    DB: SectorStore,
{
    for id in [300, 7, 1 << 40, 9] {
        db.put(&sample_sector(id)).unwrap();
    }
    assert_eq!(db.list().unwrap(), vec![7, 9, 300, 1 << 40]);
}

pub fn append_log<DB>(db: &DB)
where
    DB: SectorStore,
{
    db.put(&sample_sector(5)).unwrap();
    db.append_log(5, SectorLog::new("note", "first", "")).unwrap();
    db.append_log(5, SectorLog::new("note", "second", "")).unwrap();

    let messages: Vec<_> = db
        .get(5)
        .unwrap()
        .unwrap()
        .log
        .into_iter()
        .map(|entry| entry.message)
        .collect();
    assert_eq!(messages, ["Empty -> Packing", "first", "second"]);

    assert!(db.append_log(6, SectorLog::new("note", "orphan", "")).is_err());
}

pub fn put_merged_keeps_appended_entries<DB>(db: &DB)
where
    DB: SectorStore,
{
    let mut info = sample_sector(3);
    db.put(&info).unwrap();
    let seen = info.log.len();
    db.append_log(3, SectorLog::new("note", "operator", "")).unwrap();

    // the writer's copy does not know about the note
    info.state = SectorState::WaitSeed;
    info.log.push(SectorLog::new("event;PreCommitLanded", "landed", ""));
    let written = db.put_merged(&info, seen).unwrap();

    let messages: Vec<_> = written.log.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, ["Empty -> Packing", "operator", "landed"]);
    assert_eq!(written.state, SectorState::WaitSeed);
    assert_eq!(db.get(3).unwrap(), Some(written.clone()));

    // nothing new in the store: the writer's record goes in as is
    let mut again = written;
    again.log.push(SectorLog::new("event;TaskDispatched", "dispatched", ""));
    let seen = again.log.len() - 1;
    assert_eq!(db.put_merged(&again, seen).unwrap(), again);

    // a first write has nothing to merge with
    let fresh = sample_sector(4);
    assert_eq!(db.put_merged(&fresh, 0).unwrap(), fresh);
}

pub fn concurrent_append_log<DB>(db: &DB)
where
    DB: SectorStore,
{
    db.put(&sample_sector(8)).unwrap();
    std::thread::scope(|s| {
        for t in 0..4 {
            s.spawn(move || {
                for i in 0..25 {
                    db.append_log(8, SectorLog::new("note", format!("{t}-{i}"), ""))
                        .unwrap();
                }
            });
        }
    });

    let log = db.get(8).unwrap().unwrap().log;
    assert_eq!(log.len(), 101);
    // per-writer order is preserved
    for t in 0..4 {
        let prefix = format!("{t}-");
        let mine: Vec<_> = log
            .iter()
            .filter_map(|e| e.message.strip_prefix(&prefix))
            .map(|i| i.parse::<u32>().unwrap())
            .collect();
        assert_eq!(mine, (0..25).collect::<Vec<_>>());
    }
}

pub fn refs_idempotent<DB>(db: &DB)
where
    DB: SectorStore,
{
    let a = SealedRef {
        sector_id: 1,
        offset: 0,
        size: 127,
    };
    let b = SealedRef {
        sector_id: 2,
        offset: 127,
        size: 127,
    };
    db.add_refs(&[("piece".into(), a)]).unwrap();
    db.add_refs(&[("piece".into(), a), ("piece".into(), b)]).unwrap();
    db.add_refs(&[("other".into(), b)]).unwrap();

    let refs = db.refs().unwrap();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs["piece"], vec![a, b]);
    assert_eq!(refs["other"], vec![b]);
}
