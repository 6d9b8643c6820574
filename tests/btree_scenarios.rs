use scoutbtree::{BtreeConfig, Error, IntKey, MemDevice, Result};
use test_log::test;

fn open(block_size: u16) -> scoutbtree::Btree<IntKey, MemDevice> {
    BtreeConfig::new(MemDevice::new(block_size))
        .block_size(block_size)
        .open()
        .expect("open")
}

#[test]
fn scenario_1_small_insert_then_ordered_scan() -> Result<()> {
    let tree = open(4096);

    let txn = tree.begin_write();
    tree.insert(&txn, &IntKey(1), b"aaaa")?;
    tree.insert(&txn, &IntKey(2), b"bbbb")?;
    tree.insert(&txn, &IntKey(3), b"cccc")?;
    txn.commit()?;

    let items: Vec<_> = tree
        .range(IntKey(0), IntKey::MAX)
        .collect::<Result<Vec<_>>>()?;
    let got: Vec<(u64, Vec<u8>)> = items.into_iter().map(|i| (i.key.0, i.val)).collect();
    assert_eq!(
        got,
        vec![
            (1, b"aaaa".to_vec()),
            (2, b"bbbb".to_vec()),
            (3, b"cccc".to_vec()),
        ]
    );
    assert_eq!(tree.height(), 1);
    Ok(())
}

#[test]
fn scenario_2_enough_inserts_to_split_a_leaf() -> Result<()> {
    let tree = open(4096);
    let n = 400u64;

    let txn = tree.begin_write();
    for k in 1..=n {
        tree.insert(&txn, &IntKey(k), b"aaaa")?;
    }
    txn.commit()?;

    assert_eq!(tree.height(), 2);
    for k in 1..=n {
        let (_, val) = tree.lookup(&IntKey(k))?;
        assert_eq!(val, b"aaaa");
    }

    let items: Vec<_> = tree
        .range(IntKey(0), IntKey::MAX)
        .collect::<Result<Vec<_>>>()?;
    let keys: Vec<u64> = items.iter().map(|i| i.key.0).collect();
    let expected: Vec<u64> = (1..=n).collect();
    assert_eq!(keys, expected);
    Ok(())
}

#[test]
fn scenario_3_delete_down_to_one_leaf_frees_blocks_and_shrinks() -> Result<()> {
    let tree = open(4096);
    let n = 400u64;

    let txn = tree.begin_write();
    for k in 1..=n {
        tree.insert(&txn, &IntKey(k), b"aaaa")?;
    }
    txn.commit()?;
    assert_eq!(tree.height(), 2);

    let txn = tree.begin_write();
    for k in (2..=n).step_by(2) {
        tree.delete(&txn, &IntKey(k))?;
    }
    txn.commit()?;

    for k in (2..=n).step_by(2) {
        assert!(matches!(tree.lookup(&IntKey(k)), Err(Error::NotFound)));
    }
    for k in (1..=n).step_by(2) {
        tree.lookup(&IntKey(k))?;
    }

    let txn = tree.begin_write();
    for k in (1..=n).step_by(2) {
        tree.delete(&txn, &IntKey(k))?;
    }
    txn.commit()?;

    assert!(tree.is_empty());
    assert_eq!(tree.height(), 0);
    for k in 1..=n {
        assert!(matches!(tree.lookup(&IntKey(k)), Err(Error::NotFound)));
    }
    Ok(())
}

#[test]
fn scenario_4_dirty_then_update_within_same_txn() -> Result<()> {
    let tree = open(4096);

    let setup = tree.begin_write();
    tree.insert(&setup, &IntKey(42), b"small")?;
    setup.commit()?;

    let txn = tree.begin_write();
    tree.dirty(&txn, &IntKey(42))?;
    // interleaved read, unrelated to the dirtied key
    let _ = tree.lookup(&IntKey(42))?;
    let big_val = vec![7u8; 32];
    tree.update(&txn, &IntKey(42), &big_val)?;
    let txn_seq = txn.seq();
    txn.commit()?;

    let (seq, val) = tree.lookup(&IntKey(42))?;
    assert_eq!(val, big_val);
    assert_eq!(seq, txn_seq);
    Ok(())
}

#[test]
fn scenario_5_since_filters_by_seq_after_a_delete_and_reinsert() -> Result<()> {
    let tree = open(4096);

    let txn1 = tree.begin_write();
    for k in 1..=100u64 {
        tree.insert(&txn1, &IntKey(k), b"v")?;
    }
    let seq1 = txn1.seq();
    txn1.commit()?;

    let txn2 = tree.begin_write();
    tree.delete(&txn2, &IntKey(50))?;
    tree.insert(&txn2, &IntKey(50), b"v2")?;
    let seq2 = txn2.seq();
    txn2.commit()?;

    let since_after: Vec<u64> = tree
        .since(IntKey(1), IntKey(100), seq2)
        .map(|i| i.unwrap().key.0)
        .collect();
    assert_eq!(since_after, vec![50]);

    let since_before: Vec<u64> = tree
        .since(IntKey(1), IntKey(100), seq1)
        .map(|i| i.unwrap().key.0)
        .collect();
    assert_eq!(since_before.len(), 100);
    Ok(())
}

#[test]
fn scenario_6_hole_scan() -> Result<()> {
    let tree = open(4096);

    let txn = tree.begin_write();
    for k in [1u64, 2, 4, 5] {
        tree.insert(&txn, &IntKey(k), b"x")?;
    }
    txn.commit()?;
    assert_eq!(tree.hole(IntKey(1), IntKey(5))?, IntKey(3));

    let txn = tree.begin_write();
    tree.insert(&txn, &IntKey(3), b"x")?;
    txn.commit()?;
    assert!(matches!(
        tree.hole(IntKey(1), IntKey(5)),
        Err(Error::NoSpace)
    ));
    Ok(())
}

#[test]
fn insert_existing_key_fails_and_leaves_value_untouched() -> Result<()> {
    let tree = open(4096);
    let txn = tree.begin_write();
    tree.insert(&txn, &IntKey(1), b"first")?;
    let err = tree.insert(&txn, &IntKey(1), b"second").unwrap_err();
    assert!(matches!(err, Error::Exists));
    txn.commit()?;

    let (_, val) = tree.lookup(&IntKey(1))?;
    assert_eq!(val, b"first");
    Ok(())
}

#[test]
fn insert_then_delete_then_lookup_not_found() -> Result<()> {
    let tree = open(4096);
    let txn = tree.begin_write();
    tree.insert(&txn, &IntKey(9), b"v")?;
    txn.commit()?;

    let txn = tree.begin_write();
    tree.delete(&txn, &IntKey(9))?;
    txn.commit()?;

    assert!(matches!(tree.lookup(&IntKey(9)), Err(Error::NotFound)));
    Ok(())
}
