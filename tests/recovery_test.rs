use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use araldb::common::types::{Rid, Tuple, INVALID_PAGE_ID, PAGE_SIZE};
use araldb::storage::page::table_page;
use araldb::{
    BPlusTree, BufferPoolManager, DiskManager, LockManager, LogManager, LogRecovery,
    StorageConfig, TransactionManager,
};

mod common;
use common::{create_temp_db_file, reopen_engine};

fn logged_stack(
    path: &str,
    pool_size: usize,
) -> Result<(Arc<DiskManager>, Arc<LogManager>, Arc<BufferPoolManager>, TransactionManager)> {
    let config = StorageConfig {
        pool_size,
        bucket_size: pool_size,
        log_buffer_size: PAGE_SIZE,
        log_timeout: Duration::from_millis(50),
        strict_two_phase: true,
    };
    let disk = Arc::new(DiskManager::new(path)?);
    let log = LogManager::with_config(Arc::clone(&disk), &config);
    let buffer_pool = Arc::new(BufferPoolManager::with_config(
        &config,
        Arc::clone(&disk),
        Some(Arc::clone(&log)),
    ));
    let txn_manager = TransactionManager::new(
        Some(Arc::clone(&log)),
        Arc::new(LockManager::with_config(&config)),
    );
    Ok((disk, log, buffer_pool, txn_manager))
}

#[test]
fn test_index_survives_restart_with_redo() -> Result<()> {
    let (_file, path) = create_temp_db_file()?;

    // Build a small index and flush it, then drop the whole engine.
    {
        let (_disk, buffer_pool) = reopen_engine(&path, 16)?;
        let tree = BPlusTree::<i64>::new(Arc::clone(&buffer_pool))?;
        for key in [1i64, 2, 3] {
            assert!(tree.insert(key, Rid::new(10, key as u32))?);
        }
        buffer_pool.flush_all_pages()?;
    }

    // Restart: replay whatever the log holds (nothing for index pages),
    // then the tree must come back through its header page.
    let (disk, buffer_pool) = reopen_engine(&path, 16)?;
    let mut recovery = LogRecovery::new(disk, Arc::clone(&buffer_pool), PAGE_SIZE);
    recovery.redo()?;
    recovery.undo()?;

    let tree = BPlusTree::<i64>::new(Arc::clone(&buffer_pool))?;
    assert_eq!(tree.get(&2)?, Some(Rid::new(10, 2)));
    assert_eq!(tree.get(&4)?, None);
    Ok(())
}

#[test]
fn test_committed_insert_redone_after_crash() -> Result<()> {
    let (_file, path) = create_temp_db_file()?;
    let page_id;
    {
        let (_disk, log, buffer_pool, txn_manager) = logged_stack(&path, 8)?;
        let mut txn = txn_manager.begin();

        // Allocate and format a table page, logging each step and
        // stamping the page with the record LSNs.
        let (page, id) = buffer_pool.new_page()?;
        page_id = id;
        let lsn = txn.log_new_page(page_id);
        {
            let mut guard = page.write();
            table_page::init(&mut guard, page_id, INVALID_PAGE_ID);
            guard.set_lsn(lsn);
        }

        let tuple = Tuple::from_bytes(b"committed row");
        let rid = {
            let mut guard = page.write();
            let rid = table_page::insert_tuple(&mut guard, &tuple)?;
            let lsn = txn.log_insert(rid, &tuple);
            guard.set_lsn(lsn);
            rid
        };
        assert_eq!(rid, Rid::new(page_id, 0));
        buffer_pool.unpin_page(page_id, true)?;

        // Commit forces the log; the page itself is never flushed, which
        // is the crash this test simulates.
        txn_manager.commit(&mut txn);
        log.shutdown();
    }

    let (disk, buffer_pool) = reopen_engine(&path, 8)?;
    let mut recovery = LogRecovery::new(disk, Arc::clone(&buffer_pool), PAGE_SIZE);
    recovery.redo()?;
    assert!(recovery.active_transactions().is_empty());
    recovery.undo()?;

    let page = buffer_pool.fetch_page(page_id)?;
    let tuple = table_page::get_tuple(&page.read(), 0)?;
    assert_eq!(tuple.data(), b"committed row");
    drop(page);
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_uncommitted_insert_undone_after_crash() -> Result<()> {
    let (_file, path) = create_temp_db_file()?;
    let page_id;
    {
        let (_disk, log, buffer_pool, txn_manager) = logged_stack(&path, 8)?;
        let mut txn = txn_manager.begin();

        let (page, id) = buffer_pool.new_page()?;
        page_id = id;
        let lsn = txn.log_new_page(page_id);
        {
            let mut guard = page.write();
            table_page::init(&mut guard, page_id, INVALID_PAGE_ID);
            guard.set_lsn(lsn);
        }

        let tuple = Tuple::from_bytes(b"42");
        {
            let mut guard = page.write();
            let rid = table_page::insert_tuple(&mut guard, &tuple)?;
            let lsn = txn.log_insert(rid, &tuple);
            guard.set_lsn(lsn);
        }
        buffer_pool.unpin_page(page_id, true)?;

        // No commit. Flush the data page (the WAL rule pushes the log
        // first), then crash.
        buffer_pool.flush_page(page_id)?;
        log.shutdown();
    }

    let (disk, buffer_pool) = reopen_engine(&path, 8)?;
    let mut recovery = LogRecovery::new(disk, Arc::clone(&buffer_pool), PAGE_SIZE);
    recovery.redo()?;
    assert_eq!(recovery.active_transactions().len(), 1);
    recovery.undo()?;

    // The loser's insert is gone.
    let page = buffer_pool.fetch_page(page_id)?;
    assert!(table_page::get_tuple(&page.read(), 0).is_err());
    drop(page);
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_update_and_delete_round_trip_through_recovery() -> Result<()> {
    let (_file, path) = create_temp_db_file()?;
    let page_id;
    {
        let (_disk, log, buffer_pool, txn_manager) = logged_stack(&path, 8)?;

        // A committed transaction inserts two rows and updates one.
        let mut t1 = txn_manager.begin();
        let (page, id) = buffer_pool.new_page()?;
        page_id = id;
        let lsn = t1.log_new_page(page_id);
        {
            let mut guard = page.write();
            table_page::init(&mut guard, page_id, INVALID_PAGE_ID);
            guard.set_lsn(lsn);

            for text in [&b"first"[..], &b"second"[..]] {
                let tuple = Tuple::from_bytes(text);
                let rid = table_page::insert_tuple(&mut guard, &tuple)?;
                let lsn = t1.log_insert(rid, &tuple);
                guard.set_lsn(lsn);
            }

            let old = table_page::get_tuple(&guard, 0)?;
            let new = Tuple::from_bytes(b"first-v2");
            table_page::update_tuple(&mut guard, 0, &new)?;
            let lsn = t1.log_update(Rid::new(page_id, 0), &old, &new);
            guard.set_lsn(lsn);
        }
        buffer_pool.unpin_page(page_id, true)?;
        txn_manager.commit(&mut t1);

        // A loser transaction mark-deletes the second row.
        let mut t2 = txn_manager.begin();
        {
            let page = buffer_pool.fetch_page(page_id)?;
            let mut guard = page.write();
            let victim = table_page::get_tuple(&guard, 1)?;
            table_page::mark_delete(&mut guard, 1)?;
            let lsn = t2.log_mark_delete(Rid::new(page_id, 1), &victim);
            guard.set_lsn(lsn);
        }
        buffer_pool.unpin_page(page_id, true)?;
        buffer_pool.flush_page(page_id)?;
        log.force_flush();
        log.shutdown();
        // Crash before t2 resolves.
    }

    let (disk, buffer_pool) = reopen_engine(&path, 8)?;
    let mut recovery = LogRecovery::new(disk, Arc::clone(&buffer_pool), PAGE_SIZE);
    recovery.redo()?;
    recovery.undo()?;

    let page = buffer_pool.fetch_page(page_id)?;
    let guard = page.read();
    // The committed update survives; the loser's mark-delete is rolled
    // back so the second row is visible again.
    assert_eq!(table_page::get_tuple(&guard, 0)?.data(), b"first-v2");
    assert_eq!(table_page::get_tuple(&guard, 1)?.data(), b"second");
    drop(guard);
    drop(page);
    buffer_pool.unpin_page(page_id, false)?;
    Ok(())
}

#[test]
fn test_flush_enforces_write_ahead_rule() -> Result<()> {
    let (_file, path) = create_temp_db_file()?;
    let (_disk, log, buffer_pool, txn_manager) = logged_stack(&path, 8)?;

    let mut txn = txn_manager.begin();
    let (page, page_id) = buffer_pool.new_page()?;
    let lsn = txn.log_new_page(page_id);
    {
        let mut guard = page.write();
        table_page::init(&mut guard, page_id, INVALID_PAGE_ID);
        guard.set_lsn(lsn);
    }
    buffer_pool.unpin_page(page_id, true)?;

    // The page carries an LSN the log may not have persisted yet;
    // flushing the page must first push the log past it.
    buffer_pool.flush_page(page_id)?;
    assert!(log.persistent_lsn() >= lsn);

    txn_manager.commit(&mut txn);
    Ok(())
}
