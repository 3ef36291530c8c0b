use arbtrie::{Config, Value};
use test_log::test;

/// Spec scenario S6, scaled down from the spec's 1,000,000 keys: a clean
/// close followed by reopen must resolve every original key, and reopening
/// again without a clean shutdown marker must still rebuild identically via
/// the from-scratch reachability walk (meta words never persist, so this
/// store always revalidates on open regardless of `clean_shutdown`).
#[test]
fn clean_close_then_reopen_resolves_every_key() -> arbtrie::Result<()> {
    let dir = tempfile::tempdir()?;

    let keys: Vec<[u8; 8]> = (0u64..2000).map(|i| (i.wrapping_mul(0x9E3779B97F4A7C15)).to_be_bytes()).collect();
    let slot;
    {
        let db = Config::new(dir.path()).open()?;
        slot = db.create_root()?;
        for key in &keys {
            db.upsert(slot, key, Value::Inline(key.to_vec()))?;
        }
        assert_eq!(db.count_keys(slot, &[0u8; 8], &[0xff; 8])?, keys.len() as u64);
        db.close()?;
    }

    let reopened = Config::new(dir.path()).open()?;
    assert_eq!(reopened.last_recovery().roots_validated, 1);
    assert_eq!(reopened.count_keys(slot, &[0u8; 8], &[0xff; 8])?, keys.len() as u64);
    for key in &keys {
        assert_eq!(reopened.get(slot, key)?, Some(Value::Inline(key.to_vec())));
    }

    Ok(())
}

/// Reopening a store that was never cleanly closed must still fully rebuild
/// its meta words and report the same reachable state: under the in-memory
/// only meta-word design, recovery runs unconditionally on every open.
#[test]
fn unclean_reopen_rebuilds_identical_state() -> arbtrie::Result<()> {
    let dir = tempfile::tempdir()?;

    let keys: Vec<[u8; 8]> = (0u64..500).map(|i| (i.wrapping_mul(0x9E3779B97F4A7C15)).to_be_bytes()).collect();
    let slot;
    {
        let db = Config::new(dir.path()).open()?;
        slot = db.create_root()?;
        for key in &keys {
            db.upsert(slot, key, Value::Inline(key.to_vec()))?;
        }
        db.sync(false)?;
        // Dropped without calling `close`: the header's `clean_shutdown`
        // flag stays false.
    }

    let reopened = Config::new(dir.path()).open()?;
    assert_eq!(reopened.last_recovery().roots_validated, 1);
    assert_eq!(reopened.last_recovery().cleared_locks, 0);
    for key in &keys {
        assert_eq!(reopened.get(slot, key)?, Some(Value::Inline(key.to_vec())));
    }

    Ok(())
}
