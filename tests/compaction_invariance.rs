use arbtrie::{Config, Value};
use test_log::test;

/// Spec scenario S5: running the compactor against a store with mostly-empty
/// segments must not change what any surviving key reads back as.
#[test]
fn compaction_preserves_every_surviving_key() -> arbtrie::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Config::new(dir.path())
        .segment_size(4096)
        .max_segment_count(64)
        .compaction_min_emptiness(0.1)
        .open()?;
    let slot = db.create_root()?;

    let keys: Vec<Vec<u8>> = (0u16..80).map(|i| i.to_be_bytes().to_vec()).collect();
    for key in &keys {
        db.insert(slot, key, Value::Inline(vec![0xCD; 24]))?;
    }

    // Remove most of them so several segments fall well below the
    // configured emptiness threshold, without emptying the tree entirely.
    for key in &keys[..60] {
        db.remove(slot, key)?;
    }

    for key in &keys[60..] {
        assert_eq!(db.get(slot, key)?, Some(Value::Inline(vec![0xCD; 24])));
    }

    let mut compacted_any = false;
    for _ in 0..64 {
        if db.compact_next_segment()? {
            compacted_any = true;
        }
    }
    assert!(compacted_any, "at least one near-empty segment should have been evacuated");

    for key in &keys[60..] {
        assert_eq!(db.get(slot, key)?, Some(Value::Inline(vec![0xCD; 24])), "surviving key lost across compaction");
    }
    for key in &keys[..60] {
        assert_eq!(db.get(slot, key)?, None);
    }

    Ok(())
}
