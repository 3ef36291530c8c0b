use arbtrie::{Config, Value};
use test_log::test;

/// Spec scenario S4: embedding one tree as a subtree value inside another
/// keeps the embedded root alive by refcount, independent of the parent
/// entry that references it.
#[test]
fn subtree_value_outlives_its_parent_entry() -> arbtrie::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Config::new(dir.path()).open()?;

    let root_a = db.create_root()?;
    db.insert(root_a, b"x", Value::Inline(b"1".to_vec()))?;

    let root_b = db.create_root()?;
    let a_id = db.get_root(root_a)?;
    db.insert(root_b, b"sub", Value::Subtree(a_id))?;

    assert_eq!(db.get(root_a, b"x")?, Some(Value::Inline(b"1".to_vec())));

    db.remove(root_b, b"sub")?;

    // `root_a`'s own slot still holds its own reference; it must still be
    // fully readable after the embedding in `root_b` was dropped.
    assert_eq!(db.get(root_a, b"x")?, Some(Value::Inline(b"1".to_vec())));

    Ok(())
}
