use arbtrie::{Config, Value};
use test_log::test;

/// Spec scenario S2: repeatedly inserting siblings under a shared prefix
/// eventually forces a binary bucket to refactor into an inner node, and
/// every key inserted so far must stay readable across that refactor.
#[test]
fn refactor_on_overflow_preserves_all_prior_keys() -> arbtrie::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Config::new(dir.path()).open()?;
    let slot = db.create_root()?;

    let keys: Vec<String> = ('a'..='z').map(|c| format!("ab{c}")).collect();
    for (i, key) in keys.iter().enumerate() {
        db.insert(slot, key.as_bytes(), Value::Inline(key.as_bytes().to_vec()))?;
        for prior in &keys[..=i] {
            assert_eq!(db.get(slot, prior.as_bytes())?, Some(Value::Inline(prior.as_bytes().to_vec())), "key {prior} lost after inserting {key}");
        }
    }

    assert_eq!(db.count_keys(slot, b"", &[0xff])?, 26);
    Ok(())
}
