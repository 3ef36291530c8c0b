use arbtrie::{Config, Value};
use test_log::test;

/// Spec scenario S3: an ordered set of tickers inserted in their listed
/// (already sorted) order must come back out in that same sorted order
/// forward, and in reverse when walked backward.
#[test]
fn forward_and_reverse_iteration_match_sorted_order() -> arbtrie::Result<()> {
    let dir = tempfile::tempdir()?;
    let db = Config::new(dir.path()).open()?;
    let slot = db.create_root()?;

    let tickers: Vec<String> = ('a'..='y').map(|c| format!("ab{c}")).collect();
    assert_eq!(tickers.len(), 25);

    for ticker in &tickers {
        db.insert(slot, ticker.as_bytes(), Value::Inline(ticker.as_bytes().to_vec()))?;
    }

    let expected: Vec<Vec<u8>> = tickers.iter().map(|t| t.as_bytes().to_vec()).collect();

    let mut forward = db.create_iterator(slot)?;
    assert!(forward.lower_bound(b"aba"));
    let mut seen = Vec::new();
    loop {
        seen.push(forward.key().to_vec());
        if !forward.next() {
            break;
        }
    }
    assert_eq!(seen, expected);

    let mut backward = db.create_iterator(slot)?;
    assert!(backward.reverse_lower_bound(&[0xff]));
    let mut seen_rev = Vec::new();
    loop {
        seen_rev.push(backward.key().to_vec());
        if !backward.prev() {
            break;
        }
    }
    let mut expected_rev = expected;
    expected_rev.reverse();
    assert_eq!(seen_rev, expected_rev);

    Ok(())
}
