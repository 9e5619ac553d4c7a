use std::collections::HashSet;
use std::sync::Arc;

use kgate_provider_core::{CredentialRotator, RotatorEntry};

fn entries(n: usize) -> Vec<RotatorEntry> {
    (0..n)
        .map(|i| RotatorEntry::new(format!("/auth/kiro-{i}.json"), "", format!("kiro-{i}")))
        .collect()
}

#[test]
fn three_cycles_visit_each_entry_once() {
    let rotator = CredentialRotator::new(entries(3));
    let mut first_picks = Vec::new();
    for _ in 0..3 {
        let candidates = rotator.candidates();
        assert_eq!(candidates.len(), 3);
        let first = candidates[0].index.expect("rotating");
        first_picks.push(first);
        rotator.advance(first);
    }
    assert_eq!(first_picks, vec![0, 1, 2]);
    assert_eq!(rotator.candidates()[0].index, Some(0));
}

#[test]
fn candidates_wrap_from_cursor() {
    let rotator = CredentialRotator::new(entries(3));
    rotator.advance(1);
    let order: Vec<_> = rotator
        .candidates()
        .into_iter()
        .map(|candidate| candidate.index.expect("rotating"))
        .collect();
    assert_eq!(order, vec![2, 0, 1]);
}

#[test]
fn single_entry_disables_rotation() {
    let rotator = CredentialRotator::new(entries(1));
    rotator.advance(0);
    assert_eq!(rotator.cursor(), 0);
    let candidates = rotator.candidates();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].index, None);

    let empty = CredentialRotator::new(Vec::new());
    assert!(empty.candidates().is_empty());
}

#[test]
fn pinned_entry_bypasses_rotation() {
    let rotator = CredentialRotator::new(entries(3));
    let pinned = RotatorEntry::new("/elsewhere/kiro.json", "eu-west-1", "pinned");
    let candidates = rotator.select(Some(&pinned));
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].entry, pinned);
    assert_eq!(candidates[0].index, None);
    assert_eq!(rotator.cursor(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_advances_keep_cursor_in_range() {
    let rotator = Arc::new(CredentialRotator::new(entries(4)));
    let mut tasks = Vec::new();
    for _ in 0..32 {
        let rotator = rotator.clone();
        tasks.push(tokio::spawn(async move {
            let candidates = rotator.candidates();
            let idx = candidates[0].index.expect("rotating");
            rotator.advance(idx);
            idx
        }));
    }
    let mut seen = HashSet::new();
    for task in tasks {
        seen.insert(task.await.expect("join"));
    }
    assert!(rotator.cursor() < 4);
    assert!(seen.iter().all(|idx| *idx < 4));
}
