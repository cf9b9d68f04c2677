#![cfg(unix)]

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use entitle_core::{Config, LockManager};
use tempfile::tempdir;

#[test]
fn concurrent_acquire_has_exactly_one_winner() {
    let tmp = tempdir().unwrap();
    let config = Config::rooted(tmp.path());
    let manager = LockManager::new(&config);
    let barrier = Barrier::new(2);
    let release = Barrier::new(2);

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = ["pro enable esm-infra", "pro refresh"]
            .into_iter()
            .map(|holder| {
                let manager = &manager;
                let barrier = &barrier;
                let release = &release;
                scope.spawn(move || {
                    barrier.wait();
                    let outcome = manager.acquire(holder);
                    let summary = match &outcome {
                        Ok(guard) => Ok(guard.holder().to_string()),
                        Err(err) => Err(err.held().cloned()),
                    };
                    release.wait();
                    drop(outcome);
                    summary
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "{results:?}");
    let loser = results
        .iter()
        .find_map(|r| r.as_ref().err())
        .expect("one loser");
    let held = loser.as_ref().expect("loser sees a held lock");
    assert_eq!(&held.holder, winners[0]);
    assert_eq!(held.pid, i32::try_from(std::process::id()).unwrap());

    assert!(!manager.lock_path().exists());
    let guard = manager.acquire("pro detach").unwrap();
    assert_eq!(guard.holder(), "pro detach");
}

#[test]
fn spinning_caller_gets_the_lock_after_release() {
    let tmp = tempdir().unwrap();
    let config = Config::rooted(tmp.path()).with_lock_budget(Duration::from_millis(20), 50);
    let manager = Arc::new(LockManager::new(&config));

    let guard = manager.acquire("pro attach").unwrap();
    let waiter = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || {
            manager
                .with_spin_lock("pro refresh", || "refreshed")
                .map_err(|err| err.to_string())
        })
    };
    thread::sleep(Duration::from_millis(60));
    guard.release().unwrap();

    assert_eq!(waiter.join().unwrap(), Ok("refreshed"));
    assert!(!manager.lock_path().exists());
}
