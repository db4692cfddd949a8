use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};

use moveboard::{
    Account, AccountId, ContractDraft, Coordinates, FilterCriteria, HaversineDistance, HubConfig,
    LifecycleManager, Location, MarketConfig, MarketStores, SystemClock,
};

fn manager(poll_timeout: Duration) -> (LifecycleManager, AccountId) {
    let stores = MarketStores::in_memory();
    let requester = Account::requester("rita", "rita@example.com");
    stores.accounts.insert(requester.clone()).unwrap();

    let config = MarketConfig {
        hub: HubConfig {
            poll_timeout,
            sweep_interval: Duration::from_millis(25),
            ..HubConfig::default()
        },
        ..MarketConfig::default()
    };
    let manager = LifecycleManager::new(
        stores,
        Arc::new(HaversineDistance),
        Arc::new(SystemClock),
        config,
    )
    .unwrap();
    (manager, requester.id())
}

fn draft(requester_id: AccountId, price: f64, from: (f64, f64)) -> ContractDraft {
    ContractDraft {
        requester_id,
        title: "Boxes".to_string(),
        description: "Twelve boxes of books".to_string(),
        weight: 120.0,
        height: 1.0,
        width: 1.0,
        length: 2.0,
        man_power: 1,
        fragile: false,
        cooling_required: false,
        ride_along: true,
        price,
        collateral: 0.0,
        move_date_time: Utc::now() + ChronoDuration::days(5),
        from: Some(Location::new("origin", from.0, from.1)),
        to: Some(Location::new("Geneva", 46.2044, 6.1432)),
        photos: Vec::new(),
    }
}

const ZURICH: (f64, f64) = (47.3769, 8.5417);

fn under(price: f64) -> FilterCriteria {
    FilterCriteria {
        max_price: Some(price),
        ..FilterCriteria::default()
    }
}

#[test]
fn parked_poll_resolves_with_the_new_contract() {
    let (m, requester) = manager(Duration::from_secs(10));
    let handle = m.poll(None, under(200.0)).unwrap();
    assert_eq!(m.hub().pending_count(), 1);

    let c = m.create(draft(requester, 150.0, ZURICH)).unwrap();
    let found = handle.wait();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, c.id);
    assert_eq!(m.hub().pending_count(), 0);
}

#[test]
fn contract_above_cap_does_not_resolve() {
    let (m, requester) = manager(Duration::from_millis(300));
    let handle = m.poll(None, under(100.0)).unwrap();
    m.create(draft(requester, 150.0, ZURICH)).unwrap();
    assert!(handle.wait().is_empty());
}

#[test]
fn radius_filter_uses_pickup_location() {
    let (m, requester) = manager(Duration::from_secs(10));
    let near_zurich = Some(Coordinates::new(47.40, 8.50).unwrap());
    let radius = FilterCriteria {
        radius_km: Some(20.0),
        ..FilterCriteria::default()
    };
    let handle = m.poll(near_zurich, radius).unwrap();

    // Lugano is well outside 20 km; nothing resolves.
    m.create(draft(requester, 90.0, (46.0037, 8.9511))).unwrap();
    assert_eq!(m.hub().reevaluate_now(), 0);

    let close = m.create(draft(requester, 90.0, ZURICH)).unwrap();
    let found = handle.wait();
    assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![close.id]);
}

#[test]
fn hundred_pollers_each_resolve_exactly_once() {
    let (m, requester) = manager(Duration::from_secs(10));
    let m = Arc::new(m);
    let barrier = Arc::new(Barrier::new(101));

    let pollers: Vec<_> = (0..100)
        .map(|_| {
            let m = Arc::clone(&m);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let handle = m.poll(None, under(500.0)).unwrap();
                barrier.wait();
                handle.wait()
            })
        })
        .collect();

    barrier.wait();
    let c = m.create(draft(requester, 150.0, ZURICH)).unwrap();

    for p in pollers {
        let found = p.join().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, c.id);
    }
    let stats = m.hub().stats();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.resolved, 100);
    assert_eq!(stats.timed_out, 0);
}

#[test]
fn polls_racing_with_creates_never_miss_a_match() {
    let (m, requester) = manager(Duration::from_secs(10));
    let m = Arc::new(m);

    let creator = {
        let m = Arc::clone(&m);
        thread::spawn(move || {
            (0..20)
                .map(|_| m.create(draft(requester, 50.0, ZURICH)).unwrap().id)
                .collect::<HashSet<_>>()
        })
    };
    let pollers: Vec<_> = (0..20)
        .map(|_| {
            let m = Arc::clone(&m);
            thread::spawn(move || m.poll(None, under(100.0)).unwrap().wait())
        })
        .collect();

    let created = creator.join().unwrap();
    for p in pollers {
        let found = p.join().unwrap();
        assert!(!found.is_empty());
        assert!(found.iter().all(|c| created.contains(&c.id)));
    }
    assert_eq!(m.hub().pending_count(), 0);
}

#[test]
fn unmatched_poll_returns_empty_within_timeout() {
    let (m, _) = manager(Duration::from_millis(250));
    let started = Instant::now();
    let found = m.poll(None, under(1.0)).unwrap().wait();
    let elapsed = started.elapsed();

    assert!(found.is_empty());
    assert!(elapsed >= Duration::from_millis(250), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1_250), "{elapsed:?}");
    assert_eq!(m.hub().stats().timed_out, 1);
}

#[test]
fn dropped_poll_is_withdrawn() {
    let (m, requester) = manager(Duration::from_secs(10));
    drop(m.poll(None, under(500.0)).unwrap());
    assert_eq!(m.hub().pending_count(), 0);

    m.create(draft(requester, 150.0, ZURICH)).unwrap();
    m.hub().reevaluate_now();
    assert_eq!(m.hub().stats().resolved, 0);
}
