//! Long-poll contract notification hub.
//!
//! Drivers park a poll with their filter; every contract create/update
//! triggers a re-evaluation of all parked polls, and a poll that finds
//! nothing resolves empty when its timeout elapses.

/// Hub entry point and worker threads.
pub mod dispatcher;
pub mod handle;
mod registry;

pub use dispatcher::{HubStats, NotificationHub};
pub use handle::PollHandle;

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use chrono::Utc;

    use super::*;
    use crate::config::HubConfig;
    use crate::contract::test_support::draft;
    use crate::contract::{Contract, ContractStatus, Coordinates};
    use crate::error::UpstreamError;
    use crate::filter::{DistanceService, FilterCriteria, FilterMatcher, HaversineDistance};
    use crate::id::AccountId;
    use crate::storage::{ContractStore, InMemoryContractStore};

    fn cfg(timeout_ms: u64) -> HubConfig {
        HubConfig {
            poll_timeout: Duration::from_millis(timeout_ms),
            sweep_interval: Duration::from_millis(20),
            ..HubConfig::default()
        }
    }

    fn hub_with(timeout_ms: u64) -> (NotificationHub, Arc<InMemoryContractStore>) {
        let store = Arc::new(InMemoryContractStore::new());
        let hub = NotificationHub::new(
            cfg(timeout_ms),
            store.clone(),
            FilterMatcher::new(Arc::new(HaversineDistance)),
        )
        .unwrap();
        (hub, store)
    }

    fn stored(store: &InMemoryContractStore, price: f64) -> Contract {
        let now = Utc::now();
        let mut c = draft(AccountId::new(), now).into_contract(now).unwrap();
        c.price = price;
        store.save(c).unwrap()
    }

    fn max_price(p: f64) -> FilterCriteria {
        FilterCriteria {
            max_price: Some(p),
            ..FilterCriteria::default()
        }
    }

    #[test]
    fn existing_match_resolves_immediately() {
        let (hub, store) = hub_with(5_000);
        let c = stored(&store, 80.0);
        stored(&store, 500.0);

        let handle = hub.subscribe(None, max_price(100.0)).unwrap();
        let found = handle.try_result().expect("resolved at subscribe time");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, c.id);
        assert_eq!(hub.pending_count(), 0);
    }

    #[test]
    fn publish_wakes_parked_poll_with_new_contract() {
        let (hub, store) = hub_with(5_000);
        let handle = hub.subscribe(None, max_price(100.0)).unwrap();
        assert_eq!(hub.pending_count(), 1);

        let c = stored(&store, 90.0);
        hub.publish(&c);

        let found = handle.wait();
        assert_eq!(found.iter().map(|x| x.id).collect::<Vec<_>>(), vec![c.id]);
        assert_eq!(hub.pending_count(), 0);
        assert_eq!(hub.stats().resolved, 1);
    }

    #[test]
    fn non_matching_publish_leaves_poll_parked() {
        let (hub, store) = hub_with(5_000);
        let _handle = hub.subscribe(None, max_price(100.0)).unwrap();
        stored(&store, 900.0);
        assert_eq!(hub.reevaluate_now(), 0);
        assert_eq!(hub.pending_count(), 1);
    }

    #[test]
    fn closed_contracts_are_not_offered() {
        let (hub, store) = hub_with(5_000);
        let c = stored(&store, 50.0);
        let mut accepted = c;
        accepted.status = ContractStatus::Accepted;
        store.save(accepted).unwrap();

        let handle = hub.subscribe(None, max_price(100.0)).unwrap();
        assert!(handle.try_result().is_none());
    }

    #[test]
    fn unmatched_poll_times_out_empty() {
        let (hub, _store) = hub_with(200);
        let started = Instant::now();
        let handle = hub.subscribe(None, max_price(1.0)).unwrap();
        let found = handle.wait();
        let elapsed = started.elapsed();

        assert!(found.is_empty());
        assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(1_200), "{elapsed:?}");
        assert_eq!(hub.pending_count(), 0);
        assert_eq!(hub.stats().timed_out, 1);
    }

    #[test]
    fn sweeper_expires_abandoned_polls() {
        let (hub, _store) = hub_with(50);
        let handle = hub.subscribe(None, max_price(1.0)).unwrap();
        thread::sleep(Duration::from_millis(300));
        assert_eq!(hub.pending_count(), 0);
        // The sweep already delivered the empty result.
        assert_eq!(handle.try_result(), Some(Vec::new()));
    }

    #[test]
    fn dropping_handle_withdraws_without_resolution() {
        let (hub, store) = hub_with(5_000);
        let handle = hub.subscribe(None, max_price(100.0)).unwrap();
        handle.cancel();
        assert_eq!(hub.pending_count(), 0);

        stored(&store, 10.0);
        hub.reevaluate_now();
        let stats = hub.stats();
        assert_eq!(stats.resolved, 0);
        assert_eq!(stats.timed_out, 0);
    }

    #[test]
    fn second_resolution_is_a_no_op() {
        let (hub, store) = hub_with(5_000);
        let handle = hub.subscribe(None, max_price(100.0)).unwrap();
        let c = stored(&store, 10.0);

        assert_eq!(hub.reevaluate_now(), 1);
        assert_eq!(hub.reevaluate_now(), 0);
        assert!(!hub.registry_for_tests().expire(handle.id()));
        assert_eq!(handle.wait()[0].id, c.id);
        assert_eq!(hub.stats().resolved, 1);
    }

    #[test]
    fn invalid_origin_is_rejected() {
        let (hub, _store) = hub_with(5_000);
        let err = hub
            .subscribe(Some(Coordinates { lat: 123.0, lng: 0.0 }), FilterCriteria::default())
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(hub.pending_count(), 0);
    }

    #[derive(Debug)]
    struct FailingDistance;

    impl DistanceService for FailingDistance {
        fn distance_km(&self, _: f64, _: f64, _: f64, _: f64) -> Result<f64, UpstreamError> {
            Err(UpstreamError::Distance {
                message: "down".to_string(),
            })
        }
    }

    #[test]
    fn failing_subscriber_does_not_block_others() {
        let store = Arc::new(InMemoryContractStore::new());
        let hub = NotificationHub::new(
            cfg(5_000),
            store.clone(),
            FilterMatcher::new(Arc::new(FailingDistance)),
        )
        .unwrap();

        let origin = Some(Coordinates { lat: 47.0, lng: 8.0 });
        let radius = FilterCriteria {
            radius_km: Some(10.0),
            ..FilterCriteria::default()
        };
        // Nothing stored yet, so the initial evaluation never reaches the distance service.
        let failing = hub.subscribe(origin, radius.clone()).unwrap();
        let healthy = hub.subscribe(None, max_price(100.0)).unwrap();

        let c = stored(&store, 20.0);
        assert_eq!(hub.reevaluate_now(), 1);
        assert_eq!(healthy.wait()[0].id, c.id);
        assert_eq!(hub.pending_count(), 1);
        assert_eq!(hub.stats().evaluation_failures, 1);

        // With a contract present, a new radius poll fails up front.
        let err = hub.subscribe(origin, radius).unwrap_err();
        assert!(err.is_upstream());
        drop(failing);
    }
}
