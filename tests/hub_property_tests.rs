//! Property-based тесты пула хабов.
//!
//! Случайные последовательности join/leave/broadcast сравниваются с
//! простой моделью: канал → список живых участников.

use std::{collections::BTreeMap, sync::Arc};

use bytes::Bytes;
use hubcast::{ConnectionHandle, HubPool, PoolConfig, Subscription};
use proptest::prelude::*;

const CHANNELS: [&str; 3] = ["a", "b", "c"];

struct NullConn;

impl ConnectionHandle for NullConn {
    fn peer(&self) -> String {
        "prop".to_string()
    }

    fn close(&self) {}
}

#[derive(Debug, Clone)]
enum Op {
    Join(usize),
    Leave(usize),
    LeaveAgain(usize),
    Broadcast(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..CHANNELS.len()).prop_map(Op::Join),
        2 => any::<usize>().prop_map(Op::Leave),
        1 => any::<usize>().prop_map(Op::LeaveAgain),
        2 => (0..CHANNELS.len()).prop_map(Op::Broadcast),
    ]
}

/// Сверяет пул с моделью.
fn check_against_model(
    pool: &HubPool,
    live: &BTreeMap<&'static str, Vec<Subscription>>,
) -> Result<(), TestCaseError> {
    let mut expected: Vec<&str> = live
        .iter()
        .filter(|(_, subs)| !subs.is_empty())
        .map(|(name, _)| *name)
        .collect();
    expected.sort_unstable();

    let mut actual: Vec<String> = pool.channels().iter().map(|c| c.to_string()).collect();
    actual.sort_unstable();
    prop_assert_eq!(actual, expected);

    for (name, subs) in live {
        if subs.is_empty() {
            continue;
        }
        let hub = pool.get(name).expect("hub for live channel");
        prop_assert!(!hub.is_tombstoned());
        prop_assert_eq!(hub.len(), subs.len());
        for sub in subs {
            prop_assert!(Arc::ptr_eq(&sub.hub, &hub));
            prop_assert!(hub.contains(&sub.client.id()));
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_pool_matches_model(ops in prop::collection::vec(op_strategy(), 0..120)) {
        let pool = HubPool::new(PoolConfig {
            client_queue_capacity: 1024,
            ..Default::default()
        });
        let mut live: BTreeMap<&'static str, Vec<Subscription>> = BTreeMap::new();
        let mut departed: Vec<Subscription> = Vec::new();

        for op in ops {
            match op {
                Op::Join(ch) => {
                    let name = CHANNELS[ch];
                    let sub = pool.join_channel(name, Arc::new(NullConn));
                    live.entry(name).or_default().push(sub);
                }
                Op::Leave(pick) => {
                    let total: usize = live.values().map(Vec::len).sum();
                    if total == 0 {
                        continue;
                    }
                    let mut pick = pick % total;
                    for subs in live.values_mut() {
                        if pick < subs.len() {
                            let sub = subs.swap_remove(pick);
                            prop_assert!(sub.client.leave());
                            prop_assert!(sub.client.is_closed());
                            departed.push(sub);
                            break;
                        }
                        pick -= subs.len();
                    }
                }
                Op::LeaveAgain(pick) => {
                    if departed.is_empty() {
                        continue;
                    }
                    let sub = &departed[pick % departed.len()];
                    prop_assert!(!sub.client.leave());
                    prop_assert!(!sub.hub.leave(&sub.client));
                }
                Op::Broadcast(ch) => {
                    let name = CHANNELS[ch];
                    let members = live.get(name).map_or(0, Vec::len);
                    let report = pool.broadcast(name, Bytes::from_static(b"m"));

                    if members == 0 {
                        prop_assert!(report.is_none());
                    } else {
                        let report = report.expect("report for live channel");
                        prop_assert_eq!(report.recipients, members);
                        prop_assert_eq!(report.delivered, members);
                    }

                    if let Some(subs) = live.get_mut(name) {
                        for sub in subs.iter_mut() {
                            prop_assert_eq!(sub.outbox.try_recv(), Some(Bytes::from_static(b"m")));
                            prop_assert_eq!(sub.outbox.try_recv(), None);
                        }
                    }
                }
            }

            for sub in departed.iter_mut() {
                prop_assert_eq!(sub.outbox.try_recv(), None);
            }
            check_against_model(&pool, &live)?;
        }

        let stats = pool.stats();
        prop_assert_eq!(stats.join_retries, 0);
        prop_assert_eq!(stats.eviction_races, 0);
        prop_assert_eq!(stats.hubs_created - stats.hubs_evicted, pool.len() as u64);
    }

    #[test]
    fn prop_rejoin_always_gets_fresh_hub(rounds in 1usize..20) {
        let pool = HubPool::default();
        let mut previous: Option<Subscription> = None;

        for _ in 0..rounds {
            let sub = pool.join_channel("solo", Arc::new(NullConn));
            if let Some(prev) = &previous {
                prop_assert!(!Arc::ptr_eq(&prev.hub, &sub.hub));
                prop_assert!(prev.hub.is_empty());
                prop_assert!(prev.hub.is_tombstoned());
            }
            prop_assert!(sub.client.leave());
            prop_assert!(!pool.contains("solo"));
            previous = Some(sub);
        }

        prop_assert_eq!(pool.stats().hubs_created, rounds as u64);
        prop_assert_eq!(pool.stats().hubs_evicted, rounds as u64);
    }
}
