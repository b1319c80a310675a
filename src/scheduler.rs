//! The two independent periodic choking tasks of §4.5: preferred-neighbor
//! reselection at interval *p*, and optimistic-unchoke rotation at interval
//! *m*.
//!
//! Both hold the registry lock for the whole synchronous decision phase of a
//! cycle (computing the preferred/optimistic set and mutating every
//! session's flags) via [`Registry::with_entries`], then release it before
//! dispatching the resulting sends — a `std::sync::MutexGuard` cannot be
//! held across the `.await`s those sends need. See DESIGN.md for why this
//! split, rather than holding the lock through the sends too, still
//! satisfies the "one cycle, one lock acquisition" intent of §4.5/§5.

use std::{collections::HashSet, sync::Arc};

use rand::seq::SliceRandom;

use crate::{conf::Config, registry::Registry, storage::PieceStore, wire::Message, PeerId};

/// Runs the preferred-neighbor reselection task forever, ticking every
/// `config.common.unchoke_interval`.
pub(crate) async fn run_preferred_neighbor_cycle(
    local_id: PeerId,
    config: Arc<Config>,
    registry: Arc<Registry>,
    storage: Arc<PieceStore>,
) {
    let mut ticker = tokio::time::interval(config.common.unchoke_interval);
    loop {
        ticker.tick().await;
        cycle_preferred_neighbors(local_id, &config, &registry, &storage).await;
    }
}

/// Runs the optimistic-unchoke task forever, ticking every
/// `config.common.optimistic_interval`.
pub(crate) async fn run_optimistic_unchoke_cycle(
    local_id: PeerId,
    config: Arc<Config>,
    registry: Arc<Registry>,
) {
    let mut ticker = tokio::time::interval(config.common.optimistic_interval);
    loop {
        ticker.tick().await;
        cycle_optimistic_unchoke(local_id, &registry).await;
    }
}

async fn cycle_preferred_neighbors(
    local_id: PeerId,
    config: &Config,
    registry: &Registry,
    storage: &PieceStore,
) {
    let has_all = storage.has_all();
    let k = config.common.preferred_count;
    let clear_optimistic = config.common.clear_optimistic_on_reselect;

    let (preferred, actions) = registry.with_entries(|entries| {
        let mut interested: Vec<PeerId> = entries
            .iter()
            .filter(|(_, e)| e.state.peer_interested)
            .map(|(id, _)| *id)
            .collect();

        // shuffle first so that a subsequent stable sort breaks rate ties
        // uniformly at random, and so the seed-peer (has_all) case, which
        // skips the sort entirely, is itself a uniform random selection.
        interested.shuffle(&mut rand::thread_rng());
        if !has_all {
            interested.sort_by(|a, b| {
                let rate_a = entries[a].state.interval_download_bytes;
                let rate_b = entries[b].state.interval_download_bytes;
                rate_b.cmp(&rate_a)
            });
        }
        let preferred: Vec<PeerId> = interested.into_iter().take(k).collect();
        let preferred_set: HashSet<PeerId> = preferred.iter().copied().collect();

        let mut actions = Vec::new();
        for (id, entry) in entries.iter_mut() {
            if clear_optimistic {
                entry.state.is_optimistic = false;
            }
            let is_preferred = preferred_set.contains(id);
            if is_preferred && entry.state.am_choking {
                entry.state.am_choking = false;
                actions.push((Arc::clone(&entry.session), Message::Unchoke));
            } else if !is_preferred && !entry.state.am_choking && !entry.state.is_optimistic {
                entry.state.am_choking = true;
                actions.push((Arc::clone(&entry.session), Message::Choke));
            }
            entry.state.interval_download_bytes = 0;
        }
        (preferred, actions)
    });

    log::info!(
        "Peer {} has the preferred neighbors {}.",
        local_id,
        preferred
            .iter()
            .map(PeerId::to_string)
            .collect::<Vec<_>>()
            .join(",")
    );

    for (session, msg) in actions {
        let _ = session.send(msg).await;
    }
}

async fn cycle_optimistic_unchoke(local_id: PeerId, registry: &Registry) {
    let outcome = registry.with_entries(|entries| {
        let candidates: Vec<PeerId> = entries
            .iter()
            .filter(|(_, e)| e.state.am_choking && e.state.peer_interested)
            .map(|(id, _)| *id)
            .collect();
        let chosen = *candidates.choose(&mut rand::thread_rng())?;

        let mut unchoke_action = None;
        for (id, entry) in entries.iter_mut() {
            if *id == chosen {
                entry.state.is_optimistic = true;
                if entry.state.am_choking {
                    entry.state.am_choking = false;
                    unchoke_action = Some(Arc::clone(&entry.session));
                }
            } else {
                entry.state.is_optimistic = false;
            }
        }
        Some((chosen, unchoke_action))
    });

    // an empty candidate set leaves the previous optimistic choice in place,
    // per §4.5/§9: nothing was mutated above, so there is nothing to log or
    // send.
    if let Some((chosen, unchoke_action)) = outcome {
        log::info!(
            "Peer {} has the optimistically unchoked neighbor {}.",
            local_id,
            chosen
        );
        if let Some(session) = unchoke_action {
            let _ = session.send(Message::Unchoke).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{registry::NeighborState, session::Session};

    fn registry_with(states: &[(PeerId, bool, bool, bool, u64)]) -> Registry {
        // (peer_id, am_choking, peer_interested, is_optimistic, rate)
        let registry = Registry::new();
        for &(id, am_choking, peer_interested, is_optimistic, rate) in states {
            let mut state = NeighborState::new(4);
            state.am_choking = am_choking;
            state.peer_interested = peer_interested;
            state.is_optimistic = is_optimistic;
            state.interval_download_bytes = rate;
            registry.insert(id, Arc::new(Session::for_test(id)), state);
        }
        registry
    }

    #[test]
    fn optimistic_candidates_are_choked_and_interested() {
        let registry = registry_with(&[
            (1, true, true, false, 0),
            (2, false, true, false, 0),
            (3, true, false, false, 0),
        ]);
        let candidates: Vec<PeerId> = registry.with_entries(|entries| {
            entries
                .iter()
                .filter(|(_, e)| e.state.am_choking && e.state.peer_interested)
                .map(|(id, _)| *id)
                .collect()
        });
        assert_eq!(candidates, vec![1]);
    }

    #[tokio::test]
    async fn optimistic_cycle_picks_the_only_candidate() {
        let registry = registry_with(&[(1, true, true, false, 0), (2, false, false, false, 0)]);
        cycle_optimistic_unchoke(9999, &registry).await;
        let is_optimistic = registry.with_state(1, |s| s.is_optimistic).unwrap();
        let am_choking = registry.with_state(1, |s| s.am_choking).unwrap();
        assert!(is_optimistic);
        assert!(!am_choking);
    }

    #[tokio::test]
    async fn optimistic_cycle_is_a_no_op_without_candidates() {
        let registry = registry_with(&[(1, false, false, true, 0)]);
        cycle_optimistic_unchoke(9999, &registry).await;
        // the previous optimistic choice survives an empty-candidate cycle
        assert!(registry.with_state(1, |s| s.is_optimistic).unwrap());
    }

    #[tokio::test]
    async fn preferred_cycle_prefers_higher_rate_when_not_seeding() {
        let config = Config {
            common: crate::conf::CommonConfig {
                preferred_count: 1,
                unchoke_interval: std::time::Duration::from_secs(5),
                optimistic_interval: std::time::Duration::from_secs(10),
                file_name: "f".into(),
                file_size: 100,
                piece_size: 10,
                clear_optimistic_on_reselect: false,
            },
            membership: crate::conf::Membership::parse("1 h 1 0\n2 h 2 0\n3 h 3 0\n").unwrap(),
            local: crate::conf::Membership::parse("1 h 1 0\n2 h 2 0\n3 h 3 0\n")
                .unwrap()
                .get(1)
                .unwrap()
                .clone(),
        };
        let storage = PieceStore::open(
            std::env::temp_dir().join("peershare-scheduler-test.dat"),
            10,
            10,
            100,
            false,
        )
        .unwrap();
        let registry = registry_with(&[(2, true, true, false, 100), (3, true, true, false, 5)]);

        cycle_preferred_neighbors(9999, &config, &registry, &storage).await;

        assert!(!registry.with_state(2, |s| s.am_choking).unwrap());
        assert!(registry.with_state(3, |s| s.am_choking).unwrap());
    }
}
