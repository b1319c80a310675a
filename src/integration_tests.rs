//! End-to-end loopback scenarios exercising the listener/dialer, session,
//! and scheduler together over a real `TcpStream`.
//!
//! These stop short of calling [`crate::engine::run`]: its termination
//! detector exits the whole process on success (§4.7), which is correct for
//! the `peer_process` binary but fatal to a test binary, so here the
//! scheduler tasks are driven directly and completion is observed by
//! polling the piece store instead of waiting on `std::process::exit`.

use std::{sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{
    conf::{CommonConfig, Config, Membership},
    net, registry::Registry, scheduler, storage::PieceStore,
};

fn common_config(piece_size: u32, file_size: u64) -> CommonConfig {
    CommonConfig {
        preferred_count: 1,
        unchoke_interval: Duration::from_millis(30),
        optimistic_interval: Duration::from_millis(45),
        file_name: "shared.dat".into(),
        file_size,
        piece_size,
        clear_optimistic_on_reselect: false,
    }
}

/// Starts the listener/dialer and both scheduler tasks for one peer,
/// returning its piece store so the test can poll it.
async fn spawn_peer(config: Config, initial_contents: Option<&[u8]>) -> Arc<PieceStore> {
    let dir = std::env::temp_dir().join(format!("peershare-it-peer-{}", config.local.peer_id));
    std::fs::create_dir_all(&dir).unwrap();
    let file_path = dir.join(&config.common.file_name);
    match initial_contents {
        Some(contents) => std::fs::write(&file_path, contents).unwrap(),
        None => {
            let _ = std::fs::remove_file(&file_path);
        }
    }

    let storage = Arc::new(
        PieceStore::open(
            file_path,
            config.common.num_pieces(),
            config.common.piece_size,
            config.common.file_size,
            initial_contents.is_some(),
        )
        .unwrap(),
    );
    let registry = Arc::new(Registry::new());
    let config = Arc::new(config);
    let local_id = config.local.peer_id;

    net::start(
        local_id,
        Arc::clone(&config),
        Arc::clone(&registry),
        Arc::clone(&storage),
    )
    .await
    .unwrap();

    tokio::spawn(scheduler::run_preferred_neighbor_cycle(
        local_id,
        Arc::clone(&config),
        Arc::clone(&registry),
        Arc::clone(&storage),
    ));
    tokio::spawn(scheduler::run_optimistic_unchoke_cycle(
        local_id,
        Arc::clone(&config),
        Arc::clone(&registry),
    ));

    storage
}

async fn wait_until_complete(storage: &PieceStore, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while !storage.has_all() {
        if std::time::Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(20)).await;
    }
    true
}

#[tokio::test]
async fn leecher_downloads_the_complete_file_from_a_single_seeder() {
    let content: Vec<u8> = (0..32u8).collect();
    let piece_size = 8u32;

    let membership =
        Membership::parse("1 127.0.0.1 47101 1\n2 127.0.0.1 47102 0\n").unwrap();
    let seed_config = Config {
        common: common_config(piece_size, content.len() as u64),
        membership: membership.clone(),
        local: membership.get(1).unwrap().clone(),
    };
    let leech_config = Config {
        common: common_config(piece_size, content.len() as u64),
        local: membership.get(2).unwrap().clone(),
        membership,
    };

    // seed must be listening before the leecher dials it
    let _seed_storage = spawn_peer(seed_config, Some(&content)).await;
    let leech_storage = spawn_peer(leech_config, None).await;

    assert!(
        wait_until_complete(&leech_storage, Duration::from_secs(10)).await,
        "leecher did not complete the file in time"
    );

    let mut reconstructed = Vec::new();
    for i in 0..leech_storage.num_pieces() {
        reconstructed.extend(leech_storage.read(i).unwrap().unwrap());
    }
    assert_eq!(reconstructed, content);
}

#[tokio::test]
async fn a_fully_seeded_peer_needs_no_neighbors_to_report_complete() {
    let content: Vec<u8> = vec![7; 24];
    let piece_size = 8u32;
    let membership = Membership::parse("1 127.0.0.1 47201 1\n").unwrap();
    let config = Config {
        common: common_config(piece_size, content.len() as u64),
        membership: membership.clone(),
        local: membership.get(1).unwrap().clone(),
    };
    let storage = spawn_peer(config, Some(&content)).await;
    assert!(storage.has_all());
}
