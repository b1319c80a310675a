//! CLI entry point: the positional peer-id argument, config loading, logger
//! installation, and process orchestration (§6.5).
//!
//! The Rust-native replacement for `peerProcess.py`: same usage contract
//! (one positional integer peer id, exit 1 on any configuration error, exit
//! 0 only via the termination detector's own `std::process::exit(0)`).

use clap::{App, Arg};

use peershare::{conf::Config, engine, error::Error, logging, PeerId};

fn main() {
    let matches = App::new("peer_process")
        .about("Runs one peer of a cooperative fixed-swarm file distribution network")
        .arg(
            Arg::with_name("peer_id")
                .help("this process's peer identifier, as listed in PeerInfo.cfg")
                .required(true)
                .index(1),
        )
        .get_matches();

    let peer_id: PeerId = match matches.value_of("peer_id").unwrap().parse() {
        Ok(id) => id,
        Err(_) => {
            eprintln!("peer id must be a non-negative integer");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(peer_id) {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn run(peer_id: PeerId) -> Result<(), Error> {
    let config = Config::load(".", peer_id)?;
    logging::init(peer_id)?;

    log::info!(
        "Peer {} starting at {}:{} (has file initially: {})",
        peer_id,
        config.local.host,
        config.local.port,
        config.local.has_file_initially
    );

    let mut rt = tokio::runtime::Runtime::new()?;
    rt.block_on(engine::run(config))
}
