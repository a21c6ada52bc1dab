use std::{net::SocketAddrV4, str::FromStr};

use kadpeer::{Dht, DhtEvent, Id};

use clap::Parser;

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// info_hash to annouce a peer on
    infohash: String,
    /// Port advertised for this peer
    #[arg(long, default_value_t = 6991)]
    port: u16,
    /// Addresses of the nodes to bootstrap from
    #[arg(long)]
    bootstrap: Vec<SocketAddrV4>,
    /// Port to listen on
    #[arg(long)]
    listen: Option<u16>,
}

fn main() {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let cli = Cli::parse();

    let info_hash = Id::from_str(cli.infohash.as_str()).expect("invalid infohash");

    let mut builder = Dht::builder();
    builder.bootstrap(&cli.bootstrap);

    if let Some(port) = cli.listen {
        builder.port(port);
    }

    let dht = builder.build().expect("failed to bind the udp socket");
    let events = dht.events().expect("dht was shutdown");

    println!("\nAnnouncing peer on an infohash: {} ...\n", cli.infohash);

    dht.advertise(info_hash, cli.port).expect("dht was shutdown");

    for event in events.iter() {
        match event {
            DhtEvent::Listening(address) => println!("Listening on {address}"),
            DhtEvent::PeerDiscovered {
                info_hash, peer, ..
            } => println!("Found peer {peer} on {info_hash}"),
            DhtEvent::PeerExpired { info_hash, peer } => {
                println!("Peer {peer} on {info_hash} expired")
            }
            DhtEvent::Error(error) => println!("Error: {error}"),
        }
    }
}
