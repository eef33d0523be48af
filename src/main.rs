//! Router binary entry point. Wires CLI arguments into a [`Config`] and a
//! static interface/route table, then starts the sweep thread. Real
//! link-layer I/O (capturing and injecting frames on a NIC) is outside this
//! crate's scope (spec.md §1, §6) — `receive_frame` is the integration point
//! a caller with access to raw sockets would drive; this binary stands in
//! with a link layer that only logs what it would have sent.

use std::net::Ipv4Addr;
use std::sync::Arc;

use clap::Parser;

use ipv4_router::{Config, ForwardingEngine, Interface, LinkLayer, Route, StaticTables, SweepThread, SystemClock};

/// IPv4 software router with optional NAT.
#[derive(Debug, Parser)]
#[command(name = "ipv4-router", version, about)]
struct Args {
    /// Enable NAT translation between the internal and external interface.
    #[arg(long)]
    nat: bool,
    /// Interface treated as internal when `--nat` is set.
    #[arg(long, default_value = "eth1")]
    internal_interface: String,
    /// Interface treated as external when `--nat` is set.
    #[arg(long, default_value = "eth2")]
    external_interface: String,
}

/// A link layer that logs the frames it would transmit instead of sending
/// them on a real NIC.
struct LoggingLink;

impl LinkLayer for LoggingLink {
    fn send_frame(&self, interface: &str, frame: &[u8]) {
        log::info!("TX {interface}: {} bytes", frame.len());
    }
}

fn demo_tables() -> StaticTables {
    StaticTables::new(
        vec![
            Interface { name: "eth1", ip: Ipv4Addr::new(10, 0, 0, 1), mac: [0x02, 0, 0, 0, 0, 1] },
            Interface { name: "eth2", ip: Ipv4Addr::new(192, 168, 1, 1), mac: [0x02, 0, 0, 0, 0, 2] },
        ],
        vec![Route {
            destination: Ipv4Addr::new(0, 0, 0, 0),
            mask: Ipv4Addr::new(0, 0, 0, 0),
            gateway: Ipv4Addr::new(192, 168, 1, 2),
            interface: "eth2",
        }],
    )
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let config = Config {
        nat_enabled: args.nat,
        internal_interface: args.internal_interface,
        external_interface: args.external_interface,
        ..Config::default()
    };

    let tables = Arc::new(demo_tables());
    let engine = Arc::new(ForwardingEngine::new(
        config,
        tables.clone(),
        tables,
        Arc::new(LoggingLink),
        Arc::new(SystemClock),
    ));

    log::info!("router started");
    let _sweep = SweepThread::spawn(engine);

    // No frame source is wired into this binary; park the main thread and
    // let the operator stop the process.
    loop {
        std::thread::park();
    }
}
