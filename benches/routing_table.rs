//! Micro-benchmarks for RoutingTable operations: add, k_closest, and remove
//! at varying table sizes. Reports nanoseconds-per-operation.
//!
//! Run: `cargo bench --bench routing_table`

use kadpeer::{Id, Node, RoutingTable};
use std::net::SocketAddrV4;
use std::str::FromStr;
use std::time::Instant;

fn main() {
    println!("routing_table\n");

    bench_add();
    bench_k_closest();
    bench_remove();
}

fn filled_table(size: usize, addr: SocketAddrV4) -> RoutingTable {
    let mut table = RoutingTable::new(Id::random());
    for _ in 0..size {
        table.add(Node::new(Id::random(), addr));
    }
    table
}

fn bench_add() {
    println!("add");

    let addr = SocketAddrV4::from_str("127.0.0.1:6881").unwrap();

    // Pre-generate random nodes outside the timed section
    let nodes: Vec<_> = (0..1000).map(|_| Node::new(Id::random(), addr)).collect();

    for size in [0, 100, 400] {
        let mut table = filled_table(size, addr);

        let start = Instant::now();
        for node in nodes.iter().copied() {
            table.add(node);
        }
        let per_op = start.elapsed().as_nanos() / nodes.len() as u128;
        println!(
            "{size:>4} prefilled: {per_op}ns/op (final size: {}, buckets: {})",
            table.size(),
            table.buckets().len()
        );
    }

    println!();
}

fn bench_k_closest() {
    println!("k_closest");

    let addr = SocketAddrV4::from_str("127.0.0.1:6881").unwrap();
    let targets: Vec<_> = (0..1000).map(|_| Id::random()).collect();

    for size in [10, 100, 1000] {
        let table = filled_table(size, addr);

        let start = Instant::now();
        for target in &targets {
            std::hint::black_box(table.k_closest(target));
        }
        let per_op = start.elapsed().as_nanos() / targets.len() as u128;
        println!("{size:>4} nodes: {per_op}ns/op");
    }

    println!();
}

fn bench_remove() {
    println!("remove");

    let addr = SocketAddrV4::from_str("127.0.0.1:6881").unwrap();
    let mut table = filled_table(1000, addr);
    let ids: Vec<Id> = table.nodes().map(|node| *node.id()).collect();

    let start = Instant::now();
    for id in &ids {
        table.remove(id);
    }
    let per_op = start.elapsed().as_nanos() / ids.len().max(1) as u128;
    println!("{} nodes: {per_op}ns/op", ids.len());

    println!();
}
