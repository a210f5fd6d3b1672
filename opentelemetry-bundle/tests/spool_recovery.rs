//! Durability of the spool across process lifetimes.
//!
//! A real crash is simulated by dropping every handle to the spool without
//! acknowledging anything: nothing is flushed at drop time that was not
//! already durable at enqueue time, which is exactly the guarantee under
//! test.

use std::collections::HashMap;

use opentelemetry_bundle::spool::{EntryMeta, Spool};
use opentelemetry_bundle::{Protocol, Signal};
use tempfile::TempDir;

fn meta() -> EntryMeta {
    EntryMeta {
        protocol: Protocol::Http,
        target: "http://collector:4318/v1/traces".to_owned(),
        headers: HashMap::new(),
        content_type: Some("application/x-protobuf".to_owned()),
    }
}

#[test]
fn enqueued_payloads_survive_restart_in_order() {
    let dir = TempDir::new().unwrap();

    {
        let spool = Spool::open(dir.path(), Signal::Traces).unwrap();
        spool.enqueue(&meta(), b"A").unwrap();
        spool.enqueue(&meta(), b"B").unwrap();
        spool.enqueue(&meta(), b"C").unwrap();
        // Dropped without acknowledgment: the "crash".
    }

    let spool = Spool::open(dir.path(), Signal::Traces).unwrap();
    let mut delivered = Vec::new();
    while let Some(entry) = spool.peek_oldest().unwrap() {
        delivered.push(entry.body.clone());
        spool.acknowledge(entry.seq).unwrap();
    }

    assert_eq!(delivered, vec![b"A".to_vec(), b"B".to_vec(), b"C".to_vec()]);
}

#[test]
fn metadata_survives_restart() {
    let dir = TempDir::new().unwrap();

    let mut headers = HashMap::new();
    headers.insert("authorization".to_owned(), "Bearer tok".to_owned());
    let original = EntryMeta {
        protocol: Protocol::Grpc,
        target: "/opentelemetry.proto.collector.trace.v1.TraceService/Export".to_owned(),
        headers,
        content_type: Some("application/grpc".to_owned()),
    };

    {
        let spool = Spool::open(dir.path(), Signal::Traces).unwrap();
        spool.enqueue(&original, b"proto bytes").unwrap();
    }

    let spool = Spool::open(dir.path(), Signal::Traces).unwrap();
    let entry = spool.peek_oldest().unwrap().unwrap();
    assert_eq!(entry.meta, original);
    assert_eq!(entry.body, b"proto bytes");
}

#[test]
fn sequences_resume_beyond_acknowledged_history() {
    let dir = TempDir::new().unwrap();

    let highest = {
        let spool = Spool::open(dir.path(), Signal::Metrics).unwrap();
        spool.enqueue(&meta(), b"one").unwrap();
        let second = spool.enqueue(&meta(), b"two").unwrap();
        // First delivered and acknowledged, second still pending.
        let first = spool.peek_oldest().unwrap().unwrap();
        spool.acknowledge(first.seq).unwrap();
        second
    };

    let spool = Spool::open(dir.path(), Signal::Metrics).unwrap();
    assert_eq!(spool.len().unwrap(), 1);
    let next = spool.enqueue(&meta(), b"three").unwrap();
    assert!(next > highest, "sequence {next} must exceed {highest}");
}
