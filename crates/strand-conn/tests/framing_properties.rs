//! Frame round-trip properties over constrained in-memory caps.

use std::sync::Arc;

use proptest::prelude::*;
use strand_bytes::BytesPool;
use strand_conn::{FramedConnection, FramedConnectionConfig, MemoryCap};

fn pair_with_limit(limit: usize) -> (Arc<FramedConnection>, Arc<FramedConnection>) {
    let (cap_a, cap_b) = MemoryCap::pair_with_transfer_limit(limit);
    let pool = BytesPool::shared();
    let a = FramedConnection::new(Box::new(cap_a), FramedConnectionConfig::default(), &pool)
        .expect("valid config");
    let b = FramedConnection::new(Box::new(cap_b), FramedConnectionConfig::default(), &pool)
        .expect("valid config");
    (a, b)
}

/// Drive both pumps until neither moves a byte.
fn pump_until_idle(a: &FramedConnection, b: &FramedConnection, slice: usize) {
    loop {
        let moved = a.pump_send(slice).unwrap_or(0)
            + a.pump_receive(slice).unwrap_or(0)
            + b.pump_send(slice).unwrap_or(0)
            + b.pump_receive(slice).unwrap_or(0);
        if moved == 0 {
            break;
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn frames_survive_partial_transfers(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..512), 1..8),
        transfer_limit in 1usize..64,
        pump_slice in 1usize..128,
    ) {
        let (a, b) = pair_with_limit(transfer_limit);

        for payload in &payloads {
            let staged = payload.clone();
            prop_assert!(a.try_enqueue(move |writer| writer.put_slice(&staged)).unwrap());

            pump_until_idle(&a, &b, pump_slice);

            let mut observed = Vec::new();
            let dequeued = b
                .try_dequeue(|reader| {
                    observed = reader.to_vec()?;
                    Ok(())
                })
                .unwrap();
            prop_assert!(dequeued);
            prop_assert_eq!(&observed, payload);
        }

        // Each frame costs its payload plus the four-byte header.
        let expected: u64 =
            payloads.iter().map(|p| p.len() as u64 + 4).sum();
        prop_assert_eq!(a.sent_byte_count(), expected);
        prop_assert_eq!(b.received_byte_count(), expected);
    }
}
