use super::*;

/// Process-wide extranonce1 source. Seeding the 32-bit counter with
/// `instance_id << 27` gives each pool instance a disjoint 2^27 range, so
/// extranonces never collide across instances sharing a daemon.
#[derive(Debug)]
pub struct ExtranonceCounter {
    counter: AtomicU32,
}

impl ExtranonceCounter {
    pub fn new(instance_id: Option<u32>) -> Self {
        let instance_id = instance_id.unwrap_or_else(|| rand::rng().next_u32());

        Self {
            counter: AtomicU32::new(instance_id.wrapping_shl(27)),
        }
    }

    pub fn next(&self) -> Extranonce {
        Extranonce::from_u32(self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

/// Subscription ids: a fixed random 8-byte prefix per process plus an 8-byte
/// counter, hex encoded.
#[derive(Debug)]
pub struct SubscriptionIds {
    prefix: [u8; 8],
    counter: AtomicU64,
}

impl SubscriptionIds {
    pub fn new() -> Self {
        let mut prefix = [0u8; 8];
        rand::rng().fill_bytes(&mut prefix);

        Self {
            prefix,
            counter: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> String {
        let counter = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}{:016x}", hex::encode(self.prefix), counter)
    }
}
