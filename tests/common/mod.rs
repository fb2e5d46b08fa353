#![allow(dead_code, non_snake_case)]

use std::sync::Once;
use rand::{ SeedableRng, rngs::StdRng };
use tracing_subscriber::EnvFilter;
use mps_chain::prelude::*;

static LOGGING: Once = Once::new();

/// Route `tracing` output through the test harness, filtered by `RUST_LOG`.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A Néel state of spin-1/2 sites with conserved `Sz`, scrambled by `steps`
/// layers of random two-site unitaries (truncating only negligible weight).
pub fn random_state(L: usize, bc: BC, steps: usize, seed: u64) -> MPS {
    let site = Site::spin_half(Conserve::Sz);
    let states: Vec<&str>
        = (0..L).map(|i| if i % 2 == 0 { "up" } else { "down" }).collect();
    let mut psi = MPS::from_product_state(vec![site; L], &states, bc).unwrap();
    let mut rng = StdRng::seed_from_u64(seed);
    RandomUnitaryEvolution::new(steps, TruncParams::default())
        .run(&mut psi, &mut rng)
        .unwrap();
    psi
}
