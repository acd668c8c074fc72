//! Synthetic market data with injected anomalies.
//!
//! Hourly ticks from 2023-01-01 with `volume ~ N(1000, 200)` and
//! `price ~ N(100, 10)`. Rows 100..110 get five times their volume and rows
//! 200..210 a +50 price jump, when the batch is long enough to hold them.

use std::f64::consts::TAU;
use std::ops::Range;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use marketwatch_core::Observation;

pub const VOLUME_SPIKE_ROWS: Range<usize> = 100..110;
pub const PRICE_JUMP_ROWS: Range<usize> = 200..210;

const VOLUME_SPIKE_FACTOR: f64 = 5.0;
const PRICE_JUMP: f64 = 50.0;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// Standard normal draw (Box-Muller).
fn standard_normal(rng: &mut StdRng) -> f64 {
    // gen::<f64>() is in [0, 1); 1 - u keeps ln away from 0
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}

pub fn generate_sample_data(n: usize, seed: u64) -> Vec<Observation> {
    let mut rng = StdRng::seed_from_u64(seed);
    let start = start_time();

    (0..n)
        .map(|i| {
            let mut volume = 1000.0 + 200.0 * standard_normal(&mut rng);
            let mut price = 100.0 + 10.0 * standard_normal(&mut rng);
            if VOLUME_SPIKE_ROWS.contains(&i) {
                volume *= VOLUME_SPIKE_FACTOR;
            }
            if PRICE_JUMP_ROWS.contains(&i) {
                price += PRICE_JUMP;
            }
            Observation::new(start + Duration::hours(i as i64))
                .with_feature("volume", volume)
                .with_feature("price", price)
        })
        .collect()
}
