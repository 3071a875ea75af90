use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vn_sim::vn_transform::{transform_by_name, KeyMaterial};

/// Benchmark payload transform throughput and passphrase stretching cost
fn main() {
    std::env::set_var("RUST_LOG", "error");
    let _ = simple_logger::init();

    println!("\n=== Payload Transform Benchmark ===\n");

    let mut rng = StdRng::seed_from_u64(42);
    let key = KeyMaterial::random(&mut rng);

    let sizes = [64usize, 512, 1024, 1500, 8192];
    let samples = 2000;

    println!(
        "{:<16} {:>8} {:>14} {:>14} {:>12}",
        "Transform", "Bytes", "Seal (us)", "Open (us)", "MB/s"
    );
    println!("{}", "-".repeat(68));

    for name in ["keyed-stream", "additive"] {
        let transform = transform_by_name(name).unwrap();
        for size in sizes {
            let mut payload = vec![0u8; size];
            rng.fill(&mut payload[..]);

            // Warm-up
            let sealed = transform.seal(&key, 0x100, 1, &payload);
            assert_eq!(transform.open(&key, 0x100, 1, &sealed).unwrap(), payload);

            let start = Instant::now();
            for seq in 0..samples {
                let _ = transform.seal(&key, 0x100, seq, &payload);
            }
            let seal_s = start.elapsed().as_secs_f64();

            let start = Instant::now();
            for _ in 0..samples {
                let _ = transform.open(&key, 0x100, 1, &sealed);
            }
            let open_s = start.elapsed().as_secs_f64();

            let seal_us = seal_s / samples as f64 * 1e6;
            let open_us = open_s / samples as f64 * 1e6;
            let mbps = (size * samples as usize) as f64 / seal_s / 1e6;

            println!(
                "{:<16} {:>8} {:>14.2} {:>14.2} {:>12.1}",
                name, size, seal_us, open_us, mbps
            );
        }
    }

    println!("\n=== Passphrase Stretching (Argon2id) ===\n");

    let runs = 10;
    let start = Instant::now();
    for i in 0..runs {
        let _ = KeyMaterial::from_passphrase("bench passphrase", &format!("r0<->r{}", i)).unwrap();
    }
    let avg_ms = start.elapsed().as_secs_f64() / runs as f64 * 1000.0;
    println!("  Average derivation: {:.2} ms per tunnel", avg_ms);
    println!("  Paid once per tunnel at scenario setup, never per packet.");
}
