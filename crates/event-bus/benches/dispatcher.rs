use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{criterion_group, criterion_main, Criterion};
use event_bus::{Engine, Event, EventType};
use rust_decimal::Decimal;
use scan_trader_core::TickData;

fn bench_tick_dispatch(c: &mut Criterion) {
    let engine = Engine::default();
    let delivered = Arc::new(AtomicU64::new(0));
    for _ in 0..4 {
        let counter = Arc::clone(&delivered);
        engine.register_fn(EventType::Tick, move |_| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        });
    }
    engine.start().expect("dispatch worker");

    c.bench_function("tick_dispatch_128_events_4_handlers", |b| {
        b.iter_custom(|iterations| {
            let mut elapsed = Duration::ZERO;
            for _ in 0..iterations {
                let target = engine.processed_event_count() + 128;
                let start = Instant::now();
                for i in 0..128u32 {
                    let tick = TickData::new("BTCUSDT", Decimal::from(40_000 + i), Decimal::ONE);
                    engine.publish(Event::tick(tick));
                }
                while engine.processed_event_count() < target {
                    std::hint::spin_loop();
                }
                elapsed += start.elapsed();
            }
            elapsed
        });
    });

    engine.stop();
}

criterion_group!(benches, bench_tick_dispatch);
criterion_main!(benches);
