//! Performance benchmarks for the pixmap lifecycle
//!
//! Measures create/destroy churn with and without the FBO pool, and the
//! cost of a block-handler pass over a populated pool.

use axiom_accel::gl::HeadlessGl;
use axiom_accel::host::{PixmapUsage, Screen};
use axiom_accel::{AccelConfig, InitFlags, NullRenderer};
use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use std::rc::Rc;

fn accelerated_screen(config: &AccelConfig) -> Screen {
    let mut screen = Screen::new(0);
    axiom_accel::init(
        &mut screen,
        InitFlags::USE_SCREEN.bits(),
        Rc::new(HeadlessGl::default()),
        Box::new(NullRenderer),
        config,
    )
    .expect("headless init");
    screen
}

/// Benchmark create/destroy cycles for a few pixmap sizes
fn bench_pixmap_churn(c: &mut Criterion) {
    let mut group = c.benchmark_group("pixmap_churn");

    for (name, enabled) in [("pooled", true), ("unpooled", false)] {
        let mut config = AccelConfig::default();
        config.fbo_cache.enabled = enabled;

        for edge in [16u32, 256, 1024].iter() {
            group.bench_with_input(format!("{}_{}px", name, edge), edge, |b, &edge| {
                let mut screen = accelerated_screen(&config);
                b.iter(|| {
                    let id = screen
                        .create_pixmap(edge, edge, 32, PixmapUsage::Default)
                        .expect("pixmap");
                    black_box(screen.destroy_pixmap(black_box(id)));
                });
            });
        }
    }

    group.finish();
}

/// Benchmark a block-handler pass that expires a full pool
fn bench_block_handler_expiry(c: &mut Criterion) {
    let mut config = AccelConfig::default();
    config.fbo_cache.expire_ticks = 1;
    config.fbo_cache.max_per_size = 64;

    c.bench_function("block_handler_expire_256", |b| {
        b.iter_batched(
            || {
                let mut screen = accelerated_screen(&config);
                let ids: Vec<_> = (0..256u32)
                    .filter_map(|i| {
                        screen.create_pixmap(8 + i % 4, 8, 32, PixmapUsage::Default)
                    })
                    .collect();
                for id in ids {
                    screen.destroy_pixmap(id);
                }
                axiom_accel::block_handler(&mut screen);
                screen
            },
            |mut screen| {
                axiom_accel::block_handler(&mut screen);
                black_box(screen.accel().map(|ctx| ctx.fbo_stats().expired));
            },
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_pixmap_churn, bench_block_handler_expiry);
criterion_main!(benches);
