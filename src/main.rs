//! # axiom-accel - pixmap churn soak
//!
//! Brings up acceleration on a headless screen and runs a create/destroy
//! loop through the block handler, the way a busy X server would, then
//! reports FBO pool and GL resource counters. Useful for spotting leaks and
//! tuning the pool.

use anyhow::{Context, Result};
use axiom_accel::gl::HeadlessGl;
use axiom_accel::host::{PixmapUsage, Screen};
use axiom_accel::{pixmap, AccelConfig, NullRenderer};
use clap::Parser;
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Parser)]
#[command(name = "axiom-accel")]
#[command(about = "Soak test for the GPU pixmap lifecycle on a headless screen")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Block-handler iterations to run
    #[arg(short, long, default_value_t = 1000)]
    iterations: u64,

    /// Pixmaps created per iteration
    #[arg(long, default_value_t = 8)]
    per_iteration: usize,

    /// Pixmap edge lengths to cycle through
    #[arg(long, value_delimiter = ',', default_value = "16,64,256,1024")]
    sizes: Vec<u32>,

    /// Pixmaps kept alive across iterations
    #[arg(long, default_value_t = 64)]
    live: usize,

    /// Fail texture allocation past this many live textures
    #[arg(long)]
    texture_budget: Option<usize>,

    /// Driver FBO size limit to report
    #[arg(long, default_value_t = 8192)]
    max_fbo_size: i32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting axiom-accel soak");
    info!("📄 Version: {} (built {})", axiom_accel::VERSION, env!("BUILD_DATE"));
    if let Some(commit) = option_env!("GIT_COMMIT") {
        debug!("commit {}", commit);
    }

    let config = match &cli.config {
        Some(path) => {
            let config = AccelConfig::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path))?;
            info!("✅ Configuration loaded from: {}", path);
            config.with_env_overrides()
        }
        None => {
            info!("📝 Using default configuration");
            AccelConfig::from_env()
        }
    };

    if cli.sizes.is_empty() {
        anyhow::bail!("--sizes needs at least one edge length");
    }

    let mut gl = HeadlessGl::default().with_max_renderbuffer_size(cli.max_fbo_size);
    if let Some(budget) = cli.texture_budget {
        gl = gl.with_texture_budget(budget);
    }
    let gl = Rc::new(gl);

    let mut screen = Screen::new(0);
    axiom_accel::init(
        &mut screen,
        config.screen.init_flags().bits(),
        gl.clone(),
        Box::new(NullRenderer),
        &config,
    )
    .context("Failed to initialize acceleration")?;

    let mut live = VecDeque::new();
    let mut created = 0u64;
    let mut gpu_backed = 0u64;
    let mut failed = 0u64;

    for iteration in 0..cli.iterations {
        for slot in 0..cli.per_iteration {
            let edge = cli.sizes[(iteration as usize + slot) % cli.sizes.len()];
            match screen.create_pixmap(edge, edge, 32, PixmapUsage::Default) {
                Some(id) => {
                    created += 1;
                    if pixmap::is_gpu_backed(&screen, id) {
                        gpu_backed += 1;
                    }
                    live.push_back(id);
                }
                None => failed += 1,
            }
        }
        while live.len() > cli.live {
            if let Some(id) = live.pop_front() {
                screen.destroy_pixmap(id);
            }
        }

        axiom_accel::block_handler(&mut screen);
        screen.event_loop.run_block();
    }

    for id in live.drain(..) {
        screen.destroy_pixmap(id);
    }

    if let Some(ctx) = screen.accel() {
        let stats = ctx.fbo_stats();
        info!(
            "📊 FBOs: created {}, reused {}, destroyed {}, purged {}, expired {}, evicted {}, \
             pooled {}",
            stats.created,
            stats.reused,
            stats.destroyed,
            stats.purged,
            stats.expired,
            stats.evicted,
            stats.pooled
        );
    }
    info!(
        "📊 Pixmaps: created {}, GPU-backed {}, memory {}, failed {}",
        created,
        gpu_backed,
        created - gpu_backed,
        failed
    );

    if !screen.close() {
        warn!("screen close reported failure");
    }
    // Without the screen strategy, close never reached the context
    axiom_accel::fini(&mut screen);

    let gl_stats = gl.stats();
    info!(
        "📊 GL: textures {} created / {} deleted, framebuffers {} created / {} deleted",
        gl_stats.textures_created,
        gl_stats.textures_deleted,
        gl_stats.framebuffers_created,
        gl_stats.framebuffers_deleted
    );
    if gl_stats.live_textures != 0 || gl_stats.live_framebuffers != 0 {
        error!(
            "❌ Leaked {} textures and {} framebuffers",
            gl_stats.live_textures, gl_stats.live_framebuffers
        );
        anyhow::bail!("GL resources leaked");
    }

    info!("✅ No GL resources leaked");
    Ok(())
}
