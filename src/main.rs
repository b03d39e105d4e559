use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use mpc::config::Config;
use mpc::render::FrameRenderer;
use mpc::sim::{uniform_batch, write_step, Simulation, INIT_RANGES};
use mpc::video::{embed_html, video_filename, Encoder};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use simple_logger::SimpleLogger;
use std::fs;

// cargo run --release -- --mode swingup

fn main() -> Result<()> {
    SimpleLogger::new().with_level(LevelFilter::Info).env().init()?;
    let config = Config::parse();

    let dx = config.dynamics();
    let mode = config.mode;
    let goal = mode.goal();

    // 初期状態をランダムに生成
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
    let x_init = uniform_batch(&mut rng, config.n_batch, &INIT_RANGES);

    let renderer = FrameRenderer::new(config.n_batch, &dx).with_goal(goal);
    let controller = config.mpc(&dx);
    let mut sim = Simulation::new(controller, mode.cost(), dx, x_init, goal);

    // フレームは一時ディレクトリに残す
    let t_dir = tempfile::Builder::new()
        .prefix("skidsteer-")
        .tempdir()
        .context("Failed to create frame directory")?
        .keep();
    info!("Tmp dir: {}", t_dir.display());

    // ログファイルの作成
    let mut wtr = match &config.csv {
        Some(path) => Some(
            csv::Writer::from_path(path)
                .with_context(|| format!("Failed to open {}", path.display()))?,
        ),
        None => None,
    };

    let now = std::time::Instant::now();
    let steps = config.steps;
    sim.run(steps, |step| {
        renderer.save_frame(&t_dir, step.t, step.history)?;

        if let Some(wtr) = wtr.as_mut() {
            write_step(wtr, step)?;
        }

        let mean_err = step.states.iter().map(|x| (x - goal).norm()).sum::<f64>()
            / step.states.len().max(1) as f64;
        info!("t: {:3}/{}, mean |x - goal|: {:6.3}", step.t + 1, steps, mean_err);
        Ok(())
    })?;

    if !config.no_video {
        fs::create_dir_all(&config.out_dir)
            .with_context(|| format!("Failed to create {}", config.out_dir.display()))?;
        let vid_fname = config
            .out_dir
            .join(video_filename(mode, chrono::Utc::now()));
        let encoder = Encoder {
            fps: config.fps,
            crf: config.crf,
            ..Default::default()
        };
        encoder.encode(&t_dir, &vid_fname)?;

        let video = fs::read(&vid_fname)
            .with_context(|| format!("Failed to read {}", vid_fname.display()))?;
        let html = vid_fname.with_extension("html");
        fs::write(&html, embed_html(&video))
            .with_context(|| format!("Failed to write {}", html.display()))?;
        info!("Embedded video: {}", html.display());
    }

    let w = mode.state_weights();
    println!(
        "Cost vector: <cx, cy, cth> = <{:.3}, {:.3}, {:.3}>",
        w[0], w[1], w[2]
    );
    println!("Cumulative cost of {:.2}", sim.cum_cost);
    println!("elapsed: {:.2} sec", now.elapsed().as_secs_f64());
    Ok(())
}
