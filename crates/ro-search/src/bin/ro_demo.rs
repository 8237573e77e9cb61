use ro_search::{
    Choice, Evolutionary, Experiment, Gaussian, GridSearch, HyperBand, HyperBandConfig,
    LogUniform, RunStatus, SearchStrategy, SeedSource, Uniform,
};
use ro_store::StoreConfig;
use tracing::info;
use tracing_subscriber::EnvFilter;

const HYPERBAND_RUNS: usize = 12;
const EPOCHS: u64 = 27;

/// Loss of a toy model after `epoch` units of training.
fn quadratic_loss(x: f64, lr: f64, epoch: u64) -> f64 {
    let fit = (x - 1.5).powi(2);
    let convergence = 1.0 / (1.0 + lr * 100.0 * epoch as f64);
    fit + convergence
}

fn run_hyperband(config: &StoreConfig, seeds: &mut SeedSource) -> anyhow::Result<()> {
    for _ in 0..HYPERBAND_RUNS {
        let experiment = Experiment::builder("demo_hyperband")
            .config(config.clone())
            .param("x", Uniform::new(-5.0, 5.0, seeds))
            .param("lr", LogUniform::new(1e-4, 1e-1, seeds))
            .build()?;
        let mut hb = HyperBand::new(experiment, HyperBandConfig::new(EPOCHS).with_eta(3.0))?;
        let params = hb.sample_all()?;
        let x = params["x"].as_f64().unwrap_or_default();
        let lr = params["lr"].as_f64().unwrap_or_default();

        let mut loss = f64::INFINITY;
        for epoch in 1..=EPOCHS {
            loss = quadratic_loss(x, lr, epoch);
            if hb.stop(loss)? {
                break;
            }
        }
        if hb.status() == RunStatus::Active {
            hb.add_result(loss)?;
        }
        info!(
            "bracket s={} finished as {:?} after {} steps (loss {:.4})",
            hb.bracket().s,
            hb.status(),
            hb.step(),
            loss
        );
    }

    let experiment = Experiment::builder("demo_hyperband")
        .config(config.clone())
        .build()?;
    if let Some(best) = experiment.minimum()? {
        info!("HyperBand best {} with result {:.4}", best.id(), best.result());
    }
    Ok(())
}

fn run_grid(config: &StoreConfig, seeds: &mut SeedSource) -> anyhow::Result<()> {
    let experiment = Experiment::builder("demo_grid")
        .config(config.clone())
        .param("layers", Choice::new(vec![1, 2, 3], seeds))
        .param("activation", Choice::new(vec!["relu", "tanh"], seeds))
        .build()?;
    let mut grid = GridSearch::new(experiment)?;

    for _ in 0..grid.index().size() {
        let params = grid.sample_all()?;
        let layers = params["layers"].as_f64().unwrap_or_default();
        let penalty = if params["activation"] == "tanh" { 0.1 } else { 0.0 };
        grid.add_result((layers - 2.0).abs() + penalty)?;
    }

    let top = grid.experiment().top(3, Default::default())?;
    for record in top.iter() {
        info!(
            "grid layers={} activation={} result={:.2}",
            record.get("layers").cloned().unwrap_or_default(),
            record.get("activation").cloned().unwrap_or_default(),
            record.result()
        );
    }
    Ok(())
}

fn run_evolutionary(config: &StoreConfig, seeds: &mut SeedSource) -> anyhow::Result<()> {
    let experiment = Experiment::builder("demo_evolutionary")
        .config(config.clone())
        .param("x", Gaussian::new(0.0, 0.5, seeds)?)
        .build()?;
    let mut evo = Evolutionary::new(experiment, seeds).with_elite_size(4);

    for _ in 0..30 {
        let params = evo.sample_all()?;
        let x = params["x"].as_f64().unwrap_or_default();
        evo.add_result((x - 1.5).powi(2))?;
    }

    let all = evo.experiment().all()?;
    info!(
        "evolutionary mean x={:?} std x={:?} over {} records",
        all.mean("x")?,
        all.std("x")?,
        all.count()
    );
    if let Some(best) = evo.experiment().minimum()? {
        info!("evolutionary best x={:?} result {:.4}", best.get("x"), best.result());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = StoreConfig::from_env();
    info!("Writing results under {}", config.root.display());
    let mut seeds = SeedSource::from_entropy();

    run_grid(&config, &mut seeds)?;
    run_evolutionary(&config, &mut seeds)?;
    run_hyperband(&config, &mut seeds)?;
    Ok(())
}
