//! Runs independent random walks over a 2D standard Gaussian, histograms the distance of the
//! samples to the origin with binning-analysis error bars, and compares the result with the
//! exact Rayleigh distribution.
//!
//! Usage: `demo [config.toml]`. Without a configuration file a small built-in one is used.

use mini_mhrw::config::RunConfig;
use mini_mhrw::dispatch::{Dispatcher, TaskDispatcher};
use mini_mhrw::logging::Logger;
use mini_mhrw::progress::ProgressReporter;
use mini_mhrw::valuehist::{ResultsCollectorWithBinning, ValueHistogramTask};
use mini_mhrw::walkers::{rayleigh_probability, DistanceToOrigin, IsotropicGaussianWalker};
use std::env;
use std::error::Error;
use std::fs::File;
use std::io::BufWriter;
use std::time::Instant;

const DEFAULT_CONFIG: &str = r#"
[walk]
step_size = 0.5
n_sweep = 10
n_therm = 500
n_run = 32768

[run]
n_repeats = 8
base_seed = 42
periodic_status_report_ms = 250

[histogram]
min = 0.0
max = 4.0
num_bins = 20
binning_num_levels = 8
"#;

const OUTPUT_FILE: &str = "demo_histogram.tsv";

type WalkerFn = fn(&Logger) -> mini_mhrw::Result<IsotropicGaussianWalker>;

fn gaussian_2d(_logger: &Logger) -> mini_mhrw::Result<IsotropicGaussianWalker> {
    Ok(IsotropicGaussianWalker::standard(2))
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = match env::args().nth(1) {
        Some(path) => RunConfig::from_file(path)?,
        None => RunConfig::from_toml_str(DEFAULT_CONFIG)?,
    };
    let n_repeats = config.run.n_repeats;

    let cdata = config.value_histogram_cdata(gaussian_2d as WalkerFn, DistanceToOrigin)?;
    println!("Random walk parameters:\n{}", cdata.describe_mhrw_params());

    let mut dispatcher = Dispatcher::<ValueHistogramTask<WalkerFn, DistanceToOrigin>, _>::new(
        &cdata,
        n_repeats,
        config.build_backend()?,
    )
    .with_error_policy(config.run.error_policy);

    let reporter = ProgressReporter::new(n_repeats);
    dispatcher.set_status_report_handler(reporter.handler());
    dispatcher.request_periodic_status_report(config.periodic_status_report());

    let start = Instant::now();
    let outcome = dispatcher.run();
    reporter.finish();
    match outcome {
        Err(e) if e.is_interrupted() => eprintln!("Interrupted, reporting completed runs only."),
        other => other?,
    }
    println!("Ran {} walks in {:.2?}", n_repeats, start.elapsed());
    for failure in dispatcher.task_failures() {
        eprintln!("Task #{} failed: {}", failure.task, failure.error);
    }

    let results = ResultsCollectorWithBinning::collect(dispatcher.collected_task_results())?;
    println!("{}", results.final_report(100));

    let hist = results.final_histogram();
    let max_deviation = (0..hist.num_bins())
        .map(|k| {
            let exact = rayleigh_probability(
                hist.params.bin_lower_value(k),
                hist.params.bin_upper_value(k),
            );
            (hist.count(k) - exact).abs() / hist.error_bar(k)
        })
        .filter(|d| d.is_finite())
        .fold(0.0_f64, f64::max);
    println!(
        "Largest deviation from the exact distribution: {:.2} error bars",
        max_deviation
    );

    results.print_histogram_csv(BufWriter::new(File::create(OUTPUT_FILE)?))?;
    println!("Histogram written to {OUTPUT_FILE}");
    Ok(())
}
