use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::mpsc::channel;
use std::sync::Arc;

use libh2g_decode::config::Config;
use libh2g_decode::process::{create_subsets, process_subset};
use libh2g_decode::worker_status::{RunPhase, WorkerStatus};

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn bar_style(phase: RunPhase) -> ProgressStyle {
    let color = match phase {
        RunPhase::Decoding => "cyan",
        RunPhase::Done => "green",
        RunPhase::Stalled => "red",
    };
    ProgressStyle::with_template(&format!("{{msg}} {{wide_bar:.{color}}} {{percent}}%"))
        .expect("Bar template is valid")
}

fn main() {
    // Create a cli
    let matches = Command::new("h2g_decode_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );

        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Data Path: {}", config.data_path.to_string_lossy());
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!(
        "First Run: {} Last Run: {}",
        config.first_run_number,
        config.last_run_number
    );
    log::info!("Devices: {}", config.num_devices);
    if !config.is_n_threads_valid() {
        log::error!("Number of worker threads must be at least 1!");
        return;
    }

    // One worker per subset of the run range; workers with nothing to do are
    // never spawned
    let subsets = create_subsets(&config);
    let (tx, rx) = channel::<WorkerStatus>();
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();
    let mut bars = Vec::new();
    for (worker_id, subset) in subsets.into_iter().enumerate() {
        if subset.is_empty() {
            continue;
        }
        let bar = pb_manager.add(ProgressBar::new(100));
        bar.set_style(bar_style(RunPhase::Decoding));
        bar.set_message(format!("Worker {worker_id}"));
        bars.push((worker_id, bar));

        let config = config.clone();
        let tx = tx.clone();
        let stop = stop.clone();
        handles.push(std::thread::spawn(move || {
            process_subset(config, tx, worker_id, subset, stop)
        }));
    }
    drop(tx);

    // The channel hangs up once every worker is done
    while let Ok(status) = rx.recv() {
        if let Some((_, bar)) = bars.iter().find(|(id, _)| *id == status.worker_id) {
            bar.set_style(bar_style(status.phase));
            bar.set_message(format!("Run {:0>3}", status.run_number));
            bar.set_position((status.progress * 100.0) as u64);
        }
    }

    for handle in handles {
        match handle.join() {
            Ok(Ok(())) => (),
            Ok(Err(e)) => log::error!("Decoding failed with error: {e}"),
            Err(_) => log::error!("Failed to join worker thread!"),
        }
    }
    for (_, bar) in &bars {
        bar.finish();
    }

    log::info!("Done.");
}
