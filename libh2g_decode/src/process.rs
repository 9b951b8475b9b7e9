use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use super::config::Config;
use super::decoder::HgcDecoder;
use super::error::ProcessorError;
use super::file_stream::H2gStream;
use super::hdf_writer::HdfWriter;
use super::worker_status::{RunPhase, WorkerStatus};

/// Reconstruct one run file into HDF5 output plus a stats report.
pub fn process_run(
    config: &Config,
    run_number: i32,
    tx: &Sender<WorkerStatus>,
    worker_id: &usize,
    stop: &Arc<AtomicBool>,
) -> Result<(), ProcessorError> {
    let logger = spdlog::default_logger();

    let run_path = config.get_run_file_name(run_number);
    let stream = H2gStream::open(&run_path, logger.clone())?;
    let channel_map = config.channel_map()?;
    let mut writer = HdfWriter::new(
        &config.get_hdf_file_name(run_number)?,
        &channel_map,
        config.num_devices,
        stream.num_samples(),
    )?;
    let mut decoder = HgcDecoder::new(config, stream, stop.clone(), logger.clone())?;

    // Only report progress at every percent of the file
    let report_step: f32 = 0.01;
    let mut reported: f32 = 0.0;
    tx.send(WorkerStatus::new(
        *worker_id,
        run_number,
        0.0,
        RunPhase::Decoding,
    ))?;
    while let Some(event) = decoder.next_event()? {
        writer.write_event(event)?;
        if decoder.progress() - reported > report_step {
            reported = decoder.progress();
            tx.send(WorkerStatus::new(
                *worker_id,
                run_number,
                reported,
                RunPhase::Decoding,
            ))?;
        }
    }
    writer.close()?;

    let stats = decoder.stats(run_number);
    stats.log(&logger);
    stats.write(&config.get_stats_file_name(run_number))?;

    tx.send(WorkerStatus::new(
        *worker_id,
        run_number,
        1.0,
        if stats.stalled {
            RunPhase::Stalled
        } else {
            RunPhase::Done
        },
    ))?;
    Ok(())
}

/// The function to be called by a separate thread (typically the UI).
/// Processes every run in the configured range.
pub fn process(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    stop: Arc<AtomicBool>,
) -> Result<(), ProcessorError> {
    for run in config.first_run_number..(config.last_run_number + 1) {
        if config.does_run_exist(run) {
            spdlog::info!("Processing run {}...", run);
            process_run(&config, run, &tx, &worker_id, &stop)?;
            spdlog::info!("Finished processing run {}.", run);
        } else {
            spdlog::info!("Run {} does not exist, skipping...", run);
        }
    }
    Ok(())
}

/// Process a subset of runs
pub fn process_subset(
    config: Config,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
    subset: Vec<i32>,
    stop: Arc<AtomicBool>,
) -> Result<(), ProcessorError> {
    for run in subset {
        if config.does_run_exist(run) {
            spdlog::info!("Processing run {}...", run);
            process_run(&config, run, &tx, &worker_id, &stop)?;
            spdlog::info!("Finished processing run {}.", run);
        } else {
            spdlog::info!("Run {} does not exist, skipping...", run);
        }
    }
    Ok(())
}

/// Divide the run range into one subset per worker thread
pub fn create_subsets(config: &Config) -> Vec<Vec<i32>> {
    let mut subsets: Vec<Vec<i32>> = vec![Vec::new(); config.n_threads as usize];
    let n_subsets = subsets.len();

    for (idx, run) in (config.first_run_number..(config.last_run_number + 1)).enumerate() {
        subsets[idx % n_subsets].push(run)
    }

    subsets
}
