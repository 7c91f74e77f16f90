//! Batch Coordinator
//!
//! Runs many whole conversions on a fixed pool of worker threads. Each worker
//! pulls jobs from a shared queue and reports events back over a channel. A
//! single conversion stays sequential; only whole conversions run in parallel.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{error, info};

use crate::output::SheetFormat;
use crate::pipeline::{ConversionSummary, Stage, TableExtractor};
use crate::vision::{RecognitionEngine, SharedEngine};

/// One input image and where its sheet goes
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: usize,
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: SheetFormat,
}

impl ConversionJob {
    pub fn new(id: usize, input: PathBuf, output: PathBuf, format: SheetFormat) -> Self {
        Self {
            id,
            input,
            output,
            format,
        }
    }
}

/// `<stem>.<ext>` inside `output_dir`, or beside the input
pub fn output_path(input: &Path, output_dir: Option<&Path>, format: SheetFormat) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_os_string())
        .unwrap_or_else(|| "table".into());
    let mut name = PathBuf::from(stem);
    name.set_extension(format.extension());

    match output_dir {
        Some(dir) => dir.join(name),
        None => input.with_file_name(name),
    }
}

/// Messages sent from workers to the caller
#[derive(Debug, Clone)]
pub enum ConversionEvent {
    /// A worker picked up the job
    Started { job: usize },
    /// Pipeline checkpoint reached
    Progress { job: usize, stage: Stage },
    /// Sheet written
    Finished {
        job: usize,
        summary: ConversionSummary,
    },
    /// Conversion failed; the message includes the error chain
    Failed { job: usize, error: String },
}

/// Fixed-size pool of conversion workers
pub struct BatchRunner {
    extractor: Arc<TableExtractor>,
    workers: usize,
}

impl BatchRunner {
    pub fn new(extractor: TableExtractor, workers: usize) -> Self {
        Self {
            extractor: Arc::new(extractor),
            workers: workers.max(1),
        }
    }

    /// Queue all jobs and start the workers.
    ///
    /// The event stream ends once every job has reported `Finished` or `Failed`.
    pub fn start<E>(&self, jobs: Vec<ConversionJob>, engine: SharedEngine<E>) -> BatchHandle
    where
        E: RecognitionEngine + Send + 'static,
    {
        let (job_tx, job_rx) = unbounded::<ConversionJob>();
        let (event_tx, events) = unbounded();

        let worker_count = self.workers.min(jobs.len()).max(1);
        info!("Starting {} jobs on {} workers", jobs.len(), worker_count);

        for job in jobs {
            // the receiver is alive, so this cannot fail
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let handles = (0..worker_count)
            .map(|worker| {
                let jobs = job_rx.clone();
                let events = event_tx.clone();
                let extractor = Arc::clone(&self.extractor);
                let engine = engine.clone();
                std::thread::spawn(move || run_worker(worker, &extractor, engine, jobs, events))
            })
            .collect();

        BatchHandle { events, handles }
    }
}

fn run_worker<E: RecognitionEngine>(
    worker: usize,
    extractor: &TableExtractor,
    mut engine: SharedEngine<E>,
    jobs: Receiver<ConversionJob>,
    events: Sender<ConversionEvent>,
) {
    info!("Worker {} starting...", worker);

    for job in jobs.iter() {
        let _ = events.send(ConversionEvent::Started { job: job.id });

        let progress = |stage: Stage| {
            let _ = events.send(ConversionEvent::Progress { job: job.id, stage });
        };
        let mut writer = job.format.writer();

        let event = match extractor.convert(
            &job.input,
            &job.output,
            &mut engine,
            writer.as_mut(),
            &progress,
        ) {
            Ok(summary) => ConversionEvent::Finished {
                job: job.id,
                summary,
            },
            Err(e) => {
                let e = anyhow::Error::new(e);
                error!("Conversion of {:?} failed: {:#}", job.input, e);
                ConversionEvent::Failed {
                    job: job.id,
                    error: format!("{:#}", e),
                }
            }
        };
        let _ = events.send(event);
    }

    info!("Worker {} exiting...", worker);
}

/// Running batch: event stream plus worker threads
pub struct BatchHandle {
    events: Receiver<ConversionEvent>,
    handles: Vec<JoinHandle<()>>,
}

impl BatchHandle {
    pub fn events(&self) -> &Receiver<ConversionEvent> {
        &self.events
    }

    /// Drain all remaining events, then wait for the workers
    pub fn wait(mut self) -> Vec<ConversionEvent> {
        let collected: Vec<_> = self.events.iter().collect();
        self.join_workers();
        collected
    }

    fn join_workers(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("Conversion worker panicked");
            }
        }
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        self.join_workers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::vision::BlankEngine;
    use image::{Rgb, RgbImage};
    use tempfile::TempDir;

    fn extractor() -> TableExtractor {
        let mut config = AppConfig::default();
        config.debug.enabled = false;
        TableExtractor::new(config)
    }

    #[test]
    fn test_output_path_defaults_beside_input() {
        assert_eq!(
            output_path(Path::new("/scans/march.jpg"), None, SheetFormat::Xlsx),
            PathBuf::from("/scans/march.xlsx")
        );
        assert_eq!(
            output_path(Path::new("/scans/march.jpg"), Some(Path::new("/out")), SheetFormat::Csv),
            PathBuf::from("/out/march.csv")
        );
    }

    #[test]
    fn test_batch_reports_success_and_failure() {
        let dir = TempDir::new().unwrap();
        let good = dir.path().join("good.png");
        RgbImage::from_pixel(120, 90, Rgb([255, 255, 255]))
            .save(&good)
            .unwrap();

        let jobs = vec![
            ConversionJob::new(0, good, dir.path().join("good.csv"), SheetFormat::Csv),
            ConversionJob::new(
                1,
                dir.path().join("missing.png"),
                dir.path().join("missing.csv"),
                SheetFormat::Csv,
            ),
        ];

        let runner = BatchRunner::new(extractor(), 2);
        let events = runner.start(jobs, SharedEngine::new(BlankEngine)).wait();

        let finished: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                ConversionEvent::Finished { job, .. } => Some(*job),
                _ => None,
            })
            .collect();
        let failed: Vec<&String> = events
            .iter()
            .filter_map(|e| match e {
                ConversionEvent::Failed { job: 1, error } => Some(error),
                _ => None,
            })
            .collect();

        assert_eq!(finished, vec![0]);
        assert_eq!(failed.len(), 1);
        assert!(failed[0].contains("missing.png"));
        assert!(dir.path().join("good.csv").exists());

        let started = events
            .iter()
            .filter(|e| matches!(e, ConversionEvent::Started { .. }))
            .count();
        assert_eq!(started, 2);
    }

    #[test]
    fn test_progress_events_are_ordered_per_job() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("page.png");
        RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]))
            .save(&input)
            .unwrap();

        let runner = BatchRunner::new(extractor(), 1);
        let events = runner
            .start(
                vec![ConversionJob::new(7, input, dir.path().join("page.xlsx"), SheetFormat::Xlsx)],
                SharedEngine::new(BlankEngine),
            )
            .wait();

        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                ConversionEvent::Progress { job: 7, stage } => Some(stage.percent()),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![0, 30, 70, 100]);
        assert!(matches!(events.last(), Some(ConversionEvent::Finished { job: 7, .. })));
    }

    #[test]
    fn test_empty_batch_finishes() {
        let runner = BatchRunner::new(extractor(), 3);
        let events = runner.start(Vec::new(), SharedEngine::new(BlankEngine)).wait();
        assert!(events.is_empty());
    }
}
