// THEORY:
// `ParallelOccupancyPipeline` produces the same reports as `OccupancyPipeline`
// but spreads the work of a frame over tokio's blocking pool. Detection runs as
// one task; the spots are then split into groups (one per CPU by default) and
// each group is evaluated in its own task against the shared, read-only contour
// rasters.
//
// Spot histories are never shared. Each group's `SpotOccupancyState`s are moved
// into its task and come back with the results on join, so nothing is locked
// and the first-match order within a spot is untouched. Frames are still
// processed one at a time: a spot's history for frame N+1 depends on frame N.
//
// With `keep_diagnostics` set, the edge maps come back from the detection task
// and are held exactly as the sequential pipeline holds them.

use crate::config::OccupancyConfig;
use crate::core_modules::edge_contours::EdgeMaps;
use crate::core_modules::stabilizer::{SpotOccupancyState, StabilizerState};
use crate::error::{ConfigError, PipelineError, Result};
use crate::pipeline::{FrameAnalyzer, OccupancyReport, SpotReport};
use futures::future::join_all;
use image::RgbImage;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tokio::task::{JoinError, spawn_blocking};
use tracing::{debug, info};

pub struct ParallelOccupancyPipeline {
    analyzer: Arc<FrameAnalyzer>,
    states: StabilizerState,
    frame_index: u64,
    worker_count: usize,
    keep_diagnostics: bool,
    last_edge_maps: Option<EdgeMaps>,
}

impl ParallelOccupancyPipeline {
    /// One spot group per logical CPU.
    pub fn new(config: OccupancyConfig) -> Result<Self, ConfigError> {
        Self::with_workers(config, num_cpus::get())
    }

    pub fn with_workers(
        config: OccupancyConfig,
        worker_count: usize,
    ) -> Result<Self, ConfigError> {
        let analyzer = FrameAnalyzer::new(&config)?;
        let worker_count = worker_count.max(1);
        info!(
            spots = config.spots.len(),
            workers = worker_count,
            "parallel occupancy pipeline ready"
        );
        Ok(Self {
            states: analyzer.initial_state(),
            analyzer: Arc::new(analyzer),
            frame_index: 0,
            worker_count,
            keep_diagnostics: config.keep_diagnostics,
            last_edge_maps: None,
        })
    }

    pub async fn generate_report(&mut self, frame: RgbImage) -> Result<OccupancyReport> {
        self.analyzer.check_frame(&frame)?;
        let frame = Arc::new(frame);

        let analyzer = Arc::clone(&self.analyzer);
        let detect_frame = Arc::clone(&frame);
        let detections = spawn_blocking(move || analyzer.detect(&detect_frame))
            .await
            .map_err(worker_failed)?;
        let contours = Arc::new(detections.contours);
        let maps = detections.maps;

        let spot_count = self.analyzer.spots().len();
        let group_size = spot_count.div_ceil(self.worker_count).max(1);
        let mut tasks = Vec::with_capacity(self.worker_count);
        let indices: Vec<usize> = (0..spot_count).collect();
        for group in indices.chunks(group_size) {
            let owned: Vec<(usize, SpotOccupancyState)> = group
                .iter()
                .map(|&index| (index, self.states.take(self.analyzer.spots()[index].id)))
                .collect();
            let analyzer = Arc::clone(&self.analyzer);
            let contours = Arc::clone(&contours);
            let frame = Arc::clone(&frame);
            tasks.push(spawn_blocking(move || {
                owned
                    .into_iter()
                    .map(|(index, mut state)| {
                        let spot = &analyzer.spots()[index];
                        let report = analyzer.evaluate_spot(spot, &contours, &frame, &mut state);
                        (index, state, report)
                    })
                    .collect::<Vec<_>>()
            }));
        }
        debug!(groups = tasks.len(), "spot groups dispatched");

        let mut results: Vec<(usize, SpotReport)> = Vec::with_capacity(spot_count);
        let mut failure = None;
        for joined in join_all(tasks).await {
            match joined {
                Ok(group) => {
                    for (index, state, report) in group {
                        self.states.insert(report.spot_id, state);
                        results.push((index, report));
                    }
                }
                Err(error) => failure = Some(error),
            }
        }
        if let Some(error) = failure {
            // Histories of the failed group are gone; restart them from scratch.
            for spot in self.analyzer.spots() {
                self.states.entry(spot.id);
            }
            return Err(worker_failed(error));
        }

        if self.keep_diagnostics {
            self.last_edge_maps = Some(maps);
        }
        results.sort_by_key(|(index, _)| *index);
        let report = OccupancyReport::new(
            self.frame_index,
            results.into_iter().map(|(_, report)| report).collect(),
        );
        self.frame_index += 1;
        Ok(report)
    }

    pub fn reset(&mut self) {
        self.states.reset();
        self.frame_index = 0;
        self.last_edge_maps = None;
    }

    /// Canny and closed maps of the last frame, when diagnostics are enabled.
    pub fn last_edge_maps(&self) -> Option<&EdgeMaps> {
        self.last_edge_maps.as_ref()
    }

    pub fn states(&self) -> &StabilizerState {
        &self.states
    }

    /// Processes frames from `frames` until the channel closes or `stop` is
    /// raised. Returns the number of frames processed.
    pub async fn run_stream<F>(
        &mut self,
        mut frames: mpsc::Receiver<RgbImage>,
        stop: &AtomicBool,
        mut sink: F,
    ) -> Result<u64>
    where
        F: FnMut(OccupancyReport),
    {
        let mut processed = 0;
        while let Some(frame) = frames.recv().await {
            if stop.load(Ordering::Relaxed) {
                info!(processed, "stream stopped");
                return Ok(processed);
            }
            sink(self.generate_report(frame).await?);
            processed += 1;
        }
        info!(processed, "stream ended");
        Ok(processed)
    }
}

fn worker_failed(error: JoinError) -> PipelineError {
    PipelineError::Worker(error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::OccupancyPipeline;
    use crate::pipeline::tests::{empty_frame, frame_with_car, scenario_config};

    fn frame_sequence() -> Vec<RgbImage> {
        let mut frames: Vec<_> = (0..4).map(|_| frame_with_car(60)).collect();
        frames.push(empty_frame());
        frames.extend((0..3).map(|_| frame_with_car(110)));
        frames
    }

    #[tokio::test]
    async fn matches_the_sequential_pipeline() {
        let mut sequential = OccupancyPipeline::new(scenario_config()).expect("valid config");
        let mut parallel =
            ParallelOccupancyPipeline::with_workers(scenario_config(), 3).expect("valid config");
        for frame in frame_sequence() {
            let expected = sequential.generate_report(&frame).expect("frame fits");
            let actual = parallel.generate_report(frame).await.expect("frame fits");
            assert_eq!(actual, expected);
        }
        assert_eq!(parallel.states(), sequential.states());
    }

    #[tokio::test]
    async fn single_worker_is_still_correct() {
        let mut parallel =
            ParallelOccupancyPipeline::with_workers(scenario_config(), 0).expect("valid config");
        let mut free = Vec::new();
        for _ in 0..3 {
            free.push(
                parallel
                    .generate_report(frame_with_car(60))
                    .await
                    .expect("frame fits")
                    .free_spots,
            );
        }
        assert_eq!(free, vec![4, 4, 3]);
    }

    #[tokio::test]
    async fn edge_maps_are_kept_when_diagnostics_are_enabled() {
        let mut config = scenario_config();
        config.keep_diagnostics = true;
        let mut parallel =
            ParallelOccupancyPipeline::with_workers(config, 2).expect("valid config");
        assert!(parallel.last_edge_maps().is_none());
        parallel
            .generate_report(frame_with_car(60))
            .await
            .expect("frame fits");
        let maps = parallel.last_edge_maps().expect("maps kept");
        assert_eq!(maps.canny.dimensions(), (200, 100));
        assert!(maps.closed.iter().any(|value| *value > 0));
        parallel.reset();
        assert!(parallel.last_edge_maps().is_none());
    }

    #[tokio::test]
    async fn edge_maps_are_dropped_by_default() {
        let mut parallel = ParallelOccupancyPipeline::new(scenario_config()).expect("valid config");
        parallel
            .generate_report(frame_with_car(60))
            .await
            .expect("frame fits");
        assert!(parallel.last_edge_maps().is_none());
    }

    #[tokio::test]
    async fn wrong_frame_size_is_rejected() {
        let mut parallel = ParallelOccupancyPipeline::new(scenario_config()).expect("valid config");
        let result = parallel.generate_report(RgbImage::new(10, 10)).await;
        assert!(matches!(result, Err(PipelineError::FrameSizeMismatch { .. })));
        assert_eq!(parallel.states().len(), 4);
    }

    #[tokio::test]
    async fn run_stream_ends_when_the_channel_closes() {
        let mut parallel = ParallelOccupancyPipeline::new(scenario_config()).expect("valid config");
        let (sender, receiver) = mpsc::channel(4);
        tokio::spawn(async move {
            for _ in 0..3 {
                if sender.send(frame_with_car(60)).await.is_err() {
                    break;
                }
            }
        });
        let stop = AtomicBool::new(false);
        let mut reports = Vec::new();
        let processed = parallel
            .run_stream(receiver, &stop, |report| reports.push(report))
            .await
            .expect("frames fit");
        assert_eq!(processed, 3);
        assert_eq!(reports.last().map(|report| report.free_spots), Some(3));
    }

    #[tokio::test]
    async fn run_stream_honours_the_stop_flag() {
        let mut parallel = ParallelOccupancyPipeline::new(scenario_config()).expect("valid config");
        let (sender, receiver) = mpsc::channel(8);
        for _ in 0..5 {
            sender.send(empty_frame()).await.expect("receiver alive");
        }
        drop(sender);
        let stop = AtomicBool::new(true);
        let processed = parallel
            .run_stream(receiver, &stop, |_| {})
            .await
            .expect("frames fit");
        assert_eq!(processed, 0);
    }
}
