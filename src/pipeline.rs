// THEORY:
// The `pipeline` module is the top-level API of the occupancy engine. It wires
// the core modules into one per-frame pass and keeps the only state that
// survives between frames: the per-spot occupancy histories.
//
// One frame flows through these stages:
// 1.  **Prepare**: grayscale, blur and confine the frame to the area of interest.
// 2.  **Detect**: extract closed external contours and keep the ones shaped like a car.
// 3.  **Rasterize**: fill every surviving contour once; all spots share the rasters.
// 4.  **Per spot**: first-match intersection test, temporal stabilization, and
//     colour classification when the stable status is Occupied.
// 5.  **Report**: spot results ordered by id plus the free-spot count.
//
// Stages 1-3 and the per-spot step live in `FrameAnalyzer`, which holds no
// mutable state, so the parallel pipeline runs exactly the same code.

use crate::config::OccupancyConfig;
use crate::core_modules::color::{ColorClassifier, ColorLabel, classifier_from_config};
use crate::core_modules::contour_filter::VehicleContourFilter;
use crate::core_modules::edge_contours::{EdgeContourExtractor, EdgeMaps};
use crate::core_modules::preprocess::FramePreprocessor;
use crate::core_modules::region_mask::RegionMask;
use crate::core_modules::spot::SpotId;
use crate::core_modules::spot_intersection::{
    ContourMask, SpotGeometry, SpotIntersectionEvaluator, crop_region,
};
use crate::core_modules::stabilizer::{SpotOccupancyState, StabilizerState, TemporalStabilizer};
use crate::error::{ConfigError, PipelineError, Result};
use image::RgbImage;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

// Re-export key data structures for the public API.
pub use crate::core_modules::stabilizer::OccupancyStatus;

/// The outcome for one spot in one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpotReport {
    pub spot_id: SpotId,
    pub status: OccupancyStatus,
    /// Present only when the spot is Occupied.
    pub color: Option<ColorLabel>,
}

/// The primary output of the pipeline for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancyReport {
    /// Frames processed since the last reset, starting at 0.
    pub frame_index: u64,
    /// One entry per spot, ordered by spot id.
    pub spots: Vec<SpotReport>,
    pub free_spots: usize,
    pub total_spots: usize,
}

impl OccupancyReport {
    pub fn new(frame_index: u64, spots: Vec<SpotReport>) -> Self {
        let total_spots = spots.len();
        let occupied = spots.iter().filter(|spot| spot.status.is_occupied()).count();
        Self {
            frame_index,
            spots,
            free_spots: total_spots - occupied,
            total_spots,
        }
    }

    pub fn spot(&self, id: SpotId) -> Option<&SpotReport> {
        self.spots.iter().find(|spot| spot.spot_id == id)
    }
}

/// The accepted, rasterized vehicle contours of one frame.
pub(crate) struct FrameDetections {
    pub contours: Vec<ContourMask>,
    pub maps: EdgeMaps,
}

/// Everything that is fixed for a run: masks, stage settings and the classifier.
pub(crate) struct FrameAnalyzer {
    frame_width: u32,
    frame_height: u32,
    area_of_interest: RegionMask,
    preprocessor: FramePreprocessor,
    extractor: EdgeContourExtractor,
    filter: VehicleContourFilter,
    evaluator: SpotIntersectionEvaluator,
    stabilizer: TemporalStabilizer,
    classifier: Arc<dyn ColorClassifier>,
}

impl FrameAnalyzer {
    pub fn new(config: &OccupancyConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (width, height) = (config.frame_width, config.frame_height);
        Ok(Self {
            frame_width: width,
            frame_height: height,
            area_of_interest: RegionMask::from_polygon(width, height, &config.area_of_interest),
            preprocessor: FramePreprocessor::new(config.preprocess),
            extractor: EdgeContourExtractor::new(config.edges),
            filter: VehicleContourFilter::new(config.vehicle_filter),
            evaluator: SpotIntersectionEvaluator::new(
                &config.spots,
                width,
                height,
                config.min_intersection_fraction,
                config.region_padding,
            ),
            stabilizer: TemporalStabilizer::new(config.consecutive_frames_threshold),
            classifier: classifier_from_config(&config.color),
        })
    }

    pub fn spots(&self) -> &[SpotGeometry] {
        self.evaluator.spots()
    }

    pub fn initial_state(&self) -> StabilizerState {
        StabilizerState::new(self.spots().iter().map(|spot| spot.id))
    }

    pub fn check_frame(&self, frame: &RgbImage) -> Result<()> {
        if frame.dimensions() != (self.frame_width, self.frame_height) {
            return Err(PipelineError::FrameSizeMismatch {
                expected_width: self.frame_width,
                expected_height: self.frame_height,
                actual_width: frame.width(),
                actual_height: frame.height(),
            });
        }
        Ok(())
    }

    /// Stages 1 to 3: prepared frame, accepted contours and their rasters.
    pub fn detect(&self, frame: &RgbImage) -> FrameDetections {
        let prepared = self.preprocessor.prepare(frame, &self.area_of_interest);
        let extraction = self.extractor.extract(&prepared, &self.area_of_interest);
        let found = extraction.contours.len();
        let accepted = self.filter.filter(extraction.contours);
        debug!(found, accepted = accepted.len(), "vehicle contours");
        FrameDetections {
            contours: self.evaluator.rasterize(accepted),
            maps: extraction.maps,
        }
    }

    /// Stage 4 for a single spot.
    pub fn evaluate_spot(
        &self,
        spot: &SpotGeometry,
        contours: &[ContourMask],
        frame: &RgbImage,
        state: &mut SpotOccupancyState,
    ) -> SpotReport {
        let matched = self.evaluator.evaluate(spot, contours);
        let status = self.stabilizer.observe(state, matched.is_some());

        let color = match matched {
            Some(matched) if status.is_occupied() => {
                let region = crop_region(frame, matched.vehicle_region);
                Some(self.classifier.classify(&region))
            }
            _ => None,
        };
        debug!(
            spot = spot.id,
            matched = ?matched.map(|m| m.contour_index),
            streak = state.consecutive_occupied_frames,
            ?status,
            "spot evaluated"
        );

        SpotReport {
            spot_id: spot.id,
            status,
            color,
        }
    }
}

/// The main, top-level struct for the occupancy engine.
pub struct OccupancyPipeline {
    analyzer: FrameAnalyzer,
    states: StabilizerState,
    frame_index: u64,
    keep_diagnostics: bool,
    last_edge_maps: Option<EdgeMaps>,
}

impl OccupancyPipeline {
    pub fn new(config: OccupancyConfig) -> Result<Self, ConfigError> {
        let analyzer = FrameAnalyzer::new(&config)?;
        info!(
            spots = config.spots.len(),
            width = config.frame_width,
            height = config.frame_height,
            strategy = ?config.color.strategy,
            "occupancy pipeline ready"
        );
        Ok(Self {
            states: analyzer.initial_state(),
            analyzer,
            frame_index: 0,
            keep_diagnostics: config.keep_diagnostics,
            last_edge_maps: None,
        })
    }

    pub fn generate_report(&mut self, frame: &RgbImage) -> Result<OccupancyReport> {
        self.analyzer.check_frame(frame)?;
        let detections = self.analyzer.detect(frame);

        let mut spots = Vec::with_capacity(self.analyzer.spots().len());
        for spot in self.analyzer.spots() {
            let state = self.states.entry(spot.id);
            spots.push(
                self.analyzer
                    .evaluate_spot(spot, &detections.contours, frame, state),
            );
        }

        if self.keep_diagnostics {
            self.last_edge_maps = Some(detections.maps);
        }
        let report = OccupancyReport::new(self.frame_index, spots);
        self.frame_index += 1;
        Ok(report)
    }

    /// Forgets every spot's history so the next frame starts a new stream.
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

    /// Processes frames until the source runs dry or `stop` is raised, handing
    /// every report to `sink`. Returns the number of frames processed.
    pub fn run_stream<I, F>(&mut self, frames: I, stop: &AtomicBool, mut sink: F) -> Result<u64>
    where
        I: IntoIterator<Item = RgbImage>,
        F: FnMut(OccupancyReport),
    {
        let mut processed = 0;
        for frame in frames {
            if stop.load(Ordering::Relaxed) {
                info!(processed, "stream stopped");
                return Ok(processed);
            }
            sink(self.generate_report(&frame)?);
            processed += 1;
        }
        info!(processed, "stream ended");
        Ok(processed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::VehicleFilterConfig;
    use crate::core_modules::spot::{ParkingSpot, Point, SpotShape};
    use image::Rgb;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    pub const RED_CAR: Rgb<u8> = Rgb([200, 30, 30]);

    /// A 200x100 lot with four 50-pixel-wide spots side by side.
    pub fn scenario_config() -> OccupancyConfig {
        let mut config = OccupancyConfig {
            frame_width: 200,
            frame_height: 100,
            spots: (0..4)
                .map(|index| {
                    ParkingSpot::new(
                        index + 1,
                        SpotShape::Rectangle {
                            x: index as i32 * 50,
                            y: 0,
                            width: 49,
                            height: 99,
                        },
                    )
                })
                .collect(),
            area_of_interest: vec![
                Point::new(0, 0),
                Point::new(199, 0),
                Point::new(199, 99),
                Point::new(0, 99),
            ],
            vehicle_filter: VehicleFilterConfig {
                min_area: 500.0,
                max_area: 100_000.0,
                min_aspect_ratio: 0.2,
                max_aspect_ratio: 6.0,
            },
            region_padding: 5,
            consecutive_frames_threshold: 3,
            ..OccupancyConfig::default()
        };
        config.edges.close_kernel_size = 5;
        config.edges.close_iterations = 2;
        config
    }

    pub fn empty_frame() -> RgbImage {
        RgbImage::new(200, 100)
    }

    /// A red car parked inside spot 2.
    pub fn frame_with_car(x: i32) -> RgbImage {
        let mut frame = empty_frame();
        draw_filled_rect_mut(&mut frame, Rect::at(x, 20).of_size(30, 60), RED_CAR);
        frame
    }

    #[test]
    fn spot_becomes_occupied_on_the_third_frame() {
        let mut pipeline = OccupancyPipeline::new(scenario_config()).expect("valid config");
        let frame = frame_with_car(60);
        let reports: Vec<_> = (0..5)
            .map(|_| pipeline.generate_report(&frame).expect("frame fits"))
            .collect();

        let free: Vec<_> = reports.iter().map(|report| report.free_spots).collect();
        assert_eq!(free, vec![4, 4, 3, 3, 3]);
        assert_eq!(reports[1].spot(2).and_then(|spot| spot.color.clone()), None);

        let spot = reports[2].spot(2).expect("spot 2 reported");
        assert_eq!(spot.status, OccupancyStatus::Occupied);
        assert_eq!(spot.color, Some(ColorLabel::named("Red")));
        for id in [1, 3, 4] {
            let other = reports[4].spot(id).expect("spot reported");
            assert_eq!(other.status, OccupancyStatus::Free);
            assert_eq!(other.color, None);
        }
        assert_eq!(reports[4].frame_index, 4);
        assert_eq!(reports[4].total_spots, 4);
    }

    #[test]
    fn default_configuration_sees_a_mid_contrast_car() {
        // Blue car on grey pavement, well inside default spot 2.
        let config = OccupancyConfig::default();
        let mut frame = RgbImage::from_pixel(
            config.frame_width,
            config.frame_height,
            Rgb([90, 90, 90]),
        );
        draw_filled_rect_mut(
            &mut frame,
            Rect::at(260, 280).of_size(200, 160),
            Rgb([30, 60, 180]),
        );
        let mut pipeline = OccupancyPipeline::new(config).expect("valid config");
        let reports: Vec<_> = (0..4)
            .map(|_| pipeline.generate_report(&frame).expect("frame fits"))
            .collect();

        let free: Vec<_> = reports.iter().map(|report| report.free_spots).collect();
        assert_eq!(free, vec![4, 4, 3, 3]);
        let spot = reports[2].spot(2).expect("spot 2 reported");
        assert_eq!(spot.status, OccupancyStatus::Occupied);
        assert!(spot.color.is_some());
    }

    #[test]
    fn one_empty_frame_frees_the_spot() {
        let mut pipeline = OccupancyPipeline::new(scenario_config()).expect("valid config");
        let car = frame_with_car(60);
        for _ in 0..3 {
            pipeline.generate_report(&car).expect("frame fits");
        }
        let report = pipeline.generate_report(&empty_frame()).expect("frame fits");
        assert_eq!(report.free_spots, 4);
        assert_eq!(
            report.spot(2).map(|spot| spot.status),
            Some(OccupancyStatus::Free)
        );
    }

    #[test]
    fn spot_outside_the_area_of_interest_stays_free() {
        let mut config = scenario_config();
        config.area_of_interest = vec![
            Point::new(0, 0),
            Point::new(99, 0),
            Point::new(99, 99),
            Point::new(0, 99),
        ];
        let mut pipeline = OccupancyPipeline::new(config).expect("valid config");
        let mut frame = empty_frame();
        draw_filled_rect_mut(&mut frame, Rect::at(110, 20).of_size(30, 60), RED_CAR);
        for _ in 0..5 {
            let report = pipeline.generate_report(&frame).expect("frame fits");
            assert_eq!(
                report.spot(3).map(|spot| spot.status),
                Some(OccupancyStatus::Free)
            );
            assert_eq!(report.free_spots, 4);
        }
    }

    #[test]
    fn spots_are_reported_in_id_order() {
        let mut config = scenario_config();
        config.spots.reverse();
        let mut pipeline = OccupancyPipeline::new(config).expect("valid config");
        let report = pipeline.generate_report(&empty_frame()).expect("frame fits");
        let ids: Vec<_> = report.spots.iter().map(|spot| spot.spot_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn wrong_frame_size_is_rejected() {
        let mut pipeline = OccupancyPipeline::new(scenario_config()).expect("valid config");
        let result = pipeline.generate_report(&RgbImage::new(100, 100));
        assert!(matches!(
            result,
            Err(PipelineError::FrameSizeMismatch {
                actual_width: 100,
                ..
            })
        ));
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = scenario_config();
        config.consecutive_frames_threshold = 0;
        assert!(OccupancyPipeline::new(config).is_err());
    }

    #[test]
    fn reset_starts_a_new_stream() {
        let mut pipeline = OccupancyPipeline::new(scenario_config()).expect("valid config");
        let car = frame_with_car(60);
        for _ in 0..3 {
            pipeline.generate_report(&car).expect("frame fits");
        }
        pipeline.reset();
        let report = pipeline.generate_report(&car).expect("frame fits");
        assert_eq!(report.frame_index, 0);
        assert_eq!(report.free_spots, 4);
    }

    #[test]
    fn diagnostics_are_kept_only_when_enabled() {
        let mut pipeline = OccupancyPipeline::new(scenario_config()).expect("valid config");
        pipeline.generate_report(&frame_with_car(60)).expect("frame fits");
        assert!(pipeline.last_edge_maps().is_none());

        let mut config = scenario_config();
        config.keep_diagnostics = true;
        let mut pipeline = OccupancyPipeline::new(config).expect("valid config");
        pipeline.generate_report(&frame_with_car(60)).expect("frame fits");
        let maps = pipeline.last_edge_maps().expect("maps kept");
        assert_eq!(maps.closed.dimensions(), (200, 100));
    }

    #[test]
    fn run_stream_stops_when_the_flag_is_raised() {
        let mut pipeline = OccupancyPipeline::new(scenario_config()).expect("valid config");
        let stop = AtomicBool::new(false);
        let mut seen = Vec::new();
        let processed = pipeline
            .run_stream((0..5).map(|_| frame_with_car(60)), &stop, |report| {
                seen.push(report.frame_index);
                if seen.len() == 2 {
                    stop.store(true, Ordering::Relaxed);
                }
            })
            .expect("frames fit");
        assert_eq!(processed, 2);
        assert_eq!(seen, vec![0, 1]);
    }

    #[test]
    fn run_stream_drains_the_source() {
        let mut pipeline = OccupancyPipeline::new(scenario_config()).expect("valid config");
        let stop = AtomicBool::new(false);
        let mut last = None;
        let frames = (0..4).map(|_| frame_with_car(60));
        let processed = pipeline
            .run_stream(frames, &stop, |report| last = Some(report))
            .expect("frames fit");
        assert_eq!(processed, 4);
        assert_eq!(last.map(|report| report.free_spots), Some(3));
    }

    #[test]
    fn report_serializes_to_json() {
        let report = OccupancyReport::new(
            7,
            vec![SpotReport {
                spot_id: 2,
                status: OccupancyStatus::Occupied,
                color: Some(ColorLabel::named("Red")),
            }],
        );
        let json = serde_json::to_value(&report).expect("serializable");
        assert_eq!(json["frame_index"], 7);
        assert_eq!(json["free_spots"], 0);
        assert_eq!(json["spots"][0]["status"], "occupied");
        assert_eq!(json["spots"][0]["color"]["name"], "Red");
    }
}
