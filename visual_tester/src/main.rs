use anyhow::{Context, Result, bail};
use image::{GrayImage, RgbImage};
use opencv::{
    core::{self, Mat, Scalar, Vector},
    highgui, imgproc,
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter},
};
use parking_vision::core_modules::spot::ParkingSpot;
use parking_vision::{
    OccupancyConfig, OccupancyPipeline, OccupancyReport, OccupancyStatus, SpotReport,
};
use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const WINDOW: &str = "parking_vision";
const FREE_COLOR: (f64, f64, f64) = (0.0, 255.0, 0.0);
const OCCUPIED_COLOR: (f64, f64, f64) = (0.0, 0.0, 255.0);

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // --- 1. Argument Parsing & Setup ---
    let mut input_path = None;
    let mut output_path = None;
    let mut config_path = None;
    let mut show_debug = false;
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().context("--config needs a path")?),
            "--output" => output_path = Some(args.next().context("--output needs a path")?),
            "--debug" => show_debug = true,
            _ => input_path = Some(arg),
        }
    }
    let Some(input_path) = input_path else {
        bail!("usage: visual_tester <video> [--config <json>] [--output <video>] [--debug]");
    };

    // --- 2. Pipeline Initialization ---
    let mut config = match &config_path {
        Some(path) => OccupancyConfig::load(path)
            .with_context(|| format!("failed to load {path}"))?,
        None => OccupancyConfig::default(),
    };
    config.keep_diagnostics |= show_debug;
    let spots = config.spots.clone();
    let (width, height) = (config.frame_width, config.frame_height);
    let mut pipeline = OccupancyPipeline::new(config).context("invalid configuration")?;

    // --- 3. Video I/O Initialization ---
    let mut cap = VideoCapture::from_file(&input_path, videoio::CAP_ANY)?;
    if !cap.is_opened()? {
        bail!("cannot open video {input_path}");
    }
    let fps = cap.get(videoio::CAP_PROP_FPS)?;
    let frame_size = core::Size::new(width as i32, height as i32);
    let mut writer = match &output_path {
        Some(path) => Some(VideoWriter::new(
            path,
            VideoWriter::fourcc('m', 'p', '4', 'v')?,
            if fps > 0.0 { fps } else { 25.0 },
            frame_size,
            true,
        )?),
        None => None,
    };
    highgui::named_window(WINDOW, highgui::WINDOW_AUTOSIZE)?;

    // --- 4. Main Processing Loop ---
    let mut raw = Mat::default();
    loop {
        if !cap.read(&mut raw)? || raw.empty() {
            info!("end of video");
            break;
        }

        // --- 5. Frame Conversion & Pipeline Processing ---
        let mut frame = Mat::default();
        imgproc::resize(&raw, &mut frame, frame_size, 0.0, 0.0, imgproc::INTER_LINEAR)?;
        let rgb = to_rgb_image(&frame, width, height)?;
        let report = pipeline.generate_report(&rgb)?;

        // --- 6. Visualization ---
        draw_report(&mut frame, &spots, &report)?;
        highgui::imshow(WINDOW, &frame)?;
        if show_debug {
            if let Some(maps) = pipeline.last_edge_maps() {
                highgui::imshow("canny", &to_gray_mat(&maps.canny)?)?;
                highgui::imshow("closed", &to_gray_mat(&maps.closed)?)?;
            }
        }
        if let Some(writer) = writer.as_mut() {
            writer.write(&frame)?;
        }

        if highgui::wait_key(1)? == 'q' as i32 {
            info!("quit requested");
            break;
        }
    }

    highgui::destroy_all_windows()?;
    if let Some(path) = output_path {
        info!("output saved to {path}");
    }
    Ok(())
}

/// Converts a BGR `Mat` to the RGB buffer the pipeline expects.
fn to_rgb_image(frame: &Mat, width: u32, height: u32) -> Result<RgbImage> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;
    let bytes = rgb.data_bytes()?.to_vec();
    RgbImage::from_raw(width, height, bytes)
        .context("frame buffer does not match the configured size")
}

fn to_gray_mat(image: &GrayImage) -> Result<Mat> {
    let flat = Mat::from_slice(image.as_raw())?;
    let shaped = flat.reshape(1, image.height() as i32)?;
    Ok(shaped.try_clone()?)
}

fn scalar((b, g, r): (f64, f64, f64)) -> Scalar {
    Scalar::new(b, g, r, 0.0)
}

/// "Spot <id> - <colour>" for an occupied spot, "Spot <id> - Free" otherwise.
fn spot_label(result: &SpotReport) -> String {
    let detail = match result.status {
        OccupancyStatus::Occupied => result
            .color
            .as_ref()
            .map(|color| color.to_string())
            .unwrap_or_else(|| "?".to_string()),
        OccupancyStatus::Free => "Free".to_string(),
    };
    format!("Spot {} - {}", result.spot_id, detail)
}

/// Spot outlines, per-spot status text and the free-spot counter.
fn draw_report(frame: &mut Mat, spots: &[ParkingSpot], report: &OccupancyReport) -> Result<()> {
    for spot in spots {
        let Some(result) = report.spot(spot.id) else {
            warn!(spot = spot.id, "spot missing from report");
            continue;
        };
        let color = match result.status {
            OccupancyStatus::Occupied => OCCUPIED_COLOR,
            OccupancyStatus::Free => FREE_COLOR,
        };
        let label = spot_label(result);

        let vertices = spot.shape.vertices();
        let outline: Vector<core::Point> = vertices
            .iter()
            .map(|point| core::Point::new(point.x, point.y))
            .collect();
        let mut outlines = Vector::<Vector<core::Point>>::new();
        outlines.push(outline);
        imgproc::polylines(frame, &outlines, true, scalar(color), 2, imgproc::LINE_8, 0)?;

        if let Some(anchor) = vertices.iter().min_by_key(|point| (point.y, point.x)) {
            imgproc::put_text(
                frame,
                &label,
                core::Point::new(anchor.x, (anchor.y - 8).max(12)),
                imgproc::FONT_HERSHEY_SIMPLEX,
                0.5,
                scalar(color),
                1,
                imgproc::LINE_AA,
                false,
            )?;
        }
    }

    imgproc::put_text(
        frame,
        &format!("Free spots: {}/{}", report.free_spots, report.total_spots),
        core::Point::new(20, 30),
        imgproc::FONT_HERSHEY_SIMPLEX,
        0.8,
        Scalar::new(255.0, 255.0, 255.0, 0.0),
        2,
        imgproc::LINE_AA,
        false,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_vision::core_modules::color::ColorLabel;

    #[test]
    fn labels_name_the_spot_in_both_states() {
        let free = SpotReport {
            spot_id: 3,
            status: OccupancyStatus::Free,
            color: None,
        };
        assert_eq!(spot_label(&free), "Spot 3 - Free");

        let occupied = SpotReport {
            spot_id: 7,
            status: OccupancyStatus::Occupied,
            color: Some(ColorLabel::named("Red")),
        };
        assert_eq!(spot_label(&occupied), "Spot 7 - Red");
    }
}
