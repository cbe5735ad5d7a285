//! Nokhwa-based webcam capture backend.

use super::{CameraInfo, CaptureBackend, CaptureConfig};
use crate::frame::{PixelFormat, VideoFrame};
use anyhow::{anyhow, Result};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use tracing::{info, warn};

/// Fallback resolutions tried after the configured one, largest first.
const SEED_RESOLUTIONS: [(u32, u32); 3] = [(1920, 1080), (1280, 720), (640, 480)];
const SEED_FRAME_RATES: [u32; 3] = [30, 25, 15];
/// Uncompressed formats first (built-in laptop cameras), MJPEG for USB webcams.
const SEED_FORMATS: [FrameFormat; 3] = [FrameFormat::NV12, FrameFormat::YUYV, FrameFormat::MJPEG];

/// Formats used to establish a first working stream. Some drivers reject a
/// `Closest` request whose hint is far from anything they support.
fn seed_formats(config: &CaptureConfig) -> Vec<CameraFormat> {
    let requested = SEED_FORMATS
        .iter()
        .map(|&format| CameraFormat::new(Resolution::new(config.width, config.height), format, config.fps));
    let fallbacks = SEED_RESOLUTIONS.iter().flat_map(|&(width, height)| {
        SEED_FRAME_RATES.iter().flat_map(move |&fps| {
            SEED_FORMATS
                .iter()
                .map(move |&format| CameraFormat::new(Resolution::new(width, height), format, fps))
        })
    });
    requested.chain(fallbacks).collect()
}

/// How well `format` matches the requested capture settings. Higher is better.
fn format_score(format: &CameraFormat, config: &CaptureConfig) -> i64 {
    let requested_pixels = config.width as i64 * config.height as i64;
    let pixels = format.width() as i64 * format.height() as i64;
    // Closeness to the requested resolution dominates, then frame rate.
    let mut score = -(pixels - requested_pixels).abs();
    score -= (format.frame_rate() as i64 - config.fps as i64).abs() * 1000;
    score += match format.format() {
        FrameFormat::NV12 => 30,
        FrameFormat::YUYV => 20,
        FrameFormat::MJPEG => 10,
        _ => 0,
    };
    score
}

/// Webcam capture using the nokhwa library.
pub struct NokhwaCapture {
    camera: Camera,
    width: u32,
    height: u32,
}

impl NokhwaCapture {
    fn request(format: CameraFormat) -> RequestedFormat<'static> {
        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format))
    }

    /// Switches to the supported format closest to the request, falling back
    /// to `seed` if the switch fails.
    fn upgrade_format(camera: &mut Camera, config: &CaptureConfig, seed: CameraFormat) {
        let supported = match camera.compatible_camera_formats() {
            Ok(formats) if !formats.is_empty() => formats,
            _ => {
                warn!("Device reported no supported formats, keeping {:?}", seed);
                return;
            }
        };
        let Some(best) = supported.iter().max_by_key(|f| format_score(f, config)).copied() else {
            return;
        };
        if best == seed {
            return;
        }

        info!("Switching camera to {:?}", best);
        let _ = camera.stop_stream();
        let switched = camera
            .set_camera_requset(Self::request(best))
            .map_err(|e| anyhow!(e))
            .and_then(|_| camera.open_stream().map_err(|e| anyhow!(e)));
        if let Err(e) = switched {
            warn!("Failed to open stream with {:?} ({}), reverting to {:?}", best, e, seed);
            let _ = camera.set_camera_requset(Self::request(seed));
            let _ = camera.open_stream();
        }
    }
}

impl CaptureBackend for NokhwaCapture {
    fn list_devices() -> Result<Vec<CameraInfo>> {
        let devices = nokhwa::query(nokhwa::utils::ApiBackend::Auto)?;
        Ok(devices
            .into_iter()
            .map(|d| CameraInfo {
                index: d.index().as_index().unwrap_or(0),
                name: d.human_name().to_string(),
            })
            .collect())
    }

    fn open(config: CaptureConfig) -> Result<Self> {
        let mut opened = None;
        for seed in seed_formats(&config) {
            let Ok(mut camera) = Camera::new(CameraIndex::Index(config.device_index), Self::request(seed)) else {
                continue;
            };
            // Creating the camera is not enough for some drivers; the stream must open too.
            if camera.open_stream().is_ok() {
                info!("Camera stream opened with seed format {:?}", seed);
                opened = Some((camera, seed));
                break;
            }
        }
        let (mut camera, seed) = opened.ok_or_else(|| {
            anyhow!("could not open a stream on camera {} with any standard format", config.device_index)
        })?;

        Self::upgrade_format(&mut camera, &config, seed);

        let resolution = camera.resolution();
        info!("Camera opened with resolution: {}", resolution);
        Ok(Self {
            camera,
            width: resolution.width(),
            height: resolution.height(),
        })
    }

    fn capture_frame(&mut self) -> Result<VideoFrame> {
        let frame = self.camera.frame()?;
        let decoded = frame.decode_image::<RgbFormat>()?;
        let (width, height) = (decoded.width(), decoded.height());
        if (width, height) != (self.width, self.height) {
            self.width = width;
            self.height = height;
        }
        Ok(VideoFrame::from_data(width, height, PixelFormat::Rgb, decoded.into_raw()))
    }

    fn frame_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeds_start_with_requested_settings() {
        let config = CaptureConfig { width: 800, height: 600, fps: 24, ..Default::default() };
        let seeds = seed_formats(&config);
        assert_eq!(seeds.len(), 3 + 3 * 3 * 3);
        assert_eq!(seeds[0].resolution(), Resolution::new(800, 600));
        assert_eq!(seeds[0].frame_rate(), 24);
        assert_eq!(seeds.last().map(|f| f.width()), Some(640));
    }

    #[test]
    fn score_prefers_requested_resolution_then_frame_rate() {
        let config = CaptureConfig::default();
        let exact = CameraFormat::new(Resolution::new(1280, 720), FrameFormat::MJPEG, 30);
        let larger = CameraFormat::new(Resolution::new(1920, 1080), FrameFormat::NV12, 30);
        let slower = CameraFormat::new(Resolution::new(1280, 720), FrameFormat::NV12, 15);
        assert!(format_score(&exact, &config) > format_score(&larger, &config));
        assert!(format_score(&exact, &config) > format_score(&slower, &config));

        let nv12 = CameraFormat::new(Resolution::new(1280, 720), FrameFormat::NV12, 30);
        assert!(format_score(&nv12, &config) > format_score(&exact, &config));
    }
}
