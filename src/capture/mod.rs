//! Webcam capture backends.

mod nokhwa_backend;

pub use nokhwa_backend::NokhwaCapture;

use crate::frame::VideoFrame;
use crate::source::FrameSource;
use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Trait for webcam capture backends.
pub trait CaptureBackend {
    /// Returns a list of available camera devices.
    fn list_devices() -> Result<Vec<CameraInfo>>
    where
        Self: Sized;

    /// Opens the camera with the specified configuration.
    fn open(config: CaptureConfig) -> Result<Self>
    where
        Self: Sized;

    /// Captures a single frame from the camera.
    fn capture_frame(&mut self) -> Result<VideoFrame>;

    /// Returns the current frame dimensions.
    fn frame_size(&self) -> (u32, u32);
}

/// Information about a camera device.
#[derive(Debug, Clone)]
pub struct CameraInfo {
    /// Device index
    pub index: u32,
    /// Human-readable name
    pub name: String,
}

/// Configuration for camera capture.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera device index
    pub device_index: u32,
    /// Desired frame width
    pub width: u32,
    /// Desired frame height
    pub height: u32,
    /// Desired frame rate
    pub fps: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            fps: 30,
        }
    }
}

/// Which way the camera points. A user-facing camera is shown mirrored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CameraFacing {
    #[default]
    User,
    Environment,
}

impl CameraFacing {
    /// Whether output should be flipped horizontally.
    pub fn mirrors(self) -> bool {
        self == CameraFacing::User
    }

    pub fn toggled(self) -> Self {
        match self {
            CameraFacing::User => CameraFacing::Environment,
            CameraFacing::Environment => CameraFacing::User,
        }
    }
}

/// Camera running on a background thread.
///
/// The thread decodes frames as fast as the camera delivers them and keeps
/// only the newest one; [`FrameSource::poll_frame`] takes it.
pub struct AsyncCapture {
    latest: Arc<Mutex<Option<VideoFrame>>>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    frame_size: (u32, u32),
}

impl AsyncCapture {
    /// Opens the camera with the nokhwa backend.
    pub fn new(config: CaptureConfig) -> Result<Self> {
        Self::spawn::<NokhwaCapture>(config)
    }

    /// Opens a camera of backend `B` on a worker thread. Blocks until the
    /// camera reports whether it opened.
    pub fn spawn<B: CaptureBackend + 'static>(config: CaptureConfig) -> Result<Self> {
        let latest = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel();

        let slot = latest.clone();
        let flag = running.clone();
        let worker = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                // Some platforms require the camera to live on the thread that opened it.
                let mut camera = match B::open(config) {
                    Ok(camera) => {
                        let _ = ready_tx.send(Ok(camera.frame_size()));
                        camera
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                capture_loop(&mut camera, &slot, &flag);
            })?;

        let frame_size = ready_rx
            .recv()
            .map_err(|_| anyhow!("camera thread exited before opening the device"))??;
        info!("Camera opened at {}x{} (async capture)", frame_size.0, frame_size.1);

        Ok(Self {
            latest,
            running,
            worker: Some(worker),
            frame_size,
        })
    }

    pub fn frame_size(&self) -> (u32, u32) {
        self.frame_size
    }

    /// Takes the newest frame, if one arrived since the last call.
    pub fn get_latest_frame(&self) -> Option<VideoFrame> {
        self.latest.lock().take()
    }
}

fn capture_loop<B: CaptureBackend>(camera: &mut B, slot: &Mutex<Option<VideoFrame>>, running: &AtomicBool) {
    let mut failures = 0u32;
    while running.load(Ordering::Relaxed) {
        match camera.capture_frame() {
            Ok(frame) => {
                failures = 0;
                *slot.lock() = Some(frame);
            }
            Err(e) => {
                failures += 1;
                if failures == 1 || failures % 100 == 0 {
                    warn!("Camera capture failed ({} in a row): {}", failures, e);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
    debug!("Camera capture thread stopped");
}

impl FrameSource for AsyncCapture {
    fn poll_frame(&mut self) -> Option<VideoFrame> {
        self.get_latest_frame()
    }
}

impl Drop for AsyncCapture {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
