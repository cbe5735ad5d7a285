//! Frame source adapter: tracks the newest camera frame and uploads it to the
//! GPU input texture.

use crate::frame::VideoFrame;
use tracing::{debug, warn};

/// Producer of decoded video frames.
pub trait FrameSource {
    /// The newest frame decoded since the previous call, if any.
    fn poll_frame(&mut self) -> Option<VideoFrame>;
}

/// A source that may be absent (camera failed to open or is not configured).
impl<S: FrameSource> FrameSource for Option<S> {
    fn poll_frame(&mut self) -> Option<VideoFrame> {
        self.as_mut().and_then(FrameSource::poll_frame)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn poll_frame(&mut self) -> Option<VideoFrame> {
        (**self).poll_frame()
    }
}

/// Destination of frame uploads.
pub trait TextureTarget {
    /// Replaces the input texture with `frame`, an RGBA frame whose first row
    /// is the bottom of the image. Resizes the texture to match.
    fn upload_frame(&mut self, frame: &VideoFrame);
}

/// Result of [`FrameSourceAdapter::upload_if_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A new frame was written to the texture.
    Uploaded,
    /// The texture already holds the newest frame.
    Unchanged,
    /// The source has not produced a frame yet.
    NotReady,
}

pub struct FrameSourceAdapter<S> {
    source: S,
    current: Option<VideoFrame>,
    uploaded: bool,
    received: u64,
}

impl<S: FrameSource> FrameSourceAdapter<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            current: None,
            uploaded: false,
            received: 0,
        }
    }

    fn poll(&mut self) {
        let Some(frame) = self.source.poll_frame() else {
            return;
        };
        if !frame.is_complete() || frame.width == 0 || frame.height == 0 {
            warn!(
                "Dropping malformed {}x{} frame ({} bytes)",
                frame.width,
                frame.height,
                frame.data.len()
            );
            return;
        }
        if self.received == 0 {
            debug!("First frame received: {}x{} {:?}", frame.width, frame.height, frame.format);
        }
        self.received += 1;
        self.current = Some(frame);
        self.uploaded = false;
    }

    /// The newest decoded frame, or `None` while the source is warming up.
    pub fn current_frame(&mut self) -> Option<&VideoFrame> {
        self.poll();
        self.current.as_ref()
    }

    /// Uploads the newest frame, flipped vertically, unless it is already on
    /// the GPU.
    pub fn upload_if_ready<T: TextureTarget + ?Sized>(&mut self, target: &mut T) -> FrameStatus {
        self.poll();
        let Some(frame) = &self.current else {
            return FrameStatus::NotReady;
        };
        if self.uploaded {
            return FrameStatus::Unchanged;
        }
        target.upload_frame(&frame.to_rgba().flipped_vertical());
        self.uploaded = true;
        FrameStatus::Uploaded
    }

    /// Forgets the held frame; the next upload waits for a fresh one.
    pub fn reset(&mut self) {
        self.current = None;
        self.uploaded = false;
    }

    /// Frames accepted from the source so far.
    pub fn frames_received(&self) -> u64 {
        self.received
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use std::collections::VecDeque;

    /// Replays a scripted sequence of poll results.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        pub(crate) frames: VecDeque<Option<VideoFrame>>,
    }

    impl ScriptedSource {
        pub(crate) fn push(&mut self, frame: Option<VideoFrame>) {
            self.frames.push_back(frame);
        }
    }

    impl FrameSource for ScriptedSource {
        fn poll_frame(&mut self) -> Option<VideoFrame> {
            self.frames.pop_front().flatten()
        }
    }

    #[derive(Default)]
    struct RecordingTarget {
        uploads: Vec<VideoFrame>,
    }

    impl TextureTarget for RecordingTarget {
        fn upload_frame(&mut self, frame: &VideoFrame) {
            self.uploads.push(frame.clone());
        }
    }

    pub(crate) fn two_row_frame() -> VideoFrame {
        VideoFrame::from_data(1, 2, PixelFormat::Rgb, vec![10, 10, 10, 200, 200, 200])
    }

    #[test]
    fn warm_up_reports_not_ready() {
        let mut adapter = FrameSourceAdapter::new(ScriptedSource::default());
        let mut target = RecordingTarget::default();
        assert!(adapter.current_frame().is_none());
        assert_eq!(adapter.upload_if_ready(&mut target), FrameStatus::NotReady);
        assert!(target.uploads.is_empty());
    }

    #[test]
    fn uploads_once_per_fresh_frame_flipped() {
        let mut source = ScriptedSource::default();
        source.push(Some(two_row_frame()));
        let mut adapter = FrameSourceAdapter::new(source);
        let mut target = RecordingTarget::default();

        assert_eq!(adapter.upload_if_ready(&mut target), FrameStatus::Uploaded);
        assert_eq!(adapter.upload_if_ready(&mut target), FrameStatus::Unchanged);
        assert_eq!(target.uploads.len(), 1);

        let uploaded = &target.uploads[0];
        assert_eq!(uploaded.format, PixelFormat::Rgba);
        assert_eq!(uploaded.data, vec![200, 200, 200, 255, 10, 10, 10, 255]);

        adapter.source_mut().push(Some(two_row_frame()));
        assert_eq!(adapter.upload_if_ready(&mut target), FrameStatus::Uploaded);
        assert_eq!(adapter.frames_received(), 2);
    }

    #[test]
    fn malformed_frames_are_dropped() {
        let mut source = ScriptedSource::default();
        source.push(Some(VideoFrame::from_data(4, 4, PixelFormat::Rgb, vec![0; 5])));
        let mut adapter = FrameSourceAdapter::new(source);
        assert!(adapter.current_frame().is_none());
    }

    #[test]
    fn reset_returns_to_warm_up() {
        let mut source = ScriptedSource::default();
        source.push(Some(two_row_frame()));
        let mut adapter = FrameSourceAdapter::new(source);
        assert!(adapter.current_frame().is_some());
        adapter.reset();
        assert!(adapter.current_frame().is_none());
    }

    #[test]
    fn absent_source_never_produces_frames() {
        let mut adapter = FrameSourceAdapter::new(None::<ScriptedSource>);
        assert!(adapter.current_frame().is_none());
    }
}
