use std::time::Duration;

/// A utility for tracking frames per second.
pub struct FpsCounter {
    frame_count: u32,
    window_start: Option<Duration>,
    interval: Duration,
}

impl FpsCounter {
    /// Create a new FPS counter reporting once per second.
    pub fn new() -> Self {
        Self {
            frame_count: 0,
            window_start: None,
            interval: Duration::from_secs(1),
        }
    }

    /// Record a frame drawn at `now`.
    /// Returns Some(fps) if the reporting interval has passed, otherwise None.
    pub fn update(&mut self, now: Duration) -> Option<f32> {
        let start = *self.window_start.get_or_insert(now);
        self.frame_count += 1;
        let elapsed = now.saturating_sub(start);

        if elapsed >= self.interval {
            let fps = self.frame_count as f32 / elapsed.as_secs_f32();
            self.frame_count = 0;
            self.window_start = Some(now);
            Some(fps)
        } else {
            None
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}
