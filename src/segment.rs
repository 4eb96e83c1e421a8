use std::time::Duration;

use crate::media::Span;

/// Frame grid used when the source reports no usable frame rate.
const FALLBACK_GRID: f64 = 1000.0;

/// Frames per second used for timing; falls back to a 1 ms grid.
pub fn frame_grid(fps: f64) -> f64 {
    if fps.is_finite() && fps > 0.0 { fps } else { FALLBACK_GRID }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPlan {
    pub index: usize,
    pub span: Span,
}

/// Splits a video of `total` seconds into contiguous, frame-aligned spans.
///
/// Videos no longer than `threshold` stay whole. Longer ones get spans of
/// `target` seconds followed by one remainder span holding whatever is
/// left; the remainder is never merged into its neighbour or dropped.
pub fn plan_segments(total: f64, fps: f64, threshold: f64, target: f64) -> Vec<SegmentPlan> {
    if !(total > 0.0) {
        return Vec::new();
    }
    let grid = frame_grid(fps);
    let total_frames = ((total * grid).round() as u64).max(1);
    let threshold_frames = (threshold * grid).round() as u64;

    if total_frames <= threshold_frames {
        return vec![SegmentPlan {
            index: 0,
            span: Span {
                start: 0.0,
                duration: total,
                frames: total_frames,
            },
        }];
    }

    let target_frames = ((target * grid).round() as u64).max(1);
    let mut plans = Vec::new();
    let mut start_frame = 0u64;
    while start_frame < total_frames {
        let frames = target_frames.min(total_frames - start_frame);
        let start = start_frame as f64 / grid;
        let end_frame = start_frame + frames;
        let duration = if end_frame == total_frames {
            total - start
        } else {
            frames as f64 / grid
        };
        plans.push(SegmentPlan {
            index: plans.len(),
            span: Span {
                start,
                duration,
                frames,
            },
        });
        start_frame = end_frame;
    }
    plans
}

/// Poll budget for one segment: a fixed floor plus a share proportional to
/// the segment's own length. The length of the whole video plays no part.
pub fn poll_timeout(segment_seconds: f64, floor: Duration, per_second: f64) -> Duration {
    let scaled = (segment_seconds.max(0.0) * per_second.max(0.0)).min(86_400.0);
    floor + Duration::from_secs_f64(scaled)
}
