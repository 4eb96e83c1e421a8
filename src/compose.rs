use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::audio::AudioTrack;
use crate::error::CompositionError;
use crate::media::{ComposeRequest, Crop, MediaInfo, MediaTool};

/// How the background is stretched over the narration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositionPlan {
    pub loops: u32,
    pub duration: f64,
    pub crop: Crop,
    pub fps: f64,
}

/// Narration muxed over the background, before captions.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposedVideo {
    pub path: PathBuf,
    pub duration: f64,
    pub fps: f64,
}

/// Largest centred 9:16 window with even dimensions.
pub fn vertical_crop(width: u32, height: u32) -> Crop {
    let (w, h) = (width as u64, height as u64);
    let (crop_w, crop_h) = if w * 16 > h * 9 {
        (h * 9 / 16, h)
    } else {
        (w, w * 16 / 9)
    };
    let crop_w = (crop_w as u32) & !1;
    let crop_h = (crop_h as u32) & !1;
    Crop {
        width: crop_w,
        height: crop_h,
        x: (width - crop_w) / 2,
        y: (height - crop_h) / 2,
    }
}

pub fn plan_composition(
    background: &MediaInfo,
    narration: f64,
) -> Result<CompositionPlan, CompositionError> {
    if !(narration > 0.0) {
        return Err(CompositionError::EmptyNarration);
    }
    let loops = if background.duration >= narration {
        1
    } else {
        (narration / background.duration).ceil() as u32
    };
    Ok(CompositionPlan {
        loops,
        duration: narration,
        crop: vertical_crop(background.width, background.height),
        fps: background.fps,
    })
}

pub struct Composer {
    media: Arc<dyn MediaTool>,
    background: PathBuf,
}

impl Composer {
    pub fn new(media: Arc<dyn MediaTool>, background: impl Into<PathBuf>) -> Self {
        Self {
            media,
            background: background.into(),
        }
    }

    pub fn background(&self) -> &Path {
        &self.background
    }

    /// Places the narration at time zero over the looped or trimmed
    /// background. The narration file is consumed.
    pub async fn compose(
        &self,
        audio: AudioTrack,
        output: &Path,
    ) -> Result<ComposedVideo, CompositionError> {
        let result = self.compose_inner(&audio, output).await;
        if let Err(err) = tokio::fs::remove_file(&audio.path).await {
            warn!(path = %audio.path.display(), error = %err, "failed to remove narration track");
        }
        result
    }

    async fn compose_inner(
        &self,
        audio: &AudioTrack,
        output: &Path,
    ) -> Result<ComposedVideo, CompositionError> {
        if !tokio::fs::try_exists(&self.background).await.unwrap_or(false) {
            return Err(CompositionError::MissingBackground(self.background.clone()));
        }
        let info = self
            .media
            .probe(&self.background)
            .await
            .map_err(CompositionError::UnreadableBackground)?;
        if !(info.duration > 0.0) {
            return Err(CompositionError::ZeroDuration(self.background.clone()));
        }
        info!(
            "Background {:.2}s at {}x{} {:.2}fps, narration {:.2}s",
            info.duration, info.width, info.height, info.fps, audio.duration
        );
        let plan = plan_composition(&info, audio.duration)?;
        if plan.loops > 1 {
            info!("Looping background video {} times to match narration", plan.loops);
        } else {
            info!("Trimming background video to narration duration");
        }

        let request = ComposeRequest {
            background: self.background.clone(),
            audio: audio.path.clone(),
            output: output.to_path_buf(),
            loops: plan.loops,
            duration: plan.duration,
            crop: plan.crop,
        };
        self.media.compose(&request).await?;
        info!("Composed video written to {}", output.display());
        Ok(ComposedVideo {
            path: output.to_path_buf(),
            duration: plan.duration,
            fps: plan.fps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn background(duration: f64) -> MediaInfo {
        MediaInfo {
            duration,
            fps: 30.0,
            width: 1920,
            height: 1080,
        }
    }

    #[test]
    fn crops_landscape_to_vertical() {
        let crop = vertical_crop(1920, 1080);
        assert_eq!(crop, Crop { width: 606, height: 1080, x: 657, y: 0 });
    }

    #[test]
    fn keeps_native_vertical() {
        let crop = vertical_crop(1080, 1920);
        assert_eq!(crop, Crop { width: 1080, height: 1920, x: 0, y: 0 });
    }

    #[test]
    fn crops_tall_video() {
        let crop = vertical_crop(720, 1600);
        assert_eq!(crop, Crop { width: 720, height: 1280, x: 0, y: 160 });
    }

    #[test]
    fn short_background_loops_to_narration_length() {
        let plan = plan_composition(&background(20.0), 45.5).unwrap();
        assert_eq!(plan.loops, 3);
        assert_eq!(plan.duration, 45.5);
    }

    #[test]
    fn long_background_is_trimmed() {
        let plan = plan_composition(&background(600.0), 45.5).unwrap();
        assert_eq!(plan.loops, 1);
        assert_eq!(plan.duration, 45.5);
        assert_eq!(plan.fps, 30.0);
    }

    #[test]
    fn exact_multiple_needs_no_extra_loop() {
        let plan = plan_composition(&background(15.0), 45.0).unwrap();
        assert_eq!(plan.loops, 3);
    }

    #[test]
    fn empty_narration_is_rejected() {
        assert!(matches!(
            plan_composition(&background(10.0), 0.0),
            Err(CompositionError::EmptyNarration)
        ));
    }
}
