//! Sprite-sheet animations for cards and seat effects.

mod flip;
mod scheduler;
mod sprite;

pub use flip::{composite, side_for, Side};
pub use scheduler::{AnimationRequest, FlipSkins, Scheduler, TickStats};
pub use sprite::{crop, Frame, SpriteMeta};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnimationKind {
    Deal,
    Flip,
    WinBurst,
    Fold,
    AllIn,
}

/// What a canvas settles on when it is not animating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestingFace {
    FaceUp,
    FaceDown,
    /// Effect overlays simply disappear.
    Clear,
}

/// A drawing surface owned by the renderer and lent to one animation task.
pub trait Canvas {
    /// False once the element backing this canvas left the view. The task
    /// is dropped on the next tick.
    fn is_attached(&self) -> bool;

    fn draw_frame(&mut self, frame: &RgbaImage);

    /// Replace the animation with static art.
    fn show_static(&mut self, face: RestingFace);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpritePaths {
    pub sheet: &'static str,
    pub meta: &'static str,
}

/// Where each animation kind's sheet and metadata live, relative to the
/// asset base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteSet {
    pub deal: SpritePaths,
    pub flip: SpritePaths,
    pub win_burst: SpritePaths,
    pub fold: SpritePaths,
    pub all_in: SpritePaths,
}

impl Default for SpriteSet {
    fn default() -> Self {
        Self {
            deal: SpritePaths { sheet: "sprites/deal.png", meta: "sprites/deal.json" },
            flip: SpritePaths { sheet: "sprites/flip-mask.png", meta: "sprites/flip.json" },
            win_burst: SpritePaths { sheet: "sprites/win-burst.png", meta: "sprites/win-burst.json" },
            fold: SpritePaths { sheet: "sprites/fold.png", meta: "sprites/fold.json" },
            all_in: SpritePaths { sheet: "sprites/all-in.png", meta: "sprites/all-in.json" },
        }
    }
}

impl SpriteSet {
    pub fn paths(&self, kind: AnimationKind) -> SpritePaths {
        match kind {
            AnimationKind::Deal => self.deal,
            AnimationKind::Flip => self.flip,
            AnimationKind::WinBurst => self.win_burst,
            AnimationKind::Fold => self.fold,
            AnimationKind::AllIn => self.all_in,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetFetcher, Assets};
    use crate::error::AssetError;
    use futures::future::{BoxFuture, FutureExt};
    use image::{ImageFormat, Rgba};
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::rc::Rc;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Files(HashMap<String, Vec<u8>>);

    impl AssetFetcher for Files {
        fn fetch(&self, url: &str) -> BoxFuture<'static, Result<Vec<u8>, AssetError>> {
            let found = self.0.get(url).cloned();
            let url = url.to_string();
            async move { found.ok_or(AssetError::Status { url, status: 404 }) }.boxed()
        }
    }

    #[derive(Debug, Default)]
    struct Log {
        frames: Vec<(u32, u32, Rgba<u8>)>,
        rested: Option<RestingFace>,
        attached: bool,
    }

    struct TestCanvas(Rc<RefCell<Log>>);

    impl Canvas for TestCanvas {
        fn is_attached(&self) -> bool {
            self.0.borrow().attached
        }
        fn draw_frame(&mut self, frame: &RgbaImage) {
            let (w, h) = frame.dimensions();
            self.0.borrow_mut().frames.push((w, h, *frame.get_pixel(0, 0)));
        }
        fn show_static(&mut self, face: RestingFace) {
            self.0.borrow_mut().rested = Some(face);
        }
    }

    fn canvas() -> (Box<dyn Canvas>, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log { attached: true, ..Default::default() }));
        (Box::new(TestCanvas(log.clone())), log)
    }

    fn png(img: &RgbaImage) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        img.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    /// A 4-frame, 2x2-per-frame flip mask plus solid back (blue) and face
    /// (red) skins.
    fn flip_files(looping: bool) -> Files {
        let mut files = Files::default();
        let mask = RgbaImage::from_pixel(8, 2, Rgba([0, 0, 0, 255]));
        files.0.insert("sprites/flip-mask.png".into(), png(&mask));
        let frames: Vec<_> = (0..4).map(|i| serde_json::json!({"x": i * 2, "y": 0, "w": 2, "h": 2, "duration": 10})).collect();
        files.0.insert(
            "sprites/flip.json".into(),
            serde_json::to_vec(&serde_json::json!({"frames": frames, "loop": looping})).unwrap(),
        );
        files.0.insert("back.png".into(), png(&RgbaImage::from_pixel(2, 2, Rgba([0, 0, 255, 255]))));
        files.0.insert("face.png".into(), png(&RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255]))));
        files
    }

    fn flip_request(canvas: Box<dyn Canvas>) -> AnimationRequest {
        AnimationRequest {
            kind: AnimationKind::Flip,
            canvas,
            skins: Some(FlipSkins { back: "back.png".into(), face: "face.png".into() }),
            rest: RestingFace::FaceUp,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn flip_shows_back_then_face_then_rests() {
        let assets = Assets::new(Arc::new(flip_files(false)), None);
        let mut scheduler = Scheduler::new(assets, SpriteSet::default());
        let (c, log) = canvas();
        scheduler.queue(flip_request(c));
        assert!(scheduler.wants_frame());

        // assets still loading: deferred, nothing drawn
        let start = Instant::now();
        assert_eq!(scheduler.tick(start).deferred, 1);
        settle().await;

        let mut t = start;
        for _ in 0..4 {
            scheduler.tick(t);
            // before the deadline nothing advances
            assert_eq!(scheduler.tick(t).drawn, 0);
            t += Duration::from_millis(10);
        }
        let stats = scheduler.tick(t);
        assert_eq!(stats.finished, 1);
        assert!(!scheduler.wants_frame());

        let log = log.borrow();
        let colors: Vec<_> = log.frames.iter().map(|(_, _, px)| px.0).collect();
        assert_eq!(
            colors,
            vec![[0, 0, 255, 255], [0, 0, 255, 255], [255, 0, 0, 255], [255, 0, 0, 255]]
        );
        assert_eq!(log.rested, Some(RestingFace::FaceUp));
    }

    #[tokio::test]
    async fn missing_sprite_degrades_to_static_art() {
        let assets = Assets::new(Arc::new(Files::default()), None);
        let mut scheduler = Scheduler::new(assets, SpriteSet::default());
        let (c, log) = canvas();
        scheduler.queue(AnimationRequest { rest: RestingFace::FaceDown, ..flip_request(c) });
        settle().await;

        let stats = scheduler.tick(Instant::now());
        assert_eq!(stats.degraded, 1);
        assert!(scheduler.is_empty());
        assert_eq!(log.borrow().rested, Some(RestingFace::FaceDown));
        assert!(log.borrow().frames.is_empty());
    }

    #[tokio::test]
    async fn detached_canvas_drops_the_task() {
        let assets = Assets::new(Arc::new(flip_files(true)), None);
        let mut scheduler = Scheduler::new(assets, SpriteSet::default());
        let (c, log) = canvas();
        scheduler.queue(flip_request(c));
        settle().await;

        let mut t = Instant::now();
        for _ in 0..10 {
            scheduler.tick(t);
            t += Duration::from_millis(10);
        }
        // looping flips keep going until their canvas goes away
        assert_eq!(scheduler.len(), 1);
        log.borrow_mut().attached = false;
        assert_eq!(scheduler.tick(t).detached, 1);
        assert!(!scheduler.wants_frame());
    }

    #[test]
    fn disabled_scheduler_rests_immediately() {
        let assets = Assets::new(Arc::new(Files::default()), None);
        let mut scheduler = Scheduler::new(assets, SpriteSet::default());
        scheduler.set_enabled(false);
        let (c, log) = canvas();
        scheduler.queue(AnimationRequest {
            kind: AnimationKind::WinBurst,
            canvas: c,
            skins: None,
            rest: RestingFace::Clear,
        });
        assert!(scheduler.is_empty());
        assert_eq!(log.borrow().rested, Some(RestingFace::Clear));
    }
}
