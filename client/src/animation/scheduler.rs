use super::flip::{self, Side};
use super::sprite::{self, SpriteMeta};
use super::{AnimationKind, Canvas, RestingFace, SpriteSet};
use crate::assets::{AssetHandle, AssetState, Assets};
use crate::error::AssetError;
use image::RgbaImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Back and face skin URLs for a flip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlipSkins {
    pub back: String,
    pub face: String,
}

/// A request to animate one canvas.
pub struct AnimationRequest {
    pub kind: AnimationKind,
    pub canvas: Box<dyn Canvas>,
    /// Required for flips; ignored by other kinds.
    pub skins: Option<FlipSkins>,
    /// What the canvas shows once the animation ends or cannot run.
    pub rest: RestingFace,
}

struct Task {
    kind: AnimationKind,
    canvas: Box<dyn Canvas>,
    sheet: AssetHandle<RgbaImage>,
    meta: AssetHandle<SpriteMeta>,
    skins: Option<(AssetHandle<RgbaImage>, AssetHandle<RgbaImage>)>,
    rest: RestingFace,
    frame: usize,
    next_deadline: Option<Instant>,
}

struct Loaded {
    sheet: Arc<RgbaImage>,
    meta: Arc<SpriteMeta>,
    skins: Option<(Arc<RgbaImage>, Arc<RgbaImage>)>,
}

enum Readiness {
    Pending,
    Ready(Loaded),
    Failed(AssetError),
}

enum Step {
    Keep,
    Done,
}

/// Counters from one tick, mostly for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickStats {
    pub drawn: usize,
    pub deferred: usize,
    pub finished: usize,
    pub detached: usize,
    pub degraded: usize,
}

/// Drives every active sprite animation from one frame loop.
///
/// The scheduler never sees game state: it only holds the canvases and asset
/// handles it was given when a task was queued. It is single-threaded; the
/// owner calls `tick` once per frame while `wants_frame` is true.
pub struct Scheduler {
    assets: Assets,
    sprites: SpriteSet,
    tasks: Vec<Task>,
    enabled: bool,
}

impl Scheduler {
    pub fn new(assets: Assets, sprites: SpriteSet) -> Self {
        Self {
            assets,
            sprites,
            tasks: Vec::new(),
            enabled: true,
        }
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// True while any task is active. The frame loop stops asking for ticks
    /// when this goes false and resumes on the next `queue`.
    pub fn wants_frame(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Start loading the assets for `req` and add it to the active set.
    /// Nothing is drawn until the next tick.
    pub fn queue(&mut self, mut req: AnimationRequest) {
        if !self.enabled {
            req.canvas.show_static(req.rest);
            return;
        }
        let paths = self.sprites.paths(req.kind);
        let skins = match (req.kind, req.skins) {
            (AnimationKind::Flip, Some(skins)) => Some((self.assets.image(&skins.back), self.assets.image(&skins.face))),
            (AnimationKind::Flip, None) => {
                debug!("flip queued without skins; showing static card");
                req.canvas.show_static(req.rest);
                return;
            }
            _ => None,
        };
        trace!(kind = ?req.kind, sheet = paths.sheet, "animation queued");
        self.tasks.push(Task {
            kind: req.kind,
            canvas: req.canvas,
            sheet: self.assets.image(paths.sheet),
            meta: self.assets.meta(paths.meta),
            skins,
            rest: req.rest,
            frame: 0,
            next_deadline: None,
        });
    }

    /// Advance every task whose frame deadline has passed, by at most one
    /// frame each.
    pub fn tick(&mut self, now: Instant) -> TickStats {
        let mut stats = TickStats::default();
        self.tasks.retain_mut(|task| {
            if !task.canvas.is_attached() {
                stats.detached += 1;
                return false;
            }
            let loaded = match task.readiness() {
                Readiness::Pending => {
                    stats.deferred += 1;
                    return true;
                }
                Readiness::Failed(e) => {
                    warn!(kind = ?task.kind, error = %e, "animation assets unavailable; showing static card");
                    task.canvas.show_static(task.rest);
                    stats.degraded += 1;
                    return false;
                }
                Readiness::Ready(loaded) => loaded,
            };
            match task.advance(&loaded, now, &mut stats) {
                Step::Keep => true,
                Step::Done => {
                    stats.finished += 1;
                    false
                }
            }
        });
        stats
    }

    /// Drop every task, settling each canvas on its resting face.
    pub fn cancel_all(&mut self) {
        for mut task in self.tasks.drain(..) {
            if task.canvas.is_attached() {
                task.canvas.show_static(task.rest);
            }
        }
    }
}

impl Task {
    fn readiness(&self) -> Readiness {
        let mut pending = false;
        let sheet = match self.sheet.peek() {
            AssetState::Ready(v) => Some(v),
            AssetState::Pending => {
                pending = true;
                None
            }
            AssetState::Failed(e) => return Readiness::Failed(e),
        };
        let meta = match self.meta.peek() {
            AssetState::Ready(v) => Some(v),
            AssetState::Pending => {
                pending = true;
                None
            }
            AssetState::Failed(e) => return Readiness::Failed(e),
        };
        let skins = match &self.skins {
            None => None,
            Some((back, face)) => match (back.peek(), face.peek()) {
                (AssetState::Failed(e), _) | (_, AssetState::Failed(e)) => return Readiness::Failed(e),
                (AssetState::Ready(b), AssetState::Ready(f)) => Some((b, f)),
                _ => {
                    pending = true;
                    None
                }
            },
        };
        match (pending, sheet, meta) {
            (false, Some(sheet), Some(meta)) => Readiness::Ready(Loaded { sheet, meta, skins }),
            _ => Readiness::Pending,
        }
    }

    fn advance(&mut self, loaded: &Loaded, now: Instant, stats: &mut TickStats) -> Step {
        let frames = &loaded.meta.frames;
        if frames.is_empty() {
            self.canvas.show_static(self.rest);
            return Step::Done;
        }

        match self.next_deadline {
            None => self.frame = 0,
            Some(deadline) if now < deadline => return Step::Keep,
            Some(_) => {
                self.frame += 1;
                if self.frame >= frames.len() {
                    if !loaded.meta.looping {
                        self.canvas.show_static(self.rest);
                        return Step::Done;
                    }
                    self.frame = 0;
                }
            }
        }

        let frame = &frames[self.frame];
        let Some(image) = self.render(loaded, frame) else {
            debug!(kind = ?self.kind, frame = self.frame, "frame outside sprite sheet");
            self.canvas.show_static(self.rest);
            return Step::Done;
        };
        self.canvas.draw_frame(&image);
        self.next_deadline = Some(now + frame.duration());
        stats.drawn += 1;
        Step::Keep
    }

    fn render(&self, loaded: &Loaded, frame: &sprite::Frame) -> Option<RgbaImage> {
        let cut = sprite::crop(&loaded.sheet, frame)?;
        match (&self.kind, &loaded.skins) {
            (AnimationKind::Flip, Some((back, face))) => {
                let skin = match flip::side_for(self.frame, loaded.meta.half_point()) {
                    Side::Back => back,
                    Side::Face => face,
                };
                Some(flip::composite(&cut, skin))
            }
            _ => Some(cut),
        }
    }
}
