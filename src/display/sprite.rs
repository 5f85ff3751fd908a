//! Frame-sequence playback over a sprite sheet.

use std::collections::HashMap;
use std::rc::Rc;

use crate::geom::Rect;
use crate::raster::{Canvas, DrawState};
use crate::tree::Scene;

use super::{Content, ImageId, ImageSource};

/// One cell of a sprite sheet.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub image: ImageId,
    pub rect: Rect,
    pub reg_x: f64,
    pub reg_y: f64,
}

/// A named run of frame indices.
#[derive(Debug, Clone, PartialEq)]
pub struct Animation {
    pub name: String,
    pub frames: Vec<usize>,
    /// Animation to continue with once this one ends. Defaults to the
    /// animation itself (a loop); `None` stops on the last frame.
    pub next: Option<String>,
    pub speed: f64,
}

impl Animation {
    pub fn new(name: impl Into<String>, frames: Vec<usize>) -> Self {
        let name = name.into();
        Self {
            next: Some(name.clone()),
            name,
            frames,
            speed: 1.0,
        }
    }

    /// Inclusive frame range, like `[start, end]` in sheet data.
    pub fn range(name: impl Into<String>, start: usize, end: usize) -> Self {
        Self::new(name, (start..=end).collect())
    }

    pub fn with_next(mut self, next: Option<&str>) -> Self {
        self.next = next.map(str::to_string);
        self
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpriteSheet {
    frames: Vec<Frame>,
    animations: HashMap<String, Animation>,
    /// Default playback rate in frames per second; `0` advances one frame
    /// per tick.
    pub framerate: f64,
}

impl SpriteSheet {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            ..Self::default()
        }
    }

    /// Cuts `image` into a row-major grid of `frame_width` x `frame_height`
    /// cells.
    pub fn from_grid(
        image: ImageId,
        image_width: u32,
        image_height: u32,
        frame_width: u32,
        frame_height: u32,
    ) -> Self {
        let mut frames = Vec::new();
        if frame_width > 0 && frame_height > 0 {
            for row in 0..image_height / frame_height {
                for col in 0..image_width / frame_width {
                    frames.push(Frame {
                        image,
                        rect: Rect::new(
                            (col * frame_width) as f64,
                            (row * frame_height) as f64,
                            frame_width as f64,
                            frame_height as f64,
                        ),
                        reg_x: 0.0,
                        reg_y: 0.0,
                    });
                }
            }
        }
        Self::new(frames)
    }

    pub fn with_animation(mut self, animation: Animation) -> Self {
        self.animations.insert(animation.name.clone(), animation);
        self
    }

    pub fn with_framerate(mut self, framerate: f64) -> Self {
        self.framerate = framerate;
        self
    }

    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frame(&self, index: usize) -> Option<&Frame> {
        self.frames.get(index)
    }

    pub fn animation(&self, name: &str) -> Option<&Animation> {
        self.animations.get(name)
    }

    pub fn animation_names(&self) -> impl Iterator<Item = &str> {
        self.animations.keys().map(String::as_str)
    }

    /// Frame rectangle offset by its registration point.
    pub fn frame_bounds(&self, index: usize) -> Option<Rect> {
        self.frame(index)
            .map(|f| Rect::new(-f.reg_x, -f.reg_y, f.rect.width, f.rect.height))
    }

    /// Whether every image the sheet references has finished loading.
    pub fn is_complete(&self, scene: &Scene) -> bool {
        self.frames
            .iter()
            .all(|f| scene.image(f.image).is_some_and(ImageSource::is_loaded))
    }
}

/// Where a playhead move lands.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameTarget {
    Index(usize),
    Animation(String),
}

impl From<usize> for FrameTarget {
    fn from(index: usize) -> Self {
        FrameTarget::Index(index)
    }
}

impl From<&str> for FrameTarget {
    fn from(name: &str) -> Self {
        FrameTarget::Animation(name.to_string())
    }
}

/// Notifications produced by playback. The scene dispatches them on the
/// owning node as `change` and `animationend` events.
#[derive(Debug, Clone, PartialEq)]
pub enum SpriteEvent {
    Change,
    AnimationEnd {
        name: Option<String>,
        next: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct Sprite {
    sheet: Rc<SpriteSheet>,
    pub current_frame: usize,
    pub current_animation: Option<String>,
    pub paused: bool,
    /// Overrides the sheet framerate when non-zero.
    pub framerate: f64,
    current_animation_frame: f64,
    raw_frame: f64,
    pub(crate) skip_advance: bool,
    pending: Vec<SpriteEvent>,
}

impl Sprite {
    pub fn new(sheet: Rc<SpriteSheet>) -> Self {
        Self {
            sheet,
            current_frame: 0,
            current_animation: None,
            paused: true,
            framerate: 0.0,
            current_animation_frame: 0.0,
            raw_frame: 0.0,
            skip_advance: false,
            pending: Vec::new(),
        }
    }

    /// A sprite already playing `target`.
    pub fn playing(sheet: Rc<SpriteSheet>, target: impl Into<FrameTarget>) -> Self {
        let mut sprite = Self::new(sheet);
        sprite.goto_and_play(target);
        sprite
    }

    pub fn sheet(&self) -> &Rc<SpriteSheet> {
        &self.sheet
    }

    pub fn current_animation_frame(&self) -> f64 {
        self.current_animation_frame
    }

    pub fn play(&mut self) {
        self.paused = false;
    }

    pub fn stop(&mut self) {
        self.paused = true;
    }

    pub fn goto_and_play(&mut self, target: impl Into<FrameTarget>) {
        self.paused = false;
        self.skip_advance = true;
        self.goto(target.into(), 0.0);
    }

    pub fn goto_and_stop(&mut self, target: impl Into<FrameTarget>) {
        self.paused = true;
        self.goto(target.into(), 0.0);
    }

    /// Moves the playhead by `time` milliseconds at the effective framerate,
    /// or by a single frame when no framerate is set or `time` is `None`.
    pub fn advance(&mut self, time: Option<f64>) {
        let fps = if self.framerate != 0.0 {
            self.framerate
        } else {
            self.sheet.framerate
        };
        let t = match time {
            Some(time) if fps != 0.0 => time / (1000.0 / fps),
            _ => 1.0,
        };
        self.normalize_frame(t);
    }

    /// Playback step run by the scene's tick pass.
    pub(crate) fn tick(&mut self, delta: Option<f64>) {
        if !self.paused {
            if !self.skip_advance {
                self.advance(delta);
            }
            self.skip_advance = false;
        }
    }

    pub(crate) fn take_events(&mut self) -> Vec<SpriteEvent> {
        std::mem::take(&mut self.pending)
    }

    fn goto(&mut self, target: FrameTarget, frame: f64) {
        self.current_animation_frame = 0.0;
        match target {
            FrameTarget::Animation(name) => {
                if self.sheet.animation(&name).is_some() {
                    self.current_animation = Some(name);
                    self.normalize_frame(frame);
                }
            }
            FrameTarget::Index(index) => {
                self.current_animation = None;
                self.raw_frame = index as f64;
                self.normalize_frame(0.0);
            }
        }
    }

    fn normalize_frame(&mut self, frame_delta: f64) {
        let sheet = Rc::clone(&self.sheet);
        let animation = self
            .current_animation
            .as_deref()
            .and_then(|name| sheet.animation(name))
            .filter(|a| !a.frames.is_empty());

        if let Some(animation) = animation {
            let speed = if animation.speed == 0.0 { 1.0 } else { animation.speed };
            let len = animation.frames.len() as f64;
            let mut anim_frame = self.current_animation_frame;

            if anim_frame + frame_delta * speed >= len {
                self.pending.push(SpriteEvent::AnimationEnd {
                    name: Some(animation.name.clone()),
                    next: animation.next.clone(),
                });
                match &animation.next {
                    Some(next) => {
                        let remaining = frame_delta - (len - anim_frame) / speed;
                        return self.goto(FrameTarget::Animation(next.clone()), remaining);
                    }
                    None => {
                        self.paused = true;
                        anim_frame = len - 1.0;
                    }
                }
            } else {
                anim_frame += frame_delta * speed;
            }
            self.current_animation_frame = anim_frame;
            self.raw_frame = animation.frames[(anim_frame as usize).min(animation.frames.len() - 1)] as f64;
        } else {
            self.raw_frame += frame_delta;
            let len = sheet.num_frames() as f64;
            if len > 0.0 && self.raw_frame >= len {
                self.pending.push(SpriteEvent::AnimationEnd {
                    name: None,
                    next: None,
                });
                self.raw_frame %= len;
            }
        }

        let frame = self.raw_frame as usize;
        if self.current_frame != frame {
            self.current_frame = frame;
            self.pending.push(SpriteEvent::Change);
        }
    }

    pub(crate) fn current(&self) -> Option<&Frame> {
        self.sheet.frame(self.current_frame)
    }
}

impl Content for Sprite {
    fn has_content(&self, scene: &Scene) -> bool {
        self.sheet.is_complete(scene)
    }

    fn bounds(&self, _scene: &Scene) -> Option<Rect> {
        self.sheet.frame_bounds(self.current_frame)
    }

    fn draw(&self, scene: &Scene, canvas: &mut Canvas, state: &DrawState) -> bool {
        let Some(frame) = self.current() else {
            return false;
        };
        let Some(image) = scene.image(frame.image) else {
            return false;
        };
        let dst = Rect::new(-frame.reg_x, -frame.reg_y, frame.rect.width, frame.rect.height);
        canvas.draw_image(image, frame.rect, dst, state);
        true
    }
}
