//! Stereo compositing: one logical placement drawn into both eyes
//!
//! The two eyes share a double-width canvas. The right eye's copy of a
//! rectangle is shifted by one eye width, then each copy is clipped against
//! its own viewport. Clipping shrinks the source rectangle in proportion so
//! partially visible elements keep their source/destination ratio.

use super::backend::GraphicsBackend;
use crate::Result;

/// Integer rectangle in canvas or texture pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
        Self { x, y, w, h }
    }

    fn has_area(&self) -> bool {
        self.w > 0 && self.h > 0
    }
}

/// Raw angle value meaning "rotate with the device roll"
pub const ANGLE_ROLL: f64 = 1000.0;
/// Raw angle value meaning "rotate against the device roll"
pub const ANGLE_OPPOSITE_ROLL: f64 = 1001.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Angle {
    Fixed(f64),
    Roll,
    OppositeRoll,
}

impl Angle {
    pub fn from_raw(raw: f64) -> Self {
        if raw == ANGLE_ROLL {
            Angle::Roll
        } else if raw == ANGLE_OPPOSITE_ROLL {
            Angle::OppositeRoll
        } else {
            Angle::Fixed(raw)
        }
    }

    /// Degrees to rotate by, given the current device roll
    pub fn resolve(self, roll: f64) -> f64 {
        match self {
            Angle::Fixed(degrees) => degrees,
            Angle::Roll => roll,
            Angle::OppositeRoll => -roll,
        }
    }
}

impl Default for Angle {
    fn default() -> Self {
        Angle::Fixed(0.0)
    }
}

/// Scale both rectangles about their own centres.
///
/// Both get the left rectangle's scaled size, rounded to whole pixels.
pub fn zoom_rects(left: Rect, right: Rect, scale: f64) -> (Rect, Rect) {
    let w = (f64::from(left.w) * scale).round() as i32;
    let h = (f64::from(left.h) * scale).round() as i32;

    let rescale = |r: Rect| {
        let cx = r.x + r.w / 2;
        let cy = r.y + r.h / 2;
        Rect::new(cx - w / 2, cy - h / 2, w, h)
    };

    (rescale(left), rescale(right))
}

/// Source and destination of one eye's draw call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub src: Rect,
    pub dst: Rect,
}

impl Placement {
    fn drawable(self) -> Option<Self> {
        (self.src.has_area() && self.dst.has_area()).then_some(self)
    }
}

/// Per-eye placements; `None` means nothing is visible in that eye
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StereoPlacement {
    pub left: Option<Placement>,
    pub right: Option<Placement>,
}

impl StereoPlacement {
    pub fn draw_count(&self) -> usize {
        usize::from(self.left.is_some()) + usize::from(self.right.is_some())
    }
}

struct Viewport {
    left: i32,
    right: i32,
    top: i32,
    bottom: i32,
}

fn axis_scale(src: i32, dst: i32) -> f64 {
    if src != dst && dst != 0 {
        f64::from(src) / f64::from(dst)
    } else {
        1.0
    }
}

fn clip(src: Rect, dst: Rect, viewport: &Viewport) -> Placement {
    let scale_x = axis_scale(src.w, dst.w);
    let scale_y = axis_scale(src.h, dst.h);
    let (mut src, mut dst) = (src, dst);

    if dst.x < viewport.left {
        let overage = viewport.left - dst.x;
        let shrink = (scale_x * f64::from(overage)) as i32;
        src.x += shrink;
        src.w -= shrink;
        dst.w -= overage;
        dst.x = viewport.left;
    }

    if dst.x + dst.w > viewport.right {
        let overage = dst.x + dst.w - viewport.right;
        dst.w -= overage;
        src.w -= (scale_x * f64::from(overage)) as i32;
    }

    if dst.y < viewport.top {
        let overage = viewport.top - dst.y;
        let shrink = (scale_y * f64::from(overage)) as i32;
        src.y += shrink;
        src.h -= shrink;
        dst.h -= overage;
        dst.y = viewport.top;
    }

    if dst.y + dst.h > viewport.bottom {
        let overage = dst.y + dst.h - viewport.bottom;
        dst.h -= overage;
        src.h -= (scale_y * f64::from(overage)) as i32;
    }

    Placement { src, dst }
}

/// One element draw: where, how large, how rotated
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawRequest {
    /// Texture sub-rectangle; the whole texture when `None`
    pub src: Option<Rect>,
    pub dst: Rect,
    /// Separate right-eye placement; mirrors `dst` when `None`
    pub dst2: Option<Rect>,
    pub angle: Angle,
    pub zoom: f64,
}

impl DrawRequest {
    pub fn new(dst: Rect) -> Self {
        Self {
            src: None,
            dst,
            dst2: None,
            angle: Angle::default(),
            zoom: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StereoCompositor {
    eye_width: i32,
    eye_height: i32,
}

impl StereoCompositor {
    pub fn new(eye_width: u32, eye_height: u32) -> Self {
        Self {
            eye_width: eye_width as i32,
            eye_height: eye_height as i32,
        }
    }

    /// Clip `dst` (and `dst2`, or a copy of `dst`) into the two eyes
    pub fn layout(&self, src: Rect, dst: Rect, dst2: Option<Rect>) -> StereoPlacement {
        let mut right = dst2.unwrap_or(dst);
        right.x += self.eye_width;

        let left_eye = Viewport {
            left: 0,
            right: self.eye_width,
            top: 0,
            bottom: self.eye_height,
        };
        let right_eye = Viewport {
            left: self.eye_width,
            right: 2 * self.eye_width,
            top: 0,
            bottom: self.eye_height,
        };

        StereoPlacement {
            left: clip(src, dst, &left_eye).drawable(),
            right: clip(src, right, &right_eye).drawable(),
        }
    }

    /// Draw one texture into both eyes. Returns the number of draw calls.
    pub fn render<G: GraphicsBackend>(
        &self,
        backend: &mut G,
        texture: &G::Texture,
        src: Option<Rect>,
        dst: Rect,
        dst2: Option<Rect>,
        angle: f64,
    ) -> Result<usize> {
        self.render_pair(backend, texture, texture, src, dst, dst2, angle)
    }

    /// Like [`render`](Self::render) with a separate texture per eye
    #[allow(clippy::too_many_arguments)]
    pub fn render_pair<G: GraphicsBackend>(
        &self,
        backend: &mut G,
        left: &G::Texture,
        right: &G::Texture,
        src: Option<Rect>,
        dst: Rect,
        dst2: Option<Rect>,
        angle: f64,
    ) -> Result<usize> {
        let src = src.unwrap_or_else(|| {
            let (w, h) = backend.texture_size(left);
            Rect::new(0, 0, w as i32, h as i32)
        });

        let placement = self.layout(src, dst, dst2);
        if let Some(p) = placement.left {
            backend.draw(left, p.src, p.dst, angle)?;
        }
        if let Some(p) = placement.right {
            backend.draw(right, p.src, p.dst, angle)?;
        }
        Ok(placement.draw_count())
    }

    /// Zoom, resolve the angle against `roll`, then render
    pub fn draw<G: GraphicsBackend>(
        &self,
        backend: &mut G,
        texture: &G::Texture,
        request: &DrawRequest,
        roll: f64,
    ) -> Result<usize> {
        let (dst, dst2) = zoom_rects(request.dst, request.dst2.unwrap_or(request.dst), request.zoom);
        let dst2 = request.dst2.map(|_| dst2);
        self.render(
            backend,
            texture,
            request.src,
            dst,
            dst2,
            request.angle.resolve(roll),
        )
    }

    /// Solid rectangle in both eyes
    pub fn fill<G: GraphicsBackend>(&self, backend: &mut G, dst: Rect, rgba: [u8; 4]) -> Result<()> {
        let placement = self.layout(Rect::new(0, 0, dst.w, dst.h), dst, None);
        for p in [placement.left, placement.right].into_iter().flatten() {
            backend.fill_rect(p.dst, rgba)?;
        }
        Ok(())
    }
}
