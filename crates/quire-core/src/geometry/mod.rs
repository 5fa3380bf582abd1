//! Annotation geometry
//!
//! Two coordinate systems are in play:
//!
//! - **Storage space**: PDF user space of the unrotated page. Origin at the
//!   bottom-left, x to the right, y upward, units in points. Everything the
//!   store persists is in this space.
//! - **Presentation space**: the page as displayed. Origin at the top-left,
//!   y downward, with the page rotated counter-clockwise by its rotation.
//!
//! [`PageInfo`] carries the affine transform from storage to presentation and
//! its inverse; [`transform`] converts shapes and [`sort_index`] derives the
//! reading-order key.

pub mod sort_index;
pub mod transform;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

pub use sort_index::{sort_index, sort_index_key, text_offset};
pub use transform::{
    path_to_presentation, path_to_storage, point_to_presentation, point_to_storage,
    to_presentation, to_storage,
};

/// Tolerance used when comparing transformed coordinates
pub const EPSILON: f64 = 1e-6;

/// A point in either coordinate space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn approx_eq(&self, other: &Point) -> bool {
        (self.x - other.x).abs() < EPSILON && (self.y - other.y).abs() < EPSILON
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle stored as its extreme coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Rect {
    /// Build a rect from two opposite corners in any order
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    pub fn from_origin(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(x, y, x + width, y + height)
    }

    /// Rect of the given size centered on a point
    pub fn centered(center: Point, width: f64, height: f64) -> Self {
        Self::new(
            center.x - width / 2.0,
            center.y - height / 2.0,
            center.x + width / 2.0,
            center.y + height / 2.0,
        )
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }

    pub fn is_finite(&self) -> bool {
        self.min_x.is_finite()
            && self.min_y.is_finite()
            && self.max_x.is_finite()
            && self.max_y.is_finite()
    }

    /// Overlap test; touching edges count as intersecting
    pub fn intersects(&self, other: &Rect) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn approx_eq(&self, other: &Rect) -> bool {
        (self.min_x - other.min_x).abs() < EPSILON
            && (self.min_y - other.min_y).abs() < EPSILON
            && (self.max_x - other.max_x).abs() < EPSILON
            && (self.max_y - other.max_y).abs() < EPSILON
    }

    /// Smallest rect containing every rect, `None` for an empty slice
    pub fn bounding(rects: &[Rect]) -> Option<Rect> {
        let (first, rest) = rects.split_first()?;
        Some(rest.iter().fold(*first, |acc, rect| acc.union(rect)))
    }

    /// Smallest rect containing every point of every path
    pub fn bounding_paths(paths: &[Vec<Point>]) -> Option<Rect> {
        let mut points = paths.iter().flatten();
        let first = points.next()?;
        let seed = Rect::new(first.x, first.y, first.x, first.y);
        Some(points.fold(seed, |acc, p| Rect {
            min_x: acc.min_x.min(p.x),
            min_y: acc.min_y.min(p.y),
            max_x: acc.max_x.max(p.x),
            max_y: acc.max_y.max(p.y),
        }))
    }
}

/// Page rotation in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Rotation {
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Normalise any multiple of 90 (negative values included)
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }

    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];
}

/// Affine transform `x' = a*x + c*y + tx`, `y' = b*x + d*y + ty`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl AffineTransform {
    pub const IDENTITY: AffineTransform = AffineTransform {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    /// Storage-to-presentation transform for an unrotated page of `size`
    /// displayed at `rotation`.
    pub fn for_page(size: Size, rotation: Rotation) -> Self {
        let (w, h) = (size.width, size.height);
        match rotation {
            // (x, y) -> (x, h - y)
            Rotation::Deg0 => Self {
                a: 1.0,
                b: 0.0,
                c: 0.0,
                d: -1.0,
                tx: 0.0,
                ty: h,
            },
            // (x, y) -> (h - y, w - x)
            Rotation::Deg90 => Self {
                a: 0.0,
                b: -1.0,
                c: -1.0,
                d: 0.0,
                tx: h,
                ty: w,
            },
            // (x, y) -> (w - x, y)
            Rotation::Deg180 => Self {
                a: -1.0,
                b: 0.0,
                c: 0.0,
                d: 1.0,
                tx: w,
                ty: 0.0,
            },
            // (x, y) -> (y, x)
            Rotation::Deg270 => Self {
                a: 0.0,
                b: 1.0,
                c: 1.0,
                d: 0.0,
                tx: 0.0,
                ty: 0.0,
            },
        }
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse transform, `None` when the matrix is singular
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() < EPSILON || !det.is_finite() {
            return None;
        }
        Some(Self {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            tx: (self.c * self.ty - self.d * self.tx) / det,
            ty: (self.b * self.tx - self.a * self.ty) / det,
        })
    }

    pub fn apply_point(&self, point: Point) -> Point {
        Point::new(
            self.a * point.x + self.c * point.y + self.tx,
            self.b * point.x + self.d * point.y + self.ty,
        )
    }

    /// Transform all four corners and take their bounds
    pub fn apply_rect(&self, rect: &Rect) -> Rect {
        let corners = [
            self.apply_point(Point::new(rect.min_x, rect.min_y)),
            self.apply_point(Point::new(rect.max_x, rect.min_y)),
            self.apply_point(Point::new(rect.min_x, rect.max_y)),
            self.apply_point(Point::new(rect.max_x, rect.max_y)),
        ];
        let seed = Rect::new(corners[0].x, corners[0].y, corners[0].x, corners[0].y);
        corners[1..].iter().fold(seed, |acc, p| Rect {
            min_x: acc.min_x.min(p.x),
            min_y: acc.min_y.min(p.y),
            max_x: acc.max_x.max(p.x),
            max_y: acc.max_y.max(p.y),
        })
    }
}

/// Page geometry as reported by the page-info provider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageInfo {
    /// Unrotated page size in storage space
    pub size: Size,
    pub rotation: Rotation,
    transform: AffineTransform,
    inverse: AffineTransform,
}

impl PageInfo {
    /// Page info with the standard transform for its rotation
    pub fn new(size: Size, rotation: Rotation) -> Self {
        let transform = AffineTransform::for_page(size, rotation);
        // Quarter-turn transforms always have determinant -1
        let inverse = transform.inverse().unwrap_or(AffineTransform::IDENTITY);
        Self {
            size,
            rotation,
            transform,
            inverse,
        }
    }

    /// Page info with a provider-supplied storage-to-presentation matrix
    pub fn with_transform(size: Size, rotation: Rotation, transform: AffineTransform) -> Result<Self> {
        let inverse = transform
            .inverse()
            .ok_or_else(|| StoreError::invalid_geometry("page transform is not invertible"))?;
        Ok(Self {
            size,
            rotation,
            transform,
            inverse,
        })
    }

    /// Storage-to-presentation transform
    pub fn transform(&self) -> &AffineTransform {
        &self.transform
    }

    /// Presentation-to-storage transform
    pub fn inverse(&self) -> &AffineTransform {
        &self.inverse
    }
}

/// One glyph of the page's extractable text, in storage space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphFrame {
    pub character: char,
    pub frame: Rect,
}

impl GlyphFrame {
    pub fn new(character: char, frame: Rect) -> Self {
        Self { character, frame }
    }

    /// Whitespace and line breaks never anchor a sort index
    pub fn is_anchorable(&self) -> bool {
        !self.character.is_whitespace()
    }
}
