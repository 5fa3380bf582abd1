//! Storage <-> presentation conversion
//!
//! Pure functions over [`PageInfo`]. Points go through a degenerate 1x1 rect
//! centered on the point so they follow exactly the same path as rects.

use super::{PageInfo, Point, Rect};

/// Convert a storage-space rect to presentation space
pub fn to_presentation(rect: &Rect, page: &PageInfo) -> Rect {
    page.transform().apply_rect(rect)
}

/// Convert a presentation-space rect to storage space
pub fn to_storage(rect: &Rect, page: &PageInfo) -> Rect {
    page.inverse().apply_rect(rect)
}

pub fn point_to_presentation(point: Point, page: &PageInfo) -> Point {
    to_presentation(&Rect::centered(point, 1.0, 1.0), page).center()
}

pub fn point_to_storage(point: Point, page: &PageInfo) -> Point {
    to_storage(&Rect::centered(point, 1.0, 1.0), page).center()
}

pub fn path_to_presentation(path: &[Point], page: &PageInfo) -> Vec<Point> {
    path.iter()
        .map(|point| point_to_presentation(*point, page))
        .collect()
}

pub fn path_to_storage(path: &[Point], page: &PageInfo) -> Vec<Point> {
    path.iter()
        .map(|point| point_to_storage(*point, page))
        .collect()
}
