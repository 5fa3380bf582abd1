//! PDF annotations
//!
//! [`Annotation`] geometry is always in storage space. [`AnnotationDraft`] and
//! [`AnnotationEdit`] come from the presentation layer and carry
//! presentation-space geometry; the store converts them on the way in.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::geometry::{Point, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AnnotationType {
    Highlight,
    Note,
    Square,
    Ink,
    Image,
}

impl AnnotationType {
    /// Ink annotations are freehand paths; every other type is rect based
    pub fn uses_paths(self) -> bool {
        matches!(self, AnnotationType::Ink)
    }

    /// Check that the geometry matches what this type needs
    pub fn validate_geometry(self, rects: &[Rect], paths: &[Vec<Point>]) -> Result<()> {
        match self {
            AnnotationType::Ink => {
                if paths.is_empty() || paths.iter().any(|path| path.is_empty()) {
                    return Err(StoreError::invalid_geometry("ink annotation needs non-empty paths"));
                }
                if paths.iter().flatten().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
                    return Err(StoreError::invalid_geometry("path point is not finite"));
                }
            }
            AnnotationType::Note => {
                if rects.len() != 1 {
                    return Err(StoreError::invalid_geometry("note annotation needs exactly one rect"));
                }
            }
            AnnotationType::Highlight | AnnotationType::Square | AnnotationType::Image => {
                if rects.is_empty() {
                    return Err(StoreError::invalid_geometry(format!(
                        "{:?} annotation needs at least one rect",
                        self
                    )));
                }
            }
        }
        if rects.iter().any(|rect| !rect.is_finite()) {
            return Err(StoreError::invalid_geometry("rect is not finite"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub key: String,
    pub annotation_type: AnnotationType,
    /// Zero-based page index
    pub page: u32,
    pub rects: Vec<Rect>,
    pub paths: Vec<Vec<Point>>,
    pub color: String,
    pub comment: String,
    /// Text covered by a highlight
    pub text: Option<String>,
    /// Stroke width of ink annotations
    pub line_width: Option<f64>,
    pub sort_index: String,
    /// Created by the current user (others' annotations are read-only)
    pub is_author: bool,
}

impl Annotation {
    /// Storage-space bounds of the whole shape
    pub fn bounds(&self) -> Option<Rect> {
        if self.annotation_type.uses_paths() {
            Rect::bounding_paths(&self.paths)
        } else {
            Rect::bounding(&self.rects)
        }
    }
}

/// Annotation as drawn by the user, geometry in presentation space
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationDraft {
    pub key: Option<String>,
    pub annotation_type: AnnotationType,
    pub page: u32,
    pub rects: Vec<Rect>,
    pub paths: Vec<Vec<Point>>,
    pub color: String,
    pub comment: String,
    pub text: Option<String>,
    pub line_width: Option<f64>,
}

impl AnnotationDraft {
    pub fn new(annotation_type: AnnotationType, page: u32, color: impl Into<String>) -> Self {
        Self {
            key: None,
            annotation_type,
            page,
            rects: Vec::new(),
            paths: Vec::new(),
            color: color.into(),
            comment: String::new(),
            text: None,
            line_width: None,
        }
    }

    pub fn with_rects(mut self, rects: Vec<Rect>) -> Self {
        self.rects = rects;
        self
    }

    pub fn with_paths(mut self, paths: Vec<Vec<Point>>, line_width: f64) -> Self {
        self.paths = paths;
        self.line_width = Some(line_width);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }
}

/// Partial update of an existing annotation; geometry in presentation space
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnnotationEdit {
    pub color: Option<String>,
    pub comment: Option<String>,
    pub rects: Option<Vec<Rect>>,
    pub paths: Option<Vec<Vec<Point>>>,
}

impl AnnotationEdit {
    pub fn is_empty(&self) -> bool {
        self.color.is_none() && self.comment.is_none() && self.rects.is_none() && self.paths.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_geometry() {
        let rect = Rect::new(0.0, 0.0, 10.0, 10.0);
        let path = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0)];

        assert!(AnnotationType::Highlight.validate_geometry(&[rect], &[]).is_ok());
        assert!(AnnotationType::Highlight.validate_geometry(&[], &[]).is_err());
        assert!(AnnotationType::Note.validate_geometry(&[rect, rect], &[]).is_err());
        assert!(AnnotationType::Ink.validate_geometry(&[], &[path.clone()]).is_ok());
        assert!(AnnotationType::Ink.validate_geometry(&[], &[path, vec![]]).is_err());
        let broken = Rect {
            min_x: 0.0,
            min_y: 0.0,
            max_x: f64::NAN,
            max_y: 1.0,
        };
        assert!(AnnotationType::Square.validate_geometry(&[broken], &[]).is_err());
    }

    #[test]
    fn test_bounds_follow_type() {
        let annotation = Annotation {
            key: "AAAA2222".into(),
            annotation_type: AnnotationType::Ink,
            page: 0,
            rects: vec![Rect::new(0.0, 0.0, 500.0, 500.0)],
            paths: vec![vec![Point::new(1.0, 2.0), Point::new(3.0, 5.0)]],
            color: "#ff0000".into(),
            comment: String::new(),
            text: None,
            line_width: Some(2.0),
            sort_index: String::new(),
            is_author: true,
        };
        assert_eq!(annotation.bounds(), Some(Rect::new(1.0, 2.0, 3.0, 5.0)));
    }
}
