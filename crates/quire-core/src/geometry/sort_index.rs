//! Reading-order keys for annotations
//!
//! The sort index is `PPPPP|OOOOOO|TTTTT`: page index, offset of the nearest
//! glyph in the page's text flow, and the distance of the shape from the top
//! of the displayed page. Highlights anchored in text and freehand shapes
//! therefore interleave in reading order.

use super::{GlyphFrame, PageInfo, Rect, Rotation};

/// Distance of a storage-space rect from the top of the displayed page.
///
/// Grows strictly as the shape moves down the page, whatever the page's
/// stored rotation.
pub fn sort_index_key(rect: &Rect, page: &PageInfo) -> f64 {
    match page.rotation {
        Rotation::Deg0 => page.size.height - rect.max_y,
        Rotation::Deg180 => rect.min_y,
        Rotation::Deg90 => page.size.width - rect.min_x,
        Rotation::Deg270 => rect.min_x,
    }
}

/// Index of the anchorable glyph nearest to `rect`, if any glyph overlaps it.
pub fn text_offset(rect: &Rect, glyphs: &[GlyphFrame]) -> Option<usize> {
    let overlaps = glyphs
        .iter()
        .any(|glyph| glyph.is_anchorable() && glyph.frame.intersects(rect));
    if !overlaps {
        return None;
    }

    let center = rect.center();
    glyphs
        .iter()
        .enumerate()
        .filter(|(_, glyph)| glyph.is_anchorable())
        .map(|(index, glyph)| (index, glyph.frame.center().distance_to(&center)))
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(index, _)| index)
}

/// Full sort index for a shape whose storage-space bounds are `bounds`
pub fn sort_index(page_index: u32, bounds: &Rect, page: &PageInfo, glyphs: &[GlyphFrame]) -> String {
    let offset = text_offset(bounds, glyphs).unwrap_or(0);
    let top = sort_index_key(bounds, page).floor().max(0.0) as u64;
    format!("{:05}|{:06}|{:05}", page_index, offset, top)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{to_presentation, Size};

    fn page(rotation: Rotation) -> PageInfo {
        PageInfo::new(Size::new(600.0, 800.0), rotation)
    }

    #[test]
    fn test_key_per_rotation() {
        let rect = Rect::new(100.0, 200.0, 150.0, 260.0);

        assert_eq!(sort_index_key(&rect, &page(Rotation::Deg0)), 540.0);
        assert_eq!(sort_index_key(&rect, &page(Rotation::Deg180)), 200.0);
        assert_eq!(sort_index_key(&rect, &page(Rotation::Deg90)), 500.0);
        assert_eq!(sort_index_key(&rect, &page(Rotation::Deg270)), 100.0);
    }

    #[test]
    fn test_key_strictly_increases_downward_for_every_rotation() {
        for rotation in Rotation::ALL {
            let page = page(rotation);
            // Walk a rect down the displayed page, converting each position back to storage
            let inverse = page.inverse();
            let mut previous = f64::NEG_INFINITY;
            for step in 0..20 {
                let presented = Rect::from_origin(50.0, 10.0 + step as f64 * 25.0, 40.0, 10.0);
                let storage = inverse.apply_rect(&presented);
                let key = sort_index_key(&storage, &page);
                assert!(
                    key > previous,
                    "rotation {:?}: key {} not above {}",
                    rotation,
                    key,
                    previous
                );
                previous = key;
            }
        }
    }

    #[test]
    fn test_unrotated_key_is_presentation_top() {
        let page = page(Rotation::Deg0);
        let rect = Rect::new(10.0, 500.0, 90.0, 520.0);
        let presented = to_presentation(&rect, &page);
        assert_eq!(sort_index_key(&rect, &page), presented.min_y);
    }

    #[test]
    fn test_text_offset_skips_whitespace() {
        let glyphs = vec![
            GlyphFrame::new('a', Rect::new(0.0, 0.0, 10.0, 10.0)),
            GlyphFrame::new(' ', Rect::new(10.0, 0.0, 20.0, 10.0)),
            GlyphFrame::new('b', Rect::new(20.0, 0.0, 30.0, 10.0)),
        ];

        // Only the space is covered
        let rect = Rect::new(12.0, 2.0, 18.0, 8.0);
        assert_eq!(text_offset(&rect, &glyphs), None);

        let rect = Rect::new(12.0, 2.0, 22.0, 8.0);
        assert_eq!(text_offset(&rect, &glyphs), Some(2));

        let rect = Rect::new(1.0, 1.0, 12.0, 9.0);
        assert_eq!(text_offset(&rect, &glyphs), Some(0));
    }

    #[test]
    fn test_no_overlap_means_no_offset() {
        let glyphs = vec![GlyphFrame::new('a', Rect::new(0.0, 0.0, 10.0, 10.0))];
        let rect = Rect::new(100.0, 100.0, 110.0, 110.0);
        assert_eq!(text_offset(&rect, &glyphs), None);
    }

    #[test]
    fn test_sort_index_format() {
        let page = page(Rotation::Deg0);
        let glyphs = vec![
            GlyphFrame::new('x', Rect::new(0.0, 700.0, 10.0, 710.0)),
            GlyphFrame::new('y', Rect::new(100.0, 700.0, 110.0, 710.0)),
        ];
        let bounds = Rect::new(95.0, 698.0, 115.0, 712.5);

        assert_eq!(sort_index(3, &bounds, &page, &glyphs), "00003|000001|00087");
    }

    #[test]
    fn test_sort_index_clamps_above_page() {
        let page = page(Rotation::Deg0);
        let bounds = Rect::new(0.0, 790.0, 10.0, 820.0);
        assert_eq!(sort_index(0, &bounds, &page, &[]), "00000|000000|00000");
    }

    #[test]
    fn test_sort_index_orders_lexicographically() {
        let page = page(Rotation::Deg0);
        let upper = sort_index(1, &Rect::new(0.0, 700.0, 10.0, 710.0), &page, &[]);
        let lower = sort_index(1, &Rect::new(0.0, 100.0, 10.0, 110.0), &page, &[]);
        let next_page = sort_index(2, &Rect::new(0.0, 700.0, 10.0, 710.0), &page, &[]);

        let mut indexes = vec![next_page.clone(), lower.clone(), upper.clone()];
        indexes.sort();
        assert_eq!(indexes, vec![upper, lower, next_page]);
    }
}
