//! Containment filter
//!
//! The contour hierarchy reports the outer table boundary and merged regions
//! alongside the real cells. A box that encloses another candidate is such a
//! container and is discarded so only the innermost cells remain.

use tracing::debug;

use crate::table::BoundingBox;

/// Keep only boxes that do not contain any other candidate.
///
/// Containment is inclusive on every edge. Exact duplicates collapse to their
/// first occurrence. Survivors keep their input order, and applying the filter
/// to its own output changes nothing.
pub fn filter_nested(boxes: &[BoundingBox]) -> Vec<BoundingBox> {
    let kept: Vec<BoundingBox> = boxes
        .iter()
        .enumerate()
        .filter(|&(i, candidate)| {
            !boxes.iter().enumerate().any(|(j, other)| {
                if i == j {
                    false
                } else if other == candidate {
                    j < i
                } else {
                    candidate.contains(other)
                }
            })
        })
        .map(|(_, b)| *b)
        .collect();

    debug!(
        "Containment filter kept {} of {} boxes",
        kept.len(),
        boxes.len()
    );
    kept
}
