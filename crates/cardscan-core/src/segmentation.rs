//! Run-based connected component labeling of edge masks.

use bumpalo::Bump;
use bumpalo::collections::Vec as BumpVec;
use std::ops::Range;

/// Disjoint sets over run indices.
///
/// The representative of a set is always its smallest member, so roots
/// follow raster order when runs are numbered in raster order.
pub struct UnionFind<'a> {
    parent: &'a mut [u32],
}

impl<'a> UnionFind<'a> {
    /// Allocate `size` singleton sets in `arena`.
    pub fn new_in(arena: &'a Bump, size: usize) -> Self {
        Self {
            parent: arena.alloc_slice_fill_with(size, |i| i as u32),
        }
    }

    /// Representative of the set containing `i`, with path halving.
    #[inline]
    pub fn find(&mut self, mut i: u32) -> u32 {
        while self.parent[i as usize] != i {
            let grandparent = self.parent[self.parent[i as usize] as usize];
            self.parent[i as usize] = grandparent;
            i = grandparent;
        }
        i
    }

    /// Merge the sets containing `a` and `b`.
    #[inline]
    pub fn union(&mut self, a: u32, b: u32) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra < rb {
            self.parent[rb as usize] = ra;
        } else if rb < ra {
            self.parent[ra as usize] = rb;
        }
    }
}

/// Bounding box and pixel count of one component.
#[derive(Clone, Copy, Debug)]
pub struct ComponentStats {
    /// Minimum x coordinate.
    pub min_x: u32,
    /// Maximum x coordinate.
    pub max_x: u32,
    /// Minimum y coordinate.
    pub min_y: u32,
    /// Maximum y coordinate.
    pub max_y: u32,
    /// Number of pixels.
    pub pixel_count: u32,
    /// X coordinate of the first pixel in raster order (a boundary pixel).
    pub first_pixel_x: u32,
    /// Y coordinate of the first pixel in raster order.
    pub first_pixel_y: u32,
}

impl ComponentStats {
    fn seeded(run: &Run) -> Self {
        Self {
            min_x: run.x0,
            max_x: run.x1,
            min_y: run.y,
            max_y: run.y,
            pixel_count: 0,
            first_pixel_x: run.x0,
            first_pixel_y: run.y,
        }
    }

    fn absorb(&mut self, run: &Run) {
        self.min_x = self.min_x.min(run.x0);
        self.max_x = self.max_x.max(run.x1);
        self.max_y = run.y;
        self.pixel_count += run.x1 - run.x0 + 1;
    }

    /// Area of the axis-aligned bounding box in pixels.
    #[must_use]
    pub fn bbox_area(&self) -> u64 {
        let w = u64::from(self.max_x - self.min_x) + 1;
        let h = u64::from(self.max_y - self.min_y) + 1;
        w * h
    }
}

/// Labels and per-component statistics.
pub struct LabelResult<'a> {
    /// Row-major pixel labels, 0 for background.
    pub labels: &'a [u32],
    /// Statistics indexed by `label - 1`.
    pub component_stats: Vec<ComponentStats>,
}

/// Horizontal run of foreground pixels, `x0..=x1` inclusive.
#[derive(Clone, Copy, Debug)]
struct Run {
    y: u32,
    x0: u32,
    x1: u32,
}

/// Append the runs of one mask row.
fn push_row_runs(row: &[u8], y: usize, runs: &mut BumpVec<'_, Run>) {
    let mut x = 0;
    while let Some(offset) = row[x..].iter().position(|&v| v != 0) {
        let x0 = x + offset;
        let len = row[x0..].iter().take_while(|&&v| v != 0).count();
        runs.push(Run {
            y: y as u32,
            x0: x0 as u32,
            x1: (x0 + len - 1) as u32,
        });
        x = x0 + len;
        if x >= row.len() {
            break;
        }
    }
}

/// Union every run of `curr` with the 8-connected runs of `prev`.
///
/// Both ranges are sorted by `x0`; a run touches another when their
/// extents come within one pixel.
fn link_rows(runs: &[Run], prev: Range<usize>, curr: Range<usize>, uf: &mut UnionFind<'_>) {
    let mut p = prev.start;
    for c in curr {
        let run = runs[c];
        while p < prev.end && runs[p].x1 + 1 < run.x0 {
            p += 1;
        }
        for q in p..prev.end {
            if runs[q].x0 > run.x1 + 1 {
                break;
            }
            uf.union(c as u32, q as u32);
        }
    }
}

/// Label 8-connected components of nonzero pixels and compute stats for each.
///
/// Labels are assigned in raster order of each component's first pixel, so
/// they are deterministic for a given mask.
pub fn label_components_with_stats<'a>(
    arena: &'a Bump,
    binary: &[u8],
    width: usize,
    height: usize,
) -> LabelResult<'a> {
    let labels = arena.alloc_slice_fill_copy(width * height, 0u32);
    let mut runs = BumpVec::new_in(arena);
    // Run index range of each row.
    let mut rows = BumpVec::with_capacity_in(height, arena);
    for (y, row) in binary.chunks_exact(width).take(height).enumerate() {
        let start = runs.len();
        push_row_runs(row, y, &mut runs);
        rows.push(start..runs.len());
    }
    if runs.is_empty() {
        return LabelResult {
            labels,
            component_stats: Vec::new(),
        };
    }

    let mut uf = UnionFind::new_in(arena, runs.len());
    for y in 1..rows.len() {
        link_rows(&runs, rows[y - 1].clone(), rows[y].clone(), &mut uf);
    }

    // Roots are raster-first runs, so a root is always visited before the
    // rest of its component.
    let mut run_label = BumpVec::from_iter_in((0..runs.len()).map(|_| 0u32), arena);
    let mut component_stats: Vec<ComponentStats> = Vec::new();
    for (i, run) in runs.iter().enumerate() {
        let root = uf.find(i as u32) as usize;
        if root == i {
            component_stats.push(ComponentStats::seeded(run));
            run_label[i] = component_stats.len() as u32;
        } else {
            run_label[i] = run_label[root];
        }
        let label = run_label[i];
        component_stats[label as usize - 1].absorb(run);
        let row = &mut labels[run.y as usize * width..][run.x0 as usize..=run.x1 as usize];
        row.fill(label);
    }

    LabelResult {
        labels,
        component_stats,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use proptest::prelude::*;

    #[test]
    fn test_union_find_keeps_smallest_root() {
        let arena = Bump::new();
        let mut uf = UnionFind::new_in(&arena, 10);

        uf.union(3, 2);
        uf.union(6, 5);
        assert_eq!(uf.find(3), 2);
        assert_ne!(uf.find(3), uf.find(6));

        uf.union(6, 3);
        assert_eq!(uf.find(5), 2);
        assert_eq!(uf.find(9), 9);
    }

    #[test]
    fn test_row_runs() {
        let arena = Bump::new();
        let mut runs = BumpVec::new_in(&arena);
        push_row_runs(&[0, 1, 1, 0, 0, 1, 0, 1], 4, &mut runs);
        let spans: Vec<_> = runs.iter().map(|r| (r.y, r.x0, r.x1)).collect();
        assert_eq!(spans, vec![(4, 1, 2), (4, 5, 5), (4, 7, 7)]);
    }

    #[test]
    fn test_label_components_simple() {
        let arena = Bump::new();
        // Two 2x2 squares separated by a blank row.
        #[rustfmt::skip]
        let binary = [
            255, 255, 0, 0, 0,
            255, 255, 0, 0, 0,
            0,   0,   0, 0, 0,
            0,   0,   0, 255, 255,
            0,   0,   0, 255, 255,
        ];
        let result = label_components_with_stats(&arena, &binary, 5, 5);
        assert_eq!(result.component_stats.len(), 2);

        let s1 = result.component_stats[0];
        assert_eq!(s1.pixel_count, 4);
        assert_eq!((s1.min_x, s1.max_x, s1.min_y, s1.max_y), (0, 1, 0, 1));
        assert_eq!((s1.first_pixel_x, s1.first_pixel_y), (0, 0));

        let s2 = result.component_stats[1];
        assert_eq!((s2.min_x, s2.max_x, s2.min_y, s2.max_y), (3, 4, 3, 4));
        assert_eq!((s2.first_pixel_x, s2.first_pixel_y), (3, 3));
        assert_eq!(s2.bbox_area(), 4);
        assert_eq!(result.labels[4 * 5 + 4], 2);
        assert_eq!(result.labels[2 * 5 + 2], 0);
    }

    #[test]
    fn test_diagonal_pixels_connect() {
        let arena = Bump::new();
        #[rustfmt::skip]
        let binary = [
            255, 0,   0,
            0,   255, 0,
            0,   0,   255,
        ];
        let result = label_components_with_stats(&arena, &binary, 3, 3);
        assert_eq!(result.component_stats.len(), 1);
        assert_eq!(result.component_stats[0].pixel_count, 3);
    }

    #[test]
    fn test_u_shape_merges_late() {
        let arena = Bump::new();
        // The two arms only meet on the last row.
        #[rustfmt::skip]
        let binary = [
            1, 0, 0, 1,
            1, 0, 0, 1,
            1, 1, 1, 1,
        ];
        let result = label_components_with_stats(&arena, &binary, 4, 3);
        assert_eq!(result.component_stats.len(), 1);
        let s = result.component_stats[0];
        assert_eq!(s.pixel_count, 8);
        assert_eq!((s.first_pixel_x, s.first_pixel_y), (0, 0));
        assert!(result.labels.iter().zip(&binary).all(|(&l, &b)| (l == 1) == (b != 0)));
    }

    #[test]
    fn test_wide_mask_keeps_full_coordinates() {
        let arena = Bump::new();
        let width = 70_000;
        let mut binary = vec![0u8; width * 2];
        for x in 66_000..66_010 {
            binary[x] = 255;
            binary[width + x + 1] = 255;
        }
        let result = label_components_with_stats(&arena, &binary, width, 2);
        assert_eq!(result.component_stats.len(), 1);
        let s = result.component_stats[0];
        assert_eq!((s.first_pixel_x, s.first_pixel_y), (66_000, 0));
        assert_eq!((s.min_x, s.max_x), (66_000, 66_010));
        assert_eq!(s.pixel_count, 20);
        assert_eq!(result.labels[width + 66_010], 1);
    }

    proptest! {
        #[test]
        fn prop_label_components_stats_consistent(
            width in 1..64usize,
            height in 1..64usize,
            data in prop::collection::vec(0..=1u8, 64 * 64)
        ) {
            let arena = Bump::new();
            let binary: Vec<u8> = data.iter().map(|&b| b * 255).collect();
            let slice = &binary[..width * height];

            let result = label_components_with_stats(&arena, slice, width, height);

            let total: u32 = result.component_stats.iter().map(|s| s.pixel_count).sum();
            let foreground = slice.iter().filter(|&&v| v != 0).count() as u32;
            prop_assert_eq!(total, foreground);
            for (i, stat) in result.component_stats.iter().enumerate() {
                prop_assert!(stat.pixel_count > 0);
                prop_assert!((stat.max_x as usize) < width);
                prop_assert!((stat.max_y as usize) < height);
                prop_assert!(stat.min_x <= stat.max_x);
                prop_assert!(stat.min_y <= stat.max_y);
                let first = stat.first_pixel_y as usize * width + stat.first_pixel_x as usize;
                prop_assert_eq!(result.labels[first], i as u32 + 1);
            }
        }
    }
}
