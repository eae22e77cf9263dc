#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::similar_names)]
#![allow(unsafe_code)]
//! Card localization: edge extraction, contour fitting and quad acceptance.

use crate::config::PipelineConfig;
use crate::filter;
use crate::gradient;
use crate::image::{Frame, ImageView};
use crate::segmentation::{ComponentStats, label_components_with_stats};
use bumpalo::Bump;
use bumpalo::collections::Vec as BumpVec;
use multiversion::multiversion;
use serde::{Deserialize, Serialize};

/// A 2D point with subpixel precision.
///
/// Frame coordinates use the pixel-center convention: pixel `(i, j)` covers
/// `[i - 0.5, i + 0.5] x [j - 0.5, j + 0.5]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate.
    pub x: f64,
    /// Y coordinate.
    pub y: f64,
}

impl Point {
    /// Create a point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Four card corners in frame coordinates.
///
/// Corners are ordered top-left, top-right, bottom-right, bottom-left
/// (clockwise in image coordinates).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quadrilateral {
    /// Corners in TL, TR, BR, BL order.
    pub corners: [Point; 4],
}

impl Quadrilateral {
    /// Build a quad from corners in arbitrary order.
    ///
    /// TL has the smallest `x + y`, BR the largest; TR has the largest
    /// `x - y`, BL the largest `y - x`. When those picks collide (strongly
    /// rotated quads) the corners are sorted by angle around the centroid,
    /// starting from the one closest to the top-left pick.
    #[must_use]
    pub fn from_unordered(points: [Point; 4]) -> Self {
        let pick = |key: &dyn Fn(&Point) -> f64| -> usize {
            let mut best = 0;
            for i in 1..4 {
                if key(&points[i]) > key(&points[best]) {
                    best = i;
                }
            }
            best
        };
        let tl = pick(&|p| -(p.x + p.y));
        let tr = pick(&|p| p.x - p.y);
        let br = pick(&|p| p.x + p.y);
        let bl = pick(&|p| p.y - p.x);

        let mut seen = [false; 4];
        for i in [tl, tr, br, bl] {
            seen[i] = true;
        }
        if seen.iter().all(|&s| s) {
            return Self {
                corners: [points[tl], points[tr], points[br], points[bl]],
            };
        }

        let c = centroid(&points);
        let mut order = [0usize, 1, 2, 3];
        order.sort_by(|&a, &b| {
            let ta = (points[a].y - c.y).atan2(points[a].x - c.x);
            let tb = (points[b].y - c.y).atan2(points[b].x - c.x);
            ta.total_cmp(&tb)
        });
        // Ascending atan2 in image coordinates walks clockwise on screen.
        let start = order.iter().position(|&i| i == tl).unwrap_or(0);
        let mut corners = [points[0]; 4];
        for (k, corner) in corners.iter_mut().enumerate() {
            *corner = points[order[(start + k) % 4]];
        }
        Self { corners }
    }

    /// Axis-aligned rectangle covering a whole `width x height` image.
    #[must_use]
    pub fn full_frame(width: usize, height: usize) -> Self {
        let (w, h) = (width as f64 - 0.5, height as f64 - 0.5);
        Self {
            corners: [
                Point::new(-0.5, -0.5),
                Point::new(w, -0.5),
                Point::new(w, h),
                Point::new(-0.5, h),
            ],
        }
    }

    /// Unsigned polygon area.
    #[must_use]
    pub fn area(&self) -> f64 {
        signed_area(&self.corners).abs()
    }

    /// Mean of the four corners.
    #[must_use]
    pub fn center(&self) -> Point {
        centroid(&self.corners)
    }

    /// Side lengths, starting with the top edge (TL-TR).
    #[must_use]
    pub fn side_lengths(&self) -> [f64; 4] {
        let c = &self.corners;
        [
            c[0].distance(c[1]),
            c[1].distance(c[2]),
            c[2].distance(c[3]),
            c[3].distance(c[0]),
        ]
    }

    /// True when every turn has the same orientation (strictly convex, not self-intersecting).
    #[must_use]
    pub fn is_convex(&self) -> bool {
        let mut sign = 0.0f64;
        for i in 0..4 {
            let a = self.corners[i];
            let b = self.corners[(i + 1) % 4];
            let c = self.corners[(i + 2) % 4];
            let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
            if cross.abs() < 1e-9 {
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }

    /// Largest deviation of an interior angle from 90 degrees.
    #[must_use]
    pub fn max_angle_deviation_deg(&self) -> f64 {
        let mut worst = 0.0f64;
        for i in 0..4 {
            let p = self.corners[i];
            let prev = self.corners[(i + 3) % 4];
            let next = self.corners[(i + 1) % 4];
            let (ax, ay) = (prev.x - p.x, prev.y - p.y);
            let (bx, by) = (next.x - p.x, next.y - p.y);
            let denom = ax.hypot(ay) * bx.hypot(by);
            if denom < 1e-12 {
                return 90.0;
            }
            let cos = ((ax * bx + ay * by) / denom).clamp(-1.0, 1.0);
            worst = worst.max((cos.acos().to_degrees() - 90.0).abs());
        }
        worst
    }

    /// Short-side / long-side ratio using the mean of opposite sides.
    #[must_use]
    pub fn aspect_ratio(&self) -> f64 {
        let s = self.side_lengths();
        let a = (s[0] + s[2]) * 0.5;
        let b = (s[1] + s[3]) * 0.5;
        let long = a.max(b);
        if long <= 0.0 { 0.0 } else { a.min(b) / long }
    }
}

fn signed_area(points: &[Point]) -> f64 {
    let n = points.len();
    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += points[i].x * points[j].y - points[j].x * points[i].y;
    }
    area * 0.5
}

fn centroid(points: &[Point]) -> Point {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point::new(sx / n, sy / n)
}

/// A quad that passed every geometric filter.
#[derive(Clone, Copy, Debug)]
pub struct QuadCandidate {
    /// Component label the quad was fitted to.
    pub label: u32,
    /// Unrefined corners.
    pub quad: Quadrilateral,
    /// Quad area in pixels.
    pub area: f64,
}

/// Counters collected while localizing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalizeStats {
    /// Edge components found in the frame.
    pub num_components: usize,
    /// Components large enough to be traced.
    pub num_traced: usize,
    /// Quads that passed every filter.
    pub num_candidates: usize,
}

/// Locate the single most prominent card-shaped quadrilateral in a frame.
///
/// Returns `None` when nothing card-shaped is visible; that is an ordinary
/// outcome, not an error. Among accepted quads the largest wins; equal
/// areas go to the lower component label.
pub fn locate_card(
    arena: &Bump,
    frame: &Frame,
    config: &PipelineConfig,
) -> (Option<Quadrilateral>, LocalizeStats) {
    let w = frame.width();
    let h = frame.height();
    let mut stats = LocalizeStats::default();
    if w < 3 || h < 3 {
        return (None, stats);
    }

    let gray = arena.alloc_slice_copy(&frame.to_gray());
    let gray_view = ImageView {
        data: gray,
        width: w,
        height: h,
        stride: w,
    };

    let blurred = filter::gaussian_blur(arena, &gray_view, config.blur_radius);
    let blurred_view = ImageView {
        data: blurred,
        width: w,
        height: h,
        stride: w,
    };

    let magnitude = arena.alloc_slice_fill_copy(w * h, 0u16);
    gradient::sobel_magnitude(&blurred_view, magnitude);
    let edges = arena.alloc_slice_fill_copy(w * h, 0u8);
    gradient::edge_mask(magnitude, config.edge_threshold, edges);
    let closed = filter::close(arena, edges, w, h, config.morph_radius);

    let label_result = label_components_with_stats(arena, closed, w, h);
    stats.num_components = label_result.component_stats.len();

    let frame_area = (w * h) as f64;
    let min_area = config.min_area_fraction * frame_area;
    stats.num_traced = label_result
        .component_stats
        .iter()
        .filter(|s| s.bbox_area() as f64 >= min_area)
        .count();

    let candidates =
        extract_candidates(label_result.labels, &label_result.component_stats, w, h, config);
    stats.num_candidates = candidates.len();

    let mut best: Option<&QuadCandidate> = None;
    for cand in &candidates {
        let better = match best {
            None => true,
            Some(b) => cand.area > b.area || (cand.area == b.area && cand.label < b.label),
        };
        if better {
            best = Some(cand);
        }
    }

    let quad = best.map(|cand| {
        if config.refine_corners {
            refine_quad(&gray_view, &cand.quad, config)
        } else {
            cand.quad
        }
    });
    (quad, stats)
}

/// Trace and fit every sufficiently large component in parallel.
///
/// Results are returned in label order.
pub fn extract_candidates(
    labels: &[u32],
    component_stats: &[ComponentStats],
    width: usize,
    height: usize,
    config: &PipelineConfig,
) -> Vec<QuadCandidate> {
    use rayon::prelude::*;

    let frame_area = (width * height) as f64;
    let min_area = config.min_area_fraction * frame_area;

    component_stats
        .par_iter()
        .enumerate()
        .filter(|(_, stat)| stat.bbox_area() as f64 >= min_area)
        .filter_map(|(label_idx, stat)| {
            let arena = Bump::new();
            let label = (label_idx + 1) as u32;
            let quad = fit_component(&arena, labels, width, height, stat, label, config)?;
            Some(QuadCandidate {
                label,
                area: quad.area(),
                quad,
            })
        })
        .collect()
}

/// Trace one component's outer boundary and reduce it to an accepted quad.
fn fit_component(
    arena: &Bump,
    labels: &[u32],
    width: usize,
    height: usize,
    stat: &ComponentStats,
    label: u32,
    config: &PipelineConfig,
) -> Option<Quadrilateral> {
    let start = (stat.first_pixel_x as usize, stat.first_pixel_y as usize);
    let mut contour =
        trace_boundary(arena, labels, width, height, start, label, config.max_contour_len);
    if contour.len() < 12 {
        return None;
    }
    let first = contour[0];
    contour.push(first);

    let perimeter: f64 = contour.windows(2).map(|w| w[0].distance(w[1])).sum();
    let simple = drop_collinear(arena, &contour);
    let epsilon = (perimeter * config.approx_epsilon_ratio).max(1.0);
    let simplified = douglas_peucker(arena, &simple, epsilon);

    // Closed polylines: n vertices are stored as n + 1 points.
    let reduced = match simplified.len() {
        5 => simplified,
        6..=13 => reduce_to_quad(arena, &simplified),
        _ => return None,
    };
    if reduced.len() != 5 {
        return None;
    }

    let quad = Quadrilateral::from_unordered([reduced[0], reduced[1], reduced[2], reduced[3]]);
    accept_quad(&quad, width, height, config).then_some(quad)
}

/// Apply the card-shape filters to a quad.
#[must_use]
pub fn accept_quad(
    quad: &Quadrilateral,
    width: usize,
    height: usize,
    config: &PipelineConfig,
) -> bool {
    let frame_area = (width * height) as f64;
    let area = quad.area();
    let allowed = config.min_area_fraction * frame_area..=config.max_area_fraction * frame_area;
    if !allowed.contains(&area) {
        return false;
    }
    if !quad.is_convex() {
        return false;
    }
    if quad.max_angle_deviation_deg() > config.max_angle_deviation_deg {
        return false;
    }
    let ratio = quad.aspect_ratio();
    (ratio - config.aspect_ratio).abs() <= config.aspect_tolerance * config.aspect_ratio
}

/// Simplify a polyline with Douglas-Peucker, keeping both end points.
pub fn douglas_peucker<'a>(arena: &'a Bump, points: &[Point], epsilon: f64) -> BumpVec<'a, Point> {
    let n = points.len();
    let mut out = BumpVec::new_in(arena);
    if n < 3 {
        out.extend_from_slice(points);
        return out;
    }

    let mut keep = BumpVec::from_iter_in(std::iter::repeat(false).take(n), arena);
    keep[0] = true;
    keep[n - 1] = true;
    let mut pending = BumpVec::new_in(arena);
    pending.push((0usize, n - 1));

    while let Some((lo, hi)) = pending.pop() {
        let farthest = (lo + 1..hi)
            .map(|i| (i, line_distance(points[i], points[lo], points[hi])))
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, bd)) if bd >= d => best,
                _ => Some((i, d)),
            });
        if let Some((i, d)) = farthest {
            if d > epsilon {
                keep[i] = true;
                pending.push((lo, i));
                pending.push((i, hi));
            }
        }
    }

    out.extend(points.iter().zip(keep.iter()).filter(|&(_, &k)| k).map(|(&p, _)| p));
    out
}

/// Distance from `p` to the line through `a` and `b` (to `a` when they coincide).
fn line_distance(p: Point, a: Point, b: Point) -> f64 {
    let len = a.distance(b);
    if len < 1e-9 {
        return p.distance(a);
    }
    ((b.x - a.x) * (a.y - p.y) - (a.x - p.x) * (b.y - a.y)).abs() / len
}

fn triangle_area(a: Point, b: Point, c: Point) -> f64 {
    ((b.x - a.x) * (c.y - a.y) - (c.x - a.x) * (b.y - a.y)).abs() * 0.5
}

/// Drop the vertex spanning the smallest triangle with its neighbours until
/// four remain. Input and output are closed (first point repeated).
fn reduce_to_quad<'a>(arena: &'a Bump, closed: &[Point]) -> BumpVec<'a, Point> {
    let open = &closed[..closed.len().saturating_sub(1)];
    let mut ring = BumpVec::from_iter_in(open.iter().copied(), arena);
    while ring.len() > 4 {
        let n = ring.len();
        let (weakest, _) = (0..n)
            .map(|i| (i, triangle_area(ring[(i + n - 1) % n], ring[i], ring[(i + 1) % n])))
            .fold((0, f64::MAX), |best, cur| if cur.1 < best.1 { cur } else { best });
        ring.remove(weakest);
    }
    if let Some(&first) = ring.first() {
        ring.push(first);
    }
    ring
}

/// Clockwise Moore neighbourhood, starting with the pixel above.
const MOORE: [(isize, isize); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

#[multiversion(targets(
    "x86_64+avx2+bmi1+bmi2+popcnt+lzcnt",
    "x86_64+avx512f+avx512bw+avx512dq+avx512vl",
    "aarch64+neon"
))]
/// Moore-neighbourhood border following.
///
/// Walks the outer boundary of the component clockwise, starting at its
/// first pixel in raster order, until it returns to the start or `max_steps`
/// points have been collected.
fn trace_boundary<'a>(
    arena: &'a Bump,
    labels: &[u32],
    width: usize,
    height: usize,
    start: (usize, usize),
    label: u32,
    max_steps: usize,
) -> BumpVec<'a, Point> {
    let inside = |x: isize, y: isize| {
        x >= 0
            && y >= 0
            && (x as usize) < width
            && (y as usize) < height
            && labels[y as usize * width + x as usize] == label
    };
    let origin = (start.0 as isize, start.1 as isize);
    let (mut x, mut y) = origin;
    // The start is the topmost-leftmost pixel, so the walk begins heading right.
    let mut heading = 2;
    let mut contour = BumpVec::new_in(arena);

    while contour.len() < max_steps {
        contour.push(Point::new(x as f64, y as f64));
        let next = (0..8)
            .map(|k| (heading + 6 + k) % 8)
            .find(|&d| inside(x + MOORE[d].0, y + MOORE[d].1));
        let Some(dir) = next else {
            break;
        };
        x += MOORE[dir].0;
        y += MOORE[dir].1;
        heading = dir;
        if (x, y) == origin {
            break;
        }
    }
    contour
}

/// Remove points that lie on a straight line through their neighbours.
pub fn drop_collinear<'a>(arena: &'a Bump, points: &[Point]) -> BumpVec<'a, Point> {
    let mut out = BumpVec::with_capacity_in(points.len(), arena);
    let (Some(&first), Some(&last)) = (points.first(), points.last()) else {
        return out;
    };
    out.push(first);
    for w in points.windows(3) {
        let (a, b, c) = (w[0], w[1], w[2]);
        let turn = (b.x - a.x) * (c.y - b.y) - (c.x - b.x) * (b.y - a.y);
        // Pixel coordinates are integers, so the cross product is exact.
        if turn.abs() > 1e-6 {
            out.push(b);
        }
    }
    if points.len() > 1 {
        out.push(last);
    }
    out
}

/// Line `a*x + b*y + c = 0` with unit normal `(a, b)`.
type Line = (f64, f64, f64);

/// Refine all four corners by intersecting re-fitted edge lines.
///
/// Any corner whose refinement fails or moves further than
/// `refine_max_shift` keeps its original position.
#[must_use]
pub fn refine_quad(
    img: &ImageView,
    quad: &Quadrilateral,
    config: &PipelineConfig,
) -> Quadrilateral {
    let c = quad.corners;
    let lines: [Option<Line>; 4] =
        std::array::from_fn(|i| fit_edge_step(img, c[i], c[(i + 1) % 4], config.refine_band));

    let mut refined = c;
    for i in 0..4 {
        // Corner i joins edge (i-1 -> i) and edge (i -> i+1).
        let (Some(l1), Some(l2)) = (lines[(i + 3) % 4], lines[i]) else {
            continue;
        };
        if let Some(p) = intersect(l1, l2) {
            if p.distance(c[i]) <= config.refine_max_shift {
                refined[i] = p;
            }
        }
    }
    Quadrilateral { corners: refined }
}

fn intersect(l1: Line, l2: Line) -> Option<Point> {
    let det = l1.0 * l2.1 - l2.0 * l1.1;
    if det.abs() < 1e-6 {
        return None;
    }
    let x = (l1.1 * l2.2 - l2.1 * l1.2) / det;
    let y = (l2.0 * l1.2 - l1.0 * l2.2) / det;
    Some(Point::new(x, y))
}

/// Fit an edge line with a local intensity step model.
///
/// At stations spread over the middle of the edge, the intensity profile
/// along the normal is modelled as a step between its two plateaus; the edge
/// point is where the profile crosses the mid level. A total least squares
/// line through the edge points is returned. Each station has its own
/// plateaus, so the card side may be darker or lighter than the background
/// anywhere along the edge.
fn fit_edge_step(img: &ImageView, p1: Point, p2: Point, band: f64) -> Option<Line> {
    const STEP: f64 = 0.5;
    const MIN_CONTRAST: f64 = 12.0;

    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    let len = dx.hypot(dy);
    if len < 8.0 || band < 1.0 {
        return None;
    }
    let (tx, ty) = (dx / len, dy / len);
    let (nx, ny) = (-ty, tx);

    let n_steps = (band / STEP) as i32;
    let n_stations = ((len / 4.0) as usize).clamp(5, 64);
    let mut pts: Vec<Point> = Vec::with_capacity(n_stations);
    let mut profile = Vec::with_capacity((2 * n_steps + 1) as usize);

    for k in 0..n_stations {
        let t = 0.15 + 0.7 * (k as f64 + 0.5) / n_stations as f64;
        let cx = p1.x + dx * t;
        let cy = p1.y + dy * t;

        profile.clear();
        for s in -n_steps..=n_steps {
            let off = f64::from(s) * STEP;
            profile.push(img.sample_bilinear(cx + nx * off, cy + ny * off));
        }

        let m = profile.len();
        let a = (profile[0] + profile[1]) * 0.5;
        let b = (profile[m - 1] + profile[m - 2]) * 0.5;
        if (b - a).abs() < MIN_CONTRAST {
            continue;
        }
        let mid = (a + b) * 0.5;

        // Crossing of the mid level nearest to the station centre.
        let center = n_steps as usize;
        let mut best: Option<(f64, f64)> = None;
        for j in 0..m - 1 {
            let (v0, v1) = (profile[j] - mid, profile[j + 1] - mid);
            if v0 == 0.0 || v0.signum() != v1.signum() {
                let frac = if (v1 - v0).abs() > 1e-12 { v0 / (v0 - v1) } else { 0.0 };
                let pos = j as f64 + frac;
                let dist = (pos - center as f64).abs();
                if best.map_or(true, |(_, d)| dist < d) {
                    best = Some((pos, dist));
                }
            }
        }
        if let Some((pos, _)) = best {
            let off = (pos - center as f64) * STEP;
            pts.push(Point::new(cx + nx * off, cy + ny * off));
        }
    }

    fit_line(&pts)
}

/// Total least squares line fit.
fn fit_line(pts: &[Point]) -> Option<Line> {
    if pts.len() < 3 {
        return None;
    }
    let c = centroid(pts);
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in pts {
        let (x, y) = (p.x - c.x, p.y - c.y);
        sxx += x * x;
        sxy += x * y;
        syy += y * y;
    }
    // Direction of largest variance.
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let (a, b) = (-theta.sin(), theta.cos());
    Some((a, b, -(a * c.x + b * c.y)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use proptest::prelude::*;

    fn rect(x0: f64, y0: f64, x1: f64, y1: f64) -> Quadrilateral {
        Quadrilateral {
            corners: [
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
        }
    }

    #[test]
    fn test_order_corners_from_shuffled() {
        let q = rect(10.0, 20.0, 110.0, 160.0);
        let c = q.corners;
        let shuffled = Quadrilateral::from_unordered([c[2], c[0], c[3], c[1]]);
        assert_eq!(shuffled, q);
    }

    #[test]
    fn test_order_corners_diamond_falls_back_to_angles() {
        // A square rotated by 45 degrees: x+y ties between left and top corners.
        let pts = [
            Point::new(50.0, 0.0),
            Point::new(100.0, 50.0),
            Point::new(50.0, 100.0),
            Point::new(0.0, 50.0),
        ];
        let q = Quadrilateral::from_unordered([pts[2], pts[3], pts[0], pts[1]]);
        assert!(q.is_convex());
        // Clockwise in image coordinates gives positive signed area.
        assert!(signed_area(&q.corners) > 0.0);
        let mut xs: Vec<_> = q.corners.iter().map(|p| (p.x, p.y)).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        xs.dedup();
        assert_eq!(xs.len(), 4);
    }

    #[test]
    fn test_quad_shape_metrics() {
        let q = rect(0.0, 0.0, 250.0, 350.0);
        assert!((q.area() - 87_500.0).abs() < 1e-9);
        assert!(q.is_convex());
        assert!(q.max_angle_deviation_deg() < 1e-9);
        assert!((q.aspect_ratio() - 2.5 / 3.5).abs() < 1e-12);

        let bowtie = Quadrilateral {
            corners: [
                Point::new(0.0, 0.0),
                Point::new(10.0, 10.0),
                Point::new(10.0, 0.0),
                Point::new(0.0, 10.0),
            ],
        };
        assert!(!bowtie.is_convex());
    }

    #[test]
    fn test_accept_quad_filters() {
        let config = PipelineConfig::default();
        // 200x280 card in a 640x480 frame: about 18% of the frame.
        assert!(accept_quad(&rect(100.0, 100.0, 300.0, 380.0), 640, 480, &config));
        // Square: wrong aspect ratio.
        assert!(!accept_quad(&rect(100.0, 100.0, 300.0, 300.0), 640, 480, &config));
        // Too small.
        assert!(!accept_quad(&rect(0.0, 0.0, 25.0, 35.0), 640, 480, &config));
        // Landscape cards are accepted too.
        assert!(accept_quad(&rect(100.0, 100.0, 380.0, 300.0), 640, 480, &config));
    }

    #[test]
    fn test_full_frame_quad() {
        let q = Quadrilateral::full_frame(4, 2);
        assert_eq!(q.corners[0], Point::new(-0.5, -0.5));
        assert_eq!(q.corners[2], Point::new(3.5, 1.5));
        assert!((q.area() - 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_drop_collinear_keeps_turns() {
        let arena = Bump::new();
        let pts: Vec<Point> = [
            (0.0, 0.0),
            (1.0, 0.0),
            (2.0, 0.0),
            (2.0, 1.0),
            (2.0, 2.0),
            (1.0, 1.0),
        ]
        .iter()
        .map(|&(x, y)| Point::new(x, y))
        .collect();
        let kept: Vec<_> = drop_collinear(&arena, &pts).iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(kept, vec![(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (1.0, 1.0)]);
    }

    #[test]
    fn test_reduce_to_quad_drops_shallow_vertices() {
        let arena = Bump::new();
        let closed = [
            Point::new(0.0, 0.0),
            Point::new(50.0, 1.0),
            Point::new(100.0, 0.0),
            Point::new(100.0, 140.0),
            Point::new(0.0, 140.0),
            Point::new(-1.0, 70.0),
            Point::new(0.0, 0.0),
        ];
        let quad = reduce_to_quad(&arena, &closed);
        assert_eq!(quad.len(), 5);
        assert_eq!(quad[0], quad[4]);
        let corners: Vec<_> = quad[..4].iter().map(|p| (p.x, p.y)).collect();
        assert_eq!(corners, vec![(0.0, 0.0), (100.0, 0.0), (100.0, 140.0), (0.0, 140.0)]);
    }

    fn draw_rect(
        w: usize,
        h: usize,
        x0: usize,
        y0: usize,
        x1: usize,
        y1: usize,
        bg: u8,
        fg: u8,
    ) -> Frame {
        let mut data = vec![bg; w * h];
        for y in y0..y1 {
            for x in x0..x1 {
                data[y * w + x] = fg;
            }
        }
        Frame::new(data, w, h, 1).unwrap()
    }

    #[test]
    fn test_locate_axis_aligned_card() {
        let frame = draw_rect(320, 240, 100, 40, 200, 180, 30, 220);
        let arena = Bump::new();
        let (quad, stats) = locate_card(&arena, &frame, &PipelineConfig::default());
        let quad = quad.expect("card not found");
        assert!(stats.num_candidates >= 1);

        // Card edges lie between pixels 99/100, 199/200, 39/40 and 179/180.
        let expected = [
            Point::new(99.5, 39.5),
            Point::new(199.5, 39.5),
            Point::new(199.5, 179.5),
            Point::new(99.5, 179.5),
        ];
        for (got, want) in quad.corners.iter().zip(expected) {
            assert!(got.distance(want) < 1.5, "corner {got:?} vs {want:?}");
        }
    }

    #[test]
    fn test_blank_frame_has_no_card() {
        let frame = Frame::new(vec![128; 320 * 240], 320, 240, 1).unwrap();
        let arena = Bump::new();
        let (quad, stats) = locate_card(&arena, &frame, &PipelineConfig::default());
        assert!(quad.is_none());
        assert_eq!(stats.num_components, 0);
    }

    #[test]
    fn test_small_rectangle_rejected() {
        let frame = draw_rect(320, 240, 150, 100, 170, 128, 30, 220);
        let arena = Bump::new();
        let (quad, _) = locate_card(&arena, &frame, &PipelineConfig::default());
        assert!(quad.is_none());
    }

    #[test]
    fn test_square_rejected() {
        let frame = draw_rect(320, 240, 80, 40, 220, 180, 30, 220);
        let arena = Bump::new();
        let (quad, _) = locate_card(&arena, &frame, &PipelineConfig::default());
        assert!(quad.is_none());
    }

    #[test]
    fn test_refine_recovers_edge_position() {
        let frame = draw_rect(200, 200, 50, 40, 150, 180, 40, 200);
        let gray = frame.to_gray();
        let img = ImageView::new(&gray, 200, 200, 200).unwrap();
        // Rough corners, about one pixel off.
        let rough = rect(48.5, 38.5, 150.5, 180.5);
        let refined = refine_quad(&img, &rough, &PipelineConfig::default());
        let expected = rect(49.5, 39.5, 149.5, 179.5);
        for (got, want) in refined.corners.iter().zip(expected.corners) {
            assert!(got.distance(want) < 0.2, "corner {got:?} vs {want:?}");
        }
    }

    proptest! {
        #[test]
        fn prop_douglas_peucker_invariants(
            points in prop::collection::vec((0.0..1000.0, 0.0..1000.0), 3..100),
            epsilon in 0.1..10.0f64
        ) {
            let arena = Bump::new();
            let contour: Vec<Point> = points.iter().map(|&(x, y)| Point { x, y }).collect();
            let simplified = douglas_peucker(&arena, &contour, epsilon);

            // Simplified points are a subset of the original points.
            for p in &simplified {
                prop_assert!(contour.iter().any(|op| op == p));
            }

            // End points are preserved.
            prop_assert_eq!(simplified[0], contour[0]);
            prop_assert_eq!(simplified[simplified.len() - 1], contour[contour.len() - 1]);
            prop_assert!(simplified.len() <= contour.len());
        }

        #[test]
        fn prop_from_unordered_is_permutation_invariant(
            x0 in 0.0..50.0f64, y0 in 0.0..50.0f64,
            w in 60.0..200.0f64, h in 60.0..200.0f64,
            skew in -10.0..10.0f64,
            perm in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
        ) {
            let pts = [
                Point::new(x0, y0),
                Point::new(x0 + w, y0 + skew),
                Point::new(x0 + w + skew, y0 + h),
                Point::new(x0 - skew, y0 + h - skew),
            ];
            let shuffled = [pts[perm[0]], pts[perm[1]], pts[perm[2]], pts[perm[3]]];
            let q = Quadrilateral::from_unordered(shuffled);
            prop_assert_eq!(q.corners, pts);
        }
    }
}
