use crate::quad::Point;
use nalgebra::{SMatrix, SVector};

/// A 3x3 Homography matrix.
#[derive(Clone, Copy, Debug)]
pub struct Homography {
    /// The 3x3 homography matrix, normalized so that `h[(2, 2)] == 1`.
    pub h: SMatrix<f64, 3, 3>,
}

impl Homography {
    /// Compute the homography mapping 4 source points onto 4 destination points (DLT).
    ///
    /// Returns `None` when the system or the resulting matrix is singular
    /// (collinear or repeated points) or when the plane would be folded through infinity inside
    /// the source quad.
    #[must_use]
    pub fn from_pairs(src: &[Point; 4], dst: &[Point; 4]) -> Option<Self> {
        // With h[8] fixed to 1 the 4 correspondences give an 8x8 linear system.
        let mut m = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();

        for i in 0..4 {
            let (sx, sy) = (src[i].x, src[i].y);
            let (dx, dy) = (dst[i].x, dst[i].y);

            m[(i * 2, 0)] = sx;
            m[(i * 2, 1)] = sy;
            m[(i * 2, 2)] = 1.0;
            m[(i * 2, 6)] = -sx * dx;
            m[(i * 2, 7)] = -sy * dx;
            b[i * 2] = dx;

            m[(i * 2 + 1, 3)] = sx;
            m[(i * 2 + 1, 4)] = sy;
            m[(i * 2 + 1, 5)] = 1.0;
            m[(i * 2 + 1, 6)] = -sx * dy;
            m[(i * 2 + 1, 7)] = -sy * dy;
            b[i * 2 + 1] = dy;
        }

        let h_vec = m.lu().solve(&b)?;
        if h_vec.iter().any(|v| !v.is_finite()) {
            return None;
        }

        let h = SMatrix::<f64, 3, 3>::new(
            h_vec[0], h_vec[1], h_vec[2], //
            h_vec[3], h_vec[4], h_vec[5], //
            h_vec[6], h_vec[7], 1.0,
        );
        if h.determinant().abs() < 1e-10 {
            return None;
        }
        let homography = Self { h };

        // The projective scale must keep one sign over the whole source quad.
        let w: [f64; 4] = std::array::from_fn(|i| homography.scale_at(src[i]));
        let positive = w.iter().all(|&v| v > 1e-12);
        let negative = w.iter().all(|&v| v < -1e-12);
        (positive || negative).then_some(homography)
    }

    fn scale_at(&self, p: Point) -> f64 {
        self.h[(2, 0)] * p.x + self.h[(2, 1)] * p.y + self.h[(2, 2)]
    }

    /// Project a point using the homography.
    #[must_use]
    pub fn project(&self, p: Point) -> Point {
        let res = self.h * SVector::<f64, 3>::new(p.x, p.y, 1.0);
        let w = res[2];
        Point::new(res[0] / w, res[1] / w)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pts(v: [[f64; 2]; 4]) -> [Point; 4] {
        v.map(|[x, y]| Point::new(x, y))
    }

    #[test]
    fn test_maps_corners_exactly() {
        let src = pts([[0.0, 0.0], [250.0, 0.0], [250.0, 350.0], [0.0, 350.0]]);
        let dst = pts([[220.0, 100.0], [420.0, 110.0], [430.0, 390.0], [210.0, 380.0]]);
        let h = Homography::from_pairs(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let p = h.project(*s);
            assert!(p.distance(*d) < 1e-9, "{p:?} vs {d:?}");
        }

        let inv = Homography::from_pairs(&dst, &src).unwrap();
        for (s, d) in src.iter().zip(&dst) {
            assert!(inv.project(*d).distance(*s) < 1e-7);
        }
    }

    #[test]
    fn test_affine_case_is_exact_in_interior() {
        let src = pts([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        let dst = pts([[10.0, 20.0], [30.0, 20.0], [30.0, 60.0], [10.0, 60.0]]);
        let h = Homography::from_pairs(&src, &dst).unwrap();
        let mid = h.project(Point::new(0.5, 0.25));
        assert!(mid.distance(Point::new(20.0, 30.0)) < 1e-9);
    }

    #[test]
    fn test_degenerate_points_rejected() {
        let src = pts([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]);
        let collapsed = pts([[5.0, 5.0], [5.0, 5.0], [5.0, 5.0], [5.0, 5.0]]);
        assert!(Homography::from_pairs(&src, &collapsed).is_none());

        let collinear = pts([[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]]);
        assert!(Homography::from_pairs(&src, &collinear).is_none());
    }
}
