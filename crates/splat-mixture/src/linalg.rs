use glam::DVec3;
use std::ops::{Add, AddAssign, Mul, Sub};

/// Symmetric 3x3 matrix stored as its six independent entries.
///
/// Covariances of the mixture components are always symmetric, so only the
/// upper triangle is kept.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SymMat3 {
    /// Entry (0, 0).
    pub xx: f64,
    /// Entries (0, 1) and (1, 0).
    pub xy: f64,
    /// Entries (0, 2) and (2, 0).
    pub xz: f64,
    /// Entry (1, 1).
    pub yy: f64,
    /// Entries (1, 2) and (2, 1).
    pub yz: f64,
    /// Entry (2, 2).
    pub zz: f64,
}

impl SymMat3 {
    /// The all-zero matrix.
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);

    /// The identity matrix.
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 1.0);

    /// Create a matrix from its upper triangle, row by row.
    pub const fn new(xx: f64, xy: f64, xz: f64, yy: f64, yz: f64, zz: f64) -> Self {
        Self {
            xx,
            xy,
            xz,
            yy,
            yz,
            zz,
        }
    }

    /// Create a diagonal matrix.
    pub fn from_diagonal(diagonal: DVec3) -> Self {
        Self::new(diagonal.x, 0.0, 0.0, diagonal.y, 0.0, diagonal.z)
    }

    /// Create a matrix from the compact form `[xx, xy, xz, yy, yz, zz]`.
    pub fn from_compact(values: [f64; 6]) -> Self {
        Self::new(
            values[0], values[1], values[2], values[3], values[4], values[5],
        )
    }

    /// Create a matrix from a full row-major 3x3 array.
    ///
    /// The off-diagonal entries are averaged, so slightly asymmetric input is
    /// symmetrized instead of rejected.
    pub fn from_rows(rows: &[[f64; 3]; 3]) -> Self {
        Self::new(
            rows[0][0],
            0.5 * (rows[0][1] + rows[1][0]),
            0.5 * (rows[0][2] + rows[2][0]),
            rows[1][1],
            0.5 * (rows[1][2] + rows[2][1]),
            rows[2][2],
        )
    }

    /// The compact form `[xx, xy, xz, yy, yz, zz]`.
    pub fn to_compact(&self) -> [f64; 6] {
        [self.xx, self.xy, self.xz, self.yy, self.yz, self.zz]
    }

    /// The full row-major 3x3 array.
    pub fn to_rows(&self) -> [[f64; 3]; 3] {
        [
            [self.xx, self.xy, self.xz],
            [self.xy, self.yy, self.yz],
            [self.xz, self.yz, self.zz],
        ]
    }

    /// The outer product `v * v^T`.
    pub fn outer(v: DVec3) -> Self {
        Self::new(
            v.x * v.x,
            v.x * v.y,
            v.x * v.z,
            v.y * v.y,
            v.y * v.z,
            v.z * v.z,
        )
    }

    /// Sum of the diagonal entries.
    #[inline]
    pub fn trace(&self) -> f64 {
        self.xx + self.yy + self.zz
    }

    /// Determinant of the matrix.
    pub fn determinant(&self) -> f64 {
        self.xx * (self.yy * self.zz - self.yz * self.yz)
            - self.xy * (self.xy * self.zz - self.yz * self.xz)
            + self.xz * (self.xy * self.yz - self.yy * self.xz)
    }

    /// Inverse of the matrix, `None` when it is singular or not finite.
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det == 0.0 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let inverse = Self::new(
            (self.yy * self.zz - self.yz * self.yz) * inv_det,
            (self.xz * self.yz - self.xy * self.zz) * inv_det,
            (self.xy * self.yz - self.xz * self.yy) * inv_det,
            (self.xx * self.zz - self.xz * self.xz) * inv_det,
            (self.xy * self.xz - self.xx * self.yz) * inv_det,
            (self.xx * self.yy - self.xy * self.xy) * inv_det,
        );
        inverse.is_finite().then_some(inverse)
    }

    /// Matrix-vector product.
    pub fn mul_vec3(&self, v: DVec3) -> DVec3 {
        DVec3::new(
            self.xx * v.x + self.xy * v.y + self.xz * v.z,
            self.xy * v.x + self.yy * v.y + self.yz * v.z,
            self.xz * v.x + self.yz * v.y + self.zz * v.z,
        )
    }

    /// The quadratic form `v^T * M * v`.
    #[inline]
    pub fn quadratic_form(&self, v: DVec3) -> f64 {
        v.dot(self.mul_vec3(v))
    }

    /// `trace(self * other)` without forming the product.
    pub fn trace_of_product(&self, other: &Self) -> f64 {
        self.xx * other.xx
            + self.yy * other.yy
            + self.zz * other.zz
            + 2.0 * (self.xy * other.xy + self.xz * other.xz + self.yz * other.yz)
    }

    /// Eigenvalues in ascending order (`x` smallest, `z` largest).
    ///
    /// Uses the closed-form trigonometric solution for symmetric 3x3 matrices.
    pub fn eigenvalues(&self) -> DVec3 {
        let p1 = self.xy * self.xy + self.xz * self.xz + self.yz * self.yz;
        if p1 == 0.0 {
            let mut diagonal = [self.xx, self.yy, self.zz];
            diagonal.sort_by(|a, b| a.total_cmp(b));
            return DVec3::from_array(diagonal);
        }

        let q = self.trace() / 3.0;
        let p2 = (self.xx - q).powi(2) + (self.yy - q).powi(2) + (self.zz - q).powi(2) + 2.0 * p1;
        let p = (p2 / 6.0).sqrt();

        // B = (A - qI) / p, r = det(B) / 2
        let b = Self::new(
            (self.xx - q) / p,
            self.xy / p,
            self.xz / p,
            (self.yy - q) / p,
            self.yz / p,
            (self.zz - q) / p,
        );
        let r = 0.5 * b.determinant();

        let phi = if r <= -1.0 {
            std::f64::consts::PI / 3.0
        } else if r >= 1.0 {
            0.0
        } else {
            r.acos() / 3.0
        };

        let largest = q + 2.0 * p * phi.cos();
        let smallest = q + 2.0 * p * (phi + 2.0 * std::f64::consts::PI / 3.0).cos();
        let middle = 3.0 * q - largest - smallest;

        DVec3::new(smallest, middle, largest)
    }

    /// Shift the diagonal so the smallest eigenvalue is not negative.
    ///
    /// Returns the conditioned matrix and whether a shift was applied.
    pub fn condition_psd(&self) -> (Self, bool) {
        let smallest = self.eigenvalues().x;
        if smallest >= 0.0 || !smallest.is_finite() {
            return (*self, false);
        }
        let shift = -smallest;
        let mut conditioned = *self;
        conditioned.xx += shift;
        conditioned.yy += shift;
        conditioned.zz += shift;
        (conditioned, true)
    }

    /// Whether all entries are finite.
    pub fn is_finite(&self) -> bool {
        self.to_compact().iter().all(|v| v.is_finite())
    }
}

impl Add for SymMat3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(
            self.xx + rhs.xx,
            self.xy + rhs.xy,
            self.xz + rhs.xz,
            self.yy + rhs.yy,
            self.yz + rhs.yz,
            self.zz + rhs.zz,
        )
    }
}

impl AddAssign for SymMat3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for SymMat3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(
            self.xx - rhs.xx,
            self.xy - rhs.xy,
            self.xz - rhs.xz,
            self.yy - rhs.yy,
            self.yz - rhs.yz,
            self.zz - rhs.zz,
        )
    }
}

impl Mul<f64> for SymMat3 {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(
            self.xx * rhs,
            self.xy * rhs,
            self.xz * rhs,
            self.yy * rhs,
            self.yz * rhs,
            self.zz * rhs,
        )
    }
}

impl Mul<SymMat3> for f64 {
    type Output = SymMat3;

    fn mul(self, rhs: SymMat3) -> SymMat3 {
        rhs * self
    }
}
