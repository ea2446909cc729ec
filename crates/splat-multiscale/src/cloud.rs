use glam::DVec3;
use serde::{Deserialize, Serialize};
use splat_mixture::{spatial::SpatialIndex, GaussianRecord, MixtureError, MixtureLevel, SymMat3};

use crate::error::HemError;

/// Covariances of a Gaussian point cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Covariances {
    /// Full row-major 3x3 matrices. Only the upper triangle is read after symmetrization.
    Full(Vec<[[f64; 3]; 3]>),
    /// Compact upper triangle `[xx, xy, xz, yy, yz, zz]`.
    Compact(Vec<[f64; 6]>),
}

impl Covariances {
    /// Number of covariances.
    pub fn len(&self) -> usize {
        match self {
            Covariances::Full(values) => values.len(),
            Covariances::Compact(values) => values.len(),
        }
    }

    /// Check if there is no covariance.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, index: usize) -> Option<SymMat3> {
        match self {
            Covariances::Full(values) => values.get(index).map(SymMat3::from_rows),
            Covariances::Compact(values) => values.get(index).map(|v| SymMat3::from_compact(*v)),
        }
    }
}

/// A Gaussian splatting point cloud as exchanged with callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianCloud {
    positions: Vec<[f64; 3]>,
    opacities: Vec<f64>,
    covariances: Covariances,
    colors: Vec<[f64; 3]>,
    weights: Vec<f64>,
}

impl GaussianCloud {
    /// Create a unit-weight cloud.
    ///
    /// # Arguments
    ///
    /// * `positions` - Gaussian means.
    /// * `opacities` - Raw opacities.
    /// * `covariances` - Covariances in full or compact form.
    /// * `colors` - DC color terms.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::MismatchedArrayLengths`] if the attributes differ in length,
    /// or [`MixtureError::TooManyRecords`] if the cloud is too large to reduce.
    pub fn new(
        positions: Vec<[f64; 3]>,
        opacities: Vec<f64>,
        covariances: Covariances,
        colors: Vec<[f64; 3]>,
    ) -> Result<Self, HemError> {
        let weights = vec![1.0; positions.len()];
        let cloud = Self {
            positions,
            opacities,
            covariances,
            colors,
            weights,
        };
        cloud.check_lengths()?;
        Ok(cloud)
    }

    /// Replace the per-record mixture weights.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::MismatchedArrayLengths`] if `weights` has the wrong length.
    pub fn with_weights(mut self, weights: Vec<f64>) -> Result<Self, HemError> {
        self.weights = weights;
        self.check_lengths()?;
        Ok(self)
    }

    fn check_lengths(&self) -> Result<(), MixtureError> {
        let n = self.positions.len();
        SpatialIndex::check_len(n)?;
        let lengths = [
            ("opacities", self.opacities.len()),
            ("covariances", self.covariances.len()),
            ("colors", self.colors.len()),
            ("weights", self.weights.len()),
        ];
        for (name, len) in lengths {
            if len != n {
                return Err(MixtureError::MismatchedArrayLengths {
                    left_name: "positions",
                    left_len: n,
                    right_name: name,
                    right_len: len,
                });
            }
        }
        Ok(())
    }

    /// Number of Gaussians in the cloud.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if the cloud is empty.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Gaussian means.
    pub fn positions(&self) -> &[[f64; 3]] {
        &self.positions
    }

    /// Raw opacities.
    pub fn opacities(&self) -> &[f64] {
        &self.opacities
    }

    /// Covariances.
    pub fn covariances(&self) -> &Covariances {
        &self.covariances
    }

    /// DC color terms.
    pub fn colors(&self) -> &[[f64; 3]] {
        &self.colors
    }

    /// Mixture weights.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Check that the attributes have equal lengths and are all finite.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::MismatchedArrayLengths`] for a cloud deserialized
    /// with inconsistent arrays, or [`HemError::NonFiniteInput`] for the first
    /// non-finite attribute found.
    pub fn validate_finite(&self) -> Result<(), HemError> {
        self.check_lengths()?;
        for index in 0..self.len() {
            let field = if !DVec3::from_array(self.positions[index]).is_finite() {
                Some("position")
            } else if !self.opacities[index].is_finite() {
                Some("opacity")
            } else if !self
                .covariances
                .get(index)
                .is_some_and(|covariance| covariance.is_finite())
            {
                Some("covariance")
            } else if !DVec3::from_array(self.colors[index]).is_finite() {
                Some("color")
            } else if !self.weights[index].is_finite() || self.weights[index] <= 0.0 {
                Some("weight")
            } else {
                None
            };
            if let Some(field) = field {
                return Err(HemError::NonFiniteInput { index, field });
            }
        }
        Ok(())
    }

    /// Convert the cloud into the finest level of a mixture pyramid.
    ///
    /// # Errors
    ///
    /// Returns [`HemError::NonFiniteInput`] if any attribute is not finite.
    pub fn to_mixture_level(&self) -> Result<MixtureLevel, HemError> {
        self.validate_finite()?;

        let records: MixtureLevel = (0..self.len())
            .map(|i| {
                let covariance = self.covariances.get(i).unwrap_or(SymMat3::ZERO);
                GaussianRecord::new(
                    DVec3::from_array(self.positions[i]),
                    covariance,
                    DVec3::from_array(self.colors[i]),
                    self.opacities[i],
                )
                .with_weight(self.weights[i])
            })
            .collect();

        Ok(records)
    }

    /// Convert a mixture level back into a cloud with compact covariances.
    pub fn from_mixture_level(level: &MixtureLevel) -> Self {
        let mut positions = Vec::with_capacity(level.len());
        let mut opacities = Vec::with_capacity(level.len());
        let mut covariances = Vec::with_capacity(level.len());
        let mut colors = Vec::with_capacity(level.len());
        let mut weights = Vec::with_capacity(level.len());

        for record in level.iter() {
            positions.push(record.position.to_array());
            opacities.push(record.opacity);
            covariances.push(record.covariance.to_compact());
            colors.push(record.color.to_array());
            weights.push(record.weight);
        }

        Self {
            positions,
            opacities,
            covariances: Covariances::Compact(covariances),
            colors,
            weights,
        }
    }
}
