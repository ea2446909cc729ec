use glam::DVec3;

use crate::{error::MixtureError, linalg::SymMat3, spatial::SpatialIndex};

/// A single weighted Gaussian of a mixture level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianRecord {
    /// Mean of the Gaussian.
    pub position: DVec3,
    /// Symmetric covariance of the Gaussian.
    pub covariance: SymMat3,
    /// DC spherical-harmonic color term.
    pub color: DVec3,
    /// Raw (pre-activation) opacity.
    pub opacity: f64,
    /// Accumulated mixture weight, 1.0 for an input point.
    pub weight: f64,
}

impl GaussianRecord {
    /// Create an input record with unit weight.
    pub fn new(position: DVec3, covariance: SymMat3, color: DVec3, opacity: f64) -> Self {
        Self {
            position,
            covariance,
            color,
            opacity,
            weight: 1.0,
        }
    }

    /// Return the record with the given mixture weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Whether every attribute of the record is finite.
    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.covariance.is_finite()
            && self.color.is_finite()
            && self.opacity.is_finite()
            && self.weight.is_finite()
    }
}

/// One level of a Gaussian mixture pyramid.
///
/// A level is never modified once built; reduction always produces a new one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MixtureLevel {
    records: Vec<GaussianRecord>,
}

impl MixtureLevel {
    /// Create a level from its records.
    pub fn new(records: Vec<GaussianRecord>) -> Self {
        Self { records }
    }

    /// Create a unit-weight level from flat attribute arrays.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::MismatchedArrayLengths`] when the arrays differ in length
    /// and [`MixtureError::TooManyRecords`] when they cannot be indexed.
    pub fn from_attributes(
        positions: &[[f64; 3]],
        covariances: &[SymMat3],
        colors: &[[f64; 3]],
        opacities: &[f64],
    ) -> Result<Self, MixtureError> {
        let check = |name: &'static str, len: usize| {
            if len != positions.len() {
                return Err(MixtureError::MismatchedArrayLengths {
                    left_name: "positions",
                    left_len: positions.len(),
                    right_name: name,
                    right_len: len,
                });
            }
            Ok(())
        };
        check("covariances", covariances.len())?;
        check("colors", colors.len())?;
        check("opacities", opacities.len())?;
        SpatialIndex::check_len(positions.len())?;

        let records = positions
            .iter()
            .zip(covariances)
            .zip(colors)
            .zip(opacities)
            .map(|(((position, covariance), color), opacity)| {
                GaussianRecord::new(
                    DVec3::from_array(*position),
                    *covariance,
                    DVec3::from_array(*color),
                    *opacity,
                )
            })
            .collect();

        Ok(Self { records })
    }

    /// Number of records in the level.
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the level has no records.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Get as reference the records of the level.
    pub fn records(&self) -> &[GaussianRecord] {
        &self.records
    }

    /// Get the record at `index`.
    pub fn get(&self, index: usize) -> Option<&GaussianRecord> {
        self.records.get(index)
    }

    /// Iterate over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, GaussianRecord> {
        self.records.iter()
    }

    /// Consume the level and return its records.
    pub fn into_records(self) -> Vec<GaussianRecord> {
        self.records
    }

    /// The record positions as plain arrays.
    pub fn positions(&self) -> Vec<[f64; 3]> {
        self.records.iter().map(|r| r.position.to_array()).collect()
    }

    /// Sum of the mixture weights of all records.
    pub fn total_weight(&self) -> f64 {
        self.records.iter().map(|r| r.weight).sum()
    }

    /// Whether every record is finite.
    pub fn is_finite(&self) -> bool {
        self.records.iter().all(GaussianRecord::is_finite)
    }

    /// Create a new level from the records at `indices`, in the given order.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::IndexOutOfBounds`] for an index past the end.
    pub fn select(&self, indices: &[usize]) -> Result<Self, MixtureError> {
        let records = indices
            .iter()
            .map(|&index| {
                self.records
                    .get(index)
                    .copied()
                    .ok_or(MixtureError::IndexOutOfBounds {
                        index,
                        len: self.records.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { records })
    }

    /// Concatenate several levels into one, preserving order.
    pub fn concat<'a>(levels: impl IntoIterator<Item = &'a MixtureLevel>) -> Self {
        let records = levels
            .into_iter()
            .flat_map(|level| level.records.iter().copied())
            .collect();
        Self { records }
    }
}

impl std::ops::Index<usize> for MixtureLevel {
    type Output = GaussianRecord;

    fn index(&self, index: usize) -> &Self::Output {
        &self.records[index]
    }
}

impl FromIterator<GaussianRecord> for MixtureLevel {
    fn from_iter<I: IntoIterator<Item = GaussianRecord>>(iter: I) -> Self {
        Self {
            records: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a MixtureLevel {
    type Item = &'a GaussianRecord;
    type IntoIter = std::slice::Iter<'a, GaussianRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// Level-of-detail pyramid: level 0 is the input, each next level is coarser.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Pyramid {
    levels: Vec<MixtureLevel>,
}

impl Pyramid {
    /// Create a pyramid from its levels, finest first.
    pub fn new(levels: Vec<MixtureLevel>) -> Self {
        Self { levels }
    }

    /// Number of levels, including level 0.
    #[inline]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Check if the pyramid has no levels.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Get as reference the levels, finest first.
    pub fn levels(&self) -> &[MixtureLevel] {
        &self.levels
    }

    /// Get the level at `depth`.
    pub fn level(&self, depth: usize) -> Option<&MixtureLevel> {
        self.levels.get(depth)
    }

    /// The coarsest level.
    pub fn coarsest(&self) -> Option<&MixtureLevel> {
        self.levels.last()
    }

    /// Consume the pyramid and return its levels.
    pub fn into_levels(self) -> Vec<MixtureLevel> {
        self.levels
    }
}
