use serde::{Deserialize, Serialize};

use crate::error::MixtureError;

/// Parameters of the hierarchical EM reduction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HemConfig {
    /// Expected shrink factor per level; each record becomes a parent with probability `1 / reduction_factor`.
    pub reduction_factor: f64,
    /// Scale of the child search radius and of the KL acceptance threshold.
    pub distance_delta: f64,
    /// Scale of the color acceptance threshold.
    pub color_delta: f64,
    /// Per-level multiplier applied to both deltas, in `(0, 1]`.
    pub decay_rate: f64,
    /// Number of reduction passes, i.e. pyramid levels after level 0.
    pub cluster_level: usize,
    /// Number of nearest neighbors queried per parent.
    pub max_neighbors: usize,
}

impl Default for HemConfig {
    fn default() -> Self {
        Self {
            reduction_factor: 3.0,
            distance_delta: 2.5,
            color_delta: 2.5,
            decay_rate: 1.0,
            cluster_level: 3,
            max_neighbors: 200,
        }
    }
}

impl HemConfig {
    /// Set the reduction factor.
    pub fn with_reduction_factor(mut self, reduction_factor: f64) -> Self {
        self.reduction_factor = reduction_factor;
        self
    }

    /// Set the distance delta.
    pub fn with_distance_delta(mut self, distance_delta: f64) -> Self {
        self.distance_delta = distance_delta;
        self
    }

    /// Set the color delta.
    pub fn with_color_delta(mut self, color_delta: f64) -> Self {
        self.color_delta = color_delta;
        self
    }

    /// Set the decay rate.
    pub fn with_decay_rate(mut self, decay_rate: f64) -> Self {
        self.decay_rate = decay_rate;
        self
    }

    /// Set the number of reduction passes.
    pub fn with_cluster_level(mut self, cluster_level: usize) -> Self {
        self.cluster_level = cluster_level;
        self
    }

    /// Set the number of nearest neighbors queried per parent.
    pub fn with_max_neighbors(mut self, max_neighbors: usize) -> Self {
        self.max_neighbors = max_neighbors;
        self
    }

    /// Check every parameter against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`MixtureError::InvalidParameter`] naming the first offending parameter.
    pub fn validate(&self) -> Result<(), MixtureError> {
        fn invalid(name: &'static str, value: f64, reason: &'static str) -> MixtureError {
            MixtureError::InvalidParameter {
                name,
                value,
                reason,
            }
        }

        if self.reduction_factor.is_nan() || self.reduction_factor <= 1.0 {
            return Err(invalid(
                "reduction_factor",
                self.reduction_factor,
                "must be greater than 1",
            ));
        }
        if !self.distance_delta.is_finite() || self.distance_delta <= 0.0 {
            return Err(invalid(
                "distance_delta",
                self.distance_delta,
                "must be positive and finite",
            ));
        }
        if !self.color_delta.is_finite() || self.color_delta <= 0.0 {
            return Err(invalid(
                "color_delta",
                self.color_delta,
                "must be positive and finite",
            ));
        }
        if self.decay_rate.is_nan() || self.decay_rate <= 0.0 || self.decay_rate > 1.0 {
            return Err(invalid(
                "decay_rate",
                self.decay_rate,
                "must be in (0, 1]",
            ));
        }
        if self.cluster_level == 0 {
            return Err(invalid(
                "cluster_level",
                self.cluster_level as f64,
                "must be at least 1",
            ));
        }
        if self.max_neighbors == 0 {
            return Err(invalid(
                "max_neighbors",
                self.max_neighbors as f64,
                "must be at least 1",
            ));
        }
        Ok(())
    }

    /// Distance and color deltas in effect for the pass producing level `depth + 1`.
    pub fn level_deltas(&self, depth: usize) -> (f64, f64) {
        let decay = self.decay_rate.powi(depth as i32);
        (self.distance_delta * decay, self.color_delta * decay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_is_valid() -> Result<(), MixtureError> {
        HemConfig::default().validate()
    }

    #[test]
    fn test_validate_rejects() {
        let base = HemConfig::default();
        let cases = [
            (base.with_reduction_factor(1.0), "reduction_factor"),
            (base.with_distance_delta(0.0), "distance_delta"),
            (base.with_color_delta(-1.0), "color_delta"),
            (base.with_decay_rate(1.5), "decay_rate"),
            (base.with_decay_rate(0.0), "decay_rate"),
            (base.with_cluster_level(0), "cluster_level"),
            (base.with_max_neighbors(0), "max_neighbors"),
        ];
        for (config, expected) in cases {
            match config.validate() {
                Err(MixtureError::InvalidParameter { name, .. }) => assert_eq!(name, expected),
                other => panic!("expected {expected} to be rejected, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_level_deltas_decay() {
        let config = HemConfig::default().with_decay_rate(0.5);
        let (d0, c0) = config.level_deltas(0);
        let (d2, c2) = config.level_deltas(2);
        assert_relative_eq!(d0, 2.5);
        assert_relative_eq!(c0, 2.5);
        assert_relative_eq!(d2, 0.625);
        assert_relative_eq!(c2, 0.625);
    }

    #[test]
    fn test_json_missing_fields_use_defaults() -> Result<(), serde_json::Error> {
        let config: HemConfig = serde_json::from_str(r#"{"decay_rate": 0.5}"#)?;
        assert_eq!(config, HemConfig::default().with_decay_rate(0.5));

        let config: HemConfig = serde_json::from_str("{}")?;
        assert_eq!(config, HemConfig::default());
        Ok(())
    }

    #[test]
    fn test_json_round_trip() -> Result<(), serde_json::Error> {
        let config = HemConfig::default()
            .with_reduction_factor(4.0)
            .with_cluster_level(5)
            .with_max_neighbors(32);
        let json = serde_json::to_string(&config)?;
        assert!(json.contains("\"max_neighbors\":32"));
        assert_eq!(serde_json::from_str::<HemConfig>(&json)?, config);
        Ok(())
    }
}
