//! Material System with Pair-wise Combine Rules
//!
//! Friction and restitution per body, combined per contact pair. Restitution
//! combines with `Max` (the bouncier surface wins) and friction with
//! `GeometricMean` (`sqrt(a * b)`), recomputed once per pair update.

/// Combine rule for a material coefficient when two materials interact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CombineRule {
    /// Average of two values
    #[default]
    Average,
    /// Minimum of two values
    Min,
    /// Maximum of two values
    Max,
    /// Geometric mean: `sqrt(a * b)`
    GeometricMean,
}

impl CombineRule {
    /// Apply the combine rule to two coefficients.
    #[inline]
    #[must_use]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            CombineRule::Average => 0.5 * (a + b),
            CombineRule::Min => a.min(b),
            CombineRule::Max => a.max(b),
            CombineRule::GeometricMean => (a * b).sqrt(),
        }
    }
}

/// Surface material carried by each body.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Material {
    /// Coefficient of restitution (bounciness, 0..1).
    pub restitution: f64,
    /// Static friction coefficient (resists the onset of sliding).
    pub static_friction: f64,
    /// Dynamic friction coefficient (resists ongoing sliding).
    pub dynamic_friction: f64,
}

impl Material {
    /// Create a material with the same static and dynamic friction.
    #[must_use]
    pub fn new(restitution: f64, friction: f64) -> Self {
        Self {
            restitution,
            static_friction: friction,
            dynamic_friction: friction,
        }
    }

    /// Set a separate static friction coefficient.
    #[must_use]
    pub fn with_static_friction(mut self, static_friction: f64) -> Self {
        self.static_friction = static_friction;
        self
    }
}

impl Default for Material {
    fn default() -> Self {
        Self {
            restitution: 0.2,
            static_friction: 0.5,
            dynamic_friction: 0.3,
        }
    }
}

/// Combined coefficients for one contact pair.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CombinedMaterial {
    /// Combined restitution (max of the pair).
    pub restitution: f64,
    /// Combined static friction (geometric mean of the pair).
    pub static_friction: f64,
    /// Combined dynamic friction (geometric mean of the pair).
    pub dynamic_friction: f64,
}

impl CombinedMaterial {
    /// Combine two body materials into contact-pair coefficients.
    #[must_use]
    pub fn combine(a: &Material, b: &Material) -> Self {
        Self {
            restitution: CombineRule::Max.apply(a.restitution, b.restitution),
            static_friction: CombineRule::GeometricMean
                .apply(a.static_friction, b.static_friction),
            dynamic_friction: CombineRule::GeometricMean
                .apply(a.dynamic_friction, b.dynamic_friction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_combine_rules() {
        assert_eq!(CombineRule::Average.apply(0.2, 0.4), 0.3);
        assert_eq!(CombineRule::Min.apply(0.2, 0.4), 0.2);
        assert_eq!(CombineRule::Max.apply(0.2, 0.4), 0.4);
        assert_relative_eq!(
            CombineRule::GeometricMean.apply(0.25, 0.64),
            0.4,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_pair_combination() {
        let steel = Material::new(0.1, 0.4);
        let rubber = Material::new(0.8, 0.9);
        let c = CombinedMaterial::combine(&steel, &rubber);

        // Restitution takes the max, friction the geometric mean.
        assert_eq!(c.restitution, 0.8);
        assert_relative_eq!(c.dynamic_friction, (0.4f64 * 0.9).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_combination_is_symmetric() {
        let a = Material::new(0.3, 0.5).with_static_friction(0.7);
        let b = Material::new(0.6, 0.2);
        assert_eq!(
            CombinedMaterial::combine(&a, &b),
            CombinedMaterial::combine(&b, &a)
        );
    }
}
