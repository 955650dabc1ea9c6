//! Contact Manifold Cache with Warm Starting
//!
//! Persistent contact manifolds keyed by unordered body pair. Each manifold
//! holds up to [`MAX_MANIFOLD_POINTS`] points; new narrow-phase detections
//! are matched to cached points (feature id first, proximity second) so the
//! accumulated normal/tangent impulses survive across steps and seed the
//! velocity solver near last step's solution.
//!
//! `begin_step`/`end_step` bracket a solver step: `begin_step` marks every
//! manifold stale, a pair update un-marks it, and `end_step` prunes whatever
//! stayed stale — a pair that reports no contact for one step loses its
//! manifold. The cache is cache-only: nothing else may assume a manifold
//! outlives that window.

use std::collections::HashMap;

use crate::body::{Body, BodyHandle};
use crate::material::CombinedMaterial;
use crate::math::Vec2;

/// Maximum contact points per manifold (two suffice for convex 2D pairs).
pub const MAX_MANIFOLD_POINTS: usize = 2;

/// Contact record produced by the external narrow phase, one per candidate
/// contact point.
#[derive(Clone, Copy, Debug)]
pub struct ContactRecord {
    /// Unit contact normal, pointing from body A toward body B.
    pub normal: Vec2,
    /// World-space contact point.
    pub point: Vec2,
    /// Penetration depth, `>= 0`.
    pub penetration: f64,
    /// Whether the pair is actually touching.
    pub has_contact: bool,
    /// Narrow-phase feature identifier used for frame-to-frame matching.
    pub feature_id: u32,
}

/// Unordered body-pair key (canonical order: smaller handle first).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BodyPairKey {
    /// Smaller body handle.
    pub body_a: u32,
    /// Larger body handle.
    pub body_b: u32,
}

impl BodyPairKey {
    /// Create a canonical pair key (`body_a <= body_b`).
    #[inline]
    #[must_use]
    pub fn new(a: BodyHandle, b: BodyHandle) -> Self {
        if a.0 <= b.0 {
            Self {
                body_a: a.0,
                body_b: b.0,
            }
        } else {
            Self {
                body_a: b.0,
                body_b: a.0,
            }
        }
    }

    /// First body handle.
    #[inline]
    #[must_use]
    pub fn handle_a(&self) -> BodyHandle {
        BodyHandle(self.body_a)
    }

    /// Second body handle.
    #[inline]
    #[must_use]
    pub fn handle_b(&self) -> BodyHandle {
        BodyHandle(self.body_b)
    }
}

/// One cached contact point.
#[derive(Clone, Copy, Debug, Default)]
pub struct ManifoldPoint {
    /// Narrow-phase feature id.
    pub feature_id: u32,
    /// World-space contact point.
    pub point: Vec2,
    /// Penetration depth.
    pub penetration: f64,
    /// Accumulated normal impulse (warm-start state).
    pub normal_impulse: f64,
    /// Accumulated tangent impulse (warm-start state).
    pub tangent_impulse: f64,
    /// Whether this slot holds a live point.
    pub active: bool,
}

/// Persistent contact manifold for one body pair.
#[derive(Clone, Debug)]
pub struct ContactManifold {
    /// Body pair this manifold belongs to.
    pub pair: BodyPairKey,
    /// Point slots; inactive slots carry no impulse.
    pub points: [ManifoldPoint; MAX_MANIFOLD_POINTS],
    /// Shared contact normal (from the latest update).
    pub normal: Vec2,
    /// Combined material coefficients, recomputed each pair update.
    pub combined: CombinedMaterial,
    /// Stale flag driven by the begin/end step bracket.
    stale: bool,
}

impl ContactManifold {
    fn new(pair: BodyPairKey) -> Self {
        Self {
            pair,
            points: [ManifoldPoint::default(); MAX_MANIFOLD_POINTS],
            normal: Vec2::ZERO,
            combined: CombinedMaterial::default(),
            stale: false,
        }
    }

    /// Number of active points.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.points.iter().filter(|p| p.active).count()
    }

    /// Whether the pair has reported no contact so far this step. Stale
    /// manifolds are not solved and are pruned by `end_step`.
    #[inline]
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Update the manifold from this step's detections.
    ///
    /// Each record is matched to a previous point by feature id, falling back
    /// to proximity within `match_distance_sq`; matches keep their
    /// accumulated impulses. Unmatched old points are deactivated. When more
    /// records arrive than slots, the deepest penetrations win.
    pub fn update(&mut self, records: &[ContactRecord], match_distance_sq: f64) {
        let old = self.points;
        for p in &mut self.points {
            p.active = false;
        }

        // Deepest-first selection when over capacity.
        let mut order: Vec<usize> = (0..records.len()).collect();
        order.sort_by(|&i, &j| {
            records[j]
                .penetration
                .partial_cmp(&records[i].penetration)
                .unwrap_or(core::cmp::Ordering::Equal)
        });

        let mut slot = 0;
        let mut claimed = [false; MAX_MANIFOLD_POINTS];
        for &ri in order.iter().take(MAX_MANIFOLD_POINTS) {
            let record = &records[ri];
            let mut point = ManifoldPoint {
                feature_id: record.feature_id,
                point: record.point,
                penetration: record.penetration,
                normal_impulse: 0.0,
                tangent_impulse: 0.0,
                active: true,
            };

            // Feature-id match first, then nearest unclaimed old point.
            let mut matched: Option<usize> = None;
            for (i, old_point) in old.iter().enumerate() {
                if old_point.active && !claimed[i] && old_point.feature_id == record.feature_id {
                    matched = Some(i);
                    break;
                }
            }
            if matched.is_none() {
                let mut best_dist = match_distance_sq;
                for (i, old_point) in old.iter().enumerate() {
                    if !old_point.active || claimed[i] {
                        continue;
                    }
                    let dist = (old_point.point - record.point).length_squared();
                    if dist < best_dist {
                        best_dist = dist;
                        matched = Some(i);
                    }
                }
            }
            if let Some(i) = matched {
                claimed[i] = true;
                point.normal_impulse = old[i].normal_impulse;
                point.tangent_impulse = old[i].tangent_impulse;
            }

            self.points[slot] = point;
            slot += 1;
        }

        if let Some(first) = records.first() {
            self.normal = first.normal;
        }
        self.stale = false;
    }
}

/// Cache of all active manifolds, bounded to currently-touching pairs.
#[derive(Debug)]
pub struct ManifoldCache {
    manifolds: Vec<ContactManifold>,
    pair_index: HashMap<BodyPairKey, usize>,
    /// Squared distance below which an old point matches a new detection.
    pub match_distance_sq: f64,
}

impl Default for ManifoldCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ManifoldCache {
    /// Default point-matching threshold: 2 cm.
    pub const DEFAULT_MATCH_DISTANCE: f64 = 0.02;

    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self {
            manifolds: Vec::new(),
            pair_index: HashMap::new(),
            match_distance_sq: Self::DEFAULT_MATCH_DISTANCE * Self::DEFAULT_MATCH_DISTANCE,
        }
    }

    /// Mark every manifold stale; pair updates below un-mark them.
    pub fn begin_step(&mut self) {
        for manifold in &mut self.manifolds {
            manifold.stale = true;
        }
    }

    /// Feed this step's detections for one pair.
    ///
    /// Records without `has_contact` are ignored; if none remain the pair is
    /// treated as contact-free and its manifold stays stale. Combined
    /// material coefficients are recomputed from the bodies on every update.
    pub fn update_pair(
        &mut self,
        bodies: &[Body],
        a: BodyHandle,
        b: BodyHandle,
        records: &[ContactRecord],
    ) {
        let touching: Vec<ContactRecord> = records
            .iter()
            .filter(|r| r.has_contact && r.penetration >= 0.0)
            .copied()
            .collect();
        if touching.is_empty() {
            return;
        }
        let (Some(body_a), Some(body_b)) = (bodies.get(a.index()), bodies.get(b.index())) else {
            return;
        };

        let key = BodyPairKey::new(a, b);
        let index = match self.pair_index.get(&key) {
            Some(&i) => i,
            None => {
                let i = self.manifolds.len();
                self.manifolds.push(ContactManifold::new(key));
                self.pair_index.insert(key, i);
                i
            }
        };

        let manifold = &mut self.manifolds[index];
        manifold.combined = CombinedMaterial::combine(&body_a.material, &body_b.material);
        manifold.update(&touching, self.match_distance_sq);
    }

    /// Prune manifolds whose pair reported no contact this step.
    pub fn end_step(&mut self) {
        self.manifolds.retain(|m| !m.stale);
        self.pair_index.clear();
        for (i, manifold) in self.manifolds.iter().enumerate() {
            self.pair_index.insert(manifold.pair, i);
        }
    }

    /// Look up a manifold by pair.
    #[must_use]
    pub fn find(&self, pair: &BodyPairKey) -> Option<&ContactManifold> {
        self.pair_index.get(pair).map(|&i| &self.manifolds[i])
    }

    /// All manifolds, indexable by the island builder.
    #[must_use]
    pub fn manifolds(&self) -> &[ContactManifold] {
        &self.manifolds
    }

    /// Mutable access for the solver's impulse write-back.
    pub fn manifolds_mut(&mut self) -> &mut [ContactManifold] {
        &mut self.manifolds
    }

    /// Number of cached manifolds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.manifolds.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.manifolds.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.manifolds.clear();
        self.pair_index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Shape2d;
    use crate::material::Material;

    fn record(x: f64, y: f64, penetration: f64, feature_id: u32) -> ContactRecord {
        ContactRecord {
            normal: Vec2::UNIT_Y,
            point: Vec2::new(x, y),
            penetration,
            has_contact: true,
            feature_id,
        }
    }

    fn two_bodies() -> Vec<Body> {
        vec![
            Body::new_dynamic(Vec2::ZERO, 1.0, Shape2d::Circle { radius: 0.5 })
                .with_material(Material::new(0.1, 0.4)),
            Body::new_dynamic(Vec2::new(0.9, 0.0), 1.0, Shape2d::Circle { radius: 0.5 })
                .with_material(Material::new(0.8, 0.9)),
        ]
    }

    #[test]
    fn test_pair_key_is_canonical() {
        let k1 = BodyPairKey::new(BodyHandle(3), BodyHandle(7));
        let k2 = BodyPairKey::new(BodyHandle(7), BodyHandle(3));
        assert_eq!(k1, k2);
        assert_eq!(k1.body_a, 3);
        assert_eq!(k1.body_b, 7);
    }

    #[test]
    fn test_manifold_created_on_first_contact() {
        let bodies = two_bodies();
        let mut cache = ManifoldCache::new();

        cache.begin_step();
        cache.update_pair(
            &bodies,
            BodyHandle(0),
            BodyHandle(1),
            &[record(0.5, 0.0, 0.1, 0)],
        );
        cache.end_step();

        let key = BodyPairKey::new(BodyHandle(0), BodyHandle(1));
        let manifold = cache.find(&key).expect("manifold should exist");
        assert_eq!(manifold.point_count(), 1);
        // Combined material: restitution max, friction geometric mean.
        assert_eq!(manifold.combined.restitution, 0.8);
    }

    #[test]
    fn test_matching_preserves_impulses() {
        let bodies = two_bodies();
        let mut cache = ManifoldCache::new();

        cache.begin_step();
        cache.update_pair(
            &bodies,
            BodyHandle(0),
            BodyHandle(1),
            &[record(0.5, 0.0, 0.1, 7)],
        );
        cache.end_step();

        // Solver stores impulses.
        cache.manifolds_mut()[0].points[0].normal_impulse = 5.0;
        cache.manifolds_mut()[0].points[0].tangent_impulse = 1.25;

        // Same feature comes back slightly moved: impulses survive.
        cache.begin_step();
        cache.update_pair(
            &bodies,
            BodyHandle(0),
            BodyHandle(1),
            &[record(0.505, 0.0, 0.12, 7)],
        );
        cache.end_step();

        let p = &cache.manifolds()[0].points[0];
        assert_eq!(p.normal_impulse, 5.0);
        assert_eq!(p.tangent_impulse, 1.25);
        assert_eq!(p.penetration, 0.12);
    }

    #[test]
    fn test_unmatched_points_are_dropped() {
        let bodies = two_bodies();
        let mut cache = ManifoldCache::new();

        cache.begin_step();
        cache.update_pair(
            &bodies,
            BodyHandle(0),
            BodyHandle(1),
            &[record(0.5, 0.0, 0.1, 1), record(0.5, 0.4, 0.05, 2)],
        );
        cache.end_step();
        assert_eq!(cache.manifolds()[0].point_count(), 2);

        // Only feature 1 persists; feature 2's slot must deactivate and its
        // replacement (feature 3, far away) starts with zero impulse.
        cache.manifolds_mut()[0].points[0].normal_impulse = 2.0;
        cache.begin_step();
        cache.update_pair(
            &bodies,
            BodyHandle(0),
            BodyHandle(1),
            &[record(0.5, 0.0, 0.1, 1), record(3.0, 3.0, 0.2, 3)],
        );
        cache.end_step();

        let manifold = &cache.manifolds()[0];
        assert_eq!(manifold.point_count(), 2);
        let by_feature = |id: u32| manifold.points.iter().find(|p| p.feature_id == id).unwrap();
        assert_eq!(by_feature(3).normal_impulse, 0.0);
    }

    #[test]
    fn test_capacity_keeps_deepest_points() {
        let bodies = two_bodies();
        let mut cache = ManifoldCache::new();

        cache.begin_step();
        cache.update_pair(
            &bodies,
            BodyHandle(0),
            BodyHandle(1),
            &[
                record(0.0, 0.0, 0.01, 1),
                record(1.0, 0.0, 0.30, 2),
                record(2.0, 0.0, 0.20, 3),
            ],
        );
        cache.end_step();

        let manifold = &cache.manifolds()[0];
        assert_eq!(manifold.point_count(), MAX_MANIFOLD_POINTS);
        let ids: Vec<u32> = manifold
            .points
            .iter()
            .filter(|p| p.active)
            .map(|p| p.feature_id)
            .collect();
        assert!(ids.contains(&2) && ids.contains(&3), "kept {ids:?}");
    }

    #[test]
    fn test_pruned_after_one_contact_free_step() {
        let bodies = two_bodies();
        let mut cache = ManifoldCache::new();

        cache.begin_step();
        cache.update_pair(
            &bodies,
            BodyHandle(0),
            BodyHandle(1),
            &[record(0.5, 0.0, 0.1, 0)],
        );
        cache.end_step();
        assert_eq!(cache.len(), 1);

        // No contact reported this step: the manifold must go.
        cache.begin_step();
        cache.end_step();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_has_contact_false_counts_as_no_contact() {
        let bodies = two_bodies();
        let mut cache = ManifoldCache::new();

        cache.begin_step();
        cache.update_pair(
            &bodies,
            BodyHandle(0),
            BodyHandle(1),
            &[record(0.5, 0.0, 0.1, 0)],
        );
        cache.end_step();

        cache.begin_step();
        let mut separated = record(0.5, 0.0, 0.0, 0);
        separated.has_contact = false;
        cache.update_pair(&bodies, BodyHandle(0), BodyHandle(1), &[separated]);
        cache.end_step();
        assert!(cache.is_empty());
    }
}
