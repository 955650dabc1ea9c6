//! Island Partitioning
//!
//! Clusters bodies that interact through constraints or contact pairs into
//! connected components ("islands"). Islands never share a body, so their
//! constraint sets are independent — the invariant that licenses solving
//! islands in parallel with no locks.
//!
//! The pipeline is allocation-shy and reuses its buffers across calls:
//! referenced body handles are mapped to dense indices through an
//! open-addressing hash map, merged with a union-find (union by rank, path
//! halving), and bucketed into flat arrays with a counting-sort prefix sum.
//! All growth is fallible; a failed reservation aborts the build before any
//! output buffer is mutated.

use crate::body::BodyHandle;
use crate::constraint::Constraint2d;
use crate::error::PhysicsError;
use crate::manifold::ContactManifold;

/// Open-addressing map from body handle to dense index.
///
/// Linear probing over a power-of-two table with Fibonacci hashing; tombstone
/// handling is unnecessary because the map is cleared every build.
#[derive(Clone, Debug, Default)]
struct HandleMap {
    keys: Vec<u32>,
    values: Vec<u32>,
    mask: usize,
    len: usize,
}

const EMPTY_KEY: u32 = u32::MAX;

impl HandleMap {
    fn hash(key: u32, mask: usize) -> usize {
        (key.wrapping_mul(0x9E37_79B9) as usize) & mask
    }

    /// Clear and size the table for up to `capacity` keys at < 50% load.
    fn reset(&mut self, capacity: usize) -> Result<(), PhysicsError> {
        let mut table = 16usize;
        while table < capacity * 2 {
            table <<= 1;
        }
        if table > self.keys.len() {
            let grow_by = table - self.keys.len();
            self.keys
                .try_reserve(grow_by)
                .map_err(|_| PhysicsError::AllocationFailed {
                    resource: "island handle map",
                    requested: table,
                })?;
            self.values
                .try_reserve(grow_by)
                .map_err(|_| PhysicsError::AllocationFailed {
                    resource: "island handle map",
                    requested: table,
                })?;
        }
        self.keys.clear();
        self.keys.resize(table, EMPTY_KEY);
        self.values.clear();
        self.values.resize(table, 0);
        self.mask = table - 1;
        self.len = 0;
        Ok(())
    }

    /// Dense index for `handle`, inserting the next index on first sight.
    fn get_or_insert(&mut self, handle: BodyHandle) -> u32 {
        let mut slot = Self::hash(handle.0, self.mask);
        loop {
            let key = self.keys[slot];
            if key == handle.0 {
                return self.values[slot];
            }
            if key == EMPTY_KEY {
                let dense = self.len as u32;
                self.keys[slot] = handle.0;
                self.values[slot] = dense;
                self.len += 1;
                return dense;
            }
            slot = (slot + 1) & self.mask;
        }
    }
}

/// Union-find with union by rank and path halving.
#[derive(Clone, Debug, Default)]
struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    fn reset(&mut self, n: usize) -> Result<(), PhysicsError> {
        if n > self.parent.capacity() {
            let grow_by = n - self.parent.capacity();
            self.parent
                .try_reserve(grow_by)
                .map_err(|_| PhysicsError::AllocationFailed {
                    resource: "union-find",
                    requested: n,
                })?;
            self.rank
                .try_reserve(grow_by)
                .map_err(|_| PhysicsError::AllocationFailed {
                    resource: "union-find",
                    requested: n,
                })?;
        }
        self.parent.clear();
        self.parent.extend(0..n as u32);
        self.rank.clear();
        self.rank.resize(n, 0);
        Ok(())
    }

    fn find(&mut self, mut x: u32) -> u32 {
        // Path halving: every node on the walk points to its grandparent.
        while self.parent[x as usize] != x {
            let grandparent = self.parent[self.parent[x as usize] as usize];
            self.parent[x as usize] = grandparent;
            x = grandparent;
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        let (low, high) = if self.rank[ra as usize] < self.rank[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.parent[low as usize] = high;
        if self.rank[low as usize] == self.rank[high as usize] {
            self.rank[high as usize] += 1;
        }
    }
}

/// One island: index slices into the caller's constraint list and the
/// manifold cache.
#[derive(Clone, Copy, Debug)]
pub struct IslandRef {
    /// Range into [`Islands::constraint_indices`].
    pub constraints: (usize, usize),
    /// Range into [`Islands::contact_indices`].
    pub contacts: (usize, usize),
}

/// Partition output: flat index buckets plus per-island ranges.
#[derive(Clone, Debug, Default)]
pub struct Islands {
    /// Constraint indices, grouped by island.
    pub constraint_indices: Vec<u32>,
    /// Manifold indices, grouped by island.
    pub contact_indices: Vec<u32>,
    /// Per-island ranges into the flat buckets.
    pub islands: Vec<IslandRef>,
}

impl Islands {
    /// Number of islands produced by the last build.
    #[must_use]
    pub fn len(&self) -> usize {
        self.islands.len()
    }

    /// Whether the last build produced no island.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.islands.is_empty()
    }

    /// Constraint indices of island `i`.
    #[must_use]
    pub fn constraints_of(&self, i: usize) -> &[u32] {
        let (start, end) = self.islands[i].constraints;
        &self.constraint_indices[start..end]
    }

    /// Manifold indices of island `i`.
    #[must_use]
    pub fn contacts_of(&self, i: usize) -> &[u32] {
        let (start, end) = self.islands[i].contacts;
        &self.contact_indices[start..end]
    }
}

/// Reusable island-building workspace.
#[derive(Clone, Debug, Default)]
pub struct IslandBuilder {
    map: HandleMap,
    union_find: UnionFind,
    island_of_root: Vec<u32>,
    constraint_island: Vec<u32>,
    contact_island: Vec<u32>,
    constraint_counts: Vec<u32>,
    contact_counts: Vec<u32>,
}

const NO_ISLAND: u32 = u32::MAX;

impl IslandBuilder {
    /// Create an empty workspace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Partition `constraints` and `manifolds` into islands, writing the
    /// result into `out` (its buffers are reused).
    ///
    /// Isolated bodies produce no island. On allocation failure the build
    /// aborts with `out` untouched.
    pub fn build(
        &mut self,
        constraints: &[Constraint2d],
        manifolds: &[ContactManifold],
        out: &mut Islands,
    ) -> Result<(), PhysicsError> {
        // Upper bound: every edge endpoint is a distinct body.
        let edge_count = constraints.len() + manifolds.len();
        self.map.reset(edge_count * 2)?;

        // Pass 1: dense indices for every referenced body.
        for constraint in constraints {
            let (a, b) = constraint.body_pair();
            self.map.get_or_insert(a);
            self.map.get_or_insert(b);
        }
        for manifold in manifolds {
            self.map.get_or_insert(manifold.pair.handle_a());
            self.map.get_or_insert(manifold.pair.handle_b());
        }
        let body_count = self.map.len;

        // Pass 2: union the endpoints of every edge.
        self.union_find.reset(body_count)?;
        for constraint in constraints {
            let (a, b) = constraint.body_pair();
            let da = self.map.get_or_insert(a);
            let db = self.map.get_or_insert(b);
            self.union_find.union(da, db);
        }
        for manifold in manifolds {
            let da = self.map.get_or_insert(manifold.pair.handle_a());
            let db = self.map.get_or_insert(manifold.pair.handle_b());
            self.union_find.union(da, db);
        }

        // Pass 3: dense island ids in first-seen root order, and per-edge
        // island assignment.
        let reserve = |v: &mut Vec<u32>, n: usize, what: &'static str| {
            if n > v.capacity() {
                v.try_reserve(n - v.capacity())
                    .map_err(|_| PhysicsError::AllocationFailed {
                        resource: what,
                        requested: n,
                    })
            } else {
                Ok(())
            }
        };
        reserve(&mut self.island_of_root, body_count, "island roots")?;
        reserve(
            &mut self.constraint_island,
            constraints.len(),
            "island assignment",
        )?;
        reserve(&mut self.contact_island, manifolds.len(), "island assignment")?;

        self.island_of_root.clear();
        self.island_of_root.resize(body_count, NO_ISLAND);
        self.constraint_island.clear();
        self.contact_island.clear();

        let mut island_count: u32 = 0;
        for constraint in constraints {
            let (a, _) = constraint.body_pair();
            let dense = self.map.get_or_insert(a);
            let root = self.union_find.find(dense) as usize;
            if self.island_of_root[root] == NO_ISLAND {
                self.island_of_root[root] = island_count;
                island_count += 1;
            }
            self.constraint_island.push(self.island_of_root[root]);
        }
        for manifold in manifolds {
            let dense = self.map.get_or_insert(manifold.pair.handle_a());
            let root = self.union_find.find(dense) as usize;
            if self.island_of_root[root] == NO_ISLAND {
                self.island_of_root[root] = island_count;
                island_count += 1;
            }
            self.contact_island.push(self.island_of_root[root]);
        }
        let islands = island_count as usize;

        // Pass 4: counting sort into flat, capacity-reused buckets.
        reserve(&mut self.constraint_counts, islands + 1, "island offsets")?;
        reserve(&mut self.contact_counts, islands + 1, "island offsets")?;
        reserve(
            &mut out.constraint_indices,
            constraints.len(),
            "island buckets",
        )?;
        reserve(&mut out.contact_indices, manifolds.len(), "island buckets")?;
        if islands > out.islands.capacity() {
            out.islands
                .try_reserve(islands - out.islands.capacity())
                .map_err(|_| PhysicsError::AllocationFailed {
                    resource: "island list",
                    requested: islands,
                })?;
        }

        self.constraint_counts.clear();
        self.constraint_counts.resize(islands + 1, 0);
        self.contact_counts.clear();
        self.contact_counts.resize(islands + 1, 0);
        for &island in &self.constraint_island {
            self.constraint_counts[island as usize + 1] += 1;
        }
        for &island in &self.contact_island {
            self.contact_counts[island as usize + 1] += 1;
        }
        for i in 1..=islands {
            self.constraint_counts[i] += self.constraint_counts[i - 1];
            self.contact_counts[i] += self.contact_counts[i - 1];
        }

        out.constraint_indices.clear();
        out.constraint_indices.resize(constraints.len(), 0);
        out.contact_indices.clear();
        out.contact_indices.resize(manifolds.len(), 0);
        out.islands.clear();

        // Stable within-island order: fill in input order using running
        // cursors, so each island's slice preserves the caller's ordering.
        let mut constraint_cursor = self.constraint_counts.clone();
        for (index, &island) in self.constraint_island.iter().enumerate() {
            let slot = constraint_cursor[island as usize];
            out.constraint_indices[slot as usize] = index as u32;
            constraint_cursor[island as usize] += 1;
        }
        let mut contact_cursor = self.contact_counts.clone();
        for (index, &island) in self.contact_island.iter().enumerate() {
            let slot = contact_cursor[island as usize];
            out.contact_indices[slot as usize] = index as u32;
            contact_cursor[island as usize] += 1;
        }

        for i in 0..islands {
            out.islands.push(IslandRef {
                constraints: (
                    self.constraint_counts[i] as usize,
                    self.constraint_counts[i + 1] as usize,
                ),
                contacts: (
                    self.contact_counts[i] as usize,
                    self.contact_counts[i + 1] as usize,
                ),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::DistanceConstraint;
    use crate::math::Vec2;
    use std::collections::HashSet;

    fn distance(a: u32, b: u32) -> Constraint2d {
        Constraint2d::Distance(DistanceConstraint::new(
            BodyHandle(a),
            BodyHandle(b),
            Vec2::ZERO,
            Vec2::ZERO,
            1.0,
        ))
    }

    fn bodies_of_island(constraints: &[Constraint2d], islands: &Islands, i: usize) -> HashSet<u32> {
        let mut set = HashSet::new();
        for &ci in islands.constraints_of(i) {
            let (a, b) = constraints[ci as usize].body_pair();
            set.insert(a.0);
            set.insert(b.0);
        }
        set
    }

    #[test]
    fn test_single_chain_is_one_island() {
        let constraints = vec![distance(0, 1), distance(1, 2), distance(2, 3)];
        let mut builder = IslandBuilder::new();
        let mut islands = Islands::default();
        builder.build(&constraints, &[], &mut islands).unwrap();

        assert_eq!(islands.len(), 1);
        assert_eq!(islands.constraints_of(0), &[0, 1, 2]);
    }

    #[test]
    fn test_disconnected_components_split() {
        let constraints = vec![
            distance(0, 1),
            distance(10, 11),
            distance(1, 2),
            distance(11, 12),
        ];
        let mut builder = IslandBuilder::new();
        let mut islands = Islands::default();
        builder.build(&constraints, &[], &mut islands).unwrap();

        assert_eq!(islands.len(), 2);

        // No body appears in two islands.
        let set_a = bodies_of_island(&constraints, &islands, 0);
        let set_b = bodies_of_island(&constraints, &islands, 1);
        assert!(set_a.is_disjoint(&set_b));

        // Union of islands covers every constraint exactly once.
        let mut all: Vec<u32> = (0..islands.len())
            .flat_map(|i| islands.constraints_of(i).to_vec())
            .collect();
        all.sort_unstable();
        assert_eq!(all, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_within_island_order_is_input_order() {
        // Interleaved input: island membership must not reorder constraints
        // within an island.
        let constraints = vec![
            distance(0, 1),
            distance(5, 6),
            distance(1, 2),
            distance(6, 7),
            distance(2, 0),
        ];
        let mut builder = IslandBuilder::new();
        let mut islands = Islands::default();
        builder.build(&constraints, &[], &mut islands).unwrap();

        assert_eq!(islands.len(), 2);
        assert_eq!(islands.constraints_of(0), &[0, 2, 4]);
        assert_eq!(islands.constraints_of(1), &[1, 3]);
    }

    #[test]
    fn test_sparse_handles_map_densely() {
        // Handles far apart still cluster correctly.
        let constraints = vec![distance(1_000_000, 2), distance(2, 40_000)];
        let mut builder = IslandBuilder::new();
        let mut islands = Islands::default();
        builder.build(&constraints, &[], &mut islands).unwrap();
        assert_eq!(islands.len(), 1);
    }

    #[test]
    fn test_empty_input_empty_output() {
        let mut builder = IslandBuilder::new();
        let mut islands = Islands::default();
        builder.build(&[], &[], &mut islands).unwrap();
        assert!(islands.is_empty());
        assert!(islands.constraint_indices.is_empty());
    }

    #[test]
    fn test_workspace_reuse_is_clean() {
        let mut builder = IslandBuilder::new();
        let mut islands = Islands::default();

        let big = vec![distance(0, 1), distance(1, 2), distance(3, 4)];
        builder.build(&big, &[], &mut islands).unwrap();
        assert_eq!(islands.len(), 2);

        // A smaller, different graph must not inherit stale state.
        let small = vec![distance(7, 8)];
        builder.build(&small, &[], &mut islands).unwrap();
        assert_eq!(islands.len(), 1);
        assert_eq!(islands.constraints_of(0), &[0]);
        assert!(islands.contact_indices.is_empty());
    }
}
