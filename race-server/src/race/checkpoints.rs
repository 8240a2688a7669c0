// ==============================================================================
// checkpoints.rs — CHECKPOINT GRAPH + PER-VEHICLE RACE PROGRESS
// ------------------------------------------------------------------------------
// Checkpoints form a cycle 0 → 1 → … → K−1 → 0. Per vehicle we keep the
// last-passed index (lazily created, default 0), lap count and a one-way
// finished flag.
//
// pass(vehicle, i):
// - finished vehicles ignore everything
// - i == (last + 1) % K   -> advance; a wrap to 0 after a full circuit is a lap
// - anything else         -> ignored (clipped a non-adjacent gate)
//
// Gates are oriented boxes. A vehicle "enters" one when the segment between
// its previous and current position touches the box and the previous
// position was outside it, so fast cars can't tunnel through thin gates.
// ==============================================================================

use std::collections::HashMap;

use log::{debug, info, warn};
use nalgebra::{Isometry3, Point3, Translation3, UnitQuaternion, Vector3};

use crate::vehicle::VehicleId;

#[derive(Debug, Clone, Copy)]
pub struct Checkpoint {
    pub index: usize,
    pub position: Point3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub half_extents: Vector3<f32>,
}

impl Checkpoint {
    pub fn pose(&self) -> Isometry3<f32> {
        Isometry3::from_parts(Translation3::from(self.position.coords), self.rotation)
    }

    fn to_local(&self, p: &Point3<f32>) -> Vector3<f32> {
        self.rotation.inverse() * (p - self.position)
    }

    pub fn contains(&self, p: &Point3<f32>) -> bool {
        let l = self.to_local(p);
        l.x.abs() <= self.half_extents.x
            && l.y.abs() <= self.half_extents.y
            && l.z.abs() <= self.half_extents.z
    }

    /// Where along `from → to` (0..1) the segment first touches the gate
    /// box, if it does. Slab test.
    pub fn segment_entry(&self, from: &Point3<f32>, to: &Point3<f32>) -> Option<f32> {
        let a = self.to_local(from);
        let b = self.to_local(to);
        let d = b - a;

        let mut t_min = 0.0_f32;
        let mut t_max = 1.0_f32;

        for axis in 0..3 {
            let h = self.half_extents[axis];
            if d[axis].abs() < 1e-9 {
                if a[axis].abs() > h {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / d[axis];
            let mut t0 = (-h - a[axis]) * inv;
            let mut t1 = (h - a[axis]) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }

        Some(t_min)
    }

    pub fn entered(&self, from: &Point3<f32>, to: &Point3<f32>) -> bool {
        self.entry(from, to).is_some()
    }

    fn entry(&self, from: &Point3<f32>, to: &Point3<f32>) -> Option<f32> {
        if self.contains(from) {
            return None;
        }
        self.segment_entry(from, to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VehicleProgress {
    pub last_passed: usize,
    pub lap: u32,
    pub finished: bool,
    pub passes: u32,
    pub place: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    Advanced { index: usize },
    LapCompleted { lap: u32 },
    Finished { lap: u32, place: u32 },
    Ignored,
}

pub struct CheckpointGraph {
    checkpoints: Vec<Checkpoint>,
    total_laps: u32,
    progress: HashMap<VehicleId, VehicleProgress>,
    finishers: u32,
}

impl CheckpointGraph {
    pub fn new(checkpoints: Vec<Checkpoint>, total_laps: u32) -> Self {
        Self {
            checkpoints,
            total_laps: total_laps.max(1),
            progress: HashMap::new(),
            finishers: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }

    pub fn total_laps(&self) -> u32 {
        self.total_laps
    }

    pub fn get(&self, index: usize) -> Option<&Checkpoint> {
        self.checkpoints.get(index)
    }

    /// Successor in the cycle. Empty graph maps everything to 0.
    pub fn next(&self, index: usize) -> usize {
        match self.checkpoints.len() {
            0 => 0,
            k => (index + 1) % k,
        }
    }

    /// Progress snapshot; vehicles we've never seen report the default.
    pub fn progress(&self, id: VehicleId) -> VehicleProgress {
        self.progress.get(&id).copied().unwrap_or_default()
    }

    pub fn last_passed(&mut self, id: VehicleId) -> usize {
        self.progress.entry(id).or_default().last_passed
    }

    /// Where a respawning vehicle goes. Falls back to checkpoint 0 (with a
    /// warning) if this vehicle never touched the graph; `None` on an empty
    /// graph.
    pub fn respawn_checkpoint(&mut self, id: VehicleId) -> Option<Checkpoint> {
        if self.checkpoints.is_empty() {
            return None;
        }

        let index = match self.progress.get(&id) {
            Some(p) => p.last_passed,
            None => {
                warn!("⚠️ No last checkpoint for {id}, falling back to checkpoint 0");
                self.progress.entry(id).or_default().last_passed
            }
        };

        self.checkpoints.get(index).or_else(|| self.checkpoints.first()).copied()
    }

    pub fn pass(&mut self, id: VehicleId, index: usize) -> PassOutcome {
        let k = self.checkpoints.len();
        if index >= k {
            return PassOutcome::Ignored;
        }

        let next = self.next(self.progress.get(&id).map(|p| p.last_passed).unwrap_or(0));
        let total_laps = self.total_laps;
        let progress = self.progress.entry(id).or_default();

        if progress.finished {
            return PassOutcome::Ignored;
        }

        if index != next {
            debug!(
                "🏁 {id} clipped checkpoint {index} out of order (expected {next}), ignored"
            );
            return PassOutcome::Ignored;
        }

        progress.last_passed = index;
        progress.passes += 1;

        // a wrap to 0 only counts once a whole circuit has been driven
        if index == 0 && progress.passes as usize >= k {
            progress.lap += 1;
            let lap = progress.lap;

            if lap >= total_laps {
                progress.finished = true;
                self.finishers += 1;
                progress.place = Some(self.finishers);
                info!("🏆 {id} finished the race in place {}", self.finishers);
                return PassOutcome::Finished { lap, place: self.finishers };
            }

            info!("🏁 {id} completed lap {lap}/{total_laps}");
            return PassOutcome::LapCompleted { lap };
        }

        PassOutcome::Advanced { index }
    }

    /// Gates whose volume the vehicle entered while moving `from → to`,
    /// in the order the segment reaches them.
    pub fn gates_entered(&self, from: &Point3<f32>, to: &Point3<f32>) -> Vec<usize> {
        let mut hits: Vec<(f32, usize)> = self
            .checkpoints
            .iter()
            .filter_map(|c| c.entry(from, to).map(|t| (t, c.index)))
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.into_iter().map(|(_, index)| index).collect()
    }

    /// Race completion in [0, 1].
    pub fn race_fraction(&self, id: VehicleId) -> f32 {
        let p = self.progress(id);
        if p.finished {
            return 1.0;
        }
        let k = self.checkpoints.len().max(1) as f32;
        // checkpoint 0 at the start of a lap is 0/K, not K/K
        let within = if p.passes == 0 { 0.0 } else { p.last_passed as f32 / k };
        ((p.lap as f32 + within) / self.total_laps as f32).clamp(0.0, 1.0)
    }

    pub fn finished(&self, id: VehicleId) -> bool {
        self.progress(id).finished
    }

    /// Scene teardown: forget everyone.
    pub fn reset(&mut self) {
        self.progress.clear();
        self.finishers = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(k: usize, laps: u32) -> CheckpointGraph {
        let cps = (0..k)
            .map(|i| Checkpoint {
                index: i,
                position: Point3::new(i as f32 * 20.0, 0.0, 0.0),
                rotation: UnitQuaternion::identity(),
                half_extents: Vector3::new(5.0, 2.5, 0.25),
            })
            .collect();
        CheckpointGraph::new(cps, laps)
    }

    const CAR: VehicleId = VehicleId(1);

    #[test]
    fn next_wraps() {
        let g = square(4, 3);
        assert_eq!(g.next(3), 0);
        assert_eq!(g.next(0), 1);
    }

    #[test]
    fn in_order_cycle_counts_one_lap() {
        let mut g = square(4, 3);
        for i in [0, 1, 2, 3] {
            let _ = g.pass(CAR, i);
        }
        assert_eq!(g.progress(CAR).lap, 0);
        assert_eq!(g.pass(CAR, 0), PassOutcome::LapCompleted { lap: 1 });
        assert!(!g.progress(CAR).finished);
    }

    #[test]
    fn out_of_order_changes_nothing() {
        let mut g = square(4, 3);
        assert!(matches!(g.pass(CAR, 1), PassOutcome::Advanced { index: 1 }));
        let before = g.progress(CAR);
        assert_eq!(g.pass(CAR, 3), PassOutcome::Ignored);
        assert_eq!(g.pass(CAR, 1), PassOutcome::Ignored);
        assert_eq!(g.pass(CAR, 9), PassOutcome::Ignored);
        assert_eq!(g.progress(CAR), before);
    }

    #[test]
    fn unknown_vehicle_falls_back_to_first_checkpoint() {
        let mut g = square(4, 3);
        let Some(cp) = g.respawn_checkpoint(VehicleId(99)) else {
            panic!("non-empty graph must give a respawn target");
        };
        assert_eq!(cp.index, 0);
        assert_eq!(g.last_passed(VehicleId(99)), 0);
    }

    #[test]
    fn empty_graph_has_no_target() {
        let mut g = CheckpointGraph::new(Vec::new(), 3);
        assert!(g.respawn_checkpoint(CAR).is_none());
        assert_eq!(g.pass(CAR, 0), PassOutcome::Ignored);
        assert_eq!(g.next(5), 0);
    }

    #[test]
    fn fast_car_cannot_tunnel_through_a_gate() {
        let g = square(4, 3);
        let gate = g.checkpoints[1];
        // 2 m per tick across a 0.5 m deep gate
        let from = Point3::new(20.0, 0.5, -1.0);
        let to = Point3::new(20.0, 0.5, 1.0);
        assert!(gate.entered(&from, &to));
        // already inside: not a new entry
        assert!(!gate.entered(&Point3::new(20.0, 0.5, 0.0), &to));
        // beside the gate
        assert!(!gate.entered(&Point3::new(30.0, 0.5, -1.0), &Point3::new(30.0, 0.5, 1.0)));
    }

    #[test]
    fn gates_in_one_tick_are_reported_in_driving_order() {
        let gate = |index: usize, position: Point3<f32>| Checkpoint {
            index,
            position,
            rotation: UnitQuaternion::identity(),
            half_extents: Vector3::new(5.0, 2.5, 0.25),
        };
        // last gate sits 1 m before the finish gate
        let mut g = CheckpointGraph::new(
            vec![
                gate(0, Point3::new(0.0, 0.0, 0.0)),
                gate(1, Point3::new(50.0, 0.0, -20.0)),
                gate(2, Point3::new(0.0, 0.0, 1.0)),
            ],
            3,
        );
        assert_eq!(g.pass(CAR, 1), PassOutcome::Advanced { index: 1 });

        let hits = g.gates_entered(&Point3::new(0.0, 0.5, 3.0), &Point3::new(0.0, 0.5, -0.6));
        assert_eq!(hits, vec![2, 0]);

        let outcomes: Vec<_> = hits.into_iter().map(|i| g.pass(CAR, i)).collect();
        assert_eq!(outcomes, vec![PassOutcome::Advanced { index: 2 }, PassOutcome::LapCompleted { lap: 1 }]);
    }

    #[test]
    fn fraction_tracks_laps() {
        let mut g = square(4, 2);
        assert_eq!(g.race_fraction(CAR), 0.0);
        let _ = g.pass(CAR, 1);
        let _ = g.pass(CAR, 2);
        assert!((g.race_fraction(CAR) - 0.25).abs() < 1e-6);
    }
}
