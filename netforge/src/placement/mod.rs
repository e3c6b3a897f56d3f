//! Force-Directed Placement
//!
//! Assigns board coordinates to components with a fixed-iteration spring
//! simulation:
//!
//! 1. every pair repels with `repulsion / (d² + epsilon)`
//! 2. every connected pair attracts with `spring * d * weight`, where the
//!    weight counts shared nets (see [`ConnectivityGraph`])
//! 3. `v = damping * (v + F)`, clamped to `max_velocity`, then `p += v`
//!
//! There is no convergence test; the iteration count fixes the running time.
//! With a seed the result is fully deterministic; without one the start
//! positions come from system entropy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ir::{Component, ConnectivityGraph, Net};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    /// Fixed RNG seed; `None` draws start positions from entropy.
    pub seed: Option<u64>,
    pub iterations: usize,
    /// Start positions are uniform in `[init_min, init_max)` on each axis.
    pub init_min: f64,
    pub init_max: f64,
    pub repulsion: f64,
    pub spring: f64,
    pub damping: f64,
    pub max_velocity: f64,
    pub epsilon: f64,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            seed: None,
            iterations: 50,
            init_min: 50.0,
            init_max: 150.0,
            repulsion: 500.0,
            spring: 0.05,
            damping: 0.85,
            max_velocity: 10.0,
            epsilon: 0.01,
        }
    }
}

impl PlacementConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min: Point,
    pub max: Point,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    pub fn contains(&self, p: &Point) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

/// Final coordinates of one placement pass, in component order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Placement {
    order: Vec<(String, Point)>,
    index: HashMap<String, usize>,
    initial: Vec<Point>,
}

impl Placement {
    pub fn get(&self, id: &str) -> Option<Point> {
        self.index.get(id).map(|&i| self.order[i].1)
    }

    /// Start coordinate drawn for `id` before the first iteration.
    pub fn initial(&self, id: &str) -> Option<Point> {
        self.index.get(id).and_then(|&i| self.initial.get(i).copied())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Point)> {
        self.order.iter().map(|(id, p)| (id.as_str(), *p))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Min/max over all final coordinates, grown by `margin` on every side.
    pub fn bounding_box(&self, margin: f64) -> Option<BoundingBox> {
        let mut points = self.order.iter().map(|(_, p)| *p);
        let first = points.next()?;
        let (mut min, mut max) = (first, first);
        for p in points {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }
        Some(BoundingBox {
            min: Point::new(min.x - margin, min.y - margin),
            max: Point::new(max.x + margin, max.y + margin),
        })
    }
}

pub struct ForceDirectedPlacer {
    config: PlacementConfig,
}

impl ForceDirectedPlacer {
    pub fn new(config: PlacementConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlacementConfig {
        &self.config
    }

    pub fn place(&self, components: &[Component], nets: &[Net]) -> Placement {
        let graph = ConnectivityGraph::build(components, nets);
        let n = graph.component_count();
        let cfg = &self.config;

        let mut rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let (lo, hi) = (cfg.init_min, cfg.init_max);
        let mut draw = || if hi > lo { rng.gen_range(lo..hi) } else { lo };
        let mut pos: Vec<Point> = (0..n).map(|_| Point::new(draw(), draw())).collect();
        let initial = pos.clone();
        let mut vel = vec![Point::default(); n];
        let springs = graph.weighted_pairs();

        for _ in 0..cfg.iterations {
            let mut force = vec![Point::default(); n];

            for i in 0..n {
                for j in (i + 1)..n {
                    let (ux, uy, d) = direction(&pos[i], &pos[j], i, j);
                    let magnitude = cfg.repulsion / (d * d + cfg.epsilon);
                    force[i].x += ux * magnitude;
                    force[i].y += uy * magnitude;
                    force[j].x -= ux * magnitude;
                    force[j].y -= uy * magnitude;
                }
            }

            for &(a, b, weight) in &springs {
                let scale = cfg.spring * weight as f64;
                let dx = pos[b].x - pos[a].x;
                let dy = pos[b].y - pos[a].y;
                force[a].x += dx * scale;
                force[a].y += dy * scale;
                force[b].x -= dx * scale;
                force[b].y -= dy * scale;
            }

            for i in 0..n {
                let mut v = Point::new(
                    cfg.damping * (vel[i].x + force[i].x),
                    cfg.damping * (vel[i].y + force[i].y),
                );
                let speed = (v.x * v.x + v.y * v.y).sqrt();
                if speed > cfg.max_velocity {
                    v.x *= cfg.max_velocity / speed;
                    v.y *= cfg.max_velocity / speed;
                }
                vel[i] = v;
                pos[i].x += v.x;
                pos[i].y += v.y;
            }
        }

        let order: Vec<(String, Point)> = (0..n)
            .filter_map(|i| graph.component_id(i).map(|id| (id.to_string(), pos[i])))
            .collect();
        let index = order
            .iter()
            .enumerate()
            .map(|(i, (id, _))| (id.clone(), i))
            .collect();

        tracing::debug!("Placed {} components in {} iterations", n, cfg.iterations);
        Placement {
            order,
            index,
            initial,
        }
    }
}

/// Unit vector from `b` to `a` and the distance between them. Coincident
/// points get a fixed direction derived from their indices so the pair still
/// separates deterministically.
fn direction(a: &Point, b: &Point, i: usize, j: usize) -> (f64, f64, f64) {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let d = (dx * dx + dy * dy).sqrt();
    if d > f64::EPSILON {
        (dx / d, dy / d, d)
    } else {
        let angle = (i * 31 + j * 17) as f64;
        (angle.cos(), angle.sin(), 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comp(id: &str) -> Component {
        Component {
            id: id.to_string(),
            kind: "Resistor".to_string(),
            value: "1k".to_string(),
            library_ref: "Device:R".to_string(),
            footprint: None,
            connections: vec![],
        }
    }

    fn net(name: &str, nodes: &[&str]) -> Net {
        Net {
            name: name.to_string(),
            nodes: nodes.iter().map(|n| n.to_string()).collect(),
        }
    }

    #[test]
    fn test_seeded_placement_is_deterministic() {
        let comps = vec![comp("R1"), comp("R2"), comp("R3")];
        let nets = vec![net("A", &["R1:1", "R2:1"]), net("B", &["R2:2", "R3:1"])];
        let placer = ForceDirectedPlacer::new(PlacementConfig::with_seed(7));

        let first = placer.place(&comps, &nets);
        let second = placer.place(&comps, &nets);
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
        assert_eq!(first.iter().map(|(id, _)| id).collect::<Vec<_>>(), vec!["R1", "R2", "R3"]);
    }

    #[test]
    fn test_initial_positions_within_region() {
        let comps: Vec<_> = (0..10).map(|i| comp(&format!("R{}", i))).collect();
        let placement = ForceDirectedPlacer::new(PlacementConfig {
            iterations: 0,
            ..PlacementConfig::with_seed(3)
        })
        .place(&comps, &[]);

        for (id, p) in placement.iter() {
            assert!((50.0..150.0).contains(&p.x), "{} x={}", id, p.x);
            assert!((50.0..150.0).contains(&p.y), "{} y={}", id, p.y);
            assert_eq!(placement.initial(id), Some(p));
        }
    }

    #[test]
    fn test_connected_pair_usually_contracts() {
        let comps = vec![comp("R1"), comp("D1")];
        let nets = vec![net("LED_NET", &["R1:2", "D1:1"])];
        let trials = 100;
        let mut contracted = 0;

        for seed in 0..trials {
            let placement =
                ForceDirectedPlacer::new(PlacementConfig::with_seed(seed)).place(&comps, &nets);
            let start = placement.initial("R1").unwrap().distance_to(&placement.initial("D1").unwrap());
            let end = placement.get("R1").unwrap().distance_to(&placement.get("D1").unwrap());
            if end < start {
                contracted += 1;
            }
            // equilibrium sits where spring and repulsion balance, far from collapse
            assert!(end > 5.0, "seed {} collapsed to {}", seed, end);
        }
        assert!(contracted >= 70, "only {} of {} contracted", contracted, trials);
    }

    #[test]
    fn test_unconnected_pair_never_collapses() {
        let comps = vec![comp("A1"), comp("B1")];
        for seed in 0..50 {
            let placement = ForceDirectedPlacer::new(PlacementConfig::with_seed(seed)).place(&comps, &[]);
            let d = placement.get("A1").unwrap().distance_to(&placement.get("B1").unwrap());
            assert!(d > 1.0, "seed {} distance {}", seed, d);
        }
    }

    #[test]
    fn test_coincident_start_separates() {
        let comps = vec![comp("A1"), comp("B1")];
        let placement = ForceDirectedPlacer::new(PlacementConfig {
            init_min: 100.0,
            init_max: 100.0,
            ..PlacementConfig::with_seed(1)
        })
        .place(&comps, &[]);
        let d = placement.get("A1").unwrap().distance_to(&placement.get("B1").unwrap());
        assert!(d > 1.0);
        assert!(placement.iter().all(|(_, p)| p.x.is_finite() && p.y.is_finite()));
    }

    #[test]
    fn test_bounding_box_adds_margin() {
        let comps = vec![comp("R1"), comp("R2")];
        let placement = ForceDirectedPlacer::new(PlacementConfig::with_seed(11)).place(&comps, &[]);
        let bbox = placement.bounding_box(10.0).unwrap();
        for (_, p) in placement.iter() {
            assert!(bbox.contains(&p));
            assert!(p.x - bbox.min.x >= 10.0 - 1e-9);
            assert!(bbox.max.y - p.y >= 10.0 - 1e-9);
        }
        assert!(Placement::default().bounding_box(10.0).is_none());
    }
}
