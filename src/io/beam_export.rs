//! Beam-lattice export block.
//!
//! Container formats store lattices as a shared vertex list plus indexed
//! beams and balls. Canonicalization deduplicates beam endpoints (exact
//! within 1e-6), maps cap styles onto the container cap modes and, in
//! mixed ball mode, emits explicit balls only for positions present in the
//! vertex map. `to_resource` is the inverse for round-trips through the
//! payload path.

use std::collections::BTreeMap;

use glam::Vec3;

use crate::kernel::types::{BallData, BeamData, CapStyle};
use crate::resources::beam_lattice::BeamLatticeResource;

/// Vertex deduplication tolerance.
const VERTEX_EPS: f32 = 1e-6;

/// Container cap modes; mapping 0 -> Hemisphere, 1 -> Sphere, 2 -> Butt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapMode {
    Hemisphere,
    Sphere,
    Butt,
}

impl CapMode {
    pub fn from_cap_style(style: CapStyle) -> Self {
        match style {
            CapStyle::Hemisphere => CapMode::Hemisphere,
            CapStyle::Sphere => CapMode::Sphere,
            CapStyle::Butt => CapMode::Butt,
        }
    }

    pub fn to_cap_style(self) -> CapStyle {
        match self {
            CapMode::Hemisphere => CapStyle::Hemisphere,
            CapMode::Sphere => CapStyle::Sphere,
            CapMode::Butt => CapStyle::Butt,
        }
    }
}

/// Which lattice vertices get balls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallMode {
    None,
    /// Explicit ball entries only.
    Mixed,
    /// Every vertex carries a ball of the default radius.
    All,
}

#[derive(Debug, Clone)]
pub struct ExportedBeam {
    pub indices: [u32; 2],
    pub radii: [f32; 2],
    pub cap_modes: [CapMode; 2],
}

#[derive(Debug, Clone)]
pub struct ExportedBall {
    pub index: u32,
    pub radius: f32,
}

/// The canonicalized lattice block a container writer consumes.
#[derive(Debug, Clone)]
pub struct BeamLatticeBlock {
    pub vertices: Vec<Vec3>,
    pub beams: Vec<ExportedBeam>,
    pub balls: Vec<ExportedBall>,
    pub ball_mode: BallMode,
    pub default_ball_radius: f32,
}

impl BeamLatticeBlock {
    /// Canonicalize a lattice into the block form.
    pub fn build(
        beams: &[BeamData],
        balls: &[BallData],
        ball_mode: BallMode,
        default_ball_radius: f32,
    ) -> Self {
        let mut vertices: Vec<Vec3> = Vec::new();
        let mut vertex_map: BTreeMap<(i64, i64, i64), u32> = BTreeMap::new();

        let mut get_or_add = |pos: Vec3, vertices: &mut Vec<Vec3>| -> u32 {
            let key = quantize(pos);
            if let Some(&index) = vertex_map.get(&key) {
                return index;
            }
            let index = vertices.len() as u32;
            vertices.push(pos);
            vertex_map.insert(key, index);
            index
        };

        let exported_beams = beams
            .iter()
            .map(|beam| ExportedBeam {
                indices: [
                    get_or_add(beam.start_pos, &mut vertices),
                    get_or_add(beam.end_pos, &mut vertices),
                ],
                radii: [beam.start_radius, beam.end_radius],
                cap_modes: [
                    CapMode::from_cap_style(beam.start_cap_style),
                    CapMode::from_cap_style(beam.end_cap_style),
                ],
            })
            .collect();

        let exported_balls = match ball_mode {
            BallMode::None | BallMode::All => Vec::new(),
            BallMode::Mixed => balls
                .iter()
                .filter_map(|ball| {
                    // Explicit entries only for balls sitting on a lattice
                    // vertex.
                    vertex_map.get(&quantize(ball.position)).map(|&index| {
                        ExportedBall {
                            index,
                            radius: ball.radius,
                        }
                    })
                })
                .collect(),
        };

        log::info!(
            "beam lattice export: {} beams over {} vertices, {} explicit balls",
            beams.len(),
            vertices.len(),
            exported_balls.len()
        );

        Self {
            vertices,
            beams: exported_beams,
            balls: exported_balls,
            ball_mode,
            default_ball_radius,
        }
    }

    /// Reconstruct the lattice for the payload path.
    pub fn to_resource(&self) -> Option<BeamLatticeResource> {
        let beams: Vec<BeamData> = self
            .beams
            .iter()
            .map(|beam| {
                let mut data = BeamData::new(
                    self.vertices[beam.indices[0] as usize],
                    self.vertices[beam.indices[1] as usize],
                    beam.radii[0],
                    beam.radii[1],
                );
                data.start_cap_style = beam.cap_modes[0].to_cap_style();
                data.end_cap_style = beam.cap_modes[1].to_cap_style();
                data
            })
            .collect();

        let balls: Vec<BallData> = match self.ball_mode {
            BallMode::None => Vec::new(),
            BallMode::Mixed => self
                .balls
                .iter()
                .map(|ball| BallData::new(self.vertices[ball.index as usize], ball.radius))
                .collect(),
            BallMode::All => self
                .vertices
                .iter()
                .map(|&pos| BallData::new(pos, self.default_ball_radius))
                .collect(),
        };

        BeamLatticeResource::new(beams, balls)
    }
}

fn quantize(pos: Vec3) -> (i64, i64, i64) {
    let scale = 1.0 / VERTEX_EPS;
    (
        (pos.x * scale).round() as i64,
        (pos.y * scale).round() as i64,
        (pos.z * scale).round() as i64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lattice() -> (Vec<BeamData>, Vec<BallData>) {
        let a = Vec3::ZERO;
        let b = Vec3::new(10.0, 0.0, 0.0);
        let c = Vec3::new(10.0, 10.0, 0.0);
        let mut beam_bc = BeamData::new(b, c, 0.5, 0.8);
        beam_bc.end_cap_style = CapStyle::Butt;
        let beams = vec![BeamData::new(a, b, 0.5, 0.5), beam_bc];
        let balls = vec![
            BallData::new(b, 1.0),
            // Off-vertex ball: dropped in mixed mode.
            BallData::new(Vec3::new(5.0, 5.0, 5.0), 0.7),
        ];
        (beams, balls)
    }

    #[test]
    fn shared_endpoints_deduplicate() {
        let (beams, balls) = lattice();
        let block = BeamLatticeBlock::build(&beams, &balls, BallMode::None, 0.5);
        // a, b, c: the shared b is emitted once.
        assert_eq!(block.vertices.len(), 3);
        assert_eq!(block.beams[0].indices[1], block.beams[1].indices[0]);
    }

    #[test]
    fn near_coincident_vertices_merge_within_tolerance() {
        let a = Vec3::ZERO;
        let a_jittered = Vec3::new(2e-7, -2e-7, 0.0);
        let beams = vec![
            BeamData::new(a, Vec3::X, 0.1, 0.1),
            BeamData::new(a_jittered, Vec3::Y, 0.1, 0.1),
        ];
        let block = BeamLatticeBlock::build(&beams, &[], BallMode::None, 0.5);
        assert_eq!(block.vertices.len(), 3);
    }

    #[test]
    fn mixed_mode_keeps_only_on_vertex_balls() {
        let (beams, balls) = lattice();
        let block = BeamLatticeBlock::build(&beams, &balls, BallMode::Mixed, 0.5);
        assert_eq!(block.balls.len(), 1);
        assert_eq!(
            block.vertices[block.balls[0].index as usize],
            Vec3::new(10.0, 0.0, 0.0)
        );
    }

    #[test]
    fn cap_modes_map_bidirectionally() {
        for style in [CapStyle::Hemisphere, CapStyle::Sphere, CapStyle::Butt] {
            assert_eq!(CapMode::from_cap_style(style).to_cap_style(), style);
        }
    }

    #[test]
    fn export_reimport_preserves_the_primitive_multiset() {
        let (beams, balls) = lattice();
        let block = BeamLatticeBlock::build(&beams, &balls, BallMode::Mixed, 0.5);
        let resource = block.to_resource().unwrap();

        assert_eq!(resource.beams().len(), beams.len());
        for (original, restored) in beams.iter().zip(resource.beams()) {
            assert!((original.start_pos - restored.start_pos).length() <= VERTEX_EPS);
            assert!((original.end_pos - restored.end_pos).length() <= VERTEX_EPS);
            assert_eq!(original.start_radius, restored.start_radius);
            assert_eq!(original.end_radius, restored.end_radius);
            assert_eq!(original.start_cap_style, restored.start_cap_style);
            assert_eq!(original.end_cap_style, restored.end_cap_style);
        }
        // The off-vertex ball was not exportable; the on-vertex one is back.
        assert_eq!(resource.balls().len(), 1);
        assert_eq!(resource.balls()[0].position, Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn all_mode_reimports_a_ball_per_vertex() {
        let (beams, _) = lattice();
        let block = BeamLatticeBlock::build(&beams, &[], BallMode::All, 0.4);
        let resource = block.to_resource().unwrap();
        assert_eq!(resource.balls().len(), block.vertices.len());
        assert!(resource.balls().iter().all(|b| b.radius == 0.4));
    }
}
