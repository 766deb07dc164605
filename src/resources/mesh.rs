//! Triangle-mesh resources.
//!
//! Triangles are indexed by a median-split kd tree so the kernel can prune
//! distance queries; the payload carries the kd root meta, the node metas
//! and the raw triangle floats. [`StlResource`] is the same thing fed from
//! a binary STL file.

use std::path::{Path, PathBuf};

use glam::Vec3;

use crate::kernel::payload::PrimitiveBuffer;
use crate::kernel::types::{BoundingBox, PrimitiveType};
use crate::resources::ResourceError;

/// Triangles per kd leaf.
const MAX_TRIANGLES_PER_LEAF: usize = 8;
const MAX_KD_DEPTH: u32 = 24;

pub type Triangle = [Vec3; 3];

#[derive(Debug, Clone, Copy)]
struct KdNode {
    bounds: BoundingBox,
    /// -1 for leaves.
    left: i32,
    right: i32,
    triangle_start: i32,
    triangle_count: i32,
}

pub struct MeshResource {
    triangles: Vec<Triangle>,
}

impl MeshResource {
    pub fn new(triangles: Vec<Triangle>) -> Self {
        Self { triangles }
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn bounds(&self) -> BoundingBox {
        let mut bounds = BoundingBox::empty();
        for tri in &self.triangles {
            for v in tri {
                bounds.extend(*v);
            }
        }
        bounds
    }

    pub fn build_payload(&mut self) -> PrimitiveBuffer {
        let mut payload = PrimitiveBuffer::default();
        if self.triangles.is_empty() {
            return payload;
        }

        let mut order: Vec<usize> = (0..self.triangles.len()).collect();
        let mut nodes = Vec::new();
        let count = order.len();
        build_kd(&self.triangles, &mut order, 0, count, 0, &mut nodes);

        // Root node meta, then the remaining nodes, eight floats each:
        // (min.xyz, max.xyz, left|tri_start, right|tri_count).
        let mut root_meta = payload.open_meta(PrimitiveType::MeshKdRootNode);
        root_meta.set_bounds(&nodes[0].bounds);
        write_kd_node(&mut payload, &nodes[0]);
        payload.close_meta(root_meta);

        for node in &nodes[1..] {
            let mut meta = payload.open_meta(PrimitiveType::MeshKdNode);
            meta.set_bounds(&node.bounds);
            write_kd_node(&mut payload, node);
            payload.close_meta(meta);
        }

        // Triangles in kd order, nine floats each.
        let mut tri_meta = payload.open_meta(PrimitiveType::MeshTriangles);
        tri_meta.set_bounds(&nodes[0].bounds);
        for &index in &order {
            for v in &self.triangles[index] {
                payload.data.extend_from_slice(&[v.x, v.y, v.z]);
            }
        }
        payload.close_meta(tri_meta);

        payload
    }
}

/// Eight floats per node: bounds, then child indices for internal nodes.
/// Leaves store `-(triangle_start + 1)` in the first slot so the decoder
/// can tell them apart, and the triangle count in the second.
fn write_kd_node(payload: &mut PrimitiveBuffer, node: &KdNode) {
    let (a, b) = if node.left < 0 {
        (-(node.triangle_start + 1) as f32, node.triangle_count as f32)
    } else {
        (node.left as f32, node.right as f32)
    };
    payload.data.extend_from_slice(&[
        node.bounds.min.x,
        node.bounds.min.y,
        node.bounds.min.z,
        node.bounds.max.x,
        node.bounds.max.y,
        node.bounds.max.z,
        a,
        b,
    ]);
}

fn triangle_bounds(tri: &Triangle) -> BoundingBox {
    let mut bounds = BoundingBox::empty();
    for v in tri {
        bounds.extend(*v);
    }
    bounds
}

fn centroid(tri: &Triangle) -> Vec3 {
    (tri[0] + tri[1] + tri[2]) / 3.0
}

fn build_kd(
    triangles: &[Triangle],
    order: &mut [usize],
    start: usize,
    end: usize,
    depth: u32,
    nodes: &mut Vec<KdNode>,
) -> i32 {
    let node_index = nodes.len() as i32;
    let mut bounds = BoundingBox::empty();
    for &i in &order[start..end] {
        bounds = bounds.union(&triangle_bounds(&triangles[i]));
    }
    nodes.push(KdNode {
        bounds,
        left: -1,
        right: -1,
        triangle_start: start as i32,
        triangle_count: (end - start) as i32,
    });

    if end - start <= MAX_TRIANGLES_PER_LEAF || depth >= MAX_KD_DEPTH {
        return node_index;
    }

    // Median split on the widest axis.
    let size = bounds.size();
    let axis = if size.x >= size.y && size.x >= size.z {
        0
    } else if size.y >= size.z {
        1
    } else {
        2
    };
    order[start..end].sort_by(|&a, &b| {
        let ca = centroid(&triangles[a]);
        let cb = centroid(&triangles[b]);
        let (va, vb) = match axis {
            0 => (ca.x, cb.x),
            1 => (ca.y, cb.y),
            _ => (ca.z, cb.z),
        };
        va.total_cmp(&vb)
    });
    let mid = (start + end) / 2;

    let left = build_kd(triangles, order, start, mid, depth + 1, nodes);
    let right = build_kd(triangles, order, mid, end, depth + 1, nodes);
    nodes[node_index as usize].left = left;
    nodes[node_index as usize].right = right;
    node_index
}

/// Binary STL file loaded lazily into a [`MeshResource`].
pub struct StlResource {
    path: PathBuf,
}

impl StlResource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn build_payload(&mut self) -> Result<PrimitiveBuffer, ResourceError> {
        let triangles = read_binary_stl(&self.path)?;
        log::info!(
            "loaded {} triangles from {}",
            triangles.len(),
            self.path.display()
        );
        Ok(MeshResource::new(triangles).build_payload())
    }
}

/// Minimal binary STL reader: 80-byte header, u32 count, 50 bytes per
/// facet (normal + three vertices + attribute count).
fn read_binary_stl(path: &Path) -> Result<Vec<Triangle>, ResourceError> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < 84 {
        return Err(ResourceError::IoError(format!(
            "{}: not a binary STL (too short)",
            path.display()
        )));
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    let expected = 84 + count * 50;
    if bytes.len() < expected {
        return Err(ResourceError::IoError(format!(
            "{}: truncated binary STL",
            path.display()
        )));
    }

    let read_f32 = |offset: usize| {
        f32::from_le_bytes([
            bytes[offset],
            bytes[offset + 1],
            bytes[offset + 2],
            bytes[offset + 3],
        ])
    };

    let mut triangles = Vec::with_capacity(count);
    for i in 0..count {
        let base = 84 + i * 50 + 12; // skip the facet normal
        let mut tri = [Vec3::ZERO; 3];
        for (v, slot) in tri.iter_mut().enumerate() {
            let o = base + v * 12;
            *slot = Vec3::new(read_f32(o), read_f32(o + 4), read_f32(o + 8));
        }
        triangles.push(tri);
    }
    Ok(triangles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_mesh() -> Vec<Triangle> {
        // Two triangles forming a unit quad plus a far-away triangle.
        vec![
            [Vec3::ZERO, Vec3::X, Vec3::Y],
            [Vec3::X, Vec3::ONE.with_z(0.0), Vec3::Y],
            [
                Vec3::splat(10.0),
                Vec3::splat(10.0) + Vec3::X,
                Vec3::splat(10.0) + Vec3::Y,
            ],
        ]
    }

    #[test]
    fn payload_starts_with_kd_root() {
        let mut mesh = MeshResource::new(quad_mesh());
        let payload = mesh.build_payload();
        assert_eq!(
            payload.meta[0].primitive_type().unwrap(),
            PrimitiveType::MeshKdRootNode
        );
        assert_eq!(
            payload.meta.last().unwrap().primitive_type().unwrap(),
            PrimitiveType::MeshTriangles
        );
        // Triangles meta carries 9 floats per triangle.
        assert_eq!(payload.meta.last().unwrap().len(), 27);
    }

    #[test]
    fn empty_mesh_builds_empty_payload() {
        let mut mesh = MeshResource::new(Vec::new());
        let payload = mesh.build_payload();
        assert!(payload.meta.is_empty());
        assert!(payload.data.is_empty());
    }

    #[test]
    fn kd_split_happens_for_larger_meshes() {
        // 32 spread-out triangles force at least one split.
        let triangles: Vec<Triangle> = (0..32)
            .map(|i| {
                let base = Vec3::new(i as f32 * 3.0, 0.0, 0.0);
                [base, base + Vec3::X, base + Vec3::Y]
            })
            .collect();
        let mut mesh = MeshResource::new(triangles);
        let payload = mesh.build_payload();
        let node_count = payload
            .meta
            .iter()
            .filter(|m| {
                matches!(
                    m.primitive_type().unwrap(),
                    PrimitiveType::MeshKdRootNode | PrimitiveType::MeshKdNode
                )
            })
            .count();
        assert!(node_count >= 3, "expected a split, got {node_count} nodes");
    }

    #[test]
    fn stl_round_trip_through_payload() {
        use std::io::Write;

        let triangles = quad_mesh();
        let mut bytes = vec![0u8; 80];
        bytes.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
        for tri in &triangles {
            bytes.extend_from_slice(&[0u8; 12]); // normal
            for v in tri {
                bytes.extend_from_slice(&v.x.to_le_bytes());
                bytes.extend_from_slice(&v.y.to_le_bytes());
                bytes.extend_from_slice(&v.z.to_le_bytes());
            }
            bytes.extend_from_slice(&[0u8; 2]); // attribute count
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&bytes).unwrap();

        let mut stl = StlResource::new(file.path());
        let payload = stl.build_payload().unwrap();
        assert_eq!(payload.meta.last().unwrap().len(), 27);
    }

    #[test]
    fn truncated_stl_is_an_io_error() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0u8; 40]).unwrap();
        let mut stl = StlResource::new(file.path());
        assert!(matches!(
            stl.build_payload(),
            Err(ResourceError::IoError(_))
        ));
    }
}
