//! STL export and import — binary and ASCII variants.
//!
//! Binary layout: 80-byte header, u32 little-endian triangle count, then
//! 50 bytes per triangle (normal, three vertices, attribute word).

use geom_kernel::mesh::MeshBuilder;
use geom_kernel::{FaceInfo, RenderMesh, SolidBrep, SurfaceClass};

use crate::errors::FormatError;

fn validate_mesh(mesh: &RenderMesh) -> Result<usize, FormatError> {
    let tri_count = mesh.indices.len() / 3;
    if tri_count == 0 {
        return Err(FormatError::Export {
            reason: "mesh has no triangles".to_string(),
        });
    }
    let vertex_count = mesh.vertices.len() / 3;
    for &idx in &mesh.indices {
        if idx as usize >= vertex_count {
            return Err(FormatError::Export {
                reason: format!("index {idx} out of range (vertex count = {vertex_count})"),
            });
        }
    }
    Ok(tri_count)
}

fn triangle_normal(mesh: &RenderMesh, tri: &[u32]) -> (f32, f32, f32) {
    let i0 = tri[0] as usize * 3;
    let i1 = tri[1] as usize * 3;
    let i2 = tri[2] as usize * 3;
    let (ax, ay, az) = (
        mesh.vertices[i1] - mesh.vertices[i0],
        mesh.vertices[i1 + 1] - mesh.vertices[i0 + 1],
        mesh.vertices[i1 + 2] - mesh.vertices[i0 + 2],
    );
    let (bx, by, bz) = (
        mesh.vertices[i2] - mesh.vertices[i0],
        mesh.vertices[i2 + 1] - mesh.vertices[i0 + 1],
        mesh.vertices[i2 + 2] - mesh.vertices[i0 + 2],
    );
    let nx = ay * bz - az * by;
    let ny = az * bx - ax * bz;
    let nz = ax * by - ay * bx;
    let len = (nx * nx + ny * ny + nz * nz).sqrt();
    if len > 1e-12 {
        (nx / len, ny / len, nz / len)
    } else {
        (0.0, 0.0, 1.0)
    }
}

/// Export a mesh as binary STL.
pub fn export_binary_stl(mesh: &RenderMesh, name: &str) -> Result<Vec<u8>, FormatError> {
    let tri_count = validate_mesh(mesh)?;

    let mut buf = Vec::with_capacity(80 + 4 + tri_count * 50);
    let header = format!("binary STL: {name}");
    let header_bytes = header.as_bytes();
    buf.extend_from_slice(&header_bytes[..header_bytes.len().min(80)]);
    buf.resize(80, 0u8);
    buf.extend_from_slice(&(tri_count as u32).to_le_bytes());

    for tri in mesh.indices.chunks(3) {
        let (nx, ny, nz) = triangle_normal(mesh, tri);
        buf.extend_from_slice(&nx.to_le_bytes());
        buf.extend_from_slice(&ny.to_le_bytes());
        buf.extend_from_slice(&nz.to_le_bytes());
        for &idx in tri {
            let vi = idx as usize * 3;
            buf.extend_from_slice(&mesh.vertices[vi].to_le_bytes());
            buf.extend_from_slice(&mesh.vertices[vi + 1].to_le_bytes());
            buf.extend_from_slice(&mesh.vertices[vi + 2].to_le_bytes());
        }
        buf.extend_from_slice(&0u16.to_le_bytes());
    }
    Ok(buf)
}

/// Export a mesh as ASCII STL.
pub fn export_ascii_stl(mesh: &RenderMesh, name: &str) -> Result<String, FormatError> {
    let tri_count = validate_mesh(mesh)?;

    let mut out = String::with_capacity(tri_count * 300);
    out.push_str(&format!("solid {name}\n"));
    for tri in mesh.indices.chunks(3) {
        let (nx, ny, nz) = triangle_normal(mesh, tri);
        out.push_str(&format!("  facet normal {nx} {ny} {nz}\n"));
        out.push_str("    outer loop\n");
        for &idx in tri {
            let vi = idx as usize * 3;
            out.push_str(&format!(
                "      vertex {} {} {}\n",
                mesh.vertices[vi],
                mesh.vertices[vi + 1],
                mesh.vertices[vi + 2]
            ));
        }
        out.push_str("    endloop\n");
        out.push_str("  endfacet\n");
    }
    out.push_str(&format!("endsolid {name}\n"));
    Ok(out)
}

/// Parse STL bytes, auto-detecting ASCII vs binary. Returns triangle
/// vertex triples in file order.
pub fn import_stl(bytes: &[u8]) -> Result<Vec<[[f64; 3]; 3]>, FormatError> {
    if looks_ascii(bytes) {
        import_ascii(std::str::from_utf8(bytes).map_err(|e| FormatError::Import {
            reason: e.to_string(),
        })?)
    } else {
        import_binary(bytes)
    }
}

fn looks_ascii(bytes: &[u8]) -> bool {
    // Binary files can legally start with "solid" in the header, so also
    // require the facet keyword somewhere early.
    let head = &bytes[..bytes.len().min(1024)];
    let Ok(text) = std::str::from_utf8(head) else {
        return false;
    };
    text.trim_start().starts_with("solid") && text.contains("facet")
}

fn import_binary(bytes: &[u8]) -> Result<Vec<[[f64; 3]; 3]>, FormatError> {
    if bytes.len() < 84 {
        return Err(FormatError::Import {
            reason: "binary STL shorter than its header".to_string(),
        });
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    let expected = 84 + count * 50;
    if bytes.len() < expected {
        return Err(FormatError::Import {
            reason: format!(
                "binary STL truncated: {} bytes for {count} triangles",
                bytes.len()
            ),
        });
    }

    let mut out = Vec::with_capacity(count);
    for t in 0..count {
        let base = 84 + t * 50 + 12; // skip the stored normal
        let mut tri = [[0.0f64; 3]; 3];
        for (v, vertex) in tri.iter_mut().enumerate() {
            for (a, coord) in vertex.iter_mut().enumerate() {
                let off = base + (v * 3 + a) * 4;
                let raw = [
                    bytes[off],
                    bytes[off + 1],
                    bytes[off + 2],
                    bytes[off + 3],
                ];
                *coord = f32::from_le_bytes(raw) as f64;
            }
        }
        out.push(tri);
    }
    Ok(out)
}

fn import_ascii(text: &str) -> Result<Vec<[[f64; 3]; 3]>, FormatError> {
    let mut out = Vec::new();
    let mut current: Vec<[f64; 3]> = Vec::with_capacity(3);
    for line in text.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("vertex") {
            let coords: Vec<f64> = rest
                .split_whitespace()
                .map(|w| w.parse::<f64>())
                .collect::<Result<_, _>>()
                .map_err(|e| FormatError::Import {
                    reason: format!("bad vertex line `{line}`: {e}"),
                })?;
            if coords.len() != 3 {
                return Err(FormatError::Import {
                    reason: format!("vertex line `{line}` does not have three coordinates"),
                });
            }
            current.push([coords[0], coords[1], coords[2]]);
        } else if line.starts_with("endfacet") {
            if current.len() != 3 {
                return Err(FormatError::Import {
                    reason: format!("facet with {} vertices", current.len()),
                });
            }
            out.push([current[0], current[1], current[2]]);
            current.clear();
        }
    }
    if out.is_empty() {
        return Err(FormatError::Import {
            reason: "no facets found".to_string(),
        });
    }
    Ok(out)
}

/// Weld an imported triangle soup into a brep with one freeform face.
pub fn solid_from_triangles(triangles: &[[[f64; 3]; 3]]) -> SolidBrep {
    let mut builder = MeshBuilder::new();
    for tri in triangles {
        builder.triangle(tri[0], tri[1], tri[2], 0);
    }
    builder.finish(vec![FaceInfo {
        surface: SurfaceClass::Freeform,
    }])
}

#[cfg(test)]
mod tests {
    use super::*;
    use geom_kernel::{mesh, Kernel, NativeKernel, PrimitiveSpec};

    fn box_mesh() -> (SolidBrep, RenderMesh) {
        let kernel = NativeKernel::default();
        let solid = kernel
            .primitive_brep(&PrimitiveSpec::Box {
                corner: [0.0, 0.0, 0.0],
                dimensions: [2.0, 3.0, 4.0],
            })
            .unwrap();
        let mesh = kernel.tessellate(&solid, 0.1, 0.3);
        (solid, mesh)
    }

    #[test]
    fn binary_round_trip_preserves_volume() {
        let (solid, mesh) = box_mesh();
        let bytes = export_binary_stl(&mesh, "box").unwrap();
        assert_eq!(bytes.len(), 80 + 4 + 12 * 50);

        let triangles = import_stl(&bytes).unwrap();
        assert_eq!(triangles.len(), 12);
        let rebuilt = solid_from_triangles(&triangles);
        let v0 = mesh::signed_volume(&solid);
        let v1 = mesh::signed_volume(&rebuilt);
        assert!((v0 - v1).abs() < 1e-3, "{v0} vs {v1}");
    }

    #[test]
    fn ascii_round_trip() {
        let (_solid, mesh) = box_mesh();
        let text = export_ascii_stl(&mesh, "box").unwrap();
        assert!(text.starts_with("solid box"));
        assert!(text.trim_end().ends_with("endsolid box"));

        let triangles = import_stl(text.as_bytes()).unwrap();
        assert_eq!(triangles.len(), 12);
        let rebuilt = solid_from_triangles(&triangles);
        assert!((mesh::signed_volume(&rebuilt) - 24.0).abs() < 1e-3);
    }

    #[test]
    fn empty_mesh_rejected() {
        let mesh = RenderMesh::default();
        assert!(matches!(
            export_binary_stl(&mesh, "x"),
            Err(FormatError::Export { .. })
        ));
    }

    #[test]
    fn truncated_binary_rejected() {
        let (_solid, mesh) = box_mesh();
        let mut bytes = export_binary_stl(&mesh, "box").unwrap();
        bytes.truncate(200);
        assert!(matches!(
            import_stl(&bytes),
            Err(FormatError::Import { .. })
        ));
    }

    #[test]
    fn imported_box_validates_closed() {
        let (_solid, mesh) = box_mesh();
        let bytes = export_binary_stl(&mesh, "box").unwrap();
        let rebuilt = solid_from_triangles(&import_stl(&bytes).unwrap());
        let kernel = NativeKernel::default();
        let report = kernel.validate(&rebuilt);
        assert!(report.is_closed, "{:?}", report.messages);
        assert!(report.is_manifold);
    }
}
