//! Little-endian binary layout of the drone graph section, exactly as the
//! level pipeline emits it:
//!
//! ```text
//! f32   chunk_size
//! Vec3  vmin
//! (i16, i16, i16) size
//! per chunk, row-major (x, y, z):
//!   i32 vertex_count
//!   Vec3[vertex_count] positions
//!   Vec3[vertex_count] normals
//!   { neighbors_len: u16, neighbors: Node[len], flags: u64 }[vertex_count]
//! ```

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use common::*;

use super::{Adjacency, Chunk, DroneGraph, NavNode, ADJACENCY_MAX};

/// Refuse to allocate for obviously corrupt counts
const MAX_CHUNK_VERTICES: i32 = 1 << 20;

#[derive(Debug, Error)]
pub enum GraphLoadError {
    #[error("Failed to read drone graph: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad vertex count {0}")]
    BadVertexCount(i32),

    #[error("Vertex has {0} neighbours, max is 8")]
    TooManyNeighbors(u16),

    #[error("Neighbour {neighbor:?} of {node:?} does not exist")]
    DanglingNeighbor { node: NavNode, neighbor: NavNode },
}

fn read_vec3(r: &mut impl Read) -> std::io::Result<Vec3> {
    let x = r.read_f32::<LittleEndian>()?;
    let y = r.read_f32::<LittleEndian>()?;
    let z = r.read_f32::<LittleEndian>()?;
    Ok(vec3(x, y, z))
}

fn write_vec3(w: &mut impl Write, v: Vec3) -> std::io::Result<()> {
    w.write_f32::<LittleEndian>(v.x)?;
    w.write_f32::<LittleEndian>(v.y)?;
    w.write_f32::<LittleEndian>(v.z)
}

pub fn read_graph(r: &mut impl Read) -> Result<DroneGraph, GraphLoadError> {
    let chunk_size = r.read_f32::<LittleEndian>()?;
    let vmin = read_vec3(r)?;
    let size = [
        r.read_i16::<LittleEndian>()?,
        r.read_i16::<LittleEndian>()?,
        r.read_i16::<LittleEndian>()?,
    ];

    let chunk_count = size.iter().map(|&s| s.max(0) as usize).product::<usize>();
    let mut graph = DroneGraph {
        chunk_size,
        vmin,
        size,
        chunks: Vec::with_capacity(chunk_count),
    };

    for _ in 0..chunk_count {
        let vertex_count = r.read_i32::<LittleEndian>()?;
        if !(0..MAX_CHUNK_VERTICES).contains(&vertex_count) {
            return Err(GraphLoadError::BadVertexCount(vertex_count));
        }
        let vertex_count = vertex_count as usize;

        let mut chunk = Chunk {
            vertices: Vec::with_capacity(vertex_count),
            normals: Vec::with_capacity(vertex_count),
            adjacency: Vec::with_capacity(vertex_count),
        };

        for _ in 0..vertex_count {
            chunk.vertices.push(read_vec3(r)?);
        }
        for _ in 0..vertex_count {
            chunk.normals.push(read_vec3(r)?);
        }
        for _ in 0..vertex_count {
            let len = r.read_u16::<LittleEndian>()?;
            if len as usize > ADJACENCY_MAX {
                return Err(GraphLoadError::TooManyNeighbors(len));
            }

            let mut adjacency = Adjacency::default();
            for _ in 0..len {
                let chunk_index = r.read_i16::<LittleEndian>()?;
                let vertex_index = r.read_i16::<LittleEndian>()?;
                adjacency.neighbors.push(NavNode {
                    chunk: chunk_index,
                    vertex: vertex_index,
                });
            }
            adjacency.flags = r.read_u64::<LittleEndian>()?;
            chunk.adjacency.push(adjacency);
        }

        graph.chunks.push(chunk);
    }

    validate(&graph)?;
    Ok(graph)
}

pub fn write_graph(graph: &DroneGraph, w: &mut impl Write) -> std::io::Result<()> {
    w.write_f32::<LittleEndian>(graph.chunk_size)?;
    write_vec3(w, graph.vmin)?;
    for &s in &graph.size {
        w.write_i16::<LittleEndian>(s)?;
    }

    for chunk in &graph.chunks {
        w.write_i32::<LittleEndian>(chunk.vertices.len() as i32)?;
        for &v in &chunk.vertices {
            write_vec3(w, v)?;
        }
        for &n in &chunk.normals {
            write_vec3(w, n)?;
        }
        for adjacency in &chunk.adjacency {
            w.write_u16::<LittleEndian>(adjacency.neighbors.len() as u16)?;
            for neighbor in &adjacency.neighbors {
                w.write_i16::<LittleEndian>(neighbor.chunk)?;
                w.write_i16::<LittleEndian>(neighbor.vertex)?;
            }
            w.write_u64::<LittleEndian>(adjacency.flags)?;
        }
    }

    Ok(())
}

fn validate(graph: &DroneGraph) -> Result<(), GraphLoadError> {
    for (chunk_index, chunk) in graph.chunks.iter().enumerate() {
        for (vertex_index, adjacency) in chunk.adjacency.iter().enumerate() {
            let node = NavNode {
                chunk: chunk_index as i16,
                vertex: vertex_index as i16,
            };
            for &neighbor in &adjacency.neighbors {
                if !graph.contains(neighbor) {
                    return Err(GraphLoadError::DanglingNeighbor { node, neighbor });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests::corridor;
    use super::*;

    #[test]
    fn round_trip_is_lossless() {
        let graph = corridor(5);

        let mut bytes = Vec::new();
        write_graph(&graph, &mut bytes).unwrap();

        let read = read_graph(&mut bytes.as_slice()).unwrap();
        assert_eq!(read.chunk_size, graph.chunk_size);
        assert_eq!(read.vmin, graph.vmin);
        assert_eq!(read.size, graph.size);
        assert_eq!(read.chunks.len(), graph.chunks.len());
        for (a, b) in read.chunks.iter().zip(&graph.chunks) {
            assert_eq!(a.vertices, b.vertices);
            assert_eq!(a.normals, b.normals);
            assert_eq!(a.adjacency, b.adjacency);
        }
    }

    #[test]
    fn dangling_neighbour_is_rejected() {
        let mut graph = corridor(3);
        graph.chunks[0].adjacency[0]
            .neighbors
            .push(NavNode { chunk: 0, vertex: 99 });

        let mut bytes = Vec::new();
        write_graph(&graph, &mut bytes).unwrap();

        assert!(matches!(
            read_graph(&mut bytes.as_slice()),
            Err(GraphLoadError::DanglingNeighbor { .. })
        ));
    }

    #[test]
    fn truncated_input_is_io_error() {
        let graph = corridor(3);
        let mut bytes = Vec::new();
        write_graph(&graph, &mut bytes).unwrap();
        bytes.truncate(bytes.len() / 2);

        assert!(matches!(
            read_graph(&mut bytes.as_slice()),
            Err(GraphLoadError::Io(_))
        ));
    }
}
