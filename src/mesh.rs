use crate::error::Error;
use crate::geometry::{distance_to_segment, Point};
use std::collections::BTreeMap;

/// Offset between the mesh's local coordinate system and absolute
/// coordinates. Kept small on purpose; projection handling belongs to the
/// preprocessing layer.
#[derive(Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Georeference {
    pub xllcorner: f64,
    pub yllcorner: f64,
}

impl Georeference {
    pub fn to_absolute(&self, p: Point) -> Point {
        Point::new(p.x + self.xllcorner, p.y + self.yllcorner)
    }
}

/// Optional inputs to [`Mesh::new`].
#[derive(Default)]
pub struct MeshOptions {
    /// Tags for boundary edges, keyed by `(cell, edge)`. Boundary edges not
    /// listed here receive the tag `"exterior"`.
    pub boundary: BTreeMap<(usize, usize), String>,

    /// Named groups of cells, for region-based assignment.
    pub tagged_elements: BTreeMap<String, Vec<usize>>,

    pub georeference: Georeference,

    /// In a parallel decomposition, the count of cells owned by this process.
    /// Full cells are stored before ghost cells. Defaults to all cells.
    pub number_of_full_triangles: Option<usize>,

    /// Like `number_of_full_triangles`, for nodes.
    pub number_of_full_nodes: Option<usize>,
}

/// A 2-D unstructured triangular mesh: node coordinates, cell connectivity,
/// derived geometry, and the boundary-edge tag map.
///
/// Edge `i` of a triangle is the edge opposite vertex `i`; it connects the
/// triangle's vertices `(i + 1) % 3` and `(i + 2) % 3`. Triangles must be
/// given counterclockwise. A neighbour entry of `-1` marks an unbound
/// boundary edge; after boundary binding, `-(k + 1)` points at slot `k` of
/// the domain's boundary-object list.
pub struct Mesh {
    points: Vec<Point>,
    triangles: Vec<[usize; 3]>,
    neighbours: Vec<[i64; 3]>,
    neighbour_edges: Vec<[usize; 3]>,
    surrogate_neighbours: Vec<[usize; 3]>,
    normals: Vec<[Point; 3]>,
    edgelengths: Vec<[f64; 3]>,
    areas: Vec<f64>,
    radii: Vec<f64>,
    centroids: Vec<Point>,
    boundary: BTreeMap<(usize, usize), String>,
    tagged_elements: BTreeMap<String, Vec<usize>>,
    georeference: Georeference,
    number_of_full_triangles: usize,
    number_of_full_nodes: usize,
}

pub const DEFAULT_BOUNDARY_TAG: &str = "exterior";

impl Mesh {
    pub fn new(
        points: Vec<Point>,
        triangles: Vec<[usize; 3]>,
        options: MeshOptions,
    ) -> Result<Self, Error> {
        let n = triangles.len();

        for (k, tri) in triangles.iter().enumerate() {
            for &v in tri {
                if v >= points.len() {
                    return Err(Error::MeshIntegrity(format!(
                        "triangle {} refers to node {} but there are only {} nodes",
                        k,
                        v,
                        points.len()
                    )));
                }
            }
        }

        let mut centroids = Vec::with_capacity(n);
        let mut areas = Vec::with_capacity(n);
        let mut edgelengths = Vec::with_capacity(n);
        let mut normals = Vec::with_capacity(n);
        let mut radii = Vec::with_capacity(n);

        for (k, &[a, b, c]) in triangles.iter().enumerate() {
            let (pa, pb, pc) = (points[a], points[b], points[c]);
            let area = 0.5 * (pb - pa).cross(pc - pa);

            if area <= 0.0 {
                return Err(Error::MeshIntegrity(format!(
                    "triangle {} is degenerate or clockwise (signed area {})",
                    k, area
                )));
            }

            let centroid = (pa + pb + pc) * (1.0 / 3.0);
            let corners = [pa, pb, pc];

            let mut lengths = [0.0; 3];
            let mut norms = [Point::default(); 3];
            let mut radius = f64::INFINITY;

            for i in 0..3 {
                let u = corners[(i + 1) % 3];
                let v = corners[(i + 2) % 3];
                let e = v - u;
                let len = e.norm();

                lengths[i] = len;
                // Interior lies to the left of u -> v, so the outward unit
                // normal is the right-hand rotation of the edge vector.
                norms[i] = Point::new(e.y / len, -e.x / len);
                radius = radius.min(distance_to_segment(centroid, u, v));
            }

            centroids.push(centroid);
            areas.push(area);
            edgelengths.push(lengths);
            normals.push(norms);
            radii.push(radius);
        }

        // Pair up edges shared by two triangles.
        let mut edge_owner: BTreeMap<(usize, usize), (usize, usize)> = BTreeMap::new();
        let mut neighbours = vec![[-1i64; 3]; n];
        let mut neighbour_edges = vec![[0usize; 3]; n];

        for (k, &[a, b, c]) in triangles.iter().enumerate() {
            let verts = [a, b, c];
            for i in 0..3 {
                let u = verts[(i + 1) % 3];
                let v = verts[(i + 2) % 3];
                let key = (u.min(v), u.max(v));

                match edge_owner.remove(&key) {
                    Some((other, other_edge)) => {
                        neighbours[k][i] = other as i64;
                        neighbours[other][other_edge] = k as i64;
                        neighbour_edges[k][i] = other_edge;
                        neighbour_edges[other][other_edge] = i;
                    }
                    None => {
                        edge_owner.insert(key, (k, i));
                    }
                }
            }
        }

        let surrogate_neighbours = neighbours
            .iter()
            .enumerate()
            .map(|(k, row)| {
                let mut s = [k; 3];
                for i in 0..3 {
                    if row[i] >= 0 {
                        s[i] = row[i] as usize;
                    }
                }
                s
            })
            .collect();

        // Tag every unbound boundary edge; caller-provided tags win.
        let mut boundary = options.boundary;
        for (k, row) in neighbours.iter().enumerate() {
            for i in 0..3 {
                if row[i] < 0 {
                    boundary
                        .entry((k, i))
                        .or_insert_with(|| DEFAULT_BOUNDARY_TAG.to_string());
                }
            }
        }

        for &(k, i) in boundary.keys() {
            if k >= n || i >= 3 {
                return Err(Error::MeshIntegrity(format!(
                    "boundary tag on ({}, {}) refers outside the mesh",
                    k, i
                )));
            }
        }

        let number_of_full_triangles = options.number_of_full_triangles.unwrap_or(n);
        let number_of_full_nodes = options.number_of_full_nodes.unwrap_or(points.len());

        Ok(Self {
            points,
            triangles,
            neighbours,
            neighbour_edges,
            surrogate_neighbours,
            normals,
            edgelengths,
            areas,
            radii,
            centroids,
            boundary,
            tagged_elements: options.tagged_elements,
            georeference: options.georeference,
            number_of_full_triangles,
            number_of_full_nodes,
        })
    }

    pub fn number_of_triangles(&self) -> usize {
        self.triangles.len()
    }

    pub fn number_of_nodes(&self) -> usize {
        self.points.len()
    }

    pub fn number_of_full_triangles(&self) -> usize {
        self.number_of_full_triangles
    }

    pub fn number_of_full_nodes(&self) -> usize {
        self.number_of_full_nodes
    }

    pub fn set_number_of_full_triangles(&mut self, n: usize) {
        self.number_of_full_triangles = n;
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn neighbour(&self, cell: usize, edge: usize) -> i64 {
        self.neighbours[cell][edge]
    }

    pub fn set_neighbour(&mut self, cell: usize, edge: usize, value: i64) {
        self.neighbours[cell][edge] = value;
    }

    pub fn neighbour_edge(&self, cell: usize, edge: usize) -> usize {
        self.neighbour_edges[cell][edge]
    }

    pub fn surrogate_neighbours(&self, cell: usize) -> [usize; 3] {
        self.surrogate_neighbours[cell]
    }

    pub fn normal(&self, cell: usize, edge: usize) -> Point {
        self.normals[cell][edge]
    }

    pub fn edgelength(&self, cell: usize, edge: usize) -> f64 {
        self.edgelengths[cell][edge]
    }

    pub fn area(&self, cell: usize) -> f64 {
        self.areas[cell]
    }

    pub fn areas(&self) -> &[f64] {
        &self.areas
    }

    pub fn radius(&self, cell: usize) -> f64 {
        self.radii[cell]
    }

    pub fn radii(&self) -> &[f64] {
        &self.radii
    }

    pub fn centroid(&self, cell: usize) -> Point {
        self.centroids[cell]
    }

    /// Centroid coordinates of every cell, optionally shifted into absolute
    /// coordinates by the georeference.
    pub fn centroid_coordinates(&self, absolute: bool) -> Vec<Point> {
        self.centroids
            .iter()
            .map(|&c| {
                if absolute {
                    self.georeference.to_absolute(c)
                } else {
                    c
                }
            })
            .collect()
    }

    pub fn vertex_coordinates(&self, cell: usize) -> [Point; 3] {
        let [a, b, c] = self.triangles[cell];
        [self.points[a], self.points[b], self.points[c]]
    }

    /// Midpoint of edge `edge` of cell `cell`.
    pub fn edge_midpoint(&self, cell: usize, edge: usize) -> Point {
        let corners = self.vertex_coordinates(cell);
        (corners[(edge + 1) % 3] + corners[(edge + 2) % 3]) * 0.5
    }

    /// Boundary-edge tag map in ascending `(cell, edge)` order.
    pub fn boundary(&self) -> &BTreeMap<(usize, usize), String> {
        &self.boundary
    }

    /// Sorted unique tags present on the boundary.
    pub fn boundary_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.boundary.values().cloned().collect();
        tags.sort();
        tags.dedup();
        tags
    }

    pub fn tagged_elements(&self) -> &BTreeMap<String, Vec<usize>> {
        &self.tagged_elements
    }

    pub fn georeference(&self) -> Georeference {
        self.georeference
    }

    pub fn set_georeference(&mut self, georeference: Georeference) {
        self.georeference = georeference;
    }

    /// Verify neighbour symmetry and geometric sanity. Boundary binding may
    /// legitimately have rewritten boundary-edge neighbour entries to
    /// negative slot indices; those are skipped here.
    pub fn check_integrity(&self) -> Result<(), Error> {
        for (k, row) in self.neighbours.iter().enumerate() {
            for i in 0..3 {
                let other = row[i];
                if other >= 0 {
                    let other = other as usize;
                    let back = self.neighbours[other][self.neighbour_edges[k][i]];
                    // An internal boundary may have severed the other side.
                    if back != k as i64 && back >= 0 {
                        return Err(Error::MeshIntegrity(format!(
                            "neighbour structure is asymmetric between cells {} and {}",
                            k, other
                        )));
                    }
                } else if !self.boundary.contains_key(&(k, i)) {
                    return Err(Error::MeshIntegrity(format!(
                        "edge ({}, {}) has no neighbour and no boundary tag",
                        k, i
                    )));
                }
            }
        }

        for (k, &area) in self.areas.iter().enumerate() {
            if !(area > 0.0) {
                return Err(Error::MeshIntegrity(format!(
                    "triangle {} has non-positive area {}",
                    k, area
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::{Mesh, MeshOptions};
    use crate::geometry::Point;
    use std::collections::BTreeMap;

    /// Two triangles tiling the unit square, diagonal from (0,0) to (1,1).
    pub fn unit_square_mesh() -> Mesh {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(0.0, 1.0),
        ];
        let triangles = vec![[0, 1, 2], [0, 2, 3]];
        Mesh::new(points, triangles, MeshOptions::default()).unwrap()
    }

    #[test]
    fn geometry_of_unit_square_pair() {
        let mesh = unit_square_mesh();

        assert_eq!(mesh.number_of_triangles(), 2);
        assert!((mesh.area(0) - 0.5).abs() < 1e-12);
        assert!((mesh.area(1) - 0.5).abs() < 1e-12);

        // The shared diagonal (0,0)-(1,1) is edge 1 of triangle 0 and edge 2
        // of triangle 1.
        assert_eq!(mesh.neighbour(0, 1), 1);
        assert_eq!(mesh.neighbour(1, 2), 0);
        assert_eq!(mesh.neighbour_edge(0, 1), 2);
        assert_eq!(mesh.neighbour_edge(1, 2), 1);

        // Remaining four edges lie on the square's boundary.
        assert_eq!(mesh.boundary().len(), 4);
        assert_eq!(mesh.boundary_tags(), vec!["exterior".to_string()]);

        mesh.check_integrity().unwrap();
    }

    #[test]
    fn outward_normals_are_unit_and_outward() {
        let mesh = unit_square_mesh();

        for cell in 0..2 {
            let centroid = mesh.centroid(cell);
            for edge in 0..3 {
                let n = mesh.normal(cell, edge);
                assert!((n.norm() - 1.0).abs() < 1e-12);

                let outward = mesh.edge_midpoint(cell, edge) - centroid;
                assert!(n.dot(outward) > 0.0);
            }
        }
    }

    #[test]
    fn clockwise_triangle_is_rejected() {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
        ];
        assert!(Mesh::new(points, vec![[0, 2, 1]], MeshOptions::default()).is_err());
    }

    #[test]
    fn caller_tags_override_default() {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
        ];
        let mut boundary = BTreeMap::new();
        boundary.insert((0usize, 0usize), "wall".to_string());

        let mesh = Mesh::new(
            points,
            vec![[0, 1, 2]],
            MeshOptions {
                boundary,
                ..MeshOptions::default()
            },
        )
        .unwrap();

        assert_eq!(mesh.boundary().get(&(0, 0)).unwrap(), "wall");
        assert_eq!(mesh.boundary().get(&(0, 1)).unwrap(), "exterior");
        assert_eq!(
            mesh.boundary_tags(),
            vec!["exterior".to_string(), "wall".to_string()]
        );
    }

    #[test]
    fn radius_is_distance_to_nearest_edge() {
        let points = vec![
            Point::new(0.0, 0.0),
            Point::new(1.0, 0.0),
            Point::new(0.0, 1.0),
        ];
        let mesh = Mesh::new(points, vec![[0, 1, 2]], MeshOptions::default()).unwrap();

        let c = mesh.centroid(0);
        let expected = (c.x).min(c.y); // distance to the two axis-aligned legs
        assert!((mesh.radius(0) - expected.min((1.0 - c.x - c.y) / 2f64.sqrt())).abs() < 1e-12);
    }
}
