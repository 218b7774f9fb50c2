//! Ray queries against the surface of a model mesh.
//!
//! The contour algorithm only sees [`SurfaceQuery`]. [`MeshScene`] is the implementation used for
//! real runs: an STL mesh placed where the slicer put the object, with a planar kd-tree so the
//! vertical rays that contouring casts only test triangles near the ray.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use kiddo::SquaredEuclidean;
use ordered_float::OrderedFloat;
use rand::Rng;
use regex::Regex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::geometry::{Point, Vec3};
use crate::{Mm, TriangleIndex};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Point,
    // unit length, so hit distances are in mm
    pub direction: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub distance: Mm,
    pub normal: Vec3,
}

pub trait SurfaceQuery {
    /// One result per ray, in order. `None` is a miss.
    fn cast(&self, rays: &[Ray]) -> Vec<Option<RayHit>>;
}

/// Turns an `EXCLUDE_OBJECT_DEFINE` into a queryable surface.
pub trait SurfaceLoader {
    fn load(&mut self, name: &str, center: (Mm, Mm)) -> Result<Box<dyn SurfaceQuery>>;
}

/// Loads `<model_dir>/<name>.stl` meshes, where the slicer's per-instance suffix on the object
/// name (`cube.stl_id_0_copy_0`) is dropped.
pub struct StlLoader {
    model_dir: PathBuf,
    instance_suffix: Regex,
}

impl StlLoader {
    pub fn new(model_dir: impl Into<PathBuf>) -> StlLoader {
        StlLoader {
            model_dir: model_dir.into(),
            instance_suffix: Regex::new(r"\.stl_.*$").expect("static regex"),
        }
    }

    pub fn mesh_path(&self, name: &str) -> PathBuf {
        let file_name = self.instance_suffix.replace(name, ".stl");
        self.model_dir.join(&*file_name)
    }
}

impl SurfaceLoader for StlLoader {
    fn load(&mut self, name: &str, center: (Mm, Mm)) -> Result<Box<dyn SurfaceQuery>> {
        let path = self.mesh_path(name);
        Ok(Box::new(MeshScene::build(&path, center)?))
    }
}

type KdTree = kiddo::float::kdtree::KdTree<Mm, TriangleIndex, 2, 32, u32>;

// Every point of an indexed triangle is within this planar distance of one of its kd-tree
// samples. Smaller means more samples per triangle; larger means more candidate triangles per
// query. Contouring casts rays every ~0.1mm, and slicer-facing meshes are usually finer than
// this, so most triangles only need their corners and centroid-ish samples.
const MAX_SAMPLE_SPACING: Mm = 1.0;
// Many samples share an exact coordinate on axis-aligned meshes, which the kd-tree buckets don't
// tolerate, so each sample is jittered by up to this much and queries are widened to match.
const KD_TREE_FUDGE_RADIUS: Mm = 0.01;
const KD_TREE_FUDGE_PER_COMPONENT: Mm = KD_TREE_FUDGE_RADIUS * std::f64::consts::FRAC_1_SQRT_2;
const QUERY_RADIUS: Mm = MAX_SAMPLE_SPACING + KD_TREE_FUDGE_RADIUS;

// Möller–Trumbore tolerances.
const PARALLEL_EPSILON: Mm = 1e-12;
const MIN_HIT_DISTANCE: Mm = 1e-9;

#[derive(Debug, Clone, Copy)]
struct Triangle {
    v0: Point,
    v1: Point,
    v2: Point,
}

impl Triangle {
    // Outward for the usual counter-clockwise STL winding.
    fn normal(&self) -> Vec3 {
        let n = (self.v1 - self.v0).cross(self.v2 - self.v0);
        n / n.norm()
    }

    fn planar_area_x2(&self) -> Mm {
        (self.v1 - self.v0).cross(self.v2 - self.v0).z.abs()
    }

    fn intersect(&self, ray: &Ray) -> Option<Mm> {
        let edge1 = self.v1 - self.v0;
        let edge2 = self.v2 - self.v0;
        let h = ray.direction.cross(edge2);
        let a = edge1.dot(h);
        if a.abs() < PARALLEL_EPSILON {
            return None;
        }
        let f = 1.0 / a;
        let s = ray.origin - self.v0;
        let u = f * s.dot(h);
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(edge1);
        let v = f * ray.direction.dot(q);
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = f * edge2.dot(q);
        (t > MIN_HIT_DISTANCE).then_some(t)
    }
}

pub struct MeshScene {
    triangles: Vec<Triangle>,
    kd_tree: KdTree,
}

fn kd_fudge() -> Mm {
    rand::thread_rng().gen::<Mm>() * KD_TREE_FUDGE_PER_COMPONENT
}

impl MeshScene {
    /// Loads an STL and moves it so its bounding box is centered on `center` in xy and its
    /// lowest point sits on z = 0, which is how the slicer placed it on the bed.
    pub fn build(path: &Path, center: (Mm, Mm)) -> Result<MeshScene> {
        let mut file = fs::File::open(path).map_err(|source| Error::MeshLoad {
            path: path.to_owned(),
            source,
        })?;
        let stl = stl_io::read_stl(&mut file).map_err(|source| Error::MeshLoad {
            path: path.to_owned(),
            source,
        })?;
        let vertex = |i: usize| {
            let v = &stl.vertices[i];
            Point::new(v[0] as Mm, v[1] as Mm, v[2] as Mm)
        };
        let triangles: Vec<Triangle> = stl
            .faces
            .iter()
            .map(|face| Triangle {
                v0: vertex(face.vertices[0]),
                v1: vertex(face.vertices[1]),
                v2: vertex(face.vertices[2]),
            })
            .collect();
        if triangles.is_empty() {
            return Err(Error::EmptyMesh { path: path.to_owned() });
        }
        let scene = MeshScene::from_triangles(triangles, center);
        debug!(
            path = %path.display(),
            triangles = scene.triangles.len(),
            kd_tree_samples = scene.kd_tree.size(),
            "built surface query handle"
        );
        Ok(scene)
    }

    fn from_triangles(mut triangles: Vec<Triangle>, center: (Mm, Mm)) -> MeshScene {
        let mut min = Point::new(Mm::INFINITY, Mm::INFINITY, Mm::INFINITY);
        let mut max = Point::new(Mm::NEG_INFINITY, Mm::NEG_INFINITY, Mm::NEG_INFINITY);
        for v in triangles.iter().flat_map(|t| [t.v0, t.v1, t.v2]) {
            min = Point::new(min.x.min(v.x), min.y.min(v.y), min.z.min(v.z));
            max = Point::new(max.x.max(v.x), max.y.max(v.y), max.z.max(v.z));
        }
        let translation = Vec3::new(
            center.0 - (min.x + max.x) / 2.0,
            center.1 - (min.y + max.y) / 2.0,
            -min.z,
        );
        for t in &mut triangles {
            t.v0 += translation;
            t.v1 += translation;
            t.v2 += translation;
        }

        let mut kd_tree = KdTree::new();
        for (index, t) in triangles.iter().enumerate() {
            // Walls can't be hit by a vertical ray, so they don't need to be found by one.
            if t.planar_area_x2() < PARALLEL_EPSILON {
                continue;
            }
            let edge1 = t.v1 - t.v0;
            let edge2 = t.v2 - t.v0;
            let longest = [edge1, edge2, t.v2 - t.v1]
                .iter()
                .map(|e| (e.x * e.x + e.y * e.y).sqrt())
                .fold(0.0, Mm::max);
            let n = (longest / MAX_SAMPLE_SPACING).ceil().max(1.0) as u32;
            for i in 0..=n {
                for j in 0..=(n - i) {
                    let p = t.v0 + edge1 * (i as Mm / n as Mm) + edge2 * (j as Mm / n as Mm);
                    kd_tree.add(&[p.x + kd_fudge(), p.y + kd_fudge()], index as TriangleIndex);
                }
            }
        }

        MeshScene { triangles, kd_tree }
    }

    fn candidates(&self, ray: &Ray) -> Vec<TriangleIndex> {
        if !ray.direction.is_vertical() {
            return (0..self.triangles.len() as TriangleIndex).collect();
        }
        let query = [ray.origin.x, ray.origin.y];
        let mut seen: HashSet<TriangleIndex> = HashSet::new();
        self.kd_tree
            .within_unsorted::<SquaredEuclidean>(&query, QUERY_RADIUS * QUERY_RADIUS)
            .iter()
            .map(|neighbour| neighbour.item)
            .filter(|item| seen.insert(*item))
            .collect()
    }

    fn cast_one(&self, ray: &Ray) -> Option<RayHit> {
        self.candidates(ray)
            .into_iter()
            .filter_map(|index| {
                let t = &self.triangles[index as usize];
                t.intersect(ray).map(|distance| RayHit {
                    distance,
                    normal: t.normal(),
                })
            })
            .min_by_key(|hit| OrderedFloat(hit.distance))
    }
}

impl SurfaceQuery for MeshScene {
    fn cast(&self, rays: &[Ray]) -> Vec<Option<RayHit>> {
        rays.iter().map(|ray| self.cast_one(ray)).collect()
    }
}
