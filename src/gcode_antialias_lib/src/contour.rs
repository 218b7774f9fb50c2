//! Surface contouring of a single extrusion move.
//!
//! A move printed on a flat slice plane leaves a stair step wherever the real model surface
//! passes between two slice planes. Splitting the move into short segments and nudging each one
//! toward the real surface (by at most half a layer) smooths the steps out, and rescaling each
//! segment's flow by the changed gap keeps the extruded volume about right.

use crate::error::{Error, Result};
use crate::extrusion::Extrusion;
use crate::geometry::{Point, Vec3};
use crate::surface::{Ray, RayHit, SurfaceQuery};
use crate::{Factor, Mm};

pub const DEFAULT_RESOLUTION: Mm = 0.1;
pub const LEGACY_RESOLUTION: Mm = 0.4;
// Below this a single move turns into more samples than are worth casting rays for.
pub const MIN_RESOLUTION: Mm = 0.001;

/// Tuning knobs of the contouring blend. The defaults were picked by printing test parts, not
/// derived, so change them only with prints to back it up.
#[derive(Debug, Clone, PartialEq)]
pub struct ContourConfig {
    /// Max length of one contoured segment.
    pub resolution: Mm,
    /// How far above the path (as a fraction of layer height) an upward hit still counts.
    pub extra_z_factor: Factor,
    /// Upward hits whose normal has a smaller z component are treated as walls.
    pub steep_normal_z: Factor,
    /// Slack on the half-layer limit for surfaces found below the path.
    pub down_epsilon: Mm,
    /// Fraction of the line width that a sloped surface may rise across and still be covered.
    pub coverage_width_factor: Factor,
    /// Offsets smaller than this are rounding noise from single-precision meshes.
    pub min_offset: Mm,
    /// Samples with y below this stay at nominal z, splitting a test print into a contoured half
    /// and a plain half for comparison.
    pub demo_split_y: Option<Mm>,
}

impl Default for ContourConfig {
    fn default() -> Self {
        ContourConfig {
            resolution: DEFAULT_RESOLUTION,
            extra_z_factor: 0.75,
            steep_normal_z: 0.1,
            down_epsilon: 0.005,
            coverage_width_factor: 0.5,
            min_offset: 1e-4,
            demo_split_y: None,
        }
    }
}

impl ContourConfig {
    pub fn validate(&self) -> Result<()> {
        // also rejects NaN
        if !(self.resolution >= MIN_RESOLUTION && self.resolution.is_finite()) {
            return Err(Error::InvalidResolution {
                resolution: self.resolution,
                min: MIN_RESOLUTION,
            });
        }
        Ok(())
    }
}

/// The slice plane a move was planned on, as reported by the slicer.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Layer {
    pub z: Mm,
    pub height: Mm,
    pub width: Mm,
}

/// Splits `extrusion` into segments that follow `surface`.
///
/// The result is only worth using if some segment ended up off the nominal z; the caller checks.
pub fn contour_z(
    extrusion: &Extrusion,
    surface: &dyn SurfaceQuery,
    layer: &Layer,
    ironing_line: bool,
    config: &ContourConfig,
) -> Result<Vec<Extrusion>> {
    config.validate()?;
    if extrusion.relative {
        return Err(Error::RelativeContour);
    }
    let e = match extrusion.e {
        Some(e) if e != 0.0 => e,
        _ => return Err(Error::MissingFlow),
    };

    let target = extrusion.pos();
    let origin = Point::new(extrusion.origin.x, extrusion.origin.y, layer.z);
    let planar = Vec3::new(target.x - origin.x, target.y - origin.y, 0.0);
    let planar_length = planar.norm();
    if planar_length == 0.0 {
        return Ok(vec![]);
    }

    let num_segments = (planar_length / config.resolution).ceil().max(1.0) as usize;
    let samples: Vec<Point> = (0..=num_segments)
        .map(|i| origin + planar * (i as Factor / num_segments as Factor))
        .collect();
    let rays: Vec<Ray> = samples
        .iter()
        .flat_map(|&p| {
            [
                Ray { origin: p, direction: Vec3::UP },
                Ray { origin: p, direction: Vec3::DOWN },
            ]
        })
        .collect();
    let hits = surface.cast(&rays);

    let extrusion_rate = e / planar_length;

    let mut segments: Vec<Extrusion> = vec![];
    let mut p = origin;
    for (i, sample) in samples.iter().enumerate() {
        let up = hits.get(2 * i).copied().flatten();
        let down = hits.get(2 * i + 1).copied().flatten();
        let offset = surface_offset(up, down, layer, config);
        let demo_split = config.demo_split_y.is_some_and(|y| sample.y < y);

        let mut segment = Extrusion {
            origin: p,
            x: Some(sample.x),
            y: Some(sample.y),
            z: Some(if demo_split { layer.z } else { layer.z + offset }),
            e: None,
            f: extrusion.f,
            relative: false,
            meta: format!("o={:.3}", offset),
        };
        if segment.length() == 0.0 {
            continue;
        }

        // The first sample is the start of the move; reaching it only sets the height.
        if i != 0 {
            let height_ratio = if ironing_line || demo_split {
                1.0
            } else {
                (layer.height + offset) / layer.height
            };
            let flow = extrusion_rate * segment.length() * height_ratio;
            segment.e = Some(flow.max(0.0));
            segment.meta = format!("{} h={:.3}", segment.meta, layer.height * height_ratio);
        }

        p = segment.pos();
        match segments.pop() {
            Some(last) if can_merge(&last, &segment) => {
                segments.push(merge_segments(last, segment));
            }
            Some(last) => {
                segments.push(last);
                segments.push(segment);
            }
            None => segments.push(segment),
        }
    }

    Ok(segments)
}

/// Two consecutive segments can be printed as one if both extrude and together they are still a
/// straight line, which (since all samples are collinear in xy) means both stay at one z.
pub fn can_merge(prev: &Extrusion, next: &Extrusion) -> bool {
    prev.e.is_some()
        && next.e.is_some()
        && prev.z == next.z
        && next.z == Some(prev.origin.z)
}

/// Replaces `prev` and `next` by a single segment ending where `next` ends.
pub fn merge_segments(prev: Extrusion, next: Extrusion) -> Extrusion {
    let e = match (prev.e, next.e) {
        (Some(a), Some(b)) => Some(a + b),
        (a, b) => a.or(b),
    };
    Extrusion {
        origin: prev.origin,
        e,
        meta: format!("{} {}", prev.meta, next.meta),
        ..next
    }
}

/// How far to move one sample off the nominal z, given what's straight above and below it.
pub(crate) fn surface_offset(
    up: Option<RayHit>,
    down: Option<RayHit>,
    layer: &Layer,
    config: &ContourConfig,
) -> Mm {
    let half_height = layer.height / 2.0;
    let extra_z = layer.height * config.extra_z_factor;

    // Top surface above the path, seen from inside the part.
    let up = up.filter(|hit| hit.distance <= extra_z && hit.normal.z > 0.0);
    // Top surface below the path, i.e. the path pokes out above the part.
    let down_qualifies = down.is_some_and(|hit| hit.normal.z > config.steep_normal_z);

    let use_up = match (up, down) {
        (Some(u), Some(d)) => u.distance <= d.distance || !down_qualifies,
        (Some(_), None) => true,
        (None, _) => false,
    };

    let offset = match (up, down) {
        (Some(hit), _) if use_up => {
            if hit.distance > half_height || hit.normal.z < config.steep_normal_z {
                0.0
            } else {
                hit.distance * coverage_blend(hit, layer, config)
            }
        }
        (_, Some(hit)) if down_qualifies && hit.distance <= half_height + config.down_epsilon => {
            (-hit.distance).max(-half_height)
        }
        _ => 0.0,
    };

    if offset.abs() < config.min_offset {
        0.0
    } else {
        offset
    }
}

// A bead of width w laid on a slope already covers a rise of about w/2 * tan(slope) across its
// half width, so the farther the surface is relative to that, the less the path should chase it.
// Flat surfaces get the full offset; the blend goes linearly to 0 at the coverage limit.
fn coverage_blend(hit: RayHit, layer: &Layer, config: &ContourConfig) -> Factor {
    let nz = hit.normal.z.min(1.0);
    let tan_slope = (1.0 - nz * nz).max(0.0).sqrt() / nz;
    if tan_slope == 0.0 {
        return 1.0;
    }
    let coverage = config.coverage_width_factor * layer.width / tan_slope;
    if coverage <= 0.0 {
        return 0.0;
    }
    (1.0 - hit.distance / coverage).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Infinite horizontal top surface at `top`, solid below it.
    struct Flat {
        top: Mm,
    }

    impl SurfaceQuery for Flat {
        fn cast(&self, rays: &[Ray]) -> Vec<Option<RayHit>> {
            rays.iter()
                .map(|r| {
                    let distance = (self.top - r.origin.z) * r.direction.z;
                    (distance > 0.0).then_some(RayHit { distance, normal: Vec3::UP })
                })
                .collect()
        }
    }

    /// Same hits for every sample.
    struct Fixed {
        up: Option<RayHit>,
        down: Option<RayHit>,
    }

    impl SurfaceQuery for Fixed {
        fn cast(&self, rays: &[Ray]) -> Vec<Option<RayHit>> {
            rays.iter()
                .map(|r| if r.direction.z > 0.0 { self.up } else { self.down })
                .collect()
        }
    }

    // dyadic values so the float comparisons are exact
    const LAYER: Layer = Layer { z: 0.5, height: 0.25, width: 0.5 };

    fn outer_wall_move() -> Extrusion {
        Extrusion {
            origin: Point::new(10.0, 10.0, 0.5),
            x: Some(12.0),
            e: Some(0.08),
            f: Some(1800.0),
            ..Default::default()
        }
    }

    fn total_flow(segments: &[Extrusion]) -> Mm {
        segments.iter().filter_map(|s| s.e).sum()
    }

    fn hit(distance: Mm, nz: Mm) -> Option<RayHit> {
        let normal = Vec3::new((1.0 - nz * nz).sqrt(), 0.0, nz);
        Some(RayHit { distance, normal })
    }

    #[test]
    fn relative_move_is_rejected() {
        let m = Extrusion { relative: true, ..outer_wall_move() };
        let err = contour_z(&m, &Flat { top: 0.5 }, &LAYER, false, &ContourConfig::default());
        assert!(matches!(err, Err(Error::RelativeContour)));
    }

    #[test]
    fn move_without_flow_is_rejected() {
        let cfg = ContourConfig::default();
        for e in [None, Some(0.0)] {
            let m = Extrusion { e, ..outer_wall_move() };
            let err = contour_z(&m, &Flat { top: 0.5 }, &LAYER, false, &cfg);
            assert!(matches!(err, Err(Error::MissingFlow)));
        }
    }

    #[test]
    fn unusable_resolution_is_rejected() {
        for resolution in [0.0, -0.1, 1e-9, Mm::NAN, Mm::INFINITY] {
            let cfg = ContourConfig { resolution, ..Default::default() };
            let err = contour_z(&outer_wall_move(), &Flat { top: 0.625 }, &LAYER, false, &cfg);
            assert!(matches!(err, Err(Error::InvalidResolution { .. })), "{}", resolution);
        }
        let cfg = ContourConfig { resolution: MIN_RESOLUTION, ..Default::default() };
        assert!(cfg.validate().is_ok());
        assert!(ContourConfig::default().validate().is_ok());
    }

    #[test]
    fn surface_at_nominal_z_changes_nothing() {
        let segments = contour_z(
            &outer_wall_move(),
            &Flat { top: 0.5 },
            &LAYER,
            false,
            &ContourConfig::default(),
        )
        .unwrap();
        assert!(segments.iter().all(|s| s.z == Some(LAYER.z)));
        assert!((total_flow(&segments) - 0.08).abs() < 1e-12);
        // everything is at one z, so it all merges back into one segment
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].pos(), Point::new(12.0, 10.0, 0.5));
    }

    #[test]
    fn zero_offset_conserves_flow_for_any_resolution() {
        for resolution in [0.1, 0.3, 0.4, 0.7, 5.0] {
            let cfg = ContourConfig { resolution, ..Default::default() };
            let m = Extrusion { y: Some(13.0), ..outer_wall_move() };
            let segments = contour_z(&m, &Fixed { up: None, down: None }, &LAYER, false, &cfg)
                .unwrap();
            assert!((total_flow(&segments) - 0.08).abs() < 1e-12, "{}", resolution);
        }
    }

    #[test]
    fn surface_half_a_layer_up_raises_and_overextrudes() {
        let segments = contour_z(
            &outer_wall_move(),
            &Flat { top: 0.625 },
            &LAYER,
            false,
            &ContourConfig::default(),
        )
        .unwrap();
        // a z-only hop onto the surface, then one merged segment along it
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].e, None);
        assert_eq!(segments[0].z, Some(0.625));
        assert_eq!(segments[0].length(), 0.125);
        assert_eq!(segments[1].z, Some(0.625));
        assert_eq!(segments[1].pos(), Point::new(12.0, 10.0, 0.625));
        assert!((total_flow(&segments) - 0.08 * 1.5).abs() < 1e-9);
        assert_eq!(segments[1].f, Some(1800.0));
    }

    #[test]
    fn surface_below_lowers_and_underextrudes() {
        let segments = contour_z(
            &outer_wall_move(),
            &Flat { top: 0.4375 },
            &LAYER,
            false,
            &ContourConfig::default(),
        )
        .unwrap();
        assert!(segments.iter().all(|s| s.z == Some(0.4375)));
        assert!((total_flow(&segments) - 0.08 * 0.75).abs() < 1e-9);
    }

    #[test]
    fn ironing_keeps_flow_per_length() {
        let segments = contour_z(
            &outer_wall_move(),
            &Flat { top: 0.625 },
            &LAYER,
            true,
            &ContourConfig::default(),
        )
        .unwrap();
        assert!(segments.iter().any(|s| s.z == Some(0.625)));
        assert!((total_flow(&segments) - 0.08).abs() < 1e-9);
    }

    #[test]
    fn demo_split_keeps_one_side_flat() {
        let m = Extrusion {
            origin: Point::new(10.0, 9.0, 0.5),
            x: None,
            y: Some(11.0),
            ..outer_wall_move()
        };
        let cfg = ContourConfig { demo_split_y: Some(10.0), ..Default::default() };
        let segments = contour_z(&m, &Flat { top: 0.625 }, &LAYER, false, &cfg).unwrap();
        for s in &segments {
            let y = s.y.unwrap();
            if y < 10.0 {
                assert_eq!(s.z, Some(0.5));
            } else {
                assert_eq!(s.z, Some(0.625));
            }
        }
        assert!(segments.iter().any(|s| s.z == Some(0.5)));
        assert!(segments.iter().any(|s| s.z == Some(0.625)));
    }

    #[test]
    fn merge_sums_flow_and_joins_meta() {
        let a = Extrusion {
            origin: Point::new(0.0, 0.0, 0.5),
            x: Some(1.0),
            y: Some(0.0),
            z: Some(0.5),
            e: Some(0.01),
            meta: "a".into(),
            ..Default::default()
        };
        let b = Extrusion {
            origin: a.pos(),
            x: Some(2.0),
            e: Some(0.02),
            meta: "b".into(),
            ..a.clone()
        };
        assert!(can_merge(&a, &b));
        let merged = merge_segments(a, b);
        assert_eq!(merged.origin, Point::new(0.0, 0.0, 0.5));
        assert_eq!(merged.pos(), Point::new(2.0, 0.0, 0.5));
        assert!((merged.e.unwrap() - 0.03).abs() < 1e-15);
        assert_eq!(merged.meta, "a b");
    }

    #[test]
    fn no_merge_across_a_z_change_or_travel() {
        let hop = Extrusion {
            origin: Point::new(0.0, 0.0, 0.5),
            x: Some(0.0),
            y: Some(0.0),
            z: Some(0.625),
            ..Default::default()
        };
        let along = Extrusion {
            origin: hop.pos(),
            x: Some(1.0),
            e: Some(0.01),
            ..hop.clone()
        };
        assert!(!can_merge(&hop, &along));
        let ramp = Extrusion { e: Some(0.01), ..hop.clone() };
        assert!(!can_merge(&ramp, &along));
    }

    #[test]
    fn offset_prefers_closer_hit() {
        let cfg = ContourConfig::default();
        assert_eq!(surface_offset(hit(0.0625, 1.0), hit(0.09375, 1.0), &LAYER, &cfg), 0.0625);
        assert_eq!(surface_offset(hit(0.09375, 1.0), hit(0.0625, 1.0), &LAYER, &cfg), -0.0625);
    }

    #[test]
    fn offset_uses_up_when_down_is_a_wall() {
        let cfg = ContourConfig::default();
        assert_eq!(surface_offset(hit(0.09375, 1.0), hit(0.0625, 0.0), &LAYER, &cfg), 0.09375);
    }

    #[test]
    fn far_surfaces_are_ignored() {
        let cfg = ContourConfig::default();
        // beyond half a layer above
        assert_eq!(surface_offset(hit(0.15, 1.0), None, &LAYER, &cfg), 0.0);
        // beyond half a layer (plus slack) below
        assert_eq!(surface_offset(None, hit(0.15, 1.0), &LAYER, &cfg), 0.0);
        assert_eq!(surface_offset(None, None, &LAYER, &cfg), 0.0);
    }

    #[test]
    fn below_within_slack_is_clamped_to_half_layer() {
        let cfg = ContourConfig::default();
        let d = LAYER.height / 2.0 + cfg.down_epsilon / 2.0;
        assert_eq!(surface_offset(None, hit(d, 1.0), &LAYER, &cfg), -LAYER.height / 2.0);
    }

    #[test]
    fn steep_walls_are_left_alone() {
        let cfg = ContourConfig::default();
        assert_eq!(surface_offset(hit(0.0625, 0.05), None, &LAYER, &cfg), 0.0);
    }

    #[test]
    fn slopes_get_progressively_less_offset() {
        let cfg = ContourConfig::default();
        let flat = surface_offset(hit(0.1, 1.0), None, &LAYER, &cfg);
        let gentle = surface_offset(hit(0.1, 0.95), None, &LAYER, &cfg);
        let steep = surface_offset(hit(0.1, 0.5), None, &LAYER, &cfg);
        assert_eq!(flat, 0.1);
        assert!(gentle < flat && gentle > 0.0, "{}", gentle);
        assert!(steep < gentle, "{}", steep);
        // on the same slope, farther surfaces are followed proportionally less
        let near = surface_offset(hit(0.025, 0.8), None, &LAYER, &cfg) / 0.025;
        let far = surface_offset(hit(0.1, 0.8), None, &LAYER, &cfg) / 0.1;
        assert!(far < near);
    }

    #[test]
    fn rounding_noise_is_snapped() {
        let cfg = ContourConfig::default();
        assert_eq!(surface_offset(hit(3e-9, 1.0), None, &LAYER, &cfg), 0.0);
    }

    #[test]
    fn upside_down_surface_above_is_not_a_top() {
        let cfg = ContourConfig::default();
        // an overhang ceiling seen from below has a downward normal
        let ceiling = Some(RayHit { distance: 0.0625, normal: Vec3::DOWN });
        assert_eq!(surface_offset(ceiling, None, &LAYER, &cfg), 0.0);
    }
}
