//! Spatial primitives for fit tests, collision detection and retrieval corridors.
//!
//! All functions are pure. The only failure mode is malformed input
//! (non-positive or non-finite dimensions), reported as [`GeometryError`].

use std::fmt;
use std::str::FromStr;

use crate::error::GeometryError;
use crate::types::{Axis, BoundingBox, Dimensional, Vec3};

/// Validates that all three dimensions are positive and finite.
pub fn validate_dimensions(dims: Vec3) -> Result<(), GeometryError> {
    for (axis, name) in [
        (Axis::Width, "width"),
        (Axis::Depth, "depth"),
        (Axis::Height, "height"),
    ] {
        let value = dims.get(axis);
        if value <= 0.0 || !value.is_finite() {
            return Err(GeometryError::InvalidDimension { name, value });
        }
    }
    Ok(())
}

/// Validates that a coordinate triple lies in the non-negative octant.
pub fn validate_coordinates(point: Vec3) -> Result<(), GeometryError> {
    for (axis, name) in [
        (Axis::Width, "width"),
        (Axis::Depth, "depth"),
        (Axis::Height, "height"),
    ] {
        let value = point.get(axis);
        if value < 0.0 || !value.is_finite() {
            return Err(GeometryError::InvalidCoordinate { name, value });
        }
    }
    Ok(())
}

/// Enumerates the orientations an item may take.
///
/// Without rotation only the declared orientation is returned. With rotation
/// every distinct axis permutation is returned, declared orientation first, in
/// a fixed order so planning stays deterministic.
pub fn orientations(dims: Vec3, allow_rotation: bool, tolerance: f64) -> Vec<Vec3> {
    if !allow_rotation {
        return vec![dims];
    }

    let Vec3 { x, y, z } = dims;
    let candidates = [
        Vec3::new(x, y, z),
        Vec3::new(y, x, z),
        Vec3::new(x, z, y),
        Vec3::new(z, x, y),
        Vec3::new(y, z, x),
        Vec3::new(z, y, x),
    ];

    let mut unique: Vec<Vec3> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.iter().any(|seen| seen.approx_eq(&candidate, tolerance)) {
            unique.push(candidate);
        }
    }
    unique
}

/// Checks whether an extent is one of the permitted orientations of `dims`.
pub fn is_orientation_of(extent: Vec3, dims: Vec3, allow_rotation: bool, tolerance: f64) -> bool {
    orientations(dims, allow_rotation, tolerance)
        .iter()
        .any(|candidate| candidate.approx_eq(&extent, tolerance))
}

/// True iff the item fits into the container in some permitted orientation.
///
/// # Examples
/// ```
/// use stowage::geometry::fits;
/// use stowage::types::{Dimensional, Vec3};
///
/// struct Dims(Vec3);
/// impl Dimensional for Dims {
///     fn dimensions(&self) -> Vec3 { self.0 }
/// }
///
/// let tall = Dims(Vec3::new(10.0, 10.0, 50.0));
/// let flat = Dims(Vec3::new(60.0, 60.0, 20.0));
/// assert!(!fits(&tall, &flat, false, 1e-6).unwrap());
/// assert!(fits(&tall, &flat, true, 1e-6).unwrap());
/// ```
pub fn fits(
    item: &impl Dimensional,
    container: &impl Dimensional,
    allow_rotation: bool,
    tolerance: f64,
) -> Result<bool, GeometryError> {
    let item_dims = item.dimensions();
    let container_dims = container.dimensions();
    validate_dimensions(item_dims)?;
    validate_dimensions(container_dims)?;

    Ok(orientations(item_dims, allow_rotation, tolerance)
        .iter()
        .any(|dims| dims.fits_within(&container_dims, tolerance)))
}

/// True iff the two boxes share positive volume.
///
/// Boxes overlap unless they are disjoint on at least one axis; touching
/// faces are not an overlap.
#[inline]
pub fn overlaps(a: &BoundingBox, b: &BoundingBox, tolerance: f64) -> bool {
    a.intersects(b, tolerance)
}

/// True iff the box lies inside `[0, container]` on every axis.
pub fn within_bounds(
    bbox: &BoundingBox,
    container: &impl Dimensional,
    tolerance: f64,
) -> Result<bool, GeometryError> {
    let dims = container.dimensions();
    validate_dimensions(dims)?;
    let shell = BoundingBox::new(Vec3::zero(), dims);
    Ok(shell.contains(bbox, tolerance))
}

/// An open face of a container through which items are inserted and removed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessFace {
    /// The depth = 0 face.
    Front,
    /// The depth = max face.
    Back,
    /// The width = 0 face.
    Left,
    /// The width = max face.
    Right,
    /// The height = max face.
    Top,
}

impl AccessFace {
    /// The axis along which items move through this face.
    pub fn axis(self) -> Axis {
        match self {
            AccessFace::Front | AccessFace::Back => Axis::Depth,
            AccessFace::Left | AccessFace::Right => Axis::Width,
            AccessFace::Top => Axis::Height,
        }
    }

    /// Whether the face sits at the far end of its axis.
    fn at_max(self) -> bool {
        matches!(self, AccessFace::Back | AccessFace::Right | AccessFace::Top)
    }

    /// The rectangular prism between `target` and this face.
    ///
    /// The corridor keeps the target's cross-section on the two other axes.
    /// A target touching the face yields a zero-length corridor that
    /// intersects nothing.
    pub fn corridor(self, target: &BoundingBox, container_dims: Vec3) -> BoundingBox {
        let axis = self.axis();
        if self.at_max() {
            let start = target.max.get(axis);
            let end = container_dims.get(axis).max(start);
            BoundingBox::new(target.min.with(axis, start), target.max.with(axis, end))
        } else {
            let end = target.min.get(axis).max(0.0);
            BoundingBox::new(target.min.with(axis, 0.0), target.max.with(axis, end))
        }
    }

    /// Distance between the face and the nearest side of `bbox`.
    pub fn distance(self, bbox: &BoundingBox, container_dims: Vec3) -> f64 {
        let axis = self.axis();
        if self.at_max() {
            container_dims.get(axis) - bbox.max.get(axis)
        } else {
            bbox.min.get(axis)
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessFace::Front => "front",
            AccessFace::Back => "back",
            AccessFace::Left => "left",
            AccessFace::Right => "right",
            AccessFace::Top => "top",
        }
    }
}

impl fmt::Display for AccessFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AccessFace {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(AccessFace::Front),
            "back" => Ok(AccessFace::Back),
            "left" => Ok(AccessFace::Left),
            "right" => Ok(AccessFace::Right),
            "top" => Ok(AccessFace::Top),
            other => Err(format!("unknown access face '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EPSILON_GENERAL;

    struct Dims(Vec3);

    impl Dimensional for Dims {
        fn dimensions(&self) -> Vec3 {
            self.0
        }
    }

    fn cube(pos: (f64, f64, f64), side: f64) -> BoundingBox {
        BoundingBox::from_position_and_dims(Vec3::from(pos), Vec3::new(side, side, side))
    }

    #[test]
    fn fits_respects_each_axis() {
        let container = Dims(Vec3::new(100.0, 50.0, 20.0));
        assert!(fits(&Dims(Vec3::new(100.0, 50.0, 20.0)), &container, false, EPSILON_GENERAL).unwrap());
        assert!(!fits(&Dims(Vec3::new(100.0, 50.0, 21.0)), &container, false, EPSILON_GENERAL).unwrap());
    }

    #[test]
    fn fits_tries_permutations_when_rotation_enabled() {
        let container = Dims(Vec3::new(100.0, 50.0, 20.0));
        let lying = Dims(Vec3::new(20.0, 50.0, 100.0));
        assert!(!fits(&lying, &container, false, EPSILON_GENERAL).unwrap());
        assert!(fits(&lying, &container, true, EPSILON_GENERAL).unwrap());
    }

    #[test]
    fn fits_rejects_non_positive_dimensions() {
        let container = Dims(Vec3::new(10.0, 10.0, 10.0));
        let err = fits(&Dims(Vec3::new(0.0, 1.0, 1.0)), &container, false, EPSILON_GENERAL)
            .unwrap_err();
        assert!(matches!(err, GeometryError::InvalidDimension { name: "width", .. }));

        let err = fits(&Dims(Vec3::new(1.0, 1.0, 1.0)), &Dims(Vec3::new(1.0, -1.0, 1.0)), false, EPSILON_GENERAL)
            .unwrap_err();
        assert!(matches!(err, GeometryError::InvalidDimension { name: "depth", .. }));
    }

    #[test]
    fn orientations_are_unique_and_declared_first() {
        let dims = Vec3::new(1.0, 2.0, 3.0);
        let all = orientations(dims, true, EPSILON_GENERAL);
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], dims);

        let square = orientations(Vec3::new(2.0, 2.0, 5.0), true, EPSILON_GENERAL);
        assert_eq!(square.len(), 3);

        assert_eq!(orientations(dims, false, EPSILON_GENERAL), vec![dims]);
    }

    #[test]
    fn overlaps_requires_positive_volume() {
        let a = cube((0.0, 0.0, 0.0), 50.0);
        assert!(overlaps(&a, &cube((25.0, 25.0, 25.0), 50.0), EPSILON_GENERAL));
        assert!(!overlaps(&a, &cube((50.0, 0.0, 0.0), 50.0), EPSILON_GENERAL));
        assert!(!overlaps(&a, &cube((0.0, 0.0, 50.0), 50.0), EPSILON_GENERAL));
    }

    #[test]
    fn within_bounds_checks_both_corners() {
        let container = Dims(Vec3::new(100.0, 100.0, 100.0));
        assert!(within_bounds(&cube((50.0, 50.0, 50.0), 50.0), &container, EPSILON_GENERAL).unwrap());
        assert!(!within_bounds(&cube((60.0, 0.0, 0.0), 50.0), &container, EPSILON_GENERAL).unwrap());
        assert!(!within_bounds(&cube((-1.0, 0.0, 0.0), 10.0), &container, EPSILON_GENERAL).unwrap());
    }

    #[test]
    fn front_corridor_reaches_depth_zero() {
        let target = cube((10.0, 40.0, 0.0), 20.0);
        let corridor = AccessFace::Front.corridor(&target, Vec3::new(100.0, 100.0, 100.0));
        assert_eq!(corridor.min, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(corridor.max, Vec3::new(30.0, 40.0, 20.0));
        assert_eq!(AccessFace::Front.distance(&target, Vec3::new(100.0, 100.0, 100.0)), 40.0);
    }

    #[test]
    fn top_corridor_reaches_ceiling() {
        let target = cube((0.0, 0.0, 10.0), 20.0);
        let dims = Vec3::new(100.0, 100.0, 100.0);
        let corridor = AccessFace::Top.corridor(&target, dims);
        assert_eq!(corridor.min, Vec3::new(0.0, 0.0, 30.0));
        assert_eq!(corridor.max, Vec3::new(20.0, 20.0, 100.0));
        assert_eq!(AccessFace::Top.distance(&target, dims), 70.0);
    }

    #[test]
    fn access_face_parses_case_insensitively() {
        assert_eq!(" Front ".parse::<AccessFace>(), Ok(AccessFace::Front));
        assert_eq!("TOP".parse::<AccessFace>(), Ok(AccessFace::Top));
        assert!("sideways".parse::<AccessFace>().is_err());
    }
}
