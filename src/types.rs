//! Vectors, boxes and the shape traits shared by the planners.
//!
//! Coordinates follow the stowage convention used on the wire: `x` is width,
//! `y` is depth and `z` is height. The depth = 0 face of a container is its
//! front opening.

use std::ops::{Add, Sub};

/// Default numerical tolerance for floating-point comparisons.
pub const EPSILON_GENERAL: f64 = 1e-6;

/// One of the three container axes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
    Width,
    Depth,
    Height,
}

/// A point or an extent in container space.
///
/// # Examples
/// ```
/// use stowage::types::Vec3;
///
/// let start = Vec3::new(0.0, 50.0, 0.0);
/// let extent = Vec3::new(50.0, 50.0, 50.0);
/// assert_eq!(start + extent, Vec3::new(50.0, 100.0, 50.0));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    #[inline]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The container origin: left, front, floor.
    #[inline]
    pub const fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    #[inline]
    pub fn get(&self, axis: Axis) -> f64 {
        match axis {
            Axis::Width => self.x,
            Axis::Depth => self.y,
            Axis::Height => self.z,
        }
    }

    /// Copy with the component along `axis` replaced.
    #[inline]
    pub fn with(mut self, axis: Axis, value: f64) -> Self {
        match axis {
            Axis::Width => self.x = value,
            Axis::Depth => self.y = value,
            Axis::Height => self.z = value,
        }
        self
    }

    /// Product of the components, for extents.
    #[inline]
    pub fn volume(&self) -> f64 {
        self.x * self.y * self.z
    }

    /// True if no component exceeds the matching component of `outer`.
    #[inline]
    pub fn fits_within(&self, outer: &Self, tolerance: f64) -> bool {
        self.x <= outer.x + tolerance && self.y <= outer.y + tolerance && self.z <= outer.z + tolerance
    }

    #[inline]
    pub fn approx_eq(&self, other: &Self, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

/// `(width, depth, height)`.
impl From<(f64, f64, f64)> for Vec3 {
    #[inline]
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self::new(x, y, z)
    }
}

/// Anything with a declared width, depth and height.
pub trait Dimensional {
    fn dimensions(&self) -> Vec3;

    fn volume(&self) -> f64 {
        self.dimensions().volume()
    }
}

/// Anything occupying a box inside a container.
pub trait Positioned {
    fn bounding_box(&self) -> BoundingBox;
}

/// Axis-aligned box between a start (`min`) and an end (`max`) corner.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    #[inline]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    #[inline]
    pub fn from_position_and_dims(position: Vec3, dims: Vec3) -> Self {
        Self::new(position, position + dims)
    }

    /// True if the boxes share positive volume.
    ///
    /// The boxes are apart as soon as one axis separates them; faces that
    /// merely touch separate them too.
    #[inline]
    pub fn intersects(&self, other: &Self, tolerance: f64) -> bool {
        [Axis::Width, Axis::Depth, Axis::Height].iter().all(|&axis| {
            self.min.get(axis) + tolerance < other.max.get(axis)
                && other.min.get(axis) + tolerance < self.max.get(axis)
        })
    }

    /// True if `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Self, tolerance: f64) -> bool {
        other.min.x >= self.min.x - tolerance
            && other.min.y >= self.min.y - tolerance
            && other.min.z >= self.min.z - tolerance
            && other.max.fits_within(&self.max, tolerance)
    }

    #[inline]
    pub fn dimensions(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    pub fn volume(&self) -> f64 {
        self.dimensions().volume()
    }
}
