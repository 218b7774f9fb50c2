use std::ops;

use crate::{Factor, Mm};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: Mm,
    pub y: Mm,
    pub z: Mm,
}

impl Point {
    pub const fn new(x: Mm, y: Mm, z: Mm) -> Point {
        Point { x, y, z }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Vec3 {
    pub x: Mm,
    pub y: Mm,
    pub z: Mm,
}

impl Vec3 {
    pub const UP: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 1.0 };
    pub const DOWN: Vec3 = Vec3 { x: 0.0, y: 0.0, z: -1.0 };

    pub const fn new(x: Mm, y: Mm, z: Mm) -> Vec3 {
        Vec3 { x, y, z }
    }
    pub fn norm(&self) -> Mm {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
    pub fn dot(&self, rhs: Vec3) -> Mm {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }
    pub fn cross(&self, rhs: Vec3) -> Vec3 {
        let a = *self;
        let b = rhs;
        Vec3 {
            x: a.y * b.z - a.z * b.y,
            y: a.z * b.x - a.x * b.z,
            z: a.x * b.y - a.y * b.x,
        }
    }
    pub fn is_vertical(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z != 0.0
    }
}

impl ops::Add<Vec3> for Point {
    type Output = Point;

    fn add(self, rhs: Vec3) -> Point {
        Point {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl ops::Sub<Point> for Point {
    type Output = Vec3;

    fn sub(self, rhs: Point) -> Vec3 {
        Vec3 {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl ops::AddAssign<Vec3> for Point {
    fn add_assign(&mut self, other: Vec3) {
        *self = Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        };
    }
}

impl ops::Div<Factor> for Vec3 {
    type Output = Vec3;

    fn div(self, rhs: Factor) -> Vec3 {
        Vec3 {
            x: self.x / rhs,
            y: self.y / rhs,
            z: self.z / rhs,
        }
    }
}

impl ops::Mul<Factor> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: Factor) -> Vec3 {
        Vec3 {
            x: self.x * rhs,
            y: self.y * rhs,
            z: self.z * rhs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_is_right_handed() {
        let x = Vec3::new(1.0, 0.0, 0.0);
        let y = Vec3::new(0.0, 1.0, 0.0);
        assert_eq!(x.cross(y), Vec3::UP);
        assert_eq!(y.cross(x), Vec3::DOWN);
    }

    #[test]
    fn point_arithmetic() {
        let mut p = Point::new(1.0, 2.0, 3.0);
        p += Vec3::new(1.0, 1.0, 1.0);
        assert_eq!(p, Point::new(2.0, 3.0, 4.0));
        assert_eq!(p - Point::new(2.0, 3.0, 0.0), Vec3::new(0.0, 0.0, 4.0));
        assert_eq!((Vec3::new(3.0, 4.0, 0.0) * 2.0).norm(), 10.0);
        assert_eq!(Vec3::DOWN * 0.5, Vec3::new(0.0, 0.0, -0.5));
        assert_eq!(Vec3::new(0.0, 6.0, 8.0) / 2.0, Vec3::new(0.0, 3.0, 4.0));
    }

    #[test]
    fn scaling_by_inverse_norm_gives_unit_vector() {
        let v = Vec3::new(0.0, 3.0, 4.0);
        let unit = v / v.norm();
        assert_eq!(unit, Vec3::new(0.0, 0.6, 0.8));
        assert!((unit.norm() - 1.0).abs() < 1e-15);
    }
}
