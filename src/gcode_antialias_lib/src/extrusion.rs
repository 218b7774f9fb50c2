use std::fmt;

use crate::geometry::{Point, Vec3};
use crate::Mm;

/// One linear move, either parsed from a `G0`/`G1` line or produced by contouring.
///
/// `origin` is always absolute: it is where the nozzle was before this move, regardless of the
/// positioning mode the move was issued in. The axis values are as written, so their meaning
/// depends on `relative`.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Extrusion {
    pub origin: Point,
    pub x: Option<Mm>,
    pub y: Option<Mm>,
    pub z: Option<Mm>,
    pub e: Option<Mm>,
    pub f: Option<Mm>,
    pub relative: bool,
    // diagnostic text emitted as a trailing comment on rewritten lines
    pub meta: String,
}

impl Extrusion {
    pub fn pos(&self) -> Point {
        let p = self.origin;
        if self.relative {
            Point {
                x: p.x + self.x.unwrap_or(0.0),
                y: p.y + self.y.unwrap_or(0.0),
                z: p.z + self.z.unwrap_or(0.0),
            }
        } else {
            Point {
                x: self.x.unwrap_or(p.x),
                y: self.y.unwrap_or(p.y),
                z: self.z.unwrap_or(p.z),
            }
        }
    }

    pub fn delta(&self) -> Vec3 {
        if self.relative {
            Vec3 {
                x: self.x.unwrap_or(0.0),
                y: self.y.unwrap_or(0.0),
                z: self.z.unwrap_or(0.0),
            }
        } else {
            let p = self.origin;
            Vec3 {
                x: self.x.map_or(0.0, |x| x - p.x),
                y: self.y.map_or(0.0, |y| y - p.y),
                z: self.z.map_or(0.0, |z| z - p.z),
            }
        }
    }

    pub fn length(&self) -> Mm {
        self.delta().norm()
    }

    pub fn has_planar_axis(&self) -> bool {
        self.x.is_some() || self.y.is_some()
    }
}

/// Renders the axis words only, e.g. `X10.5 Y.25 E1.2 F1800`. The command word and the comment
/// are up to the caller.
impl fmt::Display for Extrusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let words = [
            ('X', self.x),
            ('Y', self.y),
            ('Z', self.z),
            ('E', self.e),
            ('F', self.f),
        ];
        let mut first = true;
        for (letter, value) in words {
            let Some(value) = value else { continue };
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "{}{}", letter, format_number(value))?;
            first = false;
        }
        Ok(())
    }
}

/// Six decimals, then trailing zeros and a bare leading zero stripped. Zero renders as the empty
/// string, which firmware reads back as zero when it follows an axis letter.
pub fn format_number(value: Mm) -> String {
    let fixed = format!("{:.6}", value);
    let trimmed = fixed.trim_end_matches('0').trim_end_matches('.');
    let (sign, magnitude) = match trimmed.strip_prefix('-') {
        Some(m) => ("-", m),
        None => ("", trimmed),
    };
    let magnitude = magnitude.strip_prefix('0').unwrap_or(magnitude);
    if magnitude.is_empty() {
        // -0.0000001 rounds to "-0"
        return String::new();
    }
    format!("{}{}", sign, magnitude)
}
