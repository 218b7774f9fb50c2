use crate::error::{Error, Result};

// Vendors only put their name in the header comment, so there's no point looking further.
const DETECT_MAX_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Orca,
    Prusa,
    Bambu,
}

impl Dialect {
    pub fn detect<'a, I>(header_lines: I) -> Result<Dialect>
    where
        I: IntoIterator<Item = &'a str>,
    {
        for line in header_lines.into_iter().take(DETECT_MAX_LINES) {
            if line.contains("PrusaSlicer") {
                return Ok(Dialect::Prusa);
            } else if line.contains("OrcaSlicer") {
                return Ok(Dialect::Orca);
            } else if line.contains("BambuStudio") {
                return Ok(Dialect::Bambu);
            }
        }
        Err(Error::DialectNotRecognized)
    }

    pub fn tokens(self) -> &'static Tokens {
        match self {
            Dialect::Orca => &ORCA,
            Dialect::Prusa => &PRUSA,
            Dialect::Bambu => &BAMBU,
        }
    }
}

/// The literal comment prefixes one slicer uses to mark structure in its output.
#[derive(Debug, PartialEq, Eq)]
pub struct Tokens {
    pub line_type: &'static str,
    pub line_type_top_surface: &'static str,
    pub line_type_outer_wall: &'static str,
    pub line_type_inner_wall: &'static str,
    pub line_type_bridge: &'static str,
    pub line_type_ironing: &'static str,
    pub line_type_overhang: &'static str,

    pub layer_change: &'static str,
    pub z: &'static str,
    pub height: &'static str,
    pub width: &'static str,

    pub wipe_start: &'static str,
    pub wipe_end: &'static str,

    pub config_block_start: &'static str,
    pub config_block_end: &'static str,

    pub executable_block_start: &'static str,
    pub executable_block_end: &'static str,
}

impl Tokens {
    /// Line types whose printed surface is visible enough to be worth contouring.
    pub fn is_contoured_line_type(&self, line_type: &str) -> bool {
        line_type == self.line_type_ironing
            || line_type == self.line_type_top_surface
            || line_type == self.line_type_outer_wall
            || line_type == self.line_type_inner_wall
    }
}

const ORCA: Tokens = Tokens {
    line_type: ";TYPE:",
    line_type_top_surface: "Top surface",
    line_type_outer_wall: "Outer wall",
    line_type_inner_wall: "Inner wall",
    line_type_bridge: "Bridge",
    line_type_ironing: "Ironing",
    line_type_overhang: "Overhang wall",

    layer_change: ";LAYER_CHANGE",
    z: ";Z:",
    height: ";HEIGHT:",
    width: ";WIDTH:",

    wipe_start: ";WIPE_START",
    wipe_end: ";WIPE_END",

    config_block_start: "; CONFIG_BLOCK_START",
    config_block_end: "; CONFIG_BLOCK_END",

    executable_block_start: "; EXECUTABLE_BLOCK_START",
    executable_block_end: "; EXECUTABLE_BLOCK_END",
};

const PRUSA: Tokens = Tokens {
    line_type_bridge: "Bridge infill",
    ..ORCA
};

const BAMBU: Tokens = Tokens {
    layer_change: "; CHANGE_LAYER",
    line_type: "; FEATURE:",
    z: "; Z_HEIGHT:",
    height: "; LAYER_HEIGHT:",
    width: "; LINE_WIDTH:",
    ..ORCA
};
