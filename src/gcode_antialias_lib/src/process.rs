//! The single pass over a sliced file.
//!
//! Lines outside the executable block are copied through untouched. Inside it, each line updates
//! the [`Context`]; a linear extrusion move on a contoured line type of an active object may be
//! replaced by a fenced block:
//!
//! ```text
//! ;OUTER WALL_CONTOUR G1 X12 Y10 E.08
//! G1 X10 Y10 Z.625 F1800;o=0.125
//! G1 X12 Y10 Z.625 E.12 F1800;o=0.125 h=0.375 ...
//! ;OUTER WALL_CONTOUR_END
//! ```

use std::fmt::Write as fmt_Write;

use tracing::{debug, trace};

use crate::context::Context;
use crate::contour::{contour_z, ContourConfig};
use crate::error::{Error, Result};
use crate::extrusion::Extrusion;
use crate::geometry::Point;
use crate::surface::SurfaceLoader;
use crate::words::{parse_number, KeyValues, Words};
use crate::Mm;

const EXCLUDE_OBJECT_DEFINE: &str = "EXCLUDE_OBJECT_DEFINE";
const EXCLUDE_OBJECT_START: &str = "EXCLUDE_OBJECT_START";
const EXCLUDE_OBJECT_END: &str = "EXCLUDE_OBJECT_END";

const RESET_Z: &str = "RESET_Z";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ProcessStats {
    pub lines: usize,
    pub executable_lines: usize,
    pub moves: usize,
    pub contoured_moves: usize,
    pub z_resets: usize,
}

/// What to put in place of one input line.
#[derive(Debug, PartialEq)]
struct Rewrite {
    tag: String,
    moves: Vec<Extrusion>,
}

/// Splits a line into its text and its line ending, which is kept byte for byte.
fn split_eol(raw: &str) -> (&str, &str) {
    let body = raw.trim_end_matches(['\r', '\n']);
    (body, &raw[body.len()..])
}

/// Command word and arguments: `G1 X1 Y2` -> (`G1`, `X1 Y2`).
fn split_command(line: &str) -> (&str, &str) {
    let line = line.trim_start();
    let end = line
        .find(|c: char| c.is_whitespace() || c == ';')
        .unwrap_or(line.len());
    (&line[..end], &line[end..])
}

pub struct LineProcessor<'a> {
    ctx: Context,
    loader: &'a mut dyn SurfaceLoader,
    config: &'a ContourConfig,
    stats: ProcessStats,
}

impl<'a> LineProcessor<'a> {
    pub fn new(
        ctx: Context,
        loader: &'a mut dyn SurfaceLoader,
        config: &'a ContourConfig,
    ) -> LineProcessor<'a> {
        LineProcessor {
            ctx,
            loader,
            config,
            stats: ProcessStats::default(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Runs the whole pass and returns the rewritten file.
    pub fn run(mut self, gcode: &str) -> Result<(String, ProcessStats)> {
        let tokens = self.ctx.tokens;
        let mut output = String::with_capacity(gcode.len() + gcode.len() / 4);
        let mut is_in_executable = false;
        let mut is_done = false;

        for (index, raw) in gcode.split_inclusive('\n').enumerate() {
            self.stats.lines += 1;
            let (line, eol) = split_eol(raw);
            if is_done {
                output.push_str(raw);
                continue;
            }
            if !is_in_executable && line.starts_with(tokens.executable_block_start) {
                is_in_executable = true;
            } else if is_in_executable && line.starts_with(tokens.executable_block_end) {
                is_done = true;
            } else if is_in_executable {
                self.stats.executable_lines += 1;
                if let Some(rewrite) = self.process_line(line, index + 1)? {
                    write_rewrite(&mut output, line, eol, &rewrite);
                    continue;
                }
            }
            output.push_str(raw);
        }

        Ok((output, self.stats))
    }

    /// Updates the context from one executable line, and returns the replacement for the line if
    /// it needs one.
    fn process_line(&mut self, line: &str, line_number: usize) -> Result<Option<Rewrite>> {
        let tokens = self.ctx.tokens;
        let (command, args) = split_command(line);
        let mut moves: Vec<Extrusion> = vec![];

        match command {
            "G0" | "G1" => {
                let words = Words::parse(args, line_number)?;
                moves.push(Extrusion {
                    origin: self.ctx.last_p,
                    x: words.get('X'),
                    y: words.get('Y'),
                    z: words.get('Z'),
                    e: words.get('E'),
                    f: words.get('F'),
                    relative: self.ctx.relative_positioning,
                    meta: String::new(),
                });
                self.stats.moves += 1;
            }
            // Arcs go through as they are; there's no contouring for curved paths.
            "G2" | "G3" => {}
            _ if line.starts_with(tokens.line_type) => {
                self.ctx.line_type = line[tokens.line_type.len()..].trim().to_owned();
            }
            _ if line.starts_with(tokens.layer_change) => {
                self.ctx.layer_number += 1;
                // The slicer doesn't repeat the line type after a layer change, and the first
                // thing printed on a new layer is an inner wall.
                self.ctx.line_type = tokens.line_type_inner_wall.to_owned();
                debug!(layer = self.ctx.layer_number, line_number, "layer change");
            }
            _ if line.starts_with(tokens.z) => {
                self.ctx.layer.z = parse_number(line[tokens.z.len()..].trim(), line_number)?;
            }
            _ if line.starts_with(tokens.height) => {
                self.ctx.layer.height =
                    parse_number(line[tokens.height.len()..].trim(), line_number)?;
            }
            _ if line.starts_with(tokens.width) => {
                self.ctx.layer.width =
                    parse_number(line[tokens.width.len()..].trim(), line_number)?;
            }
            _ if line.starts_with(tokens.wipe_start) => self.ctx.wipe = true,
            _ if line.starts_with(tokens.wipe_end) => self.ctx.wipe = false,
            "M82" => self.ctx.relative_extrusion = false,
            "M83" => self.ctx.relative_extrusion = true,
            "G90" => self.ctx.relative_positioning = false,
            "G91" => self.ctx.relative_positioning = true,
            "G92" => {
                let words = Words::parse(args, line_number)?;
                if let Some(e) = words.get('E') {
                    self.ctx.last_e = e;
                }
                let p = self.ctx.last_p;
                self.ctx.last_p = Point {
                    x: words.get('X').unwrap_or(p.x),
                    y: words.get('Y').unwrap_or(p.y),
                    z: words.get('Z').unwrap_or(p.z),
                };
            }
            "M73" => {
                let words = Words::parse(args, line_number)?;
                if let Some(p) = words.get('P') {
                    self.ctx.progress_percent = p;
                }
                if let Some(r) = words.get('R') {
                    self.ctx.progress_remaining_minutes = r;
                }
            }
            EXCLUDE_OBJECT_DEFINE => self.define_object(args, line_number)?,
            EXCLUDE_OBJECT_START => {
                let args = KeyValues::parse(args, line_number)?;
                let name = require(&args, EXCLUDE_OBJECT_START, "NAME", line_number)?;
                self.ctx.start_object(name, line_number)?;
                debug!(name, line_number, "object start");
            }
            EXCLUDE_OBJECT_END => {
                self.ctx.end_object();
            }
            _ => {}
        }

        let mut write_back: Option<String> = None;

        if let Some(contour) = self.try_contour(&moves)? {
            moves = contour;
            write_back = Some(format!("{}_CONTOUR", self.ctx.line_type.to_uppercase()));
            self.stats.contoured_moves += 1;
        }

        // Whatever the last contour left z at, the next plain move needs to be back on the
        // nominal plane. An absolute Z would be misread in relative positioning mode.
        if write_back.is_none()
            && !moves.is_empty()
            && !self.ctx.relative_positioning
            && self.ctx.last_p.z != self.ctx.layer.z
        {
            let reset = Extrusion {
                origin: self.ctx.last_p,
                z: Some(self.ctx.layer.z),
                ..Default::default()
            };
            moves[0].origin = reset.pos();
            moves.insert(0, reset);
            write_back = Some(RESET_Z.to_owned());
            self.stats.z_resets += 1;
        }

        if let Some(last) = moves.last() {
            if let Some(e) = last.e {
                if !self.ctx.relative_extrusion {
                    self.ctx.last_e = e;
                }
                // Relative extrusion isn't accumulated; nothing downstream reads last_e yet.
            }
            self.ctx.last_p = last.pos();
        }

        Ok(write_back.map(|tag| Rewrite { tag, moves }))
    }

    fn try_contour(&self, moves: &[Extrusion]) -> Result<Option<Vec<Extrusion>>> {
        let ctx = &self.ctx;
        let [extrusion] = moves else {
            return Ok(None);
        };
        let Some(surface) = ctx.active_surface() else {
            return Ok(None);
        };
        if ctx.wipe
            || !ctx.tokens.is_contoured_line_type(&ctx.line_type)
            || ctx.relative_positioning
            || ctx.layer.height <= 0.0
            || extrusion.length() == 0.0
            || !extrusion.e.is_some_and(|e| e != 0.0)
            || !extrusion.has_planar_axis()
        {
            return Ok(None);
        }

        let ironing_line = ctx.line_type == ctx.tokens.line_type_ironing;
        let mut contour = contour_z(extrusion, surface, &ctx.layer, ironing_line, self.config)?;
        if !contour.iter().any(|segment| segment.z != Some(ctx.layer.z)) {
            return Ok(None);
        }
        // Contouring plans from the nominal plane; keep the real start for position bookkeeping.
        if let Some(first) = contour.first_mut() {
            first.origin = extrusion.origin;
        }
        trace!(
            layer = ctx.layer_number,
            line_type = %ctx.line_type,
            segments = contour.len(),
            "contoured move"
        );
        Ok(Some(contour))
    }

    fn define_object(&mut self, args: &str, line_number: usize) -> Result<()> {
        let args = KeyValues::parse(args, line_number)?;
        let name = require(&args, EXCLUDE_OBJECT_DEFINE, "NAME", line_number)?;
        let center = require(&args, EXCLUDE_OBJECT_DEFINE, "CENTER", line_number)?;
        let Some((x, y)) = center.split_once(',') else {
            return Err(Error::InvalidNumber {
                line_number,
                value: center.to_owned(),
            });
        };
        let center: (Mm, Mm) = (
            parse_number(x.trim(), line_number)?,
            parse_number(y.trim(), line_number)?,
        );
        let surface = self.loader.load(name, center)?;
        self.ctx.define_object(name, surface);
        debug!(name, ?center, line_number, "object defined");
        Ok(())
    }
}

fn require<'k>(
    args: &'k KeyValues,
    directive: &'static str,
    key: &'static str,
    line_number: usize,
) -> Result<&'k str> {
    args.get(key).ok_or(Error::MissingArgument {
        line_number,
        directive,
        key,
    })
}

fn write_rewrite(output: &mut String, line: &str, eol: &str, rewrite: &Rewrite) {
    let inner_eol = if eol.is_empty() { "\n" } else { eol };
    let (command, _) = split_command(line);
    write!(output, ";{} {}{}", rewrite.tag, line, inner_eol).expect("write failed");
    for m in &rewrite.moves {
        write!(output, "{} {};{}{}", command, m, m.meta, inner_eol).expect("write failed");
    }
    write!(output, ";{}_END{}", rewrite.tag, eol).expect("write failed");
}

/// Runs the pass over a whole file's text.
pub fn process_gcode(
    gcode: &str,
    loader: &mut dyn SurfaceLoader,
    config: &ContourConfig,
) -> Result<(String, ProcessStats)> {
    config.validate()?;
    let lines: Vec<&str> = gcode.split_inclusive('\n').map(|raw| split_eol(raw).0).collect();
    let ctx = Context::new(&lines)?;
    LineProcessor::new(ctx, loader, config).run(gcode)
}
