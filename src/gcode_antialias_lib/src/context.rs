use std::collections::HashMap;

use tracing::debug;

use crate::contour::Layer;
use crate::dialect::{Dialect, Tokens};
use crate::error::{Error, Result};
use crate::geometry::Point;
use crate::surface::SurfaceQuery;
use crate::words::KeyValues;
use crate::Mm;

/// Settings the slicer embeds as `; key = value` comments between its config block markers.
/// Only the first block is read.
pub fn parse_config_block<'a, I>(lines: I, tokens: &Tokens) -> Result<KeyValues>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut config = KeyValues::default();
    let mut is_in_config = false;
    for (index, line) in lines.into_iter().enumerate() {
        if !is_in_config && line.starts_with(tokens.config_block_start) {
            is_in_config = true;
        } else if is_in_config && line.starts_with(tokens.config_block_end) {
            break;
        } else if is_in_config {
            let entry = line.strip_prefix(';').unwrap_or(line);
            let Some((key, value)) = entry.split_once('=') else {
                return Err(Error::MalformedConfigLine {
                    line_number: index + 1,
                    line: line.to_owned(),
                });
            };
            config.insert(key.trim(), value.trim());
        }
    }
    Ok(config)
}

/// Everything the line processor knows about the printer at the current line.
///
/// `last_p` is always where the last processed move left the nozzle, so the next move's origin
/// can be taken from it.
pub struct Context {
    pub dialect: Dialect,
    pub tokens: &'static Tokens,
    pub config_block: KeyValues,

    pub line_type: String,

    pub last_p: Point,
    // only tracked in absolute extrusion mode
    pub last_e: Mm,

    pub layer_number: u32,
    // nominal slice plane from the slicer's z/height/width comments
    pub layer: Layer,
    pub wipe: bool,

    pub relative_extrusion: bool,
    pub relative_positioning: bool,

    exclude_objects: HashMap<String, Box<dyn SurfaceQuery>>,
    active_object: Option<String>,

    // informational only
    pub progress_percent: Mm,
    pub progress_remaining_minutes: Mm,
}

impl Context {
    /// Detects the dialect and reads the config block; `lines` is the whole file.
    pub fn new(lines: &[&str]) -> Result<Context> {
        let dialect = Dialect::detect(lines.iter().copied())?;
        let tokens = dialect.tokens();
        let config_block = parse_config_block(lines.iter().copied(), tokens)?;
        debug!(?dialect, config_entries = config_block.len(), "read config block");
        Ok(Context {
            dialect,
            tokens,
            config_block,
            line_type: String::new(),
            last_p: Point::default(),
            last_e: 0.0,
            layer_number: 0,
            layer: Layer::default(),
            wipe: false,
            relative_extrusion: false,
            relative_positioning: false,
            exclude_objects: HashMap::new(),
            active_object: None,
            progress_percent: 0.0,
            progress_remaining_minutes: 0.0,
        })
    }

    pub fn define_object(&mut self, name: &str, surface: Box<dyn SurfaceQuery>) {
        self.exclude_objects.insert(name.to_owned(), surface);
    }

    pub fn start_object(&mut self, name: &str, line_number: usize) -> Result<()> {
        if !self.exclude_objects.contains_key(name) {
            return Err(Error::UnknownObject {
                line_number,
                name: name.to_owned(),
            });
        }
        self.active_object = Some(name.to_owned());
        Ok(())
    }

    pub fn end_object(&mut self) {
        self.active_object = None;
    }

    pub fn active_object(&self) -> Option<&str> {
        self.active_object.as_deref()
    }

    pub fn active_surface(&self) -> Option<&dyn SurfaceQuery> {
        self.active_object
            .as_ref()
            .and_then(|name| self.exclude_objects.get(name))
            .map(|surface| &**surface)
    }
}
