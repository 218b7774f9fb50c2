use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that aborts a run. There is no recovery; the first error ends the pass.
#[derive(Error, Debug)]
pub enum Error {
    #[error("slicer dialect not recognized in the first 10 lines")]
    DialectNotRecognized,

    #[error("line {line_number}: config block line has no '=': {line:?}")]
    MalformedConfigLine { line_number: usize, line: String },

    #[error("line {line_number}: malformed word {token:?}")]
    InvalidWord { line_number: usize, token: String },

    #[error("line {line_number}: invalid number {value:?}")]
    InvalidNumber { line_number: usize, value: String },

    #[error("line {line_number}: {directive} is missing {key}")]
    MissingArgument {
        line_number: usize,
        directive: &'static str,
        key: &'static str,
    },

    #[error("contour resolution must be at least {min} mm, got {resolution}")]
    InvalidResolution { resolution: f64, min: f64 },

    // The two contour preconditions are line processor bugs, not bad input.
    #[error("cannot contour a move in relative positioning mode")]
    RelativeContour,

    #[error("cannot contour a move without extrusion")]
    MissingFlow,

    #[error("line {line_number}: object {name:?} was never defined")]
    UnknownObject { line_number: usize, name: String },

    #[error("failed to load mesh {}", path.display())]
    MeshLoad {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("mesh {} has no triangles", path.display())]
    EmptyMesh { path: PathBuf },

    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
