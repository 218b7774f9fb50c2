use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

pub mod context;
pub mod contour;
pub mod dialect;
pub mod error;
pub mod extrusion;
pub mod geometry;
pub mod process;
pub mod surface;
pub mod words;

pub use contour::{ContourConfig, Layer, DEFAULT_RESOLUTION, LEGACY_RESOLUTION, MIN_RESOLUTION};
pub use dialect::Dialect;
pub use error::{Error, Result};
pub use process::{process_gcode, ProcessStats};
pub use surface::{MeshScene, StlLoader, SurfaceLoader, SurfaceQuery};

// Slicer output only carries 3-6 decimals, but flow is rescaled and summed per segment, and STL
// vertices are already single precision, so f64 keeps the arithmetic from adding its own error.
pub use f64 as Mm;
pub use f64 as Factor;
pub use u32 as TriangleIndex;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Where object meshes are looked up; defaults to the input file's directory.
    pub model_dir: Option<PathBuf>,
    pub contour: ContourConfig,
}

// output_filename can be the same as input_filename, so we don't overwrite output until we have
// complete output
pub fn process_files(
    input_filename: &Path,
    output_filename: &Path,
    options: &RunOptions,
) -> Result<ProcessStats> {
    let mut tmp_output_filename = output_filename.as_os_str().to_owned();
    tmp_output_filename.push(".tmp");
    let tmp_output_filename = PathBuf::from(tmp_output_filename);

    let model_dir = match &options.model_dir {
        Some(dir) => dir.clone(),
        None => input_filename
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };

    info!(input = %input_filename.display(), models = %model_dir.display(), "reading gcode");
    let gcode = fs::read_to_string(input_filename).map_err(|source| Error::Io {
        path: input_filename.to_owned(),
        source,
    })?;

    let before_process = Instant::now();
    let mut loader = StlLoader::new(model_dir);
    let (output, stats) = process_gcode(&gcode, &mut loader, &options.contour)?;
    let process_elapsed = before_process.elapsed();
    info!(
        lines = stats.lines,
        moves = stats.moves,
        contoured_moves = stats.contoured_moves,
        z_resets = stats.z_resets,
        elapsed = ?process_elapsed,
        "done processing"
    );

    fs::write(&tmp_output_filename, output).map_err(|source| Error::Io {
        path: tmp_output_filename.clone(),
        source,
    })?;
    fs::rename(&tmp_output_filename, output_filename).map_err(|source| Error::Io {
        path: output_filename.to_owned(),
        source,
    })?;
    info!(output = %output_filename.display(), "wrote gcode");

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::tests::write_box_stl;

    const GCODE: &str = "; generated by OrcaSlicer 2.1.1\n\
                         ; EXECUTABLE_BLOCK_START\n\
                         M83\n\
                         EXCLUDE_OBJECT_DEFINE NAME=box.stl_id_0_copy_0 CENTER=100,100\n\
                         G1 X98 Y103 Z0.5 F1800\n\
                         ;LAYER_CHANGE\n\
                         ;Z:0.5\n\
                         ;HEIGHT:0.25\n\
                         ;TYPE:Top surface\n\
                         ;WIDTH:0.5\n\
                         EXCLUDE_OBJECT_START NAME=box.stl_id_0_copy_0\n\
                         G1 X102 Y103 E.16\n\
                         EXCLUDE_OBJECT_END NAME=box.stl_id_0_copy_0\n\
                         ; EXECUTABLE_BLOCK_END\n";

    #[test]
    fn rewrites_in_place_with_models_next_to_input() {
        let dir = tempfile::tempdir().unwrap();
        write_box_stl(&dir.path().join("box.stl"), [0.0, 0.0, 0.0], [10.0, 10.0, 0.625]);
        let path = dir.path().join("part.gcode");
        fs::write(&path, GCODE).unwrap();

        let stats = process_files(&path, &path, &RunOptions::default()).unwrap();
        assert_eq!(stats.contoured_moves, 1);
        assert_eq!(stats.lines, GCODE.lines().count());

        let output = fs::read_to_string(&path).unwrap();
        assert!(output.contains(";TOP SURFACE_CONTOUR G1 X102 Y103 E.16\n"));
        assert!(!dir.path().join("part.gcode.tmp").exists());
    }

    #[test]
    fn explicit_model_dir_and_output() {
        let input_dir = tempfile::tempdir().unwrap();
        let model_dir = tempfile::tempdir().unwrap();
        write_box_stl(&model_dir.path().join("box.stl"), [0.0, 0.0, 0.0], [10.0, 10.0, 0.5]);
        let input = input_dir.path().join("part.gcode");
        let output = input_dir.path().join("part.aa.gcode");
        fs::write(&input, GCODE).unwrap();

        let options = RunOptions {
            model_dir: Some(model_dir.path().to_owned()),
            ..Default::default()
        };
        let stats = process_files(&input, &output, &options).unwrap();
        assert_eq!(stats.contoured_moves, 0);
        assert_eq!(fs::read_to_string(&output).unwrap(), GCODE);
    }

    #[test]
    fn zero_resolution_fails_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        write_box_stl(&dir.path().join("box.stl"), [0.0, 0.0, 0.0], [10.0, 10.0, 0.625]);
        let path = dir.path().join("part.gcode");
        fs::write(&path, GCODE).unwrap();

        let options = RunOptions {
            contour: ContourConfig { resolution: 0.0, ..Default::default() },
            ..Default::default()
        };
        assert!(matches!(
            process_files(&path, &path, &options),
            Err(Error::InvalidResolution { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), GCODE);
        assert!(!dir.path().join("part.gcode.tmp").exists());
    }

    #[test]
    fn failed_run_leaves_output_alone() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("part.gcode");
        // no box.stl next to it
        fs::write(&path, GCODE).unwrap();

        assert!(matches!(
            process_files(&path, &path, &RunOptions::default()),
            Err(Error::MeshLoad { .. })
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), GCODE);

        let missing = dir.path().join("missing.gcode");
        assert!(matches!(
            process_files(&missing, &path, &RunOptions::default()),
            Err(Error::Io { .. })
        ));
    }
}
