//! CLI 1.x ASCII slice file writer and reader.
//!
//! Writer output:
//! ```text
//! $$HEADERSTART
//! $$ASCII
//! $$UNITS/1
//! $$VERSION/200
//! $$LABEL/1, part1
//! $$LAYERS/1
//! $$HEADEREND
//! $$GEOMETRYSTART
//! $$LAYER/<z_mm>
//! $$POLYLINE/<id>,<dir>,<n>,<x1>,<y1>,...
//! $$HATCHES/<id>/<n>,<x1>,<y1>,<x2>,<y2>,...
//! $$GEOMETRYEND
//! ```
//! `dir` 1 marks outer contours, 0 inner ones; polylines excluded from the
//! slice are skipped. The reader is whitespace tolerant, scales coordinates
//! by `$$UNITS` and ignores directives it does not know.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use glam::Vec2;

use crate::compute::core::ComputeCore;
use crate::kernel::payload::{PrimitiveMeta, Primitives};
use crate::kernel::types::PrimitiveType;
use crate::slice::contour::{ContourMode, PolyLine};

#[derive(Debug)]
pub enum CliError {
    Io(std::io::Error),
    /// Bounding box discovery failed; export cannot derive the layer range.
    BoundingBoxUnavailable,
    /// Slice rendering failed for a layer.
    SliceFailed(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Io(err) => write!(f, "cli io error: {err}"),
            CliError::BoundingBoxUnavailable => {
                write!(f, "cli export failed: bounding box is not available")
            }
            CliError::SliceFailed(msg) => write!(f, "cli export failed: {msg}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io(err)
    }
}

#[derive(Default)]
pub struct CliWriter {
    file: Option<BufWriter<File>>,
    filename: PathBuf,
    layer_thickness_mm: f32,
    model_id: u32,
    start_height_mm: f32,
    end_height_mm: f32,
    progress: f32,
}

impl CliWriter {
    pub fn new(layer_thickness_mm: f32) -> Self {
        Self {
            layer_thickness_mm: layer_thickness_mm.max(f32::EPSILON),
            ..Self::default()
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    /// Export every layer of the model in one call.
    pub fn save(&mut self, filename: &Path, core: &mut ComputeCore) -> Result<(), CliError> {
        self.begin_export(filename, core)?;
        while self.advance_export(core)? {}
        self.finalize_export()
    }

    /// Export only the layer at the current slice height.
    pub fn save_current_layer(
        &mut self,
        filename: &Path,
        core: &mut ComputeCore,
    ) -> Result<(), CliError> {
        self.open(filename)?;
        self.write_header()?;
        core.request_contour_update()
            .map_err(|e| CliError::SliceFailed(e.to_string()))?;
        let polylines = core.contour().to_vec();
        self.write_layer(&polylines, core.slice_height())?;
        self.finalize_export()
    }

    /// Phase 1 of 3: open the file, write the header and position the
    /// slicer at the bottom of the model.
    pub fn begin_export(
        &mut self,
        filename: &Path,
        core: &mut ComputeCore,
    ) -> Result<(), CliError> {
        self.open(filename)?;
        self.write_header()?;

        if !core.update_bbox() {
            return Err(CliError::BoundingBoxUnavailable);
        }
        let bb = *core.bounding_box().expect("update_bbox succeeded");
        self.start_height_mm = bb.min.z.max(0.0);
        self.end_height_mm = bb.max.z;
        self.progress = 0.0;
        core.set_slice_height(self.start_height_mm);
        Ok(())
    }

    /// Phase 2: slice and write the next layer. Returns true while layers
    /// remain.
    pub fn advance_export(&mut self, core: &mut ComputeCore) -> Result<bool, CliError> {
        let z_previous = core.slice_height();
        let z_mm = self.round_to_layer_thickness(z_previous + self.layer_thickness_mm);
        core.set_slice_height(z_mm);
        core.request_contour_update()
            .map_err(|e| CliError::SliceFailed(e.to_string()))?;
        let polylines = core.contour().to_vec();
        self.write_layer(&polylines, z_mm)?;

        let span = (self.end_height_mm - self.start_height_mm).max(f32::EPSILON);
        self.progress = (z_mm - self.start_height_mm) / span;
        Ok(z_mm < self.end_height_mm + self.layer_thickness_mm)
    }

    /// Phase 3: close the geometry block and the file.
    pub fn finalize_export(&mut self) -> Result<(), CliError> {
        if let Some(mut file) = self.file.take() {
            writeln!(file, "$$GEOMETRYEND")?;
            file.flush()?;
        }
        Ok(())
    }

    fn open(&mut self, filename: &Path) -> Result<(), CliError> {
        self.filename = filename.to_path_buf();
        self.model_id = 0;
        self.file = Some(BufWriter::new(File::create(filename)?));
        Ok(())
    }

    fn write_header(&mut self) -> Result<(), CliError> {
        let file = self.file.as_mut().expect("writer is open");
        writeln!(file, "$$HEADERSTART")?;
        writeln!(file, "$$ASCII")?;
        writeln!(file, "$$UNITS/1")?;
        writeln!(file, "$$VERSION/200")?;
        writeln!(file, "$$LABEL/1, part1")?;
        writeln!(file, "$$LAYERS/1")?;
        writeln!(file, "$$HEADEREND")?;
        writeln!(file, "$$GEOMETRYSTART")?;
        Ok(())
    }

    /// Write one layer: closed polylines as POLYLINE records, open ones as
    /// HATCHES.
    pub fn write_layer(&mut self, polylines: &[PolyLine], z_mm: f32) -> Result<(), CliError> {
        {
            let file = self.file.as_mut().expect("writer is open");
            writeln!(file, "$$LAYER/{z_mm}")?;
        }
        for polyline in polylines {
            match polyline.contour_mode {
                ContourMode::ExcludeFromSlice => continue,
                ContourMode::OpenLine => self.write_hatches(polyline)?,
                ContourMode::Outer | ContourMode::Inner => self.write_polyline(polyline)?,
            }
        }
        Ok(())
    }

    fn write_polyline(&mut self, polyline: &PolyLine) -> Result<(), CliError> {
        self.model_id += 1;
        let file = self.file.as_mut().expect("writer is open");
        write!(
            file,
            "$$POLYLINE/{},{},{}",
            self.model_id,
            polyline.contour_mode as i32,
            polyline.vertices.len()
        )?;
        for vertex in &polyline.vertices {
            write!(file, ",{},{}", vertex.x, vertex.y)?;
        }
        writeln!(file)?;
        Ok(())
    }

    fn write_hatches(&mut self, polyline: &PolyLine) -> Result<(), CliError> {
        if polyline.vertices.len() < 2 {
            return Ok(());
        }
        self.model_id += 1;
        let file = self.file.as_mut().expect("writer is open");
        let segments = polyline.vertices.len() - 1;
        write!(file, "$$HATCHES/{}/{}", self.model_id, segments)?;
        for pair in polyline.vertices.windows(2) {
            write!(file, ",{},{},{},{}", pair[0].x, pair[0].y, pair[1].x, pair[1].y)?;
        }
        writeln!(file)?;
        Ok(())
    }

    fn round_to_layer_thickness(&self, value: f32) -> f32 {
        (value / self.layer_thickness_mm).round() * self.layer_thickness_mm
    }
}

/// Parses the subset the writer emits back into the primitive payload:
/// polygons as outer/inner polygon metas, hatches as line metas, each meta
/// carrying the layer range in its bounding box.
#[derive(Default)]
pub struct CliReader;

impl CliReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read(&self, filename: &Path, primitives: &mut Primitives) -> Result<(), CliError> {
        primitives.clear();
        let file = BufReader::new(File::open(filename)?);

        let mut unit = 1.0f32;
        let mut previous_height = 0.0f32;
        let mut z_height = 0.0f32;

        for line in file.lines() {
            let line = line?;
            let line = line.trim();

            if let Some(rest) = line.strip_prefix("$$UNITS/") {
                unit = rest.trim().parse().unwrap_or(1.0);
            } else if let Some(rest) = line.strip_prefix("$$LAYER/") {
                previous_height = z_height;
                z_height = rest.trim().parse::<f32>().unwrap_or(0.0) * unit;
            } else if let Some(rest) = line.strip_prefix("$$POLYLINE/") {
                self.read_polyline(rest, unit, previous_height, z_height, primitives);
            } else if let Some(rest) = line.strip_prefix("$$HATCHES/") {
                self.read_hatches(rest, unit, previous_height, z_height, primitives);
            }
            // Unknown directives are ignored.
        }

        calculate_bounding_volumes(primitives);
        Ok(())
    }

    fn read_polyline(
        &self,
        record: &str,
        unit: f32,
        previous_height: f32,
        z_height: f32,
        primitives: &mut Primitives,
    ) {
        let mut fields = record.split(',').map(str::trim);
        let _id = fields.next();
        let dir: i32 = fields.next().and_then(|f| f.parse().ok()).unwrap_or(1);
        let _count = fields.next();

        let mut meta = PrimitiveMeta::new(if dir == 1 {
            PrimitiveType::OuterPolygon
        } else {
            PrimitiveType::InnerPolygon
        });
        meta.start = primitives.data.len() as i32;
        read_coordinate_pairs(fields, unit, &mut primitives.data);
        meta.end = primitives.data.len() as i32;
        meta.bounding_box.min[2] = previous_height;
        meta.bounding_box.max[2] = z_height;
        primitives.meta.push(meta);
    }

    fn read_hatches(
        &self,
        record: &str,
        unit: f32,
        previous_height: f32,
        z_height: f32,
        primitives: &mut Primitives,
    ) {
        // "<id>/<n>,<coords>": the id is separated by a slash.
        let Some((_id, rest)) = record.split_once('/') else {
            return;
        };
        let mut fields = rest.split(',').map(str::trim);
        let _count = fields.next();

        let mut meta = PrimitiveMeta::new(PrimitiveType::Lines);
        meta.start = primitives.data.len() as i32;
        read_coordinate_pairs(fields, unit, &mut primitives.data);
        meta.end = primitives.data.len() as i32;
        meta.bounding_box.min[2] = previous_height;
        meta.bounding_box.max[2] = z_height;
        primitives.meta.push(meta);
    }
}

fn read_coordinate_pairs<'a>(
    fields: impl Iterator<Item = &'a str>,
    unit: f32,
    data: &mut Vec<f32>,
) {
    for field in fields {
        if let Ok(value) = field.parse::<f32>() {
            data.push(value * unit);
        }
    }
}

/// Recompute XY bounds and centers of every meta from its coordinate pairs.
fn calculate_bounding_volumes(primitives: &mut Primitives) {
    for meta in &mut primitives.meta {
        if meta.start < 0 || meta.end as usize > primitives.data.len() {
            continue;
        }

        let mut min = Vec2::splat(f32::MAX);
        let mut max = Vec2::splat(f32::MIN);
        let mut center = Vec2::ZERO;
        let mut count = 0;

        let range = &primitives.data[meta.start as usize..meta.end as usize];
        for pair in range.chunks_exact(2) {
            let point = Vec2::new(pair[0], pair[1]);
            min = min.min(point);
            max = max.max(point);
            center += point;
            count += 1;
        }

        if count > 0 {
            center /= count as f32;
            meta.center[0] = center.x;
            meta.center[1] = center.y;
            meta.bounding_box.min[0] = min.x;
            meta.bounding_box.min[1] = min.y;
            meta.bounding_box.max[0] = max.x;
            meta.bounding_box.max[1] = max.y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::field::sdf::sphere;

    fn square_polyline() -> PolyLine {
        PolyLine {
            vertices: vec![
                Vec2::new(0.0, 0.0),
                Vec2::new(10.0, 0.0),
                Vec2::new(10.0, 10.0),
                Vec2::new(0.0, 10.0),
            ],
            contour_mode: ContourMode::Outer,
            closed: true,
        }
    }

    fn write_single_layer(polylines: &[PolyLine], z_mm: f32) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = CliWriter::new(0.1);
        writer.open(file.path()).unwrap();
        writer.write_header().unwrap();
        writer.write_layer(polylines, z_mm).unwrap();
        writer.finalize_export().unwrap();
        file
    }

    #[test]
    fn square_round_trips_through_write_and_read() {
        let file = write_single_layer(&[square_polyline()], 0.1);

        let mut primitives = Primitives::new();
        CliReader::new().read(file.path(), &mut primitives).unwrap();

        assert_eq!(primitives.meta_count(), 1);
        let meta = &primitives.meta[0];
        assert_eq!(meta.primitive_type().unwrap(), PrimitiveType::OuterPolygon);
        assert_eq!(meta.len(), 8, "four vertices, two floats each");

        let bb = meta.bounds();
        assert_eq!(bb.min.x, 0.0);
        assert_eq!(bb.min.y, 0.0);
        assert_eq!(bb.max.x, 10.0);
        assert_eq!(bb.max.y, 10.0);
        assert_eq!(meta.bounding_box.min[2], 0.0);
        assert!((meta.bounding_box.max[2] - 0.1).abs() < 1e-6);

        // Vertex lists are equal after the unit conversion.
        let vertices: Vec<f32> =
            primitives.data[meta.start as usize..meta.end as usize].to_vec();
        assert_eq!(
            vertices,
            vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0]
        );
    }

    #[test]
    fn excluded_polylines_are_skipped() {
        let mut excluded = square_polyline();
        excluded.contour_mode = ContourMode::ExcludeFromSlice;
        let file = write_single_layer(&[excluded, square_polyline()], 0.2);

        let mut primitives = Primitives::new();
        CliReader::new().read(file.path(), &mut primitives).unwrap();
        assert_eq!(primitives.meta_count(), 1);
    }

    #[test]
    fn inner_contours_carry_direction_zero() {
        let mut inner = square_polyline();
        inner.contour_mode = ContourMode::Inner;
        let file = write_single_layer(&[inner], 0.1);

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("$$POLYLINE/1,0,4,"));

        let mut primitives = Primitives::new();
        CliReader::new().read(file.path(), &mut primitives).unwrap();
        assert_eq!(
            primitives.meta[0].primitive_type().unwrap(),
            PrimitiveType::InnerPolygon
        );
    }

    #[test]
    fn hatches_round_trip_as_lines() {
        let open = PolyLine {
            vertices: vec![Vec2::ZERO, Vec2::new(5.0, 0.0), Vec2::new(5.0, 5.0)],
            contour_mode: ContourMode::OpenLine,
            closed: false,
        };
        let file = write_single_layer(&[open], 0.1);

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.contains("$$HATCHES/1/2,"));

        let mut primitives = Primitives::new();
        CliReader::new().read(file.path(), &mut primitives).unwrap();
        assert_eq!(
            primitives.meta[0].primitive_type().unwrap(),
            PrimitiveType::Lines
        );
        // Two segments, four floats each.
        assert_eq!(primitives.meta[0].len(), 8);
    }

    #[test]
    fn units_scale_on_read() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "$$HEADERSTART\n$$UNITS/0.5\n$$HEADEREND\n$$GEOMETRYSTART\n\
             $$LAYER/2\n$$POLYLINE/1,1,2,2,2,4,4\n$$GEOMETRYEND\n",
        )
        .unwrap();

        let mut primitives = Primitives::new();
        CliReader::new().read(file.path(), &mut primitives).unwrap();
        let meta = &primitives.meta[0];
        assert_eq!(meta.bounding_box.max[2], 1.0, "layer height scales");
        assert_eq!(
            &primitives.data[meta.start as usize..meta.end as usize],
            &[1.0, 1.0, 2.0, 2.0]
        );
    }

    #[test]
    fn unknown_directives_are_ignored() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            "$$HEADERSTART\n$$SOMETHING/odd\n$$HEADEREND\n$$GEOMETRYSTART\n$$GEOMETRYEND\n",
        )
        .unwrap();
        let mut primitives = Primitives::new();
        CliReader::new().read(file.path(), &mut primitives).unwrap();
        assert_eq!(primitives.meta_count(), 0);
    }

    #[test]
    fn full_export_of_a_sphere_produces_layers() {
        let mut core = ComputeCore::new(Arc::new(sphere(3.0)));
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut writer = CliWriter::new(0.5);
        writer.save(file.path(), &mut core).unwrap();
        assert!(writer.progress() >= 1.0 - 1e-3);

        let content = std::fs::read_to_string(file.path()).unwrap();
        assert!(content.starts_with("$$HEADERSTART"));
        assert!(content.trim_end().ends_with("$$GEOMETRYEND"));
        let layer_count = content.matches("$$LAYER/").count();
        assert!(layer_count >= 5, "expected several layers, got {layer_count}");
        assert!(content.contains("$$POLYLINE/"));
    }
}
