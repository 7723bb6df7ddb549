//! Dataset summaries and previews.

use crate::format::IDataset;
use crate::util::{Coord, ElementType, Error, Result, Shape};

/// Human-readable description of a dataset.
#[derive(Clone, Debug)]
pub struct DatasetInfo {
    pub path: String,
    pub element_type: ElementType,
    pub shape: Shape,
    pub chunk_shape: Option<Coord>,
    pub compression: Option<u32>,
    pub num_chunks: usize,
    /// Payload bytes on disk.
    pub stored_bytes: u64,
}

impl DatasetInfo {
    pub fn new(dataset: &IDataset) -> Self {
        let (chunk_shape, compression) = match dataset.layout() {
            crate::storage::Layout::Chunked { chunk_shape, compression } => (Some(chunk_shape), compression),
            crate::storage::Layout::Contiguous => (None, None),
        };
        Self {
            path: dataset.path().to_string(),
            element_type: dataset.element_type(),
            shape: dataset.shape().clone(),
            chunk_shape,
            compression,
            num_chunks: dataset.num_chunks(),
            stored_bytes: dataset.stored_bytes(),
        }
    }

    /// "47 x 47 x 47 = 103823", or "scalar".
    pub fn shape_string(&self) -> String {
        if self.shape.is_scalar() {
            return "scalar".to_string();
        }
        let sizes = self.shape.sizes();
        format!("{} = {}", join_dims(&sizes), self.shape.num_elements())
    }

    /// "32 x 16 x 16 = 8192" for chunked datasets.
    pub fn chunk_shape_string(&self) -> Option<String> {
        self.chunk_shape
            .as_ref()
            .map(|c| format!("{} = {}", join_dims(c), c.iter().product::<u64>()))
    }

    pub fn type_string(&self) -> String {
        self.element_type.to_string()
    }

    /// In-memory size of all elements; stored size for variable-length types.
    pub fn total_bytes(&self) -> u64 {
        match self.element_type.size() {
            Some(size) => self.shape.num_elements().saturating_mul(size as u64),
            None => self.stored_bytes,
        }
    }

    pub fn size_string(&self) -> String {
        format_size(self.total_bytes())
    }
}

fn join_dims(dims: &[u64]) -> String {
    dims.iter().map(u64::to_string).collect::<Vec<_>>().join(" x ")
}

/// Format a byte count with a binary unit.
pub fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    match size {
        0..KB => format!("{} B", size),
        KB..MB => format!("{:.2} KB", size as f64 / KB as f64),
        MB..GB => format!("{:.2} MB", size as f64 / MB as f64),
        _ => format!("{:.2} GB", size as f64 / GB as f64),
    }
}

/// Index/value points of a one-dimensional numeric dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetPreview {
    pub points: Vec<(f64, f64)>,
    pub min: f64,
    pub max: f64,
}

impl DatasetPreview {
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl IDataset {
    /// Read a one-dimensional numeric (or boolean) dataset as `f64` points.
    /// NaN values are kept but ignored for `min`/`max`.
    pub fn preview(&self) -> Result<DatasetPreview> {
        let ty = self.element_type();
        let size = match ty.size() {
            Some(size) if self.shape().rank() == 1 && (ty.is_numeric() || ty == ElementType::Bool) => size,
            _ => {
                return Err(Error::TypeMismatch {
                    expected: "one-dimensional numeric dataset".to_string(),
                    actual: format!("{} {}", ty, self.shape()),
                });
            }
        };

        let bytes = self.read_all()?;
        let mut points = Vec::with_capacity(bytes.len() / size);
        let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
        for (i, cell) in bytes.chunks_exact(size).enumerate() {
            let y = ty.cell_to_f64(cell).unwrap_or(f64::NAN);
            if !y.is_nan() {
                min = min.min(y);
                max = max.max(y);
            }
            points.push((i as f64, y));
        }
        if min > max {
            (min, max) = (0.0, 0.0);
        }
        Ok(DatasetPreview { points, min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Selection;
    use crate::format::{ContainerReader, ContainerWriter};
    use crate::storage::DatasetBuilder;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(830_584), "811.12 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MB");
        assert_eq!(format_size(5 * 1024 * 1024 * 1024), "5.00 GB");
    }

    #[test]
    fn test_info_and_preview() -> Result<()> {
        let mut w = ContainerWriter::in_memory();
        let root = w.root();
        let cube = w.add_dataset(root, "cube", DatasetBuilder::of::<f64>([47, 47, 47]).chunked(&[32, 16, 16]))?;
        w.set_attribute(cube, "units", "m")?;
        let wave = w.add_dataset(root, "wave", DatasetBuilder::of::<f32>([4]))?;
        w.write_typed(wave, &Selection::from(0..4), &[0.5f32, -1.0, f32::NAN, 2.0])?;
        let reader = ContainerReader::from_bytes(w.finalize_to_vec()?)?;

        let info = DatasetInfo::new(&reader.dataset("/cube")?);
        assert_eq!(info.shape_string(), "47 x 47 x 47 = 103823");
        assert_eq!(info.chunk_shape_string().as_deref(), Some("32 x 16 x 16 = 8192"));
        assert_eq!(info.type_string(), "f64");
        assert_eq!(info.size_string(), "811.12 KB");
        assert_eq!(info.num_chunks, 0);

        let preview = reader.dataset("/wave")?.preview()?;
        assert_eq!(preview.len(), 4);
        assert_eq!(preview.min, -1.0);
        assert_eq!(preview.max, 2.0);
        assert!(reader.dataset("/cube")?.preview().is_err());
        Ok(())
    }
}
