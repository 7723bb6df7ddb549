//! Reference fixture set.
//!
//! Writes a small family of containers exercising every feature: typed
//! attributes, nested groups, chunked and compressed datasets, scalars,
//! soft and external links, and a resizable variable-length dataset.
//! Data is deterministic so fixtures are reproducible.

use std::f64::consts::PI;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::core::{AttributeValue, Selection};
use crate::directory::Link;
use crate::format::{ContainerStats, ContainerWriter, WriteOptions};
use crate::storage::DatasetBuilder;
use crate::util::{Dim, ElementType, Result, Shape};

pub const TEST_FILE: &str = "test.hcf";
pub const SCALAR_FILE: &str = "test_scalar_ds.hcf";
pub const LONG_ATTRIBUTES_FILE: &str = "many_long_attributes.hcf";
pub const INTERNAL_LINKS_FILE: &str = "internal_links_datasets.hcf";
pub const EXTERNAL_DATA_FILE: &str = "external_data.hcf";
pub const MAIN_FILE: &str = "main.hcf";
pub const VAR_ARRAY_FILE: &str = "var_arr.hcf";

/// Text stored in every attribute of the long-attributes fixture.
pub const LONG_TEXT: &str = "This is a very long string, much longer that can be rendered under normal \
situations. But this serves as a way to render it nonetheless.\nAlso maybe we should display it with \
newline support?";

/// Write every fixture into `dir` and return the written paths.
pub fn write_fixtures(dir: &Path, options: &WriteOptions) -> Result<Vec<PathBuf>> {
    let writers: [(&str, fn(&Path, &WriteOptions) -> Result<ContainerStats>); 7] = [
        (TEST_FILE, write_test_file),
        (SCALAR_FILE, write_scalar_file),
        (LONG_ATTRIBUTES_FILE, write_long_attributes_file),
        (INTERNAL_LINKS_FILE, write_internal_links_file),
        (EXTERNAL_DATA_FILE, write_external_data_file),
        (MAIN_FILE, write_main_file),
        (VAR_ARRAY_FILE, write_var_array_file),
    ];
    let mut written = Vec::with_capacity(writers.len());
    for (name, write) in writers {
        let path = dir.join(name);
        let stats = write(&path, options)?;
        info!(file = %path.display(), %stats, "wrote fixture");
        written.push(path);
    }
    Ok(written)
}

/// Evenly spaced samples over `[start, end]`.
fn linspace(start: f64, end: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n > 1 { (end - start) / (n - 1) as f64 } else { 0.0 };
    (0..n).map(move |i| start + step * i as f64)
}

/// Deterministic values in `[0, 1)` standing in for random data.
fn pattern(n: usize, seed: f64) -> Vec<f64> {
    (0..n).map(|i| ((i as f64 * 12.9898 + seed * 78.233).sin() * 43758.5453).fract().abs()).collect()
}

/// Attributes, nested groups, curves and a chunked dataset.
#[allow(clippy::approx_constant)]
pub fn write_test_file(path: &Path, options: &WriteOptions) -> Result<ContainerStats> {
    let mut w = ContainerWriter::create_with(path, options.clone())?;
    let root = w.root();
    let grid = pattern(100 * 100, 1.0);
    let grid_sel = Selection::all(&[100, 100]);

    let ds = w.add_dataset(root, "attributes_ds", DatasetBuilder::of::<f64>([100, 100]))?;
    w.write_typed(ds, &grid_sel, &grid)?;
    w.set_attribute(ds, "description", "This is a random dataset")?;
    w.set_attribute(ds, "units", "arbitrary units")?;
    w.set_attribute(ds, "author", "Your Name")?;
    w.set_attribute(ds, "array", AttributeValue::array(&[1i64, 2, 3, 4, 5]))?;
    w.set_attribute(ds, "array2", AttributeValue::array(&[1.0f64, 2.0, 3.0, 4.0, 5.0]))?;
    w.set_attribute(ds, "array3", AttributeValue::booleans(&[true, false, true, false, true]))?;
    for name in ["array4", "array5", "array6"] {
        w.set_attribute(ds, name, AttributeValue::fixed_strings(&[b"hello", b"world"], 5, 0)?)?;
    }
    w.set_attribute(ds, "float", 3.14f64)?;
    w.set_attribute(ds, "float_array", AttributeValue::array(&[3.14f64, 2.71, 1.41]))?;
    w.set_attribute(ds, "int", 42i64)?;
    w.set_attribute(ds, "bool", true)?;

    let groups: [(&str, &[&str]); 4] = [
        ("/group_1", &["dataset_2"]),
        ("/group_1/group_2", &["dataset_3", "dataset_4", "dataset_5"]),
        ("/group_1/group_3", &["dataset_6", "dataset_7", "dataset_8"]),
        ("/group_1/group_3/group_4", &["dataset_9", "dataset_10", "dataset_11"]),
    ];
    for (group_path, datasets) in groups {
        let group = w.create_groups(group_path)?;
        for name in datasets {
            let d = w.add_dataset(group, name, DatasetBuilder::of::<f64>([100, 100]))?;
            w.write_typed(d, &grid_sel, &grid)?;
        }
    }

    // Five sine periods, scaled down from the original gigabyte.
    let n = 1 << 16;
    let big: Vec<f32> = linspace(0.0, 10.0 * PI, n).map(|x| x.sin() as f32).collect();
    let d = w.add_dataset(root, "big_dataset", DatasetBuilder::of::<f32>([n as u64]))?;
    w.write_typed(d, &Selection::from(0..n as u64), &big)?;

    let shape = [10u64, 1024, 15];
    let cube = pattern(shape.iter().product::<u64>() as usize, 2.0);
    let builder = DatasetBuilder::of::<f64>(shape).chunked(&[1, 256, 15]).compression(4);
    let d = w.add_dataset(root, "chunked_dataset", builder)?;
    w.write_typed(d, &Selection::all(&shape), &cube)?;

    let curves: [(&str, fn(f64) -> f64); 5] = [
        ("sinusoidal_dataset", f64::sin),
        ("cosine_dataset", f64::cos),
        ("tangent_dataset", f64::tan),
        ("sinh_dataset", f64::sinh),
        ("cosh_dataset", f64::cosh),
    ];
    for (name, f) in curves {
        let values: Vec<f64> = linspace(0.0, 2.0 * PI, 100).map(f).collect();
        let d = w.add_dataset(root, name, DatasetBuilder::of::<f64>([100]))?;
        w.write_typed(d, &Selection::from(0..100), &values)?;
    }

    let noise = pattern(1000, 3.0);
    let values: Vec<f64> = linspace(0.0, 10.0 * PI, 1000)
        .zip(&noise)
        .map(|(x, e)| x.sin() + (e - 0.5) * 0.6)
        .collect();
    let d = w.add_dataset(root, "sinusoidal_with_noise", DatasetBuilder::of::<f64>([1000]))?;
    w.write_typed(d, &Selection::from(0..1000), &values)?;

    let curve: Vec<f64> = linspace(0.0, 2.0 * PI, 1000)
        .flat_map(|t| [(5.0 * t + PI / 2.0).sin(), (4.0 * t).sin()])
        .collect();
    let d = w.add_dataset(root, "parametric_curve", DatasetBuilder::of::<f64>([1000, 2]))?;
    w.write_typed(d, &Selection::all(&[1000, 2]), &curve)?;

    let beat: Vec<f64> = linspace(0.0, 20.0 * PI, 1000).map(|x| x.sin() + (1.1 * x).sin()).collect();
    let d = w.add_dataset(root, "beat_pattern", DatasetBuilder::of::<f64>([1000]))?;
    w.write_typed(d, &Selection::from(0..1000), &beat)?;

    let walk: Vec<i64> = pattern(1000, 4.0)
        .iter()
        .scan(0i64, |pos, v| {
            *pos += if *v < 0.5 { -1 } else { 1 };
            Some(*pos)
        })
        .collect();
    let d = w.add_dataset(root, "random_walk", DatasetBuilder::of::<i64>([1000]))?;
    w.write_typed(d, &Selection::from(0..1000), &walk)?;

    w.finalize()
}

/// A rank-0 dataset and a two-element one.
pub fn write_scalar_file(path: &Path, options: &WriteOptions) -> Result<ContainerStats> {
    let mut w = ContainerWriter::create_with(path, options.clone())?;
    let root = w.root();
    let scalar = w.add_dataset(root, "my_scalar", DatasetBuilder::of::<i32>(Shape::scalar()))?;
    w.write_typed(scalar, &Selection::scalar(), &[42])?;
    let pair = w.add_dataset(root, "my_scalar2", DatasetBuilder::of::<i32>([2]))?;
    w.write_typed(pair, &Selection::from(0..2), &[42, 43])?;
    w.finalize()
}

/// A dataset carrying many multi-line string attributes.
pub fn write_long_attributes_file(path: &Path, options: &WriteOptions) -> Result<ContainerStats> {
    let mut w = ContainerWriter::create_with(path, options.clone())?;
    let root = w.root();
    let d = w.add_dataset(root, "my_data", DatasetBuilder::of::<i64>([10]))?;
    w.write_typed(d, &Selection::from(0..10), &(0..10).collect::<Vec<i64>>())?;
    for i in 1..=17 {
        w.set_attribute(d, &format!("attr_{}", i), LONG_TEXT)?;
    }
    w.finalize()
}

/// A dataset and a soft link to it.
pub fn write_internal_links_file(path: &Path, options: &WriteOptions) -> Result<ContainerStats> {
    let mut w = ContainerWriter::create_with(path, options.clone())?;
    let root = w.root();
    let d = w.add_dataset(root, "my_data", DatasetBuilder::of::<i64>([10]))?;
    w.write_typed(d, &Selection::from(0..10), &(0..10).collect::<Vec<i64>>())?;
    w.add_link(root, "soft_linked_data", Link::soft("/my_data"))?;
    w.finalize()
}

/// Target of the external links in [`MAIN_FILE`].
pub fn write_external_data_file(path: &Path, options: &WriteOptions) -> Result<ContainerStats> {
    let mut w = ContainerWriter::create_with(path, options.clone())?;
    let root = w.root();
    let d = w.add_dataset(root, "my_data", DatasetBuilder::of::<i64>([10]))?;
    w.write_typed(d, &Selection::from(0..10), &(0..10).collect::<Vec<i64>>())?;
    let group = w.add_group(root, "my_group")?;
    let sub = w.add_dataset(group, "my_subdata", DatasetBuilder::of::<i64>([10]))?;
    w.write_typed(sub, &Selection::from(0..10), &(5..15).collect::<Vec<i64>>())?;
    w.finalize()
}

/// External links into [`EXTERNAL_DATA_FILE`], which must sit beside it.
pub fn write_main_file(path: &Path, options: &WriteOptions) -> Result<ContainerStats> {
    let mut w = ContainerWriter::create_with(path, options.clone())?;
    let root = w.root();
    w.add_link(root, "linked_data", Link::external(EXTERNAL_DATA_FILE, "/my_data"))?;
    w.add_link(root, "linked_group", Link::external(EXTERNAL_DATA_FILE, "/my_group"))?;
    w.finalize()
}

/// Resizable variable-length byte arrays, grown twice.
pub fn write_var_array_file(path: &Path, options: &WriteOptions) -> Result<ContainerStats> {
    let mut w = ContainerWriter::create_with(path, options.clone())?;
    let root = w.root();
    let shape = Shape::new([Dim::unlimited(3)]);
    let d = w.add_dataset(root, "var_length_arrays", DatasetBuilder::new(ElementType::VarBytes, shape).chunked(&[4]))?;
    w.set_attribute(d, "CLASS", "IMAGE")?;
    w.set_attribute(d, "VERSION", "1.2")?;
    w.set_attribute(d, "IMAGE_SUBCLASS", "IMAGE_JPEG")?;

    let blob = |i: usize| -> Vec<u8> { (0..64 + 37 * (i % 5)).map(|j| ((i * 31 + j * 7) % 251) as u8).collect() };
    let first: Vec<Vec<u8>> = (0..3).map(blob).collect();
    w.write_varlen(d, &Selection::from(0..3), &first)?;
    w.resize(d, &[5])?;
    w.write_varlen(d, &Selection::from(3..5), &[blob(3), blob(4)])?;
    w.resize(d, &[50])?;
    let rest: Vec<Vec<u8>> = (5..50).map(|_| blob(0)).collect();
    w.write_varlen(d, &Selection::from(5..50), &rest)?;
    w.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ContainerReader;

    #[test]
    fn test_scalar_fixture() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(SCALAR_FILE);
        write_scalar_file(&path, &WriteOptions::default())?;
        let reader = ContainerReader::open(&path)?;
        let scalar = reader.dataset("/my_scalar")?;
        assert!(scalar.shape().is_scalar());
        assert_eq!(scalar.read_typed::<i32>(&Selection::scalar())?, vec![42]);
        assert_eq!(reader.dataset("/my_scalar2")?.read_typed::<i32>(&Selection::from(0..2))?, vec![42, 43]);
        Ok(())
    }

    #[test]
    fn test_var_array_fixture() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(VAR_ARRAY_FILE);
        write_var_array_file(&path, &WriteOptions::default())?;
        let ds = ContainerReader::open(&path)?.dataset("/var_length_arrays")?;
        assert_eq!(ds.shape().sizes().as_slice(), &[50]);
        assert!(ds.shape().is_resizable());
        assert_eq!(ds.attribute("CLASS")?.as_string()?, "IMAGE");
        let cells = ds.read_varlen(&Selection::from(0..50))?;
        assert_eq!(cells[5], cells[0]);
        assert_eq!(cells[1].len(), 64 + 37);
        Ok(())
    }

    #[test]
    fn test_pattern_range() {
        assert!(pattern(500, 1.0).iter().all(|v| (0.0..1.0).contains(v)));
        assert_eq!(linspace(0.0, 1.0, 3).collect::<Vec<_>>(), vec![0.0, 0.5, 1.0]);
    }
}
