//! Integration tests over the reference fixture set and the tools built on it.

use hcf::format::EntryKind;
use hcf::prelude::*;
use hcf::tools::{self, fixtures, DatasetInfo};

use tempfile::tempdir;

#[test]
fn test_fixture_set() {
    let dir = tempdir().expect("Failed to create temp dir");
    let written = tools::write_fixtures(dir.path(), &WriteOptions::default()).expect("Failed to write fixtures");
    assert_eq!(written.len(), 7);
    for path in &written {
        ContainerReader::open(path).unwrap_or_else(|e| panic!("{} does not open: {}", path.display(), e));
    }

    // test.hcf
    let reader = ContainerReader::open(dir.path().join(fixtures::TEST_FILE)).unwrap();
    let ds = reader.dataset("/attributes_ds").unwrap();
    assert_eq!(ds.attribute("description").unwrap().as_string().unwrap(), "This is a random dataset");
    assert_eq!(ds.attribute("int").unwrap().as_scalar::<i64>().unwrap(), 42);
    assert_eq!(ds.attribute("array3").unwrap().as_bools().unwrap(), vec![true, false, true, false, true]);
    assert_eq!(ds.attribute("array4").unwrap().as_strings().unwrap(), vec!["hello", "world"]);
    assert_eq!(ds.attributes().unwrap().len(), 13);

    let nested = reader.dataset("/group_1/group_3/group_4/dataset_11").unwrap();
    assert_eq!(nested.shape().sizes().as_slice(), &[100, 100]);

    let chunked = reader.dataset("/chunked_dataset").unwrap();
    assert_eq!(chunked.num_chunks(), 40);
    let row = chunked.read_typed::<f64>(&Selection::new(&[3..4, 100..101, 0..15])).unwrap();
    assert!(row.iter().all(|v| (0.0..1.0).contains(v)));

    let walk = reader.walk().unwrap();
    assert_eq!(walk.iter().filter(|e| e.kind == EntryKind::Group).count(), 4);
    assert_eq!(walk.iter().filter(|e| e.kind == EntryKind::Dataset).count(), 22);

    // main.hcf -> external_data.hcf
    let main = ContainerReader::open(dir.path().join(fixtures::MAIN_FILE)).unwrap();
    let sub = main.dataset("/linked_group/my_subdata").unwrap();
    assert_eq!(sub.read_typed::<i64>(&Selection::from(0..10)).unwrap(), (5..15).collect::<Vec<i64>>());

    // internal_links_datasets.hcf
    let internal = ContainerReader::open(dir.path().join(fixtures::INTERNAL_LINKS_FILE)).unwrap();
    let linked = internal.dataset("/soft_linked_data").unwrap();
    assert_eq!(linked.read_typed::<i64>(&Selection::from(7..10)).unwrap(), vec![7, 8, 9]);

    // many_long_attributes.hcf
    let long = ContainerReader::open(dir.path().join(fixtures::LONG_ATTRIBUTES_FILE)).unwrap();
    let attrs = long.dataset("/my_data").unwrap().attributes().unwrap();
    assert_eq!(attrs.len(), 17);
    assert!(attrs.iter().all(|(_, v)| v.as_string().unwrap() == fixtures::LONG_TEXT));
}

#[test]
fn test_dataset_summaries() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join(fixtures::TEST_FILE);
    fixtures::write_test_file(&path, &WriteOptions::default()).unwrap();
    let reader = ContainerReader::open(&path).unwrap();

    let curve = DatasetInfo::new(&reader.dataset("/parametric_curve").unwrap());
    assert_eq!(curve.shape_string(), "1000 x 2 = 2000");
    assert_eq!(curve.type_string(), "f64");
    assert_eq!(curve.chunk_shape_string(), None);

    let chunked = DatasetInfo::new(&reader.dataset("/chunked_dataset").unwrap());
    assert_eq!(chunked.chunk_shape_string().as_deref(), Some("1 x 256 x 15 = 3840"));
    assert_eq!(chunked.compression, Some(4));
    assert!(chunked.stored_bytes <= chunked.total_bytes());

    let preview = reader.dataset("/sinusoidal_dataset").unwrap().preview().unwrap();
    assert_eq!(preview.len(), 100);
    assert!(preview.min < -0.99 && preview.max > 0.99);
    assert!(reader.dataset("/parametric_curve").unwrap().preview().is_err());

    let walk = reader.dataset("/random_walk").unwrap().preview().unwrap();
    assert!(walk.points.windows(2).all(|w| (w[1].1 - w[0].1).abs() == 1.0));
}

#[test]
fn test_search_paths() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join(fixtures::TEST_FILE);
    fixtures::write_test_file(&path, &WriteOptions::default()).unwrap();
    let reader = ContainerReader::open(&path).unwrap();

    let paths = tools::full_traversal(&reader).unwrap();
    assert_eq!(paths.first().map(String::as_str), Some("/attributes_ds"));
    let hits = tools::search(&paths, "dataset_11");
    assert_eq!(hits[0].path, "/group_1/group_3/group_4/dataset_11");
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    assert!(tools::search(&paths, "zzzz").is_empty());
}

#[test]
fn test_link_fixture_files() {
    let dir = tempdir().expect("Failed to create temp dir");
    let options = WriteOptions::default();
    let scalar = dir.path().join(fixtures::SCALAR_FILE);
    let var = dir.path().join(fixtures::VAR_ARRAY_FILE);
    fixtures::write_scalar_file(&scalar, &options).unwrap();
    fixtures::write_var_array_file(&var, &options).unwrap();

    let out = dir.path().join("combined.hcf");
    let stats = tools::link_files(&[&scalar, &var], &out, options).expect("Failed to link files");
    assert_eq!(stats.groups, 3);

    let reader = ContainerReader::open(&out).unwrap();
    assert_eq!(reader.root().unwrap().names().unwrap(), vec![fixtures::SCALAR_FILE, fixtures::VAR_ARRAY_FILE]);
    let linked = reader.dataset("/test_scalar_ds.hcf/my_scalar").unwrap();
    assert_eq!(linked.read_typed::<i32>(&Selection::scalar()).unwrap(), vec![42]);
    let cells = reader
        .dataset("/var_arr.hcf/var_length_arrays")
        .unwrap()
        .read_varlen(&Selection::from(0..2))
        .unwrap();
    assert_eq!(cells.len(), 2);
}
