//! Integration tests for soft and external link resolution.

use std::path::Path;

use hcf::format::DiskLink;
use hcf::prelude::*;

use tempfile::tempdir;

fn write_data_file(path: &Path) {
    let mut writer = ContainerWriter::create(path).expect("Failed to create writer");
    let root = writer.root();
    let d = writer.add_dataset(root, "my_data", DatasetBuilder::of::<i64>([10])).unwrap();
    writer.write_typed(d, &Selection::from(0..10), &(0..10).collect::<Vec<i64>>()).unwrap();
    let g = writer.add_group(root, "my_group").unwrap();
    let sub = writer.add_dataset(g, "my_subdata", DatasetBuilder::of::<i64>([10])).unwrap();
    writer.write_typed(sub, &Selection::from(0..10), &(5..15).collect::<Vec<i64>>()).unwrap();
    writer.finalize().expect("Failed to finalize data file");
}

#[test]
fn test_soft_links() {
    let mut writer = ContainerWriter::in_memory();
    let root = writer.root();
    let g = writer.add_group(root, "g").unwrap();
    let d = writer.add_dataset(g, "d", DatasetBuilder::of::<u8>([3])).unwrap();
    writer.write_typed(d, &Selection::from(0..3), &[1u8, 2, 3]).unwrap();
    writer.add_link(root, "abs", Link::soft("/g/d")).unwrap();
    writer.add_link(g, "rel", Link::soft("d")).unwrap();
    writer.add_link(root, "to_group", Link::soft("/g")).unwrap();
    writer.add_link(root, "dangling", Link::soft("/nowhere")).unwrap();
    writer.add_link(root, "loop_a", Link::soft("/loop_b")).unwrap();
    writer.add_link(root, "loop_b", Link::soft("/loop_a")).unwrap();

    // Links resolve while the container is still being built.
    assert_eq!(writer.resolve("/abs").unwrap(), d);
    assert_eq!(writer.resolve("/to_group/rel").unwrap(), d);

    let reader = ContainerReader::from_bytes(writer.finalize_to_vec().unwrap()).unwrap();
    let direct = reader.lookup("/g/d").unwrap();
    for path in ["/abs", "/g/rel", "/to_group/d", "/to_group/rel"] {
        let node = reader.lookup(path).unwrap_or_else(|e| panic!("{} failed: {}", path, e));
        assert_eq!(node.offset(), direct.offset(), "{}", path);
    }
    assert_eq!(
        reader.dataset("/abs").unwrap().read_typed::<u8>(&Selection::from(0..3)).unwrap(),
        vec![1, 2, 3]
    );
    assert_eq!(reader.root().unwrap().link("abs").unwrap(), Some(DiskLink::Soft("/g/d".to_string())));
    assert!(matches!(reader.lookup("/dangling"), Err(Error::NameNotFound(_))));
    assert!(matches!(reader.lookup("/loop_a"), Err(Error::LinkCycle(_))));
}

#[test]
fn test_link_depth_limit() {
    let mut writer = ContainerWriter::in_memory();
    let root = writer.root();
    writer.add_dataset(root, "target", DatasetBuilder::of::<u8>([1])).unwrap();
    writer.add_link(root, "hop0", Link::soft("/target")).unwrap();
    for i in 1..5 {
        writer.add_link(root, &format!("hop{}", i), Link::soft(format!("/hop{}", i - 1))).unwrap();
    }
    let bytes = writer.finalize_to_vec().unwrap();

    let relaxed = ContainerReader::from_bytes(bytes.clone()).unwrap();
    assert!(relaxed.lookup("/hop4").unwrap().is_dataset().unwrap());

    let strict = ContainerReader::from_bytes_with(bytes, ReadOptions::default().max_link_depth(3)).unwrap();
    assert!(strict.lookup("/hop2").is_ok());
    assert!(matches!(strict.lookup("/hop4"), Err(Error::LinkCycle(_))));
}

#[test]
fn test_external_links() {
    let dir = tempdir().expect("Failed to create temp dir");
    write_data_file(&dir.path().join("external_data.hcf"));

    let main = dir.path().join("main.hcf");
    {
        let mut writer = ContainerWriter::create(&main).unwrap();
        let root = writer.root();
        writer.add_link(root, "linked_data", Link::external("external_data.hcf", "/my_data")).unwrap();
        writer.add_link(root, "linked_group", Link::external("external_data.hcf", "/my_group")).unwrap();
        writer.add_link(root, "missing", Link::external("nope.hcf", "/x")).unwrap();
        assert!(writer.lookup("/linked_data").unwrap().is_external());
        assert!(writer.resolve("/linked_data").is_err());
        writer.finalize().unwrap();
    }

    let reader = ContainerReader::open(&main).unwrap();
    let data = reader.dataset("/linked_data").unwrap();
    assert_eq!(data.read_typed::<i64>(&Selection::from(0..10)).unwrap(), (0..10).collect::<Vec<i64>>());

    let sub = reader.dataset("/linked_group/my_subdata").unwrap();
    assert_eq!(sub.read_typed::<i64>(&Selection::from(0..3)).unwrap(), vec![5, 6, 7]);
    assert_eq!(
        sub.node().reader().identity(),
        dir.path().join("external_data.hcf").canonicalize().unwrap()
    );
    // The target file is opened once and shared.
    assert_eq!(reader.context().externals().len(), 1);

    let err = reader.lookup("/missing").unwrap_err();
    assert!(matches!(err, Error::ExternalUnavailable { .. }), "{}", err);

    let kinds: Vec<EntryKind> = reader.walk().unwrap().into_iter().map(|e| e.kind).collect();
    assert!(kinds.iter().all(|k| matches!(k, EntryKind::ExternalLink { .. })));
}

#[test]
fn test_external_cycle_across_files() {
    let dir = tempdir().expect("Failed to create temp dir");
    let a = dir.path().join("a.hcf");
    let b = dir.path().join("b.hcf");
    for (path, name, other) in [(&a, "to_b", "b.hcf"), (&b, "to_a", "a.hcf")] {
        let mut writer = ContainerWriter::create(path).unwrap();
        let root = writer.root();
        let back = if name == "to_b" { "/to_a" } else { "/to_b" };
        writer.add_link(root, name, Link::external(other, back)).unwrap();
        writer.add_group(root, "real").unwrap();
        writer.finalize().unwrap();
    }

    let reader = ContainerReader::open(&a).unwrap();
    let err = reader.lookup("/to_b").unwrap_err();
    assert!(matches!(err, Error::LinkCycle(_)), "{}", err);

    // Non-cyclic paths still resolve after a failed lookup.
    assert!(reader.lookup("/real").unwrap().is_group().unwrap());
    let b_reader = ContainerReader::open(&b).unwrap();
    assert!(b_reader.lookup("/real").unwrap().is_group().unwrap());
}

#[test]
fn test_external_chain_through_subdirectory() {
    let dir = tempdir().expect("Failed to create temp dir");
    std::fs::create_dir(dir.path().join("nested")).unwrap();
    write_data_file(&dir.path().join("nested").join("leaf.hcf"));

    // middle.hcf sits beside leaf.hcf and names it relative to itself.
    let middle = dir.path().join("nested").join("middle.hcf");
    {
        let mut writer = ContainerWriter::create(&middle).unwrap();
        let root = writer.root();
        writer.add_link(root, "group", Link::external("leaf.hcf", "/my_group")).unwrap();
        writer.finalize().unwrap();
    }
    let top = dir.path().join("top.hcf");
    {
        let mut writer = ContainerWriter::create(&top).unwrap();
        let root = writer.root();
        writer.add_link(root, "mid", Link::external("nested/middle.hcf", "/")).unwrap();
        writer.finalize().unwrap();
    }

    let reader = ContainerReader::open(&top).unwrap();
    let ds = reader.dataset("/mid/group/my_subdata").unwrap();
    assert_eq!(ds.read_typed::<i64>(&Selection::from(9..10)).unwrap(), vec![14]);
}
