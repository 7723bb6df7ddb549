//! Build a container that links into several others.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::directory::Link;
use crate::format::{ContainerReader, ContainerStats, ContainerWriter, DiskLink, WriteOptions};
use crate::link::canonical_identity;
use crate::util::{Error, Result};

/// Write `output` holding one group per input file, named after the file.
///
/// Each group holds an external link to every top-level group and dataset of
/// its input, and a copy of the input's root attributes. Link targets are
/// stored relative to the output's directory when the input lives below it.
pub fn link_files<P: AsRef<Path>>(inputs: &[P], output: &Path, options: WriteOptions) -> Result<ContainerStats> {
    let out_dir = canonical_identity(output).parent().map(Path::to_path_buf).unwrap_or_default();
    let mut writer = ContainerWriter::create_with(output, options)?;
    let root = writer.root();

    for input in inputs {
        let input = input.as_ref();
        if !input.is_file() {
            return Err(Error::ExternalUnavailable { file: input.to_path_buf(), reason: "no such file".to_string() });
        }
        let reader = ContainerReader::open(input)?;
        let name = input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidName(input.display().to_string()))?;
        let stored = stored_path(reader.identity(), &out_dir);

        let group = writer.add_group(root, &name)?;
        let top = reader.root()?;
        for (child, link) in top.entries()? {
            // Links of the input are not re-exported; only its own objects are.
            if !matches!(link, DiskLink::Hard(_)) {
                continue;
            }
            let target = format!("/{}", child);
            writer.add_link(group, &child, Link::external(stored.clone(), target))?;
        }
        for (attr, value) in top.attributes()? {
            writer.set_attribute(group, &attr, value)?;
        }
        debug!(input = %input.display(), group = %name, "linked container");
    }

    writer.finalize()
}

fn stored_path(target: &Path, out_dir: &Path) -> PathBuf {
    match target.strip_prefix(out_dir) {
        Ok(rel) if !out_dir.as_os_str().is_empty() => rel.to_path_buf(),
        _ => target.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Selection;
    use crate::storage::DatasetBuilder;

    #[test]
    fn test_link_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let data_path = dir.path().join("data.hcf");

        let mut w = ContainerWriter::create(&data_path)?;
        let root = w.root();
        let d = w.add_dataset(root, "values", DatasetBuilder::of::<i64>([3]))?;
        w.write_typed(d, &Selection::from(0..3), &[1i64, 2, 3])?;
        w.add_group(root, "nested")?;
        w.add_link(root, "alias", Link::soft("/values"))?;
        w.set_attribute(root, "origin", "sensor")?;
        w.finalize()?;

        let out = dir.path().join("links.hcf");
        link_files(&[&data_path], &out, WriteOptions::default())?;

        let reader = ContainerReader::open(&out)?;
        let group = reader.group("/data.hcf")?;
        assert_eq!(group.names()?, vec!["nested", "values"]);
        assert_eq!(group.attribute("origin")?.as_string()?, "sensor");
        assert!(matches!(
            group.link("values")?,
            Some(DiskLink::External { file, .. }) if file == Path::new("data.hcf")
        ));
        let values = reader.dataset("/data.hcf/values")?;
        assert_eq!(values.read_typed::<i64>(&Selection::from(0..3))?, vec![1, 2, 3]);
        Ok(())
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = dir.path().join("links.hcf");
        let missing = dir.path().join("missing.hcf");
        assert!(matches!(
            link_files(&[missing], &out, WriteOptions::default()),
            Err(Error::ExternalUnavailable { .. })
        ));
        assert!(!out.exists());
    }
}
