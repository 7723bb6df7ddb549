//! hcf CLI - Tool for inspecting and building hcf containers.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::json;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use hcf::core::Selection;
use hcf::format::{ContainerReader, EntryKind, IDataset, WriteOptions, APPLICATION_ATTRIBUTE};
use hcf::tools::{self, DatasetInfo};

/// Values printed by `read` before eliding the rest.
const READ_LIMIT: usize = 1000;

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut level = None;
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => level = Some("debug"),
            "-vv" | "--trace" => level = Some("trace"),
            "-q" | "--quiet" => level = Some("error"),
            _ => filtered_args.push(arg),
        }
    }
    init_logging(level);

    if filtered_args.is_empty() {
        print_help();
        return;
    }

    if let Err(e) = run(&filtered_args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// `RUST_LOG` applies unless a verbosity flag was given.
fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: &[&str]) -> Result<()> {
    match args[0] {
        "info" | "i" => cmd_info(required(args, 1, "hcf info <file.hcf>")?),
        "tree" | "t" => {
            let json_mode = args.iter().any(|&s| s == "--json" || s == "-j");
            let rest: Vec<&str> = args.iter().copied().filter(|&s| s != "--json" && s != "-j").collect();
            cmd_tree(required(&rest, 1, "hcf tree <file.hcf> [--json]")?, json_mode)
        }
        "attrs" | "a" => cmd_attrs(required(args, 1, "hcf attrs <file.hcf> [path]")?, args.get(2).copied().unwrap_or("/")),
        "read" | "r" => {
            let usage = "hcf read <file.hcf> <dataset> [start:end]";
            cmd_read(required(args, 1, usage)?, required(args, 2, usage)?, args.get(3).copied())
        }
        "search" | "s" => {
            let usage = "hcf search <file.hcf> <query>";
            cmd_search(required(args, 1, usage)?, required(args, 2, usage)?)
        }
        "link" | "l" => {
            if args.len() < 3 {
                bail!("missing arguments\nUsage: hcf link <output.hcf> <input.hcf>...");
            }
            cmd_link(args[1], &args[2..])
        }
        "demo" => cmd_demo(args.get(1).copied().unwrap_or(".")),
        "version" | "--version" | "-V" => {
            print_version();
            Ok(())
        }
        "help" | "h" | "-h" | "--help" => {
            print_help();
            Ok(())
        }
        // Default: if file exists, show info; otherwise error
        other => {
            if Path::new(other).exists() {
                cmd_info(other)
            } else {
                eprintln!("Unknown command: {}", other);
                eprintln!();
                print_help();
                std::process::exit(1);
            }
        }
    }
}

fn required<'a>(args: &[&'a str], index: usize, usage: &str) -> Result<&'a str> {
    match args.get(index) {
        Some(arg) => Ok(arg),
        None => bail!("missing argument\nUsage: {}", usage),
    }
}

fn print_help() {
    println!("hcf - hierarchical container toolkit");
    println!();
    println!("USAGE:");
    println!("    hcf [OPTIONS] <COMMAND> [ARGS]");
    println!();
    println!("COMMANDS:");
    println!("    i, info   <file>                  Show container summary and datasets");
    println!("    t, tree   <file> [--json]         Show the full hierarchy");
    println!("    a, attrs  <file> [path]           Show attributes of an object (default /)");
    println!("    r, read   <file> <dataset> [a:b]  Print dataset values (rows a..b)");
    println!("    s, search <file> <query>          Fuzzy search object paths");
    println!("    l, link   <out> <in>...           Link containers into one via external links");
    println!("    demo      [dir]                   Write the reference fixture set");
    println!("    version                           Show version and build date");
    println!("    h, help                           Show this help");
    println!();
    println!("OPTIONS:");
    println!("    -v, --verbose    Show debug output");
    println!("    -vv, --trace     Show trace output (very verbose)");
    println!("    -q, --quiet      Only show errors");
    println!();
    println!("EXAMPLES:");
    println!("    hcf demo fixtures                       # Write sample containers");
    println!("    hcf tree fixtures/test.hcf              # See hierarchy");
    println!("    hcf read fixtures/test.hcf /beat_pattern 0:10");
    println!("    hcf search fixtures/test.hcf grp4       # Fuzzy match paths");
    println!("    hcf link all.hcf a.hcf b.hcf            # Combine containers");
    println!();
    println!("NOTES:");
    println!("    - Passing a file directly is equivalent to 'info'");
    println!("    - RUST_LOG is honored unless -v, -vv or -q is given");
}

fn print_version() {
    println!("hcf {}", env!("CARGO_PKG_VERSION"));
    println!("built {} {}", env!("HCF_BUILD_DATE"), env!("HCF_BUILD_TIME"));
}

fn open(path: &str) -> Result<ContainerReader> {
    info!("Opening container: {}", path);
    let reader = ContainerReader::open(path).with_context(|| format!("failed to open {}", path))?;
    debug!(version = reader.version(), size = reader.size(), "container opened");
    Ok(reader)
}

fn cmd_info(path: &str) -> Result<()> {
    let reader = open(path)?;
    let entries = reader.walk()?;

    println!("Container: {}", path);
    println!("Version:   {}", reader.version());
    println!("Size:      {}", tools::format_size(reader.size()));
    if let Ok(app) = reader.root()?.attribute(APPLICATION_ATTRIBUTE) {
        println!("Written by: {}", app);
    }
    println!();

    let mut counts = [0usize; 4];
    for entry in &entries {
        let slot = match entry.kind {
            EntryKind::Group => 0,
            EntryKind::Dataset => 1,
            EntryKind::SoftLink(_) => 2,
            EntryKind::ExternalLink { .. } => 3,
        };
        counts[slot] += 1;
    }
    println!("Objects:");
    println!("  Groups:         {}", counts[0]);
    println!("  Datasets:       {}", counts[1]);
    println!("  Soft links:     {}", counts[2]);
    println!("  External links: {}", counts[3]);

    let datasets: Vec<&str> = entries
        .iter()
        .filter(|e| e.kind == EntryKind::Dataset)
        .map(|e| e.path.as_str())
        .collect();
    if !datasets.is_empty() {
        println!();
        println!("Datasets:");
        for ds_path in datasets {
            let info = DatasetInfo::new(&reader.dataset(ds_path)?);
            let chunks = match info.chunk_shape_string() {
                Some(chunks) => format!(", chunks {} ({} stored)", chunks, info.num_chunks),
                None => String::new(),
            };
            println!(
                "  {} [{}] {} ({}{})",
                info.path,
                info.type_string(),
                info.shape_string(),
                info.size_string(),
                chunks
            );
        }
    }
    Ok(())
}

fn kind_label(kind: &EntryKind) -> String {
    match kind {
        EntryKind::Group => "group".to_string(),
        EntryKind::Dataset => "dataset".to_string(),
        EntryKind::SoftLink(target) => format!("-> {}", target),
        EntryKind::ExternalLink { file, path } => format!("-> {}:{}", file, path),
    }
}

fn cmd_tree(path: &str, json_mode: bool) -> Result<()> {
    let reader = open(path)?;
    let entries = reader.walk()?;

    if json_mode {
        let mut objects = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mut object = json!({ "path": entry.path });
            match &entry.kind {
                EntryKind::Group => object["kind"] = json!("group"),
                EntryKind::Dataset => {
                    let ds = reader.dataset(&entry.path)?;
                    object["kind"] = json!("dataset");
                    object["type"] = json!(ds.element_type().to_string());
                    object["shape"] = json!(ds.shape().sizes().to_vec());
                }
                EntryKind::SoftLink(target) => {
                    object["kind"] = json!("soft_link");
                    object["target"] = json!(target);
                }
                EntryKind::ExternalLink { file, path } => {
                    object["kind"] = json!("external_link");
                    object["file"] = json!(file);
                    object["target"] = json!(path);
                }
            }
            objects.push(object);
        }
        println!("{}", serde_json::to_string_pretty(&json!({ "file": path, "objects": objects }))?);
        return Ok(());
    }

    println!("/");
    for entry in &entries {
        let depth = entry.path.matches('/').count();
        let name = entry.path.rsplit('/').next().unwrap_or_default();
        println!("{}{} [{}]", "  ".repeat(depth), name, kind_label(&entry.kind));
    }
    Ok(())
}

fn cmd_attrs(path: &str, object: &str) -> Result<()> {
    let reader = open(path)?;
    let node = reader.lookup(object).with_context(|| format!("no object at {}", object))?;
    let attributes = node.attributes()?;
    println!("{} ({} attributes)", node.path(), attributes.len());
    for (name, value) in attributes {
        println!("  {}: {} = {}", name, value.element_type(), value);
    }
    Ok(())
}

fn parse_rows(range: &str) -> Result<(u64, Option<u64>)> {
    let (start, end) = range.split_once(':').unwrap_or((range, ""));
    let start = if start.is_empty() { 0 } else { start.parse().context("invalid range start")? };
    let end = if end.is_empty() { None } else { Some(end.parse().context("invalid range end")?) };
    Ok((start, end))
}

fn selection_for(ds: &IDataset, rows: Option<&str>) -> Result<Selection> {
    let sizes = ds.shape().sizes();
    let Some(rows) = rows else {
        return Ok(Selection::all(&sizes));
    };
    let Some(&first) = sizes.first() else {
        bail!("{} is scalar and has no rows", ds.path());
    };
    let (start, end) = parse_rows(rows)?;
    let end = end.unwrap_or(first).min(first);
    let mut ranges = vec![start.min(end)..end];
    ranges.extend(sizes[1..].iter().map(|&s| 0..s));
    Ok(Selection::new(&ranges))
}

fn cmd_read(path: &str, dataset: &str, rows: Option<&str>) -> Result<()> {
    let reader = open(path)?;
    let ds = reader.dataset(dataset).with_context(|| format!("no dataset at {}", dataset))?;
    let sel = selection_for(&ds, rows)?;
    let ty = ds.element_type();
    debug!(selection = %sel, "reading");

    let cells: Vec<String> = match ty.size() {
        Some(size) => ds
            .read(&sel)?
            .chunks_exact(size.max(1))
            .take(READ_LIMIT)
            .map(|cell| ty.format_cell(cell))
            .collect(),
        None => ds.read_varlen(&sel)?.iter().take(READ_LIMIT).map(|cell| ty.format_cell(cell)).collect(),
    };

    println!("{} [{}] {}", ds.path(), ty, sel);
    println!("{}", cells.join(", "));
    let total = sel.num_elements();
    if total > READ_LIMIT as u64 {
        println!("... ({} more)", total - READ_LIMIT as u64);
    }
    Ok(())
}

fn cmd_search(path: &str, query: &str) -> Result<()> {
    let reader = open(path)?;
    let paths = tools::full_traversal(&reader)?;
    let hits = tools::search(&paths, query);
    if hits.is_empty() {
        println!("No match for '{}'", query);
        return Ok(());
    }
    for hit in hits {
        // Bracket matched characters.
        let mut marked = String::with_capacity(hit.path.len() + 8);
        let spans = hit.spans();
        for (i, c) in hit.path.chars().enumerate() {
            if spans.iter().any(|s| s.start == i) {
                marked.push('[');
            }
            marked.push(c);
            if spans.iter().any(|s| s.end == i + 1) {
                marked.push(']');
            }
        }
        println!("{:>5}  {}", hit.score, marked);
    }
    Ok(())
}

fn cmd_link(output: &str, inputs: &[&str]) -> Result<()> {
    let inputs: Vec<PathBuf> = inputs.iter().map(PathBuf::from).collect();
    let options = WriteOptions::default().application(format!("hcf {}", env!("CARGO_PKG_VERSION")));
    let stats = tools::link_files(&inputs, Path::new(output), options)
        .with_context(|| format!("failed to write {}", output))?;
    println!("Linked {} files into {}", inputs.len(), output);
    println!("{}", stats);
    Ok(())
}

fn cmd_demo(dir: &str) -> Result<()> {
    let dir = Path::new(dir);
    std::fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    let options = WriteOptions::default().application(format!("hcf {}", env!("CARGO_PKG_VERSION")));
    for path in tools::write_fixtures(dir, &options)? {
        println!("{}", path.display());
    }
    Ok(())
}
