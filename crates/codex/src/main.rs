//
// main.rs
//
// Command-line front end for inspecting indexes
//

use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};

use codex::config::CodexConfig;
use codex::extract::{parse_json_lines, SidecarExtractor};
use codex::line_index::{LineIndex, Location};
use codex::project::{Project, StaticSpace};
use codex::registry::Registry;
use codex::source_index::SourceIndex;
use codex::store::Store;
use codex::store_set::StoreContext;

const SIDECAR_KIND: &str = "sidecar";

fn print_usage() {
    println!(
        "codex {}, project code intelligence.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: codex [OPTIONS]

Available options:

--elements FILE SOURCE       Build the index of SOURCE from the JSON-lines extraction in FILE
--at ROW:COL                 With --elements, print the element at a 1-based position
--index DIR                  Index every source under DIR from its .codex.jsonl sidecars
--config FILE                Read settings from a JSON file
--version                    Print the version
--help                       Print this help message

"#
    );
}

enum Command {
    Elements {
        extraction: PathBuf,
        source: PathBuf,
        at: Option<Location>,
    },
    Index(PathBuf),
}

fn parse_location(arg: &str) -> anyhow::Result<Location> {
    let (row, col) = arg
        .split_once(':')
        .ok_or_else(|| anyhow!("Expected ROW:COL, got '{arg}'"))?;
    let row: usize = row.parse().with_context(|| format!("Invalid row in '{arg}'"))?;
    let col: usize = col.parse().with_context(|| format!("Invalid column in '{arg}'"))?;
    if row == 0 || col == 0 {
        bail!("Rows and columns start at 1, got '{arg}'");
    }
    Ok(Location::new(row - 1, col - 1))
}

fn build_index(extraction: &Path, source: &Path) -> anyhow::Result<SourceIndex> {
    let file = File::open(source).with_context(|| format!("Failed to open {}", source.display()))?;
    let lines = LineIndex::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to read {}", source.display()))?;
    let records = File::open(extraction)
        .with_context(|| format!("Failed to open {}", extraction.display()))?;
    let extraction = parse_json_lines(BufReader::new(records))?;
    Ok(SourceIndex::build(
        Store::file(source),
        lines,
        extraction.elements,
    ))
}

fn print_elements(index: &SourceIndex, at: Option<Location>) -> anyhow::Result<()> {
    if let Some(loc) = at {
        match index.element_at(loc) {
            Some(elem) => println!("{}", serde_json::to_string(elem)?),
            None => println!("No element at {}", loc),
        }
        return Ok(());
    }

    for row in 0..index.lines().rows() {
        let Some(r) = index.row(row) else {
            continue;
        };
        for (col, elem) in r.elements() {
            println!(
                "{}\t{:?}\t{}",
                Location::new(row, col),
                elem.kind,
                elem.to_ref()
            );
        }
    }
    println!(
        "{}: {} elements on {} rows",
        index.store(),
        index.element_count(),
        index.lines().rows()
    );
    Ok(())
}

async fn index_directory(root: PathBuf, config: CodexConfig) -> anyhow::Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve {}", root.display()))?;
    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());

    let space = Arc::new(StaticSpace::new());
    let project = space.add(Project::new(&root, name).with_kind(SIDECAR_KIND));
    let registry = Registry::new(config, space.clone(), space);
    registry.register_extractor(SIDECAR_KIND, Arc::new(SidecarExtractor::default()));

    let queue = registry.queue(&project);
    let queued = queue.queue_reindex_all();
    queue.wait_idle().await;

    let symbols = registry.store_of(&project);
    let stores = symbols.stores();
    println!(
        "{}: {} of {} source files indexed",
        project.name,
        stores.len(),
        queued
    );
    for store in stores {
        if let Some(index) = queue.index_of(&store) {
            println!("  {}\t{} elements", store, index.element_count());
        }
    }

    registry.close();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let mut config_path = None;
    let mut elements = None;
    let mut at = None;
    let mut index_dir = None;

    while let Some(arg) = argv.next() {
        match arg.as_str() {
            "--elements" => {
                let extraction = argv
                    .next()
                    .ok_or_else(|| anyhow!("--elements needs FILE and SOURCE"))?;
                let source = argv
                    .next()
                    .ok_or_else(|| anyhow!("--elements needs FILE and SOURCE"))?;
                elements = Some((PathBuf::from(extraction), PathBuf::from(source)));
            }
            "--at" => {
                let loc = argv.next().ok_or_else(|| anyhow!("--at needs ROW:COL"))?;
                at = Some(parse_location(&loc)?);
            }
            "--index" => {
                let dir = argv.next().ok_or_else(|| anyhow!("--index needs DIR"))?;
                index_dir = Some(PathBuf::from(dir));
            }
            "--config" => {
                let path = argv.next().ok_or_else(|| anyhow!("--config needs FILE"))?;
                config_path = Some(PathBuf::from(path));
            }
            "--version" => {
                println!("codex {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" => {
                print_usage();
                return Ok(());
            }
            other => {
                return Err(anyhow!("Unknown argument: '{other}'"));
            }
        }
    }

    let command = match (elements, index_dir) {
        (Some((extraction, source)), None) => Command::Elements {
            extraction,
            source,
            at,
        },
        (None, Some(dir)) => Command::Index(dir),
        (None, None) => {
            print_usage();
            return Ok(());
        }
        (Some(_), Some(_)) => bail!("--elements and --index cannot be combined"),
    };

    env_logger::init();

    let config = match config_path {
        Some(path) => CodexConfig::load(&path)?,
        None => CodexConfig::default(),
    };

    match command {
        Command::Elements {
            extraction,
            source,
            at,
        } => {
            let index = build_index(&extraction, &source)?;
            print_elements(&index, at)
        }
        Command::Index(dir) => index_directory(dir, config).await,
    }
}
