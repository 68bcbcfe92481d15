//! Noco CLI
//!
//! Command-line tools for stored documents, expanded data and schemas.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use noco::{
    apply_patch, expand, load_schema, resolve_schema, shrink, split_ref, AutoChange, DirFetcher, ExpandedData,
    IdGenerator, NocoDoc, RandomIds, Renderable, RenderTarget, ResolveOptions, SchemaClient, SequentialIds,
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "noco")]
#[command(about = "Inspect Noco documents, expanded data and schemas")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a stored document and print its render tree
    Render {
        /// Stored document file
        document: PathBuf,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Resolve a schema node into its candidates
    Resolve {
        /// Schema file; its file stem is the root document id
        schema: PathBuf,

        /// Node to resolve, as a fragment (e.g. #/properties/hero)
        #[arg(long, default_value = "#")]
        pointer: String,

        /// Directory holding referenced schema documents as <id>.json
        #[arg(long)]
        schema_dir: Option<PathBuf>,

        /// Base URL serving referenced schema documents
        #[cfg(feature = "remote")]
        #[arg(long, conflicts_with = "schema_dir")]
        schema_url: Option<String>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Wrap plain JSON as expanded data
    Expand {
        /// Plain JSON file
        data: PathBuf,

        /// Use sequential ids with this prefix instead of random ones
        #[arg(long)]
        id_prefix: Option<String>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Strip ids from expanded data
    Shrink {
        /// Expanded data file
        expanded: PathBuf,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Apply a list of changes to expanded data
    Apply {
        /// Expanded data file
        expanded: PathBuf,

        /// JSON array of changes
        changes: PathBuf,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Render { document, pretty } => run_render(&document, pretty),
        Commands::Resolve {
            schema,
            pointer,
            schema_dir,
            #[cfg(feature = "remote")]
            schema_url,
            pretty,
        } => {
            #[cfg(feature = "remote")]
            let source = match (schema_dir, schema_url) {
                (Some(dir), _) => Source::Dir(dir),
                (None, Some(url)) => Source::Url(url),
                (None, None) => Source::None,
            };
            #[cfg(not(feature = "remote"))]
            let source = schema_dir.map_or(Source::None, Source::Dir);
            run_resolve(&schema, &pointer, source, pretty)
        }
        Commands::Expand {
            data,
            id_prefix,
            pretty,
        } => run_expand(&data, id_prefix, pretty),
        Commands::Shrink { expanded, pretty } => run_shrink(&expanded, pretty),
        Commands::Apply {
            expanded,
            changes,
            pretty,
        } => run_apply(&expanded, &changes, pretty),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Logs go to stderr; `RUST_LOG` takes an env-filter directive, default `warn`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

enum Source {
    None,
    Dir(PathBuf),
    #[cfg(feature = "remote")]
    Url(String),
}

fn read_json(path: &Path) -> Result<Value, u8> {
    load_schema(path).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })
}

fn read_expanded(path: &Path) -> Result<ExpandedData, u8> {
    let value = read_json(path)?;
    serde_json::from_value(value).map_err(|e| {
        eprintln!("Error: invalid expanded data in {}: {}", path.display(), e);
        2u8
    })
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), u8> {
    let output = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;
    println!("{}", output);
    Ok(())
}

fn run_render(path: &Path, pretty: bool) -> Result<(), u8> {
    let stored = read_json(path)?;
    let doc = NocoDoc::from_json(&stored).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    let root = doc.node(doc.root()).and_then(|root| root.to_renderable(&mut |id: &str| id.to_string()));
    let renderable = root.map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    debug!(nodes = doc.len(), "rendered document");
    print_json(&renderable_to_json(renderable), pretty)
}

fn renderable_to_json(renderable: Renderable<String>) -> Value {
    match renderable {
        Renderable::Undefined | Renderable::Null => Value::Null,
        Renderable::Bool(b) => Value::Bool(b),
        Renderable::Number(n) => Value::Number(n),
        Renderable::String(s) => Value::String(s),
        Renderable::Array(items) => Value::Array(items.into_iter().map(renderable_to_json).collect()),
        Renderable::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !matches!(v, Renderable::Undefined))
                .map(|(k, v)| (k, renderable_to_json(v)))
                .collect(),
        ),
        Renderable::Element(element) => {
            let mut out = Map::new();
            match element.target {
                RenderTarget::Component(id) => out.insert("$component".to_string(), Value::String(id)),
                RenderTarget::Element(name) => out.insert("$element".to_string(), Value::String(name)),
            };
            out.insert("key".to_string(), Value::String(element.key));
            let props: Map<String, Value> = element
                .props
                .into_iter()
                .filter(|(_, v)| !matches!(v, Renderable::Undefined))
                .map(|(k, v)| (k, renderable_to_json(v)))
                .collect();
            out.insert("props".to_string(), Value::Object(props));
            Value::Object(out)
        }
    }
}

fn run_resolve(schema_path: &Path, pointer: &str, source: Source, pretty: bool) -> Result<(), u8> {
    let document = read_json(schema_path)?;
    let root_id = schema_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("root")
        .to_string();

    let (_, path) = split_ref(pointer);
    let node = noco::navigate_fragment(&document, path).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    let client = SchemaClient::with_documents([(root_id.clone(), document)]);
    let client = match source {
        Source::None => client,
        Source::Dir(dir) => client.with_fetcher(Arc::new(DirFetcher::new(dir))),
        #[cfg(feature = "remote")]
        Source::Url(url) => {
            let fetcher = noco::HttpFetcher::new(url).map_err(|e| {
                eprintln!("Error: {}", e);
                e.exit_code() as u8
            })?;
            client.with_fetcher(Arc::new(fetcher))
        }
    };
    let options = ResolveOptions::new(root_id);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            eprintln!("Error starting runtime: {}", e);
            3u8
        })?;
    let resolution = runtime
        .block_on(resolve_schema(&client, &options, &node, pointer))
        .map_err(|e| {
            eprintln!("Error: {}", e);
            e.exit_code() as u8
        })?;
    print_json(&resolution, pretty)
}

fn run_expand(path: &Path, id_prefix: Option<String>, pretty: bool) -> Result<(), u8> {
    let raw = read_json(path)?;
    let ids: Box<dyn IdGenerator> = match id_prefix {
        Some(prefix) => Box::new(SequentialIds::new(prefix)),
        None => Box::new(RandomIds),
    };
    print_json(&expand(&raw, ids.as_ref()), pretty)
}

fn run_shrink(path: &Path, pretty: bool) -> Result<(), u8> {
    let expanded = read_expanded(path)?;
    print_json(&shrink(&expanded), pretty)
}

fn run_apply(expanded_path: &Path, changes_path: &Path, pretty: bool) -> Result<(), u8> {
    let expanded = Arc::new(read_expanded(expanded_path)?);
    let changes: Vec<AutoChange> = serde_json::from_value(read_json(changes_path)?).map_err(|e| {
        eprintln!("Error: invalid changes in {}: {}", changes_path.display(), e);
        2u8
    })?;
    debug!(count = changes.len(), "applying changes");
    match apply_patch(Some(expanded), &changes) {
        Some(result) => print_json(&result, pretty),
        None => print_json(&json!(null), pretty),
    }
}
