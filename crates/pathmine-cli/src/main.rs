//! Pathmine CLI
//!
//! Command-line front end for the path query engine:
//! - Resolving paths against a class model
//! - Inspecting saved queries (problems, builder snapshot, normalized XML)
//! - Running queries and counting templates against a JSON object store

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tracing::Level;

use pathmine_model::{KeyDefinitions, Model};
use pathmine_query::{
    compile, count_templates, parse_query, parse_templates, query_to_xml, BuilderSnapshot,
    ConstraintOp, EngineConfig, ObjectStore, PathQuery, PathResolver, Template, TemplateValue,
};
use pathmine_store::MemoryObjectStore;

mod render;

#[derive(Parser)]
#[command(name = "pathmine")]
#[command(author, version, about = "Pathmine: path queries over a class model")]
struct Cli {
    /// Class model (XML, or JSON when the file ends in `.json`)
    #[arg(long, global = true, default_value = "model.xml")]
    model: PathBuf,

    /// Primary key definitions (`Class.key_name = field, field`)
    #[arg(long, global = true)]
    keys: Option<PathBuf>,

    /// Engine configuration (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve paths and show the class or type of every step.
    Resolve {
        /// Paths such as `Gene.organism.name`
        #[arg(required = true)]
        paths: Vec<String>,
        /// Resolve relative to this class (paths must start with it or a subclass)
        #[arg(long)]
        context: Option<String>,
    },

    /// Re-resolve a saved query and list the paths that no longer resolve.
    Validate {
        /// Query XML
        query: PathBuf,
    },

    /// Print the query-builder snapshot of a saved query as JSON.
    Snapshot {
        /// Query XML
        query: PathBuf,
        /// Object path to browse (defaults to the query root)
        #[arg(long)]
        browse: Option<String>,
    },

    /// Re-emit a saved query in normalized XML.
    Export {
        /// Query XML
        query: PathBuf,
    },

    /// Compile a saved query and run it against a JSON object store.
    Run {
        /// Query XML
        query: PathBuf,
        /// Objects (JSON array)
        #[arg(long)]
        objects: PathBuf,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
        /// Row cap (overrides the configured one)
        #[arg(long)]
        max_rows: Option<usize>,
        /// Print the compiled plan instead of running it
        #[arg(long)]
        plan: bool,
    },

    /// Count templates against a JSON object store.
    ///
    /// Without `--template`, every template in the file is counted with its
    /// saved values. With `--template`, `--value` supplies the editable
    /// constraints in order, each as `VALUE` (equals) or `OP:VALUE`.
    Count {
        /// Templates XML
        templates: PathBuf,
        /// Objects (JSON array)
        #[arg(long)]
        objects: PathBuf,
        #[arg(long)]
        template: Option<String>,
        #[arg(long = "value")]
        values: Vec<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = dispatch(cli) {
        eprintln!("{} {err:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> Result<()> {
    let env = Env::load(&cli)?;
    match cli.command {
        Commands::Resolve { paths, context } => cmd_resolve(&env, &paths, context.as_deref()),
        Commands::Validate { query } => cmd_validate(&env, &query),
        Commands::Snapshot { query, browse } => cmd_snapshot(&env, &query, browse.as_deref()),
        Commands::Export { query } => cmd_export(&env, &query),
        Commands::Run {
            query,
            objects,
            format,
            max_rows,
            plan,
        } => cmd_run(&env, &query, &objects, format, max_rows, plan),
        Commands::Count {
            templates,
            objects,
            template,
            values,
            format,
        } => cmd_count(&env, &templates, &objects, template.as_deref(), &values, format),
    }
}

// ============================================================================
// Shared setup
// ============================================================================

struct Env {
    model: Arc<Model>,
    config: Arc<EngineConfig>,
}

impl Env {
    fn load(cli: &Cli) -> Result<Self> {
        let text = read(&cli.model)?;
        let is_json = cli.model.extension().is_some_and(|e| e == "json");
        let mut model = if is_json {
            Model::from_json(&text)
        } else {
            Model::from_xml(&text)
        }
        .with_context(|| format!("loading model {}", cli.model.display()))?;

        if let Some(keys) = &cli.keys {
            let defs = KeyDefinitions::parse(&read(keys)?)
                .with_context(|| format!("parsing keys {}", keys.display()))?;
            model = model.with_keys(defs)?;
        }

        let config = match &cli.config {
            Some(path) => EngineConfig::from_json(&read(path)?)
                .with_context(|| format!("parsing config {}", path.display()))?,
            None => EngineConfig::default(),
        };
        tracing::debug!(model = %model.name(), classes = model.class_names().count(), "model loaded");

        Ok(Self {
            model: Arc::new(model),
            config: Arc::new(config),
        })
    }

    fn query(&self, path: &FsPath) -> Result<PathQuery> {
        let xml = read(path)?;
        parse_query(&xml, Arc::clone(&self.model), Arc::clone(&self.config))
            .with_context(|| format!("parsing query {}", path.display()))
    }

    fn store(&self, path: &FsPath) -> Result<MemoryObjectStore> {
        MemoryObjectStore::from_json(Arc::clone(&self.model), &read(path)?)
            .with_context(|| format!("loading objects {}", path.display()))
    }
}

fn read(path: &FsPath) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_resolve(env: &Env, paths: &[String], context: Option<&str>) -> Result<()> {
    let resolver = PathResolver::new(&env.model);
    let mut failed = 0;
    for raw in paths {
        let path = pathmine_query::Path::new(raw.as_str());
        let resolved = match context {
            Some(context) => resolver.resolve_in_context(context, &path),
            None => resolver.resolve(&path),
        };
        match resolved {
            Ok(resolved) => println!("{}", render::resolved(&resolved)),
            Err(err) => {
                failed += 1;
                println!("{} {}", "✗".red(), err);
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {} paths did not resolve", paths.len());
    }
    Ok(())
}

fn cmd_validate(env: &Env, query: &FsPath) -> Result<()> {
    let mut query = env.query(query)?;
    let problems = query.validate().to_vec();
    if problems.is_empty() {
        println!("{} query is valid", "✓".green());
        return Ok(());
    }
    for problem in &problems {
        println!("{} {}", "✗".red(), problem);
    }
    bail!("{} problem(s) found", problems.len())
}

fn cmd_snapshot(env: &Env, query: &FsPath, browse: Option<&str>) -> Result<()> {
    let query = env.query(query)?;
    let snapshot = BuilderSnapshot::build(&query, browse)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

fn cmd_export(env: &Env, query: &FsPath) -> Result<()> {
    let query = env.query(query)?;
    println!("{}", query_to_xml(&query)?);
    Ok(())
}

fn cmd_run(
    env: &Env,
    query: &FsPath,
    objects: &FsPath,
    format: OutputFormat,
    max_rows: Option<usize>,
    plan: bool,
) -> Result<()> {
    let query = env.query(query)?;
    let compiled = compile(&query)?;
    if plan {
        println!("{}", serde_json::to_string_pretty(&compiled)?);
        return Ok(());
    }

    let store = env.store(objects)?;
    let mut limits = env.config.limits();
    if max_rows.is_some() {
        limits.max_rows = max_rows;
    }
    let results = store.execute(&compiled, &limits)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Table => print!("{}", render::table(&results)),
    }
    Ok(())
}

fn cmd_count(
    env: &Env,
    templates: &FsPath,
    objects: &FsPath,
    only: Option<&str>,
    values: &[String],
    format: OutputFormat,
) -> Result<()> {
    let xml = read(templates)?;
    let templates = parse_templates(&xml, Arc::clone(&env.model), Arc::clone(&env.config))
        .with_context(|| format!("parsing templates {}", templates.display()))?;
    let store = env.store(objects)?;

    let requests: Vec<(&Template, Vec<TemplateValue>)> = match only {
        Some(name) => {
            let template = templates
                .iter()
                .find(|t| t.name() == name)
                .ok_or_else(|| anyhow!("no template named `{name}`"))?;
            let values = values.iter().map(|v| parse_value(v)).collect();
            vec![(template, values)]
        }
        None => templates.iter().map(|t| (t, saved_values(t))).collect(),
    };

    let outcomes = count_templates(requests, &store, &env.config.limits());
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcomes)?),
        OutputFormat::Table => print!("{}", render::counts(&outcomes)),
    }
    Ok(())
}

/// `OP:VALUE` when the prefix is an operator, otherwise an equality value.
fn parse_value(raw: &str) -> TemplateValue {
    if let Some((op, value)) = raw.split_once(':') {
        if let Ok(op) = op.parse::<ConstraintOp>() {
            return TemplateValue::new(op, value);
        }
    }
    TemplateValue::equals(raw)
}

fn saved_values(template: &Template) -> Vec<TemplateValue> {
    template
        .editable_constraints()
        .into_iter()
        .map(|(_, c)| TemplateValue::with_value(c.op, c.value.clone()))
        .collect()
}
