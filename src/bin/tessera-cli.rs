//! Tessera CLI - run and inspect executable documents
//!
//! Documents are read from a root directory. A `tessera.json` in that
//! directory, if present, supplies parsing and file source settings.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tessera::config::{self, CONFIG_FILE_NAME, HostConfig};
use tessera::document::{DocumentSource, FileDocumentSource, FileSourceConfig};
use tessera::executable::segment::Segment;
use tessera::{Error, Executable, ExecutionContext, LanguageManager, ParsingContext, Value};

#[derive(Parser)]
#[command(name = "tessera")]
#[command(about = "Host for multi-language executable documents", long_about = None)]
struct Cli {
    /// Root directory documents are resolved against
    #[arg(short, long, default_value = ".")]
    root: PathBuf,

    /// Configuration file (default: <root>/tessera.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a document and write its output to stdout
    Run {
        /// Document name relative to the root
        name: String,

        /// Parser to use (program, text, scriptlets)
        #[arg(long)]
        parser: Option<String>,

        /// Language for untagged program text
        #[arg(long)]
        default_tag: Option<String>,

        /// Make the document enterable and invoke this entry point
        #[arg(long)]
        enter: Option<String>,

        /// Entry point arguments; JSON values, otherwise plain strings
        args: Vec<String>,
    },

    /// Show the optimised segments of a document
    Segments {
        /// Document name relative to the root
        name: String,

        /// Parser to use (program, text, scriptlets)
        #[arg(long)]
        parser: Option<String>,
    },

    /// List every document under the root
    List,

    /// Write a default configuration file into the root
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

struct Host {
    source: Arc<FileDocumentSource<Executable>>,
    parsing: ParsingContext,
}

impl Host {
    fn load(root: &Path, config_path: Option<&Path>) -> Result<Self> {
        let default_path = root.join(CONFIG_FILE_NAME);
        let config = match config_path {
            Some(path) => config::load_config(path)?,
            None if default_path.is_file() => config::load_config(&default_path)?,
            None => HostConfig {
                files: FileSourceConfig::new(root),
                ..HostConfig::default()
            },
        };

        let source = Arc::new(FileDocumentSource::new(config.files));
        let parsing = ParsingContext::new(Arc::new(LanguageManager::with_builtins()))
            .with_document_source(source.clone())
            .with_options(config.parsing);
        Ok(Self { source, parsing })
    }

    fn executable(&self, name: &str, parser: Option<String>) -> Result<Arc<Executable>> {
        let mut parsing = self.parsing.clone();
        if let Some(parser) = parser {
            parsing.options.parser = parser;
        }
        Executable::create_once(name, &parsing)
            .map_err(Error::from)
            .with_context(|| format!("Failed to load document '{}'", name))
    }
}

fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            name,
            parser,
            default_tag,
            enter,
            args,
        } => {
            let mut host = Host::load(&cli.root, cli.config.as_deref())?;
            if default_tag.is_some() {
                host.parsing.options.default_language_tag = default_tag;
            }
            let executable = host.executable(&name, parser)?;
            let context = Arc::new(ExecutionContext::new());

            match enter {
                None => {
                    executable
                        .execute(&context, None, None)
                        .map_err(Error::from)?;
                }
                Some(entry_point) => {
                    executable
                        .make_enterable("cli", context.clone(), None, None)
                        .map_err(Error::from)?;
                    let arguments: Vec<Value> = args.iter().map(|raw| parse_argument(raw)).collect();
                    let value = executable
                        .enter("cli", &entry_point, &arguments)
                        .map_err(Error::from)?;
                    context.flush().map_err(Error::from)?;
                    if !value.is_null() {
                        println!();
                        println!("=> {}", value);
                    }
                }
            }
            context.flush().map_err(Error::from)?;
        }

        Commands::Segments { name, parser } => {
            let host = Host::load(&cli.root, cli.config.as_deref())?;
            let executable = host.executable(&name, parser)?;

            println!("{} ({} segments)", executable.document_name(), executable.segments().len());
            for segment in executable.segments() {
                match segment {
                    Segment::Literal(literal) => {
                        println!("  [{}] literal at {}: {:?}", literal.index, literal.position, literal.text);
                    }
                    Segment::Program(program) => {
                        println!(
                            "  [{}] {} at {}: {:?}",
                            program.index, program.language_tag, program.position, program.source_code
                        );
                    }
                }
            }
        }

        Commands::List => {
            let host = Host::load(&cli.root, cli.config.as_deref())?;
            let documents = host.source.documents().map_err(Error::from)?;
            for descriptor in documents {
                println!(
                    "{}\t{}\t{}",
                    descriptor.name(),
                    descriptor.tag(),
                    descriptor.timestamp().to_rfc3339()
                );
            }
        }

        Commands::InitConfig { force } => {
            let path = cli.config.unwrap_or_else(|| cli.root.join(CONFIG_FILE_NAME));
            if path.exists() && !force {
                anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
            }
            let config = HostConfig {
                files: FileSourceConfig::new(&cli.root),
                ..HostConfig::default()
            };
            config::write_config(&path, &config)?;
            println!("Wrote default configuration to {:?}", path);
        }
    }

    Ok(())
}
