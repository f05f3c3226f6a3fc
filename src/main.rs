use clap::{Parser, ValueEnum};
use grammar_synth::{Generator, GeneratorConfig, Grammar, SelectionPolicy};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Grammar-based generator of random structured inputs
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the grammar file (`.json` pair list or the text format)
    grammar_file: PathBuf,

    /// The starting non-terminal symbol
    #[arg(default_value = "START")]
    start_symbol: String,

    /// Number of artifacts to generate
    #[arg(default_value_t = 1)]
    count: usize,

    /// Seed for reproducible output; sample `i` uses `seed + i`
    #[arg(short, long)]
    seed: Option<u64>,

    /// Maximum expansion depth
    #[arg(short = 'd', long)]
    max_depth: Option<usize>,

    /// Upper bound for unbounded regex repetitions
    #[arg(long)]
    max_terminal_length: Option<usize>,

    /// Abort a sample once it emits more than this many bytes
    #[arg(long)]
    max_output_size: Option<usize>,

    /// How alternatives are picked
    #[arg(short, long, value_enum)]
    policy: Option<Policy>,

    /// JSON generator config; flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write each sample to its own file in this directory instead of stdout
    #[arg(long)]
    store: Option<PathBuf>,

    /// Be verbose
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Policy {
    Uniform,
    Weighted,
    DeclarationOrder,
}

impl From<Policy> for SelectionPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Uniform => SelectionPolicy::Uniform,
            Policy::Weighted => SelectionPolicy::Weighted,
            Policy::DeclarationOrder => SelectionPolicy::DeclarationOrder,
        }
    }
}

impl Cli {
    fn generator_config(&self) -> Result<GeneratorConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => GeneratorConfig::from_file(path)?,
            None => GeneratorConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = Some(seed);
        }
        if let Some(max_depth) = self.max_depth {
            config.max_depth = max_depth;
        }
        if let Some(max_terminal_length) = self.max_terminal_length {
            config.max_terminal_length = max_terminal_length;
        }
        if let Some(max_output_size) = self.max_output_size {
            config.max_output_size = Some(max_output_size);
        }
        if let Some(policy) = self.policy {
            config.selection_policy = policy.into();
        }
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let config = cli.generator_config()?;

    info!(path = %cli.grammar_file.display(), "loading grammar");
    let grammar = Grammar::from_file(&cli.grammar_file)?;
    info!(rules = grammar.len(), "grammar loaded");

    if let Some(dir) = &cli.store {
        fs::create_dir_all(dir)?;
    }

    let base_seed = config.seed.unwrap_or_else(rand::random);
    info!(seed = base_seed, count = cli.count, "generating");
    let generator = Generator::new(&grammar, config);

    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    let mut failures = 0;

    for i in 0..cli.count {
        let seed = base_seed.wrapping_add(i as u64);
        let artifact = match generator.generate_with_seed(&cli.start_symbol, seed) {
            Ok((artifact, _)) => artifact,
            Err(err) if !err.is_load_time() => {
                warn!(sample = i + 1, seed, error = %err, "sample failed");
                failures += 1;
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        match &cli.store {
            Some(dir) => {
                let mut file = File::create(dir.join((i + 1).to_string()))?;
                artifact.write_to(&mut file)?;
            }
            None => {
                artifact.write_to(&mut out)?;
                out.write_all(b"\n")?;
            }
        }
    }
    out.flush()?;

    if cli.count > 0 && failures == cli.count {
        return Err(format!("all {} samples failed", failures).into());
    }
    Ok(())
}
