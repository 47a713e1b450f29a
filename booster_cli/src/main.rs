use booster_core::*;
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand, ValueEnum};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "booster")]
#[command(about = "Booster eligibility engine for COVID-19, FSME and Mpox", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Product catalog JSON file (overrides cache.catalog_path)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a JSON file of cases and print the protection records
    Evaluate {
        /// JSON array of evaluation cases
        #[arg(long)]
        input: PathBuf,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Evaluation time (YYYY-MM-DDTHH:MM:SS or YYYY-MM-DD), defaults to now
        #[arg(long)]
        now: Option<String>,

        /// Write to this file instead of stdout (CSV output is appended)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List the products currently permitted for boosters
    Products {
        /// Disease (covid, fsme, mpox)
        #[arg(long)]
        disease: String,
    },

    /// Validate configuration and catalog
    CheckConfig,

    /// Write the default configuration to a file
    InitConfig {
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Csv,
}

fn main() -> Result<()> {
    booster_core::logging::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Evaluate {
            input,
            format,
            now,
            output,
        } => cmd_evaluate(
            cli.config.as_deref(),
            cli.catalog.as_deref(),
            &input,
            format,
            now.as_deref(),
            output.as_deref(),
        ),
        Commands::Products { disease } => {
            cmd_products(cli.config.as_deref(), cli.catalog.as_deref(), &disease)
        }
        Commands::CheckConfig => cmd_check_config(cli.config.as_deref(), cli.catalog.as_deref()),
        Commands::InitConfig { path, force } => cmd_init_config(&path, force),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn open_catalog(config: &Config, catalog: Option<&Path>) -> Box<dyn ProductCatalog> {
    match catalog.or(config.cache.catalog_path.as_deref()) {
        Some(path) => {
            tracing::info!("Using product catalog {:?}", path);
            Box::new(FileCatalog::new(path))
        }
        None => Box::new(get_default_catalog().clone()),
    }
}

fn build_engine(config_path: Option<&Path>, catalog: Option<&Path>) -> Result<BoosterEngine> {
    let config = load_config(config_path)?;
    let catalog = open_catalog(&config, catalog);
    BoosterEngine::from_config(&config, catalog)
}

fn parse_now(value: Option<&str>) -> Result<NaiveDateTime> {
    let Some(value) = value else {
        return Ok(chrono::Local::now().naive_local());
    };

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| {
            NaiveDate::parse_from_str(value, "%Y-%m-%d").map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .map_err(|_| Error::Evaluation(format!("Invalid --now value: {}", value)))
}

fn cmd_evaluate(
    config_path: Option<&Path>,
    catalog: Option<&Path>,
    input: &Path,
    format: OutputFormat,
    now: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let now = parse_now(now)?;
    let engine = build_engine(config_path, catalog)?;
    let cases = load_cases(input)?;

    let mut outcomes = Vec::with_capacity(cases.len());
    let mut failed = 0;
    for case in &cases {
        match engine.evaluate_case(case, now) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                failed += 1;
                tracing::warn!("Skipping case for person {}: {}", case.person.id, e);
            }
        }
    }

    match (format, output) {
        (OutputFormat::Csv, Some(path)) => {
            report::append_csv(path, &outcomes)?;
        }
        (OutputFormat::Csv, None) => report::write_csv(io::stdout().lock(), &outcomes)?,
        (OutputFormat::Json, Some(path)) => {
            report::write_json(std::fs::File::create(path)?, &outcomes)?;
        }
        (OutputFormat::Json, None) => report::write_json(io::stdout().lock(), &outcomes)?,
    }

    if failed > 0 {
        return Err(Error::Evaluation(format!(
            "{} of {} cases could not be evaluated",
            failed,
            cases.len()
        )));
    }
    Ok(())
}

fn cmd_products(config_path: Option<&Path>, catalog: Option<&Path>, disease: &str) -> Result<()> {
    let disease: Disease = disease.parse()?;
    let engine = build_engine(config_path, catalog)?;

    let products = engine.cache().permitted_booster_products(disease);
    if products.is_empty() {
        println!("No products permitted for {} boosters", disease);
    }
    for product in products {
        println!("{}", product);
    }
    Ok(())
}

fn cmd_check_config(config_path: Option<&Path>, catalog: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    config.validate()?;

    let catalog_path = catalog.or(config.cache.catalog_path.as_deref());
    let catalog = match catalog_path {
        Some(path) => Catalog::load_from(path)?,
        None => get_default_catalog().clone(),
    };
    let errors = catalog.validate();
    if !errors.is_empty() {
        eprintln!("Catalog validation errors:");
        for error in &errors {
            eprintln!("  - {}", error);
        }
        return Err(Error::Catalog("Invalid catalog".into()));
    }

    let diseases: Vec<&str> = config
        .enabled_diseases()
        .into_iter()
        .map(Disease::as_str)
        .collect();
    println!(
        "Configuration OK (mandant {}, diseases: {}, {} products)",
        config.mandant,
        diseases.join(", "),
        catalog.products.len()
    );
    Ok(())
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }

    Config::default().save_to(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
