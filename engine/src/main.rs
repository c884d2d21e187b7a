//! affnorm CLI - normalize affiliate-network CSV exports
//!
//! # Main Commands
//!
//! ```bash
//! affnorm import --vendor measure_afb exports/ --out out/   # Import files (or directories)
//! affnorm vendors                                          # List vendor profiles
//! affnorm show measure_mp                                  # Print a profile as JSON
//! affnorm profile import my_vendor.json                    # Store a custom profile
//! ```
//!
//! # Debug Commands
//!
//! ```bash
//! affnorm decompose 'A001_TCLICK_T9_YCLID_C1_UTMC_U1'      # Split a tracking token
//! affnorm parse export.csv --vendor csv_vc                 # Print rows or normalized records
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};

use affnorm::logs::set_quiet;
use affnorm::registry::{read_profile, ProfileOrigin};
use affnorm::vendor::SourceFormat;
use affnorm::{
    import_file, import_files, read_rows, BatchReport, Grammar, ImportOptions, JsonLinesWriter,
    MemoryWriter, ProfileRegistry, RecordWriter, TokenRules, VendorProfile,
};

#[derive(Parser)]
#[command(name = "affnorm")]
#[command(about = "Normalize affiliate-network conversion and sales exports", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import export files into vendor tables
    Import {
        /// Vendor profile id
        #[arg(short, long, required_unless_present = "profile")]
        vendor: Option<String>,

        /// Use a profile JSON file instead of a registered vendor
        #[arg(long, conflicts_with = "vendor")]
        profile: Option<PathBuf>,

        /// Files or directories (directories are filtered by the profile's file pattern)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output directory for <table>.jsonl files
        #[arg(short, long, default_value = "out")]
        out: PathBuf,

        /// Source encoding (detected if not specified)
        #[arg(short, long)]
        encoding: Option<String>,

        /// CSV delimiter (profile default if not specified)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Normalize without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Only print the final summary
        #[arg(short, long)]
        quiet: bool,

        /// Write the per-file reports as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// List vendor profiles
    Vendors,

    /// Show a vendor profile as JSON
    Show {
        /// Profile id
        id: String,
    },

    /// Decompose a tracking token
    Decompose {
        /// Token to split
        token: String,

        /// Use the tracking rules of this vendor
        #[arg(short, long)]
        vendor: Option<String>,

        /// Grammar when no vendor is given
        #[arg(short, long, value_enum, default_value = "tclick-first")]
        grammar: GrammarArg,

        /// Click tags in priority order, comma separated
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        /// Secondary field used as click segment when no tag is found
        #[arg(short, long)]
        secondary: Option<String>,
    },

    /// Parse a file and print raw rows, or normalized records with --vendor
    Parse {
        /// Input CSV file
        input: PathBuf,

        /// Normalize with this vendor profile
        #[arg(short, long)]
        vendor: Option<String>,

        /// Source encoding (detected if not specified)
        #[arg(short, long)]
        encoding: Option<String>,

        /// CSV delimiter (default: ',' or the vendor's)
        #[arg(short, long)]
        delimiter: Option<char>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage stored vendor profiles
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    /// Validate and store a profile JSON file
    Import {
        file: PathBuf,
    },

    /// Check a profile JSON file without storing it
    Validate {
        file: PathBuf,
    },

    /// Delete a stored profile
    Delete {
        id: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum GrammarArg {
    TclickFirst,
    ClickTagFirst,
}

impl From<GrammarArg> for Grammar {
    fn from(arg: GrammarArg) -> Self {
        match arg {
            GrammarArg::TclickFirst => Grammar::TclickFirst,
            GrammarArg::ClickTagFirst => Grammar::ClickTagFirst,
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    // Load .env file (if present)
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Import {
            vendor,
            profile,
            inputs,
            out,
            encoding,
            delimiter,
            dry_run,
            quiet,
            report,
        } => cmd_import(ImportArgs {
            vendor,
            profile,
            inputs,
            out,
            options: ImportOptions { encoding, delimiter },
            dry_run,
            quiet,
            report,
        }),

        Commands::Vendors => cmd_vendors(),

        Commands::Show { id } => cmd_show(&id),

        Commands::Decompose {
            token,
            vendor,
            grammar,
            tags,
            secondary,
        } => cmd_decompose(&token, vendor.as_deref(), grammar, tags, secondary.as_deref()),

        Commands::Parse {
            input,
            vendor,
            encoding,
            delimiter,
            output,
        } => cmd_parse(&input, vendor.as_deref(), encoding, delimiter, output.as_deref()),

        Commands::Profile { action } => cmd_profile(action),
    };

    if let Err(e) = result {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

fn load_profile(vendor: Option<&str>, file: Option<&Path>) -> Result<VendorProfile, Box<dyn std::error::Error>> {
    match (vendor, file) {
        (_, Some(path)) => Ok(read_profile(path)?),
        (Some(id), None) => Ok(ProfileRegistry::new().get(id)?),
        (None, None) => Err("either --vendor or --profile is required".into()),
    }
}

/// Expand directories into the files matching the profile, sorted by name.
fn expand_inputs(profile: &VendorProfile, inputs: &[PathBuf]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let mut found: Vec<PathBuf> = fs::read_dir(input)?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && profile.matches_file(p))
                .collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(input.clone());
        }
    }
    Ok(files)
}

struct ImportArgs {
    vendor: Option<String>,
    profile: Option<PathBuf>,
    inputs: Vec<PathBuf>,
    out: PathBuf,
    options: ImportOptions,
    dry_run: bool,
    quiet: bool,
    report: Option<PathBuf>,
}

fn cmd_import(args: ImportArgs) -> CliResult {
    set_quiet(args.quiet);

    let profile = load_profile(args.vendor.as_deref(), args.profile.as_deref())?;
    let files = expand_inputs(&profile, &args.inputs)?;
    if files.is_empty() {
        return Err(format!("no input files match profile '{}'", profile.id).into());
    }

    eprintln!("📄 Vendor: {} → table {}", profile.id, profile.table);
    eprintln!("   Files: {}", files.len());

    let normalizer = profile.compile()?;
    let mut writer: Box<dyn RecordWriter> = if args.dry_run {
        Box::new(MemoryWriter::new())
    } else {
        Box::new(JsonLinesWriter::new(&args.out))
    };

    let batch = import_files(&normalizer, &files, writer.as_mut(), &args.options)?;
    print_batch(&batch);

    if let Some(path) = args.report {
        fs::write(&path, serde_json::to_string_pretty(&batch.files)?)?;
        eprintln!("💾 Report written to: {}", path.display());
    }

    if !args.dry_run {
        eprintln!("💾 Output in: {}", args.out.display());
    }
    eprintln!("\n✨ Done!");

    if !batch.failed.is_empty() {
        return Err(format!("{} file(s) could not be read", batch.failed.len()).into());
    }
    Ok(())
}

fn print_batch(batch: &BatchReport) {
    eprintln!("\n📊 Results:");
    for r in &batch.files {
        let name = r.file.as_deref().map(|p| p.display().to_string()).unwrap_or_default();
        eprintln!("   {}", name);
        eprintln!(
            "     read {} · inserted {} · ignored {} · dropped {} · headers {} · blank {}",
            r.read, r.inserted, r.ignored, r.dropped, r.header, r.blank
        );
        if r.skipped() > 0 {
            eprintln!(
                "     ⚠️  skipped {} (malformed {}, failed {}, missing id {})",
                r.skipped(),
                r.malformed,
                r.failed,
                r.missing_id
            );
        }
    }
    for (path, reason) in &batch.failed {
        eprintln!("   ❌ {}: {}", path.display(), reason);
    }
    eprintln!("   Total inserted: {}, skipped: {}", batch.inserted(), batch.skipped());
}

fn cmd_vendors() -> CliResult {
    let registry = ProfileRegistry::new();
    let profiles = registry.list()?;

    eprintln!("📋 Vendor profiles ({}):\n", profiles.len());
    for p in profiles {
        let origin = match p.origin {
            ProfileOrigin::Builtin => "built-in",
            ProfileOrigin::Stored => "stored",
        };
        println!("  {:<20} {:<20} {:<9} {}", p.id, p.table, origin, p.description);
    }
    Ok(())
}

fn cmd_show(id: &str) -> CliResult {
    let profile = ProfileRegistry::new().get(id)?;
    println!("{}", profile.to_json()?);
    Ok(())
}

fn cmd_decompose(
    token: &str,
    vendor: Option<&str>,
    grammar: GrammarArg,
    tags: Option<Vec<String>>,
    secondary: Option<&str>,
) -> CliResult {
    let mut rules = match vendor {
        Some(id) => ProfileRegistry::new()
            .get(id)?
            .tracking
            .map(|t| t.rules)
            .ok_or_else(|| format!("vendor '{}' has no tracking token", id))?,
        None => TokenRules::new(grammar.into()),
    };
    if let Some(tags) = tags {
        rules.click_tags = tags;
    }

    let parts = rules.decompose(token, secondary);
    println!("{}", serde_json::to_string_pretty(&parts)?);
    Ok(())
}

fn cmd_parse(
    input: &Path,
    vendor: Option<&str>,
    encoding: Option<String>,
    delimiter: Option<char>,
    output: Option<&Path>,
) -> CliResult {
    eprintln!("📄 Parsing CSV: {}", input.display());

    let json = match vendor {
        None => {
            let format = SourceFormat {
                delimiter: delimiter.unwrap_or(','),
                encoding,
                ..Default::default()
            };
            let rows = read_rows(input, &format)?;
            eprintln!("✅ Parsed {} rows", rows.len());
            let fields: Vec<&Vec<String>> = rows.iter().map(|r| &r.fields).collect();
            serde_json::to_string_pretty(&fields)?
        }
        Some(id) => {
            let normalizer = ProfileRegistry::new().get(id)?.compile()?;
            let options = ImportOptions { encoding, delimiter };
            let mut writer = MemoryWriter::new();
            import_file(&normalizer, input, &mut writer, &options)?;
            let records = writer.records(normalizer.table());
            eprintln!("✅ Normalized {} records", records.len());
            serde_json::to_string_pretty(records)?
        }
    };

    write_output(&json, output)
}

fn write_output(content: &str, path: Option<&Path>) -> CliResult {
    match path {
        Some(p) => {
            fs::write(p, content)?;
            eprintln!("💾 Output written to: {}", p.display());
        }
        None => {
            println!("{}", content);
        }
    }
    Ok(())
}

fn cmd_profile(action: ProfileAction) -> CliResult {
    match action {
        ProfileAction::Import { file } => {
            let mut registry = ProfileRegistry::new();
            eprintln!("📥 Importing profile from: {}", file.display());
            let id = registry.import(&file)?;
            eprintln!("✅ Profile saved as '{}' in {}", id, registry.dir().display());
        }

        ProfileAction::Validate { file } => {
            let profile = read_profile(&file)?;
            eprintln!(
                "✅ {} is valid ({} correction rules, {} columns)",
                profile.id,
                profile.corrections.len(),
                profile.columns.len()
            );
        }

        ProfileAction::Delete { id } => {
            ProfileRegistry::new().delete(&id)?;
            eprintln!("🗑️  Profile deleted: {}", id);
        }
    }
    Ok(())
}
