use anyhow::{bail, Context};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use logseek::config::Settings;
use logseek::detect::DEFAULT_MAX_SAMPLE;
use logseek::gaps::find_top_gaps_from_index;
use logseek::handler::LogFileHandler;
use logseek::jsonl::{convert_jsonl_to_log, detect_fields, FieldSelection, DEFAULT_FIELD_SAMPLE_LINES};
use logseek::multiline::{convert_to_jsonl, JsonlOptions, MessageMode, DEFAULT_MAX_MULTILINE_SIZE};
use logseek::reader::detect_from_path;
use logseek::similar::{find_top_similar_lines_with, SimilarLinesOptions};
use logseek::stats::compare_files;
use logseek::timeline::timeline_from_file;
use serde::Serialize;
use serde_json::json;
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn init_logging(debug: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

#[derive(Parser, Debug)]
#[command(name = "logseek", version, about = "Timestamp-aware navigation and timing analysis for large log files")]
struct Cli {
    /// JSON settings file (autoDetect, logDateRegex, logDateFormat, indexStep, ...)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Debug logging on stderr (RUST_LOG overrides)
    #[arg(long, global = true, default_value_t = false)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect the timestamp format of a file
    Detect {
        file: PathBuf,
        #[arg(long, default_value_t = DEFAULT_MAX_SAMPLE)]
        sample: usize,
    },
    /// Build the sparse line index and print its summary
    Index { file: PathBuf },
    /// Largest gaps between consecutive records
    Gaps {
        file: PathBuf,
        #[arg(long)]
        top: Option<usize>,
        /// Skip refinement and report index-level gaps only
        #[arg(long, default_value_t = false)]
        approximate: bool,
    },
    /// Duration statistics and IQR outliers
    Stats {
        file: PathBuf,
        #[arg(long)]
        multiplier: Option<f64>,
    },
    /// Compare duration statistics across files
    Compare {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Most frequent line patterns
    Similar {
        file: PathBuf,
        #[arg(long)]
        top: Option<usize>,
        /// Never shell out to rg
        #[arg(long = "no-external", default_value_t = false)]
        no_external: bool,
    },
    /// Line closest to a point in time (RFC 3339 or `yyyy-MM-dd HH:mm:ss`, UTC)
    Jump { file: PathBuf, at: String },
    /// Print lines START..=END (zero-based)
    Range { file: PathBuf, start: usize, end: usize },
    /// Lines with timestamps in [FROM, TO]
    Filter { file: PathBuf, from: String, to: String },
    /// Record counts per time bucket
    Timeline { file: PathBuf },
    /// Convert to JSON Lines, one object per log entry
    ToJsonl {
        file: PathBuf,
        /// Output file; stdout when omitted
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Keep the timestamp in `message`
        #[arg(long = "as-is", default_value_t = false)]
        as_is: bool,
        #[arg(long = "max-lines", default_value_t = DEFAULT_MAX_MULTILINE_SIZE)]
        max_lines: usize,
    },
    /// Convert JSON Lines back to plain log lines
    FromJsonl {
        file: PathBuf,
        /// Output file; stdout when omitted
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Print detected fields and the recommended selection, then exit
        #[arg(long = "list-fields", default_value_t = false)]
        list_fields: bool,
        #[arg(long = "timestamp-field")]
        timestamp_field: Option<String>,
        #[arg(long = "level-field")]
        level_field: Option<String>,
        #[arg(long = "message-field")]
        message_field: Option<String>,
        /// Extra fields appended as key=value
        #[arg(long, value_delimiter = ',')]
        extra: Vec<String>,
    },
}

fn parse_instant(s: &str) -> anyhow::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(ndt.and_utc());
        }
    }
    bail!("unrecognized time '{s}'")
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<Option<Settings>> {
    path.map(|p| Settings::load(p).with_context(|| format!("loading settings from {}", p.display())))
        .transpose()
}

fn open_handler(file: &Path, settings: Option<&Settings>) -> anyhow::Result<LogFileHandler> {
    let mut handler = match settings {
        Some(s) => LogFileHandler::with_settings(file, s.clone()),
        None => LogFileHandler::open(file),
    }
    .with_context(|| format!("opening {}", file.display()))?;
    handler.initialize().with_context(|| format!("indexing {}", file.display()))?;
    Ok(handler)
}

/// Like [`open_handler`], but a file without a usable timestamp format is an error.
fn open_timed(file: &Path, settings: Option<&Settings>) -> anyhow::Result<LogFileHandler> {
    let handler = open_handler(file, settings)?;
    if handler.format().is_none() {
        bail!("{}: no timestamp format detected", file.display());
    }
    Ok(handler)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let settings = load_settings(cli.settings.as_deref())?;

    match cli.command {
        Command::Detect { file, sample } => {
            let (result, dates) = detect_from_path(&file, sample).with_context(|| format!("reading {}", file.display()))?;
            print_json(&json!({
                "display": logseek::detect::format_display_string(&result),
                "fileDates": dates,
                "result": result,
            }))?;
        }
        Command::Index { file } => {
            let handler = open_timed(&file, settings.as_ref())?;
            let index = handler.index().context("index missing after initialization")?;
            print_json(&json!({
                "format": handler.display_string(),
                "totalLines": index.total_lines,
                "totalBytes": index.total_bytes,
                "step": index.step,
                "entries": index.offsets.len(),
                "timestampedEntries": index.timestamped().len(),
            }))?;
        }
        Command::Gaps { file, top, approximate } => {
            let handler = open_timed(&file, settings.as_ref())?;
            let top_n = top.unwrap_or(handler.settings().gap_top_n);
            let result = match handler.index() {
                Some(index) if approximate => find_top_gaps_from_index(index, top_n),
                _ => handler.slowest_records(top_n)?,
            };
            print_json(&result)?;
        }
        Command::Stats { file, multiplier } => {
            let handler = open_timed(&file, settings.as_ref())?;
            let m = multiplier.unwrap_or(handler.settings().outlier_multiplier);
            match handler.chunk_report(m)? {
                Some(report) => print_json(&report)?,
                None => print_json(&json!({ "error": "fewer than two timestamped chunks" }))?,
            }
        }
        Command::Compare { files } => {
            print_json(&compare_files(&files, settings.as_ref()))?;
        }
        Command::Similar { file, top, no_external } => {
            let handler = open_timed(&file, settings.as_ref())?;
            let format = handler.format().context("format missing after initialization")?;
            let opts = SimilarLinesOptions {
                top_n: top.unwrap_or(handler.settings().similar_top_n),
                use_external_search: !no_external,
                ..Default::default()
            };
            print_json(&find_top_similar_lines_with(&file, format, handler.file_dates(), &opts)?)?;
        }
        Command::Jump { file, at } => {
            let target = parse_instant(&at)?;
            let handler = open_timed(&file, settings.as_ref())?;
            print_json(&handler.jump(target)?)?;
        }
        Command::Range { file, start, end } => {
            let handler = open_handler(&file, settings.as_ref())?;
            for line in handler.range(start, end)? {
                println!("{line}");
            }
        }
        Command::Filter { file, from, to } => {
            let (from, to) = (parse_instant(&from)?, parse_instant(&to)?);
            let handler = open_timed(&file, settings.as_ref())?;
            print_json(&handler.filter_by_time(from, to)?)?;
        }
        Command::Timeline { file } => {
            let handler = open_timed(&file, settings.as_ref())?;
            let format = handler.format().context("format missing after initialization")?;
            print_json(&timeline_from_file(&file, format, handler.file_dates())?)?;
        }
        Command::ToJsonl { file, output, as_is, max_lines } => {
            let handler = open_timed(&file, settings.as_ref())?;
            let format = handler.format().context("format missing after initialization")?;
            let options = JsonlOptions {
                message_mode: if as_is { MessageMode::FirstLineAsIs } else { MessageMode::FirstLineMinusTimestamp },
                max_multiline_size: max_lines.max(1),
            };
            let written = match output {
                Some(out) => {
                    let f = File::create(&out).with_context(|| format!("creating {}", out.display()))?;
                    convert_to_jsonl(&file, format, handler.file_dates(), &mut BufWriter::new(f), options)?
                }
                None => {
                    let stdout = io::stdout();
                    convert_to_jsonl(&file, format, handler.file_dates(), &mut stdout.lock(), options)?
                }
            };
            tracing::info!(entries = written, "export finished");
        }
        Command::FromJsonl { file, output, list_fields, timestamp_field, level_field, message_field, extra } => {
            let fields = detect_fields(&file, DEFAULT_FIELD_SAMPLE_LINES).with_context(|| format!("reading {}", file.display()))?;
            if fields.is_empty() {
                bail!("{}: no JSON object keys detected", file.display());
            }
            let recommended = FieldSelection::recommended(&fields);
            if list_fields {
                print_json(&json!({ "fields": &fields, "recommended": &recommended, "other": recommended.unused(&fields) }))?;
                return Ok(());
            }
            let selection = FieldSelection {
                timestamp: timestamp_field.or(recommended.timestamp),
                level: level_field.or(recommended.level),
                message: message_field.or(recommended.message),
                extra,
            };
            let summary = match output {
                Some(out) => {
                    let f = File::create(&out).with_context(|| format!("creating {}", out.display()))?;
                    convert_jsonl_to_log(&file, &selection, &mut BufWriter::new(f))?
                }
                None => {
                    let stdout = io::stdout();
                    convert_jsonl_to_log(&file, &selection, &mut stdout.lock())?
                }
            };
            tracing::info!(
                written = summary.lines_written,
                passed_through = summary.lines_passed_through,
                "conversion finished"
            );
        }
    }
    Ok(())
}
