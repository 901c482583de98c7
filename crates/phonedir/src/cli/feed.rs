//! `import` and `sync`: CSV adapters feeding the reconciler.
//!
//! The adapters only turn CSV rows into [`ExternalRecord`]s; every
//! decision about placement and conflicts is made by the reconciler.

use crate::cli::context::CliContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{format_timestamp, print_json, print_table};
use clap::Args;
use phonedir::{
    ErrorKind, ExternalRecord, FeedKind, ReconcileOptions, ReconcileReport, Reconciler, RowError,
};
use std::path::{Path, PathBuf};

#[derive(Args, Debug, Clone)]
pub struct FeedArgs {
    /// CSV file with a header row
    pub file: PathBuf,

    /// Report what would change without writing
    #[arg(long)]
    pub dry_run: bool,

    /// Feed name recorded in conflicts (default: file name)
    #[arg(long)]
    pub feed: Option<String>,

    /// Pass number, to tell two exports of the same feed apart
    #[arg(long, default_value = "0")]
    pub pass: u32,
}

/// Column positions resolved from the header row.
struct Columns {
    department: usize,
    number: usize,
    name: Option<usize>,
    locality: Option<usize>,
    zone: Option<usize>,
    attribute: Option<usize>,
    feed: Option<usize>,
}

impl Columns {
    fn from_headers(headers: &csv::StringRecord, path: &Path) -> anyhow::Result<Self> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        };
        let required = |name: &str| {
            find(name).ok_or_else(|| {
                HelpfulError::new(format!("Missing column '{}'", name))
                    .with_context(format!("Header of {}", path.display()))
                    .with_suggestion(
                        "TRY: import expects department,number,name,locality,zone; \
                         sync expects department,number,name,attribute,feed",
                    )
            })
        };
        Ok(Self {
            department: required("department")?,
            number: required("number")?,
            name: find("name"),
            locality: find("locality"),
            zone: find("zone"),
            attribute: find("attribute"),
            feed: find("feed"),
        })
    }
}

fn cell<'r>(record: &'r csv::StringRecord, index: Option<usize>) -> &'r str {
    index.and_then(|i| record.get(i)).unwrap_or("").trim()
}

/// Read a feed file. Rows the CSV reader cannot decode become row errors.
fn read_feed(
    path: &Path,
    kind: FeedKind,
    default_feed: &str,
    pass: u32,
) -> anyhow::Result<(Vec<ExternalRecord>, Vec<RowError>)> {
    if !path.exists() {
        return Err(HelpfulError::file_not_found(path).into());
    }
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| HelpfulError::csv_parse_error(path, 1, &e.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|e| HelpfulError::csv_parse_error(path, 1, &e.to_string()))?
        .clone();
    let columns = Columns::from_headers(&headers, path)?;

    let mut records = Vec::new();
    let mut errors = Vec::new();
    for (index, row) in reader.records().enumerate() {
        // Header is line 1.
        let fallback_line = index + 2;
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                let line = err
                    .position()
                    .map(|p| p.line() as usize)
                    .unwrap_or(fallback_line);
                errors.push(RowError {
                    row: line,
                    raw: String::new(),
                    kind: ErrorKind::Validation,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let line = row
            .position()
            .map(|p| p.line() as usize)
            .unwrap_or(fallback_line);
        let raw = row.iter().collect::<Vec<_>>().join(",");

        let feed = match cell(&row, columns.feed) {
            "" => default_feed,
            named => named,
        };
        let record = ExternalRecord::new(
            cell(&row, Some(columns.department)),
            cell(&row, Some(columns.number)),
            feed,
        )
        .with_name(cell(&row, columns.name))
        .with_pass(pass)
        .with_row(line, raw);
        let record = match kind {
            FeedKind::SpreadsheetImport => {
                let zone = Some(cell(&row, columns.zone)).filter(|z| !z.is_empty());
                record.with_locality(cell(&row, columns.locality), zone)
            }
            FeedKind::DirectorySync => record.with_attribute(cell(&row, columns.attribute)),
        };
        records.push(record);
    }
    Ok((records, errors))
}

pub fn run_import(ctx: &CliContext, args: FeedArgs) -> anyhow::Result<()> {
    run_feed(ctx, FeedKind::SpreadsheetImport, args)
}

pub fn run_sync(ctx: &CliContext, args: FeedArgs) -> anyhow::Result<()> {
    run_feed(ctx, FeedKind::DirectorySync, args)
}

fn run_feed(ctx: &CliContext, kind: FeedKind, args: FeedArgs) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let default_feed = args.feed.clone().unwrap_or_else(|| {
        args.file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| kind.to_string())
    });
    let (records, unreadable) = read_feed(&args.file, kind, &default_feed, args.pass)?;

    let mut report = Reconciler::new(&store)
        .run(
            kind,
            records,
            ReconcileOptions {
                dry_run: args.dry_run,
            },
        )
        .map_err(|err| HelpfulError::from_store("Reconciliation", err))?;
    if !unreadable.is_empty() {
        report.records_processed += unreadable.len();
        report.row_errors.extend(unreadable);
        report.row_errors.sort_by_key(|e| e.row);
        report.success = false;
    }

    if ctx.json {
        print_json(&report)?;
    } else {
        print_report(&report);
    }
    if report.success {
        Ok(())
    } else {
        Err(HelpfulError::new(report.message.clone())
            .with_context(format!("{} finished with errors", kind))
            .into())
    }
}

fn print_report(report: &ReconcileReport) {
    println!(
        "{} {} ({})",
        report.feed_kind,
        if report.dry_run { "dry run" } else { "run" },
        format_timestamp(report.finished_at)
    );
    print_table(
        &["RECORDS", "ADDED", "UPDATED", "UNCHANGED", "TO MISSING", "NEW LOCALITIES"],
        vec![vec![
            report.records_processed.to_string(),
            report.extensions_added.to_string(),
            report.extensions_updated.to_string(),
            report.extensions_unchanged.to_string(),
            report.routed_to_missing.to_string(),
            report.localities_created.to_string(),
        ]],
    );

    if !report.conflicts.is_empty() {
        println!();
        println!("CONFLICTS (not applied)");
        let rows = report
            .conflicts
            .iter()
            .map(|c| {
                let claims: Vec<String> = c
                    .entries
                    .iter()
                    .map(|e| format!("{} [{}]", e.department, e.feed))
                    .collect();
                vec![c.number.clone(), claims.join("; ")]
            })
            .collect();
        print_table(&["NUMBER", "CLAIMS"], rows);
    }

    if !report.row_errors.is_empty() {
        println!();
        println!("ROW ERRORS");
        let rows = report
            .row_errors
            .iter()
            .map(|e| vec![e.row.to_string(), e.kind.to_string(), e.reason.clone(), e.raw.clone()])
            .collect();
        print_table(&["ROW", "KIND", "REASON", "RAW"], rows);
    }

    if !report.locality_errors.is_empty() {
        println!();
        println!("LOCALITY ERRORS");
        let rows = report
            .locality_errors
            .iter()
            .map(|e| vec![e.locality.to_string(), e.kind.to_string(), e.reason.clone()])
            .collect();
        print_table(&["LOCALITY", "KIND", "REASON"], rows);
    }

    println!();
    println!("{}", report.message);
}
