//! `init`, `verify`, `stats` and `config`.

use crate::cli::context::CliContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{plural, print_json, print_table};
use anyhow::Context;
use clap::Args;
use phonedir::store::IntegrityIssue;
use phonedir_logging::{logs_dir, phonedir_home};
use std::fs;

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// Write the effective configuration to the config file
    #[arg(long)]
    pub save: bool,
}

pub fn init(ctx: &CliContext) -> anyhow::Result<()> {
    let root = &ctx.config.root;
    fs::create_dir_all(root)
        .with_context(|| format!("Failed to create root {}", root.display()))?;
    let store = ctx.open_store()?;
    let created = store
        .init()
        .map_err(|err| HelpfulError::from_store("Init", err))?;

    if ctx.json {
        return print_json(&serde_json::json!({
            "success": true,
            "root": root,
            "created": created,
        }));
    }
    if created {
        println!("Initialized directory at {}", root.display());
    } else {
        println!("MainMenu.xml already exists in {}", root.display());
    }
    Ok(())
}

pub fn verify(ctx: &CliContext) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let report = store
        .verify()
        .map_err(|err| HelpfulError::from_store("Verify", err))?;

    if ctx.json {
        print_json(&report)?;
    } else if report.is_clean() {
        println!(
            "OK: {}, {}, {}, {}",
            plural(report.stats.zones, "zone", "zones"),
            plural(report.stats.branches, "branch", "branches"),
            plural(report.stats.localities, "locality", "localities"),
            plural(report.stats.extensions, "extension", "extensions"),
        );
    } else {
        let rows = report
            .issues
            .iter()
            .map(|issue| {
                let (what, detail) = describe(issue);
                vec![what.to_string(), detail]
            })
            .collect();
        print_table(&["ISSUE", "DETAIL"], rows);
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(HelpfulError::new(format!(
            "Found {}",
            plural(report.issues.len(), "integrity issue", "integrity issues")
        ))
        .with_suggestion("TRY: Delete or repair the listed files, then run verify again")
        .into())
    }
}

fn describe(issue: &IntegrityIssue) -> (&'static str, String) {
    match issue {
        IntegrityIssue::MissingMainMenu => ("missing main menu", "MainMenu.xml".to_string()),
        IntegrityIssue::DanglingReference { menu, target } => {
            ("dangling reference", format!("{} -> {}", menu, target))
        }
        IntegrityIssue::UnrecognizedLink { menu, url } => {
            ("unrecognized link", format!("{}: {}", menu, url))
        }
        IntegrityIssue::ZoneNotInMainMenu { zone } => ("zone not in main menu", zone.to_string()),
        IntegrityIssue::UnplacedBranch { zone, branch } => {
            ("unplaced branch", format!("{}/{}", zone, branch))
        }
        IntegrityIssue::UnplacedLocality { locality } => {
            ("unplaced locality", locality.to_string())
        }
        IntegrityIssue::DuplicateKey { locality, key } => {
            ("duplicate extension", format!("{} in {}", key, locality))
        }
        IntegrityIssue::Unreadable { record, reason } => {
            ("unreadable", format!("{}: {}", record, reason))
        }
    }
}

pub fn stats(ctx: &CliContext) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let stats = store
        .stats()
        .map_err(|err| HelpfulError::from_store("Stats", err))?;

    if ctx.json {
        return print_json(&stats);
    }
    print_table(
        &["ZONES", "BRANCHES", "LOCALITIES", "EXTENSIONS"],
        vec![vec![
            stats.zones.to_string(),
            stats.branches.to_string(),
            stats.localities.to_string(),
            stats.extensions.to_string(),
        ]],
    );
    Ok(())
}

pub fn config(ctx: &CliContext, args: ConfigArgs) -> anyhow::Result<()> {
    if args.save {
        ctx.config
            .validate()
            .map_err(|e| HelpfulError::new(e.to_string()).with_context("Refusing to save"))?;
        ctx.config
            .save(&ctx.config_path)
            .with_context(|| format!("Failed to write {}", ctx.config_path.display()))?;
    }

    if ctx.json {
        return print_json(&serde_json::json!({
            "config_path": ctx.config_path,
            "config_found": ctx.config_found || args.save,
            "home": phonedir_home(),
            "logs": logs_dir(),
            "config": ctx.config,
        }));
    }

    println!("Config file: {}", ctx.config_path.display());
    if args.save {
        println!("  (saved)");
    } else if !ctx.config_found {
        println!("  (not found, using defaults)");
    }
    println!("Logs:        {}", logs_dir().display());
    println!();
    print_table(
        &["SETTING", "VALUE"],
        vec![
            vec!["root".to_string(), ctx.config.root.display().to_string()],
            vec!["base_url".to_string(), ctx.config.base_url.clone()],
            vec!["main_menu_title".to_string(), ctx.config.main_menu_title.clone()],
            vec!["missing_zone_name".to_string(), ctx.config.missing_zone_name.clone()],
            vec!["lock_mode".to_string(), format!("{:?}", ctx.config.lock_mode)],
            vec!["lock_timeout_ms".to_string(), ctx.config.lock_timeout_ms.to_string()],
            vec!["mappings".to_string(), ctx.config.mappings.len().to_string()],
        ],
    );
    Ok(())
}
