//! Zone, branch, locality, extension and move commands.

use crate::cli::context::CliContext;
use crate::cli::error::HelpfulError;
use crate::cli::output::{plural, print_json, print_table};
use clap::{Args, Subcommand};
use phonedir::store::{CascadeReport, StepOutcome};
use phonedir::{
    BranchId, DirectoryStore, EditOutcome, ExtensionKey, LocalityId, MoveDestination,
    MoveOutcome, PartialFailure, StoreError, ZoneId, ZoneItem,
};

#[derive(Subcommand, Debug, Clone)]
pub enum ZoneAction {
    /// Show the branches and localities of a zone
    Show { zone: ZoneId },
    /// Create a zone and list it in the main menu
    Add { name: String },
    /// Change the display name of a zone
    Rename { zone: ZoneId, name: String },
    /// Delete a zone with every branch and locality under it
    Delete { zone: ZoneId },
}

#[derive(Subcommand, Debug, Clone)]
pub enum BranchAction {
    /// Show the localities of a branch
    Show { zone: ZoneId, branch: BranchId },
    /// Create a branch in a zone
    Add { zone: ZoneId, name: String },
    /// Delete a branch with its localities
    Delete { zone: ZoneId, branch: BranchId },
}

#[derive(Subcommand, Debug, Clone)]
pub enum LocalityAction {
    /// List the extensions of a locality
    Show { locality: LocalityId },
    /// Create a locality in a zone, or in one of its branches
    Add {
        zone: ZoneId,
        name: String,
        #[arg(long)]
        branch: Option<BranchId>,
    },
    /// Change the display name of a locality
    Rename { locality: LocalityId, name: String },
    /// Delete a locality and unlink it from its menus
    Delete { locality: LocalityId },
}

#[derive(Subcommand, Debug, Clone)]
pub enum ExtAction {
    /// Add an extension to a locality
    Add {
        locality: LocalityId,
        department: String,
        number: String,
        /// Contact name shown after the department
        #[arg(long)]
        name: Option<String>,
    },
    /// Change the department and number of an extension
    Edit {
        locality: LocalityId,
        department: String,
        number: String,
        #[arg(long = "to-department")]
        new_department: Option<String>,
        #[arg(long = "to-number")]
        new_number: Option<String>,
    },
    /// Remove an extension
    Delete {
        locality: LocalityId,
        department: String,
        number: String,
    },
    /// Find every locality listing a number
    Find { number: String },
}

#[derive(Args, Debug, Clone)]
pub struct MoveArgs {
    /// Source locality
    #[arg(long)]
    pub from: LocalityId,

    /// Destination zone
    #[arg(long)]
    pub zone: ZoneId,

    /// Existing destination locality
    #[arg(long, conflicts_with = "new")]
    pub to: Option<LocalityId>,

    /// Create the destination locality with this name
    #[arg(long, required_unless_present = "to")]
    pub new: Option<String>,

    /// Branch to create the new locality under
    #[arg(long, requires = "new")]
    pub branch: Option<BranchId>,

    /// Extensions to move: NUMBER (every department) or NUMBER=DEPARTMENT
    #[arg(required = true)]
    pub extensions: Vec<String>,
}

fn store_err(action: &str) -> impl FnOnce(StoreError) -> anyhow::Error + '_ {
    move |err| anyhow::Error::from(HelpfulError::from_store(action, err))
}

pub fn list_zones(ctx: &CliContext, destinations: bool) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let zones = match destinations {
        true => store.destination_zones(),
        false => store.get_zones(),
    };
    let zones = zones.map_err(store_err("List zones"))?;

    if ctx.json {
        return print_json(&zones);
    }
    if zones.is_empty() {
        println!("No zones yet.");
        println!();
        println!("Add one with:");
        println!("  phonedir zone add \"Zona Este\"");
        return Ok(());
    }
    let rows = zones
        .iter()
        .map(|zone| vec![zone.id.to_string(), zone.name.clone()])
        .collect();
    print_table(&["ID", "NAME"], rows);
    Ok(())
}

pub fn run_zone(ctx: &CliContext, action: ZoneAction) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    match action {
        ZoneAction::Show { zone } => {
            let zone = store.get_zone(&zone).map_err(store_err("Show zone"))?;
            if ctx.json {
                return print_json(&zone);
            }
            println!("{} ({})", zone.name, zone.id);
            print_items(&zone.items);
            Ok(())
        }
        ZoneAction::Add { name } => {
            let id = store.add_zone(&name).map_err(store_err("Add zone"))?;
            done(ctx, serde_json::json!({ "zone": id, "name": name }), || {
                format!("Added zone {} ({})", name, id)
            })
        }
        ZoneAction::Rename { zone, name } => {
            store
                .rename_zone(&zone, &name)
                .map_err(store_err("Rename zone"))?;
            done(ctx, serde_json::json!({ "zone": zone, "name": name }), || {
                format!("Renamed zone {} to {}", zone, name)
            })
        }
        ZoneAction::Delete { zone } => {
            report_cascade(ctx, "Delete zone", store.delete_zone(&zone))
        }
    }
}

pub fn run_branch(ctx: &CliContext, action: BranchAction) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    match action {
        BranchAction::Show { zone, branch } => {
            let branch = store
                .get_branch(&zone, &branch)
                .map_err(store_err("Show branch"))?;
            if ctx.json {
                return print_json(&branch);
            }
            println!("{} ({}/{})", branch.name, branch.zone_id, branch.id);
            print_items(&branch.items);
            Ok(())
        }
        BranchAction::Add { zone, name } => {
            let id = store
                .add_branch(&zone, &name)
                .map_err(store_err("Add branch"))?;
            done(
                ctx,
                serde_json::json!({ "zone": zone, "branch": id, "name": name }),
                || format!("Added branch {} ({}) to zone {}", name, id, zone),
            )
        }
        BranchAction::Delete { zone, branch } => {
            report_cascade(ctx, "Delete branch", store.delete_branch(&zone, &branch))
        }
    }
}

pub fn run_locality(ctx: &CliContext, action: LocalityAction) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    match action {
        LocalityAction::Show { locality } => {
            let locality = store
                .get_locality(&locality)
                .map_err(store_err("Show locality"))?;
            if ctx.json {
                return print_json(&locality);
            }
            println!("{} ({})", locality.name, locality.id);
            let rows = locality
                .extensions
                .iter()
                .map(|ext| {
                    vec![
                        ext.number.clone(),
                        ext.department.clone(),
                        ext.name.clone().unwrap_or_default(),
                    ]
                })
                .collect();
            print_table(&["NUMBER", "DEPARTMENT", "CONTACT"], rows);
            println!("{}", plural(locality.extensions.len(), "extension", "extensions"));
            Ok(())
        }
        LocalityAction::Add { zone, name, branch } => {
            let id = store
                .add_locality(&zone, branch.as_ref(), &name)
                .map_err(store_err("Add locality"))?;
            done(
                ctx,
                serde_json::json!({ "zone": zone, "branch": branch, "locality": id, "name": name }),
                || format!("Added locality {} ({})", name, id),
            )
        }
        LocalityAction::Rename { locality, name } => {
            store
                .rename_locality(&locality, &name)
                .map_err(store_err("Rename locality"))?;
            done(
                ctx,
                serde_json::json!({ "locality": locality, "name": name }),
                || format!("Renamed locality {} to {}", locality, name),
            )
        }
        LocalityAction::Delete { locality } => report_cascade(
            ctx,
            "Delete locality",
            store.delete_locality(&locality),
        ),
    }
}

pub fn run_ext(ctx: &CliContext, action: ExtAction) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    match action {
        ExtAction::Add {
            locality,
            department,
            number,
            name,
        } => {
            let ext = store
                .add_extension(&locality, &department, &number, name.as_deref())
                .map_err(store_err("Add extension"))?;
            done(
                ctx,
                serde_json::json!({ "locality": locality, "extension": ext }),
                || format!("Added {} to {}", ext.key(), locality),
            )
        }
        ExtAction::Edit {
            locality,
            department,
            number,
            new_department,
            new_number,
        } => {
            let old = ExtensionKey::new(&department, &number);
            let new_department = new_department.unwrap_or_else(|| old.department.clone());
            let new_number = new_number.unwrap_or_else(|| old.number.clone());
            let outcome = store
                .edit_extension(&locality, &old, &new_department, &new_number)
                .map_err(store_err("Edit extension"))?;
            done(
                ctx,
                serde_json::json!({ "locality": locality, "outcome": outcome }),
                || match &outcome {
                    EditOutcome::Applied(ext) => format!("Changed {} to {}", old, ext.key()),
                    EditOutcome::Unchanged => format!("{} unchanged", old),
                },
            )
        }
        ExtAction::Delete {
            locality,
            department,
            number,
        } => {
            let ext = store
                .delete_extension(&locality, &department, &number)
                .map_err(store_err("Delete extension"))?;
            done(
                ctx,
                serde_json::json!({ "locality": locality, "extension": ext }),
                || format!("Deleted {} from {}", ext.key(), locality),
            )
        }
        ExtAction::Find { number } => {
            let matches = store
                .find_extensions(&number)
                .map_err(store_err("Find extension"))?;
            if ctx.json {
                return print_json(&matches);
            }
            if matches.is_empty() {
                println!("No locality lists {}", number);
                return Ok(());
            }
            let rows = matches
                .iter()
                .map(|m| {
                    vec![
                        m.extension.number.clone(),
                        m.extension.department.clone(),
                        m.extension.name.clone().unwrap_or_default(),
                        format!("{} ({})", m.locality_name, m.locality),
                    ]
                })
                .collect();
            print_table(&["NUMBER", "DEPARTMENT", "CONTACT", "LOCALITY"], rows);
            Ok(())
        }
    }
}

pub fn run_move(ctx: &CliContext, args: MoveArgs) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let keys = expand_keys(&store, &args.from, &args.extensions)?;
    let destination = match (args.to, args.new) {
        (Some(id), _) => MoveDestination::Existing(id),
        (None, Some(name)) => MoveDestination::New {
            name,
            branch: args.branch,
        },
        (None, None) => {
            return Err(HelpfulError::new("No destination locality given")
                .with_suggestion("TRY: --to <locality> or --new <name>")
                .into())
        }
    };

    let report = match store.move_extensions(&keys, &args.from, &args.zone, destination) {
        Ok(report) => report,
        Err(StoreError::PartialFailure(failure)) => {
            if let PartialFailure::Move { report, .. } = failure.as_ref() {
                if ctx.json {
                    print_json(report)?;
                }
            }
            return Err(store_err("Move extensions")(StoreError::PartialFailure(failure)));
        }
        Err(err) => return Err(store_err("Move extensions")(err)),
    };

    if ctx.json {
        return print_json(&report);
    }
    let rows = report
        .results
        .iter()
        .map(|r| {
            let (status, reason) = match &r.outcome {
                MoveOutcome::Moved => ("moved", String::new()),
                MoveOutcome::Conflict(reason) => ("conflict", reason.clone()),
                MoveOutcome::NotFound(reason) => ("not found", reason.clone()),
            };
            vec![
                r.key.number.clone(),
                r.key.department.clone(),
                status.to_string(),
                reason,
            ]
        })
        .collect();
    print_table(&["NUMBER", "DEPARTMENT", "STATUS", "REASON"], rows);
    println!(
        "Moved {} from {} to {}{}",
        plural(report.moved(), "extension", "extensions"),
        report.source,
        report.destination,
        if report.created_destination {
            " (created)"
        } else {
            ""
        }
    );
    Ok(())
}

/// `NUMBER=DEPARTMENT` names one extension; a bare number names every
/// extension of the source locality with that number.
fn expand_keys(
    store: &DirectoryStore,
    source: &LocalityId,
    items: &[String],
) -> anyhow::Result<Vec<ExtensionKey>> {
    let mut keys = Vec::new();
    let mut listed = None;
    for item in items {
        if let Some((number, department)) = item.split_once('=') {
            keys.push(ExtensionKey::new(department, number));
            continue;
        }
        if listed.is_none() {
            listed = Some(
                store
                    .get_locality(source)
                    .map_err(store_err("Read source locality"))?,
            );
        }
        let before = keys.len();
        if let Some(locality) = &listed {
            keys.extend(
                locality
                    .extensions
                    .iter()
                    .filter(|ext| ext.number == item.trim())
                    .map(|ext| ext.key()),
            );
        }
        if keys.len() == before {
            // Reported as not found by the move itself.
            keys.push(ExtensionKey::new("", item));
        }
    }
    Ok(keys)
}

fn print_items(items: &[ZoneItem]) {
    let rows = items
        .iter()
        .map(|item| {
            vec![
                item.id().to_string(),
                item.name.clone(),
                format!("{:?}", item.kind()).to_lowercase(),
            ]
        })
        .collect();
    print_table(&["ID", "NAME", "TYPE"], rows);
}

fn report_cascade(
    ctx: &CliContext,
    action: &str,
    result: phonedir::error::Result<CascadeReport>,
) -> anyhow::Result<()> {
    match result {
        Ok(report) => {
            if ctx.json {
                return print_json(&report);
            }
            print_steps(&report);
            println!("Deleted {}", report.root);
            Ok(())
        }
        Err(StoreError::PartialFailure(failure)) => {
            if let PartialFailure::Cascade(report) = failure.as_ref() {
                if ctx.json {
                    print_json(report)?;
                } else {
                    print_steps(report);
                }
            }
            Err(store_err(action)(StoreError::PartialFailure(failure)))
        }
        Err(err) => Err(store_err(action)(err)),
    }
}

fn print_steps(report: &CascadeReport) {
    let rows = report
        .steps
        .iter()
        .map(|step| {
            let target = match &step.menu {
                Some(menu) => format!("{} in {}", step.record, menu),
                None => step.record.to_string(),
            };
            let (status, reason) = match &step.outcome {
                StepOutcome::Done => ("done", String::new()),
                StepOutcome::AlreadyAbsent => ("already absent", String::new()),
                StepOutcome::Failed(reason) => ("FAILED", reason.clone()),
                StepOutcome::Skipped(reason) => ("skipped", reason.clone()),
            };
            vec![
                format!("{:?}", step.action),
                target,
                status.to_string(),
                reason,
            ]
        })
        .collect();
    print_table(&["STEP", "RECORD", "STATUS", "REASON"], rows);
}

/// Print a mutation result: JSON object or one line of text.
fn done(
    ctx: &CliContext,
    value: serde_json::Value,
    text: impl FnOnce() -> String,
) -> anyhow::Result<()> {
    if ctx.json {
        print_json(&value)
    } else {
        println!("{}", text());
        Ok(())
    }
}
