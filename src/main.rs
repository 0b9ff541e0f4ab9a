//! Workcopy Sync CLI
//!
//! Inspects and replays the changes made inside a sandbox's work copies.

use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use workcopy_sync::{
    ApplyOptions, ApplyOutcome, Config, DiffFormat, DiffOptions, DiffResult, Result, Sandboxes,
};

#[derive(Parser, Debug)]
#[command(name = "workcopy-sync")]
#[command(about = "Track and replay changes made inside sandbox work copies")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ~/.workcopy-sync/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show what changed since the baseline
    Diff {
        name: String,

        /// Only list files and line counts
        #[arg(long)]
        stat: bool,

        /// Only show work not yet committed inside the sandbox
        #[arg(long)]
        uncommitted: bool,

        /// Include every directory of the sandbox
        #[arg(long)]
        all: bool,

        /// Limit the diff to these paths
        paths: Vec<PathBuf>,
    },
    /// List the changes recorded since the baseline
    Log {
        name: String,

        /// Include per-change file summaries
        #[arg(long)]
        stat: bool,
    },
    /// Show one change or a range `a..b`
    Show {
        name: String,
        reference: String,

        /// Only list files and line counts
        #[arg(long)]
        stat: bool,
    },
    /// Apply the sandbox's changes to the host or another directory
    Apply {
        name: String,

        /// Directory to apply to (defaults to the original host directory)
        #[arg(long)]
        target: Option<PathBuf>,

        /// Apply everything, including uncommitted work, as one patch
        #[arg(long)]
        squash: bool,

        /// Only check that the changes would apply
        #[arg(long)]
        check: bool,

        /// Apply every copied directory to its own host directory
        #[arg(long, conflicts_with_all = ["target", "refs"])]
        all_targets: bool,

        /// Changes to apply: ids, id prefixes or ranges `a..b`
        #[arg(conflicts_with = "squash")]
        refs: Vec<String>,

        /// Limit the apply to these paths
        #[arg(last = true)]
        paths: Vec<PathBuf>,
    },
    /// Write per-change patch files into a directory
    Export {
        name: String,
        dir: PathBuf,

        /// Changes to export (all when omitted)
        refs: Vec<String>,
    },
    /// Move the baseline forward
    Baseline {
        name: String,

        /// Change to move to (defaults to the latest one)
        #[arg(long)]
        to: Option<String>,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    let sandboxes = Sandboxes::from_config(&config);

    match cli.command {
        Commands::Diff {
            name,
            stat,
            uncommitted,
            all,
            paths,
        } => {
            let mut options = if stat {
                DiffOptions::stat()
            } else {
                DiffOptions::default()
            }
            .with_paths(paths);
            if uncommitted {
                options = options.uncommitted();
            }
            if all {
                for result in sandboxes.diff_all(&name, &options)? {
                    println!("# {}", result.work_dir.display());
                    print_diff(&result)?;
                }
            } else {
                print_diff(&sandboxes.diff(&name, &options)?)?;
            }
        }
        Commands::Log { name, stat } => {
            if stat {
                for entry in sandboxes.list_commits_with_stat(&name)? {
                    println!("{} {}", entry.commit.short_id(), entry.commit.subject);
                    for line in entry.summary.lines() {
                        println!("    {}", line.trim());
                    }
                }
            } else {
                for commit in sandboxes.list_commits(&name)? {
                    println!("{} {}", commit.short_id(), commit.subject);
                }
            }
        }
        Commands::Show {
            name,
            reference,
            stat,
        } => {
            let format = if stat { DiffFormat::Stat } else { DiffFormat::Full };
            print_diff(&sandboxes.commit_diff(&name, &reference, format)?)?;
        }
        Commands::Apply {
            name,
            target,
            squash,
            check,
            all_targets,
            refs,
            paths,
        } => {
            if all_targets {
                for outcome in sandboxes.apply_all_targets(&name, &paths, check)? {
                    print_outcome(&outcome);
                }
                return Ok(());
            }
            let options = ApplyOptions {
                target,
                paths,
                check_only: check,
            };
            let outcome = if squash {
                sandboxes.apply_squash(&name, &options)?
            } else if refs.is_empty() {
                sandboxes.apply_commits::<String>(&name, &options, None)?
            } else {
                sandboxes.apply_commits(&name, &options, Some(refs.as_slice()))?
            };
            print_outcome(&outcome);
        }
        Commands::Export { name, dir, refs } => {
            let selected = (!refs.is_empty()).then_some(refs.as_slice());
            let set = sandboxes.generate_patch_set(&name, &[], selected)?;
            for path in set.export(&dir)? {
                println!("{}", path.display());
            }
        }
        Commands::Baseline { name, to } => match to {
            Some(reference) => {
                let commit = sandboxes.resolve_ref(&name, &reference)?;
                let sha = sandboxes.advance_to(&name, &commit.id)?;
                println!("baseline moved to {}", sha);
            }
            None => match sandboxes.advance_to_head(&name)? {
                Some(sha) => println!("baseline moved to {}", sha),
                None => println!("live-mounted directory has no baseline"),
            },
        },
    }

    Ok(())
}

fn print_diff(result: &DiffResult) -> Result<()> {
    if let Some(note) = &result.note {
        println!("{}", note);
    } else if result.is_empty() {
        println!("no changes");
    } else {
        // Raw bytes, so files in other encodings come through unchanged.
        let mut out = std::io::stdout().lock();
        out.write_all(&result.output)?;
        out.write_all(b"\n")?;
    }
    Ok(())
}

fn print_outcome(outcome: &ApplyOutcome) {
    let target = outcome.target.display();
    if outcome.applied == 0 && outcome.stat.is_empty() {
        println!("{}: nothing to apply", target);
    } else if outcome.checked_only {
        println!("{}: changes apply cleanly", target);
    } else {
        println!("{}: applied {} change(s)", target, outcome.applied);
    }
    if !outcome.stat.is_empty() {
        println!("{}", outcome.stat);
    }
    if let Some(baseline) = &outcome.baseline {
        println!("baseline moved to {}", baseline);
    }
    if outcome.uncommitted_left && !outcome.checked_only {
        println!("uncommitted work in the sandbox was not applied");
    }
}
