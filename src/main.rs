//! Binary entry point for the `imgr` instance manager.
//!
//! Starts, stops, or reboots a set of EC2 instances (or a named group from
//! the config file) and, unless told otherwise, blocks until every target
//! reaches the requested state.

use std::collections::HashMap;
use std::io::{self, Write};
use std::process;

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tracing::Level;

use imgr::{
    ClientError, ConvergeError, ConvergenceOutcome, ConvergencePoller, ConvergenceRequest,
    Ec2Client, Groups, GroupsError, InstanceState, Resource, ResourceClient, ResourceId,
    SkipReason, TransitionOp,
};

#[derive(Debug, Parser)]
#[command(
    name = "imgr",
    about = "Start, stop, and reboot groups of EC2 instances",
    arg_required_else_help = true
)]
struct Cli {
    /// Print more information; repeat for debug output.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Interpret the instances argument as a group from the config file.
    #[arg(short, long)]
    group: bool,
    /// Plan the operation without issuing any transition.
    #[arg(short = 't', long)]
    dry_run: bool,
    /// Do not wait for the instances to reach the target state.
    #[arg(short, long)]
    non_blocking: bool,
    /// Delimiter separating instance ids.
    #[arg(short, long, default_value = ",")]
    delimiter: String,
    /// AWS region; defaults to the ambient SDK configuration.
    #[arg(short, long)]
    region: Option<String>,
    /// Command to run against the instances.
    #[arg(value_enum)]
    command: Command,
    /// Instance ids separated by the delimiter, or a group name with
    /// `--group`.
    instances: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
enum Command {
    /// Power the instances on.
    Start,
    /// Power the instances off.
    Stop,
    /// Restart running instances.
    Reboot,
    /// Print the current state of the instances.
    State,
}

impl Command {
    /// Target state and transition for lifecycle commands; `State` has none.
    const fn plan(self) -> Option<(InstanceState, TransitionOp)> {
        match self {
            Self::Start => Some((InstanceState::Running, TransitionOp::Start)),
            Self::Stop => Some((InstanceState::Stopped, TransitionOp::Stop)),
            Self::Reboot => Some((InstanceState::Running, TransitionOp::Reboot)),
            Self::State => None,
        }
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("no instance ids found")]
    NoInstances,
    #[error(transparent)]
    Groups(#[from] GroupsError),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Converge(#[from] ConvergeError<ClientError>),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    init_tracing(verbose);

    let exit_code = tokio::select! {
        result = dispatch(cli) => match result {
            Ok(()) => 0,
            Err(err) => {
                report_error(&err, verbose);
                1
            }
        },
        _ = tokio::signal::ctrl_c() => {
            writeln!(io::stderr(), "Interrupted.").ok();
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let targets = resolve_targets(&cli)?;
    let client = Ec2Client::connect(cli.region.clone()).await;

    // Fetch up front so unknown ids fail before any transition and so the
    // output can use Name tags.
    let resources = client.fetch_resources(&targets).await?;
    let names = display_names(&resources);

    let Some((desired_state, op)) = cli.command.plan() else {
        let mut stdout = io::stdout();
        for resource in &resources {
            writeln!(
                stdout,
                "Instance {} state: {}",
                resource.display_name(),
                resource.state
            )
            .ok();
        }
        return Ok(());
    };

    let poller = ConvergencePoller::new(client);
    let request = ConvergenceRequest {
        target_ids: targets,
        desired_state,
        op,
        blocking: !cli.non_blocking,
        dry_run: cli.dry_run,
    };
    let report = poller.converge(&request).await?;
    print_report(io::stdout(), &report, &request, &names);
    Ok(())
}

fn resolve_targets(cli: &Cli) -> Result<Vec<ResourceId>, CliError> {
    let ids: Vec<ResourceId> = if cli.group {
        Groups::load_default()?.resolve(&cli.instances)?
    } else {
        cli.instances
            .split(cli.delimiter.as_str())
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(ResourceId::new)
            .collect()
    };

    if ids.is_empty() {
        return Err(CliError::NoInstances);
    }
    Ok(ids)
}

fn display_names(resources: &[Resource<InstanceState>]) -> HashMap<ResourceId, String> {
    resources
        .iter()
        .map(|resource| (resource.id.clone(), resource.display_name().to_owned()))
        .collect()
}

fn print_report(
    mut target: impl Write,
    report: &imgr::ConvergenceReport<InstanceState>,
    request: &ConvergenceRequest<InstanceState>,
    names: &HashMap<ResourceId, String>,
) {
    let name_of = |id: &ResourceId| {
        names
            .get(id)
            .map_or_else(|| id.to_string(), ToOwned::to_owned)
    };

    for skipped in &report.skipped {
        match skipped.reason {
            SkipReason::AlreadyInDesiredState => {
                writeln!(
                    target,
                    "Instance {} is already {}, skipped.",
                    name_of(&skipped.id),
                    skipped.state
                )
                .ok();
            }
            SkipReason::NotEligible => {
                writeln!(
                    target,
                    "Instance {} is not running, skipped.",
                    name_of(&skipped.id)
                )
                .ok();
            }
        }
    }

    match report.outcome {
        ConvergenceOutcome::AlreadyConverged => {
            writeln!(target, "Nothing to do.").ok();
        }
        ConvergenceOutcome::DryRun => {
            for id in &report.issued {
                writeln!(
                    target,
                    "Dry run: {} {} suppressed.",
                    request.op.progress_label().to_lowercase(),
                    name_of(id)
                )
                .ok();
            }
        }
        ConvergenceOutcome::Issued => {
            for id in &report.issued {
                writeln!(
                    target,
                    "{} {} (not waiting).",
                    request.op.progress_label(),
                    name_of(id)
                )
                .ok();
            }
        }
        ConvergenceOutcome::Converged => {
            for id in &report.issued {
                writeln!(
                    target,
                    "Instance {} is now {}.",
                    name_of(id),
                    request.desired_state
                )
                .ok();
            }
        }
    }
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => Level::ERROR,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn report_error(err: &CliError, verbose: u8) {
    write_error(io::stderr(), err, verbose > 0);
}

fn write_error(mut target: impl Write, err: &CliError, detailed: bool) {
    writeln!(target, "{err}").ok();
    if detailed {
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            writeln!(target, "  caused by: {cause}").ok();
            source = cause.source();
        }
    }
}

#[cfg(test)]
mod tests {
    use imgr::{ConvergenceReport, SkippedTarget};

    use super::*;

    fn cli(group: bool, delimiter: &str, instances: &str) -> Cli {
        Cli {
            verbose: 0,
            group,
            dry_run: false,
            non_blocking: false,
            delimiter: delimiter.to_owned(),
            region: None,
            command: Command::State,
            instances: instances.to_owned(),
        }
    }

    #[test]
    fn splits_instance_ids_on_the_delimiter() {
        let targets = resolve_targets(&cli(false, ",", "i-1, i-2,i-3"))
            .unwrap_or_else(|err| panic!("resolve: {err}"));
        assert_eq!(
            targets,
            vec![
                ResourceId::from("i-1"),
                ResourceId::from("i-2"),
                ResourceId::from("i-3")
            ]
        );
    }

    #[test]
    fn honours_a_custom_delimiter() {
        let targets = resolve_targets(&cli(false, ":", "i-1:i-2"))
            .unwrap_or_else(|err| panic!("resolve: {err}"));
        assert_eq!(targets.len(), 2);
    }

    #[test]
    fn empty_instance_list_is_rejected() {
        let err = resolve_targets(&cli(false, ",", " , ,")).expect_err("expected failure");
        assert!(matches!(err, CliError::NoInstances));
    }

    #[test]
    fn commands_map_to_desired_state_and_op() {
        assert_eq!(
            Command::Start.plan(),
            Some((InstanceState::Running, TransitionOp::Start))
        );
        assert_eq!(
            Command::Stop.plan(),
            Some((InstanceState::Stopped, TransitionOp::Stop))
        );
        assert_eq!(
            Command::Reboot.plan(),
            Some((InstanceState::Running, TransitionOp::Reboot))
        );
        assert_eq!(Command::State.plan(), None);
    }

    #[test]
    fn report_lines_name_skipped_and_converged_instances() {
        let request = ConvergenceRequest {
            target_ids: vec![ResourceId::from("i-1"), ResourceId::from("i-2")],
            desired_state: InstanceState::Running,
            op: TransitionOp::Start,
            blocking: true,
            dry_run: false,
        };
        let report = ConvergenceReport {
            outcome: ConvergenceOutcome::Converged,
            issued: vec![ResourceId::from("i-1")],
            skipped: vec![SkippedTarget {
                id: ResourceId::from("i-2"),
                state: InstanceState::Running,
                reason: SkipReason::AlreadyInDesiredState,
            }],
        };
        let mut names = HashMap::new();
        names.insert(ResourceId::from("i-1"), String::from("web-1"));
        names.insert(ResourceId::from("i-2"), String::from("web-2"));

        let mut buf = Vec::new();
        print_report(&mut buf, &report, &request, &names);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err| panic!("utf8: {err}"));

        assert!(rendered.contains("Instance web-2 is already running, skipped."));
        assert!(rendered.contains("Instance web-1 is now running."));
    }

    #[test]
    fn write_error_prints_the_source_chain_when_detailed() {
        let err = CliError::Client(ClientError::Connectivity(String::from("timed out")));
        let mut buf = Vec::new();
        write_error(&mut buf, &err, true);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err2| panic!("utf8: {err2}"));
        assert!(rendered.contains("control plane unreachable"));
    }
}
