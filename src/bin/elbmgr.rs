//! Binary entry point for the `elbmgr` load-balancer manager.
//!
//! Lists classic load balancers and their members, and adds or removes an
//! instance, blocking until the balancer reports the member in (or out of)
//! service. When no instance id is given, the current host's identity is
//! read from the instance metadata service.

use std::io::{self, BufRead, Write};
use std::process;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::Level;

use imgr::{
    ClientError, DEFAULT_REGION, ElbClient, HealthRateError, IdentitySource, MembershipClient,
    MembershipError, MembershipOutcome, MembershipPoller, MembershipRequest, ResourceId,
    TransitionOp, health_rate,
};

#[derive(Debug, Parser)]
#[command(
    name = "elbmgr",
    about = "Manage classic load-balancer membership for EC2 instances",
    arg_required_else_help = true
)]
struct Cli {
    /// Print more information; repeat for debug output.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Give the output in an easy-to-parse format for scripts.
    #[arg(long, global = true)]
    porcelain: bool,
    #[command(subcommand)]
    command: CommandKind,
}

#[derive(Debug, Subcommand)]
enum CommandKind {
    /// Describe the current instance.
    Whoami {
        /// Print the full identity document as JSON.
        #[arg(short, long)]
        full: bool,
    },
    /// List all load balancers in a region.
    #[command(name = "elb-all")]
    All {
        /// Region to list load balancers for.
        #[arg(short, long, default_value = DEFAULT_REGION)]
        region: String,
    },
    /// List the load balancers the current instance is a member of.
    #[command(name = "elb-joined")]
    Joined,
    /// List the instances currently added to the given load balancer.
    #[command(name = "elb-members")]
    Members {
        /// Region this load balancer is in.
        #[arg(short, long, default_value = DEFAULT_REGION)]
        region: String,
        /// Name of the load balancer.
        name: String,
    },
    /// Add an instance to the given load balancer and block until the
    /// balancer brings it in service.
    #[command(name = "elb-add")]
    Add {
        /// Name of the load balancer.
        name: String,
        /// Instance id; defaults to the current instance.
        #[arg(short = 'i', long = "instance-id")]
        instance_id: Option<String>,
        /// Region this load balancer is in.
        #[arg(short, long, default_value = DEFAULT_REGION)]
        region: String,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        skip_prompt: bool,
    },
    /// Remove an instance from the given load balancer and block until the
    /// balancer takes it out of service.
    #[command(name = "elb-remove")]
    Remove {
        /// Name of the load balancer.
        name: String,
        /// Instance id; defaults to the current instance.
        #[arg(short = 'i', long = "instance-id")]
        instance_id: Option<String>,
        /// Region this load balancer is in.
        #[arg(short, long, default_value = DEFAULT_REGION)]
        region: String,
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        skip_prompt: bool,
    },
    /// Show the percentage of in-service members of a load balancer.
    #[command(name = "elb-health-rate")]
    HealthRate {
        /// Region this load balancer is in.
        #[arg(short, long, default_value = DEFAULT_REGION)]
        region: String,
        /// Name of the load balancer.
        name: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Membership(#[from] MembershipError<ClientError>),
    #[error(transparent)]
    HealthRate(#[from] HealthRateError),
    #[error("failed to read confirmation: {0}")]
    Prompt(String),
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
            writeln!(io::stderr(), "Aborted.").ok();
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let porcelain = cli.porcelain;
    match cli.command {
        CommandKind::Whoami { full } => whoami(full).await,
        CommandKind::All { region } => list_all(region, porcelain).await,
        CommandKind::Joined => list_joined(porcelain).await,
        CommandKind::Members { region, name } => list_members(region, name).await,
        CommandKind::Add {
            name,
            instance_id,
            region,
            skip_prompt,
        } => change_membership(TransitionOp::Register, name, instance_id, region, skip_prompt).await,
        CommandKind::Remove {
            name,
            instance_id,
            region,
            skip_prompt,
        } => {
            change_membership(TransitionOp::Deregister, name, instance_id, region, skip_prompt)
                .await
        }
        CommandKind::HealthRate { region, name } => print_health_rate(region, name).await,
    }
}

async fn whoami(full: bool) -> Result<(), CliError> {
    let identity = IdentitySource::new();
    let mut stdout = io::stdout();
    if full {
        let raw = identity.raw_identity_document().await?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|err| ClientError::Provider(format!("malformed identity document: {err}")))?;
        let pretty = serde_json::to_string_pretty(&value)
            .map_err(|err| ClientError::Provider(err.to_string()))?;
        writeln!(stdout, "{pretty}").ok();
    } else {
        let id = identity.instance_id().await?;
        writeln!(stdout, "{id}").ok();
    }
    Ok(())
}

async fn list_all(region: String, porcelain: bool) -> Result<(), CliError> {
    let client = ElbClient::connect(Some(region.clone())).await;
    let names = client.load_balancer_names().await?;
    if names.is_empty() {
        return Err(ClientError::Lookup(format!(
            "no load balancers found in region {region}"
        ))
        .into());
    }

    let mut stdout = io::stdout();
    if !porcelain {
        writeln!(stdout, "Load balancers found in region {region}:").ok();
    }
    for name in names {
        writeln!(stdout, "{name}").ok();
    }
    Ok(())
}

async fn list_joined(porcelain: bool) -> Result<(), CliError> {
    let document = IdentitySource::new().identity_document().await?;
    let instance = ResourceId::new(&document.instance_id);
    let client = ElbClient::connect(Some(document.region)).await;

    let joined = client.registered_with(&instance).await?;
    if joined.is_empty() {
        return Err(ClientError::Lookup(format!(
            "no load balancers are registered by {instance}"
        ))
        .into());
    }

    let mut stdout = io::stdout();
    if !porcelain {
        writeln!(stdout, "Load balancers instance {instance} is registered to:").ok();
    }
    for name in joined {
        writeln!(stdout, "{name}").ok();
    }
    Ok(())
}

async fn list_members(region: String, name: String) -> Result<(), CliError> {
    let client = ElbClient::connect(Some(region.clone())).await;
    let balancer = ResourceId::new(name);
    let members = client.members(&balancer).await?;
    if members.is_empty() {
        return Err(ClientError::Lookup(format!(
            "no instances were found for load balancer {balancer} in region {region}"
        ))
        .into());
    }

    let mut stdout = io::stdout();
    for member in members {
        writeln!(stdout, "{member}").ok();
    }
    Ok(())
}

async fn change_membership(
    op: TransitionOp,
    name: String,
    instance_id: Option<String>,
    region: String,
    skip_prompt: bool,
) -> Result<(), CliError> {
    let mut stdout = io::stdout();
    let (region, member) = match instance_id {
        Some(id) => (region, ResourceId::new(id)),
        None => {
            writeln!(stdout, "No instance id given, using the current instance.").ok();
            let document = IdentitySource::new().identity_document().await?;
            (document.region, ResourceId::new(document.instance_id))
        }
    };
    let balancer = ResourceId::new(name);

    let (question, progress, done) = match op {
        TransitionOp::Register => ("add", "Adding", "added to"),
        _ => ("remove", "Removing", "removed from"),
    };

    let confirmed = skip_prompt
        || confirm(&format!(
            "Do you want to {question} instance {member} {} load balancer {balancer}? [y/N] ",
            if op == TransitionOp::Register { "to" } else { "from" }
        ))?;

    let poller = MembershipPoller::new(ElbClient::connect(Some(region.clone())).await);
    let request = MembershipRequest {
        composite: balancer.clone(),
        member: member.clone(),
        op,
        blocking: true,
        dry_run: false,
        confirmed,
    };

    if confirmed {
        writeln!(
            stdout,
            "{progress} instance {member} {} load balancer {balancer} in region {region}",
            if op == TransitionOp::Register { "to" } else { "from" }
        )
        .ok();
    }

    match poller.converge(&request).await? {
        MembershipOutcome::Aborted => {
            writeln!(stdout, "Operation aborted.").ok();
        }
        MembershipOutcome::Converged => {
            writeln!(stdout, "{member} is {done} {balancer}.").ok();
        }
        MembershipOutcome::Issued | MembershipOutcome::DryRun => {}
    }
    Ok(())
}

async fn print_health_rate(region: String, name: String) -> Result<(), CliError> {
    let client = ElbClient::connect(Some(region)).await;
    let balancer = ResourceId::new(name);
    let healths = client.fetch_member_health(&balancer, None).await?;
    let rate = health_rate(&healths)?;
    writeln!(io::stdout(), "{rate}").ok();
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool, CliError> {
    let mut stdout = io::stdout();
    write!(stdout, "{prompt}").ok();
    stdout.flush().ok();

    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .map_err(|err| CliError::Prompt(err.to_string()))?;
    Ok(matches!(
        answer.trim().to_ascii_lowercase().as_str(),
        "y" | "yes"
    ))
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
    if matches!(err, CliError::Client(ClientError::Auth(_))) {
        writeln!(
            target,
            "Authentication error, please make sure your AWS credentials are configured."
        )
        .ok();
    }
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
    use super::*;

    #[test]
    fn auth_errors_get_the_credentials_hint() {
        let err = CliError::Client(ClientError::Auth(String::from("denied")));
        let mut buf = Vec::new();
        write_error(&mut buf, &err, false);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err2| panic!("utf8: {err2}"));
        assert!(rendered.contains("AWS credentials"));
        assert!(rendered.contains("authentication failed: denied"));
    }

    #[test]
    fn membership_errors_render_the_balancer_name() {
        let err = CliError::Membership(MembershipError::<ClientError>::AlreadyMember {
            member: ResourceId::from("i-1"),
            composite: ResourceId::from("LB1"),
        });
        let mut buf = Vec::new();
        write_error(&mut buf, &err, false);
        let rendered = String::from_utf8(buf).unwrap_or_else(|err2| panic!("utf8: {err2}"));
        assert!(rendered.contains("i-1 is already a member of LB1"));
    }
}
