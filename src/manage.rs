use anyhow::Result;
use clap::Parser;

use crate::config::CredentialStore;
use crate::instance_api::InstanceApiClient;

/// Routing failure for `instance manage`. All variants are fatal to the
/// invocation and paired with a help dump.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("instance ID is required")]
    MissingInstanceId,
    #[error("subcommand is required")]
    MissingSubcommand,
    #[error("unknown subcommand '{name}'")]
    UnknownSubcommand { name: String },
    #[error("subcommand required for '{name}'")]
    SubcommandRequired { name: String },
}

/// Per-invocation context threaded into manage handlers; replaces any notion
/// of a process-global "current instance".
pub struct ManageContext<'a> {
    pub instance_id: String,
    pub store: &'a CredentialStore,
}

impl ManageContext<'_> {
    fn instance_client(&self) -> Result<InstanceApiClient> {
        let api_key = self.store.instance_api_key(&self.instance_id)?;
        Ok(InstanceApiClient::new(api_key))
    }
}

type Handler = fn(&ManageContext, &[String]) -> Result<()>;

/// One node of the statically registered manage command tree.
pub struct CommandSpec {
    pub name: &'static str,
    pub about: &'static str,
    pub run: Option<Handler>,
    pub children: &'static [CommandSpec],
}

pub const MANAGE_TREE: &[CommandSpec] = &[
    CommandSpec {
        name: "nodes",
        about: "List nodes and get available versions",
        run: None,
        children: &[
            CommandSpec {
                name: "list",
                about: "List nodes in the instance",
                run: Some(nodes_list),
                children: &[],
            },
            CommandSpec {
                name: "versions",
                about: "List versions the instance can be upgraded to",
                run: Some(nodes_versions),
                children: &[],
            },
        ],
    },
    CommandSpec {
        name: "plugins",
        about: "Manage broker plugins",
        run: None,
        children: &[CommandSpec {
            name: "list",
            about: "List available plugins",
            run: Some(plugins_list),
            children: &[],
        }],
    },
    CommandSpec {
        name: "actions",
        about: "Restart, stop, start, reboot, and upgrade instance components",
        run: None,
        children: &[
            CommandSpec {
                name: "restart-rabbitmq",
                about: "Restart RabbitMQ on specified nodes or all nodes",
                run: Some(action_restart_rabbitmq),
                children: &[],
            },
            CommandSpec {
                name: "restart-management",
                about: "Restart the management interface",
                run: Some(action_restart_management),
                children: &[],
            },
            CommandSpec {
                name: "restart-cluster",
                about: "Restart the entire cluster",
                run: Some(action_restart_cluster),
                children: &[],
            },
            CommandSpec {
                name: "stop",
                about: "Stop specified nodes or all nodes",
                run: Some(action_stop),
                children: &[],
            },
            CommandSpec {
                name: "start",
                about: "Start specified nodes or all nodes",
                run: Some(action_start),
                children: &[],
            },
            CommandSpec {
                name: "reboot",
                about: "Reboot specified nodes or all nodes",
                run: Some(action_reboot),
                children: &[],
            },
            CommandSpec {
                name: "stop-cluster",
                about: "Stop the entire cluster",
                run: Some(action_stop_cluster),
                children: &[],
            },
            CommandSpec {
                name: "start-cluster",
                about: "Start the entire cluster",
                run: Some(action_start_cluster),
                children: &[],
            },
            CommandSpec {
                name: "upgrade-erlang",
                about: "Upgrade Erlang to the latest compatible version",
                run: Some(action_upgrade_erlang),
                children: &[],
            },
            CommandSpec {
                name: "upgrade-rabbitmq",
                about: "Upgrade RabbitMQ to a specific version",
                run: Some(action_upgrade_rabbitmq),
                children: &[],
            },
            CommandSpec {
                name: "upgrade-all",
                about: "Upgrade RabbitMQ and Erlang to the latest versions",
                run: Some(action_upgrade_all),
                children: &[],
            },
            CommandSpec {
                name: "upgrade-versions",
                about: "Show versions a pending upgrade would move to",
                run: Some(action_upgrade_versions),
                children: &[],
            },
        ],
    },
    CommandSpec {
        name: "account",
        about: "Rotate password and API key for the instance",
        run: None,
        children: &[
            CommandSpec {
                name: "rotate-password",
                about: "Initiate rotation of the user password",
                run: Some(account_rotate_password),
                children: &[],
            },
            CommandSpec {
                name: "rotate-apikey",
                about: "Rotate the instance API key",
                run: Some(account_rotate_apikey),
                children: &[],
            },
        ],
    },
];

/// Result of token resolution: the leaf to run and the untouched residual
/// arguments (flag parsing is entirely the leaf's business).
pub struct Resolved<'a> {
    pub instance_id: &'a str,
    pub command: &'a CommandSpec,
    pub rest: &'a [String],
    run: Handler,
}

enum DispatchState<'a> {
    NeedInstanceId,
    NeedSubcommand { instance_id: &'a str },
    NeedNested { instance_id: &'a str, command: &'a CommandSpec },
    Ready { instance_id: &'a str, command: &'a CommandSpec },
}

/// Resolve `<instance_id> <subcommand> [<nested>] [rest...]` against the
/// registered tree. Exact-name matches only; no abbreviation, no flags.
pub fn resolve<'a>(
    tree: &'a [CommandSpec],
    tokens: &'a [String],
) -> Result<Resolved<'a>, DispatchError> {
    let mut state = DispatchState::NeedInstanceId;
    let mut remaining = tokens;
    loop {
        state = match state {
            DispatchState::NeedInstanceId => {
                let Some((head, rest)) = remaining.split_first() else {
                    return Err(DispatchError::MissingInstanceId);
                };
                remaining = rest;
                DispatchState::NeedSubcommand { instance_id: head }
            }
            DispatchState::NeedSubcommand { instance_id } => {
                let Some((head, rest)) = remaining.split_first() else {
                    return Err(DispatchError::MissingSubcommand);
                };
                remaining = rest;
                let command =
                    find(tree, head).ok_or_else(|| DispatchError::UnknownSubcommand {
                        name: head.clone(),
                    })?;
                if !command.children.is_empty() && !remaining.is_empty() {
                    DispatchState::NeedNested { instance_id, command }
                } else {
                    DispatchState::Ready { instance_id, command }
                }
            }
            DispatchState::NeedNested { instance_id, command } => {
                let Some((head, rest)) = remaining.split_first() else {
                    // Unreachable: NeedNested is only entered with tokens left.
                    return Err(DispatchError::SubcommandRequired {
                        name: command.name.to_string(),
                    });
                };
                remaining = rest;
                let nested = find(command.children, head).ok_or_else(|| {
                    DispatchError::UnknownSubcommand {
                        name: format!("{} {}", command.name, head),
                    }
                })?;
                DispatchState::Ready { instance_id, command: nested }
            }
            DispatchState::Ready { instance_id, command } => {
                let Some(run) = command.run else {
                    return Err(DispatchError::SubcommandRequired {
                        name: command.name.to_string(),
                    });
                };
                return Ok(Resolved {
                    instance_id,
                    command,
                    rest: remaining,
                    run,
                });
            }
        };
    }
}

fn find<'a>(commands: &'a [CommandSpec], name: &str) -> Option<&'a CommandSpec> {
    commands.iter().find(|command| command.name == name)
}

/// Entry point used by the CLI: resolve, print help on routing failures, run
/// the leaf with the residual args.
pub fn run(store: &CredentialStore, tokens: &[String]) -> Result<()> {
    let resolved = match resolve(MANAGE_TREE, tokens) {
        Ok(resolved) => resolved,
        Err(err) => {
            match &err {
                DispatchError::SubcommandRequired { name } => match find(MANAGE_TREE, name) {
                    Some(command) => print_command_help(command),
                    None => print_manage_help(),
                },
                _ => print_manage_help(),
            }
            return Err(err.into());
        }
    };
    let ctx = ManageContext {
        instance_id: resolved.instance_id.to_string(),
        store,
    };
    (resolved.run)(&ctx, resolved.rest)
}

fn print_manage_help() {
    println!("Manage a specific instance through the instance-scoped API.");
    println!();
    println!("Instance API keys are stored automatically by 'mqcloud instance get <id>'.");
    println!();
    println!("Usage: mqcloud instance manage <instance_id> <subcommand> [args...]");
    println!();
    println!("Subcommands:");
    for command in MANAGE_TREE {
        println!("  {:<10} {}", command.name, command.about);
    }
}

fn print_command_help(command: &CommandSpec) {
    println!("{}", command.about);
    println!();
    println!(
        "Usage: mqcloud instance manage <instance_id> {} <subcommand> [args...]",
        command.name
    );
    if !command.children.is_empty() {
        println!();
        println!("Subcommands:");
        for child in command.children {
            println!("  {:<18} {}", child.name, child.about);
        }
    }
}

// ── Leaf handlers ────────────────────────────────────────────────────────────

fn print_json(header: &str, value: &impl serde::Serialize) -> Result<()> {
    println!("{header}:\n{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn nodes_list(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    let nodes = ctx.instance_client()?.list_nodes()?;
    if nodes.is_empty() {
        println!("No nodes found.");
        return Ok(());
    }
    print_json("Nodes", &nodes)
}

fn nodes_versions(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    let versions = ctx.instance_client()?.available_versions()?;
    print_json("Available versions", &versions)
}

fn plugins_list(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    let plugins = ctx.instance_client()?.list_plugins()?;
    if plugins.is_empty() {
        println!("No plugins found.");
        return Ok(());
    }
    print_json("Plugins", &plugins)
}

/// Node-targeted actions share one flag set.
#[derive(Parser)]
#[command(no_binary_name = true)]
struct NodeActionArgs {
    /// Nodes to target; all nodes when omitted.
    #[arg(long, value_delimiter = ',')]
    nodes: Vec<String>,
}

fn action_restart_rabbitmq(ctx: &ManageContext, args: &[String]) -> Result<()> {
    let parsed = NodeActionArgs::try_parse_from(args)?;
    ctx.instance_client()?.restart_rabbitmq(&parsed.nodes)?;
    println!("RabbitMQ restart initiated.");
    Ok(())
}

fn action_restart_management(ctx: &ManageContext, args: &[String]) -> Result<()> {
    let parsed = NodeActionArgs::try_parse_from(args)?;
    ctx.instance_client()?.restart_management(&parsed.nodes)?;
    println!("Management interface restart initiated.");
    Ok(())
}

fn action_stop(ctx: &ManageContext, args: &[String]) -> Result<()> {
    let parsed = NodeActionArgs::try_parse_from(args)?;
    ctx.instance_client()?.stop(&parsed.nodes)?;
    println!("Stop initiated.");
    Ok(())
}

fn action_start(ctx: &ManageContext, args: &[String]) -> Result<()> {
    let parsed = NodeActionArgs::try_parse_from(args)?;
    ctx.instance_client()?.start(&parsed.nodes)?;
    println!("Start initiated.");
    Ok(())
}

fn action_reboot(ctx: &ManageContext, args: &[String]) -> Result<()> {
    let parsed = NodeActionArgs::try_parse_from(args)?;
    ctx.instance_client()?.reboot(&parsed.nodes)?;
    println!("Reboot initiated.");
    Ok(())
}

fn action_restart_cluster(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    ctx.instance_client()?.restart_cluster()?;
    println!("Cluster restart initiated.");
    Ok(())
}

fn action_stop_cluster(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    ctx.instance_client()?.stop_cluster()?;
    println!("Cluster stop initiated.");
    Ok(())
}

fn action_start_cluster(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    ctx.instance_client()?.start_cluster()?;
    println!("Cluster start initiated.");
    Ok(())
}

fn action_upgrade_erlang(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    ctx.instance_client()?.upgrade_erlang()?;
    println!("Erlang upgrade initiated. The process runs in the background.");
    Ok(())
}

#[derive(Parser)]
#[command(no_binary_name = true)]
struct UpgradeRabbitMqArgs {
    /// Target RabbitMQ version.
    #[arg(long)]
    version: String,
}

fn action_upgrade_rabbitmq(ctx: &ManageContext, args: &[String]) -> Result<()> {
    let parsed = UpgradeRabbitMqArgs::try_parse_from(args)?;
    ctx.instance_client()?.upgrade_rabbitmq(Some(&parsed.version))?;
    println!("RabbitMQ upgrade initiated. The process runs in the background.");
    Ok(())
}

fn action_upgrade_all(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    ctx.instance_client()?.upgrade_rabbitmq_erlang()?;
    println!("RabbitMQ and Erlang upgrade initiated. The process runs in the background.");
    Ok(())
}

fn action_upgrade_versions(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    let versions = ctx.instance_client()?.upgrade_versions()?;
    print_json("Upgrade versions", &versions)
}

fn account_rotate_password(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    ctx.instance_client()?.rotate_password()?;
    println!("Password rotation initiated successfully.");
    Ok(())
}

fn account_rotate_apikey(ctx: &ManageContext, _args: &[String]) -> Result<()> {
    ctx.instance_client()?.rotate_api_key()?;
    println!("Instance API key rotation initiated successfully.");
    println!(
        "The stored key for instance {} is now outdated. Run 'mqcloud instance get {}' to refresh it.",
        ctx.instance_id, ctx.instance_id
    );
    Ok(())
}
