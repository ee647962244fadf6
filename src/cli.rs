use std::io;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::shells::Zsh;
use tracing::warn;

use crate::cache::CompletionCache;
use crate::client::{
    Client, InstanceCreateRequest, InstanceUpdateRequest, TeamInviteRequest, TeamUpdateRequest,
    VpcCreateRequest, VpcUpdateRequest,
};
use crate::completion;
use crate::config::CredentialStore;
use crate::manage;

#[derive(Parser)]
#[command(name = "mqcloud")]
#[command(about = "MQCloud CLI for managing instances and VPCs", version)]
#[command(
    long_about = "A command line interface for the MQCloud provisioning API.
Use this tool to create, manage, and delete broker instances and VPCs.

API Key Configuration:
The CLI will look for your API key in the following order:
1. MQCLOUD_APIKEY environment variable
2. ~/.mqcloudrc file (JSON format)
3. If neither exists, you will be prompted to enter it

Instance API keys are automatically saved when using 'instance get'."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    Instance(InstanceCommand),
    Vpc(VpcCommand),
    Regions(RegionsArgs),
    Plans(PlansArgs),
    Team(TeamCommand),
    Audit(AuditArgs),
    RotateKey(RotateKeyArgs),
    Completion(CompletionArgs),
    #[command(hide = true)]
    Complete(CompleteArgs),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::Instance(command) => command.run(),
            Command::Vpc(command) => command.run(),
            Command::Regions(args) => args.run(),
            Command::Plans(args) => args.run(),
            Command::Team(command) => command.run(),
            Command::Audit(args) => args.run(),
            Command::RotateKey(args) => args.run(),
            Command::Completion(args) => args.run(),
            Command::Complete(args) => args.run(),
        }
    }
}

fn account_client() -> Result<(CredentialStore, Client)> {
    let store = CredentialStore::default_locations()?;
    let api_key = store.main_api_key().context("failed to get API key")?;
    let client = Client::new(api_key);
    Ok((store, client))
}

fn print_json(header: &str, value: &impl serde::Serialize) -> Result<()> {
    println!("{header}:\n{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ── instance ─────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Manage broker instances")]
struct InstanceCommand {
    #[command(subcommand)]
    command: InstanceSubcommand,
}

#[derive(Subcommand)]
enum InstanceSubcommand {
    Create(InstanceCreateArgs),
    List(InstanceListArgs),
    Get(InstanceGetArgs),
    Update(InstanceUpdateArgs),
    Delete(InstanceDeleteArgs),
    Resize(InstanceResizeArgs),
    Manage(InstanceManageArgs),
}

impl InstanceCommand {
    fn run(self) -> Result<()> {
        match self.command {
            InstanceSubcommand::Create(args) => args.run(),
            InstanceSubcommand::List(args) => args.run(),
            InstanceSubcommand::Get(args) => args.run(),
            InstanceSubcommand::Update(args) => args.run(),
            InstanceSubcommand::Delete(args) => args.run(),
            InstanceSubcommand::Resize(args) => args.run(),
            InstanceSubcommand::Manage(args) => args.run(),
        }
    }
}

#[derive(Parser)]
#[command(
    about = "Create a new broker instance",
    long_about = "Create a new broker instance with the specified configuration."
)]
struct InstanceCreateArgs {
    #[arg(long, help = "Name of the instance (required)")]
    name: String,
    #[arg(long, help = "Subscription plan (required)")]
    plan: String,
    #[arg(long, help = "Region identifier, e.g. amazon-web-services::us-east-1 (required)")]
    region: String,
    #[arg(long, value_delimiter = ',', help = "Instance tags")]
    tags: Vec<String>,
    #[arg(long, help = "VPC subnet for a dedicated VPC")]
    vpc_subnet: Option<String>,
    #[arg(long, help = "ID of an existing VPC to add the instance to")]
    vpc_id: Option<i64>,
    #[arg(long, help = "Wait for the instance to be ready before returning")]
    wait: bool,
    #[arg(long, default_value = "15m", help = "Timeout for waiting (e.g. 15m, 30m)")]
    wait_timeout: String,
}

impl InstanceCreateArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let req = InstanceCreateRequest {
            name: self.name,
            plan: self.plan,
            region: self.region,
            tags: self.tags,
            vpc_subnet: self.vpc_subnet,
            vpc_id: self.vpc_id,
        };
        let resp = client.create_instance(&req)?;

        if self.wait {
            let timeout = parse_wait_timeout(&self.wait_timeout)?;
            if let Err(err) = wait_for_instance_ready(&client, resp.id, timeout) {
                print_json("Instance created but not ready", &resp)?;
                return Err(err.context("wait failed"));
            }
        }

        print_json("Instance created successfully", &resp)
    }
}

fn wait_for_instance_ready(client: &Client, id: i64, timeout: Duration) -> Result<()> {
    const POLL_INTERVAL: Duration = Duration::from_secs(5);
    let deadline = Instant::now() + timeout;
    loop {
        let instance = client.get_instance(id)?;
        if instance.ready {
            return Ok(());
        }
        if Instant::now() + POLL_INTERVAL > deadline {
            bail!("instance {id} not ready within {}s", timeout.as_secs());
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Accepts the `15m` / `2h` / `90s` shorthand used by the wait flags.
fn parse_wait_timeout(value: &str) -> Result<Duration> {
    let value = value.trim();
    if value.len() < 2 {
        return Err(anyhow!("invalid wait-timeout value '{value}'"));
    }
    let (number, unit) = value.split_at(value.len() - 1);
    let count: u64 = number
        .parse()
        .map_err(|_| anyhow!("invalid wait-timeout value '{value}'"))?;
    match unit {
        "s" => Ok(Duration::from_secs(count)),
        "m" => Ok(Duration::from_secs(count * 60)),
        "h" => Ok(Duration::from_secs(count * 3600)),
        _ => Err(anyhow!("invalid wait-timeout value '{value}'")),
    }
}

#[derive(Parser)]
#[command(about = "List all broker instances")]
struct InstanceListArgs {}

impl InstanceListArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let instances = client.list_instances()?;
        if instances.is_empty() {
            println!("No instances found.");
            return Ok(());
        }
        print_json("Instances", &instances)
    }
}

#[derive(Parser)]
#[command(
    about = "Get details of a specific instance",
    long_about = "Retrieves detailed information about an instance and stores its instance API key."
)]
struct InstanceGetArgs {
    #[arg(help = "Instance ID")]
    id: i64,
}

impl InstanceGetArgs {
    fn run(self) -> Result<()> {
        let (store, client) = account_client()?;
        let instance = client.get_instance(self.id)?;

        if !instance.apikey.is_empty() {
            match store.save_instance_api_key(&self.id.to_string(), &instance.apikey) {
                Ok(()) => println!("Instance API key saved for instance {}", self.id),
                Err(err) => warn!("failed to save instance API key: {err:#}"),
            }
        }

        print_json("Instance details", &instance)
    }
}

#[derive(Parser)]
#[command(about = "Update an instance")]
struct InstanceUpdateArgs {
    #[arg(help = "Instance ID")]
    id: i64,
    #[arg(long, help = "New instance name")]
    name: Option<String>,
    #[arg(long, help = "New subscription plan")]
    plan: Option<String>,
    #[arg(long, value_delimiter = ',', help = "New instance tags")]
    tags: Vec<String>,
}

impl InstanceUpdateArgs {
    fn run(self) -> Result<()> {
        if self.name.is_none() && self.plan.is_none() && self.tags.is_empty() {
            bail!("at least one field (name, plan or tags) must be specified for update");
        }
        let (_, client) = account_client()?;
        let req = InstanceUpdateRequest {
            name: self.name,
            plan: self.plan,
            tags: self.tags,
        };
        client.update_instance(self.id, &req)?;
        println!("Instance {} updated.", self.id);
        Ok(())
    }
}

#[derive(Parser)]
#[command(about = "Delete an instance")]
struct InstanceDeleteArgs {
    #[arg(help = "Instance ID")]
    id: i64,
}

impl InstanceDeleteArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        client.delete_instance(self.id)?;
        println!("Instance {} deleted.", self.id);
        Ok(())
    }
}

#[derive(Parser)]
#[command(about = "Resize the disk of an instance")]
struct InstanceResizeArgs {
    #[arg(help = "Instance ID")]
    id: i64,
    #[arg(long, help = "Disk size to add in gigabytes (25, 50, 100, 250, 500, 1000, 2000)")]
    disk_size: i64,
    #[arg(long, help = "Allow cluster downtime if needed when resizing")]
    allow_downtime: bool,
}

impl InstanceResizeArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        client.resize_instance_disk(self.id, self.disk_size, self.allow_downtime)?;
        println!("Disk resize initiated for instance {}.", self.id);
        Ok(())
    }
}

#[derive(Parser)]
#[command(
    about = "Manage a specific instance",
    long_about = "Use the instance-scoped API to manage nodes, plugins, actions, and more.

This command uses the instance API key, not your main API key.
Instance API keys are automatically saved when you run 'mqcloud instance get <id>'.",
    disable_help_flag = true
)]
struct InstanceManageArgs {
    // The instance ID occupies the position a subcommand name normally
    // would, so routing is done by the dispatcher, not by clap.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,
}

impl InstanceManageArgs {
    fn run(self) -> Result<()> {
        let store = CredentialStore::default_locations()?;
        manage::run(&store, &self.args)
    }
}

// ── vpc ──────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Manage VPCs")]
struct VpcCommand {
    #[command(subcommand)]
    command: VpcSubcommand,
}

#[derive(Subcommand)]
enum VpcSubcommand {
    Create(VpcCreateArgs),
    List(VpcListArgs),
    Get(VpcGetArgs),
    Update(VpcUpdateArgs),
    Delete(VpcDeleteArgs),
}

impl VpcCommand {
    fn run(self) -> Result<()> {
        match self.command {
            VpcSubcommand::Create(args) => args.run(),
            VpcSubcommand::List(args) => args.run(),
            VpcSubcommand::Get(args) => args.run(),
            VpcSubcommand::Update(args) => args.run(),
            VpcSubcommand::Delete(args) => args.run(),
        }
    }
}

#[derive(Parser)]
#[command(about = "Create a new VPC")]
struct VpcCreateArgs {
    #[arg(long, help = "Name of the VPC (required)")]
    name: String,
    #[arg(long, help = "Region identifier (required)")]
    region: String,
    #[arg(long, help = "VPC subnet in CIDR form (required)")]
    subnet: String,
    #[arg(long, value_delimiter = ',', help = "VPC tags")]
    tags: Vec<String>,
}

impl VpcCreateArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let req = VpcCreateRequest {
            name: self.name,
            region: self.region,
            subnet: self.subnet,
            tags: self.tags,
        };
        let resp = client.create_vpc(&req)?;
        print_json("VPC created successfully", &resp)
    }
}

#[derive(Parser)]
#[command(about = "List all VPCs")]
struct VpcListArgs {}

impl VpcListArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let vpcs = client.list_vpcs()?;
        if vpcs.is_empty() {
            println!("No VPCs found.");
            return Ok(());
        }
        print_json("VPCs", &vpcs)
    }
}

#[derive(Parser)]
#[command(about = "Get details of a specific VPC")]
struct VpcGetArgs {
    #[arg(help = "VPC ID")]
    id: i64,
}

impl VpcGetArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let vpc = client.get_vpc(self.id)?;
        print_json("VPC details", &vpc)
    }
}

#[derive(Parser)]
#[command(about = "Update a VPC")]
struct VpcUpdateArgs {
    #[arg(help = "VPC ID")]
    id: i64,
    #[arg(long, help = "New VPC name")]
    name: Option<String>,
    #[arg(long, value_delimiter = ',', help = "New VPC tags")]
    tags: Vec<String>,
}

impl VpcUpdateArgs {
    fn run(self) -> Result<()> {
        if self.name.is_none() && self.tags.is_empty() {
            bail!("at least one field (name or tags) must be specified for update");
        }
        let (_, client) = account_client()?;
        let req = VpcUpdateRequest {
            name: self.name,
            tags: self.tags,
        };
        client.update_vpc(self.id, &req)?;
        println!("VPC {} updated.", self.id);
        Ok(())
    }
}

#[derive(Parser)]
#[command(about = "Delete a VPC")]
struct VpcDeleteArgs {
    #[arg(help = "VPC ID")]
    id: i64,
}

impl VpcDeleteArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        client.delete_vpc(self.id)?;
        println!("VPC {} deleted.", self.id);
        Ok(())
    }
}

// ── regions / plans ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "List available regions")]
struct RegionsArgs {
    #[arg(long, help = "Filter by provider (e.g. amazon-web-services)")]
    provider: Option<String>,
}

impl RegionsArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let regions = client.list_regions(self.provider.as_deref())?;
        print_json("Regions", &regions)
    }
}

#[derive(Parser)]
#[command(about = "List available subscription plans")]
struct PlansArgs {
    #[arg(long, help = "Filter by backend software")]
    backend: Option<String>,
}

impl PlansArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let plans = client.list_plans(self.backend.as_deref())?;
        print_json("Plans", &plans)
    }
}

// ── team ─────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Manage team members")]
struct TeamCommand {
    #[command(subcommand)]
    command: TeamSubcommand,
}

#[derive(Subcommand)]
enum TeamSubcommand {
    List(TeamListArgs),
    Invite(TeamInviteArgs),
    Update(TeamUpdateArgs),
    Remove(TeamRemoveArgs),
}

impl TeamCommand {
    fn run(self) -> Result<()> {
        match self.command {
            TeamSubcommand::List(args) => args.run(),
            TeamSubcommand::Invite(args) => args.run(),
            TeamSubcommand::Update(args) => args.run(),
            TeamSubcommand::Remove(args) => args.run(),
        }
    }
}

#[derive(Parser)]
#[command(about = "List team members")]
struct TeamListArgs {}

impl TeamListArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let members = client.list_team_members()?;
        if members.is_empty() {
            println!("No team members found.");
            return Ok(());
        }
        print_json("Team members", &members)
    }
}

#[derive(Parser)]
#[command(
    about = "Invite a new user to the team",
    long_about = "Invites a user to join the team with the specified role.
Available roles: admin, devops, member, monitor, billing manager"
)]
struct TeamInviteArgs {
    #[arg(long, help = "Email address of the user to invite (required)")]
    email: String,
    #[arg(long, default_value = "member", help = "Role to assign")]
    role: String,
    #[arg(long, value_delimiter = ',', help = "Tags to assign")]
    tags: Vec<String>,
}

impl TeamInviteArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let req = TeamInviteRequest {
            email: self.email,
            role: Some(self.role),
            tags: self.tags,
        };
        let resp = client.invite_team_member(&req)?;
        print_json("Team member invited", &resp)
    }
}

#[derive(Parser)]
#[command(about = "Update user role and tags")]
struct TeamUpdateArgs {
    #[arg(long, help = "User ID (UUID) to update (required)")]
    user_id: String,
    #[arg(long, help = "New role to assign")]
    role: Option<String>,
    #[arg(long, value_delimiter = ',', help = "New tags to assign")]
    tags: Vec<String>,
}

impl TeamUpdateArgs {
    fn run(self) -> Result<()> {
        if self.role.is_none() && self.tags.is_empty() {
            bail!("at least one field (role or tags) must be specified for update");
        }
        let (_, client) = account_client()?;
        let req = TeamUpdateRequest {
            role: self.role,
            tags: self.tags,
        };
        let resp = client.update_team_member(&self.user_id, &req)?;
        print_json("Team member updated", &resp)
    }
}

#[derive(Parser)]
#[command(about = "Remove a user from the team")]
struct TeamRemoveArgs {
    #[arg(long, help = "Email address of the user to remove (required)")]
    email: String,
}

impl TeamRemoveArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let resp = client.remove_team_member(&self.email)?;
        print_json("Team member removed", &resp)
    }
}

// ── audit / rotate-key ───────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    about = "Get the audit log in CSV format",
    long_about = "Returns the audit log in CSV format for the latest month or for the month given."
)]
struct AuditArgs {
    #[arg(long, help = "YYYY-MM format (e.g. 2025-12)")]
    timestamp: Option<String>,
}

impl AuditArgs {
    fn run(self) -> Result<()> {
        let (_, client) = account_client()?;
        let csv = client.audit_log_csv(self.timestamp.as_deref())?;
        print!("{csv}");
        Ok(())
    }
}

#[derive(Parser)]
#[command(
    about = "Rotate the main API key",
    long_about = "Removes the current API key and creates a new one with matching permissions."
)]
struct RotateKeyArgs {}

impl RotateKeyArgs {
    fn run(self) -> Result<()> {
        let (store, client) = account_client()?;
        let resp = client.rotate_api_key()?;
        print_json("API key rotated successfully", &resp)?;

        // The remote rotation already happened; a failed local update only
        // costs the user a re-prompt next time.
        match store.save_main_api_key(&resp.apikey) {
            Ok(()) => println!("Local credential file updated with the new API key."),
            Err(err) => warn!("could not update local credential file: {err:#}"),
        }
        Ok(())
    }
}

// ── completion ───────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    about = "Generate a shell completion script",
    long_about = "Generate a shell completion script for the mqcloud CLI.

To load completions in zsh, add to ~/.zshrc:

  source <(mqcloud completion zsh)"
)]
struct CompletionArgs {
    #[arg(value_enum, help = "Target shell")]
    shell: CompletionShell,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompletionShell {
    Zsh,
}

impl CompletionArgs {
    fn run(self) -> Result<()> {
        let mut command = Cli::command();
        match self.shell {
            CompletionShell::Zsh => {
                clap_complete::generate(Zsh, &mut command, "mqcloud", &mut io::stdout());
            }
        }
        Ok(())
    }
}

#[derive(Parser)]
#[command(about = "Print completion candidates for a resource class")]
struct CompleteArgs {
    #[arg(value_enum)]
    resource: CompleteResource,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CompleteResource {
    Instances,
    Plans,
    Regions,
    Vpcs,
}

impl CompleteArgs {
    fn run(self) -> Result<()> {
        let store = CredentialStore::default_locations()?;
        let cache = CompletionCache::open()?;
        let candidates = match self.resource {
            CompleteResource::Instances => completion::instance_candidates(&store, &cache),
            CompleteResource::Plans => completion::plan_candidates(&store, &cache),
            CompleteResource::Regions => completion::region_candidates(&store, &cache),
            CompleteResource::Vpcs => completion::vpc_candidates(&store, &cache),
        };
        for candidate in candidates {
            println!("{candidate}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_declaration_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn root_help_documents_key_precedence() {
        let command = Cli::command();
        let long_about = command.get_long_about().unwrap().to_string();
        assert!(long_about.contains("MQCLOUD_APIKEY environment variable"));
        assert!(long_about.contains("~/.mqcloudrc file"));
    }

    #[test]
    fn manage_forwards_raw_tokens() {
        let cli = Cli::try_parse_from([
            "mqcloud", "instance", "manage", "1234", "actions", "restart-rabbitmq", "--nodes",
            "node-1",
        ])
        .unwrap();
        let Command::Instance(instance) = cli.command else {
            panic!("expected instance command");
        };
        let InstanceSubcommand::Manage(manage) = instance.command else {
            panic!("expected manage subcommand");
        };
        assert_eq!(
            manage.args,
            ["1234", "actions", "restart-rabbitmq", "--nodes", "node-1"]
        );
    }

    #[test]
    fn wait_timeout_shorthand_parses() {
        assert_eq!(parse_wait_timeout("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_wait_timeout("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_wait_timeout("90s").unwrap(), Duration::from_secs(90));
        assert!(parse_wait_timeout("fast").is_err());
        assert!(parse_wait_timeout("").is_err());
    }
}
