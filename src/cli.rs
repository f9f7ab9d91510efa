use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "qvmctl")]
#[command(version)]
#[command(about = "Declarative state management for Qubes OS virtual machines", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Dry run: report what would change without applying anything
    #[arg(short, long, global = true)]
    pub test: bool,

    /// How much per-key detail ends up in the report
    #[arg(long, value_enum, default_value = "all", global = true)]
    pub status_mode: StatusModeArg,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StatusModeArg {
    /// Report every reconciled key
    All,
    /// Report only the last entry
    Last,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum CheckModeArg {
    Exists,
    Missing,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum StateArg {
    Status,
    Running,
    Halted,
    Transient,
    Paused,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Apply a desired-state file to all VMs it declares
    Apply(ApplyArgs),

    /// Check whether a VM exists
    Check(CheckArgs),

    /// Report or assert a VM power state
    State(StateArgs),

    /// Ensure a VM exists, creating it when missing
    Present(PresentArgs),

    /// Ensure a VM is absent, removing it when present
    Absent { vm: String },

    /// Clone a VM under a new name
    Clone(CloneArgs),

    /// List, get or set VM preferences
    Prefs(PrefsArgs),

    /// List or toggle VM services
    Service(ServiceArgs),

    /// List or toggle VM features
    Features(FeaturesArgs),

    /// List or adjust VM tags
    Tags(TagsArgs),

    /// List, attach or detach VM devices
    Devices(DevicesArgs),

    /// List or replace VM firewall rules
    Firewall(FirewallArgs),

    /// Start a VM
    Start { vm: String },

    /// Shut a VM down
    Shutdown(ShutdownArgs),

    /// Kill a VM outright
    Kill { vm: String },

    /// Pause a VM
    Pause { vm: String },

    /// Resume a paused VM
    Unpause { vm: String },

    /// Run a command inside a VM
    Run(RunArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Desired-state YAML file
    pub file: PathBuf,
}

#[derive(Parser)]
pub struct CheckArgs {
    pub vm: String,

    /// Pass when the VM exists, or when it is missing
    #[arg(value_enum, default_value = "exists")]
    pub mode: CheckModeArg,
}

#[derive(Parser)]
pub struct StateArgs {
    pub vm: String,

    /// States to assert; empty reports the current state
    #[arg(value_enum)]
    pub states: Vec<StateArg>,
}

#[derive(Parser)]
pub struct PresentArgs {
    pub vm: String,

    /// VM class (AppVM, StandaloneVM, TemplateVM, ...)
    #[arg(long)]
    pub class: Option<String>,

    /// Template to base the VM on
    #[arg(long)]
    pub template: Option<String>,

    /// VM label color
    #[arg(long)]
    pub label: Option<String>,

    /// Initial memory in MB
    #[arg(long)]
    pub memory: Option<i64>,

    /// VCPU count
    #[arg(long)]
    pub vcpus: Option<i64>,
}

#[derive(Parser)]
pub struct CloneArgs {
    /// Source VM to clone from
    pub source: String,

    /// Name for the new clone
    pub clone: String,

    /// Shut the source down first if it is running
    #[arg(long)]
    pub shutdown: bool,
}

#[derive(Parser)]
pub struct PrefsArgs {
    pub vm: String,

    /// Properties to read instead of set
    #[arg(long)]
    pub get: Vec<String>,

    /// Assignments of the form key=value; `key=*default*` clears the
    /// local override. With no assignments, lists everything.
    pub sets: Vec<String>,
}

#[derive(Parser)]
pub struct ServiceArgs {
    pub vm: String,

    /// Services to enable
    #[arg(long)]
    pub enable: Vec<String>,

    /// Services to disable
    #[arg(long)]
    pub disable: Vec<String>,

    /// Services to revert to the VM default
    #[arg(long, value_name = "SERVICE")]
    pub default: Vec<String>,
}

#[derive(Parser)]
pub struct FeaturesArgs {
    pub vm: String,

    /// Features to enable
    #[arg(long)]
    pub enable: Vec<String>,

    /// Features to disable
    #[arg(long)]
    pub disable: Vec<String>,

    /// Features to remove
    #[arg(long, value_name = "FEATURE")]
    pub default: Vec<String>,

    /// Arbitrary feature assignments of the form name=value
    #[arg(long, value_name = "NAME=VALUE")]
    pub set: Vec<String>,
}

#[derive(Parser)]
pub struct TagsArgs {
    pub vm: String,

    /// Tags to add
    #[arg(long)]
    pub add: Vec<String>,

    /// Tags to remove
    #[arg(long)]
    pub del: Vec<String>,
}

#[derive(Parser)]
pub struct DevicesArgs {
    pub vm: String,

    /// Devices to attach, as class:backend:ident[,option=value...]
    #[arg(long, value_name = "DEVICE")]
    pub attach: Vec<String>,

    /// Devices to detach, as class:backend:ident
    #[arg(long, value_name = "DEVICE")]
    pub detach: Vec<String>,
}

#[derive(Parser)]
pub struct FirewallArgs {
    pub vm: String,

    /// Rules to set, e.g. 'action=accept proto=tcp dstports=443'.
    /// Replaces the whole ruleset; with no rules, lists the current one.
    #[arg(long, value_name = "RULE")]
    pub set: Vec<String>,
}

#[derive(Parser)]
pub struct ShutdownArgs {
    pub vm: String,

    /// Wait for the VM to halt
    #[arg(long)]
    pub wait: bool,

    /// Kill if a clean shutdown does not converge
    #[arg(long)]
    pub force: bool,

    /// Kill outright instead of requesting shutdown
    #[arg(long)]
    pub kill: bool,
}

#[derive(Parser)]
pub struct RunArgs {
    pub vm: String,

    /// Run as this user inside the VM
    #[arg(long)]
    pub user: Option<String>,

    /// Start the VM first if it is not running
    #[arg(long)]
    pub auto: bool,

    /// Command and arguments to run
    #[arg(trailing_var_arg = true, required = true)]
    pub cmd: Vec<String>,
}
