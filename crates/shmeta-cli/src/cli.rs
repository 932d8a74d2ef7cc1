use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "shmeta",
    about = "shmeta: metadata for a shared-memory object store",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Instance to talk to: ipc://<path>, rpc://<host:port>, a socket path or host:port
    #[arg(short, long, global = true)]
    pub endpoint: Option<String>,

    /// TOML config file (client or server, depending on the command)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run a store instance daemon
    Serve(ServeArgs),
    /// Show the connected instance
    Status,
    /// Create an object
    Put(PutArgs),
    /// Show objects with their members resolved
    Get(GetArgs),
    /// List objects whose typename matches
    List(ListArgs),
    /// Copy an object, overriding properties; members are shared
    Copy(CopyArgs),
    /// Delete objects
    Delete(DeleteArgs),
    /// Delete every object on the instance
    Clear(ClearArgs),
    /// Show the instances of the cluster
    Cluster,
    /// Pull changes from the rest of the cluster
    Sync,
    /// Manage object names
    Name(NameArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    #[arg(long)]
    pub socket: Option<PathBuf>,
    #[arg(long)]
    pub rpc: Option<String>,
    #[arg(long)]
    pub hostname: Option<String>,
    #[arg(long)]
    pub max_connections: Option<usize>,
}

#[derive(Args)]
pub struct PutArgs {
    pub typename: String,
    /// Property as key=value; numbers and true/false are typed
    #[arg(short = 'p', long = "property")]
    pub properties: Vec<String>,
    /// Member as key=<object id>
    #[arg(short = 'm', long = "member")]
    pub members: Vec<String>,
    /// Bind a name to the new object
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    #[arg(required = true)]
    pub ids: Vec<String>,
    /// Synchronize with the cluster before reading
    #[arg(long)]
    pub sync: bool,
    /// Wait until the objects become visible
    #[arg(long)]
    pub wait: bool,
    /// Wait timeout in milliseconds (implies --wait)
    #[arg(long)]
    pub timeout_ms: Option<u64>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(default_value = "*")]
    pub pattern: String,
    #[arg(long)]
    pub regex: bool,
    /// Maximum entries; 0 lists everything
    #[arg(short = 'n', long, default_value = "5")]
    pub limit: usize,
}

#[derive(Args)]
pub struct CopyArgs {
    pub id: String,
    /// Property to set on the copy as key=value
    #[arg(short = 'p', long = "property")]
    pub properties: Vec<String>,
}

#[derive(Args)]
pub struct ClearArgs {
    /// Confirm deleting everything
    #[arg(long)]
    pub yes: bool,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[arg(required = true)]
    pub ids: Vec<String>,
    #[arg(long)]
    pub force: bool,
    #[arg(long)]
    pub deep: bool,
}

#[derive(Args)]
pub struct NameArgs {
    #[command(subcommand)]
    pub command: NameCommand,
}

#[derive(Subcommand)]
pub enum NameCommand {
    /// Bind a name to an object
    Put { name: String, id: String },
    /// Resolve a name
    Get {
        name: String,
        #[arg(long)]
        wait: bool,
    },
    /// Remove a name
    Drop { name: String },
    /// List names
    List {
        #[arg(default_value = "*")]
        pattern: String,
        #[arg(long)]
        regex: bool,
        #[arg(short = 'n', long, default_value = "0")]
        limit: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_status() {
        let cli = Cli::try_parse_from(["shmeta", "status"]).unwrap();
        assert!(matches!(cli.command, Command::Status));
        assert!(!cli.verbose);
    }

    #[test]
    fn parse_put() {
        let cli = Cli::try_parse_from([
            "shmeta", "put", "pair", "-p", "value=42", "-m", "first=o0000000000000001",
        ])
        .unwrap();
        if let Command::Put(args) = cli.command {
            assert_eq!(args.typename, "pair");
            assert_eq!(args.properties, vec!["value=42"]);
            assert_eq!(args.members, vec!["first=o0000000000000001"]);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_get_with_wait() {
        let cli = Cli::try_parse_from(["shmeta", "get", "o01", "--timeout-ms", "500"]).unwrap();
        if let Command::Get(args) = cli.command {
            assert_eq!(args.ids, vec!["o01"]);
            assert_eq!(args.timeout_ms, Some(500));
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn get_requires_an_id() {
        assert!(Cli::try_parse_from(["shmeta", "get"]).is_err());
    }

    #[test]
    fn parse_list_defaults() {
        let cli = Cli::try_parse_from(["shmeta", "list"]).unwrap();
        if let Command::List(args) = cli.command {
            assert_eq!(args.pattern, "*");
            assert_eq!(args.limit, 5);
            assert!(!args.regex);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn parse_copy_and_clear() {
        let cli = Cli::try_parse_from(["shmeta", "copy", "o01", "-p", "label=b", "-p", "rows=2"]).unwrap();
        if let Command::Copy(args) = cli.command {
            assert_eq!(args.id, "o01");
            assert_eq!(args.properties, vec!["label=b", "rows=2"]);
        } else {
            panic!("wrong command");
        }
        let cli = Cli::try_parse_from(["shmeta", "clear"]).unwrap();
        assert!(matches!(cli.command, Command::Clear(ClearArgs { yes: false })));
        let cli = Cli::try_parse_from(["shmeta", "clear", "--yes"]).unwrap();
        assert!(matches!(cli.command, Command::Clear(ClearArgs { yes: true })));
        let cli = Cli::try_parse_from(["shmeta", "cluster"]).unwrap();
        assert!(matches!(cli.command, Command::Cluster));
    }

    #[test]
    fn parse_name_get() {
        let cli = Cli::try_parse_from(["shmeta", "name", "get", "latest", "--wait"]).unwrap();
        if let Command::Name(NameArgs {
            command: NameCommand::Get { name, wait },
        }) = cli.command
        {
            assert_eq!(name, "latest");
            assert!(wait);
        } else {
            panic!("wrong command");
        }
    }

    #[test]
    fn global_flags() {
        let cli = Cli::try_parse_from([
            "shmeta", "sync", "--endpoint", "rpc://node:9600", "--format", "json", "-v",
        ])
        .unwrap();
        assert_eq!(cli.endpoint.as_deref(), Some("rpc://node:9600"));
        assert!(matches!(cli.format, OutputFormat::Json));
        assert!(cli.verbose);
    }
}
