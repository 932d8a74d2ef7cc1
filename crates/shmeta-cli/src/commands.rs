use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context};
use colored::Colorize;
use shmeta_client::{
    Client, ClientConfig, Connection, DeleteOptions, Endpoint, GetOptions, InstanceStatus, ListOptions,
    MetaValue, ObjectId, ObjectMeta, JSON_DEPTH,
};
use shmeta_server::{MetaServer, ServerConfig};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let out = Output { format: cli.format.clone() };
    match &cli.command {
        Command::Serve(args) => cmd_serve(&cli, args),
        Command::Status => cmd_status(&connect(&cli)?, &out),
        Command::Put(args) => cmd_put(&connect(&cli)?, args, &out),
        Command::Get(args) => cmd_get(&connect(&cli)?, args, &out),
        Command::List(args) => cmd_list(&connect(&cli)?, args, &out),
        Command::Copy(args) => cmd_copy(&connect(&cli)?, args, &out),
        Command::Delete(args) => cmd_delete(&connect(&cli)?, args, &out),
        Command::Clear(args) => cmd_clear(&cli, args),
        Command::Cluster => cmd_cluster(&connect(&cli)?, &out),
        Command::Sync => {
            connect(&cli)?.sync_meta()?;
            println!("{} Synchronized with cluster.", "✓".green());
            Ok(())
        }
        Command::Name(args) => cmd_name(&connect(&cli)?, &args.command, &out),
    }
}

/// Client config from `--config`, else the environment, with `--endpoint`
/// taking precedence over both.
fn client_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)?,
        None => ClientConfig::from_env()?,
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = Endpoint::parse(endpoint)?;
    }
    Ok(config)
}

fn connect(cli: &Cli) -> anyhow::Result<Connection> {
    let config = client_config(cli)?;
    Connection::open(&config).with_context(|| format!("cannot connect to {}", config.endpoint))
}

fn cmd_serve(cli: &Cli, args: &ServeArgs) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(socket) = &args.socket {
        config.ipc_socket = socket.clone();
    }
    if let Some(rpc) = &args.rpc {
        config.rpc_addr = rpc.parse().with_context(|| format!("invalid rpc address {rpc}"))?;
    }
    if let Some(hostname) = &args.hostname {
        config.hostname = hostname.clone();
    }
    if let Some(max) = args.max_connections {
        config.max_connections = max;
    }
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(MetaServer::new(config).serve())?;
    Ok(())
}

fn cmd_status(conn: &Connection, out: &Output) -> anyhow::Result<()> {
    let status = conn.status()?;
    out.status(&status, conn)
}

fn cmd_put(conn: &Connection, args: &PutArgs, out: &Output) -> anyhow::Result<()> {
    let mut meta = ObjectMeta::new(args.typename.as_str());
    for property in &args.properties {
        let (key, value) = split_assignment(property)?;
        meta.set(key, MetaValue::parse_loose(value))?;
    }
    for member in &args.members {
        let (key, id) = split_assignment(member)?;
        meta.add_member(key, parse_id(id)?)?;
    }
    let created = conn.create_metadata(&meta)?;
    let id = created.id().context("instance returned an object without id")?;
    if let Some(name) = &args.name {
        conn.put_name(id, name)?;
    }
    match out.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&created.to_json())?),
        OutputFormat::Text => println!("{} Created {} ({})", "✓".green().bold(), id.to_string().yellow(), created.typename()),
    }
    Ok(())
}

fn cmd_get(conn: &Connection, args: &GetArgs, out: &Output) -> anyhow::Result<()> {
    let ids = args.ids.iter().map(|s| parse_id(s)).collect::<anyhow::Result<Vec<_>>>()?;
    let mut options = GetOptions::new().with_sync_remote(args.sync).with_wait(args.wait);
    if let Some(ms) = args.timeout_ms {
        options = options.with_timeout(Duration::from_millis(ms));
    }
    let metas = conn.get_metadatas(&ids, &options)?;
    out.metas(&metas)
}

fn cmd_list(conn: &Connection, args: &ListArgs, out: &Output) -> anyhow::Result<()> {
    let options = list_options(&args.pattern, args.regex, args.limit);
    let metas = conn.list_metadata(&options)?;
    if metas.is_empty() && matches!(out.format, OutputFormat::Text) {
        println!("No objects match {}.", args.pattern.bold());
        return Ok(());
    }
    out.metas(&metas)
}

fn cmd_delete(conn: &Connection, args: &DeleteArgs, out: &Output) -> anyhow::Result<()> {
    let ids = args.ids.iter().map(|s| parse_id(s)).collect::<anyhow::Result<Vec<_>>>()?;
    let options = DeleteOptions::default().with_force(args.force).with_deep(args.deep);
    let deleted = conn.delete(&ids, &options)?;
    match out.format {
        OutputFormat::Json => {
            let ids: Vec<String> = deleted.iter().map(ToString::to_string).collect();
            println!("{}", serde_json::to_string_pretty(&ids)?);
        }
        OutputFormat::Text => {
            for id in &deleted {
                println!("  {} {}", "deleted:".red(), id);
            }
        }
    }
    Ok(())
}

fn cmd_copy(conn: &Connection, args: &CopyArgs, out: &Output) -> anyhow::Result<()> {
    let source = parse_id(&args.id)?;
    let mut extra = BTreeMap::new();
    for property in &args.properties {
        let (key, value) = split_assignment(property)?;
        extra.insert(key.to_string(), MetaValue::parse_loose(value));
    }
    let copy = conn.shallow_copy(source, &extra)?;
    match out.format {
        OutputFormat::Json => println!("{}", serde_json::json!({ "source": source.to_string(), "copy": copy.to_string() })),
        OutputFormat::Text => println!("{} Copied {} to {}", "✓".green().bold(), source, copy.to_string().yellow()),
    }
    Ok(())
}

fn cmd_clear(cli: &Cli, args: &ClearArgs) -> anyhow::Result<()> {
    if !args.yes {
        bail!("clear deletes every object on the instance; pass --yes to confirm");
    }
    let removed = connect(cli)?.clear()?;
    println!("{} Cleared {} objects.", "✓".green(), removed.len());
    Ok(())
}

fn cmd_cluster(conn: &Connection, out: &Output) -> anyhow::Result<()> {
    let members = conn.cluster_info()?;
    match out.format {
        OutputFormat::Json => {
            let map: serde_json::Map<String, serde_json::Value> = members
                .values()
                .map(|m| {
                    let entry = serde_json::json!({ "hostname": m.hostname, "timestamp": m.joined_at_ms });
                    (m.instance_id.to_string(), entry)
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => {
            for m in members.values() {
                let marker = if m.instance_id == conn.instance_id() { "*" } else { " " };
                println!("{marker} {:<20} {:<24} joined {}", m.instance_id.to_string().cyan(), m.hostname.bold(), m.joined_at_ms);
            }
        }
    }
    Ok(())
}

fn cmd_name(conn: &Connection, command: &NameCommand, out: &Output) -> anyhow::Result<()> {
    match command {
        NameCommand::Put { name, id } => {
            let id = parse_id(id)?;
            conn.put_name(id, name)?;
            println!("{} {} -> {}", "✓".green(), name.bold(), id.to_string().yellow());
        }
        NameCommand::Get { name, wait } => {
            let id = conn.get_name(name, *wait)?;
            println!("{id}");
        }
        NameCommand::Drop { name } => {
            conn.drop_name(name)?;
            println!("Dropped name {}", name.bold());
        }
        NameCommand::List {
            pattern,
            regex,
            limit,
        } => {
            let names = conn.list_names(&list_options(pattern, *regex, *limit))?;
            match out.format {
                OutputFormat::Json => {
                    let map: serde_json::Map<String, serde_json::Value> = names
                        .iter()
                        .map(|(name, id)| (name.clone(), id.to_string().into()))
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&map)?);
                }
                OutputFormat::Text => {
                    for (name, id) in &names {
                        println!("{:<24} {}", name.bold(), id.to_string().yellow());
                    }
                }
            }
        }
    }
    Ok(())
}

fn list_options(pattern: &str, regex: bool, limit: usize) -> ListOptions {
    let options = if regex {
        ListOptions::regex(pattern)
    } else {
        ListOptions::glob(pattern)
    };
    options.with_limit(limit)
}

fn split_assignment(s: &str) -> anyhow::Result<(&str, &str)> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => bail!("expected key=value, got {s:?}"),
    }
}

fn parse_id(s: &str) -> anyhow::Result<ObjectId> {
    s.parse::<ObjectId>()
        .with_context(|| format!("invalid object id {s:?}"))
}

struct Output {
    format: OutputFormat,
}

impl Output {
    fn metas(&self, metas: &[ObjectMeta]) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => {
                let values: Vec<serde_json::Value> = metas.iter().map(ObjectMeta::to_json).collect();
                println!("{}", serde_json::to_string_pretty(&values)?);
            }
            OutputFormat::Text => {
                for meta in metas {
                    for line in meta_lines(meta) {
                        println!("{line}");
                    }
                }
            }
        }
        Ok(())
    }

    fn status(&self, status: &InstanceStatus, conn: &Connection) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => {
                let value = serde_json::json!({
                    "instance_id": status.instance_id.to_string(),
                    "deployment": status.deployment,
                    "hostname": status.hostname,
                    "object_count": status.object_count,
                    "ipc_connections": status.ipc_connections,
                    "rpc_connections": status.rpc_connections,
                    "ipc_socket": conn.ipc_socket(),
                    "rpc_endpoint": conn.rpc_endpoint(),
                    "version": conn.version(),
                });
                println!("{}", serde_json::to_string_pretty(&value)?);
            }
            OutputFormat::Text => {
                println!("Instance {} on {} ({})", status.instance_id.to_string().cyan().bold(), status.hostname.bold(), status.deployment);
                println!("  Objects: {}", status.object_count);
                println!("  Clients: {} ipc, {} rpc", status.ipc_connections, status.rpc_connections);
                println!("  IPC socket: {}", conn.ipc_socket());
                println!("  RPC endpoint: {}", conn.rpc_endpoint());
                println!("  Version: {}", conn.version());
            }
        }
        Ok(())
    }
}

/// Text view of a tree. Members below [`JSON_DEPTH`] levels are shown by id.
fn meta_lines(meta: &ObjectMeta) -> Vec<String> {
    let mut lines = Vec::new();
    push_meta(meta, 0, &mut lines);
    lines
}

fn push_meta(meta: &ObjectMeta, level: usize, lines: &mut Vec<String>) {
    let indent = "  ".repeat(level * 2);
    let id = meta.id().map(|id| id.to_string()).unwrap_or_else(|| "-".into());
    lines.push(format!("{indent}{} {} @{}", id.yellow(), meta.typename().bold(), meta.instance_id()));
    for (key, value) in meta.properties() {
        lines.push(format!("{indent}  {key} = {value}"));
    }
    for (key, member) in meta.members() {
        match member.meta() {
            Some(resolved) if level < JSON_DEPTH => {
                lines.push(format!("{indent}  {}:", key.cyan()));
                push_meta(resolved, level + 1, lines);
            }
            Some(_) => lines.push(format!("{indent}  {}: {} {}", key.cyan(), member.id(), "(not expanded)".dimmed())),
            None => lines.push(format!("{indent}  {}: {} {}", key.cyan(), member.id(), "(unresolved)".dimmed())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_split_on_first_equals() {
        assert_eq!(split_assignment("a=b=c").unwrap(), ("a", "b=c"));
        assert_eq!(split_assignment("empty=").unwrap(), ("empty", ""));
        assert!(split_assignment("novalue").is_err());
        assert!(split_assignment("=x").is_err());
    }

    #[test]
    fn ids_parse_with_context() {
        let id = parse_id("o0000000000000001").unwrap();
        assert_eq!(id.raw(), 1);
        let err = parse_id("zz").unwrap_err();
        assert!(err.to_string().contains("invalid object id"));
    }

    #[test]
    fn list_options_follow_flags() {
        let o = list_options("^a", true, 0);
        assert!(o.regex);
        assert_eq!(o.limit, 0);
        let o = list_options("a*", false, 5);
        assert!(!o.regex);
        assert_eq!(o.pattern, "a*");
    }

    #[test]
    fn text_view_stops_at_depth_limit() {
        use shmeta_store::{InProcessChannel, StoreConfig, StoreInstance};

        let instance = StoreInstance::standalone(StoreConfig::default()).unwrap();
        let conn = Connection::with_channel(
            &ClientConfig::default(),
            Box::new(InProcessChannel::connect(&instance)),
        )
        .unwrap();
        let mut below = conn.create_metadata(&ObjectMeta::new("leaf")).unwrap().id().unwrap();
        for _ in 0..JSON_DEPTH * 3 {
            let mut link = ObjectMeta::new("link");
            link.add_member("next", below).unwrap();
            below = conn.create_metadata(&link).unwrap().id().unwrap();
        }
        let top = conn.get_metadata(below, &GetOptions::default()).unwrap();
        let lines = meta_lines(&top);
        // a header and a member line for each level down to the cut-off
        assert_eq!(lines.len(), 2 * (JSON_DEPTH + 1));
        assert!(lines.last().unwrap().contains("(not expanded)"));
        assert!(lines.iter().all(|line| !line.contains("leaf")));
    }

    #[test]
    fn endpoint_flag_overrides_config() {
        use clap::Parser;
        let cli = Cli::try_parse_from(["shmeta", "status", "--endpoint", "node-b:9600"]).unwrap();
        let config = client_config(&cli).unwrap();
        assert_eq!(config.endpoint, Endpoint::rpc("node-b:9600"));
    }
}
