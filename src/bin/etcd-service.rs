use anyhow::{bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use etcdsvc::control::{RecordingControl, ServiceControl, SystemControl};
use etcdsvc::converge::FsApplier;
use etcdsvc::render::TemplateEngine;
use etcdsvc::{config, detect_host, resolve, Action, ActionReport, HostDescriptor, Orchestrator};
use etcdsvc::ServiceManifest;

struct Options {
    command: String,
    manifest: Option<PathBuf>,
    root: PathBuf,
    dry_run: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    let opts = parse_args(&args)?;

    match opts.command.as_str() {
        "start" | "stop" | "restart" => run_action(&opts),
        "resolve" => resolve_host(&opts),
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other);
            print_usage();
            std::process::exit(1);
        }
    }
}

fn parse_args(args: &[String]) -> Result<Options> {
    let mut opts = Options {
        command: "help".into(),
        manifest: None,
        root: PathBuf::from("/"),
        dry_run: false,
    };

    let mut positional = Vec::new();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--root" => {
                let value = iter.next().context("--root requires a directory")?;
                opts.root = PathBuf::from(value);
            }
            "--dry-run" => opts.dry_run = true,
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    if let Some(command) = positional.next() {
        opts.command = command;
    }
    opts.manifest = positional.next().map(PathBuf::from);

    Ok(opts)
}

fn print_usage() {
    println!(
        r#"etcd-service - Install and supervise etcd under systemd or SysV init

Usage:
    etcd-service start <manifest>     Converge artifacts, enable and start the service
    etcd-service stop <manifest>      Stop the service (no-op under systemd)
    etcd-service restart <manifest>   Stop, then start
    etcd-service resolve [manifest]   Show the detected host and init strategy
    etcd-service help                 Show this help message

Options:
    --root <dir>    Manage files under <dir> instead of / (default: /);
                    service-control commands run via `chroot <dir>`
    --dry-run       Report what would change without writing files or
                    running service-control commands

Manifests may be YAML, JSON or TOML. Without a `host` section the host is
detected from <root>/etc/os-release.

Examples:
    etcd-service start /etc/etcd-service.yml
    etcd-service start etcd.toml --root /tmp/chroot --dry-run
"#
    );
}

fn load_manifest(opts: &Options) -> Result<ServiceManifest> {
    match &opts.manifest {
        Some(path) => config::load(path)
            .with_context(|| format!("Failed to load manifest {}", path.display())),
        None => Ok(ServiceManifest::default()),
    }
}

fn host_for(manifest: &ServiceManifest, root: &Path) -> Result<HostDescriptor> {
    match &manifest.host {
        Some(host) => Ok(host.clone()),
        None => detect_host(root).context("Failed to detect host; set `host` in the manifest"),
    }
}

fn resolve_host(opts: &Options) -> Result<()> {
    let manifest = load_manifest(opts)?;
    let host = host_for(&manifest, &opts.root)?;
    let kind = resolve(&host)?;

    println!("Host:     {}", host);
    println!("Platform: {:?}", host.family.platform_family());
    println!("Strategy: {}", kind);
    Ok(())
}

fn run_action(opts: &Options) -> Result<()> {
    let action: Action = opts.command.parse()?;

    if opts.manifest.is_none() {
        bail!(
            "etcd-service {} requires a manifest. Usage: etcd-service {} <manifest>",
            action,
            action
        );
    }

    // Service control, chrooted or not, needs root
    let is_root = nix::unistd::Uid::effective().is_root();
    if !opts.dry_run && !is_root {
        eprintln!("Error: etcd-service {} must be run as root (use sudo or --dry-run)", action);
        std::process::exit(1);
    }

    let manifest = load_manifest(opts)?;
    let host = host_for(&manifest, &opts.root)?;

    let engine = match &manifest.templates_dir {
        Some(dir) => TemplateEngine::with_overrides(dir)?,
        None => TemplateEngine::builtin()?,
    };

    let mut files = FsApplier::new(&opts.root);
    if !is_root {
        files = files.without_ownership();
    }
    if opts.dry_run {
        files = files.dry_run();
    }

    let control: Box<dyn ServiceControl> = if opts.dry_run {
        Box::new(RecordingControl::new())
    } else {
        Box::new(SystemControl::in_root(&opts.root))
    };

    let report = Orchestrator::new(&engine, &files, control.as_ref())
        .run(action, &manifest.service, &host)
        .with_context(|| format!("{} {} failed", action, manifest.service.service_name))?;

    print_report(&report, opts.dry_run);
    Ok(())
}

fn print_report(report: &ActionReport, dry_run: bool) {
    println!("\n=== {} ({}) ===\n", report.action, report.strategy);

    for artifact in &report.artifacts {
        println!(
            "  {:<12} {}",
            artifact.outcome.as_str(),
            artifact.path.display()
        );
    }

    if report.commands.is_empty() {
        println!("\nNo service-control commands issued");
    } else {
        println!();
        let prefix = if dry_run { "would run" } else { "ran" };
        for command in &report.commands {
            println!("  {} > {}", prefix, command);
        }
    }

    if report.marker_created {
        if dry_run {
            println!("\nFirst convergence would be recorded");
        } else {
            println!("\n✓ First convergence recorded");
        }
    }
}
