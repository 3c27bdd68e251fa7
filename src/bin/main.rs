use std::{
    error::Error,
    path::PathBuf,
    sync::mpsc::{self, Receiver},
};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stackrun::{
    archive::ArchiveFormat,
    bundle::{self, RuntimeBundle},
    cli::{Cli, Commands, parse_args},
    config::{DEFAULT_CONFIG_FILE, Overrides, Settings, load_config},
    coordinator::Coordinator,
    distribution::TargetPlatform,
    logs,
    pidfile::PidFile,
    platform::host_factory,
    provision::{self, Provisioner},
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    let config = load_config(args.command.config())?;

    match args.command {
        Commands::Start {
            detached,
            no_browser,
            camunda_version,
            elasticsearch_version,
            camunda_args,
            ..
        } => {
            let overrides = Overrides {
                camunda_version,
                elasticsearch_version,
                camunda_args,
                no_browser,
                detached,
            };
            let settings = config.settings(&overrides)?;
            if detached {
                start_detached(&settings)?;
            } else {
                let shutdown = register_signal_handler()?;
                start_foreground(&settings, &shutdown)?;
            }
        }
        Commands::Stop { .. } => {
            let settings = config.settings(&Overrides::default())?;
            stop_detached(&settings)?;
        }
        Commands::Package { output, .. } => {
            let settings = config.settings(&Overrides::default())?;
            package(&settings, output)?;
        }
        Commands::Clean { .. } => {
            let settings = config.settings(&Overrides::default())?;
            clean(&settings, &TargetPlatform::host())?;
        }
    }

    Ok(())
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn build_coordinator(settings: &Settings) -> Result<Coordinator, Box<dyn Error>> {
    settings.layout.create_dirs()?;
    let coordinator = Coordinator::new(host_factory(), Provisioner::http()?, settings.plan());
    Ok(coordinator)
}

fn start_foreground(settings: &Settings, shutdown: &Receiver<()>) -> Result<(), Box<dyn Error>> {
    let mut coordinator = build_coordinator(settings)?;
    coordinator.run(shutdown)?;
    info!("All services stopped");
    Ok(())
}

fn start_detached(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let pid_file = settings.layout.pid_file();
    if !PidFile::load(&pid_file)?.is_empty() {
        warn!(
            "Services from a previous detached start are recorded in {}; run `stackrun stop` first",
            pid_file.display()
        );
        return Ok(());
    }

    let mut coordinator = build_coordinator(settings)?;
    coordinator.provision()?;
    coordinator.start()?;
    let record = coordinator.detach(&pid_file)?;
    for entry in record.entries() {
        println!("{} started (pid {})", entry.service, entry.pid);
    }
    Ok(())
}

fn stop_detached(settings: &Settings) -> Result<(), Box<dyn Error>> {
    let pid_file = settings.layout.pid_file();
    let record = PidFile::load(&pid_file)?;
    if record.is_empty() {
        info!("No detached services recorded in {}", pid_file.display());
        return Ok(());
    }

    let mut coordinator = build_coordinator(settings)?;
    coordinator.adopt(&record)?;
    coordinator.stop()?;
    PidFile::remove(&pid_file)?;
    info!("Stopped {} service(s)", record.entries().len());
    Ok(())
}

fn clean(settings: &Settings, platform: &TargetPlatform) -> Result<(), Box<dyn Error>> {
    let mut removed = 0;
    for artifact in settings.artifacts(platform) {
        if provision::remove_extracted(&artifact)? {
            removed += 1;
        }
    }
    removed += logs::remove_service_logs(&settings.layout)?;
    info!("Clean finished, removed {removed} item(s)");
    Ok(())
}

fn package(settings: &Settings, output: Option<PathBuf>) -> Result<(), Box<dyn Error>> {
    let platform = TargetPlatform::host();
    clean(settings, &platform)?;

    settings.layout.create_dirs()?;
    let provisioner = Provisioner::http()?;
    for artifact in settings.artifacts(&platform) {
        provisioner.ensure(&artifact)?;
    }

    let executable = std::env::current_exe()?;
    let executable_name = executable
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("stackrun"));
    let mut bundle = RuntimeBundle::standard(
        &settings.layout,
        &settings.camunda_version,
        &settings.elasticsearch_version,
        &settings.connectors_version,
        &platform,
        output,
    )
    .with_file(&executable, executable_name);
    if let Some(config) = &settings.config_file {
        bundle = bundle.with_file(config, DEFAULT_CONFIG_FILE);
    }
    let path = bundle::package(&bundle, ArchiveFormat::for_platform(&platform))?;
    println!("{}", path.display());
    Ok(())
}

fn register_signal_handler() -> Result<Receiver<()>, Box<dyn Error>> {
    let (sender, receiver) = mpsc::channel();
    ctrlc::set_handler(move || {
        println!("stackrun is shutting down... stopping services");
        let _ = sender.send(());
    })?;

    Ok(receiver)
}
