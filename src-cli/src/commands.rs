//! Subcommand bodies. Each returns the process exit code.

use std::sync::Arc;
use std::thread;

use log::{info, warn};
use tokio::sync::broadcast::error::RecvError;

use coletor::config::{load_settings, PathResolver, Settings};
use coletor::facade::{self, RunRequest, EXIT_CANCELLED, EXIT_PREFLIGHT};
use coletor::job::Portal;
use coletor::progress::{ProgressBroadcaster, ProgressEvent, RunPhase};
use coletor::{CancelToken, MunicipalityCatalog, Orchestrator};

use crate::cli::{Cli, RunArgs};

/// Settings file (if any) plus paths with every override applied.
fn load(cli: &Cli) -> Result<(Settings, PathResolver), String> {
    let paths = PathResolver::detect();
    let settings_file = cli.config.clone().unwrap_or_else(|| paths.settings_file());

    let settings = if settings_file.is_file() {
        load_settings(&settings_file).map_err(|e| e.to_string())?
    } else if cli.config.is_some() {
        return Err(format!("Settings file not found: {}", settings_file.display()));
    } else {
        info!("No settings file at {}, using defaults", settings_file.display());
        Settings::default()
    };

    let mut paths = paths.with_settings(&settings);
    if let Some(file) = &cli.municipality_file {
        paths = paths.with_municipality_file(file);
    }
    Ok((settings, paths))
}

pub fn run(cli: &Cli, args: &RunArgs) -> i32 {
    let (settings, paths) = match load(cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_PREFLIGHT;
        }
    };

    let request = RunRequest {
        portal: args.portal.clone(),
        year: args.year,
        month: args.month,
        start: args.start.clone(),
        end: args.end.clone(),
        municipality: args.municipality.clone(),
        workers: args.workers,
        output_root: args.output.clone(),
    };
    let spec = match request.to_job_spec(&paths) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_PREFLIGHT;
        }
    };
    let orchestrator = match Orchestrator::from_settings(settings, paths) {
        Ok(o) => Arc::new(o),
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_PREFLIGHT;
        }
    };

    let broadcaster = ProgressBroadcaster::default();
    let events = broadcaster.subscribe();
    let json = args.json;
    let printer = thread::spawn(move || print_events(events, json));

    let handle = match facade::spawn_run(orchestrator, spec, broadcaster) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_PREFLIGHT;
        }
    };

    let cancel = handle.cancel_token().clone();
    if let Err(e) = ctrlc::set_handler(move || match interrupt(&cancel) {
        Interrupt::Cancel => {
            eprintln!("\nCancelando... aguarde o encerramento dos navegadores.");
            eprintln!("Pressione Ctrl-C novamente para sair imediatamente.");
        }
        Interrupt::ForceExit => {
            eprintln!("\nSaindo sem aguardar os navegadores.");
            std::process::exit(EXIT_CANCELLED);
        }
    }) {
        warn!("Could not install Ctrl-C handler: {}", e);
    }

    let result = handle.join();
    if printer.join().is_err() {
        warn!("Progress printer panicked");
    }

    match &result {
        Ok(stats) => {
            if let Some(path) = &stats.report_path {
                println!("Relatório: {}", path.display());
            }
        }
        Err(e) => eprintln!("{}", e),
    }
    facade::exit_code(&result)
}

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    Cancel,
    ForceExit,
}

/// First Ctrl-C cancels the run gracefully; a second one while the browsers
/// are still closing exits right away.
fn interrupt(cancel: &CancelToken) -> Interrupt {
    if cancel.is_cancelled() {
        Interrupt::ForceExit
    } else {
        cancel.cancel();
        Interrupt::Cancel
    }
}

fn print_events(mut events: tokio::sync::broadcast::Receiver<ProgressEvent>, json: bool) {
    loop {
        match events.blocking_recv() {
            Ok(event) => {
                if json {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("Could not serialize progress event: {}", e),
                    }
                } else {
                    print_event(&event);
                }
                if matches!(
                    event.phase,
                    RunPhase::Completed | RunPhase::Cancelled | RunPhase::Aborted
                ) {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => warn!("Skipped {} progress events", skipped),
            Err(RecvError::Closed) => return,
        }
    }
}

fn print_event(event: &ProgressEvent) {
    match event.phase {
        RunPhase::TaskStarted => {}
        RunPhase::TaskFinished => println!("[{}/{}] {}", event.current, event.total, event.message),
        _ => println!("{}", event.message),
    }
}

pub fn municipalities(cli: &Cli) -> i32 {
    let (_, paths) = match load(cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_PREFLIGHT;
        }
    };
    match MunicipalityCatalog::load(paths.municipality_file()) {
        Ok(catalog) => {
            for name in catalog.names() {
                println!("{}", name);
            }
            eprintln!("{} municípios em {}", catalog.len(), paths.municipality_file().display());
            0
        }
        Err(e) => {
            eprintln!("{}", e);
            EXIT_PREFLIGHT
        }
    }
}

pub fn check_config(cli: &Cli) -> i32 {
    let (settings, paths) = match load(cli) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            return EXIT_PREFLIGHT;
        }
    };

    println!("Modo:            {}", paths.mode());
    println!("Configuração:    {}", paths.settings_file().display());
    println!("Municípios:      {}", paths.municipality_file().display());
    println!("Saída:           {}", paths.output_root().display());
    println!("Downloads:       {}", paths.scratch_dir().display());
    for portal in Portal::ALL {
        let portal_settings = settings.portals.get(portal);
        let url = portal_settings
            .sides
            .first()
            .map(|side| side.url.as_str())
            .unwrap_or(portal_settings.url.as_str());
        println!("  {:<22} {}", portal.tag(), url);
    }

    let mut code = 0;
    if let Err(e) = Orchestrator::from_settings(settings, paths.clone()) {
        eprintln!("{}", e);
        code = EXIT_PREFLIGHT;
    }
    match MunicipalityCatalog::load(paths.municipality_file()) {
        Ok(catalog) => println!("Catálogo:        {} municípios", catalog.len()),
        Err(e) => {
            eprintln!("{}", e);
            code = EXIT_PREFLIGHT;
        }
    }
    code
}
