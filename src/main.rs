use std::io::{self, Write};
use std::path::Path;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use log::{info, warn};
use serde::Serialize;

use pkgsizer::alternatives::{
    database_json, print_database, print_installed_alternatives, print_package_alternatives,
    AlternativesFinder,
};
use pkgsizer::cli::Opts;
use pkgsizer::compare::{compare_environments, print_comparison};
use pkgsizer::config::{AlternativesMode, Config, ScanTask, Task};
use pkgsizer::environment::locate;
use pkgsizer::error::PkgsizerError;
use pkgsizer::exit_codes::ExitCode;
use pkgsizer::interrupt::Interrupt;
use pkgsizer::report::{
    format_size, is_stdout, print_table, print_tree, render_html, render_json, write_output,
};
use pkgsizer::scan::scan_environment;
use pkgsizer::unused::{analyze_unused, print_unused};
use pkgsizer::updates::{check_updates, print_updates, PyPiClient};
use pkgsizer::why::{analyze_why, print_why};

fn main() {
    let result = run();
    match result {
        Ok(exit_code) => {
            exit_code.exit();
        }
        Err(err) => {
            if let Some(PkgsizerError::Interrupted) = err.downcast_ref::<PkgsizerError>() {
                eprintln!("Aborted by user");
                ExitCode::KilledBySigint.exit();
            }
            eprintln!("[pkgsizer error]: {:#}", err);
            ExitCode::GeneralError.exit();
        }
    }
}

fn run() -> Result<ExitCode> {
    let opts = Opts::parse();
    init_logging(opts.verbose);
    let config = Config::build(opts)?;
    info!("Using {} worker threads", config.jobs);

    let interrupt = Interrupt::new();
    if let Err(err) = interrupt.listen_for_ctrl_c() {
        warn!("Ctrl-C will not stop the run cleanly: {:#}", err);
    }

    match config.task {
        Task::Scan(task) => scan(task, &interrupt),
        Task::Why {
            env,
            package,
            options,
            json,
        } => {
            let environment = locate(&env)?;
            let report = analyze_why(&environment, &package, &options, &interrupt)?;
            emit(json.as_deref(), &report, |out| print_why(&report, out))?;
            Ok(ExitCode::Success)
        }
        Task::Unused {
            env,
            code_path,
            options,
            json,
        } => {
            if let Some(path) = &code_path {
                if !path.is_dir() {
                    bail!("Code path not found: {}", path.display());
                }
            }
            let environment = locate(&env)?;
            let report = analyze_unused(&environment, code_path.as_deref(), &options, &interrupt)?;
            emit(json.as_deref(), &report, |out| print_unused(&report, out))?;
            Ok(ExitCode::Success)
        }
        Task::Alternatives {
            env,
            mode,
            db,
            options,
            json,
        } => {
            if mode == AlternativesMode::ListAll {
                emit(json.as_deref(), &database_json(&db), |out| {
                    print_database(&db, out)
                })?;
                return Ok(ExitCode::Success);
            }
            let environment = locate(&env)?;
            let finder = AlternativesFinder::new(&environment, &db, &options)?;
            match mode {
                AlternativesMode::Package(package) => {
                    let result = finder.package(&package, &interrupt)?;
                    emit(json.as_deref(), &result, |out| {
                        print_package_alternatives(&result, out)
                    })?;
                }
                _ => {
                    let results = finder.installed(&interrupt)?;
                    emit(json.as_deref(), &results, |out| {
                        print_installed_alternatives(&results, out)
                    })?;
                }
            }
            Ok(ExitCode::Success)
        }
        Task::Updates {
            env,
            options,
            timeout,
            cache,
            json,
        } => {
            let environment = locate(&env)?;
            let client = PyPiClient::new(timeout, cache)?;
            let report = check_updates(&environment, &client, &options, &interrupt)?;
            emit(json.as_deref(), &report, |out| print_updates(&report, out))?;
            Ok(ExitCode::Success)
        }
        Task::Compare {
            env1,
            env2,
            options,
            json,
        } => {
            let comparison = compare_environments(&env1, &env2, &options, &interrupt)?;
            emit(json.as_deref(), &comparison, |out| {
                print_comparison(&comparison, out)
            })?;
            Ok(ExitCode::Success)
        }
    }
}

fn init_logging(verbose: u8) {
    let log_level = match verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_module_path(false)
        .parse_default_env()
        .init();
}

/// Print the human report unless JSON goes to stdout, then write the JSON report if asked.
fn emit<T: Serialize>(
    json: Option<&Path>,
    value: &T,
    print: impl FnOnce(io::StdoutLock<'static>) -> Result<()>,
) -> Result<()> {
    if !json.map_or(false, is_stdout) {
        print(io::stdout().lock())?;
    }
    if let Some(path) = json {
        write_output(path, &serde_json::to_string_pretty(value)?)?;
        announce("JSON report", path);
    }
    Ok(())
}

fn announce(what: &str, path: &Path) {
    if !is_stdout(path) {
        eprintln!("{} written to {}", what, path.display());
    }
}

fn scan(task: ScanTask, interrupt: &Interrupt) -> Result<ExitCode> {
    let environment = locate(&task.env)?;
    let result = scan_environment(&environment, &task.scan, interrupt)?;
    interrupt.check()?;
    let generated_at = Utc::now();

    if !task.json.as_deref().map_or(false, is_stdout) {
        let stdout = io::stdout().lock();
        if task.report.tree {
            print_tree(&result, &task.report, stdout)?;
        } else {
            print_table(&result, &task.report, stdout)?;
        }
    }
    if let Some(path) = &task.json {
        write_output(path, &render_json(&result, &task.report, generated_at)?)?;
        announce("JSON report", path);
    }
    if let Some(path) = &task.html {
        write_output(path, &render_html(&result, &task.report, generated_at))?;
        announce("HTML report", path);
    }

    if let Some(limit) = task.fail_over {
        if result.total.bytes > limit {
            io::stdout().flush()?;
            eprintln!(
                "Total size {} exceeds the limit of {}",
                format_size(result.total.bytes),
                format_size(limit)
            );
            return Ok(ExitCode::ThresholdExceeded);
        }
    }
    Ok(ExitCode::Success)
}
