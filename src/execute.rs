use std::process::{Command, ExitCode};
use anyhow::{bail, Context, Result};
use colored::Colorize;
use shed::{
    resolve_lockfile_path, Cache, CancelToken, ErrorList, Lockfile, Operation, Shed, ShedError,
    ShedOptions, LOCKFILE_NAME,
};
use crate::cli::{ShedCommand, CLI};

pub fn execute(cli: CLI) -> Result<ExitCode> {
    match &cli.command {
        ShedCommand::Init => {
            execute_init(&cli)
        }
        ShedCommand::Install { specs } => {
            execute_install(&open(&cli, false)?, specs)
        }
        ShedCommand::Uninstall { names, evict } => {
            execute_uninstall(&open(&cli, *evict)?, names)
        }
        ShedCommand::List { paths } => {
            execute_list(&open(&cli, false)?, *paths)
        }
        ShedCommand::Path { name } => {
            let path = open(&cli, false)?.tool_path(name)?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        ShedCommand::Run { name, args } => {
            execute_run(&open(&cli, false)?, name, args)
        }
        ShedCommand::CleanCache => {
            let shed = open(&cli, false)?;
            shed.clean_cache()?;
            println!("Removed {}", shed.cache_dir().display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn open(cli: &CLI, evict: bool) -> Result<Shed> {
    let mut options = ShedOptions::default().evict_on_remove(evict);
    if let Some(path) = &cli.lockfile {
        options = options.lockfile_path(path);
    }
    if let Some(dir) = &cli.cache_dir {
        options = options.cache(Cache::new(dir));
    }
    if let Some(jobs) = cli.jobs {
        options = options.jobs(jobs);
    }
    Ok(Shed::new(options)?)
}

fn report(errors: ErrorList) -> Result<ExitCode> {
    for e in errors.iter() {
        eprintln!("{} {}: {}", "✗".red().bold(), e.subject.bold(), e.error);
    }
    bail!("{} tool(s) failed", errors.len())
}

pub fn execute_init(cli: &CLI) -> Result<ExitCode> {
    let cwd = std::env::current_dir()?;
    let path = match &cli.lockfile {
        Some(path) => path.clone(),
        None => {
            if let Some(existing) = resolve_lockfile_path(&cwd) {
                bail!("{} already exists", existing.display());
            }
            cwd.join(LOCKFILE_NAME)
        }
    };
    if path.exists() {
        bail!("{} already exists", path.display());
    }
    Lockfile::new().save(&path)?;
    println!("Created {}", path.display());
    Ok(ExitCode::SUCCESS)
}

pub fn execute_install(shed: &Shed, specs: &[String]) -> Result<ExitCode> {
    let (set, resolved) = shed.install(specs);
    let mut errors = resolved.err().unwrap_or_default();

    match set.apply(&CancelToken::new()) {
        Ok(()) => {}
        Err(ShedError::Tools(failed)) => errors.extend(failed),
        Err(e) => return Err(e).context("could not update the lockfile"),
    }

    for op in set.operations() {
        if errors.iter().any(|e| e.subject == op.import_path()) {
            continue;
        }
        match op {
            Operation::EnsurePresent { import_path, version } => {
                println!("{} {}@{}", "✓".green().bold(), import_path, version);
            }
            Operation::EnsureAbsent { import_path, .. } => {
                println!("{} {}", "-".yellow().bold(), import_path);
            }
        }
    }
    if errors.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        report(errors)
    }
}

pub fn execute_uninstall(shed: &Shed, names: &[String]) -> Result<ExitCode> {
    match shed.uninstall(names) {
        Ok(()) => {
            for name in names {
                println!("{} {}", "-".yellow().bold(), name);
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(ShedError::Tools(errors)) => report(errors),
        Err(e) => Err(e.into()),
    }
}

pub fn execute_list(shed: &Shed, paths: bool) -> Result<ExitCode> {
    let tools = shed.list();
    if tools.is_empty() {
        println!("No tools");
        return Ok(ExitCode::SUCCESS);
    }
    let width = tools.iter().map(|t| t.name().len()).max().unwrap_or_default();
    for tool in &tools {
        println!(
            "{:width$}  {} {}",
            tool.name().bold(),
            tool.import_path,
            tool.version.dimmed(),
        );
        if paths {
            match shed.tool_path(&tool.import_path) {
                Ok(path) => println!("{:width$}  {}", "", path.display()),
                Err(_) => println!("{:width$}  {}", "", "not installed".red()),
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

pub fn execute_run(shed: &Shed, name: &str, args: &[String]) -> Result<ExitCode> {
    let exe = shed.tool_path(name)?;
    let status = Command::new(&exe)
        .args(args)
        .status()
        .with_context(|| format!("could not run {}", exe.display()))?;
    Ok(match status.code() {
        Some(0) => ExitCode::SUCCESS,
        Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        None => ExitCode::FAILURE,
    })
}
