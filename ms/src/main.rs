use std::fs;
use std::path::Path;

use clap::{CommandFactory, Parser};
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use mentorstem::cli::{Cli, Command, HistoryCommand};
use mentorstem::config::{Config, data_dir};
use mentorstem::export::{
    ExportDetails, ExportOptions, HtmlFileSink, ImageFetcher, ProxyImageFetcher, export_plan, prepare_document,
};
use mentorstem::form::ProjectForm;
use mentorstem::markdown;
use mentorstem::proposals::ProposalOutcome;
use mentorstem::repl;
use mentorstem::sections::split;
use mentorstem::store::{JsonFileStore, ProjectStore};

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = data_dir().join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Log to a file; the terminal belongs to the interactive session
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("mentorstem.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        "MentorSTEM+ loaded config: provider={}, model={}",
        config.llm.provider, config.llm.model
    );

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    if command.needs_llm() {
        config.validate()?;
    }

    match command {
        Command::New {
            grade,
            topic,
            resources,
            time,
        } => cmd_new(config, grade, topic, resources, time).await,
        Command::Open { id } => repl::run_with_saved(config, id).await,
        Command::History { command } => cmd_history(&config, command),
        Command::Render { file } => cmd_render(&config, &file),
        Command::Sections { file } => cmd_sections(&file),
        Command::Proposals { file, json } => cmd_proposals(&file, json),
        Command::Export {
            id,
            teacher,
            school,
            no_images,
        } => cmd_export(&config, id, &teacher, &school, no_images).await,
    }
}

async fn cmd_new(
    config: Config,
    grade: Option<String>,
    topic: Option<String>,
    resources: Option<String>,
    time: Option<String>,
) -> Result<()> {
    // All four flags or none: a partial form is filled in interactively
    let form = match (grade, topic, resources, time) {
        (Some(grade), Some(topic), Some(resources), Some(time)) => {
            Some(ProjectForm::new(&grade, &topic, &resources, &time)?)
        }
        (None, None, None, None) => None,
        _ => return Err(eyre::eyre!(mentorstem::form::INCOMPLETE_MESSAGE)),
    };
    repl::run_interactive(config, form).await
}

fn read_input(file: &Path) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))
}

fn cmd_render(config: &Config, file: &Path) -> Result<()> {
    let text = read_input(file)?;
    println!("{}", markdown::render_with(&text, &config.render.options()));
    Ok(())
}

fn cmd_sections(file: &Path) -> Result<()> {
    let document = split(&read_input(file)?);
    if document.is_empty() {
        println!("{}", "Sin contenido.".dimmed());
        return Ok(());
    }
    if document.is_unstructured() {
        println!("{}", "Sin secciones numeradas; el texto es un solo bloque.".yellow());
        return Ok(());
    }
    for (i, section) in document.sections().iter().enumerate() {
        println!("{:>3}  {}", i + 1, section.title);
    }
    Ok(())
}

fn cmd_proposals(file: &Path, json: bool) -> Result<()> {
    match ProposalOutcome::from_response(&read_input(file)?) {
        ProposalOutcome::Found(proposals) if json => {
            println!("{}", serde_json::to_string_pretty(&proposals)?);
        }
        ProposalOutcome::Found(proposals) => {
            for (i, proposal) in proposals.iter().enumerate() {
                println!("{}. {}", i + 1, proposal.name.bold());
                println!("   {}", proposal.summary);
                println!("   {}", proposal.resource_level.dimmed());
            }
        }
        ProposalOutcome::Unparsed(diagnostic) => return Err(eyre::eyre!(diagnostic.message())),
    }
    Ok(())
}

fn cmd_history(config: &Config, command: HistoryCommand) -> Result<()> {
    let store = JsonFileStore::new(config.storage.history_path());
    match command {
        HistoryCommand::List => {
            let projects = store.list()?;
            if projects.is_empty() {
                println!("{}", "No hay proyectos guardados.".dimmed());
            }
            for project in projects {
                println!(
                    "{}  {}  {}",
                    project.id.to_string().yellow(),
                    project.proposal_name.bold(),
                    format!("{} · {} · {}", project.form.grade, project.form.topic, project.form.time).dimmed()
                );
            }
        }
        HistoryCommand::Show { id } => {
            let project = store.get(id)?;
            println!("{}", project.plan_markdown);
        }
        HistoryCommand::Delete { id } => {
            if store.delete(id)? {
                println!("Proyecto {} eliminado.", id);
            } else {
                return Err(eyre::eyre!("No saved project with id {}", id));
            }
        }
    }
    Ok(())
}

async fn cmd_export(config: &Config, id: i64, teacher: &str, school: &str, no_images: bool) -> Result<()> {
    let details = ExportDetails::new(teacher, school)?;
    let store = JsonFileStore::new(config.storage.history_path());
    let project = store.get(id)?;
    let export = &config.export;

    let mut document = prepare_document(
        export,
        &project.proposal_name,
        &split(&project.plan_markdown),
        &config.render.options(),
    )?;

    let options = ExportOptions::new(export, &project.proposal_name);
    let sink = HtmlFileSink::new(export.output_path());
    let fetcher = if no_images {
        None
    } else {
        Some(ProxyImageFetcher::new(export.image_proxy_url.clone())?)
    };
    let path = export_plan(
        &mut document,
        &details,
        &options,
        fetcher.as_ref().map(|f| f as &dyn ImageFetcher),
        &sink,
    )
    .await?;
    println!("{}", path.display());
    Ok(())
}
