//! REPL session management

use std::io::{self, Write};
use std::time::Duration;

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::debug;

use super::command::Command;
use crate::app::{Assistant, View};
use crate::export::{ExportDetails, HtmlFileSink, ImageFetcher, ProxyImageFetcher};
use crate::form::{ProjectForm, ResourceTier};
use crate::narration::{NarrationScript, play};
use crate::proposals::ProposalOutcome;
use crate::refine::SectionChange;

/// Line that ends a multi-line section body
const END_OF_BODY: &str = ".";

/// Interactive REPL session
pub struct ReplSession {
    assistant: Assistant,
    last_script: Option<NarrationScript>,
}

impl ReplSession {
    pub fn new(assistant: Assistant) -> Self {
        Self {
            assistant,
            last_script: None,
        }
    }

    /// Run the REPL main loop
    pub async fn run(&mut self, initial_form: Option<ProjectForm>) -> Result<()> {
        self.print_welcome();

        if let Some(form) = initial_form {
            self.generate(form).await;
        }

        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&self.prompt());

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match Command::parse(input) {
                            Ok(command) => {
                                if let SlashResult::Quit = self.handle_command(command, &mut rl).await {
                                    break;
                                }
                            }
                            Err(e) => {
                                println!("{} {}", "?".yellow(), e);
                                println!("Escribe {} para ver los comandos", "/help".yellow());
                            }
                        }
                    } else if self.assistant.is_refining() {
                        self.refine_turn(input).await;
                    } else {
                        println!(
                            "{}",
                            "Usa /new para empezar un proyecto o /refine para conversar sobre el plan.".dimmed()
                        );
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        println!("¡Hasta pronto!");
        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "MentorSTEM+".bright_cyan().bold());
        println!("Asistente para planes de proyecto STEM+");
        println!("Escribe {} para ver los comandos, {} para salir", "/help".yellow(), "/quit".yellow());
        println!();
    }

    fn prompt(&self) -> String {
        let editing = self.assistant.plan().is_some_and(|p| p.editor.is_editing());
        if editing {
            format!("{} ", "editar>".bright_magenta())
        } else if self.assistant.is_refining() {
            format!("{} ", "InspiraTEC>".bright_blue())
        } else {
            format!("{} ", ">".bright_green())
        }
    }

    async fn handle_command(&mut self, command: Command, rl: &mut DefaultEditor) -> SlashResult {
        debug!(?command, "handle_command: called");
        let result = match command {
            Command::Quit => return SlashResult::Quit,
            Command::Help => {
                self.assistant.set_view(View::Help);
                self.print_help();
                Ok(())
            }
            Command::New => match read_form(rl) {
                Some(form) => {
                    self.generate(form).await;
                    Ok(())
                }
                None => Ok(()),
            },
            Command::Select(index) => self.select(index).await,
            Command::Show => {
                self.print_plan();
                Ok(())
            }
            Command::Toggle(index) => self.assistant.toggle_section(index).map(|_| self.print_plan()),
            Command::Edit => self.begin_editing(),
            Command::Set(index) => self.set_section(index, rl),
            Command::Done => self.assistant.commit_edits().map(|_| {
                println!("{}", "Cambios aplicados.".green());
                self.print_plan();
            }),
            Command::Cancel => self.assistant.cancel_editing().map(|_| {
                println!("{}", "Edición cancelada.".dimmed());
            }),
            Command::Save => self.assistant.save().map(|saved| {
                println!("{} ({})", "¡Proyecto guardado en el historial!".green(), saved.id);
            }),
            Command::History => self.print_history(),
            Command::Open(id) => self.open(id),
            Command::Delete(id) => self.assistant.delete_saved(id).map(|deleted| {
                if deleted {
                    println!("{}", "Proyecto eliminado.".green());
                } else {
                    println!("{}", "No existe un proyecto con ese id.".yellow());
                }
            }),
            Command::Refine => self.assistant.activate_refinement().await.map(|greeting| {
                println!("{} {}", "InspiraTEC:".bright_blue().bold(), greeting);
            }),
            Command::Close => {
                self.assistant.close_refinement();
                Ok(())
            }
            Command::Podcast => self.podcast().await,
            Command::Play => self.play().await,
            Command::Export => self.export(rl).await,
        };

        if let Err(e) = result {
            println!("{} {}", "Error:".red(), e);
        }
        SlashResult::Continue
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Comandos:".bright_cyan());
        println!("  {:14} Mostrar esta ayuda", "/help".yellow());
        println!("  {:14} Salir", "/quit".yellow());
        println!("  {:14} Nuevo proyecto (formulario)", "/new".yellow());
        println!("  {:14} Elegir una propuesta", "/select N".yellow());
        println!("  {:14} Mostrar el plan", "/show".yellow());
        println!("  {:14} Expandir o contraer una sección", "/toggle N".yellow());
        println!("  {:14} Editar las secciones", "/edit".yellow());
        println!("  {:14} Reescribir una sección", "/set N".yellow());
        println!("  {:14} Aplicar la edición", "/done".yellow());
        println!("  {:14} Descartar la edición", "/cancel".yellow());
        println!("  {:14} Guardar en el historial", "/save".yellow());
        println!("  {:14} Ver el historial", "/history".yellow());
        println!("  {:14} Abrir un proyecto guardado", "/open ID".yellow());
        println!("  {:14} Eliminar un proyecto guardado", "/delete ID".yellow());
        println!("  {:14} Refinar con InspiraTEC", "/refine".yellow());
        println!("  {:14} Cerrar InspiraTEC", "/close".yellow());
        println!("  {:14} Generar y narrar el podcast", "/podcast".yellow());
        println!("  {:14} Narrar de nuevo el último guion", "/play".yellow());
        println!("  {:14} Exportar el plan", "/export".yellow());
        println!();
    }

    async fn generate(&mut self, form: ProjectForm) {
        println!("{}", "Generando propuestas...".dimmed());
        match self.assistant.generate_proposals(form).await {
            Ok(ProposalOutcome::Found(_)) => self.print_proposals(),
            Ok(ProposalOutcome::Unparsed(diagnostic)) => println!("{}", diagnostic.message().yellow()),
            Err(e) => println!("{} {:#}", "Error:".red(), e),
        }
    }

    fn print_proposals(&self) {
        println!();
        println!("{}", "Propuestas:".bright_cyan());
        for (i, proposal) in self.assistant.proposals().iter().enumerate() {
            println!("  {}. {}", i + 1, proposal.name.bold());
            println!("     {}", proposal.summary);
            println!("     {}", proposal.resource_level.dimmed());
        }
        println!();
        println!("Elige una con {}", "/select N".yellow());
    }

    async fn select(&mut self, index: usize) -> Result<()> {
        println!("{}", "Generando el plan detallado...".dimmed());
        self.assistant
            .select_proposal(index, |fragment| {
                print!("{}", fragment.dimmed());
                let _ = io::stdout().flush();
            })
            .await?;
        println!();
        self.print_plan();
        Ok(())
    }

    fn print_plan(&self) {
        let Some(plan) = self.assistant.plan() else {
            println!("{}", "No hay un plan abierto.".dimmed());
            return;
        };
        println!();
        println!("{}", plan.proposal_name.bright_cyan().bold());
        if let Some(leftover) = plan.document().leftover() {
            println!("{}", leftover.dimmed());
        }
        for (i, section) in plan.editor.render_editable().iter().enumerate() {
            let open = plan.editor.is_expanded(i);
            let marker = if open { "▾" } else { "▸" };
            let title = if section.title.is_empty() { "Plan" } else { section.title.as_str() };
            println!("{} [{}] {}", marker, i + 1, title.bold());
            if open {
                for line in section.text.lines() {
                    println!("    {}", line);
                }
            }
        }
        println!();
    }

    fn open(&mut self, id: i64) -> Result<()> {
        self.assistant.open_saved(id)?;
        self.print_plan();
        Ok(())
    }

    fn begin_editing(&mut self) -> Result<()> {
        let sections = self.assistant.begin_editing()?;
        println!("{}", "Modo edición. Usa /set N, luego /done o /cancel.".dimmed());
        for (i, section) in sections.iter().enumerate() {
            println!("  [{}] {}", i + 1, section.title);
        }
        Ok(())
    }

    fn set_section(&mut self, index: usize, rl: &mut DefaultEditor) -> Result<()> {
        let sections = self.assistant.drafts()?;
        let current = sections.get(index).map(|s| s.text.clone()).unwrap_or_default();
        println!("{}", "Texto actual:".dimmed());
        println!("{}", current);
        println!(
            "{}",
            format!("Escribe el nuevo texto; termina con una línea que solo tenga '{}'", END_OF_BODY).dimmed()
        );

        let mut lines = Vec::new();
        loop {
            match rl.readline("| ") {
                Ok(line) if line.trim() == END_OF_BODY => break,
                Ok(line) => lines.push(line),
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                    println!("{}", "Sección sin cambios.".dimmed());
                    return Ok(());
                }
                Err(err) => return Err(eyre::eyre!("Readline error: {}", err)),
            }
        }
        self.assistant.set_section(index, &lines.join("\n"))
    }

    fn print_history(&mut self) -> Result<()> {
        let projects = self.assistant.history()?;
        if projects.is_empty() {
            println!("{}", "No hay proyectos guardados.".dimmed());
            return Ok(());
        }
        println!();
        println!("{}", "Historial:".bright_cyan());
        for project in projects {
            println!(
                "  {}  {} {}",
                project.id.to_string().yellow(),
                project.proposal_name.bold(),
                format!("({}, {})", project.form.grade, project.form.topic).dimmed()
            );
        }
        println!();
        Ok(())
    }

    async fn refine_turn(&mut self, input: &str) {
        print!("{} ", "InspiraTEC:".bright_blue().bold());
        let _ = io::stdout().flush();
        let result = self
            .assistant
            .refine(input, |fragment| {
                print!("{}", fragment.dimmed());
                let _ = io::stdout().flush();
            })
            .await;
        println!();

        match result {
            Ok(Some(turn)) => {
                println!("{}", turn.message);
                for change in turn.changes.iter().filter(|c| !c.is_unchanged()) {
                    println!("  {}", describe_change(change).dimmed());
                }
            }
            Ok(None) => {}
            Err(e) => println!("{} {}", "InspiraTEC:".bright_blue().bold(), e.to_string().red()),
        }
    }

    async fn podcast(&mut self) -> Result<()> {
        println!("{}", "Generando el guion del podcast...".dimmed());
        let script = self.assistant.podcast_script().await?;
        let path = self.assistant.save_script(&script)?;
        println!("{} {}", "Guion guardado en".green(), path.display());
        self.last_script = Some(script);
        self.play().await
    }

    async fn play(&mut self) -> Result<()> {
        let Some(script) = &self.last_script else {
            println!("{}", "Primero genera un guion con /podcast.".dimmed());
            return Ok(());
        };
        let mut player = self.assistant.narration_player(script);
        let engine = self.assistant.speech_engine();
        let pause = Duration::from_millis(self.assistant.config().narration.pause_ms);
        println!("{}", "Narrando; Ctrl+C para detener.".dimmed());

        tokio::select! {
            result = play(&mut player, engine.as_ref(), pause, |_, progress| {
                debug!(%progress, "play: sentence");
            }) => result?,
            _ = tokio::signal::ctrl_c() => {
                engine.cancel().await?;
                println!("{}", "Narración detenida.".dimmed());
            }
        }
        Ok(())
    }

    async fn export(&mut self, rl: &mut DefaultEditor) -> Result<()> {
        let teacher = ask(rl, "Docente(s) Responsable(s): ")?;
        let school = ask(rl, "Institución Educativa: ")?;
        let details = ExportDetails::new(&teacher, &school)?;

        let config = &self.assistant.config().export;
        let fetcher = ProxyImageFetcher::new(config.image_proxy_url.clone())?;
        let sink = HtmlFileSink::new(config.output_path());
        println!("{}", "Generando documento...".dimmed());
        let path = self
            .assistant
            .export(&details, Some(&fetcher as &dyn ImageFetcher), &sink)
            .await?;
        println!("{} {}", "Documento exportado en".green(), path.display());
        Ok(())
    }
}

fn describe_change(change: &SectionChange) -> String {
    match change {
        SectionChange::Unchanged { index, title } => format!("= {} {}", index + 1, title),
        SectionChange::Modified { index, title } => format!("~ {} {}", index + 1, title),
        SectionChange::Added { index, title } => format!("+ {} {}", index + 1, title),
        SectionChange::Removed { index, title } => format!("- {} {}", index + 1, title),
    }
}

fn ask(rl: &mut DefaultEditor, prompt: &str) -> Result<String> {
    rl.readline(prompt)
        .map_err(|e| eyre::eyre!("Readline error: {}", e))
}

/// Ask for the four form fields; `None` when the user gives up
fn read_form(rl: &mut DefaultEditor) -> Option<ProjectForm> {
    println!("{}", "Opciones de recursos:".bright_cyan());
    for tier in ResourceTier::ALL {
        println!("  {}", tier);
    }
    let grade = ask(rl, "Grado(s): ").ok()?;
    let topic = ask(rl, "Tema: ").ok()?;
    let resources = ask(rl, "Recursos (A-F): ").ok()?;
    let time = ask(rl, "Tiempo estimado: ").ok()?;
    match ProjectForm::new(&grade, &topic, &resources, &time) {
        Ok(form) => Some(form),
        Err(e) => {
            println!("{}", e.to_string().yellow());
            None
        }
    }
}

/// Result of handling a slash command
enum SlashResult {
    Continue,
    Quit,
}
