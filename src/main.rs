// Inherit lint configuration from lib.rs for consistency
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::too_many_lines,
    clippy::fn_params_excessive_bools,
    clippy::unnecessary_wraps,
    clippy::needless_pass_by_value
)]

use std::io::Read as _;
use std::path::Path;

use clap::Parser;

use livepreview::bundle::{normalize, Assembly, BundleAssembler};
use livepreview::cli::commands::{Cli, Command};
use livepreview::cli::output::{
    self, AssembleOutput, FilesOutput, HistoryOutput, PreviewOutput, TurnResult,
};
use livepreview::config::Config;
use livepreview::db::{Database, ProjectStore};
use livepreview::error::PreviewError;
use livepreview::pipeline::{Session, TracingObserver, TurnRequest};
use livepreview::sandbox::{embed_markup, BrowserFactory, SandboxHost, SandboxPolicy};
use livepreview::stream::{CompletionSource, HttpCompletionClient, ImageAttachment, ReplaySource};
use livepreview::workspace;

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("{}", output::format_error(&e));
        std::process::exit(1);
    }
}

/// Logs go to stderr; stdout carries JSON only.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

fn run(cli: Cli) -> CmdResult {
    match cli.command {
        Command::Init => cmd_init(),
        Command::New { name, owner } => cmd_new(&name, owner.as_deref()),
        Command::List => cmd_list(),
        Command::Delete { id } => cmd_delete(&id),
        Command::Import { id, dir } => cmd_import(&id, &dir),
        Command::Files { id, path } => cmd_files(&id, path.as_deref()),
        Command::History { id } => cmd_history(&id),
        Command::Generate {
            id,
            prompt,
            image,
            model,
            new,
            resume,
        } => cmd_generate(&id, prompt, image.as_deref(), model, new, resume),
        Command::Replay {
            id,
            frames,
            prompt,
            chunk_size,
            resume,
        } => cmd_replay(&id, &frames, prompt, chunk_size, resume),
        Command::Normalize { file } => cmd_normalize(&file),
        Command::Assemble { id, out, embed } => cmd_assemble(&id, out.as_deref(), embed),
        Command::Preview { id } => cmd_preview(&id),
        Command::Export { id, dir } => cmd_export(&id, &dir),
    }
}

type CmdResult = Result<(), Box<dyn std::fmt::Display>>;

fn map_err(e: impl std::fmt::Display + 'static) -> Box<dyn std::fmt::Display> {
    Box::new(e.to_string())
}

fn get_config() -> Result<Config, Box<dyn std::fmt::Display>> {
    Config::from_cwd().map_err(map_err)
}

fn get_db(config: &Config) -> Result<Database, Box<dyn std::fmt::Display>> {
    if !config.store_exists() {
        return Err(map_err(PreviewError::StoreNotFound));
    }
    Database::open(&config.db_path).map_err(map_err)
}

fn runtime() -> Result<tokio::runtime::Runtime, Box<dyn std::fmt::Display>> {
    tokio::runtime::Runtime::new().map_err(map_err)
}

fn assemble(config: &Config, db: &Database, id: &str) -> Result<Assembly, Box<dyn std::fmt::Display>> {
    let project = db.get(id).map_err(map_err)?;
    Ok(BundleAssembler::new(config.settings.pipeline.clone()).assemble(&project.files))
}

fn cmd_init() -> CmdResult {
    let config = get_config()?;
    let created = !config.store_exists();
    config.ensure_state_dir().map_err(map_err)?;
    if !config.config_path.exists() {
        config.save_settings().map_err(map_err)?;
    }
    Database::open(&config.db_path).map_err(map_err)?;
    println!(
        "{}",
        output::format_json(&serde_json::json!({
            "state_dir": config.state_dir.display().to_string(),
            "created": created,
        }))
    );
    Ok(())
}

fn cmd_new(name: &str, owner: Option<&str>) -> CmdResult {
    let config = get_config()?;
    let db = get_db(&config)?;
    let owner = owner.unwrap_or(&config.settings.owner.name);
    let project = db.create(name, owner).map_err(map_err)?;
    println!(
        "{}",
        output::format_json(&serde_json::json!({
            "id": project.id,
            "name": project.name,
            "owner": project.owner,
        }))
    );
    Ok(())
}

fn cmd_list() -> CmdResult {
    let config = get_config()?;
    let db = get_db(&config)?;
    let projects = db.list_projects().map_err(map_err)?;
    println!("{}", output::format_json(&projects));
    Ok(())
}

fn cmd_delete(id: &str) -> CmdResult {
    let config = get_config()?;
    let db = get_db(&config)?;
    if !db.delete_project(id).map_err(map_err)? {
        return Err(map_err(PreviewError::ProjectNotFound { id: id.to_string() }));
    }
    println!("{}", output::format_json(&serde_json::json!({ "deleted": id })));
    Ok(())
}

fn cmd_import(id: &str, dir: &str) -> CmdResult {
    let config = get_config()?;
    let db = get_db(&config)?;
    let mut session = Session::open(
        db,
        id,
        &config.settings.pipeline,
        config.settings.phases.clone(),
    )
    .map_err(map_err)?;
    let table = workspace::import_dir(Path::new(dir)).map_err(map_err)?;
    let merge = session.import_files(&table).map_err(map_err)?;
    println!(
        "{}",
        output::format_json(&serde_json::json!({
            "id": id,
            "imported": table.paths().collect::<Vec<_>>(),
            "changed": merge.changed,
        }))
    );
    Ok(())
}

fn cmd_files(id: &str, path: Option<&str>) -> CmdResult {
    let config = get_config()?;
    let db = get_db(&config)?;
    let project = db.get(id).map_err(map_err)?;
    match path {
        Some(path) => {
            let content = project.files.get(path).ok_or_else(|| {
                map_err(PreviewError::FileNotFound {
                    path: path.to_string(),
                })
            })?;
            println!(
                "{}",
                output::format_json(&serde_json::json!({ "path": path, "content": content }))
            );
        }
        None => println!("{}", output::format_json(&FilesOutput::from(&project))),
    }
    Ok(())
}

fn cmd_history(id: &str) -> CmdResult {
    let config = get_config()?;
    let db = get_db(&config)?;
    let project = db.get(id).map_err(map_err)?;
    let out = HistoryOutput {
        id: &project.id,
        credits: project.credits,
        messages: &project.messages,
    };
    println!("{}", output::format_json(&out));
    Ok(())
}

fn cmd_generate(
    id: &str,
    prompt: String,
    image: Option<&str>,
    model: Option<String>,
    new: bool,
    resume: bool,
) -> CmdResult {
    let config = get_config()?;
    let id = if new {
        let db = get_db(&config)?;
        db.create(id, &config.settings.owner.name).map_err(map_err)?.id
    } else {
        id.to_string()
    };
    let completion = &config.settings.completion;
    let client = HttpCompletionClient::new(completion.endpoint.clone(), completion.api_key());
    let mut request = TurnRequest::new(prompt, model.unwrap_or_else(|| completion.model.clone()));
    if let Some(path) = image {
        request.image = Some(ImageAttachment::from_path(Path::new(path)).map_err(map_err)?);
    }
    run_turn(&config, &id, &client, request, resume)
}

fn cmd_replay(id: &str, frames: &str, prompt: String, chunk_size: usize, resume: bool) -> CmdResult {
    let config = get_config()?;
    let source = ReplaySource::from_file(frames).with_chunk_size(chunk_size);
    let request = TurnRequest::new(prompt, "replay");
    run_turn(&config, id, &source, request, resume)
}

fn run_turn<C: CompletionSource>(
    config: &Config,
    id: &str,
    source: &C,
    request: TurnRequest,
    resume: bool,
) -> CmdResult {
    let db = get_db(config)?;
    let mut session = Session::open(
        db,
        id,
        &config.settings.pipeline,
        config.settings.phases.clone(),
    )
    .map_err(map_err)?;
    if session.interrupted() && resume {
        session.acknowledge_interrupted().map_err(map_err)?;
    }

    let rt = runtime()?;
    let report = rt
        .block_on(session.run_turn(source, request, &mut TracingObserver))
        .map_err(map_err)?;
    println!(
        "{}",
        output::format_json(&TurnResult {
            id,
            report: &report,
        })
    );
    Ok(())
}

fn cmd_normalize(file: &str) -> CmdResult {
    let source = if file == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).map_err(map_err)?;
        buf
    } else {
        std::fs::read_to_string(file).map_err(map_err)?
    };
    print!("{}", normalize(&source));
    Ok(())
}

fn cmd_assemble(id: &str, out: Option<&str>, embed: bool) -> CmdResult {
    let config = get_config()?;
    let db = get_db(&config)?;
    let assembly = assemble(&config, &db, id)?;
    if let Some(path) = out {
        let html = if embed {
            embed_markup(&assembly.document, &SandboxPolicy::default())
        } else {
            assembly.document.html.clone()
        };
        std::fs::write(path, html).map_err(map_err)?;
    }
    let report = AssembleOutput {
        digest: &assembly.document.digest,
        bytes: assembly.document.html.len(),
        written: out,
        report: &assembly.report,
    };
    println!("{}", output::format_json(&report));
    Ok(())
}

fn cmd_preview(id: &str) -> CmdResult {
    let config = get_config()?;
    let db = get_db(&config)?;
    let assembly = assemble(&config, &db, id)?;
    let mut host = SandboxHost::new(BrowserFactory::new(config.settings.sandbox.clone()));

    let rt = runtime()?;
    let state = rt.block_on(host.mount(&assembly)).clone();
    let out = PreviewOutput {
        state: &state,
        generation: host.generation(),
        digest: host.digest(),
        text: host.visible_text(),
    };
    println!("{}", output::format_json(&out));
    Ok(())
}

fn cmd_export(id: &str, dir: &str) -> CmdResult {
    let config = get_config()?;
    let db = get_db(&config)?;
    let project = db.get(id).map_err(map_err)?;
    let report = workspace::export_dir(&project.files, Path::new(dir)).map_err(map_err)?;
    println!("{}", output::format_json(&report));
    Ok(())
}
