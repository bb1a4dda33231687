use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use std::io::{self, BufRead};
use std::sync::Arc;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tasklane_cli::cli::{Cli, Command, split_command_line};
use tasklane_core::config::{self, Config, ConfigOverrides};
use tasklane_core::error::AppError;
use tasklane_core::lifecycle::now_epoch;
use tasklane_core::model::{NewTask, Task, TaskPatch};
use tasklane_core::notify::{self, NotificationDispatcher};
use tasklane_core::poller::{PassReport, Poller};
use tasklane_core::storage::{TaskStore, json_store};
use tasklane_core::task_api;
use time::UtcOffset;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "TASKLANE_LOG";
const DEFAULT_LOG_FILTER: &str = "tasklane=warn,tasklane::notification=info";

struct App {
    store: Arc<TaskStore>,
    config: Config,
    offset: UtcOffset,
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Project")]
    project: String,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Start")]
    start: String,
    #[tabled(rename = "End")]
    end: String,
}

impl TaskRow {
    fn new(task: &Task, offset: UtcOffset, now: i64) -> Self {
        Self {
            id: task.id.0,
            title: task.title.clone(),
            project: task.project.clone(),
            status: task_api::status_label(task, now),
            start: task_api::format_epoch(task.start_time, offset),
            end: task_api::format_epoch(task.end_time, offset),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn load_config(raw_overrides: &[String]) -> Result<Config, AppError> {
    let loaded = config::load_config_with_fallback();
    if let Some(err) = loaded.error {
        warn!("using default configuration: {err}");
    }

    let mut overrides = ConfigOverrides::default();
    for raw in raw_overrides {
        overrides.push(raw)?;
    }

    Ok(config::merge_overrides(&loaded.config, &overrides))
}

fn render_table(tasks: &[Task], offset: UtcOffset, now: i64) -> String {
    if tasks.is_empty() {
        return "No tasks.".to_string();
    }

    let rows = tasks.iter().map(|task| TaskRow::new(task, offset, now));
    Table::new(rows).with(Style::psql()).to_string()
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

fn print_task_details(task: &Task, offset: UtcOffset, now: i64) {
    println!("ID:          {}", task.id);
    println!("Title:       {}", task.title);
    println!("Project:     {}", task.project);
    println!("Description: {}", task.description);
    println!("Status:      {}", task_api::status_label(task, now));
    println!("Start:       {}", task_api::format_epoch(task.start_time, offset));
    println!("End:         {}", task_api::format_epoch(task.end_time, offset));
    if let Some(completed) = task.completed_time {
        println!("Completed:   {}", task_api::format_epoch(completed, offset));
    }
}

fn print_report(report: &PassReport, json: bool) -> Result<(), AppError> {
    if json {
        let notices: Vec<_> = report
            .notices
            .iter()
            .map(|notice| {
                serde_json::json!({
                    "task_id": notice.task_id,
                    "title": notice.title,
                    "message": notice.message,
                })
            })
            .collect();
        let failed: Vec<_> = report
            .failed
            .iter()
            .map(|(id, err)| serde_json::json!({ "task_id": id, "error": err.to_string() }))
            .collect();
        return print_json(&serde_json::json!({
            "activated": report.activated,
            "notices": notices,
            "failed": failed,
        }));
    }

    for id in &report.activated {
        println!("Activated task {id}");
    }
    for notice in &report.notices {
        println!("{}: {}", notice.title, notice.message);
    }
    for (id, err) in &report.failed {
        eprintln!("Skipped task {id}: {err}");
    }
    if !report.changed() && report.failed.is_empty() {
        println!("Nothing to do.");
    }
    Ok(())
}

fn parse_window_edge(raw: Option<String>, offset: UtcOffset) -> Result<Option<i64>, AppError> {
    raw.map(|value| task_api::parse_datetime(&value, offset))
        .transpose()
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn print_help() {
    let mut cmd = Cli::command();
    let help = cmd.render_help();
    println!("{help}");
}

fn run_command(app: &App, command: Command, json: bool) -> Result<(), AppError> {
    match command {
        Command::Add {
            title,
            project,
            description,
            start,
            end,
        } => {
            let draft = NewTask {
                title,
                project,
                description,
                start_time: task_api::parse_datetime(&start, app.offset)?,
                end_time: task_api::parse_datetime(&end, app.offset)?,
            };
            let task = task_api::add_task(&app.store, draft, now_epoch())?;
            if json {
                print_json(&task)?;
            } else {
                println!("Added task: {} ({})", task.title, task.id);
            }
        }
        Command::Edit {
            id,
            title,
            project,
            description,
            start,
            end,
        } => {
            let id = task_api::parse_task_id(&id)?;
            let patch = TaskPatch {
                title,
                project,
                description,
                start_time: parse_window_edge(start, app.offset)?,
                end_time: parse_window_edge(end, app.offset)?,
            };
            let task = task_api::edit_task(&app.store, id, patch)?;
            if json {
                print_json(&task)?;
            } else {
                println!("Updated task: {} ({})", task.title, task.id);
            }
        }
        Command::Delete { id } => {
            let task = task_api::delete_task(&app.store, task_api::parse_task_id(&id)?)?;
            if json {
                print_json(&task)?;
            } else {
                println!("Deleted task: {} ({})", task.title, task.id);
            }
        }
        Command::Done { id } => {
            let id = task_api::parse_task_id(&id)?;
            let task = task_api::complete_task(&app.store, id, now_epoch())?;
            if json {
                print_json(&task)?;
            } else {
                println!(
                    "Completed task: {} ({}) [{}]",
                    task.title,
                    task.id,
                    task_api::status_label(&task, now_epoch())
                );
            }
        }
        Command::Show { id } => {
            let task = task_api::get_task(&app.store, task_api::parse_task_id(&id)?)?;
            if json {
                print_json(&task)?;
            } else {
                print_task_details(&task, app.offset, now_epoch());
            }
        }
        Command::List => {
            let tasks = task_api::list_tasks(&app.store);
            if json {
                print_json(&tasks)?;
            } else {
                println!("{}", render_table(&tasks, app.offset, now_epoch()));
            }
        }
        Command::Tick => {
            let dispatcher = NotificationDispatcher::spawn(notify::gateway_from_config(&app.config))?;
            let poller = Poller::new(Arc::clone(&app.store), dispatcher, app.config.poll_interval())
                .with_delivery_timeout(app.config.delivery_timeout());
            let report = poller.run_pass(now_epoch());
            poller.shutdown();
            print_report(&report, json)?;
        }
        Command::Watch => run_watch(app)?,
    }

    Ok(())
}

fn run_watch(app: &App) -> Result<(), AppError> {
    let dispatcher = NotificationDispatcher::spawn(notify::gateway_from_config(&app.config))?;
    let (changed_tx, changed_rx) = crossbeam_channel::bounded(1);
    let handle = Poller::new(Arc::clone(&app.store), dispatcher, app.config.poll_interval())
        .with_delivery_timeout(app.config.delivery_timeout())
        .with_change_signal(changed_tx)
        .spawn()?;

    // Ends once the poller thread drops its sender.
    let store = Arc::clone(&app.store);
    let offset = app.offset;
    let refresher = std::thread::Builder::new()
        .name("tasklane-refresh".to_string())
        .spawn(move || {
            for _ in changed_rx.iter() {
                println!("{}", render_table(&store.snapshot(), offset, now_epoch()));
            }
        })
        .map_err(|err| AppError::io(format!("cannot start refresher: {err}")))?;

    println!(
        "Watching tasks every {}s. Type `help` for commands, `exit` to quit.",
        app.config.poll_interval().as_secs()
    );
    println!("{}", render_table(&app.store.snapshot(), app.offset, now_epoch()));

    let result = run_interactive(app);

    handle.stop();
    if refresher.join().is_err() {
        warn!("refresh thread panicked");
    }
    result
}

fn run_interactive(app: &App) -> Result<(), AppError> {
    let mut input = String::new();
    let stdin = io::stdin();
    let mut stdin_lock = stdin.lock();

    loop {
        input.clear();
        let bytes = stdin_lock
            .read_line(&mut input)
            .map_err(|err| AppError::io(err.to_string()))?;

        if bytes == 0 {
            break;
        }

        let line = input.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit") {
            break;
        }

        if line == "help" || line == "?" {
            print_help();
            continue;
        }

        let args = match split_command_line(line) {
            Ok(args) => args,
            Err(message) => {
                eprintln!("ERROR: {}", AppError::invalid_input(message));
                continue;
            }
        };

        if args.is_empty() {
            continue;
        }

        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("tasklane".to_string());
        argv.extend(args);

        let cli = match Cli::try_parse_from(argv) {
            Ok(cli) => cli,
            Err(err) => {
                eprintln!("ERROR: {}", normalize_parse_error(err));
                continue;
            }
        };

        let result = match cli.command {
            Command::Watch | Command::Tick => Err(AppError::invalid_input(
                "the poller is already running in this session",
            )),
            _ if !cli.config_override.is_empty() => Err(AppError::invalid_input(
                "config overrides only apply at startup",
            )),
            command => {
                app.store.reload_if_changed();
                run_command(app, command, cli.json)
            }
        };

        if let Err(err) = result {
            eprintln!("ERROR: {}", err);
        }
    }

    Ok(())
}

fn run(cli: Cli, offset: UtcOffset) -> Result<(), AppError> {
    let config = load_config(&cli.config_override)?;
    let path = json_store::store_path()?;
    debug!("using task store at {}", path.display());

    let app = App {
        store: Arc::new(TaskStore::open(path)),
        config,
        offset,
    };
    run_command(&app, cli.command, cli.json)
}

fn main() {
    // Must be read before any thread is spawned.
    let offset = task_api::local_offset();
    init_tracing();

    let mut args = std::env::args_os();
    args.next();
    let parsed = if args.next().is_none() {
        Cli::try_parse_from(["tasklane", "watch"])
    } else {
        Cli::try_parse()
    };

    let cli = match parsed {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    if let Err(err) = run(cli, offset) {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
