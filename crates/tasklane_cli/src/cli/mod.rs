use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "tasklane", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new task
    ///
    /// Example: tasklane add --title "Write report" --project work
    ///          --description "Q3 numbers" --start "2026-01-05 09:00" --end "2026-01-05 10:30"
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        project: String,
        #[arg(long)]
        description: String,
        /// Start time (RFC3339 or "YYYY-MM-DD HH:MM", local time)
        #[arg(long)]
        start: String,
        /// End time (RFC3339 or "YYYY-MM-DD HH:MM", local time)
        #[arg(long)]
        end: String,
    },
    /// Edit fields of a task
    ///
    /// Example: tasklane edit 3 --end "2026-01-05 11:00"
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
    },
    /// Delete a task
    ///
    /// Example: tasklane delete 3
    Delete { id: String },
    /// Mark a task as completed
    ///
    /// Example: tasklane done 3
    Done { id: String },
    /// Show details of a task
    ///
    /// Example: tasklane show 3
    Show { id: String },
    /// List all tasks
    List,
    /// Run one reconciliation pass now and deliver its notifications
    Tick,
    /// Run the background poller and accept commands on stdin
    ///
    /// Type commands without the program name (e.g. `done 3`), `list` to
    /// redraw, and `exit` to stop. Changes made by other `tasklane` commands
    /// are picked up before each poll and each typed command.
    Watch,
}

/// Splits an interactive command line into arguments. Double quotes group
/// words; inside quotes `\"` and `\\` escape.
pub fn split_command_line(line: &str) -> Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escape = false;
    let mut quoted_token = false;

    for ch in line.chars() {
        if escape {
            if ch != '"' && ch != '\\' {
                current.push('\\');
            }
            current.push(ch);
            escape = false;
            continue;
        }

        if in_quotes && ch == '\\' {
            escape = true;
            continue;
        }

        if ch == '"' {
            in_quotes = !in_quotes;
            quoted_token = true;
            continue;
        }

        if ch.is_whitespace() && !in_quotes {
            if !current.is_empty() || quoted_token {
                args.push(std::mem::take(&mut current));
                quoted_token = false;
            }
            continue;
        }

        current.push(ch);
    }

    if in_quotes {
        return Err("unterminated quote in command".to_string());
    }

    if !current.is_empty() || quoted_token {
        args.push(current);
    }

    Ok(args)
}
