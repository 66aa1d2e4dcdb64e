//! Session log inspection commands

use anyhow::{bail, Context, Result};
use colored::*;
use comfy_table::{presets::UTF8_FULL, Table};
use conductor_config::ObserveConfig;
use conductor_observe::{
    list_sessions, load_session, output::glyph, Level, LogRecord, SessionId, SessionListing,
};

use crate::cli::SessionCommands;

/// Execute a sessions subcommand
pub async fn execute(config: ObserveConfig, cmd: SessionCommands) -> Result<()> {
    match cmd {
        SessionCommands::List { command, format } => list(config, command, format).await,
        SessionCommands::Show { command, id, raw } => show(config, command, id, raw).await,
    }
}

async fn list(config: ObserveConfig, command: Option<String>, format: String) -> Result<()> {
    let listings = list_sessions(&config.root_dir, command.as_deref())
        .await
        .context("failed to list sessions")?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&listings)?),
        "table" => {
            if listings.is_empty() {
                println!("No sessions found.");
                println!("Sessions are stored in: {}", config.sessions_dir().display());
                return Ok(());
            }
            println!("{}", render_table(&listings));
        }
        other => bail!("unknown format {other:?} (expected table or json)"),
    }
    Ok(())
}

fn render_table(listings: &[SessionListing]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Date", "Command", "Session", "Segments", "Size"]);
    for listing in listings {
        table.add_row(vec![
            listing.date.to_string(),
            listing.command.clone(),
            listing.session_id.to_string(),
            listing.segments.len().to_string(),
            format_bytes(listing.bytes),
        ]);
    }
    table
}

async fn show(config: ObserveConfig, command: String, id: String, raw: bool) -> Result<()> {
    let id = SessionId::parse(&id).context("invalid session id")?;
    let records = load_session(&config.root_dir, &command, &id)
        .await
        .with_context(|| format!("failed to read session {id}"))?;
    if records.is_empty() {
        bail!("no records for session {id} of {command:?}");
    }

    for record in &records {
        if raw {
            print!("{}", record.to_line());
        } else {
            println!("{}", render_record(record));
        }
    }
    Ok(())
}

fn render_record(record: &LogRecord) -> String {
    let time = record.timestamp().format("%H:%M:%S%.3f").to_string();
    let mark = match record.level() {
        Level::Debug => glyph(Level::Debug).dimmed(),
        Level::Info => glyph(Level::Info).blue(),
        Level::Success => glyph(Level::Success).green(),
        Level::Warning => glyph(Level::Warning).yellow(),
        Level::Error => glyph(Level::Error).red(),
    };
    let mut line = format!(
        "{} {mark} {} {}",
        time.dimmed(),
        record.message(),
        format!("[{}]", record.component()).dimmed()
    );
    if let Some(payload) = record.payload() {
        line.push(' ');
        line.push_str(&payload.to_string().dimmed().to_string());
    }
    line
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(100 * 1024 * 1024), "100.0 MiB");
    }

    #[test]
    fn test_render_record_plain() {
        colored::control::set_override(false);
        let record = LogRecord::new(Level::Warning, "disk slow", conductor_observe::Component::Session);
        let line = render_record(&record);
        assert!(line.ends_with("⚠ disk slow [session]"));
    }
}
