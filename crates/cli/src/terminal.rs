use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};

use talkdata_runtime::{AgentState, Notice, NoticeLevel};

use crate::render::Piece;

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const TABLE: Color = Color::White;
    const ERROR: Color = Color::Red;
    const WARNING: Color = Color::DarkYellow;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Terminal I/O for the interactive REPL.
pub struct Terminal {
    show_tool_results: bool,
}

impl Terminal {
    pub fn new(show_tool_results: bool) -> Self {
        Self { show_tool_results }
    }

    /// Print the startup banner.
    pub fn print_banner(&self, profile: &str, model: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("talkdata"),
            ResetColor,
            Print(" - Chat with your data\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!("Profile: {} | Model: {}\n", profile, model)),
            Print("Type 'exit' or 'quit' to end, '/config' to show settings. Ctrl+C cancels the running turn.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Read a line of user input with prompt.
    /// Returns None on exit commands and end of input.
    pub fn read_input(&self) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::USER_PROMPT),
            Print("you> "),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        let trimmed = input.trim().to_string();

        if trimmed == "exit" || trimmed == "quit" || trimmed == "/exit" || trimmed == "/quit" {
            return Ok(None);
        }

        Ok(Some(trimmed))
    }

    /// Print one piece of assistant output.
    pub fn print_piece(&self, piece: &Piece) -> Result<()> {
        let mut stdout = io::stdout();
        match piece {
            Piece::MessageStart => {
                execute!(stdout, Print("\n"))?;
            }
            Piece::Text(text) => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::ASSISTANT_TEXT),
                    Print(text),
                    ResetColor,
                )?;
            }
            Piece::ToolUse { name } if self.show_tool_results => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::TOOL_CALL),
                    Print(format!("[tool: {}]\n", name)),
                    ResetColor,
                )?;
            }
            Piece::ToolResults { name, summary } if self.show_tool_results => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::TOOL_RESULT),
                    Print(format!("  [{} result]: {}\n", name, truncate(summary, 500))),
                    ResetColor,
                )?;
            }
            Piece::SqlTable { markdown, primary } => {
                let label = if *primary { "query result" } else { "table" };
                execute!(
                    stdout,
                    SetForegroundColor(Colors::DIM),
                    Print(format!("\n[{}]\n", label)),
                    SetForegroundColor(Colors::TABLE),
                    Print(format!("{}\n", markdown)),
                    ResetColor,
                )?;
            }
            Piece::Chart => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::DIM),
                    Print("\n[chart omitted]\n"),
                    ResetColor,
                )?;
            }
            Piece::ToolUse { .. } | Piece::ToolResults { .. } | Piece::Table => {}
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_state(&self, state: AgentState) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("\n({})", state)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_notice(&self, notice: &Notice) -> Result<()> {
        let (color, label) = match notice.level {
            NoticeLevel::Error => (Colors::ERROR, "error"),
            NoticeLevel::Warning => (Colors::WARNING, "warning"),
        };
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(color),
            Print(format!("[{}: {}]\n", label, notice.message)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print an error message.
    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::ERROR),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print an info message.
    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}... ({} chars total)", &s[..idx], s.chars().count()),
        None => s.to_string(),
    }
}
