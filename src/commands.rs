use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a line with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Cancel the reply being streamed
    Stop,
    /// Resend the latest user message
    Regenerate,
    /// Print the transcript
    History,
    /// Check whether the backend answers
    Health,
    /// Show help
    Help,
    /// Exit the application
    Bye,
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Stop => "stop the reply being streamed",
            SlashCommand::Regenerate => "discard the last reply and ask again",
            SlashCommand::History => "print the conversation so far",
            SlashCommand::Health => "check whether the backend is reachable",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }

    /// Whether this command can be run while a reply is streaming.
    pub fn available_during_streaming(self) -> bool {
        !matches!(self, SlashCommand::Regenerate)
    }
}

/// Parse a slash command from user input
///
/// Anything after the command word is ignored.
pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let rest = input.trim().strip_prefix('/')?;
    let head = rest.split_whitespace().next()?;

    SlashCommand::from_str(head)
        .ok()
        .or_else(|| match head.to_lowercase().as_str() {
            "q" | "quit" | "exit" => Some(SlashCommand::Bye),
            "retry" | "r" => Some(SlashCommand::Regenerate),
            "s" | "cancel" => Some(SlashCommand::Stop),
            "h" | "?" => Some(SlashCommand::Help),
            _ => None,
        })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for command in SlashCommand::iter() {
        help.push_str(&format!("/{} - {}\n", command.command(), command.description()));
    }
    help.push_str(
        "\nAliases: /q, /quit, /exit for /bye; /retry for /regenerate; /cancel for /stop",
    );
    help
}
