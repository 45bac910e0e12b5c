//! Console command parsing.

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `NICK <name>`; the name may be empty to request a generated one.
    Nick(String),
    /// `JOIN <channel>`
    Join(String),
    /// `LEAVE <channel>`
    Leave(String),
    /// `LOGOUT`
    Logout,
    /// `EXIT`
    Exit,
    /// `@<channel> <text>`
    Send {
        /// Channel name without the `@`.
        channel: String,
        /// The rest of the line.
        text: String,
    },
    /// Any other non-empty line.
    Broadcast(String),
}

/// Parse a console line.
///
/// Returns `None` for blank lines, for commands missing a required
/// parameter (`JOIN`/`LEAVE` without a channel, `@channel` without text)
/// and for `JOIN`/`LEAVE` followed by more than one word.
#[must_use]
pub fn parse_line(line: &str) -> Option<ClientCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (line, ""),
    };

    if let Some(channel) = word.strip_prefix('@') {
        if channel.is_empty() || rest.is_empty() {
            return None;
        }
        return Some(ClientCommand::Send {
            channel: channel.to_string(),
            text: rest.to_string(),
        });
    }

    let command = match word.to_ascii_uppercase().as_str() {
        "NICK" => ClientCommand::Nick(rest.to_string()),
        "JOIN" => ClientCommand::Join(required(rest)?),
        "LEAVE" => ClientCommand::Leave(required(rest)?),
        "LOGOUT" => ClientCommand::Logout,
        "EXIT" => ClientCommand::Exit,
        _ => ClientCommand::Broadcast(line.to_string()),
    };
    Some(command)
}

/// Exactly one word.
fn required(param: &str) -> Option<String> {
    let mut words = param.split_whitespace();
    let word = words.next()?;
    if words.next().is_some() {
        return None;
    }
    Some(word.to_string())
}
