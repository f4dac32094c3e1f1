//! Terminal input lines and what they mean.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum UserCommand {
    /// Plain text to send.
    Say(String),
    Photo {
        path: PathBuf,
        description: String,
    },
    CancelRetry,
    RetryPhoto(u64),
    DismissError,
    StartSession,
    DebugLogin(String),
    DebugShow,
    DebugExport(PathBuf),
    Help,
    Quit,
    Invalid(String),
    Empty,
}

pub(crate) const HELP: &str = "\
Commands:
  <text>                     send a message
  /photo <path> [caption]    attach a photo
  /cancel                    cancel the pending retry
  /retry-photo <id>          retry a failed photo upload
  /dismiss                   hide the error banner
  /start                     open a returns session
  /debug login <password>    unlock the debug bus (takes effect on restart)
  /debug                     show debug bus summary
  /debug export <path>       write the debug bus as JSON
  /quit                      exit";

pub(crate) fn parse_line(line: &str) -> UserCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return UserCommand::Empty;
    }
    if !trimmed.starts_with('/') {
        return UserCommand::Say(trimmed.to_string());
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };
    match command {
        "/photo" => {
            let (path, description) = match rest.split_once(char::is_whitespace) {
                Some((path, description)) => (path, description.trim()),
                None => (rest, ""),
            };
            if path.is_empty() {
                UserCommand::Invalid("usage: /photo <path> [caption]".into())
            } else {
                UserCommand::Photo {
                    path: PathBuf::from(path),
                    description: description.to_string(),
                }
            }
        }
        "/cancel" => UserCommand::CancelRetry,
        "/retry-photo" => match rest.parse() {
            Ok(id) => UserCommand::RetryPhoto(id),
            Err(_) => UserCommand::Invalid("usage: /retry-photo <id>".into()),
        },
        "/dismiss" => UserCommand::DismissError,
        "/start" => UserCommand::StartSession,
        "/debug" => parse_debug(rest),
        "/help" => UserCommand::Help,
        "/quit" | "/exit" => UserCommand::Quit,
        other => UserCommand::Invalid(format!("unknown command {other}, try /help")),
    }
}

fn parse_debug(rest: &str) -> UserCommand {
    let (sub, arg) = match rest.split_once(char::is_whitespace) {
        Some((sub, arg)) => (sub, arg.trim()),
        None => (rest, ""),
    };
    match sub {
        "" => UserCommand::DebugShow,
        // An empty password still goes to the server, which answers 400.
        "login" => UserCommand::DebugLogin(arg.to_string()),
        "export" if !arg.is_empty() => UserCommand::DebugExport(PathBuf::from(arg)),
        _ => UserCommand::Invalid("usage: /debug [login <password> | export <path>]".into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_sent_trimmed() {
        assert_eq!(parse_line("  hello there \n"), UserCommand::Say("hello there".into()));
        assert_eq!(parse_line("   "), UserCommand::Empty);
    }

    #[test]
    fn photo_takes_path_and_optional_caption() {
        assert_eq!(
            parse_line("/photo box.jpg dented corner"),
            UserCommand::Photo {
                path: PathBuf::from("box.jpg"),
                description: "dented corner".into(),
            }
        );
        assert_eq!(
            parse_line("/photo label.png"),
            UserCommand::Photo {
                path: PathBuf::from("label.png"),
                description: String::new(),
            }
        );
        assert!(matches!(parse_line("/photo"), UserCommand::Invalid(_)));
    }

    #[test]
    fn control_commands() {
        assert_eq!(parse_line("/cancel"), UserCommand::CancelRetry);
        assert_eq!(parse_line("/retry-photo 3"), UserCommand::RetryPhoto(3));
        assert!(matches!(parse_line("/retry-photo x"), UserCommand::Invalid(_)));
        assert_eq!(parse_line("/dismiss"), UserCommand::DismissError);
        assert_eq!(parse_line("/start"), UserCommand::StartSession);
        assert_eq!(parse_line("/exit"), UserCommand::Quit);
        assert!(matches!(parse_line("/dance"), UserCommand::Invalid(_)));
    }

    #[test]
    fn debug_subcommands() {
        assert_eq!(parse_line("/debug"), UserCommand::DebugShow);
        assert_eq!(
            parse_line("/debug login open sesame"),
            UserCommand::DebugLogin("open sesame".into())
        );
        assert_eq!(
            parse_line("/debug export out.json"),
            UserCommand::DebugExport(PathBuf::from("out.json"))
        );
        assert!(matches!(parse_line("/debug export"), UserCommand::Invalid(_)));
    }
}
