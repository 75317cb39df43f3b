use std::path::PathBuf;

use ethereal_contracts::chat::EditPreset;

pub const HELP_COMMANDS: &[&str] = &[
    "/photo <paths...>",
    "/edit <instruction>",
    "/vintage",
    "/bw",
    "/gallery",
    "/save <n> [path]",
    "/key <value>",
    "/phase",
    "/help",
    "/quit",
];

/// One line of REPL input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Noop,
    Say(String),
    Photos(Vec<PathBuf>),
    Edit(String),
    Preset(EditPreset),
    Gallery,
    /// Zero-based gallery index.
    Save { index: usize, path: Option<PathBuf> },
    Key(String),
    Phase,
    Help,
    Quit,
    Invalid(String),
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts.into_iter().filter(|value| !value.is_empty()).collect(),
        Err(_) => arg.split_whitespace().map(str::to_string).collect(),
    }
}

fn parse_save(arg: &str) -> ReplCommand {
    let parts = split_args(arg);
    let Some(raw_index) = parts.first() else {
        return ReplCommand::Invalid("/save requires a gallery number".to_string());
    };
    match raw_index.parse::<usize>() {
        Ok(number) if number >= 1 => ReplCommand::Save {
            index: number - 1,
            path: parts.get(1).map(PathBuf::from),
        },
        _ => ReplCommand::Invalid(format!("/save expects a number from /gallery, got {raw_index}")),
    }
}

pub fn parse_line(line: &str) -> ReplCommand {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ReplCommand::Noop;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return ReplCommand::Say(trimmed.to_string());
    };

    let (command, arg) = match rest.split_once(char::is_whitespace) {
        Some((command, arg)) => (command, arg.trim()),
        None => (rest, ""),
    };
    let command = command.to_ascii_lowercase();

    if let Some(preset) = EditPreset::from_command(&command) {
        return ReplCommand::Preset(preset);
    }
    match command.as_str() {
        "photo" | "photos" => {
            let paths: Vec<PathBuf> = split_args(arg).into_iter().map(PathBuf::from).collect();
            if paths.is_empty() {
                ReplCommand::Invalid("/photo requires at least one path".to_string())
            } else {
                ReplCommand::Photos(paths)
            }
        }
        "edit" if arg.is_empty() => {
            ReplCommand::Invalid("/edit requires an instruction".to_string())
        }
        "edit" => ReplCommand::Edit(arg.to_string()),
        "gallery" => ReplCommand::Gallery,
        "save" => parse_save(arg),
        "key" if arg.is_empty() => ReplCommand::Invalid("/key requires a value".to_string()),
        "key" => ReplCommand::Key(arg.to_string()),
        "phase" => ReplCommand::Phase,
        "help" => ReplCommand::Help,
        "quit" | "exit" => ReplCommand::Quit,
        other => ReplCommand::Invalid(format!("unknown command /{other}; try /help")),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use ethereal_contracts::chat::EditPreset;

    use super::{parse_line, ReplCommand};

    #[test]
    fn plain_text_is_sent_as_is() {
        assert_eq!(
            parse_line("  add a retro filter \n"),
            ReplCommand::Say("add a retro filter".to_string())
        );
        assert_eq!(parse_line("   "), ReplCommand::Noop);
    }

    #[test]
    fn photo_paths_support_quoting() {
        assert_eq!(
            parse_line("/photo us.jpg \"beach day.png\""),
            ReplCommand::Photos(vec![
                PathBuf::from("us.jpg"),
                PathBuf::from("beach day.png")
            ])
        );
        assert!(matches!(parse_line("/photo"), ReplCommand::Invalid(_)));
    }

    #[test]
    fn edit_keeps_instruction_text_verbatim() {
        assert_eq!(
            parse_line("/edit remove the  hat"),
            ReplCommand::Edit("remove the  hat".to_string())
        );
        assert!(matches!(parse_line("/edit"), ReplCommand::Invalid(_)));
    }

    #[test]
    fn presets_map_to_edit_presets() {
        assert_eq!(parse_line("/bw"), ReplCommand::Preset(EditPreset::BlackAndWhite));
        assert_eq!(parse_line("/Vintage"), ReplCommand::Preset(EditPreset::Vintage));
    }

    #[test]
    fn save_uses_one_based_gallery_numbers() {
        assert_eq!(
            parse_line("/save 1"),
            ReplCommand::Save {
                index: 0,
                path: None
            }
        );
        assert_eq!(
            parse_line("/save 2 out/concept.png"),
            ReplCommand::Save {
                index: 1,
                path: Some(PathBuf::from("out/concept.png"))
            }
        );
        assert!(matches!(parse_line("/save 0"), ReplCommand::Invalid(_)));
        assert!(matches!(parse_line("/save"), ReplCommand::Invalid(_)));
    }

    #[test]
    fn unknown_commands_are_reported() {
        assert!(matches!(parse_line("/optimize"), ReplCommand::Invalid(_)));
        assert_eq!(parse_line("/exit"), ReplCommand::Quit);
    }
}
