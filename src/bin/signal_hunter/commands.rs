use signal_hunter::TemplateShape;

/// One line typed on stdin while the proxy runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    Quit,
    Calibrate,
    ResetNoise,
    Snapshot,
    SaveTemplate { name: String, shape: TemplateShape },
    DeleteTemplate(String),
    Stats,
    Help,
    Unknown(String),
}

pub(crate) const HELP: &str = "\
commands:
  <enter> | quit          stop and flush the black box
  calibrate               re-learn the noise floor
  reset                   forget the noise floor
  snapshot                export a snapshot directory
  save <name>             store the current signal as a template
  save <name> <rows>x<cols>  store a spectrogram tile as a template
  delete <name>           remove a stored template
  stats                   print frame counters and black box length";

pub(crate) fn parse_command(line: &str) -> ConsoleCommand {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return ConsoleCommand::Quit;
    };
    match head.to_ascii_lowercase().as_str() {
        "q" | "quit" | "exit" => ConsoleCommand::Quit,
        "calibrate" => ConsoleCommand::Calibrate,
        "reset" => ConsoleCommand::ResetNoise,
        "snapshot" => ConsoleCommand::Snapshot,
        "stats" => ConsoleCommand::Stats,
        "help" | "?" => ConsoleCommand::Help,
        "save" => {
            let rest: Vec<&str> = words.collect();
            match rest.as_slice() {
                [name] => ConsoleCommand::SaveTemplate {
                    name: (*name).to_string(),
                    shape: TemplateShape::Spectrum,
                },
                [name, dims] => match parse_dims(dims) {
                    Some((rows, cols)) => ConsoleCommand::SaveTemplate {
                        name: (*name).to_string(),
                        shape: TemplateShape::Tile { rows, cols },
                    },
                    None => ConsoleCommand::Unknown(line.trim().to_string()),
                },
                _ => ConsoleCommand::Unknown(line.trim().to_string()),
            }
        }
        "delete" => match (words.next(), words.next()) {
            (Some(name), None) => ConsoleCommand::DeleteTemplate(name.to_string()),
            _ => ConsoleCommand::Unknown(line.trim().to_string()),
        },
        _ => ConsoleCommand::Unknown(line.trim().to_string()),
    }
}

fn parse_dims(text: &str) -> Option<(usize, usize)> {
    let (rows, cols) = text.split_once(['x', 'X'])?;
    let rows = rows.parse().ok().filter(|&n: &usize| n > 0)?;
    let cols = cols.parse().ok().filter(|&n: &usize| n > 0)?;
    Some((rows, cols))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_quits() {
        assert_eq!(parse_command(""), ConsoleCommand::Quit);
        assert_eq!(parse_command("   \n"), ConsoleCommand::Quit);
        assert_eq!(parse_command("QUIT"), ConsoleCommand::Quit);
    }

    #[test]
    fn save_parses_optional_tile_shape() {
        assert_eq!(
            parse_command("save beacon"),
            ConsoleCommand::SaveTemplate {
                name: "beacon".to_string(),
                shape: TemplateShape::Spectrum,
            }
        );
        assert_eq!(
            parse_command("save beacon 20x300"),
            ConsoleCommand::SaveTemplate {
                name: "beacon".to_string(),
                shape: TemplateShape::Tile {
                    rows: 20,
                    cols: 300
                },
            }
        );
        assert!(matches!(
            parse_command("save beacon 0x3"),
            ConsoleCommand::Unknown(_)
        ));
        assert!(matches!(parse_command("save"), ConsoleCommand::Unknown(_)));
    }

    #[test]
    fn delete_needs_exactly_one_name() {
        assert_eq!(
            parse_command("delete beacon"),
            ConsoleCommand::DeleteTemplate("beacon".to_string())
        );
        assert!(matches!(
            parse_command("delete a b"),
            ConsoleCommand::Unknown(_)
        ));
    }

    #[test]
    fn unknown_words_are_reported() {
        assert_eq!(
            parse_command("warp"),
            ConsoleCommand::Unknown("warp".to_string())
        );
    }
}
