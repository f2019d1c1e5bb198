use thiserror::Error;
use wopi_core::{ExtendedData, ExtendedDataError};

use crate::save::SaveRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEventKind {
    Input,
    Up,
}

/// One line of the client protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Load {
        url: String,
    },
    Key {
        kind: KeyEventKind,
        char_code: u32,
        key_code: u32,
    },
    Save {
        dont_terminate_edit: bool,
        request: SaveRequest,
    },
    Autosave,
    Close,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("`{command}` requires `{arg}=`")]
    MissingArgument {
        command: &'static str,
        arg: &'static str,
    },
    #[error("invalid value for `{arg}`: {value}")]
    InvalidArgument { arg: String, value: String },
    #[error("expected name=value, got `{0}`")]
    MalformedToken(String),
    #[error("invalid extendedData: {0}")]
    ExtendedData(#[from] ExtendedDataError),
}

impl ClientCommand {
    pub fn parse(line: &str) -> Result<Self, CommandError> {
        let mut tokens = line.split_whitespace();
        let verb = tokens.next().ok_or(CommandError::Empty)?;
        let args = tokens
            .map(|token| {
                token
                    .split_once('=')
                    .ok_or_else(|| CommandError::MalformedToken(token.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        match verb {
            "load" => {
                let url = required(&args, "load", "url")?;
                Ok(ClientCommand::Load {
                    url: decode_url(url)?,
                })
            }
            "key" => {
                let kind = match required(&args, "key", "type")? {
                    "input" => KeyEventKind::Input,
                    "up" => KeyEventKind::Up,
                    other => return Err(invalid("type", other)),
                };
                Ok(ClientCommand::Key {
                    kind,
                    char_code: parse_u32(required(&args, "key", "char")?, "char")?,
                    key_code: parse_u32(required(&args, "key", "key")?, "key")?,
                })
            }
            "save" => {
                let extended_data = match lookup(&args, "extendedData") {
                    Some(raw) => ExtendedData::from_command_arg(raw)?,
                    None => ExtendedData::new(),
                };
                Ok(ClientCommand::Save {
                    dont_terminate_edit: flag(&args, "dontTerminateEdit")?,
                    request: SaveRequest {
                        dont_save_if_unmodified: flag(&args, "dontSaveIfUnmodified")?,
                        extended_data,
                    },
                })
            }
            "autosave" => Ok(ClientCommand::Autosave),
            "close" => Ok(ClientCommand::Close),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

fn lookup<'a>(args: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    args.iter()
        .rev()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| *value)
}

fn required<'a>(
    args: &[(&'a str, &'a str)],
    command: &'static str,
    arg: &'static str,
) -> Result<&'a str, CommandError> {
    lookup(args, arg).ok_or(CommandError::MissingArgument { command, arg })
}

fn flag(args: &[(&str, &str)], name: &str) -> Result<bool, CommandError> {
    match lookup(args, name) {
        None | Some("0") | Some("false") => Ok(false),
        Some("1") | Some("true") => Ok(true),
        Some(other) => Err(invalid(name, other)),
    }
}

fn parse_u32(value: &str, arg: &str) -> Result<u32, CommandError> {
    value.parse().map_err(|_| invalid(arg, value))
}

// Clients may send the WOPISrc either raw or percent-encoded.
fn decode_url(value: &str) -> Result<String, CommandError> {
    if value.contains("://") {
        return Ok(value.to_string());
    }
    urlencoding::decode(value)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| invalid("url", value))
}

fn invalid(arg: &str, value: &str) -> CommandError {
    CommandError::InvalidArgument {
        arg: arg.to_string(),
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_load_with_raw_or_encoded_url() {
        let raw = ClientCommand::parse("load url=http://host/wopi/files/a?access_token=t").unwrap();
        assert_eq!(
            raw,
            ClientCommand::Load {
                url: "http://host/wopi/files/a?access_token=t".into()
            }
        );

        let encoded =
            ClientCommand::parse("load url=http%3A%2F%2Fhost%2Fwopi%2Ffiles%2Fa").unwrap();
        assert_eq!(
            encoded,
            ClientCommand::Load {
                url: "http://host/wopi/files/a".into()
            }
        );
    }

    #[test]
    fn parses_key_events() {
        assert_eq!(
            ClientCommand::parse("key type=input char=97 key=0").unwrap(),
            ClientCommand::Key {
                kind: KeyEventKind::Input,
                char_code: 97,
                key_code: 0
            }
        );
        assert!(matches!(
            ClientCommand::parse("key type=up char=97 key=0").unwrap(),
            ClientCommand::Key {
                kind: KeyEventKind::Up,
                ..
            }
        ));
    }

    #[test]
    fn parses_save_with_extended_data() {
        let command = ClientCommand::parse(
            "save dontTerminateEdit=0 dontSaveIfUnmodified=1 extendedData=CustomFlag%3DCustom%20Value%3BAnotherFlag%3DAnotherValue",
        )
        .unwrap();
        let ClientCommand::Save {
            dont_terminate_edit,
            request,
        } = command
        else {
            panic!("expected save");
        };
        assert!(!dont_terminate_edit);
        assert!(request.dont_save_if_unmodified);
        assert_eq!(request.extended_data.get("CustomFlag"), Some("Custom Value"));
        assert_eq!(
            request.extended_data.get("AnotherFlag"),
            Some("AnotherValue")
        );
    }

    #[test]
    fn bare_save_has_defaults() {
        assert_eq!(
            ClientCommand::parse("save").unwrap(),
            ClientCommand::Save {
                dont_terminate_edit: false,
                request: SaveRequest::default()
            }
        );
        assert_eq!(
            ClientCommand::parse("  autosave ").unwrap(),
            ClientCommand::Autosave
        );
        assert_eq!(ClientCommand::parse("close").unwrap(), ClientCommand::Close);
    }

    #[test]
    fn rejects_malformed_commands() {
        assert_eq!(ClientCommand::parse("   "), Err(CommandError::Empty));
        assert_eq!(
            ClientCommand::parse("paste"),
            Err(CommandError::Unknown("paste".into()))
        );
        assert_eq!(
            ClientCommand::parse("load"),
            Err(CommandError::MissingArgument {
                command: "load",
                arg: "url"
            })
        );
        assert_eq!(
            ClientCommand::parse("key type=input char=x key=0"),
            Err(CommandError::InvalidArgument {
                arg: "char".into(),
                value: "x".into()
            })
        );
        assert_eq!(
            ClientCommand::parse("save dontSaveIfUnmodified=maybe"),
            Err(CommandError::InvalidArgument {
                arg: "dontSaveIfUnmodified".into(),
                value: "maybe".into()
            })
        );
        assert_eq!(
            ClientCommand::parse("save extendedData"),
            Err(CommandError::MalformedToken("extendedData".into()))
        );
        assert!(matches!(
            ClientCommand::parse("save extendedData=NoSeparator"),
            Err(CommandError::ExtendedData(_))
        ));
    }
}
