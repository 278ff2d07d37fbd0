use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, LOGIN_COMMAND, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS, POSITION_COMMANDS,
    RAW_ARG_COMMANDS, SETTING_COMMANDS, SINGLE_PATH_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub settings_update: BTreeMap<String, Value>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            settings_update: BTreeMap::new(),
            command_args: BTreeMap::new(),
        }
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn arg_strings(&self, key: &str) -> Vec<String> {
        self.command_args
            .get(key)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn arg_position(&self) -> Option<usize> {
        self.command_args
            .get("position")
            .and_then(Value::as_u64)
            .map(|value| value as usize)
    }
}

fn find_spec(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().find(|spec| spec.command == command).copied()
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = split_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn parse_position(raw: Option<&String>) -> Value {
    raw.and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(|value| Value::Number(value.into()))
        .unwrap_or(Value::Null)
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if command == LOGIN_COMMAND.command {
                let parts = split_args(arg);
                let mut intent = Intent::new(LOGIN_COMMAND.action, text);
                intent.command_args.insert(
                    "username".to_string(),
                    Value::String(parts.first().cloned().unwrap_or_default()),
                );
                intent.command_args.insert(
                    "password".to_string(),
                    Value::String(parts.get(1..).map(|rest| rest.join(" ")).unwrap_or_default()),
                );
                return intent;
            }

            if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent
                    .command_args
                    .insert(spec.arg_key.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(spec) = find_spec(&command, SETTING_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent
                    .settings_update
                    .insert(spec.arg_key.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(spec) = find_spec(&command, SINGLE_PATH_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent.command_args.insert(
                    spec.arg_key.to_string(),
                    Value::String(parse_single_path_arg(arg)),
                );
                return intent;
            }

            if let Some(spec) = find_spec(&command, MULTI_PATH_COMMANDS) {
                let mut intent = Intent::new(spec.action, text);
                intent.command_args.insert(
                    spec.arg_key.to_string(),
                    Value::Array(split_args(arg).into_iter().map(Value::String).collect()),
                );
                return intent;
            }

            if let Some(spec) = find_spec(&command, POSITION_COMMANDS) {
                let parts = split_args(arg);
                let mut intent = Intent::new(spec.action, text);
                intent
                    .command_args
                    .insert(spec.arg_key.to_string(), parse_position(parts.first()));
                if let Some(rest) = parts.get(1..).filter(|rest| !rest.is_empty()) {
                    intent
                        .command_args
                        .insert("path".to_string(), Value::String(rest.join(" ")));
                }
                return intent;
            }

            if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
                return Intent::new(spec.action, text);
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("generate", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_is_a_generate_intent() {
        let intent = parse_intent("  rocket launch  ");
        assert_eq!(intent.action, "generate");
        assert_eq!(intent.prompt.as_deref(), Some("rocket launch"));
    }

    #[test]
    fn blank_line_is_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn parse_login_with_quoted_password() {
        let intent = parse_intent("/login alice \"open sesame\"");
        assert_eq!(intent.action, "login");
        assert_eq!(intent.command_args["username"], json!("alice"));
        assert_eq!(intent.command_args["password"], json!("open sesame"));

        let bare = parse_intent("/login");
        assert_eq!(bare.arg_str("username"), None);
        assert_eq!(bare.arg_str("password"), None);
    }

    #[test]
    fn parse_settings_commands() {
        let kind = parse_intent("/kind icon");
        assert_eq!(kind.action, "set_kind");
        assert_eq!(kind.settings_update["kind"], json!("icon"));

        let size = parse_intent("/size 1024x1536");
        assert_eq!(size.action, "set_size");
        assert_eq!(size.settings_update["size"], json!("1024x1536"));

        let variations = parse_intent("/variations 3");
        assert_eq!(variations.action, "set_variations");
        assert_eq!(variations.settings_update["variations"], json!("3"));
    }

    #[test]
    fn parse_raw_text_commands_keep_the_remainder() {
        let edit = parse_intent("/edit make the card \"blue\"");
        assert_eq!(edit.action, "apply_edit");
        assert_eq!(edit.arg_str("prompt"), Some("make the card \"blue\""));

        let system = parse_intent("/system   Flat pictograms only.");
        assert_eq!(system.action, "set_system_prompt");
        assert_eq!(system.arg_str("text"), Some("Flat pictograms only."));
    }

    #[test]
    fn parse_reference_paths() {
        let refs = parse_intent("/refs a.png \"/tmp/b c.jpg\"");
        assert_eq!(refs.action, "set_references");
        assert_eq!(refs.arg_strings("paths"), vec!["a.png", "/tmp/b c.jpg"]);
    }

    #[test]
    fn parse_position_commands() {
        let select = parse_intent("/select 3");
        assert_eq!(select.action, "select_image");
        assert_eq!(select.arg_position(), Some(3));

        let save = parse_intent("/save 2 \"/tmp/out dir/icon.png\"");
        assert_eq!(save.action, "save_image");
        assert_eq!(save.arg_position(), Some(2));
        assert_eq!(save.arg_str("path"), Some("/tmp/out dir/icon.png"));

        assert_eq!(parse_intent("/select zero").arg_position(), None);
        assert_eq!(parse_intent("/select 0").arg_position(), None);
    }

    #[test]
    fn parse_export_and_upload_paths() {
        let export = parse_intent("/export");
        assert_eq!(export.action, "export");
        assert_eq!(export.arg_str("path"), None);

        let upload = parse_intent("/upload \"/tmp/my card.jpg\"");
        assert_eq!(upload.action, "upload_replacement");
        assert_eq!(upload.arg_str("path"), Some("/tmp/my card.jpg"));
    }

    #[test]
    fn parse_no_arg_commands() {
        assert_eq!(parse_intent("/back").action, "exit_edit");
        assert_eq!(parse_intent("/gallery").action, "show_gallery");
        assert_eq!(parse_intent("/multi").action, "multi_line");
        assert_eq!(parse_intent("/LOGOUT").action, "logout");
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
