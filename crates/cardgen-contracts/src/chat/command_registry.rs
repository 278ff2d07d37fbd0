#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "system",
        action: "set_system_prompt",
        arg_key: "text",
    },
    CommandSpec {
        command: "edit",
        action: "apply_edit",
        arg_key: "prompt",
    },
];

/// Commands that change a generation setting.
pub(crate) const SETTING_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "kind",
        action: "set_kind",
        arg_key: "kind",
    },
    CommandSpec {
        command: "size",
        action: "set_size",
        arg_key: "size",
    },
    CommandSpec {
        command: "variations",
        action: "set_variations",
        arg_key: "variations",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "upload",
        action: "upload_replacement",
        arg_key: "path",
    },
    CommandSpec {
        command: "export",
        action: "export",
        arg_key: "path",
    },
];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "refs",
    action: "set_references",
    arg_key: "paths",
}];

/// Commands addressing a gallery image by its 1-based listing position.
pub(crate) const POSITION_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "select",
        action: "select_image",
        arg_key: "position",
    },
    CommandSpec {
        command: "save",
        action: "save_image",
        arg_key: "position",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "logout",
        action: "logout",
        arg_key: "",
    },
    CommandSpec {
        command: "whoami",
        action: "whoami",
        arg_key: "",
    },
    CommandSpec {
        command: "system_reset",
        action: "reset_system_prompt",
        arg_key: "",
    },
    CommandSpec {
        command: "show_system",
        action: "show_system_prompt",
        arg_key: "",
    },
    CommandSpec {
        command: "refs_clear",
        action: "clear_references",
        arg_key: "",
    },
    CommandSpec {
        command: "multi",
        action: "multi_line",
        arg_key: "",
    },
    CommandSpec {
        command: "gallery",
        action: "show_gallery",
        arg_key: "",
    },
    CommandSpec {
        command: "progress",
        action: "show_progress",
        arg_key: "",
    },
    CommandSpec {
        command: "back",
        action: "exit_edit",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
];

pub(crate) const LOGIN_COMMAND: CommandSpec = CommandSpec {
    command: "login",
    action: "login",
    arg_key: "",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/login",
    "/logout",
    "/whoami",
    "/kind",
    "/variations",
    "/size",
    "/system",
    "/system_reset",
    "/show_system",
    "/refs",
    "/refs_clear",
    "/multi",
    "/gallery",
    "/progress",
    "/save",
    "/select",
    "/upload",
    "/edit",
    "/back",
    "/export",
    "/help",
];
