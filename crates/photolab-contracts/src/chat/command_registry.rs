#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub arg_key: &'static str,
}

/// Commands whose whole remainder is a single free-form value.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "mode",
        action: "set_mode",
        arg_key: "mode",
    },
    CommandSpec {
        command: "ratio",
        action: "set_ratio",
        arg_key: "ratio",
    },
    CommandSpec {
        command: "note",
        action: "set_note",
        arg_key: "note",
    },
    CommandSpec {
        command: "key",
        action: "set_credential",
        arg_key: "key",
    },
];

/// Commands taking one path; quoting follows shell rules.
pub(crate) const PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "open",
        action: "open_image",
        arg_key: "path",
    },
    CommandSpec {
        command: "export",
        action: "export",
        arg_key: "path",
    },
    CommandSpec {
        command: "compare",
        action: "compare",
        arg_key: "path",
    },
];

/// Commands taking numbers.
pub(crate) const NUMERIC_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "slider",
        action: "set_slider",
        arg_key: "position",
    },
    CommandSpec {
        command: "select",
        action: "select_history",
        arg_key: "index",
    },
    CommandSpec {
        command: "pointer",
        action: "pointer_move",
        arg_key: "values",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "enhance",
        action: "enhance",
        arg_key: "",
    },
    CommandSpec {
        command: "readjust",
        action: "readjust",
        arg_key: "",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
        arg_key: "",
    },
    CommandSpec {
        command: "clear",
        action: "clear_session",
        arg_key: "",
    },
    CommandSpec {
        command: "history",
        action: "history",
        arg_key: "",
    },
    CommandSpec {
        command: "modes",
        action: "modes",
        arg_key: "",
    },
    CommandSpec {
        command: "status",
        action: "status",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
];

pub const LAB_HELP_COMMANDS: &[&str] = &[
    "/open PATH",
    "/mode NAME",
    "/ratio 1:1|4:3|3:4|16:9|9:16",
    "/note TEXT",
    "/enhance",
    "/readjust",
    "/reset",
    "/clear",
    "/history",
    "/select N",
    "/slider PCT",
    "/pointer X LEFT WIDTH",
    "/export [DIR]",
    "/compare [DIR]",
    "/key VALUE",
    "/modes",
    "/status",
    "/help",
    "/quit",
];
