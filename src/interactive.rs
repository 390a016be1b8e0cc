//! Decide whether a command line needs a terminal attached.
//!
//! This is a UX heuristic, not a security boundary: a miss only means the
//! command runs with captured output instead of a PTY.

use std::collections::HashSet;
use std::sync::OnceLock;

/// Commands that need a PTY for continuous or full-screen output.
const INTERACTIVE_COMMANDS: &[&str] = &[
    // System monitors
    "top",
    "htop",
    "btop",
    "atop",
    "iotop",
    "iftop",
    "nload",
    "bmon",
    "glances",
    "nmon",
    "nethogs",
    "powertop",
    // Editors
    "vi",
    "vim",
    "nvim",
    "nano",
    "emacs",
    "pico",
    "joe",
    "mcedit",
    // File managers
    "mc",
    "ranger",
    "nnn",
    "lf",
    "vifm",
    // Multiplexers
    "tmux",
    "screen",
    "byobu",
    // Shells and REPLs
    "bash",
    "zsh",
    "fish",
    "sh",
    "python",
    "python3",
    "ipython",
    "node",
    "irb",
    "ghci",
    "lua",
    "php",
    "mysql",
    "psql",
    "sqlite3",
    "mongo",
    "redis-cli",
    // Pagers and the rest
    "less",
    "more",
    "watch",
    "cfdisk",
    "parted",
    "cgdisk",
];

fn registry() -> &'static HashSet<&'static str> {
    static REGISTRY: OnceLock<HashSet<&'static str>> = OnceLock::new();
    REGISTRY.get_or_init(|| INTERACTIVE_COMMANDS.iter().copied().collect())
}

/// Returns true if `command` should run with a PTY rather than captured output.
pub fn is_interactive_command(command: &str) -> bool {
    let mut parts = command.split_whitespace();
    let Some(first) = parts.next() else {
        return false;
    };

    let mut name = first.to_lowercase();
    // /usr/bin/top -> top; a trailing slash leaves the token alone
    if let Some(idx) = name.rfind('/') {
        if idx + 1 < name.len() {
            name = name[idx + 1..].to_string();
        }
    }

    if registry().contains(name.as_str()) {
        return true;
    }

    let mut args = parts;
    match name.as_str() {
        "tail" => args.any(|arg| arg == "-F" || arg == "--follow" || arg.starts_with("-f")),
        "journalctl" => args.any(|arg| arg == "-f" || arg == "--follow"),
        "dmesg" => args.any(|arg| arg == "-w" || arg == "--follow"),
        _ => false,
    }
}
