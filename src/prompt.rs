//! Banner and prompt text for interactive sessions.

use crate::env::Environment;

pub const RED: &str = "\x1b[1;31m";
pub const GREEN: &str = "\x1b[1;32m";
pub const YELLOW: &str = "\x1b[1;33m";
pub const BLUE: &str = "\x1b[1;34m";
pub const CYAN: &str = "\x1b[38;5;87m";
pub const RESET: &str = "\x1b[0m";

/// Clears the terminal and moves the cursor to the top-left corner.
pub const CLEAR_SCREEN: &str = "\x1b[2J\x1b[1;1H";

/// Second prompt line, the one the user types after.
pub const MARKER: &str = "╰─$ ";

const LOGO: [&str; 11] = [
    "   _____ _          _ _ ",
    "  / ____| |        | | |",
    " | (___ | |__   ___| | |",
    "  \\___ \\| '_ \\ / _ \\ | |",
    "  ____) | | | |  __/ | |",
    " |_____/|_| |_|\\___|_|_|",
    "       / \\__            _        ",
    "      (    @\\_       | |       ",
    "       /         O      | |       ",
    "      /   (____/       | |      ",
    "     /__ /    U        ||     ",
];

pub fn banner() -> String {
    let mut text = String::new();
    for (i, line) in LOGO.iter().enumerate() {
        let color = match i {
            0 => RED,
            6 => BLUE,
            _ => "",
        };
        text.push_str(&format!("{color}{:8} {line}\n", ""));
    }
    text.push_str(YELLOW);
    text.push_str(" Custom commands:\n");
    text.push_str(" config help: configuration file commands.\n");
    text.push_str(" metrics help: monitor and metrics commands.\n");
    text.push('\n');
    text.push_str(RESET);
    text
}

/// `~/` when the working directory is the home directory, the full path otherwise.
pub fn display_path(pwd: &str, home: Option<&str>) -> String {
    match home {
        Some(home) if home == pwd => "~/".to_string(),
        _ => pwd.to_string(),
    }
}

pub fn format_header(user: &str, host: &str, path: &str) -> String {
    format!("╭─{GREEN}{user}@{host}{RESET}:{path}")
}

/// First prompt line, built from the current environment.
pub fn header(env: &Environment) -> String {
    let user = env.get_var("USER").unwrap_or_default();
    let host = nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let pwd = env.get_var("PWD").unwrap_or_else(|| {
        env.current_dir()
            .map(|dir| dir.display().to_string())
            .unwrap_or_default()
    });
    let home = env.get_var("HOME");
    format_header(&user, &host, &display_path(&pwd, home.as_deref()))
}
