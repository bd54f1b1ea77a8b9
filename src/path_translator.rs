//! Host path to mount-source syntax.
//!
//! Docker on Windows (docker-machine / toolbox) expects `//c/Users/...` instead of
//! `C:\Users\...`. POSIX paths go through unchanged.

use std::path::Path;

/// Translate a host path into the form accepted by the runtime's mount option.
///
/// A leading drive letter `X:` becomes `//x` and every backslash becomes a forward slash.
/// Already translated paths are returned unchanged.
pub fn translate(host_path: &str) -> String {
    let mut out = String::with_capacity(host_path.len() + 1);
    let mut rest = host_path;

    let bytes = host_path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        out.push_str("//");
        out.push(char::from(bytes[0].to_ascii_lowercase()));
        rest = &host_path[2..];
    }

    out.extend(rest.chars().map(|c| if c == '\\' { '/' } else { c }));
    out
}

/// [`translate`] for a [`Path`]; non UTF-8 parts are replaced lossily.
pub fn translate_path(host_path: &Path) -> String {
    translate(&host_path.to_string_lossy())
}

#[cfg(test)]
mod translate_tests {
    use super::*;

    #[test]
    fn windows_drive() {
        assert_eq!(translate("C:\\Users\\x"), "//c/Users/x");
        assert_eq!(translate("d:/games/GAME_1/logs"), "//d/games/GAME_1/logs");
    }

    #[test]
    fn posix_paths_are_untouched() {
        assert_eq!(translate("/home/me/.scbw/maps"), "/home/me/.scbw/maps");
        assert_eq!(translate("relative/dir"), "relative/dir");
        assert_eq!(translate(""), "");
    }

    #[test]
    fn idempotent() {
        for p in ["C:\\Users\\x", "/tmp/a\\b", "//c/Users/x", "e:", "z:\\"] {
            let once = translate(p);
            assert_eq!(translate(&once), once, "{p}");
        }
    }
}
