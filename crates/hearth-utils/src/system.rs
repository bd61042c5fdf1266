use std::env;

/// Locale used when the environment names none or asks for no translation.
pub const FALLBACK_LOCALE: &str = "en";

/// Returns `true` if the process runs with an effective UID of 0.
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Derives the message locale from `LC_ALL`, `LC_MESSAGES` and `LANG`, in
/// that order.
///
/// The first variable that is set and non-empty decides. Encoding and
/// modifier suffixes are stripped (`de_DE.UTF-8@euro` becomes `de_DE`);
/// `C` and `POSIX` map to [`FALLBACK_LOCALE`].
pub fn locale_from_env() -> String {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .into_iter()
        .filter_map(|var| env::var(var).ok())
        .find(|value| !value.trim().is_empty())
        .map(|value| normalize_locale(&value))
        .unwrap_or_else(|| FALLBACK_LOCALE.to_string())
}

/// Strips encoding and modifier from a POSIX locale name.
pub fn normalize_locale(raw: &str) -> String {
    let raw = raw.trim();
    let lang = raw
        .split(|c| c == '.' || c == '@')
        .next()
        .unwrap_or_default();

    match lang {
        "" | "C" | "POSIX" => FALLBACK_LOCALE.to_string(),
        lang => lang.to_string(),
    }
}
