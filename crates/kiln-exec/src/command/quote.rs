/// Quote a single token for a POSIX shell.
///
/// Tokens made only of characters the shell never interprets are returned unchanged;
/// everything else is single-quoted with embedded quotes spliced as `'"'"'`.
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_.:/%+=,@".contains(ch))
    {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\"'\"'"))
    }
}

/// Quote and join tokens into one shell command line.
pub fn shell_join<S: AsRef<str>>(tokens: &[S]) -> String {
    tokens
        .iter()
        .map(|t| shell_quote(t.as_ref()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Whether `key` may appear on the left of a shell assignment.
pub fn is_env_name(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
