//! Small helpers shared across the crate.

/// Returns early with `$error` when `$predicate` does not hold.
///
/// Works like `assert!`, but produces an `Err` instead of panicking, so protocol
/// violations flow back to the caller as regular parse or send errors.
///
/// ```ignore
/// ensure!(end <= max_header_size, ParseError::too_large_header(end, max_header_size));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Returns true when the comma separated header `value` lists `token`,
/// compared case-insensitively.
pub(crate) fn has_token(value: &[u8], token: &[u8]) -> bool {
    value.split(|b| *b == b',').any(|item| item.trim_ascii().eq_ignore_ascii_case(token))
}

/// Finds the first occurrence of `needle` in `haystack`, starting at `from`.
pub(crate) fn find_subslice(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() || from > haystack.len() - needle.len() {
        return None;
    }
    haystack[from..].windows(needle.len()).position(|window| window == needle).map(|pos| pos + from)
}
